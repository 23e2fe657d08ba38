//! Vista Core - Foundational types for the vista compositing client
//!
//! This crate provides the types that the other vista crates depend on:
//! - `ContentHash` - SHA-256 based content hashing, streamed from any reader
//! - `VistaError` / `ErrorKind` - the error taxonomy and Result alias

mod error;
mod hash;

pub use error::{ErrorKind, Result, VistaError};
pub use hash::ContentHash;

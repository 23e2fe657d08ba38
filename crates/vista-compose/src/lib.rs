//! Vista Compose - Request orchestration for 3D scene compositing
//!
//! Turns a 3D scene, a hero object, a camera and a text prompt into images
//! rendered by a remote generative service. Scene and style assets are
//! uploaded once per content fingerprint and reused for the rest of the
//! session; every request that leaves the process is kept in an
//! [`ExchangeLog`] for inspection.

pub mod asset;
pub mod cache;
pub mod cancel;
pub mod config;
pub mod exchange;
pub mod job;
pub mod orchestrator;
pub mod output;
pub mod request;
pub mod transport;
pub mod uploader;

pub use asset::{AssetHandle, AssetRef, AssetRole, Fingerprint};
pub use cache::{AssetCache, CacheOutcome};
pub use cancel::CancelToken;
pub use config::VistaConfig;
pub use exchange::{ExchangeKind, ExchangeLog, ExchangeOutcome, ExchangeRecord, ExchangeRequest};
pub use job::{GenerationJob, JobClient, JobStatus, OutputRef};
pub use orchestrator::{NormalizedParams, Orchestrator, Session, UiParams};
pub use output::{GeneratedImage, ImageWriter};
pub use request::{
    ContentClass, GenerationRequest, ImageModel, Payload, RequestBuilder, Resolution,
    RESOLUTION_PRESETS,
};
pub use transport::{HttpTransport, MockTransport, Transport, TransportError};
pub use uploader::AssetUploader;

//! Transport seam between the core and the remote compositing API
//!
//! Everything that leaves the process goes through a [`Transport`]. The real
//! implementation speaks HTTP via `ureq`; [`mock::MockTransport`] answers
//! in-process for tests and offline runs.

pub mod http;
pub mod mock;

use std::fmt;
use std::io::Read;

pub use http::HttpTransport;
pub use mock::MockTransport;

/// Failure reported by a transport call
#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The server answered with a non-success status
    Status {
        code: u16,
        message: String,
        body: Option<serde_json::Value>,
    },
    /// The request never got a usable answer (DNS, TLS, timeout, reset...)
    Network(String),
    /// The response arrived but could not be decoded
    Decode(String),
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Message without the status prefix
    pub fn detail(&self) -> String {
        match self {
            TransportError::Status { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Build a status error, preferring the server's `message` field
    pub fn from_status(code: u16, body: Option<serde_json::Value>) -> Self {
        let message = body
            .as_ref()
            .and_then(|b| b.get("message"))
            .and_then(|m| m.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| fallback_message(code).to_string());
        TransportError::Status {
            code,
            message,
            body,
        }
    }

    /// JSON shape recorded in the exchange log
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            TransportError::Status {
                code,
                message,
                body,
            } => serde_json::json!({
                "status": code,
                "message": message,
                "body": body,
            }),
            TransportError::Network(msg) => serde_json::json!({ "network": msg }),
            TransportError::Decode(msg) => serde_json::json!({ "decode": msg }),
        }
    }
}

fn fallback_message(code: u16) -> &'static str {
    match code {
        403 => "Access to this resource is forbidden.",
        _ => "No additional information message.",
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Status { code, message, .. } => {
                write!(f, "[Error {}] {}", code, message)
            }
            TransportError::Network(msg) => write!(f, "network error: {}", msg),
            TransportError::Decode(msg) => write!(f, "invalid response: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

/// A file body handed to [`Transport::upload`]
pub struct UploadBody {
    /// Name sent alongside the content (the local file name)
    pub file_name: String,
    /// Declared length of `content`, when known
    pub content_length: Option<u64>,
    /// Streamed file content
    pub content: Box<dyn Read + Send + Sync>,
}

/// Binary payload fetched from an output image URL
#[derive(Debug, Clone)]
pub struct Downloaded {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Calls the core makes against the remote API
pub trait Transport: Send + Sync {
    /// Short name for logs ("http", "mock")
    fn name(&self) -> &str;

    /// Upload a file as multipart form data, returning the JSON answer
    fn upload(
        &self,
        url: &str,
        api_key: &str,
        body: UploadBody,
    ) -> Result<serde_json::Value, TransportError>;

    /// POST an already-serialized JSON body
    fn post_json(
        &self,
        url: &str,
        api_key: &str,
        body: &[u8],
    ) -> Result<serde_json::Value, TransportError>;

    /// GET a JSON document
    fn get_json(&self, url: &str, api_key: &str) -> Result<serde_json::Value, TransportError>;

    /// GET raw bytes, unauthenticated (output URLs are pre-signed)
    fn download(&self, url: &str) -> Result<Downloaded, TransportError>;
}

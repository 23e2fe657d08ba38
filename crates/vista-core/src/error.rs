//! Error types for vista

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for vista operations
#[derive(Debug, Error)]
pub enum VistaError {
    /// Bad local input, never sent to the remote service
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Upload of {} failed: {message}", .path.display())]
    Upload { path: PathBuf, message: String },

    /// Payload rejected by the service or lost in transport
    #[error("Submit failed{}: {message}", status_suffix(.status))]
    Submit { status: Option<u16>, message: String },

    /// A status poll could not be completed; the remote job may still run
    #[error("Status check for job {job_id} failed: {message}")]
    Status { job_id: String, message: String },

    #[error("Job {job_id} still pending after {waited_secs:.1}s")]
    Timeout { job_id: String, waited_secs: f64 },

    /// Remote-reported generation failure
    #[error("Job {job_id} failed: {reason}")]
    Generation { job_id: String, reason: String },

    #[error("Polling of job {job_id} was cancelled")]
    Cancelled { job_id: String },

    #[error("Failed to download {url}: {message}")]
    Download { url: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" [HTTP {}]", code),
        None => String::new(),
    }
}

/// Coarse error category, displayed by the UI next to the message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Upload,
    Submit,
    Status,
    Timeout,
    Generation,
    Cancelled,
    Download,
    Config,
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Validation => "Input Error",
            ErrorKind::Upload => "Upload Error",
            ErrorKind::Submit => "Submit Error",
            ErrorKind::Status => "Status Error",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Generation => "Generation Error",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Download => "Download Error",
            ErrorKind::Config => "Config Error",
            ErrorKind::Io => "IO Error",
        };
        f.write_str(name)
    }
}

impl VistaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VistaError::Validation(_) => ErrorKind::Validation,
            VistaError::Upload { .. } => ErrorKind::Upload,
            VistaError::Submit { .. } => ErrorKind::Submit,
            VistaError::Status { .. } => ErrorKind::Status,
            VistaError::Timeout { .. } => ErrorKind::Timeout,
            VistaError::Generation { .. } => ErrorKind::Generation,
            VistaError::Cancelled { .. } => ErrorKind::Cancelled,
            VistaError::Download { .. } => ErrorKind::Download,
            VistaError::Config(_) | VistaError::TomlParse(_) => ErrorKind::Config,
            VistaError::Io(_) => ErrorKind::Io,
        }
    }

    /// Remote job left running, if this error allows polling to resume
    pub fn resumable_job(&self) -> Option<&str> {
        match self {
            VistaError::Timeout { job_id, .. }
            | VistaError::Status { job_id, .. }
            | VistaError::Cancelled { job_id } => {
                Some(job_id.as_str())
            }
            _ => None,
        }
    }
}

/// Result type alias for vista operations
pub type Result<T> = std::result::Result<T, VistaError>;

impl From<toml::de::Error> for VistaError {
    fn from(err: toml::de::Error) -> Self {
        VistaError::TomlParse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_message_includes_status() {
        let err = VistaError::Submit {
            status: Some(401),
            message: "Invalid API key".to_string(),
        };
        assert_eq!(err.to_string(), "Submit failed [HTTP 401]: Invalid API key");

        let err = VistaError::Submit {
            status: None,
            message: "connection refused".to_string(),
        };
        assert_eq!(err.to_string(), "Submit failed: connection refused");
    }

    #[test]
    fn test_kinds() {
        assert_eq!(
            VistaError::Validation("x".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(VistaError::TomlParse("x".into()).kind(), ErrorKind::Config);
        assert_eq!(ErrorKind::Validation.to_string(), "Input Error");
    }

    #[test]
    fn test_resumable_job() {
        let timeout = VistaError::Timeout {
            job_id: "job-7".into(),
            waited_secs: 3.0,
        };
        assert_eq!(timeout.resumable_job(), Some("job-7"));

        let failed = VistaError::Generation {
            job_id: "job-7".into(),
            reason: "content policy".into(),
        };
        assert_eq!(failed.resumable_job(), None);
    }
}

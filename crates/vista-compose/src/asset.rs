//! Local asset identity and remote asset handles

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use vista_core::{ContentHash, Result, VistaError};

/// What an uploaded file is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetRole {
    Scene,
    StyleImage,
}

impl fmt::Display for AssetRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetRole::Scene => write!(f, "scene"),
            AssetRole::StyleImage => write!(f, "style_image"),
        }
    }
}

/// Content identity of a file: digest of its bytes plus its length.
/// Equal fingerprints mean the same upload, whatever the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub hash: ContentHash,
    pub size: u64,
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}B", self.hash, self.size)
    }
}

/// A local file about to be sent to the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRef {
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
    pub modified: Option<SystemTime>,
    pub role: AssetRole,
}

impl AssetRef {
    /// Hash `path` and capture its metadata. The bytes are hashed on every
    /// call; size and mtime never stand in for content.
    pub fn from_path<P: AsRef<Path>>(path: P, role: AssetRole) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| unreadable(path, e))?;
        let modified = file.metadata().and_then(|m| m.modified()).ok();
        let (hash, size) = ContentHash::from_reader(file).map_err(|e| unreadable(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            fingerprint: Fingerprint { hash, size },
            modified,
            role,
        })
    }

    /// Name sent to the upload endpoint
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.bin", self.role))
    }
}

fn unreadable(path: &Path, e: std::io::Error) -> VistaError {
    VistaError::Upload {
        path: path.to_path_buf(),
        message: format!("cannot read file: {}", e),
    }
}

/// Remote identifier of uploaded content
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetHandle(String);

impl AssetHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

//! Uploads local assets, consulting the session cache first

use crate::asset::{AssetHandle, AssetRef, AssetRole};
use crate::cache::{AssetCache, CacheOutcome};
use crate::exchange::{ExchangeKind, ExchangeLog, ExchangeOutcome, ExchangeRequest};
use crate::transport::{Transport, UploadBody};
use std::path::Path;
use std::sync::Arc;
use vista_core::{Result, VistaError};

/// Sends scene and style files to the upload endpoint, once per content
pub struct AssetUploader {
    transport: Arc<dyn Transport>,
    cache: Arc<AssetCache>,
    exchanges: Arc<ExchangeLog>,
    endpoint: String,
}

impl AssetUploader {
    pub fn new(
        transport: Arc<dyn Transport>,
        cache: Arc<AssetCache>,
        exchanges: Arc<ExchangeLog>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            cache,
            exchanges,
            endpoint: endpoint.into(),
        }
    }

    /// Fingerprint `path` and make sure its content is on the service.
    /// The [`AssetRef`] is returned so callers can invalidate the handle later.
    pub fn ensure_file(
        &self,
        path: &Path,
        role: AssetRole,
        api_key: &str,
    ) -> Result<(AssetRef, AssetHandle)> {
        let asset = AssetRef::from_path(path, role)?;
        let handle = self.ensure_uploaded(&asset, api_key)?;
        Ok((asset, handle))
    }

    /// Return the handle for `asset`, uploading only on a cache miss
    pub fn ensure_uploaded(&self, asset: &AssetRef, api_key: &str) -> Result<AssetHandle> {
        let (handle, outcome) = self
            .cache
            .get_or_upload(asset.fingerprint, || self.upload(asset, api_key))?;

        match outcome {
            CacheOutcome::Hit => log::debug!(
                "Cache hit for {} {} -> {}",
                asset.role,
                asset.path.display(),
                handle
            ),
            CacheOutcome::Joined => log::debug!(
                "Joined in-flight upload of {} -> {}",
                asset.path.display(),
                handle
            ),
            CacheOutcome::Uploaded => log::info!(
                "Uploaded {} {} ({} bytes) -> {}",
                asset.role,
                asset.path.display(),
                asset.fingerprint.size,
                handle
            ),
        }
        Ok(handle)
    }

    fn upload(&self, asset: &AssetRef, api_key: &str) -> Result<AssetHandle> {
        let file = std::fs::File::open(&asset.path).map_err(|e| VistaError::Upload {
            path: asset.path.clone(),
            message: format!("cannot read file: {}", e),
        })?;

        let file_name = asset.file_name();
        let ticket = self.exchanges.begin(ExchangeRequest::new(
            ExchangeKind::Upload,
            "POST",
            &self.endpoint,
            serde_json::json!({
                "name": file_name,
                "role": asset.role,
                "size": asset.fingerprint.size,
                "fingerprint": asset.fingerprint.hash.to_prefixed_hex(),
            }),
        ));

        let body = UploadBody {
            file_name,
            content_length: Some(asset.fingerprint.size),
            content: Box::new(std::io::BufReader::new(file)),
        };
        match self.transport.upload(&self.endpoint, api_key, body) {
            Ok(response) => {
                self.exchanges
                    .finish(ticket, ExchangeOutcome::Response(response.clone()));
                parse_upload_response(&response).map_err(|message| VistaError::Upload {
                    path: asset.path.clone(),
                    message,
                })
            }
            Err(e) => {
                self.exchanges.finish(ticket, ExchangeOutcome::Error(e.to_json()));
                Err(VistaError::Upload {
                    path: asset.path.clone(),
                    message: e.to_string(),
                })
            }
        }
    }
}

/// Extract the space id from an upload answer
pub fn parse_upload_response(response: &serde_json::Value) -> std::result::Result<AssetHandle, String> {
    response
        .get("id")
        .and_then(|id| id.as_str())
        .filter(|id| !id.is_empty())
        .map(AssetHandle::new)
        .ok_or_else(|| {
            format!(
                "Unexpected upload response: {}",
                serde_json::to_string(response).unwrap_or_default()
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockTransport, TransportError};
    use std::path::PathBuf;
    use std::time::Duration;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("vista_upload_test_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn uploader(mock: Arc<MockTransport>, log: Arc<ExchangeLog>) -> AssetUploader {
        AssetUploader::new(
            mock,
            Arc::new(AssetCache::default()),
            log,
            "https://api.test/v1beta/spaces",
        )
    }

    #[test]
    fn test_second_upload_of_same_content_is_cached() {
        let dir = temp_dir();
        let a = dir.join("scene.glb");
        let b = dir.join("copy_of_scene.glb");
        std::fs::write(&a, b"glb bytes").unwrap();
        std::fs::write(&b, b"glb bytes").unwrap();

        let mock = Arc::new(MockTransport::new());
        let log = Arc::new(ExchangeLog::new());
        let up = uploader(Arc::clone(&mock), Arc::clone(&log));

        let (_, h1) = up.ensure_file(&a, AssetRole::Scene, "key").unwrap();
        let (_, h2) = up.ensure_file(&a, AssetRole::Scene, "key").unwrap();
        let (_, h3) = up.ensure_file(&b, AssetRole::Scene, "key").unwrap();

        assert_eq!(h1, h2);
        assert_eq!(h1, h3);
        assert_eq!(mock.counts().uploads, 1);
        assert_eq!(log.of_kind(ExchangeKind::Upload).len(), 1);
        assert_eq!(mock.uploaded(), vec![("scene.glb".to_string(), 9)]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_rewritten_file_with_restored_mtime_uploads_again() {
        let dir = temp_dir();
        let path = dir.join("scene.glb");
        std::fs::write(&path, b"AAAA").unwrap();

        let mock = Arc::new(MockTransport::new());
        let log = Arc::new(ExchangeLog::new());
        let up = uploader(Arc::clone(&mock), Arc::clone(&log));

        let (first, h1) = up.ensure_file(&path, AssetRole::Scene, "key").unwrap();
        let mtime = std::fs::metadata(&path).unwrap().modified().unwrap();
        std::fs::write(&path, b"BBBB").unwrap();
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();
        let (second, h2) = up.ensure_file(&path, AssetRole::Scene, "key").unwrap();

        assert_ne!(first.fingerprint, second.fingerprint);
        assert_ne!(h1, h2);
        assert_eq!(mock.counts().uploads, 2);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_upload_failure_is_logged_and_not_cached() {
        let dir = temp_dir();
        let path = dir.join("scene.usdz");
        std::fs::write(&path, b"usdz bytes").unwrap();

        let mock = Arc::new(MockTransport::new());
        mock.fail_uploads(TransportError::from_status(403, None));
        let log = Arc::new(ExchangeLog::new());
        let up = uploader(Arc::clone(&mock), Arc::clone(&log));

        let err = up.ensure_file(&path, AssetRole::Scene, "key").unwrap_err();
        match err {
            VistaError::Upload { message, .. } => {
                assert!(message.contains("forbidden"), "{}", message)
            }
            other => panic!("unexpected error: {:?}", other),
        }
        let records = log.all();
        assert_eq!(records.len(), 1);
        assert!(matches!(records[0].outcome, ExchangeOutcome::Error(_)));
        assert_eq!(records[0].request.body["size"], 10);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unreadable_file_never_hits_network() {
        let mock = Arc::new(MockTransport::new());
        let log = Arc::new(ExchangeLog::new());
        let up = uploader(Arc::clone(&mock), Arc::clone(&log));

        let err = up
            .ensure_file(Path::new("/no/such/scene.glb"), AssetRole::Scene, "key")
            .unwrap_err();
        assert!(matches!(err, VistaError::Upload { .. }));
        assert_eq!(mock.counts().uploads, 0);
        assert!(log.is_empty());
    }

    #[test]
    fn test_concurrent_ensure_uploads_once() {
        let dir = temp_dir();
        let path = dir.join("scene.glb");
        std::fs::write(&path, b"shared scene").unwrap();

        let mock = Arc::new(MockTransport::new().with_upload_delay(Duration::from_millis(50)));
        let log = Arc::new(ExchangeLog::new());
        let up = Arc::new(uploader(Arc::clone(&mock), Arc::clone(&log)));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let up = Arc::clone(&up);
                let path = path.clone();
                std::thread::spawn(move || up.ensure_file(&path, AssetRole::Scene, "key").unwrap().1)
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(results.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(mock.counts().uploads, 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_parse_upload_response() {
        let ok = serde_json::json!({ "id": "space-42", "name": "scene.glb" });
        assert_eq!(parse_upload_response(&ok).unwrap().id(), "space-42");
        assert!(parse_upload_response(&serde_json::json!({ "id": "" })).is_err());
        assert!(parse_upload_response(&serde_json::json!({})).is_err());
    }
}

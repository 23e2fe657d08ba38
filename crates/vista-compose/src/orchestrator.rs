//! The single `generate` entry point used by the UI
//!
//! A [`Session`] carries everything that outlives one generation: the API key,
//! the asset cache and the exchange log. Several threads
//! may run [`Orchestrator::generate`] against the same session at once; each
//! call owns its own job.

use crate::asset::AssetRole;
use crate::cache::AssetCache;
use crate::cancel::CancelToken;
use crate::config::VistaConfig;
use crate::exchange::ExchangeLog;
use crate::job::{GenerationJob, JobClient};
use crate::output::GeneratedImage;
use crate::request::{ContentClass, GenerationRequest, ImageModel, RequestBuilder, Resolution};
use crate::transport::Transport;
use crate::uploader::AssetUploader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use vista_core::{Result, VistaError};

/// Scene formats the service accepts
pub const SCENE_EXTENSIONS: [&str; 2] = ["glb", "usdz"];

/// Raw form fields as the UI hands them over
#[derive(Debug, Clone)]
pub struct UiParams {
    /// Overrides the session key when set
    pub api_key: Option<String>,
    pub scene: Option<PathBuf>,
    pub prompt: String,
    pub hero: String,
    pub camera: String,
    /// Model id or display name
    pub model: String,
    pub image_count: u32,
    /// Negative values let the service choose
    pub seed: Option<i64>,
    /// Preset label or `WxH`
    pub resolution: String,
    pub content_class: Option<String>,
    pub style_image: Option<PathBuf>,
    pub style_strength: Option<u8>,
}

impl Default for UiParams {
    fn default() -> Self {
        Self {
            api_key: None,
            scene: None,
            prompt: String::new(),
            hero: String::new(),
            camera: "Camera".to_string(),
            model: ImageModel::default().id().to_string(),
            image_count: 1,
            seed: None,
            resolution: Resolution::default().to_string(),
            content_class: None,
            style_image: None,
            style_strength: None,
        }
    }
}

/// UI fields after validation
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedParams {
    pub api_key: String,
    pub scene: PathBuf,
    pub style_image: Option<PathBuf>,
    pub request: GenerationRequest,
}

/// State shared by every generation of one user session
#[derive(Debug)]
pub struct Session {
    api_key: Option<String>,
    cache: Arc<AssetCache>,
    exchanges: Arc<ExchangeLog>,
}

impl Session {
    pub fn new(api_key: Option<String>, cache: AssetCache) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            cache: Arc::new(cache),
            exchanges: Arc::new(ExchangeLog::new()),
        }
    }

    pub fn cache(&self) -> &AssetCache {
        &self.cache
    }

    /// Every request this session has sent, in send order
    pub fn exchanges(&self) -> &ExchangeLog {
        &self.exchanges
    }

    fn resolve_key(&self, override_key: Option<&str>) -> Result<String> {
        override_key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .or(self.api_key.as_deref())
            .map(str::to_string)
            .ok_or_else(|| {
                VistaError::Validation(
                    "Missing API key, please log in at https://s3d.adobe.io/ to get yours."
                        .to_string(),
                )
            })
    }
}

/// Runs upload → build → submit → poll → fetch
pub struct Orchestrator {
    config: VistaConfig,
    transport: Arc<dyn Transport>,
    builder: RequestBuilder,
}

impl Orchestrator {
    pub fn new(config: VistaConfig, transport: Arc<dyn Transport>) -> Self {
        let builder = RequestBuilder::new(config.limits.clone());
        log::debug!(
            "Orchestrator using {} transport against {}",
            transport.name(),
            config.api.base_url
        );
        Self {
            config,
            transport,
            builder,
        }
    }

    pub fn config(&self) -> &VistaConfig {
        &self.config
    }

    /// A fresh session using the configured key and cache expiry
    pub fn session(&self) -> Session {
        Session::new(
            self.config.api.api_key.clone(),
            AssetCache::new(self.config.cache.ttl()),
        )
    }

    /// Validate UI fields without touching the network
    pub fn normalize(&self, session: &Session, params: &UiParams) -> Result<NormalizedParams> {
        let api_key = session.resolve_key(params.api_key.as_deref())?;

        let scene = params.scene.clone().ok_or_else(|| {
            VistaError::Validation(
                "Missing scene file, please load a GLB or USDZ file.".to_string(),
            )
        })?;
        if !is_supported_scene(&scene) {
            return Err(VistaError::Validation(
                "Invalid scene file format, please load a GLB or USDZ file.".to_string(),
            ));
        }
        if !scene.is_file() {
            return Err(VistaError::Validation(format!(
                "Scene file {} does not exist or is not a file.",
                scene.display()
            )));
        }
        let is_usdz = scene
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("usdz"));
        if !is_usdz {
            log::warn!(
                "The scene is not in USDZ format, area lights might not be processed as expected."
            );
        }

        if params.hero.trim().is_empty() {
            return Err(VistaError::Validation(
                "Missing hero object, please add the exact name of the hero object in the 3D scene."
                    .to_string(),
            ));
        }
        if params.camera.trim().is_empty() {
            return Err(VistaError::Validation(
                "Missing camera, please add the exact name of the camera in the 3D scene."
                    .to_string(),
            ));
        }
        if params.resolution.trim().is_empty() {
            return Err(VistaError::Validation("Missing resolution.".to_string()));
        }
        let resolution = Resolution::parse(&params.resolution)?;
        if params.prompt.trim().is_empty() {
            return Err(VistaError::Validation("Missing prompt.".to_string()));
        }

        let content_class = params.content_class.as_deref().map(|raw| {
            ContentClass::parse(raw).unwrap_or_else(|| {
                log::warn!(
                    "Content class must be one of [photo, art] (got {}). Defaulting to \"photo\".",
                    raw
                );
                ContentClass::Photo
            })
        });

        if let Some(style) = &params.style_image {
            if !style.is_file() {
                return Err(VistaError::Validation(
                    "A style image has been provided but is invalid. Please check that the image still exists and that it can be read."
                        .to_string(),
                ));
            }
        }

        let model = ImageModel::parse(&params.model).ok_or_else(|| {
            let available: Vec<_> = ImageModel::ALL.iter().map(|m| m.id()).collect();
            VistaError::Validation(format!(
                "An invalid model was selected. Only {} are available.",
                available.join(", ")
            ))
        })?;

        let seed = match params.seed {
            Some(s) if s < 0 => None,
            Some(s) => Some(u32::try_from(s).map_err(|_| {
                VistaError::Validation(format!("Seed {} is out of range.", s))
            })?),
            None => None,
        };

        let request = GenerationRequest {
            prompt: params.prompt.trim().to_string(),
            hero: params.hero.trim().to_string(),
            camera: params.camera.trim().to_string(),
            model,
            image_count: params.image_count,
            seed,
            resolution,
            content_class,
            style_strength: params.style_strength,
        };
        self.builder
            .validate(&request, params.style_image.is_some())?;

        Ok(NormalizedParams {
            api_key,
            scene,
            style_image: params.style_image.clone(),
            request,
        })
    }

    /// Produce images for `params`, or the first error met along the way.
    ///
    /// Uploaded assets stay in the session cache whatever the outcome, so a
    /// retry only repeats the steps that did not complete. The exception is a
    /// submit rejected with 404 or 410: the service no longer knows the
    /// uploaded spaces, so their handles are dropped and the next call
    /// uploads again.
    pub fn generate(
        &self,
        session: &Session,
        params: &UiParams,
        cancel: &CancelToken,
    ) -> Result<Vec<GeneratedImage>> {
        let normalized = self.normalize(session, params)?;
        let api_key = normalized.api_key.as_str();

        let uploader = self.uploader(session);
        let (scene_ref, scene) =
            uploader.ensure_file(&normalized.scene, AssetRole::Scene, api_key)?;
        let style = normalized
            .style_image
            .as_deref()
            .map(|path| uploader.ensure_file(path, AssetRole::StyleImage, api_key))
            .transpose()?;

        let payload = self.builder.build(
            &normalized.request,
            &scene,
            style.as_ref().map(|(_, handle)| handle),
        )?;

        let jobs = self.job_client(session);
        let mut job = match jobs.submit(&payload, api_key) {
            Ok(job) => job,
            Err(e) => {
                if is_stale_asset_rejection(&e) {
                    let assets =
                        std::iter::once(&scene_ref).chain(style.as_ref().map(|(asset, _)| asset));
                    for asset in assets {
                        if session.cache.invalidate(&asset.fingerprint) {
                            log::info!(
                                "Dropped cached handle for {} {} after the service rejected it",
                                asset.role,
                                asset.path.display()
                            );
                        }
                    }
                }
                return Err(e);
            }
        };
        self.finish(&jobs, &mut job, api_key, cancel)
    }

    /// Continue waiting for a job left behind by a timeout or cancellation
    pub fn resume(
        &self,
        session: &Session,
        job_id: &str,
        cancel: &CancelToken,
    ) -> Result<Vec<GeneratedImage>> {
        let api_key = session.resolve_key(None)?;
        if job_id.trim().is_empty() {
            return Err(VistaError::Validation("Missing job id.".to_string()));
        }
        let jobs = self.job_client(session);
        let mut job = GenerationJob::resume(job_id.trim());
        log::info!("Resuming job {}", job.id);
        self.finish(&jobs, &mut job, &api_key, cancel)
    }

    fn finish(
        &self,
        jobs: &JobClient,
        job: &mut GenerationJob,
        api_key: &str,
        cancel: &CancelToken,
    ) -> Result<Vec<GeneratedImage>> {
        jobs.await_completion(job, api_key, self.config.polling.timeout(), cancel)?;
        jobs.fetch_outputs(job)
    }

    fn uploader(&self, session: &Session) -> AssetUploader {
        AssetUploader::new(
            Arc::clone(&self.transport),
            Arc::clone(&session.cache),
            Arc::clone(&session.exchanges),
            self.config.api.upload_url(),
        )
    }

    fn job_client(&self, session: &Session) -> JobClient {
        JobClient::new(
            Arc::clone(&self.transport),
            Arc::clone(&session.exchanges),
            self.config.api.clone(),
            self.config.polling.clone(),
        )
    }
}

/// Submit rejections meaning the referenced spaces are gone
fn is_stale_asset_rejection(err: &VistaError) -> bool {
    matches!(
        err,
        VistaError::Submit {
            status: Some(404 | 410),
            ..
        }
    )
}

/// True when `path` names a scene format the service accepts
pub fn is_supported_scene(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| SCENE_EXTENSIONS.iter().any(|s| s.eq_ignore_ascii_case(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{ExchangeKind, ExchangeOutcome};
    use crate::transport::{MockTransport, TransportError};
    use vista_core::ErrorKind;

    struct Fixture {
        dir: PathBuf,
        scene: PathBuf,
        style: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = std::env::temp_dir().join(format!("vista_orch_test_{}", uuid::Uuid::new_v4()));
            std::fs::create_dir_all(&dir).unwrap();
            let scene = dir.join("product.usdz");
            let style = dir.join("mood.png");
            std::fs::write(&scene, b"usdz scene bytes").unwrap();
            std::fs::write(&style, b"style image bytes").unwrap();
            Self { dir, scene, style }
        }

        fn params(&self) -> UiParams {
            UiParams {
                api_key: Some("key-123".to_string()),
                scene: Some(self.scene.clone()),
                prompt: "a watch on a marble table".to_string(),
                hero: "Watch".to_string(),
                model: "image4_standard".to_string(),
                image_count: 2,
                seed: Some(42),
                resolution: "1024 × 1024 | 1:1".to_string(),
                ..UiParams::default()
            }
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            std::fs::remove_dir_all(&self.dir).ok();
        }
    }

    fn orchestrator(mock: Arc<MockTransport>) -> Orchestrator {
        let mut config = VistaConfig::default();
        config.polling.initial_interval_ms = 1;
        config.polling.max_interval_ms = 4;
        config.polling.timeout_secs = 5;
        Orchestrator::new(config, mock)
    }

    #[test]
    fn test_generate_returns_images() {
        let fx = Fixture::new();
        let mock = Arc::new(MockTransport::new().with_default_images(2));
        let orch = orchestrator(Arc::clone(&mock));
        let session = orch.session();

        let images = orch
            .generate(&session, &fx.params(), &CancelToken::new())
            .unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].index, 0);

        let kinds: Vec<_> = session
            .exchanges()
            .all()
            .iter()
            .map(|r| r.request.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                ExchangeKind::Upload,
                ExchangeKind::Submit,
                ExchangeKind::Poll,
                ExchangeKind::Poll,
                ExchangeKind::Download,
                ExchangeKind::Download,
            ]
        );
        let submitted = &session.exchanges().of_kind(ExchangeKind::Submit)[0];
        assert_eq!(submitted.request.body["seeds"], serde_json::json!([42, 43]));
        assert_eq!(submitted.request.body["modelVersion"], "image4_standard");
    }

    #[test]
    fn test_second_generate_reuses_uploaded_scene() {
        let fx = Fixture::new();
        let mock = Arc::new(MockTransport::new());
        let orch = orchestrator(Arc::clone(&mock));
        let session = orch.session();

        orch.generate(&session, &fx.params(), &CancelToken::new())
            .unwrap();
        let mut second = fx.params();
        second.prompt = "the same watch at dusk".to_string();
        orch.generate(&session, &second, &CancelToken::new())
            .unwrap();

        assert_eq!(mock.counts().uploads, 1);
        assert_eq!(mock.counts().submits, 2);
        assert_eq!(session.exchanges().of_kind(ExchangeKind::Upload).len(), 1);
        let scene_ids: Vec<_> = session
            .exchanges()
            .of_kind(ExchangeKind::Submit)
            .iter()
            .map(|r| r.request.body["sources"][0]["space"]["id"].clone())
            .collect();
        assert_eq!(scene_ids[0], scene_ids[1]);
    }

    #[test]
    fn test_invalid_resolution_sends_nothing() {
        let fx = Fixture::new();
        let mock = Arc::new(MockTransport::new());
        let orch = orchestrator(Arc::clone(&mock));
        let session = orch.session();

        let mut params = fx.params();
        params.resolution = "0x512".to_string();
        let err = orch
            .generate(&session, &params, &CancelToken::new())
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(session.exchanges().is_empty());
        assert_eq!(mock.counts(), Default::default());
    }

    #[test]
    fn test_ui_validation_messages() {
        let fx = Fixture::new();
        let orch = orchestrator(Arc::new(MockTransport::new()));
        let session = Session::new(None, AssetCache::default());

        let mut params = fx.params();
        params.api_key = Some("  ".to_string());
        let err = orch.normalize(&session, &params).unwrap_err();
        assert!(err.to_string().contains("Missing API key"));

        let mut params = fx.params();
        params.scene = None;
        assert!(orch
            .normalize(&session, &params)
            .unwrap_err()
            .to_string()
            .contains("Missing scene file"));

        let obj = fx.dir.join("scene.obj");
        std::fs::write(&obj, b"o").unwrap();
        let mut params = fx.params();
        params.scene = Some(obj);
        assert!(orch
            .normalize(&session, &params)
            .unwrap_err()
            .to_string()
            .contains("Invalid scene file format"));

        let mut params = fx.params();
        params.scene = Some(fx.dir.join("gone.glb"));
        assert!(orch.normalize(&session, &params).is_err());

        let mut params = fx.params();
        params.hero = String::new();
        assert!(orch
            .normalize(&session, &params)
            .unwrap_err()
            .to_string()
            .contains("Missing hero object"));

        let mut params = fx.params();
        params.camera = " ".to_string();
        assert!(orch
            .normalize(&session, &params)
            .unwrap_err()
            .to_string()
            .contains("Missing camera"));

        let mut params = fx.params();
        params.style_image = Some(fx.dir.join("missing.png"));
        assert!(orch
            .normalize(&session, &params)
            .unwrap_err()
            .to_string()
            .contains("style image"));

        let mut params = fx.params();
        params.model = "firefly 9".to_string();
        assert!(orch
            .normalize(&session, &params)
            .unwrap_err()
            .to_string()
            .contains("image3_fast, image4_standard, image4_ultra"));
    }

    #[test]
    fn test_normalize_defaults_and_conversions() {
        let fx = Fixture::new();
        let orch = orchestrator(Arc::new(MockTransport::new()));
        let session = Session::new(Some("session-key".to_string()), AssetCache::default());

        let mut params = fx.params();
        params.api_key = None;
        params.seed = Some(-1);
        params.content_class = Some("sketch".to_string());
        params.model = "Firefly Image 4 Ultra".to_string();
        params.image_count = 1;
        params.scene = Some(fx.dir.join("product.USDZ"));
        std::fs::write(fx.dir.join("product.USDZ"), b"x").unwrap();

        let normalized = orch.normalize(&session, &params).unwrap();
        assert_eq!(normalized.api_key, "session-key");
        assert_eq!(normalized.request.seed, None);
        assert_eq!(normalized.request.content_class, Some(ContentClass::Photo));
        assert_eq!(normalized.request.model, ImageModel::Image4Ultra);
        assert_eq!(normalized.request.resolution, Resolution::new(1024, 1024));
    }

    #[test]
    fn test_style_image_is_uploaded_and_referenced() {
        let fx = Fixture::new();
        let mock = Arc::new(MockTransport::new());
        let orch = orchestrator(Arc::clone(&mock));
        let session = orch.session();

        let mut params = fx.params();
        params.style_image = Some(fx.style.clone());
        params.style_strength = Some(35);
        orch.generate(&session, &params, &CancelToken::new())
            .unwrap();

        assert_eq!(mock.counts().uploads, 2);
        let body = &session.exchanges().of_kind(ExchangeKind::Submit)[0].request.body;
        assert_eq!(body["style"]["strength"], 35);
        assert_ne!(
            body["style"]["imageReference"]["source"]["space"]["id"],
            body["sources"][0]["space"]["id"]
        );
    }

    #[test]
    fn test_remote_failure_is_generation_error_with_polls_logged() {
        let fx = Fixture::new();
        let mock = Arc::new(MockTransport::new());
        mock.script_next_job(vec![
            MockTransport::status_json("pending"),
            MockTransport::status_json("running"),
            MockTransport::failure_json("Camera 'Camera' not found"),
        ]);
        let orch = orchestrator(Arc::clone(&mock));
        let session = orch.session();

        let err = orch
            .generate(&session, &fx.params(), &CancelToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Generation);
        assert!(err.to_string().contains("Camera 'Camera' not found"));
        assert_eq!(session.exchanges().of_kind(ExchangeKind::Poll).len(), 3);
        assert_eq!(mock.counts().downloads, 0);
    }

    #[test]
    fn test_submit_failure_keeps_uploaded_asset_cached() {
        let fx = Fixture::new();
        let mock = Arc::new(MockTransport::new());
        mock.fail_submits(TransportError::from_status(403, None));
        let orch = orchestrator(Arc::clone(&mock));
        let session = orch.session();

        let err = orch
            .generate(&session, &fx.params(), &CancelToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Submit);
        assert!(err.to_string().contains("Access to this resource is forbidden."));
        assert_eq!(session.cache().len(), 1);

        let submit = &session.exchanges().of_kind(ExchangeKind::Submit)[0];
        assert!(matches!(submit.outcome, ExchangeOutcome::Error(_)));
    }

    #[test]
    fn test_submit_rejecting_unknown_space_drops_cached_assets() {
        let fx = Fixture::new();
        let mock = Arc::new(MockTransport::new());
        mock.fail_submits(TransportError::from_status(
            404,
            Some(serde_json::json!({ "message": "Space space-1 not found" })),
        ));
        let orch = orchestrator(Arc::clone(&mock));
        let session = orch.session();
        let params = UiParams {
            style_image: Some(fx.style.clone()),
            style_strength: Some(40),
            ..fx.params()
        };

        for _ in 0..3 {
            let err = orch
                .generate(&session, &params, &CancelToken::new())
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Submit);
            assert!(err.to_string().contains("Space space-1 not found"));
            assert!(session.cache().is_empty());
        }
        assert_eq!(mock.counts().uploads, 6);
        assert_eq!(mock.counts().submits, 3);
    }

    #[test]
    fn test_cancelled_generate_can_be_resumed() {
        let fx = Fixture::new();
        let mock = Arc::new(MockTransport::new());
        let orch = orchestrator(Arc::clone(&mock));
        let session = orch.session();

        let cancel = CancelToken::new();
        cancel.cancel();
        let err = orch.generate(&session, &fx.params(), &cancel).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        let job_id = err.resumable_job().unwrap().to_string();

        // The session has no key of its own
        assert!(orch.resume(&session, &job_id, &CancelToken::new()).is_err());

        let keyed = Session::new(Some("key-123".to_string()), AssetCache::default());
        let images = orch.resume(&keyed, &job_id, &CancelToken::new()).unwrap();
        assert_eq!(images.len(), 1);
    }

    #[test]
    fn test_concurrent_generates_share_one_upload() {
        let fx = Fixture::new();
        let mock = Arc::new(MockTransport::new().with_upload_delay(std::time::Duration::from_millis(30)));
        let orch = Arc::new(orchestrator(Arc::clone(&mock)));
        let session = Arc::new(orch.session());

        let workers: Vec<_> = (0..4)
            .map(|i| {
                let orch = Arc::clone(&orch);
                let session = Arc::clone(&session);
                let mut params = fx.params();
                params.prompt = format!("variation {}", i);
                std::thread::spawn(move || orch.generate(&session, &params, &CancelToken::new()))
            })
            .collect();
        for worker in workers {
            assert!(worker.join().unwrap().is_ok());
        }

        assert_eq!(mock.counts().uploads, 1);
        assert_eq!(mock.counts().submits, 4);
        let seqs: Vec<_> = session.exchanges().all().iter().map(|r| r.seq).collect();
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_is_supported_scene() {
        assert!(is_supported_scene(Path::new("a/b/scene.GLB")));
        assert!(is_supported_scene(Path::new("scene.usdz")));
        assert!(!is_supported_scene(Path::new("scene.fbx")));
        assert!(!is_supported_scene(Path::new("scene")));
    }
}

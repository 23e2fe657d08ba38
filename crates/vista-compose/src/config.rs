//! Layered configuration system
//!
//! Config is loaded with three layers of precedence (highest wins):
//! 1. Environment variables: `VISTA_API_KEY`, `VISTA_API_URL`
//! 2. Project-local: `.vista/config.toml`
//! 3. Global: `~/.vista/config.toml`
//!
//! Unknown keys are reported as warnings and otherwise ignored.

use crate::request::ImageModel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vista_core::{Result, VistaError};

pub const DEFAULT_API_URL: &str = "https://s3d.adobe.io";

/// Upper bound for the poll backoff ceiling
pub const MAX_POLL_INTERVAL_MS: u64 = 5_000;

/// Remote API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Attempts for idempotent GETs (polls, downloads)
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_url(),
            api_key: None,
            request_timeout_secs: default_request_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

impl ApiConfig {
    pub fn upload_url(&self) -> String {
        format!("{}/v1beta/spaces", self.base())
    }

    pub fn compose_url(&self) -> String {
        format!("{}/v1beta/3dscenes/compose", self.base())
    }

    pub fn job_url(&self, job_id: &str) -> String {
        format!("{}/v1beta/jobs/{}", self.base(), job_id)
    }

    fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}
fn default_request_timeout() -> u64 {
    60
}
fn default_max_retries() -> usize {
    3
}

/// Status polling cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_initial_interval")]
    pub initial_interval_ms: u64,
    /// Ceiling of the exponential backoff
    #[serde(default = "default_max_interval")]
    pub max_interval_ms: u64,
    #[serde(default = "default_poll_timeout")]
    pub timeout_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: default_initial_interval(),
            max_interval_ms: default_max_interval(),
            timeout_secs: default_poll_timeout(),
        }
    }
}

impl PollingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_initial_interval() -> u64 {
    500
}
fn default_max_interval() -> u64 {
    3000
}
fn default_poll_timeout() -> u64 {
    300
}

/// Image-count caps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_image_count")]
    pub max_image_count: u32,
    /// Per-model overrides keyed by model id
    #[serde(default)]
    pub models: BTreeMap<String, u32>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_image_count: default_max_image_count(),
            models: BTreeMap::new(),
        }
    }
}

impl LimitsConfig {
    /// Largest image count accepted for `model`. Experimental models are
    /// always capped at one.
    pub fn max_images_for(&self, model: ImageModel) -> u32 {
        if model.is_experimental() {
            return 1;
        }
        self.models
            .get(model.id())
            .copied()
            .unwrap_or(self.max_image_count)
    }
}

fn default_max_image_count() -> u32 {
    4
}

/// Remote asset-handle expiry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Seconds a cached handle is trusted; 0 keeps handles for the session
    #[serde(default = "default_handle_ttl")]
    pub handle_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            handle_ttl_secs: default_handle_ttl(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Option<Duration> {
        match self.handle_ttl_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

fn default_handle_ttl() -> u64 {
    12 * 60 * 60
}

/// Where returned images are written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub directory: PathBuf,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            file_prefix: default_file_prefix(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}
fn default_file_prefix() -> String {
    "vista".to_string()
}

/// Resolved configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VistaConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Raw file layer: every field optional so a later layer only overrides
/// what it actually sets.
#[derive(Debug, Default, Deserialize)]
struct ConfigLayer {
    #[serde(default)]
    api: ApiLayer,
    #[serde(default)]
    polling: PollingLayer,
    #[serde(default)]
    limits: LimitsLayer,
    #[serde(default)]
    cache: CacheLayer,
    #[serde(default)]
    output: OutputLayer,
}

#[derive(Debug, Default, Deserialize)]
struct ApiLayer {
    base_url: Option<String>,
    api_key: Option<String>,
    request_timeout_secs: Option<u64>,
    max_retries: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct PollingLayer {
    initial_interval_ms: Option<u64>,
    max_interval_ms: Option<u64>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LimitsLayer {
    max_image_count: Option<u32>,
    #[serde(default)]
    models: BTreeMap<String, u32>,
}

#[derive(Debug, Default, Deserialize)]
struct CacheLayer {
    handle_ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct OutputLayer {
    directory: Option<PathBuf>,
    file_prefix: Option<String>,
}

impl VistaConfig {
    /// Load config with layered precedence: global < project < env vars
    pub fn load() -> Result<Self> {
        let mut config = VistaConfig::default();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                config.apply_layer(Self::load_layer(&global_path)?);
            }
        }

        let local_path = PathBuf::from(".vista/config.toml");
        if local_path.exists() {
            config.apply_layer(Self::load_layer(&local_path)?);
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a specific file path only (plus env overrides)
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let mut config = VistaConfig::default();
        config.apply_layer(Self::load_layer(path)?);
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse one TOML document on top of the defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config = VistaConfig::default();
        let (layer, unknown) = parse_layer(content)?;
        for key in unknown {
            log::warn!("Ignoring unknown config key '{}'", key);
        }
        config.apply_layer(layer);
        config.validate()?;
        Ok(config)
    }

    /// Sanity-check values that would make polling or limits meaningless
    pub fn validate(&self) -> Result<()> {
        if self.polling.initial_interval_ms == 0 {
            return Err(VistaError::Config(
                "polling.initial_interval_ms must be positive".to_string(),
            ));
        }
        if self.polling.max_interval_ms < self.polling.initial_interval_ms {
            return Err(VistaError::Config(
                "polling.max_interval_ms must be >= polling.initial_interval_ms".to_string(),
            ));
        }
        if self.polling.max_interval_ms > MAX_POLL_INTERVAL_MS {
            return Err(VistaError::Config(format!(
                "polling.max_interval_ms must be at most {} (got {})",
                MAX_POLL_INTERVAL_MS, self.polling.max_interval_ms
            )));
        }
        if self.limits.max_image_count == 0 {
            return Err(VistaError::Config(
                "limits.max_image_count must be at least 1".to_string(),
            ));
        }
        for (model, max) in &self.limits.models {
            if *max == 0 {
                return Err(VistaError::Config(format!(
                    "limits.models.{} must be at least 1",
                    model
                )));
            }
            if ImageModel::parse(model).is_none() {
                log::warn!("limits.models.{} does not name a known model", model);
            }
        }
        Ok(())
    }

    fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".vista").join("config.toml"))
    }

    fn load_layer(path: &Path) -> Result<ConfigLayer> {
        let content = std::fs::read_to_string(path)?;
        let (layer, unknown) = parse_layer(&content).map_err(|e| {
            VistaError::Config(format!("Failed to parse config {}: {}", path.display(), e))
        })?;
        for key in unknown {
            log::warn!("{}: ignoring unknown config key '{}'", path.display(), key);
        }
        Ok(layer)
    }

    fn apply_layer(&mut self, layer: ConfigLayer) {
        let ConfigLayer {
            api,
            polling,
            limits,
            cache,
            output,
        } = layer;

        if let Some(v) = api.base_url {
            self.api.base_url = v;
        }
        if let Some(v) = api.api_key {
            self.api.api_key = Some(v);
        }
        if let Some(v) = api.request_timeout_secs {
            self.api.request_timeout_secs = v;
        }
        if let Some(v) = api.max_retries {
            self.api.max_retries = v;
        }

        if let Some(v) = polling.initial_interval_ms {
            self.polling.initial_interval_ms = v;
        }
        if let Some(v) = polling.max_interval_ms {
            self.polling.max_interval_ms = v;
        }
        if let Some(v) = polling.timeout_secs {
            self.polling.timeout_secs = v;
        }

        if let Some(v) = limits.max_image_count {
            self.limits.max_image_count = v;
        }
        self.limits.models.extend(limits.models);

        if let Some(v) = cache.handle_ttl_secs {
            self.cache.handle_ttl_secs = v;
        }

        if let Some(v) = output.directory {
            self.output.directory = v;
        }
        if let Some(v) = output.file_prefix {
            self.output.file_prefix = v;
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("VISTA_API_KEY") {
            if !key.is_empty() {
                self.api.api_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var("VISTA_API_URL") {
            if !url.is_empty() {
                self.api.base_url = url;
            }
        }
    }
}

fn parse_layer(content: &str) -> Result<(ConfigLayer, Vec<String>)> {
    let mut unknown = Vec::new();
    let deserializer = toml::de::Deserializer::new(content);
    let layer: ConfigLayer = serde_ignored::deserialize(deserializer, |path| {
        unknown.push(path.to_string());
    })?;
    Ok((layer, unknown))
}

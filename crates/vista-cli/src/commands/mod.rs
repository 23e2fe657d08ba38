//! CLI command implementations

pub mod generate;
pub mod info;
pub mod resume;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use vista_compose::{
    ExchangeLog, GeneratedImage, HttpTransport, ImageWriter, MockTransport, Transport,
    VistaConfig,
};
use vista_core::VistaError;

/// Load `config_path`, or the layered config when no path was given.
/// An explicit file must load; a broken layered lookup falls back to defaults.
pub(crate) fn load_config(
    config_path: Option<&Path>,
    api_key: Option<String>,
    output: Option<PathBuf>,
) -> Result<VistaConfig> {
    let mut config = match config_path {
        Some(path) => VistaConfig::load_from_file(path)
            .with_context(|| format!("Cannot use config file {}", path.display()))?,
        None => VistaConfig::load().unwrap_or_else(|e| {
            log::warn!("{}; using default configuration", e);
            VistaConfig::default()
        }),
    };
    if let Some(key) = api_key {
        config.api.api_key = Some(key);
    }
    if let Some(dir) = output {
        config.output.directory = dir;
    }
    Ok(config)
}

pub(crate) fn transport(config: &VistaConfig, mock: bool, images: usize) -> Arc<dyn Transport> {
    if mock {
        println!("Using mock transport (no network)");
        Arc::new(MockTransport::new().with_default_images(images))
    } else {
        Arc::new(HttpTransport::new(&config.api))
    }
}

pub(crate) fn save_images(config: &VistaConfig, images: &[GeneratedImage]) -> Result<()> {
    let writer = ImageWriter::new(&config.output.directory, config.output.file_prefix.clone());
    for (image, path) in images.iter().zip(writer.save_all(images)?) {
        match (image.dimensions(), image.seed) {
            (Some((w, h)), Some(seed)) => {
                println!("  {} ({}x{}, seed {})", path.display(), w, h, seed)
            }
            (Some((w, h)), None) => println!("  {} ({}x{})", path.display(), w, h),
            _ => println!("  {}", path.display()),
        }
    }
    Ok(())
}

pub(crate) fn print_dev_view(exchanges: &ExchangeLog) {
    println!();
    println!("--- Dev view: {} exchange(s) ---", exchanges.len());
    println!("{}", exchanges.to_json());
}

/// Turn a core error into the CLI's error, with a resume hint when possible
pub(crate) fn report(err: VistaError) -> anyhow::Error {
    if let Some(job_id) = err.resumable_job() {
        eprintln!("The remote job may still finish; run `vista resume {}` to pick it up.", job_id);
    }
    anyhow::anyhow!("{}: {}", err.kind(), err)
}

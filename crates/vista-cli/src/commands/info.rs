//! Listings of models and resolution presets

use super::load_config;
use anyhow::Result;
use std::path::Path;
use vista_compose::{ImageModel, RESOLUTION_PRESETS};

pub fn run_models(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path, None, None)?;
    println!("{:<18} {:<24} {}", "ID", "NAME", "MAX IMAGES");
    for model in ImageModel::ALL {
        let note = if model.is_experimental() {
            " (experimental)"
        } else {
            ""
        };
        println!(
            "{:<18} {:<24} {}{}",
            model.id(),
            model.display_name(),
            config.limits.max_images_for(model),
            note
        );
    }
    Ok(())
}

pub fn run_resolutions() -> Result<()> {
    for (label, resolution) in RESOLUTION_PRESETS {
        println!("{:<20} {}", label, resolution);
    }
    Ok(())
}

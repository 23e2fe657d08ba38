//! Generate images from a 3D scene

use super::{load_config, print_dev_view, report, save_images, transport};
use anyhow::Result;
use clap::Args;
use std::path::{Path, PathBuf};
use vista_compose::{CancelToken, Orchestrator, UiParams};

#[derive(Args)]
pub struct GenerateArgs {
    /// Path to the 3D scene (GLB or USDZ)
    #[arg(long)]
    pub scene: PathBuf,

    /// Text prompt describing the desired image
    #[arg(long)]
    pub prompt: String,

    /// Exact name of the hero object in the scene
    #[arg(long)]
    pub hero: String,

    /// Exact name of the camera in the scene
    #[arg(long, default_value = "Camera")]
    pub camera: String,

    /// Model id or display name
    #[arg(long, default_value = "image3_fast")]
    pub model: String,

    /// Number of images to generate
    #[arg(long, default_value = "1")]
    pub count: u32,

    /// Seed for the first image; -1 lets the service pick
    #[arg(long, allow_hyphen_values = true)]
    pub seed: Option<i64>,

    /// Preset label (see `vista resolutions`) or WIDTHxHEIGHT
    #[arg(long, default_value = "2048x2048")]
    pub resolution: String,

    /// Content class: photo or art
    #[arg(long)]
    pub content_class: Option<String>,

    /// Image used as style reference
    #[arg(long)]
    pub style_image: Option<PathBuf>,

    /// Style reference strength, 0-100 (default 70)
    #[arg(long)]
    pub style_strength: Option<u8>,

    /// API key (defaults to VISTA_API_KEY or the config file)
    #[arg(long)]
    pub api_key: Option<String>,

    /// Output directory for the images
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Print every request and response after the run
    #[arg(long)]
    pub dev_view: bool,

    /// Answer requests in-process instead of calling the service
    #[arg(long)]
    pub mock: bool,
}

pub fn run(config_path: Option<&Path>, args: GenerateArgs) -> Result<()> {
    let config = load_config(config_path, args.api_key.clone(), args.output.clone())?;
    let transport = transport(&config, args.mock, args.count.max(1) as usize);
    let orchestrator = Orchestrator::new(config, transport);
    let session = orchestrator.session();

    let params = UiParams {
        api_key: args.api_key,
        scene: Some(args.scene),
        prompt: args.prompt,
        hero: args.hero,
        camera: args.camera,
        model: args.model,
        image_count: args.count,
        seed: args.seed,
        resolution: args.resolution,
        content_class: args.content_class,
        style_image: args.style_image,
        style_strength: args.style_strength,
    };

    println!(
        "Generating {} image(s) with {}...",
        params.image_count, params.model
    );
    let result = orchestrator.generate(&session, &params, &CancelToken::new());

    if args.dev_view {
        print_dev_view(session.exchanges());
    }

    let images = result.map_err(report)?;
    println!("Received {} image(s):", images.len());
    save_images(orchestrator.config(), &images)
}

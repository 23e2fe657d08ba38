//! Vista CLI - Compose product shots from 3D scenes

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{generate, info, resume};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "vista")]
#[command(about = "Generate images from a 3D scene, a hero object and a prompt", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable debug logging (overrides RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Read configuration from this file instead of the layered lookup
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate images from a scene
    Generate(generate::GenerateArgs),

    /// Continue waiting for a job that timed out
    Resume {
        /// Remote job id
        job_id: String,

        /// API key (defaults to VISTA_API_KEY or the config file)
        #[arg(long)]
        api_key: Option<String>,

        /// Output directory for the images
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Print every request and response after the run
        #[arg(long)]
        dev_view: bool,
    },

    /// List available image models
    Models,

    /// List resolution presets
    Resolutions,
}

fn init_logging(verbose: bool) {
    let env = env_logger::Env::default().default_filter_or("info");
    let mut builder = env_logger::Builder::from_env(env);
    if verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.format_timestamp(None).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Generate(args) => generate::run(config, args),
        Commands::Resume {
            job_id,
            api_key,
            output,
            dev_view,
        } => resume::run(config, &job_id, api_key, output, dev_view),
        Commands::Models => info::run_models(config),
        Commands::Resolutions => info::run_resolutions(),
    }
}

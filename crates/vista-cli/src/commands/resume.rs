//! Pick up a job left running by a timeout

use super::{load_config, print_dev_view, report, save_images, transport};
use anyhow::Result;
use std::path::{Path, PathBuf};
use vista_compose::{CancelToken, Orchestrator};

pub fn run(
    config_path: Option<&Path>,
    job_id: &str,
    api_key: Option<String>,
    output: Option<PathBuf>,
    dev_view: bool,
) -> Result<()> {
    let config = load_config(config_path, api_key, output)?;
    let transport = transport(&config, false, 1);
    let orchestrator = Orchestrator::new(config, transport);
    let session = orchestrator.session();

    println!("Waiting for job {}...", job_id);
    let result = orchestrator.resume(&session, job_id, &CancelToken::new());

    if dev_view {
        print_dev_view(session.exchanges());
    }

    let images = result.map_err(report)?;
    println!("Received {} image(s):", images.len());
    save_images(orchestrator.config(), &images)
}

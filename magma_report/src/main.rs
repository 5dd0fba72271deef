use std::env;
use std::path::PathBuf;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{RunConfig, DEFAULT_CONFIG_FILE};
use crate::helper_functions::project_root;

mod analysis;
mod config;
mod data_handling;
mod helper_functions;
mod magma_processing;
mod models;
mod pipeline;

fn main() -> Result<()> {
    // Setup logging and project configuration
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting the MAGMA report pipeline");

    let (config_path, explicit) = match env::args().nth(1) {
        Some(path) => (PathBuf::from(path), true),
        None => (project_root().join(DEFAULT_CONFIG_FILE), false),
    };
    let cfg = RunConfig::load(&config_path, explicit)?;
    info!(
        "Study {} run {}: {} annotation methods x {} sources",
        cfg.study,
        cfg.run_id,
        cfg.annotations.len(),
        cfg.sources.len()
    );

    pipeline::run(&cfg)
}

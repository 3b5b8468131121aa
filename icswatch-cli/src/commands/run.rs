//! `icswatch run`: load the configuration and hand off to the daemon.

use std::path::PathBuf;

use anyhow::{Context, Result};
use icswatch_core::config::Config;

pub async fn run(config_path: Option<PathBuf>) -> Result<()> {
    let config = match config_path {
        Some(path) => Config::load_from(&path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Config::load().context("failed to load configuration")?,
    };

    crate::daemon::run(config).await
}

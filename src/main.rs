//! Binary entrypoint for the slideshow engine.
//!
//! Delegates all logic to the library crate; no local modules here.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, fmt};

use photo_slideshow::catalog::DirectoryCatalog;
use photo_slideshow::config::Configuration;
use photo_slideshow::model::OwnerId;
use photo_slideshow::settings::{SettingsStore, StaticSettings, YamlSettingsStore};
use photo_slideshow::slideshow::Slideshow;
use photo_slideshow::tasks::aspect::FsDimensionLoader;
use photo_slideshow::tasks::viewer;

/// Simple CLI
#[derive(Debug, Parser)]
#[command(name = "photo-slideshow", about = "Slideshow engine for a photo frame")]
struct Cli {
    /// Path to YAML config file
    #[arg(short, long, value_name = "FILE", default_value = "config.yaml")]
    config: PathBuf,

    /// Override per-slide interval (ms); ignored when a settings file drives
    /// the preferences
    #[arg(long, value_name = "MILLIS")]
    interval_ms: Option<u64>,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) -> Result<()> {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("photo_slideshow={level}").parse()?);
    fmt().with_env_filter(filter).with_target(true).init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let mut cfg = Configuration::from_yaml_file(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?
        .validated()
        .context("validating configuration")?;
    if let Some(ms) = cli.interval_ms {
        cfg.preferences.interval = Duration::from_millis(ms);
    }

    let owner = OwnerId(cfg.owner.clone());
    let catalog = Arc::new(
        DirectoryCatalog::new(&cfg.photo_library_path, owner.clone())
            .context("opening photo library")?,
    );
    let settings: Arc<dyn SettingsStore> = match &cfg.settings_path {
        Some(path) => Arc::new(YamlSettingsStore::new(path.clone())),
        None => Arc::new(StaticSettings::new(cfg.preferences.clone())),
    };

    let slideshow = Slideshow::start(
        catalog,
        settings,
        Arc::new(FsDimensionLoader),
        owner,
        cfg.max_concurrent_probes,
    );
    let viewer = tokio::spawn(viewer::run(slideshow.state()));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    info!("ctrl-c received; shutting down");

    slideshow.dispose().await;
    let _ = viewer.await;
    Ok(())
}

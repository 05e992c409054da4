//! firewatchd - fire detection daemon
//!
//! 1. Captures IR and RGB frames on independent threads
//! 2. Fuses per-cycle detections into a fire verdict
//! 3. Streams annotated frames and the verdict to one viewer at a time
//! 4. Logs a health summary periodically until Ctrl-C

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use firewatch::{AppConfig, Pipeline};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON or TOML config file.
    #[arg(long, env = "FIREWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Seconds between health log lines.
    #[arg(long, default_value_t = 10)]
    health_interval_secs: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = AppConfig::load_from(args.config.as_deref())?;
    let pipeline = Pipeline::start(&cfg)?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("firewatchd running, waiting for shutdown signal (Ctrl-C)...");
    let interval = Duration::from_secs(args.health_interval_secs.max(1));
    loop {
        match rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => log::info!("health: {}", pipeline.health()),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    log::info!("shutdown signal received, stopping pipeline...");
    pipeline.shutdown()?;
    Ok(())
}

use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::Result;

pub const LOG_ENV: &str = "TALLY_LOG";

/// Route tracing output to `<data_dir>/logs/tally.log`. The terminal belongs
/// to the TUI, so nothing is written to stdout or stderr.
pub fn init(data_dir: &Path, default_level: &str) -> Result<()> {
    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("tally.log"))?;

    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // Already installed (tests, repeated runs in one process) is fine.
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(Mutex::new(file)),
        )
        .with(filter)
        .try_init();

    tracing::info!(data_dir = %data_dir.display(), "logging initialized");
    Ok(())
}

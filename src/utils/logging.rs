use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::Level;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

pub const DEBUG_LOG_FILE: &str = "ynmweb_debug.log";

pub fn debug_log_path(home: &Path) -> PathBuf {
    home.join(DEBUG_LOG_FILE)
}

/// Stdout logging filtered by `RUST_LOG` (default `info`), plus a file under
/// `home` that records this crate at DEBUG, which covers every
/// request/response cycle.
pub fn init(home: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(false).with_filter(filter);

    let file_layer = match home {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating home directory {}", dir.display()))?;
            let path = debug_log_path(dir);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(
                        Targets::new()
                            .with_target("ynmweb", Level::DEBUG)
                            .with_default(Level::INFO),
                    ),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .context("installing tracing subscriber")?;

    Ok(())
}

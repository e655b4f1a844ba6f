use std::env;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::{fmt, EnvFilter};

pub const LEVEL_ENV: &str = "FUNNY_TUI_LOG";
pub const FILE_ENV: &str = "FUNNY_TUI_LOG_FILE";
const DEFAULT_DIRECTIVE: &str = "info";

/// Log output goes to a file; the terminal belongs to the UI.
pub fn init() -> Result<PathBuf> {
    let path = log_path().context("logging: unable to determine log file path")?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("logging: create directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("logging: open {}", path.display()))?;

    fmt()
        .with_env_filter(filter_from_env())
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow!("logging: {err}"))?;
    Ok(path)
}

fn filter_from_env() -> EnvFilter {
    EnvFilter::try_from_env(LEVEL_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

pub fn log_path() -> Option<PathBuf> {
    env::var_os(FILE_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .or_else(default_log_path)
}

fn default_log_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("funny-tui").join("funny-tui.log"))
}

#![forbid(unsafe_code)]

//! Logger setup: terminal plus a dated file under `<root>/logs`.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::Local;
use log::{LevelFilter, debug, warn};
use simplelog::{
    ColorChoice, CombinedLogger, Config, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};
use walkdir::WalkDir;

pub const LOGS_DIR: &str = "logs";

pub fn logs_dir(root: &Path) -> PathBuf {
    root.join(LOGS_DIR)
}

/// `<logs>/vodwatch_<YYYY-MM-DD>.log` for today's local date.
pub fn log_file_path(logs: &Path) -> PathBuf {
    logs.join(format!("vodwatch_{}.log", Local::now().format("%Y-%m-%d")))
}

/// Installs the global logger. The file logger is skipped with a warning on
/// stderr when the log file cannot be opened, and a logger that is already
/// installed is left in place.
pub fn initialize(root: &Path, verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let config = build_config();

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        config.clone(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];
    if let Some(file_logger) = create_file_logger(&logs_dir(root), level, config) {
        loggers.push(file_logger);
    }

    let _ = CombinedLogger::init(loggers);
}

fn build_config() -> Config {
    ConfigBuilder::new()
        .set_time_format_rfc3339()
        .set_target_level(LevelFilter::Error)
        .build()
}

fn create_file_logger(
    logs: &Path,
    level: LevelFilter,
    config: Config,
) -> Option<Box<WriteLogger<File>>> {
    let log_path = log_file_path(logs);
    let opened = fs::create_dir_all(logs)
        .and_then(|()| OpenOptions::new().create(true).append(true).open(&log_path));
    match opened {
        Ok(file) => Some(WriteLogger::new(level, config, file)),
        Err(err) => {
            eprintln!("warning: could not open log file {}: {err}", log_path.display());
            None
        }
    }
}

/// Removes zero-byte files from `dir`. Returns how many were removed.
pub fn prune_empty_logs(dir: &Path) -> usize {
    let mut removed = 0;
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
    {
        let is_empty_file = entry.file_type().is_file()
            && entry.metadata().map(|meta| meta.len() == 0).unwrap_or(false);
        if !is_empty_file {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!("removed empty log {}", entry.path().display());
                removed += 1;
            }
            Err(err) => warn!("cannot remove {}: {err}", entry.path().display()),
        }
    }
    removed
}

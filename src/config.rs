#![forbid(unsafe_code)]

//! Runtime settings for vodwatch.
//!
//! Values come from a `.env` style file and the process environment. The
//! environment wins over the file, and explicit overrides (usually CLI flags)
//! win over both.

use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_ROOT: &str = ".";
pub const DEFAULT_ITEM_SELECTOR: &str = "[data-a-target='video-tower-card-{index}']";
pub const DEFAULT_MAX_SCAN_POSITIONS: usize = 50;
pub const DEFAULT_SCAN_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 3600;
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SPLIT_TIMEOUT_SECS: u64 = 7200;
pub const DEFAULT_AUTHORIZATION_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_SPLIT_THRESHOLD_HOURS: u64 = 12;
pub const DEFAULT_SEGMENT_HOURS: u64 = 6;
pub const DEFAULT_UPLOAD_CATEGORY: &str = "22";
pub const DEFAULT_UPLOAD_PRIVACY: &str = "private";
pub const DEFAULT_UPLOAD_LANGUAGE: &str = "zh-TW";
pub const DEFAULT_OAUTH_PORT: u16 = 8080;

/// External programs the pipeline shells out to.
#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub browser: PathBuf,
    pub yt_dlp: PathBuf,
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

/// Per-call limits. A timeout fails that one call, never the process.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub scan: Duration,
    pub download: Duration,
    pub probe: Duration,
    pub split: Duration,
    /// How long the consent redirect may take to arrive.
    pub authorization: Duration,
}

/// Metadata attached to every upload.
#[derive(Debug, Clone)]
pub struct UploadDefaults {
    pub category: String,
    pub tags: Vec<String>,
    pub privacy: String,
    pub language: String,
    pub playlist_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub root: PathBuf,
    pub archive_url: Option<String>,
    pub item_selector: String,
    pub max_scan_positions: usize,
    pub tools: ToolPaths,
    pub timeouts: Timeouts,
    pub split_threshold: Duration,
    pub segment_length: Duration,
    pub upload: UploadDefaults,
    pub oauth_port: u16,
}

impl Settings {
    /// Archive page URL, required whenever the run scans for new items.
    pub fn require_archive_url(&self) -> Result<&str> {
        self.archive_url
            .as_deref()
            .ok_or_else(|| anyhow!("ARCHIVE_URL not set"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub root: Option<PathBuf>,
    pub playlist_id: Option<String>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_settings(overrides: SettingsOverrides) -> Result<Settings> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    Ok(build_settings_with_overrides(
        &file_vars,
        env_var_string,
        overrides,
    ))
}

#[cfg(test)]
fn build_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Settings {
    build_settings_with_overrides(file_vars, env_lookup, SettingsOverrides::default())
}

fn build_settings_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: SettingsOverrides,
) -> Settings {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);
    let number = |key: &str, default: u64| {
        lookup(key)
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(default)
    };
    let seconds = |key: &str, default: u64| Duration::from_secs(number(key, default));
    let hours = |key: &str, default: u64| {
        let secs = match number(key, default) {
            0 => None,
            value => value.checked_mul(3600),
        };
        Duration::from_secs(secs.unwrap_or(default * 3600))
    };

    let root = overrides
        .root
        .or_else(|| lookup("VODWATCH_ROOT").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT));
    let playlist_id = overrides
        .playlist_id
        .and_then(|value| {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed)
            }
        })
        .or_else(|| lookup("PLAYLIST_ID"));
    let tags = lookup("UPLOAD_TAGS")
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|tag| !tag.is_empty())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default();

    Settings {
        root,
        archive_url: lookup("ARCHIVE_URL"),
        item_selector: lookup("ITEM_SELECTOR")
            .unwrap_or_else(|| DEFAULT_ITEM_SELECTOR.to_string()),
        max_scan_positions: lookup("MAX_SCAN_POSITIONS")
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_MAX_SCAN_POSITIONS),
        tools: ToolPaths {
            browser: PathBuf::from(lookup("BROWSER_PATH").unwrap_or_else(|| "chromium".into())),
            yt_dlp: PathBuf::from(lookup("YT_DLP_PATH").unwrap_or_else(|| "yt-dlp".into())),
            ffmpeg: PathBuf::from(lookup("FFMPEG_PATH").unwrap_or_else(|| "ffmpeg".into())),
            ffprobe: PathBuf::from(lookup("FFPROBE_PATH").unwrap_or_else(|| "ffprobe".into())),
        },
        timeouts: Timeouts {
            scan: seconds("SCAN_TIMEOUT_SECS", DEFAULT_SCAN_TIMEOUT_SECS),
            download: seconds("DOWNLOAD_TIMEOUT_SECS", DEFAULT_DOWNLOAD_TIMEOUT_SECS),
            probe: seconds("PROBE_TIMEOUT_SECS", DEFAULT_PROBE_TIMEOUT_SECS),
            split: seconds("SPLIT_TIMEOUT_SECS", DEFAULT_SPLIT_TIMEOUT_SECS),
            authorization: seconds("OAUTH_TIMEOUT_SECS", DEFAULT_AUTHORIZATION_TIMEOUT_SECS),
        },
        split_threshold: hours("SPLIT_THRESHOLD_HOURS", DEFAULT_SPLIT_THRESHOLD_HOURS),
        segment_length: hours("SEGMENT_HOURS", DEFAULT_SEGMENT_HOURS),
        upload: UploadDefaults {
            category: lookup("UPLOAD_CATEGORY")
                .unwrap_or_else(|| DEFAULT_UPLOAD_CATEGORY.to_string()),
            tags,
            privacy: lookup("UPLOAD_PRIVACY").unwrap_or_else(|| DEFAULT_UPLOAD_PRIVACY.to_string()),
            language: lookup("UPLOAD_LANGUAGE")
                .unwrap_or_else(|| DEFAULT_UPLOAD_LANGUAGE.to_string()),
            playlist_id,
        },
        oauth_port: lookup("OAUTH_PORT")
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(DEFAULT_OAUTH_PORT),
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key)
        .or_else(|| file_vars.get(key).cloned())
        .filter(|value| !value.trim().is_empty())
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

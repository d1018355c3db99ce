#![forbid(unsafe_code)]

//! Video splitting collaborator backed by ffprobe and ffmpeg.
//!
//! Only stream copies are performed; nothing is re-encoded.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use log::info;
use serde::Deserialize;
use thiserror::Error;

use crate::process::{ToolError, run_captured, tool_command};

#[derive(Debug, Error)]
pub enum SplitError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("unreadable probe output for {}: {message}", .path.display())]
    Probe { path: PathBuf, message: String },

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("splitting {} produced no segments", .0.display())]
    NoSegments(PathBuf),
}

#[async_trait]
pub trait Splitter: Send + Sync {
    /// Playing time of the video at `path`.
    async fn duration(&self, path: &Path) -> Result<Duration, SplitError>;

    /// Cuts `path` into pieces of at most `segment` length inside
    /// `output_dir` and returns them in playback order.
    async fn split(
        &self,
        path: &Path,
        output_dir: &Path,
        segment: Duration,
    ) -> Result<Vec<PathBuf>, SplitError>;
}

#[derive(Debug, Deserialize)]
struct ProbeReport {
    format: ProbeFormat,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FfmpegSplitter {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    probe_timeout: Duration,
    split_timeout: Duration,
}

impl FfmpegSplitter {
    pub fn new(
        ffmpeg: impl Into<PathBuf>,
        ffprobe: impl Into<PathBuf>,
        probe_timeout: Duration,
        split_timeout: Duration,
    ) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            probe_timeout,
            split_timeout,
        }
    }
}

/// File name of the `index`-th segment produced from a source with `stem`.
pub fn segment_file_name(stem: &str, index: usize) -> String {
    format!("{stem}_part{index:03}.mp4")
}

fn parse_probe(path: &Path, stdout: &[u8]) -> Result<Duration, SplitError> {
    let probe_err = |message: String| SplitError::Probe {
        path: path.to_path_buf(),
        message,
    };
    let report: ProbeReport =
        serde_json::from_slice(stdout).map_err(|err| probe_err(err.to_string()))?;
    let raw = report
        .format
        .duration
        .ok_or_else(|| probe_err("no duration reported".into()))?;
    let seconds: f64 = raw
        .trim()
        .parse()
        .map_err(|_| probe_err(format!("duration {raw:?} is not a number")))?;
    Duration::try_from_secs_f64(seconds).map_err(|err| probe_err(err.to_string()))
}

#[async_trait]
impl Splitter for FfmpegSplitter {
    async fn duration(&self, path: &Path) -> Result<Duration, SplitError> {
        let mut command = tool_command(&self.ffprobe);
        command
            .args(["-v", "quiet", "-print_format", "json", "-show_format"])
            .arg(path);
        let output = run_captured(command, self.probe_timeout).await?;
        let duration = parse_probe(path, &output.stdout)?;
        info!(
            "video duration: {:.2} seconds ({:.2} hours)",
            duration.as_secs_f64(),
            duration.as_secs_f64() / 3600.0
        );
        Ok(duration)
    }

    async fn split(
        &self,
        path: &Path,
        output_dir: &Path,
        segment: Duration,
    ) -> Result<Vec<PathBuf>, SplitError> {
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|source| SplitError::Io {
                path: output_dir.to_path_buf(),
                source,
            })?;

        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video".to_string());
        let pattern = output_dir.join(format!("{stem}_part%03d.mp4"));

        let mut command = tool_command(&self.ffmpeg);
        command
            .arg("-y")
            .arg("-i")
            .arg(path)
            .args(["-c", "copy", "-map", "0"])
            .arg("-segment_time")
            .arg(segment.as_secs().to_string())
            .args(["-f", "segment", "-reset_timestamps", "1"])
            .arg(&pattern);

        info!("starting video split: {}", path.display());
        run_captured(command, self.split_timeout).await?;

        let segments = collect_segments(output_dir, &stem);
        if segments.is_empty() {
            return Err(SplitError::NoSegments(path.to_path_buf()));
        }
        info!("split {} into {} segments", path.display(), segments.len());
        Ok(segments)
    }
}

/// Consecutive segment files starting at part 000; stops at the first gap.
pub fn collect_segments(output_dir: &Path, stem: &str) -> Vec<PathBuf> {
    (0..)
        .map(|index| output_dir.join(segment_file_name(stem, index)))
        .take_while(|candidate| candidate.is_file())
        .collect()
}

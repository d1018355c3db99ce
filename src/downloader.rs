#![forbid(unsafe_code)]

//! Download collaborator backed by yt-dlp.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use log::info;
use thiserror::Error;

use crate::process::{ToolError, run_streaming, tool_command};

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("downloader reported success but {} is missing", .0.display())]
    MissingArtifact(PathBuf),

    #[error("creating {}: {source}", .path.display())]
    Prepare {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[async_trait]
pub trait Downloader: Send + Sync {
    /// Fetches `url` into `destination`. `Ok` means the artifact exists.
    async fn download(&self, url: &str, destination: &Path) -> Result<(), DownloadError>;
}

#[derive(Debug, Clone)]
pub struct YtDlpDownloader {
    program: PathBuf,
    timeout: Duration,
}

impl YtDlpDownloader {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Downloader for YtDlpDownloader {
    async fn download(&self, url: &str, destination: &Path) -> Result<(), DownloadError> {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| DownloadError::Prepare {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let mut command = tool_command(&self.program);
        command
            .arg(url)
            .arg("--newline")
            .arg("--progress")
            .arg("-o")
            .arg(destination);

        info!("downloading {url} to {}", destination.display());
        run_streaming(command, self.timeout, "yt-dlp").await?;

        if !tokio::fs::try_exists(destination).await.unwrap_or(false) {
            return Err(DownloadError::MissingArtifact(destination.to_path_buf()));
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::test_support::install_stub;
    use tempfile::tempdir;

    /// Mimics yt-dlp: prints progress and writes the `-o` target.
    const WRITING_STUB: &str = r#"
output=""
while [[ $# -gt 0 ]]; do
  case "$1" in
    -o)
      shift
      output="$1"
      ;;
  esac
  shift
done
echo "[download]  50.0% of 1.00MiB"
echo "[download] 100.0% of 1.00MiB"
printf 'video' > "$output"
"#;

    #[tokio::test]
    async fn downloads_to_destination() {
        let dir = tempdir().unwrap();
        let stub = install_stub(dir.path(), "yt-dlp", WRITING_STUB);
        let downloader = YtDlpDownloader::new(stub, Duration::from_secs(5));
        let destination = dir.path().join("videos").join("clip.mp4");

        downloader
            .download("https://www.twitch.tv/videos/1", &destination)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&destination).unwrap(), "video");
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_failure() {
        let dir = tempdir().unwrap();
        let stub = install_stub(dir.path(), "yt-dlp", "echo 'ERROR: gone' >&2\nexit 1");
        let downloader = YtDlpDownloader::new(stub, Duration::from_secs(5));
        let err = downloader
            .download("https://www.twitch.tv/videos/1", &dir.path().join("clip.mp4"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ERROR: gone"));
    }

    #[tokio::test]
    async fn success_without_file_is_a_failure() {
        let dir = tempdir().unwrap();
        let stub = install_stub(dir.path(), "yt-dlp", "exit 0");
        let downloader = YtDlpDownloader::new(stub, Duration::from_secs(5));
        let err = downloader
            .download("https://www.twitch.tv/videos/1", &dir.path().join("clip.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::MissingArtifact(_)));
    }
}

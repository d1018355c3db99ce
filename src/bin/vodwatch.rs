#![forbid(unsafe_code)]

//! Entry point: detect new recordings on the archive page and republish them.
//!
//! Three modes:
//! * default: detect new items against the watermark, authenticate only
//!   when there is work, advance the watermark, upload leftovers from an
//!   interrupted run, then transfer the new items;
//! * `--url`: transfer one recording without looking at the archive page;
//! * `--upload-existing`: only upload leftovers.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use vodwatch_tools::config::{Settings, SettingsOverrides, resolve_settings};
use vodwatch_tools::downloader::YtDlpDownloader;
use vodwatch_tools::item::{Batch, ListItem};
use vodwatch_tools::logging;
use vodwatch_tools::scanner::{HeadlessScanner, ScanTarget};
use vodwatch_tools::splitter::FfmpegSplitter;
use vodwatch_tools::transfer::{MediaLayout, TransferOptions, TransferPipeline, TransferReport};
use vodwatch_tools::upload::auth::{CLIENT_SECRETS_FILE, CREDENTIALS_FILE};
use vodwatch_tools::upload::{Authenticator, ClientSecrets, YoutubeUploader};
use vodwatch_tools::watch::watch_once;
use vodwatch_tools::watermark::WatermarkStore;

type Pipeline = TransferPipeline<YtDlpDownloader, FfmpegSplitter, YoutubeUploader>;

#[derive(Debug, Parser)]
#[command(
    name = "vodwatch",
    version,
    about = "Republish new archive recordings to YouTube"
)]
struct Cli {
    /// Transfer this single recording instead of scanning the archive page.
    #[arg(long, value_name = "URL")]
    url: Option<String>,

    /// Title for --url; defaults to the URL itself.
    #[arg(long, value_name = "TITLE", requires = "url")]
    title: Option<String>,

    /// Only upload videos left over from an earlier run.
    #[arg(long, conflicts_with = "url")]
    upload_existing: bool,

    /// Working root holding videos, logs, the watermark and credentials.
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Environment file to read settings from.
    #[arg(long, value_name = "FILE")]
    env_file: Option<PathBuf>,

    /// Playlist that receives every upload.
    #[arg(long, value_name = "ID")]
    playlist_id: Option<String>,

    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum Mode {
    Watch,
    Single { url: String, title: String },
    UploadExisting,
}

impl Cli {
    fn mode(&self) -> Mode {
        match (&self.url, self.upload_existing) {
            (Some(url), _) => Mode::Single {
                url: url.clone(),
                title: self.title.clone().unwrap_or_else(|| url.clone()),
            },
            (None, true) => Mode::UploadExisting,
            (None, false) => Mode::Watch,
        }
    }

    fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            root: self.root.clone(),
            playlist_id: self.playlist_id.clone(),
            env_path: self.env_file.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = resolve_settings(cli.overrides()).context("loading settings")?;
    logging::initialize(&settings.root, cli.verbose);
    info!("working root: {}", settings.root.display());

    let result = run(cli.mode(), &settings).await;
    if let Err(err) = &result {
        error!("{err:#}");
    }
    logging::prune_empty_logs(&logging::logs_dir(&settings.root));
    result
}

async fn run(mode: Mode, settings: &Settings) -> Result<()> {
    match mode {
        Mode::Single { url, title } => {
            let pipeline = build_pipeline(settings).await?;
            let batch: Batch = std::iter::once(ListItem::new(title, url)).collect();
            let report = pipeline.run(&batch).await?;
            summarize("single transfer", &report);
        }
        Mode::UploadExisting => {
            let pipeline = build_pipeline(settings).await?;
            let report = pipeline.recover_existing().await?;
            summarize("leftover upload", &report);
        }
        Mode::Watch => watch(settings).await?,
    }
    Ok(())
}

async fn watch(settings: &Settings) -> Result<()> {
    let target = ScanTarget::new(settings.require_archive_url()?, &settings.item_selector)
        .context("parsing ARCHIVE_URL")?;
    let store = WatermarkStore::in_root(&settings.root);
    let scanner = HeadlessScanner::new(&settings.tools.browser, settings.timeouts.scan);
    let report = watch_once(
        &scanner,
        &target,
        &store,
        &MediaLayout::in_root(&settings.root),
        settings.max_scan_positions,
        || build_pipeline(settings),
    )
    .await?;
    if let Some(leftovers) = &report.leftovers {
        summarize("leftover upload", leftovers);
    }
    if let Some(transfer) = &report.transfer {
        summarize("transfer", transfer);
    }
    Ok(())
}

async fn build_pipeline(settings: &Settings) -> Result<Pipeline> {
    let secrets_path = settings.root.join(CLIENT_SECRETS_FILE);
    let secrets = ClientSecrets::load(&secrets_path)
        .with_context(|| format!("loading {}", secrets_path.display()))?;
    let auth = Authenticator::new(
        secrets,
        settings.root.join(CREDENTIALS_FILE),
        settings.oauth_port,
    )
    .with_authorization_timeout(settings.timeouts.authorization);
    let uploader = YoutubeUploader::new(
        auth,
        settings.upload.privacy.clone(),
        settings.upload.language.clone(),
    );
    uploader
        .authenticate()
        .await
        .context("authenticating with YouTube")?;

    let downloader = YtDlpDownloader::new(&settings.tools.yt_dlp, settings.timeouts.download);
    let splitter = FfmpegSplitter::new(
        &settings.tools.ffmpeg,
        &settings.tools.ffprobe,
        settings.timeouts.probe,
        settings.timeouts.split,
    );
    Ok(TransferPipeline::new(
        downloader,
        splitter,
        uploader,
        MediaLayout::in_root(&settings.root),
        TransferOptions {
            split_threshold: settings.split_threshold,
            segment_length: settings.segment_length,
            upload: settings.upload.clone(),
        },
    ))
}

fn summarize(stage: &str, report: &TransferReport) {
    info!(
        "{stage}: {} of {} item(s) uploaded, {} downloaded",
        report.uploaded(),
        report.outcomes.len(),
        report.downloaded
    );
    for title in report.failed() {
        warn!("{stage}: {title:?} needs attention, its files were kept");
    }
}

#![forbid(unsafe_code)]

//! Moves detected items from the archive to the upload platform.
//!
//! Items are handled one at a time and independently: a failed download,
//! split or upload only affects its own item. A local file is deleted only
//! after the uploader confirmed it, so anything that failed stays on disk
//! for the next run or a human to pick up. Only an authentication failure
//! stops the whole run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{error, info, warn};
use walkdir::WalkDir;

use crate::config::UploadDefaults;
use crate::downloader::Downloader;
use crate::item::{Batch, ListItem};
use crate::naming::sanitize_title;
use crate::splitter::Splitter;
use crate::upload::{UploadError, UploadRequest, Uploader};

const VIDEO_EXTENSION: &str = "mp4";
const VIDEOS_DIR: &str = "videos";

/// Where downloaded files and their segments live.
#[derive(Debug, Clone)]
pub struct MediaLayout {
    videos: PathBuf,
}

impl MediaLayout {
    pub fn new(videos: impl Into<PathBuf>) -> Self {
        Self {
            videos: videos.into(),
        }
    }

    pub fn in_root(root: &Path) -> Self {
        Self::new(root.join(VIDEOS_DIR))
    }

    pub fn videos_dir(&self) -> &Path {
        &self.videos
    }

    pub fn video_path(&self, name: &str) -> PathBuf {
        self.videos.join(format!("{name}.{VIDEO_EXTENSION}"))
    }

    pub fn segments_dir(&self, video: &Path) -> PathBuf {
        let stem = video
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.videos.join(format!("{stem}_segments"))
    }

    /// Videos left directly in the videos directory, in name order.
    pub fn leftovers(&self) -> Vec<PathBuf> {
        video_files(&self.videos)
    }
}

#[derive(Debug, Clone)]
pub struct TransferOptions {
    pub split_threshold: Duration,
    pub segment_length: Duration,
    pub upload: UploadDefaults,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Every upload unit was confirmed and removed locally.
    Uploaded { units: usize },
    DownloadFailed,
    /// Some units failed; they were left on disk.
    Incomplete { uploaded: usize, failed: usize },
}

#[derive(Debug, Default)]
pub struct TransferReport {
    pub downloaded: usize,
    pub outcomes: Vec<(String, ItemOutcome)>,
}

impl TransferReport {
    pub fn uploaded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, ItemOutcome::Uploaded { .. }))
            .count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| !matches!(outcome, ItemOutcome::Uploaded { .. }))
            .map(|(title, _)| title.as_str())
    }

    fn record(&mut self, title: &str, outcome: ItemOutcome) {
        self.outcomes.push((title.to_string(), outcome));
    }
}

/// One file to upload plus its title.
#[derive(Debug)]
struct UploadUnit {
    path: PathBuf,
    title: String,
}

pub struct TransferPipeline<D, S, U> {
    downloader: D,
    splitter: S,
    uploader: U,
    layout: MediaLayout,
    options: TransferOptions,
}

impl<D, S, U> TransferPipeline<D, S, U>
where
    D: Downloader,
    S: Splitter,
    U: Uploader,
{
    pub fn new(
        downloader: D,
        splitter: S,
        uploader: U,
        layout: MediaLayout,
        options: TransferOptions,
    ) -> Self {
        Self {
            downloader,
            splitter,
            uploader,
            layout,
            options,
        }
    }

    pub fn layout(&self) -> &MediaLayout {
        &self.layout
    }

    /// Downloads and publishes every item of `batch`.
    ///
    /// Returns `Err` only for a fatal upload error; the items before it are
    /// already done and stay done.
    pub async fn run(&self, batch: &Batch) -> Result<TransferReport, UploadError> {
        let mut report = TransferReport::default();
        for (index, item) in batch.iter().enumerate() {
            info!("processing item {}/{}: {}", index + 1, batch.len(), item.title());
            let outcome = self.process_item(item, &mut report).await?;
            report.record(item.title(), outcome);
        }

        if report.downloaded != batch.len() {
            error!(
                "download count mismatch: {} of {} items downloaded",
                report.downloaded,
                batch.len()
            );
        } else if !batch.is_empty() {
            info!("all {} items downloaded", batch.len());
        }
        Ok(report)
    }

    async fn process_item(
        &self,
        item: &ListItem,
        report: &mut TransferReport,
    ) -> Result<ItemOutcome, UploadError> {
        let destination = self.layout.video_path(&sanitize_title(item.title()));
        if let Err(err) = self.downloader.download(item.link(), &destination).await {
            error!("download failed for {:?} ({}): {err}", item.title(), item.link());
            return Ok(ItemOutcome::DownloadFailed);
        }
        report.downloaded += 1;
        self.publish(&destination, item.title(), item.link()).await
    }

    /// Uploads videos left behind by an interrupted run. Each file counts as
    /// an item titled after its file name, with an empty description.
    pub async fn recover_existing(&self) -> Result<TransferReport, UploadError> {
        let mut report = TransferReport::default();
        let leftovers = self.layout.leftovers();
        if leftovers.is_empty() {
            info!("no leftover videos in {}", self.layout.videos_dir().display());
            return Ok(report);
        }

        info!("found {} leftover video(s)", leftovers.len());
        for path in leftovers {
            let title = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
            let outcome = self.publish(&path, &title, "").await?;
            report.record(&title, outcome);
        }
        Ok(report)
    }

    async fn publish(
        &self,
        source: &Path,
        title: &str,
        description: &str,
    ) -> Result<ItemOutcome, UploadError> {
        let segments_dir = self.layout.segments_dir(source);
        let Some(segments) = self.segments_for(source, &segments_dir, title).await else {
            let unit = UploadUnit {
                path: source.to_path_buf(),
                title: title.to_string(),
            };
            return Ok(if self.upload_unit(&unit, description).await? {
                ItemOutcome::Uploaded { units: 1 }
            } else {
                ItemOutcome::Incomplete {
                    uploaded: 0,
                    failed: 1,
                }
            });
        };

        let mut uploaded = 0;
        let mut failed = 0;
        for unit in &segments {
            if self.upload_unit(unit, description).await? {
                uploaded += 1;
            } else {
                failed += 1;
            }
        }

        if failed > 0 {
            warn!(
                "{failed} of {} segments of {} failed, keeping the source",
                segments.len(),
                source.display()
            );
            return Ok(ItemOutcome::Incomplete { uploaded, failed });
        }

        remove_artifact(source).await;
        prune_empty_dir(&segments_dir).await;
        Ok(ItemOutcome::Uploaded { units: uploaded })
    }

    /// Segments to upload instead of `source`, or `None` when the file goes
    /// up whole.
    async fn segments_for(
        &self,
        source: &Path,
        segments_dir: &Path,
        title: &str,
    ) -> Option<Vec<UploadUnit>> {
        let existing = video_files(segments_dir);
        if !existing.is_empty() {
            info!(
                "reusing {} existing segment(s) in {}",
                existing.len(),
                segments_dir.display()
            );
            return Some(segment_units(existing, title));
        }

        let duration = match self.splitter.duration(source).await {
            Ok(duration) => duration,
            Err(err) => {
                warn!("duration of {} unknown, uploading unsplit: {err}", source.display());
                return None;
            }
        };
        if duration <= self.options.split_threshold {
            return None;
        }

        info!(
            "{} is longer than {:.1} hours, splitting",
            source.display(),
            self.options.split_threshold.as_secs_f64() / 3600.0
        );
        match self
            .splitter
            .split(source, segments_dir, self.options.segment_length)
            .await
        {
            Ok(segments) => Some(segment_units(segments, title)),
            Err(err) => {
                error!("split failed for {}, uploading unsplit: {err}", source.display());
                if let Err(err) = tokio::fs::remove_dir_all(segments_dir).await
                    && err.kind() != std::io::ErrorKind::NotFound
                {
                    warn!("cannot clean {}: {err}", segments_dir.display());
                }
                None
            }
        }
    }

    /// Uploads one unit and deletes it after confirmation. `Ok(false)` is a
    /// per-item failure, `Err` a fatal one.
    async fn upload_unit(&self, unit: &UploadUnit, description: &str) -> Result<bool, UploadError> {
        let defaults = &self.options.upload;
        let request = UploadRequest {
            path: unit.path.clone(),
            title: unit.title.clone(),
            description: description.to_string(),
            category: defaults.category.clone(),
            tags: defaults.tags.clone(),
            playlist_id: defaults.playlist_id.clone(),
        };

        match self.uploader.upload(&request).await {
            Ok(receipt) => {
                info!("uploaded {:?} as {}", unit.title, receipt.video_id);
                remove_artifact(&unit.path).await;
                Ok(true)
            }
            Err(err) if err.is_fatal() => {
                error!("aborting transfer, upload of {:?} failed: {err}", unit.title);
                Err(err)
            }
            Err(err) => {
                error!(
                    "upload failed for {:?}, keeping {}: {err}",
                    unit.title,
                    unit.path.display()
                );
                Ok(false)
            }
        }
    }
}

/// Titles segments `"<title> (Part i/n)"`. Numbering follows the part index
/// in the file name so reused segments keep their original numbers.
fn segment_units(segments: Vec<PathBuf>, title: &str) -> Vec<UploadUnit> {
    let indices: Vec<Option<usize>> = segments.iter().map(|path| part_index(path)).collect();
    let total = indices
        .iter()
        .flatten()
        .max()
        .map(|max| max + 1)
        .unwrap_or(segments.len())
        .max(segments.len());

    segments
        .into_iter()
        .zip(indices)
        .enumerate()
        .map(|(position, (path, index))| {
            let number = index.unwrap_or(position) + 1;
            UploadUnit {
                path,
                title: format!("{title} (Part {number}/{total})"),
            }
        })
        .collect()
}

fn part_index(path: &Path) -> Option<usize> {
    let stem = path.file_stem()?.to_str()?;
    let (_, index) = stem.rsplit_once("_part")?;
    index.parse().ok()
}

fn video_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(VIDEO_EXTENSION))
        })
        .collect();
    files.sort();
    files
}

async fn remove_artifact(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!("deleted local file {}", path.display()),
        Err(err) => warn!("cannot delete {}: {err}", path.display()),
    }
}

async fn prune_empty_dir(dir: &Path) {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return;
    };
    if matches!(entries.next_entry().await, Ok(None)) {
        match tokio::fs::remove_dir(dir).await {
            Ok(()) => info!("removed empty directory {}", dir.display()),
            Err(err) => warn!("cannot remove {}: {err}", dir.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::DownloadError;
    use crate::splitter::{SplitError, segment_file_name};
    use crate::upload::{AuthError, UploadReceipt};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tempfile::tempdir;

    const HOUR: Duration = Duration::from_secs(3600);

    #[derive(Default)]
    struct FakeDownloader {
        broken_links: HashSet<String>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Downloader for FakeDownloader {
        async fn download(&self, url: &str, destination: &Path) -> Result<(), DownloadError> {
            self.calls.lock().unwrap().push(url.to_string());
            if self.broken_links.contains(url) {
                return Err(DownloadError::MissingArtifact(destination.to_path_buf()));
            }
            std::fs::create_dir_all(destination.parent().unwrap()).unwrap();
            std::fs::write(destination, url).unwrap();
            Ok(())
        }
    }

    struct FakeSplitter {
        duration: Option<Duration>,
        parts: Option<usize>,
        split_calls: Mutex<usize>,
    }

    impl FakeSplitter {
        fn lasting(duration: Duration) -> Self {
            Self {
                duration: Some(duration),
                parts: Some(3),
                split_calls: Mutex::new(0),
            }
        }

        fn split_calls(&self) -> usize {
            *self.split_calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Splitter for FakeSplitter {
        async fn duration(&self, path: &Path) -> Result<Duration, SplitError> {
            self.duration.ok_or_else(|| SplitError::Probe {
                path: path.to_path_buf(),
                message: "no duration reported".into(),
            })
        }

        async fn split(
            &self,
            path: &Path,
            output_dir: &Path,
            _segment: Duration,
        ) -> Result<Vec<PathBuf>, SplitError> {
            *self.split_calls.lock().unwrap() += 1;
            let Some(parts) = self.parts else {
                std::fs::create_dir_all(output_dir).unwrap();
                return Err(SplitError::NoSegments(path.to_path_buf()));
            };
            std::fs::create_dir_all(output_dir).unwrap();
            let stem = path.file_stem().unwrap().to_string_lossy().into_owned();
            Ok((0..parts)
                .map(|index| {
                    let segment = output_dir.join(segment_file_name(&stem, index));
                    std::fs::write(&segment, "part").unwrap();
                    segment
                })
                .collect())
        }
    }

    #[derive(Default)]
    struct FakeUploader {
        reject_titles: HashSet<String>,
        revoked: bool,
        requests: Mutex<Vec<UploadRequest>>,
    }

    impl FakeUploader {
        fn rejecting(titles: &[&str]) -> Self {
            Self {
                reject_titles: titles.iter().map(|title| title.to_string()).collect(),
                ..Self::default()
            }
        }

        fn titles(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|request| request.title.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Uploader for FakeUploader {
        async fn upload(&self, request: &UploadRequest) -> Result<UploadReceipt, UploadError> {
            assert!(request.path.is_file(), "{} must exist", request.path.display());
            self.requests.lock().unwrap().push(request.clone());
            if self.revoked {
                return Err(AuthError::Revoked("token revoked".into()).into());
            }
            if self.reject_titles.contains(&request.title) {
                return Err(UploadError::Rejected {
                    status: 400,
                    body: "rejected".into(),
                });
            }
            Ok(UploadReceipt {
                video_id: format!("id-{}", request.title),
                playlist_item_id: None,
            })
        }
    }

    fn options() -> TransferOptions {
        TransferOptions {
            split_threshold: 12 * HOUR,
            segment_length: 6 * HOUR,
            upload: UploadDefaults {
                category: "22".into(),
                tags: vec!["vod".into()],
                privacy: "private".into(),
                language: "zh-TW".into(),
                playlist_id: Some("PL1".into()),
            },
        }
    }

    fn pipeline(
        root: &Path,
        downloader: FakeDownloader,
        splitter: FakeSplitter,
        uploader: FakeUploader,
    ) -> TransferPipeline<FakeDownloader, FakeSplitter, FakeUploader> {
        TransferPipeline::new(
            downloader,
            splitter,
            uploader,
            MediaLayout::in_root(root),
            options(),
        )
    }

    fn item(n: usize) -> ListItem {
        ListItem::new(format!("stream {n}"), format!("https://www.twitch.tv/videos/{n}"))
    }

    fn batch(items: &[ListItem]) -> Batch {
        items.iter().cloned().collect()
    }

    #[tokio::test]
    async fn short_video_is_uploaded_whole_and_removed() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline(
            dir.path(),
            FakeDownloader::default(),
            FakeSplitter::lasting(2 * HOUR),
            FakeUploader::default(),
        );

        let report = pipeline.run(&batch(&[item(1)])).await.unwrap();

        assert_eq!(report.downloaded, 1);
        assert_eq!(
            report.outcomes,
            vec![("stream 1".to_string(), ItemOutcome::Uploaded { units: 1 })]
        );
        assert_eq!(pipeline.splitter.split_calls(), 0);
        let requests = pipeline.uploader.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].title, "stream 1");
        assert_eq!(requests[0].description, "https://www.twitch.tv/videos/1");
        assert_eq!(requests[0].category, "22");
        assert_eq!(requests[0].tags, vec!["vod".to_string()]);
        assert_eq!(requests[0].playlist_id.as_deref(), Some("PL1"));
        assert!(!pipeline.layout().video_path("stream 1").exists());
    }

    #[tokio::test]
    async fn failed_upload_keeps_the_file() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline(
            dir.path(),
            FakeDownloader::default(),
            FakeSplitter::lasting(HOUR),
            FakeUploader::rejecting(&["stream 1"]),
        );

        let report = pipeline.run(&batch(&[item(1)])).await.unwrap();

        assert_eq!(
            report.outcomes[0].1,
            ItemOutcome::Incomplete {
                uploaded: 0,
                failed: 1
            }
        );
        assert_eq!(report.failed().collect::<Vec<_>>(), vec!["stream 1"]);
        assert!(pipeline.layout().video_path("stream 1").is_file());
    }

    #[tokio::test]
    async fn long_video_is_uploaded_in_parts() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline(
            dir.path(),
            FakeDownloader::default(),
            FakeSplitter::lasting(15 * HOUR),
            FakeUploader::default(),
        );

        let report = pipeline.run(&batch(&[item(1)])).await.unwrap();

        assert_eq!(report.outcomes[0].1, ItemOutcome::Uploaded { units: 3 });
        assert_eq!(
            pipeline.uploader.titles(),
            vec![
                "stream 1 (Part 1/3)",
                "stream 1 (Part 2/3)",
                "stream 1 (Part 3/3)"
            ]
        );
        let source = pipeline.layout().video_path("stream 1");
        assert!(!source.exists());
        assert!(!pipeline.layout().segments_dir(&source).exists());
    }

    #[tokio::test]
    async fn failed_segment_keeps_source_and_segment() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline(
            dir.path(),
            FakeDownloader::default(),
            FakeSplitter::lasting(15 * HOUR),
            FakeUploader::rejecting(&["stream 1 (Part 2/3)"]),
        );

        let report = pipeline.run(&batch(&[item(1)])).await.unwrap();

        assert_eq!(
            report.outcomes[0].1,
            ItemOutcome::Incomplete {
                uploaded: 2,
                failed: 1
            }
        );
        let source = pipeline.layout().video_path("stream 1");
        let segments = pipeline.layout().segments_dir(&source);
        assert!(source.is_file());
        assert_eq!(video_files(&segments), vec![segments.join("stream 1_part001.mp4")]);
    }

    #[tokio::test]
    async fn leftover_segments_are_reused_with_their_numbers() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline(
            dir.path(),
            FakeDownloader::default(),
            FakeSplitter::lasting(15 * HOUR),
            FakeUploader::default(),
        );
        let source = pipeline.layout().video_path("stream 1");
        let segments = pipeline.layout().segments_dir(&source);
        std::fs::create_dir_all(&segments).unwrap();
        std::fs::write(&source, "full").unwrap();
        std::fs::write(segments.join("stream 1_part001.mp4"), "part").unwrap();

        let report = pipeline.recover_existing().await.unwrap();

        assert_eq!(report.outcomes[0].1, ItemOutcome::Uploaded { units: 1 });
        assert_eq!(pipeline.splitter.split_calls(), 0);
        assert_eq!(pipeline.uploader.titles(), vec!["stream 1 (Part 2/2)"]);
        assert!(!source.exists());
        assert!(!segments.exists());
    }

    #[tokio::test]
    async fn split_failure_falls_back_to_whole_upload() {
        let dir = tempdir().unwrap();
        let mut splitter = FakeSplitter::lasting(20 * HOUR);
        splitter.parts = None;
        let pipeline = pipeline(
            dir.path(),
            FakeDownloader::default(),
            splitter,
            FakeUploader::default(),
        );

        let report = pipeline.run(&batch(&[item(1)])).await.unwrap();

        assert_eq!(report.outcomes[0].1, ItemOutcome::Uploaded { units: 1 });
        assert_eq!(pipeline.splitter.split_calls(), 1);
        assert_eq!(pipeline.uploader.titles(), vec!["stream 1"]);
        let source = pipeline.layout().video_path("stream 1");
        assert!(!pipeline.layout().segments_dir(&source).exists());
    }

    #[tokio::test]
    async fn unknown_duration_uploads_unsplit() {
        let dir = tempdir().unwrap();
        let mut splitter = FakeSplitter::lasting(HOUR);
        splitter.duration = None;
        let pipeline = pipeline(
            dir.path(),
            FakeDownloader::default(),
            splitter,
            FakeUploader::default(),
        );

        let report = pipeline.run(&batch(&[item(1)])).await.unwrap();
        assert_eq!(report.uploaded(), 1);
        assert_eq!(pipeline.splitter.split_calls(), 0);
    }

    #[tokio::test]
    async fn download_failure_does_not_stop_the_batch() {
        let dir = tempdir().unwrap();
        let downloader = FakeDownloader {
            broken_links: HashSet::from([item(1).link().to_string()]),
            ..FakeDownloader::default()
        };
        let pipeline = pipeline(
            dir.path(),
            downloader,
            FakeSplitter::lasting(HOUR),
            FakeUploader::default(),
        );

        let report = pipeline.run(&batch(&[item(1), item(2)])).await.unwrap();

        assert_eq!(report.downloaded, 1);
        assert_eq!(
            report.outcomes,
            vec![
                ("stream 1".to_string(), ItemOutcome::DownloadFailed),
                ("stream 2".to_string(), ItemOutcome::Uploaded { units: 1 }),
            ]
        );
        assert_eq!(pipeline.uploader.titles(), vec!["stream 2"]);
    }

    #[tokio::test]
    async fn authentication_failure_aborts_the_run() {
        let dir = tempdir().unwrap();
        let uploader = FakeUploader {
            revoked: true,
            ..FakeUploader::default()
        };
        let pipeline = pipeline(
            dir.path(),
            FakeDownloader::default(),
            FakeSplitter::lasting(HOUR),
            uploader,
        );

        let err = pipeline
            .run(&batch(&[item(1), item(2)]))
            .await
            .unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(
            *pipeline.downloader.calls.lock().unwrap(),
            vec![item(1).link().to_string()]
        );
        assert!(pipeline.layout().video_path("stream 1").is_file());
    }

    #[tokio::test]
    async fn leftovers_are_recovered_with_file_stem_titles() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline(
            dir.path(),
            FakeDownloader::default(),
            FakeSplitter::lasting(HOUR),
            FakeUploader::default(),
        );
        let videos = pipeline.layout().videos_dir().to_path_buf();
        std::fs::create_dir_all(&videos).unwrap();
        std::fs::write(videos.join("b stream.mp4"), "b").unwrap();
        std::fs::write(videos.join("a stream.mp4"), "a").unwrap();
        std::fs::write(videos.join("notes.txt"), "keep").unwrap();

        let report = pipeline.recover_existing().await.unwrap();

        assert_eq!(report.uploaded(), 2);
        assert_eq!(report.downloaded, 0);
        assert_eq!(pipeline.uploader.titles(), vec!["a stream", "b stream"]);
        assert!(
            pipeline
                .uploader
                .requests
                .lock()
                .unwrap()
                .iter()
                .all(|request| request.description.is_empty())
        );
        assert!(pipeline.layout().leftovers().is_empty());
        assert!(videos.join("notes.txt").is_file());
    }

    #[tokio::test]
    async fn nothing_to_recover_is_a_no_op() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline(
            dir.path(),
            FakeDownloader::default(),
            FakeSplitter::lasting(HOUR),
            FakeUploader::default(),
        );
        let report = pipeline.recover_existing().await.unwrap();
        assert!(report.outcomes.is_empty());
    }

    #[test]
    fn sanitized_names_land_in_videos_dir() {
        let layout = MediaLayout::in_root(Path::new("/data"));
        let path = layout.video_path(&sanitize_title("a/b: @c"));
        assert_eq!(path, PathBuf::from("/data/videos/a_b_ featc.mp4"));
        assert_eq!(
            layout.segments_dir(&path),
            PathBuf::from("/data/videos/a_b_ featc_segments")
        );
    }

    #[test]
    fn part_numbers_come_from_file_names() {
        assert_eq!(part_index(Path::new("x_part007.mp4")), Some(7));
        assert_eq!(part_index(Path::new("x.mp4")), None);
        let units = segment_units(
            vec![PathBuf::from("x_part002.mp4"), PathBuf::from("x_part003.mp4")],
            "x",
        );
        assert_eq!(units[0].title, "x (Part 3/4)");
        assert_eq!(units[1].title, "x (Part 4/4)");
    }
}

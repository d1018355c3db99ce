#![forbid(unsafe_code)]

//! One detection-and-transfer cycle of the default mode.
//!
//! Detection runs without credentials. The pipeline (and with it the
//! uploader's authentication) is only built once there is something to
//! upload, and the watermark moves right after that, before any transfer
//! starts.

use std::future::Future;

use anyhow::Result;
use log::{error, info};

use crate::downloader::Downloader;
use crate::reconcile::{Reconciliation, commit_watermark, reconcile};
use crate::scanner::{ScanTarget, Scanner};
use crate::splitter::Splitter;
use crate::transfer::{MediaLayout, TransferPipeline, TransferReport};
use crate::upload::Uploader;
use crate::watermark::WatermarkStore;

#[derive(Debug)]
pub struct WatchReport {
    pub reconciliation: Reconciliation,
    /// Whether the watermark file was rewritten this cycle.
    pub watermark_moved: bool,
    pub leftovers: Option<TransferReport>,
    pub transfer: Option<TransferReport>,
}

/// Detects new items, then connects, commits the watermark, uploads
/// leftovers and transfers the batch, in that order.
///
/// `connect` is not called when the batch is empty and `layout` holds no
/// leftovers. A failed `connect` returns before the watermark is touched. A
/// failed watermark save is logged and the transfer still runs.
pub async fn watch_once<Sc, D, S, U, F, Fut>(
    scanner: &Sc,
    target: &ScanTarget,
    store: &WatermarkStore,
    layout: &MediaLayout,
    max_positions: usize,
    connect: F,
) -> Result<WatchReport>
where
    Sc: Scanner + ?Sized,
    D: Downloader,
    S: Splitter,
    U: Uploader,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<TransferPipeline<D, S, U>>>,
{
    let watermark = store.load()?;
    match &watermark {
        Some(item) => info!("watermark: {:?} -> {}", item.title(), item.link()),
        None => info!("no watermark yet, collecting the whole list"),
    }

    let reconciliation = reconcile(scanner, target, watermark.as_ref(), max_positions).await;
    info!(
        "detection finished after {} scan(s): {:?}",
        reconciliation.scans, reconciliation.termination
    );

    let mut report = WatchReport {
        reconciliation,
        watermark_moved: false,
        leftovers: None,
        transfer: None,
    };
    let has_leftovers = !layout.leftovers().is_empty();
    if report.reconciliation.batch.is_empty() && !has_leftovers {
        info!("nothing new to transfer");
        return Ok(report);
    }

    let pipeline = connect().await?;
    match commit_watermark(store, &report.reconciliation) {
        Ok(saved) => report.watermark_moved = saved.is_some(),
        Err(err) => error!(
            "cannot record the watermark, these items will be detected again next run: {err}"
        ),
    }

    if has_leftovers {
        info!("uploading leftovers from an earlier run first");
        report.leftovers = Some(pipeline.recover_existing().await?);
    }
    if !report.reconciliation.batch.is_empty() {
        report.transfer = Some(pipeline.run(&report.reconciliation.batch).await?);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UploadDefaults;
    use crate::downloader::DownloadError;
    use crate::item::ListItem;
    use crate::scanner::{ScanError, ScanRequest};
    use crate::splitter::SplitError;
    use crate::transfer::TransferOptions;
    use crate::upload::{AuthError, UploadError, UploadReceipt, UploadRequest};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tempfile::tempdir;

    struct ListScanner(Vec<ListItem>);

    #[async_trait]
    impl Scanner for ListScanner {
        async fn scan(&self, request: &ScanRequest) -> Result<Option<ListItem>, ScanError> {
            Ok(self.0.get(request.position).cloned())
        }
    }

    struct FileDownloader;

    #[async_trait]
    impl Downloader for FileDownloader {
        async fn download(&self, url: &str, destination: &Path) -> Result<(), DownloadError> {
            std::fs::create_dir_all(destination.parent().unwrap()).unwrap();
            std::fs::write(destination, url).unwrap();
            Ok(())
        }
    }

    struct ShortSplitter;

    #[async_trait]
    impl Splitter for ShortSplitter {
        async fn duration(&self, _path: &Path) -> Result<Duration, SplitError> {
            Ok(Duration::from_secs(60))
        }

        async fn split(
            &self,
            path: &Path,
            _output_dir: &Path,
            _segment: Duration,
        ) -> Result<Vec<PathBuf>, SplitError> {
            Err(SplitError::NoSegments(path.to_path_buf()))
        }
    }

    type Seen = Arc<Mutex<Vec<(String, Option<ListItem>)>>>;

    /// Records upload titles along with the watermark on disk at that moment.
    struct RecordingUploader {
        store: WatermarkStore,
        revoked: bool,
        seen: Seen,
    }

    #[async_trait]
    impl Uploader for RecordingUploader {
        async fn upload(&self, request: &UploadRequest) -> Result<UploadReceipt, UploadError> {
            let watermark = self.store.load().unwrap();
            self.seen
                .lock()
                .unwrap()
                .push((request.title.clone(), watermark));
            if self.revoked {
                return Err(AuthError::Revoked("token revoked".into()).into());
            }
            Ok(UploadReceipt {
                video_id: format!("id-{}", request.title),
                playlist_item_id: None,
            })
        }
    }

    type Pipeline = TransferPipeline<FileDownloader, ShortSplitter, RecordingUploader>;

    fn pipeline(root: &Path, revoked: bool, seen: &Seen) -> Pipeline {
        TransferPipeline::new(
            FileDownloader,
            ShortSplitter,
            RecordingUploader {
                store: WatermarkStore::in_root(root),
                revoked,
                seen: Arc::clone(seen),
            },
            MediaLayout::in_root(root),
            TransferOptions {
                split_threshold: Duration::from_secs(12 * 3600),
                segment_length: Duration::from_secs(6 * 3600),
                upload: UploadDefaults {
                    category: "22".into(),
                    tags: Vec::new(),
                    privacy: "private".into(),
                    language: "zh-TW".into(),
                    playlist_id: None,
                },
            },
        )
    }

    fn item(n: usize) -> ListItem {
        ListItem::new(format!("stream {n}"), format!("https://www.twitch.tv/videos/{n}"))
    }

    fn target() -> ScanTarget {
        ScanTarget::new("https://www.twitch.tv/someone/videos", "[data-a-target='card-{index}']")
            .unwrap()
    }

    #[tokio::test]
    async fn nothing_new_never_connects() {
        let dir = tempdir().unwrap();
        let store = WatermarkStore::in_root(dir.path());
        store.save(&item(0)).unwrap();
        let connected = AtomicBool::new(false);

        let report = watch_once(
            &ListScanner(vec![item(0), item(1)]),
            &target(),
            &store,
            &MediaLayout::in_root(dir.path()),
            50,
            || async {
                connected.store(true, Ordering::SeqCst);
                Err::<Pipeline, _>(anyhow!("client_secret.json missing"))
            },
        )
        .await
        .unwrap();

        assert!(!connected.load(Ordering::SeqCst));
        assert!(report.reconciliation.batch.is_empty());
        assert!(!report.watermark_moved);
        assert!(report.transfer.is_none());
    }

    #[tokio::test]
    async fn failed_connect_keeps_the_old_watermark() {
        let dir = tempdir().unwrap();
        let store = WatermarkStore::in_root(dir.path());
        store.save(&item(2)).unwrap();

        let result = watch_once(
            &ListScanner(vec![item(0), item(1), item(2)]),
            &target(),
            &store,
            &MediaLayout::in_root(dir.path()),
            50,
            || async { Err::<Pipeline, _>(anyhow!("client_secret.json missing")) },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(store.load().unwrap(), Some(item(2)));
    }

    #[tokio::test]
    async fn watermark_moves_before_the_transfer_starts() {
        let dir = tempdir().unwrap();
        let store = WatermarkStore::in_root(dir.path());
        store.save(&item(2)).unwrap();
        let seen = Seen::default();

        let report = watch_once(
            &ListScanner(vec![item(0), item(1), item(2)]),
            &target(),
            &store,
            &MediaLayout::in_root(dir.path()),
            50,
            || async { Ok(pipeline(dir.path(), false, &seen)) },
        )
        .await
        .unwrap();

        assert!(report.watermark_moved);
        assert_eq!(report.transfer.as_ref().unwrap().uploaded(), 2);
        assert_eq!(store.load().unwrap(), Some(item(0)));
        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|(_, watermark)| watermark == &Some(item(0))));
    }

    #[tokio::test]
    async fn fatal_upload_still_leaves_the_new_watermark() {
        let dir = tempdir().unwrap();
        let store = WatermarkStore::in_root(dir.path());
        store.save(&item(1)).unwrap();
        let seen = Seen::default();

        let result = watch_once(
            &ListScanner(vec![item(0), item(1)]),
            &target(),
            &store,
            &MediaLayout::in_root(dir.path()),
            50,
            || async { Ok(pipeline(dir.path(), true, &seen)) },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(store.load().unwrap(), Some(item(0)));
    }

    #[tokio::test]
    async fn leftovers_alone_trigger_a_connection() {
        let dir = tempdir().unwrap();
        let store = WatermarkStore::in_root(dir.path());
        store.save(&item(0)).unwrap();
        let layout = MediaLayout::in_root(dir.path());
        std::fs::create_dir_all(layout.videos_dir()).unwrap();
        std::fs::write(layout.videos_dir().join("old stream.mp4"), "video").unwrap();

        let report = watch_once(
            &ListScanner(vec![item(0)]),
            &target(),
            &store,
            &layout,
            50,
            || async { Ok(pipeline(dir.path(), false, &Seen::default())) },
        )
        .await
        .unwrap();

        assert!(!report.watermark_moved);
        assert_eq!(report.leftovers.as_ref().unwrap().uploaded(), 1);
        assert!(report.transfer.is_none());
        assert!(layout.leftovers().is_empty());
    }
}

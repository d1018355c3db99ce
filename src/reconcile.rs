#![forbid(unsafe_code)]

//! Change detection against the stored watermark.
//!
//! The engine walks the archive list one position at a time, newest first,
//! and collects items until it meets the watermark again, runs out of list,
//! hits the position limit, or a scan fails. Every position is scanned at
//! most once and in increasing order.
//!
//! A position that repeats an already collected item (the list shifted while
//! it was being read) does not end the loop, so the scan count is bounded by
//! `batch.len() + repeats + 1` rather than `batch.len() + 1`.

use log::{error, info, warn};

use crate::item::{Batch, ListItem};
use crate::scanner::{ScanError, ScanTarget, Scanner};
use crate::watermark::{WatermarkError, WatermarkStore};

/// Why the scan loop stopped.
#[derive(Debug)]
pub enum Termination {
    /// Position 0 already shows the watermark.
    UpToDate,
    /// The watermark reappeared at `position`.
    CaughtUp { position: usize },
    /// Nothing is listed at `position`; the watermark was never seen.
    Exhausted { position: usize },
    /// `limit` positions were scanned without meeting the watermark.
    LimitReached { limit: usize },
    /// The scan at `position` failed. Items collected before it are kept.
    ScanFailed { position: usize, error: ScanError },
}

impl Termination {
    /// Whether the batch covers everything between the watermark and the top
    /// of the list.
    pub fn is_conclusive(&self) -> bool {
        !matches!(self, Termination::ScanFailed { .. })
    }
}

#[derive(Debug)]
pub struct Reconciliation {
    pub batch: Batch,
    pub termination: Termination,
    pub scans: usize,
    /// Positions skipped because they repeated a collected item.
    pub repeats: usize,
}

/// Scans positions `0..max_positions` and returns the items that are newer
/// than `watermark`. The watermark itself is never part of the batch.
pub async fn reconcile<S: Scanner + ?Sized>(
    scanner: &S,
    target: &ScanTarget,
    watermark: Option<&ListItem>,
    max_positions: usize,
) -> Reconciliation {
    let mut batch = Batch::default();
    let mut scans = 0;
    let mut repeats = 0;

    for position in 0..max_positions {
        info!("detecting item at position {position}");
        let request = target.request(position);
        scans += 1;

        let termination = match scanner.scan(&request).await {
            Ok(Some(item)) if watermark == Some(&item) => {
                if position == 0 {
                    info!("no new items, watermark is still the newest entry");
                    Termination::UpToDate
                } else {
                    info!("caught up with the watermark at position {position}");
                    Termination::CaughtUp { position }
                }
            }
            Ok(Some(item)) => {
                info!("new item detected: {:?} -> {}", item.title(), item.link());
                if !batch.push(item) {
                    warn!("position {position} repeats an item already collected, list shifted");
                    repeats += 1;
                }
                continue;
            }
            Ok(None) => {
                if position == 0 {
                    info!("the list is empty");
                } else if watermark.is_some() {
                    warn!(
                        "list ended at position {position} without the watermark, it may have been removed upstream"
                    );
                } else {
                    info!("list ended at position {position}");
                }
                Termination::Exhausted { position }
            }
            Err(error) => {
                error!(
                    "detection failed at position {position}: {error}; keeping {} collected item(s)",
                    batch.len()
                );
                Termination::ScanFailed { position, error }
            }
        };

        return Reconciliation {
            batch,
            termination,
            scans,
            repeats,
        };
    }

    warn!("stopped after {max_positions} positions without meeting the watermark");
    Reconciliation {
        batch,
        termination: Termination::LimitReached {
            limit: max_positions,
        },
        scans,
        repeats,
    }
}

/// Stores the newest batch item as the new watermark whenever the batch is
/// non-empty, including a batch cut short by a scan failure. An empty batch
/// writes nothing. Returns the item that was saved.
pub fn commit_watermark<'a>(
    store: &WatermarkStore,
    reconciliation: &'a Reconciliation,
) -> Result<Option<&'a ListItem>, WatermarkError> {
    let Some(newest) = reconciliation.batch.newest() else {
        info!("no new items to record");
        return Ok(None);
    };
    if !reconciliation.termination.is_conclusive() {
        warn!("detection was cut short, recording the newest collected item anyway");
    }
    info!("total new items found: {}", reconciliation.batch.len());
    store.save(newest)?;
    Ok(Some(newest))
}

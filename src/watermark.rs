#![forbid(unsafe_code)]

//! Persistence of the watermark: the newest item known at the end of the last
//! successful run.
//!
//! The file is a JSON object with exactly one `title: link` entry. A missing
//! file and `{}` both mean "no prior state".

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::item::ListItem;

pub const WATERMARK_FILE: &str = "latest.json";

#[derive(Debug, Error)]
pub enum WatermarkError {
    #[error("reading watermark {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("parsing watermark {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("watermark {path} holds {entries} entries, expected one")]
    Shape { path: PathBuf, entries: usize },

    #[error("writing watermark {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

#[derive(Debug, Clone)]
pub struct WatermarkStore {
    path: PathBuf,
}

impl WatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store located at `<root>/latest.json`.
    pub fn in_root(root: &Path) -> Self {
        Self::new(root.join(WATERMARK_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the stored item. A missing file is the first-run state and
    /// yields `Ok(None)`.
    pub fn load(&self) -> Result<Option<ListItem>, WatermarkError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!("no watermark at {}, starting fresh", self.path.display());
                return Ok(None);
            }
            Err(source) => {
                return Err(WatermarkError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let entries: BTreeMap<String, String> =
            serde_json::from_slice(&raw).map_err(|source| WatermarkError::Parse {
                path: self.path.clone(),
                source,
            })?;

        let mut entries = entries.into_iter();
        match (entries.next(), entries.next()) {
            (None, _) => Ok(None),
            (Some((title, link)), None) => {
                let item = ListItem::new(title, link);
                debug!("loaded watermark {:?}", item);
                Ok(Some(item))
            }
            (Some(_), Some(_)) => Err(WatermarkError::Shape {
                path: self.path.clone(),
                entries: 2 + entries.count(),
            }),
        }
    }

    /// Replaces the stored item. The new content is written to a temporary
    /// file next to the target and renamed over it, so readers see either the
    /// old or the new watermark.
    pub fn save(&self, item: &ListItem) -> Result<(), WatermarkError> {
        let write_err = |source: io::Error| WatermarkError::Write {
            path: self.path.clone(),
            source,
        };

        let mut entries = BTreeMap::new();
        entries.insert(item.title(), item.link());
        let payload = serde_json::to_vec(&entries).map_err(|err| write_err(err.into()))?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(write_err)?;

        let mut tmp = NamedTempFile::new_in(&dir).map_err(write_err)?;
        tmp.write_all(&payload).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&self.path).map_err(|err| write_err(err.error))?;

        info!("watermark updated to {:?}", item.title());
        Ok(())
    }
}

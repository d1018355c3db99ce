#![forbid(unsafe_code)]

//! Upload collaborator contract plus the YouTube implementation.

pub mod auth;
pub mod youtube;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

pub use auth::{AuthError, Authenticator, ClientSecrets};
pub use youtube::{Endpoints, YoutubeUploader};

/// Everything needed to publish one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub path: PathBuf,
    pub title: String,
    pub description: String,
    pub category: String,
    pub tags: Vec<String>,
    pub playlist_id: Option<String>,
}

/// Confirmation returned by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub video_id: String,
    /// Set when the video was also added to the requested playlist.
    pub playlist_item_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("upload rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("upload transport error: {0}")]
    Transport(String),

    #[error("unexpected upload response: {0}")]
    Response(String),

    #[error("upload task aborted: {0}")]
    Task(String),
}

impl UploadError {
    /// Authentication problems end the run; everything else only affects the
    /// file being uploaded.
    pub fn is_fatal(&self) -> bool {
        matches!(self, UploadError::Auth(_))
    }
}

#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, request: &UploadRequest) -> Result<UploadReceipt, UploadError>;
}

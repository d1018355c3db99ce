#![forbid(unsafe_code)]

//! YouTube Data API v3 uploader.
//!
//! Videos go through a resumable upload session: the metadata is posted
//! first, the returned session URI then receives the file in one PUT. The
//! blocking HTTP client runs on tokio's blocking pool.

use std::fs::File;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use serde::Deserialize;
use serde_json::{Value, json};

use super::auth::{AuthError, Authenticator, describe_http_error};
use super::{UploadError, UploadReceipt, UploadRequest, Uploader};

pub const UPLOAD_ENDPOINT: &str = "https://www.googleapis.com/upload/youtube/v3/videos";
pub const PLAYLIST_ITEMS_ENDPOINT: &str = "https://www.googleapis.com/youtube/v3/playlistItems";

const MAX_TITLE_CHARS: usize = 100;
const FALLBACK_MIME: &str = "video/*";

#[derive(Debug, Clone)]
pub struct Endpoints {
    pub upload: String,
    pub playlist_items: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            upload: UPLOAD_ENDPOINT.to_string(),
            playlist_items: PLAYLIST_ITEMS_ENDPOINT.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Resource {
    id: String,
}

#[derive(Debug)]
struct Inner {
    auth: Authenticator,
    agent: ureq::Agent,
    endpoints: Endpoints,
    privacy: String,
    language: String,
}

#[derive(Debug, Clone)]
pub struct YoutubeUploader {
    inner: Arc<Inner>,
}

impl YoutubeUploader {
    pub fn new(auth: Authenticator, privacy: impl Into<String>, language: impl Into<String>) -> Self {
        Self::with_endpoints(auth, privacy, language, Endpoints::default())
    }

    pub fn with_endpoints(
        auth: Authenticator,
        privacy: impl Into<String>,
        language: impl Into<String>,
        endpoints: Endpoints,
    ) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(30))
            .timeout_read(Duration::from_secs(300))
            .timeout_write(Duration::from_secs(300))
            .build();
        Self {
            inner: Arc::new(Inner {
                auth,
                agent,
                endpoints,
                privacy: privacy.into(),
                language: language.into(),
            }),
        }
    }

    /// Makes sure a valid token is available before any work starts.
    pub async fn authenticate(&self) -> Result<(), AuthError> {
        self.inner.auth.access_token().await.map(|_| ())
    }

    async fn upload_with_token(
        &self,
        token: String,
        request: &UploadRequest,
    ) -> Result<UploadReceipt, UploadError> {
        let inner = Arc::clone(&self.inner);
        let request = request.clone();
        tokio::task::spawn_blocking(move || inner.upload(&token, &request))
            .await
            .map_err(|err| UploadError::Task(err.to_string()))?
    }
}

#[async_trait]
impl Uploader for YoutubeUploader {
    /// A token the platform rejects is renewed once (refresh, or interactive
    /// authorization when that fails) before the upload is retried.
    async fn upload(&self, request: &UploadRequest) -> Result<UploadReceipt, UploadError> {
        let token = self.inner.auth.access_token().await?;
        match self.upload_with_token(token, request).await {
            Err(UploadError::Auth(AuthError::Revoked(reason))) => {
                warn!("access token rejected ({reason}), renewing credentials and retrying");
                self.inner.auth.invalidate()?;
                let token = self.inner.auth.access_token().await?;
                self.upload_with_token(token, request).await
            }
            result => result,
        }
    }
}

impl Inner {
    fn upload(&self, token: &str, request: &UploadRequest) -> Result<UploadReceipt, UploadError> {
        let bearer = format!("Bearer {token}");
        let path = &request.path;
        let io_err = |source: std::io::Error| UploadError::Io {
            path: path.clone(),
            source,
        };

        let size = std::fs::metadata(path).map_err(io_err)?.len();
        let mime = mime_guess::from_path(path)
            .first_raw()
            .unwrap_or(FALLBACK_MIME);
        let body = self.video_body(request);
        info!(
            "uploading {} ({size} bytes) as {:?}",
            path.display(),
            body["snippet"]["title"]
        );

        let session = self
            .agent
            .post(&self.endpoints.upload)
            .query("uploadType", "resumable")
            .query("part", "snippet,status")
            .set("Authorization", &bearer)
            .set("X-Upload-Content-Type", mime)
            .set("X-Upload-Content-Length", &size.to_string())
            .send_json(body)
            .map_err(upload_error)?;
        let location = session
            .header("Location")
            .ok_or_else(|| UploadError::Response("no resumable session location".into()))?
            .to_string();

        let file = File::open(path).map_err(io_err)?;
        let response = self
            .agent
            .put(&location)
            .set("Authorization", &bearer)
            .set("Content-Type", mime)
            .set("Content-Length", &size.to_string())
            .send(file)
            .map_err(upload_error)?;
        let video: Resource = response
            .into_json()
            .map_err(|err| UploadError::Response(err.to_string()))?;
        info!("upload complete, video id {}", video.id);

        let playlist_item_id = match request.playlist_id.as_deref() {
            Some(playlist_id) => self.add_to_playlist(&bearer, playlist_id, &video.id),
            None => None,
        };

        Ok(UploadReceipt {
            video_id: video.id,
            playlist_item_id,
        })
    }

    fn video_body(&self, request: &UploadRequest) -> Value {
        json!({
            "snippet": {
                "title": clean_title(&request.title),
                "description": request.description,
                "tags": request.tags,
                "categoryId": request.category,
                "defaultLanguage": self.language,
                "defaultAudioLanguage": self.language,
            },
            "status": {
                "privacyStatus": self.privacy,
                "madeForKids": false,
                "selfDeclaredMadeForKids": false,
            },
        })
    }

    /// A playlist failure leaves the upload itself intact.
    fn add_to_playlist(&self, bearer: &str, playlist_id: &str, video_id: &str) -> Option<String> {
        let body = json!({
            "snippet": {
                "playlistId": playlist_id,
                "resourceId": {
                    "kind": "youtube#video",
                    "videoId": video_id,
                },
            },
        });
        let result = self
            .agent
            .post(&self.endpoints.playlist_items)
            .query("part", "snippet")
            .set("Authorization", bearer)
            .send_json(body);
        match result {
            Ok(response) => match response.into_json::<Resource>() {
                Ok(item) => {
                    info!("added video {video_id} to playlist {playlist_id}");
                    Some(item.id)
                }
                Err(err) => {
                    warn!("playlist insert for {video_id} returned an unreadable body: {err}");
                    None
                }
            },
            Err(err) => {
                warn!(
                    "cannot add video {video_id} to playlist {playlist_id}: {}",
                    describe_http_error(err)
                );
                None
            }
        }
    }
}

fn upload_error(err: ureq::Error) -> UploadError {
    match err {
        ureq::Error::Status(401, response) => {
            let body = response.into_string().unwrap_or_default();
            UploadError::Auth(AuthError::Revoked(body.trim().to_string()))
        }
        ureq::Error::Status(status, response) => UploadError::Rejected {
            status,
            body: response.into_string().unwrap_or_default().trim().to_string(),
        },
        ureq::Error::Transport(transport) => UploadError::Transport(transport.to_string()),
    }
}

/// Strips the characters the platform refuses in titles and enforces its
/// length limit.
pub fn clean_title(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| !matches!(c, '<' | '>'))
        .take(MAX_TITLE_CHARS)
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned.to_string()
    }
}

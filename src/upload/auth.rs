#![forbid(unsafe_code)]

//! OAuth credentials for the upload API.
//!
//! The long-lived credential is cached as JSON next to the other run state.
//! An expired access token is refreshed; when refreshing is impossible the
//! user is walked through one interactive authorization whose redirect is
//! received by a short-lived loopback server, and the result is cached again.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    routing::get,
};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info, warn};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use url::Url;

pub const UPLOAD_SCOPE: &str = "https://www.googleapis.com/auth/youtube.upload";
pub const CLIENT_SECRETS_FILE: &str = "client_secret.json";
pub const CREDENTIALS_FILE: &str = "credentials.json";
pub const DEFAULT_AUTHORIZATION_TIMEOUT: Duration = Duration::from_secs(300);

const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
/// Tokens this close to expiry are treated as expired.
const EXPIRY_MARGIN_SECS: i64 = 60;
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;
/// Grace period for the browser to receive the confirmation page.
const REDIRECT_DRAIN: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("client secrets {}: {message}", .path.display())]
    Secrets { path: PathBuf, message: String },

    #[error("credential cache {}: {source}", .path.display())]
    Cache { path: PathBuf, source: io::Error },

    #[error("token endpoint: {0}")]
    Token(String),

    #[error("authorization: {0}")]
    Authorization(String),

    #[error("credentials rejected by the platform: {0}")]
    Revoked(String),
}

#[derive(Debug, Deserialize)]
struct SecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

/// OAuth client registration as downloaded from the cloud console.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ClientSecrets {
    pub fn load(path: &Path) -> Result<Self, AuthError> {
        let secrets_err = |message: String| AuthError::Secrets {
            path: path.to_path_buf(),
            message,
        };
        let raw = fs::read(path).map_err(|err| secrets_err(err.to_string()))?;
        let file: SecretsFile =
            serde_json::from_slice(&raw).map_err(|err| secrets_err(err.to_string()))?;
        file.installed
            .or(file.web)
            .ok_or_else(|| secrets_err("neither an \"installed\" nor a \"web\" client".into()))
    }
}

/// Cached credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
}

impl StoredCredentials {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - now > TimeDelta::seconds(EXPIRY_MARGIN_SECS)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

/// Query parameters of the loopback redirect.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
struct RedirectParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

impl RedirectParams {
    fn is_callback(&self) -> bool {
        self.code.is_some() || self.error.is_some()
    }
}

#[derive(Debug)]
pub struct Authenticator {
    secrets: ClientSecrets,
    cache_path: PathBuf,
    scopes: Vec<String>,
    redirect_port: u16,
    authorization_timeout: Duration,
    interactive: bool,
    agent: ureq::Agent,
}

impl Authenticator {
    pub fn new(secrets: ClientSecrets, cache_path: impl Into<PathBuf>, redirect_port: u16) -> Self {
        Self {
            secrets,
            cache_path: cache_path.into(),
            scopes: vec![UPLOAD_SCOPE.to_string()],
            redirect_port,
            authorization_timeout: DEFAULT_AUTHORIZATION_TIMEOUT,
            interactive: true,
            agent: ureq::AgentBuilder::new()
                .timeout_connect(Duration::from_secs(30))
                .timeout_read(Duration::from_secs(60))
                .build(),
        }
    }

    /// How long the interactive authorization waits for the browser
    /// redirect before giving up.
    pub fn with_authorization_timeout(mut self, timeout: Duration) -> Self {
        self.authorization_timeout = timeout;
        self
    }

    /// Disables the interactive fallback; a credential that cannot be
    /// refreshed then fails immediately.
    pub fn non_interactive(mut self) -> Self {
        self.interactive = false;
        self
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// Returns a usable access token, refreshing or re-authorizing as needed.
    pub async fn access_token(&self) -> Result<String, AuthError> {
        let cached = self.load_cached();
        if let Some(credentials) = &cached
            && credentials.is_fresh(Utc::now())
        {
            return Ok(credentials.access_token.clone());
        }

        let refreshed = match cached {
            Some(StoredCredentials {
                refresh_token: Some(refresh_token),
                ..
            }) => {
                info!("refreshing access token");
                match self.refresh(&refresh_token).await {
                    Ok(credentials) => Some(credentials),
                    Err(err) => {
                        warn!("cannot refresh token: {err}; authorization required");
                        None
                    }
                }
            }
            Some(_) => {
                warn!("no refresh token cached; authorization required");
                None
            }
            None => None,
        };

        let credentials = match refreshed {
            Some(credentials) => credentials,
            None => self.authorize().await?,
        };
        self.store(&credentials)?;
        Ok(credentials.access_token)
    }

    /// Marks the cached access token as expired so the next
    /// [`access_token`](Self::access_token) call renews it. The refresh
    /// token is kept.
    pub fn invalidate(&self) -> Result<(), AuthError> {
        let Some(mut credentials) = self.load_cached() else {
            return Ok(());
        };
        credentials.expires_at = Utc::now() - TimeDelta::hours(1);
        self.store(&credentials)
    }

    fn load_cached(&self) -> Option<StoredCredentials> {
        let raw = match fs::read(&self.cache_path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!("cannot read {}: {err}", self.cache_path.display());
                return None;
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(credentials) => Some(credentials),
            Err(err) => {
                warn!("ignoring unreadable {}: {err}", self.cache_path.display());
                None
            }
        }
    }

    fn store(&self, credentials: &StoredCredentials) -> Result<(), AuthError> {
        let cache_err = |source: io::Error| AuthError::Cache {
            path: self.cache_path.clone(),
            source,
        };
        let payload = serde_json::to_vec_pretty(credentials).map_err(|err| cache_err(err.into()))?;
        let dir = match self.cache_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(cache_err)?;
        let mut tmp = NamedTempFile::new_in(&dir).map_err(cache_err)?;
        tmp.write_all(&payload).map_err(cache_err)?;
        tmp.persist(&self.cache_path)
            .map_err(|err| cache_err(err.error))?;
        debug!("credentials cached in {}", self.cache_path.display());
        Ok(())
    }

    async fn refresh(&self, refresh_token: &str) -> Result<StoredCredentials, AuthError> {
        let response = self
            .token_request(vec![
                ("client_id", self.secrets.client_id.clone()),
                ("client_secret", self.secrets.client_secret.clone()),
                ("refresh_token", refresh_token.to_string()),
                ("grant_type", "refresh_token".to_string()),
            ])
            .await?;
        let mut credentials = self.credentials_from(response);
        if credentials.refresh_token.is_none() {
            credentials.refresh_token = Some(refresh_token.to_string());
        }
        Ok(credentials)
    }

    async fn authorize(&self) -> Result<StoredCredentials, AuthError> {
        if !self.interactive {
            return Err(AuthError::Authorization(
                "interactive authorization is disabled".into(),
            ));
        }

        let listener = TcpListener::bind(("127.0.0.1", self.redirect_port))
            .await
            .map_err(|err| {
                AuthError::Authorization(format!(
                    "cannot listen on port {}: {err}",
                    self.redirect_port
                ))
            })?;
        let port = listener
            .local_addr()
            .map_err(|err| AuthError::Authorization(format!("redirect listener: {err}")))?
            .port();
        let redirect_uri = format!("http://localhost:{port}/");
        let state = random_state();
        let consent_url = self.authorization_url(&redirect_uri, &state)?;
        warn!("authorization required, open this URL in a browser:\n{consent_url}");

        let params = tokio::time::timeout(self.authorization_timeout, receive_redirect(listener))
            .await
            .map_err(|_| {
                AuthError::Authorization(format!(
                    "no redirect received within {}s",
                    self.authorization_timeout.as_secs()
                ))
            })??;
        if let Some(error) = params.error {
            return Err(AuthError::Authorization(format!("consent denied: {error}")));
        }
        if params.state.as_deref() != Some(state.as_str()) {
            return Err(AuthError::Authorization("state mismatch in redirect".into()));
        }
        let code = params
            .code
            .ok_or_else(|| AuthError::Authorization("redirect carried no code".into()))?;

        let response = self
            .token_request(vec![
                ("client_id", self.secrets.client_id.clone()),
                ("client_secret", self.secrets.client_secret.clone()),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("grant_type", "authorization_code".to_string()),
            ])
            .await?;
        let credentials = self.credentials_from(response);
        if credentials.refresh_token.is_none() {
            warn!("no refresh token was issued; authorization will be needed again soon");
        } else {
            info!("refresh token obtained, future runs refresh automatically");
        }
        Ok(credentials)
    }

    fn authorization_url(&self, redirect_uri: &str, state: &str) -> Result<Url, AuthError> {
        let scope = self.scopes.join(" ");
        Url::parse_with_params(
            &self.secrets.auth_uri,
            &[
                ("client_id", self.secrets.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("state", state),
            ],
        )
        .map_err(|err| AuthError::Authorization(format!("bad auth_uri: {err}")))
    }

    /// Posts `form` to the token endpoint on the blocking pool.
    async fn token_request(
        &self,
        form: Vec<(&'static str, String)>,
    ) -> Result<TokenResponse, AuthError> {
        let agent = self.agent.clone();
        let token_uri = self.secrets.token_uri.clone();
        tokio::task::spawn_blocking(move || {
            let pairs: Vec<(&str, &str)> = form
                .iter()
                .map(|(key, value)| (*key, value.as_str()))
                .collect();
            let response = agent
                .post(&token_uri)
                .send_form(&pairs)
                .map_err(|err| AuthError::Token(describe_http_error(err)))?;
            response
                .into_json()
                .map_err(|err| AuthError::Token(format!("unreadable token response: {err}")))
        })
        .await
        .map_err(|err| AuthError::Token(format!("token request task: {err}")))?
    }

    fn credentials_from(&self, response: TokenResponse) -> StoredCredentials {
        let lifetime = response.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        StoredCredentials {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at: Utc::now() + TimeDelta::seconds(lifetime),
            scopes: response
                .scope
                .map(|scope| scope.split_whitespace().map(str::to_owned).collect())
                .unwrap_or_else(|| self.scopes.clone()),
        }
    }
}

pub(crate) fn describe_http_error(err: ureq::Error) -> String {
    match err {
        ureq::Error::Status(status, response) => {
            let body = response.into_string().unwrap_or_default();
            format!("status {status}: {}", body.trim())
        }
        ureq::Error::Transport(transport) => transport.to_string(),
    }
}

fn random_state() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Serves the loopback redirect until one request carries a code or an
/// error, then shuts the server down after the answer went out.
async fn receive_redirect(listener: TcpListener) -> Result<RedirectParams, AuthError> {
    let (params_tx, mut params_rx) = mpsc::channel::<RedirectParams>(1);
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let app = Router::new()
        .route("/", get(handle_redirect))
        .with_state(params_tx);

    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = stop_rx.await;
            })
            .await
    });

    let params = params_rx.recv().await;
    let _ = stop_tx.send(());
    match tokio::time::timeout(REDIRECT_DRAIN, server).await {
        Ok(Ok(Err(err))) => debug!("redirect listener: {err}"),
        Ok(Err(err)) => debug!("redirect listener task: {err}"),
        Ok(Ok(Ok(()))) | Err(_) => {}
    }
    params.ok_or_else(|| AuthError::Authorization("redirect listener stopped".into()))
}

async fn handle_redirect(
    State(params_tx): State<mpsc::Sender<RedirectParams>>,
    Query(params): Query<RedirectParams>,
) -> (StatusCode, &'static str) {
    if !params.is_callback() {
        return (StatusCode::BAD_REQUEST, "Missing authorization code.");
    }
    // Only the first callback counts.
    let _ = params_tx.try_send(params);
    (
        StatusCode::OK,
        "Authorization received, you can close this window.",
    )
}

//! Backend HTTP seam
//!
//! The bootstrap only talks to two endpoints: the session-status endpoint and
//! the launch endpoint. [`Backend`] is the seam; [`HttpBackend`] is the
//! reqwest implementation. Classification of replies happens in
//! [`crate::probe`] and [`crate::reauth`], not here.

use crate::config::Config;
use crate::launch::EhrLaunch;
use crate::time::parse_expires_at;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

/// Network-level failure: nothing came back from the server.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            Self::Connect(e.to_string())
        } else {
            Self::Request(e.to_string())
        }
    }
}

/// Construction errors for [`HttpBackend`].
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("invalid backend URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("URL must use http or https scheme, got: {0}")]
    UnsupportedScheme(String),

    #[error("failed to create HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Raw reply from the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Body of a 2xx status reply
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub authenticated: bool,
    #[serde(default)]
    pub expires_at: Option<String>,
    #[serde(default)]
    pub patient: Option<String>,
    #[serde(default)]
    pub fhir_base: Option<String>,
    #[serde(default)]
    pub sandbox_mode: bool,
    #[serde(default, alias = "timeRemainingSeconds")]
    pub time_remaining: Option<u64>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub session_source: Option<String>,
}

impl StatusResponse {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at.as_deref().and_then(parse_expires_at)
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// GET the status endpoint, optionally naming a session.
    async fn auth_status(&self, session_id: Option<&str>) -> Result<HttpReply, TransportError>;

    /// GET `url` without following redirects; returns the status code.
    async fn preflight(&self, url: &Url) -> Result<u16, TransportError>;

    /// The launch endpoint, with EHR context forwarded when present.
    fn launch_url(&self, ehr: Option<&EhrLaunch>) -> Url;
}

// ---------------------------------------------------------------------------
// HttpBackend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    preflight_client: reqwest::Client,
    status_url: Url,
    launch_url: Url,
    reset_url: Url,
    session_param: String,
}

impl HttpBackend {
    pub fn new(config: &Config) -> Result<Self, BackendError> {
        let base = parse_base(&config.backend_url)?;

        let builder = || {
            let builder = reqwest::Client::builder();
            if config.use_system_proxy {
                builder
            } else {
                builder.no_proxy()
            }
        };
        let client = builder().build()?;
        let preflight_client = builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        info!("Creating HttpBackend with base_url: {}", base);
        Ok(Self {
            client,
            preflight_client,
            status_url: join(&base, &config.status_path)?,
            launch_url: join(&base, &config.launch_path)?,
            reset_url: join(&base, &config.reset_path)?,
            session_param: config.session_param.clone(),
        })
    }

    /// Clear the backend's "launch already in progress" marker.
    pub async fn reset_launch(&self) -> Result<u16, TransportError> {
        let response = self.client.post(self.reset_url.clone()).send().await?;
        let status = response.status().as_u16();
        info!(status, "launch state reset requested");
        Ok(status)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn auth_status(&self, session_id: Option<&str>) -> Result<HttpReply, TransportError> {
        let mut url = self.status_url.clone();
        if let Some(id) = session_id {
            url.query_pairs_mut().append_pair(&self.session_param, id);
        }

        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        // The server answered; an unreadable body is left for the caller to reject.
        let body = response.text().await.unwrap_or_default();
        debug!(status, bytes = body.len(), "status endpoint replied");
        Ok(HttpReply { status, body })
    }

    async fn preflight(&self, url: &Url) -> Result<u16, TransportError> {
        let response = self.preflight_client.get(url.clone()).send().await?;
        Ok(response.status().as_u16())
    }

    fn launch_url(&self, ehr: Option<&EhrLaunch>) -> Url {
        let mut url = self.launch_url.clone();
        if let Some(ehr) = ehr {
            url.query_pairs_mut()
                .append_pair("iss", &ehr.iss)
                .append_pair("launch", &ehr.launch);
        }
        url
    }
}

fn parse_base(raw: &str) -> Result<Url, BackendError> {
    let cleaned = raw.trim_end_matches('/');
    let parsed = Url::parse(cleaned).map_err(|source| BackendError::InvalidUrl {
        url: cleaned.to_string(),
        source,
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(BackendError::UnsupportedScheme(parsed.scheme().to_string()));
    }
    Ok(parsed)
}

/// Append an absolute endpoint path to the base, keeping any base path prefix.
fn join(base: &Url, path: &str) -> Result<Url, BackendError> {
    let joined = format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Url::parse(&joined).map_err(|source| BackendError::InvalidUrl {
        url: joined,
        source,
    })
}

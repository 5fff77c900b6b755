//! Pinata pinning service content store.
//!
//! Blobs are pinned through the Pinata API with bearer-token authorization
//! and fetched back through an IPFS gateway.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::provider::ContentStore;
use crate::retry::Backoff;
use cipherdrop_common::{ContentId, Error, Result};

/// Default Pinata API base URL.
pub const DEFAULT_API_URL: &str = "https://api.pinata.cloud";
/// Default IPFS gateway base URL.
pub const DEFAULT_GATEWAY_URL: &str = "https://ipfs.io";

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_gateway_url() -> String {
    DEFAULT_GATEWAY_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

/// Pinata store configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct PinataConfig {
    /// API JWT used as bearer token.
    pub jwt: String,
    /// API base URL.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Gateway base URL used for downloads.
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retries for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl PinataConfig {
    /// Create a configuration with default endpoints.
    pub fn new(jwt: impl Into<String>) -> Self {
        Self {
            jwt: jwt.into(),
            api_url: default_api_url(),
            gateway_url: default_gateway_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }

    fn pin_url(&self) -> String {
        format!("{}/pinning/pinFileToIPFS", self.api_url.trim_end_matches('/'))
    }

    fn unpin_url(&self, cid: &ContentId) -> String {
        format!("{}/pinning/unpin/{}", self.api_url.trim_end_matches('/'), cid)
    }

    fn gateway_object_url(&self, cid: &ContentId) -> String {
        format!("{}/ipfs/{}", self.gateway_url.trim_end_matches('/'), cid)
    }
}

impl std::fmt::Debug for PinataConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinataConfig")
            .field("jwt", &"[REDACTED]")
            .field("api_url", &self.api_url)
            .field("gateway_url", &self.gateway_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

/// Response from `pinFileToIPFS`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PinResponse {
    ipfs_hash: String,
    #[serde(default)]
    pin_size: Option<u64>,
}

/// Content store backed by the Pinata pinning service.
pub struct PinataContentStore {
    http: Client,
    config: PinataConfig,
    backoff: Backoff,
}

impl PinataContentStore {
    /// Create a new Pinata store.
    ///
    /// # Errors
    /// - `InvalidInput` if the JWT is empty or the HTTP client cannot be built
    pub fn new(config: PinataConfig) -> Result<Self> {
        if config.jwt.trim().is_empty() {
            return Err(Error::InvalidInput(
                "Pinata store requires a JWT".to_string(),
            ));
        }

        let http = Client::builder()
            .user_agent("CipherDrop/0.1")
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::InvalidInput(format!("Failed to create HTTP client: {}", e)))?;

        let backoff = Backoff::new(config.max_retries);

        Ok(Self {
            http,
            config,
            backoff,
        })
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.config.jwt)
    }

    async fn pin_once(&self, data: &[u8], file_name: &str) -> Result<ContentId> {
        let part = Part::bytes(data.to_vec()).file_name(file_name.to_string());
        let form = Form::new().part("file", part);

        let response = self
            .http
            .post(self.config.pin_url())
            .header(header::AUTHORIZATION, self.auth_header())
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Unavailable(format!("Failed to pin blob: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, &body, "pin"));
        }

        let pinned: PinResponse = response
            .json()
            .await
            .map_err(|e| Error::Unavailable(format!("Failed to parse pin response: {}", e)))?;

        debug!(size = ?pinned.pin_size, "Pinata accepted blob");
        ContentId::new(pinned.ipfs_hash)
    }

    async fn fetch_once(&self, cid: &ContentId) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(self.config.gateway_object_url(cid))
            .send()
            .await
            .map_err(|e| Error::Unavailable(format!("Failed to fetch {}: {}", cid, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, &body, cid.as_str()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Unavailable(format!("Failed to read {}: {}", cid, e)))?;
        Ok(bytes.to_vec())
    }

    async fn unpin_once(&self, cid: &ContentId) -> Result<()> {
        let response = self
            .http
            .delete(self.config.unpin_url(cid))
            .header(header::AUTHORIZATION, self.auth_header())
            .send()
            .await
            .map_err(|e| Error::Unavailable(format!("Failed to unpin {}: {}", cid, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, &body, cid.as_str()));
        }
        Ok(())
    }
}

/// Map a non-success HTTP status onto the error taxonomy.
fn map_status(status: StatusCode, body: &str, what: &str) -> Error {
    match status {
        StatusCode::NOT_FOUND => Error::NotFound(format!("Blob not found: {}", what)),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::InvalidInput(format!(
            "Pinning service rejected the bearer token ({})",
            status
        )),
        StatusCode::BAD_REQUEST | StatusCode::PAYLOAD_TOO_LARGE => {
            Error::InvalidInput(format!("Pinning service rejected {}: {} - {}", what, status, body))
        }
        _ => Error::Unavailable(format!("Pinning service error for {}: {} - {}", what, status, body)),
    }
}

#[async_trait]
impl ContentStore for PinataContentStore {
    fn name(&self) -> &str {
        "pinata"
    }

    async fn put(&self, data: Vec<u8>, name_hint: Option<&str>) -> Result<ContentId> {
        let file_name = name_hint.unwrap_or("blob");
        let body = data.as_slice();
        let cid = self
            .backoff
            .run("pin", move || self.pin_once(body, file_name))
            .await?;

        info!(cid = %cid, size = data.len(), "Pinned blob");
        Ok(cid)
    }

    async fn get(&self, cid: &ContentId) -> Result<Vec<u8>> {
        self.backoff.run("fetch", move || self.fetch_once(cid)).await
    }

    async fn remove(&self, cid: &ContentId) -> Result<()> {
        self.backoff.run("unpin", move || self.unpin_once(cid)).await?;
        info!(cid = %cid, "Unpinned blob");
        Ok(())
    }
}

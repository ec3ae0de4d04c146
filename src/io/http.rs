use async_trait::async_trait;
use reqwest::{Client, Url};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::{BlockSource, block_path};
use crate::digest::BlockDigest;
use crate::error::{Result, ShrinkError};

/// Timeout applied to every request, stubs and blocks alike.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP block source
pub struct HttpBlockSource {
    client: Client,
    base: String,
    transferred_bytes: AtomicU64,
}

impl HttpBlockSource {
    /// Create a source serving blocks under `base` (e.g. `https://host`).
    pub fn new(base: impl Into<String>) -> Result<Self> {
        let client = client(REQUEST_TIMEOUT)?;
        let base = base.into().trim_end_matches('/').to_string();

        Ok(Self {
            client,
            base,
            transferred_bytes: AtomicU64::new(0),
        })
    }

    pub fn block_url(&self, hash: &BlockDigest) -> String {
        format!("{}/{}", self.base, block_path(hash))
    }

    /// Get total bytes received from the network
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BlockSource for HttpBlockSource {
    async fn fetch_block(&self, hash: &BlockDigest) -> Result<Vec<u8>> {
        let bytes = get_bytes(&self.client, &self.block_url(hash)).await?;
        self.transferred_bytes
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        Ok(bytes)
    }
}

pub(super) fn client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder().timeout(timeout).build()?)
}

/// GET `url`, failing on any non-success status.
pub(super) async fn get_bytes(client: &Client, url: &str) -> Result<Vec<u8>> {
    let resp = client.get(url).send().await?;

    if !resp.status().is_success() {
        return Err(ShrinkError::Transport(format!(
            "GET {url} failed with status: {}",
            resp.status()
        )));
    }

    Ok(resp.bytes().await?.to_vec())
}

/// The `scheme://host[:port]` part of `url`, where published blocks live by
/// default.
pub fn origin_of(url: &str) -> Result<String> {
    let parsed =
        Url::parse(url).map_err(|e| ShrinkError::Transport(format!("invalid URL {url}: {e}")))?;
    if parsed.host_str().is_none() {
        return Err(ShrinkError::Transport(format!("URL {url} has no host")));
    }
    Ok(parsed.origin().ascii_serialization())
}

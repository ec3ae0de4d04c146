mod http;
mod local;

pub use http::{HttpBlockSource, REQUEST_TIMEOUT, origin_of};
pub use local::LocalBlockSource;

use async_trait::async_trait;
use std::path::Path;

use crate::digest::BlockDigest;
use crate::error::Result;

/// Remote location serving blocks at `<base>/blocks/<hex digest>`.
///
/// Implementations return the bytes as served; callers verify them.
#[async_trait]
pub trait BlockSource: Send + Sync {
    async fn fetch_block(&self, hash: &BlockDigest) -> Result<Vec<u8>>;
}

/// Relative path of a block under a source's base.
pub fn block_path(hash: &BlockDigest) -> String {
    format!("blocks/{}", hash.to_hex())
}

pub fn is_http_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Read a whole archive from an HTTP(S) URL or a local path.
///
/// HTTP reads give up after [`REQUEST_TIMEOUT`].
pub async fn read_archive_source(source: &str) -> Result<Vec<u8>> {
    if is_http_url(source) {
        http::get_bytes(&http::client(REQUEST_TIMEOUT)?, source).await
    } else {
        Ok(tokio::fs::read(Path::new(source)).await?)
    }
}

use super::{BlockSource, block_path};
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};

use crate::digest::BlockDigest;
use crate::error::{Result, ShrinkError};

/// Block source backed by a local mirror of the publish directory, i.e. a
/// directory containing `blocks/<hex digest>` files.
pub struct LocalBlockSource {
    base: PathBuf,
}

impl LocalBlockSource {
    pub fn new(base: &Path) -> Self {
        Self {
            base: base.to_path_buf(),
        }
    }
}

#[async_trait]
impl BlockSource for LocalBlockSource {
    async fn fetch_block(&self, hash: &BlockDigest) -> Result<Vec<u8>> {
        let path = self.base.join(block_path(hash));
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            // A missing block is the local analogue of a 404.
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ShrinkError::Transport(
                format!("block not found at {}", path.display()),
            )),
            Err(e) => Err(e.into()),
        }
    }
}

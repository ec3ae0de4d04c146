//! Directory-backed content-addressed block store.
//!
//! Each block lives in a file named by the lowercase hex digest of its
//! contents directly under the store root. Blocks are immutable: `put` only
//! ever creates a missing file, and never replaces an existing one.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::digest::BlockDigest;
use crate::error::{Result, ShrinkError};

/// Prefix of in-flight temporary files inside the store directory.
const PARTIAL_PREFIX: &str = ".partial-";

#[derive(Debug, Clone)]
pub struct BlockStore {
    root: PathBuf,
}

impl BlockStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file holding `hash`, whether or not it exists.
    pub fn path_of(&self, hash: &BlockDigest) -> PathBuf {
        self.root.join(hash.to_hex())
    }

    pub fn has(&self, hash: &BlockDigest) -> bool {
        self.path_of(hash).is_file()
    }

    pub fn get(&self, hash: &BlockDigest) -> Result<Vec<u8>> {
        match fs::read(self.path_of(hash)) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ShrinkError::NotFound(*hash)),
            Err(e) => Err(e.into()),
        }
    }

    /// Store `data` under `hash` unless a block with that key already exists.
    ///
    /// The block is written to a temporary file and linked into place only
    /// if the key is still absent, so concurrent writers of the same key
    /// never expose a partial file or overwrite each other. The key is not
    /// checked against `data`.
    ///
    /// # Arguments
    ///
    /// * `hash` - Digest of `data`, used as the file name
    /// * `data` - The block contents
    ///
    /// # Returns
    ///
    /// `true` if this call created the block, `false` if it already existed.
    ///
    /// # Errors
    ///
    /// Returns [`ShrinkError::Io`] if the temporary file cannot be written
    /// or linked into place.
    pub fn put(&self, hash: &BlockDigest, data: &[u8]) -> Result<bool> {
        let dest = self.path_of(hash);
        if dest.is_file() {
            return Ok(false);
        }

        let mut tmp = tempfile::Builder::new()
            .prefix(PARTIAL_PREFIX)
            .tempfile_in(&self.root)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;

        persist_new(tmp, &dest).map(|created| {
            if created {
                debug!(hash = %hash, len = data.len(), "stored block");
            }
            created
        })
    }
}

fn persist_new(tmp: NamedTempFile, dest: &Path) -> Result<bool> {
    match tmp.persist_noclobber(dest) {
        Ok(_) => Ok(true),
        // Another writer won the race; its content stands. The temp file is
        // removed when the error drops it.
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.error.into()),
    }
}

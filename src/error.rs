use thiserror::Error;

use crate::digest::BlockDigest;

/// A block whose download never succeeded within the attempt bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedBlock {
    pub hash: BlockDigest,
    pub name: String,
}

#[derive(Debug, Error)]
pub enum ShrinkError {
    #[error("format error at offset {offset}: {reason}")]
    Format { offset: u64, reason: String },

    #[error("block {0} not found in store")]
    NotFound(BlockDigest),

    #[error("block {hash} for entry {name} is missing from the store")]
    MissingBlock { hash: BlockDigest, name: String },

    #[error("integrity mismatch: expected {expected}, got {actual}")]
    IntegrityMismatch {
        expected: BlockDigest,
        actual: BlockDigest,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("{} block(s) failed to download", failed.len())]
    DownloadFailed { failed: Vec<FailedBlock> },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShrinkError {
    pub(crate) fn format(offset: u64, reason: impl Into<String>) -> Self {
        Self::Format {
            offset,
            reason: reason.into(),
        }
    }
}

impl From<reqwest::Error> for ShrinkError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ShrinkError>;

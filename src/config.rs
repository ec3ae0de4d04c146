//! Tunables for the codec and the downloader.
//!
//! - [`ShrinkConfig`] - extraction threshold shared by shrink and repack
//! - [`DownloadConfig`] - worker pool width and retry policy

use std::time::Duration;

/// Default extraction threshold (4 KiB). Payloads strictly larger are extracted.
pub const DEFAULT_THRESHOLD: u64 = 4096;

/// Default number of concurrent download workers.
pub const DEFAULT_WORKERS: usize = 5;

/// Default number of fetch attempts per block before it is marked failed.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Codec configuration.
///
/// A stub does not record the threshold it was produced with, so the same
/// value must be used to repack it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShrinkConfig {
    threshold: u64,
}

impl ShrinkConfig {
    pub fn new(threshold: u64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Whether a payload of `size` bytes is moved into the block store.
    pub fn is_eligible(&self, size: u64) -> bool {
        size > self.threshold
    }
}

impl Default for ShrinkConfig {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

/// Downloader configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadConfig {
    workers: usize,
    max_attempts: u32,
    retry_delay: Duration,
}

impl DownloadConfig {
    /// Sets the worker pool width. Zero is treated as one.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Sets the total number of attempts per block. Zero is treated as one.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the base delay before a retry; the n-th retry waits `n * delay`.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_strict() {
        let cfg = ShrinkConfig::default();
        assert!(!cfg.is_eligible(DEFAULT_THRESHOLD));
        assert!(cfg.is_eligible(DEFAULT_THRESHOLD + 1));
        assert!(ShrinkConfig::new(0).is_eligible(1));
        assert!(!ShrinkConfig::new(0).is_eligible(0));
    }

    #[test]
    fn download_config_clamps_to_one() {
        let cfg = DownloadConfig::default()
            .with_workers(0)
            .with_max_attempts(0);
        assert_eq!(cfg.workers(), 1);
        assert_eq!(cfg.max_attempts(), 1);
    }

    #[test]
    fn download_defaults() {
        let cfg = DownloadConfig::default();
        assert_eq!(cfg.workers(), 5);
        assert_eq!(cfg.max_attempts(), 3);
        assert_eq!(cfg.retry_delay(), Duration::ZERO);
    }
}

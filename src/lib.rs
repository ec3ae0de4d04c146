//! # zipshrink
//!
//! Deduplicating distribution of large ZIP packages (APK/IPA and similar).
//!
//! Shrinking an archive moves every large entry payload into a shared,
//! content-addressed block directory and leaves a small "stub" archive in
//! which each payload is replaced by its 16-byte digest. Repacking restores
//! the original archive byte-for-byte from the stub and the blocks.
//! Successive builds of an application share unchanged blocks, and a client
//! only downloads the blocks it does not already hold.
//!
//! ## Features
//!
//! - Byte-exact shrink/repack with a whole-stream digest check
//! - Content-addressed block store with atomic, idempotent writes
//! - Concurrent block download with per-block verification and retry
//! - Entry-level diff between two builds
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use zipshrink::{BlockStore, DownloadConfig, Downloader, HttpBlockSource, ShrinkConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let stub = zipshrink::read_archive_source("https://example.com/app/build.apk").await?;
//!     let store = BlockStore::open("cache")?;
//!     let source = Arc::new(HttpBlockSource::new("https://example.com")?);
//!
//!     let downloader = Downloader::new(source, store, ShrinkConfig::default(), DownloadConfig::default());
//!     let mut out = std::fs::File::create("build.apk")?;
//!     let summary = downloader.download_and_repack(&stub, &mut out).await?;
//!     println!("restored {} blocks, digest {}", summary.restored, summary.computed);
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod codec;
pub mod config;
pub mod diff;
pub mod digest;
pub mod download;
pub mod error;
pub mod io;
pub mod store;
pub mod zip;

pub use cli::Cli;
pub use codec::{EntryObserver, RepackSummary, Repacker, ResourceLocator, ShrinkSummary, Shrinker};
pub use config::{DownloadConfig, ShrinkConfig};
pub use diff::{DiffReport, diff_archives};
pub use digest::{BlockDigest, DIGEST_LEN};
pub use download::{DownloadReport, Downloader};
pub use error::{Result, ShrinkError};
pub use io::{BlockSource, HttpBlockSource, LocalBlockSource, read_archive_source};
pub use store::BlockStore;
pub use zip::{ZipFileEntry, ZipParser};

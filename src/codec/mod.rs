//! The shrink/repack codec.
//!
//! [`Shrinker`] turns an archive into a stub by replacing each eligible
//! payload with its 16-byte digest and appending a digest of the whole
//! original stream. [`Repacker`] reverses the transform from a stub and a
//! populated [`BlockStore`](crate::store::BlockStore).
//!
//! Both directions walk entries in physical order with a single cursor and
//! copy everything between payloads verbatim, so local headers, the central
//! directory and any bytes the parser does not understand survive unchanged.

mod repack;
mod shrink;

pub use repack::{RepackSummary, Repacker, StubBlock, split_trailer, stub_blocks};
pub use shrink::{ShrinkSummary, Shrinker};

use std::path::PathBuf;

use crate::digest::BlockDigest;
use crate::store::BlockStore;
use crate::zip::ZipFileEntry;

/// Receives each extracted entry while an archive is being shrunk.
pub trait EntryObserver {
    fn on_entry(&mut self, entry: &ZipFileEntry, digest: &BlockDigest);
}

/// Observer that ignores every entry.
impl EntryObserver for () {
    fn on_entry(&mut self, _entry: &ZipFileEntry, _digest: &BlockDigest) {}
}

/// Records the digest of one named entry, e.g. a package icon that is
/// published alongside the stub.
#[derive(Debug, Clone)]
pub struct ResourceLocator {
    name: String,
    found: Option<BlockDigest>,
}

impl ResourceLocator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            found: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn digest(&self) -> Option<BlockDigest> {
        self.found
    }

    /// Location of the resource's block in `store`, if it was extracted.
    pub fn block_path(&self, store: &BlockStore) -> Option<PathBuf> {
        self.found.map(|d| store.path_of(&d))
    }
}

impl EntryObserver for ResourceLocator {
    fn on_entry(&mut self, entry: &ZipFileEntry, digest: &BlockDigest) {
        if entry.file_name == self.name {
            self.found = Some(*digest);
        }
    }
}

/// Fans one entry out to several observers.
impl EntryObserver for [ResourceLocator] {
    fn on_entry(&mut self, entry: &ZipFileEntry, digest: &BlockDigest) {
        for locator in self.iter_mut() {
            locator.on_entry(entry, digest);
        }
    }
}

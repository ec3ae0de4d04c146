//! Entry-level comparison of two archives.
//!
//! Both archives are run through the encoder without a store; the base's
//! `name -> digest` map is then checked against each extracted entry of the
//! target.

use std::collections::HashMap;
use std::io;

use crate::codec::{EntryObserver, Shrinker};
use crate::config::ShrinkConfig;
use crate::digest::BlockDigest;
use crate::error::Result;
use crate::zip::ZipFileEntry;

/// Collects `name -> digest` for every extracted entry.
#[derive(Debug, Default, Clone)]
pub struct DigestRecorder {
    digests: HashMap<String, BlockDigest>,
}

impl DigestRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&BlockDigest> {
        self.digests.get(name)
    }
}

impl EntryObserver for DigestRecorder {
    fn on_entry(&mut self, entry: &ZipFileEntry, digest: &BlockDigest) {
        self.digests.insert(entry.file_name.clone(), *digest);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Not present among the base's extracted entries.
    Added,
    /// Present in the base with a different digest.
    Modified,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryChange {
    pub kind: ChangeKind,
    pub name: String,
    pub size: u64,
}

/// Observer that compares the target's entries to a recorded base.
struct ChangeCollector<'a> {
    base: &'a DigestRecorder,
    changes: Vec<EntryChange>,
}

impl EntryObserver for ChangeCollector<'_> {
    fn on_entry(&mut self, entry: &ZipFileEntry, digest: &BlockDigest) {
        let kind = match self.base.get(&entry.file_name) {
            None => ChangeKind::Added,
            Some(prev) if prev != digest => ChangeKind::Modified,
            Some(_) => return,
        };
        self.changes.push(EntryChange {
            kind,
            name: entry.file_name.clone(),
            size: entry.compressed_size,
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffReport {
    pub base_digest: BlockDigest,
    pub target_digest: BlockDigest,
    /// Changed entries in the target's physical order.
    pub changes: Vec<EntryChange>,
}

impl DiffReport {
    /// Bytes a client holding the base would need to fetch.
    pub fn changed_bytes(&self) -> u64 {
        self.changes.iter().map(|c| c.size).sum()
    }
}

/// Report every extracted entry of `target` that is new or differs from `base`.
pub fn diff_archives(base: &[u8], target: &[u8], config: ShrinkConfig) -> Result<DiffReport> {
    let shrinker = Shrinker::new(config);

    let mut recorder = DigestRecorder::new();
    let base_summary = shrinker.shrink(base, &mut io::sink(), &mut recorder)?;

    let mut collector = ChangeCollector {
        base: &recorder,
        changes: Vec::new(),
    };
    let target_summary = shrinker.shrink(target, &mut io::sink(), &mut collector)?;

    Ok(DiffReport {
        base_digest: base_summary.trailer,
        target_digest: target_summary.trailer,
        changes: collector.changes,
    })
}

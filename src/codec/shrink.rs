use std::io::Write;

use tracing::{debug, info};

use crate::config::ShrinkConfig;
use crate::digest::{BlockDigest, DIGEST_LEN, StreamHasher};
use crate::error::{Result, ShrinkError};
use crate::store::BlockStore;
use crate::zip::ZipParser;

use super::EntryObserver;

/// Outcome of shrinking one archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShrinkSummary {
    /// Digest of the entire original stream, appended to the stub.
    pub trailer: BlockDigest,
    /// Entries whose payload was replaced by a digest.
    pub extracted: usize,
    /// Blocks newly added to the store by this run.
    pub new_blocks: usize,
    pub original_size: u64,
    pub stub_size: u64,
}

/// Encoder from an original archive to its stub form.
///
/// Without a store the encoder still computes every digest and notifies the
/// observer, which is all a comparison between two archives needs.
pub struct Shrinker<'s> {
    config: ShrinkConfig,
    store: Option<&'s BlockStore>,
}

impl<'s> Shrinker<'s> {
    pub fn new(config: ShrinkConfig) -> Self {
        Self {
            config,
            store: None,
        }
    }

    /// Populate `store` with every extracted payload.
    pub fn with_store(mut self, store: &'s BlockStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Write the stub of `archive` to `out`.
    ///
    /// # Arguments
    ///
    /// * `archive` - The complete original archive
    /// * `out` - Destination of the stub, trailer included
    /// * `observer` - Notified once per extracted entry, in stream order
    ///
    /// # Returns
    ///
    /// A [`ShrinkSummary`] whose `trailer` is the digest of `archive`.
    ///
    /// # Errors
    ///
    /// Returns [`ShrinkError::Format`] if the archive's structure cannot be
    /// parsed or an entry's payload falls outside the stream, and
    /// [`ShrinkError::Io`] if writing to `out` or the store fails.
    pub fn shrink<W, O>(&self, archive: &[u8], out: &mut W, observer: &mut O) -> Result<ShrinkSummary>
    where
        W: Write + ?Sized,
        O: EntryObserver + ?Sized,
    {
        let parser = ZipParser::new(archive);
        let entries = parser.eligible_entries(&self.config)?;

        let mut hasher = StreamHasher::new();
        let mut cursor = 0u64;
        let mut stub_size = 0u64;
        let mut new_blocks = 0usize;

        for entry in &entries {
            if entry.lfh_offset < cursor {
                return Err(ShrinkError::format(
                    entry.lfh_offset,
                    format!("entry {} overlaps the previous payload", entry.file_name),
                ));
            }

            let lfh = parser.checked_local_header(entry, entry.lfh_offset)?;
            let data_start = entry.lfh_offset + lfh.len();
            let data_end = data_start
                .checked_add(entry.compressed_size)
                .filter(|end| *end <= archive.len() as u64)
                .ok_or_else(|| {
                    ShrinkError::format(
                        data_start,
                        format!("payload of {} runs past end of stream", entry.file_name),
                    )
                })?;

            // Everything up to and including the local header is kept.
            let kept = &archive[cursor as usize..data_start as usize];
            hasher.update(kept);
            out.write_all(kept)?;

            let payload = &archive[data_start as usize..data_end as usize];
            hasher.update(payload);
            let digest = BlockDigest::of(payload);

            if let Some(store) = self.store {
                if store.put(&digest, payload)? {
                    new_blocks += 1;
                }
            }
            out.write_all(digest.as_bytes())?;
            observer.on_entry(entry, &digest);

            debug!(
                name = %entry.file_name,
                size = entry.compressed_size,
                hash = %digest,
                "extracted entry"
            );

            stub_size += kept.len() as u64 + DIGEST_LEN as u64;
            cursor = data_end;
        }

        let tail = &archive[cursor as usize..];
        hasher.update(tail);
        out.write_all(tail)?;

        let trailer = hasher.finalize();
        out.write_all(trailer.as_bytes())?;
        stub_size += tail.len() as u64 + DIGEST_LEN as u64;

        info!(
            extracted = entries.len(),
            new_blocks,
            original = archive.len(),
            stub = stub_size,
            "shrink complete"
        );

        Ok(ShrinkSummary {
            trailer,
            extracted: entries.len(),
            new_blocks,
            original_size: archive.len() as u64,
            stub_size,
        })
    }
}

use std::io::Write;

use tracing::{debug, error, info};

use crate::config::ShrinkConfig;
use crate::digest::{BlockDigest, DIGEST_LEN, StreamHasher};
use crate::error::{Result, ShrinkError};
use crate::store::BlockStore;
use crate::zip::ZipParser;

/// One block reference inside a stub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubBlock {
    pub name: String,
    /// Physical offset of the digest in the stub body.
    pub digest_offset: u64,
    /// Size of the payload the digest stands for.
    pub original_size: u64,
    pub digest: BlockDigest,
}

/// Split a stub into its body and the trailing whole-stream digest.
pub fn split_trailer(stub: &[u8]) -> Result<(&[u8], BlockDigest)> {
    let body_len = stub.len().checked_sub(DIGEST_LEN).ok_or_else(|| {
        ShrinkError::format(0, "stream is too short to carry a trailer digest")
    })?;
    let (body, trailer) = stub.split_at(body_len);
    let trailer = BlockDigest::from_slice(trailer)
        .ok_or_else(|| ShrinkError::format(body_len as u64, "truncated trailer digest"))?;
    Ok((body, trailer))
}

/// Locate every block reference in a stub body (trailer already removed).
///
/// The central directory still records local header offsets of the original
/// stream. Each preceding extraction shifted later headers by
/// `original_size - DIGEST_LEN`, so the physical position is recovered by
/// subtracting the running correction.
pub fn stub_blocks(body: &[u8], config: &ShrinkConfig) -> Result<Vec<StubBlock>> {
    let parser = ZipParser::new(body);
    let entries = parser.eligible_entries(config)?;

    let mut blocks = Vec::with_capacity(entries.len());
    // Signed: with a threshold below DIGEST_LEN a stub can grow.
    let mut correction = 0i64;
    let mut cursor = 0u64;

    for entry in entries {
        let physical = u64::try_from(entry.lfh_offset as i64 - correction)
            .ok()
            .filter(|p| *p >= cursor)
            .ok_or_else(|| {
                ShrinkError::format(
                    entry.lfh_offset,
                    format!("header of {} does not map into the stub", entry.file_name),
                )
            })?;

        let lfh = parser.checked_local_header(&entry, physical)?;
        let digest_offset = physical + lfh.len();
        let digest = body
            .get(digest_offset as usize..)
            .and_then(BlockDigest::from_slice)
            .ok_or_else(|| {
                ShrinkError::format(
                    digest_offset,
                    format!("block digest of {} runs past end of stream", entry.file_name),
                )
            })?;

        cursor = digest_offset + DIGEST_LEN as u64;
        correction += entry.compressed_size as i64 - DIGEST_LEN as i64;

        blocks.push(StubBlock {
            name: entry.file_name,
            digest_offset,
            original_size: entry.compressed_size,
            digest,
        });
    }

    Ok(blocks)
}

/// Outcome of a verified repack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepackSummary {
    /// Whole-stream digest recorded in the stub trailer.
    pub recorded: BlockDigest,
    /// Digest of the reconstructed stream; equal to `recorded`.
    pub computed: BlockDigest,
    pub restored: usize,
    pub output_size: u64,
}

/// Decoder from a stub back to the original archive.
pub struct Repacker<'s> {
    config: ShrinkConfig,
    store: &'s BlockStore,
}

impl<'s> Repacker<'s> {
    pub fn new(config: ShrinkConfig, store: &'s BlockStore) -> Self {
        Self { config, store }
    }

    /// Reconstruct the original stream of `stub` into `out`.
    ///
    /// # Arguments
    ///
    /// * `stub` - A complete stub, trailer included
    /// * `out` - Destination of the reconstructed archive
    ///
    /// # Returns
    ///
    /// A [`RepackSummary`] with the recorded and computed digests, which
    /// are equal on success.
    ///
    /// # Errors
    ///
    /// - [`ShrinkError::Format`] if the stub cannot be parsed
    /// - [`ShrinkError::MissingBlock`] if the store lacks a referenced block
    /// - [`ShrinkError::IntegrityMismatch`] if the reconstructed stream does
    ///   not hash to the stub's trailer
    ///
    /// On error `out` may already hold partial output.
    pub fn repack<W>(&self, stub: &[u8], out: &mut W) -> Result<RepackSummary>
    where
        W: Write + ?Sized,
    {
        let (body, recorded) = split_trailer(stub)?;
        let blocks = stub_blocks(body, &self.config)?;

        let mut hasher = StreamHasher::new();
        let mut cursor = 0u64;
        let mut output_size = 0u64;

        for block in &blocks {
            let kept = &body[cursor as usize..block.digest_offset as usize];
            hasher.update(kept);
            out.write_all(kept)?;

            let payload = self.store.get(&block.digest).map_err(|e| match e {
                ShrinkError::NotFound(hash) => ShrinkError::MissingBlock {
                    hash,
                    name: block.name.clone(),
                },
                other => other,
            })?;
            hasher.update(&payload);
            out.write_all(&payload)?;

            debug!(name = %block.name, hash = %block.digest, "restored entry");

            output_size += kept.len() as u64 + payload.len() as u64;
            cursor = block.digest_offset + DIGEST_LEN as u64;
        }

        let tail = &body[cursor as usize..];
        hasher.update(tail);
        out.write_all(tail)?;
        output_size += tail.len() as u64;

        let computed = hasher.finalize();
        if computed != recorded {
            error!(recorded = %recorded, computed = %computed, "repacked stream digest mismatch");
            return Err(ShrinkError::IntegrityMismatch {
                expected: recorded,
                actual: computed,
            });
        }

        info!(restored = blocks.len(), size = output_size, hash = %computed, "repack complete");

        Ok(RepackSummary {
            recorded,
            computed,
            restored: blocks.len(),
            output_size,
        })
    }
}

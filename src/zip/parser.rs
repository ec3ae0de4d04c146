//! Low-level ZIP archive parser.
//!
//! This module handles the binary parsing of ZIP file structures from an
//! in-memory byte stream, which may be either an original archive or the
//! stub produced by [`Shrinker`](crate::codec::Shrinker).
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. Locate the Central Directory immediately before the EOCD
//! 3. Walk the Central Directory to collect entry metadata
//! 4. Read each entry's Local File Header to find where its payload begins
//!
//! The CD offset recorded in the EOCD refers to the original stream, so in a
//! stub it is stale. The CD is instead located as `eocd_offset - cd_size`,
//! which holds for both forms because the EOCD directly follows the CD.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use crate::config::ShrinkConfig;
use crate::error::{Result, ShrinkError};

use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Sentinel used by ZIP64 in 32-bit size and offset fields.
const ZIP64_MARKER: u32 = 0xFFFFFFFF;

/// ZIP structure parser over a byte stream.
pub struct ZipParser<'a> {
    data: &'a [u8],
}

impl<'a> ZipParser<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Slice `len` bytes at `offset`, or fail with a format error at `offset`.
    fn slice(&self, offset: u64, len: u64, what: &str) -> Result<&'a [u8]> {
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= self.size())
            .ok_or_else(|| {
                ShrinkError::format(offset, format!("{what} runs past end of stream"))
            })?;
        Ok(&self.data[offset as usize..end as usize])
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// Handles both the simple case (no comment) and archives with comments
    /// by searching backwards for the signature.
    ///
    /// # Returns
    ///
    /// A tuple of (EOCD record, offset of EOCD in the stream).
    pub fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64)> {
        let eocd_size = EndOfCentralDirectory::SIZE as u64;

        // Common case: no archive comment.
        if self.size() >= eocd_size {
            let offset = self.size() - eocd_size;
            let buf = self.slice(offset, eocd_size, "end of central directory")?;
            if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && &buf[20..22] == b"\x00\x00" {
                let eocd = EndOfCentralDirectory::from_bytes(buf, offset)?;
                return Ok((eocd, offset));
            }
        }

        // Otherwise the EOCD is followed by a comment of unknown length.
        let search_size = (MAX_COMMENT_SIZE + eocd_size).min(self.size());
        let search_start = self.size() - search_size;
        let buf = &self.data[search_start as usize..];

        for i in (0..buf.len().saturating_sub(EndOfCentralDirectory::SIZE)).rev() {
            if &buf[i..i + 4] == EndOfCentralDirectory::SIGNATURE {
                // The comment length must account for exactly the remaining bytes.
                let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;

                if comment_len == buf.len() - i - EndOfCentralDirectory::SIZE {
                    let offset = search_start + i as u64;
                    let eocd = EndOfCentralDirectory::from_bytes(
                        &buf[i..i + EndOfCentralDirectory::SIZE],
                        offset,
                    )?;
                    return Ok((eocd, offset));
                }
            }
        }

        Err(ShrinkError::format(
            self.size(),
            "end of central directory signature not found",
        ))
    }

    /// Walk the Central Directory and return every record in directory order.
    pub fn list_files(&self) -> Result<Vec<ZipFileEntry>> {
        let (eocd, eocd_offset) = self.find_eocd()?;

        if eocd.is_zip64() {
            return Err(ShrinkError::format(eocd_offset, "ZIP64 archives are not supported"));
        }
        if eocd.is_multi_disk() {
            return Err(ShrinkError::format(
                eocd_offset,
                "multi-disk archives are not supported",
            ));
        }

        let cd_size = eocd.cd_size as u64;
        let cd_start = eocd_offset.checked_sub(cd_size).ok_or_else(|| {
            ShrinkError::format(eocd_offset, "central directory size exceeds its position")
        })?;
        let cd_data = self.slice(cd_start, cd_size, "central directory")?;

        let mut entries = Vec::with_capacity(eocd.total_entries as usize);
        let mut cursor = Cursor::new(cd_data);

        while cursor.position() < cd_size {
            let entry = self.parse_cdfh(&mut cursor, cd_start)?;
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Parse a Central Directory File Header at the cursor position.
    ///
    /// `cd_start` is the absolute offset of the cursor's buffer, used for
    /// diagnostics.
    fn parse_cdfh(&self, cursor: &mut Cursor<&[u8]>, cd_start: u64) -> Result<ZipFileEntry> {
        let record_offset = cd_start + cursor.position();
        let cd_len = cursor.get_ref().len() as u64;

        if cursor.position() + CDFH_MIN_SIZE as u64 > cd_len {
            return Err(ShrinkError::format(
                record_offset,
                "central directory record runs past directory end",
            ));
        }

        let start = cursor.position() as usize;
        if &cursor.get_ref()[start..start + 4] != CDFH_SIGNATURE {
            return Err(ShrinkError::format(
                record_offset,
                "invalid central directory file header",
            ));
        }
        cursor.set_position(cursor.position() + 4);

        let _version_made_by = cursor.read_u16::<LittleEndian>()?;
        let _version_needed = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        let _compression_method = cursor.read_u16::<LittleEndian>()?;
        let _last_mod_time = cursor.read_u16::<LittleEndian>()?;
        let _last_mod_date = cursor.read_u16::<LittleEndian>()?;
        let _crc32 = cursor.read_u32::<LittleEndian>()?;
        let compressed_size = cursor.read_u32::<LittleEndian>()?;
        let uncompressed_size = cursor.read_u32::<LittleEndian>()?;
        let file_name_length = cursor.read_u16::<LittleEndian>()? as u64;
        let extra_field_length = cursor.read_u16::<LittleEndian>()? as u64;
        let file_comment_length = cursor.read_u16::<LittleEndian>()? as u64;
        let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
        let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
        let _external_attrs = cursor.read_u32::<LittleEndian>()?;
        let lfh_offset = cursor.read_u32::<LittleEndian>()?;

        if compressed_size == ZIP64_MARKER
            || uncompressed_size == ZIP64_MARKER
            || lfh_offset == ZIP64_MARKER
        {
            return Err(ShrinkError::format(
                record_offset,
                "ZIP64 entries are not supported",
            ));
        }

        let variable_len = file_name_length + extra_field_length + file_comment_length;
        if cursor.position() + variable_len > cd_len {
            return Err(ShrinkError::format(
                record_offset,
                "central directory record runs past directory end",
            ));
        }

        let name_start = cursor.position() as usize;
        let name_bytes = &cursor.get_ref()[name_start..name_start + file_name_length as usize];
        // Lossy conversion keeps non-UTF-8 names usable for diagnostics.
        let file_name = String::from_utf8_lossy(name_bytes).to_string();

        cursor.set_position(cursor.position() + variable_len);

        Ok(ZipFileEntry {
            file_name,
            flags,
            compressed_size: compressed_size as u64,
            uncompressed_size: uncompressed_size as u64,
            lfh_offset: lfh_offset as u64,
        })
    }

    /// Entries whose payload is moved into the block store under `config`,
    /// sorted by local header offset.
    ///
    /// The central directory order need not match the physical order of
    /// entries in the stream, so callers walking the stream rely on this sort.
    pub fn eligible_entries(&self, config: &ShrinkConfig) -> Result<Vec<ZipFileEntry>> {
        let mut entries: Vec<_> = self
            .list_files()?
            .into_iter()
            .filter(|e| config.is_eligible(e.compressed_size))
            .collect();
        entries.sort_by_key(|e| e.lfh_offset);
        Ok(entries)
    }

    /// Read the Local File Header at a physical offset in this stream.
    pub fn local_header(&self, offset: u64) -> Result<LocalFileHeader> {
        let fixed = self.slice(offset, LFH_SIZE as u64, "local file header")?;
        let lfh = LocalFileHeader::from_bytes(fixed, offset)?;
        self.slice(offset, lfh.len(), "local file header")?;
        Ok(lfh)
    }

    /// Read and cross-check the local header of `entry` at `offset`.
    ///
    /// Unless the entry defers its sizes to a data descriptor, the local
    /// header must agree with the central directory on the payload size.
    pub fn checked_local_header(&self, entry: &ZipFileEntry, offset: u64) -> Result<LocalFileHeader> {
        let lfh = self.local_header(offset)?;
        if !lfh.has_data_descriptor() && lfh.compressed_size as u64 != entry.compressed_size {
            return Err(ShrinkError::format(
                offset,
                format!(
                    "local header size {} disagrees with central directory size {} for {}",
                    lfh.compressed_size, entry.compressed_size, entry.file_name
                ),
            ));
        }
        Ok(lfh)
    }
}

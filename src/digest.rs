//! Block and stream digests.
//!
//! Every block is keyed by the 16-byte MD5 digest of its bytes. The same
//! digest is written in binary form into stubs and in lowercase hex form as
//! the block store file name and the remote block path.

use std::fmt;

use md5::{Digest, Md5};

/// Length in bytes of a binary digest as written into a stub.
pub const DIGEST_LEN: usize = 16;

/// A 16-byte content digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockDigest([u8; DIGEST_LEN]);

impl BlockDigest {
    /// Digest of a complete byte slice.
    pub fn of(data: &[u8]) -> Self {
        Self(Md5::digest(data).into())
    }

    /// Read a digest from the first [`DIGEST_LEN`] bytes of `data`.
    ///
    /// Returns `None` if `data` is too short.
    pub fn from_slice(data: &[u8]) -> Option<Self> {
        let bytes: [u8; DIGEST_LEN] = data.get(..DIGEST_LEN)?.try_into().ok()?;
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Lowercase hex form, used as the store key.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for BlockDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for BlockDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockDigest({})", self.to_hex())
    }
}

/// Incremental digest over a byte stream fed in segments.
#[derive(Default, Clone)]
pub struct StreamHasher {
    inner: Md5,
}

impl StreamHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finalize(self) -> BlockDigest {
        BlockDigest(self.inner.finalize().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_md5_vector() {
        let d = BlockDigest::of(b"abc");
        assert_eq!(d.to_hex(), "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(d.to_string(), d.to_hex());
    }

    #[test]
    fn from_slice_needs_full_digest() {
        let d = BlockDigest::of(b"x");
        let mut buf = d.as_bytes().to_vec();
        buf.extend_from_slice(b"tail");
        assert_eq!(BlockDigest::from_slice(&buf), Some(d));
        assert_eq!(BlockDigest::from_slice(&buf[..15]), None);
    }

    #[test]
    fn stream_hasher_matches_one_shot() {
        let mut h = StreamHasher::new();
        h.update(b"hello ");
        h.update(b"");
        h.update(b"world");
        assert_eq!(h.finalize(), BlockDigest::of(b"hello world"));
    }
}

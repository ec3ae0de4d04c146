//! Deterministic ZIP builder for codec tests.
//!
//! Output is Zip32-only with fixed timestamps and explicit sizes in both the
//! local and central headers.

#![allow(dead_code)]

use byteorder::{LittleEndian, WriteBytesExt};
use flate2::Compression;
use flate2::write::DeflateEncoder;
use std::io::Write;

struct Member {
    name: String,
    method: u16,
    flags: u16,
    crc: u32,
    data: Vec<u8>,
    uncompressed_len: u32,
    extra: Vec<u8>,
}

#[derive(Default)]
pub struct ZipBuilder {
    members: Vec<Member>,
    comment: Vec<u8>,
    reverse_directory: bool,
    prefix: Vec<u8>,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, name: &str, method: u16, payload: &[u8], data: Vec<u8>, extra: Vec<u8>) -> Self {
        let mut crc = flate2::Crc::new();
        crc.update(payload);
        self.members.push(Member {
            name: name.to_string(),
            method,
            flags: 0,
            crc: crc.sum(),
            data,
            uncompressed_len: payload.len() as u32,
            extra,
        });
        self
    }

    pub fn stored(self, name: &str, payload: &[u8]) -> Self {
        self.push(name, 0, payload, payload.to_vec(), Vec::new())
    }

    /// Stored entry with an alignment-style extra field, as zipalign emits.
    pub fn stored_with_extra(self, name: &str, payload: &[u8], extra_len: usize) -> Self {
        self.push(name, 0, payload, payload.to_vec(), vec![0u8; extra_len])
    }

    pub fn deflated(self, name: &str, payload: &[u8]) -> Self {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(payload).unwrap();
        let data = encoder.finish().unwrap();
        self.push(name, 8, payload, data, Vec::new())
    }

    pub fn comment(mut self, comment: &[u8]) -> Self {
        self.comment = comment.to_vec();
        self
    }

    /// Write central directory records in reverse of stream order.
    pub fn reverse_directory(mut self) -> Self {
        self.reverse_directory = true;
        self
    }

    /// Opaque bytes before the first local header (e.g. a launcher stub).
    pub fn prefix(mut self, prefix: &[u8]) -> Self {
        self.prefix = prefix.to_vec();
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut out = self.prefix.clone();
        let mut records = Vec::with_capacity(self.members.len());

        for m in &self.members {
            let local_off = out.len() as u32;

            out.write_all(b"PK\x03\x04").unwrap();
            out.write_u16::<LittleEndian>(20).unwrap();
            out.write_u16::<LittleEndian>(m.flags).unwrap();
            out.write_u16::<LittleEndian>(m.method).unwrap();
            out.write_u16::<LittleEndian>(0).unwrap();
            out.write_u16::<LittleEndian>(0x21).unwrap();
            out.write_u32::<LittleEndian>(m.crc).unwrap();
            out.write_u32::<LittleEndian>(m.data.len() as u32).unwrap();
            out.write_u32::<LittleEndian>(m.uncompressed_len).unwrap();
            out.write_u16::<LittleEndian>(m.name.len() as u16).unwrap();
            out.write_u16::<LittleEndian>(m.extra.len() as u16).unwrap();
            out.write_all(m.name.as_bytes()).unwrap();
            out.write_all(&m.extra).unwrap();
            out.write_all(&m.data).unwrap();

            let mut cd = Vec::new();
            cd.write_all(b"PK\x01\x02").unwrap();
            cd.write_u16::<LittleEndian>(0x031E).unwrap();
            cd.write_u16::<LittleEndian>(20).unwrap();
            cd.write_u16::<LittleEndian>(m.flags).unwrap();
            cd.write_u16::<LittleEndian>(m.method).unwrap();
            cd.write_u16::<LittleEndian>(0).unwrap();
            cd.write_u16::<LittleEndian>(0x21).unwrap();
            cd.write_u32::<LittleEndian>(m.crc).unwrap();
            cd.write_u32::<LittleEndian>(m.data.len() as u32).unwrap();
            cd.write_u32::<LittleEndian>(m.uncompressed_len).unwrap();
            cd.write_u16::<LittleEndian>(m.name.len() as u16).unwrap();
            cd.write_u16::<LittleEndian>(0).unwrap();
            cd.write_u16::<LittleEndian>(0).unwrap();
            cd.write_u16::<LittleEndian>(0).unwrap();
            cd.write_u16::<LittleEndian>(0).unwrap();
            cd.write_u32::<LittleEndian>(0o100644 << 16).unwrap();
            cd.write_u32::<LittleEndian>(local_off).unwrap();
            cd.write_all(m.name.as_bytes()).unwrap();
            records.push(cd);
        }

        if self.reverse_directory {
            records.reverse();
        }

        let cd_start = out.len() as u32;
        let cd: Vec<u8> = records.concat();
        out.write_all(&cd).unwrap();

        let count = self.members.len() as u16;
        out.write_all(b"PK\x05\x06").unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u16::<LittleEndian>(count).unwrap();
        out.write_u16::<LittleEndian>(count).unwrap();
        out.write_u32::<LittleEndian>(cd.len() as u32).unwrap();
        out.write_u32::<LittleEndian>(cd_start).unwrap();
        out.write_u16::<LittleEndian>(self.comment.len() as u16).unwrap();
        out.write_all(&self.comment).unwrap();

        out
    }
}

/// Deterministic, poorly compressible bytes.
pub fn noise(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 33) as u8
        })
        .collect()
}

/// A package-like archive: manifest, small resources, several large blobs
/// in mixed compression, directory records out of stream order.
pub fn sample_package(seed: u64) -> Vec<u8> {
    ZipBuilder::new()
        .stored("AndroidManifest.xml", &noise(900, seed))
        .deflated("classes.dex", &noise(20_000, seed + 1))
        .stored_with_extra("res/raw/intro.ogg", &noise(12_000, seed + 2), 3)
        .stored("res/values/strings.xml", b"<resources/>")
        .deflated("assets/level1.dat", &vec![9u8; 50_000])
        .stored("res/mipmap-xxhdpi-v4/app_icon.png", &noise(6_000, 77))
        .stored("META-INF/CERT.SF", &noise(300, seed + 4))
        .reverse_directory()
        .comment(b"signed")
        .build()
}

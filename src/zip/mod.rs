//! ZIP structure parsing.
//!
//! Only what the codec needs is parsed: the End of Central Directory record,
//! the Central Directory records, and the fixed part of each Local File
//! Header. Payloads are never decompressed.
//!
//! ## Architecture
//!
//! - [`structures`]: Data structures representing ZIP format elements
//! - [`parser`]: Parsing of those structures from raw bytes
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! ## Limitations
//!
//! - No ZIP64 support
//! - No multi-disk archive support

mod parser;
mod structures;

pub use parser::ZipParser;
pub use structures::*;

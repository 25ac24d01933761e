//! ZIP archive reading, in-place editing and writing.
//!
//! ## Architecture
//!
//! - [`structures`]: fixed records of the format (EOCD, Zip64 EOCD and locator, header layouts)
//! - [`extra`]: extra-field blocks, including the Zip64 extended information record
//! - [`parser`]: locating and decoding the central directory
//! - [`archive`]: the [`Archive`] handle tying a store, its entries and a writer together
//! - `writer`: the append-only emitter behind every mutation
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! Opening reads the EOCD first (from the end of the store), then the
//! Central Directory, so listing never touches entry data. Edits append new
//! local headers where the old Central Directory began and write a fresh
//! directory on close.
//!
//! ## Limitations
//!
//! - No encryption support
//! - No multi-disk archive support
//! - Only STORED and DEFLATE compression methods

mod archive;
pub mod codec;
pub mod dos_time;
mod entry;
pub mod extra;
mod options;
mod parser;
pub mod structures;
mod writer;

pub use archive::{Archive, EMPTY_MARKER_CONTENT, EMPTY_MARKER_NAME, EntryMut};
pub use entry::{BoundedReader, Entry, EntryReader};
pub use extra::{ExtraField, ExtraFields, UnrecognizedExtraField, Zip64ExtendedInfo};
pub use options::ArchiveOptions;
pub use parser::{CentralDirectory, ReadAhead, ZipParser};
pub use structures::CompressionMethod;

//! # rezip
//!
//! A random-access ZIP archive engine: open an archive over any store that
//! supports positional reads, list and read its entries, then append,
//! replace or erase entries in place and write a fresh central directory on
//! close.
//!
//! ## Features
//!
//! - Stores: local files, memory buffers and read-only HTTP Range readers
//! - ZIP64 for archives and entries past 4 GB or 65535 entries
//! - STORED and DEFLATE compression, buffered or streamed writes
//! - Erase plus compaction to reclaim space
//! - Extra fields and comments preserved across rewrites
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use rezip::{Archive, LocalFile};
//!
//! let mut archive = Archive::open(LocalFile::open(Path::new("data.zip"))?)?;
//! for entry in archive.entries() {
//!     println!("{} ({} bytes)", entry.name(), entry.size());
//! }
//!
//! archive.create_or_get_entry("notes/today.txt").write_bytes(b"hello")?;
//! archive.erase_entry("stale.bin");
//! archive.close()?;
//! # Ok::<(), rezip::ZipError>(())
//! ```

pub mod cli;
pub mod error;
pub mod io;
pub mod zip;

pub use cli::Cli;
pub use error::{Result, ZipError};
pub use io::{HttpRangeReader, LocalFile, MemoryStore, ReadAt, ReadOnly, Storage};
pub use zip::{Archive, ArchiveOptions, CompressionMethod, Entry, EntryMut, EntryReader};

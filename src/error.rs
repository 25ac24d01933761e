//! Error types for `rezip`.

use std::io;

use thiserror::Error;

/// The error type for archive operations.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ZipError {
    /// IO error reported by the underlying store.
    #[error("IO error: {0}")]
    Io(#[source] io::Error),

    /// A declared-length region ended before all of its bytes were read.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// The bytes do not form a valid archive structure.
    #[error("invalid archive: {0}")]
    Format(String),

    /// A value does not fit its 32-bit (or 16-bit) field and Zip64 mode is off.
    #[error("{field} {value} exceeds the classic ZIP limit; enable Zip64 mode")]
    Zip64Required {
        /// The header field that overflowed.
        field: &'static str,
        /// The value that was about to be written.
        value: u64,
    },

    /// Patching a local header would change the length of its extra block.
    #[error("local header of {name}: extra block is {actual} bytes, {reserved} were reserved")]
    HeaderPatchMismatch {
        /// Entry name.
        name: String,
        /// Length of the extra block written with the placeholder header.
        reserved: usize,
        /// Length of the rewritten extra block.
        actual: usize,
    },

    /// The entry has no data in the store yet.
    #[error("entry has not been written: {0}")]
    EntryNotWritten(String),

    /// Only stored (0) and deflate (8) are supported.
    #[error("unsupported compression method: {0}")]
    UnsupportedCompression(u16),

    /// Entry content does not match the CRC-32 recorded in the central directory.
    #[error("CRC-32 mismatch for {name}: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch {
        /// Entry name.
        name: String,
        /// CRC-32 from the central directory.
        expected: u32,
        /// CRC-32 of the bytes actually read.
        actual: u32,
    },
}

impl ZipError {
    pub(crate) fn format(message: impl Into<String>) -> Self {
        ZipError::Format(message.into())
    }
}

impl From<io::Error> for ZipError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            ZipError::UnexpectedEof
        } else {
            ZipError::Io(err)
        }
    }
}

/// A specialized Result type for archive operations.
pub type Result<T> = std::result::Result<T, ZipError>;

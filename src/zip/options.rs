use encoding_rs::{Encoding, UTF_8};

/// Tunables for opening and writing an archive.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveOptions {
    /// Encoding of names and comments that lack the UTF-8 flag.
    pub encoding: &'static Encoding,
    /// Start in Zip64 mode. Archives read with a Zip64 end record switch it on regardless.
    pub zip64: bool,
    /// Inputs larger than this are streamed instead of buffered.
    pub stream_threshold: u64,
    /// Writer staging buffer; flushed once it grows past this many bytes.
    pub staging_capacity: usize,
    /// Read-ahead buffer used while scanning the central directory.
    pub read_ahead: usize,
    /// Deflate level, 0-9.
    pub compression_level: u32,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            encoding: UTF_8,
            zip64: false,
            stream_threshold: 20 * 1024 * 1024,
            staging_capacity: 16 * 1024,
            read_ahead: 64 * 1024,
            compression_level: 6,
        }
    }
}

impl ArchiveOptions {
    pub fn with_encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_zip64(mut self, zip64: bool) -> Self {
        self.zip64 = zip64;
        self
    }

    pub fn with_stream_threshold(mut self, bytes: u64) -> Self {
        self.stream_threshold = bytes;
        self
    }

    pub fn with_staging_capacity(mut self, bytes: usize) -> Self {
        self.staging_capacity = bytes;
        self
    }

    pub fn with_read_ahead(mut self, bytes: usize) -> Self {
        self.read_ahead = bytes;
        self
    }

    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level.min(9);
        self
    }
}

//! Entry metadata and the read view over an entry's stored bytes.

use flate2::read::DeflateDecoder;
use std::io::{self, Read};
use std::time::SystemTime;

use crate::error::{Result, ZipError};
use crate::io::ReadAt;

use super::codec::get_u16;
use super::extra::{ExtraField, ExtraFields};
use super::structures::{CompressionMethod, LFH_SIGNATURE, LFH_SIZE, PLATFORM_FAT, PLATFORM_UNIX, lfh};

/// One file in an archive.
///
/// Sizes, CRC-32 and header offset describe the bytes in the store and are
/// only meaningful once the entry has been written or read from a central
/// directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    name: String,
    time: Option<SystemTime>,
    size: u64,
    compressed_size: u64,
    crc32: u32,
    method: CompressionMethod,
    platform: u8,
    flags: u16,
    internal_attributes: u16,
    external_attributes: u32,
    extra: ExtraFields,
    comment: Option<String>,
    header_offset: Option<u64>,
}

impl Entry {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            time: None,
            size: 0,
            compressed_size: 0,
            crc32: 0,
            method: CompressionMethod::default(),
            platform: PLATFORM_FAT,
            flags: 0,
            internal_attributes: 0,
            external_attributes: 0,
            extra: ExtraFields::new(),
            comment: None,
            header_offset: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Modification time, `None` when unknown.
    pub fn time(&self) -> Option<SystemTime> {
        self.time
    }

    pub fn set_time(&mut self, time: Option<SystemTime>) {
        self.time = time;
    }

    /// Uncompressed size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn compressed_size(&self) -> u64 {
        self.compressed_size
    }

    pub fn crc32(&self) -> u32 {
        self.crc32
    }

    pub fn method(&self) -> CompressionMethod {
        self.method
    }

    /// Method used by the next write of this entry.
    pub fn set_method(&mut self, method: CompressionMethod) {
        self.method = method;
    }

    pub fn platform(&self) -> u8 {
        self.platform
    }

    pub fn set_platform(&mut self, platform: u8) {
        self.platform = platform;
    }

    /// General purpose bit flags as last read or written.
    pub fn flags(&self) -> u16 {
        self.flags
    }

    pub fn internal_attributes(&self) -> u16 {
        self.internal_attributes
    }

    pub fn set_internal_attributes(&mut self, attributes: u16) {
        self.internal_attributes = attributes;
    }

    pub fn external_attributes(&self) -> u32 {
        self.external_attributes
    }

    pub fn set_external_attributes(&mut self, attributes: u32) {
        self.external_attributes = attributes;
    }

    /// Unix permission bits, if the entry was made on Unix and carries any.
    pub fn unix_mode(&self) -> Option<u32> {
        let mode = self.external_attributes >> 16;
        (self.platform == PLATFORM_UNIX && mode != 0).then_some(mode)
    }

    /// Store `mode` in the high half of the external attributes and mark the entry as Unix-made.
    pub fn set_unix_mode(&mut self, mode: u32) {
        self.platform = PLATFORM_UNIX;
        self.external_attributes = (mode & 0xFFFF) << 16 | (self.external_attributes & 0xFFFF);
    }

    pub fn is_directory(&self) -> bool {
        self.name.ends_with('/')
    }

    pub fn extra_fields(&self) -> &ExtraFields {
        &self.extra
    }

    /// Attach `field`, replacing any field with the same header id.
    pub fn add_extra(&mut self, field: ExtraField) {
        self.extra.add(field);
    }

    pub fn remove_extra(&mut self, id: u16) -> Option<ExtraField> {
        self.extra.remove(id)
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn set_comment(&mut self, comment: Option<String>) {
        self.comment = comment;
    }

    /// Absolute offset of the local file header, unset until written.
    pub fn header_offset(&self) -> Option<u64> {
        self.header_offset
    }

    pub(crate) fn extra_mut(&mut self) -> &mut ExtraFields {
        &mut self.extra
    }

    pub(crate) fn set_flags(&mut self, flags: u16) {
        self.flags = flags;
    }

    pub(crate) fn set_header_offset(&mut self, offset: Option<u64>) {
        self.header_offset = offset;
    }

    pub(crate) fn set_data(&mut self, crc32: u32, size: u64, compressed_size: u64) {
        self.crc32 = crc32;
        self.size = size;
        self.compressed_size = compressed_size;
    }

    /// Offset just past this entry's stored bytes, assuming the local
    /// header matches the central one. Used to bound staging flushes.
    pub(crate) fn data_end_hint(&self) -> Option<u64> {
        let offset = self.header_offset?;
        Some(offset + LFH_SIZE as u64 + self.name.len() as u64 + 0xFFFF + self.compressed_size)
    }
}

/// Reader over exactly `remaining` bytes of a store.
///
/// With `pad` set it yields one extra zero byte after the real content,
/// which raw inflaters may ask for when the stream has no terminator of its own.
pub struct BoundedReader<'a, S: ?Sized> {
    store: &'a S,
    position: u64,
    remaining: u64,
    pad: bool,
}

impl<'a, S: ReadAt + ?Sized> BoundedReader<'a, S> {
    pub fn new(store: &'a S, position: u64, len: u64, pad: bool) -> Self {
        Self {
            store,
            position,
            remaining: len,
            pad,
        }
    }
}

impl<S: ReadAt + ?Sized> Read for BoundedReader<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.remaining == 0 {
            if self.pad {
                self.pad = false;
                buf[0] = 0;
                return Ok(1);
            }
            return Ok(0);
        }

        let want = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let n = self.store.read_at(self.position, &mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "entry data ends before its compressed size",
            ));
        }
        self.position += n as u64;
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Uncompressed view of one entry's content.
pub enum EntryReader<'a, S: ?Sized> {
    Stored(BoundedReader<'a, S>),
    Deflated(DeflateDecoder<BoundedReader<'a, S>>),
}

impl<'a, S: ReadAt + ?Sized> EntryReader<'a, S> {
    /// Locate the entry's data through its local header and wrap it.
    ///
    /// The local name and extra lengths are re-read because they may differ
    /// from the central directory copy.
    pub(crate) fn open(store: &'a S, entry: &Entry) -> Result<Self> {
        let offset = entry
            .header_offset
            .ok_or_else(|| ZipError::EntryNotWritten(entry.name.clone()))?;

        let mut header = [0u8; LFH_SIZE];
        store.read_exact_at(offset, &mut header)?;
        if &header[0..4] != LFH_SIGNATURE {
            return Err(ZipError::format(format!(
                "invalid Local File Header for {} at offset {offset}",
                entry.name
            )));
        }

        let name_len = u64::from(get_u16(&header, lfh::NAME_LENGTH));
        let extra_len = u64::from(get_u16(&header, lfh::EXTRA_LENGTH));
        let data_offset = offset + LFH_SIZE as u64 + name_len + extra_len;

        match entry.method {
            CompressionMethod::Stored => Ok(EntryReader::Stored(BoundedReader::new(
                store,
                data_offset,
                entry.compressed_size,
                false,
            ))),
            CompressionMethod::Deflate => Ok(EntryReader::Deflated(DeflateDecoder::new(
                BoundedReader::new(store, data_offset, entry.compressed_size, true),
            ))),
            CompressionMethod::Unknown(method) => Err(ZipError::UnsupportedCompression(method)),
        }
    }
}

impl<S: ReadAt + ?Sized> Read for EntryReader<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            EntryReader::Stored(reader) => reader.read(buf),
            EntryReader::Deflated(reader) => reader.read(buf),
        }
    }
}

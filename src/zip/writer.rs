//! Append-only emitter of local headers, entry data and the central directory.
//!
//! Bytes are staged in memory and pushed to the store once the stage grows
//! past its capacity, when a streamed entry needs the store directly, or
//! when a reader asks for an offset that is still staged.

use byteorder::{LittleEndian, WriteBytesExt};
use encoding_rs::{Encoding, UTF_8};
use flate2::Compression;
use flate2::write::DeflateEncoder;
use std::borrow::Cow;
use std::io::{self, BufWriter, Read, Write};
use std::sync::{Mutex, MutexGuard};

use crate::error::{Result, ZipError};
use crate::io::{Storage, StoreSink};

use super::codec::{ZIP64_MAGIC, ZIP64_MAGIC_SHORT, fits_u32, put_u32, saturate_u32};
use super::dos_time::{split, to_dos_time};
use super::entry::Entry;
use super::extra::{ExtraField, ZIP64_EXTRA_ID, Zip64ExtendedInfo};
use super::structures::*;

/// Smallest buffer placed between a streamed entry and the store.
const MIN_STREAM_BUFFER: usize = 64 * 1024;

/// Archive-wide settings a write depends on.
#[derive(Debug, Clone, Copy)]
pub struct WriteContext {
    pub zip64: bool,
    pub encoding: &'static Encoding,
}

#[derive(Debug)]
struct Staging {
    buf: Vec<u8>,
    /// Absolute offset of `buf[0]`.
    start: u64,
}

impl Staging {
    fn position(&self) -> u64 {
        self.start + self.buf.len() as u64
    }

    fn flush<S: Storage + ?Sized>(&mut self, store: &S) -> Result<()> {
        if !self.buf.is_empty() {
            store.write_at(self.start, &self.buf)?;
            self.start += self.buf.len() as u64;
            self.buf.clear();
        }
        Ok(())
    }
}

/// Buffered writer for one archive.
#[derive(Debug)]
pub struct Writer {
    staging: Mutex<Staging>,
    capacity: usize,
    level: Compression,
}

/// Placeholder locations of a local header written before its sizes were known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HeaderPatch {
    /// Offset of the CRC-32 field; both size fields follow it.
    pub crc_at: u64,
    /// Offset of the local extra block.
    pub extra_at: u64,
    /// Length reserved for the extra block.
    pub extra_len: usize,
}

impl HeaderPatch {
    fn new(header_offset: u64, name_len: usize, extra_len: usize) -> Self {
        Self {
            crc_at: header_offset + lfh::CRC32 as u64,
            extra_at: header_offset + (LFH_SIZE + name_len) as u64,
            extra_len,
        }
    }

    /// Overwrite the placeholders with final values.
    ///
    /// `extra` is rewritten in place and must be exactly as long as the
    /// reserved block, otherwise the bytes after it would be clobbered.
    pub(crate) fn apply<S: Storage + ?Sized>(
        &self,
        store: &S,
        name: &str,
        fields: [u32; 3],
        extra: Option<&[u8]>,
    ) -> Result<()> {
        if let Some(extra) = extra {
            if extra.len() != self.extra_len {
                return Err(ZipError::HeaderPatchMismatch {
                    name: name.to_string(),
                    reserved: self.extra_len,
                    actual: extra.len(),
                });
            }
        }

        let mut patch = [0u8; 12];
        for (i, value) in fields.into_iter().enumerate() {
            put_u32(&mut patch, i * 4, value);
        }
        store.write_at(self.crc_at, &patch)?;
        if let Some(extra) = extra {
            store.write_at(self.extra_at, extra)?;
        }
        Ok(())
    }
}

/// Reader wrapper accumulating CRC-32 and byte count of everything read.
struct Checksummed<R> {
    inner: R,
    hasher: crc32fast::Hasher,
    count: u64,
}

impl<R: Read> Checksummed<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
            count: 0,
        }
    }

    fn finish(self) -> (u32, u64) {
        (self.hasher.finalize(), self.count)
    }
}

impl<R: Read> Read for Checksummed<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.count += n as u64;
        Ok(n)
    }
}

/// Encode `text` in the archive encoding; the flag tells whether the bytes are UTF-8.
pub(crate) fn encode_text<'t>(encoding: &'static Encoding, text: &'t str) -> (Cow<'t, [u8]>, bool) {
    if encoding == UTF_8 {
        return (Cow::Borrowed(text.as_bytes()), true);
    }
    let (bytes, used, _) = encoding.encode(text);
    (bytes, used == UTF_8)
}

fn require_u32(field: &'static str, value: u64) -> Result<u32> {
    fits_u32(value).ok_or(ZipError::Zip64Required { field, value })
}

fn require_u16(field: &'static str, len: usize) -> Result<u16> {
    u16::try_from(len).map_err(|_| ZipError::format(format!("{field} exceeds 65535 bytes")))
}

fn version_needed(method: CompressionMethod, zip64: bool) -> u16 {
    if zip64 {
        VERSION_ZIP64
    } else if method == CompressionMethod::Stored {
        VERSION_STORED
    } else {
        VERSION_DEFLATE
    }
}

impl Writer {
    /// A writer whose first byte lands at `start`.
    pub fn new(start: u64, capacity: usize, level: u32) -> Self {
        Self {
            staging: Mutex::new(Staging {
                buf: Vec::with_capacity(capacity),
                start,
            }),
            capacity,
            level: Compression::new(level),
        }
    }

    fn staging(&self) -> MutexGuard<'_, Staging> {
        self.staging.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn staging_mut(&mut self) -> &mut Staging {
        self.staging.get_mut().unwrap_or_else(|e| e.into_inner())
    }

    /// Total bytes written so far, i.e. the offset of the next byte.
    pub fn position(&self) -> u64 {
        self.staging().position()
    }

    /// Offset of the first byte not yet in the store.
    #[cfg(test)]
    fn flushed_position(&self) -> u64 {
        self.staging().start
    }

    fn append<S: Storage + ?Sized>(&mut self, store: &S, bytes: &[u8]) -> Result<()> {
        let capacity = self.capacity;
        let staging = self.staging_mut();
        if bytes.len() >= capacity {
            staging.flush(store)?;
            store.write_at(staging.start, bytes)?;
            staging.start += bytes.len() as u64;
            return Ok(());
        }
        staging.buf.extend_from_slice(bytes);
        if staging.buf.len() > capacity {
            staging.flush(store)?;
        }
        Ok(())
    }

    /// Push every staged byte to the store.
    pub fn flush<S: Storage + ?Sized>(&self, store: &S) -> Result<()> {
        self.staging().flush(store)
    }

    /// Make sure every byte below `offset` is physically in the store.
    pub fn flush_until<S: Storage + ?Sized>(&self, store: &S, offset: u64) -> Result<()> {
        let mut staging = self.staging();
        if staging.start < offset {
            staging.flush(store)?;
        }
        Ok(())
    }

    /// Write a whole in-memory payload: sizes and CRC go into the header up front.
    pub fn write_entry_bytes<S: Storage + ?Sized>(
        &mut self,
        store: &S,
        entry: &mut Entry,
        data: &[u8],
        ctx: WriteContext,
    ) -> Result<()> {
        let offset = self.position();
        let crc = crc32fast::hash(data);
        let compressed: Cow<'_, [u8]> = match entry.method() {
            CompressionMethod::Stored => Cow::Borrowed(data),
            CompressionMethod::Deflate => {
                let mut encoder = DeflateEncoder::new(Vec::with_capacity(data.len() / 2), self.level);
                encoder.write_all(data)?;
                Cow::Owned(encoder.finish()?)
            }
            CompressionMethod::Unknown(method) => {
                return Err(ZipError::UnsupportedCompression(method));
            }
        };
        let size = data.len() as u64;
        let compressed_size = compressed.len() as u64;

        let fields = if ctx.zip64 {
            entry.add_extra(ExtraField::Zip64(Zip64ExtendedInfo::full(
                size,
                compressed_size,
                offset,
            )));
            [crc, ZIP64_MAGIC, ZIP64_MAGIC]
        } else {
            require_u32("local header offset", offset)?;
            entry.remove_extra(ZIP64_EXTRA_ID);
            [
                crc,
                require_u32("compressed size", compressed_size)?,
                require_u32("size", size)?,
            ]
        };

        let (header, flags, _) = self.local_header(entry, fields, ctx)?;
        self.append(store, &header)?;
        self.append(store, &compressed)?;

        entry.set_flags(flags);
        entry.set_data(crc, size, compressed_size);
        entry.set_header_offset(Some(offset));
        tracing::debug!(name = entry.name(), offset, size, compressed_size, "wrote entry");
        Ok(())
    }

    /// Stream `source` into the store without buffering it.
    ///
    /// The local header is reserved with placeholder CRC and sizes, the data
    /// goes straight to the store (through a deflater if needed), then the
    /// placeholders are patched in place.
    pub fn write_entry_stream<S: Storage + ?Sized, R: Read>(
        &mut self,
        store: &S,
        entry: &mut Entry,
        source: R,
        ctx: WriteContext,
    ) -> Result<()> {
        let method = entry.method();
        if let CompressionMethod::Unknown(method) = method {
            return Err(ZipError::UnsupportedCompression(method));
        }

        let offset = self.position();
        let placeholders = if ctx.zip64 {
            entry.add_extra(ExtraField::Zip64(Zip64ExtendedInfo::full(0, 0, offset)));
            [0, ZIP64_MAGIC, ZIP64_MAGIC]
        } else {
            require_u32("local header offset", offset)?;
            entry.remove_extra(ZIP64_EXTRA_ID);
            [0, 0, 0]
        };

        let (header, flags, name_len) = self.local_header(entry, placeholders, ctx)?;
        let patch = HeaderPatch::new(offset, name_len, header.len() - LFH_SIZE - name_len);
        self.append(store, &header)?;
        self.flush(store)?;

        let data_start = self.position();
        let mut source = Checksummed::new(source);
        let sink = BufWriter::with_capacity(
            self.capacity.max(MIN_STREAM_BUFFER),
            StoreSink::new(store, data_start),
        );
        let data_end = match method {
            CompressionMethod::Deflate => {
                let mut encoder = DeflateEncoder::new(sink, self.level);
                io::copy(&mut source, &mut encoder)?;
                let sink = encoder.finish()?;
                sink.into_inner().map_err(|e| e.into_error())?.position()
            }
            _ => {
                let mut sink = sink;
                io::copy(&mut source, &mut sink)?;
                sink.into_inner().map_err(|e| e.into_error())?.position()
            }
        };
        self.staging_mut().start = data_end;

        let (crc, size) = source.finish();
        let compressed_size = data_end - data_start;

        let (fields, extra) = if ctx.zip64 {
            entry.add_extra(ExtraField::Zip64(Zip64ExtendedInfo::full(
                size,
                compressed_size,
                offset,
            )));
            (
                [crc, ZIP64_MAGIC, ZIP64_MAGIC],
                Some(entry.extra_fields().local_bytes()?),
            )
        } else {
            (
                [
                    crc,
                    require_u32("compressed size", compressed_size)?,
                    require_u32("size", size)?,
                ],
                None,
            )
        };
        patch.apply(store, entry.name(), fields, extra.as_deref())?;

        entry.set_flags(flags);
        entry.set_data(crc, size, compressed_size);
        entry.set_header_offset(Some(offset));
        tracing::debug!(name = entry.name(), offset, size, compressed_size, "streamed entry");
        Ok(())
    }

    /// Build a local file header; returns it with the flags used and the encoded name length.
    fn local_header(
        &self,
        entry: &Entry,
        [crc, compressed_size, size]: [u32; 3],
        ctx: WriteContext,
    ) -> Result<(Vec<u8>, u16, usize)> {
        let (name, utf8) = encode_text(ctx.encoding, entry.name());
        let extra = entry.extra_fields().local_bytes()?;
        let flags = if utf8 { FLAG_UTF8 } else { 0 };
        let (time, date) = split(entry.time().map(to_dos_time).unwrap_or(0));

        let mut out = Vec::with_capacity(LFH_SIZE + name.len() + extra.len());
        out.extend_from_slice(LFH_SIGNATURE);
        out.write_u16::<LittleEndian>(version_needed(entry.method(), ctx.zip64))?;
        out.write_u16::<LittleEndian>(flags)?;
        out.write_u16::<LittleEndian>(entry.method().as_u16())?;
        out.write_u16::<LittleEndian>(time)?;
        out.write_u16::<LittleEndian>(date)?;
        out.write_u32::<LittleEndian>(crc)?;
        out.write_u32::<LittleEndian>(compressed_size)?;
        out.write_u32::<LittleEndian>(size)?;
        out.write_u16::<LittleEndian>(require_u16("entry name", name.len())?)?;
        out.write_u16::<LittleEndian>(require_u16("local extra fields", extra.len())?)?;
        out.extend_from_slice(&name);
        out.extend_from_slice(&extra);
        Ok((out, flags, name.len()))
    }

    fn central_header(entry: &Entry, ctx: WriteContext) -> Result<Vec<u8>> {
        let offset = entry
            .header_offset()
            .ok_or_else(|| ZipError::EntryNotWritten(entry.name().to_string()))?;
        let (name, utf8) = encode_text(ctx.encoding, entry.name());
        let comment = entry
            .comment()
            .map(|c| encode_text(ctx.encoding, c).0)
            .unwrap_or_default();

        // the Zip64 record always carries all three values, whatever was parsed
        let zip64 = entry.extra_fields().zip64().map(|_| {
            Zip64ExtendedInfo::full(entry.size(), entry.compressed_size(), offset)
        });
        let extra = entry.extra_fields().central_bytes(zip64.as_ref())?;

        let (compressed_size, size, offset32) = if zip64.is_some() {
            (ZIP64_MAGIC, ZIP64_MAGIC, saturate_u32(offset))
        } else {
            (
                require_u32("compressed size", entry.compressed_size())?,
                require_u32("size", entry.size())?,
                require_u32("local header offset", offset)?,
            )
        };
        let version = version_needed(entry.method(), zip64.is_some());
        let made_by = u16::from(entry.platform()) << 8 | version.max(VERSION_DEFLATE);
        let utf8_flag = if utf8 { FLAG_UTF8 } else { 0 };
        let flags = (entry.flags() & !FLAG_UTF8) | utf8_flag;
        let (time, date) = split(entry.time().map(to_dos_time).unwrap_or(0));

        let mut out = Vec::with_capacity(CDFH_MIN_SIZE + name.len() + extra.len() + comment.len());
        out.extend_from_slice(CDFH_SIGNATURE);
        out.write_u16::<LittleEndian>(made_by)?;
        out.write_u16::<LittleEndian>(version)?;
        out.write_u16::<LittleEndian>(flags)?;
        out.write_u16::<LittleEndian>(entry.method().as_u16())?;
        out.write_u16::<LittleEndian>(time)?;
        out.write_u16::<LittleEndian>(date)?;
        out.write_u32::<LittleEndian>(entry.crc32())?;
        out.write_u32::<LittleEndian>(compressed_size)?;
        out.write_u32::<LittleEndian>(size)?;
        out.write_u16::<LittleEndian>(require_u16("entry name", name.len())?)?;
        out.write_u16::<LittleEndian>(require_u16("central extra fields", extra.len())?)?;
        out.write_u16::<LittleEndian>(require_u16("entry comment", comment.len())?)?;
        out.write_u16::<LittleEndian>(0)?; // disk number start
        out.write_u16::<LittleEndian>(entry.internal_attributes())?;
        out.write_u32::<LittleEndian>(entry.external_attributes())?;
        out.write_u32::<LittleEndian>(offset32)?;
        out.extend_from_slice(&name);
        out.extend_from_slice(&extra);
        out.extend_from_slice(&comment);
        Ok(out)
    }

    /// Emit the central directory and end records, flush, and return the
    /// final archive length.
    pub fn finish<'e, S, I>(
        &mut self,
        store: &S,
        entries: I,
        comment: Option<&str>,
        ctx: WriteContext,
    ) -> Result<u64>
    where
        S: Storage + ?Sized,
        I: IntoIterator<Item = &'e Entry>,
    {
        let cd_offset = self.position();
        let mut count = 0u64;
        for entry in entries {
            let record = Self::central_header(entry, ctx)?;
            self.append(store, &record)?;
            count += 1;
        }
        let cd_size = self.position() - cd_offset;

        let comment = comment
            .map(|c| encode_text(ctx.encoding, c).0)
            .unwrap_or_default();
        let mut tail = Vec::new();
        let eocd = if ctx.zip64 {
            let eocd64_offset = self.position();
            Zip64EOCD::new(count, cd_size, cd_offset).write_to(&mut tail)?;
            Zip64EOCDLocator {
                disk_with_eocd64: 0,
                eocd64_offset,
                total_disks: 1,
            }
            .write_to(&mut tail)?;

            let entries16 = u16::try_from(count).unwrap_or(ZIP64_MAGIC_SHORT);
            EndOfCentralDirectory {
                disk_entries: entries16,
                total_entries: entries16,
                cd_size: saturate_u32(cd_size),
                cd_offset: saturate_u32(cd_offset),
                comment_len: require_u16("archive comment", comment.len())?,
                ..Default::default()
            }
        } else {
            let entries16 = u16::try_from(count).map_err(|_| ZipError::Zip64Required {
                field: "entry count",
                value: count,
            })?;
            EndOfCentralDirectory {
                disk_entries: entries16,
                total_entries: entries16,
                cd_size: require_u32("central directory size", cd_size)?,
                cd_offset: require_u32("central directory offset", cd_offset)?,
                comment_len: require_u16("archive comment", comment.len())?,
                ..Default::default()
            }
        };
        eocd.write_to(&mut tail, &comment)?;
        self.append(store, &tail)?;
        self.flush(store)?;

        let length = self.position();
        tracing::debug!(entries = count, cd_offset, cd_size, length, zip64 = ctx.zip64, "finished archive");
        Ok(length)
    }
}

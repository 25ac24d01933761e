//! Low-level ZIP archive parser.
//!
//! This module handles the binary parsing of ZIP file structures,
//! reading from any source that implements the [`ReadAt`] trait.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. If a ZIP64 locator precedes it, read the ZIP64 EOCD instead
//! 3. Stream the Central Directory through a read-ahead buffer
//!
//! Every read is position-qualified and the read-ahead buffer is only
//! refilled once drained, so listing a remote archive costs a handful of
//! requests no matter how many entries it has.

use byteorder::{LittleEndian, ReadBytesExt};
use encoding_rs::Encoding;
use std::io::{self, Read};

use crate::error::{Result, ZipError};
use crate::io::ReadAt;

use super::codec::ZIP64_MAGIC;
use super::dos_time::{from_dos_time, join};
use super::entry::Entry;
use super::extra::ExtraFields;
use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Everything read from an existing archive's directory.
#[derive(Debug)]
pub struct CentralDirectory {
    pub entries: Vec<Entry>,
    pub comment: Option<String>,
    /// Where the central directory starts; new data is appended from here.
    pub offset: u64,
    pub zip64: bool,
}

/// Sequential reader over `[position, end)` that refills a fixed buffer
/// from the store only when it runs dry.
pub struct ReadAhead<'a, R: ?Sized> {
    reader: &'a R,
    position: u64,
    end: u64,
    buf: Vec<u8>,
    cursor: usize,
    filled: usize,
}

impl<'a, R: ReadAt + ?Sized> ReadAhead<'a, R> {
    pub fn new(reader: &'a R, position: u64, end: u64, capacity: usize) -> Self {
        Self {
            reader,
            position,
            end,
            buf: vec![0u8; capacity.max(CDFH_MIN_SIZE)],
            cursor: 0,
            filled: 0,
        }
    }

    fn refill(&mut self) -> io::Result<()> {
        let remaining = self.end.saturating_sub(self.position);
        let want = usize::try_from(remaining)
            .unwrap_or(usize::MAX)
            .min(self.buf.len());
        self.reader
            .read_exact_at(self.position, &mut self.buf[..want])?;
        self.position += want as u64;
        self.cursor = 0;
        self.filled = want;
        Ok(())
    }
}

impl<R: ReadAt + ?Sized> Read for ReadAhead<'_, R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.cursor == self.filled {
            self.refill()?;
        }
        let n = out.len().min(self.filled - self.cursor);
        out[..n].copy_from_slice(&self.buf[self.cursor..self.cursor + n]);
        self.cursor += n;
        Ok(n)
    }
}

/// Low-level ZIP file parser.
///
/// This struct handles reading and parsing ZIP structures from
/// a data source. It's generic over the reader type to support
/// local files, memory and HTTP sources.
///
/// ## Usage
///
/// Typically used through [`Archive`](super::Archive) rather than directly.
pub struct ZipParser<'a, R: ?Sized> {
    /// The underlying data source
    reader: &'a R,
    /// Total size of the archive in bytes
    size: u64,
    read_ahead: usize,
    encoding: &'static Encoding,
}

impl<'a, R: ReadAt + ?Sized> ZipParser<'a, R> {
    /// Create a new parser for the given reader.
    pub fn new(reader: &'a R, read_ahead: usize, encoding: &'static Encoding) -> Result<Self> {
        let size = reader.size()?;
        Ok(Self {
            reader,
            size,
            read_ahead,
            encoding,
        })
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// The EOCD is located at the end of the ZIP file. This method
    /// handles both the simple case (no comment) and archives with
    /// comments by searching backwards for the signature.
    ///
    /// # Returns
    ///
    /// A tuple of (EOCD record, offset of EOCD in file, raw comment).
    ///
    /// # Errors
    ///
    /// Returns an error if no valid EOCD can be found, indicating
    /// the file is not a valid ZIP archive.
    pub fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64, Vec<u8>)> {
        if self.size < EndOfCentralDirectory::SIZE as u64 {
            return Err(ZipError::format("Not a valid ZIP file"));
        }

        // Optimization: First try the simple case where there's no comment.
        // This avoids reading extra data in the common case.
        let offset = self.size - EndOfCentralDirectory::SIZE as u64;
        let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
        self.reader.read_exact_at(offset, &mut buf)?;

        // Check for signature and zero-length comment
        if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && &buf[20..22] == b"\x00\x00" {
            let eocd = EndOfCentralDirectory::from_bytes(&buf)?;
            return Ok((eocd, offset, Vec::new()));
        }

        // EOCD not at expected location - search for it.
        // The EOCD could be earlier if there's a ZIP comment.
        // We need to search backwards from the end of the file.
        let search_size = (MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64).min(self.size);
        let search_start = self.size - search_size;

        let mut buf = vec![0u8; search_size as usize];
        self.reader.read_exact_at(search_start, &mut buf)?;

        // Search backwards for EOCD signature (PK\x05\x06)
        for i in (0..=buf.len() - EndOfCentralDirectory::SIZE).rev() {
            if &buf[i..i + 4] == EndOfCentralDirectory::SIGNATURE {
                // Found a potential EOCD - its comment must fit in the remaining bytes.
                let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;
                let comment_start = i + EndOfCentralDirectory::SIZE;

                if comment_start + comment_len <= buf.len() {
                    let eocd = EndOfCentralDirectory::from_bytes(&buf[i..comment_start])?;
                    let comment = buf[comment_start..comment_start + comment_len].to_vec();
                    return Ok((eocd, search_start + i as u64, comment));
                }
            }
        }

        Err(ZipError::format("Not a valid ZIP file"))
    }

    /// Read the ZIP64 End of Central Directory record, if a locator sits
    /// immediately before the regular EOCD.
    pub fn read_zip64_eocd(&self, eocd_offset: u64) -> Result<Option<Zip64EOCD>> {
        let Some(locator_offset) = eocd_offset.checked_sub(Zip64EOCDLocator::SIZE as u64) else {
            return Ok(None);
        };
        let mut locator_buf = vec![0u8; Zip64EOCDLocator::SIZE];
        self.reader.read_exact_at(locator_offset, &mut locator_buf)?;

        let Some(locator) = Zip64EOCDLocator::from_bytes(&locator_buf)? else {
            return Ok(None);
        };

        // Read the actual ZIP64 EOCD from the offset specified in the locator
        let mut eocd64_buf = vec![0u8; Zip64EOCD::MIN_SIZE];
        self.reader
            .read_exact_at(locator.eocd64_offset, &mut eocd64_buf)?;

        Zip64EOCD::from_bytes(&eocd64_buf).map(Some)
    }

    /// Read the whole central directory.
    pub fn read_central_directory(&self) -> Result<CentralDirectory> {
        // Find and parse the EOCD to get Central Directory location
        let (eocd, eocd_offset, comment) = self.find_eocd()?;

        // Get Central Directory info, using ZIP64 if present
        let (cd_offset, cd_size, total_entries, zip64) =
            match self.read_zip64_eocd(eocd_offset)? {
                Some(eocd64) => (eocd64.cd_offset, eocd64.cd_size, eocd64.total_entries, true),
                None => {
                    if eocd.is_zip64() {
                        tracing::warn!(
                            eocd_offset,
                            "end record has saturated fields but no Zip64 locator; reading it as classic"
                        );
                    }
                    (
                        eocd.cd_offset as u64,
                        eocd.cd_size as u64,
                        eocd.total_entries as u64,
                        false,
                    )
                }
            };

        if cd_offset.saturating_add(cd_size) > eocd_offset {
            return Err(ZipError::format(format!(
                "central directory [{cd_offset}, +{cd_size}) overlaps its end record at {eocd_offset}"
            )));
        }

        tracing::debug!(cd_offset, cd_size, total_entries, zip64, "reading central directory");

        let mut cache = ReadAhead::new(self.reader, cd_offset, cd_offset + cd_size, self.read_ahead);
        let capacity = total_entries.min(cd_size / CDFH_MIN_SIZE as u64) as usize;
        let mut entries = Vec::with_capacity(capacity);
        for _ in 0..total_entries {
            entries.push(self.parse_cdfh(&mut cache)?);
        }

        let comment = (!comment.is_empty()).then(|| self.decode(&comment, false));
        Ok(CentralDirectory {
            entries,
            comment,
            offset: cd_offset,
            zip64,
        })
    }

    fn decode(&self, bytes: &[u8], utf8: bool) -> String {
        if utf8 {
            String::from_utf8_lossy(bytes).into_owned()
        } else {
            self.encoding
                .decode_without_bom_handling(bytes)
                .0
                .into_owned()
        }
    }

    /// Parse one Central Directory File Header.
    ///
    /// The CDFH contains metadata about a file in the archive, including
    /// its name, sizes, and location of the actual file data.
    fn parse_cdfh<T: Read>(&self, cursor: &mut T) -> Result<Entry> {
        // Read and verify the signature (PK\x01\x02)
        let mut sig = [0u8; 4];
        cursor.read_exact(&mut sig)?;
        if sig != CDFH_SIGNATURE {
            return Err(ZipError::format("Invalid Central Directory File Header"));
        }

        // Read fixed-size header fields
        let version_made_by = cursor.read_u16::<LittleEndian>()?;
        let _version_needed = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        let compression_method = cursor.read_u16::<LittleEndian>()?;
        let last_mod_time = cursor.read_u16::<LittleEndian>()?;
        let last_mod_date = cursor.read_u16::<LittleEndian>()?;
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let compressed_size = cursor.read_u32::<LittleEndian>()?;
        let uncompressed_size = cursor.read_u32::<LittleEndian>()?;
        let file_name_length = cursor.read_u16::<LittleEndian>()?;
        let extra_field_length = cursor.read_u16::<LittleEndian>()?;
        let file_comment_length = cursor.read_u16::<LittleEndian>()?;
        let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
        let internal_attrs = cursor.read_u16::<LittleEndian>()?;
        let external_attrs = cursor.read_u32::<LittleEndian>()?;
        let lfh_offset = cursor.read_u32::<LittleEndian>()?;

        let mut file_name_bytes = vec![0u8; file_name_length as usize];
        cursor.read_exact(&mut file_name_bytes)?;
        let mut extra_bytes = vec![0u8; extra_field_length as usize];
        cursor.read_exact(&mut extra_bytes)?;
        let mut comment_bytes = vec![0u8; file_comment_length as usize];
        cursor.read_exact(&mut comment_bytes)?;

        let utf8 = flags & FLAG_UTF8 != 0;
        let mut entry = Entry::new(self.decode(&file_name_bytes, utf8));

        // ZIP64 values replace the saturated 32-bit placeholders
        let saturated = [
            uncompressed_size == ZIP64_MAGIC,
            compressed_size == ZIP64_MAGIC,
            lfh_offset == ZIP64_MAGIC,
        ];
        let extra = ExtraFields::parse_central(&extra_bytes, saturated)?;
        let mut size = uncompressed_size as u64;
        let mut csize = compressed_size as u64;
        let mut offset = lfh_offset as u64;
        if let Some(zip64) = extra.zip64() {
            size = zip64.size.unwrap_or(size);
            csize = zip64.compressed_size.unwrap_or(csize);
            offset = zip64.header_offset.unwrap_or(offset);
        }

        entry.set_time(from_dos_time(join(last_mod_time, last_mod_date)));
        entry.set_method(CompressionMethod::from_u16(compression_method));
        entry.set_platform((version_made_by >> 8) as u8);
        entry.set_flags(flags);
        entry.set_internal_attributes(internal_attrs);
        entry.set_external_attributes(external_attrs);
        entry.set_data(crc32, size, csize);
        entry.set_header_offset(Some(offset));
        *entry.extra_mut() = extra;
        if !comment_bytes.is_empty() {
            entry.set_comment(Some(self.decode(&comment_bytes, utf8)));
        }

        Ok(entry)
    }
}

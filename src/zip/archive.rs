//! Random-access archive: parse on open, mutate in place, finalize on close.

use indexmap::IndexMap;
use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::ops::{Deref, DerefMut};
use std::path::Path;

use crate::error::{Result, ZipError};
use crate::io::{ReadAt, ReadOnly, Storage};

use super::entry::{Entry, EntryReader};
use super::options::ArchiveOptions;
use super::parser::ZipParser;
use super::structures::CompressionMethod;
use super::writer::{WriteContext, Writer};

/// Name of the entry written into archives that would otherwise be empty.
pub const EMPTY_MARKER_NAME: &str = "/empty.file.marker";

/// Content of [`EMPTY_MARKER_NAME`].
pub const EMPTY_MARKER_CONTENT: &[u8] = b"empty";

/// A ZIP archive over a random access store.
///
/// Reads take `&self` and only issue position-qualified store reads, so a
/// shared archive can serve readers on several threads. Every mutation takes
/// `&mut self`; the first one arms the archive's single [`Writer`], which
/// appends after the last entry (over the old central directory) and
/// re-emits the directory on [`close`](Archive::close).
///
/// ```no_run
/// use std::path::Path;
/// use rezip::{Archive, LocalFile};
///
/// let mut archive = Archive::open(LocalFile::open(Path::new("out.zip"))?)?;
/// archive.create_or_get_entry("hello.txt").write_bytes(b"hello")?;
/// archive.close()?;
/// # Ok::<(), rezip::ZipError>(())
/// ```
pub struct Archive<S> {
    store: S,
    options: ArchiveOptions,
    entries: IndexMap<String, Entry>,
    comment: Option<String>,
    zip64: bool,
    /// Where the writer starts once armed.
    append_offset: u64,
    writer: Option<Writer>,
}

impl<R: ReadAt> Archive<ReadOnly<R>> {
    /// Open an existing archive for listing and reading only.
    pub fn open_readonly(store: R) -> Result<Self> {
        Self::open_readonly_with(store, ArchiveOptions::default())
    }

    pub fn open_readonly_with(store: R, options: ArchiveOptions) -> Result<Self> {
        let store = ReadOnly(store);
        if store.size()? == 0 {
            return Err(ZipError::format("empty store is not an archive"));
        }
        Self::parse(store, options)
    }
}

impl<S: Storage> Archive<S> {
    /// Open the archive in `store`, or start a new one if the store is empty.
    pub fn open(store: S) -> Result<Self> {
        Self::open_with(store, ArchiveOptions::default())
    }

    pub fn open_with(store: S, options: ArchiveOptions) -> Result<Self> {
        if store.size()? > 0 {
            return Self::parse(store, options);
        }

        tracing::debug!("creating new archive");
        let mut archive = Self {
            store,
            options,
            entries: IndexMap::new(),
            comment: None,
            zip64: options.zip64,
            append_offset: 0,
            writer: None,
        };
        // armed right away so that closing always leaves a valid archive behind
        archive.arm_writer();
        Ok(archive)
    }

    fn parse(store: S, options: ArchiveOptions) -> Result<Self> {
        let directory = ZipParser::new(&store, options.read_ahead, options.encoding)?
            .read_central_directory()?;

        let mut entries = IndexMap::with_capacity(directory.entries.len());
        for entry in directory.entries {
            if let Some(previous) = entries.insert(entry.name().to_string(), entry) {
                tracing::warn!(name = previous.name(), "duplicate entry name; keeping the later record");
            }
        }
        tracing::debug!(
            entries = entries.len(),
            zip64 = directory.zip64,
            "opened archive"
        );

        Ok(Self {
            store,
            options,
            entries,
            comment: directory.comment,
            zip64: directory.zip64 || options.zip64,
            append_offset: directory.offset,
            writer: None,
        })
    }

    /// Entries in archive order.
    pub fn entries(&self) -> impl ExactSizeIterator<Item = &Entry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, name: &str) -> Option<&Entry> {
        self.entries.get(name)
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn is_zip64(&self) -> bool {
        self.zip64
    }

    pub fn options(&self) -> &ArchiveOptions {
        &self.options
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn write_context(&self) -> WriteContext {
        WriteContext {
            zip64: self.zip64,
            encoding: self.options.encoding,
        }
    }

    fn arm_writer(&mut self) -> &mut Writer {
        let start = self.append_offset;
        let capacity = self.options.staging_capacity;
        let level = self.options.compression_level;
        self.writer
            .get_or_insert_with(|| Writer::new(start, capacity, level))
    }

    fn writer_parts(&mut self) -> (&S, &mut Writer, &mut IndexMap<String, Entry>) {
        let start = self.append_offset;
        let capacity = self.options.staging_capacity;
        let level = self.options.compression_level;
        let writer = self
            .writer
            .get_or_insert_with(|| Writer::new(start, capacity, level));
        (&self.store, writer, &mut self.entries)
    }

    /// Switch to Zip64 mode for the rest of this archive's life.
    pub fn enable_zip64(&mut self) {
        self.zip64 = true;
        self.arm_writer();
    }

    pub fn set_comment(&mut self, comment: Option<String>) {
        self.comment = comment;
        self.arm_writer();
    }

    /// Return the entry called `name`, registering a new unwritten one if needed.
    pub fn create_or_get_entry(&mut self, name: &str) -> EntryMut<'_, S> {
        self.arm_writer();
        let slot = self.entries.entry(name.to_string());
        let index = slot.index();
        slot.or_insert_with(|| Entry::new(name));
        EntryMut {
            archive: self,
            index,
        }
    }

    /// Mutable handle to an existing entry.
    pub fn entry_mut(&mut self, name: &str) -> Option<EntryMut<'_, S>> {
        let index = self.entries.get_index_of(name)?;
        self.arm_writer();
        Some(EntryMut {
            archive: self,
            index,
        })
    }

    /// Drop `name` from the directory. Its bytes stay in the store until [`compact`](Self::compact).
    pub fn erase_entry(&mut self, name: &str) -> Option<Entry> {
        self.arm_writer();
        let removed = self.entries.shift_remove(name);
        if removed.is_some() {
            tracing::debug!(name, "erased entry");
        }
        removed
    }

    /// Uncompressed stream over `entry`'s content.
    pub fn open_entry(&self, entry: &Entry) -> Result<EntryReader<'_, S>> {
        if let (Some(writer), Some(end)) = (&self.writer, entry.data_end_hint()) {
            writer.flush_until(&self.store, end)?;
        }
        EntryReader::open(&self.store, entry)
    }

    /// Whole uncompressed content of `entry`, checked against its CRC-32.
    pub fn read_entry(&self, entry: &Entry) -> Result<Vec<u8>> {
        let mut reader = self.open_entry(entry)?;
        let capacity = usize::try_from(entry.size()).unwrap_or(0).min(64 << 20);
        let mut data = Vec::with_capacity(capacity);
        reader.read_to_end(&mut data)?;

        let actual = crc32fast::hash(&data);
        if actual != entry.crc32() {
            return Err(ZipError::CrcMismatch {
                name: entry.name().to_string(),
                expected: entry.crc32(),
                actual,
            });
        }
        Ok(data)
    }

    fn entry_at(&mut self, index: usize) -> Result<(&S, &mut Writer, &mut Entry, WriteContext)> {
        let ctx = self.write_context();
        let (store, writer, entries) = self.writer_parts();
        let (_, entry) = entries
            .get_index_mut(index)
            .ok_or_else(|| ZipError::format("entry handle no longer points at an entry"))?;
        Ok((store, writer, entry, ctx))
    }

    fn write_bytes_at(&mut self, index: usize, data: &[u8]) -> Result<()> {
        let (store, writer, entry, ctx) = self.entry_at(index)?;
        writer.write_entry_bytes(store, entry, data, ctx)
    }

    fn write_stream_at<R: Read>(&mut self, index: usize, source: R) -> Result<()> {
        let (store, writer, entry, ctx) = self.entry_at(index)?;
        writer.write_entry_stream(store, entry, source, ctx)
    }

    fn write_from_at<R: Read>(&mut self, index: usize, mut source: R) -> Result<()> {
        let threshold = self.options.stream_threshold;
        let mut prefix = Vec::new();
        (&mut source).take(threshold + 1).read_to_end(&mut prefix)?;
        if prefix.len() as u64 <= threshold {
            self.write_bytes_at(index, &prefix)
        } else {
            self.write_stream_at(index, Cursor::new(prefix).chain(source))
        }
    }

    fn write_file_at(&mut self, index: usize, path: &Path) -> Result<()> {
        let file = File::open(path)?;
        let metadata = file.metadata()?;
        if let Some((_, entry)) = self.entries.get_index_mut(index) {
            if entry.time().is_none() {
                entry.set_time(metadata.modified().ok());
            }
        }

        if metadata.len() > self.options.stream_threshold {
            self.write_stream_at(index, BufReader::with_capacity(64 * 1024, file))
        } else {
            let mut data = Vec::with_capacity(metadata.len() as usize);
            BufReader::new(file).read_to_end(&mut data)?;
            self.write_bytes_at(index, &data)
        }
    }

    /// Rewrite the archive with only the live entries, reclaiming the space
    /// of erased and overwritten data.
    ///
    /// Every entry is held in memory while the store is rewritten from
    /// offset zero. This is not atomic: if it fails the archive must be
    /// considered corrupt.
    pub fn compact(&mut self) -> Result<()> {
        let mut saved = Vec::with_capacity(self.entries.len());
        let mut total = 0u64;
        for entry in self.entries.values() {
            let data = match entry.header_offset() {
                Some(_) => Some(self.read_entry(entry)?),
                None => None,
            };
            total += entry.size();
            saved.push((entry.clone(), data));
        }
        tracing::info!(entries = saved.len(), bytes = total, "compacting archive");

        self.entries.clear();
        self.append_offset = 0;
        self.writer = None;
        self.arm_writer();

        for (template, data) in saved {
            let mut entry = self.create_or_get_entry(template.name());
            entry.set_time(template.time());
            entry.set_method(template.method());
            entry.set_comment(template.comment().map(str::to_owned));
            entry.set_platform(template.platform());
            entry.set_internal_attributes(template.internal_attributes());
            entry.set_external_attributes(template.external_attributes());
            for field in template.extra_fields().without_zip64().iter() {
                entry.add_extra(field.clone());
            }
            if let Some(data) = data {
                entry.write_bytes(&data)?;
            }
        }
        Ok(())
    }

    /// Finalize and release the store.
    ///
    /// If anything was modified, unwritten entries are stored empty, an
    /// empty archive gets a marker entry, the central directory is written
    /// and the store is truncated to the archive's length.
    pub fn close(mut self) -> Result<S> {
        if self.writer.is_none() {
            return Ok(self.store);
        }

        if self.entries.is_empty() {
            let mut marker = self.create_or_get_entry(EMPTY_MARKER_NAME);
            marker.set_method(CompressionMethod::Stored);
            marker.write_bytes(EMPTY_MARKER_CONTENT)?;
        }

        let pending: Vec<usize> = self
            .entries
            .values()
            .enumerate()
            .filter(|(_, entry)| entry.header_offset().is_none())
            .map(|(index, _)| index)
            .collect();
        for index in pending {
            self.write_bytes_at(index, &[])?;
        }

        let ctx = self.write_context();
        let Archive {
            store,
            entries,
            comment,
            writer,
            ..
        } = &mut self;
        if let Some(writer) = writer.as_mut() {
            let length = writer.finish(&*store, entries.values(), comment.as_deref(), ctx)?;
            store.set_len(length)?;
            store.sync()?;
            tracing::info!(entries = entries.len(), length, "closed archive");
        }
        Ok(self.store)
    }
}

/// Mutable handle to one entry of an [`Archive`].
///
/// Dereferences to the [`Entry`] for metadata access; the `write_*` methods
/// route the content through the archive's writer.
pub struct EntryMut<'a, S> {
    archive: &'a mut Archive<S>,
    index: usize,
}

impl<S> Deref for EntryMut<'_, S> {
    type Target = Entry;

    fn deref(&self) -> &Entry {
        &self.archive.entries[self.index]
    }
}

impl<S> DerefMut for EntryMut<'_, S> {
    fn deref_mut(&mut self) -> &mut Entry {
        &mut self.archive.entries[self.index]
    }
}

impl<S: Storage> EntryMut<'_, S> {
    /// Write an in-memory payload.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.archive.write_bytes_at(self.index, data)
    }

    /// Stream `source` to the store, patching the header afterwards.
    pub fn write_stream<R: Read>(&mut self, source: R) -> Result<()> {
        self.archive.write_stream_at(self.index, source)
    }

    /// Buffer small inputs and stream those above the archive's stream threshold.
    pub fn write_from<R: Read>(&mut self, source: R) -> Result<()> {
        self.archive.write_from_at(self.index, source)
    }

    /// Write the content of the file at `path`, taking its modification
    /// time if the entry has none.
    pub fn write_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.archive.write_file_at(self.index, path.as_ref())
    }

    /// Remove this entry from its archive.
    pub fn erase(self) -> Option<Entry> {
        let name = self.archive.entries[self.index].name().to_string();
        self.archive.erase_entry(&name)
    }
}

#![allow(dead_code)]

use std::io;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use rezip::{MemoryStore, ReadAt, Storage};

/// Store that keeps only written segments, so archives can sit at offsets
/// far beyond available memory. Unwritten ranges read as zeros.
#[derive(Default)]
pub struct SparseStore {
    inner: Mutex<Sparse>,
}

#[derive(Default)]
struct Sparse {
    /// In write order; later segments win where they overlap.
    segments: Vec<(u64, Vec<u8>)>,
    len: u64,
}

impl ReadAt for SparseStore {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let inner = self.inner.lock().unwrap();
        if offset >= inner.len {
            return Ok(0);
        }
        let n = buf.len().min((inner.len - offset) as usize);
        let buf = &mut buf[..n];
        buf.fill(0);

        let want_end = offset + n as u64;
        for (start, data) in &inner.segments {
            let end = start + data.len() as u64;
            if *start < want_end && end > offset {
                let from = offset.max(*start);
                let to = want_end.min(end);
                buf[(from - offset) as usize..(to - offset) as usize]
                    .copy_from_slice(&data[(from - start) as usize..(to - start) as usize]);
            }
        }
        Ok(n)
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.inner.lock().unwrap().len)
    }
}

impl Storage for SparseStore {
    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.segments.push((offset, buf.to_vec()));
        inner.len = inner.len.max(offset + buf.len() as u64);
        Ok(())
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.segments.retain(|(start, _)| *start < len);
        for (start, data) in inner.segments.iter_mut() {
            data.truncate((len - *start).min(data.len() as u64) as usize);
        }
        inner.len = len;
        Ok(())
    }
}

/// Memory store that counts the reads issued against it.
#[derive(Default)]
pub struct CountingStore {
    pub inner: MemoryStore,
    reads: AtomicU64,
}

impl CountingStore {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            inner: MemoryStore::from(bytes),
            reads: AtomicU64::new(0),
        }
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }
}

impl ReadAt for CountingStore {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.inner.read_at(offset, buf)
    }

    fn size(&self) -> io::Result<u64> {
        self.inner.size()
    }
}

/// Deterministic, poorly compressible bytes.
pub fn noise(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).max(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}

/// Hand-built classic archive: one stored entry at offset zero whose data
/// runs up to `cd_offset`, followed by its central directory.
///
/// The entry's bytes are never written, so its CRC is only correct for an
/// all-zero payload and it should not be read.
pub fn classic_archive_with_directory_at(store: &SparseStore, cd_offset: u64) {
    let name = b"big.bin";
    let data_len = (cd_offset - 30 - name.len() as u64) as u32;

    let mut local = Vec::new();
    local.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
    local.extend_from_slice(&10u16.to_le_bytes()); // version needed
    local.extend_from_slice(&0u16.to_le_bytes()); // flags
    local.extend_from_slice(&0u16.to_le_bytes()); // stored
    local.extend_from_slice(&0u16.to_le_bytes()); // time
    local.extend_from_slice(&0x21u16.to_le_bytes()); // date: 1980-01-01
    local.extend_from_slice(&0u32.to_le_bytes()); // crc
    local.extend_from_slice(&data_len.to_le_bytes());
    local.extend_from_slice(&data_len.to_le_bytes());
    local.extend_from_slice(&(name.len() as u16).to_le_bytes());
    local.extend_from_slice(&0u16.to_le_bytes());
    local.extend_from_slice(name);
    store.write_at(0, &local).unwrap();

    let mut central = Vec::new();
    central.extend_from_slice(&0x0201_4b50u32.to_le_bytes());
    central.extend_from_slice(&20u16.to_le_bytes()); // made by
    central.extend_from_slice(&10u16.to_le_bytes()); // version needed
    central.extend_from_slice(&0u16.to_le_bytes());
    central.extend_from_slice(&0u16.to_le_bytes());
    central.extend_from_slice(&0u16.to_le_bytes());
    central.extend_from_slice(&0x21u16.to_le_bytes());
    central.extend_from_slice(&0u32.to_le_bytes());
    central.extend_from_slice(&data_len.to_le_bytes());
    central.extend_from_slice(&data_len.to_le_bytes());
    central.extend_from_slice(&(name.len() as u16).to_le_bytes());
    central.extend_from_slice(&0u16.to_le_bytes()); // extra
    central.extend_from_slice(&0u16.to_le_bytes()); // comment
    central.extend_from_slice(&0u16.to_le_bytes()); // disk
    central.extend_from_slice(&0u16.to_le_bytes()); // internal
    central.extend_from_slice(&0u32.to_le_bytes()); // external
    central.extend_from_slice(&0u32.to_le_bytes()); // local header offset
    central.extend_from_slice(name);

    let mut eocd = Vec::new();
    eocd.extend_from_slice(&0x0605_4b50u32.to_le_bytes());
    eocd.extend_from_slice(&0u16.to_le_bytes());
    eocd.extend_from_slice(&0u16.to_le_bytes());
    eocd.extend_from_slice(&1u16.to_le_bytes());
    eocd.extend_from_slice(&1u16.to_le_bytes());
    eocd.extend_from_slice(&(central.len() as u32).to_le_bytes());
    eocd.extend_from_slice(&(cd_offset as u32).to_le_bytes());
    eocd.extend_from_slice(&0u16.to_le_bytes());

    central.extend_from_slice(&eocd);
    store.write_at(cd_offset, &central).unwrap();
}

/// Sparse store that drops writes starting inside `hollow` while still
/// growing to cover them, for streaming entries too large to keep.
pub struct HollowStore {
    pub inner: SparseStore,
    hollow: std::ops::Range<u64>,
}

impl HollowStore {
    pub fn new(hollow: std::ops::Range<u64>) -> Self {
        Self {
            inner: SparseStore::default(),
            hollow,
        }
    }
}

impl ReadAt for HollowStore {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read_at(offset, buf)
    }

    fn size(&self) -> io::Result<u64> {
        self.inner.size()
    }
}

impl Storage for HollowStore {
    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
        if !self.hollow.contains(&offset) {
            return self.inner.write_at(offset, buf);
        }
        let end = offset + buf.len() as u64;
        if end > self.inner.size()? {
            self.inner.set_len(end)?;
        }
        Ok(())
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        self.inner.set_len(len)
    }
}

/// Zip64 record of the local header at `offset`, parsed straight from the store.
pub fn local_zip64<S: ReadAt>(store: &S, offset: u64) -> Option<rezip::zip::Zip64ExtendedInfo> {
    use rezip::zip::ExtraFields;
    use rezip::zip::codec::get_u16;

    let mut header = [0u8; 30];
    store.read_exact_at(offset, &mut header).unwrap();
    let name_len = get_u16(&header, 26) as u64;
    let extra_len = get_u16(&header, 28) as usize;
    let mut extra = vec![0u8; extra_len];
    store
        .read_exact_at(offset + 30 + name_len, &mut extra)
        .unwrap();
    ExtraFields::parse_local(&extra).unwrap().zip64().copied()
}

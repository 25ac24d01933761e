mod http;
mod local;
mod memory;

pub use http::HttpRangeReader;
pub use local::LocalFile;
pub use memory::MemoryStore;

use std::io;

/// Trait for random access reading from a data source.
///
/// Every read names its own offset, so a store shared between threads never
/// needs a common cursor.
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer.
    ///
    /// Returns the number of bytes read; `0` means `offset` is at or past the end.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Get the total size of the data source.
    fn size(&self) -> io::Result<u64>;

    /// Fill `buf` completely from `offset`, failing with `UnexpectedEof` on a short source.
    fn read_exact_at(&self, mut offset: u64, mut buf: &mut [u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.read_at(offset, buf) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "store ended before the requested range",
                    ));
                }
                Ok(n) => {
                    buf = &mut buf[n..];
                    offset += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// A random access store that can also be written, resized and synced.
pub trait Storage: ReadAt {
    /// Write all of `buf` at `offset`, extending the store if needed.
    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()>;

    /// Truncate or extend the store to exactly `len` bytes.
    fn set_len(&self, len: u64) -> io::Result<()>;

    /// Push written bytes to durable storage.
    fn sync(&self) -> io::Result<()> {
        Ok(())
    }
}

impl<T: ReadAt + ?Sized> ReadAt for &T {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_at(offset, buf)
    }

    fn size(&self) -> io::Result<u64> {
        (**self).size()
    }
}

impl<T: Storage + ?Sized> Storage for &T {
    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
        (**self).write_at(offset, buf)
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        (**self).set_len(len)
    }

    fn sync(&self) -> io::Result<()> {
        (**self).sync()
    }
}

/// Adapter giving a read-only source the [`Storage`] interface.
///
/// Every write, resize or sync fails with `PermissionDenied`, so an archive
/// opened over it can be listed and read but never finalized.
#[derive(Debug)]
pub struct ReadOnly<R>(pub R);

impl<R> ReadOnly<R> {
    pub fn into_inner(self) -> R {
        self.0
    }
}

impl<R: ReadAt> ReadAt for ReadOnly<R> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read_at(offset, buf)
    }

    fn size(&self) -> io::Result<u64> {
        self.0.size()
    }
}

fn read_only_error() -> io::Error {
    io::Error::new(io::ErrorKind::PermissionDenied, "store is read-only")
}

impl<R: ReadAt> Storage for ReadOnly<R> {
    fn write_at(&self, _offset: u64, _buf: &[u8]) -> io::Result<()> {
        Err(read_only_error())
    }

    fn set_len(&self, _len: u64) -> io::Result<()> {
        Err(read_only_error())
    }
}

/// `io::Write` adapter appending to a [`Storage`] from a starting offset.
pub(crate) struct StoreSink<'a, S: ?Sized> {
    store: &'a S,
    position: u64,
}

impl<'a, S: Storage + ?Sized> StoreSink<'a, S> {
    pub(crate) fn new(store: &'a S, position: u64) -> Self {
        Self { store, position }
    }

    pub(crate) fn position(&self) -> u64 {
        self.position
    }
}

impl<S: Storage + ?Sized> io::Write for StoreSink<'_, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.store.write_at(self.position, buf)?;
        self.position += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

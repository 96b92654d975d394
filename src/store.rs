//! Random-access byte storage underneath an archive.
//!
//! The engine needs only positioned reads and writes, the current length,
//! and truncation — satisfied equally by a file handle and by an in-memory
//! buffer.  The in-memory form is what makes the safe-write pattern work:
//! mutate a [`MemStore`] copy of the whole container, then atomically
//! replace the real file only after every operation succeeded.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

pub trait ByteStore {
    /// Read up to `buf.len()` bytes starting at `offset`.  Returns the byte
    /// count actually read; 0 means end of store.
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Write all of `data` at `offset`, extending the store if needed.
    fn write_at(&mut self, data: &[u8], offset: u64) -> io::Result<()>;

    fn len(&mut self) -> io::Result<u64>;

    fn is_empty(&mut self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Truncate (or extend with zeroes) to exactly `new_len` bytes.
    fn set_len(&mut self, new_len: u64) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;

    /// Fill `buf` completely or fail with `UnexpectedEof`.
    fn read_exact_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        let mut done = 0usize;
        while done < buf.len() {
            let n = self.read_at(&mut buf[done..], offset + done as u64)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "read past end of archive store",
                ));
            }
            done += n;
        }
        Ok(())
    }
}

// ── File-backed store ────────────────────────────────────────────────────────

impl ByteStore for File {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.seek(SeekFrom::Start(offset))?;
        Read::read(self, buf)
    }

    fn write_at(&mut self, data: &[u8], offset: u64) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        self.write_all(data)
    }

    fn len(&mut self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn set_len(&mut self, new_len: u64) -> io::Result<()> {
        File::set_len(self, new_len)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

// ── In-memory store ──────────────────────────────────────────────────────────

/// Growable byte buffer implementing [`ByteStore`].
///
/// The vehicle for safe-write: load a file into a `MemStore`, mutate the
/// archive in memory, then [`MemStore::into_inner`] and swap the file on
/// disk atomically.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    buf: Vec<u8>,
}

impl MemStore {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

impl From<Vec<u8>> for MemStore {
    fn from(buf: Vec<u8>) -> Self {
        Self { buf }
    }
}

impl ByteStore for MemStore {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let len = self.buf.len() as u64;
        if offset >= len {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(self.buf.len() - start);
        buf[..n].copy_from_slice(&self.buf[start..start + n]);
        Ok(n)
    }

    fn write_at(&mut self, data: &[u8], offset: u64) -> io::Result<()> {
        let end = offset as usize + data.len();
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.buf[offset as usize..end].copy_from_slice(data);
        Ok(())
    }

    fn len(&mut self) -> io::Result<u64> {
        Ok(self.buf.len() as u64)
    }

    fn set_len(&mut self, new_len: u64) -> io::Result<()> {
        self.buf.resize(new_len as usize, 0);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

//! Entry streams — reading and writing, store and chunked.
//!
//! All four variants are unidirectional and non-seekable: readers implement
//! [`std::io::Read`], writers implement [`std::io::Write`], and neither
//! implements `Seek`.  A stream borrows the archive mutably for its whole
//! lifetime, so the borrow checker enforces what the storage model
//! requires anyway: no mutation can run while a stream is open, and the
//! archive cannot be flushed with a stream outstanding.
//!
//! # Writer finalization
//! A writing stream commits its entry to the directory only when it is
//! finished.  [`EntryWriter::finish`] is the error-checked path; dropping
//! an unfinished writer finalizes best-effort (errors are swallowed, as
//! with any I/O in `Drop`).  [`EntryWriter::abandon`] discards the pending
//! entry instead, returning any bytes already written to the free list.
//!
//! # Buffer pooling
//! Readers decompress into a buffer checked out of the archive's
//! [`crate::pool::BufferPool`] and return it on every exit path via `Drop`.

use std::io::{self, Read, Write};

use crate::archive::Archive;
use crate::codec::{unpack_into, Algorithm};
use crate::entry::{Chunk, Entry, EntryKind};
use crate::error::ArcError;
use crate::store::ByteStore;

/// Fixed block size for streaming raw store reads.
const READ_BLOCK: usize = 64 * 1024;

fn to_io(err: ArcError) -> io::Error {
    match err {
        ArcError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
    }
}

// ── Reading streams ──────────────────────────────────────────────────────────

enum ReaderState {
    /// Uncompressed contiguous range, streamed in fixed-size blocks.
    StoreRaw { offset: u64, remaining: u64 },
    /// Whole-range-compressed store entry, inflated on first read.
    StorePacked { offset: u64, comp_len: u64, loaded: bool },
    /// Chunked entry, one chunk decompressed per refill.
    Chunked { chunks: Vec<Chunk>, next: usize },
}

/// Sequential reader over one entry's decompressed payload.
pub struct EntryReader<'a, S: ByteStore> {
    archive:  &'a mut Archive<S>,
    alg:      Algorithm,
    state:    ReaderState,
    /// Pooled decompressed window; returned to the pool on drop.
    buf:      Vec<u8>,
    buf_pos:  usize,
    buf_len:  usize,
    /// Scratch for compressed bytes read off the store.
    comp_buf: Vec<u8>,
    length:   u64,
    position: u64,
}

impl<'a, S: ByteStore> EntryReader<'a, S> {
    pub(crate) fn new(archive: &'a mut Archive<S>, entry: &Entry) -> Self {
        let alg = archive.algorithm();
        let state = match entry.kind {
            EntryKind::Store => {
                if entry.compressed_len == entry.decompressed_len {
                    ReaderState::StoreRaw {
                        offset:    entry.offset,
                        remaining: entry.compressed_len,
                    }
                } else {
                    ReaderState::StorePacked {
                        offset:   entry.offset,
                        comp_len: entry.compressed_len,
                        loaded:   false,
                    }
                }
            }
            EntryKind::Chunked => ReaderState::Chunked {
                chunks: entry.chunks.clone(),
                next:   0,
            },
        };
        let buf = archive.pool.acquire(0);
        Self {
            archive,
            alg,
            state,
            buf,
            buf_pos: 0,
            buf_len: 0,
            comp_buf: Vec::new(),
            length: entry.decompressed_len,
            position: 0,
        }
    }

    /// Total decompressed length of the entry.
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Decompressed bytes delivered so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Load the next window into `buf`.  Returns false at end of entry.
    fn refill(&mut self) -> io::Result<bool> {
        self.buf_pos = 0;
        self.buf_len = 0;
        match &mut self.state {
            ReaderState::StoreRaw { offset, remaining } => {
                if *remaining == 0 {
                    return Ok(false);
                }
                let n = READ_BLOCK.min(*remaining as usize);
                self.buf.resize(n, 0);
                self.archive.store.read_exact_at(&mut self.buf[..n], *offset)?;
                *offset += n as u64;
                *remaining -= n as u64;
                self.buf_len = n;
                Ok(true)
            }
            ReaderState::StorePacked { offset, comp_len, loaded } => {
                if *loaded {
                    return Ok(false);
                }
                self.comp_buf.resize(*comp_len as usize, 0);
                self.archive.store.read_exact_at(&mut self.comp_buf, *offset)?;
                self.buf.resize(self.length as usize, 0);
                unpack_into(self.alg, &self.comp_buf, &mut self.buf)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
                *loaded = true;
                self.buf_len = self.buf.len();
                Ok(true)
            }
            ReaderState::Chunked { chunks, next } => {
                let chunk = match chunks.get(*next) {
                    Some(c) => *c,
                    None => return Ok(false),
                };
                *next += 1;
                self.comp_buf.resize(chunk.compressed_len as usize, 0);
                self.archive
                    .store
                    .read_exact_at(&mut self.comp_buf, chunk.offset)?;
                self.buf.resize(chunk.decompressed_len as usize, 0);
                unpack_into(self.alg, &self.comp_buf, &mut self.buf)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
                self.buf_len = self.buf.len();
                Ok(true)
            }
        }
    }
}

impl<S: ByteStore> Read for EntryReader<'_, S> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        if self.buf_pos == self.buf_len && !self.refill()? {
            return Ok(0);
        }
        let n = out.len().min(self.buf_len - self.buf_pos);
        out[..n].copy_from_slice(&self.buf[self.buf_pos..self.buf_pos + n]);
        self.buf_pos += n;
        self.position += n as u64;
        Ok(n)
    }
}

impl<S: ByteStore> Drop for EntryReader<'_, S> {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.archive.pool.release(buf);
    }
}

// ── Writing streams ──────────────────────────────────────────────────────────

/// Sequential writer for a pending entry.
///
/// Store variant: accumulates into a caller-chosen buffer; a payload that
/// fits entirely in the buffer is compressed and placed first-fit, while
/// larger payloads stream raw, growing at end-of-file.  Chunked variant:
/// the buffer is exactly one chunk long; every time it fills, one chunk is
/// compressed and appended to the pending chunk list in write order.
pub struct EntryWriter<'a, S: ByteStore> {
    archive:  &'a mut Archive<S>,
    kind:     EntryKind,
    buf:      Vec<u8>,
    capacity: usize,
    level:    u32,
    finished: bool,
}

impl<'a, S: ByteStore> EntryWriter<'a, S> {
    pub(crate) fn new(
        archive: &'a mut Archive<S>,
        kind: EntryKind,
        capacity: usize,
        level: u32,
    ) -> Self {
        Self {
            archive,
            kind,
            buf: Vec::with_capacity(capacity),
            capacity,
            level,
            finished: false,
        }
    }

    fn flush_buf(&mut self, final_flush: bool) -> crate::error::Result<()> {
        match self.kind {
            EntryKind::Store => {
                self.archive
                    .write_store_bytes(&self.buf, self.level, final_flush)?
            }
            EntryKind::Chunked => {
                self.archive
                    .write_chunk_bytes(&self.buf, self.level, final_flush)?
            }
        }
        self.buf.clear();
        Ok(())
    }

    fn finish_inner(&mut self) -> crate::error::Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.flush_buf(true)
    }

    /// Flush the remainder and commit the entry to the directory.  Until
    /// this returns, the entry is invisible to lookups.
    pub fn finish(mut self) -> crate::error::Result<()> {
        self.finish_inner()
    }

    /// Discard the pending entry.  Bytes already written are returned to
    /// the free list; the directory is untouched.
    pub fn abandon(mut self) {
        self.finished = true;
        self.archive.abandon_pending();
    }
}

impl<S: ByteStore> Write for EntryWriter<'_, S> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut consumed = 0;
        while consumed < data.len() {
            let space = self.capacity - self.buf.len();
            let take = space.min(data.len() - consumed);
            self.buf.extend_from_slice(&data[consumed..consumed + take]);
            consumed += take;
            if self.buf.len() == self.capacity {
                self.flush_buf(false).map_err(to_io)?;
            }
        }
        Ok(data.len())
    }

    /// No-op: a partial buffer cannot be flushed early without emitting a
    /// short chunk.  The remainder goes out on [`EntryWriter::finish`].
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: ByteStore> Drop for EntryWriter<'_, S> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.finish_inner();
        }
    }
}

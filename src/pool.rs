//! Reusable byte buffers for entry streams.
//!
//! Chunked readers decompress every chunk into a scratch buffer whose size
//! varies chunk to chunk; recycling those buffers keeps steady-state reads
//! allocation-free.  The pool counts checked-out buffers so stream teardown
//! can be audited: after any stream's full lifecycle — success, error, or
//! early drop — [`BufferPool::outstanding`] must be back where it started.

/// Buffers kept for reuse beyond this count are dropped on return.
const MAX_POOLED: usize = 8;

#[derive(Debug, Default)]
pub struct BufferPool {
    free:        Vec<Vec<u8>>,
    outstanding: usize,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check out a buffer of exactly `len` zero-initialised bytes.
    pub fn acquire(&mut self, len: usize) -> Vec<u8> {
        self.outstanding += 1;
        let mut buf = self.free.pop().unwrap_or_default();
        buf.clear();
        buf.resize(len, 0);
        buf
    }

    /// Return a checked-out buffer.  The contents are discarded.
    pub fn release(&mut self, mut buf: Vec<u8>) {
        self.outstanding = self.outstanding.saturating_sub(1);
        if self.free.len() < MAX_POOLED {
            buf.clear();
            self.free.push(buf);
        }
    }

    /// Number of buffers currently checked out.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }
}

//! High-level [`Archive`] API — the primary embedding surface.
//!
//! ```no_run
//! use tqarc::{ArcOptions, Archive, EntryKind, Format, MemStore, OpenMode};
//!
//! // Create in memory, add an entry, close.
//! let opts = ArcOptions { format: Some(Format::Gd), ..Default::default() };
//! let mut ar = Archive::open(MemStore::new(), OpenMode::Create, opts)?;
//! ar.add_bytes("readme.txt", EntryKind::Chunked, b"Hello, ARC!")?;
//! let store = ar.close()?;
//!
//! // Reopen and read back.
//! let mut ar = Archive::open(store, OpenMode::Read, ArcOptions::default())?;
//! let data = ar.read_bytes("readme.txt")?;
//! assert_eq!(data, b"Hello, ARC!");
//! # Ok::<(), tqarc::ArcError>(())
//! ```
//!
//! # Concurrency and resource model
//! Single-threaded and synchronous: one logical caller owns the archive at
//! a time, with no internal locking.  Entry streams borrow the archive
//! mutably, so the compiler statically guarantees that no stream is still
//! open when the directory is flushed and that no mutation can relocate
//! data under an in-flight reader.
//!
//! # In-place mutation and safe-write
//! Mutations write directly into the container.  A process killed mid-write
//! can therefore leave a truncated file behind; the mitigation is to
//! operate on a [`MemStore`](crate::store::MemStore) copy of the container
//! and atomically replace the real file only after every operation
//! succeeded.  The CLI does exactly that.

use chrono::Utc;
use tracing::debug;

use crate::alloc::{check_coverage, FreeList};
use crate::codec::{pack_bytes, unpack_bytes, unpack_into, Algorithm};
use crate::entry::{
    lookup_key, normalize_name, Chunk, Directory, Entry, EntryId, EntryKind,
};
use crate::error::{ArcError, Result};
use crate::format::Format;
use crate::hash::Adler32;
use crate::header::{
    encode_footer, encode_tables, parse_directory, ArcHeader, DEFAULT_CHUNK_LENGTH,
    DEFAULT_HEADER_AREA_LEN, FLAG_CASE_PRESERVE, FOOTER_SIZE, HEADER_SIZE,
};
use crate::layout::{layout_info, LayoutInfo};
use crate::pool::BufferPool;
use crate::store::ByteStore;
use crate::stream::{EntryReader, EntryWriter};

/// Default store-writer buffer; payloads up to this size are compressed
/// whole and placed first-fit, larger ones stream raw.
pub const DEFAULT_STORE_BUFFER: usize = 64 * 1024;

/// Default zlib level.  Ignored by LZ4 formats.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

// ── Options and mode ─────────────────────────────────────────────────────────

/// Configuration for [`Archive::open`].
#[derive(Debug, Clone)]
pub struct ArcOptions {
    /// Required in [`OpenMode::Create`]; ignored otherwise (existing
    /// archives carry their format in the header).
    pub format:          Option<Format>,
    /// 0 = store raw … 9 = maximum (zlib scale).
    pub level:           u32,
    pub chunk_length:    u32,
    pub header_area_len: u32,
    pub preserve_case:   bool,
}

impl Default for ArcOptions {
    fn default() -> Self {
        Self {
            format:          None,
            level:           DEFAULT_COMPRESSION_LEVEL,
            chunk_length:    DEFAULT_CHUNK_LENGTH,
            header_area_len: DEFAULT_HEADER_AREA_LEN,
            preserve_case:   false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// No mutation permitted.
    Read,
    /// Parse an existing archive for reading and writing.
    Update,
    /// Initialise a fresh archive; requires an explicit format.
    Create,
}

// ── Pending entry ────────────────────────────────────────────────────────────

/// State of a writing stream that has not yet been finalized.  The entry
/// stays out of the directory until the final flush, so an interrupted
/// write never leaves a half-referenced entry visible to lookups.
struct PendingEntry {
    /// Slot to replace on finalize; the old entry stays live (and its
    /// region allocated) until the new one is durably referenced.
    replace:          Option<EntryId>,
    name:             String,
    kind:             EntryKind,
    hash:             Adler32,
    decompressed_len: u64,
    compressed_len:   u64,
    /// Store region as (start, bytes written).
    region:           Option<(u64, u64)>,
    chunks:           Vec<Chunk>,
}

impl PendingEntry {
    fn new(name: String, kind: EntryKind, replace: Option<EntryId>) -> Self {
        Self {
            replace,
            name,
            kind,
            hash: Adler32::new(),
            decompressed_len: 0,
            compressed_len: 0,
            region: None,
            chunks: Vec::new(),
        }
    }
}

// ── Archive ──────────────────────────────────────────────────────────────────

pub struct Archive<S: ByteStore> {
    pub(crate) store: S,
    pub(crate) pool:  BufferPool,
    mode:             OpenMode,
    header:           ArcHeader,
    dir:              Directory,
    free:             FreeList,
    pending:          Option<PendingEntry>,
    level:            u32,
    modified:         bool,
}

impl<S: ByteStore> Archive<S> {
    // ── Lifecycle ────────────────────────────────────────────────────────────

    pub fn open(store: S, mode: OpenMode, opts: ArcOptions) -> Result<Self> {
        match mode {
            OpenMode::Create => Self::create(store, opts),
            OpenMode::Read | OpenMode::Update => Self::parse(store, mode, opts),
        }
    }

    fn create(mut store: S, opts: ArcOptions) -> Result<Self> {
        let format = opts.format.ok_or(ArcError::UnsupportedOperation(
            "Create mode requires an explicit format",
        ))?;
        let flags = if opts.preserve_case { FLAG_CASE_PRESERVE } else { 0 };
        let header = ArcHeader::new(
            format,
            opts.chunk_length.max(1),
            opts.header_area_len,
            flags,
        );
        store.set_len(0)?;
        store.set_len(header.data_start())?;
        let mut archive = Self {
            store,
            pool: BufferPool::new(),
            mode: OpenMode::Create,
            header,
            dir: Directory::new(),
            free: FreeList::new(),
            pending: None,
            level: opts.level,
            modified: true,
        };
        // Leave a valid empty archive behind even if the caller never
        // mutates it.
        archive.flush()?;
        debug!(format = format.name(), "created archive");
        Ok(archive)
    }

    fn parse(mut store: S, mode: OpenMode, opts: ArcOptions) -> Result<Self> {
        let mut header_bytes = [0u8; HEADER_SIZE as usize];
        store
            .read_exact_at(&mut header_bytes, 0)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => {
                    ArcError::Corrupt("file too short for header".into())
                }
                _ => ArcError::Io(e),
            })?;
        let header = ArcHeader::from_bytes(&header_bytes)?;

        let file_len = store.len()?;
        if file_len < header.data_start() {
            return Err(ArcError::Corrupt("file shorter than header area".into()));
        }

        let mut blob = vec![0u8; header.dir_size as usize];
        store
            .read_exact_at(&mut blob, header.dir_offset as u64)
            .map_err(|_| ArcError::Corrupt("truncated directory area".into()))?;
        let (slots, segments) = parse_directory(&header, &blob, &header_bytes)?;
        let dir = Directory::from_slots(slots)?;
        let free = FreeList::from_segments(segments).map_err(ArcError::Corrupt)?;

        // Live ranges and free segments must tile the data region exactly.
        let mut ranges: Vec<(u64, u64)> = Vec::new();
        for (_, entry) in dir.iter() {
            ranges.extend(entry.data_ranges());
        }
        for seg in free.segments() {
            ranges.push((seg.offset, seg.length));
        }
        check_coverage(ranges, header.data_start(), file_len).map_err(ArcError::Corrupt)?;

        debug!(
            format = header.format.name(),
            entries = dir.len(),
            free_segments = free.count(),
            "opened archive"
        );
        Ok(Self {
            store,
            pool: BufferPool::new(),
            mode,
            header,
            dir,
            free,
            pending: None,
            level: opts.level,
            modified: false,
        })
    }

    /// Serialize the directory and free list into the header area and
    /// flush the byte store.  Fails with `HeaderAreaTooSmall` when the
    /// directory has outgrown the reserve chosen at creation.
    pub fn flush(&mut self) -> Result<()> {
        let (entry_table, free_table) = encode_tables(self.header.format, &self.dir, &self.free);
        let dir_size = entry_table.len() + free_table.len() + FOOTER_SIZE;
        if dir_size as u64 > self.header.header_area_len as u64 {
            return Err(ArcError::HeaderAreaTooSmall {
                needed:   dir_size as u64,
                reserved: self.header.header_area_len as u64,
            });
        }
        self.header.dir_count = self.dir.slots().len() as u32;
        self.header.dir_size = dir_size as u32;

        let header_bytes = self.header.to_bytes();
        let footer = encode_footer(&entry_table, &free_table, &header_bytes);

        let base = self.header.dir_offset as u64;
        self.store.write_at(&header_bytes, 0)?;
        self.store.write_at(&entry_table, base)?;
        self.store.write_at(&free_table, base + entry_table.len() as u64)?;
        self.store.write_at(
            &footer,
            base + entry_table.len() as u64 + free_table.len() as u64,
        )?;
        self.store.flush()?;
        self.modified = false;
        debug!(dir_size, entries = self.dir.len(), "flushed directory");
        Ok(())
    }

    /// Flush if modified and hand back the underlying byte store.
    ///
    /// Dropping an archive without closing discards unflushed directory
    /// changes; entry payload bytes already written stay in the store but
    /// are not referenced until a flush.
    pub fn close(mut self) -> Result<S> {
        if self.modified {
            self.flush()?;
        }
        Ok(self.store)
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn format(&self) -> Format {
        self.header.format
    }

    pub fn algorithm(&self) -> Algorithm {
        self.header.format.algorithm()
    }

    pub fn chunk_length(&self) -> u32 {
        self.header.chunk_length
    }

    pub fn preserve_case(&self) -> bool {
        self.header.preserve_case()
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Live entries in directory order; stable across calls until the next
    /// mutation.
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.dir.iter().map(|(_, entry)| entry)
    }

    pub fn entry_count(&self) -> usize {
        self.dir.len()
    }

    pub fn try_entry(&self, name: &str) -> Option<&Entry> {
        let key = lookup_key(name, self.header.preserve_case());
        self.dir.find(&key).and_then(|id| self.dir.entry(id))
    }

    pub fn entry(&self, name: &str) -> Result<&Entry> {
        self.try_entry(name)
            .ok_or_else(|| ArcError::EntryNotFound(name.to_string()))
    }

    /// Diagnostic snapshot of the current layout.
    pub fn layout_info(&mut self) -> Result<LayoutInfo> {
        let file_len = self.store.len()?;
        Ok(layout_info(&self.dir, &self.free, file_len))
    }

    /// Scratch buffers currently checked out by open streams.  Returns to
    /// zero after every stream lifecycle, including error paths.
    pub fn outstanding_buffers(&self) -> usize {
        self.pool.outstanding()
    }

    // ── Reading ──────────────────────────────────────────────────────────────

    /// Open a sequential reading stream over an entry's decompressed
    /// payload.
    pub fn open_read(&mut self, name: &str) -> Result<EntryReader<'_, S>> {
        let entry = self.entry(name)?.clone();
        Ok(EntryReader::new(self, &entry))
    }

    /// Read an entire entry payload into memory.
    pub fn read_bytes(&mut self, name: &str) -> Result<Vec<u8>> {
        let entry = self.entry(name)?.clone();
        self.read_entry_payload(&entry)
    }

    fn read_entry_payload(&mut self, entry: &Entry) -> Result<Vec<u8>> {
        let alg = self.algorithm();
        match entry.kind {
            EntryKind::Store => {
                let mut comp = vec![0u8; entry.compressed_len as usize];
                self.store.read_exact_at(&mut comp, entry.offset)?;
                Ok(unpack_bytes(alg, &comp, entry.decompressed_len as usize)?)
            }
            EntryKind::Chunked => {
                let mut out = vec![0u8; entry.decompressed_len as usize];
                let mut pos = 0usize;
                let mut comp = Vec::new();
                for chunk in &entry.chunks {
                    comp.resize(chunk.compressed_len as usize, 0);
                    self.store.read_exact_at(&mut comp, chunk.offset)?;
                    let end = pos + chunk.decompressed_len as usize;
                    unpack_into(alg, &comp, &mut out[pos..end])?;
                    pos = end;
                }
                Ok(out)
            }
        }
    }

    /// Stream an entry through an Adler-32 accumulator and compare against
    /// the directory hash.  A mismatch is reported as `false`, not an
    /// error, so batch verification can continue past failures.
    pub fn verify_entry(&mut self, name: &str) -> Result<bool> {
        let expected = self.entry(name)?.hash;
        let mut hasher = Adler32::new();
        let mut reader = self.open_read(name)?;
        let mut block = [0u8; 16 * 1024];
        loop {
            let n = std::io::Read::read(&mut reader, &mut block)?;
            if n == 0 {
                break;
            }
            hasher.update(&block[..n]);
        }
        drop(reader);
        Ok(hasher.finalize() == expected)
    }

    // ── Writing ──────────────────────────────────────────────────────────────

    fn ensure_writable(&self) -> Result<()> {
        if self.mode == OpenMode::Read {
            return Err(ArcError::UnsupportedOperation("archive opened read-only"));
        }
        Ok(())
    }

    fn begin_pending(
        &mut self,
        name: &str,
        kind: EntryKind,
        replace: Option<EntryId>,
    ) -> Result<()> {
        self.ensure_writable()?;
        if self.pending.is_some() {
            return Err(ArcError::UnsupportedOperation(
                "another write is already in progress",
            ));
        }
        let normalized = normalize_name(name, self.header.preserve_case())?;
        match (replace, self.dir.find(&normalized)) {
            (None, Some(_)) => return Err(ArcError::EntryAlreadyExists(normalized)),
            _ => {}
        }
        self.pending = Some(PendingEntry::new(normalized, kind, replace));
        Ok(())
    }

    /// Begin adding a new entry; fails with `EntryAlreadyExists` if the
    /// normalized name is taken.  The entry becomes visible only when the
    /// returned writer is finished.
    pub fn begin_add(&mut self, name: &str, kind: EntryKind) -> Result<EntryWriter<'_, S>> {
        self.begin_add_with_capacity(name, kind, DEFAULT_STORE_BUFFER)
    }

    /// [`Archive::begin_add`] with an explicit store-writer buffer size.
    /// Chunked writers always buffer exactly one chunk.
    pub fn begin_add_with_capacity(
        &mut self,
        name: &str,
        kind: EntryKind,
        capacity: usize,
    ) -> Result<EntryWriter<'_, S>> {
        self.begin_pending(name, kind, None)?;
        let capacity = match kind {
            EntryKind::Store   => capacity.max(1),
            EntryKind::Chunked => self.header.chunk_length as usize,
        };
        let level = self.level;
        Ok(EntryWriter::new(self, kind, capacity, level))
    }

    /// Begin replacing an entry (or adding it, if absent).  The old
    /// payload stays referenced until the new writer finishes, so an
    /// abandoned replace leaves the original entry intact.
    pub fn begin_replace(&mut self, name: &str, kind: EntryKind) -> Result<EntryWriter<'_, S>> {
        self.ensure_writable()?;
        let normalized = normalize_name(name, self.header.preserve_case())?;
        let replace = self.dir.find(&normalized);
        self.begin_pending(&normalized, kind, replace)?;
        let capacity = match kind {
            EntryKind::Store   => DEFAULT_STORE_BUFFER,
            EntryKind::Chunked => self.header.chunk_length as usize,
        };
        let level = self.level;
        Ok(EntryWriter::new(self, kind, capacity, level))
    }

    /// Add a whole payload at once.  Store payloads take the sized path:
    /// compressed as one range and placed first-fit.
    pub fn add_bytes(&mut self, name: &str, kind: EntryKind, data: &[u8]) -> Result<()> {
        self.begin_pending(name, kind, None)?;
        let result = self.write_payload(kind, data);
        if result.is_err() {
            self.abandon_pending();
        }
        result
    }

    /// Replace a whole payload at once; adds the entry if absent.  When
    /// both the old and new entry are Store and the new compressed payload
    /// fits the old region, the region is reused in place and only the
    /// trailing excess is freed.
    pub fn replace_bytes(&mut self, name: &str, kind: EntryKind, data: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        let normalized = normalize_name(name, self.header.preserve_case())?;
        let replace = self.dir.find(&normalized);

        if let Some(id) = replace {
            if kind == EntryKind::Store {
                if let Some(old) = self.dir.entry(id).filter(|e| e.kind == EntryKind::Store) {
                    let old_offset = old.offset;
                    let old_comp = old.compressed_len;
                    let packed = pack_bytes(self.algorithm(), data, self.level)?;
                    if !packed.is_empty() && packed.len() as u64 <= old_comp {
                        self.store.write_at(&packed, old_offset)?;
                        let excess = old_comp - packed.len() as u64;
                        self.free.release(old_offset + packed.len() as u64, excess);
                        let entry = Entry {
                            name:             normalized,
                            kind:             EntryKind::Store,
                            offset:           old_offset,
                            decompressed_len: data.len() as u64,
                            compressed_len:   packed.len() as u64,
                            hash:             crate::hash::adler32(data),
                            timestamp:        Utc::now().timestamp(),
                            chunks:           Vec::new(),
                        };
                        self.dir.replace(id, entry)?;
                        self.modified = true;
                        return Ok(());
                    }
                }
            }
        }

        self.begin_pending(&normalized, kind, replace)?;
        let result = self.write_payload(kind, data);
        if result.is_err() {
            self.abandon_pending();
        }
        result
    }

    fn write_payload(&mut self, kind: EntryKind, data: &[u8]) -> Result<()> {
        let level = self.level;
        match kind {
            EntryKind::Store => self.write_store_bytes(data, level, true),
            EntryKind::Chunked => {
                let chunk_length = self.header.chunk_length as usize;
                for chunk in data.chunks(chunk_length) {
                    self.write_chunk_bytes(chunk, level, false)?;
                }
                self.write_chunk_bytes(&[], level, true)
            }
        }
    }

    /// Remove an entry: its directory slot becomes a tombstone and its
    /// data region is returned to the free list with neighbour coalescing.
    pub fn remove(&mut self, name: &str) -> Result<()> {
        self.ensure_writable()?;
        let key = lookup_key(name, self.header.preserve_case());
        let id = self
            .dir
            .find(&key)
            .ok_or_else(|| ArcError::EntryNotFound(name.to_string()))?;
        let entry = self.dir.remove(id)?;
        for (offset, length) in entry.data_ranges() {
            self.free.release(offset, length);
        }
        self.modified = true;
        Ok(())
    }

    // ── Internal write machinery ─────────────────────────────────────────────

    /// First-fit from the free list, or append at end-of-file.
    fn alloc_or_append(&mut self, size: u64) -> Result<u64> {
        if size == 0 {
            return Ok(0);
        }
        if let Some(offset) = self.free.allocate(size) {
            return Ok(offset);
        }
        let end = self.store.len()?;
        self.store.set_len(end + size)?;
        Ok(end)
    }

    pub(crate) fn write_store_bytes(
        &mut self,
        bytes: &[u8],
        level: u32,
        final_flush: bool,
    ) -> Result<()> {
        let mut pend = self.pending.take().ok_or(ArcError::UnsupportedOperation(
            "no write in progress",
        ))?;
        let result = self.store_flush_inner(&mut pend, bytes, level, final_flush);
        self.settle_pending(pend, result, final_flush)
    }

    pub(crate) fn write_chunk_bytes(
        &mut self,
        bytes: &[u8],
        level: u32,
        final_flush: bool,
    ) -> Result<()> {
        let mut pend = self.pending.take().ok_or(ArcError::UnsupportedOperation(
            "no write in progress",
        ))?;
        let result = self.chunk_flush_inner(&mut pend, bytes, level);
        self.settle_pending(pend, result, final_flush)
    }

    fn settle_pending(
        &mut self,
        pend: PendingEntry,
        result: Result<()>,
        final_flush: bool,
    ) -> Result<()> {
        match result {
            Ok(()) if final_flush => self.finalize_pending(pend),
            Ok(()) => {
                self.pending = Some(pend);
                Ok(())
            }
            Err(e) if final_flush => {
                // The writer is consumed by its final flush, so nobody is
                // left to call abandon: return the regions ourselves.
                self.pending = Some(pend);
                self.abandon_pending();
                Err(e)
            }
            Err(e) => {
                // Restore so abandon can return already-written regions.
                self.pending = Some(pend);
                Err(e)
            }
        }
    }

    fn store_flush_inner(
        &mut self,
        pend: &mut PendingEntry,
        bytes: &[u8],
        level: u32,
        final_flush: bool,
    ) -> Result<()> {
        pend.hash.update(bytes);
        pend.decompressed_len += bytes.len() as u64;

        if pend.region.is_none() && final_flush {
            // Whole payload fit in the writer buffer: compress as one
            // range and place first-fit.
            let packed = pack_bytes(self.algorithm(), bytes, level)?;
            if !packed.is_empty() {
                let offset = self.alloc_or_append(packed.len() as u64)?;
                // Record the region before writing so a failed write is
                // still returned to the free list on abandon.
                pend.region = Some((offset, packed.len() as u64));
                pend.compressed_len = packed.len() as u64;
                self.store.write_at(&packed, offset)?;
            }
            return Ok(());
        }

        // Streaming path: total size unknown, so the payload goes out raw
        // and the region grows at end-of-file.
        if bytes.is_empty() {
            return Ok(());
        }
        let (start, written) = match pend.region {
            Some(region) => region,
            None => (self.store.len()?, 0),
        };
        self.store.write_at(bytes, start + written)?;
        pend.region = Some((start, written + bytes.len() as u64));
        pend.compressed_len = written + bytes.len() as u64;
        Ok(())
    }

    fn chunk_flush_inner(
        &mut self,
        pend: &mut PendingEntry,
        bytes: &[u8],
        level: u32,
    ) -> Result<()> {
        pend.hash.update(bytes);
        pend.decompressed_len += bytes.len() as u64;
        if bytes.is_empty() {
            // Final flush of an exact-multiple (or empty) payload: no
            // zero-length chunk is ever emitted.
            return Ok(());
        }
        let packed = pack_bytes(self.algorithm(), bytes, level)?;
        let offset = self.alloc_or_append(packed.len() as u64)?;
        // Chunk recorded first for the same reason as the store path.
        pend.chunks.push(Chunk {
            offset,
            compressed_len:   packed.len() as u32,
            decompressed_len: bytes.len() as u32,
        });
        pend.compressed_len += packed.len() as u64;
        self.store.write_at(&packed, offset)?;
        Ok(())
    }

    /// Commit a finished pending entry to the directory.  For a replace,
    /// the new entry is installed in the old slot first and only then is
    /// the old region freed.
    fn finalize_pending(&mut self, pend: PendingEntry) -> Result<()> {
        let offset = match pend.kind {
            EntryKind::Store => pend.region.map(|(start, _)| start).unwrap_or(0),
            EntryKind::Chunked => pend.chunks.first().map(|c| c.offset).unwrap_or(0),
        };
        let entry = Entry {
            name:             pend.name,
            kind:             pend.kind,
            offset,
            decompressed_len: pend.decompressed_len,
            compressed_len:   pend.compressed_len,
            hash:             pend.hash.finalize(),
            timestamp:        Utc::now().timestamp(),
            chunks:           pend.chunks,
        };
        match pend.replace {
            Some(id) => {
                let old = self.dir.replace(id, entry)?;
                for (off, len) in old.data_ranges() {
                    self.free.release(off, len);
                }
            }
            None => {
                self.dir.insert(entry)?;
            }
        }
        self.modified = true;
        Ok(())
    }

    /// Discard the pending entry, returning any regions it allocated.
    pub(crate) fn abandon_pending(&mut self) {
        if let Some(pend) = self.pending.take() {
            let mut freed = false;
            if let Some((start, written)) = pend.region {
                if written > 0 {
                    self.free.release(start, written);
                    freed = true;
                }
            }
            for chunk in &pend.chunks {
                self.free.release(chunk.offset, chunk.compressed_len as u64);
                freed = true;
            }
            if freed {
                self.modified = true;
            }
        }
    }

    // ── Maintenance ──────────────────────────────────────────────────────────

    /// Decompress and recompress every chunk of every chunked entry at
    /// `level`.  With `recompress_store`, store entries are converted to
    /// chunked form when that makes them smaller.
    pub fn repack(&mut self, level: u32, recompress_store: bool) -> Result<()> {
        self.ensure_writable()?;
        let ids: Vec<EntryId> = self.dir.iter().map(|(id, _)| id).collect();
        for id in ids {
            let entry = match self.dir.entry(id) {
                Some(e) => e.clone(),
                None => continue,
            };
            match entry.kind {
                EntryKind::Chunked => {
                    if entry.chunks.is_empty() {
                        continue;
                    }
                    let payload = self.read_entry_payload(&entry)?;
                    for chunk in &entry.chunks {
                        self.free.release(chunk.offset, chunk.compressed_len as u64);
                    }
                    let (chunks, compressed_len) = self.write_chunk_payload(&payload, level)?;
                    if let Some(e) = self.dir.entry_mut(id) {
                        e.offset = chunks.first().map(|c| c.offset).unwrap_or(0);
                        e.chunks = chunks;
                        e.compressed_len = compressed_len;
                    }
                    self.modified = true;
                }
                EntryKind::Store => {
                    if !recompress_store || entry.decompressed_len == 0 {
                        continue;
                    }
                    let payload = self.read_entry_payload(&entry)?;
                    let chunk_length = self.header.chunk_length as usize;
                    let alg = self.algorithm();
                    let mut packed_total = 0u64;
                    for chunk in payload.chunks(chunk_length) {
                        packed_total += pack_bytes(alg, chunk, level)?.len() as u64;
                    }
                    if packed_total >= entry.compressed_len {
                        continue;
                    }
                    self.free.release(entry.offset, entry.compressed_len);
                    let (chunks, compressed_len) = self.write_chunk_payload(&payload, level)?;
                    if let Some(e) = self.dir.entry_mut(id) {
                        e.kind = EntryKind::Chunked;
                        e.offset = chunks.first().map(|c| c.offset).unwrap_or(0);
                        e.chunks = chunks;
                        e.compressed_len = compressed_len;
                    }
                    self.modified = true;
                }
            }
        }
        debug!(level, "repacked archive");
        Ok(())
    }

    /// Split `payload` into chunks, compress and place each one.
    fn write_chunk_payload(&mut self, payload: &[u8], level: u32) -> Result<(Vec<Chunk>, u64)> {
        let chunk_length = self.header.chunk_length as usize;
        let alg = self.algorithm();
        let mut chunks = Vec::new();
        let mut total = 0u64;
        for chunk in payload.chunks(chunk_length) {
            let packed = pack_bytes(alg, chunk, level)?;
            let offset = self.alloc_or_append(packed.len() as u64)?;
            self.store.write_at(&packed, offset)?;
            chunks.push(Chunk {
                offset,
                compressed_len:   packed.len() as u32,
                decompressed_len: chunk.len() as u32,
            });
            total += packed.len() as u64;
        }
        Ok((chunks, total))
    }

    /// Rewrite all live entries contiguously in ascending current-offset
    /// order, eliminating every free segment and producing ascending,
    /// contiguous chunk order.  Tombstones are dropped (directory
    /// compaction).  The whole data region is buffered in memory first, so
    /// no live byte is overwritten before it has been read.
    pub fn defragment(&mut self) -> Result<()> {
        self.ensure_writable()?;
        let file_len = self.store.len()?;
        let info = layout_info(&self.dir, &self.free, file_len);
        if !info.can_defragment && !info.can_compact && info.removed_entry_count == 0 {
            return Ok(());
        }

        self.dir.compact();

        let mut order: Vec<(u64, u32)> = self
            .dir
            .iter()
            .map(|(id, entry)| (entry.offset, id.0))
            .collect();
        order.sort_by_key(|&(offset, _)| offset);

        // Read every live entry's compressed bytes before moving anything.
        let mut blobs: Vec<(u32, Vec<u8>)> = Vec::with_capacity(order.len());
        for (_, idx) in order {
            let id = EntryId(idx);
            let entry = match self.dir.entry(id) {
                Some(e) => e.clone(),
                None => continue,
            };
            let mut bytes = Vec::with_capacity(entry.compressed_len as usize);
            for (offset, length) in entry.data_ranges() {
                let start = bytes.len();
                bytes.resize(start + length as usize, 0);
                self.store.read_exact_at(&mut bytes[start..], offset)?;
            }
            blobs.push((idx, bytes));
        }

        self.free.clear();
        let mut cursor = self.header.data_start();
        for (idx, bytes) in blobs {
            self.store.write_at(&bytes, cursor)?;
            if let Some(entry) = self.dir.entry_mut(EntryId(idx)) {
                match entry.kind {
                    EntryKind::Store => {
                        entry.offset = if entry.compressed_len > 0 { cursor } else { 0 };
                    }
                    EntryKind::Chunked => {
                        let mut running = cursor;
                        for chunk in &mut entry.chunks {
                            chunk.offset = running;
                            running += chunk.compressed_len as u64;
                        }
                        entry.offset = entry.chunks.first().map(|c| c.offset).unwrap_or(0);
                    }
                }
            }
            cursor += bytes.len() as u64;
        }
        self.store.set_len(cursor)?;
        self.modified = true;
        debug!(new_len = cursor, "defragmented archive");
        Ok(())
    }

    /// Truncate trailing free space.  Never moves live data.
    pub fn compact(&mut self) -> Result<()> {
        self.ensure_writable()?;
        let file_len = self.store.len()?;
        if let Some(seg) = self.free.take_trailing(file_len) {
            self.store.set_len(seg.offset)?;
            self.modified = true;
            debug!(reclaimed = seg.length, "compacted archive");
        }
        Ok(())
    }
}

//! On-disk layout: fixed header, entry records, free table, footer.
//!
//! All binary I/O is strictly little-endian.  The file begins with a fixed
//! 32-byte header, followed by a reserved header area of
//! `header_area_len` bytes into which the directory blob is serialized on
//! every flush.  Reserving the area up front lets metadata grow without
//! relocating entry data on each change; when the blob outgrows the
//! reserve, flushing fails with `HeaderAreaTooSmall`.
//!
//! Directory blob = entry table ‖ free table ‖ 12-byte footer.  The footer
//! carries CRC32s of the two tables and of the fixed header bytes; any
//! mismatch at open is fatal.  There is no whole-file checksum: entry
//! payloads are rewritten in place, so such a digest would go stale on
//! every data write.  Payload integrity is covered per entry by the
//! Adler-32 hashes instead.
//!
//! Entry record: `kind u8` (0 = tombstone, 1 = store, 2 = chunked).  A
//! tombstone record is `kind` plus the removed entry's chunk count.  Live
//! records continue with the length-prefixed single-byte name, offset,
//! decompressed length, compressed length, timestamp, and Adler-32 hash;
//! chunked records append the chunk table.  Formats without
//! `has_decompressed_length` omit the per-chunk decompressed length and
//! derive it from the archive chunk size.

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::alloc::{FreeList, FreeSegment};
use crate::entry::{normalize_name, Chunk, Directory, Entry, EntryKind, Slot};
use crate::error::{ArcError, Result};
use crate::format::{Format, MAGIC};

pub const HEADER_SIZE: u64 = 32;
pub const FOOTER_SIZE: usize = 12;

/// Format default: 256 KiB chunks.
pub const DEFAULT_CHUNK_LENGTH: u32 = 262_144;
/// Room for a few thousand entries before `HeaderAreaTooSmall`.
pub const DEFAULT_HEADER_AREA_LEN: u32 = 262_144;

pub const FLAG_CASE_PRESERVE: u32 = 1;

const KIND_TOMBSTONE: u8 = 0;
const KIND_STORE: u8 = 1;
const KIND_CHUNKED: u8 = 2;

// ── Fixed header ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ArcHeader {
    pub format:          Format,
    /// Absolute offset of the directory blob.  Always [`HEADER_SIZE`] in
    /// files this crate writes.
    pub dir_offset:      u32,
    /// Directory blob size in bytes, footer included.
    pub dir_size:        u32,
    /// Directory slot count, tombstones included.
    pub dir_count:       u32,
    pub chunk_length:    u32,
    pub header_area_len: u32,
    pub flags:           u32,
}

impl ArcHeader {
    pub fn new(format: Format, chunk_length: u32, header_area_len: u32, flags: u32) -> Self {
        Self {
            format,
            dir_offset: HEADER_SIZE as u32,
            dir_size: 0,
            dir_count: 0,
            chunk_length,
            header_area_len,
            flags,
        }
    }

    pub fn preserve_case(&self) -> bool {
        self.flags & FLAG_CASE_PRESERVE != 0
    }

    /// First byte of the data region.
    pub fn data_start(&self) -> u64 {
        HEADER_SIZE + self.header_area_len as u64
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE as usize] {
        let mut out = Vec::with_capacity(HEADER_SIZE as usize);
        // Writes into Vec cannot fail.
        let _ = out.write_u16::<LittleEndian>(MAGIC);
        let _ = out.write_u16::<LittleEndian>(self.format.version());
        let _ = out.write_i32::<LittleEndian>(self.dir_offset as i32);
        let _ = out.write_i32::<LittleEndian>(self.dir_size as i32);
        let _ = out.write_i32::<LittleEndian>(self.dir_count as i32);
        let _ = out.write_u32::<LittleEndian>(self.chunk_length);
        let _ = out.write_u32::<LittleEndian>(self.header_area_len);
        let _ = out.write_u32::<LittleEndian>(self.flags);
        let _ = out.write_u32::<LittleEndian>(0); // reserved
        let mut bytes = [0u8; HEADER_SIZE as usize];
        bytes.copy_from_slice(&out);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE as usize {
            return Err(ArcError::Corrupt("file too short for header".into()));
        }
        let mut r = Cursor::new(bytes);
        let magic = r.read_u16::<LittleEndian>()?;
        let version = r.read_u16::<LittleEndian>()?;
        let format =
            Format::from_pair(magic, version).ok_or(ArcError::UnknownFormat { magic, version })?;
        let dir_offset = r.read_i32::<LittleEndian>()?;
        let dir_size = r.read_i32::<LittleEndian>()?;
        let dir_count = r.read_i32::<LittleEndian>()?;
        if dir_offset < 0 || dir_size < 0 || dir_count < 0 {
            return Err(ArcError::Corrupt("negative directory field".into()));
        }
        let chunk_length = r.read_u32::<LittleEndian>()?;
        let header_area_len = r.read_u32::<LittleEndian>()?;
        let flags = r.read_u32::<LittleEndian>()?;
        if chunk_length == 0 {
            return Err(ArcError::Corrupt("zero chunk length".into()));
        }
        if dir_offset as u64 != HEADER_SIZE {
            return Err(ArcError::Corrupt(format!(
                "unexpected directory offset {dir_offset}"
            )));
        }
        if dir_size as u64 > header_area_len as u64 {
            return Err(ArcError::Corrupt(
                "directory larger than reserved header area".into(),
            ));
        }
        Ok(Self {
            format,
            dir_offset: dir_offset as u32,
            dir_size: dir_size as u32,
            dir_count: dir_count as u32,
            chunk_length,
            header_area_len,
            flags,
        })
    }
}

// ── Serialization ────────────────────────────────────────────────────────────

fn write_entry_record(out: &mut Vec<u8>, slot: &Slot, format: Format) {
    match slot {
        Slot::Tombstone { chunk_count } => {
            let _ = out.write_u8(KIND_TOMBSTONE);
            let _ = out.write_u32::<LittleEndian>(*chunk_count);
        }
        Slot::Live(entry) => {
            let kind = match entry.kind {
                EntryKind::Store   => KIND_STORE,
                EntryKind::Chunked => KIND_CHUNKED,
            };
            let _ = out.write_u8(kind);
            let _ = out.write_u16::<LittleEndian>(entry.name.len() as u16);
            out.extend_from_slice(entry.name.as_bytes());
            let _ = out.write_u64::<LittleEndian>(entry.offset);
            let _ = out.write_u64::<LittleEndian>(entry.decompressed_len);
            let _ = out.write_u64::<LittleEndian>(entry.compressed_len);
            let _ = out.write_i64::<LittleEndian>(entry.timestamp);
            let _ = out.write_u32::<LittleEndian>(entry.hash);
            if entry.kind == EntryKind::Chunked {
                let _ = out.write_u32::<LittleEndian>(entry.chunks.len() as u32);
                for chunk in &entry.chunks {
                    let _ = out.write_u64::<LittleEndian>(chunk.offset);
                    let _ = out.write_u32::<LittleEndian>(chunk.compressed_len);
                    if format.has_decompressed_length() {
                        let _ = out.write_u32::<LittleEndian>(chunk.decompressed_len);
                    }
                }
            }
        }
    }
}

fn read_entry_record(r: &mut Cursor<&[u8]>, header: &ArcHeader) -> Result<Slot> {
    let format = header.format;
    let kind = r.read_u8().map_err(truncated)?;
    if kind == KIND_TOMBSTONE {
        let chunk_count = r.read_u32::<LittleEndian>().map_err(truncated)?;
        return Ok(Slot::Tombstone { chunk_count });
    }
    let kind = match kind {
        KIND_STORE   => EntryKind::Store,
        KIND_CHUNKED => EntryKind::Chunked,
        other => {
            return Err(ArcError::Corrupt(format!("invalid entry kind {other}")));
        }
    };
    let name_len = r.read_u16::<LittleEndian>().map_err(truncated)? as usize;
    let mut name_bytes = vec![0u8; name_len];
    r.read_exact(&mut name_bytes).map_err(truncated)?;
    let name = String::from_utf8(name_bytes)
        .map_err(|_| ArcError::Corrupt("entry name is not single-byte text".into()))?;
    if !name.is_ascii() {
        return Err(ArcError::Corrupt("entry name is not single-byte text".into()));
    }
    // Names written by this crate are always in normalized form; anything
    // else (rooted, `..` segments, wrong case under the folding policy) is
    // hostile or corrupt.  Rejecting it here keeps every consumer of the
    // directory, the CLI extractor included, safe from path traversal.
    match normalize_name(&name, header.preserve_case()) {
        Ok(ref normalized) if *normalized == name => {}
        _ => {
            return Err(ArcError::Corrupt(format!(
                "entry name {name:?} is not a valid normalized name"
            )));
        }
    }

    let offset = r.read_u64::<LittleEndian>().map_err(truncated)?;
    let decompressed_len = r.read_u64::<LittleEndian>().map_err(truncated)?;
    let compressed_len = r.read_u64::<LittleEndian>().map_err(truncated)?;
    let timestamp = r.read_i64::<LittleEndian>().map_err(truncated)?;
    let hash = r.read_u32::<LittleEndian>().map_err(truncated)?;

    let mut chunks = Vec::new();
    if kind == EntryKind::Chunked {
        let chunk_count = r.read_u32::<LittleEndian>().map_err(truncated)? as usize;
        // Bound the count by the bytes actually left in the blob before
        // reserving; a corrupt count must not drive the allocation.
        let record_len = if format.has_decompressed_length() { 16 } else { 12 };
        let remaining = r.get_ref().len().saturating_sub(r.position() as usize);
        if chunk_count > remaining / record_len {
            return Err(ArcError::Corrupt(format!(
                "chunk table of {name} overruns the directory"
            )));
        }
        chunks.reserve(chunk_count);
        for idx in 0..chunk_count {
            let chunk_offset = r.read_u64::<LittleEndian>().map_err(truncated)?;
            let chunk_comp = r.read_u32::<LittleEndian>().map_err(truncated)?;
            let chunk_decomp = if format.has_decompressed_length() {
                r.read_u32::<LittleEndian>().map_err(truncated)?
            } else {
                // Derived: full chunks except the trailing remainder.
                derived_chunk_len(decompressed_len, header.chunk_length, chunk_count, idx)
            };
            chunks.push(Chunk {
                offset:           chunk_offset,
                compressed_len:   chunk_comp,
                decompressed_len: chunk_decomp,
            });
        }
        let sum: u64 = chunks.iter().map(|c| c.decompressed_len as u64).sum();
        if sum != decompressed_len {
            return Err(ArcError::Corrupt(format!(
                "chunk lengths of {name} sum to {sum}, entry says {decompressed_len}"
            )));
        }
    }

    Ok(Slot::Live(Entry {
        name,
        kind,
        offset,
        decompressed_len,
        compressed_len,
        hash,
        timestamp,
        chunks,
    }))
}

fn derived_chunk_len(total: u64, chunk_length: u32, chunk_count: usize, idx: usize) -> u32 {
    if idx + 1 < chunk_count {
        chunk_length
    } else {
        // A corrupt remainder fails the sum check in the caller.
        total
            .checked_sub(chunk_length as u64 * (chunk_count as u64 - 1))
            .unwrap_or(0) as u32
    }
}

fn truncated(_: std::io::Error) -> ArcError {
    ArcError::Corrupt("truncated directory".into())
}

/// Serialize the entry and free tables (footer excluded).
pub fn encode_tables(
    format: Format,
    dir: &Directory,
    free: &FreeList,
) -> (Vec<u8>, Vec<u8>) {
    let mut entry_table = Vec::new();
    for slot in dir.slots() {
        write_entry_record(&mut entry_table, slot, format);
    }

    let mut free_table = Vec::new();
    let _ = free_table.write_u32::<LittleEndian>(free.count() as u32);
    for seg in free.segments() {
        let _ = free_table.write_u64::<LittleEndian>(seg.offset);
        let _ = free_table.write_u64::<LittleEndian>(seg.length);
    }
    (entry_table, free_table)
}

/// Footer over the two tables and the final fixed header bytes.
pub fn encode_footer(entry_table: &[u8], free_table: &[u8], header_bytes: &[u8]) -> [u8; FOOTER_SIZE] {
    let mut out = [0u8; FOOTER_SIZE];
    out[0..4].copy_from_slice(&crc32fast::hash(entry_table).to_le_bytes());
    out[4..8].copy_from_slice(&crc32fast::hash(free_table).to_le_bytes());
    out[8..12].copy_from_slice(&crc32fast::hash(header_bytes).to_le_bytes());
    out
}

/// Parse and verify the directory blob read from `header.dir_offset`.
/// `header_bytes` are the raw 32 bytes the header was parsed from.
pub fn parse_directory(
    header: &ArcHeader,
    blob: &[u8],
    header_bytes: &[u8],
) -> Result<(Vec<Slot>, Vec<FreeSegment>)> {
    if blob.len() != header.dir_size as usize {
        return Err(ArcError::Corrupt("directory blob length mismatch".into()));
    }
    if blob.len() < FOOTER_SIZE {
        return Err(ArcError::Corrupt("directory blob shorter than footer".into()));
    }
    let tables = &blob[..blob.len() - FOOTER_SIZE];
    let footer = &blob[blob.len() - FOOTER_SIZE..];

    let mut r = Cursor::new(tables);
    let mut slots = Vec::with_capacity(header.dir_count as usize);
    for _ in 0..header.dir_count {
        slots.push(read_entry_record(&mut r, header)?);
    }
    let entry_end = r.position() as usize;

    let free_count = r.read_u32::<LittleEndian>().map_err(truncated)? as usize;
    let mut segments = Vec::with_capacity(free_count);
    for _ in 0..free_count {
        let offset = r.read_u64::<LittleEndian>().map_err(truncated)?;
        let length = r.read_u64::<LittleEndian>().map_err(truncated)?;
        segments.push(FreeSegment { offset, length });
    }
    if r.position() as usize != tables.len() {
        return Err(ArcError::Corrupt("trailing bytes after free table".into()));
    }

    let expected = encode_footer(&tables[..entry_end], &tables[entry_end..], header_bytes);
    if footer != expected {
        return Err(ArcError::Corrupt("directory footer checksum mismatch".into()));
    }

    Ok((slots, segments))
}

//! Entries, chunks, name normalization, and the in-memory directory.
//!
//! The directory is a slot table: removing an entry leaves a tombstone in
//! its slot until the next directory compaction (part of defragmentation),
//! so directory order stays stable across removals.  Lookups go through a
//! name map keyed by the normalized entry name.

use std::collections::HashMap;

use crate::error::{ArcError, Result};

// ── Identifiers and records ──────────────────────────────────────────────────

/// Index of a directory slot.  Never a raw pointer; entries may relocate
/// during defragmentation but their slot index is stable until compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// One contiguous, optionally compressed byte range.
    Store,
    /// Independently compressed fixed-size blocks.
    Chunked,
}

/// One compressed block of a chunked entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub offset:           u64,
    pub compressed_len:   u32,
    pub decompressed_len: u32,
}

#[derive(Debug, Clone)]
pub struct Entry {
    /// Normalized name: forward slashes, lower-cased unless the archive
    /// preserves case, never rooted, no `.`/`..` segments.
    pub name:             String,
    pub kind:             EntryKind,
    /// Start of the store region, or of the first chunk.  0 for entries
    /// that occupy no data region.
    pub offset:           u64,
    pub decompressed_len: u64,
    pub compressed_len:   u64,
    /// Adler-32 of the decompressed payload.
    pub hash:             u32,
    /// Unix seconds.
    pub timestamp:        i64,
    /// Chunk list in read order.  Empty for store entries and for
    /// zero-length chunked entries.
    pub chunks:           Vec<Chunk>,
}

impl Entry {
    /// Byte ranges this entry occupies in the data region, zero-length
    /// ranges omitted.
    pub fn data_ranges(&self) -> Vec<(u64, u64)> {
        match self.kind {
            EntryKind::Store => {
                if self.compressed_len == 0 {
                    Vec::new()
                } else {
                    vec![(self.offset, self.compressed_len)]
                }
            }
            EntryKind::Chunked => self
                .chunks
                .iter()
                .filter(|c| c.compressed_len > 0)
                .map(|c| (c.offset, c.compressed_len as u64))
                .collect(),
        }
    }
}

// ── Name normalization ───────────────────────────────────────────────────────

/// Normalize an entry name: backslashes become forward slashes and, unless
/// `preserve_case` is set, the name is lower-cased.  Rejects empty names,
/// rooted paths, `.`/`..` segments, empty segments, and characters outside
/// the single-byte range the on-disk encoding can hold.
pub fn normalize_name(raw: &str, preserve_case: bool) -> Result<String> {
    let invalid = |reason| ArcError::InvalidEntryName {
        name: raw.to_string(),
        reason,
    };

    let mut name = raw.replace('\\', "/");
    if !preserve_case {
        name.make_ascii_lowercase();
    }
    if name.is_empty() {
        return Err(invalid("empty name"));
    }
    if !name.is_ascii() {
        return Err(invalid("name is not single-byte encodable"));
    }
    if name.starts_with('/') {
        return Err(invalid("rooted path"));
    }
    if name.len() >= 2 && name.as_bytes()[1] == b':' {
        return Err(invalid("rooted path (drive prefix)"));
    }
    for segment in name.split('/') {
        if segment.is_empty() {
            return Err(invalid("empty path segment"));
        }
        if segment == "." || segment == ".." {
            return Err(invalid("'.' and '..' segments are not allowed"));
        }
    }
    Ok(name)
}

/// Lookup key for a possibly-unnormalized query name.  Applies only the
/// lossless parts of normalization; invalid names simply fail to match.
pub fn lookup_key(raw: &str, preserve_case: bool) -> String {
    let mut key = raw.replace('\\', "/");
    if !preserve_case {
        key.make_ascii_lowercase();
    }
    key
}

// ── Directory ────────────────────────────────────────────────────────────────

/// A directory slot.  Tombstones remember how many chunks the removed entry
/// had, purely for layout diagnostics.
#[derive(Debug, Clone)]
pub enum Slot {
    Live(Entry),
    Tombstone { chunk_count: u32 },
}

#[derive(Debug, Default)]
pub struct Directory {
    slots:   Vec<Slot>,
    by_name: HashMap<String, u32>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from parsed slots.  Duplicate live names are structural
    /// corruption.
    pub fn from_slots(slots: Vec<Slot>) -> Result<Self> {
        let mut by_name = HashMap::new();
        for (idx, slot) in slots.iter().enumerate() {
            if let Slot::Live(entry) = slot {
                if by_name.insert(entry.name.clone(), idx as u32).is_some() {
                    return Err(ArcError::Corrupt(format!(
                        "duplicate entry name in directory: {}",
                        entry.name
                    )));
                }
            }
        }
        Ok(Self { slots, by_name })
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Live entries in directory (slot) order.
    pub fn iter(&self) -> impl Iterator<Item = (EntryId, &Entry)> {
        self.slots.iter().enumerate().filter_map(|(idx, slot)| match slot {
            Slot::Live(entry) => Some((EntryId(idx as u32), entry)),
            Slot::Tombstone { .. } => None,
        })
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn removed_count(&self) -> usize {
        self.slots.len() - self.by_name.len()
    }

    pub fn find(&self, name: &str) -> Option<EntryId> {
        self.by_name.get(name).copied().map(EntryId)
    }

    pub fn entry(&self, id: EntryId) -> Option<&Entry> {
        match self.slots.get(id.0 as usize) {
            Some(Slot::Live(entry)) => Some(entry),
            _ => None,
        }
    }

    /// Append a new live slot.  The caller has already checked for name
    /// collisions and normalized the name.
    pub fn insert(&mut self, entry: Entry) -> Result<EntryId> {
        if self.by_name.contains_key(&entry.name) {
            return Err(ArcError::EntryAlreadyExists(entry.name));
        }
        let idx = self.slots.len() as u32;
        self.by_name.insert(entry.name.clone(), idx);
        self.slots.push(Slot::Live(entry));
        Ok(EntryId(idx))
    }

    /// Replace the contents of a live slot, keeping its position so that
    /// directory order is stable across Replace.
    pub fn replace(&mut self, id: EntryId, entry: Entry) -> Result<Entry> {
        let idx = id.0 as usize;
        let slot = self
            .slots
            .get_mut(idx)
            .ok_or_else(|| ArcError::Corrupt(format!("replace of missing slot {}", id.0)))?;
        match std::mem::replace(slot, Slot::Live(entry)) {
            Slot::Live(old) => {
                if let Slot::Live(new) = &*slot {
                    if old.name != new.name {
                        self.by_name.remove(&old.name);
                        self.by_name.insert(new.name.clone(), id.0);
                    }
                }
                Ok(old)
            }
            dead => {
                *slot = dead;
                Err(ArcError::Corrupt(format!("replace of dead slot {}", id.0)))
            }
        }
    }

    /// Turn a live slot into a tombstone and return the removed entry.
    pub fn remove(&mut self, id: EntryId) -> Result<Entry> {
        let idx = id.0 as usize;
        let slot = self
            .slots
            .get_mut(idx)
            .ok_or_else(|| ArcError::Corrupt(format!("remove of missing slot {}", id.0)))?;
        let chunk_count = match &*slot {
            Slot::Live(entry) => entry.chunks.len() as u32,
            Slot::Tombstone { .. } => {
                return Err(ArcError::Corrupt(format!("remove of dead slot {}", id.0)));
            }
        };
        match std::mem::replace(slot, Slot::Tombstone { chunk_count }) {
            Slot::Live(entry) => {
                self.by_name.remove(&entry.name);
                Ok(entry)
            }
            dead => {
                *slot = dead;
                Err(ArcError::Corrupt(format!("remove of dead slot {}", id.0)))
            }
        }
    }

    pub fn entry_mut(&mut self, id: EntryId) -> Option<&mut Entry> {
        match self.slots.get_mut(id.0 as usize) {
            Some(Slot::Live(entry)) => Some(entry),
            _ => None,
        }
    }

    /// Directory compaction: drop every tombstone.  Slot indices change;
    /// any outstanding [`EntryId`] is invalidated.
    pub fn compact(&mut self) {
        let slots = std::mem::take(&mut self.slots);
        self.by_name.clear();
        for slot in slots {
            if let Slot::Live(entry) = slot {
                let idx = self.slots.len() as u32;
                self.by_name.insert(entry.name.clone(), idx);
                self.slots.push(Slot::Live(entry));
            }
        }
    }
}

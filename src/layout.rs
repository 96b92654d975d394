//! Read-only layout diagnostics.
//!
//! Computed by scanning the directory, chunk lists, and free list; nothing
//! here mutates the archive.  `can_compact` and `can_defragment` are
//! derived from the free-segment and chunk-order invariants rather than
//! from fixtures: trailing free space means compaction would shrink the
//! file, and any interior free segment or out-of-order/non-contiguous
//! chunk list means defragmentation would change the layout.

use serde::Serialize;

use crate::alloc::FreeList;
use crate::entry::{Directory, EntryKind, Slot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LayoutInfo {
    pub entry_count:           usize,
    pub removed_entry_count:   usize,
    /// Chunk records across all slots, tombstoned entries included.
    pub chunk_count:           usize,
    /// Chunk records belonging to live entries.
    pub live_chunk_count:      usize,
    /// Chunks whose offset does not increase monotonically within their
    /// entry — the fragmentation signal.
    pub unordered_chunk_count: usize,
    pub free_segment_count:    usize,
    pub free_segment_bytes:    u64,
    pub can_compact:           bool,
    pub can_defragment:        bool,
}

pub fn layout_info(dir: &Directory, free: &FreeList, file_len: u64) -> LayoutInfo {
    let mut chunk_count = 0usize;
    let mut live_chunk_count = 0usize;
    let mut unordered = 0usize;
    let mut noncontiguous = false;

    for slot in dir.slots() {
        match slot {
            Slot::Tombstone { chunk_count: n } => chunk_count += *n as usize,
            Slot::Live(entry) => {
                chunk_count += entry.chunks.len();
                live_chunk_count += entry.chunks.len();
                if entry.kind == EntryKind::Chunked {
                    for pair in entry.chunks.windows(2) {
                        if pair[1].offset <= pair[0].offset {
                            unordered += 1;
                        }
                        if pair[1].offset != pair[0].offset + pair[0].compressed_len as u64 {
                            noncontiguous = true;
                        }
                    }
                }
            }
        }
    }

    let can_compact = free.trailing(file_len).is_some();
    let can_defragment = free.has_interior(file_len) || unordered > 0 || noncontiguous;

    LayoutInfo {
        entry_count: dir.len(),
        removed_entry_count: dir.removed_count(),
        chunk_count,
        live_chunk_count,
        unordered_chunk_count: unordered,
        free_segment_count: free.count(),
        free_segment_bytes: free.total_bytes(),
        can_compact,
        can_defragment,
    }
}

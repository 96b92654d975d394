//! Free-segment allocator for the archive data region.
//!
//! The list is kept sorted by offset and adjacent segments are merged on
//! every release, which bounds fragmentation growth without requiring a
//! full defragment after each removal.  Allocation is a first-fit scan;
//! when nothing fits the caller appends at end-of-file instead.
//!
//! Invariant maintained jointly with the directory: live entry ranges and
//! free segments are pairwise disjoint and, together with the header area,
//! tile `[0, file_len)` with no gaps.  [`check_coverage`] asserts exactly
//! that and is run on every open.

/// A reclaimed, currently unused byte range.  Owned exclusively by the
/// allocator; never referenced by entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeSegment {
    pub offset: u64,
    pub length: u64,
}

impl FreeSegment {
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

#[derive(Debug, Clone, Default)]
pub struct FreeList {
    /// Sorted by offset, pairwise disjoint, never contiguous (contiguous
    /// neighbours are merged on insert), never zero-length.
    segments: Vec<FreeSegment>,
}

impl FreeList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from parsed segments.  Overlapping segments are structural
    /// corruption and rejected; contiguous ones are merged.
    pub fn from_segments(mut segments: Vec<FreeSegment>) -> Result<Self, String> {
        segments.retain(|s| s.length > 0);
        segments.sort_by_key(|s| s.offset);
        let mut merged: Vec<FreeSegment> = Vec::with_capacity(segments.len());
        for seg in segments {
            match merged.last_mut() {
                Some(prev) if seg.offset < prev.end() => {
                    return Err(format!(
                        "overlapping free segments at {:#x} and {:#x}",
                        prev.offset, seg.offset
                    ));
                }
                Some(prev) if seg.offset == prev.end() => prev.length += seg.length,
                _ => merged.push(seg),
            }
        }
        Ok(Self { segments: merged })
    }

    pub fn segments(&self) -> &[FreeSegment] {
        &self.segments
    }

    pub fn count(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.segments.iter().map(|s| s.length).sum()
    }

    /// First-fit: carve `size` bytes from the start of the first segment
    /// large enough.  Returns the allocated offset, or `None` when no
    /// segment fits (the caller grows the file).
    pub fn allocate(&mut self, size: u64) -> Option<u64> {
        if size == 0 {
            return None;
        }
        let idx = self.segments.iter().position(|s| s.length >= size)?;
        let offset = self.segments[idx].offset;
        if self.segments[idx].length == size {
            self.segments.remove(idx);
        } else {
            self.segments[idx].offset += size;
            self.segments[idx].length -= size;
        }
        Some(offset)
    }

    /// Return a byte range to the free list, merging with its immediate
    /// neighbours when contiguous.
    pub fn release(&mut self, offset: u64, length: u64) {
        if length == 0 {
            return;
        }
        let idx = self
            .segments
            .partition_point(|s| s.offset < offset);

        // Merge forward into the following segment.
        let merges_next = self
            .segments
            .get(idx)
            .map(|next| offset + length == next.offset)
            .unwrap_or(false);
        // Merge backward into the preceding segment.
        let merges_prev = idx > 0 && self.segments[idx - 1].end() == offset;

        match (merges_prev, merges_next) {
            (true, true) => {
                let next_len = self.segments[idx].length;
                self.segments[idx - 1].length += length + next_len;
                self.segments.remove(idx);
            }
            (true, false) => self.segments[idx - 1].length += length,
            (false, true) => {
                self.segments[idx].offset = offset;
                self.segments[idx].length += length;
            }
            (false, false) => self.segments.insert(idx, FreeSegment { offset, length }),
        }
    }

    /// The trailing segment, if the list ends flush with `file_len`.
    pub fn trailing(&self, file_len: u64) -> Option<FreeSegment> {
        self.segments.last().filter(|s| s.end() == file_len).copied()
    }

    /// Detach and return the trailing segment (see [`FreeList::trailing`]).
    pub fn take_trailing(&mut self, file_len: u64) -> Option<FreeSegment> {
        if self.trailing(file_len).is_some() {
            self.segments.pop()
        } else {
            None
        }
    }

    /// True when at least one segment is not purely trailing free space.
    pub fn has_interior(&self, file_len: u64) -> bool {
        match self.segments.len() {
            0 => false,
            1 => self.trailing(file_len).is_none(),
            _ => true,
        }
    }

    pub fn clear(&mut self) {
        self.segments.clear();
    }
}

/// Verify that `ranges` (live entry regions plus free segments) are
/// pairwise disjoint and exactly tile `[start, end)`.  Zero-length ranges
/// are ignored.
pub fn check_coverage(
    mut ranges: Vec<(u64, u64)>,
    start: u64,
    end: u64,
) -> Result<(), String> {
    ranges.retain(|&(_, len)| len > 0);
    ranges.sort_by_key(|&(off, _)| off);
    let mut cursor = start;
    for (off, len) in ranges {
        if off < cursor {
            return Err(format!(
                "overlapping regions near offset {off:#x} (expected >= {cursor:#x})"
            ));
        }
        if off > cursor {
            return Err(format!(
                "uncovered gap [{cursor:#x}, {off:#x}) in data region"
            ));
        }
        cursor = off + len;
    }
    if cursor != end {
        return Err(format!(
            "data region ends at {cursor:#x} but file length is {end:#x}"
        ));
    }
    Ok(())
}

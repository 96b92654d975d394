use proptest::prelude::*;

use tqarc::alloc::{check_coverage, FreeList, FreeSegment};

#[test]
fn test_first_fit_and_coalescing() {
    let mut free = FreeList::new();
    free.release(100, 50);
    free.release(300, 20);

    // First fit: the 50-byte segment at 100 wins for a 40-byte request.
    assert_eq!(free.allocate(40), Some(100));
    assert_eq!(free.total_bytes(), 30);

    // Exact fit consumes the segment entirely.
    assert_eq!(free.allocate(10), Some(140));
    assert_eq!(free.allocate(20), Some(300));
    assert!(free.is_empty());
}

#[test]
fn test_release_merges_neighbours() {
    let mut free = FreeList::new();
    free.release(100, 10);
    free.release(120, 10);
    assert_eq!(free.count(), 2);

    // The middle release bridges both neighbours into one segment.
    free.release(110, 10);
    assert_eq!(free.count(), 1);
    assert_eq!(free.segments()[0], FreeSegment { offset: 100, length: 30 });
}

#[test]
fn test_trailing_detection() {
    let mut free = FreeList::new();
    free.release(50, 10);
    free.release(200, 100);

    assert!(free.trailing(300).is_some());
    assert!(free.has_interior(300));

    let seg = free.take_trailing(300).unwrap();
    assert_eq!(seg, FreeSegment { offset: 200, length: 100 });
    assert!(free.trailing(300).is_none());

    // A single segment flush with the end is not interior.
    let mut free = FreeList::new();
    free.release(200, 100);
    assert!(!free.has_interior(300));
}

#[test]
fn test_from_segments_rejects_overlap() {
    let segs = vec![
        FreeSegment { offset: 10, length: 20 },
        FreeSegment { offset: 25, length: 10 },
    ];
    assert!(FreeList::from_segments(segs).is_err());

    // Contiguous segments are legal and get merged.
    let segs = vec![
        FreeSegment { offset: 10, length: 20 },
        FreeSegment { offset: 30, length: 10 },
    ];
    let free = FreeList::from_segments(segs).unwrap();
    assert_eq!(free.count(), 1);
    assert_eq!(free.total_bytes(), 30);
}

#[test]
fn test_check_coverage() {
    // Exact tiling passes.
    assert!(check_coverage(vec![(32, 10), (42, 8)], 32, 50).is_ok());
    // Zero-length ranges are ignored.
    assert!(check_coverage(vec![(32, 10), (0, 0), (42, 8)], 32, 50).is_ok());
    // Empty data region.
    assert!(check_coverage(vec![], 32, 32).is_ok());

    // Gap, overlap, and short tail all fail.
    assert!(check_coverage(vec![(32, 10), (44, 6)], 32, 50).is_err());
    assert!(check_coverage(vec![(32, 10), (40, 10)], 32, 50).is_err());
    assert!(check_coverage(vec![(32, 10)], 32, 50).is_err());
}

proptest! {
    /// Random allocate/release traffic keeps the free list sorted,
    /// disjoint, and conserves every byte.
    #[test]
    fn prop_free_list_stays_consistent(ops in prop::collection::vec((0u8..2, 1u64..100), 1..200)) {
        let mut free = FreeList::new();
        // Allocations come out of one big donor segment so releases can
        // never overlap an existing free range.
        free.release(0, 1 << 20);
        let mut held: Vec<(u64, u64)> = Vec::new();

        for (op, size) in ops {
            match op {
                0 => {
                    if let Some(offset) = free.allocate(size) {
                        held.push((offset, size));
                    }
                }
                _ => {
                    if let Some((offset, size)) = held.pop() {
                        free.release(offset, size);
                    }
                }
            }

            // Sorted, disjoint, and never contiguous (merged on release).
            let segs = free.segments();
            for pair in segs.windows(2) {
                prop_assert!(pair[0].end() < pair[1].offset);
            }
            for seg in segs {
                prop_assert!(seg.length > 0);
            }

            // Byte conservation: held + free covers the donor exactly.
            let mut ranges: Vec<(u64, u64)> = held.clone();
            ranges.extend(segs.iter().map(|s| (s.offset, s.length)));
            prop_assert!(check_coverage(ranges, 0, 1 << 20).is_ok());
        }
    }

    /// Released neighbours always end up merged: releasing everything
    /// returns the list to a single donor segment.
    #[test]
    fn prop_full_release_restores_donor(sizes in prop::collection::vec(1u64..256, 1..50)) {
        let mut free = FreeList::new();
        free.release(0, 1 << 20);
        let mut held = Vec::new();
        for size in sizes {
            if let Some(offset) = free.allocate(size) {
                held.push((offset, size));
            }
        }
        for (offset, size) in held {
            free.release(offset, size);
        }
        prop_assert_eq!(free.count(), 1);
        prop_assert_eq!(free.total_bytes(), 1u64 << 20);
    }
}

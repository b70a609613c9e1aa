//! Free-space map and extent allocator (§4.3).
//!
//! Free space is tracked two ways: an L1 bitmap (one bit per page, for
//! O(1) "is this page free" queries and compact on-disk persistence)
//! and an L2 extent list (a `BTreeMap` from starting page to run
//! length, the way `crab-db-alloc`'s free-page tracking keys runs by
//! their starting id) used to serve allocation requests without a
//! linear bitmap scan. The two stay in sync on every `allocate` and
//! `free` call.

use std::collections::BTreeMap;

use sharpcore_core::{Error, PageId, Result};

/// How a run of free pages should be chosen to satisfy a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitStrategy {
    /// Smallest extent that still satisfies the request.
    Best,
    /// First extent encountered that satisfies the request.
    First,
    /// Largest available extent, to keep remainders large.
    Worst,
}

/// Growth steps the file takes when no extent can satisfy a request.
/// Doubles from 256 pages up to a cap, mirroring typical log-structured
/// growth so the file doesn't thrash small `ftruncate` calls.
const GROWTH_START_PAGES: u64 = 256;
const GROWTH_CAP_PAGES: u64 = 1 << 20;

/// Free-space map: bitmap plus a derived extent index.
pub struct FreeSpaceMap {
    /// One bit per page; `true` means free. Indexed from page 0.
    bitmap: Vec<bool>,
    /// Free runs keyed by starting page, value is run length in pages.
    /// Kept in lockstep with `bitmap`.
    extents: BTreeMap<PageId, u64>,
}

impl FreeSpaceMap {
    /// Build a free-space map over `total_pages`, with pages
    /// `[0, first_free)` pre-marked allocated (header, registry, etc.)
    pub fn new(total_pages: u64, first_free: PageId) -> Self {
        let mut fsm = FreeSpaceMap {
            bitmap: vec![false; total_pages as usize],
            extents: BTreeMap::new(),
        };
        for page in first_free..total_pages {
            fsm.bitmap[page as usize] = true;
        }
        if first_free < total_pages {
            fsm.extents.insert(first_free, total_pages - first_free);
        }
        fsm
    }

    /// Rebuild from a serialized bitmap (used when opening an existing
    /// file and loading the FSM block).
    pub fn from_bitmap(bitmap: Vec<bool>) -> Self {
        let mut fsm = FreeSpaceMap {
            bitmap,
            extents: BTreeMap::new(),
        };
        fsm.rebuild_extents();
        fsm
    }

    fn rebuild_extents(&mut self) {
        self.extents.clear();
        let mut run_start: Option<PageId> = None;
        for (i, &free) in self.bitmap.iter().enumerate() {
            let page = i as PageId;
            match (free, run_start) {
                (true, None) => run_start = Some(page),
                (false, Some(start)) => {
                    self.extents.insert(start, page - start);
                    run_start = None;
                }
                _ => {}
            }
        }
        if let Some(start) = run_start {
            self.extents.insert(start, self.bitmap.len() as u64 - start);
        }
    }

    pub fn total_pages(&self) -> u64 {
        self.bitmap.len() as u64
    }

    pub fn is_free(&self, page: PageId) -> bool {
        self.bitmap.get(page as usize).copied().unwrap_or(false)
    }

    /// Grow the backing bitmap to `new_total_pages`, marking the newly
    /// added range free. Used when no extent can satisfy an allocation
    /// and the file must be extended (§4.3 "exponential growth").
    pub fn grow_to(&mut self, new_total_pages: u64) {
        let old_total = self.bitmap.len() as u64;
        if new_total_pages <= old_total {
            return;
        }
        self.bitmap.resize(new_total_pages as usize, true);
        self.merge_free_run(old_total, new_total_pages - old_total);
    }

    /// Compute the next file size (in pages) that would accommodate
    /// `needed_pages` more than `current_total`, growing exponentially
    /// from [`GROWTH_START_PAGES`] and capping the per-step increase at
    /// [`GROWTH_CAP_PAGES`].
    pub fn next_growth_target(current_total: u64, needed_pages: u64) -> u64 {
        let mut step = GROWTH_START_PAGES;
        let mut total = current_total;
        while total - current_total < needed_pages {
            total += step.min(GROWTH_CAP_PAGES);
            if step < GROWTH_CAP_PAGES {
                step = (step * 2).min(GROWTH_CAP_PAGES);
            }
        }
        total
    }

    /// Allocate a run of `length_pages` pages using `strategy`. Ties
    /// within a strategy resolve to the extent with the lowest starting
    /// offset, keeping allocations front-packed so late extents stay
    /// large and mergeable.
    pub fn allocate(&mut self, length_pages: u64, strategy: FitStrategy) -> Result<PageId> {
        if length_pages == 0 {
            return Err(Error::InvalidArgument("length_pages must be > 0".into()));
        }

        let candidate = match strategy {
            FitStrategy::First => self
                .extents
                .iter()
                .find(|(_, &len)| len >= length_pages)
                .map(|(&start, &len)| (start, len)),
            FitStrategy::Best => self
                .extents
                .iter()
                .filter(|(_, &len)| len >= length_pages)
                .min_by_key(|(&start, &len)| (len, start))
                .map(|(&start, &len)| (start, len)),
            FitStrategy::Worst => self
                .extents
                .iter()
                .filter(|(_, &len)| len >= length_pages)
                .max_by_key(|(&start, &len)| (len, std::cmp::Reverse(start)))
                .map(|(&start, &len)| (start, len)),
        };

        let (start, len) = candidate.ok_or_else(|| {
            Error::OutOfSpace(format!("no free extent of {length_pages} pages available"))
        })?;

        self.extents.remove(&start);
        if len > length_pages {
            self.extents.insert(start + length_pages, len - length_pages);
        }
        for page in start..start + length_pages {
            self.bitmap[page as usize] = false;
        }
        Ok(start)
    }

    /// Mark `[start_page, start_page + length_pages)` as allocated
    /// without going through [`Self::allocate`]'s own extent search.
    /// Used when reloading a map from a registry of already-placed
    /// blocks, where the caller knows the extent's location and just
    /// needs the map's bookkeeping to agree with it.
    pub fn reserve(&mut self, start_page: PageId, length_pages: u64) {
        for page in start_page..start_page + length_pages {
            if (page as usize) < self.bitmap.len() {
                self.bitmap[page as usize] = false;
            }
        }
        self.rebuild_extents();
    }

    /// Return a run of pages to the free list, coalescing with
    /// adjacent free extents on either side.
    pub fn free(&mut self, start: PageId, length_pages: u64) {
        for page in start..start + length_pages {
            if (page as usize) < self.bitmap.len() {
                self.bitmap[page as usize] = true;
            }
        }
        self.merge_free_run(start, length_pages);
    }

    fn merge_free_run(&mut self, start: PageId, length_pages: u64) {
        let mut new_start = start;
        let mut new_len = length_pages;

        // Merge with the extent immediately preceding, if any.
        if let Some((&prev_start, &prev_len)) = self
            .extents
            .range(..start)
            .next_back()
            .filter(|(&s, &l)| s + l == start)
        {
            new_start = prev_start;
            new_len += prev_len;
            self.extents.remove(&prev_start);
        }

        // Merge with the extent immediately following, if any.
        let end = new_start + new_len;
        if let Some(&next_len) = self.extents.get(&end) {
            new_len += next_len;
            self.extents.remove(&end);
        }

        self.extents.insert(new_start, new_len);
    }

    /// Serialize the bitmap to bytes (one bit per page, packed
    /// little-endian) for persistence in the FSM block.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; (self.bitmap.len() + 7) / 8];
        for (i, &free) in self.bitmap.iter().enumerate() {
            if free {
                out[i / 8] |= 1 << (i % 8);
            }
        }
        out
    }

    /// Reconstruct from a packed bitmap produced by [`Self::to_bytes`].
    pub fn from_bytes(bytes: &[u8], total_pages: u64) -> Self {
        let mut bitmap = vec![false; total_pages as usize];
        for (i, bit) in bitmap.iter_mut().enumerate() {
            *bit = bytes.get(i / 8).map(|b| b & (1 << (i % 8)) != 0).unwrap_or(false);
        }
        Self::from_bitmap(bitmap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_marks_pages_used() {
        let mut fsm = FreeSpaceMap::new(100, 1);
        let start = fsm.allocate(10, FitStrategy::First).unwrap();
        assert_eq!(start, 1);
        for page in 1..11 {
            assert!(!fsm.is_free(page));
        }
        assert!(fsm.is_free(11));
    }

    #[test]
    fn best_fit_prefers_smallest_sufficient_extent() {
        let mut fsm = FreeSpaceMap::new(200, 0);
        // Carve out two free extents: [0,10) and [50,60) by allocating the gaps.
        fsm.allocate(10, FitStrategy::First).unwrap(); // consumes [0,10)
        fsm.free(0, 5); // reintroduce a small free extent [0,5)
        let start = fsm.allocate(5, FitStrategy::Best).unwrap();
        assert_eq!(start, 0);
    }

    #[test]
    fn free_coalesces_adjacent_extents() {
        let mut fsm = FreeSpaceMap::new(100, 0);
        let a = fsm.allocate(10, FitStrategy::First).unwrap();
        let b = fsm.allocate(10, FitStrategy::First).unwrap();
        assert_eq!(b, a + 10);
        fsm.free(a, 10);
        fsm.free(b, 10);
        // Both runs should merge with the remaining tail into one extent.
        assert_eq!(fsm.extents.len(), 1);
    }

    #[test]
    fn allocate_fails_when_out_of_space() {
        let mut fsm = FreeSpaceMap::new(10, 0);
        assert!(fsm.allocate(20, FitStrategy::First).is_err());
    }

    #[test]
    fn grow_to_extends_and_merges_with_tail() {
        let mut fsm = FreeSpaceMap::new(10, 0);
        fsm.allocate(10, FitStrategy::First).unwrap();
        fsm.grow_to(20);
        let start = fsm.allocate(10, FitStrategy::First).unwrap();
        assert_eq!(start, 10);
    }

    #[test]
    fn growth_target_doubles_from_start_and_caps() {
        let target = FreeSpaceMap::next_growth_target(0, 100);
        assert_eq!(target, GROWTH_START_PAGES);
        let target2 = FreeSpaceMap::next_growth_target(0, GROWTH_START_PAGES + 1);
        assert!(target2 >= GROWTH_START_PAGES * 2);
    }

    #[test]
    fn bitmap_round_trips_through_bytes() {
        let mut fsm = FreeSpaceMap::new(20, 0);
        fsm.allocate(5, FitStrategy::First).unwrap();
        let bytes = fsm.to_bytes();
        let restored = FreeSpaceMap::from_bytes(&bytes, 20);
        for page in 0..20 {
            assert_eq!(fsm.is_free(page), restored.is_free(page));
        }
    }

    #[test]
    fn reserve_removes_an_extent_without_going_through_allocate() {
        let mut fsm = FreeSpaceMap::new(100, 0);
        fsm.reserve(10, 5);
        for page in 10..15 {
            assert!(!fsm.is_free(page));
        }
        assert!(fsm.is_free(9));
        assert!(fsm.is_free(15));
        // still allocatable around the reserved hole
        let start = fsm.allocate(5, FitStrategy::First).unwrap();
        assert_eq!(start, 0);
    }

    #[test]
    fn lowest_offset_tie_break_among_equal_extents() {
        let mut fsm = FreeSpaceMap::new(100, 0);
        fsm.allocate(20, FitStrategy::First).unwrap(); // [0,20) used
        fsm.free(0, 10); // free extent A: [0,10)
        fsm.free(40, 10); // free extent B: [40,10) (disjoint, same size)
        let start = fsm.allocate(10, FitStrategy::Best).unwrap();
        assert_eq!(start, 0);
    }
}

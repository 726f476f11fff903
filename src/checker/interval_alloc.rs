// Interval sets over sub-object leaves, and the arena that hands them out.
//
// A value of type T has `T.leaf_count()` leaves; a field is a contiguous leaf range.
// The checkers keep one or two sets per block per tracked value, so the arena keeps
// every set's storage across `reset()` and only bumps a generation counter. A handle
// from an older generation panics on use.

use std::ops::Range;

/// Sorted, disjoint, non-adjacent half-open ranges inside `0..width`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntervalSet {
    width: u32,
    ranges: Vec<Range<u32>>,
}

impl IntervalSet {
    pub fn new(width: u32) -> Self {
        Self {
            width,
            ranges: Vec::new(),
        }
    }

    pub fn full(width: u32) -> Self {
        let mut set = Self::new(width);
        set.fill();
        set
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn ranges(&self) -> &[Range<u32>] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.width == 0 || (self.ranges.len() == 1 && self.ranges[0] == (0..self.width))
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    pub fn fill(&mut self) {
        self.ranges.clear();
        if self.width > 0 {
            self.ranges.push(0..self.width);
        }
    }

    pub fn insert(&mut self, range: Range<u32>) {
        let range = self.clamp(range);
        if range.is_empty() {
            return;
        }
        let (mut start, mut end) = (range.start, range.end);
        let old = std::mem::take(&mut self.ranges);
        let mut placed = false;
        for r in old {
            if r.end < start {
                self.ranges.push(r);
            } else if end < r.start {
                if !placed {
                    self.ranges.push(start..end);
                    placed = true;
                }
                self.ranges.push(r);
            } else {
                // Overlapping or touching: absorb into the pending range.
                start = start.min(r.start);
                end = end.max(r.end);
            }
        }
        if !placed {
            self.ranges.push(start..end);
        }
    }

    pub fn remove(&mut self, range: Range<u32>) {
        let range = self.clamp(range);
        if range.is_empty() {
            return;
        }
        let old = std::mem::take(&mut self.ranges);
        for r in old {
            if r.end <= range.start || r.start >= range.end {
                self.ranges.push(r);
                continue;
            }
            if r.start < range.start {
                self.ranges.push(r.start..range.start);
            }
            if r.end > range.end {
                self.ranges.push(range.end..r.end);
            }
        }
    }

    pub fn contains(&self, leaf: u32) -> bool {
        self.ranges.iter().any(|r| r.contains(&leaf))
    }

    /// Does any leaf of `range` belong to the set?
    pub fn overlaps(&self, range: &Range<u32>) -> bool {
        !range.is_empty() && self.ranges.iter().any(|r| r.start < range.end && range.start < r.end)
    }

    /// Does every leaf of `range` belong to the set?
    pub fn covers(&self, range: &Range<u32>) -> bool {
        range.is_empty() || self.ranges.iter().any(|r| r.start <= range.start && range.end <= r.end)
    }

    pub fn union_with(&mut self, other: &IntervalSet) {
        for r in &other.ranges {
            self.insert(r.clone());
        }
    }

    fn clamp(&self, range: Range<u32>) -> Range<u32> {
        range.start.min(self.width)..range.end.min(self.width)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntervalHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug, Default)]
pub struct IntervalAllocator {
    slots: Vec<IntervalSet>,
    live: usize,
    generation: u32,
}

impl IntervalAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh, empty set over `width` leaves.
    pub fn allocate(&mut self, width: u32) -> IntervalHandle {
        if self.live == self.slots.len() {
            self.slots.push(IntervalSet::new(width));
        } else {
            let slot = &mut self.slots[self.live];
            slot.width = width;
            slot.ranges.clear();
        }
        let handle = IntervalHandle {
            index: self.live as u32,
            generation: self.generation,
        };
        self.live += 1;
        handle
    }

    /// Invalidate every handle handed out so far. Storage is kept for the next round.
    pub fn reset(&mut self) {
        self.live = 0;
        self.generation = self.generation.wrapping_add(1);
    }

    fn slot(&self, handle: IntervalHandle) -> usize {
        assert!(
            handle.generation == self.generation && (handle.index as usize) < self.live,
            "interval handle {:?} used after reset",
            handle
        );
        handle.index as usize
    }

    pub fn get(&self, handle: IntervalHandle) -> &IntervalSet {
        &self.slots[self.slot(handle)]
    }

    pub fn get_mut(&mut self, handle: IntervalHandle) -> &mut IntervalSet {
        let slot = self.slot(handle);
        &mut self.slots[slot]
    }

    pub fn insert(&mut self, handle: IntervalHandle, range: Range<u32>) {
        self.get_mut(handle).insert(range);
    }

    pub fn remove(&mut self, handle: IntervalHandle, range: Range<u32>) {
        self.get_mut(handle).remove(range);
    }

    pub fn contains(&self, handle: IntervalHandle, leaf: u32) -> bool {
        self.get(handle).contains(leaf)
    }

    pub fn overlaps(&self, handle: IntervalHandle, range: &Range<u32>) -> bool {
        self.get(handle).overlaps(range)
    }

    pub fn covers(&self, handle: IntervalHandle, range: &Range<u32>) -> bool {
        self.get(handle).covers(range)
    }

    pub fn is_empty(&self, handle: IntervalHandle) -> bool {
        self.get(handle).is_empty()
    }

    pub fn is_full(&self, handle: IntervalHandle) -> bool {
        self.get(handle).is_full()
    }

    pub fn clear(&mut self, handle: IntervalHandle) {
        self.get_mut(handle).clear();
    }

    pub fn fill(&mut self, handle: IntervalHandle) {
        self.get_mut(handle).fill();
    }

    fn pair_mut(&mut self, dst: IntervalHandle, src: IntervalHandle) -> (&mut IntervalSet, &IntervalSet) {
        let (d, s) = (self.slot(dst), self.slot(src));
        assert_ne!(d, s, "interval operation on a set with itself");
        if d < s {
            let (lo, hi) = self.slots.split_at_mut(s);
            (&mut lo[d], &hi[0])
        } else {
            let (lo, hi) = self.slots.split_at_mut(d);
            (&mut hi[0], &lo[s])
        }
    }

    /// dst |= src
    pub fn union(&mut self, dst: IntervalHandle, src: IntervalHandle) {
        if dst == src {
            return;
        }
        let (d, s) = self.pair_mut(dst, src);
        d.union_with(s);
    }

    /// dst = src
    pub fn copy(&mut self, dst: IntervalHandle, src: IntervalHandle) {
        if dst == src {
            return;
        }
        let (d, s) = self.pair_mut(dst, src);
        d.width = s.width;
        d.ranges.clone_from(&s.ranges);
    }

    pub fn same_leaves(&self, a: IntervalHandle, b: IntervalHandle) -> bool {
        self.get(a).ranges == self.get(b).ranges
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_coalesces_adjacent_ranges() {
        let mut set = IntervalSet::new(8);
        set.insert(0..2);
        set.insert(4..6);
        set.insert(2..4);
        assert_eq!(set.ranges(), &[0..6]);
        set.insert(7..8);
        assert_eq!(set.ranges(), &[0..6, 7..8]);
        set.insert(6..7);
        assert!(set.is_full());
    }

    #[test]
    fn test_remove_splits_range() {
        let mut set = IntervalSet::full(6);
        set.remove(2..4);
        assert_eq!(set.ranges(), &[0..2, 4..6]);
        assert!(set.overlaps(&(1..3)));
        assert!(!set.overlaps(&(2..4)));
        assert!(set.covers(&(4..6)));
        assert!(!set.covers(&(1..5)));
        assert!(!set.contains(3));
    }

    #[test]
    fn test_union_and_copy_through_handles() {
        let mut alloc = IntervalAllocator::new();
        let a = alloc.allocate(4);
        let b = alloc.allocate(4);
        alloc.insert(a, 0..1);
        alloc.insert(b, 2..4);
        alloc.union(a, b);
        assert_eq!(alloc.get(a).ranges(), &[0..1, 2..4]);

        let c = alloc.allocate(4);
        alloc.copy(c, a);
        alloc.remove(a, 0..4);
        assert!(alloc.is_empty(a));
        assert!(alloc.contains(c, 3));
    }

    #[test]
    fn test_reset_reuses_storage() {
        let mut alloc = IntervalAllocator::new();
        let first = alloc.allocate(3);
        alloc.fill(first);
        alloc.reset();
        let second = alloc.allocate(5);
        assert!(alloc.is_empty(second));
        assert_eq!(alloc.get(second).width(), 5);
        assert_ne!(first, second);
    }

    #[test]
    #[should_panic(expected = "used after reset")]
    fn test_stale_handle_panics() {
        let mut alloc = IntervalAllocator::new();
        let handle = alloc.allocate(2);
        alloc.reset();
        alloc.allocate(2);
        alloc.contains(handle, 0);
    }
}

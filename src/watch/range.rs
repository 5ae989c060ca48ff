use crate::watch::address::Address;
use crate::watch::breakpoint::BreakpointHandle;
use log::debug;
use std::fmt::{Display, Formatter};

/// Contiguous memory interval observed for read/write access.
#[derive(Clone, Debug, PartialEq)]
pub struct WatchedRange {
    pub start: Address,
    pub length: u64,
    /// Cycle at which the range was first appended.
    pub created_at: u64,
    active: bool,
    /// Breakpoint covering this range while the session is armed.
    pub(super) handle: Option<BreakpointHandle>,
}

impl WatchedRange {
    fn new(start: Address, length: u64, created_at: u64) -> Self {
        Self {
            start,
            length,
            created_at,
            active: true,
            handle: None,
        }
    }

    /// End of range, exclusive.
    pub fn end(&self) -> Address {
        self.start.add(self.length)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn handle(&self) -> Option<BreakpointHandle> {
        self.handle
    }

    /// True if `addr` lies in `[start, start + length]`.
    /// The end bound is inclusive, so an address one past the last byte still matches.
    pub fn contains(&self, addr: Address) -> bool {
        self.active && addr >= self.start && addr <= self.end()
    }
}

impl Display for WatchedRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "start: {} length: {:#x} cycle: {:#x}",
            self.start, self.length, self.created_at
        )
    }
}

/// Outcome of [`WatchSet::set_range`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Insertion {
    /// Range already covered by an existing one.
    Skipped,
    /// Existing range at index was replaced by the new (wider) one.
    Replaced(usize),
    /// New range was concatenated (or unioned) into an existing range at index.
    Merged(usize),
    /// New range appended at index.
    Appended(usize),
}

impl Insertion {
    /// Index of a range whose bounds changed, if any.
    pub fn changed_index(self) -> Option<usize> {
        match self {
            Insertion::Skipped => None,
            Insertion::Replaced(idx) | Insertion::Merged(idx) | Insertion::Appended(idx) => {
                Some(idx)
            }
        }
    }
}

/// Ordered collection of watched ranges.
///
/// Ranges keep the insertion order and are never sorted, inactive ranges stay in place
/// so indexes of others are stable until the set is cleared.
#[derive(Default, Debug)]
pub struct WatchSet {
    ranges: Vec<WatchedRange>,
}

impl WatchSet {
    /// Insert a range, merging it with an existing overlapping range.
    ///
    /// For every active range, in order, the first matching rule wins:
    /// 1) existing range covers the new one - nothing to do
    /// 2) new range covers the existing one - replace existing in place
    /// 3) new range starts right at the end of existing one - concatenate
    /// 4) ranges partially overlap - existing becomes their union
    ///
    /// If no rule matched the range is appended and stamped with `cycle`.
    /// A replaced or merged range then absorbs every other active range it overlaps or touches,
    /// absorbed ranges are deactivated but keep their breakpoint handle until it is released.
    ///
    /// # Arguments
    ///
    /// * `start`: first byte of a range
    /// * `length`: range length in bytes
    /// * `cycle`: current execution cycle
    pub fn set_range(&mut self, start: Address, length: u64, cycle: u64) -> Insertion {
        if start.is_null() || length == 0 {
            debug!(target: "watch", "ignore empty range {start} length {length:#x}");
            return Insertion::Skipped;
        }

        let end = start.add(length);
        let mut merged = None;
        for (idx, range) in self.ranges.iter_mut().enumerate() {
            if !range.active {
                continue;
            }
            let this_end = range.end();

            if range.start <= start && this_end >= end {
                debug!(target: "watch", "range {start}-{end} already watched by {}", range.start);
                return Insertion::Skipped;
            }
            if range.start >= start && this_end <= end {
                debug!(target: "watch", "range {start}-{end} replaces subrange {}-{this_end}", range.start);
                range.start = start;
                range.length = length;
                merged = Some(Insertion::Replaced(idx));
                break;
            }
            if start == this_end {
                range.length += length;
                debug!(target: "watch", "range {start}-{end} concatenated to {}", range.start);
                merged = Some(Insertion::Merged(idx));
                break;
            }
            if start < this_end && end > range.start {
                let union_start = range.start.min(start);
                let union_end = this_end.max(end);
                range.start = union_start;
                range.length = union_end.as_u64() - union_start.as_u64();
                debug!(target: "watch", "range {start}-{end} overlaps, union is {union_start}-{union_end}");
                merged = Some(Insertion::Merged(idx));
                break;
            }
        }

        if let Some(insertion) = merged {
            if let Some(idx) = insertion.changed_index() {
                self.absorb_neighbours(idx);
            }
            return insertion;
        }

        self.ranges.push(WatchedRange::new(start, length, cycle));
        Insertion::Appended(self.ranges.len() - 1)
    }

    /// Grow range at `idx` over every other active range it overlaps or touches.
    fn absorb_neighbours(&mut self, idx: usize) {
        loop {
            let Some((start, end)) = self.ranges.get(idx).map(|r| (r.start, r.end())) else {
                return;
            };
            let neighbour = self.ranges.iter().enumerate().find(|(other, r)| {
                *other != idx && r.active && r.start <= end && r.end() >= start
            });
            let Some((other, range)) = neighbour else {
                return;
            };
            let union_start = start.min(range.start);
            let union_end = end.max(range.end());
            debug!(
                target: "watch",
                "range {start}-{end} absorbs range at index {other}, union is {union_start}-{union_end}"
            );

            self.deactivate(other);
            if let Some(range) = self.ranges.get_mut(idx) {
                range.start = union_start;
                range.length = union_end.as_u64() - union_start.as_u64();
            }
        }
    }

    /// Return start of the first active range containing an address.
    pub fn find_range(&self, addr: Address) -> Option<Address> {
        self.ranges
            .iter()
            .find(|range| range.contains(addr))
            .map(|range| range.start)
    }

    /// Return index of a range covered by breakpoint.
    pub fn position_by_handle(&self, handle: BreakpointHandle) -> Option<usize> {
        self.ranges
            .iter()
            .position(|range| range.active && range.handle == Some(handle))
    }

    /// Mark range inactive (consumed). Index stays occupied.
    pub fn deactivate(&mut self, idx: usize) -> Option<&WatchedRange> {
        let range = self.ranges.get_mut(idx)?;
        range.active = false;
        range.start = Address::NULL;
        Some(range)
    }

    /// Remove all ranges.
    pub fn clear_all(&mut self) {
        self.ranges.clear();
    }

    /// Rewind to a cycle: keep ranges created at or before `cycle`, drop the first range
    /// created after it and every range appended later.
    pub fn clear_since(&mut self, cycle: u64) {
        if let Some(found) = self.ranges.iter().position(|r| r.created_at > cycle) {
            debug!(target: "watch", "rewind ranges to cycle {cycle:#x}, drop from index {found}");
            self.ranges.truncate(found);
        }
    }

    pub fn get(&self, idx: usize) -> Option<&WatchedRange> {
        self.ranges.get(idx)
    }

    pub(super) fn get_mut(&mut self, idx: usize) -> Option<&mut WatchedRange> {
        self.ranges.get_mut(idx)
    }

    /// Return all ranges including inactive ones.
    #[inline(always)]
    pub fn all(&self) -> &[WatchedRange] {
        self.ranges.as_slice()
    }

    #[inline(always)]
    pub(super) fn all_mut(&mut self) -> &mut [WatchedRange] {
        self.ranges.as_mut_slice()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WatchedRange> {
        self.ranges.iter()
    }

    /// Iterate over active ranges together with their index.
    pub fn active(&self) -> impl Iterator<Item = (usize, &WatchedRange)> {
        self.ranges.iter().enumerate().filter(|(_, r)| r.active)
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

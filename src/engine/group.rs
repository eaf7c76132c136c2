//! Register grouping for batched reads.
//!
//! Sparse sensor addresses are packed into contiguous spans so one FC03
//! request can serve several sensors.
//!
//! # Design
//!
//! - Addresses of all sensors are flattened, de-duplicated and sorted
//! - A single greedy sweep extends the open span while the next address is
//!   within `allow_gap + 1` of the span end and the span stays within
//!   `max_group_size` registers
//! - Spans are produced lazily by [`RegisterGroups`]
//!
//! # Example
//!
//! ```
//! use sunsynk_gw::engine::group::{group_addresses, RegisterGroup};
//!
//! let groups: Vec<_> = group_addresses([50, 1, 2], 1, 60).collect();
//! assert_eq!(groups, vec![RegisterGroup::new(1, 2), RegisterGroup::new(50, 50)]);
//! ```

use std::collections::BTreeSet;

use crate::core::sensor::Sensor;

/// Gap tolerated between two requested addresses of the same read.
pub const ALLOW_GAP: u16 = 1;

/// Default batch ceiling (registers per read request).
pub const DEFAULT_BATCH_SIZE: u16 = 60;

/// A contiguous inclusive address range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegisterGroup {
    /// First address.
    pub start: u16,
    /// Last address (inclusive).
    pub end: u16,
}

impl RegisterGroup {
    /// Create a group. `end` must not be below `start`.
    pub const fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// Number of registers covered.
    #[inline]
    pub fn len(&self) -> u16 {
        self.end - self.start + 1
    }

    /// A group always covers at least one register.
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Check if `address` lies in the group.
    #[inline]
    pub fn contains(&self, address: u16) -> bool {
        (self.start..=self.end).contains(&address)
    }
}

/// Lazy iterator over register groups.
#[derive(Debug)]
pub struct RegisterGroups {
    addresses: std::collections::btree_set::IntoIter<u16>,
    allow_gap: u16,
    max_group_size: u16,
    open: Option<RegisterGroup>,
}

impl RegisterGroups {
    fn fits(&self, group: RegisterGroup, address: u16) -> bool {
        let gap = u32::from(address - group.end);
        let span = u32::from(address - group.start) + 1;
        gap <= u32::from(self.allow_gap) + 1 && span <= u32::from(self.max_group_size)
    }
}

impl Iterator for RegisterGroups {
    type Item = RegisterGroup;

    fn next(&mut self) -> Option<RegisterGroup> {
        while let Some(address) = self.addresses.next() {
            match self.open {
                None => self.open = Some(RegisterGroup::new(address, address)),
                Some(group) if self.fits(group, address) => {
                    self.open = Some(RegisterGroup::new(group.start, address));
                }
                Some(group) => {
                    self.open = Some(RegisterGroup::new(address, address));
                    return Some(group);
                }
            }
        }
        self.open.take()
    }
}

/// Group raw addresses.
///
/// A `max_group_size` of zero is treated as one.
pub fn group_addresses<I>(addresses: I, allow_gap: u16, max_group_size: u16) -> RegisterGroups
where
    I: IntoIterator<Item = u16>,
{
    let sorted: BTreeSet<u16> = addresses.into_iter().collect();
    RegisterGroups {
        addresses: sorted.into_iter(),
        allow_gap,
        max_group_size: max_group_size.max(1),
        open: None,
    }
}

/// Group every address referenced by `sensors`.
pub fn group_sensors<'a, I>(sensors: I, allow_gap: u16, max_group_size: u16) -> RegisterGroups
where
    I: IntoIterator<Item = &'a Sensor>,
{
    group_addresses(
        sensors.into_iter().flat_map(|s| s.address.iter().copied()),
        allow_gap,
        max_group_size,
    )
}

/// Map words returned for a read starting at `start` back to absolute
/// addresses.
pub fn register_map(start: u16, words: &[u16]) -> impl Iterator<Item = (u16, u16)> + '_ {
    (start..=u16::MAX).zip(words.iter().copied())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn groups(addresses: &[u16], allow_gap: u16, max: u16) -> Vec<RegisterGroup> {
        group_addresses(addresses.iter().copied(), allow_gap, max).collect()
    }

    /// Invariants every grouping must satisfy.
    fn assert_valid(addresses: &[u16], allow_gap: u16, max: u16) {
        let result = groups(addresses, allow_gap, max);
        let wanted: BTreeSet<u16> = addresses.iter().copied().collect();

        for a in &wanted {
            let covering = result.iter().filter(|g| g.contains(*a)).count();
            assert_eq!(covering, 1, "address {} covered {} times", a, covering);
        }
        for g in &result {
            assert!(g.len() <= max.max(1), "{:?} exceeds {}", g, max);
            assert!(wanted.contains(&g.start) && wanted.contains(&g.end));
        }
        for pair in result.windows(2) {
            assert!(pair[0].end < pair[1].start, "{:?} overlaps", pair);
        }
    }

    // ========== examples ==========

    #[test]
    fn test_contiguous_run_is_one_group() {
        assert_eq!(groups(&[3, 4, 5, 6, 7], 1, 60), vec![RegisterGroup::new(3, 7)]);
    }

    #[test]
    fn test_far_address_starts_new_group() {
        assert_eq!(
            groups(&[1, 2, 50], 1, 60),
            vec![RegisterGroup::new(1, 2), RegisterGroup::new(50, 50)]
        );
    }

    #[test]
    fn test_gap_of_one_is_bridged() {
        assert_eq!(groups(&[10, 12], 1, 60), vec![RegisterGroup::new(10, 12)]);
        assert_eq!(
            groups(&[10, 13], 1, 60),
            vec![RegisterGroup::new(10, 10), RegisterGroup::new(13, 13)]
        );
    }

    // ========== edge cases ==========

    #[test]
    fn test_empty_input() {
        assert!(groups(&[], 1, 60).is_empty());
    }

    #[test]
    fn test_single_address() {
        assert_eq!(groups(&[42], 1, 60), vec![RegisterGroup::new(42, 42)]);
        assert_eq!(RegisterGroup::new(42, 42).len(), 1);
    }

    #[test]
    fn test_duplicates_and_order() {
        assert_eq!(groups(&[5, 3, 4, 3, 5], 1, 60), vec![RegisterGroup::new(3, 5)]);
    }

    #[test]
    fn test_size_limit_cuts_span() {
        let addrs: Vec<u16> = (0..10).collect();
        assert_eq!(
            groups(&addrs, 1, 4),
            vec![
                RegisterGroup::new(0, 3),
                RegisterGroup::new(4, 7),
                RegisterGroup::new(8, 9),
            ]
        );
    }

    #[test]
    fn test_size_limit_counts_bridged_gaps() {
        // 0 and 2 merge (span 3), 4 would make the span 5 > 4
        assert_eq!(
            groups(&[0, 2, 4], 1, 4),
            vec![RegisterGroup::new(0, 2), RegisterGroup::new(4, 4)]
        );
    }

    #[test]
    fn test_zero_max_group_size() {
        assert_eq!(
            groups(&[1, 2], 1, 0),
            vec![RegisterGroup::new(1, 1), RegisterGroup::new(2, 2)]
        );
    }

    #[test]
    fn test_address_space_edges() {
        assert_eq!(
            groups(&[0, u16::MAX - 1, u16::MAX], 1, 60),
            vec![RegisterGroup::new(0, 0), RegisterGroup::new(u16::MAX - 1, u16::MAX)]
        );
    }

    #[test]
    fn test_invariants_hold() {
        let sparse = [0, 1, 3, 4, 7, 9, 10, 11, 12, 20, 21, 23, 60, 61, 62, 200];
        for max in [1, 2, 3, 5, 8, 60] {
            for gap in [0, 1, 3] {
                assert_valid(&sparse, gap, max);
            }
        }
        let dense: Vec<u16> = (100..400).collect();
        assert_valid(&dense, 1, 60);
        assert_eq!(groups(&dense, 1, 60).len(), 5);
    }

    #[test]
    fn test_lazy_iteration() {
        let mut it = group_addresses([1, 2, 50, 51, 100], 1, 60);
        assert_eq!(it.next(), Some(RegisterGroup::new(1, 2)));
        assert_eq!(it.next(), Some(RegisterGroup::new(50, 51)));
        assert_eq!(it.next(), Some(RegisterGroup::new(100, 100)));
        assert_eq!(it.next(), None);
        assert_eq!(it.next(), None);
    }

    #[test]
    fn test_group_sensors_flattens_addresses() {
        let sensors = vec![
            Sensor::new(vec![96, 97], "Total PV Energy", "kWh", 0.1),
            Sensor::new(vec![98, 99], "Year Grid Export", "kWh", 0.1),
            Sensor::new(vec![184], "Battery SOC", "%", 1.0),
        ];
        let result: Vec<_> = group_sensors(&sensors, ALLOW_GAP, DEFAULT_BATCH_SIZE).collect();
        assert_eq!(
            result,
            vec![RegisterGroup::new(96, 99), RegisterGroup::new(184, 184)]
        );
    }

    #[test]
    fn test_groups_resume_after_cut() {
        // the address that closes a group opens the next one
        let mut it = group_addresses([1, 2, 3, 10, 11, 30], 1, 2);
        assert_eq!(it.next(), Some(RegisterGroup::new(1, 2)));
        assert_eq!(it.next(), Some(RegisterGroup::new(3, 3)));
        assert_eq!(it.next(), Some(RegisterGroup::new(10, 11)));
        assert_eq!(it.next(), Some(RegisterGroup::new(30, 30)));
        assert_eq!(it.next(), None);
    }

    #[test]
    fn test_register_map() {
        let mapped: Vec<_> = register_map(100, &[7, 8, 9]).collect();
        assert_eq!(mapped, vec![(100, 7), (101, 8), (102, 9)]);

        let clipped: Vec<_> = register_map(u16::MAX, &[1, 2]).collect();
        assert_eq!(clipped, vec![(u16::MAX, 1)]);
    }
}

// Copyright 2024 Oxide Computer Company

//! Longest-prefix-match index over an unsigned key axis. Built once from a
//! static prefix set: `compact` derives the partition the prefixes induce on
//! the axis, numbering its leaves densely from zero. The classifier builders
//! use `range_iterate` to enumerate the leaves a prefix covers and the dense
//! leaf ids as classifier candidates; `lookup` answers longest-match
//! queries over the same partition.

use num::PrimInt;

const NO_VALUE: u32 = u32::MAX;

pub struct Lpm<K> {
    prefixes: Vec<(K, u8, u32)>,
    bounds: Vec<K>,
    values: Vec<u32>,
}

impl<K: PrimInt> Lpm<K> {
    pub fn new() -> Self {
        Self {
            prefixes: Vec::new(),
            bounds: Vec::new(),
            values: Vec::new(),
        }
    }

    fn width() -> usize {
        std::mem::size_of::<K>() * 8
    }

    fn mask(len: u8) -> K {
        if len == 0 {
            K::zero()
        } else {
            (!K::zero()) << (Self::width() - len as usize)
        }
    }

    /// First and one-past-last-representable addresses of a prefix.
    pub fn span(key: K, len: u8) -> (K, K) {
        let mask = Self::mask(len);
        (key & mask, key | !mask)
    }

    pub fn insert(&mut self, key: K, prefix_len: u8, value: u32) {
        debug_assert!(prefix_len as usize <= Self::width());
        debug_assert!(value != NO_VALUE);
        let (base, _) = Self::span(key, prefix_len);
        self.prefixes.push((base, prefix_len, value));
    }

    /// Build the dense leaf partition. The axis is always fully covered:
    /// stretches outside every prefix become leaves with no value.
    pub fn compact(&mut self) {
        let mut points = vec![K::min_value()];
        for &(base, len, _) in &self.prefixes {
            let (first, last) = Self::span(base, len);
            points.push(first);
            if last < K::max_value() {
                points.push(last + K::one());
            }
        }
        points.sort_unstable();
        points.dedup();

        self.values = points
            .iter()
            .map(|&start| {
                self.prefixes
                    .iter()
                    .filter(|&&(base, len, _)| {
                        let (first, last) = Self::span(base, len);
                        first <= start && start <= last
                    })
                    .max_by_key(|&&(_, len, _)| len)
                    .map(|&(_, _, value)| value)
                    .unwrap_or(NO_VALUE)
            })
            .collect();
        self.bounds = points;
    }

    pub fn leaf_count(&self) -> usize {
        self.bounds.len()
    }

    /// Leaf start values, ascending; index = dense leaf id.
    pub fn leaf_bounds(&self) -> &[K] {
        &self.bounds
    }

    fn leaf_of(&self, key: K) -> usize {
        debug_assert!(!self.bounds.is_empty(), "lookup before compact");
        self.bounds.partition_point(|&b| b <= key) - 1
    }

    /// Value of the longest prefix containing `key`, if any.
    pub fn lookup(&self, key: K) -> Option<u32> {
        match self.values[self.leaf_of(key)] {
            NO_VALUE => None,
            v => Some(v),
        }
    }

    /// Invoke `visit` with the dense id of every leaf overlapping
    /// [from, to] inclusive.
    pub fn range_iterate(&self, from: K, to: K, mut visit: impl FnMut(usize)) {
        debug_assert!(from <= to);
        for leaf in self.leaf_of(from)..=self.leaf_of(to) {
            visit(leaf);
        }
    }
}

impl<K: PrimInt> Default for Lpm<K> {
    fn default() -> Self {
        Self::new()
    }
}

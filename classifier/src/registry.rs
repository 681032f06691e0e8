// Copyright 2024 Oxide Computer Company

//! Value registry: an append-only sequence of rule-id ranges. The range
//! index is the classifier id. At the tree root the stored words are action
//! words rather than rule ids; the layout is the same.

use crate::arena::Arena;
use crate::error::Error;
use crate::offset::{self, OffsetPtr};

/// Build-side registry, CSR-style: `starts[i]` is where range `i` begins in
/// `values`; a range extends to the next start (or the tail for the last).
#[derive(Debug, Clone, Default)]
pub struct Registry {
    starts: Vec<u32>,
    values: Vec<u32>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new range. Its classifier id is the previous range count.
    pub fn start_range(&mut self) -> u32 {
        let id = self.starts.len() as u32;
        self.starts.push(self.values.len() as u32);
        id
    }

    /// Append a value to the current range. Values must arrive in strictly
    /// increasing order within one range; the callers own that ordering.
    pub fn collect(&mut self, value: u32) {
        debug_assert!(!self.starts.is_empty(), "collect before start_range");
        debug_assert!(
            self.values.len() == *self.starts.last().unwrap() as usize
                || *self.values.last().unwrap() < value,
            "range values must be strictly increasing"
        );
        self.values.push(value);
    }

    /// Append without the ordering contract. Root registries store action
    /// words, which carry no ordering of their own.
    pub fn append(&mut self, value: u32) {
        debug_assert!(!self.starts.is_empty(), "append before start_range");
        self.values.push(value);
    }

    /// Number of ranges, which is also one past the largest classifier id.
    pub fn capacity(&self) -> u32 {
        self.starts.len() as u32
    }

    pub fn range(&self, i: u32) -> &[u32] {
        let i = i as usize;
        let from = self.starts[i] as usize;
        let to = self
            .starts
            .get(i + 1)
            .map(|&s| s as usize)
            .unwrap_or(self.values.len());
        &self.values[from..to]
    }

    pub fn ranges(&self) -> impl Iterator<Item = (u32, &[u32])> + '_ {
        (0..self.capacity()).map(move |i| (i, self.range(i)))
    }

    /// Total stored values, used when sizing the arena.
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// A registry with a single range holding `0..count`: the synthetic
    /// left child used when the signature has exactly one attribute.
    pub fn dummy(count: u32) -> Self {
        let mut r = Self::new();
        r.start_range();
        for id in 0..count {
            r.collect(id);
        }
        r
    }

    /// Write this registry into the arena behind `block`.
    pub(crate) fn store(
        &self,
        arena: &mut Arena,
        block: *mut RegistryBlock,
    ) -> Result<(), Error> {
        let mut starts = self.starts.clone();
        starts.push(self.values.len() as u32);
        let starts = offset::store_array(arena, &starts)?;
        let values = offset::store_array(arena, &self.values)?;
        unsafe {
            (*block).count = self.capacity();
            (*block)._pad = 0;
            (*block).starts.set(starts);
            (*block).values = OffsetPtr::null();
            if !values.is_null() {
                (*block).values.set(values);
            }
        }
        Ok(())
    }
}

/// Arena-resident registry. `starts` holds `count + 1` entries so every
/// range is a pair of consecutive starts.
#[repr(C)]
pub struct RegistryBlock {
    pub(crate) count: u32,
    pub(crate) _pad: u32,
    pub(crate) starts: OffsetPtr<u32>,
    pub(crate) values: OffsetPtr<u32>,
}

impl RegistryBlock {
    pub fn capacity(&self) -> u32 {
        self.count
    }

    pub fn range(&self, i: u32) -> &[u32] {
        if i >= self.count {
            return &[];
        }
        unsafe {
            let starts = self.starts.as_slice(self.count as usize + 1);
            let from = starts[i as usize] as usize;
            let to = starts[i as usize + 1] as usize;
            &self.values.as_slice(to)[from..]
        }
    }

    pub(crate) fn release(&self, arena: &mut Arena) {
        unsafe {
            let starts = self.starts.get();
            if !starts.is_null() {
                arena.free(
                    offset::arena_offset(arena, starts),
                    offset::array_bytes::<u32>(self.count as usize + 1),
                );
            }
            let values = self.values.get();
            if !values.is_null() {
                let len = *self
                    .starts
                    .as_slice(self.count as usize + 1)
                    .last()
                    .unwrap() as usize;
                arena.free(
                    offset::arena_offset(arena, values),
                    offset::array_bytes::<u32>(len),
                );
            }
        }
    }
}

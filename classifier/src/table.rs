// Copyright 2024 Oxide Computer Company

//! Value table: a 2-D map from child classifier pairs to a parent
//! classifier, compacted by generation history. Every cell remembers the set
//! of generations that touched it as a bitmap; cells with equal histories
//! collapse to one dense parent id. Id 0 is reserved for cells never
//! touched, the "no classifier" sentinel.
//!
//! The mergers drive one generation per rule id (ascending), so a cell's
//! bitmap read out in ascending bit order is exactly the ordered rule-id
//! intersection list of its child pair.

use std::collections::HashMap;
use std::hash::Hash;

use bitvec::prelude::*;

use crate::arena::Arena;
use crate::error::Error;
use crate::offset::{self, OffsetPtr};

pub type Trace = BitVec<u64, Lsb0>;

pub struct ValueTable {
    height: u32,
    width: u32,
    gen: Option<u32>,
    cells: HashMap<u64, Trace>,
    dense: Vec<u32>,
    classes: Vec<Trace>,
}

impl ValueTable {
    pub fn new(height: u32, width: u32) -> Result<Self, Error> {
        if height as u64 * width as u64 > u32::MAX as u64 {
            return Err(Error::CapacityOverflow);
        }
        Ok(Self {
            height,
            width,
            gen: None,
            cells: HashMap::new(),
            dense: Vec::new(),
            classes: Vec::new(),
        })
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    /// Advance to the next generation and return its id. Generations start
    /// at 0 and the mergers keep them aligned with rule ids.
    pub fn new_gen(&mut self) -> u32 {
        let next = match self.gen {
            None => 0,
            Some(g) => g + 1,
        };
        self.gen = Some(next);
        next
    }

    /// Mark cell (l, r) as touched in the current generation. Idempotent
    /// within a generation.
    pub fn touch(&mut self, l: u32, r: u32) {
        debug_assert!(l < self.height && r < self.width);
        let gen = self.gen.expect("touch before new_gen") as usize;
        let trace = self
            .cells
            .entry(self.cell_key(l, r))
            .or_insert_with(Trace::new);
        if trace.len() <= gen {
            trace.resize(gen + 1, false);
        }
        trace.set(gen, true);
    }

    /// The most recent generation that touched (l, r), if any.
    pub fn last_touched(&self, l: u32, r: u32) -> Option<u32> {
        self.cells
            .get(&self.cell_key(l, r))
            .and_then(|t| t.last_one())
            .map(|g| g as u32)
    }

    /// Collapse cells with identical generation histories into dense ids.
    /// Returns the resulting capacity (classes plus the sentinel).
    pub fn compact(&mut self) -> u32 {
        self.compact_by(|trace| trace.to_bitvec())
    }

    /// Like `compact`, but equivalence is taken on `key_of(history)` instead
    /// of the history itself. The root merge keys on action lists.
    pub fn compact_by<K: Hash + Eq>(
        &mut self,
        key_of: impl Fn(&BitSlice<u64, Lsb0>) -> K,
    ) -> u32 {
        self.dense = vec![0u32; self.height as usize * self.width as usize];
        self.classes.clear();

        // Walk cells row-major so id assignment never depends on hash
        // iteration order.
        let mut keys: Vec<u64> = self.cells.keys().copied().collect();
        keys.sort_unstable();

        let mut ids: HashMap<K, u32> = HashMap::new();
        for cell in keys {
            let mut trace = self.cells[&cell].clone();
            let top = match trace.last_one() {
                Some(t) => t,
                None => continue,
            };
            trace.truncate(top + 1);

            let next = self.classes.len() as u32 + 1;
            let id = *ids.entry(key_of(&trace)).or_insert_with(|| {
                self.classes.push(trace);
                next
            });
            self.dense[cell as usize] = id;
        }
        self.capacity()
    }

    /// Parent classifier for (l, r). Valid after `compact`.
    pub fn get(&self, l: u32, r: u32) -> u32 {
        debug_assert!(!self.dense.is_empty(), "get before compact");
        self.dense[self.cell_key(l, r) as usize]
    }

    /// Class count including the sentinel; equals the parent registry's
    /// capacity.
    pub fn capacity(&self) -> u32 {
        self.classes.len() as u32 + 1
    }

    /// Representative histories, indexed by `class id - 1`.
    pub fn classes(&self) -> &[Trace] {
        &self.classes
    }

    pub(crate) fn into_dense(self) -> DenseTable {
        debug_assert!(!self.dense.is_empty() || self.height * self.width == 0);
        DenseTable {
            height: self.height,
            width: self.width,
            cells: self.dense,
        }
    }

    fn cell_key(&self, l: u32, r: u32) -> u64 {
        l as u64 * self.width as u64 + r as u64
    }
}

/// A compacted table detached from its build scratch, ready to be stored.
#[derive(Debug, Clone)]
pub(crate) struct DenseTable {
    pub height: u32,
    pub width: u32,
    pub cells: Vec<u32>,
}

impl DenseTable {
    pub fn get(&self, l: u32, r: u32) -> u32 {
        self.cells[l as usize * self.width as usize + r as usize]
    }

    pub(crate) fn store(
        &self,
        arena: &mut Arena,
        block: *mut TableBlock,
    ) -> Result<(), Error> {
        let cells = offset::store_array(arena, &self.cells)?;
        unsafe {
            (*block).height = self.height;
            (*block).width = self.width;
            (*block).cells = OffsetPtr::null();
            if !cells.is_null() {
                (*block).cells.set(cells);
            }
        }
        Ok(())
    }
}

/// Arena-resident table.
#[repr(C)]
pub struct TableBlock {
    pub(crate) height: u32,
    pub(crate) width: u32,
    pub(crate) cells: OffsetPtr<u32>,
}

impl TableBlock {
    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn get(&self, l: u32, r: u32) -> u32 {
        debug_assert!(l < self.height && r < self.width);
        let len = self.height as usize * self.width as usize;
        unsafe {
            self.cells.as_slice(len)[l as usize * self.width as usize + r as usize]
        }
    }

    pub(crate) fn release(&self, arena: &mut Arena) {
        unsafe {
            let cells = self.cells.get();
            if !cells.is_null() {
                arena.free(
                    offset::arena_offset(arena, cells),
                    offset::array_bytes::<u32>(
                        self.height as usize * self.width as usize,
                    ),
                );
            }
        }
    }
}

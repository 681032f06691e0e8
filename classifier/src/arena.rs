// Copyright 2024 Oxide Computer Company

//! Buddy arena backing a compiled filter. The whole filter is carved out of
//! one power-of-two region so that every internal reference can be stored as
//! a self-relative offset and the region can be mapped anywhere.
//!
//! Blocks come in power-of-two size classes starting at a 64-byte granule.
//! Each class keeps an intrusive doubly-linked free list; a bitmask of
//! non-empty classes makes the smallest-fit probe a single trailing-zeros.
//! Freed blocks coalesce with their buddy when the buddy is free at the same
//! class, tracked by a per-class free-block bitmap.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

use bitvec::prelude::*;

use crate::error::Error;

/// Minimum block size and the alignment ceiling. A block of size B is
/// aligned to min(B, GRANULE).
pub const GRANULE: usize = 64;

const NONE: u32 = u32::MAX;

#[repr(C)]
struct FreeNode {
    next: u32,
    prev: u32,
}

pub struct Arena {
    base: NonNull<u8>,
    capacity: usize,
    max_order: u32,

    /// Head granule index of the free list per order, NONE when empty.
    free_lists: Vec<u32>,

    /// Orders with a non-empty free list.
    nonempty: u64,

    /// One bit per block slot per order; set while the block is free at
    /// exactly that order. Drives buddy coalescing.
    free_map: Vec<BitVec<u64, Lsb0>>,

    allocated: u64,
    freed: u64,
}

impl Arena {
    /// Create an arena of at least `bytes` capacity, rounded up to a power
    /// of two no smaller than one granule.
    pub fn with_capacity(bytes: usize) -> Result<Self, Error> {
        let capacity = bytes.max(GRANULE).next_power_of_two();
        let max_order = (capacity / GRANULE).trailing_zeros();

        let layout = Layout::from_size_align(capacity, GRANULE)
            .map_err(|_| Error::OutOfMemory)?;
        let base = unsafe { alloc_zeroed(layout) };
        let base = NonNull::new(base).ok_or(Error::OutOfMemory)?;

        let mut free_map = Vec::with_capacity(max_order as usize + 1);
        for order in 0..=max_order {
            let slots = capacity / (GRANULE << order);
            free_map.push(BitVec::repeat(false, slots));
        }

        let mut arena = Self {
            base,
            capacity,
            max_order,
            free_lists: vec![NONE; max_order as usize + 1],
            nonempty: 0,
            free_map,
            allocated: 0,
            freed: 0,
        };
        arena.push(max_order, 0);
        Ok(arena)
    }

    pub fn base(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes handed out so far, counted at block granularity.
    pub fn allocated(&self) -> u64 {
        self.allocated
    }

    /// Bytes returned so far, counted at block granularity.
    pub fn freed(&self) -> u64 {
        self.freed
    }

    /// Allocate a block of at least `size` bytes, returning its offset from
    /// the region base. The block never moves.
    pub fn alloc(&mut self, size: usize) -> Option<usize> {
        let order = self.order_for(size)?;

        let mask = self.nonempty >> order;
        if mask == 0 {
            return None;
        }
        let mut at = order + mask.trailing_zeros();

        let off = self.pop(at);
        while at > order {
            at -= 1;
            self.push(at, off + (GRANULE << at));
        }

        self.allocated += (GRANULE << order) as u64;
        Some(off)
    }

    /// Return the block at `offset`. `size` must be the size passed to the
    /// matching `alloc`.
    pub fn free(&mut self, offset: usize, size: usize) {
        let mut order = match self.order_for(size) {
            Some(o) => o,
            None => return,
        };
        self.freed += (GRANULE << order) as u64;

        let mut off = offset;
        while order < self.max_order {
            let buddy = off ^ (GRANULE << order);
            let slot = buddy / (GRANULE << order);
            if !self.free_map[order as usize][slot] {
                break;
            }
            self.detach(order, buddy);
            off = off.min(buddy);
            order += 1;
        }
        self.push(order, off);
    }

    fn order_for(&self, size: usize) -> Option<u32> {
        let granules = size.max(1).div_ceil(GRANULE);
        let order = granules.next_power_of_two().trailing_zeros();
        (order <= self.max_order).then_some(order)
    }

    fn node(&self, off: usize) -> *mut FreeNode {
        debug_assert!(off + GRANULE <= self.capacity);
        unsafe { self.base.as_ptr().add(off) as *mut FreeNode }
    }

    fn push(&mut self, order: u32, off: usize) {
        let idx = (off / GRANULE) as u32;
        let head = self.free_lists[order as usize];
        unsafe {
            (*self.node(off)).next = head;
            (*self.node(off)).prev = NONE;
            if head != NONE {
                (*self.node(head as usize * GRANULE)).prev = idx;
            }
        }
        self.free_lists[order as usize] = idx;
        self.nonempty |= 1 << order;

        let slot = off / (GRANULE << order);
        self.free_map[order as usize].set(slot, true);
    }

    fn pop(&mut self, order: u32) -> usize {
        let idx = self.free_lists[order as usize];
        debug_assert_ne!(idx, NONE);
        let off = idx as usize * GRANULE;
        let next = unsafe { (*self.node(off)).next };
        self.free_lists[order as usize] = next;
        if next != NONE {
            unsafe { (*self.node(next as usize * GRANULE)).prev = NONE };
        } else {
            self.nonempty &= !(1 << order);
        }

        let slot = off / (GRANULE << order);
        self.free_map[order as usize].set(slot, false);
        off
    }

    fn detach(&mut self, order: u32, off: usize) {
        let (next, prev) = unsafe {
            let n = self.node(off);
            ((*n).next, (*n).prev)
        };
        if prev != NONE {
            unsafe { (*self.node(prev as usize * GRANULE)).next = next };
        } else {
            self.free_lists[order as usize] = next;
        }
        if next != NONE {
            unsafe { (*self.node(next as usize * GRANULE)).prev = prev };
        }
        if self.free_lists[order as usize] == NONE {
            self.nonempty &= !(1 << order);
        }

        let slot = off / (GRANULE << order);
        self.free_map[order as usize].set(slot, false);
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        let layout =
            Layout::from_size_align(self.capacity, GRANULE).expect("arena layout");
        unsafe { dealloc(self.base.as_ptr(), layout) };
    }
}

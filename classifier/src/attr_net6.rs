// Copyright 2024 Oxide Computer Company

//! IPv6 prefix attribute. Addresses split into 64-bit halves with an LPM
//! partition per half; the halves are joined by the same merge machinery
//! the tree uses, driven per (rule, net) pseudo-id so that a rule with
//! several nets never matches a hi half of one net against the lo half of
//! another. The resulting pseudo-id lists map back to deduplicated rule-id
//! lists, giving one logical leaf with an internal hi x lo join table.

use crate::arena::Arena;
use crate::attr::{assign_classes, push_dedup, AttrPlan, BuiltAttr, SegBlock};
use crate::error::Error;
use crate::lpm::Lpm;
use crate::merge::merge_collect;
use crate::offset;
use crate::registry::Registry;
use crate::rule::{Net6, Rule};
use crate::table::{DenseTable, TableBlock};

#[derive(Clone, Copy)]
pub(crate) enum Side {
    Src,
    Dst,
}

struct Pseudo {
    rule: u32,
    hi: u64,
    hi_len: u8,
    lo: u64,
    lo_len: u8,
}

fn half(
    pseudos: &[Pseudo],
    pick: impl Fn(&Pseudo) -> (u64, u8),
) -> Result<(Registry, Vec<u64>, Vec<u32>), Error> {
    let mut lpm = Lpm::<u64>::new();
    for (g, p) in pseudos.iter().enumerate() {
        let (key, len) = pick(p);
        lpm.insert(key, len, g as u32);
    }
    lpm.compact();

    let mut lists = vec![Vec::new(); lpm.leaf_count()];
    for (g, p) in pseudos.iter().enumerate() {
        let (key, len) = pick(p);
        let (first, last) = Lpm::<u64>::span(key, len);
        lpm.range_iterate(first, last, |leaf| {
            push_dedup(&mut lists[leaf], g as u32);
        });
    }

    let (registry, ids) = assign_classes(lists)?;
    Ok((registry, lpm.leaf_bounds().to_vec(), ids))
}

pub(crate) fn build(rules: &[Rule], side: Side) -> Result<BuiltAttr, Error> {
    fn nets_of(side: Side, rule: &Rule) -> &[Net6] {
        match side {
            Side::Src => &rule.net6_src,
            Side::Dst => &rule.net6_dst,
        }
    }

    let mut pseudos = Vec::new();
    for (i, rule) in rules.iter().enumerate() {
        let nets = nets_of(side, rule);
        if nets.is_empty() {
            // Wildcard rules carry a ::/0 pseudo-net.
            pseudos.push(Pseudo {
                rule: i as u32,
                hi: 0,
                hi_len: 0,
                lo: 0,
                lo_len: 0,
            });
            continue;
        }
        for net in nets {
            pseudos.push(Pseudo {
                rule: i as u32,
                hi: net.hi(),
                hi_len: net.pref_hi,
                lo: net.lo(),
                lo_len: net.pref_lo,
            });
        }
    }

    let (hi_reg, hi_bounds, hi_ids) = half(&pseudos, |p| (p.hi, p.hi_len))?;
    let (lo_reg, lo_bounds, lo_ids) = half(&pseudos, |p| (p.lo, p.lo_len))?;

    let (table, pseudo_parent) =
        merge_collect(&hi_reg, &lo_reg, pseudos.len() as u32)?;

    // Pseudo-ids are issued in rule order, so mapping them back keeps the
    // lists ascending; a rule covering one cell through two nets collapses.
    let lists: Vec<Vec<u32>> = (0..pseudo_parent.capacity())
        .map(|c| {
            let mut out = Vec::new();
            for &g in pseudo_parent.range(c) {
                push_dedup(&mut out, pseudos[g as usize].rule);
            }
            out
        })
        .collect();
    let (registry, remap) = assign_classes(lists)?;

    let mut join = table.into_dense();
    for cell in &mut join.cells {
        *cell = remap[*cell as usize];
    }

    Ok(BuiltAttr {
        registry,
        plan: AttrPlan::Net6 {
            hi_bounds,
            hi_ids,
            lo_bounds,
            lo_ids,
            join,
        },
    })
}

/// Arena-resident IPv6 state.
#[repr(C)]
pub(crate) struct Net6Block {
    pub hi: SegBlock<u64>,
    pub lo: SegBlock<u64>,
    pub join: TableBlock,
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn store(
    arena: &mut Arena,
    hi_bounds: &[u64],
    hi_ids: &[u32],
    lo_bounds: &[u64],
    lo_ids: &[u32],
    join: &DenseTable,
) -> Result<*mut Net6Block, Error> {
    let block = offset::store_block::<Net6Block>(arena)?;
    unsafe {
        SegBlock::store(arena, hi_bounds, hi_ids, &mut (*block).hi)?;
        SegBlock::store(arena, lo_bounds, lo_ids, &mut (*block).lo)?;
        join.store(arena, &mut (*block).join)?;
    }
    Ok(block)
}

pub(crate) fn query(block: &Net6Block, hi: u64, lo: u64) -> u32 {
    block.join.get(block.hi.lookup(hi), block.lo.lookup(lo))
}

pub(crate) fn release(block: &Net6Block, arena: &mut Arena) {
    block.hi.release(arena);
    block.lo.release(arena);
    block.join.release(arena);
}

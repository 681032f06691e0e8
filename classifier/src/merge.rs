// Copyright 2024 Oxide Computer Company

//! The two merge operators that fold child registries up the tree.
//!
//! Merge-and-collect builds an inner vertex: child classifier pairs are
//! equivalent when their rule-id intersections are equal. Merge-and-set
//! builds the root: pairs are equivalent when their terminal-truncated
//! action lists are equal. Both avoid walking the full Cartesian product by
//! inverting each child registry (rule id -> ranges containing it) and
//! driving one compactor generation per rule in priority order.

use crate::error::Error;
use crate::registry::Registry;
use crate::rule::Rule;
use crate::table::ValueTable;

/// Rule id -> ids of the ranges that contain it.
fn invert(reg: &Registry, ids: u32) -> Vec<Vec<u32>> {
    let mut index = vec![Vec::new(); ids as usize];
    for (range, values) in reg.ranges() {
        for &v in values {
            index[v as usize].push(range);
        }
    }
    index
}

/// Merge two child registries into an inner-vertex table and its parent
/// registry. Generation g of the table corresponds to id g, so a cell's
/// history is the ordered intersection of its children's ranges.
pub(crate) fn merge_collect(
    left: &Registry,
    right: &Registry,
    ids: u32,
) -> Result<(ValueTable, Registry), Error> {
    let mut table = ValueTable::new(left.capacity(), right.capacity())?;
    let lx = invert(left, ids);
    let rx = invert(right, ids);

    for g in 0..ids {
        table.new_gen();
        for &l in &lx[g as usize] {
            for &r in &rx[g as usize] {
                table.touch(l, r);
            }
        }
    }

    table.compact();

    let mut parent = Registry::new();
    parent.start_range(); // classifier 0: the empty-intersection sentinel
    for trace in table.classes() {
        parent.start_range();
        for g in trace.iter_ones() {
            parent.collect(g as u32);
        }
    }
    Ok((table, parent))
}

/// Merge at the root. Touches stop accumulating once a cell's list has gone
/// terminal, equivalence is taken on the resulting action list, and the
/// parent registry stores action words instead of rule ids.
pub(crate) fn merge_set(
    left: &Registry,
    right: &Registry,
    rules: &[Rule],
) -> Result<(ValueTable, Registry), Error> {
    let mut table = ValueTable::new(left.capacity(), right.capacity())?;
    let lx = invert(left, rules.len() as u32);
    let rx = invert(right, rules.len() as u32);

    for (g, _) in rules.iter().enumerate() {
        table.new_gen();
        for &l in &lx[g] {
            for &r in &rx[g] {
                if let Some(last) = table.last_touched(l, r) {
                    if rules[last as usize].is_terminal() {
                        continue;
                    }
                }
                table.touch(l, r);
            }
        }
    }

    table.compact_by(|trace| {
        trace
            .iter_ones()
            .map(|g| rules[g].action)
            .collect::<Vec<u32>>()
    });

    let mut actions = Registry::new();
    actions.start_range();
    for trace in table.classes() {
        actions.start_range();
        for g in trace.iter_ones() {
            actions.append(rules[g].action);
        }
    }
    Ok((table, actions))
}

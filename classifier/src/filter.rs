// Copyright 2024 Oxide Computer Company

//! Compile driver and query engine. The tree is array-encoded: for a
//! signature of n attributes, vertex 1 is the root (vertex 0 when n = 1),
//! children of v are 2v and 2v+1, and attribute i binds to leaf n+i.
//! Compile folds the leaf registries bottom-up with merge-and-collect and
//! finishes the root with merge-and-set; the frozen result lives entirely
//! in one arena behind self-relative offsets.

use std::fmt::Write as _;
use std::mem::size_of;
use std::ptr::NonNull;

use colored::Colorize;
use slog::{debug, info, o, Discard, Logger};

use crate::arena::{Arena, GRANULE};
use crate::attr::{
    self, AttrBlock, AttrKind, AttrPlan, BuiltAttr, SegBlock,
};
use crate::error::Error;
use crate::merge::{merge_collect, merge_set};
use crate::offset::{self, OffsetPtr};
use crate::packet::Packet;
use crate::registry::{Registry, RegistryBlock};
use crate::rule::{action_categories, action_terminal, check_rules, Rule};
use crate::table::{DenseTable, TableBlock};

/// Longest supported signature. Query slot arrays are sized by this so a
/// query never allocates.
pub const MAX_SIGNATURE: usize = 8;

const ALL_KINDS: [AttrKind; 8] = [
    AttrKind::PortSrc,
    AttrKind::PortDst,
    AttrKind::Proto,
    AttrKind::Net4Src,
    AttrKind::Net4Dst,
    AttrKind::Net6Src,
    AttrKind::Net6Dst,
    AttrKind::Vlan,
];

#[repr(C)]
struct FilterHead {
    attr_count: u32,
    table_count: u32,
    tables: OffsetPtr<TableBlock>,
    attrs: OffsetPtr<AttrBlock>,
    root: RegistryBlock,
}

/// A compiled, immutable filter. Queries are read-only and re-entrant;
/// many threads may query one filter concurrently.
pub struct Filter {
    arena: Arena,
    head: NonNull<FilterHead>,
    signature: Vec<AttrKind>,
}

// The filter performs no stores after compile returns; the arena region is
// owned and never moves.
unsafe impl Send for Filter {}
unsafe impl Sync for Filter {}

pub fn compile(
    signature: &[AttrKind],
    rules: &[Rule],
) -> Result<Filter, Error> {
    compile_with_log(signature, rules, Logger::root(Discard, o!()))
}

pub fn compile_with_log(
    signature: &[AttrKind],
    rules: &[Rule],
    log: Logger,
) -> Result<Filter, Error> {
    let n = signature.len();
    if n == 0 {
        return Err(Error::EmptySignature);
    }
    if n > MAX_SIGNATURE || rules.len() as u64 > u32::MAX as u64 {
        return Err(Error::CapacityOverflow);
    }
    check_rules(rules)?;
    for (i, rule) in rules.iter().enumerate() {
        for kind in ALL_KINDS {
            if !signature.contains(&kind) && attr::rule_constrains(rule, kind)
            {
                return Err(Error::invalid_rule(
                    i,
                    format!(
                        "rule constrains {} which is not in the signature",
                        kind.name()
                    ),
                ));
            }
        }
    }

    // Leaves first.
    let mut plans = Vec::with_capacity(n);
    let mut regs: Vec<Option<Registry>> = vec![None; 2 * n];
    for (i, kind) in signature.iter().enumerate() {
        let BuiltAttr { registry, plan } = attr::build_attr(*kind, rules)?;
        debug!(log, "attribute compiled";
            "attr" => kind.name(),
            "classifiers" => registry.capacity()
        );
        regs[n + i] = Some(registry);
        plans.push(plan);
    }

    // Fold inner vertices bottom-up; the root merge is merge-and-set.
    let rule_count = rules.len() as u32;
    let mut tables: Vec<Option<DenseTable>> = (0..n).map(|_| None).collect();
    let mut root = None;
    if n == 1 {
        let dummy = Registry::dummy(rule_count);
        let leaf = regs[1].take().unwrap();
        let (table, actions) = merge_set(&dummy, &leaf, rules)?;
        tables[0] = Some(table.into_dense());
        root = Some(actions);
    } else {
        for v in (1..n).rev() {
            let left = regs[2 * v].take().unwrap();
            let right = regs[2 * v + 1].take().unwrap();
            if v == 1 {
                let (table, actions) = merge_set(&left, &right, rules)?;
                tables[1] = Some(table.into_dense());
                root = Some(actions);
            } else {
                let (table, parent) =
                    merge_collect(&left, &right, rule_count)?;
                debug!(log, "vertex merged";
                    "vertex" => v,
                    "dims" => format!("{}x{}", left.capacity(), right.capacity()),
                    "classifiers" => parent.capacity()
                );
                tables[v] = Some(table.into_dense());
                regs[v] = Some(parent);
            }
        }
    }
    let root = root.unwrap();

    let filter = freeze(signature, &plans, &tables, &root)?;
    info!(log, "filter compiled";
        "rules" => rules.len(),
        "attrs" => n,
        "root_actions" => root.capacity(),
        "arena_bytes" => filter.arena.capacity()
    );
    Ok(filter)
}

fn block_cost(bytes: usize) -> usize {
    if bytes == 0 {
        0
    } else {
        bytes.next_power_of_two().max(GRANULE)
    }
}

fn plan_cost(plan: &AttrPlan) -> usize {
    match plan {
        AttrPlan::Seg16 { bounds, ids } => {
            block_cost(size_of::<SegBlock<u16>>())
                + block_cost(2 * bounds.len())
                + block_cost(4 * ids.len())
        }
        AttrPlan::Seg32 { bounds, ids } => {
            block_cost(size_of::<SegBlock<u32>>())
                + block_cost(4 * bounds.len())
                + block_cost(4 * ids.len())
        }
        AttrPlan::Proto(p) => {
            block_cost(size_of::<crate::attr_proto::ProtoBlock>())
                + block_cost(p.bounds.len())
                + block_cost(4 * p.ids.len())
                + block_cost(
                    size_of::<crate::attr_proto::FlagRefineBlock>()
                        * p.refines.len(),
                )
                + p.refines
                    .iter()
                    .map(|r| block_cost(4 * r.table.len()))
                    .sum::<usize>()
        }
        AttrPlan::Net6 {
            hi_bounds,
            hi_ids,
            lo_bounds,
            lo_ids,
            join,
        } => {
            block_cost(size_of::<crate::attr_net6::Net6Block>())
                + block_cost(8 * hi_bounds.len())
                + block_cost(4 * hi_ids.len())
                + block_cost(8 * lo_bounds.len())
                + block_cost(4 * lo_ids.len())
                + block_cost(4 * join.cells.len())
        }
    }
}

fn freeze(
    signature: &[AttrKind],
    plans: &[AttrPlan],
    tables: &[Option<DenseTable>],
    root: &Registry,
) -> Result<Filter, Error> {
    let n = signature.len();

    let mut bytes = block_cost(size_of::<FilterHead>())
        + block_cost(size_of::<TableBlock>() * n)
        + block_cost(size_of::<AttrBlock>() * n)
        + block_cost(4 * (root.capacity() as usize + 1))
        + block_cost(4 * root.value_count());
    for table in tables.iter().flatten() {
        bytes += block_cost(4 * table.cells.len());
    }
    for plan in plans {
        bytes += plan_cost(plan);
    }
    // Headroom for buddy split residue.
    let mut arena = Arena::with_capacity(bytes * 2)?;

    let head = offset::store_block::<FilterHead>(&mut arena)?;
    let table_blocks = offset::store_raw::<TableBlock>(&mut arena, n)?;
    for (v, slot) in tables.iter().enumerate() {
        let block = unsafe { table_blocks.add(v) };
        match slot {
            Some(table) => table.store(&mut arena, block)?,
            None => unsafe {
                (*block).height = 0;
                (*block).width = 0;
                (*block).cells = OffsetPtr::null();
            },
        }
    }

    let attr_blocks = offset::store_raw::<AttrBlock>(&mut arena, n)?;
    for (i, plan) in plans.iter().enumerate() {
        attr::store_plan(&mut arena, signature[i], plan, unsafe {
            attr_blocks.add(i)
        })?;
    }

    unsafe {
        (*head).attr_count = n as u32;
        (*head).table_count = n as u32;
        (*head).tables.set(table_blocks);
        (*head).attrs.set(attr_blocks);
        root.store(&mut arena, &mut (*head).root)?;
    }

    Ok(Filter {
        arena,
        head: NonNull::new(head).unwrap(),
        signature: signature.to_vec(),
    })
}

impl Filter {
    pub fn signature(&self) -> &[AttrKind] {
        &self.signature
    }

    fn head(&self) -> &FilterHead {
        unsafe { self.head.as_ref() }
    }

    /// Evaluate one packet. The returned slice borrows the filter's arena:
    /// the ordered action words of every matching rule, cut at the first
    /// terminal action. Never fails; a packet matching nothing yields an
    /// empty slice.
    pub fn query(&self, packet: &Packet) -> &[u32] {
        let head = self.head();
        let n = self.signature.len();
        let mut slots = [0u32; 2 * MAX_SIGNATURE];

        let attrs = unsafe { head.attrs.as_slice(n) };
        for (i, kind) in self.signature.iter().enumerate() {
            slots[n + i] =
                unsafe { attr::query_block(*kind, &attrs[i], packet) };
        }

        let tables =
            unsafe { head.tables.as_slice(head.table_count as usize) };
        let class = if n == 1 {
            tables[0].get(0, slots[1])
        } else {
            for v in (2..n).rev() {
                slots[v] = tables[v].get(slots[2 * v], slots[2 * v + 1]);
            }
            tables[1].get(slots[2], slots[3])
        };
        head.root.range(class)
    }

    /// Capacity of the root registry: the number of distinct action lists.
    pub fn action_lists(&self) -> u32 {
        self.head().root.capacity()
    }

    /// Human-readable summary of the compiled tree.
    pub fn dump(&self) -> String {
        let head = self.head();
        let n = self.signature.len();
        let mut out = String::new();

        writeln!(out, "{}", "attributes".dimmed()).unwrap();
        let attrs = unsafe { head.attrs.as_slice(n) };
        for (i, kind) in self.signature.iter().enumerate() {
            let state = unsafe { attrs[i].state.get() };
            let detail = unsafe {
                match kind {
                    AttrKind::PortSrc
                    | AttrKind::PortDst
                    | AttrKind::Vlan => {
                        let b = &*(state as *const SegBlock<u16>);
                        format!("{} segments", b.count)
                    }
                    AttrKind::Net4Src | AttrKind::Net4Dst => {
                        let b = &*(state as *const SegBlock<u32>);
                        format!("{} segments", b.count)
                    }
                    AttrKind::Proto => {
                        let b = &*(state
                            as *const crate::attr_proto::ProtoBlock);
                        format!(
                            "{} segments, {} classes",
                            b.segs.count, b.class_count
                        )
                    }
                    AttrKind::Net6Src | AttrKind::Net6Dst => {
                        let b =
                            &*(state as *const crate::attr_net6::Net6Block);
                        format!(
                            "{}x{} halves, join {}x{}",
                            b.hi.count,
                            b.lo.count,
                            b.join.height(),
                            b.join.width(),
                        )
                    }
                }
            };
            writeln!(out, "  leaf {}: {} ({})", n + i, kind.name(), detail)
                .unwrap();
        }

        writeln!(out, "{}", "vertices".dimmed()).unwrap();
        let tables =
            unsafe { head.tables.as_slice(head.table_count as usize) };
        for (v, table) in tables.iter().enumerate() {
            if table.height() == 0 {
                continue;
            }
            writeln!(
                out,
                "  vertex {}: {}x{} table",
                v,
                table.height(),
                table.width()
            )
            .unwrap();
        }

        writeln!(out, "{}", "root".dimmed()).unwrap();
        writeln!(out, "  {} action lists", head.root.capacity()).unwrap();
        out
    }
}

impl Drop for Filter {
    fn drop(&mut self) {
        let head = self.head.as_ptr();
        let n = self.signature.len();
        unsafe {
            let tables = (*head).tables.get();
            for v in 0..(*head).table_count as usize {
                (*tables.add(v)).release(&mut self.arena);
            }
            self.arena.free(
                offset::arena_offset(&self.arena, tables),
                offset::array_bytes::<TableBlock>(n),
            );

            let attrs = (*head).attrs.get();
            for (i, kind) in self.signature.iter().enumerate() {
                attr::release_block(*kind, &*attrs.add(i), &mut self.arena);
            }
            self.arena.free(
                offset::arena_offset(&self.arena, attrs),
                offset::array_bytes::<AttrBlock>(n),
            );

            (*head).root.release(&mut self.arena);
            self.arena.free(
                offset::arena_offset(&self.arena, head),
                size_of::<FilterHead>(),
            );
        }
        debug_assert_eq!(
            self.arena.allocated(),
            self.arena.freed(),
            "filter teardown must return every arena block"
        );
    }
}

/// Keep only the actions whose category mask is 0 or names `category`,
/// compacting in place; collection stops after the first kept terminal
/// action. Returns the new count.
pub fn actions_with_category(actions: &mut [u32], category: u16) -> usize {
    let mut kept = 0;
    for i in 0..actions.len() {
        let action = actions[i];
        let mask = action_categories(action);
        let hit = mask == 0 || (category < 16 && mask & (1 << category) != 0);
        if hit {
            actions[kept] = action;
            kept += 1;
            if action_terminal(action) {
                break;
            }
        }
    }
    kept
}

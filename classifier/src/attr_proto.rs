// Copyright 2024 Oxide Computer Company

//! Protocol attribute. The protocol-number axis partitions like the port
//! axis; TCP flag masks then refine each classifier. For one rule-list
//! class, only the union U of its rules' enable|disable bits can change
//! which rules match, so the class gets one final classifier per value of
//! `flags & U`, indexed through a compressed-bits table. Classes with no
//! flag constraints map directly. A rule matches flags f when
//! `f & enable == enable` and `f & disable == 0`; non-TCP packets present
//! f = 0, so enable-constrained rules never match them.

use std::collections::HashMap;

use crate::arena::Arena;
use crate::attr::{
    assign_classes, partition_points, push_dedup, seg_of, AttrPlan, BuiltAttr,
    SegBlock,
};
use crate::error::Error;
use crate::offset::{self, OffsetPtr};
use crate::packet::Packet;
use crate::registry::Registry;
use crate::rule::{Rule, PROTO_UNSPEC};

pub(crate) struct ProtoPlan {
    pub bounds: Vec<u8>,
    /// Segment -> rule-list class.
    pub ids: Vec<u32>,
    /// One refinement per rule-list class.
    pub refines: Vec<FlagRefine>,
}

pub(crate) struct FlagRefine {
    /// Union of the class's enable|disable bits; 0 means no refinement.
    pub mask: u16,
    /// Final classifier when `mask == 0`.
    pub direct: u32,
    /// Final classifier per compressed `flags & mask` value otherwise.
    pub table: Vec<u32>,
}

/// Compress the mask bits of `value` into a dense index.
pub(crate) fn gather_bits(value: u16, mask: u16) -> usize {
    let mut index = 0usize;
    let mut out = 0;
    for bit in 0..16 {
        if mask & (1 << bit) != 0 {
            if value & (1 << bit) != 0 {
                index |= 1 << out;
            }
            out += 1;
        }
    }
    index
}

/// Inverse of `gather_bits`: expand a dense index onto the mask bits.
fn scatter_bits(index: usize, mask: u16) -> u16 {
    let mut value = 0u16;
    let mut out = 0;
    for bit in 0..16 {
        if mask & (1 << bit) != 0 {
            if index & (1 << out) != 0 {
                value |= 1 << bit;
            }
            out += 1;
        }
    }
    value
}

fn flags_match(rule: &Rule, flags: u16) -> bool {
    let p = &rule.proto;
    flags & p.tcp_enable == p.tcp_enable && flags & p.tcp_disable == 0
}

#[derive(Default)]
struct Interner {
    map: HashMap<Vec<u32>, u32>,
    lists: Vec<Vec<u32>>,
}

impl Interner {
    fn id(&mut self, list: Vec<u32>) -> u32 {
        if let Some(&id) = self.map.get(&list) {
            return id;
        }
        let id = self.lists.len() as u32;
        self.map.insert(list.clone(), id);
        self.lists.push(list);
        id
    }
}

pub(crate) fn build(rules: &[Rule]) -> Result<BuiltAttr, Error> {
    let mut spans: Vec<(u8, u8)> = Vec::new();
    for rule in rules {
        if rule.proto.number != PROTO_UNSPEC {
            spans.push((rule.proto.number, rule.proto.number));
        }
    }
    let bounds = partition_points(&spans);

    let mut lists = vec![Vec::new(); bounds.len()];
    for (i, rule) in rules.iter().enumerate() {
        if rule.proto.number == PROTO_UNSPEC {
            for list in &mut lists {
                push_dedup(list, i as u32);
            }
        } else {
            push_dedup(
                &mut lists[seg_of(&bounds, rule.proto.number)],
                i as u32,
            );
        }
    }
    let (by_number, ids) = assign_classes(lists)?;

    let mut interner = Interner::default();
    let mut refines = Vec::with_capacity(by_number.capacity() as usize);
    for class in 0..by_number.capacity() {
        let list = by_number.range(class);
        let mask = list
            .iter()
            .map(|&i| {
                let p = &rules[i as usize].proto;
                p.tcp_enable | p.tcp_disable
            })
            .fold(0u16, |acc, m| acc | m);

        if mask == 0 {
            let direct = interner.id(list.to_vec());
            refines.push(FlagRefine {
                mask,
                direct,
                table: Vec::new(),
            });
            continue;
        }

        let mut table = vec![0u32; 1 << mask.count_ones()];
        for (slot, entry) in table.iter_mut().enumerate() {
            let flags = scatter_bits(slot, mask);
            let matching: Vec<u32> = list
                .iter()
                .copied()
                .filter(|&i| flags_match(&rules[i as usize], flags))
                .collect();
            *entry = interner.id(matching);
        }
        refines.push(FlagRefine {
            mask,
            direct: 0,
            table,
        });
    }

    let mut registry = Registry::new();
    for list in &interner.lists {
        registry.start_range();
        for &v in list {
            registry.collect(v);
        }
    }

    Ok(BuiltAttr {
        registry,
        plan: AttrPlan::Proto(ProtoPlan {
            bounds,
            ids,
            refines,
        }),
    })
}

/// Arena-resident protocol state.
#[repr(C)]
pub(crate) struct ProtoBlock {
    pub segs: SegBlock<u8>,
    pub class_count: u32,
    pub _pad: u32,
    pub refines: OffsetPtr<FlagRefineBlock>,
}

#[repr(C)]
pub(crate) struct FlagRefineBlock {
    pub mask: u16,
    pub _pad: u16,
    pub direct: u32,
    pub table: OffsetPtr<u32>,
}

pub(crate) fn store(
    arena: &mut Arena,
    plan: &ProtoPlan,
) -> Result<*mut ProtoBlock, Error> {
    let block = offset::store_block::<ProtoBlock>(arena)?;
    unsafe {
        SegBlock::store(
            arena,
            &plan.bounds,
            &plan.ids,
            &mut (*block).segs as *mut SegBlock<u8>,
        )?;
        (*block).class_count = plan.refines.len() as u32;
        (*block)._pad = 0;

        let refines =
            offset::store_raw::<FlagRefineBlock>(arena, plan.refines.len())?;
        for (i, refine) in plan.refines.iter().enumerate() {
            let slot = refines.add(i);
            (*slot).mask = refine.mask;
            (*slot)._pad = 0;
            (*slot).direct = refine.direct;
            (*slot).table = OffsetPtr::null();
            let table = offset::store_array(arena, &refine.table)?;
            if !table.is_null() {
                (*slot).table.set(table);
            }
        }
        if !refines.is_null() {
            (*block).refines.set(refines);
        }
    }
    Ok(block)
}

pub(crate) fn query(block: &ProtoBlock, packet: &Packet) -> u32 {
    let class = block.segs.lookup(packet.proto);
    let refine = unsafe {
        &block.refines.as_slice(block.class_count as usize)[class as usize]
    };
    if refine.mask == 0 {
        return refine.direct;
    }
    let slot = gather_bits(packet.tcp_flags & refine.mask, refine.mask);
    unsafe { refine.table.as_slice(1 << refine.mask.count_ones())[slot] }
}

pub(crate) fn release(block: &ProtoBlock, arena: &mut Arena) {
    block.segs.release(arena);
    unsafe {
        let refines = block.refines.get();
        if refines.is_null() {
            return;
        }
        for i in 0..block.class_count as usize {
            let slot = &*refines.add(i);
            let table = slot.table.get();
            if !table.is_null() {
                arena.free(
                    offset::arena_offset(arena, table),
                    offset::array_bytes::<u32>(1 << slot.mask.count_ones()),
                );
            }
        }
        arena.free(
            offset::arena_offset(arena, refines),
            offset::array_bytes::<FlagRefineBlock>(block.class_count as usize),
        );
    }
}

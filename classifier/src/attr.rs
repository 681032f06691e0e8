// Copyright 2024 Oxide Computer Company

//! Attribute kinds and the machinery shared by their builders. Every
//! attribute partitions its full value axis into disjoint segments; a
//! segment's payload is the ascending list of rule ids whose constraint
//! covers it, with wildcard rules landing in every segment. Segments with
//! equal lists are deduplicated into one classifier, so the per-attribute
//! state a query consults is a sorted bound array plus a segment-to-
//! classifier map.

use std::collections::HashMap;

use num::PrimInt;
use serde::{Deserialize, Serialize};

use crate::arena::Arena;
use crate::error::Error;
use crate::offset::{self, OffsetPtr};
use crate::packet::Packet;
use crate::registry::Registry;
use crate::rule::Rule;
use crate::table::DenseTable;
use crate::{attr_net4, attr_net6, attr_port, attr_proto, attr_vlan};

/// One attribute of the classification signature. The signature's order is
/// part of the filter's identity: build and query must agree on it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum AttrKind {
    PortSrc,
    PortDst,
    Proto,
    Net4Src,
    Net4Dst,
    Net6Src,
    Net6Dst,
    Vlan,
}

impl AttrKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PortSrc => "port-src",
            Self::PortDst => "port-dst",
            Self::Proto => "proto",
            Self::Net4Src => "net4-src",
            Self::Net4Dst => "net4-dst",
            Self::Net6Src => "net6-src",
            Self::Net6Dst => "net6-dst",
            Self::Vlan => "vlan",
        }
    }

    pub(crate) fn code(&self) -> u32 {
        match self {
            Self::PortSrc => 0,
            Self::PortDst => 1,
            Self::Proto => 2,
            Self::Net4Src => 3,
            Self::Net4Dst => 4,
            Self::Net6Src => 5,
            Self::Net6Dst => 6,
            Self::Vlan => 7,
        }
    }
}

/// Build product of one attribute: its leaf registry plus the state the
/// query side needs, still in heap form. `filter::compile` freezes the plan
/// into the arena.
pub(crate) struct BuiltAttr {
    pub registry: Registry,
    pub plan: AttrPlan,
}

pub(crate) enum AttrPlan {
    /// Ports and VLAN: u16 axis, direct segment-to-classifier map.
    Seg16 { bounds: Vec<u16>, ids: Vec<u32> },

    /// IPv4: u32 axis over the LPM leaf partition.
    Seg32 { bounds: Vec<u32>, ids: Vec<u32> },

    /// Protocol with per-class TCP flag refinement.
    Proto(attr_proto::ProtoPlan),

    /// IPv6: two u64 half-axes joined by an internal merge table.
    Net6 {
        hi_bounds: Vec<u64>,
        hi_ids: Vec<u32>,
        lo_bounds: Vec<u64>,
        lo_ids: Vec<u32>,
        join: DenseTable,
    },
}

pub(crate) fn build_attr(
    kind: AttrKind,
    rules: &[Rule],
) -> Result<BuiltAttr, Error> {
    match kind {
        AttrKind::PortSrc => attr_port::build(rules, attr_port::Side::Src),
        AttrKind::PortDst => attr_port::build(rules, attr_port::Side::Dst),
        AttrKind::Proto => attr_proto::build(rules),
        AttrKind::Net4Src => attr_net4::build(rules, attr_net4::Side::Src),
        AttrKind::Net4Dst => attr_net4::build(rules, attr_net4::Side::Dst),
        AttrKind::Net6Src => attr_net6::build(rules, attr_net6::Side::Src),
        AttrKind::Net6Dst => attr_net6::build(rules, attr_net6::Side::Dst),
        AttrKind::Vlan => attr_vlan::build(rules),
    }
}

/// Does the rule constrain this attribute at all? Rules constraining an
/// attribute outside the signature are a signature mismatch.
pub(crate) fn rule_constrains(rule: &Rule, kind: AttrKind) -> bool {
    match kind {
        AttrKind::PortSrc => {
            rule.src_ports.iter().any(|r| !r.is_wildcard())
        }
        AttrKind::PortDst => {
            rule.dst_ports.iter().any(|r| !r.is_wildcard())
        }
        AttrKind::Proto => !rule.proto.is_wildcard(),
        AttrKind::Net4Src => {
            rule.net4_src.iter().any(|n| n.mask != [0; 4])
        }
        AttrKind::Net4Dst => {
            rule.net4_dst.iter().any(|n| n.mask != [0; 4])
        }
        AttrKind::Net6Src => {
            rule.net6_src.iter().any(|n| n.mask != [0; 16])
        }
        AttrKind::Net6Dst => {
            rule.net6_dst.iter().any(|n| n.mask != [0; 16])
        }
        AttrKind::Vlan => rule.vlan != crate::rule::VLAN_UNSPEC,
    }
}

/// Partition an axis by the endpoints of the given inclusive spans. The
/// result always starts at the axis minimum, so every key falls in exactly
/// one segment.
pub(crate) fn partition_points<K: PrimInt>(spans: &[(K, K)]) -> Vec<K> {
    let mut points = vec![K::min_value()];
    for &(from, to) in spans {
        points.push(from);
        if to < K::max_value() {
            points.push(to + K::one());
        }
    }
    points.sort_unstable();
    points.dedup();
    points
}

/// Index of the segment holding `key`.
pub(crate) fn seg_of<K: PrimInt>(bounds: &[K], key: K) -> usize {
    debug_assert!(!bounds.is_empty());
    bounds.partition_point(|&b| b <= key) - 1
}

/// Append `id` unless it is already the list's tail; a rule may cover one
/// segment through several of its own spans.
pub(crate) fn push_dedup(list: &mut Vec<u32>, id: u32) {
    if list.last() != Some(&id) {
        list.push(id);
    }
}

/// Collapse equal per-segment lists into dense classifier ids, in
/// first-seen segment order. Returns the leaf registry (one range per
/// class) and the segment-to-class map.
pub(crate) fn assign_classes(
    lists: Vec<Vec<u32>>,
) -> Result<(Registry, Vec<u32>), Error> {
    if lists.len() as u64 > u32::MAX as u64 {
        return Err(Error::CapacityOverflow);
    }
    let mut classes: HashMap<Vec<u32>, u32> = HashMap::new();
    let mut ids = Vec::with_capacity(lists.len());
    for list in lists {
        let next = classes.len() as u32;
        let id = *classes.entry(list).or_insert(next);
        ids.push(id);
    }
    let mut ordered: Vec<(&Vec<u32>, u32)> =
        classes.iter().map(|(k, &v)| (k, v)).collect();
    ordered.sort_by_key(|&(_, id)| id);
    let mut registry = Registry::new();
    for (list, _) in ordered {
        registry.start_range();
        for &v in list {
            registry.collect(v);
        }
    }
    Ok((registry, ids))
}

/// Arena-resident segment index, generic over the axis width.
#[repr(C)]
pub(crate) struct SegBlock<K> {
    pub count: u32,
    pub _pad: u32,
    pub bounds: OffsetPtr<K>,
    pub ids: OffsetPtr<u32>,
}

impl<K: PrimInt> SegBlock<K> {
    pub fn lookup(&self, key: K) -> u32 {
        unsafe {
            let bounds = self.bounds.as_slice(self.count as usize);
            let ids = self.ids.as_slice(self.count as usize);
            ids[seg_of(bounds, key)]
        }
    }

    pub(crate) fn store(
        arena: &mut Arena,
        bounds: &[K],
        ids: &[u32],
        block: *mut Self,
    ) -> Result<(), Error>
    where
        K: Copy,
    {
        debug_assert_eq!(bounds.len(), ids.len());
        let b = offset::store_array(arena, bounds)?;
        let i = offset::store_array(arena, ids)?;
        unsafe {
            (*block).count = bounds.len() as u32;
            (*block)._pad = 0;
            (*block).bounds.set(b);
            (*block).ids.set(i);
        }
        Ok(())
    }

    pub(crate) fn release(&self, arena: &mut Arena) {
        unsafe {
            let bounds = self.bounds.get();
            if !bounds.is_null() {
                arena.free(
                    offset::arena_offset(arena, bounds),
                    offset::array_bytes::<K>(self.count as usize),
                );
            }
            let ids = self.ids.get();
            if !ids.is_null() {
                arena.free(
                    offset::arena_offset(arena, ids),
                    offset::array_bytes::<u32>(self.count as usize),
                );
            }
        }
    }
}

/// Arena-resident attribute descriptor: the kind code plus a pointer to the
/// kind-specific state block.
#[repr(C)]
pub(crate) struct AttrBlock {
    pub kind: u32,
    pub _pad: u32,
    pub state: OffsetPtr<u8>,
}

/// Freeze a build plan into the arena and hook it up to `block`.
pub(crate) fn store_plan(
    arena: &mut Arena,
    kind: AttrKind,
    plan: &AttrPlan,
    block: *mut AttrBlock,
) -> Result<(), Error> {
    let state: *mut u8 = match plan {
        AttrPlan::Seg16 { bounds, ids } => {
            let b = offset::store_block::<SegBlock<u16>>(arena)?;
            SegBlock::store(arena, bounds, ids, b)?;
            b as *mut u8
        }
        AttrPlan::Seg32 { bounds, ids } => {
            let b = offset::store_block::<SegBlock<u32>>(arena)?;
            SegBlock::store(arena, bounds, ids, b)?;
            b as *mut u8
        }
        AttrPlan::Proto(plan) => {
            attr_proto::store(arena, plan)? as *mut u8
        }
        AttrPlan::Net6 {
            hi_bounds,
            hi_ids,
            lo_bounds,
            lo_ids,
            join,
        } => attr_net6::store(
            arena, hi_bounds, hi_ids, lo_bounds, lo_ids, join,
        )? as *mut u8,
    };
    unsafe {
        (*block).kind = kind.code();
        (*block)._pad = 0;
        (*block).state.set(state);
    }
    Ok(())
}

/// Classifier id for `packet` under the attribute at `block`.
///
/// # Safety
/// `kind` must be the kind `block` was stored with.
pub(crate) unsafe fn query_block(
    kind: AttrKind,
    block: &AttrBlock,
    packet: &Packet,
) -> u32 {
    let state = block.state.get();
    match kind {
        AttrKind::PortSrc => {
            (*(state as *const SegBlock<u16>)).lookup(packet.src_port)
        }
        AttrKind::PortDst => {
            (*(state as *const SegBlock<u16>)).lookup(packet.dst_port)
        }
        AttrKind::Vlan => {
            (*(state as *const SegBlock<u16>)).lookup(packet.vlan)
        }
        AttrKind::Proto => {
            attr_proto::query(&*(state as *const attr_proto::ProtoBlock), packet)
        }
        AttrKind::Net4Src => (*(state as *const SegBlock<u32>))
            .lookup(u32::from(packet.src_ip4)),
        AttrKind::Net4Dst => (*(state as *const SegBlock<u32>))
            .lookup(u32::from(packet.dst_ip4)),
        AttrKind::Net6Src => attr_net6::query(
            &*(state as *const attr_net6::Net6Block),
            Packet::ip6_hi(&packet.src_ip6),
            Packet::ip6_lo(&packet.src_ip6),
        ),
        AttrKind::Net6Dst => attr_net6::query(
            &*(state as *const attr_net6::Net6Block),
            Packet::ip6_hi(&packet.dst_ip6),
            Packet::ip6_lo(&packet.dst_ip6),
        ),
    }
}

/// Release a stored attribute's arena blocks.
///
/// # Safety
/// `kind` must be the kind `block` was stored with.
pub(crate) unsafe fn release_block(
    kind: AttrKind,
    block: &AttrBlock,
    arena: &mut Arena,
) {
    let state = block.state.get();
    match kind {
        AttrKind::PortSrc | AttrKind::PortDst | AttrKind::Vlan => {
            let b = &*(state as *const SegBlock<u16>);
            b.release(arena);
            arena.free(
                offset::arena_offset(arena, state),
                std::mem::size_of::<SegBlock<u16>>(),
            );
        }
        AttrKind::Net4Src | AttrKind::Net4Dst => {
            let b = &*(state as *const SegBlock<u32>);
            b.release(arena);
            arena.free(
                offset::arena_offset(arena, state),
                std::mem::size_of::<SegBlock<u32>>(),
            );
        }
        AttrKind::Proto => {
            attr_proto::release(&*(state as *const attr_proto::ProtoBlock), arena);
            arena.free(
                offset::arena_offset(arena, state),
                std::mem::size_of::<attr_proto::ProtoBlock>(),
            );
        }
        AttrKind::Net6Src | AttrKind::Net6Dst => {
            attr_net6::release(&*(state as *const attr_net6::Net6Block), arena);
            arena.free(
                offset::arena_offset(arena, state),
                std::mem::size_of::<attr_net6::Net6Block>(),
            );
        }
    }
}

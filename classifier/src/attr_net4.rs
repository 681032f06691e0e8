// Copyright 2024 Oxide Computer Company

//! IPv4 prefix attribute. Rule prefixes go into an LPM index whose leaf
//! partition becomes the segment axis; a rule covers every leaf its prefix
//! overlaps. Rules with no nets cover the whole axis.

use crate::attr::{assign_classes, push_dedup, AttrPlan, BuiltAttr};
use crate::error::Error;
use crate::lpm::Lpm;
use crate::rule::{Net4, Rule};

#[derive(Clone, Copy)]
pub(crate) enum Side {
    Src,
    Dst,
}

pub(crate) fn build(rules: &[Rule], side: Side) -> Result<BuiltAttr, Error> {
    fn nets_of(side: Side, rule: &Rule) -> &[Net4] {
        match side {
            Side::Src => &rule.net4_src,
            Side::Dst => &rule.net4_dst,
        }
    }

    let mut lpm = Lpm::<u32>::new();
    for (i, rule) in rules.iter().enumerate() {
        for net in nets_of(side, rule) {
            let len = net
                .prefix_len()
                .map_err(|_| Error::invalid_rule(i, "non-prefix ipv4 mask"))?;
            lpm.insert(u32::from_be_bytes(net.addr), len, i as u32);
        }
    }
    lpm.compact();

    let mut lists = vec![Vec::new(); lpm.leaf_count()];
    for (i, rule) in rules.iter().enumerate() {
        let nets = nets_of(side, rule);
        if nets.is_empty() {
            for list in &mut lists {
                push_dedup(list, i as u32);
            }
            continue;
        }
        for net in nets {
            lpm.range_iterate(net.first(), net.last(), |leaf| {
                push_dedup(&mut lists[leaf], i as u32);
            });
        }
    }

    let (registry, ids) = assign_classes(lists)?;
    Ok(BuiltAttr {
        registry,
        plan: AttrPlan::Seg32 {
            bounds: lpm.leaf_bounds().to_vec(),
            ids,
        },
    })
}

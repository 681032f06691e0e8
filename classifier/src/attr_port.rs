// Copyright 2024 Oxide Computer Company

//! Port-range attribute. Every rule's range endpoints partition the
//! [0, 65535] axis; a rule with no ranges, or with the full range, covers
//! every segment and so never narrows a match.

use crate::attr::{
    assign_classes, partition_points, push_dedup, seg_of, AttrPlan, BuiltAttr,
};
use crate::error::Error;
use crate::rule::Rule;

#[derive(Clone, Copy)]
pub(crate) enum Side {
    Src,
    Dst,
}

pub(crate) fn build(rules: &[Rule], side: Side) -> Result<BuiltAttr, Error> {
    fn ranges_of(side: Side, rule: &Rule) -> &Vec<crate::rule::PortRange> {
        match side {
            Side::Src => &rule.src_ports,
            Side::Dst => &rule.dst_ports,
        }
    }

    let mut spans: Vec<(u16, u16)> = Vec::new();
    for rule in rules {
        for range in ranges_of(side, rule) {
            spans.push((range.from, range.to));
        }
    }
    let bounds = partition_points(&spans);

    let mut lists = vec![Vec::new(); bounds.len()];
    for (i, rule) in rules.iter().enumerate() {
        let ranges = ranges_of(side, rule);
        if ranges.is_empty() {
            for list in &mut lists {
                push_dedup(list, i as u32);
            }
            continue;
        }
        for range in ranges {
            let from = seg_of(&bounds, range.from);
            let to = seg_of(&bounds, range.to);
            for list in &mut lists[from..=to] {
                push_dedup(list, i as u32);
            }
        }
    }

    let (registry, ids) = assign_classes(lists)?;
    Ok(BuiltAttr {
        registry,
        plan: AttrPlan::Seg16 { bounds, ids },
    })
}

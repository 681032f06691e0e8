// Copyright 2024 Oxide Computer Company

//! VLAN attribute: point constraints on a u16 axis, 0xffff = any.

use crate::attr::{
    assign_classes, partition_points, push_dedup, seg_of, AttrPlan, BuiltAttr,
};
use crate::error::Error;
use crate::rule::{Rule, VLAN_UNSPEC};

pub(crate) fn build(rules: &[Rule]) -> Result<BuiltAttr, Error> {
    let mut spans: Vec<(u16, u16)> = Vec::new();
    for rule in rules {
        if rule.vlan != VLAN_UNSPEC {
            spans.push((rule.vlan, rule.vlan));
        }
    }
    let bounds = partition_points(&spans);

    let mut lists = vec![Vec::new(); bounds.len()];
    for (i, rule) in rules.iter().enumerate() {
        if rule.vlan == VLAN_UNSPEC {
            for list in &mut lists {
                push_dedup(list, i as u32);
            }
        } else {
            push_dedup(&mut lists[seg_of(&bounds, rule.vlan)], i as u32);
        }
    }

    let (registry, ids) = assign_classes(lists)?;
    Ok(BuiltAttr {
        registry,
        plan: AttrPlan::Seg16 { bounds, ids },
    })
}

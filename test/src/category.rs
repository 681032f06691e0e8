use classifier::{
    actions_with_category, compile, AttrKind, PortRange, Rule,
    ACTION_NON_TERMINATE,
};

use crate::data::src_port_packet;

#[test]
fn category_mask_gates_delivery() {
    // Category bit 1 set: the action applies to category 1 only.
    let action = (0b10u32 << 16) | 5;
    let rules = vec![Rule {
        src_ports: vec![PortRange::new(0, 100)],
        action,
        ..Default::default()
    }];
    let filter = compile(&[AttrKind::PortSrc], &rules).unwrap();

    let mut actions = filter.query(&src_port_packet(50)).to_vec();
    assert_eq!(actions, vec![action]);

    let kept = actions_with_category(&mut actions, 1);
    assert_eq!(kept, 1);
    assert_eq!(actions[0], action);

    let mut actions = vec![action];
    assert_eq!(actions_with_category(&mut actions, 0), 0);
}

#[test]
fn zero_mask_applies_everywhere() {
    let mut actions = vec![5u32];
    for category in [0u16, 1, 7, 15] {
        assert_eq!(actions_with_category(&mut actions, category), 1);
        assert_eq!(actions[0], 5);
    }
}

#[test]
fn filtering_is_idempotent() {
    let cat0 = (0b01u32 << 16) | 1 | ACTION_NON_TERMINATE;
    let cat1 = (0b10u32 << 16) | 2 | ACTION_NON_TERMINATE;
    let every = 3u32 | ACTION_NON_TERMINATE;
    let terminal = (0b01u32 << 16) | 4;

    let mut first = vec![cat0, cat1, every, terminal, 99];
    let kept = actions_with_category(&mut first, 0);
    first.truncate(kept);

    let mut second = first.clone();
    let kept_again = actions_with_category(&mut second, 0);
    second.truncate(kept_again);

    assert_eq!(first, vec![cat0, every, terminal]);
    assert_eq!(first, second);
}

#[test]
fn skipped_terminal_actions_do_not_stop_the_walk() {
    // The terminal bit only takes effect on actions that survive the
    // category filter.
    let gated_terminal = (0b10u32 << 16) | 1;
    let ungated = 2u32;
    let mut actions = vec![gated_terminal, ungated];
    let kept = actions_with_category(&mut actions, 0);
    assert_eq!(kept, 1);
    assert_eq!(actions[0], ungated);
}

use classifier::{
    compile, AttrKind, PortRange, Rule, ACTION_NON_TERMINATE,
};

use crate::data::{port_pair_packet, reference_match};

fn rule(src: (u16, u16), dst: (u16, u16), action: u32) -> Rule {
    Rule {
        src_ports: vec![PortRange::new(src.0, src.1)],
        dst_ports: vec![PortRange::new(dst.0, dst.1)],
        action,
        ..Default::default()
    }
}

const SIG: [AttrKind; 2] = [AttrKind::PortSrc, AttrKind::PortDst];

/// Two rules over (src, dst) ports:
///
/// +------+------------+------------+--------+
/// | Rule | src        | dst        | action |
/// +------+------------+------------+--------+
/// | 0    | 10..30     | 20..30     | 1      |
/// | 1    | 25..40     | 10..35     | 2      |
/// +------+------------+------------+--------+
#[test]
fn first_terminal_rule_wins_in_the_overlap() {
    // Rule 0 terminal: in the overlap region only its action emerges.
    let rules =
        vec![rule((10, 30), (20, 30), 1), rule((25, 40), (10, 35), 2)];
    let filter = compile(&SIG, &rules).unwrap();

    assert_eq!(filter.query(&port_pair_packet(15, 25)), &[1]);
    assert_eq!(filter.query(&port_pair_packet(27, 25)), &[1]);
    assert_eq!(filter.query(&port_pair_packet(35, 25)), &[2]);
    assert_eq!(filter.query(&port_pair_packet(15, 15)), &[] as &[u32]);
}

#[test]
fn non_terminal_first_rule_collects_both() {
    let rules = vec![
        rule((10, 30), (20, 30), 1 | ACTION_NON_TERMINATE),
        rule((25, 40), (10, 35), 2),
    ];
    let filter = compile(&SIG, &rules).unwrap();

    assert_eq!(
        filter.query(&port_pair_packet(27, 25)),
        &[1 | ACTION_NON_TERMINATE, 2]
    );
    assert_eq!(
        filter.query(&port_pair_packet(15, 25)),
        &[1 | ACTION_NON_TERMINATE]
    );
}

#[test]
fn both_dimensions_must_match() {
    let rules =
        vec![rule((10, 30), (20, 30), 1), rule((25, 40), (10, 35), 2)];
    let filter = compile(&SIG, &rules).unwrap();

    for (src, dst) in [
        (9u16, 25u16),
        (10, 25),
        (25, 25),
        (27, 31),
        (40, 10),
        (41, 10),
        (30, 30),
        (30, 31),
    ] {
        let packet = port_pair_packet(src, dst);
        assert_eq!(
            filter.query(&packet),
            reference_match(&SIG, &rules, &packet).as_slice(),
            "({}, {})",
            src,
            dst
        );
    }
}

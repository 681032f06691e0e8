use classifier::{
    compile, compile_with_log, AttrKind, PortRange, Rule,
    ACTION_NON_TERMINATE, ACTION_PAYLOAD_MASK,
};

use crate::data::{logger, reference_match, src_port_packet};

fn src_rule(from: u16, to: u16, action: u32) -> Rule {
    Rule {
        src_ports: vec![PortRange::new(from, to)],
        action,
        ..Default::default()
    }
}

/// Three overlapping source-port rules:
///
/// +------+----------------+--------+----------+
/// | Rule | src ports      | action | terminal |
/// +------+----------------+--------+----------+
/// | 0    | 1000..2000     | 10     | yes      |
/// | 1    | 1500..65535    | 20     | no       |
/// | 2    | 0..3000        | 30     | yes      |
/// +------+----------------+--------+----------+
#[test]
fn overlapping_ranges_with_terminal_cut() {
    let rules = vec![
        src_rule(1000, 2000, 10),
        src_rule(1500, u16::MAX, 20 | ACTION_NON_TERMINATE),
        src_rule(0, 3000, 30),
    ];
    let filter =
        compile_with_log(&[AttrKind::PortSrc], &rules, logger()).unwrap();

    // 1500 hits rule 0 first; it is terminal.
    assert_eq!(filter.query(&src_port_packet(1500)), &[10]);

    // 2500 misses rule 0, collects rule 1 (non-terminal) then rule 2.
    let actions = filter.query(&src_port_packet(2500));
    assert_eq!(actions, &[20 | ACTION_NON_TERMINATE, 30]);
    let payloads: Vec<u32> =
        actions.iter().map(|a| a & ACTION_PAYLOAD_MASK).collect();
    assert_eq!(payloads, vec![20, 30]);

    // 3500 only matches rule 1; the list ends non-terminal because no
    // later rule matched.
    assert_eq!(
        filter.query(&src_port_packet(3500)),
        &[20 | ACTION_NON_TERMINATE]
    );

    // Port 0 reaches only the catch-all low range.
    assert_eq!(filter.query(&src_port_packet(0)), &[30]);
}

#[test]
fn endpoints_are_inclusive() {
    let rules = vec![src_rule(1000, 2000, 1)];
    let filter = compile(&[AttrKind::PortSrc], &rules).unwrap();
    assert_eq!(filter.query(&src_port_packet(1000)), &[1]);
    assert_eq!(filter.query(&src_port_packet(2000)), &[1]);
    assert_eq!(filter.query(&src_port_packet(999)), &[] as &[u32]);
    assert_eq!(filter.query(&src_port_packet(2001)), &[] as &[u32]);
}

#[test]
fn full_range_is_a_wildcard() {
    let rules = vec![
        src_rule(0, u16::MAX, 1 | ACTION_NON_TERMINATE),
        src_rule(10, 20, 2),
    ];
    let filter = compile(&[AttrKind::PortSrc], &rules).unwrap();

    // The wildcard rule never narrows anything: it matches at both extremes
    // and composes with the narrower rule in priority order.
    assert_eq!(
        filter.query(&src_port_packet(0)),
        &[1 | ACTION_NON_TERMINATE]
    );
    assert_eq!(
        filter.query(&src_port_packet(15)),
        &[1 | ACTION_NON_TERMINATE, 2]
    );
    assert_eq!(
        filter.query(&src_port_packet(u16::MAX)),
        &[1 | ACTION_NON_TERMINATE]
    );
}

#[test]
fn matches_the_reference_scan_across_the_axis() {
    let rules = vec![
        src_rule(1000, 2000, 10),
        src_rule(1500, u16::MAX, 20 | ACTION_NON_TERMINATE),
        src_rule(0, 3000, 30),
    ];
    let signature = [AttrKind::PortSrc];
    let filter = compile(&signature, &rules).unwrap();
    for port in [0, 999, 1000, 1499, 1500, 2000, 2001, 3000, 3001, 65535] {
        let packet = src_port_packet(port);
        assert_eq!(
            filter.query(&packet),
            reference_match(&signature, &rules, &packet).as_slice(),
            "port {}",
            port
        );
    }
}

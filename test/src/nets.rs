use std::net::{Ipv4Addr, Ipv6Addr};

use classifier::{
    compile, AttrKind, Error, Net4, Net6, Packet, PortRange, ProtoSpec,
    Rule,
};

use crate::data::reference_match;

fn dst4(addr: &str) -> Packet {
    Packet {
        dst_ip4: addr.parse().unwrap(),
        ..Default::default()
    }
}

fn dst6(addr: &str) -> Packet {
    Packet {
        dst_ip6: addr.parse().unwrap(),
        ..Default::default()
    }
}

#[test]
fn ipv4_prefix_match() {
    let rules = vec![Rule {
        net4_dst: vec![Net4::new(Ipv4Addr::new(192, 168, 0, 0), 16)],
        action: 7,
        ..Default::default()
    }];
    let filter = compile(&[AttrKind::Net4Dst], &rules).unwrap();

    assert_eq!(filter.query(&dst4("192.168.5.5")), &[7]);
    assert_eq!(filter.query(&dst4("192.168.0.0")), &[7]);
    assert_eq!(filter.query(&dst4("192.169.0.0")), &[] as &[u32]);
    assert_eq!(filter.query(&dst4("10.0.0.1")), &[] as &[u32]);
}

#[test]
fn ipv6_prefix_match_through_the_split() {
    // An /80 forces a real lo-half constraint next to a hi-only /32.
    let rules = vec![
        Rule {
            net6_dst: vec![Net6::new("fd00:1::".parse().unwrap(), 32)],
            action: 1,
            ..Default::default()
        },
        Rule {
            net6_dst: vec![Net6::new("fd00:1::".parse().unwrap(), 80)],
            action: 2,
            ..Default::default()
        },
    ];
    let filter = compile(&[AttrKind::Net6Dst], &rules).unwrap();

    assert_eq!(filter.query(&dst6("fd00:1::1")), &[1]);
    let mut non_terminal = rules.clone();
    non_terminal[0].action |= classifier::ACTION_NON_TERMINATE;
    let filter = compile(&[AttrKind::Net6Dst], &non_terminal).unwrap();
    assert_eq!(
        filter.query(&dst6("fd00:1::1")),
        &[1 | classifier::ACTION_NON_TERMINATE, 2]
    );
    assert_eq!(
        filter.query(&dst6("fd00:1:0:0:1::")),
        &[1 | classifier::ACTION_NON_TERMINATE]
    );
    assert_eq!(filter.query(&dst6("fe80::1")), &[] as &[u32]);
}

#[test]
fn non_prefix_masks_are_rejected() {
    let rules = vec![Rule {
        net4_dst: vec![Net4 {
            addr: [10, 0, 0, 0],
            mask: [255, 0, 255, 0],
        }],
        ..Default::default()
    }];
    match compile(&[AttrKind::Net4Dst], &rules) {
        Err(Error::InvalidRule { rule: 0, .. }) => {}
        other => panic!("expected InvalidRule, got {:?}", other.err()),
    }

    let mut net6 = Net6::new("fd00::".parse::<Ipv6Addr>().unwrap(), 48);
    net6.mask[2] = 0x0f; // hole in the hi half
    let rules = vec![Rule {
        net6_dst: vec![net6],
        ..Default::default()
    }];
    assert!(matches!(
        compile(&[AttrKind::Net6Dst], &rules),
        Err(Error::InvalidRule { rule: 0, .. })
    ));
}

#[test]
fn three_attribute_signature_composes() {
    const TCP: u8 = 6;
    let signature =
        [AttrKind::Net4Dst, AttrKind::PortDst, AttrKind::Proto];
    let rules = vec![
        Rule {
            net4_dst: vec![Net4::new(Ipv4Addr::new(10, 0, 0, 0), 8)],
            dst_ports: vec![PortRange::new(80, 80)],
            proto: ProtoSpec::number(TCP),
            action: 1,
            ..Default::default()
        },
        Rule {
            net4_dst: vec![Net4::new(Ipv4Addr::new(10, 1, 0, 0), 16)],
            action: 2,
            ..Default::default()
        },
    ];
    let filter = compile(&signature, &rules).unwrap();

    let packet = |addr: &str, port: u16, proto: u8| Packet {
        dst_ip4: addr.parse().unwrap(),
        dst_port: port,
        proto,
        ..Default::default()
    };

    assert_eq!(filter.query(&packet("10.1.2.3", 80, TCP)), &[1]);
    assert_eq!(filter.query(&packet("10.1.2.3", 81, TCP)), &[2]);
    assert_eq!(filter.query(&packet("10.2.2.3", 80, 17)), &[] as &[u32]);
    assert_eq!(filter.query(&packet("10.1.2.3", 80, 17)), &[2]);

    for (addr, port, proto) in [
        ("10.0.0.1", 80u16, TCP),
        ("10.1.0.1", 80, TCP),
        ("10.1.0.1", 443, 17),
        ("11.0.0.1", 80, TCP),
    ] {
        let p = packet(addr, port, proto);
        assert_eq!(
            filter.query(&p),
            reference_match(&signature, &rules, &p).as_slice(),
            "{} {} {}",
            addr,
            port,
            proto
        );
    }
}

#[test]
fn multiple_nets_in_one_rule_are_a_union() {
    let rules = vec![Rule {
        net4_dst: vec![
            Net4::new(Ipv4Addr::new(10, 0, 0, 0), 8),
            Net4::new(Ipv4Addr::new(172, 16, 0, 0), 12),
        ],
        action: 3,
        ..Default::default()
    }];
    let filter = compile(&[AttrKind::Net4Dst], &rules).unwrap();
    assert_eq!(filter.query(&dst4("10.9.9.9")), &[3]);
    assert_eq!(filter.query(&dst4("172.17.0.1")), &[3]);
    assert_eq!(filter.query(&dst4("172.32.0.1")), &[] as &[u32]);
}

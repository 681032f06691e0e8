use classifier::{compile, AttrKind, Packet, Rule};

use crate::data::src_port_packet;

/// Rule sets arrive from control-plane tooling as JSON; the records must
/// survive the trip and compile to the same filter.
#[test]
fn json_rule_set_compiles() {
    let text = r#"[
        {
            "net4_src": [], "net4_dst": [],
            "net6_src": [], "net6_dst": [],
            "proto": { "number": 6, "tcp_enable": 0, "tcp_disable": 0 },
            "src_ports": [ { "from": 1000, "to": 2000 } ],
            "dst_ports": [],
            "vlan": 65535,
            "action": 10
        },
        {
            "net4_src": [], "net4_dst": [],
            "net6_src": [], "net6_dst": [],
            "proto": { "number": 255, "tcp_enable": 0, "tcp_disable": 0 },
            "src_ports": [],
            "dst_ports": [],
            "vlan": 65535,
            "action": 20
        }
    ]"#;
    let rules: Vec<Rule> = serde_json::from_str(text).unwrap();
    let filter =
        compile(&[AttrKind::PortSrc, AttrKind::Proto], &rules).unwrap();

    let tcp_hit = Packet {
        src_port: 1500,
        proto: 6,
        ..Default::default()
    };
    assert_eq!(filter.query(&tcp_hit), &[10]);
    assert_eq!(filter.query(&src_port_packet(1500)), &[20]);
}

#[test]
fn rules_round_trip_through_json() {
    let rules = vec![Rule {
        src_ports: vec![classifier::PortRange::new(80, 88)],
        action: 5,
        ..Default::default()
    }];
    let text = serde_json::to_string(&rules).unwrap();
    let back: Vec<Rule> = serde_json::from_str(&text).unwrap();

    let filter = compile(&[AttrKind::PortSrc], &back).unwrap();
    assert_eq!(filter.query(&src_port_packet(84)), &[5]);
    assert_eq!(filter.query(&src_port_packet(89)), &[] as &[u32]);
}

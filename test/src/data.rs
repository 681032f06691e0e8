//! Shared scenario plumbing: a terminal logger, packet constructors, and
//! the linear-scan reference model every equivalence test compares against.

use classifier::{action_terminal, AttrKind, Packet, Rule, PROTO_UNSPEC, VLAN_UNSPEC};
use slog::Drain;

pub fn logger() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_envlogger::new(drain).fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    slog::Logger::root(drain, slog::o!())
}

/// Scan the rules in priority order, collecting each matching rule's action
/// and stopping after the first terminal one. This is the semantics the
/// compiled tree must reproduce exactly.
pub fn reference_match(
    signature: &[AttrKind],
    rules: &[Rule],
    packet: &Packet,
) -> Vec<u32> {
    let mut out = Vec::new();
    for rule in rules {
        if signature.iter().all(|&k| attr_matches(k, rule, packet)) {
            out.push(rule.action);
            if action_terminal(rule.action) {
                break;
            }
        }
    }
    out
}

fn attr_matches(kind: AttrKind, rule: &Rule, packet: &Packet) -> bool {
    match kind {
        AttrKind::PortSrc => port_matches(&rule.src_ports, packet.src_port),
        AttrKind::PortDst => port_matches(&rule.dst_ports, packet.dst_port),
        AttrKind::Proto => {
            let p = &rule.proto;
            (p.number == PROTO_UNSPEC || p.number == packet.proto)
                && packet.tcp_flags & p.tcp_enable == p.tcp_enable
                && packet.tcp_flags & p.tcp_disable == 0
        }
        AttrKind::Net4Src => {
            net4_matches(&rule.net4_src, u32::from(packet.src_ip4))
        }
        AttrKind::Net4Dst => {
            net4_matches(&rule.net4_dst, u32::from(packet.dst_ip4))
        }
        AttrKind::Net6Src => {
            net6_matches(&rule.net6_src, packet.src_ip6.octets())
        }
        AttrKind::Net6Dst => {
            net6_matches(&rule.net6_dst, packet.dst_ip6.octets())
        }
        AttrKind::Vlan => {
            rule.vlan == VLAN_UNSPEC || rule.vlan == packet.vlan
        }
    }
}

fn port_matches(ranges: &[classifier::PortRange], port: u16) -> bool {
    ranges.is_empty()
        || ranges.iter().any(|r| r.from <= port && port <= r.to)
}

fn net4_matches(nets: &[classifier::Net4], addr: u32) -> bool {
    nets.is_empty()
        || nets.iter().any(|n| {
            let mask = u32::from_be_bytes(n.mask);
            addr & mask == u32::from_be_bytes(n.addr) & mask
        })
}

fn net6_matches(nets: &[classifier::Net6], addr: [u8; 16]) -> bool {
    nets.is_empty()
        || nets.iter().any(|n| {
            addr.iter()
                .zip(n.addr.iter().zip(n.mask.iter()))
                .all(|(&a, (&b, &m))| a & m == b & m)
        })
}

pub fn src_port_packet(port: u16) -> Packet {
    Packet {
        src_port: port,
        ..Default::default()
    }
}

pub fn port_pair_packet(src: u16, dst: u16) -> Packet {
    Packet {
        src_port: src,
        dst_port: dst,
        ..Default::default()
    }
}

// Copyright 2024 Oxide Computer Company

//! Compile a small rule set, print the tree summary, and classify a few
//! packets. Run with `RUST_LOG=debug` to watch the build stages.

use std::net::Ipv4Addr;

use slog::Drain;

use classifier::{
    compile_with_log, AttrKind, Net4, Packet, PortRange, ProtoSpec, Rule,
    ACTION_NON_TERMINATE,
};

fn logger() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_envlogger::new(drain).fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    slog::Logger::root(drain, slog::o!())
}

fn main() {
    let signature =
        [AttrKind::Net4Dst, AttrKind::PortDst, AttrKind::Proto];
    let rules = vec![
        Rule {
            net4_dst: vec![Net4::new(Ipv4Addr::new(10, 0, 0, 0), 8)],
            dst_ports: vec![PortRange::new(80, 80), PortRange::new(443, 443)],
            proto: ProtoSpec::number(6),
            action: 1,
            ..Default::default()
        },
        Rule {
            net4_dst: vec![Net4::new(Ipv4Addr::new(10, 9, 0, 0), 16)],
            action: 2 | ACTION_NON_TERMINATE,
            ..Default::default()
        },
        Rule {
            action: 3,
            ..Default::default()
        },
    ];

    let filter =
        compile_with_log(&signature, &rules, logger()).expect("compile");
    print!("{}", filter.dump());

    let packets = [
        ("web", Packet {
            dst_ip4: Ipv4Addr::new(10, 9, 1, 1),
            dst_port: 443,
            proto: 6,
            ..Default::default()
        }),
        ("dns", Packet {
            dst_ip4: Ipv4Addr::new(192, 168, 0, 1),
            dst_port: 53,
            proto: 17,
            ..Default::default()
        }),
    ];
    for (name, packet) in &packets {
        println!("{}: {:?}", name, filter.query(packet));
    }
}

use std::thread;

use classifier::{
    compile, AttrKind, PortRange, Rule, ACTION_NON_TERMINATE,
};

use crate::data::{reference_match, src_port_packet};

/// One filter, many reader threads. Queries perform no stores, so a shared
/// reference is all the coordination required.
#[test]
fn concurrent_queries_share_one_filter() {
    let signature = [AttrKind::PortSrc];
    let rules = vec![
        Rule {
            src_ports: vec![PortRange::new(1000, 2000)],
            action: 1 | ACTION_NON_TERMINATE,
            ..Default::default()
        },
        Rule {
            src_ports: vec![PortRange::new(1500, 3000)],
            action: 2,
            ..Default::default()
        },
    ];
    let filter = compile(&signature, &rules).unwrap();

    thread::scope(|scope| {
        for t in 0..8u16 {
            let filter = &filter;
            let rules = &rules;
            scope.spawn(move || {
                for i in 0..2000u16 {
                    let port = (i * 7).wrapping_add(t * 13) % 4000;
                    let packet = src_port_packet(port);
                    assert_eq!(
                        filter.query(&packet),
                        reference_match(&signature, rules, &packet)
                            .as_slice(),
                        "port {}",
                        port
                    );
                }
            });
        }
    });
}

#[test]
fn filter_moves_across_threads() {
    let rules = vec![Rule {
        src_ports: vec![PortRange::new(22, 22)],
        action: 4,
        ..Default::default()
    }];
    let filter = compile(&[AttrKind::PortSrc], &rules).unwrap();
    let handle = thread::spawn(move || {
        let n = filter.query(&src_port_packet(22)).len();
        drop(filter);
        n
    });
    assert_eq!(handle.join().unwrap(), 1);
}

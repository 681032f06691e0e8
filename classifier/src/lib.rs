// Copyright 2024 Oxide Computer Company

//! Multi-dimensional packet classifier. A priority-ordered rule list over a
//! fixed attribute signature compiles into a static binary tree of 2-D
//! merge tables plus a final action registry; per-packet evaluation walks
//! one table lookup per inner vertex and returns the ordered, terminal-
//! truncated action list. The compiled filter lives in a single arena
//! behind self-relative offsets, so it can be shared read-only across
//! threads and mapped address-independently.
//!
//! ```
//! use classifier::{compile, AttrKind, Packet, PortRange, Rule};
//!
//! let rules = vec![Rule {
//!     src_ports: vec![PortRange::new(1000, 2000)],
//!     action: 10,
//!     ..Default::default()
//! }];
//! let filter = compile(&[AttrKind::PortSrc], &rules).unwrap();
//!
//! let packet = Packet { src_port: 1500, ..Default::default() };
//! assert_eq!(filter.query(&packet), &[10]);
//! ```

pub mod arena;
pub mod error;
pub mod lpm;
pub mod packet;
pub mod registry;
pub mod rule;
pub mod table;

mod attr;
mod attr_net4;
mod attr_net6;
mod attr_port;
mod attr_proto;
mod attr_vlan;
mod filter;
mod merge;
mod offset;

pub use attr::AttrKind;
pub use error::Error;
pub use filter::{
    actions_with_category, compile, compile_with_log, Filter, MAX_SIGNATURE,
};
pub use packet::Packet;
pub use rule::{
    action_categories, action_terminal, Net4, Net6, PortRange, ProtoSpec,
    Rule, ACTION_NON_TERMINATE, ACTION_PAYLOAD_MASK, PROTO_UNSPEC,
    VLAN_UNSPEC,
};

// Copyright 2024 Oxide Computer Company

use std::net::{Ipv4Addr, Ipv6Addr};

/// A decoded packet view. Decoding from raw bytes happens upstream; the
/// classifier only reads these fields. For non-TCP packets the decoder
/// presents `tcp_flags = 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    pub src_ip4: Ipv4Addr,
    pub dst_ip4: Ipv4Addr,
    pub src_ip6: Ipv6Addr,
    pub dst_ip6: Ipv6Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub proto: u8,
    pub tcp_flags: u16,
    pub vlan: u16,
}

impl Default for Packet {
    fn default() -> Self {
        Self {
            src_ip4: Ipv4Addr::UNSPECIFIED,
            dst_ip4: Ipv4Addr::UNSPECIFIED,
            src_ip6: Ipv6Addr::UNSPECIFIED,
            dst_ip6: Ipv6Addr::UNSPECIFIED,
            src_port: 0,
            dst_port: 0,
            proto: 0,
            tcp_flags: 0,
            vlan: 0,
        }
    }
}

impl Packet {
    pub(crate) fn ip6_hi(addr: &Ipv6Addr) -> u64 {
        u64::from_be_bytes(addr.octets()[..8].try_into().unwrap())
    }

    pub(crate) fn ip6_lo(addr: &Ipv6Addr) -> u64 {
        u64::from_be_bytes(addr.octets()[8..].try_into().unwrap())
    }
}

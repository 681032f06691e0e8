// Copyright 2024 Oxide Computer Company

use std::net::{Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Wildcard protocol number.
pub const PROTO_UNSPEC: u8 = 0xff;

/// Wildcard VLAN id.
pub const VLAN_UNSPEC: u16 = 0xffff;

/// Action bit 15. When clear the action is terminal and ends match
/// collection; when set, collection continues with later rules.
pub const ACTION_NON_TERMINATE: u32 = 1 << 15;

/// Low 15 bits of an action word: the user payload.
pub const ACTION_PAYLOAD_MASK: u32 = ACTION_NON_TERMINATE - 1;

/// Returns true when the action word ends match collection.
pub fn action_terminal(action: u32) -> bool {
    action & ACTION_NON_TERMINATE == 0
}

/// Bits [16..31]: the category mask. Zero applies to every category.
pub fn action_categories(action: u32) -> u16 {
    (action >> 16) as u16
}

/// An IPv4 network in wire form: address and prefix-consecutive mask, both
/// network byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Net4 {
    pub addr: [u8; 4],
    pub mask: [u8; 4],
}

impl Net4 {
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Self {
        let mask = prefix_mask_u32(prefix_len.min(32));
        Self {
            addr: addr.octets(),
            mask: mask.to_be_bytes(),
        }
    }

    /// Prefix length of the mask, or an error for a non-consecutive mask.
    pub fn prefix_len(&self) -> Result<u8, ()> {
        prefix_len_of(u32::from_be_bytes(self.mask) as u64, 32)
    }

    pub(crate) fn first(&self) -> u32 {
        u32::from_be_bytes(self.addr) & u32::from_be_bytes(self.mask)
    }

    pub(crate) fn last(&self) -> u32 {
        u32::from_be_bytes(self.addr) | !u32::from_be_bytes(self.mask)
    }
}

/// An IPv6 network in wire form. The hi/lo split prefix lengths are
/// precomputed by the constructor so the compiler does no per-rule work when
/// it partitions the two 64-bit halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Net6 {
    pub addr: [u8; 16],
    pub mask: [u8; 16],
    pub pref_hi: u8,
    pub pref_lo: u8,
}

impl Net6 {
    pub fn new(addr: Ipv6Addr, prefix_len: u8) -> Self {
        let len = prefix_len.min(128);
        let pref_hi = len.min(64);
        let pref_lo = len - pref_hi;
        let mask = if len == 0 { 0u128 } else { u128::MAX << (128 - len) };
        Self {
            addr: addr.octets(),
            mask: mask.to_be_bytes(),
            pref_hi,
            pref_lo,
        }
    }

    pub(crate) fn hi(&self) -> u64 {
        u64::from_be_bytes(self.addr[..8].try_into().unwrap())
    }

    pub(crate) fn lo(&self) -> u64 {
        u64::from_be_bytes(self.addr[8..].try_into().unwrap())
    }

    pub(crate) fn mask_hi(&self) -> u64 {
        u64::from_be_bytes(self.mask[..8].try_into().unwrap())
    }

    pub(crate) fn mask_lo(&self) -> u64 {
        u64::from_be_bytes(self.mask[8..].try_into().unwrap())
    }

    /// Check that both mask halves are prefix-consecutive and agree with the
    /// precomputed split. Malformed hi/lo combinations are rejected here
    /// rather than compiled into silently wrong classifiers.
    pub(crate) fn check(&self) -> Result<(), String> {
        let hi = prefix_len_of(self.mask_hi(), 64)
            .map_err(|_| "non-prefix ipv6 mask (hi half)".to_string())?;
        let lo = prefix_len_of(self.mask_lo(), 64)
            .map_err(|_| "non-prefix ipv6 mask (lo half)".to_string())?;
        if lo > 0 && hi != 64 {
            return Err("ipv6 mask has a hole between halves".into());
        }
        if hi != self.pref_hi || lo != self.pref_lo {
            return Err(format!(
                "ipv6 split prefixes {}/{} disagree with mask {}/{}",
                self.pref_hi, self.pref_lo, hi, lo,
            ));
        }
        Ok(())
    }
}

/// An inclusive port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub from: u16,
    pub to: u16,
}

impl PortRange {
    pub fn new(from: u16, to: u16) -> Self {
        Self { from, to }
    }

    /// The full range is treated as no constraint at all.
    pub fn is_wildcard(&self) -> bool {
        self.from == 0 && self.to == u16::MAX
    }
}

/// Protocol constraint: a protocol number (or unspec) plus TCP flag masks.
/// A packet with flags f matches when `f & tcp_enable == tcp_enable` and
/// `f & tcp_disable == 0`. Non-TCP packets present f = 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtoSpec {
    pub number: u8,
    pub tcp_enable: u16,
    pub tcp_disable: u16,
}

impl Default for ProtoSpec {
    fn default() -> Self {
        Self {
            number: PROTO_UNSPEC,
            tcp_enable: 0,
            tcp_disable: 0,
        }
    }
}

impl ProtoSpec {
    pub fn number(number: u8) -> Self {
        Self {
            number,
            ..Default::default()
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.number == PROTO_UNSPEC
            && self.tcp_enable == 0
            && self.tcp_disable == 0
    }
}

/// One classifier rule. The rule's index in the compiled slice is its
/// priority; empty vectors mean the attribute is unconstrained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub net4_src: Vec<Net4>,
    pub net4_dst: Vec<Net4>,
    pub net6_src: Vec<Net6>,
    pub net6_dst: Vec<Net6>,
    pub proto: ProtoSpec,
    pub src_ports: Vec<PortRange>,
    pub dst_ports: Vec<PortRange>,
    pub vlan: u16,
    pub action: u32,
}

impl Default for Rule {
    fn default() -> Self {
        Self {
            net4_src: Vec::new(),
            net4_dst: Vec::new(),
            net6_src: Vec::new(),
            net6_dst: Vec::new(),
            proto: ProtoSpec::default(),
            src_ports: Vec::new(),
            dst_ports: Vec::new(),
            vlan: VLAN_UNSPEC,
            action: 0,
        }
    }
}

impl Rule {
    pub fn is_terminal(&self) -> bool {
        action_terminal(self.action)
    }
}

/// Validate every rule up front so the rest of the compiler can assume
/// well-formed input.
pub(crate) fn check_rules(rules: &[Rule]) -> Result<(), Error> {
    for (i, rule) in rules.iter().enumerate() {
        for net in rule.net4_src.iter().chain(&rule.net4_dst) {
            if net.prefix_len().is_err() {
                return Err(Error::invalid_rule(i, "non-prefix ipv4 mask"));
            }
        }
        for net in rule.net6_src.iter().chain(&rule.net6_dst) {
            net.check().map_err(|reason| Error::InvalidRule { rule: i, reason })?;
        }
        for range in rule.src_ports.iter().chain(&rule.dst_ports) {
            if range.to < range.from {
                return Err(Error::invalid_rule(
                    i,
                    format!("port range {}..{} is inverted", range.from, range.to),
                ));
            }
        }
    }
    Ok(())
}

fn prefix_len_of(mask: u64, width: u8) -> Result<u8, ()> {
    let shifted = mask << (64 - width as u32);
    let len = shifted.leading_ones() as u8;
    let rest = if len >= 64 { 0 } else { shifted << len };
    if rest != 0 {
        return Err(());
    }
    Ok(len)
}

fn prefix_mask_u32(len: u8) -> u32 {
    if len == 0 {
        0
    } else {
        u32::MAX << (32 - len as u32)
    }
}

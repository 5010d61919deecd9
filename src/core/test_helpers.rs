//! Shared test utilities for core module tests
//!
//! Provides common test helpers to avoid duplication across test suites.
//! This module is only compiled in test mode.

use crate::core::address::{Address, AddressRange, IpRange};
use crate::core::port::PORT_MAX;
use crate::core::rule::{Direction, Protocol, Rule};
use crate::core::ruleset::RuleSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Builds a rule set from rule text lines, panicking on invalid input.
pub fn create_test_ruleset(lines: &[&str]) -> RuleSet {
    let mut set = RuleSet::new();
    for line in lines {
        set.add_rule(create_test_rule(line)).unwrap();
    }
    set
}

pub fn create_test_rule(text: &str) -> Rule {
    Rule::parse(text).unwrap_or_else(|e| panic!("invalid test rule '{text}': {e}"))
}

/// Reduced allow list of `lines`, rendered and sorted
pub fn reduce_to_strings(lines: &[&str]) -> Vec<String> {
    let mut out: Vec<String> = create_test_ruleset(lines)
        .allow_list()
        .rules()
        .iter()
        .map(ToString::to_string)
        .collect();
    out.sort();
    out
}

fn range_edges<A: Address>(range: &AddressRange<A>) -> Vec<A> {
    let mut edges = vec![range.start(), range.end()];
    edges.extend(range.start().checked_step_down());
    edges.extend(range.end().checked_step_up());
    edges
}

/// A single packet to evaluate
pub type Probe = (Direction, Protocol, IpAddr, Option<u16>);

/// Packets on and just outside every boundary the rules mention, plus a
/// few fixed points at the edges of both families.
pub fn boundary_probes(rules: &RuleSet) -> Vec<Probe> {
    let mut addrs: Vec<IpAddr> = vec![
        IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V4(Ipv4Addr::BROADCAST),
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
        IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        IpAddr::V6(Ipv6Addr::highest()),
        IpAddr::V6("fd::1".parse().unwrap()),
    ];
    let mut ports: Vec<u16> = vec![1, 22, PORT_MAX];

    for rule in rules.rules() {
        match &rule.address {
            Some(IpRange::V4(r)) => addrs.extend(range_edges(r).into_iter().map(IpAddr::V4)),
            Some(IpRange::V6(r)) => addrs.extend(range_edges(r).into_iter().map(IpAddr::V6)),
            None => {}
        }
        if let Some(spec) = &rule.ports {
            for range in spec.to_ranges() {
                ports.extend([range.start, range.end]);
                ports.extend(range.start.checked_sub(1).filter(|p| *p > 0));
                ports.extend(range.end.checked_add(1));
            }
        }
    }
    addrs.sort_unstable();
    addrs.dedup();
    ports.sort_unstable();
    ports.dedup();

    let mut probes = Vec::new();
    for direction in [Direction::In, Direction::Out] {
        for &addr in &addrs {
            probes.push((direction, Protocol::Icmp, addr, None));
            for &port in &ports {
                probes.push((direction, Protocol::Tcp, addr, Some(port)));
                probes.push((direction, Protocol::Udp, addr, Some(port)));
            }
        }
    }
    probes
}

/// Total number of addresses covered by `rules` for one protocol with no
/// port restriction, saturating at `u128::MAX`
pub fn unrestricted_address_count(rules: &RuleSet, protocol: Protocol, ipv4: bool) -> u128 {
    rules
        .rules()
        .iter()
        .filter(|r| r.protocol == protocol && r.ports.is_none())
        .filter_map(|r| r.address)
        .filter(|a| a.is_ipv4() == ipv4)
        .fold(0u128, |total, a| total.saturating_add(a.address_count()))
}

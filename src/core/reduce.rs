//! Allow-list reduction over traffic volumes
//!
//! A volume is one `(protocol, address range, port range)` box of traffic
//! space. Rules are expanded into volumes, processed in evaluation order
//! against an arena of admitted volumes, and the surviving space is
//! coalesced into a canonical allow-only rule list.
//!
//! The canonical form depends only on the admitted traffic, so reducing an
//! already reduced list returns the same rules.

use crate::core::address::{Address, AddressRange, IpRange, Ipv4Range, Ipv6Range};
use crate::core::port::{PortRange, PortSpec};
use crate::core::rule::{Action, DEFAULT_PRIORITY, Direction, Protocol, Rule};
use std::collections::{BTreeMap, BTreeSet};

/// Priority carried by every rule of a reduced allow list
pub const REDUCED_PRIORITY: u8 = DEFAULT_PRIORITY;

// ═══════════════════════════════════════════════════════════════════════════
// Volumes
// ═══════════════════════════════════════════════════════════════════════════

/// One box of traffic space for a concrete protocol and a single family.
///
/// icmp volumes always span the full port range so every protocol shares
/// the same shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Volume {
    pub protocol: Protocol,
    pub address: IpRange,
    pub ports: PortRange,
}

impl Volume {
    /// Expands a rule into disjoint volumes.
    pub fn from_rule(rule: &Rule) -> Vec<Volume> {
        let addresses = match rule.address {
            Some(range) => vec![range],
            None => vec![
                IpRange::V4(Ipv4Range::full()),
                IpRange::V6(Ipv6Range::full()),
            ],
        };

        let mut volumes = Vec::new();
        for &protocol in rule.protocol.covered(rule.ports.is_some()) {
            let port_ranges = match &rule.ports {
                Some(spec) if protocol.carries_ports() => spec.to_ranges(),
                _ => vec![PortRange::full()],
            };
            for &address in &addresses {
                for &ports in &port_ranges {
                    volumes.push(Volume {
                        protocol,
                        address,
                        ports,
                    });
                }
            }
        }
        volumes
    }

    pub fn overlaps(&self, other: &Volume) -> bool {
        self.protocol == other.protocol
            && self.address.overlaps(&other.address)
            && self.ports.overlaps(&other.ports)
    }

    /// Removes `hole` from this volume.
    ///
    /// Returns `None` when they do not intersect. Otherwise the pieces are
    /// disjoint: address remainders keep the full port span, and the
    /// intersected address slice keeps the port remainders.
    pub fn carve(&self, hole: &Volume) -> Option<Vec<Volume>> {
        if self.protocol != hole.protocol {
            return None;
        }
        let (address_lefts, Some(address_sub)) = self.address.substract(&hole.address) else {
            return None;
        };
        let (port_lefts, Some(_)) = self.ports.substract_port_range(&hole.ports) else {
            return None;
        };

        let mut pieces: Vec<Volume> = address_lefts
            .into_iter()
            .map(|address| Volume { address, ..*self })
            .collect();
        pieces.extend(port_lefts.into_iter().map(|ports| Volume {
            protocol: self.protocol,
            address: address_sub,
            ports,
        }));
        Some(pieces)
    }
}

fn carve_all(pieces: Vec<Volume>, hole: &Volume) -> Vec<Volume> {
    pieces
        .into_iter()
        .flat_map(|piece| piece.carve(hole).unwrap_or_else(|| vec![piece]))
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════
// Arena
// ═══════════════════════════════════════════════════════════════════════════

type VolumeId = usize;

/// Admitted volumes addressed by index; removed slots are left empty.
#[derive(Debug, Default)]
struct VolumeArena {
    slots: Vec<Option<(Volume, u8)>>,
}

impl VolumeArena {
    fn insert(&mut self, volume: Volume, priority: u8) -> VolumeId {
        self.slots.push(Some((volume, priority)));
        self.slots.len() - 1
    }

    fn take(&mut self, id: VolumeId) -> Option<(Volume, u8)> {
        self.slots.get_mut(id).and_then(Option::take)
    }

    fn live(&self) -> impl Iterator<Item = (VolumeId, &Volume, u8)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|(volume, priority)| (id, volume, *priority)))
    }

    fn volumes(&self) -> impl Iterator<Item = &Volume> {
        self.live().map(|(_, volume, _)| volume)
    }

    fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Reduction
// ═══════════════════════════════════════════════════════════════════════════

/// Reduces one direction's rules, given in evaluation order.
///
/// Earlier rules have equal or higher priority than later ones. An allow
/// keeps only the space no earlier deny or allow has claimed; a deny also
/// removes space from allows of the same priority.
pub(crate) fn reduce_direction(direction: Direction, ordered: &[&Rule]) -> Vec<Rule> {
    let mut allowed = VolumeArena::default();
    let mut denied: Vec<Volume> = Vec::new();

    for rule in ordered {
        let volumes = Volume::from_rule(rule);
        match rule.action {
            Action::Allow => {
                let mut pieces = volumes;
                for hole in denied.iter().chain(allowed.volumes()) {
                    if pieces.is_empty() {
                        break;
                    }
                    pieces = carve_all(pieces, hole);
                }
                tracing::trace!("{rule}: admits {} new volume(s)", pieces.len());
                for piece in pieces {
                    allowed.insert(piece, rule.priority);
                }
            }
            Action::Deny => {
                let hits: Vec<VolumeId> = allowed
                    .live()
                    .filter(|(_, volume, priority)| {
                        *priority == rule.priority && volumes.iter().any(|d| volume.overlaps(d))
                    })
                    .map(|(id, _, _)| id)
                    .collect();
                tracing::trace!("{rule}: overrides {} equal-priority volume(s)", hits.len());
                for id in hits {
                    if let Some((volume, priority)) = allowed.take(id) {
                        let pieces = volumes
                            .iter()
                            .fold(vec![volume], |pieces, hole| carve_all(pieces, hole));
                        for piece in pieces {
                            allowed.insert(piece, priority);
                        }
                    }
                }
                denied.extend(volumes);
            }
        }
    }

    tracing::debug!(
        "{direction}: {} rule(s) left {} admitted volume(s)",
        ordered.len(),
        allowed.len()
    );
    coalesce(direction, allowed.volumes())
}

// ═══════════════════════════════════════════════════════════════════════════
// Coalescing
// ═══════════════════════════════════════════════════════════════════════════

/// Admitted space for one protocol: an address key and the ports open on it
#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    protocol: Protocol,
    /// `None` covers both families entirely
    address: Option<IpRange>,
    ports: Vec<PortRange>,
}

/// Splits the address axis wherever the open port set changes, then merges
/// addresses that share an identical port set.
fn group_by_ports<A: Address>(
    boxes: &[(AddressRange<A>, PortRange)],
) -> Vec<(AddressRange<A>, Vec<PortRange>)> {
    let mut cuts: Vec<u128> = Vec::with_capacity(boxes.len() * 2);
    for (range, _) in boxes {
        cuts.push(range.start().to_bits());
        if let Some(next) = range.end().checked_step_up() {
            cuts.push(next.to_bits());
        }
    }
    cuts.sort_unstable();
    cuts.dedup();

    let mut by_ports: BTreeMap<Vec<PortRange>, Vec<AddressRange<A>>> = BTreeMap::new();
    for (i, &cut) in cuts.iter().enumerate() {
        let start = A::from_bits(cut);
        let end = cuts
            .get(i + 1)
            .map_or_else(A::highest, |&next| A::from_bits(next - 1));
        let ports: Vec<PortRange> = boxes
            .iter()
            .filter(|(range, _)| range.contains(start))
            .map(|(_, ports)| *ports)
            .collect();
        if ports.is_empty() {
            continue;
        }
        by_ports
            .entry(PortRange::merge(&ports))
            .or_default()
            .push(AddressRange::new(start, end));
    }

    by_ports
        .into_iter()
        .flat_map(|(ports, ranges)| {
            AddressRange::merge(&ranges)
                .into_iter()
                .map(move |range| (range, ports.clone()))
        })
        .collect()
}

/// A full family becomes `None` only when the other family is full too.
fn collapse_families(entries: &mut Vec<Entry>) {
    for protocol in Protocol::CONCRETE {
        let find = |entries: &[Entry], v4: bool| {
            entries.iter().position(|e| {
                e.protocol == protocol
                    && e.address.is_some_and(|a| a.is_full() && a.is_ipv4() == v4)
            })
        };
        let (Some(i), Some(j)) = (find(entries, true), find(entries, false)) else {
            continue;
        };
        if entries[i].ports != entries[j].ports {
            continue;
        }

        let ports = entries[i].ports.clone();
        entries.remove(i.max(j));
        entries.remove(i.min(j));
        entries.push(Entry {
            protocol,
            address: None,
            ports,
        });
    }
}

/// tcp, udp and icmp fully open on the same address key become one `any`.
fn collapse_protocols(entries: &mut Vec<Entry>) {
    let full = vec![PortRange::full()];
    let keys: BTreeSet<Option<IpRange>> = entries
        .iter()
        .filter(|e| e.protocol == Protocol::Icmp)
        .map(|e| e.address)
        .collect();

    for key in keys {
        let identical = Protocol::CONCRETE.iter().all(|protocol| {
            entries
                .iter()
                .any(|e| e.protocol == *protocol && e.address == key && e.ports == full)
        });
        if identical {
            entries.retain(|e| !(e.address == key && e.ports == full));
            entries.push(Entry {
                protocol: Protocol::Any,
                address: key,
                ports: full.clone(),
            });
        }
    }
}

/// Minimal prefixes for a range.
///
/// A whole family is written as its two halves, because a `/0` prefix reads
/// back as "every address of both families".
fn prefix_cover<A: Address>(range: AddressRange<A>) -> Vec<AddressRange<A>> {
    if range.is_full() {
        let half = A::max_bits() >> 1;
        return vec![
            AddressRange::new(A::lowest(), A::from_bits(half)),
            AddressRange::new(A::from_bits(half + 1), A::highest()),
        ];
    }
    range.to_ip_nets().iter().map(|cidr| cidr.to_range()).collect()
}

fn emit(direction: Direction, entry: &Entry) -> Vec<Rule> {
    let addresses: Vec<Option<IpRange>> = match entry.address {
        None => vec![None],
        Some(IpRange::V4(r)) => prefix_cover(r).into_iter().map(|r| Some(IpRange::V4(r))).collect(),
        Some(IpRange::V6(r)) => prefix_cover(r).into_iter().map(|r| Some(IpRange::V6(r))).collect(),
    };

    let mut specs: Vec<Option<PortSpec>> = Vec::new();
    if entry.protocol.carries_ports() {
        specs.extend(PortSpec::from_ranges(&entry.ports).into_iter().map(Some));
    }
    if specs.is_empty() {
        specs.push(None);
    }

    let mut rules = Vec::with_capacity(addresses.len() * specs.len());
    for address in &addresses {
        for ports in &specs {
            rules.push(Rule {
                direction,
                action: Action::Allow,
                priority: REDUCED_PRIORITY,
                address: *address,
                protocol: entry.protocol,
                ports: ports.clone(),
            });
        }
    }
    rules
}

fn coalesce<'a>(direction: Direction, volumes: impl Iterator<Item = &'a Volume>) -> Vec<Rule> {
    let mut v4: BTreeMap<Protocol, Vec<(Ipv4Range, PortRange)>> = BTreeMap::new();
    let mut v6: BTreeMap<Protocol, Vec<(Ipv6Range, PortRange)>> = BTreeMap::new();
    for volume in volumes {
        match volume.address {
            IpRange::V4(r) => v4.entry(volume.protocol).or_default().push((r, volume.ports)),
            IpRange::V6(r) => v6.entry(volume.protocol).or_default().push((r, volume.ports)),
        }
    }

    let mut entries = Vec::new();
    for protocol in Protocol::CONCRETE {
        if let Some(boxes) = v4.get(&protocol) {
            entries.extend(group_by_ports(boxes).into_iter().map(|(range, ports)| Entry {
                protocol,
                address: Some(IpRange::V4(range)),
                ports,
            }));
        }
        if let Some(boxes) = v6.get(&protocol) {
            entries.extend(group_by_ports(boxes).into_iter().map(|(range, ports)| Entry {
                protocol,
                address: Some(IpRange::V6(range)),
                ports,
            }));
        }
    }

    collapse_families(&mut entries);
    collapse_protocols(&mut entries);

    entries.iter().flat_map(|entry| emit(direction, entry)).collect()
}

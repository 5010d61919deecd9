//! Address interval algebra shared by both IP families
//!
//! [`AddressRange`] is an inclusive `[start, end]` interval over one address
//! family. The family is a type parameter implementing [`Address`]; both
//! `Ipv4Addr` (32 bits) and `Ipv6Addr` (128 bits) are widened to `u128` for
//! arithmetic so subtraction, merging and CIDR decomposition exist once.
//!
//! # Example
//!
//! ```
//! use secrules::core::address::Ipv4Range;
//! use std::net::Ipv4Addr;
//!
//! let range = Ipv4Range::new(Ipv4Addr::new(192, 168, 22, 0), Ipv4Addr::new(192, 168, 23, 0));
//! let nets: Vec<String> = range.to_ip_nets().iter().map(ToString::to_string).collect();
//! assert_eq!(nets, ["192.168.22.0/24", "192.168.23.0/32"]);
//! ```

use crate::core::error::{Error, Result};
use crate::validators;
use ipnetwork::IpNetwork;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// A fixed-width address family.
///
/// Implementors only describe their width and how to convert to and from the
/// `u128` bit container; all range logic lives in [`AddressRange`].
pub trait Address:
    Copy + Eq + Ord + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    /// Width of the family in bits (32 or 128)
    const BITS: u32;

    fn to_bits(self) -> u128;

    /// Builds an address from the low `BITS` bits of `bits`
    fn from_bits(bits: u128) -> Self;

    fn max_bits() -> u128 {
        u128::MAX >> (128 - Self::BITS)
    }

    fn lowest() -> Self {
        Self::from_bits(0)
    }

    fn highest() -> Self {
        Self::from_bits(Self::max_bits())
    }

    /// Next address, or `None` at the top of the family
    fn checked_step_up(self) -> Option<Self> {
        let bits = self.to_bits();
        (bits < Self::max_bits()).then(|| Self::from_bits(bits + 1))
    }

    /// Previous address, or `None` at the bottom of the family
    fn checked_step_down(self) -> Option<Self> {
        self.to_bits().checked_sub(1).map(Self::from_bits)
    }

    /// Next address for callers that rely on not being at the top.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvariantViolation` instead of wrapping to the lowest
    /// address.
    fn step_up(self) -> Result<Self> {
        self.checked_step_up().ok_or_else(|| {
            Error::InvariantViolation(format!("{self} is the highest address of its family"))
        })
    }

    /// Previous address for callers that rely on not being at the bottom.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvariantViolation` instead of wrapping to the highest
    /// address.
    fn step_down(self) -> Result<Self> {
        self.checked_step_down().ok_or_else(|| {
            Error::InvariantViolation(format!("{self} is the lowest address of its family"))
        })
    }
}

impl Address for Ipv4Addr {
    const BITS: u32 = 32;

    fn to_bits(self) -> u128 {
        u128::from(u32::from(self))
    }

    fn from_bits(bits: u128) -> Self {
        Ipv4Addr::from(bits as u32)
    }
}

impl Address for Ipv6Addr {
    const BITS: u32 = 128;

    fn to_bits(self) -> u128 {
        u128::from(self)
    }

    fn from_bits(bits: u128) -> Self {
        Ipv6Addr::from(bits)
    }
}

/// Mask with the low `host_bits` bits set
fn low_mask(host_bits: u32) -> u128 {
    if host_bits >= 128 {
        u128::MAX
    } else {
        (1u128 << host_bits) - 1
    }
}

/// Inclusive address interval, `start <= end` always holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AddressRange<A> {
    start: A,
    end: A,
}

pub type Ipv4Range = AddressRange<Ipv4Addr>;
pub type Ipv6Range = AddressRange<Ipv6Addr>;

impl<A: Address> AddressRange<A> {
    /// Creates a range, swapping the bounds when given in descending order.
    pub fn new(a: A, b: A) -> Self {
        if a <= b {
            Self { start: a, end: b }
        } else {
            Self { start: b, end: a }
        }
    }

    pub fn host(addr: A) -> Self {
        Self {
            start: addr,
            end: addr,
        }
    }

    /// The whole address space of the family
    pub fn full() -> Self {
        Self {
            start: A::lowest(),
            end: A::highest(),
        }
    }

    /// Range covered by `addr/prefix_len`; host bits of `addr` are ignored.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if the mask length exceeds the family width.
    pub fn from_prefix(addr: A, prefix_len: u8) -> Result<Self> {
        let prefix_len = validators::validate_prefix_len(prefix_len, A::BITS)
            .map_err(|message| Error::validation("address", message))?;
        Ok(Self::block(addr, u32::from(prefix_len)))
    }

    fn block(addr: A, prefix_len: u32) -> Self {
        let mask = low_mask(A::BITS.saturating_sub(prefix_len));
        let start = addr.to_bits() & !mask & A::max_bits();
        Self {
            start: A::from_bits(start),
            end: A::from_bits(start | mask),
        }
    }

    pub fn start(&self) -> A {
        self.start
    }

    pub fn end(&self) -> A {
        self.end
    }

    pub fn is_full(&self) -> bool {
        *self == Self::full()
    }

    pub fn contains(&self, addr: A) -> bool {
        self.start <= addr && addr <= self.end
    }

    pub fn contains_range(&self, other: &Self) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn overlaps(&self, other: &Self) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn intersection(&self, other: &Self) -> Option<Self> {
        self.overlaps(other).then(|| Self {
            start: self.start.max(other.start),
            end: self.end.min(other.end),
        })
    }

    /// Computes `self - other`.
    ///
    /// Returns the surviving pieces (`lefts`, ascending and disjoint) and the
    /// removed part (`sub`, equal to `self ∩ other`):
    ///
    /// - disjoint: `lefts = [self]`, `sub = None`
    /// - `other` covers `self`: `lefts = []`, `sub = self`
    /// - `other` cuts the left edge: one left piece after `other.end`
    /// - `other` cuts the right edge: one left piece before `other.start`
    /// - `other` strictly inside: a piece on each side, `sub = other`
    pub fn substract(&self, other: &Self) -> (Vec<Self>, Option<Self>) {
        let Some(sub) = self.intersection(other) else {
            return (vec![*self], None);
        };

        let mut lefts = Vec::with_capacity(2);
        // other.start > self.start >= lowest, so stepping down cannot wrap
        if other.start > self.start
            && let Some(end) = other.start.checked_step_down()
        {
            lefts.push(Self {
                start: self.start,
                end,
            });
        }
        if other.end < self.end
            && let Some(start) = other.end.checked_step_up()
        {
            lefts.push(Self {
                start,
                end: self.end,
            });
        }
        (lefts, Some(sub))
    }

    /// Sorts by start and folds overlapping or adjacent ranges together.
    pub fn merge(ranges: &[Self]) -> Vec<Self> {
        let mut sorted = ranges.to_vec();
        sorted.sort_unstable();

        let mut merged: Vec<Self> = Vec::with_capacity(sorted.len());
        for range in sorted {
            if let Some(last) = merged.last_mut() {
                let touches = match last.end.checked_step_up() {
                    Some(next) => range.start <= next,
                    None => true,
                };
                if touches {
                    last.end = last.end.max(range.end);
                    continue;
                }
            }
            merged.push(range);
        }
        merged
    }

    /// Minimal list of CIDR prefixes covering exactly this range.
    ///
    /// Greedy: at each step emit the largest block aligned to the current
    /// start that does not run past `end`.
    pub fn to_ip_nets(&self) -> Vec<Cidr<A>> {
        let end = self.end.to_bits();
        let mut start = self.start.to_bits();
        let mut nets = Vec::new();

        loop {
            let mut host_bits = if start == 0 {
                A::BITS
            } else {
                start.trailing_zeros().min(A::BITS)
            };
            while host_bits > 0 && start | low_mask(host_bits) > end {
                host_bits -= 1;
            }

            let block_end = start | low_mask(host_bits);
            nets.push(Cidr {
                network: A::from_bits(start),
                prefix_len: (A::BITS - host_bits) as u8,
            });

            if block_end >= end {
                break;
            }
            start = block_end + 1;
        }
        nets
    }

    /// The single prefix equal to this range, if the range is CIDR aligned
    pub fn as_cidr(&self) -> Option<Cidr<A>> {
        match self.to_ip_nets().as_slice() {
            [cidr] => Some(*cidr),
            _ => None,
        }
    }

    /// Number of addresses in the range, saturating at `u128::MAX` for the
    /// full IPv6 space.
    pub fn address_count(&self) -> u128 {
        (self.end.to_bits() - self.start.to_bits()).saturating_add(1)
    }

    /// Uniformly samples an address from the range (not for cryptographic use).
    pub fn random<R: Rng + ?Sized>(&self, rng: &mut R) -> A {
        A::from_bits(rng.random_range(self.start.to_bits()..=self.end.to_bits()))
    }
}

impl<A: Address> fmt::Display for AddressRange<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// A power-of-two aligned block, `network/prefix_len`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cidr<A> {
    network: A,
    prefix_len: u8,
}

impl<A: Address> Cidr<A> {
    /// # Errors
    ///
    /// Returns `Error::Validation` if the mask length exceeds the family width.
    pub fn new(addr: A, prefix_len: u8) -> Result<Self> {
        let range = AddressRange::from_prefix(addr, prefix_len)?;
        Ok(Self {
            network: range.start(),
            prefix_len,
        })
    }

    pub fn network(&self) -> A {
        self.network
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn is_host(&self) -> bool {
        u32::from(self.prefix_len) == A::BITS
    }

    pub fn to_range(&self) -> AddressRange<A> {
        AddressRange::block(self.network, u32::from(self.prefix_len))
    }
}

impl<A: Address> fmt::Display for Cidr<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

/// Address range tagged with its family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IpRange {
    V4(Ipv4Range),
    V6(Ipv6Range),
}

impl IpRange {
    pub fn is_ipv4(&self) -> bool {
        matches!(self, IpRange::V4(_))
    }

    pub fn is_full(&self) -> bool {
        match self {
            IpRange::V4(r) => r.is_full(),
            IpRange::V6(r) => r.is_full(),
        }
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        match (self, addr) {
            (IpRange::V4(r), IpAddr::V4(a)) => r.contains(a),
            (IpRange::V6(r), IpAddr::V6(a)) => r.contains(a),
            _ => false,
        }
    }

    pub fn address_count(&self) -> u128 {
        match self {
            IpRange::V4(r) => r.address_count(),
            IpRange::V6(r) => r.address_count(),
        }
    }

    /// False for ranges of different families
    pub fn overlaps(&self, other: &IpRange) -> bool {
        match (self, other) {
            (IpRange::V4(a), IpRange::V4(b)) => a.overlaps(b),
            (IpRange::V6(a), IpRange::V6(b)) => a.overlaps(b),
            _ => false,
        }
    }

    /// Family-aware [`AddressRange::substract`]; ranges of different
    /// families are disjoint.
    pub fn substract(&self, other: &IpRange) -> (Vec<IpRange>, Option<IpRange>) {
        match (self, other) {
            (IpRange::V4(a), IpRange::V4(b)) => {
                let (lefts, sub) = a.substract(b);
                (lefts.into_iter().map(IpRange::V4).collect(), sub.map(IpRange::V4))
            }
            (IpRange::V6(a), IpRange::V6(b)) => {
                let (lefts, sub) = a.substract(b);
                (lefts.into_iter().map(IpRange::V6).collect(), sub.map(IpRange::V6))
            }
            _ => (vec![*self], None),
        }
    }

    /// CIDR decomposition, one range per prefix
    pub fn to_ip_nets(&self) -> Vec<IpRange> {
        match self {
            IpRange::V4(r) => r.to_ip_nets().iter().map(|c| IpRange::V4(c.to_range())).collect(),
            IpRange::V6(r) => r.to_ip_nets().iter().map(|c| IpRange::V6(c.to_range())).collect(),
        }
    }
}

impl From<IpNetwork> for IpRange {
    fn from(net: IpNetwork) -> Self {
        match net {
            IpNetwork::V4(n) => IpRange::V4(AddressRange::block(n.ip(), u32::from(n.prefix()))),
            IpNetwork::V6(n) => IpRange::V6(AddressRange::block(n.ip(), u32::from(n.prefix()))),
        }
    }
}

impl From<Ipv4Range> for IpRange {
    fn from(range: Ipv4Range) -> Self {
        IpRange::V4(range)
    }
}

impl From<Ipv6Range> for IpRange {
    fn from(range: Ipv6Range) -> Self {
        IpRange::V6(range)
    }
}

/// Renders a range as a bare host, a prefix, or `start-end`
fn write_range<A: Address>(f: &mut fmt::Formatter<'_>, range: &AddressRange<A>) -> fmt::Result {
    match range.as_cidr() {
        Some(cidr) if cidr.is_host() => write!(f, "{}", cidr.network()),
        Some(cidr) => write!(f, "{cidr}"),
        None => write!(f, "{range}"),
    }
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpRange::V4(r) => write_range(f, r),
            IpRange::V6(r) => write_range(f, r),
        }
    }
}

impl FromStr for IpRange {
    type Err = Error;

    /// Accepts `addr`, `addr/len`, or `start-end` within one family.
    fn from_str(s: &str) -> Result<Self> {
        if let Some((start, end)) = s.split_once('-') {
            let start: IpAddr = start
                .parse()
                .map_err(|_| Error::syntax(s, "malformed range start address"))?;
            let end: IpAddr = end
                .parse()
                .map_err(|_| Error::syntax(s, "malformed range end address"))?;
            return match (start, end) {
                (IpAddr::V4(a), IpAddr::V4(b)) => Ok(IpRange::V4(AddressRange::new(a, b))),
                (IpAddr::V6(a), IpAddr::V6(b)) => Ok(IpRange::V6(AddressRange::new(a, b))),
                _ => Err(Error::syntax(s, "range mixes IPv4 and IPv6 addresses")),
            };
        }

        let net: IpNetwork = s
            .parse()
            .map_err(|e| Error::syntax(s, format!("malformed CIDR: {e}")))?;
        Ok(IpRange::from(net))
    }
}

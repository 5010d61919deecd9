//! Port ranges and discrete port sets over `1..=65535`
//!
//! Two representations interoperate here: [`PortRange`] for contiguous spans
//! and [`Ports`] for explicit lists. [`PortSpec`] is what a rule carries.
//! Subtraction follows the same case analysis as address ranges.

use crate::core::error::{Error, Result};
use crate::validators;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const PORT_MIN: u16 = 1;
pub const PORT_MAX: u16 = 65535;

/// Inclusive port span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    /// Creates a range, swapping the bounds when given in descending order.
    pub fn new(a: u16, b: u16) -> Self {
        Self {
            start: a.min(b),
            end: a.max(b),
        }
    }

    pub fn single(port: u16) -> Self {
        Self {
            start: port,
            end: port,
        }
    }

    pub fn full() -> Self {
        Self {
            start: PORT_MIN,
            end: PORT_MAX,
        }
    }

    pub fn is_full(&self) -> bool {
        *self == Self::full()
    }

    pub fn is_single(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, port: u16) -> bool {
        self.start <= port && port <= self.end
    }

    pub fn contains_range(&self, other: &PortRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn overlaps(&self, other: &PortRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn intersection(&self, other: &PortRange) -> Option<PortRange> {
        self.overlaps(other).then(|| PortRange {
            start: self.start.max(other.start),
            end: self.end.min(other.end),
        })
    }

    pub fn count(&self) -> u32 {
        u32::from(self.end) - u32::from(self.start) + 1
    }

    /// Removes `other` from this range.
    ///
    /// Returns the surviving pieces and the removed part, with the same
    /// disjoint / covered / edge / interior cases as address subtraction.
    pub fn substract_port_range(&self, other: &PortRange) -> (Vec<PortRange>, Option<PortRange>) {
        let Some(sub) = self.intersection(other) else {
            return (vec![*self], None);
        };

        let mut lefts = Vec::with_capacity(2);
        if other.start > self.start
            && let Some(end) = other.start.checked_sub(1)
        {
            lefts.push(PortRange {
                start: self.start,
                end,
            });
        }
        if other.end < self.end
            && let Some(start) = other.end.checked_add(1)
        {
            lefts.push(PortRange {
                start,
                end: self.end,
            });
        }
        (lefts, Some(sub))
    }

    /// Removes individual ports from this range.
    ///
    /// Returns the surviving sub-ranges and the ports that were actually
    /// inside the range.
    pub fn substract_ports(&self, ports: &Ports) -> (Vec<PortRange>, Ports) {
        let removed: Vec<u16> = ports.iter().filter(|p| self.contains(*p)).collect();

        let mut lefts = Vec::with_capacity(removed.len() + 1);
        // u32 cursor so stepping past 65535 cannot wrap
        let mut next = u32::from(self.start);
        for &port in &removed {
            if u32::from(port) > next {
                lefts.push(PortRange {
                    start: next as u16,
                    end: port - 1,
                });
            }
            next = u32::from(port) + 1;
        }
        if next <= u32::from(self.end) {
            lefts.push(PortRange {
                start: next as u16,
                end: self.end,
            });
        }
        (lefts, Ports(removed))
    }

    /// Sorts by start and folds overlapping or adjacent ranges together.
    pub fn merge(ranges: &[PortRange]) -> Vec<PortRange> {
        let mut sorted = ranges.to_vec();
        sorted.sort_unstable();

        let mut merged: Vec<PortRange> = Vec::with_capacity(sorted.len());
        for range in sorted {
            if let Some(last) = merged.last_mut()
                && u32::from(range.start) <= u32::from(last.end) + 1
            {
                last.end = last.end.max(range.end);
                continue;
            }
            merged.push(range);
        }
        merged
    }

    /// Ranges covering `[1, 65535]` minus `ranges`
    pub fn complement(ranges: &[PortRange]) -> Vec<PortRange> {
        let mut gaps = Vec::new();
        let mut next = u32::from(PORT_MIN);
        for range in Self::merge(ranges) {
            if u32::from(range.start) > next {
                gaps.push(PortRange {
                    start: next as u16,
                    end: range.start - 1,
                });
            }
            next = u32::from(range.end) + 1;
        }
        if next <= u32::from(PORT_MAX) {
            gaps.push(PortRange {
                start: next as u16,
                end: PORT_MAX,
            });
        }
        gaps
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Set of discrete ports, kept sorted and free of duplicates
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Vec<u16>")]
pub struct Ports(Vec<u16>);

impl From<Vec<u16>> for Ports {
    fn from(ports: Vec<u16>) -> Self {
        Ports::new(ports)
    }
}

impl Ports {
    pub fn new(ports: impl IntoIterator<Item = u16>) -> Self {
        let mut ports = Self(ports.into_iter().collect());
        ports.dedup();
        ports
    }

    /// Sorts ascending and drops repeated entries.
    pub fn dedup(&mut self) {
        self.0.sort_unstable();
        self.0.dedup();
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.0.iter().copied()
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, port: u16) -> bool {
        self.0.binary_search(&port).is_ok()
    }

    /// True when every port of `other` is in this set
    pub fn contains_ports(&self, other: &Ports) -> bool {
        other.iter().all(|p| self.contains(p))
    }

    /// Set equality, ignoring order and repeats
    pub fn same_as(&self, other: &Ports) -> bool {
        self.contains_ports(other) && other.contains_ports(self)
    }

    /// Returns `(self - other, self ∩ other)`.
    pub fn substract_ports(&self, other: &Ports) -> (Ports, Ports) {
        let (sub, left): (Vec<u16>, Vec<u16>) = self.iter().partition(|p| other.contains(*p));
        (Ports(left), Ports(sub))
    }

    /// Returns the ports outside `range` and the ports inside it.
    pub fn substract_port_range(&self, range: &PortRange) -> (Ports, Ports) {
        let (sub, left): (Vec<u16>, Vec<u16>) = self.iter().partition(|p| range.contains(*p));
        (Ports(left), Ports(sub))
    }

    /// Consecutive runs of ports as ascending ranges
    pub fn to_ranges(&self) -> Vec<PortRange> {
        let mut ranges: Vec<PortRange> = Vec::new();
        for port in self.iter() {
            if let Some(last) = ranges.last_mut()
                && u32::from(last.end) + 1 == u32::from(port)
            {
                last.end = port;
                continue;
            }
            ranges.push(PortRange::single(port));
        }
        ranges
    }
}

impl fmt::Display for Ports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, port) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{port}")?;
        }
        Ok(())
    }
}

/// Port restriction carried by a rule
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortSpec {
    Range(PortRange),
    Ports(Ports),
}

impl PortSpec {
    pub fn contains(&self, port: u16) -> bool {
        match self {
            PortSpec::Range(r) => r.contains(port),
            PortSpec::Ports(p) => p.contains(port),
        }
    }

    /// Merged ascending ranges covering exactly the same ports
    pub fn to_ranges(&self) -> Vec<PortRange> {
        match self {
            PortSpec::Range(r) => vec![*r],
            PortSpec::Ports(p) => p.to_ranges(),
        }
    }

    pub fn is_full(&self) -> bool {
        self.to_ranges() == [PortRange::full()]
    }

    /// Canonical specs for a set of port ranges.
    ///
    /// Single ports are gathered into one list; wider spans each get their own
    /// range, since the rule grammar cannot mix both. An empty result means
    /// the ranges cover every port.
    pub fn from_ranges(ranges: &[PortRange]) -> Vec<PortSpec> {
        let merged = PortRange::merge(ranges);
        if merged == [PortRange::full()] {
            return Vec::new();
        }

        let (singles, spans): (Vec<PortRange>, Vec<PortRange>) =
            merged.into_iter().partition(PortRange::is_single);

        let mut specs = Vec::with_capacity(spans.len() + 1);
        if !singles.is_empty() {
            specs.push(PortSpec::Ports(Ports::new(singles.iter().map(|r| r.start))));
        }
        specs.extend(spans.into_iter().map(PortSpec::Range));
        specs
    }

    /// # Errors
    ///
    /// Returns `Error::Validation` for port 0, reversed bounds or an empty list.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Error::validation("ports", message);
        match self {
            PortSpec::Range(r) => {
                validators::validate_port_range(r.start, r.end).map_err(invalid)?;
            }
            PortSpec::Ports(p) => {
                if p.is_empty() {
                    return Err(invalid("Port list is empty".to_string()));
                }
                for port in p.iter() {
                    validators::validate_port(port).map_err(invalid)?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortSpec::Range(r) => write!(f, "{r}"),
            PortSpec::Ports(p) => write!(f, "{p}"),
        }
    }
}

/// Parses one numeric port token; digits only, range checked.
fn parse_port(token: &str, whole: &str) -> Result<u16> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::syntax(whole, "malformed port token"));
    }
    let value: i64 = token
        .parse()
        .map_err(|_| Error::syntax(whole, "port number too large"))?;
    validators::validate_port_number(value).map_err(|message| Error::validation("ports", message))
}

impl FromStr for PortSpec {
    type Err = Error;

    /// Accepts `22`, `22,80,443` or `1000-2000` (bounds may be reversed).
    fn from_str(s: &str) -> Result<Self> {
        if let Some((start, end)) = s.split_once('-') {
            let start = parse_port(start, s)?;
            let end = parse_port(end, s)?;
            return Ok(PortSpec::Range(PortRange::new(start, end)));
        }

        let ports = s
            .split(',')
            .map(|token| parse_port(token, s))
            .collect::<Result<Vec<u16>>>()?;
        Ok(PortSpec::Ports(Ports::new(ports)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substract_port_range_cases() {
        let range = PortRange::new(100, 200);

        let (lefts, sub) = range.substract_port_range(&PortRange::new(300, 400));
        assert_eq!(lefts, vec![range]);
        assert!(sub.is_none());

        let (lefts, sub) = range.substract_port_range(&PortRange::new(50, 300));
        assert!(lefts.is_empty());
        assert_eq!(sub, Some(range));

        let (lefts, sub) = range.substract_port_range(&PortRange::new(50, 150));
        assert_eq!(lefts, vec![PortRange::new(151, 200)]);
        assert_eq!(sub, Some(PortRange::new(100, 150)));

        let (lefts, sub) = range.substract_port_range(&PortRange::new(150, 250));
        assert_eq!(lefts, vec![PortRange::new(100, 149)]);
        assert_eq!(sub, Some(PortRange::new(150, 200)));

        let (lefts, sub) = range.substract_port_range(&PortRange::new(120, 130));
        assert_eq!(lefts, vec![PortRange::new(100, 119), PortRange::new(131, 200)]);
        assert_eq!(sub, Some(PortRange::new(120, 130)));
    }

    #[test]
    fn test_substract_port_range_domain_edges() {
        let full = PortRange::full();
        let (lefts, _) = full.substract_port_range(&PortRange::single(1));
        assert_eq!(lefts, vec![PortRange::new(2, 65535)]);

        let (lefts, _) = full.substract_port_range(&PortRange::single(65535));
        assert_eq!(lefts, vec![PortRange::new(1, 65534)]);

        let (lefts, _) = full.substract_port_range(&PortRange::single(3389));
        assert_eq!(lefts, vec![PortRange::new(1, 3388), PortRange::new(3390, 65535)]);
    }

    #[test]
    fn test_range_substract_ports() {
        let range = PortRange::new(10, 20);
        let (lefts, sub) = range.substract_ports(&Ports::new([10, 15, 16, 30]));
        assert_eq!(lefts, vec![PortRange::new(11, 14), PortRange::new(17, 20)]);
        assert_eq!(sub.as_slice(), &[10, 15, 16]);

        let (lefts, sub) = PortRange::full().substract_ports(&Ports::new([65535]));
        assert_eq!(lefts, vec![PortRange::new(1, 65534)]);
        assert_eq!(sub.as_slice(), &[65535]);

        let (lefts, sub) = range.substract_ports(&Ports::new([1, 2]));
        assert_eq!(lefts, vec![range]);
        assert!(sub.is_empty());
    }

    #[test]
    fn test_ports_substract() {
        let ports = Ports::new([80, 22, 443, 22]);
        assert_eq!(ports.as_slice(), &[22, 80, 443]);

        let (left, sub) = ports.substract_ports(&Ports::new([22, 8080]));
        assert_eq!(left.as_slice(), &[80, 443]);
        assert_eq!(sub.as_slice(), &[22]);

        let (left, sub) = ports.substract_port_range(&PortRange::new(1, 100));
        assert_eq!(left.as_slice(), &[443]);
        assert_eq!(sub.as_slice(), &[22, 80]);
    }

    #[test]
    fn test_ports_predicates() {
        let ports = Ports::new([22, 80, 443]);
        assert!(ports.contains(80));
        assert!(!ports.contains(81));
        assert!(ports.contains_ports(&Ports::new([443, 22])));
        assert!(!ports.contains_ports(&Ports::new([22, 23])));
        assert!(ports.same_as(&Ports::new([443, 80, 22, 22])));
        assert!(!ports.same_as(&Ports::new([22, 80])));
        assert!(PortRange::new(1, 1024).contains_range(&PortRange::new(22, 80)));
        assert!(!PortRange::new(1, 1024).contains_range(&PortRange::new(1000, 2000)));
    }

    #[test]
    fn test_merge_ranges() {
        let merged = PortRange::merge(&[
            PortRange::new(3390, 65535),
            PortRange::new(1, 3388),
            PortRange::single(3389),
        ]);
        assert_eq!(merged, vec![PortRange::full()]);

        let merged = PortRange::merge(&[PortRange::single(80), PortRange::single(22)]);
        assert_eq!(merged, vec![PortRange::single(22), PortRange::single(80)]);
    }

    #[test]
    fn test_complement() {
        assert_eq!(
            PortRange::complement(&[PortRange::new(1, 1024)]),
            vec![PortRange::new(1025, 65535)]
        );
        assert!(PortRange::complement(&[PortRange::full()]).is_empty());
        assert_eq!(PortRange::complement(&[]), vec![PortRange::full()]);
    }

    #[test]
    fn test_ports_to_ranges() {
        let ports = Ports::new([5, 1, 2, 3, 9]);
        assert_eq!(
            ports.to_ranges(),
            vec![PortRange::new(1, 3), PortRange::single(5), PortRange::single(9)]
        );
    }

    #[test]
    fn test_spec_from_ranges() {
        let specs = PortSpec::from_ranges(&[
            PortRange::single(8080),
            PortRange::single(22),
            PortRange::new(1025, 2000),
        ]);
        let rendered: Vec<String> = specs.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, ["22,8080", "1025-2000"]);

        assert!(PortSpec::from_ranges(&[PortRange::full()]).is_empty());
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            "22".parse::<PortSpec>().unwrap(),
            PortSpec::Ports(Ports::new([22]))
        );
        assert_eq!(
            "1024-1".parse::<PortSpec>().unwrap(),
            PortSpec::Range(PortRange::new(1, 1024))
        );
        assert_eq!(
            "8080,22,80,22".parse::<PortSpec>().unwrap().to_string(),
            "22,80,8080"
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            "10--1".parse::<PortSpec>(),
            Err(Error::Syntax { .. })
        ));
        assert!(matches!("-1".parse::<PortSpec>(), Err(Error::Syntax { .. })));
        assert!(matches!("22,,80".parse::<PortSpec>(), Err(Error::Syntax { .. })));
        assert!(matches!("http".parse::<PortSpec>(), Err(Error::Syntax { .. })));
        assert!(matches!("0".parse::<PortSpec>(), Err(Error::Validation { .. })));
        assert!(matches!(
            "65536".parse::<PortSpec>(),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn test_validate() {
        assert!(PortSpec::Range(PortRange { start: 10, end: 1 }).validate().is_err());
        assert!(PortSpec::Range(PortRange { start: 0, end: 10 }).validate().is_err());
        assert!(PortSpec::Ports(Ports::default()).validate().is_err());
        assert!(PortSpec::Ports(Ports::new([0, 22])).validate().is_err());
        assert!(PortSpec::Ports(Ports::new([22])).validate().is_ok());
    }
}

//! Access rule model and its compact text form
//!
//! A [`Rule`] combines direction, action, priority, an optional address
//! restriction, a protocol and an optional port restriction. Rules are read
//! from text like:
//!
//! ```text
//! <direction>:<action> [<cidr-or-addr>] [<protocol> [<ports>]]
//! ```
//!
//! # Example
//!
//! ```
//! use secrules::core::rule::{Action, Direction, Protocol, Rule};
//!
//! let rule: Rule = "in:allow 192.168.2.0/24 tcp 80,22,22".parse().unwrap();
//! assert_eq!(rule.direction, Direction::In);
//! assert_eq!(rule.action, Action::Allow);
//! assert_eq!(rule.protocol, Protocol::Tcp);
//! assert_eq!(rule.to_string(), "in:allow 192.168.2.0/24 tcp 22,80");
//! ```
//!
//! Priority is not part of the text form; attach it with
//! [`Rule::with_priority`] before inserting into a rule set.

use crate::core::address::IpRange;
use crate::core::error::{Error, Result};
use crate::core::port::PortSpec;
use crate::validators;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 100;

/// Priority given to parsed rules until the caller attaches one
pub const DEFAULT_PRIORITY: u8 = MIN_PRIORITY;

/// Traffic direction a rule applies to
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum Direction {
    /// Incoming traffic
    #[strum(serialize = "in")]
    In,
    /// Outgoing traffic
    #[strum(serialize = "out")]
    Out,
}

impl Direction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum Action {
    #[strum(serialize = "allow")]
    Allow,
    #[strum(serialize = "deny")]
    Deny,
}

impl Action {
    pub const fn as_str(self) -> &'static str {
        match self {
            Action::Allow => "allow",
            Action::Deny => "deny",
        }
    }
}

/// Transport protocol matched by a rule
///
/// `Any` stands for tcp, udp and icmp together.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum Protocol {
    #[strum(serialize = "tcp")]
    Tcp,
    #[strum(serialize = "udp")]
    Udp,
    #[strum(serialize = "icmp")]
    Icmp,
    #[strum(serialize = "any")]
    Any,
}

impl Protocol {
    /// Protocols a concrete packet can carry
    pub const CONCRETE: [Protocol; 3] = [Protocol::Tcp, Protocol::Udp, Protocol::Icmp];

    pub const fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
            Protocol::Any => "any",
        }
    }

    /// Whether packets of this protocol have port numbers
    pub const fn carries_ports(self) -> bool {
        matches!(self, Protocol::Tcp | Protocol::Udp)
    }

    /// Concrete protocols covered by a rule with this protocol.
    ///
    /// A port restriction narrows `any` down to tcp and udp.
    pub fn covered(self, has_ports: bool) -> &'static [Protocol] {
        match self {
            Protocol::Tcp => &[Protocol::Tcp],
            Protocol::Udp => &[Protocol::Udp],
            Protocol::Icmp => &[Protocol::Icmp],
            Protocol::Any if has_ports => &[Protocol::Tcp, Protocol::Udp],
            Protocol::Any => &Self::CONCRETE,
        }
    }
}

/// One validated access-control entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rule {
    pub direction: Direction,
    pub action: Action,
    pub priority: u8,
    /// `None` matches every address of both families
    pub address: Option<IpRange>,
    pub protocol: Protocol,
    /// `None` matches every port
    pub ports: Option<PortSpec>,
}

impl Rule {
    /// Creates an unrestricted rule with the default priority.
    pub fn new(direction: Direction, action: Action, protocol: Protocol) -> Self {
        Self {
            direction,
            action,
            priority: DEFAULT_PRIORITY,
            address: None,
            protocol,
            ports: None,
        }
    }

    /// Parses and validates the compact text form.
    ///
    /// # Errors
    ///
    /// Returns `Error::Syntax` for malformed direction/action keywords,
    /// addresses or port tokens, and `Error::Validation` for an unknown
    /// protocol or when the parsed rule is invalid.
    pub fn parse(text: &str) -> Result<Self> {
        let mut tokens = text.split_whitespace();

        let head = tokens
            .next()
            .ok_or_else(|| Error::syntax(text, "empty rule"))?;
        let (direction, action) = head
            .split_once(':')
            .ok_or_else(|| Error::syntax(head, "expected <direction>:<action>"))?;
        let direction = Direction::from_str(direction)
            .map_err(|_| Error::syntax(head, "direction must be 'in' or 'out'"))?;
        let action = Action::from_str(action)
            .map_err(|_| Error::syntax(head, "action must be 'allow' or 'deny'"))?;

        let mut rule = Rule::new(direction, action, Protocol::Any);
        let mut next = tokens.next();

        if let Some(token) = next
            && Protocol::from_str(token).is_err()
        {
            if !token.contains(['.', ':', '/']) {
                return Err(Error::validation("protocol", format!("unknown protocol '{token}'")));
            }
            let range: IpRange = token.parse()?;
            rule.address = (!range.is_full()).then_some(range);
            next = tokens.next();
        }

        if let Some(token) = next {
            rule.protocol = Protocol::from_str(token)
                .map_err(|_| Error::validation("protocol", "must be tcp, udp, icmp or any"))?;
            if let Some(ports) = tokens.next() {
                rule.ports = Some(ports.parse()?);
            }
        }

        if let Some(extra) = tokens.next() {
            return Err(Error::syntax(extra, "unexpected trailing token"));
        }

        rule.validate()?;
        Ok(rule)
    }

    /// # Errors
    ///
    /// Returns `Error::Validation` if priority is outside 1-100, the address
    /// is a whole family, a port is invalid, or ports are combined with icmp.
    pub fn validate(&self) -> Result<()> {
        validators::validate_priority(i64::from(self.priority))
            .map_err(|message| Error::validation("priority", message))?;

        // a whole-family address renders as /0, which reads back as no address
        if let Some(address) = &self.address
            && address.is_full()
        {
            return Err(Error::validation(
                "address",
                format!("{address} covers a whole family; leave the address empty for any"),
            ));
        }

        if let Some(ports) = &self.ports {
            if self.protocol == Protocol::Icmp {
                return Err(Error::validation(
                    "ports",
                    "icmp rules cannot carry a port restriction",
                ));
            }
            ports.validate()?;
        }
        Ok(())
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_address(mut self, address: IpRange) -> Self {
        self.address = (!address.is_full()).then_some(address);
        self
    }

    pub fn with_ports(mut self, ports: PortSpec) -> Self {
        self.ports = Some(ports);
        self
    }

    /// No address, protocol `any`, no port restriction
    pub fn is_wild_match(&self) -> bool {
        self.address.is_none()
            && self.protocol == Protocol::Any
            && self.ports.as_ref().is_none_or(PortSpec::is_full)
    }

    pub fn is_allow_any(&self) -> bool {
        self.action == Action::Allow && self.is_wild_match()
    }

    /// Whether a single packet falls inside this rule's volume.
    ///
    /// `protocol` must be concrete; `port` is ignored for icmp.
    pub fn matches(&self, protocol: Protocol, addr: IpAddr, port: Option<u16>) -> bool {
        if !self.protocol.covered(self.ports.is_some()).contains(&protocol) {
            return false;
        }
        if let Some(range) = &self.address
            && !range.contains(addr)
        {
            return false;
        }
        match (&self.ports, port) {
            (None, _) => true,
            (Some(_), _) if !protocol.carries_ports() => true,
            (Some(spec), Some(port)) => spec.contains(port),
            (Some(spec), None) => spec.is_full(),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.direction, self.action)?;
        if let Some(address) = &self.address {
            write!(f, " {address}")?;
        }
        write!(f, " {}", self.protocol)?;
        if let Some(ports) = &self.ports {
            write!(f, " {ports}")?;
        }
        Ok(())
    }
}

impl FromStr for Rule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Rule::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::port::{PortRange, Ports};

    fn parse(text: &str) -> Rule {
        Rule::parse(text).unwrap()
    }

    #[test]
    fn test_parse_valid_rules() {
        let cases = [
            ("in:allow any", "in:allow any"),
            ("in:allow", "in:allow any"),
            ("out:deny tcp", "out:deny tcp"),
            ("in:allow 192.168.2.0/24 tcp 22", "in:allow 192.168.2.0/24 tcp 22"),
            ("in:allow 10.0.0.1 udp 53", "in:allow 10.0.0.1 udp 53"),
            ("in:allow 10.0.0.1/32 icmp", "in:allow 10.0.0.1 icmp"),
            ("in:allow 0.0.0.0/0 tcp 443", "in:allow tcp 443"),
            ("in:deny ::/0 any", "in:deny any"),
            ("in:allow fd:3ffe:3200:8::/64 tcp 1-1024", "in:allow fd:3ffe:3200:8::/64 tcp 1-1024"),
            ("in:allow 192.168.2.0/24 tcp 8080,22,80,22", "in:allow 192.168.2.0/24 tcp 22,80,8080"),
            ("in:allow tcp 1024-1", "in:allow tcp 1-1024"),
            ("IN:ALLOW TCP 22", "in:allow tcp 22"),
            ("out:allow 10.0.0.9-10.0.0.1 tcp", "out:allow 10.0.0.1-10.0.0.9 tcp"),
        ];
        for (text, canonical) in cases {
            assert_eq!(parse(text).to_string(), canonical, "parsing '{text}'");
        }
    }

    #[test]
    fn test_parse_sets_fields() {
        let rule = parse("in:deny 192.168.2.0/23 tcp 1-1024");
        assert_eq!(rule.direction, Direction::In);
        assert_eq!(rule.action, Action::Deny);
        assert_eq!(rule.priority, DEFAULT_PRIORITY);
        assert_eq!(rule.protocol, Protocol::Tcp);
        assert_eq!(rule.ports, Some(PortSpec::Range(PortRange::new(1, 1024))));
        assert!(rule.address.is_some());
    }

    #[test]
    fn test_parse_syntax_errors() {
        let cases = [
            "",
            "in",
            "sideways:allow",
            "in:maybe",
            "in:allow 10.0.0.0/33 tcp",
            "in:allow 10.0.0.256 tcp",
            "in:allow tcp 10--1",
            "in:allow tcp -1",
            "in:allow tcp 22 extra",
        ];
        for text in cases {
            assert!(
                matches!(Rule::parse(text), Err(Error::Syntax { .. })),
                "expected syntax error for '{text}'"
            );
        }
    }

    #[test]
    fn test_parse_validation_errors() {
        let cases = [
            "in:allow tcp 0",
            "in:allow udp 65536",
            "in:allow icmp 22",
            "in:allow sctp",
            "in:allow 10.0.0.0/8 sctp 22",
        ];
        for text in cases {
            assert!(
                matches!(Rule::parse(text), Err(Error::Validation { .. })),
                "expected validation error for '{text}'"
            );
        }
    }

    #[test]
    fn test_validate_priority() {
        let rule = parse("in:allow any");
        assert!(rule.clone().with_priority(0).validate().is_err());
        assert!(rule.clone().with_priority(101).validate().is_err());
        assert!(rule.clone().with_priority(100).validate().is_ok());
    }

    #[test]
    fn test_validate_reversed_explicit_range() {
        let rule = Rule::new(Direction::In, Action::Allow, Protocol::Tcp)
            .with_ports(PortSpec::Range(PortRange { start: 100, end: 10 }));
        assert!(matches!(rule.validate(), Err(Error::Validation { .. })));
    }

    #[test]
    fn test_validate_rejects_whole_family_address() {
        use crate::core::address::{Ipv4Range, Ipv6Range};

        let mut rule = Rule::new(Direction::In, Action::Allow, Protocol::Tcp);
        rule.address = Some(IpRange::V4(Ipv4Range::full()));
        assert!(matches!(rule.validate(), Err(Error::Validation { .. })));
        rule.address = Some(IpRange::V6(Ipv6Range::full()));
        assert!(matches!(rule.validate(), Err(Error::Validation { .. })));

        // the builder and the parser both turn a whole family into no address
        let built = Rule::new(Direction::In, Action::Allow, Protocol::Tcp)
            .with_address(IpRange::V4(Ipv4Range::full()));
        assert_eq!(built.address, None);
        assert!(built.validate().is_ok());
        assert_eq!(parse("in:allow ::/0 tcp").address, None);
    }

    #[test]
    fn test_wild_match() {
        assert!(parse("in:allow any").is_wild_match());
        assert!(parse("in:allow any").is_allow_any());
        assert!(parse("in:deny 0.0.0.0/0").is_wild_match());
        assert!(!parse("in:deny any").is_allow_any());
        assert!(!parse("in:allow tcp").is_wild_match());
        assert!(!parse("in:allow 10.0.0.0/8").is_wild_match());
        assert!(!parse("in:allow any 22").is_wild_match());
        assert!(parse("in:allow any 1-65535").is_wild_match());
    }

    #[test]
    fn test_matches() {
        let rule = parse("in:allow 192.168.2.0/23 tcp 22,80");
        let inside: IpAddr = "192.168.3.7".parse().unwrap();
        let outside: IpAddr = "192.168.4.1".parse().unwrap();

        assert!(rule.matches(Protocol::Tcp, inside, Some(22)));
        assert!(!rule.matches(Protocol::Tcp, inside, Some(23)));
        assert!(!rule.matches(Protocol::Udp, inside, Some(22)));
        assert!(!rule.matches(Protocol::Tcp, outside, Some(22)));
        assert!(!rule.matches(Protocol::Tcp, "::1".parse().unwrap(), Some(22)));
    }

    #[test]
    fn test_any_with_ports_skips_icmp() {
        let rule = parse("in:allow any 53");
        let addr: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(rule.matches(Protocol::Tcp, addr, Some(53)));
        assert!(rule.matches(Protocol::Udp, addr, Some(53)));
        assert!(!rule.matches(Protocol::Icmp, addr, None));
    }

    #[test]
    fn test_unrestricted_address_matches_both_families() {
        let rule = parse("out:allow udp");
        assert!(rule.matches(Protocol::Udp, "10.0.0.1".parse().unwrap(), Some(53)));
        assert!(rule.matches(Protocol::Udp, "fd::1".parse().unwrap(), Some(53)));
    }

    #[test]
    fn test_builder() {
        let rule = Rule::new(Direction::Out, Action::Allow, Protocol::Udp)
            .with_address("10.0.0.0/8".parse().unwrap())
            .with_ports(PortSpec::Ports(Ports::new([53])))
            .with_priority(50);
        assert_eq!(rule.to_string(), "out:allow 10.0.0.0/8 udp 53");
        assert_eq!(rule.priority, 50);
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn test_json_shape() {
        let rule = parse("in:allow 10.0.0.0/8 tcp 22");
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["direction"], "in");
        assert_eq!(json["action"], "allow");
        assert_eq!(json["protocol"], "tcp");
    }
}

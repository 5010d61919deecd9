//! Ordered rule collections and allow-list reduction
//!
//! A [`RuleSet`] holds validated rules for both directions. Evaluation is
//! "highest priority wins, deny wins ties, no match is deny". Rules are
//! processed in a fixed order: priority descending, then canonical text
//! ascending (see [`evaluation_order`]).
//!
//! # Example
//!
//! ```
//! use secrules::core::ruleset::RuleSet;
//!
//! let rules: RuleSet = "in:allow 192.168.2.0/24 tcp 22,80\nin:allow 192.168.2.0/24 tcp 8080,3389"
//!     .parse()
//!     .unwrap();
//! assert_eq!(
//!     rules.allow_list().to_string(),
//!     "in:allow 192.168.2.0/24 tcp 22,80,3389,8080\n"
//! );
//! ```

use crate::core::error::{Error, Result};
use crate::core::reduce;
use crate::core::rule::{Action, DEFAULT_PRIORITY, Direction, Protocol, Rule};
use crate::validators;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use strum::IntoEnumIterator;

/// Maximum number of rules allowed in a single rule set
///
/// Bounds pathological inputs such as thousands of single-host denies
/// against a `/0` allow.
pub const MAX_RULES: usize = 1000;

/// Evaluation order: priority descending, ties by canonical text ascending.
pub fn evaluation_order(a: &Rule, b: &Rule) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.to_string().cmp(&b.to_string()))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and appends a rule.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` for an invalid rule and `Error::RuleLimit`
    /// once the set holds [`MAX_RULES`] rules.
    pub fn add_rule(&mut self, rule: Rule) -> Result<()> {
        rule.validate()?;
        if self.rules.len() >= MAX_RULES {
            return Err(Error::RuleLimit { limit: MAX_RULES });
        }
        self.rules.push(rule);
        Ok(())
    }

    /// Rules in insertion order
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn direction(&self, direction: Direction) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(move |r| r.direction == direction)
    }

    /// Rules in evaluation order
    pub fn sorted(&self) -> Vec<&Rule> {
        let mut sorted: Vec<&Rule> = self.rules.iter().collect();
        sorted.sort_by(|a, b| evaluation_order(a, b));
        sorted
    }

    /// Decides a single packet.
    ///
    /// `protocol` must be concrete (tcp, udp or icmp); `any` never matches.
    pub fn evaluate(
        &self,
        direction: Direction,
        protocol: Protocol,
        addr: IpAddr,
        port: Option<u16>,
    ) -> Action {
        let mut best: Option<(u8, Action)> = None;
        for rule in self
            .direction(direction)
            .filter(|r| r.matches(protocol, addr, port))
        {
            best = match best {
                None => Some((rule.priority, rule.action)),
                Some((priority, _)) if rule.priority > priority => {
                    Some((rule.priority, rule.action))
                }
                Some((priority, _)) if rule.priority == priority && rule.action == Action::Deny => {
                    Some((priority, Action::Deny))
                }
                kept => kept,
            };
        }
        best.map_or(Action::Deny, |(_, action)| action)
    }

    /// Reduces the set to allow-only rules admitting exactly the same traffic.
    ///
    /// Directions are reduced independently. The result is a new set in
    /// evaluation order; `self` is untouched.
    pub fn allow_list(&self) -> RuleSet {
        let sorted = self.sorted();
        let mut rules = Vec::new();
        for direction in Direction::iter() {
            let ordered: Vec<&Rule> = sorted
                .iter()
                .copied()
                .filter(|r| r.direction == direction)
                .collect();
            if ordered.is_empty() {
                continue;
            }
            rules.extend(reduce::reduce_direction(direction, &ordered));
        }

        rules.sort_by(evaluation_order);
        rules.dedup();
        tracing::debug!(
            "Reduced {} rule(s) to {} allow rule(s)",
            self.rules.len(),
            rules.len()
        );
        RuleSet { rules }
    }

    /// Order-independent equality of the rules themselves
    pub fn same_rules(&self, other: &RuleSet) -> bool {
        let ours: HashSet<&Rule> = self.rules.iter().collect();
        let theirs: HashSet<&Rule> = other.rules.iter().collect();
        ours == theirs
    }

    /// Whether both sets admit exactly the same traffic
    pub fn is_equivalent(&self, other: &RuleSet) -> bool {
        self.allow_list().same_rules(&other.allow_list())
    }

    /// Parses rule text, one rule per line or `;`-separated.
    ///
    /// A line may start with an integer priority; lines without one get
    /// `default_priority`. Blank entries and `#` comments are skipped.
    ///
    /// # Errors
    ///
    /// Fails on the first rule that does not parse or validate, or when the
    /// text holds more than [`MAX_RULES`] rules.
    pub fn parse_with_priority(text: &str, default_priority: u8) -> Result<Self> {
        let mut set = RuleSet::new();
        for entry in text.split(['\n', ';']) {
            let entry = entry.split('#').next().unwrap_or_default().trim();
            if entry.is_empty() {
                continue;
            }
            set.add_rule(parse_line(entry, default_priority)?)?;
        }
        Ok(set)
    }
}

/// Parses one line: an optional leading priority, then the rule text.
fn parse_line(line: &str, default_priority: u8) -> Result<Rule> {
    let (first, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let Ok(priority) = first.parse::<i64>() else {
        return Ok(Rule::parse(line)?.with_priority(default_priority));
    };
    let priority = validators::validate_priority(priority)
        .map_err(|message| Error::validation("priority", message))?;
    Ok(Rule::parse(rest)?.with_priority(priority))
}

impl FromStr for RuleSet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        RuleSet::parse_with_priority(s, DEFAULT_PRIORITY)
    }
}

impl fmt::Display for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for rule in &self.rules {
            if rule.priority != DEFAULT_PRIORITY {
                write!(f, "{} ", rule.priority)?;
            }
            writeln!(f, "{rule}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(text: &str) -> RuleSet {
        text.parse().unwrap()
    }

    #[test]
    fn test_parse_with_priorities_and_comments() {
        let rules = set("# header\n10 in:deny tcp 22\n\nin:allow any ; out:allow udp 53 # dns\n");
        assert_eq!(rules.len(), 3);
        assert_eq!(rules.rules()[0].priority, 10);
        assert_eq!(rules.rules()[1].priority, DEFAULT_PRIORITY);
        assert_eq!(rules.direction(Direction::Out).count(), 1);
    }

    #[test]
    fn test_parse_with_default_priority() {
        let rules = RuleSet::parse_with_priority("in:allow any\n7 in:deny tcp", 30).unwrap();
        assert_eq!(rules.rules()[0].priority, 30);
        assert_eq!(rules.rules()[1].priority, 7);
    }

    #[test]
    fn test_parse_rejects_bad_priority() {
        assert!(matches!(
            "101 in:allow any".parse::<RuleSet>(),
            Err(Error::Validation { .. })
        ));
        assert!(matches!(
            "0 in:allow any".parse::<RuleSet>(),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn test_display_round_trip() {
        let rules = set("10 in:deny tcp 22\nin:allow any");
        assert_eq!(rules.to_string(), "10 in:deny tcp 22\nin:allow any\n");
        assert_eq!(set(&rules.to_string()), rules);
    }

    #[test]
    fn test_rule_limit() {
        let mut rules = RuleSet::new();
        for _ in 0..MAX_RULES {
            rules.add_rule(Rule::parse("in:allow any").unwrap()).unwrap();
        }
        assert!(matches!(
            rules.add_rule(Rule::parse("in:allow any").unwrap()),
            Err(Error::RuleLimit { limit: MAX_RULES })
        ));
    }

    #[test]
    fn test_add_rule_validates() {
        let mut rules = RuleSet::new();
        let rule = Rule::parse("in:allow any").unwrap().with_priority(200);
        assert!(rules.add_rule(rule).is_err());
        assert!(rules.is_empty());
    }

    #[test]
    fn test_add_rule_rejects_whole_family_address() {
        let mut rules = RuleSet::new();
        let mut rule = Rule::parse("in:allow tcp 22").unwrap();
        rule.address = Some(crate::core::address::IpRange::V4(
            crate::core::address::Ipv4Range::full(),
        ));
        assert!(matches!(rules.add_rule(rule), Err(Error::Validation { .. })));
        assert!(rules.is_empty());
    }

    #[test]
    fn test_sorted_order() {
        let rules = set("in:allow udp\n5 in:allow tcp\nin:allow 10.0.0.0/8 any\n5 in:deny icmp");
        let order: Vec<String> = rules.sorted().iter().map(ToString::to_string).collect();
        assert_eq!(
            order,
            [
                "in:allow tcp",
                "in:deny icmp",
                "in:allow 10.0.0.0/8 any",
                "in:allow udp",
            ]
        );
    }

    #[test]
    fn test_evaluate() {
        let rules = set("50 in:allow 10.0.0.0/8 tcp 22\n10 in:deny any\n10 in:allow tcp 80");
        let inside: IpAddr = "10.1.1.1".parse().unwrap();
        let outside: IpAddr = "11.1.1.1".parse().unwrap();

        assert_eq!(rules.evaluate(Direction::In, Protocol::Tcp, inside, Some(22)), Action::Allow);
        assert_eq!(rules.evaluate(Direction::In, Protocol::Tcp, outside, Some(22)), Action::Deny);
        // deny wins the tie at priority 10
        assert_eq!(rules.evaluate(Direction::In, Protocol::Tcp, outside, Some(80)), Action::Deny);
        assert_eq!(rules.evaluate(Direction::Out, Protocol::Tcp, inside, Some(22)), Action::Deny);
        assert_eq!(rules.evaluate(Direction::In, Protocol::Any, inside, Some(22)), Action::Deny);
    }

    #[test]
    fn test_allow_list_does_not_mutate() {
        let rules = set("in:deny tcp 1-1024\nin:allow 192.168.2.0/23 any");
        let before = rules.clone();
        let _ = rules.allow_list();
        assert_eq!(rules, before);
    }

    #[test]
    fn test_allow_list_per_direction() {
        let reduced = set("in:allow tcp 22\nout:deny any\nout:allow udp 53").allow_list();
        assert_eq!(reduced.to_string(), "in:allow tcp 22\n");
    }

    #[test]
    fn test_same_rules_ignores_order() {
        let a = set("in:allow 10.0.0.0/8 tcp 22\nin:allow udp 53");
        let b = set("in:allow udp 53\nin:allow 10.0.0.0/8 tcp 22");
        let c = set("in:allow udp 53\nin:allow 10.0.0.0/8 tcp 23");
        assert!(a.same_rules(&b));
        assert!(!a.same_rules(&c));
        assert!(!a.same_rules(&RuleSet::new()));
    }

    #[test]
    fn test_equivalence() {
        let split = set("in:allow 10.0.0.0/9 tcp 22\nin:allow 10.128.0.0/9 tcp 22");
        let whole = set("in:allow 10.0.0.0/8 tcp 22");
        let deny_hole = set("in:allow 10.0.0.0/8 tcp 22,23\nin:deny tcp 23");
        let different = set("in:allow 10.0.0.0/8 udp 22");

        assert!(split.is_equivalent(&whole));
        assert!(whole.is_equivalent(&deny_hole));
        assert!(!whole.is_equivalent(&different));
    }
}

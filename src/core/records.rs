//! Rule records and rule files
//!
//! A [`RuleRecord`] is the loosely typed shape rules take in JSON documents:
//! keywords are plain strings and numbers are unchecked. Converting a record
//! into a [`Rule`] runs full validation.
//!
//! Rule files ending in `.json` hold an array of records. Any other file is
//! read as rule text, one rule per line with an optional leading priority.

use crate::core::address::IpRange;
use crate::core::error::{Error, Result};
use crate::core::port::{PortRange, PortSpec, Ports};
use crate::core::rule::{Action, DEFAULT_PRIORITY, Direction, Protocol, Rule};
use crate::core::ruleset::RuleSet;
use crate::utils::write_atomic;
use crate::validators;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRecord {
    pub direction: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    /// Address or CIDR; absent means any address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr: Option<String>,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_start: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_end: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<i64>,
}

fn default_protocol() -> String {
    Protocol::Any.as_str().to_string()
}

fn keyword<T: FromStr>(field: &str, value: &str) -> Result<T> {
    T::from_str(value).map_err(|_| Error::validation(field, format!("unknown value '{value}'")))
}

fn port(value: i64) -> Result<u16> {
    validators::validate_port_number(value).map_err(|message| Error::validation("ports", message))
}

impl RuleRecord {
    /// Converts the record using `default_priority` when it carries none.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` for unknown keywords or out-of-range
    /// numbers, and `Error::Syntax` for a malformed address.
    pub fn to_rule(&self, default_priority: u8) -> Result<Rule> {
        let direction: Direction = keyword("direction", &self.direction)?;
        let action: Action = keyword("action", &self.action)?;
        let protocol: Protocol = keyword("protocol", &self.protocol)?;

        let priority = match self.priority {
            Some(p) => validators::validate_priority(p)
                .map_err(|message| Error::validation("priority", message))?,
            None => default_priority,
        };

        let mut rule = Rule::new(direction, action, protocol).with_priority(priority);
        if let Some(cidr) = &self.cidr {
            rule = rule.with_address(cidr.parse::<IpRange>()?);
        }

        rule.ports = match (self.port_start, self.port_end, self.ports.is_empty()) {
            (None, None, true) => None,
            (None, None, false) => Some(PortSpec::Ports(Ports::new(
                self.ports.iter().map(|&p| port(p)).collect::<Result<Vec<u16>>>()?,
            ))),
            (Some(start), end, true) => {
                let start = port(start)?;
                let end = end.map_or(Ok(start), port)?;
                // explicit bounds are not normalized; validate() rejects start > end
                Some(PortSpec::Range(PortRange { start, end }))
            }
            (None, Some(_), _) => {
                return Err(Error::validation("ports", "port_end given without port_start"));
            }
            (Some(_), _, false) => {
                return Err(Error::validation(
                    "ports",
                    "use either port_start/port_end or a ports list, not both",
                ));
            }
        };

        rule.validate()?;
        Ok(rule)
    }

    /// Checks the record without keeping the converted rule.
    ///
    /// # Errors
    ///
    /// Same as [`RuleRecord::to_rule`].
    pub fn validate(&self) -> Result<()> {
        self.to_rule(DEFAULT_PRIORITY).map(|_| ())
    }
}

impl TryFrom<&RuleRecord> for Rule {
    type Error = Error;

    fn try_from(record: &RuleRecord) -> Result<Self> {
        record.to_rule(DEFAULT_PRIORITY)
    }
}

impl From<&Rule> for RuleRecord {
    fn from(rule: &Rule) -> Self {
        let (port_start, port_end, ports) = match &rule.ports {
            None => (None, None, Vec::new()),
            Some(PortSpec::Range(r)) => (Some(i64::from(r.start)), Some(i64::from(r.end)), Vec::new()),
            Some(PortSpec::Ports(p)) => (None, None, p.iter().map(i64::from).collect()),
        };
        Self {
            direction: rule.direction.as_str().to_string(),
            action: rule.action.as_str().to_string(),
            priority: Some(i64::from(rule.priority)),
            cidr: rule.address.map(|a| a.to_string()),
            protocol: rule.protocol.as_str().to_string(),
            port_start,
            port_end,
            ports,
        }
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// Parses a JSON array of records into a rule set.
///
/// # Errors
///
/// Fails on malformed JSON, the first invalid record, or too many rules.
pub fn parse_records(json: &str, default_priority: u8) -> Result<RuleSet> {
    let records: Vec<RuleRecord> = serde_json::from_str(json)?;
    let mut set = RuleSet::new();
    for record in &records {
        set.add_rule(record.to_rule(default_priority)?)?;
    }
    Ok(set)
}

/// Loads a rule file, choosing the format by extension.
///
/// # Errors
///
/// Returns `Error::Io` if the file cannot be read, otherwise the first
/// parse or validation error.
pub fn load_rule_file(path: &Path, default_priority: u8) -> Result<RuleSet> {
    let text = std::fs::read_to_string(path)?;
    let set = if is_json(path) {
        parse_records(&text, default_priority)?
    } else {
        RuleSet::parse_with_priority(&text, default_priority)?
    };

    if set.is_empty() {
        tracing::warn!("{} contains no rules", path.display());
    } else {
        tracing::debug!("Loaded {} rule(s) from {}", set.len(), path.display());
    }
    Ok(set)
}

/// Renders a rule set as a pretty JSON array of records.
///
/// # Errors
///
/// Returns `Error::Serialization` if encoding fails.
pub fn to_records_json(set: &RuleSet) -> Result<String> {
    let records: Vec<RuleRecord> = set.rules().iter().map(RuleRecord::from).collect();
    Ok(serde_json::to_string_pretty(&records)?)
}

/// Writes a rule set atomically, as records for `.json` paths and as rule
/// text otherwise.
///
/// # Errors
///
/// Returns `Error::Io` or `Error::Serialization` on failure.
pub fn save_rule_file(path: &Path, set: &RuleSet) -> Result<()> {
    let contents = if is_json(path) {
        to_records_json(set)?
    } else {
        set.to_string()
    };
    write_atomic(path, contents.as_bytes())?;
    Ok(())
}

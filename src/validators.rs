//! Scalar validation helpers for rule fields
//!
//! These functions check one value at a time and report problems as plain
//! strings. The rule layer wraps them into [`crate::Error::Validation`] with
//! the offending field name attached.

use crate::core::address::IpRange;
use crate::core::port::{PORT_MAX, PORT_MIN};
use crate::core::rule::{MAX_PRIORITY, MIN_PRIORITY};

/// Validates a single port number.
///
/// # Errors
///
/// Returns `Err` if port is 0 (reserved).
pub fn validate_port(port: u16) -> Result<u16, String> {
    if port < PORT_MIN {
        Err(format!("Port must be between {PORT_MIN} and {PORT_MAX}"))
    } else {
        Ok(port)
    }
}

/// Validates a port number read from text or a loosely typed record.
///
/// # Errors
///
/// Returns `Err` if the value is 0, negative or above 65535.
pub fn validate_port_number(port: i64) -> Result<u16, String> {
    let port = u16::try_from(port)
        .map_err(|_| format!("Port {port} is outside {PORT_MIN}-{PORT_MAX}"))?;
    validate_port(port)
}

/// Validates a port range.
///
/// # Errors
///
/// Returns `Err` if:
/// - Either port is 0
/// - Start port is greater than end port
pub fn validate_port_range(start: u16, end: u16) -> Result<(u16, u16), String> {
    validate_port(start)?;
    validate_port(end)?;

    if start > end {
        Err("Start port must be less than or equal to end port".to_string())
    } else {
        Ok((start, end))
    }
}

/// Validates a rule priority.
///
/// # Errors
///
/// Returns `Err` if priority is outside 1-100.
pub fn validate_priority(priority: i64) -> Result<u8, String> {
    u8::try_from(priority)
        .ok()
        .filter(|p| (MIN_PRIORITY..=MAX_PRIORITY).contains(p))
        .ok_or_else(|| {
            format!("Priority {priority} is outside {MIN_PRIORITY}-{MAX_PRIORITY}")
        })
}

/// Validates a CIDR mask length for an address family of `bits` width.
///
/// # Errors
///
/// Returns `Err` if the mask is longer than the family.
pub fn validate_prefix_len(prefix_len: u8, bits: u32) -> Result<u8, String> {
    if u32::from(prefix_len) > bits {
        Err(format!("Mask length {prefix_len} exceeds {bits} bits"))
    } else {
        Ok(prefix_len)
    }
}

/// Services commonly named in rules, sorted by port
const WELL_KNOWN_PORTS: [(u16, &str); 10] = [
    (21, "FTP"),
    (22, "SSH"),
    (25, "SMTP"),
    (53, "DNS"),
    (80, "HTTP"),
    (123, "NTP"),
    (443, "HTTPS"),
    (3306, "MySQL"),
    (3389, "RDP"),
    (5432, "PostgreSQL"),
];

/// Blocks worth pointing out when a rule or packet touches them
const RESERVED_BLOCKS: [(&str, &str); 8] = [
    ("10.0.0.0/8", "private (RFC 1918)"),
    ("172.16.0.0/12", "private (RFC 1918)"),
    ("192.168.0.0/16", "private (RFC 1918)"),
    ("127.0.0.0/8", "loopback"),
    ("169.254.0.0/16", "link-local"),
    ("::1/128", "loopback"),
    ("fe80::/10", "link-local"),
    ("fc00::/7", "unique local"),
];

/// Names the service usually found on `port`, or flags it as privileged.
///
/// Informational only; used for `check` output notes.
pub fn check_well_known_port(port: u16) -> Option<String> {
    match WELL_KNOWN_PORTS.binary_search_by_key(&port, |(p, _)| *p) {
        Ok(i) => Some(format!("Port {port}: {}", WELL_KNOWN_PORTS[i].1)),
        Err(_) if port < 1024 => Some(format!("Port {port} is privileged (below 1024)")),
        Err(_) => None,
    }
}

/// Reports the first reserved block that `range` overlaps.
///
/// Informational only; used for `check` output notes.
pub fn check_reserved_range(range: &IpRange) -> Option<String> {
    RESERVED_BLOCKS.iter().find_map(|(block, label)| {
        let block: IpRange = block.parse().ok()?;
        block
            .overlaps(range)
            .then(|| format!("{range} overlaps the {label} block {block}"))
    })
}

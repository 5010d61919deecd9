//! secrules - security rule reduction
//!
//! Parses prioritized allow/deny rules over addresses, protocols and ports,
//! and rewrites them into an allow-only list that admits exactly the same
//! traffic.
//!
//! # Architecture
//!
//! - [`core`] - Rule model, range arithmetic, evaluation and reduction
//! - [`validators`] - Numeric bounds and informational checks
//! - [`config`] - Configuration persistence
//! - [`utils`] - Config directory lookup and atomic writes
//!
//! # Example
//!
//! ```
//! use secrules::RuleSet;
//!
//! let rules: RuleSet = "in:deny tcp 1-1024\nin:allow 192.168.2.0/23 any".parse().unwrap();
//! for rule in rules.allow_list().rules() {
//!     println!("{rule}");
//! }
//! ```

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::needless_lifetimes)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]

pub mod config;
pub mod core;
pub mod utils;
pub mod validators;

// Re-export commonly used types
pub use core::address::{Cidr, IpRange, Ipv4Range, Ipv6Range};
pub use core::error::{Error, Result};
pub use core::port::{PortRange, PortSpec, Ports};
pub use core::records::RuleRecord;
pub use core::rule::{Action, Direction, Protocol, Rule};
pub use core::ruleset::RuleSet;

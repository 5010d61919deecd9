//! Core rule model and reduction
//!
//! - [`address`]: Address ranges, CIDR blocks and range arithmetic
//! - [`port`]: Port ranges, port lists and their arithmetic
//! - [`rule`]: A single filtering rule and its text form
//! - [`ruleset`]: Rule collections, evaluation and allow-list reduction
//! - [`reduce`]: Volume carving and output coalescing behind the allow list
//! - [`records`]: JSON rule records and rule files
//! - [`error`]: Error types shared by every module

pub mod address;
pub mod error;
pub mod port;
pub mod records;
pub mod reduce;
pub mod rule;
pub mod ruleset;

#[cfg(test)]
pub mod test_helpers;

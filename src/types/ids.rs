//! Tracked identifiers.
//!
//! A `TrackedId` names an externally managed work item (a container, a task).
//! The watchdog never interprets it; it only records membership.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ipc::codec::TERMINATOR;

/// Opaque identifier of a tracked work item.
///
/// Non-empty and free of the wire terminator. Everything else, spaces
/// included, is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrackedId(String);

impl TrackedId {
    pub fn from_string(s: String) -> Result<Self, &'static str> {
        if s.is_empty() {
            return Err("TrackedId cannot be empty");
        }
        if s.contains(TERMINATOR) {
            return Err("TrackedId cannot contain ';'");
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build an id from a literal, panicking on invalid input. Test helper.
    #[cfg(test)]
    pub fn must(s: &str) -> Self {
        Self::from_string(s.to_string()).unwrap()
    }
}

impl fmt::Display for TrackedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&str> for TrackedId {
    type Error = crate::types::Error;

    fn try_from(s: &str) -> crate::types::Result<Self> {
        Self::from_string(s.to_string()).map_err(crate::types::Error::validation)
    }
}

//! Typed identifiers for blocks, flows, flow-blocks, books, and users.
//!
//! Every id is a store-assigned `i64` (the relational sequence on the server
//! side). Ids are opaque on the wire: `#[serde(transparent)]` keeps them as
//! plain JSON numbers so the REST payloads stay unchanged.

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A block identifier.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(i64);

/// A flow identifier.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowId(i64);

/// A flow-block (join row) identifier.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowBlockId(i64);

/// A book identifier.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookId(i64);

/// A user identifier.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

// ── Shared behavior ─────────────────────────────────────────────────────────

macro_rules! impl_typed_id {
    ($T:ident, $name:literal) => {
        impl $T {
            /// Wrap a raw store id.
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            /// The raw store id.
            pub const fn get(&self) -> i64 {
                self.0
            }

            /// Parse from a decimal string (path segments, CLI arguments).
            pub fn parse(s: &str) -> Result<Self, ParseIntError> {
                s.trim().parse::<i64>().map(Self)
            }
        }

        impl From<i64> for $T {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }

        impl From<$T> for i64 {
            fn from(id: $T) -> i64 {
                id.0
            }
        }

        impl FromStr for $T {
            type Err = ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $name, self.0)
            }
        }
    };
}

impl_typed_id!(BlockId, "BlockId");
impl_typed_id!(FlowId, "FlowId");
impl_typed_id!(FlowBlockId, "FlowBlockId");
impl_typed_id!(BookId, "BookId");
impl_typed_id!(UserId, "UserId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_serialize_as_plain_numbers() {
        let id = BlockId::new(42);
        assert_eq!(serde_json::to_string(&id).unwrap(), "42");
        let back: BlockId = serde_json::from_str("42").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn parse_and_display() {
        let id: FlowId = " 7 ".parse().unwrap();
        assert_eq!(id.get(), 7);
        assert_eq!(id.to_string(), "7");
        assert_eq!(format!("{id:?}"), "FlowId(7)");
        assert!(UserId::parse("seven").is_err());
    }
}

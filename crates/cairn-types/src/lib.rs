//! # cairn-types: Core types for `Cairn`
//!
//! This crate contains shared types used across the `Cairn` system:
//! - Entity IDs ([`BlockId`], [`Location`], [`BlockVersion`])
//! - Temporal types ([`Timestamp`])
//! - Block graph types ([`BlockNode`], [`BlockGraph`])
//! - Counterexample types ([`CfaEdge`], [`EdgeKind`], [`ErrorPath`], [`ErrorOrigin`])
//!
//! The block graph is produced by an external decomposition step and is
//! immutable once constructed. The mutable per-block bookkeeping (version,
//! most recent accepted precondition) lives in the scheduler, not here.

use std::{
    fmt::{self, Display},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

mod graph;
mod path;

pub use graph::{BlockGraph, BlockGraphError, BlockNode};
pub use path::{CfaEdge, EdgeKind, ErrorOrigin, ErrorPath, ErrorPathError};

// ============================================================================
// Entity IDs
// ============================================================================

/// Unique identifier for a block of the decomposed control-flow graph.
///
/// Block IDs are opaque strings assigned by the decomposition step (e.g.
/// `"B7"`). They appear verbatim in the wire envelope as `uniqueBlockId`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId(String);

impl BlockId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BlockId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for BlockId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A node of the control-flow graph, identified by its node number.
///
/// Locations are assigned by the frontend that built the CFA and are unique
/// program-wide. They appear in the wire envelope as `targetNodeNumber`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Location(u64);

impl Location {
    pub fn new(node: u64) -> Self {
        Self(node)
    }

    /// Returns the CFA node number.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N{}", self.0)
    }
}

impl From<u64> for Location {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Location> for u64 {
    fn from(loc: Location) -> Self {
        loc.0
    }
}

/// Monotonically increasing version of a block's accepted precondition.
///
/// The scheduler bumps the version each time it accepts a new precondition
/// for a block. A forward request referencing a version strictly older than
/// the predecessor block's current version is *stale* and must be discarded
/// by the receiver. This is the sole ordering guarantee the protocol relies
/// on; no global message order is assumed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct BlockVersion(u64);

impl BlockVersion {
    pub const ZERO: BlockVersion = BlockVersion(0);

    pub fn new(version: u64) -> Self {
        Self(version)
    }

    /// Returns the version as a `u64`.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next version.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for BlockVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

// ============================================================================
// Timestamp
// ============================================================================

/// Nanoseconds since the Unix epoch.
///
/// Serialized as a decimal *string*: the wire envelope transports timestamps
/// as `"<epoch-nanos as decimal string>"` so receivers in other languages do
/// not lose precision on 64-bit values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Returns the current wall-clock time.
    ///
    /// Saturates at zero if the system clock is before the Unix epoch.
    pub fn now() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self(nanos)
    }

    /// Returns the timestamp as nanoseconds since the epoch.
    pub fn as_nanos(self) -> u64 {
        self.0
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<u64>()
            .map(Timestamp)
            .map_err(|_| de::Error::custom(format!("invalid timestamp: {s:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_version_ordering() {
        let v0 = BlockVersion::ZERO;
        let v1 = v0.next();
        let v2 = v1.next();

        assert!(v0 < v1);
        assert!(v1 < v2);
        assert_eq!(v2.as_u64(), 2);
    }

    #[test]
    fn timestamp_round_trips_as_decimal_string() {
        let ts = Timestamp::from_nanos(1_700_000_000_123_456_789);
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "\"1700000000123456789\"");

        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ts);
    }

    #[test]
    fn timestamp_rejects_non_numeric_strings() {
        let err = serde_json::from_str::<Timestamp>("\"not-a-number\"");
        assert!(err.is_err());
    }

    #[test]
    fn location_display_uses_node_prefix() {
        assert_eq!(Location::new(17).to_string(), "N17");
    }
}

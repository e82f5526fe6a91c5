//! Core type definitions for kernstore.

use std::fmt;

/// Identifier of a node record.
pub type NodeId = u64;

/// Identifier of a relationship record.
pub type RelationshipId = u64;

/// Identifier of a property record.
pub type PropertyId = u64;

/// Identifier of a relationship type.
pub type RelationshipTypeId = u32;

/// Key of a property.
pub type PropertyKeyId = u32;

/// Unique identifier for a committed transaction.
///
/// Transaction IDs are allocated in strictly increasing order and never
/// reused. [`TransactionId::BASE`] is the id a freshly created store reports
/// as last committed, so the first real transaction is `BASE + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Last committed id of an empty store.
    pub const BASE: Self = Self(1);

    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the following transaction ID.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx:{}", self.0)
    }
}

/// Immutable identity of a store, fixed when the store is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StoreId {
    /// Creation time in milliseconds since the Unix epoch.
    pub creation_time: u64,
    /// Random number chosen at creation.
    pub random_id: u64,
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreId[{}:{:016x}]", self.creation_time, self.random_id)
    }
}

/// Position of an entry in the transaction log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogPosition {
    /// Log file version.
    pub version: u64,
    /// Byte offset inside that file.
    pub offset: u64,
}

impl LogPosition {
    /// Creates a log position.
    #[must_use]
    pub const fn new(version: u64, offset: u64) -> Self {
        Self { version, offset }
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.version, self.offset)
    }
}

/// Direction of a relationship relative to one of its nodes.
///
/// For queries `Both` means "any direction". For a single relationship it
/// marks a loop: both ends are the same node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationshipDirection {
    /// The node is the start node.
    Outgoing,
    /// The node is the end node.
    Incoming,
    /// Either end, or a self-loop.
    Both,
}

impl RelationshipDirection {
    /// Classifies a relationship from the point of view of `node`.
    #[must_use]
    pub fn of(node: NodeId, start: NodeId, end: NodeId) -> Self {
        if start == end {
            Self::Both
        } else if node == start {
            Self::Outgoing
        } else {
            Self::Incoming
        }
    }
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn current_time_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

//! Fixed-size record layouts.
//!
//! Every record starts with a one-byte in-use flag. Pointers to other
//! records are stored as `i64` with `-1` meaning "none".

use crate::error::{CoreError, CoreResult};
use crate::types::{NodeId, PropertyId, PropertyKeyId, RelationshipId, RelationshipTypeId};
use std::fmt;

/// Pointer value meaning "no record".
pub const NO_ID: i64 = -1;

const IN_USE: u8 = 1;
const NOT_IN_USE: u8 = 0;

/// Layout of the records in one store file.
pub trait RecordFormat: Send + Sync + fmt::Debug + 'static {
    /// Decoded record.
    type Record: Clone + fmt::Debug + PartialEq + Send;

    /// Name written in the clean-shutdown trailer of the store file.
    const TYPE_DESCRIPTOR: &'static str;

    /// Bytes per record.
    const RECORD_SIZE: usize;

    /// Decodes the record stored at `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid record.
    fn decode(id: u64, bytes: &[u8]) -> CoreResult<Self::Record>;

    /// Encodes `record` into exactly [`Self::RECORD_SIZE`] bytes.
    fn encode(record: &Self::Record, bytes: &mut [u8]);

    /// Returns whether the record is in use.
    fn in_use(record: &Self::Record) -> bool;

    /// Returns the record id.
    fn id(record: &Self::Record) -> u64;
}

fn decode_in_use(id: u64, byte: u8, descriptor: &str) -> CoreResult<bool> {
    match byte {
        IN_USE => Ok(true),
        NOT_IN_USE => Ok(false),
        other => Err(CoreError::invalid_record(format!(
            "{descriptor} record {id} has in-use byte {other:#04x}"
        ))),
    }
}

fn in_use_byte(in_use: bool) -> u8 {
    if in_use {
        IN_USE
    } else {
        NOT_IN_USE
    }
}

fn i64_at(bytes: &[u8], offset: usize) -> i64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    i64::from_le_bytes(buf)
}

fn u64_at(bytes: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(buf)
}

fn u32_at(bytes: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

/// Converts a stored pointer to an optional id.
#[must_use]
pub fn pointer(raw: i64) -> Option<u64> {
    u64::try_from(raw).ok()
}

/// Converts an optional id to a stored pointer.
#[must_use]
pub fn raw_pointer(id: Option<u64>) -> i64 {
    id.and_then(|id| i64::try_from(id).ok()).unwrap_or(NO_ID)
}

/// A node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRecord {
    /// Node id.
    pub id: NodeId,
    /// Whether the node exists.
    pub in_use: bool,
    /// Head of the node's property chain.
    pub next_prop: Option<PropertyId>,
}

impl NodeRecord {
    /// Creates an in-use node without properties.
    #[must_use]
    pub const fn new(id: NodeId) -> Self {
        Self {
            id,
            in_use: true,
            next_prop: None,
        }
    }
}

/// Format of `neostore.nodestore.db`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeFormat;

impl RecordFormat for NodeFormat {
    type Record = NodeRecord;
    const TYPE_DESCRIPTOR: &'static str = "NodeStore";
    const RECORD_SIZE: usize = 9;

    fn decode(id: u64, bytes: &[u8]) -> CoreResult<NodeRecord> {
        Ok(NodeRecord {
            id,
            in_use: decode_in_use(id, bytes[0], Self::TYPE_DESCRIPTOR)?,
            next_prop: pointer(i64_at(bytes, 1)),
        })
    }

    fn encode(record: &NodeRecord, bytes: &mut [u8]) {
        bytes[0] = in_use_byte(record.in_use);
        bytes[1..9].copy_from_slice(&raw_pointer(record.next_prop).to_le_bytes());
    }

    fn in_use(record: &NodeRecord) -> bool {
        record.in_use
    }

    fn id(record: &NodeRecord) -> u64 {
        record.id
    }
}

/// A relationship between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationshipRecord {
    /// Relationship id.
    pub id: RelationshipId,
    /// Whether the relationship exists.
    pub in_use: bool,
    /// Start node.
    pub start_node: NodeId,
    /// End node.
    pub end_node: NodeId,
    /// Relationship type.
    pub type_id: RelationshipTypeId,
}

impl RelationshipRecord {
    /// Creates an in-use relationship.
    #[must_use]
    pub const fn new(
        id: RelationshipId,
        start_node: NodeId,
        end_node: NodeId,
        type_id: RelationshipTypeId,
    ) -> Self {
        Self {
            id,
            in_use: true,
            start_node,
            end_node,
            type_id,
        }
    }

    /// Returns true if `node` is one of the endpoints.
    #[must_use]
    pub const fn touches(&self, node: NodeId) -> bool {
        self.start_node == node || self.end_node == node
    }
}

/// Format of `neostore.relationshipstore.db`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelationshipFormat;

impl RecordFormat for RelationshipFormat {
    type Record = RelationshipRecord;
    const TYPE_DESCRIPTOR: &'static str = "RelationshipStore";
    const RECORD_SIZE: usize = 21;

    fn decode(id: u64, bytes: &[u8]) -> CoreResult<RelationshipRecord> {
        Ok(RelationshipRecord {
            id,
            in_use: decode_in_use(id, bytes[0], Self::TYPE_DESCRIPTOR)?,
            start_node: u64_at(bytes, 1),
            end_node: u64_at(bytes, 9),
            type_id: u32_at(bytes, 17),
        })
    }

    fn encode(record: &RelationshipRecord, bytes: &mut [u8]) {
        bytes[0] = in_use_byte(record.in_use);
        bytes[1..9].copy_from_slice(&record.start_node.to_le_bytes());
        bytes[9..17].copy_from_slice(&record.end_node.to_le_bytes());
        bytes[17..21].copy_from_slice(&record.type_id.to_le_bytes());
    }

    fn in_use(record: &RelationshipRecord) -> bool {
        record.in_use
    }

    fn id(record: &RelationshipRecord) -> u64 {
        record.id
    }
}

/// One key/value pair in a property chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyRecord {
    /// Property record id.
    pub id: PropertyId,
    /// Whether the record is in use.
    pub in_use: bool,
    /// Property key.
    pub key: PropertyKeyId,
    /// Property value.
    pub value: i64,
    /// Next record in the chain.
    pub next_prop: Option<PropertyId>,
}

/// Format of `neostore.propertystore.db`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PropertyFormat;

impl RecordFormat for PropertyFormat {
    type Record = PropertyRecord;
    const TYPE_DESCRIPTOR: &'static str = "PropertyStore";
    const RECORD_SIZE: usize = 21;

    fn decode(id: u64, bytes: &[u8]) -> CoreResult<PropertyRecord> {
        Ok(PropertyRecord {
            id,
            in_use: decode_in_use(id, bytes[0], Self::TYPE_DESCRIPTOR)?,
            key: u32_at(bytes, 1),
            value: i64_at(bytes, 5),
            next_prop: pointer(i64_at(bytes, 13)),
        })
    }

    fn encode(record: &PropertyRecord, bytes: &mut [u8]) {
        bytes[0] = in_use_byte(record.in_use);
        bytes[1..5].copy_from_slice(&record.key.to_le_bytes());
        bytes[5..13].copy_from_slice(&record.value.to_le_bytes());
        bytes[13..21].copy_from_slice(&raw_pointer(record.next_prop).to_le_bytes());
    }

    fn in_use(record: &PropertyRecord) -> bool {
        record.in_use
    }

    fn id(record: &PropertyRecord) -> u64 {
        record.id
    }
}

/// One meta-data field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaRecord {
    /// Field position.
    pub id: u64,
    /// Whether the field has been written.
    pub in_use: bool,
    /// Field value.
    pub value: i64,
}

/// Format of `neostore`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetaDataFormat;

impl RecordFormat for MetaDataFormat {
    type Record = MetaRecord;
    const TYPE_DESCRIPTOR: &'static str = "NeoStore";
    const RECORD_SIZE: usize = 9;

    fn decode(id: u64, bytes: &[u8]) -> CoreResult<MetaRecord> {
        Ok(MetaRecord {
            id,
            in_use: decode_in_use(id, bytes[0], Self::TYPE_DESCRIPTOR)?,
            value: i64_at(bytes, 1),
        })
    }

    fn encode(record: &MetaRecord, bytes: &mut [u8]) {
        bytes[0] = in_use_byte(record.in_use);
        bytes[1..9].copy_from_slice(&record.value.to_le_bytes());
    }

    fn in_use(record: &MetaRecord) -> bool {
        record.in_use
    }

    fn id(record: &MetaRecord) -> u64 {
        record.id
    }
}

//! Store commands and the transaction representation carried by the log.

use crate::error::{CoreError, CoreResult};
use crate::store::{
    NodeFormat, NodeRecord, PropertyFormat, PropertyRecord, RecordFormat, RelationshipFormat,
    RelationshipRecord,
};
use crate::types::TransactionId;

/// Tag byte of each command variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum CommandType {
    Node = 1,
    Relationship = 2,
    Property = 3,
    GraphNextProperty = 4,
    ConstraintIntroduced = 5,
}

impl CommandType {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Node),
            2 => Some(Self::Relationship),
            3 => Some(Self::Property),
            4 => Some(Self::GraphNextProperty),
            5 => Some(Self::ConstraintIntroduced),
            _ => None,
        }
    }
}

/// One store mutation.
///
/// Record commands carry the full after-image, so applying a command twice
/// leaves the same bytes as applying it once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Write a node record.
    Node(NodeRecord),
    /// Write a relationship record.
    Relationship(RelationshipRecord),
    /// Write a property record.
    Property(PropertyRecord),
    /// Set the head of the graph property chain.
    GraphNextProperty(Option<u64>),
    /// Record the applying transaction as the latest to introduce a constraint.
    ConstraintIntroduced,
}

fn encode_record<F: RecordFormat>(record: &F::Record, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&F::id(record).to_le_bytes());
    let start = buf.len();
    buf.resize(start + F::RECORD_SIZE, 0);
    F::encode(record, &mut buf[start..]);
}

fn decode_record<F: RecordFormat>(body: &[u8]) -> CoreResult<F::Record> {
    if body.len() != 8 + F::RECORD_SIZE {
        return Err(CoreError::log_corruption(format!(
            "{} command of {} bytes, expected {}",
            F::TYPE_DESCRIPTOR,
            body.len(),
            8 + F::RECORD_SIZE
        )));
    }
    let mut id = [0u8; 8];
    id.copy_from_slice(&body[..8]);
    F::decode(u64::from_le_bytes(id), &body[8..])
}

impl Command {
    /// Serializes the command.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32);
        match self {
            Self::Node(record) => {
                buf.push(CommandType::Node as u8);
                encode_record::<NodeFormat>(record, &mut buf);
            }
            Self::Relationship(record) => {
                buf.push(CommandType::Relationship as u8);
                encode_record::<RelationshipFormat>(record, &mut buf);
            }
            Self::Property(record) => {
                buf.push(CommandType::Property as u8);
                encode_record::<PropertyFormat>(record, &mut buf);
            }
            Self::GraphNextProperty(prop) => {
                buf.push(CommandType::GraphNextProperty as u8);
                buf.extend_from_slice(&crate::store::format::raw_pointer(*prop).to_le_bytes());
            }
            Self::ConstraintIntroduced => buf.push(CommandType::ConstraintIntroduced as u8),
        }
        buf
    }

    /// Deserializes a command.
    ///
    /// # Errors
    ///
    /// Returns a log corruption error for unknown tags or bad lengths.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        let (&tag, body) = bytes
            .split_first()
            .ok_or_else(|| CoreError::log_corruption("empty command"))?;
        let kind = CommandType::from_byte(tag)
            .ok_or_else(|| CoreError::log_corruption(format!("unknown command type {tag}")))?;
        match kind {
            CommandType::Node => Ok(Self::Node(decode_record::<NodeFormat>(body)?)),
            CommandType::Relationship => {
                Ok(Self::Relationship(decode_record::<RelationshipFormat>(body)?))
            }
            CommandType::Property => Ok(Self::Property(decode_record::<PropertyFormat>(body)?)),
            CommandType::GraphNextProperty => {
                let raw: [u8; 8] = body.try_into().map_err(|_| {
                    CoreError::log_corruption("graph property command must be 8 bytes")
                })?;
                Ok(Self::GraphNextProperty(crate::store::format::pointer(
                    i64::from_le_bytes(raw),
                )))
            }
            CommandType::ConstraintIntroduced => {
                if !body.is_empty() {
                    return Err(CoreError::log_corruption(
                        "constraint command carries no payload",
                    ));
                }
                Ok(Self::ConstraintIntroduced)
            }
        }
    }
}

/// Everything the log records about one transaction besides its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRepresentation {
    /// Store mutations in application order.
    pub commands: Vec<Command>,
    /// Instance that was master when the transaction started.
    pub master_id: i32,
    /// Instance that ran the transaction.
    pub local_id: i32,
    /// Globally unique transaction identifier.
    pub global_id: [u8; 16],
    /// Start time in milliseconds since the epoch.
    pub time_started: u64,
    /// Last committed transaction when this one started.
    pub last_committed_tx_when_started: TransactionId,
    /// Opaque bytes for the replication layer.
    pub additional_header: Vec<u8>,
}

impl TransactionRepresentation {
    /// Creates a representation with a fresh global id.
    #[must_use]
    pub fn new(commands: Vec<Command>, last_committed_tx_when_started: TransactionId) -> Self {
        Self {
            commands,
            master_id: -1,
            local_id: -1,
            global_id: *uuid::Uuid::new_v4().as_bytes(),
            time_started: crate::types::current_time_millis(),
            last_committed_tx_when_started,
            additional_header: Vec::new(),
        }
    }

    /// Sets the master and local ids.
    #[must_use]
    pub const fn with_instance_ids(mut self, master_id: i32, local_id: i32) -> Self {
        self.master_id = master_id;
        self.local_id = local_id;
        self
    }

    /// Returns true if the transaction has no commands.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_decode_to_themselves() {
        let commands = [
            Command::Node(NodeRecord::new(5)),
            Command::Relationship(RelationshipRecord::new(1, 2, 3, 4)),
            Command::Property(PropertyRecord {
                id: 9,
                in_use: true,
                key: 1,
                value: -42,
                next_prop: None,
            }),
            Command::GraphNextProperty(Some(9)),
            Command::GraphNextProperty(None),
            Command::ConstraintIntroduced,
        ];
        for command in commands {
            assert_eq!(Command::decode(&command.encode()).unwrap(), command);
        }
    }

    #[test]
    fn truncated_command_is_corruption() {
        let mut bytes = Command::Node(NodeRecord::new(1)).encode();
        bytes.pop();
        assert!(matches!(
            Command::decode(&bytes),
            Err(CoreError::LogCorruption { .. })
        ));
        assert!(Command::decode(&[]).is_err());
        assert!(Command::decode(&[99]).is_err());
    }

    #[test]
    fn representation_gets_unique_global_ids() {
        let a = TransactionRepresentation::new(Vec::new(), TransactionId::BASE);
        let b = TransactionRepresentation::new(Vec::new(), TransactionId::BASE);
        assert_ne!(a.global_id, b.global_id);
        assert!(a.is_empty());
        assert_eq!(a.with_instance_ids(1, 2).master_id, 1);
    }
}

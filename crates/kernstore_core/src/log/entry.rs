//! Log entries and their framing.

use crate::command::Command;
use crate::error::{CoreError, CoreResult};
use crate::types::{LogPosition, TransactionId};
use sha2::{Digest, Sha256};

/// Frame header size: type (1) + length (4).
pub(crate) const FRAME_HEADER_SIZE: usize = 5;

/// Frame trailer size: crc32 (4).
pub(crate) const FRAME_CRC_SIZE: usize = 4;

/// Type of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogEntryType {
    /// A transaction begins.
    Start = 1,
    /// One store command.
    Command = 2,
    /// The transaction committed.
    OnePhaseCommit = 3,
    /// The transaction was abandoned.
    Rollback = 4,
}

impl LogEntryType {
    /// Converts a byte to an entry type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Start),
            2 => Some(Self::Command),
            3 => Some(Self::OnePhaseCommit),
            4 => Some(Self::Rollback),
            _ => None,
        }
    }

    /// Converts the entry type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Opens a transaction in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartEntry {
    /// Master instance id.
    pub master_id: i32,
    /// Local instance id.
    pub local_id: i32,
    /// Globally unique transaction identifier.
    pub global_id: [u8; 16],
    /// Time the transaction started.
    pub time_written: u64,
    /// Last committed transaction when this one started.
    pub last_committed_tx_when_started: TransactionId,
    /// Opaque replication header.
    pub additional_header: Vec<u8>,
    /// Where this entry was written.
    pub start_position: LogPosition,
}

impl StartEntry {
    /// Returns the checksum identifying this transaction across instances.
    #[must_use]
    pub fn checksum(&self) -> u64 {
        start_checksum(self.master_id, self.local_id, &self.global_id)
    }
}

/// Checksum over the master id, local id and both halves of the global id.
///
/// Equal inputs always give equal checksums, on any instance.
#[must_use]
pub fn start_checksum(master_id: i32, local_id: i32, global_id: &[u8; 16]) -> u64 {
    let (high, low) = uuid::Uuid::from_bytes(*global_id).as_u64_pair();
    let mut hasher = Sha256::new();
    hasher.update(master_id.to_le_bytes());
    hasher.update(local_id.to_le_bytes());
    hasher.update(low.to_le_bytes());
    hasher.update(high.to_le_bytes());
    let digest = hasher.finalize();
    let mut first = [0u8; 8];
    first.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(first)
}

/// Closes a transaction as committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitEntry {
    /// Assigned transaction id.
    pub tx_id: TransactionId,
    /// Time of the commit.
    pub time_written: u64,
}

/// One entry in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    /// Transaction start.
    Start(StartEntry),
    /// Store command.
    Command(Command),
    /// Commit of the current transaction.
    OnePhaseCommit(CommitEntry),
    /// Rollback of the current transaction.
    Rollback {
        /// Global id of the abandoned transaction.
        global_id: [u8; 16],
    },
}

struct PayloadReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    fn take(&mut self, len: usize) -> CoreResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| CoreError::log_corruption("log entry payload too short"))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> CoreResult<[u8; N]> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    fn u32(&mut self) -> CoreResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn i32(&mut self) -> CoreResult<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> CoreResult<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn finish(self) -> CoreResult<()> {
        if self.pos != self.bytes.len() {
            return Err(CoreError::log_corruption(format!(
                "{} trailing bytes in log entry",
                self.bytes.len() - self.pos
            )));
        }
        Ok(())
    }
}

impl LogEntry {
    /// Returns the entry type.
    #[must_use]
    pub fn entry_type(&self) -> LogEntryType {
        match self {
            Self::Start(_) => LogEntryType::Start,
            Self::Command(_) => LogEntryType::Command,
            Self::OnePhaseCommit(_) => LogEntryType::OnePhaseCommit,
            Self::Rollback { .. } => LogEntryType::Rollback,
        }
    }

    /// Returns true for entries that end a transaction.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::OnePhaseCommit(_) | Self::Rollback { .. })
    }

    /// Serializes the payload, without framing.
    ///
    /// # Errors
    ///
    /// Returns an error if the additional header is too large.
    pub fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            Self::Start(start) => {
                buf.extend_from_slice(&start.master_id.to_le_bytes());
                buf.extend_from_slice(&start.local_id.to_le_bytes());
                buf.extend_from_slice(&start.global_id);
                buf.extend_from_slice(&start.time_written.to_le_bytes());
                buf.extend_from_slice(&start.last_committed_tx_when_started.as_u64().to_le_bytes());
                buf.extend_from_slice(&start.start_position.version.to_le_bytes());
                buf.extend_from_slice(&start.start_position.offset.to_le_bytes());
                let len = u32::try_from(start.additional_header.len())
                    .map_err(|_| CoreError::invalid_argument("additional header too large"))?;
                buf.extend_from_slice(&len.to_le_bytes());
                buf.extend_from_slice(&start.additional_header);
            }
            Self::Command(command) => buf = command.encode(),
            Self::OnePhaseCommit(commit) => {
                buf.extend_from_slice(&commit.tx_id.as_u64().to_le_bytes());
                buf.extend_from_slice(&commit.time_written.to_le_bytes());
            }
            Self::Rollback { global_id } => buf.extend_from_slice(global_id),
        }
        Ok(buf)
    }

    /// Deserializes a payload of the given type.
    ///
    /// # Errors
    ///
    /// Returns a log corruption error if the payload is malformed.
    pub fn decode_payload(entry_type: LogEntryType, payload: &[u8]) -> CoreResult<Self> {
        let mut reader = PayloadReader {
            bytes: payload,
            pos: 0,
        };
        let entry = match entry_type {
            LogEntryType::Command => return Ok(Self::Command(Command::decode(payload)?)),
            LogEntryType::Start => {
                let master_id = reader.i32()?;
                let local_id = reader.i32()?;
                let global_id = reader.array()?;
                let time_written = reader.u64()?;
                let last_committed = TransactionId::new(reader.u64()?);
                let start_position = LogPosition::new(reader.u64()?, reader.u64()?);
                let len = reader.u32()? as usize;
                let additional_header = reader.take(len)?.to_vec();
                Self::Start(StartEntry {
                    master_id,
                    local_id,
                    global_id,
                    time_written,
                    last_committed_tx_when_started: last_committed,
                    additional_header,
                    start_position,
                })
            }
            LogEntryType::OnePhaseCommit => Self::OnePhaseCommit(CommitEntry {
                tx_id: TransactionId::new(reader.u64()?),
                time_written: reader.u64()?,
            }),
            LogEntryType::Rollback => Self::Rollback {
                global_id: reader.array()?,
            },
        };
        reader.finish()?;
        Ok(entry)
    }

    /// Serializes the entry with its frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded.
    pub fn encode_frame(&self) -> CoreResult<Vec<u8>> {
        frame(self.entry_type(), &self.encode_payload()?)
    }
}

/// Wraps an encoded payload in a frame.
pub(crate) fn frame(entry_type: LogEntryType, payload: &[u8]) -> CoreResult<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .map_err(|_| CoreError::invalid_operation("log entry payload too large"))?;
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len() + FRAME_CRC_SIZE);
    frame.push(entry_type.as_byte());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(payload);
    let crc = compute_crc32(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

/// Computes a CRC32 checksum (IEEE polynomial).
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut bit = 0;
            while bit < 8 {
                crc = if crc & 1 == 0 {
                    crc >> 1
                } else {
                    (crc >> 1) ^ 0xEDB8_8320
                };
                bit += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    !data.iter().fold(u32::MAX, |crc, &byte| {
        (crc >> 8) ^ CRC32_TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize]
    })
}

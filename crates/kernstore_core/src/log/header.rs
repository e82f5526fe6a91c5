//! Log file header.

use crate::error::{CoreError, CoreResult};
use crate::types::{StoreId, TransactionId};

/// Magic bytes opening every log file.
pub const LOG_MAGIC: [u8; 4] = *b"KLOG";

/// Current log format version.
pub const LOG_FORMAT_VERSION: u16 = 1;

/// Encoded header size.
/// magic (4) + format (2) + log version (8) + store id (16) + last tx (8)
pub const LOG_HEADER_SIZE: usize = 38;

/// Header at the start of each log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogHeader {
    /// Log format version.
    pub format_version: u16,
    /// Version of this file.
    pub log_version: u64,
    /// Store that owns the log.
    pub store_id: StoreId,
    /// Last transaction committed before this file was started.
    pub last_committed_tx: TransactionId,
}

impl LogHeader {
    /// Creates a header in the current format.
    #[must_use]
    pub const fn new(log_version: u64, store_id: StoreId, last_committed_tx: TransactionId) -> Self {
        Self {
            format_version: LOG_FORMAT_VERSION,
            log_version,
            store_id,
            last_committed_tx,
        }
    }

    /// Serializes the header.
    #[must_use]
    pub fn encode(&self) -> [u8; LOG_HEADER_SIZE] {
        let mut buf = [0u8; LOG_HEADER_SIZE];
        buf[0..4].copy_from_slice(&LOG_MAGIC);
        buf[4..6].copy_from_slice(&self.format_version.to_le_bytes());
        buf[6..14].copy_from_slice(&self.log_version.to_le_bytes());
        buf[14..22].copy_from_slice(&self.store_id.creation_time.to_le_bytes());
        buf[22..30].copy_from_slice(&self.store_id.random_id.to_le_bytes());
        buf[30..38].copy_from_slice(&self.last_committed_tx.as_u64().to_le_bytes());
        buf
    }

    /// Deserializes a header.
    ///
    /// # Errors
    ///
    /// Returns a log corruption error for short input, bad magic or a
    /// future format version.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() < LOG_HEADER_SIZE {
            return Err(CoreError::log_corruption(format!(
                "log header of {} bytes, expected {LOG_HEADER_SIZE}",
                bytes.len()
            )));
        }
        if bytes[0..4] != LOG_MAGIC {
            return Err(CoreError::log_corruption("invalid log file magic"));
        }
        let format_version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if format_version > LOG_FORMAT_VERSION {
            return Err(CoreError::log_corruption(format!(
                "unsupported log format version {format_version}"
            )));
        }
        let u64_at = |offset: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[offset..offset + 8]);
            u64::from_le_bytes(buf)
        };
        Ok(Self {
            format_version,
            log_version: u64_at(6),
            store_id: StoreId {
                creation_time: u64_at(14),
                random_id: u64_at(22),
            },
            last_committed_tx: TransactionId::new(u64_at(30)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> LogHeader {
        LogHeader::new(
            3,
            StoreId {
                creation_time: 100,
                random_id: 7,
            },
            TransactionId::new(42),
        )
    }

    #[test]
    fn header_decodes_to_itself() {
        let bytes = header().encode();
        assert_eq!(&bytes[..4], b"KLOG");
        assert_eq!(LogHeader::decode(&bytes).unwrap(), header());
    }

    #[test]
    fn bad_magic_and_future_format_are_rejected() {
        let mut bytes = header().encode();
        bytes[0] = b'X';
        assert!(LogHeader::decode(&bytes).is_err());

        let mut bytes = header().encode();
        bytes[4..6].copy_from_slice(&(LOG_FORMAT_VERSION + 1).to_le_bytes());
        assert!(matches!(
            LogHeader::decode(&bytes),
            Err(CoreError::LogCorruption { .. })
        ));

        assert!(LogHeader::decode(&bytes[..10]).is_err());
    }
}

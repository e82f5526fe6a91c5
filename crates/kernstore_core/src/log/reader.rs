//! Streaming log entry reader.

use super::channel::{
    LogVersionBridge, NoMoreChannels, PhysicalLogChannel, ReadAheadLogChannel,
    ReaderLogVersionBridge,
};
use super::entry::{compute_crc32, LogEntry, LogEntryType, FRAME_CRC_SIZE, FRAME_HEADER_SIZE};
use super::files::LogFiles;
use crate::error::{CoreError, CoreResult};
use crate::types::LogPosition;
use kernstore_storage::FileSystem;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Reads framed entries in order, crossing file boundaries through the
/// channel's bridge.
///
/// Yields `(position, entry)` pairs where `position` is the offset of the
/// entry's frame. Truncated frames, zero padding and a torn last frame end
/// the stream cleanly in the newest file only. In an older file they mean
/// a later file follows a damaged one, which is an error like any other
/// corruption.
#[derive(Debug)]
pub struct LogEntryReader<B> {
    channel: ReadAheadLogChannel<B>,
    finished: bool,
}

impl<B: LogVersionBridge> LogEntryReader<B> {
    /// Creates a reader over `channel`.
    pub const fn new(channel: ReadAheadLogChannel<B>) -> Self {
        Self {
            channel,
            finished: false,
        }
    }

    /// Returns the position right after the last entry read.
    #[must_use]
    pub fn position(&self) -> LogPosition {
        self.channel.position()
    }

    /// Returns the underlying channel.
    #[must_use]
    pub const fn channel(&self) -> &ReadAheadLogChannel<B> {
        &self.channel
    }

    /// Reads the next entry.
    ///
    /// Returns `Ok(None)` at the end of the log.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ChecksumMismatch`] for a CRC failure that is not
    /// a torn tail, and a log corruption error for unknown entry types,
    /// malformed payloads, or an incomplete file that is not the newest.
    pub fn read_entry(&mut self) -> CoreResult<Option<(LogPosition, LogEntry)>> {
        if self.finished {
            return Ok(None);
        }
        let result = self.read_next();
        if !matches!(result, Ok(Some(_))) {
            self.finished = true;
        }
        result
    }

    fn read_next(&mut self) -> CoreResult<Option<(LogPosition, LogEntry)>> {
        loop {
            if self.channel.at_end_of_file() {
                if self.channel.next_file()? {
                    continue;
                }
                return Ok(None);
            }

            let position = self.channel.position();
            let Some(head) = self.channel.peek(FRAME_HEADER_SIZE)? else {
                return self.end_of_log(position, "truncated log entry header");
            };
            let type_byte = head[0];
            let len = u32::from_le_bytes([head[1], head[2], head[3], head[4]]) as usize;

            if type_byte == 0 {
                return self.end_of_log(position, "zero padding");
            }
            let entry_type = LogEntryType::from_byte(type_byte).ok_or_else(|| {
                CoreError::log_corruption(format!(
                    "unknown log entry type {type_byte} at {position}"
                ))
            })?;

            let total = FRAME_HEADER_SIZE + len + FRAME_CRC_SIZE;
            if (total as u64) > self.channel.remaining_in_file() {
                return self.end_of_log(position, "truncated log entry");
            }
            let is_last_frame = total as u64 == self.channel.remaining_in_file();
            let has_next_file = self.channel.has_next_file();

            let Some(frame) = self.channel.peek(total)? else {
                return self.end_of_log(position, "truncated log entry");
            };
            let body = &frame[..FRAME_HEADER_SIZE + len];
            let stored = u32::from_le_bytes([
                frame[total - 4],
                frame[total - 3],
                frame[total - 2],
                frame[total - 1],
            ]);
            let computed = compute_crc32(body);
            if stored != computed {
                if is_last_frame && !has_next_file {
                    warn!(%position, "torn final log entry, treating as end of log");
                    return Ok(None);
                }
                return Err(CoreError::ChecksumMismatch {
                    expected: stored,
                    actual: computed,
                });
            }
            let entry = LogEntry::decode_payload(entry_type, &body[FRAME_HEADER_SIZE..])?;
            self.channel.consume(total);
            return Ok(Some((position, entry)));
        }
    }
}

impl<B: LogVersionBridge> LogEntryReader<B> {
    fn end_of_log(
        &self,
        position: LogPosition,
        what: &str,
    ) -> CoreResult<Option<(LogPosition, LogEntry)>> {
        if self.channel.has_next_file() {
            return Err(CoreError::log_corruption(format!(
                "{what} at {position} is followed by log version {}",
                position.version + 1
            )));
        }
        warn!(%position, what, "incomplete log tail, treating as end of log");
        Ok(None)
    }
}

impl<B: LogVersionBridge> Iterator for LogEntryReader<B> {
    type Item = CoreResult<(LogPosition, LogEntry)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_entry().transpose()
    }
}

impl LogEntryReader<ReaderLogVersionBridge> {
    /// Opens a reader from `version` through every following file.
    ///
    /// # Errors
    ///
    /// Returns an error if the first file cannot be opened.
    pub fn open(log_files: &LogFiles, version: u64, read_ahead: usize) -> CoreResult<Self> {
        let channel = PhysicalLogChannel::open(log_files, version)?;
        Ok(Self::new(ReadAheadLogChannel::new(
            channel,
            ReaderLogVersionBridge::new(log_files.clone()),
            read_ahead,
        )))
    }
}

impl LogEntryReader<NoMoreChannels> {
    /// Opens a reader over the single file of `version`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open_single(log_files: &LogFiles, version: u64, read_ahead: usize) -> CoreResult<Self> {
        let channel = PhysicalLogChannel::open(log_files, version)?;
        Ok(Self::new(ReadAheadLogChannel::new(
            channel,
            NoMoreChannels,
            read_ahead,
        )))
    }
}

/// Reads every entry of one log file.
///
/// # Errors
///
/// Returns an error if the path is not a log file or the file is corrupt.
pub fn log_entries(
    fs: Arc<dyn FileSystem>,
    path: &Path,
) -> CoreResult<Vec<(LogPosition, LogEntry)>> {
    let version = LogFiles::version_of(path).ok_or_else(|| {
        CoreError::invalid_argument(format!("{} is not a log file", path.display()))
    })?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let log_files = LogFiles::new(fs, dir);
    LogEntryReader::open_single(&log_files, version, 64 * 1024)?.collect()
}

/// Returns the offset just past the last terminal entry of one file, or the
/// end of the header if there is none.
///
/// Anything after this offset is an unfinished transaction or a torn tail.
///
/// # Errors
///
/// Returns an error if the file is corrupt.
pub(crate) fn end_of_last_terminal_entry(
    log_files: &LogFiles,
    version: u64,
    read_ahead: usize,
) -> CoreResult<u64> {
    let mut reader = LogEntryReader::open_single(log_files, version, read_ahead)?;
    let mut end = reader.position().offset;
    while let Some((_, entry)) = reader.read_entry()? {
        if entry.is_terminal() {
            end = reader.position().offset;
        }
    }
    Ok(end)
}

//! Read channels over log files.
//!
//! A [`PhysicalLogChannel`] reads one file. A [`ReadAheadLogChannel`]
//! buffers reads over it and, when the file is exhausted, asks a
//! [`LogVersionBridge`] for the channel of the next version.

use super::files::LogFiles;
use super::header::{LogHeader, LOG_HEADER_SIZE};
use crate::error::{CoreError, CoreResult};
use crate::types::LogPosition;
use kernstore_storage::StorageBackend;
use std::fmt;
use tracing::trace;

/// Reads one log file from just after its header.
pub struct PhysicalLogChannel {
    backend: Box<dyn StorageBackend>,
    header: LogHeader,
    position: u64,
    size: u64,
}

impl PhysicalLogChannel {
    /// Opens the file of `version` and validates its header.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, shorter than a header, or
    /// its header is invalid or names another version.
    pub fn open(log_files: &LogFiles, version: u64) -> CoreResult<Self> {
        let path = log_files.version_file(version);
        if !log_files.file_system().exists(&path) {
            return Err(CoreError::log_corruption(format!(
                "missing log file {}",
                path.display()
            )));
        }
        let backend = log_files.file_system().open(&path)?;
        let size = backend.size()?;
        if size < LOG_HEADER_SIZE as u64 {
            return Err(CoreError::log_corruption(format!(
                "log file {} too short for a header",
                path.display()
            )));
        }
        let header = LogHeader::decode(&backend.read_at(0, LOG_HEADER_SIZE)?)?;
        if header.log_version != version {
            return Err(CoreError::log_corruption(format!(
                "log file {} claims version {}",
                path.display(),
                header.log_version
            )));
        }
        Ok(Self {
            backend,
            header,
            position: LOG_HEADER_SIZE as u64,
            size,
        })
    }

    /// Returns the header of the file.
    #[must_use]
    pub const fn header(&self) -> &LogHeader {
        &self.header
    }

    /// Returns the log version of the file.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.header.log_version
    }

    /// Returns the next read offset.
    #[must_use]
    pub const fn position(&self) -> u64 {
        self.position
    }

    /// Returns the bytes left to read.
    #[must_use]
    pub const fn remaining(&self) -> u64 {
        self.size.saturating_sub(self.position)
    }

    /// Reads up to `max` bytes and appends them to `buf`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn read_into(&mut self, buf: &mut Vec<u8>, max: usize) -> CoreResult<usize> {
        let len = usize::try_from(self.remaining()).unwrap_or(usize::MAX).min(max);
        if len == 0 {
            return Ok(0);
        }
        let data = self.backend.read_at(self.position, len)?;
        self.position += data.len() as u64;
        buf.extend_from_slice(&data);
        Ok(data.len())
    }
}

impl fmt::Debug for PhysicalLogChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicalLogChannel")
            .field("version", &self.version())
            .field("position", &self.position)
            .field("size", &self.size)
            .finish()
    }
}

/// Moves a reader from one log file to the next.
pub trait LogVersionBridge {
    /// Returns the channel following `current_version`, if there is one.
    ///
    /// # Errors
    ///
    /// Returns an error if the next file exists but cannot be opened.
    fn next(&self, current_version: u64) -> CoreResult<Option<PhysicalLogChannel>>;

    /// Returns true if a file follows `current_version`.
    fn has_next(&self, current_version: u64) -> bool;
}

/// Bridge that never leaves the current file.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMoreChannels;

impl LogVersionBridge for NoMoreChannels {
    fn next(&self, _current_version: u64) -> CoreResult<Option<PhysicalLogChannel>> {
        Ok(None)
    }

    fn has_next(&self, _current_version: u64) -> bool {
        false
    }
}

/// Bridge that continues with the next version while its file exists.
#[derive(Debug, Clone)]
pub struct ReaderLogVersionBridge {
    log_files: LogFiles,
}

impl ReaderLogVersionBridge {
    /// Creates a bridge over `log_files`.
    #[must_use]
    pub const fn new(log_files: LogFiles) -> Self {
        Self { log_files }
    }
}

impl LogVersionBridge for ReaderLogVersionBridge {
    fn next(&self, current_version: u64) -> CoreResult<Option<PhysicalLogChannel>> {
        let next = current_version + 1;
        if !self.log_files.exists(next) {
            return Ok(None);
        }
        trace!(version = next, "bridging to next log file");
        PhysicalLogChannel::open(&self.log_files, next).map(Some)
    }

    fn has_next(&self, current_version: u64) -> bool {
        self.log_files.exists(current_version + 1)
    }
}

/// Buffered reader over a chain of log files.
///
/// Reads never straddle files: [`peek`](Self::peek) only returns bytes of
/// the current file, and [`next_file`](Self::next_file) moves on once the
/// current one is consumed.
#[derive(Debug)]
pub struct ReadAheadLogChannel<B> {
    channel: PhysicalLogChannel,
    bridge: B,
    buffer: Vec<u8>,
    pos: usize,
    read_ahead: usize,
}

impl<B: LogVersionBridge> ReadAheadLogChannel<B> {
    /// Wraps `channel` with a read-ahead buffer of `read_ahead` bytes.
    pub fn new(channel: PhysicalLogChannel, bridge: B, read_ahead: usize) -> Self {
        Self {
            channel,
            bridge,
            buffer: Vec::with_capacity(read_ahead),
            pos: 0,
            read_ahead: read_ahead.max(1),
        }
    }

    fn buffered(&self) -> usize {
        self.buffer.len() - self.pos
    }

    /// Returns the next `n` bytes of the current file without consuming
    /// them, or `None` if the file holds fewer.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails.
    pub fn peek(&mut self, n: usize) -> CoreResult<Option<&[u8]>> {
        if self.buffered() < n {
            if (self.buffered() as u64).saturating_add(self.channel.remaining()) < n as u64 {
                return Ok(None);
            }
            self.buffer.drain(..self.pos);
            self.pos = 0;
            let wanted = (n - self.buffer.len()).max(self.read_ahead);
            while self.buffer.len() < n {
                if self.channel.read_into(&mut self.buffer, wanted)? == 0 {
                    return Ok(None);
                }
            }
        }
        Ok(Some(&self.buffer[self.pos..self.pos + n]))
    }

    /// Consumes `n` previously peeked bytes.
    pub fn consume(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.buffer.len());
    }

    /// Returns the position of the next unconsumed byte.
    #[must_use]
    pub fn position(&self) -> LogPosition {
        LogPosition::new(
            self.channel.version(),
            self.channel.position() - self.buffered() as u64,
        )
    }

    /// Returns the bytes of the current file not yet consumed.
    #[must_use]
    pub fn remaining_in_file(&self) -> u64 {
        self.buffered() as u64 + self.channel.remaining()
    }

    /// Returns true once the current file is fully consumed.
    #[must_use]
    pub fn at_end_of_file(&self) -> bool {
        self.remaining_in_file() == 0
    }

    /// Returns true if the bridge has a file after the current one.
    #[must_use]
    pub fn has_next_file(&self) -> bool {
        self.bridge.has_next(self.channel.version())
    }

    /// Moves to the next file. Returns false if there is none.
    ///
    /// Unconsumed bytes of the current file are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the next file cannot be opened.
    pub fn next_file(&mut self) -> CoreResult<bool> {
        match self.bridge.next(self.channel.version())? {
            Some(next) => {
                self.channel = next;
                self.buffer.clear();
                self.pos = 0;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Returns the header of the current file.
    #[must_use]
    pub const fn header(&self) -> &LogHeader {
        self.channel.header()
    }
}

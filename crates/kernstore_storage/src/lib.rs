//! # kernstore storage
//!
//! Byte stores and the file-system abstraction underneath the kernstore
//! graph storage core.
//!
//! Backends are **opaque byte stores** - they do not interpret the data they
//! hold. Record layouts, log framing and page management all live in
//! `kernstore_core`.
//!
//! ## Design Principles
//!
//! - Backends are simple byte stores (read, positional write, append, flush)
//! - File systems are passed explicitly; there is no process-wide singleton
//! - Everything is `Send + Sync` for concurrent access
//!
//! ## Available Implementations
//!
//! - [`InMemoryBackend`] - shared in-memory buffer
//! - [`FileBackend`] - persistent storage using OS file APIs
//! - [`DefaultFileSystem`] - opens [`FileBackend`]s on disk
//! - [`EphemeralFileSystem`] - in-memory file system with crash snapshots
//!
//! ## Example
//!
//! ```rust
//! use kernstore_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod fs;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use fs::{DefaultFileSystem, EphemeralFileSystem, FileSystem, StoreLock};
pub use memory::InMemoryBackend;

//! # kernstore core
//!
//! Transactional storage core of an embedded graph database kernel.
//!
//! This crate provides:
//! - A page cache with optimistic, retrying page cursors
//! - Fixed-size record stores for nodes, relationships, properties and
//!   whole-graph meta-data
//! - A versioned, rotating transaction log
//! - Crash recovery by log replay, and rebuilding a store from logs alone
//! - Kernel transactions that see their own uncommitted writes
//! - Legacy index configuration with create-once semantics
//!
//! ## Commit order
//!
//! A transaction's changes become commands, the commands are appended to
//! the log, and only then applied to the record stores. Recovery replays
//! the same commands, so applying is idempotent.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod apply;
pub mod command;
pub mod config;
pub mod consistency;
mod database;
mod error;
pub mod index;
pub mod log;
pub mod page;
pub mod rebuild;
pub mod recovery;
pub mod store;
pub mod transaction;
pub mod types;

pub use apply::{StoreApplier, TransactionApplier};
pub use command::{Command, TransactionRepresentation};
pub use config::Config;
pub use consistency::{ConsistencyChecker, ConsistencyReport, Inconsistency};
pub use database::Database;
pub use error::{CoreError, CoreResult};
pub use index::{IndexConfig, IndexEntityType, LegacyIndexStore};
pub use rebuild::{rebuild_from_logs, RebuildArgs, RebuildReport};
pub use recovery::{find_last_transaction_id, Recovery, RecoveryReport};
pub use store::{MetaDataStore, NeoStores, Position};
pub use transaction::{KernelTransaction, RelationshipChangesForNode};
pub use types::{
    LogPosition, NodeId, PropertyId, PropertyKeyId, RelationshipDirection, RelationshipId,
    RelationshipTypeId, StoreId, TransactionId,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

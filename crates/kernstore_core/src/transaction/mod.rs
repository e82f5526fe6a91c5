//! Kernel transactions.
//!
//! A [`KernelTransaction`] collects its writes in a [`TxState`]. Reads
//! through the transaction combine the committed stores with that state;
//! for relationships this goes through per-node
//! [`RelationshipChangesForNode`] overlays. On commit the state is turned
//! into commands, written to the log and applied to the stores by the
//! [`CommitProcess`], in that order.

mod commit;
mod kernel;
mod prepare;
mod relationship_changes;
mod state;

pub use commit::CommitProcess;
pub use kernel::KernelTransaction;
pub use prepare::prepare;
pub use relationship_changes::{DiffStrategy, RelationshipChangesForNode};
pub use state::{PropertyChanges, TransactionState, TxState};

//! Applying transactions to the record stores.

use crate::command::{Command, TransactionRepresentation};
use crate::error::CoreResult;
use crate::store::NeoStores;
use crate::types::TransactionId;
use tracing::debug;

/// Applies already-durable transactions.
///
/// The same applier serves normal commits, recovery, replica catch-up and
/// rebuilds.
pub trait TransactionApplier {
    /// Applies the commands of `tx`, committed as `tx_id`.
    ///
    /// `recovered` is true when replaying from the log at startup. Id
    /// generators are rebuilt after recovery, so freed ids are not handed
    /// back in that mode.
    ///
    /// # Errors
    ///
    /// Returns an error if a record cannot be written.
    fn apply(
        &self,
        tx: &TransactionRepresentation,
        tx_id: TransactionId,
        recovered: bool,
    ) -> CoreResult<()>;
}

/// Writes command after-images into [`NeoStores`].
#[derive(Debug, Clone, Copy)]
pub struct StoreApplier<'a> {
    stores: &'a NeoStores,
}

impl<'a> StoreApplier<'a> {
    /// Creates an applier over `stores`.
    #[must_use]
    pub const fn new(stores: &'a NeoStores) -> Self {
        Self { stores }
    }
}

impl TransactionApplier for StoreApplier<'_> {
    fn apply(
        &self,
        tx: &TransactionRepresentation,
        tx_id: TransactionId,
        recovered: bool,
    ) -> CoreResult<()> {
        let stores = self.stores;
        for command in &tx.commands {
            match command {
                Command::Node(record) => {
                    stores.nodes.update_record(record)?;
                    if !record.in_use && !recovered {
                        stores.nodes.free_id(record.id);
                    }
                }
                Command::Relationship(record) => {
                    stores.update_relationship(record)?;
                    if !record.in_use && !recovered {
                        stores.relationships.free_id(record.id);
                    }
                }
                Command::Property(record) => {
                    stores.properties.update_record(record)?;
                    if !record.in_use && !recovered {
                        stores.properties.free_id(record.id);
                    }
                }
                Command::GraphNextProperty(head) => stores.meta.set_graph_next_prop(*head)?,
                Command::ConstraintIntroduced => {
                    stores.meta.set_latest_constraint_introducing_tx(tx_id)?;
                }
            }
        }
        debug!(%tx_id, commands = tx.commands.len(), recovered, "applied transaction");
        Ok(())
    }
}

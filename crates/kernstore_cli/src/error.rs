//! Errors reported by the command-line tools.

use kernstore_core::CoreError;
use kernstore_storage::StorageError;
use thiserror::Error;

/// Failure of a CLI command.
#[derive(Debug, Error)]
pub enum CliError {
    /// The command line was wrong; the usage line is printed.
    #[error("{message}")]
    Usage {
        /// What was wrong.
        message: String,
        /// Usage line of the command.
        usage: &'static str,
    },

    /// The command itself failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A file could not be listed or read.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Output could not be rendered.
    #[error("cannot render output: {0}")]
    Output(#[from] serde_json::Error),
}

impl CliError {
    /// Process exit status for this failure.
    pub const fn status(&self) -> u8 {
        match self {
            Self::Usage { .. } => 2,
            _ => 1,
        }
    }
}

/// Result type of CLI commands.
pub type CliResult<T> = Result<T, CliError>;

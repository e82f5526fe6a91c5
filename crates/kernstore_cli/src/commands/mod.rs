//! CLI command implementations.

pub mod dump_log;
pub mod inspect;
pub mod rebuild;

/// Output format of the inspection commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    /// Human-readable lines.
    Text,
    /// Pretty-printed JSON.
    Json,
}

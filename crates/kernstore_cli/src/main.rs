//! kernstore CLI
//!
//! Command-line tools for kernstore stores and transaction logs.
//!
//! # Commands
//!
//! - `rebuild-from-logs` - Create a store by replaying the logs of another
//! - `dump-log` - Print the entries of one log file
//! - `inspect` - Print the meta-data fields of a store

mod commands;
mod error;

use clap::{Parser, Subcommand};
use commands::Format;
use error::{CliError, CliResult};
use kernstore_storage::{DefaultFileSystem, FileSystem};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// kernstore command-line tools.
#[derive(Parser)]
#[command(name = "kernstore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a store from nothing but transaction logs
    ///
    /// Usage: rebuild-from-logs [--full] <source dir with logs> <target dir for graphdb>
    RebuildFromLogs {
        /// `[--full] <source> <target>`; `--full` runs a consistency check
        #[arg(allow_hyphen_values = true, num_args = 0.., trailing_var_arg = true)]
        args: Vec<String>,
    },

    /// Print the entries of one log file
    DumpLog {
        /// Log file to read
        file: PathBuf,

        /// Maximum number of entries to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Print the meta-data fields of a store
    Inspect {
        /// Store directory
        dir: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Show version information
    Version,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            if let CliError::Usage { usage, .. } = &err {
                eprintln!("usage: kernstore {usage}");
            }
            ExitCode::from(err.status())
        }
    }
}

fn run(command: Commands) -> CliResult<()> {
    let fs: Arc<dyn FileSystem> = Arc::new(DefaultFileSystem);
    match command {
        Commands::RebuildFromLogs { args } => commands::rebuild::run(fs, &args),
        Commands::DumpLog {
            file,
            limit,
            format,
        } => commands::dump_log::run(fs, &file, limit, format),
        Commands::Inspect { dir, format } => commands::inspect::run(fs, &dir, format),
        Commands::Version => {
            println!("kernstore CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("kernstore core v{}", kernstore_core::VERSION);
            Ok(())
        }
    }
}

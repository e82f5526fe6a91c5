//! Rebuild-from-logs command implementation.

use crate::error::{CliError, CliResult};
use kernstore_core::rebuild::USAGE;
use kernstore_core::{rebuild_from_logs, Config, CoreError, RebuildArgs, RebuildReport};
use kernstore_storage::FileSystem;
use std::sync::Arc;
use tracing::debug;

/// Runs the rebuild-from-logs command on raw `[--full] <source> <target>`
/// arguments.
pub fn run(fs: Arc<dyn FileSystem>, args: &[String]) -> CliResult<()> {
    let args = parse(fs.as_ref(), args)?;
    debug!(?args, "parsed rebuild arguments");
    let config = Config::default();
    let report = rebuild_from_logs(fs, &args, config.page_size, config.read_ahead_size)?;
    print_report(&args, &report);
    Ok(())
}

fn parse(fs: &dyn FileSystem, args: &[String]) -> CliResult<RebuildArgs> {
    RebuildArgs::parse(fs, args).map_err(|err| match err {
        CoreError::InvalidArgument { message } => CliError::Usage {
            message,
            usage: USAGE,
        },
        other => CliError::Core(other),
    })
}

fn print_report(args: &RebuildArgs, report: &RebuildReport) {
    println!(
        "Rebuilt {} from {}",
        args.target.display(),
        args.source.display()
    );
    println!("  highest log version:   {}", report.highest_version);
    println!("  last transaction:      {}", report.last_transaction_id);
    println!("  transactions applied:  {}", report.applied);

    let Some(consistency) = &report.consistency else {
        return;
    };
    println!();
    println!(
        "Consistency check: {} nodes, {} relationships, {} properties",
        consistency.nodes, consistency.relationships, consistency.properties
    );
    if consistency.is_consistent() {
        println!("  no inconsistencies found");
    } else {
        for problem in &consistency.inconsistencies {
            println!("  {problem}");
        }
    }
}

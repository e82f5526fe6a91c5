//! Dump-log command implementation.

use super::Format;
use crate::error::CliResult;
use kernstore_core::log::{log_entries, LogEntry};
use kernstore_core::{Command, LogPosition};
use kernstore_storage::FileSystem;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Log entry representation for output.
#[derive(Debug, Serialize)]
pub struct LogEntryInfo {
    /// Log file version the entry was read from.
    pub version: u64,
    /// Byte offset in that file.
    pub offset: u64,
    /// Entry type.
    pub entry_type: &'static str,
    /// Global transaction id (start and rollback entries).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_id: Option<String>,
    /// Master and local instance ids (start entries).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<(i32, i32)>,
    /// Start entry checksum.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<u64>,
    /// Last committed transaction when the transaction started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_committed_tx: Option<u64>,
    /// Assigned transaction id (commit entries).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<u64>,
    /// Store command written (command entries).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl LogEntryInfo {
    fn new(position: LogPosition, entry: &LogEntry) -> Self {
        let mut info = Self {
            version: position.version,
            offset: position.offset,
            entry_type: "",
            global_id: None,
            instance: None,
            checksum: None,
            last_committed_tx: None,
            tx_id: None,
            command: None,
        };
        match entry {
            LogEntry::Start(start) => {
                info.entry_type = "START";
                info.global_id = Some(hex_encode(&start.global_id));
                info.instance = Some((start.master_id, start.local_id));
                info.checksum = Some(start.checksum());
                info.last_committed_tx = Some(start.last_committed_tx_when_started.as_u64());
            }
            LogEntry::Command(command) => {
                info.entry_type = "COMMAND";
                info.command = Some(describe(command));
            }
            LogEntry::OnePhaseCommit(commit) => {
                info.entry_type = "COMMIT";
                info.tx_id = Some(commit.tx_id.as_u64());
            }
            LogEntry::Rollback { global_id } => {
                info.entry_type = "ROLLBACK";
                info.global_id = Some(hex_encode(global_id));
            }
        }
        info
    }
}

/// Runs the dump-log command.
pub fn run(
    fs: Arc<dyn FileSystem>,
    path: &Path,
    limit: Option<usize>,
    format: Format,
) -> CliResult<()> {
    let entries = read_entries(fs, path, limit)?;
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        Format::Text => print_text_output(path, &entries),
    }
    Ok(())
}

fn read_entries(
    fs: Arc<dyn FileSystem>,
    path: &Path,
    limit: Option<usize>,
) -> CliResult<Vec<LogEntryInfo>> {
    Ok(log_entries(fs, path)?
        .iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(|(position, entry)| LogEntryInfo::new(*position, entry))
        .collect())
}

fn describe(command: &Command) -> String {
    match command {
        Command::Node(node) => format!(
            "node {} in_use={} next_prop={}",
            node.id,
            node.in_use,
            optional(node.next_prop)
        ),
        Command::Relationship(rel) => format!(
            "relationship {} in_use={} ({})-[{}]->({})",
            rel.id, rel.in_use, rel.start_node, rel.type_id, rel.end_node
        ),
        Command::Property(prop) => format!(
            "property {} in_use={} key={} value={} next_prop={}",
            prop.id,
            prop.in_use,
            prop.key,
            prop.value,
            optional(prop.next_prop)
        ),
        Command::GraphNextProperty(head) => format!("graph next_prop={}", optional(*head)),
        Command::ConstraintIntroduced => "constraint introduced".to_owned(),
    }
}

fn optional(id: Option<u64>) -> String {
    id.map_or_else(|| "-".to_owned(), |id| id.to_string())
}

fn print_text_output(path: &Path, entries: &[LogEntryInfo]) {
    println!("{} ({} entries)", path.display(), entries.len());
    println!("================");
    println!();

    for entry in entries {
        print!("[{}@{:08}] {:8}", entry.version, entry.offset, entry.entry_type);
        if let Some(ref global_id) = entry.global_id {
            print!(" global={}", global_id);
        }
        if let Some((master, local)) = entry.instance {
            print!(" master={} local={}", master, local);
        }
        if let Some(checksum) = entry.checksum {
            print!(" checksum={:016x}", checksum);
        }
        if let Some(last) = entry.last_committed_tx {
            print!(" last_committed={}", last);
        }
        if let Some(tx_id) = entry.tx_id {
            print!(" txid={}", tx_id);
        }
        if let Some(ref command) = entry.command {
            print!(" {}", command);
        }
        println!();
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernstore_core::log::LogFiles;
    use kernstore_core::{Config, Database};
    use kernstore_storage::EphemeralFileSystem;

    #[test]
    fn entries_of_a_committed_transaction() {
        let fs = EphemeralFileSystem::new();
        {
            let db = Database::open_with_fs(
                Arc::new(fs.clone()),
                Path::new("/db"),
                Config::default().sync_on_commit(false),
            )
            .unwrap();
            db.transaction(|tx| {
                let node = tx.create_node()?;
                tx.set_node_property(node, 3, 42)
            })
            .unwrap();
        }
        let log = LogFiles::new(Arc::new(fs.clone()), "/db").version_file(0);
        let entries = read_entries(Arc::new(fs), &log, None).unwrap();

        let types: Vec<_> = entries.iter().map(|e| e.entry_type).collect();
        assert_eq!(types.first(), Some(&"START"));
        assert_eq!(types.last(), Some(&"COMMIT"));
        assert!(types[1..types.len() - 1].iter().all(|t| *t == "COMMAND"));
        assert_eq!(entries.last().unwrap().tx_id, Some(2));
        assert!(entries
            .iter()
            .filter_map(|e| e.command.as_deref())
            .any(|c| c.starts_with("property 0 in_use=true key=3 value=42")));
    }

    #[test]
    fn limit_cuts_the_listing() {
        let fs = EphemeralFileSystem::new();
        {
            let db = Database::open_with_fs(
                Arc::new(fs.clone()),
                Path::new("/db"),
                Config::default().sync_on_commit(false),
            )
            .unwrap();
            for _ in 0..3 {
                db.transaction(|tx| tx.create_node().map(drop)).unwrap();
            }
        }
        let log = LogFiles::new(Arc::new(fs.clone()), "/db").version_file(0);
        let entries = read_entries(Arc::new(fs), &log, Some(4)).unwrap();
        assert_eq!(entries.len(), 4);
    }

    #[test]
    fn json_output_skips_absent_fields() {
        let info = LogEntryInfo::new(
            LogPosition::new(0, 38),
            &LogEntry::Rollback { global_id: [0xab; 16] },
        );
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["entry_type"], "ROLLBACK");
        assert!(json.get("tx_id").is_none());
    }
}

//! Inspect command implementation.
//!
//! Reads the meta-data file record by record, so it works on a store that
//! another process has open or that was left unclean.

use super::Format;
use crate::error::CliResult;
use kernstore_core::log::LogFiles;
use kernstore_core::store::{version_long_to_string, META_DATA_FILE};
use kernstore_core::{CoreError, MetaDataStore, Position};
use kernstore_storage::FileSystem;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store directory.
    pub path: String,
    /// Meta-data fields in file order.
    pub fields: Vec<MetaField>,
    /// Log versions present in the directory.
    pub log_versions: Vec<u64>,
    /// Store files and their sizes in bytes.
    pub files: Vec<(String, u64)>,
}

/// One meta-data field.
#[derive(Debug, Serialize)]
pub struct MetaField {
    /// Field name.
    pub name: &'static str,
    /// Raw stored value; `-1` when unset.
    pub value: i64,
    /// Decoded form, where the raw value is packed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decoded: Option<String>,
}

/// Runs the inspect command.
pub fn run(fs: Arc<dyn FileSystem>, dir: &Path, format: Format) -> CliResult<()> {
    let result = inspect(fs, dir)?;
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_text_output(&result),
    }
    Ok(())
}

fn inspect(fs: Arc<dyn FileSystem>, dir: &Path) -> CliResult<InspectResult> {
    let meta = dir.join(META_DATA_FILE);
    if !fs.exists(&meta) {
        return Err(CoreError::invalid_argument(format!(
            "no store found in {}",
            dir.display()
        ))
        .into());
    }

    let mut fields = Vec::with_capacity(Position::ALL.len());
    for position in Position::ALL {
        let value = MetaDataStore::read_record(fs.as_ref(), &meta, position)?;
        let decoded = match position {
            Position::StoreVersion => Some(version_long_to_string(value)?),
            _ => None,
        };
        fields.push(MetaField {
            name: position.name(),
            value,
            decoded,
        });
    }

    let mut files = Vec::new();
    for file in fs.list_files(dir)? {
        let name = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        if name.starts_with(META_DATA_FILE) {
            files.push((name, fs.file_size(&file)?));
        }
    }
    files.sort();

    Ok(InspectResult {
        path: dir.display().to_string(),
        fields,
        log_versions: LogFiles::new(fs, dir).versions()?,
        files,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Store: {}", result.path);
    println!("================");
    println!();

    for field in &result.fields {
        match &field.decoded {
            Some(decoded) => println!("  {:28} {} ({})", field.name, field.value, decoded),
            None => println!("  {:28} {}", field.name, field.value),
        }
    }

    println!();
    println!("Files:");
    for (name, size) in &result.files {
        println!("  {:32} {:>12} bytes", name, size);
    }
    println!();
    match (result.log_versions.first(), result.log_versions.last()) {
        (Some(lowest), Some(highest)) => println!("Log versions: {lowest}..={highest}"),
        _ => println!("Log versions: none"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernstore_core::store::STORE_VERSION;
    use kernstore_core::{Config, Database};
    use kernstore_storage::EphemeralFileSystem;

    fn field<'a>(result: &'a InspectResult, name: &str) -> &'a MetaField {
        result.fields.iter().find(|f| f.name == name).unwrap()
    }

    #[test]
    fn fields_of_a_closed_store() {
        let fs = EphemeralFileSystem::new();
        {
            let db = Database::open_with_fs(
                Arc::new(fs.clone()),
                Path::new("/db"),
                Config::default().sync_on_commit(false),
            )
            .unwrap();
            db.transaction(|tx| tx.create_node().map(drop)).unwrap();
        }

        let result = inspect(Arc::new(fs), Path::new("/db")).unwrap();
        assert_eq!(result.fields.len(), Position::ALL.len());
        assert_eq!(field(&result, "last committed transaction").value, 2);
        assert_eq!(
            field(&result, "store version").decoded.as_deref(),
            Some(STORE_VERSION)
        );
        assert_eq!(field(&result, "first graph property").value, -1);
        assert_eq!(result.log_versions, vec![0]);
        assert!(result.files.iter().any(|(name, _)| name == META_DATA_FILE));
    }

    #[test]
    fn directory_without_store_is_rejected() {
        let fs = EphemeralFileSystem::new();
        fs.mkdirs(Path::new("/empty")).unwrap();
        assert!(inspect(Arc::new(fs), Path::new("/empty")).is_err());
    }
}

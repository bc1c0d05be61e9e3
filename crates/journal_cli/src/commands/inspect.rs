//! Inspect command implementation.

use journal_sync_protocol::ManifestEntry;
use journal_sync_server::EntryStore;
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectResult {
    /// Entries directory.
    pub path: String,
    /// Number of live entries.
    pub entry_count: usize,
    /// Number of soft-deleted entries.
    pub trash_count: usize,
    /// Global hash over live entries.
    pub global_hash: String,
    /// Manifest of live entries, id order.
    pub manifest: Vec<ManifestEntry>,
}

/// Collects the inspection result for `data_dir`.
pub fn inspect(data_dir: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let entries_dir = data_dir.join("entries");
    if !entries_dir.exists() {
        return Err(format!("No journal store found at {:?}", data_dir).into());
    }

    let store = EntryStore::open(data_dir)?;
    let stats = store.stats()?;
    let mut manifest = store.list()?;
    manifest.sort_by_key(|m| m.id);

    Ok(InspectResult {
        path: store.entries_dir().display().to_string(),
        entry_count: stats.live,
        trash_count: stats.trashed,
        global_hash: store.global_hash()?,
        manifest,
    })
}

/// Runs the inspect command.
pub fn run(data_dir: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(data_dir)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Journal Store: {}", result.path);
    println!("  Entries:     {}", result.entry_count);
    println!("  Trashed:     {}", result.trash_count);
    println!("  Global hash: {}", result.global_hash);
    if !result.manifest.is_empty() {
        println!();
        for entry in &result.manifest {
            println!(
                "  {}  {}  {}",
                entry.id,
                entry.last_updated.to_rfc3339(),
                entry.hash.as_deref().unwrap_or("-")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use journal_sync_protocol::{global_hash, Entry};
    use tempfile::TempDir;

    #[test]
    fn counts_live_and_trashed() {
        let dir = TempDir::new().unwrap();
        let store = EntryStore::open(dir.path()).unwrap();
        let kept = store.put(Entry::new("a", None, Utc::now())).unwrap();
        let gone = store.put(Entry::new("b", None, Utc::now())).unwrap();
        store.soft_delete(gone.id).unwrap();

        let result = inspect(dir.path()).unwrap();
        assert_eq!(result.entry_count, 1);
        assert_eq!(result.trash_count, 1);
        assert_eq!(result.manifest, vec![kept.manifest()]);
        assert_eq!(result.global_hash, global_hash([&kept]));
    }

    #[test]
    fn missing_store_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(inspect(&dir.path().join("nothing")).is_err());
    }
}

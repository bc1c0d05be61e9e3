//! Restore command implementation.

use journal_sync_protocol::parse_entry_id;
use journal_sync_server::EntryStore;
use std::path::Path;

/// Moves entry `raw_id` out of the trash.
pub fn run(data_dir: &Path, raw_id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let id = parse_entry_id(raw_id)?;
    let store = EntryStore::open(data_dir)?;
    if !store.restore(id)? {
        return Err(format!("No trashed entry {id} in {}", data_dir.display()).into());
    }
    println!("✓ Restored entry {id}");
    Ok(())
}

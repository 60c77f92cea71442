//! Storage dumps: the JSON object `chrome.storage.local.get(null)` returns,
//! saved to a file.

use std::fs;
use std::path::Path;

use cg_core::{Config, MemoryStorage, ModerationStore};
use serde_json::Value;

pub fn read_json(path: &Path) -> Result<Value, String> {
    let text = fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
    serde_json::from_str(&text).map_err(|e| format!("Invalid JSON in '{}': {}", path.display(), e))
}

pub fn load_config(path: Option<&Path>) -> Result<Config, String> {
    match path {
        Some(path) => serde_json::from_value(read_json(path)?)
            .map_err(|e| format!("Invalid config '{}': {}", path.display(), e)),
        None => Ok(Config::default()),
    }
}

/// Load a dump into a ready moderation store.
pub fn load_store(path: &Path, config: &Config) -> Result<ModerationStore, String> {
    let values = match read_json(path)? {
        Value::Object(map) => map,
        _ => return Err(format!("'{}' is not a storage dump object", path.display())),
    };
    let storage = MemoryStorage::with_values(values);
    let mut store = ModerationStore::new(Box::new(storage), config.storage.clone());
    store
        .load()
        .map_err(|e| format!("Failed to load '{}': {}", path.display(), e))?;
    log::debug!(
        "dump: {} blocked, {} captures from {}",
        store.blocked_count(),
        store.capture_count(),
        path.display()
    );
    Ok(store)
}

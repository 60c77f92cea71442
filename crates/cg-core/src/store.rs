//! Moderation store
//!
//! Single source of truth for blocked authors and collected captures. The
//! in-memory state is loaded once and only becomes authoritative after that
//! load; every mutation before it is rejected so a late load can never clobber
//! edits with stale data.
//!
//! Persistence writes are fire-and-forget. A write failure is logged and the
//! in-memory state stays authoritative for the rest of the session, so the last
//! change may be lost if the page dies before storage catches up.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::clock::Clock;
use crate::config::StorageKeys;
use crate::location::deep_link;
use crate::types::ExportSummary;

// =============================================================================
// Errors
// =============================================================================

/// Error type for the persistence capability.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage backend failed: {0}")]
    Backend(String),
    #[error("operation not supported by this backend: {0}")]
    Unsupported(&'static str),
    #[error("serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("moderation state is still loading")]
    NotReady,
    #[error("moderation state was already loaded")]
    AlreadyLoaded,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

// =============================================================================
// Persistence Capability
// =============================================================================

/// Key-value persistence. Values are JSON documents.
pub trait Storage {
    fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, StorageError>;
    fn set(&mut self, entries: Map<String, Value>) -> Result<(), StorageError>;
    fn remove(&mut self, keys: &[&str]) -> Result<(), StorageError>;
}

/// In-process storage, used by tests and offline tools.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    pub values: HashMap<String, Value>,
    /// Number of `set`/`remove` calls seen
    pub writes: usize,
}

impl MemoryStorage {
    pub fn with_values(values: Map<String, Value>) -> Self {
        Self {
            values: values.into_iter().collect(),
            writes: 0,
        }
    }
}

impl Storage for MemoryStorage {
    fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, StorageError> {
        Ok(keys
            .iter()
            .filter_map(|key| self.values.get(*key).map(|v| (key.to_string(), v.clone())))
            .collect())
    }

    fn set(&mut self, entries: Map<String, Value>) -> Result<(), StorageError> {
        self.writes += 1;
        self.values.extend(entries);
        Ok(())
    }

    fn remove(&mut self, keys: &[&str]) -> Result<(), StorageError> {
        self.writes += 1;
        for key in keys {
            self.values.remove(*key);
        }
        Ok(())
    }
}

impl<T: Storage + ?Sized> Storage for std::rc::Rc<std::cell::RefCell<T>> {
    fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, StorageError> {
        self.borrow().get(keys)
    }

    fn set(&mut self, entries: Map<String, Value>) -> Result<(), StorageError> {
        self.borrow_mut().set(entries)
    }

    fn remove(&mut self, keys: &[&str]) -> Result<(), StorageError> {
        self.borrow_mut().remove(keys)
    }
}

// =============================================================================
// Records
// =============================================================================

/// Who was blocked, when and why. Field names match the persisted form.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockRecord {
    #[serde(rename = "uid")]
    pub author_id: String,
    #[serde(rename = "nickname")]
    pub display_name: String,
    #[serde(rename = "streamerName")]
    pub streamer_name: String,
    pub title: String,
    #[serde(rename = "blockDate")]
    pub blocked_at: String,
    #[serde(rename = "createdAt")]
    pub created_at: u64,
    #[serde(rename = "commentId")]
    pub comment_id: String,
    #[serde(rename = "content")]
    pub comment_text: String,
    pub url: String,
}

/// Best-effort context captured when a block is made.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BlockMetadata {
    pub display_name: String,
    pub streamer_name: String,
    pub title: String,
    pub comment_id: String,
    pub comment_text: String,
    pub url: String,
}

/// A collected comment snapshot. Field names match the persisted form.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureRecord {
    #[serde(rename = "commentId")]
    pub comment_id: String,
    #[serde(rename = "dataUrl")]
    pub image: String,
    #[serde(rename = "timestamp")]
    pub captured_at: String,
    #[serde(rename = "createdAt")]
    pub created_at: u64,
    #[serde(rename = "nickname")]
    pub display_name: String,
    #[serde(rename = "uid")]
    pub author_id: String,
    #[serde(rename = "streamer")]
    pub streamer_name: String,
    pub title: String,
    #[serde(rename = "content")]
    pub comment_text: String,
    #[serde(rename = "pageUrl")]
    pub page_url: String,
}

/// Outcome of a block toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockChange {
    Blocked,
    Unblocked,
}

// =============================================================================
// Ledger
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerKind {
    Block,
    Capture,
}

/// One row of the combined block/capture ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub kind: LedgerKind,
    pub author_id: String,
    pub display_name: String,
    pub streamer_name: String,
    pub title: String,
    pub comment_id: String,
    pub comment_text: String,
    pub recorded_at: String,
    pub created_at: u64,
    /// Source page focused on the comment, when the source URL is known
    pub target_url: Option<String>,
}

// =============================================================================
// Moderation State
// =============================================================================

#[derive(Debug, Default)]
struct ModerationState {
    blocked: Vec<String>,
    blocked_set: HashSet<String>,
    details: BTreeMap<String, BlockRecord>,
    captures: BTreeMap<String, CaptureRecord>,
}

/// Moderation state plus its persistence mirror.
pub struct ModerationStore {
    keys: StorageKeys,
    storage: Box<dyn Storage>,
    state: Option<ModerationState>,
}

impl ModerationStore {
    pub fn new(storage: Box<dyn Storage>, keys: StorageKeys) -> Self {
        Self {
            keys,
            storage,
            state: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_some()
    }

    pub fn keys(&self) -> &StorageKeys {
        &self.keys
    }

    /// Load synchronously from the storage capability.
    pub fn load(&mut self) -> Result<(), StoreError> {
        if self.is_ready() {
            return Err(StoreError::AlreadyLoaded);
        }
        let values = self.storage.get(&self.keys.all())?;
        self.apply_loaded(&values)
    }

    /// Complete a load whose `get` was performed asynchronously by the host.
    pub fn apply_loaded(&mut self, values: &Map<String, Value>) -> Result<(), StoreError> {
        if self.is_ready() {
            return Err(StoreError::AlreadyLoaded);
        }

        let mut state = ModerationState::default();
        if let Some(list) = values.get(&self.keys.blocked).and_then(Value::as_array) {
            for id in list.iter().filter_map(Value::as_str) {
                if state.blocked_set.insert(id.to_string()) {
                    state.blocked.push(id.to_string());
                }
            }
        }

        state.details = decode_records(values.get(&self.keys.details), "block detail");
        let before = state.details.len();
        state.details.retain(|author, _| state.blocked_set.contains(author));
        if state.details.len() != before {
            log::warn!("store: dropped {} block details without a blocked entry", before - state.details.len());
        }

        state.captures = decode_records(values.get(&self.keys.captures), "capture");

        log::info!(
            "store: loaded {} blocked, {} details, {} captures",
            state.blocked.len(),
            state.details.len(),
            state.captures.len()
        );
        self.state = Some(state);
        Ok(())
    }

    fn state_mut(&mut self) -> Result<&mut ModerationState, StoreError> {
        self.state.as_mut().ok_or(StoreError::NotReady)
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Block an unblocked author or unblock a blocked one.
    ///
    /// Both views (the id list and the record map) change together.
    pub fn toggle_block(
        &mut self,
        author_id: &str,
        metadata: Option<BlockMetadata>,
        clock: &dyn Clock,
    ) -> Result<BlockChange, StoreError> {
        let state = self.state_mut()?;

        let change = if state.blocked_set.contains(author_id) {
            state.blocked.retain(|id| id != author_id);
            state.blocked_set.remove(author_id);
            state.details.remove(author_id);
            BlockChange::Unblocked
        } else {
            state.blocked.push(author_id.to_string());
            state.blocked_set.insert(author_id.to_string());
            if let Some(meta) = metadata {
                let now = clock.now_ms();
                state.details.insert(
                    author_id.to_string(),
                    BlockRecord {
                        author_id: author_id.to_string(),
                        display_name: meta.display_name,
                        streamer_name: meta.streamer_name,
                        title: meta.title,
                        blocked_at: clock.wall_clock(),
                        created_at: now,
                        comment_id: meta.comment_id,
                        comment_text: meta.comment_text,
                        url: meta.url,
                    },
                );
            }
            BlockChange::Blocked
        };

        self.persist_blocks();
        Ok(change)
    }

    /// Insert or overwrite the capture keyed by its comment id.
    pub fn upsert_capture(&mut self, record: CaptureRecord) -> Result<(), StoreError> {
        let state = self.state_mut()?;
        state.captures.insert(record.comment_id.clone(), record);
        self.persist_captures();
        Ok(())
    }

    /// Returns whether a capture was removed.
    pub fn delete_capture(&mut self, comment_id: &str) -> Result<bool, StoreError> {
        let state = self.state_mut()?;
        let removed = state.captures.remove(comment_id).is_some();
        if removed {
            self.persist_captures();
        }
        Ok(removed)
    }

    /// Drop every capture. Returns how many were removed.
    pub fn clear_captures(&mut self) -> Result<usize, StoreError> {
        let state = self.state_mut()?;
        let count = state.captures.len();
        state.captures.clear();
        if let Err(e) = self.storage.remove(&[&self.keys.captures]) {
            log::warn!("store: failed to clear captures: {}", e);
        }
        Ok(count)
    }

    fn persist_blocks(&mut self) {
        let Some(state) = &self.state else {
            return;
        };
        let mut entries = Map::new();
        entries.insert(self.keys.blocked.clone(), Value::from(state.blocked.clone()));
        match serde_json::to_value(&state.details) {
            Ok(details) => {
                entries.insert(self.keys.details.clone(), details);
            }
            Err(e) => log::warn!("store: failed to encode block details: {}", e),
        }
        if let Err(e) = self.storage.set(entries) {
            log::warn!("store: failed to persist block list: {}", e);
        }
    }

    fn persist_captures(&mut self) {
        let Some(state) = &self.state else {
            return;
        };
        let captures = match serde_json::to_value(&state.captures) {
            Ok(captures) => captures,
            Err(e) => {
                log::warn!("store: failed to encode captures: {}", e);
                return;
            }
        };
        let mut entries = Map::new();
        entries.insert(self.keys.captures.clone(), captures);
        if let Err(e) = self.storage.set(entries) {
            log::warn!("store: failed to persist captures: {}", e);
        }
    }

    // -------------------------------------------------------------------------
    // Queries (in-memory only)
    // -------------------------------------------------------------------------

    pub fn is_blocked(&self, author_id: &str) -> bool {
        self.state
            .as_ref()
            .is_some_and(|state| state.blocked_set.contains(author_id))
    }

    pub fn is_captured(&self, comment_id: &str) -> bool {
        self.state
            .as_ref()
            .is_some_and(|state| state.captures.contains_key(comment_id))
    }

    pub fn blocked_ids(&self) -> &[String] {
        self.state.as_ref().map(|s| s.blocked.as_slice()).unwrap_or(&[])
    }

    pub fn block_record(&self, author_id: &str) -> Option<&BlockRecord> {
        self.state.as_ref()?.details.get(author_id)
    }

    /// Block records in the order they were made.
    pub fn block_records(&self) -> impl Iterator<Item = &BlockRecord> {
        let mut records: Vec<&BlockRecord> = self.state.iter().flat_map(|state| state.details.values()).collect();
        records.sort_by_key(|record| record.created_at);
        records.into_iter()
    }

    pub fn capture(&self, comment_id: &str) -> Option<&CaptureRecord> {
        self.state.as_ref()?.captures.get(comment_id)
    }

    /// Captures in the order they were collected.
    pub fn capture_records(&self) -> impl Iterator<Item = &CaptureRecord> {
        let mut records: Vec<&CaptureRecord> = self.state.iter().flat_map(|state| state.captures.values()).collect();
        records.sort_by_key(|record| record.created_at);
        records.into_iter()
    }

    pub fn blocked_count(&self) -> usize {
        self.blocked_ids().len()
    }

    pub fn block_record_count(&self) -> usize {
        self.state.as_ref().map_or(0, |state| state.details.len())
    }

    pub fn capture_count(&self) -> usize {
        self.state.as_ref().map_or(0, |state| state.captures.len())
    }

    /// Size of the capture collection as it would be persisted.
    pub fn capture_bytes(&self) -> usize {
        self.state
            .as_ref()
            .and_then(|state| serde_json::to_vec(&state.captures).ok())
            .map_or(0, |bytes| bytes.len())
    }

    pub fn summary(&self) -> ExportSummary {
        ExportSummary::new(self.block_record_count(), self.capture_count(), self.capture_bytes())
    }

    /// Block and capture entries merged, newest first.
    pub fn ledger(&self, target_param: &str) -> Vec<LedgerEntry> {
        let link = |url: &str, comment_id: &str| {
            if url.is_empty() {
                None
            } else {
                deep_link(url, target_param, Some(comment_id))
            }
        };

        let mut entries: Vec<LedgerEntry> = self
            .block_records()
            .map(|record| LedgerEntry {
                kind: LedgerKind::Block,
                author_id: record.author_id.clone(),
                display_name: record.display_name.clone(),
                streamer_name: record.streamer_name.clone(),
                title: record.title.clone(),
                comment_id: record.comment_id.clone(),
                comment_text: record.comment_text.clone(),
                recorded_at: record.blocked_at.clone(),
                created_at: record.created_at,
                target_url: link(&record.url, &record.comment_id),
            })
            .collect();

        entries.extend(self.capture_records().map(|record| LedgerEntry {
            kind: LedgerKind::Capture,
            author_id: record.author_id.clone(),
            display_name: record.display_name.clone(),
            streamer_name: record.streamer_name.clone(),
            title: record.title.clone(),
            comment_id: record.comment_id.clone(),
            comment_text: record.comment_text.clone(),
            recorded_at: record.captured_at.clone(),
            created_at: record.created_at,
            target_url: link(&record.page_url, &record.comment_id),
        }));

        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries
    }
}

/// Decode a persisted record map, skipping entries that do not fit.
fn decode_records<T: for<'de> Deserialize<'de>>(value: Option<&Value>, what: &str) -> BTreeMap<String, T> {
    let mut records = BTreeMap::new();
    let Some(Value::Object(map)) = value else {
        return records;
    };
    for (key, raw) in map {
        match serde_json::from_value::<T>(raw.clone()) {
            Ok(record) => {
                records.insert(key.clone(), record);
            }
            Err(e) => log::warn!("store: skipping malformed {} {}: {}", what, key, e),
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    fn ready_store() -> (ModerationStore, Rc<RefCell<MemoryStorage>>) {
        let storage = Rc::new(RefCell::new(MemoryStorage::default()));
        let mut store = ModerationStore::new(Box::new(storage.clone()), StorageKeys::default());
        store.load().unwrap();
        (store, storage)
    }

    fn meta() -> BlockMetadata {
        BlockMetadata {
            display_name: "troll".into(),
            streamer_name: "streamer".into(),
            title: "replay".into(),
            comment_id: "c1".into(),
            comment_text: "bad words".into(),
            url: "https://chzzk.naver.com/video/1".into(),
        }
    }

    #[test]
    fn test_not_ready_rejects_mutations() {
        let clock = ManualClock::new(0);
        let storage = Rc::new(RefCell::new(MemoryStorage::default()));
        let mut store = ModerationStore::new(Box::new(storage.clone()), StorageKeys::default());

        assert!(matches!(store.toggle_block("u1", Some(meta()), &clock), Err(StoreError::NotReady)));
        assert!(matches!(store.upsert_capture(CaptureRecord::default()), Err(StoreError::NotReady)));
        assert!(matches!(store.delete_capture("c"), Err(StoreError::NotReady)));
        assert!(matches!(store.clear_captures(), Err(StoreError::NotReady)));
        assert!(!store.is_blocked("u1"));
        assert_eq!(storage.borrow().writes, 0);
    }

    #[test]
    fn test_toggle_twice_round_trips() {
        let clock = ManualClock::new(1_700_000_000_000);
        let (mut store, storage) = ready_store();

        assert_eq!(store.toggle_block("u1", Some(meta()), &clock).unwrap(), BlockChange::Blocked);
        assert!(store.is_blocked("u1"));
        let record = store.block_record("u1").unwrap();
        assert_eq!(record.created_at, 1_700_000_000_000);
        assert_eq!(record.display_name, "troll");

        assert_eq!(store.toggle_block("u1", Some(meta()), &clock).unwrap(), BlockChange::Unblocked);
        assert!(!store.is_blocked("u1"));
        assert!(store.block_record("u1").is_none());
        assert_eq!(store.blocked_count(), 0);

        let storage = storage.borrow();
        assert_eq!(storage.writes, 2);
        assert_eq!(storage.values["CHZZK_REPLY_BLOCKED_USERS"], json!([]));
        assert_eq!(storage.values["CHZZK_BLOCKED_DETAILS"], json!({}));
    }

    #[test]
    fn test_records_keep_creation_order() {
        let clock = ManualClock::new(30);
        let (mut store, _) = ready_store();
        store.toggle_block("zz", Some(meta()), &clock).unwrap();
        clock.set(40);
        store.toggle_block("aa", Some(meta()), &clock).unwrap();
        let authors: Vec<&str> = store.block_records().map(|r| r.author_id.as_str()).collect();
        assert_eq!(authors, vec!["zz", "aa"]);

        for (id, created_at) in [("c9", 5), ("c1", 7)] {
            store
                .upsert_capture(CaptureRecord {
                    comment_id: id.into(),
                    created_at,
                    ..Default::default()
                })
                .unwrap();
        }
        let ids: Vec<&str> = store.capture_records().map(|r| r.comment_id.as_str()).collect();
        assert_eq!(ids, vec!["c9", "c1"]);
    }

    #[test]
    fn test_block_without_metadata_has_no_record() {
        let clock = ManualClock::new(0);
        let (mut store, _) = ready_store();
        store.toggle_block("u2", None, &clock).unwrap();
        assert!(store.is_blocked("u2"));
        assert!(store.block_record("u2").is_none());
        assert_eq!(store.summary().csv_rows, 0);
    }

    #[test]
    fn test_second_load_rejected() {
        let (mut store, _) = ready_store();
        assert!(matches!(store.load(), Err(StoreError::AlreadyLoaded)));
    }

    #[test]
    fn test_load_tolerates_malformed() {
        let values = json!({
            "CHZZK_REPLY_BLOCKED_USERS": ["a", "a", 3, "b"],
            "CHZZK_BLOCKED_DETAILS": {
                "a": {"uid": "a", "nickname": "n", "createdAt": 5},
                "b": {"uid": "b", "createdAt": "yesterday"},
                "ghost": {"uid": "ghost"}
            },
            "CHZZK_BLOCKED_IMAGES": {
                "c1": {"commentId": "c1", "dataUrl": "data:,", "createdAt": 9},
                "c2": "nope"
            }
        });
        let mut store = ModerationStore::new(
            Box::new(MemoryStorage::with_values(values.as_object().unwrap().clone())),
            StorageKeys::default(),
        );
        store.load().unwrap();
        assert_eq!(store.blocked_ids(), &["a".to_string(), "b".to_string()]);
        assert_eq!(store.block_record_count(), 1);
        assert_eq!(store.capture_count(), 1);
        assert!(store.is_captured("c1"));
    }

    #[test]
    fn test_capture_lifecycle() {
        let (mut store, storage) = ready_store();
        store
            .upsert_capture(CaptureRecord {
                comment_id: "c42".into(),
                image: "data:image/png;base64,AA==".into(),
                ..Default::default()
            })
            .unwrap();
        assert!(store.is_captured("c42"));
        assert!(store.capture_bytes() > 0);

        assert!(store.delete_capture("c42").unwrap());
        assert!(!store.delete_capture("c42").unwrap());
        assert_eq!(store.capture_count(), 0);

        store.upsert_capture(CaptureRecord { comment_id: "a".into(), ..Default::default() }).unwrap();
        store.upsert_capture(CaptureRecord { comment_id: "b".into(), ..Default::default() }).unwrap();
        assert_eq!(store.clear_captures().unwrap(), 2);
        assert!(!storage.borrow().values.contains_key("CHZZK_BLOCKED_IMAGES"));
    }

    #[test]
    fn test_ledger_newest_first_with_links() {
        let clock = ManualClock::new(10);
        let (mut store, _) = ready_store();
        store.toggle_block("u1", Some(meta()), &clock).unwrap();
        store
            .upsert_capture(CaptureRecord {
                comment_id: "c9".into(),
                created_at: 20,
                page_url: "https://chzzk.naver.com/video/2".into(),
                ..Default::default()
            })
            .unwrap();

        let ledger = store.ledger("chzzk_target");
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger[0].kind, LedgerKind::Capture);
        assert_eq!(
            ledger[0].target_url.as_deref(),
            Some("https://chzzk.naver.com/video/2?chzzk_target=c9")
        );
        assert_eq!(ledger[1].kind, LedgerKind::Block);
        assert_eq!(
            ledger[1].target_url.as_deref(),
            Some("https://chzzk.naver.com/video/1?chzzk_target=c1")
        );
    }

    struct FailingStorage;

    impl Storage for FailingStorage {
        fn get(&self, _keys: &[&str]) -> Result<Map<String, Value>, StorageError> {
            Ok(Map::new())
        }
        fn set(&mut self, _entries: Map<String, Value>) -> Result<(), StorageError> {
            Err(StorageError::Backend("quota".into()))
        }
        fn remove(&mut self, _keys: &[&str]) -> Result<(), StorageError> {
            Err(StorageError::Backend("quota".into()))
        }
    }

    #[test]
    fn test_write_failure_keeps_memory_state() {
        let clock = ManualClock::new(0);
        let mut store = ModerationStore::new(Box::new(FailingStorage), StorageKeys::default());
        store.load().unwrap();
        store.toggle_block("u1", None, &clock).unwrap();
        assert!(store.is_blocked("u1"));
    }
}

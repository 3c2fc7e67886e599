//! Stable identity storage (§6.5): holds the per-connection `player_id`
//! across reconnects within one process, or across restarts for native
//! clients backed by a file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use uuid::Uuid;

fn storage_key(session_id: &str) -> String {
    format!("keyboardia:player_id:{session_id}")
}

/// A key-value store scoped to the current client's lifetime.
pub trait IdentityStore: Send + Sync {
    fn get(&self, session_id: &str) -> Option<String>;
    fn set(&self, session_id: &str, player_id: &str);
}

/// Generates (and remembers) a `player_id` for `session_id`, creating one
/// with a v4 UUID on first access.
pub fn player_id_for(store: &dyn IdentityStore, session_id: &str) -> String {
    if let Some(existing) = store.get(session_id) {
        return existing;
    }
    let generated = Uuid::new_v4().to_string();
    store.set(session_id, &generated);
    generated
}

/// In-memory identity store: holds `player_id` for the lifetime of the
/// process, exactly as long as a single tab/connection lives.
#[derive(Default)]
pub struct InMemoryIdentityStore {
    values: Mutex<HashMap<String, String>>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityStore for InMemoryIdentityStore {
    fn get(&self, session_id: &str) -> Option<String> {
        self.values.lock().unwrap().get(&storage_key(session_id)).cloned()
    }

    fn set(&self, session_id: &str, player_id: &str) {
        self.values.lock().unwrap().insert(storage_key(session_id), player_id.to_string());
    }
}

/// File-backed identity store: a native client that wants its identity to
/// survive a process restart persists it as a flat JSON map keyed by
/// `keyboardia:player_id:<session_id>`.
pub struct FileIdentityStore {
    path: PathBuf,
    cache: Mutex<HashMap<String, String>>,
}

impl FileIdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let cache = Self::load(&path);
        FileIdentityStore { path, cache: Mutex::new(cache) }
    }

    fn load(path: &Path) -> HashMap<String, String> {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|contents| serde_json::from_str(&contents).ok())
            .unwrap_or_default()
    }

    fn persist(&self, cache: &HashMap<String, String>) {
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(json) = serde_json::to_string_pretty(cache) {
            if let Err(e) = std::fs::write(&self.path, json) {
                log::warn!("failed to persist identity store at {:?}: {e}", self.path);
            }
        }
    }
}

impl IdentityStore for FileIdentityStore {
    fn get(&self, session_id: &str) -> Option<String> {
        self.cache.lock().unwrap().get(&storage_key(session_id)).cloned()
    }

    fn set(&self, session_id: &str, player_id: &str) {
        let mut cache = self.cache.lock().unwrap();
        cache.insert(storage_key(session_id), player_id.to_string());
        self.persist(&cache);
    }
}

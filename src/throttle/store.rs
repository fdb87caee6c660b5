//! Throttle Store
//!
//! String-keyed persistent storage for request records and freeze state,
//! plus the per-key value the throttle persists.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::error::StoreError;
use super::role::Role;

/// Synchronous string-keyed key/value store
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Every key starting with `prefix`
    fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .lock()?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock()?.remove(key);
        Ok(())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .entries
            .lock()?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// Store persisted as one JSON object on disk
///
/// The whole map is rewritten on every mutation. A file that cannot be
/// parsed is logged and replaced on the next write.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let entries = if path.exists() {
            let content = fs::read_to_string(&path)?;
            match serde_json::from_str(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(path = ?path, error = %e, "Store file is corrupt, starting empty");
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(entries)?;
        // Write-then-rename so a crash never leaves a half-written file
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock()?;
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock()?;
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .entries
            .lock()?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// Counting bucket identity: role plus optional endpoint
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ThrottleKey {
    pub role: Role,
    pub endpoint: Option<String>,
}

impl ThrottleKey {
    /// An empty endpoint is the same bucket as no endpoint
    pub fn new(role: Role, endpoint: Option<&str>) -> Self {
        Self {
            role,
            endpoint: endpoint.filter(|e| !e.is_empty()).map(str::to_string),
        }
    }

    /// `<prefix>_<role>` or `<prefix>_<role>_<endpoint>`
    pub fn storage_key(&self, prefix: &str) -> String {
        match &self.endpoint {
            Some(endpoint) => format!("{}_{}_{}", prefix, self.role, endpoint),
            None => format!("{}_{}", prefix, self.role),
        }
    }
}

/// Persisted state for one [`ThrottleKey`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyState {
    pub role: Role,

    #[serde(default)]
    pub endpoint: Option<String>,

    /// Accepted request timestamps (epoch ms), oldest first
    #[serde(default)]
    pub records: Vec<i64>,

    /// Freeze expiry (epoch ms)
    #[serde(default)]
    pub frozen_until: Option<i64>,
}

impl KeyState {
    pub fn empty(key: &ThrottleKey) -> Self {
        Self {
            role: key.role,
            endpoint: key.endpoint.clone(),
            records: Vec::new(),
            frozen_until: None,
        }
    }

    /// Drop records that have left the window and an expired freeze.
    /// A record stamped `ts` counts until `ts + window_ms` (exclusive), so it
    /// expires exactly at the reset time reported by status.
    /// Returns true when anything was removed.
    pub fn purge(&mut self, now: i64, window_ms: i64) -> bool {
        let cutoff = now.saturating_sub(window_ms);
        let before = self.records.len();
        self.records.retain(|ts| *ts > cutoff);

        let mut changed = self.records.len() != before;
        if matches!(self.frozen_until, Some(until) if now >= until) {
            self.frozen_until = None;
            changed = true;
        }
        changed
    }

    /// Active freeze expiry, if any
    pub fn active_freeze(&self, now: i64) -> Option<i64> {
        self.frozen_until.filter(|until| now < *until)
    }

    /// Nothing worth keeping
    pub fn is_idle(&self) -> bool {
        self.records.is_empty() && self.frozen_until.is_none()
    }

    pub fn count(&self) -> u32 {
        u32::try_from(self.records.len()).unwrap_or(u32::MAX)
    }

    pub fn oldest(&self) -> Option<i64> {
        self.records.iter().min().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store_crud() {
        let store = MemoryStore::new();
        assert!(store.is_empty());

        store.set("a", "1").unwrap();
        store.set("b", "2").unwrap();
        assert_eq!(store.get("a").unwrap(), Some("1".to_string()));
        assert_eq!(store.len(), 2);

        store.remove("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn test_memory_store_prefix_keys() {
        let store = MemoryStore::new();
        store.set("rate_limit_student", "{}").unwrap();
        store.set("rate_limit_teacher_x", "{}").unwrap();
        store.set("user", "{}").unwrap();

        let keys = store.keys("rate_limit_").unwrap();
        assert_eq!(keys.len(), 2);
        assert!(!keys.contains(&"user".to_string()));
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let store = FileStore::open(&path).unwrap();
        store.set("rate_limit_admin", "{\"x\":1}").unwrap();
        drop(store);

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(
            reopened.get("rate_limit_admin").unwrap(),
            Some("{\"x\":1}".to_string())
        );
    }

    #[test]
    fn test_file_store_corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "not json at all").unwrap();

        let store = FileStore::open(&path).unwrap();
        assert!(store.keys("").unwrap().is_empty());

        store.set("k", "v").unwrap();
        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get("k").unwrap(), Some("v".to_string()));
    }

    #[test]
    fn test_storage_key_format() {
        let key = ThrottleKey::new(Role::Student, Some("courses"));
        assert_eq!(key.storage_key("rate_limit"), "rate_limit_student_courses");

        let key = ThrottleKey::new(Role::GeneralSupervisor, None);
        assert_eq!(key.storage_key("rate_limit"), "rate_limit_general_supervisor");
    }

    #[test]
    fn test_empty_endpoint_is_no_endpoint() {
        assert_eq!(
            ThrottleKey::new(Role::Teacher, Some("")),
            ThrottleKey::new(Role::Teacher, None)
        );
    }

    #[test]
    fn test_purge_drops_stale_records_and_expired_freeze() {
        let key = ThrottleKey::new(Role::Student, None);
        let mut state = KeyState::empty(&key);
        state.records = vec![100, 500, 900];
        state.frozen_until = Some(1_000);

        assert!(state.purge(1_000, 500));
        assert_eq!(state.records, vec![900]);
        assert_eq!(state.frozen_until, None);

        assert!(!state.purge(1_000, 500));
    }

    #[test]
    fn test_purge_expires_record_at_window_end() {
        let key = ThrottleKey::new(Role::Student, None);
        let mut state = KeyState::empty(&key);
        state.records = vec![1_000];

        assert!(!state.purge(1_499, 500));
        assert_eq!(state.count(), 1);
        assert!(state.purge(1_500, 500));
        assert!(state.records.is_empty());
    }

    #[test]
    fn test_active_freeze() {
        let key = ThrottleKey::new(Role::Student, None);
        let mut state = KeyState::empty(&key);
        state.frozen_until = Some(2_000);

        assert_eq!(state.active_freeze(1_999), Some(2_000));
        assert_eq!(state.active_freeze(2_000), None);
    }
}

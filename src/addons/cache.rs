//! Key-value cache with per-entry expiry.
//!
//! The marketplace client keeps its login token here. [`MemoryCache`]
//! lives for the process; [`FileCache`] survives restarts by writing one
//! JSON file per key.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Get/set store with a time-to-live per entry.
pub trait KeyValueCache: Send + Sync {
    /// Returns the live value for `key`, if any.
    fn get(&self, key: &str) -> Option<Value>;

    /// Stores `value` under `key` for `ttl`.
    fn set(&self, key: &str, value: Value, ttl: Duration) -> io::Result<()>;

    /// Drops `key`.
    fn remove(&self, key: &str) -> io::Result<()>;
}

/// Process-local cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, (Value, Instant)>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueCache for MemoryCache {
    fn get(&self, key: &str) -> Option<Value> {
        let entries = self.entries.read().ok()?;
        let (value, expires) = entries.get(key)?;
        (Instant::now() < *expires).then(|| value.clone())
    }

    fn set(&self, key: &str, value: Value, ttl: Duration) -> io::Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| io::Error::other("cache lock poisoned"))?;
        entries.insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| io::Error::other("cache lock poisoned"))?;
        entries.remove(key);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FileEntry {
    /// Unix timestamp (seconds) after which the entry is stale.
    expires_at: i64,
    value: Value,
}

/// Cache backed by `<dir>/<key>.json` files.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    #[must_use]
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }
}

impl KeyValueCache for FileCache {
    fn get(&self, key: &str) -> Option<Value> {
        let path = self.entry_path(key);
        let content = fs::read_to_string(&path).ok()?;
        let entry: FileEntry = serde_json::from_str(&content).ok()?;

        if chrono::Utc::now().timestamp() >= entry.expires_at {
            debug!("[ADDON-CACHE] Entry '{}' expired", key);
            let _ = fs::remove_file(&path);
            return None;
        }
        Some(entry.value)
    }

    fn set(&self, key: &str, value: Value, ttl: Duration) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let entry = FileEntry {
            expires_at: chrono::Utc::now().timestamp().saturating_add(ttl_secs),
            value,
        };
        let json = serde_json::to_string(&entry).map_err(io::Error::other)?;
        fs::write(self.entry_path(key), json)
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.entry_path(key)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_memory_cache_roundtrip_and_expiry() {
        let cache = MemoryCache::new();
        cache
            .set("token", json!({"token": "abc"}), Duration::from_secs(60))
            .expect("set");
        assert_eq!(cache.get("token"), Some(json!({"token": "abc"})));

        cache.set("short", json!(1), Duration::ZERO).expect("set");
        assert_eq!(cache.get("short"), None);

        cache.remove("token").expect("remove");
        assert_eq!(cache.get("token"), None);
    }

    #[test]
    fn test_file_cache_persists_across_instances() {
        let dir = TempDir::new().expect("temp dir");
        FileCache::new(dir.path())
            .set("cloud_token", json!({"token": "t1"}), Duration::from_secs(3600))
            .expect("set");

        let reopened = FileCache::new(dir.path());
        assert_eq!(reopened.get("cloud_token"), Some(json!({"token": "t1"})));
    }

    #[test]
    fn test_file_cache_expired_entry_is_dropped() {
        let dir = TempDir::new().expect("temp dir");
        let cache = FileCache::new(dir.path());
        cache.set("old", json!("x"), Duration::ZERO).expect("set");

        assert_eq!(cache.get("old"), None);
        assert!(!dir.path().join("old.json").exists());
        cache.remove("old").expect("remove missing is fine");
    }
}

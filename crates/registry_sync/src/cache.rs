//! Local key-value cache mirroring the working set.
//!
//! The cache holds four string entries: one JSON document per collection
//! (records grouped by area) and the timestamp of the last successful
//! mirror. It is the only data available when the app starts offline.
//!
//! A fifth entry records whether the mirrored data holds changes the
//! remote store has not seen yet. While it is set, startup restores from
//! the cache instead of pulling over it.

use chrono::{DateTime, Utc};
use registry_model::WorkingSet;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use thiserror::Error;

pub const PAID_KEY: &str = "cwac_paidData";
pub const UNPAID_KEY: &str = "cwac_unpaidData";
pub const STATUS_KEY: &str = "cwac_statusData";
pub const LAST_SYNC_KEY: &str = "cwac_lastSync";
pub const PENDING_KEY: &str = "cwac_pendingChanges";

/// Errors from the local cache
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A cache entry exists but cannot be decoded
    #[error("Cache entry {key} is corrupt: {reason}")]
    Corrupt { key: String, reason: String },

    /// The cache refused the write (storage full or disabled)
    #[error("Cache unavailable: {0}")]
    Unavailable(String),
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Synchronous string key-value store
pub trait LocalCache: Send + Sync {
    fn get(&self, key: &str) -> CacheResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> CacheResult<()>;
}

/// What a previous session left in the cache
#[derive(Debug, Clone, PartialEq)]
pub struct CachedSnapshot {
    pub working_set: WorkingSet,
    pub last_sync: Option<DateTime<Utc>>,
}

/// Mirror the whole working set into the cache
pub fn save_snapshot<C: LocalCache + ?Sized>(
    cache: &C,
    working_set: &WorkingSet,
    at: DateTime<Utc>,
) -> CacheResult<()> {
    cache.set(PAID_KEY, &serde_json::to_string(&working_set.paid)?)?;
    cache.set(UNPAID_KEY, &serde_json::to_string(&working_set.unpaid)?)?;
    cache.set(STATUS_KEY, &serde_json::to_string(&working_set.status)?)?;
    cache.set(LAST_SYNC_KEY, &at.to_rfc3339())?;
    Ok(())
}

/// Read back a mirrored working set.
///
/// Returns `Ok(None)` when no collection has ever been cached. Missing
/// collections load as empty.
pub fn load_snapshot<C: LocalCache + ?Sized>(cache: &C) -> CacheResult<Option<CachedSnapshot>> {
    let paid = cache.get(PAID_KEY)?;
    let unpaid = cache.get(UNPAID_KEY)?;
    let status = cache.get(STATUS_KEY)?;

    if paid.is_none() && unpaid.is_none() && status.is_none() {
        return Ok(None);
    }

    let mut working_set = WorkingSet {
        paid: decode(PAID_KEY, paid)?,
        unpaid: decode(UNPAID_KEY, unpaid)?,
        status: decode(STATUS_KEY, status)?,
    };
    working_set.sort_all();

    let last_sync = match cache.get(LAST_SYNC_KEY)? {
        Some(raw) => Some(
            DateTime::parse_from_rfc3339(raw.trim())
                .map_err(|e| CacheError::Corrupt {
                    key: LAST_SYNC_KEY.to_string(),
                    reason: e.to_string(),
                })?
                .with_timezone(&Utc),
        ),
        None => None,
    };

    Ok(Some(CachedSnapshot {
        working_set,
        last_sync,
    }))
}

/// Record whether the cached data is ahead of the remote store
pub fn set_pending<C: LocalCache + ?Sized>(cache: &C, pending: bool) -> CacheResult<()> {
    cache.set(PENDING_KEY, if pending { "true" } else { "false" })
}

/// Whether the cached data holds changes never pushed to the remote store
pub fn has_pending<C: LocalCache + ?Sized>(cache: &C) -> CacheResult<bool> {
    match cache.get(PENDING_KEY)? {
        None => Ok(false),
        Some(raw) => match raw.trim() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(CacheError::Corrupt {
                key: PENDING_KEY.to_string(),
                reason: format!("expected true or false, got {other:?}"),
            }),
        },
    }
}

fn decode<T: DeserializeOwned + Default>(key: &str, raw: Option<String>) -> CacheResult<T> {
    match raw {
        Some(raw) => serde_json::from_str(&raw).map_err(|e| CacheError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        }),
        None => Ok(T::default()),
    }
}

/// In-memory cache, used in tests and when no cache file is configured
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, String>>,
    writes: Mutex<HashMap<String, usize>>,
    failing: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `set` fail, as a full browser store would
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// How many times `key` has been written
    pub fn writes_to(&self, key: &str) -> usize {
        self.writes
            .lock()
            .map(|writes| writes.get(key).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Total number of successful writes
    pub fn set_count(&self) -> usize {
        self.writes
            .lock()
            .map(|writes| writes.values().sum())
            .unwrap_or(0)
    }
}

impl LocalCache for MemoryCache {
    fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| CacheError::Unavailable("cache lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> CacheResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("storage quota exceeded".to_string()));
        }
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CacheError::Unavailable("cache lock poisoned".to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        if let Ok(mut writes) = self.writes.lock() {
            *writes.entry(key.to_string()).or_default() += 1;
        }
        Ok(())
    }
}

/// Cache persisted as a single JSON object on disk
pub struct FileCache {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileCache {
    /// Open the cache file, starting empty if it does not exist.
    ///
    /// An unreadable file is logged and replaced on the next write.
    pub fn open(path: impl AsRef<Path>) -> CacheResult<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<HashMap<String, String>>(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!("Failed to parse cache file, starting empty: {}", e);
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &HashMap<String, String>) -> CacheResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(entries)?;
        let temp = self.path.with_extension("tmp");
        std::fs::write(&temp, content)?;
        std::fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

impl LocalCache for FileCache {
    fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| CacheError::Unavailable("cache lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> CacheResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CacheError::Unavailable("cache lock poisoned".to_string()))?;
        let previous = entries.insert(key.to_string(), value.to_string());
        if let Err(e) = self.persist(&entries) {
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }
}

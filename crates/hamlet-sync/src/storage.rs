//! Client-local persistence keyed by `(user, purpose)`.
//!
//! Two values survive a restart: the last-session timestamp that opens the
//! offline window, and the current credential. Both are stored as strings
//! under a structured [`StoreKey`] so one store can hold several players
//! without key collisions.
//!
//! | Purpose | Encoding |
//! |---------|----------|
//! | [`StorePurpose::LastSession`] | RFC 3339 timestamp |
//! | [`StorePurpose::Credential`] | JSON [`SessionCredential`] |

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use hamlet_types::{SessionCredential, UserId};
use serde::{Deserialize, Serialize};

/// Errors from a [`LocalStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file or a stored value is not valid JSON.
    #[error("store JSON invalid: {0}")]
    Json(#[from] serde_json::Error),

    /// A stored value does not decode as its purpose requires.
    #[error("stored value for {key} is corrupt: {detail}")]
    Corrupt {
        /// The key whose value is bad.
        key: String,
        /// What went wrong.
        detail: String,
    },
}

/// What a stored value is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorePurpose {
    /// When the player was last seen (hidden, unloaded or claimed).
    LastSession,
    /// The current bearer credential.
    Credential,
}

impl StorePurpose {
    const fn as_str(self) -> &'static str {
        match self {
            Self::LastSession => "last_session",
            Self::Credential => "credential",
        }
    }
}

/// Structured storage key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreKey {
    /// Owning player.
    pub user: UserId,
    /// What the value is for.
    pub purpose: StorePurpose,
}

impl StoreKey {
    /// Key for the last-session timestamp of `user`.
    pub const fn last_session(user: UserId) -> Self {
        Self {
            user,
            purpose: StorePurpose::LastSession,
        }
    }

    /// Key for the credential of `user`.
    pub const fn credential(user: UserId) -> Self {
        Self {
            user,
            purpose: StorePurpose::Credential,
        }
    }
}

impl core::fmt::Display for StoreKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.user, self.purpose.as_str())
    }
}

/// String-valued persistence, plus typed accessors for each purpose.
pub trait LocalStore: Send + Sync + core::fmt::Debug {
    /// Read a raw value.
    fn get(&self, key: &StoreKey) -> Result<Option<String>, StoreError>;

    /// Write a raw value, replacing any previous one.
    fn put(&self, key: &StoreKey, value: String) -> Result<(), StoreError>;

    /// Delete a value. Missing keys are not an error.
    fn remove(&self, key: &StoreKey) -> Result<(), StoreError>;

    /// When `user` was last seen, if ever.
    fn last_session(&self, user: UserId) -> Result<Option<DateTime<Utc>>, StoreError> {
        let key = StoreKey::last_session(user);
        let Some(raw) = self.get(&key)? else {
            return Ok(None);
        };
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| StoreError::Corrupt {
                key: key.to_string(),
                detail: e.to_string(),
            })
    }

    /// Record that `user` was last seen at `at`.
    fn stamp_last_session(&self, user: UserId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.put(&StoreKey::last_session(user), at.to_rfc3339())
    }

    /// The stored credential of `user`, if any.
    fn credential(&self, user: UserId) -> Result<Option<SessionCredential>, StoreError> {
        self.get(&StoreKey::credential(user))?
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(StoreError::from)
    }

    /// Replace the stored credential of `user`.
    fn save_credential(&self, user: UserId, credential: &SessionCredential) -> Result<(), StoreError> {
        let raw = serde_json::to_string(credential)?;
        self.put(&StoreKey::credential(user), raw)
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Volatile store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<StoreKey, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, key: &StoreKey) -> Result<Option<String>, StoreError> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn put(&self, key: &StoreKey, value: String) -> Result<(), StoreError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(*key, value);
        Ok(())
    }

    fn remove(&self, key: &StoreKey) -> Result<(), StoreError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File store
// ---------------------------------------------------------------------------

/// Store backed by one JSON object on disk.
///
/// Every write rewrites the whole file through a sibling temporary file and
/// a rename, so a crash mid-write leaves the previous contents intact.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    /// Use (or later create) the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Backing file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn write_all(&self, values: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(values)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl LocalStore for FileStore {
    fn get(&self, key: &StoreKey) -> Result<Option<String>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read_all()?.remove(&key.to_string()))
    }

    fn put(&self, key: &StoreKey, value: String) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut values = self.read_all()?;
        values.insert(key.to_string(), value);
        self.write_all(&values)
    }

    fn remove(&self, key: &StoreKey) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut values = self.read_all()?;
        if values.remove(&key.to_string()).is_some() {
            self.write_all(&values)?;
        }
        Ok(())
    }
}

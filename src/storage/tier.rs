// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Storage tiers: opaque blob stores addressed by relative keys.
//!
//! The vault writes every encrypted document to a primary tier and mirrors
//! it to optional backup and archive tiers. Tiers only ever see ciphertext
//! and JSON records; they never see plaintext or key material.
//!
//! Keys are `/`-separated relative paths (`documents/<vault_id>/content.bin`).
//! Writes are atomic per key: readers observe either the previous blob or
//! the new one, never a partial write.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Error type for storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// I/O error during file operations
    Io(io::Error),
    /// JSON serialization/deserialization error
    Json(serde_json::Error),
    /// Key not present in the tier
    NotFound(String),
    /// Entity already exists
    AlreadyExists(String),
    /// Key escapes the tier root or is otherwise unusable
    InvalidKey(String),
    /// Tier root has not been created
    NotInitialized,
    /// Stored bytes did not read back as written
    IntegrityViolation(String),
    /// Tier refused the operation (offline, read-only, ...)
    Unavailable(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Io(e) => write!(f, "I/O error: {e}"),
            StorageError::Json(e) => write!(f, "JSON error: {e}"),
            StorageError::NotFound(key) => write!(f, "Not found: {key}"),
            StorageError::AlreadyExists(key) => write!(f, "Already exists: {key}"),
            StorageError::InvalidKey(key) => write!(f, "Invalid storage key: {key}"),
            StorageError::NotInitialized => write!(f, "Storage not initialized"),
            StorageError::IntegrityViolation(msg) => write!(f, "Integrity violation: {msg}"),
            StorageError::Unavailable(msg) => write!(f, "Storage unavailable: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io(e) => Some(e),
            StorageError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::NotFound {
            StorageError::NotFound(e.to_string())
        } else {
            StorageError::Io(e)
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Json(e)
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// A blob store addressed by relative keys.
pub trait StorageTier: Send + Sync {
    /// Short tier name used in locators (`primary`, `backup`, `archive`).
    fn name(&self) -> &str;

    /// Atomically store `blob` under `key`, replacing any previous value.
    fn put(&self, key: &str, blob: &[u8]) -> StorageResult<()>;

    /// Read the blob stored under `key`.
    fn get(&self, key: &str) -> StorageResult<Vec<u8>>;

    fn exists(&self, key: &str) -> bool {
        self.get(key).is_ok()
    }

    /// Round-trip probe used by the health endpoint.
    fn health_check(&self) -> StorageResult<()> {
        let key = ".health/probe";
        let probe = b"health_check_data";
        self.put(key, probe)?;
        if self.get(key)? != probe {
            return Err(StorageError::IntegrityViolation(
                "Health check data mismatch".to_string(),
            ));
        }
        Ok(())
    }
}

/// Reject keys that are empty, absolute, or climb out of the tier root.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.contains('\\') || key.contains('\0') {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    let path = Path::new(key);
    let clean = path
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !clean {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

// =============================================================================
// Filesystem tier
// =============================================================================

/// Tier backed by a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsStorageTier {
    name: String,
    root: PathBuf,
    initialized: bool,
}

impl FsStorageTier {
    /// Create a tier rooted at `root`. Call `initialize()` before use.
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            initialized: false,
        }
    }

    /// Create the root directory. Idempotent.
    pub fn initialize(&mut self) -> StorageResult<()> {
        fs::create_dir_all(&self.root)?;
        self.initialized = true;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> StorageResult<PathBuf> {
        if !self.initialized {
            return Err(StorageError::NotInitialized);
        }
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

impl StorageTier for FsStorageTier {
    fn name(&self) -> &str {
        &self.name
    }

    fn put(&self, key: &str, blob: &[u8]) -> StorageResult<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write to a unique temp file, then rename over the target.
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StorageError::InvalidKey(key.to_string()))?;
        let temp_path = path.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));
        {
            let file = File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);
            writer.write_all(blob)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        if let Err(e) = fs::rename(&temp_path, &path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.resolve(key)?;
        fs::read(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io(e)
            }
        })
    }

    fn exists(&self, key: &str) -> bool {
        self.resolve(key).map(|p| p.is_file()).unwrap_or(false)
    }
}

// =============================================================================
// In-memory tier
// =============================================================================

/// Volatile tier, used for tests and for running without a data directory.
///
/// Writes can be switched off to simulate an unreachable tier.
#[derive(Debug)]
pub struct MemoryStorageTier {
    name: String,
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    offline: AtomicBool,
}

impl MemoryStorageTier {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blobs: Mutex::new(HashMap::new()),
            offline: AtomicBool::new(false),
        }
    }

    /// Make every subsequent operation fail with `Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Keys currently stored, sorted.
    pub fn keys(&self) -> Vec<String> {
        let blobs = self
            .blobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut keys: Vec<String> = blobs.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn check_online(&self) -> StorageResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(format!("{} tier is offline", self.name)));
        }
        Ok(())
    }
}

impl StorageTier for MemoryStorageTier {
    fn name(&self) -> &str {
        &self.name
    }

    fn put(&self, key: &str, blob: &[u8]) -> StorageResult<()> {
        self.check_online()?;
        validate_key(key)?;
        self.blobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), blob.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.check_online()?;
        validate_key(key)?;
        self.blobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }
}

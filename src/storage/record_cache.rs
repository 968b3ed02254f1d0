// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! LRU cache for document records.
//!
//! Records are read on every verification and access; the cache avoids
//! re-reading and re-parsing `record.json` from the primary tier. Commits
//! go through [`RecordCache::put`] so the cache never lags the tier for
//! writes made by this process.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

use crate::models::DocumentRecord;

struct CacheEntry {
    record: DocumentRecord,
    inserted_at: Instant,
}

/// In-process LRU cache keyed by vault id.
pub struct RecordCache {
    cache: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
}

impl RecordCache {
    /// Create a cache holding at most `capacity` records for `ttl` each.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            ttl,
        }
    }

    /// Cached record, or `None` if absent or expired.
    pub fn get(&self, vault_id: &str) -> Option<DocumentRecord> {
        let mut cache = self.cache.lock().ok()?;
        if let Some(entry) = cache.get(vault_id) {
            if entry.inserted_at.elapsed() < self.ttl {
                return Some(entry.record.clone());
            }
            cache.pop(vault_id);
        }
        None
    }

    pub fn put(&self, record: &DocumentRecord) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(
                record.vault_id.clone(),
                CacheEntry {
                    record: record.clone(),
                    inserted_at: Instant::now(),
                },
            );
        }
    }

    pub fn invalidate(&self, vault_id: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.pop(vault_id);
        }
    }
}

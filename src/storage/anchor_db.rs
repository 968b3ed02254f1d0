// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded anchor database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `anchors`: immutable hash → serialized [`AnchorEntry`]. Written once per
//!   hash; a second submission of the same hash returns the first entry.
//! - `pending_anchors`: vault id → serialized [`PendingAnchor`]. Rows are
//!   added when the ledger could not be reached at upload time and removed
//!   once the reconciler has confirmed the anchor. Two documents may share
//!   an immutable hash, so the hash is not a usable key here.
//! - `in_flight_anchors`: immutable hash → serialized [`InFlightAnchor`] for
//!   a submission that was sent but not yet confirmed.

use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

// =============================================================================
// Table Definitions
// =============================================================================

/// Anchors acknowledged by a ledger: hash → AnchorEntry (JSON bytes).
const ANCHORS: TableDefinition<&str, &[u8]> = TableDefinition::new("anchors");

/// Uploads still waiting for a ledger acknowledgment: vault id → PendingAnchor.
const PENDING_ANCHORS: TableDefinition<&str, &[u8]> = TableDefinition::new("pending_anchors");

/// Sent but unconfirmed ledger transactions: hash → InFlightAnchor (JSON bytes).
const IN_FLIGHT_ANCHORS: TableDefinition<&str, &[u8]> = TableDefinition::new("in_flight_anchors");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AnchorDbError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type AnchorDbResult<T> = Result<T, AnchorDbError>;

// =============================================================================
// Rows
// =============================================================================

/// A ledger acknowledgment for one immutable hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorEntry {
    /// Ledger-specific reference (simulated id or transaction hash).
    pub anchor_ref: String,
    pub anchored_at: i64,
    /// Ledger that produced the entry (`simulated`, `evm`).
    pub ledger: String,
}

/// An upload whose anchor has not been acknowledged yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAnchor {
    pub vault_id: String,
    /// `0x`-prefixed immutable hash.
    pub immutable_hash: String,
    /// Metadata submitted alongside the hash.
    pub metadata: serde_json::Value,
    pub queued_at: i64,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// A ledger transaction that was sent and is waiting to be mined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InFlightAnchor {
    pub tx_ref: String,
    /// When the transaction was sent, unix-epoch milliseconds.
    pub sent_at: i64,
}

impl InFlightAnchor {
    /// True once `max_age_ms` has passed since the send.
    pub fn is_older_than(&self, max_age_ms: i64, now_ms: i64) -> bool {
        now_ms.saturating_sub(self.sent_at) >= max_age_ms
    }
}

// =============================================================================
// AnchorDatabase
// =============================================================================

/// Embedded ACID anchor database.
pub struct AnchorDatabase {
    db: Database,
}

impl AnchorDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> AnchorDbResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        Self::init(Database::create(path)?)
    }

    /// Volatile database for tests and for running without a data directory.
    pub fn in_memory() -> AnchorDbResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> AnchorDbResult<Self> {
        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ANCHORS)?;
            let _ = write_txn.open_table(PENDING_ANCHORS)?;
            let _ = write_txn.open_table(IN_FLIGHT_ANCHORS)?;
        }
        write_txn.commit()?;
        Ok(Self { db })
    }

    // =========================================================================
    // Anchors
    // =========================================================================

    /// Look up the anchor recorded for a hash.
    pub fn get_anchor(&self, hash: &str) -> AnchorDbResult<Option<AnchorEntry>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ANCHORS)?;
        match table.get(hash)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Record `entry` for `hash` unless one already exists.
    ///
    /// Returns the entry now stored, which is the earlier one on a repeat.
    pub fn insert_anchor_if_absent(
        &self,
        hash: &str,
        entry: &AnchorEntry,
    ) -> AnchorDbResult<AnchorEntry> {
        let write_txn = self.db.begin_write()?;
        let stored = {
            let mut table = write_txn.open_table(ANCHORS)?;
            let existing = table.get(hash)?.map(|v| v.value().to_vec());
            match existing {
                Some(bytes) => serde_json::from_slice(&bytes)?,
                None => {
                    let json = serde_json::to_vec(entry)?;
                    table.insert(hash, json.as_slice())?;
                    entry.clone()
                }
            }
        };
        write_txn.commit()?;
        Ok(stored)
    }

    // =========================================================================
    // Pending anchors
    // =========================================================================

    /// Insert or replace the pending row for a document.
    pub fn upsert_pending(&self, pending: &PendingAnchor) -> AnchorDbResult<()> {
        let json = serde_json::to_vec(pending)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(PENDING_ANCHORS)?;
            table.insert(pending.vault_id.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// All pending rows, oldest first.
    pub fn list_pending(&self) -> AnchorDbResult<Vec<PendingAnchor>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PENDING_ANCHORS)?;
        let mut rows = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            let row: PendingAnchor = serde_json::from_slice(value.value())?;
            rows.push(row);
        }
        rows.sort_by_key(|row| row.queued_at);
        Ok(rows)
    }

    /// Remove the pending row for a document. Missing rows are ignored.
    pub fn remove_pending(&self, vault_id: &str) -> AnchorDbResult<bool> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(PENDING_ANCHORS)?;
            let removed = table.remove(vault_id)?.is_some();
            removed
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// Bump the attempt counter and record the last failure.
    pub fn record_attempt(&self, vault_id: &str, error: &str) -> AnchorDbResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(PENDING_ANCHORS)?;
            let existing = table.get(vault_id)?.map(|v| v.value().to_vec());
            if let Some(bytes) = existing {
                let mut row: PendingAnchor = serde_json::from_slice(&bytes)?;
                row.attempts = row.attempts.saturating_add(1);
                row.last_error = Some(error.to_string());
                let json = serde_json::to_vec(&row)?;
                table.insert(vault_id, json.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    // =========================================================================
    // In-flight submissions
    // =========================================================================

    /// Remember the transaction sent for `hash` before waiting on it.
    pub fn record_in_flight(&self, hash: &str, in_flight: &InFlightAnchor) -> AnchorDbResult<()> {
        let json = serde_json::to_vec(in_flight)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(IN_FLIGHT_ANCHORS)?;
            table.insert(hash, json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_in_flight(&self, hash: &str) -> AnchorDbResult<Option<InFlightAnchor>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(IN_FLIGHT_ANCHORS)?;
        match table.get(hash)? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    pub fn clear_in_flight(&self, hash: &str) -> AnchorDbResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(IN_FLIGHT_ANCHORS)?;
            table.remove(hash)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Record the confirmed anchor and drop the in-flight entry in one
    /// transaction. Returns the entry now stored.
    pub fn confirm_in_flight(
        &self,
        hash: &str,
        entry: &AnchorEntry,
    ) -> AnchorDbResult<AnchorEntry> {
        let write_txn = self.db.begin_write()?;
        let stored = {
            let mut anchors = write_txn.open_table(ANCHORS)?;
            let existing = anchors.get(hash)?.map(|v| v.value().to_vec());
            let stored = match existing {
                Some(bytes) => serde_json::from_slice(&bytes)?,
                None => {
                    let json = serde_json::to_vec(entry)?;
                    anchors.insert(hash, json.as_slice())?;
                    entry.clone()
                }
            };
            let mut in_flight = write_txn.open_table(IN_FLIGHT_ANCHORS)?;
            in_flight.remove(hash)?;
            stored
        };
        write_txn.commit()?;
        Ok(stored)
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Append-only audit trail for vault documents.
//!
//! Each document carries its own trail inside its record. Entries are only
//! ever appended, never edited or removed, and their timestamps never go
//! backwards within one trail.
//!
//! Appends happen on a working copy through [`AuditLog::record`] inside the
//! document's exclusive section and reach storage with the record's commit.

use serde::Deserialize;
use utoipa::IntoParams;

use crate::models::{AuditAction, AuditEntry, DocumentRecord};

use super::{StorageResult, VaultStore};

/// Optional constraints on an audit read. Empty matches every entry.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct AuditFilter {
    /// Earliest timestamp (ms), inclusive.
    pub from: Option<i64>,
    /// Latest timestamp (ms), inclusive.
    pub to: Option<i64>,
    pub actor_id: Option<String>,
    #[param(value_type = Option<String>)]
    pub action: Option<AuditAction>,
}

impl AuditFilter {
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.from.is_none_or(|from| entry.timestamp >= from)
            && self.to.is_none_or(|to| entry.timestamp <= to)
            && self
                .actor_id
                .as_deref()
                .is_none_or(|actor| entry.actor_id == actor)
            && self.action.is_none_or(|action| entry.action == action)
    }
}

/// Audit trail accessor.
pub struct AuditLog<'a> {
    store: &'a VaultStore,
}

impl<'a> AuditLog<'a> {
    pub fn new(store: &'a VaultStore) -> Self {
        Self { store }
    }

    /// Append `entry` to an in-memory record.
    ///
    /// The timestamp is raised to the last entry's timestamp if the clock
    /// went backwards.
    pub fn record(record: &mut DocumentRecord, mut entry: AuditEntry) -> &AuditEntry {
        if let Some(last) = record.audit_trail.last() {
            if entry.timestamp < last.timestamp {
                entry.timestamp = last.timestamp;
            }
        }
        record.audit_trail.push(entry);
        &record.audit_trail[record.audit_trail.len() - 1]
    }

    /// Entries matching `filter`, in chronological order.
    pub fn read(&self, vault_id: &str, filter: &AuditFilter) -> StorageResult<Vec<AuditEntry>> {
        let mut trail = self.store.get(vault_id)?.audit_trail;
        trail.retain(|entry| filter.matches(entry));
        Ok(trail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tier::MemoryStorageTier;
    use crate::storage::vault_store::tests::sample_record;
    use std::sync::Arc;

    const ID: &str = "vault_0123456789abcdef0123456789abcdef";

    fn setup() -> VaultStore {
        let store = VaultStore::new(Arc::new(MemoryStorageTier::new("primary")));
        let mut record = sample_record(ID);
        store.put(&mut record, b"ciphertext").unwrap();
        store
    }

    #[test]
    fn create_audit_entry() {
        let entry = AuditEntry::new(AuditAction::Sign, "lender_1", 10)
            .with_anchor_ref(Some("sim-1".to_string()))
            .with_details(serde_json::json!({"role": "lender"}));

        assert_eq!(entry.action, AuditAction::Sign);
        assert_eq!(entry.actor_id, "lender_1");
        assert_eq!(entry.anchor_ref.as_deref(), Some("sim-1"));
        assert!(!entry.entry_id.is_empty());
    }

    fn append(store: &VaultStore, entry: AuditEntry) -> AuditEntry {
        let mut record = store.get(ID).unwrap();
        let stored = AuditLog::record(&mut record, entry).clone();
        store.commit(&record).unwrap();
        stored
    }

    #[test]
    fn append_and_read_entries() {
        let store = setup();
        append(&store, AuditEntry::new(AuditAction::Upload, "owner_1", 10));
        append(&store, AuditEntry::new(AuditAction::Verify, "auditor_1", 20));

        let entries = AuditLog::new(&store).read(ID, &AuditFilter::default()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, AuditAction::Upload);
        assert_eq!(entries[1].action, AuditAction::Verify);
    }

    #[test]
    fn timestamps_never_go_backwards() {
        let store = setup();
        append(&store, AuditEntry::new(AuditAction::Upload, "owner_1", 100));
        let stored = append(&store, AuditEntry::new(AuditAction::Verify, "owner_1", 50));
        assert_eq!(stored.timestamp, 100);
    }

    #[test]
    fn filter_by_actor_action_and_range() {
        let store = setup();
        append(&store, AuditEntry::new(AuditAction::Upload, "owner_1", 1));
        append(&store, AuditEntry::new(AuditAction::Access, "broker_7", 2));
        append(&store, AuditEntry::new(AuditAction::Access, "owner_1", 3));
        let log = AuditLog::new(&store);

        let by_actor = AuditFilter {
            actor_id: Some("owner_1".to_string()),
            ..Default::default()
        };
        assert_eq!(log.read(ID, &by_actor).unwrap().len(), 2);

        let by_action = AuditFilter {
            action: Some(AuditAction::Access),
            ..Default::default()
        };
        assert_eq!(log.read(ID, &by_action).unwrap().len(), 2);

        let range = AuditFilter {
            from: Some(2),
            to: Some(3),
            ..Default::default()
        };
        assert_eq!(log.read(ID, &range).unwrap().len(), 2);

        let combined = AuditFilter {
            from: Some(2),
            actor_id: Some("owner_1".to_string()),
            action: Some(AuditAction::Access),
            ..Default::default()
        };
        let entries = log.read(ID, &combined).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].timestamp, 3);
    }

    #[test]
    fn unknown_document_is_not_found() {
        let store = setup();
        let log = AuditLog::new(&store);
        assert!(log
            .read("vault_ffffffffffffffffffffffffffffffff", &AuditFilter::default())
            .is_err());
    }
}

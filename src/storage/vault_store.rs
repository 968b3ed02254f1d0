// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Durable persistence for document records and encrypted content.
//!
//! ## Commit protocol
//!
//! 1. Write the ciphertext to the primary tier. Failure aborts the upload.
//! 2. Mirror the ciphertext to backup and archive tiers. A failing mirror is
//!    logged and its locator is left off the record.
//! 3. Write `record.json` to the primary tier. This single atomic write is
//!    the commit point: until it lands, `get` reports `NotFound`.
//!
//! Later mutations (grants, signatures, audit entries, tombstones) rewrite
//! `record.json` in one atomic write, so a reader never sees half of a
//! change.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::paths::{is_valid_vault_id, StorageKeys};
use super::record_cache::RecordCache;
use super::tier::{StorageError, StorageResult, StorageTier};
use crate::models::{DocumentRecord, StorageLocators};

/// Default lifetime of a cached record.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Tiered document store.
pub struct VaultStore {
    primary: Arc<dyn StorageTier>,
    backup: Option<Arc<dyn StorageTier>>,
    archive: Option<Arc<dyn StorageTier>>,
    cache: RecordCache,
}

impl VaultStore {
    pub fn new(primary: Arc<dyn StorageTier>) -> Self {
        Self {
            primary,
            backup: None,
            archive: None,
            cache: RecordCache::new(256, DEFAULT_CACHE_TTL),
        }
    }

    pub fn with_backup(mut self, tier: Arc<dyn StorageTier>) -> Self {
        self.backup = Some(tier);
        self
    }

    pub fn with_archive(mut self, tier: Arc<dyn StorageTier>) -> Self {
        self.archive = Some(tier);
        self
    }

    pub fn with_cache(mut self, capacity: usize, ttl: Duration) -> Self {
        self.cache = RecordCache::new(capacity, ttl);
        self
    }

    /// The primary tier. Signer keys and records live here.
    pub fn primary(&self) -> &Arc<dyn StorageTier> {
        &self.primary
    }

    /// Persist a new document: ciphertext to every tier, then the record.
    ///
    /// Fills `record.storage` with the locators that were written.
    pub fn put(&self, record: &mut DocumentRecord, ciphertext: &[u8]) -> StorageResult<()> {
        let vault_id = record.vault_id.clone();
        if !is_valid_vault_id(&vault_id) {
            return Err(StorageError::InvalidKey(vault_id));
        }
        let record_key = StorageKeys::document_record(&vault_id);
        if self.primary.exists(&record_key) {
            return Err(StorageError::AlreadyExists(vault_id));
        }

        let content_key = StorageKeys::document_content(&vault_id);
        self.primary.put(&content_key, ciphertext)?;

        let mut locators = StorageLocators {
            primary: StorageKeys::locator(self.primary.name(), &content_key),
            backup: None,
            archive: None,
        };
        locators.backup = self.mirror(self.backup.as_ref(), &vault_id, &content_key, ciphertext);
        locators.archive = self.mirror(self.archive.as_ref(), &vault_id, &content_key, ciphertext);
        record.storage = locators;

        self.commit(record)?;
        debug!(vault_id = %vault_id, bytes = ciphertext.len(), "Document persisted");
        Ok(())
    }

    fn mirror(
        &self,
        tier: Option<&Arc<dyn StorageTier>>,
        vault_id: &str,
        key: &str,
        ciphertext: &[u8],
    ) -> Option<String> {
        let tier = tier?;
        match tier.put(key, ciphertext) {
            Ok(()) => Some(StorageKeys::locator(tier.name(), key)),
            Err(e) => {
                warn!(
                    vault_id = %vault_id,
                    tier = %tier.name(),
                    error = %e,
                    "Failed to mirror document content; continuing without this tier"
                );
                None
            }
        }
    }

    /// Load a committed record.
    pub fn get(&self, vault_id: &str) -> StorageResult<DocumentRecord> {
        if !is_valid_vault_id(vault_id) {
            return Err(StorageError::NotFound(vault_id.to_string()));
        }
        if let Some(record) = self.cache.get(vault_id) {
            return Ok(record);
        }
        let raw = self
            .primary
            .get(&StorageKeys::document_record(vault_id))
            .map_err(|e| match e {
                StorageError::NotFound(_) => StorageError::NotFound(vault_id.to_string()),
                other => other,
            })?;
        let record: DocumentRecord = serde_json::from_slice(&raw)?;
        self.cache.put(&record);
        Ok(record)
    }

    /// Atomically replace the stored record.
    pub fn commit(&self, record: &DocumentRecord) -> StorageResult<()> {
        let json = serde_json::to_vec_pretty(record)?;
        let key = StorageKeys::document_record(&record.vault_id);
        if let Err(e) = self.primary.put(&key, &json) {
            self.cache.invalidate(&record.vault_id);
            return Err(e);
        }
        self.cache.put(record);
        Ok(())
    }

    /// Read the ciphertext, falling back to backup then archive.
    pub fn load_content(&self, record: &DocumentRecord) -> StorageResult<Vec<u8>> {
        let key = StorageKeys::document_content(&record.vault_id);
        let mut last_error = match self.primary.get(&key) {
            Ok(blob) => return Ok(blob),
            Err(e) => e,
        };

        let mirrors = [
            (record.storage.backup.as_ref(), self.backup.as_ref()),
            (record.storage.archive.as_ref(), self.archive.as_ref()),
        ];
        for (locator, tier) in mirrors {
            let (Some(_), Some(tier)) = (locator, tier) else {
                continue;
            };
            match tier.get(&key) {
                Ok(blob) => {
                    warn!(
                        vault_id = %record.vault_id,
                        tier = %tier.name(),
                        error = %last_error,
                        "Primary content unavailable; served from mirror"
                    );
                    return Ok(blob);
                }
                Err(e) => last_error = e,
            }
        }
        Err(last_error)
    }

    /// Probe every configured tier.
    pub fn health_check(&self) -> StorageResult<()> {
        self.primary.health_check()?;
        for tier in self.backup.iter().chain(self.archive.iter()) {
            tier.health_check()?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::crypto::{hash_content, EncryptionLevel, WrappedKey};
    use crate::models::{
        AccessControl, AccessLevel, AnchorState, DocumentAnchor, DocumentMetadata,
        DocumentStatus, RetentionPolicy,
    };
    use crate::storage::tier::{FsStorageTier, MemoryStorageTier};

    pub(crate) fn sample_record(vault_id: &str) -> DocumentRecord {
        let digest = hash_content(vault_id.as_bytes());
        DocumentRecord {
            vault_id: vault_id.to_string(),
            file_id: "file-1".to_string(),
            file_name: "returns.pdf".to_string(),
            size: 10,
            mime_type: "application/pdf".to_string(),
            encryption_level: EncryptionLevel::Standard,
            access_level: AccessLevel::Private,
            content_hash: digest,
            metadata_hash: digest,
            immutable_hash: digest,
            created_at: 1_700_000_000_000,
            storage: StorageLocators::default(),
            wrapped_key: WrappedKey {
                version: 1,
                level: EncryptionLevel::Standard,
                sealed: "AAAA".to_string(),
                kdf: None,
            },
            metadata: DocumentMetadata {
                uploaded_by: "owner_1".to_string(),
                uploaded_at: 1_700_000_000_000,
                document_type: "tax_returns".to_string(),
                transaction_id: None,
                loan_id: None,
                customer_id: None,
                tags: Vec::new(),
                expires_at: None,
                retention_policy: RetentionPolicy::default(),
            },
            access_control: AccessControl::new("owner_1"),
            anchor: DocumentAnchor {
                state: AnchorState::Anchored,
                anchor_ref: Some("sim-1".to_string()),
                anchored_at: Some(1_700_000_000_000),
                submitted_at: 1_700_000_000_000,
            },
            signatures: Vec::new(),
            status: DocumentStatus::Active,
            tombstone: None,
            audit_trail: Vec::new(),
        }
    }

    const ID: &str = "vault_0123456789abcdef0123456789abcdef";

    fn tiers() -> (Arc<MemoryStorageTier>, Arc<MemoryStorageTier>, Arc<MemoryStorageTier>) {
        (
            Arc::new(MemoryStorageTier::new("primary")),
            Arc::new(MemoryStorageTier::new("backup")),
            Arc::new(MemoryStorageTier::new("archive")),
        )
    }

    #[test]
    fn put_writes_all_tiers_and_commits_record() {
        let (primary, backup, archive) = tiers();
        let store = VaultStore::new(primary.clone())
            .with_backup(backup.clone())
            .with_archive(archive.clone());

        let mut record = sample_record(ID);
        store.put(&mut record, b"ciphertext").unwrap();

        assert_eq!(record.storage.primary, format!("primary://documents/{ID}/content.bin"));
        assert!(record.storage.backup.is_some());
        assert!(record.storage.archive.is_some());
        assert_eq!(store.get(ID).unwrap(), record);
        assert_eq!(store.load_content(&record).unwrap(), b"ciphertext");
        assert_eq!(backup.keys(), vec![format!("documents/{ID}/content.bin")]);
    }

    #[test]
    fn failing_backup_is_omitted_not_fatal() {
        let (primary, backup, _) = tiers();
        backup.set_offline(true);
        let store = VaultStore::new(primary).with_backup(backup);

        let mut record = sample_record(ID);
        store.put(&mut record, b"ciphertext").unwrap();
        assert!(record.storage.backup.is_none());
        assert!(store.get(ID).is_ok());
    }

    #[test]
    fn failing_primary_aborts_and_nothing_is_visible() {
        let (primary, backup, _) = tiers();
        primary.set_offline(true);
        let store = VaultStore::new(primary.clone()).with_backup(backup);

        let mut record = sample_record(ID);
        assert!(store.put(&mut record, b"ciphertext").is_err());
        primary.set_offline(false);
        assert!(matches!(store.get(ID), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn duplicate_put_is_rejected() {
        let (primary, _, _) = tiers();
        let store = VaultStore::new(primary);
        let mut record = sample_record(ID);
        store.put(&mut record, b"one").unwrap();
        let mut again = sample_record(ID);
        assert!(matches!(
            store.put(&mut again, b"two"),
            Err(StorageError::AlreadyExists(_))
        ));
    }

    #[test]
    fn load_content_falls_back_to_backup() {
        let (primary, backup, _) = tiers();
        let store = VaultStore::new(primary.clone()).with_backup(backup);
        let mut record = sample_record(ID);
        store.put(&mut record, b"ciphertext").unwrap();

        primary.set_offline(true);
        assert_eq!(store.load_content(&record).unwrap(), b"ciphertext");
    }

    #[test]
    fn records_survive_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut tier = FsStorageTier::new("primary", dir.path());
        tier.initialize().unwrap();
        let tier = Arc::new(tier);

        let mut record = sample_record(ID);
        VaultStore::new(tier.clone())
            .put(&mut record, b"ciphertext")
            .unwrap();

        let reopened = VaultStore::new(tier);
        assert_eq!(reopened.get(ID).unwrap(), record);
    }

    #[test]
    fn unknown_or_malformed_ids_are_not_found() {
        let (primary, _, _) = tiers();
        let store = VaultStore::new(primary);
        assert!(matches!(
            store.get("vault_ffffffffffffffffffffffffffffffff"),
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(store.get("../etc"), Err(StorageError::NotFound(_))));
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Document Vault
//!
//! Public operations of the vault, wired from explicitly injected
//! collaborators (ledger, store, master key, clock).
//!
//! ## Upload
//!
//! ```text
//! validate -> hash + encrypt (worker pool) -> derive vault id
//!   -> anchor (retries, deadline, no lock held)
//!   -> queue pending anchor if the ledger did not confirm
//!   -> persist ciphertext + record with `upload` entry (one commit)
//! ```
//!
//! The queue row is written first and removed again if the commit fails,
//! so a committed pending document always has a row for the reconciler.
//!
//! ## Mutations
//!
//! Grants, revokes, signatures, soft-deletes, verifications, accesses and
//! anchor confirmations each load the record inside the document's
//! exclusive section, apply the change to a working copy, append exactly
//! one audit entry and commit the record in one atomic write. A failed
//! change commits nothing.

pub mod access;
pub mod error;
pub mod locks;
pub mod pool;
pub mod signatures;
pub mod verification;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use utoipa::ToSchema;

use crate::clock::Clock;
use crate::crypto::{
    combine, derive_vault_id, hash_content, hash_metadata, ContentHash, Digest256,
    EncryptionLevel, Encryptor, ImmutableHash, KdfParams, MasterKey,
};
use crate::ledger::{AnchorOutcome, AnchorService, LedgerAnchor, RetryPolicy};
use crate::models::{
    AccessControl, AccessLevel, AnchorState, AuditAction, AuditEntry, DocumentAnchor,
    DocumentMetadata, DocumentRecord, DocumentStatus, Permission, RetentionPolicy, Signature,
    SignerRole, StorageLocators, Tombstone,
};
use crate::storage::{AnchorDatabase, AuditFilter, AuditLog, VaultStore};

pub use access::{
    AccessControlChanges, AccessControlManager, GrantRequest, IssuedToken, TokenClaims,
};
pub use error::{VaultError, VaultResult};
pub use locks::DocumentLocks;
pub use pool::BlockingPool;
pub use signatures::{SignatureCheck, SignatureManager, SignerKeyring};
pub use verification::{LifecycleState, Verdict, VerdictReason};

/// Actor recorded for entries written by background tasks.
pub const SYSTEM_ACTOR: &str = "system";

/// Largest accepted document.
pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 50 * 1024 * 1024;

const CREATION_NONCE_SIZE: usize = 16;

// =============================================================================
// Construction
// =============================================================================

/// Tunables for a [`DocumentVault`].
#[derive(Debug, Clone)]
pub struct VaultSettings {
    pub anchor_timeout: Duration,
    pub retry: RetryPolicy,
    pub kdf: KdfParams,
    pub max_document_bytes: usize,
    pub max_token_ttl: Duration,
    /// Worker pool size; `None` uses the available cores.
    pub worker_threads: Option<usize>,
    pub default_retention: RetentionPolicy,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            anchor_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            kdf: KdfParams::default(),
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
            max_token_ttl: access::DEFAULT_MAX_TOKEN_TTL,
            worker_threads: None,
            default_retention: RetentionPolicy::default(),
        }
    }
}

/// Collaborators injected into a [`DocumentVault`].
pub struct VaultDeps {
    pub ledger: Arc<dyn LedgerAnchor>,
    pub anchor_db: Arc<AnchorDatabase>,
    pub store: VaultStore,
    pub master_key: MasterKey,
    pub clock: Arc<dyn Clock>,
    pub settings: VaultSettings,
}

// =============================================================================
// Operation inputs and outputs
// =============================================================================

/// Caller-supplied metadata for an upload. `uploadedAt` is set by the vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewDocumentMetadata {
    /// Owner of the document. Over HTTP it defaults to the calling actor.
    #[serde(default)]
    pub uploaded_by: String,
    pub document_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loan_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_policy: Option<RetentionPolicy>,
}

/// Upload options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddDocumentOptions {
    #[serde(default)]
    pub encryption_level: EncryptionLevel,
    #[serde(default)]
    pub access_level: AccessLevel,
    /// Overall anchoring deadline; the configured default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_timeout_ms: Option<u64>,
}

/// A document to add.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub file_name: String,
    pub mime_type: String,
    pub content: Vec<u8>,
    pub metadata: NewDocumentMetadata,
    pub options: AddDocumentOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddDocumentResult {
    pub vault_id: String,
    pub immutable_hash: ImmutableHash,
    pub content_hash: ContentHash,
    pub anchor_state: AnchorState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchored_at: Option<i64>,
    pub created_at: i64,
}

/// Decrypted content released against an access token.
#[derive(Debug, Clone)]
pub struct RetrievedContent {
    pub vault_id: String,
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub confirmed: Vec<String>,
    pub still_pending: usize,
}

// =============================================================================
// DocumentVault
// =============================================================================

pub struct DocumentVault {
    store: Arc<VaultStore>,
    anchors: AnchorService,
    encryptor: Arc<Encryptor>,
    access: AccessControlManager,
    signatures: SignatureManager,
    locks: DocumentLocks,
    pool: BlockingPool,
    clock: Arc<dyn Clock>,
    settings: VaultSettings,
    reconcile_lock: tokio::sync::Mutex<()>,
}

impl DocumentVault {
    pub fn new(deps: VaultDeps) -> Self {
        let VaultDeps {
            ledger,
            anchor_db,
            store,
            master_key,
            clock,
            settings,
        } = deps;

        let encryptor = Encryptor::new(&master_key, settings.kdf);
        let keyring = SignerKeyring::new(store.primary().clone(), encryptor.clone());
        let pool = match settings.worker_threads {
            Some(size) => BlockingPool::new(size),
            None => BlockingPool::with_available_parallelism(),
        };

        Self {
            anchors: AnchorService::new(ledger, anchor_db, settings.retry, settings.anchor_timeout),
            access: AccessControlManager::new(&master_key).with_max_ttl(settings.max_token_ttl),
            signatures: SignatureManager::new(keyring),
            encryptor: Arc::new(encryptor),
            store: Arc::new(store),
            locks: DocumentLocks::new(),
            pool,
            clock,
            settings,
            reconcile_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn ledger_name(&self) -> &'static str {
        self.anchors.ledger_name()
    }

    pub fn store(&self) -> &VaultStore {
        &self.store
    }

    /// Run `apply` on a working copy inside the document's exclusive
    /// section, append its audit entry and commit.
    async fn mutate<T, F>(&self, vault_id: &str, apply: F) -> VaultResult<(T, DocumentRecord)>
    where
        F: FnOnce(&mut DocumentRecord, i64) -> VaultResult<(T, AuditEntry)> + Send,
    {
        let _guard = self.locks.lock(vault_id).await;
        let mut record = self.store.get(vault_id)?;
        let now = self.clock.now_ms();
        let (out, entry) = apply(&mut record, now)?;
        AuditLog::record(&mut record, entry);
        self.store.commit(&record)?;
        Ok((out, record))
    }

    // =========================================================================
    // Upload and read
    // =========================================================================

    /// Hash, encrypt, anchor and persist a new document.
    pub async fn add_document(&self, document: NewDocument) -> VaultResult<AddDocumentResult> {
        let NewDocument {
            file_name,
            mime_type,
            content,
            metadata,
            options,
        } = document;
        validate_upload(&file_name, &metadata, content.len(), self.settings.max_document_bytes)?;

        let created_at = self.clock.now_ms();
        let metadata = DocumentMetadata {
            uploaded_by: metadata.uploaded_by.trim().to_string(),
            uploaded_at: created_at,
            document_type: metadata.document_type.trim().to_string(),
            transaction_id: metadata.transaction_id,
            loan_id: metadata.loan_id,
            customer_id: metadata.customer_id,
            tags: metadata.tags,
            expires_at: metadata.expires_at,
            retention_policy: metadata
                .retention_policy
                .unwrap_or(self.settings.default_retention),
        };
        let level = options.encryption_level;
        let size = content.len() as u64;

        let encryptor = self.encryptor.clone();
        let (metadata, content_hash, metadata_hash, immutable_hash, payload) = self
            .pool
            .run(move || -> VaultResult<_> {
                let content_hash = hash_content(&content);
                let metadata_hash = hash_metadata(&metadata)?;
                let immutable_hash = combine(&content_hash, &metadata_hash, created_at);
                let payload = encryptor.encrypt(&content, level)?;
                Ok((metadata, content_hash, metadata_hash, immutable_hash, payload))
            })
            .await??;

        let mut nonce = [0u8; CREATION_NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);
        let vault_id = derive_vault_id(&content_hash, &metadata_hash, &nonce);

        let anchor_metadata = serde_json::json!({
            "vaultId": vault_id,
            "documentType": metadata.document_type,
            "contentHash": content_hash,
            "metadataHash": metadata_hash,
            "createdAt": created_at,
        });
        let timeout = options.anchor_timeout_ms.map(Duration::from_millis);
        let outcome = self
            .anchors
            .anchor(&immutable_hash, &anchor_metadata, timeout)
            .await;

        let anchor = match &outcome {
            AnchorOutcome::Confirmed(receipt) => DocumentAnchor {
                state: AnchorState::Anchored,
                anchor_ref: Some(receipt.anchor_ref.clone()),
                anchored_at: Some(receipt.anchored_at),
                submitted_at: created_at,
            },
            AnchorOutcome::Pending { .. } => DocumentAnchor {
                state: AnchorState::AnchoredPending,
                anchor_ref: None,
                anchored_at: None,
                submitted_at: created_at,
            },
        };

        let upload_entry = AuditEntry::new(AuditAction::Upload, &metadata.uploaded_by, created_at)
            .with_anchor_ref(anchor.anchor_ref.clone())
            .with_details(serde_json::json!({
                "fileName": &file_name,
                "size": size,
                "encryptionLevel": level,
                "anchorState": anchor.state,
            }));

        let mut record = DocumentRecord {
            vault_id: vault_id.clone(),
            file_id: uuid::Uuid::new_v4().to_string(),
            file_name,
            size,
            mime_type,
            encryption_level: level,
            access_level: options.access_level,
            content_hash,
            metadata_hash,
            immutable_hash,
            created_at,
            storage: StorageLocators::default(),
            wrapped_key: payload.wrapped_key,
            access_control: AccessControl {
                public_access: options.access_level == AccessLevel::Public,
                ..AccessControl::new(&metadata.uploaded_by)
            },
            metadata,
            anchor,
            signatures: Vec::new(),
            status: DocumentStatus::Active,
            tombstone: None,
            audit_trail: vec![upload_entry],
        };

        {
            let _guard = self.locks.lock(&vault_id).await;
            let queued = match &outcome {
                AnchorOutcome::Pending { reason } => {
                    self.anchors.queue_pending(
                        &vault_id,
                        &immutable_hash,
                        anchor_metadata,
                        reason,
                        created_at,
                    )?;
                    true
                }
                AnchorOutcome::Confirmed(_) => false,
            };
            if let Err(e) = self.store.put(&mut record, &payload.ciphertext) {
                if queued {
                    if let Err(clear) = self.anchors.clear_pending(&vault_id) {
                        error!(
                            vault_id = %vault_id,
                            error = %clear,
                            "Failed to remove pending anchor for uncommitted document"
                        );
                    }
                }
                return Err(e.into());
            }
        }

        info!(
            vault_id = %vault_id,
            immutable_hash = %immutable_hash,
            anchor_state = ?record.anchor.state,
            size,
            "Document added"
        );

        Ok(AddDocumentResult {
            vault_id,
            immutable_hash,
            content_hash,
            anchor_state: record.anchor.state,
            anchor_ref: record.anchor.anchor_ref,
            anchored_at: record.anchor.anchored_at,
            created_at,
        })
    }

    pub fn get_document(&self, vault_id: &str) -> VaultResult<DocumentRecord> {
        Ok(self.store.get(vault_id)?)
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Recompute the document's hash and confirm its anchor.
    ///
    /// Without `content`, the stored ciphertext is decrypted and rehashed.
    pub async fn verify_document(
        &self,
        vault_id: &str,
        content: Option<Vec<u8>>,
        actor_id: &str,
    ) -> VaultResult<Verdict> {
        let record = self.store.get(vault_id)?;

        let computed_hash = match content {
            Some(bytes) => {
                let metadata = record.metadata.clone();
                let created_at = record.created_at;
                let hash = self
                    .pool
                    .run(move || -> VaultResult<ImmutableHash> {
                        let metadata_hash = hash_metadata(&metadata)?;
                        Ok(combine(&hash_content(&bytes), &metadata_hash, created_at))
                    })
                    .await??;
                Some(hash)
            }
            None => self.recompute_from_storage(&record).await?,
        };

        let ledger = self.anchors.query(&record.immutable_hash).await;
        if let Err(e) = &ledger {
            warn!(vault_id = %vault_id, error = %e, "Ledger query failed during verification");
        }
        let mut verdict = verification::evaluate(
            &record,
            verification::Evidence {
                computed_hash,
                ledger,
                signatures: self.signatures.check_all(&record),
                verified_at: self.clock.now_ms(),
            },
        );

        let details = serde_json::json!({
            "isValid": verdict.is_valid,
            "hashMatches": verdict.hash_matches,
            "anchorConfirmed": verdict.anchor_confirmed,
            "reasons": verdict.reasons,
        });
        let anchor_ref = verdict.anchor_ref.clone();
        let actor = actor_id.to_string();
        let (_, committed) = self
            .mutate(vault_id, move |_, now| {
                let entry = AuditEntry::new(AuditAction::Verify, actor, now)
                    .with_anchor_ref(anchor_ref)
                    .with_details(details);
                Ok(((), entry))
            })
            .await?;
        verdict.audit_trail = committed.audit_trail;

        info!(
            vault_id = %vault_id,
            is_valid = verdict.is_valid,
            reasons = ?verdict.reasons,
            "Document verified"
        );
        Ok(verdict)
    }

    /// Decrypt stored content and recompute its immutable hash.
    /// `None` when the ciphertext fails authentication.
    async fn recompute_from_storage(
        &self,
        record: &DocumentRecord,
    ) -> VaultResult<Option<ImmutableHash>> {
        let ciphertext = self.store.load_content(record)?;
        let encryptor = self.encryptor.clone();
        let wrapped = record.wrapped_key.clone();
        let level = record.encryption_level;
        let metadata = record.metadata.clone();
        let created_at = record.created_at;

        let result = self
            .pool
            .run(move || -> VaultResult<Option<ImmutableHash>> {
                let plaintext = match encryptor.decrypt(&ciphertext, &wrapped, level) {
                    Ok(plaintext) => plaintext,
                    Err(_) => return Ok(None),
                };
                let metadata_hash = hash_metadata(&metadata)?;
                Ok(Some(combine(&hash_content(&plaintext), &metadata_hash, created_at)))
            })
            .await??;

        if result.is_none() {
            warn!(vault_id = %record.vault_id, "Stored ciphertext failed authentication");
        }
        Ok(result)
    }

    // =========================================================================
    // Access control
    // =========================================================================

    /// Apply grants, revokes and an access-level change as one mutation.
    pub async fn update_access_control(
        &self,
        vault_id: &str,
        actor_id: &str,
        changes: AccessControlChanges,
    ) -> VaultResult<AccessControl> {
        let (access_control, _) = self
            .mutate(vault_id, |record, now| {
                let details = self.access.apply_changes(record, actor_id, changes, now)?;
                let entry = AuditEntry::new(AuditAction::AccessControlUpdate, actor_id, now)
                    .with_details(details);
                Ok((record.access_control.clone(), entry))
            })
            .await?;
        info!(vault_id = %vault_id, actor_id = %actor_id, "Access control updated");
        Ok(access_control)
    }

    pub async fn grant(
        &self,
        vault_id: &str,
        actor_id: &str,
        request: GrantRequest,
    ) -> VaultResult<AccessControl> {
        let changes = AccessControlChanges {
            grants: vec![request],
            ..Default::default()
        };
        self.update_access_control(vault_id, actor_id, changes).await
    }

    pub async fn revoke(
        &self,
        vault_id: &str,
        actor_id: &str,
        user_id: &str,
    ) -> VaultResult<AccessControl> {
        let changes = AccessControlChanges {
            revokes: vec![user_id.to_string()],
            ..Default::default()
        };
        self.update_access_control(vault_id, actor_id, changes).await
    }

    /// Fail with `AccessDenied` unless `user_id` currently holds `permission`.
    pub fn authorize(
        &self,
        vault_id: &str,
        user_id: &str,
        permission: Permission,
    ) -> VaultResult<()> {
        let record = self.store.get(vault_id)?;
        self.access
            .check(&record, user_id, permission, self.clock.now_ms())
    }

    /// Issue a stateless token for an existing, active document.
    ///
    /// `issuer_id` must hold `share` and every permission the token carries.
    pub fn issue_access_token(
        &self,
        vault_id: &str,
        issuer_id: &str,
        permissions: BTreeSet<Permission>,
        ttl: Duration,
    ) -> VaultResult<IssuedToken> {
        let record = self.store.get(vault_id)?;
        if record.is_tombstoned() {
            return Err(VaultError::Input(format!("{vault_id} is tombstoned")));
        }
        let now_ms = self.clock.now_ms();
        self.access
            .check(&record, issuer_id, Permission::Share, now_ms)?;
        for permission in &permissions {
            self.access.check(&record, issuer_id, *permission, now_ms)?;
        }
        self.access.issue_token(vault_id, permissions, ttl, now_ms)
    }

    /// Check a token against the current time. Lock-free.
    pub fn validate_access_token(&self, token: &str) -> VaultResult<TokenClaims> {
        self.access.validate_token(token, self.clock.now_ms())
    }

    /// Decrypt a document for the holder of a `view` or `download` token.
    pub async fn retrieve_content(
        &self,
        vault_id: &str,
        token: &str,
        actor_id: &str,
    ) -> VaultResult<RetrievedContent> {
        let claims = self.validate_access_token(token)?;
        if claims.vault_id != vault_id {
            return Err(VaultError::AccessDenied(
                "token was issued for another document".to_string(),
            ));
        }
        if !(claims.allows(Permission::View) || claims.allows(Permission::Download)) {
            return Err(VaultError::AccessDenied(
                "token does not carry view or download".to_string(),
            ));
        }

        let record = self.store.get(vault_id)?;
        let ciphertext = self.store.load_content(&record)?;
        let encryptor = self.encryptor.clone();
        let wrapped = record.wrapped_key.clone();
        let level = record.encryption_level;
        let bytes = self
            .pool
            .run(move || encryptor.decrypt(&ciphertext, &wrapped, level))
            .await??;

        let actor = actor_id.to_string();
        self.mutate(vault_id, move |_, now| {
            let entry = AuditEntry::new(AuditAction::Access, actor, now).with_details(
                serde_json::json!({
                    "tokenId": claims.token_id,
                    "permissions": claims.permissions,
                }),
            );
            Ok(((), entry))
        })
        .await?;

        Ok(RetrievedContent {
            vault_id: record.vault_id,
            file_name: record.file_name,
            mime_type: record.mime_type,
            bytes,
        })
    }

    // =========================================================================
    // Signatures
    // =========================================================================

    /// Sign the document's current immutable hash.
    ///
    /// The signer must be the owner or hold an unexpired `sign` grant.
    pub async fn sign(
        &self,
        vault_id: &str,
        signer_id: &str,
        role: SignerRole,
        supersedes: Option<String>,
    ) -> VaultResult<Signature> {
        let (signature, _) = self
            .mutate(vault_id, |record, now| {
                if record.is_tombstoned() {
                    return Err(VaultError::Input(format!(
                        "{vault_id} is tombstoned and cannot be signed"
                    )));
                }
                self.access.check(record, signer_id, Permission::Sign, now)?;
                let signature = self
                    .signatures
                    .sign(record, signer_id, role, supersedes, now)?;
                record.signatures.push(signature.clone());
                let entry = AuditEntry::new(AuditAction::Sign, signer_id, now)
                    .with_anchor_ref(record.anchor.anchor_ref.clone())
                    .with_details(serde_json::json!({
                        "signatureId": signature.signature_id,
                        "signerRole": role,
                        "documentHash": signature.document_hash,
                        "supersedes": signature.supersedes,
                    }));
                Ok((signature, entry))
            })
            .await?;
        info!(
            vault_id = %vault_id,
            signer_id = %signer_id,
            signature_id = %signature.signature_id,
            "Document signed"
        );
        Ok(signature)
    }

    pub fn list_signatures(&self, vault_id: &str) -> VaultResult<Vec<Signature>> {
        Ok(self.store.get(vault_id)?.signatures)
    }

    pub fn check_signatures(&self, vault_id: &str) -> VaultResult<Vec<SignatureCheck>> {
        let record = self.store.get(vault_id)?;
        Ok(self.signatures.check_all(&record))
    }

    // =========================================================================
    // Deletion and audit
    // =========================================================================

    /// Soft-delete: mark the record tombstoned. Only the owner may delete.
    pub async fn delete_document(
        &self,
        vault_id: &str,
        actor_id: &str,
        reason: &str,
    ) -> VaultResult<Tombstone> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(VaultError::Input("a deletion reason is required".to_string()));
        }
        let (tombstone, _) = self
            .mutate(vault_id, |record, now| {
                if record.access_control.owner != actor_id {
                    return Err(VaultError::AccessDenied(format!(
                        "only the owner may delete {vault_id}"
                    )));
                }
                if record.is_tombstoned() {
                    return Err(VaultError::Input(format!("{vault_id} is already tombstoned")));
                }
                let tombstone = Tombstone {
                    reason: reason.to_string(),
                    deleted_by: actor_id.to_string(),
                    deleted_at: now,
                    retain_until: record.metadata.retention_policy.retain_until(now),
                };
                record.status = DocumentStatus::Tombstoned;
                record.tombstone = Some(tombstone.clone());
                let entry = AuditEntry::new(AuditAction::SoftDelete, actor_id, now).with_details(
                    serde_json::json!({
                        "reason": tombstone.reason,
                        "retainUntil": tombstone.retain_until,
                    }),
                );
                Ok((tombstone, entry))
            })
            .await?;
        info!(vault_id = %vault_id, actor_id = %actor_id, "Document tombstoned");
        Ok(tombstone)
    }

    /// Audit entries of a document matching `filter`, oldest first.
    pub fn read_audit(&self, vault_id: &str, filter: &AuditFilter) -> VaultResult<Vec<AuditEntry>> {
        Ok(AuditLog::new(&self.store).read(vault_id, filter)?)
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Retry every pending anchor once; record confirmations on documents.
    pub async fn reconcile_pending(&self) -> VaultResult<ReconcileReport> {
        let _running = self.reconcile_lock.lock().await;
        let mut report = ReconcileReport::default();

        for row in self.anchors.pending()? {
            let hash: Digest256 = match row.immutable_hash.parse() {
                Ok(hash) => hash,
                Err(e) => {
                    warn!(vault_id = %row.vault_id, error = %e, "Dropping malformed pending anchor");
                    self.anchors.clear_pending(&row.vault_id)?;
                    continue;
                }
            };

            // An upload holds the document lock from queueing to commit.
            let current = {
                let _guard = self.locks.lock(&row.vault_id).await;
                self.store.get(&row.vault_id)
            };
            match current {
                Ok(record) if !record.is_anchor_pending() => {
                    self.anchors.clear_pending(&row.vault_id)?;
                    continue;
                }
                Ok(_) => {}
                Err(crate::storage::StorageError::NotFound(_)) => {
                    warn!(vault_id = %row.vault_id, "Pending anchor has no document; dropping");
                    self.anchors.clear_pending(&row.vault_id)?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            match self.anchors.submit_once(&hash, &row.metadata).await {
                Ok(receipt) => {
                    self.mutate(&row.vault_id, |record, now| {
                        record.anchor.state = AnchorState::Anchored;
                        record.anchor.anchor_ref = Some(receipt.anchor_ref.clone());
                        record.anchor.anchored_at = Some(receipt.anchored_at);
                        let entry = AuditEntry::new(AuditAction::AnchorConfirmed, SYSTEM_ACTOR, now)
                            .with_anchor_ref(Some(receipt.anchor_ref.clone()))
                            .with_details(serde_json::json!({
                                "anchoredAt": receipt.anchored_at,
                                "attempts": row.attempts + 1,
                            }));
                        Ok(((), entry))
                    })
                    .await?;
                    self.anchors.clear_pending(&row.vault_id)?;
                    info!(
                        vault_id = %row.vault_id,
                        anchor_ref = %receipt.anchor_ref,
                        "Pending anchor confirmed"
                    );
                    report.confirmed.push(row.vault_id);
                }
                Err(e) => {
                    warn!(vault_id = %row.vault_id, error = %e, "Pending anchor still unconfirmed");
                    self.anchors
                        .record_failure(&row.vault_id, &e.to_string())?;
                    report.still_pending += 1;
                }
            }
        }
        Ok(report)
    }

    /// Probe storage tiers.
    pub fn health_check(&self) -> VaultResult<()> {
        Ok(self.store.health_check()?)
    }
}

fn validate_upload(
    file_name: &str,
    metadata: &NewDocumentMetadata,
    size: usize,
    max_size: usize,
) -> VaultResult<()> {
    if file_name.trim().is_empty() {
        return Err(VaultError::Input("fileName is required".to_string()));
    }
    if metadata.uploaded_by.trim().is_empty() {
        return Err(VaultError::Input("metadata.uploadedBy is required".to_string()));
    }
    if metadata.document_type.trim().is_empty() {
        return Err(VaultError::Input("metadata.documentType is required".to_string()));
    }
    if size > max_size {
        return Err(VaultError::Input(format!(
            "document is {size} bytes; the limit is {max_size}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ledger::SimulatedLedger;
    use crate::storage::{MemoryStorageTier, StorageKeys, StorageTier};

    const T0: i64 = 1_700_000_000_000;

    struct Harness {
        vault: Arc<DocumentVault>,
        clock: Arc<ManualClock>,
        ledger: Arc<SimulatedLedger>,
        primary: Arc<MemoryStorageTier>,
        backup: Arc<MemoryStorageTier>,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(T0));
        let anchor_db = Arc::new(AnchorDatabase::in_memory().unwrap());
        let ledger = Arc::new(SimulatedLedger::new(anchor_db.clone(), clock.clone()));
        let primary = Arc::new(MemoryStorageTier::new("primary"));
        let backup = Arc::new(MemoryStorageTier::new("backup"));
        let store = VaultStore::new(primary.clone()).with_backup(backup.clone());
        let settings = VaultSettings {
            anchor_timeout: Duration::from_millis(500),
            retry: RetryPolicy {
                max_retries: 1,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
            },
            kdf: KdfParams {
                memory_kib: 8,
                iterations: 1,
                parallelism: 1,
            },
            worker_threads: Some(2),
            ..Default::default()
        };
        let vault = DocumentVault::new(VaultDeps {
            ledger: ledger.clone(),
            anchor_db,
            store,
            master_key: MasterKey::from_bytes([5u8; 32]),
            clock: clock.clone(),
            settings,
        });
        Harness {
            vault: Arc::new(vault),
            clock,
            ledger,
            primary,
            backup,
        }
    }

    fn tax_return(content: &[u8]) -> NewDocument {
        NewDocument {
            file_name: "returns-2025.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            content: content.to_vec(),
            metadata: NewDocumentMetadata {
                uploaded_by: "owner_1".to_string(),
                document_type: "tax_returns".to_string(),
                transaction_id: None,
                loan_id: Some("loan_9".to_string()),
                customer_id: None,
                tags: vec!["2025".to_string()],
                expires_at: None,
                retention_policy: None,
            },
            options: AddDocumentOptions::default(),
        }
    }

    fn audit_len(h: &Harness, vault_id: &str) -> usize {
        h.vault.get_document(vault_id).unwrap().audit_trail.len()
    }

    #[tokio::test]
    async fn tax_return_scenario() {
        let h = harness();
        let added = h.vault.add_document(tax_return(b"ABCDEFGHIJ")).await.unwrap();

        let record = h.vault.get_document(&added.vault_id).unwrap();
        let expected = combine(
            &hash_content(b"ABCDEFGHIJ"),
            &hash_metadata(&record.metadata).unwrap(),
            T0,
        );
        assert_eq!(added.immutable_hash, expected);
        assert_eq!(added.anchor_state, AnchorState::Anchored);
        assert!(added.anchor_ref.as_deref().unwrap().starts_with("sim-"));

        let ok = h
            .vault
            .verify_document(&added.vault_id, Some(b"ABCDEFGHIJ".to_vec()), "auditor_1")
            .await
            .unwrap();
        assert!(ok.is_valid);
        assert!(ok.hash_matches);
        assert!(ok.reasons.is_empty());

        let bad = h
            .vault
            .verify_document(&added.vault_id, Some(b"ABCDEFGHIK".to_vec()), "auditor_1")
            .await
            .unwrap();
        assert!(!bad.is_valid);
        assert!(!bad.hash_matches);
        assert_eq!(bad.reasons, vec![VerdictReason::HashMismatch]);
    }

    #[tokio::test]
    async fn verify_without_bytes_uses_stored_ciphertext() {
        let h = harness();
        let added = h.vault.add_document(tax_return(b"ABCDEFGHIJ")).await.unwrap();
        let verdict = h
            .vault
            .verify_document(&added.vault_id, None, "auditor_1")
            .await
            .unwrap();
        assert!(verdict.is_valid);
        assert_eq!(verdict.computed_hash, Some(added.immutable_hash));
    }

    #[tokio::test]
    async fn tampered_ciphertext_is_reported_not_thrown() {
        let h = harness();
        let added = h.vault.add_document(tax_return(b"ABCDEFGHIJ")).await.unwrap();
        let key = StorageKeys::document_content(&added.vault_id);
        let mut blob = h.primary.get(&key).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        h.primary.put(&key, &blob).unwrap();

        let verdict = h
            .vault
            .verify_document(&added.vault_id, None, "auditor_1")
            .await
            .unwrap();
        assert!(!verdict.is_valid);
        assert_eq!(verdict.reasons, vec![VerdictReason::CiphertextRejected]);
    }

    #[tokio::test]
    async fn same_inputs_same_hash_distinct_vault_ids() {
        let h = harness();
        let a = h.vault.add_document(tax_return(b"same")).await.unwrap();
        let b = h.vault.add_document(tax_return(b"same")).await.unwrap();
        assert_eq!(a.immutable_hash, b.immutable_hash);
        assert_ne!(a.vault_id, b.vault_id);
        assert_eq!(a.anchor_ref, b.anchor_ref);

        h.clock.advance(Duration::from_millis(1));
        let c = h.vault.add_document(tax_return(b"same")).await.unwrap();
        assert_ne!(a.immutable_hash, c.immutable_hash);
    }

    #[tokio::test]
    async fn empty_document_is_accepted() {
        let h = harness();
        let added = h.vault.add_document(tax_return(b"")).await.unwrap();
        let record = h.vault.get_document(&added.vault_id).unwrap();
        assert_eq!(record.size, 0);
        assert_eq!(record.content_hash, hash_content(b""));
    }

    #[tokio::test]
    async fn invalid_uploads_have_no_side_effects() {
        let h = harness();
        let mut doc = tax_return(b"x");
        doc.metadata.uploaded_by = "  ".to_string();
        assert!(matches!(
            h.vault.add_document(doc).await,
            Err(VaultError::Input(_))
        ));
        let mut doc = tax_return(b"x");
        doc.file_name = String::new();
        assert!(h.vault.add_document(doc).await.is_err());
        assert!(h.primary.keys().is_empty());
    }

    #[tokio::test]
    async fn every_mutation_appends_exactly_one_entry() {
        let h = harness();
        let added = h.vault.add_document(tax_return(b"ABCDEFGHIJ")).await.unwrap();
        let id = added.vault_id.as_str();
        assert_eq!(audit_len(&h, id), 1);

        h.vault.verify_document(id, None, "auditor_1").await.unwrap();
        assert_eq!(audit_len(&h, id), 2);

        h.vault
            .grant(
                id,
                "owner_1",
                GrantRequest {
                    user_id: "lender_1".to_string(),
                    role: "lender".to_string(),
                    permissions: [Permission::View, Permission::Sign].into_iter().collect(),
                    expires_at: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(audit_len(&h, id), 3);

        h.vault
            .sign(id, "lender_1", SignerRole::Lender, None)
            .await
            .unwrap();
        assert_eq!(audit_len(&h, id), 4);

        h.vault.revoke(id, "owner_1", "lender_1").await.unwrap();
        assert_eq!(audit_len(&h, id), 5);

        h.vault.delete_document(id, "owner_1", "duplicate upload").await.unwrap();
        assert_eq!(audit_len(&h, id), 6);

        let actions: Vec<AuditAction> = h
            .vault
            .read_audit(id, &AuditFilter::default())
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(
            actions,
            vec![
                AuditAction::Upload,
                AuditAction::Verify,
                AuditAction::AccessControlUpdate,
                AuditAction::Sign,
                AuditAction::AccessControlUpdate,
                AuditAction::SoftDelete,
            ]
        );
    }

    #[tokio::test]
    async fn failed_mutations_append_nothing() {
        let h = harness();
        let added = h.vault.add_document(tax_return(b"doc")).await.unwrap();
        let id = added.vault_id.as_str();

        assert!(matches!(
            h.vault.sign(id, "stranger", SignerRole::Vendor, None).await,
            Err(VaultError::AccessDenied(_))
        ));
        assert!(h.vault.revoke(id, "owner_1", "nobody").await.is_err());
        assert!(matches!(
            h.vault.delete_document(id, "stranger", "spite").await,
            Err(VaultError::AccessDenied(_))
        ));
        assert_eq!(audit_len(&h, id), 1);
    }

    #[tokio::test]
    async fn tombstone_keeps_record_and_history() {
        let h = harness();
        let added = h.vault.add_document(tax_return(b"doc")).await.unwrap();
        let id = added.vault_id.as_str();
        let before = h.vault.get_document(id).unwrap().audit_trail;

        h.clock.advance(Duration::from_secs(1));
        let tombstone = h.vault.delete_document(id, "owner_1", "customer request").await.unwrap();
        assert_eq!(tombstone.retain_until, RetentionPolicy::default().retain_until(T0 + 1_000));

        let record = h.vault.get_document(id).unwrap();
        assert!(record.is_tombstoned());
        assert_eq!(&record.audit_trail[..before.len()], &before[..]);
        assert!(h.primary.exists(&StorageKeys::document_content(id)));

        assert!(matches!(
            h.vault.delete_document(id, "owner_1", "again").await,
            Err(VaultError::Input(_))
        ));
        assert!(matches!(
            h.vault.sign(id, "owner_1", SignerRole::Lender, None).await,
            Err(VaultError::Input(_))
        ));

        let verdict = h.vault.verify_document(id, None, "auditor_1").await.unwrap();
        assert!(verdict.hash_matches);
        assert_eq!(verdict.state, LifecycleState::Tombstoned);
    }

    #[tokio::test]
    async fn signatures_only_grow_and_corrections_reference_prior() {
        let h = harness();
        let added = h.vault.add_document(tax_return(b"doc")).await.unwrap();
        let id = added.vault_id.as_str();

        let first = h.vault.sign(id, "owner_1", SignerRole::Borrower, None).await.unwrap();
        let correction = h
            .vault
            .sign(id, "owner_1", SignerRole::Borrower, Some(first.signature_id.clone()))
            .await
            .unwrap();

        let list = h.vault.list_signatures(id).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0], first);
        assert_eq!(list[1].supersedes.as_deref(), Some(first.signature_id.as_str()));

        let checks = h.vault.check_signatures(id).unwrap();
        assert!(checks.iter().all(|c| c.valid));
        assert_eq!(checks[0].superseded_by.as_deref(), Some(correction.signature_id.as_str()));
    }

    #[tokio::test]
    async fn concurrent_signers_never_lose_entries() {
        let h = harness();
        let added = h.vault.add_document(tax_return(b"doc")).await.unwrap();
        let id = added.vault_id.clone();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let vault = h.vault.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                vault.sign(&id, "owner_1", SignerRole::Lender, None).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let record = h.vault.get_document(&id).unwrap();
        assert_eq!(record.signatures.len(), 8);
        assert_eq!(record.audit_trail.len(), 9);
    }

    #[tokio::test]
    async fn token_lifecycle_and_content_retrieval() {
        let h = harness();
        let added = h.vault.add_document(tax_return(b"ABCDEFGHIJ")).await.unwrap();
        let id = added.vault_id.as_str();

        let issued = h
            .vault
            .issue_access_token(id, "owner_1", [Permission::Download].into_iter().collect(), Duration::from_secs(60))
            .unwrap();

        h.clock.advance(Duration::from_secs(59));
        assert!(h.vault.validate_access_token(&issued.token).is_ok());
        let content = h.vault.retrieve_content(id, &issued.token, "broker_7").await.unwrap();
        assert_eq!(content.bytes, b"ABCDEFGHIJ");
        assert_eq!(content.mime_type, "application/pdf");
        let last = h
            .vault
            .read_audit(id, &AuditFilter::default())
            .unwrap()
            .pop()
            .unwrap();
        assert_eq!(last.action, AuditAction::Access);
        assert_eq!(last.actor_id, "broker_7");

        h.clock.advance(Duration::from_secs(2));
        assert!(matches!(
            h.vault.validate_access_token(&issued.token),
            Err(VaultError::AccessDenied(_))
        ));
        assert!(h.vault.retrieve_content(id, &issued.token, "broker_7").await.is_err());
    }

    #[tokio::test]
    async fn token_scope_is_enforced() {
        let h = harness();
        let a = h.vault.add_document(tax_return(b"a")).await.unwrap();
        let b = h.vault.add_document(tax_return(b"b")).await.unwrap();

        let sign_only = h
            .vault
            .issue_access_token(&a.vault_id, "owner_1", [Permission::Sign].into_iter().collect(), Duration::from_secs(60))
            .unwrap();
        assert!(matches!(
            h.vault.retrieve_content(&a.vault_id, &sign_only.token, "x").await,
            Err(VaultError::AccessDenied(_))
        ));

        let view_a = h
            .vault
            .issue_access_token(&a.vault_id, "owner_1", [Permission::View].into_iter().collect(), Duration::from_secs(60))
            .unwrap();
        assert!(matches!(
            h.vault.retrieve_content(&b.vault_id, &view_a.token, "x").await,
            Err(VaultError::AccessDenied(_))
        ));

        assert!(matches!(
            h.vault.issue_access_token(
                "vault_ffffffffffffffffffffffffffffffff",
                "owner_1",
                [Permission::View].into_iter().collect(),
                Duration::from_secs(60)
            ),
            Err(VaultError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn token_permissions_are_capped_by_the_issuer() {
        let h = harness();
        let added = h.vault.add_document(tax_return(b"secret")).await.unwrap();
        let id = added.vault_id.as_str();
        h.vault
            .grant(
                id,
                "owner_1",
                GrantRequest {
                    user_id: "broker_7".to_string(),
                    role: "broker".to_string(),
                    permissions: [Permission::Share, Permission::View].into_iter().collect(),
                    expires_at: None,
                },
            )
            .await
            .unwrap();

        assert!(matches!(
            h.vault.issue_access_token(
                id,
                "broker_7",
                [Permission::Download].into_iter().collect(),
                Duration::from_secs(60)
            ),
            Err(VaultError::AccessDenied(_))
        ));
        assert!(matches!(
            h.vault.issue_access_token(
                id,
                "stranger",
                [Permission::View].into_iter().collect(),
                Duration::from_secs(60)
            ),
            Err(VaultError::AccessDenied(_))
        ));

        let view = h
            .vault
            .issue_access_token(id, "broker_7", [Permission::View].into_iter().collect(), Duration::from_secs(60))
            .unwrap();
        assert!(view.permissions.contains(&Permission::View));
    }

    #[tokio::test]
    async fn ledger_outage_degrades_to_pending_then_reconciles() {
        let h = harness();
        h.ledger.set_offline(true);

        let added = h.vault.add_document(tax_return(b"ABCDEFGHIJ")).await.unwrap();
        assert_eq!(added.anchor_state, AnchorState::AnchoredPending);
        assert!(added.anchor_ref.is_none());
        let id = added.vault_id.as_str();

        let verdict = h.vault.verify_document(id, None, "auditor_1").await.unwrap();
        assert!(verdict.hash_matches);
        assert!(verdict.anchor_pending);
        assert!(!verdict.is_valid);
        assert_eq!(verdict.reasons, vec![VerdictReason::AnchorPending]);

        let report = h.vault.reconcile_pending().await.unwrap();
        assert!(report.confirmed.is_empty());
        assert_eq!(report.still_pending, 1);

        h.ledger.set_offline(false);
        let report = h.vault.reconcile_pending().await.unwrap();
        assert_eq!(report.confirmed, vec![id.to_string()]);

        let record = h.vault.get_document(id).unwrap();
        assert_eq!(record.anchor.state, AnchorState::Anchored);
        assert_eq!(
            record.audit_trail.last().map(|e| e.action),
            Some(AuditAction::AnchorConfirmed)
        );

        let verdict = h.vault.verify_document(id, None, "auditor_1").await.unwrap();
        assert!(verdict.is_valid);

        let report = h.vault.reconcile_pending().await.unwrap();
        assert_eq!(report, ReconcileReport::default());
    }

    #[tokio::test]
    async fn identical_uploads_during_outage_both_reconcile() {
        let h = harness();
        h.ledger.set_offline(true);

        let a = h.vault.add_document(tax_return(b"same")).await.unwrap();
        let b = h.vault.add_document(tax_return(b"same")).await.unwrap();
        assert_eq!(a.immutable_hash, b.immutable_hash);
        assert_ne!(a.vault_id, b.vault_id);
        assert_eq!(h.vault.anchors.pending().unwrap().len(), 2);

        h.ledger.set_offline(false);
        let report = h.vault.reconcile_pending().await.unwrap();
        assert_eq!(report.confirmed.len(), 2);
        assert_eq!(report.still_pending, 0);

        for id in [&a.vault_id, &b.vault_id] {
            let record = h.vault.get_document(id).unwrap();
            assert_eq!(record.anchor.state, AnchorState::Anchored);
            assert!(record.anchor.anchor_ref.is_some());
            assert_eq!(
                record.audit_trail.last().map(|e| e.action),
                Some(AuditAction::AnchorConfirmed)
            );
        }

        let report = h.vault.reconcile_pending().await.unwrap();
        assert_eq!(report, ReconcileReport::default());
    }

    #[tokio::test]
    async fn failed_commit_leaves_no_pending_anchor() {
        let h = harness();
        h.ledger.set_offline(true);
        h.primary.set_offline(true);

        assert!(matches!(
            h.vault.add_document(tax_return(b"doc")).await,
            Err(VaultError::Storage(_))
        ));
        assert!(h.vault.anchors.pending().unwrap().is_empty());

        h.primary.set_offline(false);
        let added = h.vault.add_document(tax_return(b"doc")).await.unwrap();
        let pending = h.vault.anchors.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].vault_id, added.vault_id);
    }

    #[tokio::test]
    async fn backup_outage_does_not_fail_upload() {
        let h = harness();
        h.backup.set_offline(true);
        let added = h.vault.add_document(tax_return(b"doc")).await.unwrap();
        let record = h.vault.get_document(&added.vault_id).unwrap();
        assert!(record.storage.backup.is_none());
        assert!(record.storage.primary.starts_with("primary://"));
    }

    #[tokio::test]
    async fn primary_outage_fails_upload_cleanly() {
        let h = harness();
        h.primary.set_offline(true);
        assert!(matches!(
            h.vault.add_document(tax_return(b"doc")).await,
            Err(VaultError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn unknown_document_is_not_found() {
        let h = harness();
        let missing = "vault_ffffffffffffffffffffffffffffffff";
        assert!(matches!(h.vault.get_document(missing), Err(VaultError::NotFound(_))));
        assert!(matches!(
            h.vault.verify_document(missing, None, "x").await,
            Err(VaultError::NotFound(_))
        ));
        assert!(matches!(
            h.vault.sign(missing, "x", SignerRole::Lender, None).await,
            Err(VaultError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn high_level_documents_round_trip() {
        let h = harness();
        let mut doc = tax_return(b"ABCDEFGHIJ");
        doc.options.encryption_level = EncryptionLevel::High;
        let added = h.vault.add_document(doc).await.unwrap();

        let record = h.vault.get_document(&added.vault_id).unwrap();
        assert_eq!(record.encryption_level, EncryptionLevel::High);
        assert!(record.wrapped_key.kdf.is_some());

        let verdict = h
            .vault
            .verify_document(&added.vault_id, None, "auditor_1")
            .await
            .unwrap();
        assert!(verdict.is_valid);
    }

    #[tokio::test]
    async fn access_level_public_is_recorded() {
        let h = harness();
        let added = h.vault.add_document(tax_return(b"doc")).await.unwrap();
        let acl = h
            .vault
            .update_access_control(
                &added.vault_id,
                "owner_1",
                AccessControlChanges {
                    access_level: Some(AccessLevel::Public),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(acl.public_access);
        let record = h.vault.get_document(&added.vault_id).unwrap();
        assert_eq!(record.access_level, AccessLevel::Public);
    }
}

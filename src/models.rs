// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Vault Data Model
//!
//! Persisted shapes for documents held by the vault. All types serialize as
//! camelCase JSON; dates are unix-epoch milliseconds and digests are
//! `0x`-prefixed lower-case hex.
//!
//! ## Ownership
//!
//! A [`DocumentRecord`] is owned by the vault. Application code refers to
//! it only through its `vault_id`. The signature list and the audit trail
//! on a record only ever grow.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::crypto::{ContentHash, EncryptionLevel, ImmutableHash, MetadataHash, WrappedKey};

/// Default retention: seven years.
pub const DEFAULT_RETENTION_DAYS: u32 = 2555;

// =============================================================================
// Enumerations
// =============================================================================

/// Visibility class of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum AccessLevel {
    /// Only the owner and explicit grantees.
    #[default]
    Private,
    /// Explicit grantees plus token holders.
    Restricted,
    /// Any authenticated party may view.
    Public,
}

/// A single permission carried by a grant or token.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    View,
    Download,
    Sign,
    Share,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Permission::View => "view",
            Permission::Download => "download",
            Permission::Sign => "sign",
            Permission::Share => "share",
        };
        f.write_str(name)
    }
}

/// Capacity in which a party signs a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SignerRole {
    Lender,
    Broker,
    Borrower,
    Vendor,
    Auditor,
}

impl fmt::Display for SignerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignerRole::Lender => "lender",
            SignerRole::Broker => "broker",
            SignerRole::Borrower => "borrower",
            SignerRole::Vendor => "vendor",
            SignerRole::Auditor => "auditor",
        };
        f.write_str(name)
    }
}

/// Lifecycle state of a stored document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    #[default]
    Active,
    /// Soft-deleted. Content and audit trail are retained.
    Tombstoned,
}

/// Ledger anchoring state of a document's immutable hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum AnchorState {
    /// The ledger acknowledged the hash.
    Anchored,
    /// The ledger was unreachable; a local pending record awaits reconciliation.
    AnchoredPending,
}

/// Action recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum AuditAction {
    Upload,
    Verify,
    Access,
    Sign,
    AccessControlUpdate,
    SoftDelete,
    AnchorConfirmed,
}

// =============================================================================
// Metadata
// =============================================================================

/// How long a document must be retained after deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetentionPolicy {
    pub retain_days: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            retain_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

impl RetentionPolicy {
    pub fn retain_until(&self, from_ms: i64) -> i64 {
        from_ms.saturating_add(i64::from(self.retain_days) * 86_400_000)
    }
}

/// Descriptive metadata hashed into the document's identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    pub uploaded_by: String,
    pub uploaded_at: i64,
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
    #[serde(default)]
    pub retention_policy: RetentionPolicy,
}

// =============================================================================
// Access control
// =============================================================================

/// Permissions granted to one user on one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccessGrant {
    pub user_id: String,
    pub role: String,
    pub permissions: BTreeSet<Permission>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    pub granted_at: i64,
    pub granted_by: String,
}

impl AccessGrant {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        matches!(self.expires_at, Some(exp) if now_ms >= exp)
    }

    pub fn allows(&self, permission: Permission, now_ms: i64) -> bool {
        !self.is_expired(now_ms) && self.permissions.contains(&permission)
    }
}

/// Sharing state of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccessControl {
    pub owner: String,
    #[serde(default)]
    pub shared_with: Vec<AccessGrant>,
    /// Mirrors `access_level == public`: anyone may view.
    #[serde(default)]
    pub public_access: bool,
}

impl AccessControl {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            shared_with: Vec::new(),
            public_access: false,
        }
    }

    pub fn grant_for(&self, user_id: &str) -> Option<&AccessGrant> {
        self.shared_with.iter().find(|g| g.user_id == user_id)
    }

    /// Whether `user_id` holds `permission`. The owner holds every permission.
    pub fn permits(&self, user_id: &str, permission: Permission, now_ms: i64) -> bool {
        self.owner == user_id
            || (self.public_access && permission == Permission::View)
            || self
                .grant_for(user_id)
                .is_some_and(|g| g.allows(permission, now_ms))
    }
}

// =============================================================================
// Signatures, anchoring, audit
// =============================================================================

/// A signer-bound signature over one specific document hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    pub signature_id: String,
    pub signer_id: String,
    pub signer_role: SignerRole,
    /// Compact 64-byte ECDSA secp256k1 signature, 0x hex.
    pub signature: String,
    /// SEC1 compressed public key, 0x hex.
    pub public_key: String,
    pub timestamp: i64,
    pub document_hash: ImmutableHash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<String>,
}

/// Anchoring status stored on the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DocumentAnchor {
    pub state: AnchorState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchored_at: Option<i64>,
    pub submitted_at: i64,
}

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub entry_id: String,
    pub action: AuditAction,
    pub actor_id: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
}

impl AuditEntry {
    pub fn new(action: AuditAction, actor_id: impl Into<String>, timestamp: i64) -> Self {
        Self {
            entry_id: uuid::Uuid::new_v4().to_string(),
            action,
            actor_id: actor_id.into(),
            timestamp,
            anchor_ref: None,
            details: None,
        }
    }

    pub fn with_anchor_ref(mut self, anchor_ref: Option<String>) -> Self {
        self.anchor_ref = anchor_ref;
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Soft-delete marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Tombstone {
    pub reason: String,
    pub deleted_by: String,
    pub deleted_at: i64,
    pub retain_until: i64,
}

/// Where each copy of the encrypted content lives.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageLocators {
    pub primary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<String>,
}

// =============================================================================
// Document record
// =============================================================================

/// The persisted vault record for one uploaded document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub vault_id: String,
    pub file_id: String,
    pub file_name: String,
    pub size: u64,
    pub mime_type: String,
    pub encryption_level: EncryptionLevel,
    pub access_level: AccessLevel,
    pub content_hash: ContentHash,
    pub metadata_hash: MetadataHash,
    pub immutable_hash: ImmutableHash,
    pub created_at: i64,
    pub storage: StorageLocators,
    pub wrapped_key: WrappedKey,
    pub metadata: DocumentMetadata,
    pub access_control: AccessControl,
    pub anchor: DocumentAnchor,
    #[serde(default)]
    pub signatures: Vec<Signature>,
    #[serde(default)]
    pub status: DocumentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tombstone: Option<Tombstone>,
    #[serde(default)]
    pub audit_trail: Vec<AuditEntry>,
}

impl DocumentRecord {
    pub fn is_tombstoned(&self) -> bool {
        self.status == DocumentStatus::Tombstoned
    }

    pub fn is_anchor_pending(&self) -> bool {
        self.anchor.state == AnchorState::AnchoredPending
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Verification verdicts.
//!
//! A verdict is always returned for an existing document: tampering and
//! ledger trouble are reported as [`VerdictReason`]s, never as errors.
//!
//! ```text
//! Uploading -> Anchored -> Verified | VerificationFailed -> Tombstoned
//! ```

use serde::Serialize;
use utoipa::ToSchema;

use super::signatures::SignatureCheck;
use crate::crypto::ImmutableHash;
use crate::ledger::{AnchorStatus, LedgerError};
use crate::models::{AuditEntry, DocumentRecord};

/// Lifecycle state of a document as seen by a verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleState {
    Uploading,
    Anchored,
    Verified,
    VerificationFailed,
    Tombstoned,
}

/// Why a verification was not (fully) positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum VerdictReason {
    /// Recomputed hash differs from the stored immutable hash.
    HashMismatch,
    /// The ledger has no record of the hash.
    NotAnchored,
    /// Anchoring is still queued for reconciliation.
    AnchorPending,
    /// The ledger could not be queried.
    LedgerUnavailable,
    /// Stored ciphertext failed authentication.
    CiphertextRejected,
    /// The document is soft-deleted; the verdict is informational.
    Tombstoned,
}

/// Result of verifying one document.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub vault_id: String,
    pub is_valid: bool,
    pub hash_matches: bool,
    pub anchor_confirmed: bool,
    pub anchor_pending: bool,
    pub state: LifecycleState,
    pub reasons: Vec<VerdictReason>,
    /// Absent when the content could not be recovered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub computed_hash: Option<ImmutableHash>,
    pub stored_hash: ImmutableHash,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor_ref: Option<String>,
    pub verified_at: i64,
    pub signatures: Vec<SignatureCheck>,
    pub audit_trail: Vec<AuditEntry>,
}

/// Inputs gathered by the vault for one verification.
pub struct Evidence {
    /// Recomputed immutable hash, or `None` if the ciphertext was rejected.
    pub computed_hash: Option<ImmutableHash>,
    pub ledger: Result<AnchorStatus, LedgerError>,
    pub signatures: Vec<SignatureCheck>,
    pub verified_at: i64,
}

/// Combine a record and the gathered evidence into a verdict.
///
/// `audit_trail` is left empty; the vault fills it after appending the
/// verify entry.
pub fn evaluate(record: &DocumentRecord, evidence: Evidence) -> Verdict {
    let mut reasons = Vec::new();

    let hash_matches = match evidence.computed_hash {
        Some(computed) => computed == record.immutable_hash,
        None => {
            reasons.push(VerdictReason::CiphertextRejected);
            false
        }
    };
    if evidence.computed_hash.is_some() && !hash_matches {
        reasons.push(VerdictReason::HashMismatch);
    }

    let (anchor_confirmed, anchor_ref) = match &evidence.ledger {
        Ok(status) if status.exists => (
            true,
            status.anchor_ref.clone().or_else(|| record.anchor.anchor_ref.clone()),
        ),
        Ok(_) => (false, None),
        Err(_) => (false, None),
    };
    let anchor_pending = !anchor_confirmed && record.is_anchor_pending();
    if !anchor_confirmed {
        match (&evidence.ledger, anchor_pending) {
            (_, true) => reasons.push(VerdictReason::AnchorPending),
            (Err(_), false) => reasons.push(VerdictReason::LedgerUnavailable),
            (Ok(_), false) => reasons.push(VerdictReason::NotAnchored),
        }
    }
    if record.is_tombstoned() {
        reasons.push(VerdictReason::Tombstoned);
    }

    let is_valid = hash_matches && anchor_confirmed;
    let state = if record.is_tombstoned() {
        LifecycleState::Tombstoned
    } else if is_valid {
        LifecycleState::Verified
    } else {
        LifecycleState::VerificationFailed
    };

    Verdict {
        vault_id: record.vault_id.clone(),
        is_valid,
        hash_matches,
        anchor_confirmed,
        anchor_pending,
        state,
        reasons,
        computed_hash: evidence.computed_hash,
        stored_hash: record.immutable_hash,
        anchor_ref,
        verified_at: evidence.verified_at,
        signatures: evidence.signatures,
        audit_trail: Vec::new(),
    }
}

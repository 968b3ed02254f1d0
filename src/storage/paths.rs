// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Key layout shared by every storage tier.

use sha2::{Digest, Sha256};

/// Default data directory when none is configured.
pub const DATA_ROOT: &str = "/data";

/// Key builders for the vault layout.
///
/// ```text
/// documents/{vault_id}/content.bin   # encrypted content (all tiers)
/// documents/{vault_id}/record.json   # document record (primary tier)
/// signers/{signer_digest}.key        # wrapped signer key (primary tier)
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct StorageKeys;

impl StorageKeys {
    // ========== Document Keys ==========

    pub fn document_dir(vault_id: &str) -> String {
        format!("documents/{vault_id}")
    }

    /// Encrypted content blob.
    pub fn document_content(vault_id: &str) -> String {
        format!("{}/content.bin", Self::document_dir(vault_id))
    }

    /// Document record. Writing this key commits the document.
    pub fn document_record(vault_id: &str) -> String {
        format!("{}/record.json", Self::document_dir(vault_id))
    }

    // ========== Signer Keys ==========

    /// Wrapped signing key for a signer.
    ///
    /// Signer ids are caller-supplied, so the key uses their digest rather
    /// than the raw id.
    pub fn signer_key(signer_id: &str) -> String {
        let digest = Sha256::digest(signer_id.as_bytes());
        format!("signers/{}.key", &hex::encode(digest)[..32])
    }

    // ========== Locators ==========

    /// Locator stored on the record: `{tier}://{key}`.
    pub fn locator(tier: &str, key: &str) -> String {
        format!("{tier}://{key}")
    }

    /// Split a locator into `(tier, key)`.
    pub fn parse_locator(locator: &str) -> Option<(&str, &str)> {
        locator.split_once("://")
    }
}

/// Vault ids are embedded in keys, so only the derived form is accepted.
pub fn is_valid_vault_id(vault_id: &str) -> bool {
    vault_id
        .strip_prefix("vault_")
        .is_some_and(|rest| rest.len() == 32 && rest.bytes().all(|b| b.is_ascii_hexdigit()))
}

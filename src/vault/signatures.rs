// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signer-bound ECDSA (secp256k1) signatures over document hashes.
//!
//! Each signer gets a key on first use. Keys are stored as PKCS#8 PEM,
//! wrapped under the master key, in the primary storage tier. Private
//! keys never leave this module.
//!
//! The signed message binds the signer identity and time to the hash:
//!
//! ```text
//! "integrity-vault/signature/v1" || immutable_hash
//!     || len(signer_id) u32 BE || signer_id
//!     || len(role) u8 || role || timestamp i64 BE
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature as EcdsaSignature, SigningKey, VerifyingKey};
use k256::elliptic_curve::rand_core::OsRng;
use k256::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use serde::Serialize;
use tracing::info;
use utoipa::ToSchema;

use super::{VaultError, VaultResult};
use crate::crypto::{Encryptor, ImmutableHash};
use crate::models::{DocumentRecord, Signature, SignerRole};
use crate::storage::{StorageError, StorageKeys, StorageTier};

const SIGNATURE_DOMAIN: &[u8] = b"integrity-vault/signature/v1";

/// Longest accepted signer id, in bytes.
pub const MAX_SIGNER_ID_BYTES: usize = 256;

/// Message signed for one signature.
pub fn signing_message(
    hash: &ImmutableHash,
    signer_id: &str,
    role: SignerRole,
    timestamp: i64,
) -> VaultResult<Vec<u8>> {
    if signer_id.len() > MAX_SIGNER_ID_BYTES {
        return Err(VaultError::Input(format!(
            "signer id is {} bytes; the limit is {MAX_SIGNER_ID_BYTES}",
            signer_id.len()
        )));
    }
    let signer_len = u32::try_from(signer_id.len())
        .map_err(|_| VaultError::Input("signer id is too long".to_string()))?;
    let role = role.to_string();
    let role_len = u8::try_from(role.len())
        .map_err(|_| VaultError::Internal(format!("signer role {role} is too long")))?;

    let mut message = Vec::with_capacity(SIGNATURE_DOMAIN.len() + 32 + 4 + signer_id.len() + role.len() + 9);
    message.extend_from_slice(SIGNATURE_DOMAIN);
    message.extend_from_slice(hash.as_bytes());
    message.extend_from_slice(&signer_len.to_be_bytes());
    message.extend_from_slice(signer_id.as_bytes());
    message.push(role_len);
    message.extend_from_slice(role.as_bytes());
    message.extend_from_slice(&timestamp.to_be_bytes());
    Ok(message)
}

/// Outcome of checking one stored signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignatureCheck {
    pub signature_id: String,
    pub signer_id: String,
    pub signer_role: SignerRole,
    pub document_hash: ImmutableHash,
    /// The ECDSA signature verifies against the stored public key.
    pub valid: bool,
    /// The signature is over the document's current immutable hash.
    pub bound_to_current_hash: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
}

// =============================================================================
// Keyring
// =============================================================================

/// Loads or creates per-signer keys.
pub struct SignerKeyring {
    tier: Arc<dyn StorageTier>,
    encryptor: Encryptor,
    cache: Mutex<HashMap<String, SigningKey>>,
}

impl SignerKeyring {
    pub fn new(tier: Arc<dyn StorageTier>, encryptor: Encryptor) -> Self {
        Self {
            tier,
            encryptor,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Key for `signer_id`, generating and persisting one on first use.
    pub fn signing_key(&self, signer_id: &str) -> VaultResult<SigningKey> {
        // Held across load-or-create so two first signatures share one key.
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| VaultError::Internal("signer keyring lock poisoned".to_string()))?;
        if let Some(key) = cache.get(signer_id) {
            return Ok(key.clone());
        }

        let storage_key = StorageKeys::signer_key(signer_id);
        let purpose = wrap_purpose(signer_id);
        let key = match self.tier.get(&storage_key) {
            Ok(sealed) => {
                let pem_bytes = self.encryptor.unwrap_secret(&sealed, &purpose)?;
                parse_pem(&pem_bytes)?
            }
            Err(StorageError::NotFound(_)) => {
                let key = SigningKey::random(&mut OsRng);
                let pem = key
                    .to_pkcs8_pem(k256::pkcs8::LineEnding::LF)
                    .map_err(|e| VaultError::Internal(format!("Failed to encode signer key: {e}")))?;
                let sealed = self.encryptor.wrap_secret(pem.as_bytes(), &purpose)?;
                self.tier.put(&storage_key, &sealed)?;
                info!(signer_id = %signer_id, "Signer key created");
                key
            }
            Err(e) => return Err(e.into()),
        };

        cache.insert(signer_id.to_string(), key.clone());
        Ok(key)
    }
}

fn wrap_purpose(signer_id: &str) -> String {
    format!("integrity-vault/signer-key/v1:{signer_id}")
}

fn parse_pem(pem_bytes: &[u8]) -> VaultResult<SigningKey> {
    let text = std::str::from_utf8(pem_bytes)
        .map_err(|e| VaultError::Internal(format!("Signer key is not UTF-8: {e}")))?;
    let parsed = pem::parse(text)
        .map_err(|e| VaultError::Internal(format!("Invalid signer key PEM: {e}")))?;
    SigningKey::from_pkcs8_der(parsed.contents())
        .map_err(|e| VaultError::Internal(format!("Invalid signer key: {e}")))
}

// =============================================================================
// SignatureManager
// =============================================================================

pub struct SignatureManager {
    keyring: SignerKeyring,
}

impl SignatureManager {
    pub fn new(keyring: SignerKeyring) -> Self {
        Self { keyring }
    }

    /// Sign the record's current immutable hash as `signer_id`.
    ///
    /// Does not modify the record; the caller appends the returned
    /// signature inside the document's exclusive section.
    pub fn sign(
        &self,
        record: &DocumentRecord,
        signer_id: &str,
        role: SignerRole,
        supersedes: Option<String>,
        now_ms: i64,
    ) -> VaultResult<Signature> {
        if signer_id.trim().is_empty() {
            return Err(VaultError::Input("signer id is required".to_string()));
        }
        if record.is_tombstoned() {
            return Err(VaultError::Input(format!(
                "{} is tombstoned and cannot be signed",
                record.vault_id
            )));
        }
        if let Some(prior_id) = supersedes.as_deref() {
            let prior = record
                .signatures
                .iter()
                .find(|s| s.signature_id == prior_id)
                .ok_or_else(|| VaultError::Input(format!("no signature {prior_id} to supersede")))?;
            if prior.signer_id != signer_id {
                return Err(VaultError::Input(format!(
                    "signature {prior_id} belongs to another signer"
                )));
            }
        }

        let message = signing_message(&record.immutable_hash, signer_id, role, now_ms)?;
        let key = self.keyring.signing_key(signer_id)?;
        let signature: EcdsaSignature = key.sign(&message);
        let public_key = key.verifying_key().to_encoded_point(true);

        Ok(Signature {
            signature_id: uuid::Uuid::new_v4().to_string(),
            signer_id: signer_id.to_string(),
            signer_role: role,
            signature: format!("0x{}", hex::encode(signature.to_bytes())),
            public_key: format!("0x{}", hex::encode(public_key.as_bytes())),
            timestamp: now_ms,
            document_hash: record.immutable_hash,
            supersedes,
        })
    }

    /// Check every signature on the record.
    pub fn check_all(&self, record: &DocumentRecord) -> Vec<SignatureCheck> {
        record
            .signatures
            .iter()
            .map(|sig| SignatureCheck {
                signature_id: sig.signature_id.clone(),
                signer_id: sig.signer_id.clone(),
                signer_role: sig.signer_role,
                document_hash: sig.document_hash,
                valid: verify_signature(sig),
                bound_to_current_hash: sig.document_hash == record.immutable_hash,
                superseded_by: record
                    .signatures
                    .iter()
                    .find(|later| later.supersedes.as_deref() == Some(sig.signature_id.as_str()))
                    .map(|later| later.signature_id.clone()),
            })
            .collect()
    }
}

/// Whether `signature` verifies against its embedded public key.
pub fn verify_signature(signature: &Signature) -> bool {
    let Some(public_key) = decode_hex(&signature.public_key) else {
        return false;
    };
    let Some(sig_bytes) = decode_hex(&signature.signature) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_sec1_bytes(&public_key) else {
        return false;
    };
    let Ok(sig) = EcdsaSignature::from_slice(&sig_bytes) else {
        return false;
    };
    let Ok(message) = signing_message(
        &signature.document_hash,
        &signature.signer_id,
        signature.signer_role,
        signature.timestamp,
    ) else {
        return false;
    };
    verifying_key.verify(&message, &sig).is_ok()
}

fn decode_hex(raw: &str) -> Option<Vec<u8>> {
    hex::decode(raw.strip_prefix("0x")?).ok()
}

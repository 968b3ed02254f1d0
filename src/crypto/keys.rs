// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Vault master key and labelled subkey derivation.
//!
//! The master key is held by the vault operator and is never written to
//! storage. Purpose-specific subkeys are derived from it with
//! `HMAC-SHA256(master, label)` so that key wrapping and access-token
//! sealing never share key material.

use std::fmt;

use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::CryptoError;

/// Size of every symmetric key handled by the vault.
pub const KEY_SIZE: usize = 32;

/// Label for the subkey that wraps per-document keys.
pub const KEY_WRAP_LABEL: &[u8] = b"integrity-vault/key-wrap/v1";

/// Label for the subkey that seals access tokens.
pub const ACCESS_TOKEN_LABEL: &[u8] = b"integrity-vault/access-token/v1";

/// 256-bit operator master key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; KEY_SIZE]);

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse a 64-character hex string (an optional `0x` prefix is accepted).
    pub fn from_hex(raw: &str) -> Result<Self, CryptoError> {
        let trimmed = raw.trim();
        let body = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let mut bytes = [0u8; KEY_SIZE];
        hex::decode_to_slice(body, &mut bytes)
            .map_err(|e| CryptoError::InvalidKey(format!("master key: {e}")))?;
        Ok(Self(bytes))
    }

    /// Generate a fresh random master key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Derive a purpose-bound subkey.
    pub fn derive_subkey(&self, label: &[u8]) -> Zeroizing<[u8; KEY_SIZE]> {
        let mut mac = match <Hmac<Sha256> as Mac>::new_from_slice(&self.0) {
            Ok(mac) => mac,
            Err(_) => unreachable!("HMAC accepts any key length"),
        };
        mac.update(label);
        let mut out = Zeroizing::new([0u8; KEY_SIZE]);
        out.copy_from_slice(&mac.finalize().into_bytes());
        out
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(<redacted>)")
    }
}

/// Generate a fresh random symmetric key.
pub fn generate_key() -> Zeroizing<[u8; KEY_SIZE]> {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    OsRng.fill_bytes(&mut key[..]);
    key
}

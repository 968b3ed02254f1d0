// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-document content encryption and key wrapping.
//!
//! Every document gets a fresh 256-bit key. Content is sealed with
//! XChaCha20-Poly1305 (`nonce || ciphertext+tag`). The document key is then
//! wrapped under a subkey of the operator master key; only the wrapped form
//! is ever persisted.
//!
//! ## Levels
//!
//! | Level      | Content key                                              |
//! |------------|----------------------------------------------------------|
//! | `standard` | random key used directly                                 |
//! | `high`     | Argon2id(random secret, random salt) with stored params  |
//!
//! The level is bound into the associated data of both the content and the
//! wrapped key, so a payload cannot be opened under a different level.

use std::fmt;
use std::str::FromStr;

use argon2::{Algorithm, Argon2, Params, Version};
use base64ct::{Base64, Encoding};
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use zeroize::Zeroizing;

use super::keys::{generate_key, MasterKey, KEY_SIZE, KEY_WRAP_LABEL};
use super::CryptoError;

/// XChaCha20-Poly1305 nonce size.
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag size.
pub const TAG_SIZE: usize = 16;

/// Argon2 salt size for the `high` level.
pub const SALT_SIZE: usize = 16;

const CONTENT_AAD_PREFIX: &str = "integrity-vault/content/v1:";
const WRAP_AAD_PREFIX: &str = "integrity-vault/wrapped-key/v1:";
const WRAPPED_KEY_VERSION: u8 = 1;

/// Encryption strength applied to a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum EncryptionLevel {
    /// Random key, used directly.
    #[default]
    Standard,
    /// Key stretched through Argon2id from a random secret and salt.
    High,
}

impl EncryptionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncryptionLevel::Standard => "standard",
            EncryptionLevel::High => "high",
        }
    }
}

impl fmt::Display for EncryptionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncryptionLevel {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(EncryptionLevel::Standard),
            "high" => Ok(EncryptionLevel::High),
            "quantum-resistant" => Err(CryptoError::UnsupportedLevel(
                "quantum-resistant has no vetted post-quantum primitive behind it; use standard or high"
                    .to_string(),
            )),
            other => Err(CryptoError::UnsupportedLevel(other.to_string())),
        }
    }
}

/// Argon2id cost parameters for the `high` level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 65_536,
            iterations: 3,
            parallelism: 1,
        }
    }
}

/// KDF provenance stored alongside a `high` wrapped key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct KdfDescriptor {
    pub algorithm: String,
    pub salt: String,
    #[serde(flatten)]
    pub params: KdfParams,
}

/// A document key encrypted under the master key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WrappedKey {
    pub version: u8,
    pub level: EncryptionLevel,
    /// Base64 of `nonce || ciphertext+tag`.
    pub sealed: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kdf: Option<KdfDescriptor>,
}

/// Output of [`Encryptor::encrypt`].
#[derive(Debug, Clone)]
pub struct EncryptedPayload {
    pub ciphertext: Vec<u8>,
    pub wrapped_key: WrappedKey,
}

/// Content encryptor bound to one master key.
#[derive(Clone)]
pub struct Encryptor {
    wrap_key: Zeroizing<[u8; KEY_SIZE]>,
    kdf: KdfParams,
}

impl fmt::Debug for Encryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encryptor").field("kdf", &self.kdf).finish_non_exhaustive()
    }
}

impl Encryptor {
    pub fn new(master: &MasterKey, kdf: KdfParams) -> Self {
        Self {
            wrap_key: master.derive_subkey(KEY_WRAP_LABEL),
            kdf,
        }
    }

    /// Encrypt content under a fresh key and wrap that key.
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        level: EncryptionLevel,
    ) -> Result<EncryptedPayload, CryptoError> {
        let (content_key, kdf) = match level {
            EncryptionLevel::Standard => (generate_key(), None),
            EncryptionLevel::High => {
                let secret = generate_key();
                let mut salt = [0u8; SALT_SIZE];
                OsRng.fill_bytes(&mut salt);
                let key = stretch(&secret[..], &salt, &self.kdf)?;
                let descriptor = KdfDescriptor {
                    algorithm: "argon2id".to_string(),
                    salt: Base64::encode_string(&salt),
                    params: self.kdf,
                };
                (key, Some(descriptor))
            }
        };

        let aad = content_aad(level);
        let ciphertext = seal(&content_key, plaintext, aad.as_bytes())?;

        let wrap_aad = wrap_aad(level);
        let sealed_key = seal(&self.wrap_key, &content_key[..], wrap_aad.as_bytes())
            .map_err(|e| CryptoError::KeyWrap(e.to_string()))?;

        Ok(EncryptedPayload {
            ciphertext,
            wrapped_key: WrappedKey {
                version: WRAPPED_KEY_VERSION,
                level,
                sealed: Base64::encode_string(&sealed_key),
                kdf,
            },
        })
    }

    /// Unwrap the document key and open the content.
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        wrapped: &WrappedKey,
        level: EncryptionLevel,
    ) -> Result<Vec<u8>, CryptoError> {
        if wrapped.level != level {
            return Err(CryptoError::KeyUnwrap(format!(
                "wrapped key is {} but {} was requested",
                wrapped.level, level
            )));
        }
        let content_key = self.unwrap_key(wrapped)?;
        let aad = content_aad(level);
        open(&content_key, ciphertext, aad.as_bytes())
    }

    /// Seal an arbitrary secret under the wrap key, bound to `purpose`.
    pub fn wrap_secret(&self, secret: &[u8], purpose: &str) -> Result<Vec<u8>, CryptoError> {
        seal(&self.wrap_key, secret, purpose.as_bytes())
            .map_err(|e| CryptoError::KeyWrap(e.to_string()))
    }

    /// Inverse of [`Encryptor::wrap_secret`].
    pub fn unwrap_secret(
        &self,
        sealed: &[u8],
        purpose: &str,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        open(&self.wrap_key, sealed, purpose.as_bytes())
            .map(Zeroizing::new)
            .map_err(|_| CryptoError::KeyUnwrap(format!("secret for {purpose}")))
    }

    fn unwrap_key(&self, wrapped: &WrappedKey) -> Result<Zeroizing<[u8; KEY_SIZE]>, CryptoError> {
        if wrapped.version != WRAPPED_KEY_VERSION {
            return Err(CryptoError::MalformedWrappedKey(format!(
                "unsupported version {}",
                wrapped.version
            )));
        }
        let sealed = Base64::decode_vec(&wrapped.sealed)
            .map_err(|e| CryptoError::MalformedWrappedKey(e.to_string()))?;
        let aad = wrap_aad(wrapped.level);
        let raw = Zeroizing::new(
            open(&self.wrap_key, &sealed, aad.as_bytes())
                .map_err(|_| CryptoError::KeyUnwrap("authentication failed".to_string()))?,
        );
        if raw.len() != KEY_SIZE {
            return Err(CryptoError::MalformedWrappedKey(format!(
                "unwrapped key has {} bytes",
                raw.len()
            )));
        }
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        key.copy_from_slice(&raw);
        Ok(key)
    }
}

fn content_aad(level: EncryptionLevel) -> String {
    format!("{CONTENT_AAD_PREFIX}{level}")
}

fn wrap_aad(level: EncryptionLevel) -> String {
    format!("{WRAP_AAD_PREFIX}{level}")
}

fn stretch(
    secret: &[u8],
    salt: &[u8],
    params: &KdfParams,
) -> Result<Zeroizing<[u8; KEY_SIZE]>, CryptoError> {
    let argon2 = Argon2::new(
        Algorithm::Argon2id,
        Version::V0x13,
        Params::new(
            params.memory_kib,
            params.iterations,
            params.parallelism,
            Some(KEY_SIZE),
        )
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?,
    );
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    argon2
        .hash_password_into(secret, salt, &mut key[..])
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(key)
}

/// AEAD-seal `plaintext`, returning `nonce || ciphertext+tag`.
pub(crate) fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let sealed = cipher
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::Encryption("AEAD seal failed".to_string()))?;
    let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Open `nonce || ciphertext+tag` produced by [`seal`].
pub(crate) fn open(key: &[u8; KEY_SIZE], sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::Decryption);
    }
    let (nonce, body) = sealed.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(XNonce::from_slice(nonce), Payload { msg: body, aad })
        .map_err(|_| CryptoError::Decryption)
}

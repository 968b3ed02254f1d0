// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Cryptographic primitives for the vault.
//!
//! - `hashing` - content, metadata and immutable digests (SHA-256)
//! - `encryption` - per-document XChaCha20-Poly1305 with wrapped keys
//! - `keys` - operator master key and labelled subkeys

pub mod encryption;
pub mod hashing;
pub mod keys;

pub use encryption::{EncryptedPayload, EncryptionLevel, Encryptor, KdfDescriptor, KdfParams, WrappedKey};
pub use hashing::{
    combine, derive_vault_id, hash_content, hash_metadata, ContentHash, Digest256, HashError,
    ImmutableHash, MetadataHash,
};
pub use keys::{MasterKey, ACCESS_TOKEN_LABEL, KEY_SIZE};

/// Errors raised by key handling and authenticated encryption.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("unsupported encryption level: {0}")]
    UnsupportedLevel(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("key wrap failed: {0}")]
    KeyWrap(String),

    #[error("key unwrap failed: {0}")]
    KeyUnwrap(String),

    #[error("malformed wrapped key: {0}")]
    MalformedWrappedKey(String),

    #[error("authentication tag mismatch")]
    Decryption,
}

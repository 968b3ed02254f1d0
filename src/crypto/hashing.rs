// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Content, metadata and immutable hashes.
//!
//! All digests are SHA-256 and render as `0x` followed by 64 lower-case hex
//! characters, which is also their persisted form.
//!
//! ```text
//! content_hash   = SHA256(bytes)
//! metadata_hash  = SHA256(canonical_json(metadata))
//! immutable_hash = SHA256(content_hash || metadata_hash || timestamp_ms as i64 BE)
//! vault_id       = "vault_" + hex(HMAC-SHA256(nonce, content_hash || metadata_hash))[..32]
//! ```

use std::fmt;
use std::str::FromStr;

use hmac::{Hmac, Mac};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use sha2::{Digest, Sha256};
use utoipa::openapi::schema::{ObjectBuilder, Schema, Type};
use utoipa::openapi::RefOr;

type HmacSha256 = Hmac<Sha256>;

/// Size of every digest produced by this module.
pub const DIGEST_SIZE: usize = 32;

/// Prefix used when rendering vault identifiers.
const VAULT_ID_PREFIX: &str = "vault_";

/// A 256-bit digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest256([u8; DIGEST_SIZE]);

/// Digest of the raw document bytes.
pub type ContentHash = Digest256;
/// Digest of the canonicalized document metadata.
pub type MetadataHash = Digest256;
/// Digest binding content, metadata and creation time. This is what gets anchored.
pub type ImmutableHash = Digest256;

impl Digest256 {
    pub const fn from_bytes(bytes: [u8; DIGEST_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.0
    }

    /// Lower-case hex without the `0x` prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Digest256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl fmt::Debug for Digest256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest256({self})")
    }
}

/// Errors produced while hashing or parsing digests.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("malformed digest: {0}")]
    MalformedDigest(String),

    #[error("metadata cannot be canonicalized: {0}")]
    Canonicalization(#[from] serde_json::Error),
}

impl FromStr for Digest256 {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s
            .strip_prefix("0x")
            .ok_or_else(|| HashError::MalformedDigest(format!("missing 0x prefix: {s}")))?;
        if body.len() != DIGEST_SIZE * 2 {
            return Err(HashError::MalformedDigest(format!(
                "expected {} hex characters, got {}",
                DIGEST_SIZE * 2,
                body.len()
            )));
        }
        if body.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(HashError::MalformedDigest(format!("digest must be lower-case hex: {s}")));
        }
        let mut out = [0u8; DIGEST_SIZE];
        hex::decode_to_slice(body, &mut out)
            .map_err(|e| HashError::MalformedDigest(e.to_string()))?;
        Ok(Self(out))
    }
}

impl Serialize for Digest256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Digest256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

impl utoipa::PartialSchema for Digest256 {
    fn schema() -> RefOr<Schema> {
        RefOr::T(Schema::Object(
            ObjectBuilder::new()
                .schema_type(Type::String)
                .pattern(Some("^0x[0-9a-f]{64}$"))
                .description(Some("SHA-256 digest, 0x-prefixed lower-case hex"))
                .build(),
        ))
    }
}

impl utoipa::ToSchema for Digest256 {}

/// Hash raw document bytes. The empty buffer is valid input.
pub fn hash_content(bytes: &[u8]) -> ContentHash {
    Digest256(Sha256::digest(bytes).into())
}

/// Hash metadata after canonicalizing it, so key order never affects the result.
pub fn hash_metadata<T: Serialize + ?Sized>(metadata: &T) -> Result<MetadataHash, HashError> {
    let value = serde_json::to_value(metadata)?;
    let canonical = canonical_json(&value)?;
    Ok(Digest256(Sha256::digest(canonical.as_bytes()).into()))
}

/// Combine content hash, metadata hash and creation timestamp (unix ms).
pub fn combine(
    content: &ContentHash,
    metadata: &MetadataHash,
    timestamp_ms: i64,
) -> ImmutableHash {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher.update(metadata.as_bytes());
    hasher.update(timestamp_ms.to_be_bytes());
    Digest256(hasher.finalize().into())
}

/// Derive the vault identifier for an upload.
///
/// The nonce is random per upload, so two uploads of the same document
/// never share an identifier.
pub fn derive_vault_id(content: &ContentHash, metadata: &MetadataHash, nonce: &[u8]) -> String {
    // HMAC accepts keys of any length, new_from_slice cannot fail here.
    let mut mac = match HmacSha256::new_from_slice(nonce) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC accepts any key length"),
    };
    mac.update(content.as_bytes());
    mac.update(metadata.as_bytes());
    let tag = mac.finalize().into_bytes();
    format!("{VAULT_ID_PREFIX}{}", &hex::encode(tag)[..32])
}

/// Serialize a JSON value with object keys sorted at every depth and no
/// insignificant whitespace.
pub fn canonical_json(value: &Value) -> Result<String, HashError> {
    let mut out = String::new();
    write_canonical(value, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &Value, out: &mut String) -> Result<(), HashError> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                write_canonical(&map[key], out)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        scalar => out.push_str(&serde_json::to_string(scalar)?),
    }
    Ok(())
}

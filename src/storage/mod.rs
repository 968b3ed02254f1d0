// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Vault Storage Module
//!
//! Persistent storage for encrypted documents, their records, signer keys
//! and ledger anchor bookkeeping.
//!
//! ## Storage Layout
//!
//! ```text
//! {tier_root}/
//!   documents/{vault_id}/
//!     content.bin     # XChaCha20-Poly1305 ciphertext (every tier)
//!     record.json     # DocumentRecord, incl. audit trail (primary only)
//!   signers/
//!     {digest}.key    # PKCS#8 PEM signer key, wrapped under the master key
//! {data_dir}/
//!   anchors.redb      # anchor acknowledgments and pending anchors
//! ```
//!
//! ## Important Notes
//!
//! - Tiers only ever receive ciphertext or records without key material
//! - `record.json` is the commit point for an upload
//! - Mutations rewrite `record.json` atomically (temp file + rename)

pub mod anchor_db;
pub mod audit;
pub mod paths;
pub mod record_cache;
pub mod tier;
pub mod vault_store;

pub use anchor_db::{AnchorDatabase, AnchorDbError, AnchorEntry, InFlightAnchor, PendingAnchor};
pub use audit::{AuditFilter, AuditLog};
pub use paths::{StorageKeys, DATA_ROOT};
pub use record_cache::RecordCache;
pub use tier::{FsStorageTier, MemoryStorageTier, StorageError, StorageResult, StorageTier};
pub use vault_store::VaultStore;

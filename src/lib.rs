// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Integrity Vault - Document Integrity Service
//!
//! Stores financial documents encrypted at rest, anchors a hash binding
//! content, metadata and creation time on a ledger, and keeps signatures,
//! sharing grants and an append-only audit trail per document.
//!
//! ## Modules
//!
//! - `vault` - `DocumentVault` and its operations
//! - `crypto` - hashing, content encryption, master key
//! - `ledger` - anchoring backends (simulated, EVM) with retries
//! - `storage` - storage tiers, document records, anchor database
//! - `api` - HTTP API handlers (Axum)
//! - `anchor_reconciler` - background retry of pending anchors

pub mod anchor_reconciler;
pub mod api;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod models;
pub mod state;
pub mod storage;
pub mod vault;

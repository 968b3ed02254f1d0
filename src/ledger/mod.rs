// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Ledger Anchoring
//!
//! Records a document's immutable hash on an external append-only ledger
//! and later confirms it is still there.
//!
//! - [`LedgerAnchor`] is the ledger seam: submit a hash, query a hash.
//! - [`SimulatedLedger`] keeps anchors in the local redb database.
//! - [`EvmLedger`] writes the hash as calldata of a zero-value transaction on
//!   any EVM chain reachable over JSON-RPC.
//! - [`AnchorService`] wraps a ledger with timeouts, bounded retries and
//!   the pending-anchor queue used when the ledger is unreachable.

pub mod evm;
pub mod service;
pub mod simulated;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::crypto::ImmutableHash;
use crate::storage::{AnchorDbError, AnchorEntry};

pub use evm::{EvmLedger, EvmLedgerConfig, DEFAULT_RESEND_AFTER};
pub use service::{AnchorOutcome, AnchorService, RetryPolicy};
pub use simulated::SimulatedLedger;

/// Acknowledgment returned by a ledger for a submitted hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorReceipt {
    pub anchor_ref: String,
    pub anchored_at: i64,
}

impl From<AnchorEntry> for AnchorReceipt {
    fn from(entry: AnchorEntry) -> Self {
        Self {
            anchor_ref: entry.anchor_ref,
            anchored_at: entry.anchored_at,
        }
    }
}

/// Result of asking a ledger about a hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorStatus {
    pub exists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchored_at: Option<i64>,
}

impl AnchorStatus {
    pub fn missing() -> Self {
        Self {
            exists: false,
            anchor_ref: None,
            anchored_at: None,
        }
    }
}

impl From<AnchorEntry> for AnchorStatus {
    fn from(entry: AnchorEntry) -> Self {
        Self {
            exists: true,
            anchor_ref: Some(entry.anchor_ref),
            anchored_at: Some(entry.anchored_at),
        }
    }
}

/// Errors that can occur while talking to a ledger.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    #[error("ledger timed out after {0} ms")]
    Timeout(u64),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("ledger rejected submission: {0}")]
    Rejected(String),

    #[error("invalid ledger configuration: {0}")]
    InvalidConfig(String),

    #[error("anchor database error: {0}")]
    Database(#[from] AnchorDbError),
}

/// An external append-only ledger.
///
/// Submitting the same hash twice must yield the same anchor.
#[async_trait]
pub trait LedgerAnchor: Send + Sync {
    /// Short name recorded with each anchor (`simulated`, `evm`).
    fn name(&self) -> &'static str;

    /// Record `hash` on the ledger.
    async fn submit(
        &self,
        hash: &ImmutableHash,
        metadata: &serde_json::Value,
    ) -> Result<AnchorReceipt, LedgerError>;

    /// Whether `hash` is recorded on the ledger.
    async fn query(&self, hash: &ImmutableHash) -> Result<AnchorStatus, LedgerError>;
}

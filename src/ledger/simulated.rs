// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger simulated on top of the local anchor database.
//!
//! Anchor references are deterministic: `sim-` followed by the first 16 hex
//! characters of `SHA256("integrity-vault/sim-anchor" || hash)`. Outages,
//! transient failures and latency can be injected for testing.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{AnchorReceipt, AnchorStatus, LedgerAnchor, LedgerError};
use crate::clock::Clock;
use crate::crypto::ImmutableHash;
use crate::storage::{AnchorDatabase, AnchorEntry};

const LEDGER_NAME: &str = "simulated";
const ANCHOR_REF_DOMAIN: &[u8] = b"integrity-vault/sim-anchor";

pub struct SimulatedLedger {
    db: Arc<AnchorDatabase>,
    clock: Arc<dyn Clock>,
    offline: AtomicBool,
    failures_remaining: AtomicU32,
    latency_ms: AtomicU64,
}

impl SimulatedLedger {
    pub fn new(db: Arc<AnchorDatabase>, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            clock,
            offline: AtomicBool::new(false),
            failures_remaining: AtomicU32::new(0),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// Refuse every call until switched back on.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail the next `count` submissions with `Unavailable`.
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(ms, Ordering::SeqCst);
    }

    /// Deterministic anchor reference for a hash.
    pub fn anchor_ref_for(hash: &ImmutableHash) -> String {
        let mut hasher = Sha256::new();
        hasher.update(ANCHOR_REF_DOMAIN);
        hasher.update(hash.as_bytes());
        format!("sim-{}", &hex::encode(hasher.finalize())[..16])
    }

    async fn gate(&self) -> Result<(), LedgerError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("simulated ledger is offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerAnchor for SimulatedLedger {
    fn name(&self) -> &'static str {
        LEDGER_NAME
    }

    async fn submit(
        &self,
        hash: &ImmutableHash,
        _metadata: &serde_json::Value,
    ) -> Result<AnchorReceipt, LedgerError> {
        self.gate().await?;
        let injected = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(LedgerError::Unavailable("injected transient failure".to_string()));
        }

        let entry = AnchorEntry {
            anchor_ref: Self::anchor_ref_for(hash),
            anchored_at: self.clock.now_ms(),
            ledger: LEDGER_NAME.to_string(),
        };
        let stored = self.db.insert_anchor_if_absent(&hash.to_string(), &entry)?;
        Ok(stored.into())
    }

    async fn query(&self, hash: &ImmutableHash) -> Result<AnchorStatus, LedgerError> {
        self.gate().await?;
        Ok(self
            .db
            .get_anchor(&hash.to_string())?
            .map(AnchorStatus::from)
            .unwrap_or_else(AnchorStatus::missing))
    }
}

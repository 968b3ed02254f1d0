// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Anchoring with timeouts, bounded retries and a pending queue.
//!
//! ## Strategy
//!
//! An upload calls [`AnchorService::anchor`]. The ledger is tried up to
//! `1 + max_retries` times with exponential backoff, all inside one overall
//! deadline. If every attempt fails or the deadline passes, the outcome is
//! [`AnchorOutcome::Pending`] and the caller queues the document with
//! [`AnchorService::queue_pending`] before its record is committed. The
//! reconciler later drains the queue with [`AnchorService::submit_once`].
//! Queue rows are keyed by vault id since documents may share a hash.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::{AnchorReceipt, AnchorStatus, LedgerAnchor, LedgerError};
use crate::crypto::ImmutableHash;
use crate::storage::{AnchorDatabase, PendingAnchor};

/// Retry schedule for ledger submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// How an anchoring attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnchorOutcome {
    Confirmed(AnchorReceipt),
    Pending { reason: String },
}

pub struct AnchorService {
    ledger: Arc<dyn LedgerAnchor>,
    db: Arc<AnchorDatabase>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl AnchorService {
    pub fn new(
        ledger: Arc<dyn LedgerAnchor>,
        db: Arc<AnchorDatabase>,
        policy: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            db,
            policy,
            timeout,
        }
    }

    pub fn ledger_name(&self) -> &'static str {
        self.ledger.name()
    }

    /// Submit with retries inside one deadline (`timeout` or the default).
    pub async fn anchor(
        &self,
        hash: &ImmutableHash,
        metadata: &serde_json::Value,
        timeout: Option<Duration>,
    ) -> AnchorOutcome {
        let deadline = timeout.unwrap_or(self.timeout);
        match tokio::time::timeout(deadline, self.submit_with_retry(hash, metadata)).await {
            Ok(Ok(receipt)) => AnchorOutcome::Confirmed(receipt),
            Ok(Err(e)) => {
                warn!(hash = %hash, error = %e, "Anchoring failed; document will be pending");
                AnchorOutcome::Pending {
                    reason: e.to_string(),
                }
            }
            Err(_) => {
                let e = LedgerError::Timeout(duration_ms(deadline));
                warn!(hash = %hash, error = %e, "Anchoring timed out; document will be pending");
                AnchorOutcome::Pending {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn submit_with_retry(
        &self,
        hash: &ImmutableHash,
        metadata: &serde_json::Value,
    ) -> Result<AnchorReceipt, LedgerError> {
        let mut attempt = 0;
        loop {
            match self.ledger.submit(hash, metadata).await {
                Ok(receipt) => return Ok(receipt),
                Err(e @ (LedgerError::InvalidConfig(_) | LedgerError::Rejected(_))) => return Err(e),
                Err(e) if attempt >= self.policy.max_retries => return Err(e),
                Err(e) => {
                    let delay = self.policy.backoff(attempt);
                    debug!(
                        hash = %hash,
                        attempt = attempt + 1,
                        delay_ms = duration_ms(delay),
                        error = %e,
                        "Ledger submission failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// One submission attempt bounded by the default timeout.
    pub async fn submit_once(
        &self,
        hash: &ImmutableHash,
        metadata: &serde_json::Value,
    ) -> Result<AnchorReceipt, LedgerError> {
        tokio::time::timeout(self.timeout, self.ledger.submit(hash, metadata))
            .await
            .map_err(|_| LedgerError::Timeout(duration_ms(self.timeout)))?
    }

    /// Ask the ledger whether `hash` is anchored, bounded by the default timeout.
    pub async fn query(&self, hash: &ImmutableHash) -> Result<AnchorStatus, LedgerError> {
        tokio::time::timeout(self.timeout, self.ledger.query(hash))
            .await
            .map_err(|_| LedgerError::Timeout(duration_ms(self.timeout)))?
    }

    // =========================================================================
    // Pending queue
    // =========================================================================

    pub fn queue_pending(
        &self,
        vault_id: &str,
        hash: &ImmutableHash,
        metadata: serde_json::Value,
        reason: &str,
        now_ms: i64,
    ) -> Result<(), LedgerError> {
        self.db.upsert_pending(&PendingAnchor {
            vault_id: vault_id.to_string(),
            immutable_hash: hash.to_string(),
            metadata,
            queued_at: now_ms,
            attempts: 1,
            last_error: Some(reason.to_string()),
        })?;
        Ok(())
    }

    pub fn pending(&self) -> Result<Vec<PendingAnchor>, LedgerError> {
        Ok(self.db.list_pending()?)
    }

    pub fn record_failure(&self, vault_id: &str, error: &str) -> Result<(), LedgerError> {
        Ok(self.db.record_attempt(vault_id, error)?)
    }

    pub fn clear_pending(&self, vault_id: &str) -> Result<(), LedgerError> {
        self.db.remove_pending(vault_id)?;
        Ok(())
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

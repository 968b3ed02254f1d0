// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Anchor Reconciler
//!
//! Background task that retries anchors queued while the ledger was
//! unavailable. Each sweep calls [`DocumentVault::reconcile_pending`], which
//! records an `anchor-confirmed` audit entry on every document it settles.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken`; the loop exits between sweeps.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::vault::DocumentVault;

/// Default interval between reconciliation sweeps.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(60);

pub struct AnchorReconciler {
    vault: Arc<DocumentVault>,
    interval: Duration,
}

impl AnchorReconciler {
    pub fn new(vault: Arc<DocumentVault>) -> Self {
        Self {
            vault,
            interval: DEFAULT_RECONCILE_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// ```rust,ignore
    /// tokio::spawn(reconciler.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            ledger = self.vault.ledger_name(),
            "Anchor reconciler starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("Anchor reconciler shutting down");
                return;
            }

            self.sweep().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Anchor reconciler shutting down");
                    return;
                }
            }
        }
    }

    async fn sweep(&self) {
        match self.vault.reconcile_pending().await {
            Ok(report) if report.confirmed.is_empty() && report.still_pending == 0 => {}
            Ok(report) => {
                info!(
                    confirmed = report.confirmed.len(),
                    still_pending = report.still_pending,
                    "Anchor reconciler: sweep finished"
                );
            }
            Err(e) => {
                warn!(error = %e, "Anchor reconciler: sweep failed");
            }
        }
    }
}

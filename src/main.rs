// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use integrity_vault::{
    anchor_reconciler::AnchorReconciler,
    api::router,
    clock::{Clock, SystemClock},
    config::{LedgerMode, LogFormat, VaultConfig, DEFAULT_LOG_FILTER, LOG_FORMAT_ENV},
    ledger::{EvmLedger, LedgerAnchor, SimulatedLedger},
    state::AppState,
    storage::{vault_store::DEFAULT_CACHE_TTL, AnchorDatabase, FsStorageTier, VaultStore},
    vault::{DocumentVault, VaultDeps},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    match format {
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

fn open_tier(name: &str, root: &std::path::Path) -> Arc<FsStorageTier> {
    let mut tier = FsStorageTier::new(name, root);
    tier.initialize()
        .unwrap_or_else(|e| panic!("Failed to initialize {name} tier at {}: {e}", root.display()));
    Arc::new(tier)
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
    shutdown.cancel();
}

#[tokio::main]
async fn main() {
    init_tracing(LogFormat::parse(std::env::var(LOG_FORMAT_ENV).ok().as_deref()));

    let config = VaultConfig::from_env().expect("Invalid configuration");

    // Storage tiers
    let mut store = VaultStore::new(open_tier("primary", &config.data_dir))
        .with_cache(config.record_cache_size, DEFAULT_CACHE_TTL);
    if let Some(dir) = &config.backup_dir {
        store = store.with_backup(open_tier("backup", dir));
    }
    if let Some(dir) = &config.archive_dir {
        store = store.with_archive(open_tier("archive", dir));
    }

    let anchor_db = Arc::new(
        AnchorDatabase::open(&config.anchor_db_path).expect("Failed to open anchor database"),
    );
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let ledger: Arc<dyn LedgerAnchor> = match (config.ledger_mode, &config.evm) {
        (LedgerMode::Evm, Some(evm)) => Arc::new(
            EvmLedger::connect(evm, anchor_db.clone())
                .expect("Failed to connect EVM ledger")
                .with_clock(clock.clone()),
        ),
        _ => {
            warn!("Using simulated ledger; anchors are local only");
            Arc::new(SimulatedLedger::new(anchor_db.clone(), clock.clone()))
        }
    };

    let vault = Arc::new(DocumentVault::new(VaultDeps {
        ledger,
        anchor_db,
        store,
        master_key: config.master_key.clone(),
        clock,
        settings: config.vault_settings(),
    }));

    let shutdown = CancellationToken::new();
    let reconciler = AnchorReconciler::new(vault.clone()).with_interval(config.reconcile_interval);
    let reconciler_handle = tokio::spawn(reconciler.run(shutdown.clone()));

    let app = router(AppState::new(vault));
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind listener");

    info!(addr = %addr, "Integrity Vault listening (docs at /docs)");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .expect("HTTP server failed");

    shutdown.cancel();
    if let Err(e) = reconciler_handle.await {
        warn!(error = %e, "Anchor reconciler task ended abnormally");
    }
    info!("Integrity Vault stopped");
}

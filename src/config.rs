// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names, defaults, and [`VaultConfig`], which is
//! loaded once at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Primary storage tier root | `/data` |
//! | `BACKUP_DIR` | Backup tier root | Optional |
//! | `ARCHIVE_DIR` | Archive tier root | Optional |
//! | `ANCHOR_DB_PATH` | redb file for anchors and the pending queue | `$DATA_DIR/anchors.redb` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `VAULT_MASTER_KEY` | 64 hex characters | Required |
//! | `LEDGER_MODE` | `simulated` or `evm` | `simulated` |
//! | `LEDGER_RPC_URL` | JSON-RPC endpoint | Required for `evm` |
//! | `LEDGER_PRIVATE_KEY` | Operator key, hex | Required for `evm` |
//! | `LEDGER_ANCHOR_ADDRESS` | Recipient of anchor transactions | Operator address |
//! | `LEDGER_RESEND_AFTER_SECS` | Age before an unmined, dropped transaction is resent | `600` |
//! | `ANCHOR_TIMEOUT_MS` | Overall anchoring deadline | `10000` |
//! | `ANCHOR_MAX_RETRIES` | Retries after the first submission | `3` |
//! | `ANCHOR_BACKOFF_MS` | Initial retry backoff | `250` |
//! | `RECONCILE_INTERVAL_SECS` | Pending-anchor sweep interval | `60` |
//! | `RETENTION_DAYS` | Default retention after soft-delete | `2555` |
//! | `RECORD_CACHE_SIZE` | Cached records | `256` |
//! | `ARGON2_MEMORY_KIB` | Argon2id memory cost for `high` | `65536` |
//! | `ARGON2_ITERATIONS` | Argon2id time cost for `high` | `3` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::crypto::{KdfParams, MasterKey};
use crate::ledger::{EvmLedgerConfig, RetryPolicy, DEFAULT_RESEND_AFTER};
use crate::models::RetentionPolicy;
use crate::storage::DATA_ROOT;
use crate::vault::{VaultError, VaultSettings};

pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const BACKUP_DIR_ENV: &str = "BACKUP_DIR";
pub const ARCHIVE_DIR_ENV: &str = "ARCHIVE_DIR";
pub const ANCHOR_DB_PATH_ENV: &str = "ANCHOR_DB_PATH";
pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const MASTER_KEY_ENV: &str = "VAULT_MASTER_KEY";
pub const LEDGER_MODE_ENV: &str = "LEDGER_MODE";
pub const LEDGER_RPC_URL_ENV: &str = "LEDGER_RPC_URL";
pub const LEDGER_PRIVATE_KEY_ENV: &str = "LEDGER_PRIVATE_KEY";
pub const LEDGER_ANCHOR_ADDRESS_ENV: &str = "LEDGER_ANCHOR_ADDRESS";
pub const LEDGER_RESEND_AFTER_SECS_ENV: &str = "LEDGER_RESEND_AFTER_SECS";
pub const ANCHOR_TIMEOUT_MS_ENV: &str = "ANCHOR_TIMEOUT_MS";
pub const ANCHOR_MAX_RETRIES_ENV: &str = "ANCHOR_MAX_RETRIES";
pub const ANCHOR_BACKOFF_MS_ENV: &str = "ANCHOR_BACKOFF_MS";
pub const RECONCILE_INTERVAL_SECS_ENV: &str = "RECONCILE_INTERVAL_SECS";
pub const RETENTION_DAYS_ENV: &str = "RETENTION_DAYS";
pub const RECORD_CACHE_SIZE_ENV: &str = "RECORD_CACHE_SIZE";
pub const ARGON2_MEMORY_KIB_ENV: &str = "ARGON2_MEMORY_KIB";
pub const ARGON2_ITERATIONS_ENV: &str = "ARGON2_ITERATIONS";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";

const ANCHOR_DB_FILE: &str = "anchors.redb";

/// Which ledger backs anchoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerMode {
    Simulated,
    Evm,
}

impl FromStr for LedgerMode {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simulated" => Ok(Self::Simulated),
            "evm" => Ok(Self::Evm),
            other => Err(VaultError::Config(format!(
                "{LEDGER_MODE_ENV} must be simulated or evm, got {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    /// Anything other than `json` means pretty.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some(value) if value.trim().eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Process configuration.
pub struct VaultConfig {
    pub data_dir: PathBuf,
    pub backup_dir: Option<PathBuf>,
    pub archive_dir: Option<PathBuf>,
    pub anchor_db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub master_key: MasterKey,
    pub ledger_mode: LedgerMode,
    pub evm: Option<EvmLedgerConfig>,
    pub anchor_timeout: Duration,
    pub retry: RetryPolicy,
    pub reconcile_interval: Duration,
    pub retention: RetentionPolicy,
    pub record_cache_size: usize,
    pub kdf: KdfParams,
    pub log_format: LogFormat,
}

impl VaultConfig {
    pub fn from_env() -> Result<Self, VaultError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, VaultError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let data_dir = PathBuf::from(get(DATA_DIR_ENV).unwrap_or_else(|| DATA_ROOT.to_string()));
        let anchor_db_path = get(ANCHOR_DB_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join(ANCHOR_DB_FILE));

        let master_key = match get(MASTER_KEY_ENV) {
            Some(raw) => MasterKey::from_hex(&raw)
                .map_err(|e| VaultError::Config(format!("{MASTER_KEY_ENV}: {e}")))?,
            None => {
                return Err(VaultError::Config(format!("{MASTER_KEY_ENV} is required")));
            }
        };

        let ledger_mode = match get(LEDGER_MODE_ENV) {
            Some(raw) => raw.parse()?,
            None => LedgerMode::Simulated,
        };
        let evm = match ledger_mode {
            LedgerMode::Simulated => None,
            LedgerMode::Evm => Some(EvmLedgerConfig {
                rpc_url: get(LEDGER_RPC_URL_ENV).ok_or_else(|| {
                    VaultError::Config(format!("{LEDGER_RPC_URL_ENV} is required for evm"))
                })?,
                private_key_hex: get(LEDGER_PRIVATE_KEY_ENV).ok_or_else(|| {
                    VaultError::Config(format!("{LEDGER_PRIVATE_KEY_ENV} is required for evm"))
                })?,
                anchor_address: get(LEDGER_ANCHOR_ADDRESS_ENV),
                resend_after: Duration::from_secs(parse_or(
                    &get,
                    LEDGER_RESEND_AFTER_SECS_ENV,
                    DEFAULT_RESEND_AFTER.as_secs(),
                )?),
            }),
        };

        let defaults = KdfParams::default();
        let kdf = KdfParams {
            memory_kib: parse_or(&get, ARGON2_MEMORY_KIB_ENV, defaults.memory_kib)?,
            iterations: parse_or(&get, ARGON2_ITERATIONS_ENV, defaults.iterations)?,
            parallelism: defaults.parallelism,
        };

        let retry_defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_retries: parse_or(&get, ANCHOR_MAX_RETRIES_ENV, retry_defaults.max_retries)?,
            initial_backoff: Duration::from_millis(parse_or(
                &get,
                ANCHOR_BACKOFF_MS_ENV,
                250u64,
            )?),
            max_backoff: retry_defaults.max_backoff,
        };

        Ok(Self {
            backup_dir: get(BACKUP_DIR_ENV).map(PathBuf::from),
            archive_dir: get(ARCHIVE_DIR_ENV).map(PathBuf::from),
            anchor_db_path,
            data_dir,
            host: get(HOST_ENV).unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&get, PORT_ENV, 8080u16)?,
            master_key,
            ledger_mode,
            evm,
            anchor_timeout: Duration::from_millis(parse_or(&get, ANCHOR_TIMEOUT_MS_ENV, 10_000u64)?),
            retry,
            reconcile_interval: Duration::from_secs(parse_or(
                &get,
                RECONCILE_INTERVAL_SECS_ENV,
                60u64,
            )?),
            retention: RetentionPolicy {
                retain_days: parse_or(
                    &get,
                    RETENTION_DAYS_ENV,
                    RetentionPolicy::default().retain_days,
                )?,
            },
            record_cache_size: parse_or(&get, RECORD_CACHE_SIZE_ENV, 256usize)?,
            kdf,
            log_format: LogFormat::parse(get(LOG_FORMAT_ENV).as_deref()),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn vault_settings(&self) -> VaultSettings {
        VaultSettings {
            anchor_timeout: self.anchor_timeout,
            retry: self.retry,
            kdf: self.kdf,
            default_retention: self.retention,
            ..VaultSettings::default()
        }
    }
}

fn parse_or<T, G>(get: &G, name: &str, default: T) -> Result<T, VaultError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| VaultError::Config(format!("{name}: {e}"))),
        None => Ok(default),
    }
}

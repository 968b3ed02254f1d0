// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Errors surfaced by vault operations.

use crate::crypto::{CryptoError, HashError};
use crate::ledger::LedgerError;
use crate::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// Caller supplied something unusable (empty owner, bad id, tombstoned target).
    #[error("invalid input: {0}")]
    Input(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(StorageError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StorageError> for VaultError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(id) => VaultError::NotFound(format!("document {id}")),
            other => VaultError::Storage(other),
        }
    }
}

impl From<HashError> for VaultError {
    fn from(e: HashError) -> Self {
        VaultError::Input(e.to_string())
    }
}

pub type VaultResult<T> = Result<T, VaultError>;

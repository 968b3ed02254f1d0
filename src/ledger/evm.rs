// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! EVM ledger: anchors a hash as the calldata of a zero-value transaction.
//!
//! The transaction is sent from the operator account to the configured
//! anchor address (the operator's own address by default). The
//! transaction hash is the anchor reference, and the including block's
//! timestamp is the anchor time. A local redb index maps each immutable
//! hash to its transaction so repeated submissions are not re-sent. The
//! transaction is indexed as in flight as soon as it is sent; a later
//! submission of the same hash polls that transaction instead of sending
//! another one. If the transaction is still unmined after
//! [`EvmLedgerConfig::resend_after`] and the node no longer knows it, it was
//! dropped from the mempool; the entry is cleared and the anchor is sent
//! again.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alloy::{
    network::EthereumWallet,
    primitives::{Address, Bytes, B256, U256},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::types::{TransactionReceipt, TransactionRequest},
    signers::local::PrivateKeySigner,
};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{AnchorReceipt, AnchorStatus, LedgerAnchor, LedgerError};
use crate::clock::{duration_ms, Clock, SystemClock};
use crate::crypto::ImmutableHash;
use crate::storage::{AnchorDatabase, AnchorEntry, InFlightAnchor};

const LEDGER_NAME: &str = "evm";

/// Age after which an unmined anchor transaction is checked for being dropped.
pub const DEFAULT_RESEND_AFTER: Duration = Duration::from_secs(600);

/// Connection settings for [`EvmLedger`].
#[derive(Debug, Clone)]
pub struct EvmLedgerConfig {
    pub rpc_url: String,
    /// Hex-encoded operator private key (64 characters, optional 0x prefix).
    pub private_key_hex: String,
    /// Recipient of anchor transactions. Defaults to the operator address.
    pub anchor_address: Option<String>,
    /// How long an unmined transaction may wait before it is resent, provided
    /// the node no longer knows it.
    pub resend_after: Duration,
}

pub struct EvmLedger {
    provider: DynProvider,
    operator: Address,
    anchor_address: Address,
    db: Arc<AnchorDatabase>,
    clock: Arc<dyn Clock>,
    resend_after: Duration,
    submit_lock: Mutex<()>,
}

impl EvmLedger {
    /// Build a signing HTTP provider for the configured chain.
    pub fn connect(config: &EvmLedgerConfig, db: Arc<AnchorDatabase>) -> Result<Self, LedgerError> {
        let url: url::Url = config
            .rpc_url
            .parse()
            .map_err(|e: url::ParseError| LedgerError::InvalidConfig(format!("RPC URL: {e}")))?;

        let signer = create_signer(&config.private_key_hex)?;
        let operator = signer.address();
        let anchor_address = match config.anchor_address.as_deref() {
            Some(raw) => Address::from_str(raw)
                .map_err(|e| LedgerError::InvalidConfig(format!("anchor address: {e}")))?,
            None => operator,
        };

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(url)
            .erased();

        info!(
            operator = %operator,
            anchor_address = %anchor_address,
            "EVM ledger configured"
        );

        Ok(Self {
            provider,
            operator,
            anchor_address,
            db,
            clock: Arc::new(SystemClock),
            resend_after: config.resend_after,
            submit_lock: Mutex::new(()),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn operator(&self) -> Address {
        self.operator
    }

    /// Send the anchor transaction, index it as in flight and wait for it
    /// to be mined.
    async fn send_anchor(
        &self,
        key: &str,
        hash: &ImmutableHash,
    ) -> Result<TransactionReceipt, LedgerError> {
        let pending = self
            .provider
            .send_transaction(anchor_request(self.anchor_address, hash))
            .await
            .map_err(|e| LedgerError::Unavailable(format!("Failed to send: {e}")))?;
        self.db.record_in_flight(
            key,
            &InFlightAnchor {
                tx_ref: format!("{:?}", pending.tx_hash()),
                sent_at: self.clock.now_ms(),
            },
        )?;
        pending
            .get_receipt()
            .await
            .map_err(|e| LedgerError::Unavailable(format!("Failed to get receipt: {e}")))
    }

    /// Poll a previously sent transaction. Resends when it is old enough and
    /// the node has dropped it.
    async fn resume_anchor(
        &self,
        key: &str,
        hash: &ImmutableHash,
        in_flight: InFlightAnchor,
    ) -> Result<TransactionReceipt, LedgerError> {
        let tx_hash = parse_tx_hash(&in_flight.tx_ref)?;
        debug!(hash = %key, tx_hash = %in_flight.tx_ref, "Resuming in-flight anchor transaction");
        if let Some(receipt) = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| LedgerError::Unavailable(format!("Failed to get receipt: {e}")))?
        {
            return Ok(receipt);
        }

        if !in_flight.is_older_than(duration_ms(self.resend_after), self.clock.now_ms()) {
            return Err(LedgerError::Unavailable(format!(
                "anchor transaction {} not yet mined",
                in_flight.tx_ref
            )));
        }
        let known = self
            .provider
            .get_transaction_by_hash(tx_hash)
            .await
            .map_err(|e| LedgerError::Unavailable(format!("Failed to get transaction: {e}")))?;
        if known.is_some() {
            return Err(LedgerError::Unavailable(format!(
                "anchor transaction {} still pending",
                in_flight.tx_ref
            )));
        }

        warn!(
            hash = %key,
            tx_hash = %in_flight.tx_ref,
            sent_at = in_flight.sent_at,
            "Anchor transaction dropped by the node, resending"
        );
        self.db.clear_in_flight(key)?;
        self.send_anchor(key, hash).await
    }

    async fn block_timestamp_ms(&self, block_number: u64) -> Result<i64, LedgerError> {
        let block = self
            .provider
            .get_block_by_number(alloy::eips::BlockNumberOrTag::Number(block_number))
            .await
            .map_err(|e| LedgerError::Rpc(format!("Failed to get block: {e}")))?
            .ok_or_else(|| LedgerError::Rpc(format!("Block {block_number} not found")))?;
        let seconds = i64::try_from(block.header.timestamp)
            .map_err(|e| LedgerError::Rpc(format!("Block timestamp out of range: {e}")))?;
        Ok(seconds.saturating_mul(1000))
    }
}

/// Create a signer from a hex-encoded private key.
pub fn create_signer(private_key_hex: &str) -> Result<PrivateKeySigner, LedgerError> {
    let trimmed = private_key_hex.trim();
    let body = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let key_bytes = alloy::hex::decode(body)
        .map_err(|e| LedgerError::InvalidConfig(format!("private key: {e}")))?;
    PrivateKeySigner::from_slice(&key_bytes)
        .map_err(|e| LedgerError::InvalidConfig(format!("private key: {e}")))
}

fn parse_tx_hash(raw: &str) -> Result<B256, LedgerError> {
    B256::from_str(raw).map_err(|e| LedgerError::Rpc(format!("Invalid tx hash {raw}: {e}")))
}

/// Anchor transaction: zero value, calldata is the 32-byte hash.
fn anchor_request(to: Address, hash: &ImmutableHash) -> TransactionRequest {
    TransactionRequest::default()
        .to(to)
        .value(U256::ZERO)
        .input(Bytes::copy_from_slice(hash.as_bytes()).into())
}

#[async_trait]
impl LedgerAnchor for EvmLedger {
    fn name(&self) -> &'static str {
        LEDGER_NAME
    }

    async fn submit(
        &self,
        hash: &ImmutableHash,
        _metadata: &serde_json::Value,
    ) -> Result<AnchorReceipt, LedgerError> {
        let key = hash.to_string();
        if let Some(existing) = self.db.get_anchor(&key)? {
            return Ok(existing.into());
        }

        // One anchor transaction in flight at a time keeps nonces ordered
        // and stops a concurrent duplicate from being sent.
        let _guard = self.submit_lock.lock().await;
        if let Some(existing) = self.db.get_anchor(&key)? {
            return Ok(existing.into());
        }

        let receipt = match self.db.get_in_flight(&key)? {
            Some(in_flight) => self.resume_anchor(&key, hash, in_flight).await?,
            None => self.send_anchor(&key, hash).await?,
        };
        if !receipt.status() {
            self.db.clear_in_flight(&key)?;
            return Err(LedgerError::Rejected(format!(
                "anchor transaction {:?} reverted",
                receipt.transaction_hash
            )));
        }

        let block_number = receipt
            .block_number
            .ok_or_else(|| LedgerError::Rpc("receipt has no block number".to_string()))?;
        let entry = AnchorEntry {
            anchor_ref: format!("{:?}", receipt.transaction_hash),
            anchored_at: self.block_timestamp_ms(block_number).await?,
            ledger: LEDGER_NAME.to_string(),
        };
        info!(
            hash = %key,
            tx_hash = %entry.anchor_ref,
            block_number,
            "Hash anchored on EVM ledger"
        );
        Ok(self.db.confirm_in_flight(&key, &entry)?.into())
    }

    async fn query(&self, hash: &ImmutableHash) -> Result<AnchorStatus, LedgerError> {
        let Some(entry) = self.db.get_anchor(&hash.to_string())? else {
            return Ok(AnchorStatus::missing());
        };
        let receipt = self
            .provider
            .get_transaction_receipt(parse_tx_hash(&entry.anchor_ref)?)
            .await
            .map_err(|e| LedgerError::Unavailable(format!("Failed to get receipt: {e}")))?;

        match receipt {
            Some(receipt) if receipt.status() => Ok(entry.into()),
            _ => Ok(AnchorStatus::missing()),
        }
    }
}

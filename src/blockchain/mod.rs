// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! EVM escrow integration.

use alloy::primitives::{keccak256, B256};
use async_trait::async_trait;

pub mod client;
pub mod escrow;
pub mod watcher;

pub use client::ChainClient;

/// Deterministic 32-byte form of an internal job id, as presented to the
/// escrow's replay guard. Retries must reuse the same hash, so this is a
/// pure function of the id.
pub fn job_id32(job_id: &str) -> B256 {
    keccak256(job_id.as_bytes())
}

/// Result of a withdrawal submission: the transaction hash and whether the
/// receipt reported success.
#[derive(Debug, Clone)]
pub struct TxOutcome {
    pub tx_hash: String,
    pub confirmed_ok: bool,
}

/// Transaction-submitting surface of the chain client. The batch processor
/// and the HTTP handlers depend on this trait, not on the alloy-backed
/// implementation, so tests can substitute a mock.
#[async_trait]
pub trait ChainGateway: Send + Sync {
    /// Submit `operatorWithdraw(to, amount, depositId, jobId)` and await the
    /// receipt. A mined-but-reverted transaction is reported through
    /// `TxOutcome::confirmed_ok == false`, never swallowed.
    async fn submit_withdrawal(
        &self,
        to: &str,
        amount: u128,
        deposit_id: u64,
        job_id: B256,
    ) -> Result<TxOutcome, ChainClientError>;

    /// Send the fixed gas pre-fund amount of the native token to `to`.
    /// Returns the transaction hash without waiting for confirmation.
    async fn fund_gas(&self, to: &str) -> Result<String, ChainClientError>;
}

/// Errors that can occur during blockchain operations.
#[derive(Debug, thiserror::Error)]
pub enum ChainClientError {
    #[error("Invalid RPC URL: {0}")]
    InvalidRpcUrl(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("RPC error: {0}")]
    RpcError(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Core domain records: sessions, withdrawal jobs, and ingested deposit events.
//!
//! Amounts are integers in the token's smallest unit throughout; no
//! floating-point value ever enters the monetary path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Lifecycle of a session. Transitions are forward-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, waiting for the matching escrow deposit.
    AwaitingDeposit,
    /// A deposit within tolerance was observed on-chain.
    DepositDetected,
    /// A jittered withdrawal job has been scheduled.
    WithdrawalQueued,
    /// The operator withdrawal confirmed on-chain.
    Completed,
    /// The session cannot progress (e.g. the jittered amount rounded to dust).
    Failed,
}

/// Lifecycle of a withdrawal job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Completed,
    Failed,
}

/// One user's privacy-preserving transfer from funding to trading address.
///
/// Identity fields (`user_address`, `expected_amount`, `new_address`,
/// `encrypted_key_for_user`, `attestation_report`, `key_ref`) are set at
/// creation and never rewritten; only the state machine and the observed
/// transaction hashes mutate afterwards.
#[derive(Debug, Clone)]
pub struct Session {
    /// Internal unique id.
    pub id: String,
    /// Opaque public handle; the single entry point for all queries.
    pub session_token: String,
    /// Lower-cased canonical form of the recovered signer.
    pub user_address: String,
    /// Expected deposit, in the token's smallest unit. Always positive.
    pub expected_amount: u128,
    pub status: SessionStatus,
    /// Fresh account generated by the key enclave.
    pub new_address: String,
    /// Wrapped private key blob, base64-encoded. Only released via claim.
    pub encrypted_key_for_user: String,
    /// Opaque attestation record, delivered verbatim to the caller.
    pub attestation_report: String,
    /// Enclave handle for in-process signing. Never serialized.
    pub key_ref: String,
    pub deposit_tx_hash: Option<String>,
    pub deposit_id: Option<u64>,
    pub withdraw_tx_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a fresh session in `awaiting_deposit`.
    pub fn new(
        session_token: String,
        user_address: String,
        expected_amount: u128,
        new_address: String,
        encrypted_key_for_user: String,
        attestation_report: String,
        key_ref: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_token,
            user_address,
            expected_amount,
            status: SessionStatus::AwaitingDeposit,
            new_address,
            encrypted_key_for_user,
            attestation_report,
            key_ref,
            deposit_tx_hash: None,
            deposit_id: None,
            withdraw_tx_hash: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A scheduled, jittered, not-yet-executed withdrawal from the pool.
#[derive(Debug, Clone)]
pub struct WithdrawalJob {
    /// Unique id; its keccak hash is the on-chain replay-protection key.
    pub id: String,
    /// Back-reference to the owning session. No ownership implied.
    pub session_token: String,
    /// Destination address.
    pub new_address: String,
    /// Jittered amount in the token's smallest unit. Always >= 1.
    pub normalized_amount: u128,
    /// Correlation id carried through to the on-chain withdrawal.
    pub deposit_id: u64,
    /// Absolute time before which the processor must not execute this job.
    pub execute_after: DateTime<Utc>,
    pub status: JobStatus,
}

/// An ingested `Deposited` escrow event. Drives matcher state changes only.
#[derive(Debug, Clone)]
pub struct DepositEvent {
    /// Depositor address, lower-cased.
    pub from: String,
    /// Deposited amount in the token's smallest unit.
    pub amount: u128,
    /// Monotone deposit id assigned by the escrow contract.
    pub deposit_id: u64,
    /// Hash of the deposit transaction.
    pub tx_hash: String,
}

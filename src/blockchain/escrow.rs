// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Escrow contract surface.
//!
//! The escrow is a shared pool: `deposit` pulls tokens from the caller and
//! assigns a monotonically increasing `depositId` starting from one;
//! `operatorWithdraw` is restricted to the operator, refuses a previously
//! used `jobId` (replay protection) and an underfunded pool. Deposited and
//! withdrawn amounts carry no 1:1 accounting; jittered withdrawals always
//! differ from their deposits. Pausability and ownership transfer are
//! operational controls outside this service's protocol.

use alloy::{
    primitives::U256,
    rpc::types::Log,
    sol,
};

use crate::models::DepositEvent;

sol! {
    #[sol(rpc)]
    interface IEscrow {
        event Deposited(address indexed from, uint256 amount, uint256 depositId);
        event Withdrawn(address indexed to, uint256 amount, uint256 indexed depositId, bytes32 jobId);

        function deposit(uint256 amount) external;
        function operatorWithdraw(address to, uint256 amount, uint256 depositId, bytes32 jobId) external;
        function paused() external view returns (bool);
    }
}

/// Decode a `Deposited` log into a [`DepositEvent`].
///
/// Returns `None` for logs that do not carry the expected topic/data shape
/// or whose amount exceeds the service's integer range; the caller logs and
/// skips those, so a malformed event never halts the subscription.
pub fn decode_deposited(log: &Log) -> Option<DepositEvent> {
    // Deposited has 2 topics: [event_sig, from] and data = amount ‖ depositId
    let topics = log.topics();
    if topics.len() < 2 {
        return None;
    }
    let from_topic = topics[1];

    // Extract the address from the topic (last 20 bytes of the 32-byte topic)
    let from = format!("0x{}", alloy::hex::encode(&from_topic[12..]));

    let data = &log.data().data;
    if data.len() < 64 {
        return None;
    }
    let amount: u128 = U256::from_be_slice(&data[..32]).try_into().ok()?;
    let deposit_id: u64 = U256::from_be_slice(&data[32..64]).try_into().ok()?;

    let tx_hash = log.transaction_hash.map(|h| format!("{h:#x}"))?;

    Some(DepositEvent {
        from,
        amount,
        deposit_id,
        tx_hash,
    })
}

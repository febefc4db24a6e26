// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Deposit Watcher
//!
//! Background task that polls the escrow contract for `Deposited` events and
//! feeds them to the matcher in chain order.
//!
//! ## Strategy
//!
//! `eth_getLogs` with the Deposited event topic, chunked from the last
//! processed block to the chain head. On a fresh start the watcher looks
//! back a bounded number of blocks, so recent events may be replayed.
//! Delivery is at-least-once; consumers rely on the matcher's
//! `awaiting_deposit` guard for idempotence.

use std::sync::Arc;
use std::time::Duration;

use alloy::{
    primitives::Address,
    providers::{Provider, ProviderBuilder},
    rpc::types::Filter,
    sol_types::SolEvent,
};
use tokio_util::sync::CancellationToken;

use super::escrow::{self, IEscrow};
use crate::matcher::DepositMatcher;

/// Default block chunk size per `eth_getLogs` query.
const DEFAULT_CHUNK_SIZE: u64 = 2000;

/// Default poll interval when caught up to chain head.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// How far back to look when starting fresh (no checkpoint).
const INITIAL_LOOKBACK_BLOCKS: u64 = 100;

/// Polling `Deposited` subscription that runs as a background tokio task.
pub struct DepositWatcher {
    rpc_url: String,
    escrow_address: Address,
    matcher: Arc<DepositMatcher>,
    poll_interval: Duration,
    chunk_size: u64,
}

impl DepositWatcher {
    pub fn new(rpc_url: String, escrow_address: Address, matcher: Arc<DepositMatcher>) -> Self {
        Self {
            rpc_url,
            escrow_address,
            matcher,
            poll_interval: DEFAULT_POLL_INTERVAL,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Run the watcher loop until the cancellation token is triggered.
    ///
    /// Should be spawned as a background task:
    /// ```rust,ignore
    /// tokio::spawn(watcher.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            escrow = %self.escrow_address,
            interval_secs = self.poll_interval.as_secs(),
            "Deposit watcher starting"
        );

        // The RPC URL was validated when the chain client connected at startup.
        let provider = ProviderBuilder::new()
            .connect_http(self.rpc_url.parse().expect("valid RPC URL"));

        let mut last_processed: Option<u64> = None;

        loop {
            if shutdown.is_cancelled() {
                tracing::info!("Deposit watcher shutting down");
                return;
            }

            // Transient RPC failures leave the checkpoint where it was; the
            // next pass re-reads the same range.
            if let Err(e) = self.watch_step(&provider, &mut last_processed).await {
                tracing::warn!(error = %e, "Deposit watcher step failed, will retry");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {},
                _ = shutdown.cancelled() => {
                    tracing::info!("Deposit watcher shutting down");
                    return;
                }
            }
        }
    }

    /// Execute one polling step: fetch logs from the checkpoint to the head
    /// and hand each decoded event to the matcher.
    async fn watch_step<P: Provider + Clone>(
        &self,
        provider: &P,
        last_processed: &mut Option<u64>,
    ) -> Result<(), WatcherError> {
        let head = provider
            .get_block_number()
            .await
            .map_err(|e| WatcherError::Rpc(e.to_string()))?;

        let start = match *last_processed {
            Some(block) => block + 1,
            None => head.saturating_sub(INITIAL_LOOKBACK_BLOCKS),
        };

        if start > head {
            // Already caught up
            return Ok(());
        }

        let mut from = start;
        while from <= head {
            let to = (from + self.chunk_size - 1).min(head);

            let filter = Filter::new()
                .address(self.escrow_address)
                .event_signature(IEscrow::Deposited::SIGNATURE_HASH)
                .from_block(from)
                .to_block(to);

            let logs = provider
                .get_logs(&filter)
                .await
                .map_err(|e| WatcherError::Rpc(e.to_string()))?;

            for log in &logs {
                match escrow::decode_deposited(log) {
                    Some(event) => {
                        tracing::debug!(
                            from = %event.from,
                            amount = event.amount,
                            deposit_id = event.deposit_id,
                            "Observed escrow deposit"
                        );
                        self.matcher.handle_deposit(&event);
                    }
                    None => {
                        tracing::warn!(
                            block = ?log.block_number,
                            "Skipping malformed Deposited log"
                        );
                    }
                }
            }

            *last_processed = Some(to);
            from = to + 1;
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error("RPC error: {0}")]
    Rpc(String),
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Deposit Matcher
//!
//! Correlates `Deposited` escrow events with sessions awaiting a deposit and
//! schedules the jittered withdrawal for each match.
//!
//! A deposit satisfies a session when it comes from the session's signer and
//! lies within 0.01% of the expected amount (minimum one smallest unit).
//! When several sessions of one signer match the same event, all of them
//! advance in discovery order. The tolerance is narrow and the expected
//! workload is one session per signer at a time, so over-triggering is
//! accepted over a first-match lock.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::jitter;
use crate::models::{DepositEvent, JobStatus, WithdrawalJob};
use crate::queue::JobQueue;
use crate::store::SessionStore;

/// Amount window within which a deposit satisfies a session: 0.01% of the
/// expected amount, at least one smallest unit.
pub fn amount_tolerance(expected: u128) -> u128 {
    std::cmp::max(1, expected / 10_000)
}

/// Matches deposits to sessions and schedules withdrawal jobs.
pub struct DepositMatcher {
    store: Arc<SessionStore>,
    queue: Arc<dyn JobQueue>,
    delay_max_secs: u64,
}

impl DepositMatcher {
    pub fn new(store: Arc<SessionStore>, queue: Arc<dyn JobQueue>, delay_max_secs: u64) -> Self {
        Self {
            store,
            queue,
            delay_max_secs,
        }
    }

    /// Process one `Deposited` event.
    ///
    /// Safe to call with the same event more than once: the store's
    /// `awaiting_deposit` guard refuses a second advance, so replays leave
    /// the final state unchanged. An event from an unknown depositor
    /// mutates nothing.
    pub fn handle_deposit(&self, event: &DepositEvent) {
        let from = event.from.to_lowercase();

        for session in self.store.matching_awaiting(&from) {
            let tolerance = amount_tolerance(session.expected_amount);
            let diff = session.expected_amount.abs_diff(event.amount);
            if diff > tolerance {
                continue;
            }

            // Re-checked under the store lock; a replayed or racing event
            // loses here and is dropped.
            if !self
                .store
                .advance_if_awaiting(&session.session_token, &event.tx_hash, event.deposit_id)
            {
                continue;
            }

            info!(
                session_token = %session.session_token,
                deposit_id = event.deposit_id,
                amount = event.amount,
                expected = session.expected_amount,
                "Deposit matched session"
            );

            self.schedule_withdrawal(
                &session.session_token,
                &session.new_address,
                session.expected_amount,
                event.deposit_id,
            );
        }
    }

    /// Create the jittered withdrawal job for a matched session and advance
    /// it to `withdrawal_queued`.
    fn schedule_withdrawal(
        &self,
        session_token: &str,
        new_address: &str,
        expected_amount: u128,
        deposit_id: u64,
    ) {
        let ppm = jitter::sample_ppm();
        let Some(normalized_amount) = jitter::normalized_amount(expected_amount, ppm) else {
            // Never dispatch a dust transfer.
            warn!(
                session_token = %session_token,
                expected = expected_amount,
                "Jittered amount rounded to zero; failing session"
            );
            self.store.mark_failed(session_token);
            return;
        };

        let delay = jitter::sample_delay(self.delay_max_secs);
        let execute_after = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();

        let job = WithdrawalJob {
            id: uuid::Uuid::new_v4().to_string(),
            session_token: session_token.to_string(),
            new_address: new_address.to_string(),
            normalized_amount,
            deposit_id,
            execute_after,
            status: JobStatus::Pending,
        };
        let job_id = job.id.clone();

        self.store.insert_job(job);
        self.queue.push(&job_id);
        self.store.advance_to_queued(session_token);

        info!(
            session_token = %session_token,
            job_id = %job_id,
            normalized_amount,
            delay_secs = delay.as_secs(),
            "Scheduled withdrawal job"
        );
    }
}

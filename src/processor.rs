// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Batch Processor
//!
//! Background task that executes due withdrawal jobs on a fixed period.
//!
//! ## Tick discipline
//!
//! Only one tick may be in flight at a time; an overlapping trigger returns
//! immediately instead of queuing. Within a tick, eligible jobs are shuffled
//! before submission: the shuffle decouples withdrawal order from
//! session-creation order across concurrent users. Submissions are strictly
//! sequential because the operator account has a single nonce stream.
//!
//! ## Failure handling
//!
//! A failed or reverted submission leaves the job pending with a randomized
//! backoff on `execute_after`. Jobs are never removed on failure; they live
//! until success or operator intervention.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::seq::SliceRandom;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::blockchain::{job_id32, ChainGateway};
use crate::config::TICK_PERIOD_SECS;
use crate::jitter;
use crate::models::{JobStatus, WithdrawalJob};
use crate::queue::JobQueue;
use crate::store::SessionStore;

/// Periodic withdrawal executor.
pub struct BatchProcessor {
    store: Arc<SessionStore>,
    queue: Arc<dyn JobQueue>,
    chain: Arc<dyn ChainGateway>,
    tick_period: Duration,
    /// Held for the duration of a tick; `try_lock` makes overlapping ticks
    /// skip rather than queue.
    tick_guard: tokio::sync::Mutex<()>,
}

impl BatchProcessor {
    pub fn new(
        store: Arc<SessionStore>,
        queue: Arc<dyn JobQueue>,
        chain: Arc<dyn ChainGateway>,
    ) -> Self {
        Self {
            store,
            queue,
            chain,
            tick_period: Duration::from_secs(TICK_PERIOD_SECS),
            tick_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// Run the processor loop until the cancellation token is triggered.
    ///
    /// Should be spawned as a background task:
    /// ```rust,ignore
    /// tokio::spawn(processor.run(shutdown.clone()));
    /// ```
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            period_secs = self.tick_period.as_secs(),
            "Batch processor starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("Batch processor shutting down");
                return;
            }

            self.tick().await;

            tokio::select! {
                _ = tokio::time::sleep(self.tick_period) => {},
                _ = shutdown.cancelled() => {
                    info!("Batch processor shutting down");
                    return;
                }
            }
        }
    }

    /// Execute one tick: collect eligible jobs, shuffle, submit sequentially.
    ///
    /// Returns immediately if another tick is already in flight.
    pub async fn tick(&self) {
        let Ok(_guard) = self.tick_guard.try_lock() else {
            debug!("Withdrawal tick already in flight, skipping");
            return;
        };

        let now = Utc::now();
        let mut eligible: Vec<WithdrawalJob> = self
            .queue
            .scan()
            .iter()
            // Unknown ids are discarded; the job table is authoritative.
            .filter_map(|id| self.store.job(id))
            .filter(|job| job.status == JobStatus::Pending && job.execute_after <= now)
            .collect();

        if eligible.is_empty() {
            return;
        }

        eligible.shuffle(&mut rand::thread_rng());

        info!(
            count = eligible.len(),
            active_sessions = self.store.active_session_count(),
            "Executing due withdrawal jobs"
        );

        for job in &eligible {
            self.execute_job(job).await;
        }
    }

    async fn execute_job(&self, job: &WithdrawalJob) {
        // The same internal id always hashes to the same bytes32, so a retry
        // hits the contract's replay guard instead of double-spending.
        let onchain_id = job_id32(&job.id);

        match self
            .chain
            .submit_withdrawal(
                &job.new_address,
                job.normalized_amount,
                job.deposit_id,
                onchain_id,
            )
            .await
        {
            Ok(outcome) if outcome.confirmed_ok => {
                self.store.complete_job(&job.id, &outcome.tx_hash);
                self.queue.remove(&job.id);
                info!(
                    job_id = %job.id,
                    tx_hash = %outcome.tx_hash,
                    amount = job.normalized_amount,
                    "Withdrawal confirmed"
                );
            }
            Ok(outcome) => {
                warn!(
                    job_id = %job.id,
                    tx_hash = %outcome.tx_hash,
                    "Withdrawal mined with non-success status, will retry"
                );
                self.reschedule(job);
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Withdrawal submission failed, will retry");
                self.reschedule(job);
            }
        }
    }

    fn reschedule(&self, job: &WithdrawalJob) {
        let backoff = jitter::retry_backoff();
        let next = Utc::now() + chrono::Duration::from_std(backoff).unwrap_or_default();
        self.store.reschedule_job(&job.id, next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::{ChainClientError, TxOutcome};
    use crate::models::{Session, SessionStatus};
    use crate::queue::InMemoryJobQueue;
    use alloy::primitives::B256;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Chain stub with scripted outcomes and a submission counter.
    struct MockChain {
        submissions: AtomicUsize,
        mode: MockMode,
        delay: Duration,
    }

    enum MockMode {
        Confirm,
        Revert,
        Error,
    }

    impl MockChain {
        fn new(mode: MockMode) -> Self {
            Self {
                submissions: AtomicUsize::new(0),
                mode,
                delay: Duration::ZERO,
            }
        }

        fn slow(mode: MockMode, delay: Duration) -> Self {
            Self {
                submissions: AtomicUsize::new(0),
                mode,
                delay,
            }
        }

        fn count(&self) -> usize {
            self.submissions.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChainGateway for MockChain {
        async fn submit_withdrawal(
            &self,
            _to: &str,
            _amount: u128,
            _deposit_id: u64,
            _job_id: B256,
        ) -> Result<TxOutcome, ChainClientError> {
            self.submissions.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match self.mode {
                MockMode::Confirm => Ok(TxOutcome {
                    tx_hash: "0xwithdraw".into(),
                    confirmed_ok: true,
                }),
                MockMode::Revert => Ok(TxOutcome {
                    tx_hash: "0xreverted".into(),
                    confirmed_ok: false,
                }),
                MockMode::Error => Err(ChainClientError::RpcError("connection reset".into())),
            }
        }

        async fn fund_gas(&self, _to: &str) -> Result<String, ChainClientError> {
            Ok("0xgas".into())
        }
    }

    fn queued_session(store: &SessionStore, token: &str) {
        store.create(Session::new(
            token.to_string(),
            "0xaaa".into(),
            2_000_000,
            "0x00000000000000000000000000000000000000aa".into(),
            "blob".into(),
            "report".into(),
            "ref".into(),
        ));
        store.advance_if_awaiting(token, "0xdeposit", 7);
        store.advance_to_queued(token);
    }

    fn pending_job(id: &str, token: &str, execute_after: chrono::DateTime<Utc>) -> WithdrawalJob {
        WithdrawalJob {
            id: id.to_string(),
            session_token: token.to_string(),
            new_address: "0x00000000000000000000000000000000000000aa".into(),
            normalized_amount: 1_999_990,
            deposit_id: 7,
            execute_after,
            status: JobStatus::Pending,
        }
    }

    fn processor(
        store: &Arc<SessionStore>,
        queue: &Arc<InMemoryJobQueue>,
        chain: &Arc<MockChain>,
    ) -> BatchProcessor {
        BatchProcessor::new(
            store.clone(),
            queue.clone() as Arc<dyn JobQueue>,
            chain.clone() as Arc<dyn ChainGateway>,
        )
    }

    #[tokio::test]
    async fn confirmed_job_completes_session_and_drains_queue() {
        let store = Arc::new(SessionStore::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        let chain = Arc::new(MockChain::new(MockMode::Confirm));

        queued_session(&store, "t1");
        store.insert_job(pending_job("j1", "t1", Utc::now()));
        queue.push("j1");

        processor(&store, &queue, &chain).tick().await;

        assert_eq!(chain.count(), 1);
        assert!(queue.scan().is_empty());
        assert!(store.job("j1").is_none());

        let session = store.get_for_read("t1").unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.withdraw_tx_hash.as_deref(), Some("0xwithdraw"));
    }

    #[tokio::test]
    async fn future_jobs_are_not_eligible() {
        let store = Arc::new(SessionStore::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        let chain = Arc::new(MockChain::new(MockMode::Confirm));

        queued_session(&store, "t1");
        store.insert_job(pending_job(
            "j1",
            "t1",
            Utc::now() + chrono::Duration::seconds(60),
        ));
        queue.push("j1");

        processor(&store, &queue, &chain).tick().await;

        assert_eq!(chain.count(), 0);
        assert_eq!(queue.scan(), vec!["j1"]);
        assert_eq!(
            store.get_for_read("t1").unwrap().status,
            SessionStatus::WithdrawalQueued
        );
    }

    #[tokio::test]
    async fn failed_submission_keeps_job_pending_with_backoff() {
        let store = Arc::new(SessionStore::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        let chain = Arc::new(MockChain::new(MockMode::Error));

        queued_session(&store, "t1");
        store.insert_job(pending_job("j1", "t1", Utc::now()));
        queue.push("j1");

        let before = Utc::now();
        processor(&store, &queue, &chain).tick().await;

        assert_eq!(chain.count(), 1);
        assert_eq!(queue.scan(), vec!["j1"]);

        let job = store.job("j1").unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.execute_after >= before + chrono::Duration::seconds(30));
        assert!(job.execute_after <= Utc::now() + chrono::Duration::seconds(120));

        // The session stays queued and will be retried.
        assert_eq!(
            store.get_for_read("t1").unwrap().status,
            SessionStatus::WithdrawalQueued
        );
    }

    #[tokio::test]
    async fn reverted_receipt_is_treated_as_failure() {
        let store = Arc::new(SessionStore::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        let chain = Arc::new(MockChain::new(MockMode::Revert));

        queued_session(&store, "t1");
        store.insert_job(pending_job("j1", "t1", Utc::now()));
        queue.push("j1");

        processor(&store, &queue, &chain).tick().await;

        assert_eq!(queue.scan(), vec!["j1"]);
        assert_eq!(store.job("j1").unwrap().status, JobStatus::Pending);
        assert_eq!(
            store.get_for_read("t1").unwrap().status,
            SessionStatus::WithdrawalQueued
        );
    }

    #[tokio::test]
    async fn concurrent_ticks_submit_each_job_once() {
        let store = Arc::new(SessionStore::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        let chain = Arc::new(MockChain::slow(
            MockMode::Confirm,
            Duration::from_millis(50),
        ));

        queued_session(&store, "t1");
        store.insert_job(pending_job("j1", "t1", Utc::now()));
        queue.push("j1");

        let processor = Arc::new(processor(&store, &queue, &chain));
        let a = processor.clone();
        let b = processor.clone();
        tokio::join!(a.tick(), b.tick());

        // The second tick found the guard held and returned immediately.
        assert_eq!(chain.count(), 1);
        assert_eq!(
            store.get_for_read("t1").unwrap().status,
            SessionStatus::Completed
        );
    }

    #[tokio::test]
    async fn deposit_to_completed_flow() {
        use crate::matcher::DepositMatcher;
        use crate::models::DepositEvent;

        let store = Arc::new(SessionStore::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        let chain = Arc::new(MockChain::new(MockMode::Confirm));

        store.create(Session::new(
            "t1".into(),
            "0xaaa".into(),
            2_000_000,
            "0x00000000000000000000000000000000000000aa".into(),
            "blob".into(),
            "report".into(),
            "ref".into(),
        ));

        // Deposit arrives; the matcher schedules a jittered job.
        let matcher = DepositMatcher::new(store.clone(), queue.clone(), 1);
        matcher.handle_deposit(&DepositEvent {
            from: "0xaaa".into(),
            amount: 2_000_000,
            deposit_id: 7,
            tx_hash: "0xdeposit".into(),
        });

        let ids = queue.scan();
        assert_eq!(ids.len(), 1);
        let job = store.job(&ids[0]).unwrap();
        assert!((1_999_940..=2_000_080).contains(&job.normalized_amount));

        // Wait out the (1 s max) delay, then let the processor run.
        tokio::time::sleep(Duration::from_millis(1100)).await;
        processor(&store, &queue, &chain).tick().await;

        assert_eq!(chain.count(), 1);
        assert!(queue.scan().is_empty());
        assert!(store.job(&ids[0]).is_none());

        let session = store.get_for_read("t1").unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.deposit_tx_hash.as_deref(), Some("0xdeposit"));
        assert_eq!(session.withdraw_tx_hash.as_deref(), Some("0xwithdraw"));
        assert_eq!(session.deposit_id, Some(7));
    }

    #[tokio::test]
    async fn unknown_queue_ids_are_discarded() {
        let store = Arc::new(SessionStore::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        let chain = Arc::new(MockChain::new(MockMode::Confirm));

        queue.push("ghost");
        processor(&store, &queue, &chain).tick().await;
        assert_eq!(chain.count(), 0);
    }
}

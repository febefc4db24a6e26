// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Session Store
//!
//! The only shared mutable state in the service: the session map and the
//! pending-job table. All mutation goes through typed transition methods so
//! the forward-only state machine is enforced in one place; serialization is
//! internal to this module (a single lock is sufficient at the expected
//! workload).
//!
//! Lookups scan linearly over active sessions. The active-session count is
//! small; an index on `user_address` is not warranted yet.
//!
//! State is volatile, matching the in-memory job queue: restart loses all
//! in-flight sessions.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::models::{JobStatus, Session, SessionStatus, WithdrawalJob};

#[derive(Default)]
struct Inner {
    /// Keyed by session token.
    sessions: HashMap<String, Session>,
    /// Keyed by job id.
    jobs: HashMap<String, WithdrawalJob>,
}

/// In-memory store of sessions and pending withdrawal jobs.
#[derive(Default)]
pub struct SessionStore {
    inner: Mutex<Inner>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly created session.
    pub fn create(&self, session: Session) {
        let mut inner = self.inner.lock().unwrap();
        inner.sessions.insert(session.session_token.clone(), session);
    }

    /// Read a session by token.
    pub fn get_for_read(&self, session_token: &str) -> Option<Session> {
        let inner = self.inner.lock().unwrap();
        inner.sessions.get(session_token).cloned()
    }

    /// All `awaiting_deposit` sessions for a (lower-cased) signer address.
    pub fn matching_awaiting(&self, user_address: &str) -> Vec<Session> {
        let inner = self.inner.lock().unwrap();
        inner
            .sessions
            .values()
            .filter(|s| {
                s.status == SessionStatus::AwaitingDeposit && s.user_address == user_address
            })
            .cloned()
            .collect()
    }

    /// Advance `awaiting_deposit` -> `deposit_detected`, recording the
    /// observed deposit. Returns `false` if the session is unknown or has
    /// already moved past `awaiting_deposit`; this guard makes event
    /// replay idempotent.
    pub fn advance_if_awaiting(
        &self,
        session_token: &str,
        deposit_tx_hash: &str,
        deposit_id: u64,
    ) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(session) = inner.sessions.get_mut(session_token) else {
            return false;
        };
        if session.status != SessionStatus::AwaitingDeposit {
            return false;
        }
        session.status = SessionStatus::DepositDetected;
        session.deposit_tx_hash = Some(deposit_tx_hash.to_string());
        session.deposit_id = Some(deposit_id);
        session.updated_at = Utc::now();
        true
    }

    /// Advance `deposit_detected` -> `withdrawal_queued`.
    pub fn advance_to_queued(&self, session_token: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(session) = inner.sessions.get_mut(session_token) else {
            return false;
        };
        if session.status != SessionStatus::DepositDetected {
            return false;
        }
        session.status = SessionStatus::WithdrawalQueued;
        session.updated_at = Utc::now();
        true
    }

    /// Mark a non-terminal session as failed.
    pub fn mark_failed(&self, session_token: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(session) = inner.sessions.get_mut(session_token) else {
            return false;
        };
        if matches!(
            session.status,
            SessionStatus::Completed | SessionStatus::Failed
        ) {
            return false;
        }
        session.status = SessionStatus::Failed;
        session.updated_at = Utc::now();
        true
    }

    // =========================================================================
    // Pending-job table
    // =========================================================================

    /// Insert a newly scheduled job.
    pub fn insert_job(&self, job: WithdrawalJob) {
        let mut inner = self.inner.lock().unwrap();
        inner.jobs.insert(job.id.clone(), job);
    }

    /// Read a job by id.
    pub fn job(&self, job_id: &str) -> Option<WithdrawalJob> {
        let inner = self.inner.lock().unwrap();
        inner.jobs.get(job_id).cloned()
    }

    /// Push a pending job's `execute_after` into the future after a failed
    /// submission attempt. The job stays pending; it is never removed on
    /// failure.
    pub fn reschedule_job(&self, job_id: &str, execute_after: DateTime<Utc>) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(job) = inner.jobs.get_mut(job_id) else {
            return false;
        };
        if job.status != JobStatus::Pending {
            return false;
        }
        job.execute_after = execute_after;
        true
    }

    /// Complete a job after its withdrawal confirmed: remove it from the job
    /// table, write the withdrawal hash to its session and advance the
    /// session to `completed`. Returns the owning session token, or `None`
    /// if the job was unknown or not pending.
    pub fn complete_job(&self, job_id: &str, withdraw_tx_hash: &str) -> Option<String> {
        let mut inner = self.inner.lock().unwrap();
        let job = inner.jobs.get(job_id)?;
        if job.status != JobStatus::Pending {
            return None;
        }
        let job = inner.jobs.remove(job_id)?;

        if let Some(session) = inner.sessions.get_mut(&job.session_token) {
            if session.status == SessionStatus::WithdrawalQueued {
                session.status = SessionStatus::Completed;
                session.withdraw_tx_hash = Some(withdraw_tx_hash.to_string());
                session.updated_at = Utc::now();
            }
        }
        Some(job.session_token)
    }

    /// Number of sessions not yet terminal.
    pub fn active_session_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner
            .sessions
            .values()
            .filter(|s| {
                !matches!(
                    s.status,
                    SessionStatus::Completed | SessionStatus::Failed
                )
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_session(token: &str, user: &str) -> Session {
        Session::new(
            token.to_string(),
            user.to_string(),
            2_000_000,
            "0xdest".into(),
            "blob".into(),
            "report".into(),
            "ref".into(),
        )
    }

    fn sample_job(id: &str, token: &str) -> WithdrawalJob {
        WithdrawalJob {
            id: id.to_string(),
            session_token: token.to_string(),
            new_address: "0xdest".into(),
            normalized_amount: 1_999_990,
            deposit_id: 7,
            execute_after: Utc::now(),
            status: JobStatus::Pending,
        }
    }

    #[test]
    fn transitions_are_forward_only() {
        let store = SessionStore::new();
        store.create(sample_session("t1", "0xaaa"));

        // Cannot queue before a deposit was detected.
        assert!(!store.advance_to_queued("t1"));

        assert!(store.advance_if_awaiting("t1", "0xhash", 7));
        let session = store.get_for_read("t1").unwrap();
        assert_eq!(session.status, SessionStatus::DepositDetected);
        assert_eq!(session.deposit_id, Some(7));

        // Replayed event: the awaiting guard refuses a second advance.
        assert!(!store.advance_if_awaiting("t1", "0xother", 8));
        let session = store.get_for_read("t1").unwrap();
        assert_eq!(session.deposit_tx_hash.as_deref(), Some("0xhash"));

        assert!(store.advance_to_queued("t1"));
        assert!(!store.advance_to_queued("t1"));
    }

    #[test]
    fn identity_fields_survive_transitions() {
        let store = SessionStore::new();
        store.create(sample_session("t1", "0xaaa"));
        let before = store.get_for_read("t1").unwrap();

        store.advance_if_awaiting("t1", "0xhash", 7);
        store.advance_to_queued("t1");

        let after = store.get_for_read("t1").unwrap();
        assert_eq!(after.new_address, before.new_address);
        assert_eq!(after.encrypted_key_for_user, before.encrypted_key_for_user);
        assert_eq!(after.attestation_report, before.attestation_report);
        assert_eq!(after.user_address, before.user_address);
        assert_eq!(after.expected_amount, before.expected_amount);
        assert_eq!(after.created_at, before.created_at);
        assert!(after.updated_at >= before.updated_at);
    }

    #[test]
    fn matching_awaiting_filters_by_signer_and_state() {
        let store = SessionStore::new();
        store.create(sample_session("t1", "0xaaa"));
        store.create(sample_session("t2", "0xbbb"));
        store.create(sample_session("t3", "0xaaa"));
        store.advance_if_awaiting("t3", "0xhash", 1);

        let matches = store.matching_awaiting("0xaaa");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].session_token, "t1");

        assert!(store.matching_awaiting("0xccc").is_empty());
    }

    #[test]
    fn complete_job_removes_job_and_completes_session() {
        let store = SessionStore::new();
        store.create(sample_session("t1", "0xaaa"));
        store.advance_if_awaiting("t1", "0xhash", 7);
        store.advance_to_queued("t1");
        store.insert_job(sample_job("j1", "t1"));

        let token = store.complete_job("j1", "0xwithdraw").unwrap();
        assert_eq!(token, "t1");
        assert!(store.job("j1").is_none());

        let session = store.get_for_read("t1").unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.withdraw_tx_hash.as_deref(), Some("0xwithdraw"));

        // A completed job cannot complete twice.
        assert!(store.complete_job("j1", "0xagain").is_none());
    }

    #[test]
    fn reschedule_keeps_job_pending() {
        let store = SessionStore::new();
        store.insert_job(sample_job("j1", "t1"));

        let later = Utc::now() + chrono::Duration::seconds(90);
        assert!(store.reschedule_job("j1", later));

        let job = store.job("j1").unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.execute_after, later);

        assert!(!store.reschedule_job("missing", later));
    }

    #[test]
    fn mark_failed_is_terminal() {
        let store = SessionStore::new();
        store.create(sample_session("t1", "0xaaa"));
        assert!(store.mark_failed("t1"));
        assert!(!store.mark_failed("t1"));
        assert!(!store.advance_if_awaiting("t1", "0xhash", 1));
        assert_eq!(store.active_session_count(), 0);
    }
}

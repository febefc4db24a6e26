// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Application State
//!
//! Shared state passed to all Axum request handlers via the `State`
//! extractor. `AppState` is `Clone` and `Send + Sync`; every field is
//! reference-counted.
//!
//! Handlers are readers of the session store except for session creation,
//! which inserts a fresh record; the matcher and the batch processor are the
//! only writers of existing records. The job queue is owned by those
//! background components and never surfaces here.

use std::sync::Arc;

use crate::blockchain::ChainGateway;
use crate::enclave::KeyEnclave;
use crate::store::SessionStore;

/// Shared application state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session and pending-job state.
    pub store: Arc<SessionStore>,
    /// Key-generation boundary.
    pub enclave: Arc<KeyEnclave>,
    /// Transaction-submitting chain surface (gas pre-funding).
    pub chain: Arc<dyn ChainGateway>,
}

impl AppState {
    pub fn new(
        store: Arc<SessionStore>,
        enclave: Arc<KeyEnclave>,
        chain: Arc<dyn ChainGateway>,
    ) -> Self {
        Self {
            store,
            enclave,
            chain,
        }
    }
}

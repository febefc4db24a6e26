// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use obscura_server::api;
use obscura_server::blockchain::{watcher::DepositWatcher, ChainClient};
use obscura_server::config::Config;
use obscura_server::enclave::KeyEnclave;
use obscura_server::matcher::DepositMatcher;
use obscura_server::processor::BatchProcessor;
use obscura_server::queue::{InMemoryJobQueue, JobQueue};
use obscura_server::state::AppState;
use obscura_server::store::SessionStore;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "obscura_server=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Configuration error");
            std::process::exit(1);
        }
    };

    let chain = match ChainClient::connect(&config).await {
        Ok(chain) => chain,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize chain client");
            std::process::exit(1);
        }
    };
    tracing::info!(
        operator = %chain.operator_address(),
        escrow = %config.escrow_address,
        rpc = %config.chain_rpc,
        "Chain client ready"
    );
    let chain = Arc::new(chain);

    let store = Arc::new(SessionStore::new());
    let queue: Arc<dyn JobQueue> = Arc::new(InMemoryJobQueue::new());
    if let Some(queue_url) = &config.queue_url {
        tracing::warn!(
            queue_url = %queue_url,
            "QUEUE_URL is set but only the in-memory queue adapter is compiled in; jobs will not survive restart"
        );
    }
    let enclave = Arc::new(KeyEnclave::new());

    let shutdown = CancellationToken::new();

    let matcher = Arc::new(DepositMatcher::new(
        store.clone(),
        queue.clone(),
        config.delay_max_secs,
    ));
    let watcher = DepositWatcher::new(
        config.chain_rpc.clone(),
        config.escrow_address,
        matcher.clone(),
    );
    tokio::spawn(watcher.run(shutdown.clone()));

    let processor = Arc::new(BatchProcessor::new(
        store.clone(),
        queue.clone(),
        chain.clone(),
    ));
    tokio::spawn(processor.run(shutdown.clone()));

    let state = AppState::new(store, enclave, chain);
    let app = api::router(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port)
        .parse()
        .expect("Failed to parse bind address");

    tracing::info!(%addr, "Obscura unlinker server listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind TCP listener");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move {
                tokio::signal::ctrl_c().await.ok();
                tracing::info!("Shutdown signal received");
                shutdown.cancel();
            }
        })
        .await
        .expect("Server failed");
}

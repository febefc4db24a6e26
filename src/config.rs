// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is loaded from the environment once at startup. Missing
//! required variables are a fatal startup error.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `CHAIN_RPC` | EVM RPC endpoint URL | Required |
//! | `ESCROW_CONTRACT_ADDRESS` | Escrow contract address (0x-prefixed) | Required |
//! | `OPERATOR_PRIVATE_KEY` | Operator signing key (hex) | Ephemeral key, address logged |
//! | `PORT` | HTTP listen port | `3000` |
//! | `QUEUE_URL` | Job queue connection string | Unset (in-memory queue) |
//! | `WITHDRAW_DELAY_MAX_SECS` | Upper bound of the withdrawal delay window | `10` (clamped to 1..=60) |
//! | `CORS_ALLOWED_ORIGINS` | Comma-separated allowed origins | Permissive (development only) |
//! | `RUST_LOG` | Log level filter | `obscura_server=info` |

use std::env;

use alloy::primitives::Address;

/// Default HTTP listen port.
pub const DEFAULT_PORT: u16 = 3000;

/// Native-token amount sent to every fresh address so it can move funds later.
/// 0.01 native units at 18 decimals.
pub const GAS_PREFUND_WEI: u128 = 10_000_000_000_000_000;

/// Period of the batch processor tick.
pub const TICK_PERIOD_SECS: u64 = 10;

/// Default upper bound of the withdrawal delay window, in seconds.
pub const DEFAULT_DELAY_MAX_SECS: u64 = 10;

/// Hard ceiling for `WITHDRAW_DELAY_MAX_SECS`.
pub const DELAY_MAX_CEILING_SECS: u64 = 60;

/// Errors raised while reading the environment at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// EVM RPC endpoint URL.
    pub chain_rpc: String,
    /// Escrow contract address to watch and withdraw from.
    pub escrow_address: Address,
    /// Operator signing key as provided; `None` selects an ephemeral key.
    pub operator_private_key: Option<String>,
    /// HTTP listen port.
    pub port: u16,
    /// External job queue connection string, if any.
    pub queue_url: Option<String>,
    /// Upper bound of the withdrawal delay window, in seconds.
    pub delay_max_secs: u64,
}

impl Config {
    /// Load configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let chain_rpc = env::var("CHAIN_RPC").map_err(|_| ConfigError::Missing("CHAIN_RPC"))?;

        let escrow_raw = env::var("ESCROW_CONTRACT_ADDRESS")
            .map_err(|_| ConfigError::Missing("ESCROW_CONTRACT_ADDRESS"))?;
        let escrow_address = escrow_raw
            .parse::<Address>()
            .map_err(|e| ConfigError::Invalid {
                name: "ESCROW_CONTRACT_ADDRESS",
                reason: e.to_string(),
            })?;

        let operator_private_key = env::var("OPERATOR_PRIVATE_KEY").ok();

        let port = match env::var("PORT") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                name: "PORT",
                reason: format!("{raw:?} is not a valid port number"),
            })?,
            Err(_) => DEFAULT_PORT,
        };

        let queue_url = env::var("QUEUE_URL").ok();

        let delay_max_secs = match env::var("WITHDRAW_DELAY_MAX_SECS") {
            Ok(raw) => {
                let parsed: u64 = raw.parse().map_err(|_| ConfigError::Invalid {
                    name: "WITHDRAW_DELAY_MAX_SECS",
                    reason: format!("{raw:?} is not a number of seconds"),
                })?;
                parsed.clamp(1, DELAY_MAX_CEILING_SECS)
            }
            Err(_) => DEFAULT_DELAY_MAX_SECS,
        };

        Ok(Self {
            chain_rpc,
            escrow_address,
            operator_private_key,
            port,
            queue_url,
            delay_max_secs,
        })
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Operator-signed chain client.
//!
//! Wraps a single alloy HTTP provider carrying the operator wallet. The
//! operator account has exactly one nonce stream; callers submit strictly
//! sequentially and the provider's nonce filler does the rest.

use std::str::FromStr;

use alloy::{
    network::{Ethereum, EthereumWallet},
    primitives::{Address, B256, U256},
    providers::{
        fillers::{
            BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller,
            WalletFiller,
        },
        Identity, Provider, ProviderBuilder, RootProvider,
    },
    rpc::types::TransactionRequest,
    signers::local::PrivateKeySigner,
};
use async_trait::async_trait;

use super::escrow::IEscrow;
use super::{ChainClientError, ChainGateway, TxOutcome};
use crate::config::{Config, GAS_PREFUND_WEI};

/// HTTP provider type with all fillers and the operator wallet.
type OperatorProvider = FillProvider<
    JoinFill<
        JoinFill<
            Identity,
            JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>,
        >,
        WalletFiller<EthereumWallet>,
    >,
    RootProvider<Ethereum>,
>;

/// Chain client bound to the escrow contract and the operator key.
pub struct ChainClient {
    provider: OperatorProvider,
    escrow_address: Address,
    operator_address: Address,
}

impl ChainClient {
    /// Connect to the configured RPC endpoint with the operator wallet.
    ///
    /// An absent or invalid `OPERATOR_PRIVATE_KEY` falls back to an
    /// ephemeral key whose address is logged; the process stays up so the
    /// read paths keep working against a test chain.
    pub async fn connect(config: &Config) -> Result<Self, ChainClientError> {
        let url: url::Url = config
            .chain_rpc
            .parse()
            .map_err(|e: url::ParseError| ChainClientError::InvalidRpcUrl(e.to_string()))?;

        let signer = operator_signer(config.operator_private_key.as_deref());
        let operator_address = signer.address();
        let wallet = EthereumWallet::from(signer);

        let provider = ProviderBuilder::new().wallet(wallet).connect_http(url);

        Ok(Self {
            provider,
            escrow_address: config.escrow_address,
            operator_address,
        })
    }

    /// Address of the operator signing identity.
    pub fn operator_address(&self) -> Address {
        self.operator_address
    }
}

/// Resolve the operator signer from the configured key, or generate an
/// ephemeral one.
fn operator_signer(raw: Option<&str>) -> PrivateKeySigner {
    if let Some(raw) = raw {
        let trimmed = raw.trim().trim_start_matches("0x");
        match alloy::hex::decode(trimmed)
            .ok()
            .and_then(|bytes| PrivateKeySigner::from_slice(&bytes).ok())
        {
            Some(signer) => return signer,
            None => tracing::warn!(
                "OPERATOR_PRIVATE_KEY is not a valid secp256k1 key - falling back to an ephemeral key"
            ),
        }
    }

    let signer = PrivateKeySigner::random();
    tracing::warn!(
        operator = %signer.address(),
        "no operator key configured - generated an ephemeral operator key for this process"
    );
    signer
}

#[async_trait]
impl ChainGateway for ChainClient {
    async fn submit_withdrawal(
        &self,
        to: &str,
        amount: u128,
        deposit_id: u64,
        job_id: B256,
    ) -> Result<TxOutcome, ChainClientError> {
        let to_addr = Address::from_str(to)
            .map_err(|e| ChainClientError::InvalidAddress(e.to_string()))?;

        let escrow = IEscrow::new(self.escrow_address, self.provider.clone());
        let pending = escrow
            .operatorWithdraw(to_addr, U256::from(amount), U256::from(deposit_id), job_id)
            .send()
            .await
            .map_err(|e| ChainClientError::TransactionFailed(format!("Failed to send: {e}")))?;

        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| ChainClientError::RpcError(format!("Failed to get receipt: {e}")))?;

        Ok(TxOutcome {
            tx_hash: format!("{:#x}", receipt.transaction_hash),
            confirmed_ok: receipt.status(),
        })
    }

    async fn fund_gas(&self, to: &str) -> Result<String, ChainClientError> {
        let to_addr = Address::from_str(to)
            .map_err(|e| ChainClientError::InvalidAddress(e.to_string()))?;

        let tx = TransactionRequest::default()
            .to(to_addr)
            .value(U256::from(GAS_PREFUND_WEI));

        let pending = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(|e| ChainClientError::TransactionFailed(format!("Failed to send: {e}")))?;

        Ok(format!("{:?}", pending.tx_hash()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    #[test]
    fn operator_signer_parses_a_configured_key() {
        let signer = operator_signer(Some(TEST_KEY));
        // Address derived from the well-known test vector key.
        assert_eq!(
            signer.address().to_string().to_lowercase(),
            "0x2c7536e3605d9c16a7a3d7b1898e529396a65c23"
        );
    }

    #[test]
    fn operator_signer_falls_back_on_garbage() {
        let a = operator_signer(Some("not-a-key"));
        let b = operator_signer(None);
        // Both are ephemeral and therefore distinct.
        assert_ne!(a.address(), b.address());
    }
}

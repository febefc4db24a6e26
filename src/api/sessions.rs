// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session lifecycle endpoints: creation, status, and wallet claim.
//!
//! The signer address is always recovered from the submitted signature,
//! never taken from the request body. The wrapped key is released only
//! through the claim endpoint, which is idempotent and deliberately
//! available before the on-chain deposit so the caller can inspect the
//! target address first.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};

use crate::{
    error::ApiError,
    models::{Session, SessionStatus},
    state::AppState,
};

// =============================================================================
// Request/Response Types
// =============================================================================

/// Request to open an unlinking session.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RequestWalletBody {
    /// Caller-supplied message; must embed a high-resolution timestamp so a
    /// reused message cannot replay across reboots.
    #[serde(default)]
    pub message: Option<String>,
    /// ECDSA signature over `message` (0x-prefixed, 65 bytes hex).
    #[serde(default)]
    pub signature: Option<String>,
    /// Expected deposit as a decimal string, in the token's smallest unit.
    #[serde(default)]
    pub expected_amount: Option<String>,
}

/// Response after opening a session.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RequestWalletResponse {
    /// Opaque handle for all later queries.
    pub session_token: String,
    /// Fresh destination address.
    pub new_address: String,
}

/// Query carrying the session token.
#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct SessionTokenQuery {
    pub session_token: String,
}

/// Session record as exposed by the status endpoint. The wrapped key and
/// the enclave key reference are never included here.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusResponse {
    pub session_token: String,
    pub user_address: String,
    pub expected_amount: String,
    pub status: SessionStatus,
    pub new_address: String,
    pub attestation_report: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deposit_tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deposit_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub withdraw_tx_hash: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Session> for SessionStatusResponse {
    fn from(session: Session) -> Self {
        Self {
            session_token: session.session_token,
            user_address: session.user_address,
            expected_amount: session.expected_amount.to_string(),
            status: session.status,
            new_address: session.new_address,
            attestation_report: session.attestation_report,
            deposit_tx_hash: session.deposit_tx_hash,
            deposit_id: session.deposit_id,
            withdraw_tx_hash: session.withdraw_tx_hash,
            created_at: session.created_at.to_rfc3339(),
            updated_at: session.updated_at.to_rfc3339(),
        }
    }
}

/// Response of the claim endpoint.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClaimWalletResponse {
    pub new_address: String,
    /// Base64 blob: `wrappingKey(32) ‖ nonce(12) ‖ authTag(16) ‖ ciphertext(32)`.
    pub encrypted_key_for_user: String,
    pub attestation_report: String,
}

// =============================================================================
// Handlers
// =============================================================================

/// Open a session: verify the signature, mint a fresh wallet, schedule
/// nothing yet. The deposit matcher takes over once funds arrive.
#[utoipa::path(
    post,
    path = "/api/request-wallet",
    tag = "Sessions",
    request_body = RequestWalletBody,
    responses(
        (status = 201, description = "Session created", body = RequestWalletResponse),
        (status = 400, description = "Missing fields or invalid signature"),
        (status = 500, description = "Key generation failed")
    )
)]
pub async fn request_wallet(
    State(state): State<AppState>,
    Json(body): Json<RequestWalletBody>,
) -> Result<(StatusCode, Json<RequestWalletResponse>), ApiError> {
    let message = body
        .message
        .filter(|m| !m.is_empty())
        .ok_or_else(|| ApiError::bad_request("message is required"))?;
    let signature_raw = body
        .signature
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request("signature is required"))?;
    let expected_raw = body
        .expected_amount
        .ok_or_else(|| ApiError::bad_request("expectedAmount is required"))?;

    let expected_amount: u128 = expected_raw.parse().map_err(|_| {
        ApiError::bad_request("expectedAmount must be a decimal integer in the token's smallest unit")
    })?;
    if expected_amount == 0 {
        return Err(ApiError::bad_request("expectedAmount must be positive"));
    }

    // The signer is whoever produced the signature; the body never names it.
    let signature: alloy::primitives::Signature = signature_raw
        .parse()
        .map_err(|_| ApiError::bad_request("signature is not a valid ECDSA signature"))?;
    let user_address = signature
        .recover_address_from_msg(message.as_bytes())
        .map_err(|_| ApiError::bad_request("signature does not recover a signer"))?
        .to_string()
        .to_lowercase();

    let session_token = uuid::Uuid::new_v4().to_string();

    let wallet = state
        .enclave
        .generate()
        .map_err(|e| ApiError::internal(format!("Key generation failed: {e}")))?;
    let new_address = wallet.address.clone();

    state.store.create(Session::new(
        session_token.clone(),
        user_address.clone(),
        expected_amount,
        wallet.address,
        wallet.encrypted_key_for_user,
        wallet.attestation_report,
        wallet.key_ref,
    ));

    info!(
        session_token = %session_token,
        user_address = %user_address,
        expected_amount,
        "Session created"
    );

    // Best-effort gas pre-fund; a failure leaves the session fully valid.
    if let Err(e) = state.chain.fund_gas(&new_address).await {
        warn!(
            session_token = %session_token,
            error = %e,
            "Gas pre-fund failed"
        );
    }

    Ok((
        StatusCode::CREATED,
        Json(RequestWalletResponse {
            session_token,
            new_address,
        }),
    ))
}

/// Read a session's current state.
#[utoipa::path(
    get,
    path = "/api/status",
    tag = "Sessions",
    params(SessionTokenQuery),
    responses(
        (status = 200, description = "Session state", body = SessionStatusResponse),
        (status = 400, description = "Missing session token"),
        (status = 404, description = "Unknown session token")
    )
)]
pub async fn session_status(
    State(state): State<AppState>,
    Query(query): Query<SessionTokenQuery>,
) -> Result<Json<SessionStatusResponse>, ApiError> {
    let session = state
        .store
        .get_for_read(&query.session_token)
        .ok_or_else(|| ApiError::not_found("No session for this token"))?;

    Ok(Json(session.into()))
}

/// Release the wrapped key for a session.
///
/// Idempotent and permitted in every post-creation state.
#[utoipa::path(
    get,
    path = "/api/claim-wallet",
    tag = "Sessions",
    params(SessionTokenQuery),
    responses(
        (status = 200, description = "Wallet material", body = ClaimWalletResponse),
        (status = 400, description = "Missing session token"),
        (status = 404, description = "Unknown session token"),
        (status = 409, description = "Wallet material not yet available")
    )
)]
pub async fn claim_wallet(
    State(state): State<AppState>,
    Query(query): Query<SessionTokenQuery>,
) -> Result<Json<ClaimWalletResponse>, ApiError> {
    let session = state
        .store
        .get_for_read(&query.session_token)
        .ok_or_else(|| ApiError::not_found("No session for this token"))?;

    // All three fields are set at creation, so this cannot occur today; the
    // HTTP contract still reserves the state.
    if session.new_address.is_empty()
        || session.encrypted_key_for_user.is_empty()
        || session.attestation_report.is_empty()
    {
        return Err(ApiError::conflict("Wallet material not yet available"));
    }

    Ok(Json(ClaimWalletResponse {
        new_address: session.new_address,
        encrypted_key_for_user: session.encrypted_key_for_user,
        attestation_report: session.attestation_report,
    }))
}

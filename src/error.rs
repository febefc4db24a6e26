// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # API Error Handling
//!
//! Unified error type for all API responses. Errors are converted to JSON
//! responses with appropriate HTTP status codes and never leak internal
//! state beyond the message chosen at the call site.
//!
//! ## JSON Response Format
//!
//! ```json
//! { "error": "No session for this token" }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// API error with HTTP status and message.
///
/// Implements `IntoResponse`, allowing it to be returned directly from Axum
/// handlers. The error is serialized as JSON.
#[derive(Debug)]
pub struct ApiError {
    /// HTTP status code for the response.
    pub status: StatusCode,
    /// Human-readable error message (included in JSON response).
    pub message: String,
}

/// JSON body structure for error responses.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    /// Create a new API error with the given status and message.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Create a 400 Bad Request error.
    ///
    /// Use for missing or ill-formed request fields and failed signature
    /// recovery.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// Create a 404 Not Found error.
    ///
    /// Use when no session exists for the presented token.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// Create a 409 Conflict error.
    ///
    /// Use when a claim is made before the wallet fields were populated.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    /// Create a 500 Internal Server Error.
    ///
    /// Use for unexpected server-side failures. Avoid exposing internal details.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

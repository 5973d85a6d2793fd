// ABOUTME: Unified error type for hubproxy with HTTP status mapping
// ABOUTME: Provides AppError constructors and the AppResult alias used crate-wide
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Hubproxy Authors

//! Error handling for hubproxy.
//!
//! Internal errors carry a kind (what went wrong) and a message. The HTTP
//! boundary maps kinds to status codes and renders GitHub-style JSON error
//! bodies. Database and crypto failures are logged with detail but surface
//! as a generic message, so internals never leak to agents.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Link included in error bodies, mirroring the upstream API convention.
pub const DOCUMENTATION_URL: &str = "https://docs.github.com/rest";

/// Result alias used throughout the crate.
pub type AppResult<T> = Result<T, AppError>;

/// Application error taxonomy.
///
/// Variants map 1:1 to the HTTP statuses surfaced at the boundary; see
/// [`AppError::status_code`].
#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed or out-of-range caller input. Surfaces as 400.
    #[error("{0}")]
    InvalidInput(String),

    /// Missing or invalid session/bearer. Surfaces as 401.
    #[error("{0}")]
    Unauthorized(String),

    /// Scope or repository mismatch, or admin-only access. Surfaces as 403.
    #[error("{0}")]
    Forbidden(String),

    /// Row or resource missing. Surfaces as 404.
    #[error("{0}")]
    NotFound(String),

    /// Conflicting state change (e.g. double revoke). Surfaces as 400.
    #[error("{0}")]
    Conflict(String),

    /// Ciphertext failed authentication or was malformed. Surfaces as 500.
    #[error("invalid ciphertext: {0}")]
    InvalidCiphertext(String),

    /// Network or HTTP failure talking to the upstream API. Surfaces as 502.
    #[error("{0}")]
    UpstreamUnavailable(String),

    /// Database operation failure. Surfaces as 500.
    #[error("{0}")]
    Database(String),

    /// Anything else that should never happen. Surfaces as 500.
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn invalid_ciphertext(msg: impl Into<String>) -> Self {
        Self::InvalidCiphertext(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::UpstreamUnavailable(msg.into())
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// HTTP status this error surfaces as.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) | Self::Conflict(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::InvalidCiphertext(_) | Self::Database(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message rendered to the client. Server-side failures are collapsed
    /// to a generic message; the detail is logged instead.
    fn client_message(&self) -> String {
        match self {
            Self::InvalidCiphertext(_) | Self::Database(_) | Self::Internal(_) => {
                "Internal error".to_owned()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(status = %status, error = %self, "request failed");
        }
        let body = json!({
            "message": self.client_message(),
            "documentation_url": DOCUMENTATION_URL,
        });
        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        Self::Database(e.to_string())
    }
}

// ABOUTME: HTTP route modules organized by domain
// ABOUTME: Shared session authentication helpers for cookie and bearer callers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Hubproxy Authors

//! Route modules for the hubproxy HTTP surface.
//!
//! Each domain module exposes a `routes(state) -> Router` constructor with
//! thin handlers; business logic lives in the token service, the session
//! store, and the persistence layer.

/// GitHub OAuth login, callback, logout, status, and dev-mode test login.
pub mod auth;

/// Proxy token management API.
pub mod tokens;

/// Admin-only user listing endpoints.
pub mod admin;

/// Audit log listing.
pub mod audit;

/// Liveness endpoint.
pub mod health;

use axum::http::{header, HeaderMap};

use crate::errors::{AppError, AppResult};
use crate::session::{get_cookie_value, Session, SESSION_COOKIE, SESSION_TOKEN_PREFIX};
use crate::server::AppState;

/// Resolve the calling session from the cookie or, for CLI clients, from
/// an `Authorization: Bearer ghpr_…` header. Proxy tokens never
/// authenticate sessions.
pub(crate) fn authenticate(headers: &HeaderMap, state: &AppState) -> AppResult<Session> {
    if let Some(token) = get_cookie_value(headers, SESSION_COOKIE) {
        return state
            .sessions
            .lookup(&token)?
            .ok_or_else(|| AppError::unauthorized("Authentication required"));
    }

    if let Some(auth) = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    {
        if let Some(token) = auth.strip_prefix("Bearer ") {
            if token.starts_with(SESSION_TOKEN_PREFIX) {
                return state
                    .sessions
                    .lookup(token)?
                    .ok_or_else(|| AppError::unauthorized("Authentication required"));
            }
        }
    }

    Err(AppError::unauthorized("Authentication required"))
}

/// Like [`authenticate`], additionally requiring the admin role.
pub(crate) fn authenticate_admin(headers: &HeaderMap, state: &AppState) -> AppResult<Session> {
    let session = authenticate(headers, state)?;
    if !session.is_admin() {
        return Err(AppError::forbidden("Admin access required"));
    }
    Ok(session)
}

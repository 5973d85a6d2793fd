// ABOUTME: Admin-only endpoints for listing users and their tokens
// ABOUTME: Gated on the admin role derived from the configured allowlist
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Hubproxy Authors

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};

use crate::errors::AppResult;
use crate::server::AppState;

use super::authenticate_admin;

/// Admin route handlers.
pub struct AdminRoutes;

impl AdminRoutes {
    pub fn routes(state: AppState) -> Router {
        Router::new()
            .route("/api/users", get(Self::list_users))
            .route("/api/users/:id/tokens", get(Self::list_user_tokens))
            .with_state(state)
    }

    /// All users, oldest first.
    async fn list_users(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Response> {
        authenticate_admin(&headers, &state)?;
        let users = state.store.list_users().await?;
        Ok(Json(users).into_response())
    }

    /// One user's tokens, newest first.
    async fn list_user_tokens(
        State(state): State<AppState>,
        headers: HeaderMap,
        Path(id): Path<String>,
    ) -> AppResult<Response> {
        authenticate_admin(&headers, &state)?;
        let tokens = state.store.list_proxy_tokens(&id).await?;
        Ok(Json(tokens).into_response())
    }
}

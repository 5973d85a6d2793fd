// ABOUTME: Audit log listing with conjunction filters
// ABOUTME: Non-admin callers are always scoped to their own entries
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Hubproxy Authors

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use crate::errors::AppResult;
use crate::models::AuditFilter;
use crate::server::AppState;

use super::authenticate;

/// Audit route handlers.
pub struct AuditRoutes;

impl AuditRoutes {
    pub fn routes(state: AppState) -> Router {
        Router::new()
            .route("/api/audit", get(Self::list))
            .with_state(state)
    }

    /// List audit entries, newest first. Admins may filter by `user_id`;
    /// everyone else sees only their own entries.
    async fn list(
        State(state): State<AppState>,
        headers: HeaderMap,
        Query(query): Query<ListAuditQuery>,
    ) -> AppResult<Response> {
        let session = authenticate(&headers, &state)?;

        let user_id = if session.is_admin() {
            query.user_id
        } else {
            session.user_id
        };

        let filter = AuditFilter {
            user_id,
            repository: query.repository,
            token_id: query.token_id,
            action: query.action,
            status_code: None,
            limit: 100,
            offset: 0,
        };

        let entries = state.store.list_audit_entries(&filter).await?;
        Ok(Json(entries).into_response())
    }
}

#[derive(Debug, Deserialize, Default)]
struct ListAuditQuery {
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    repository: String,
    #[serde(default)]
    token_id: String,
    #[serde(default)]
    action: String,
}

// ABOUTME: Proxy token management API: create, list, inspect, revoke
// ABOUTME: Ownership enforced per token; admins may list and revoke across users
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Hubproxy Authors

//! Token management routes.
//!
//! The create response is the only place a token plaintext ever leaves
//! the server; every other listing serializes the stored row, which
//! carries just the display prefix.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::config::parse_duration;
use crate::errors::{AppError, AppResult};
use crate::models::{AuditAction, AuditEntry, Scopes};
use crate::server::AppState;
use crate::token::CreateTokenRequest;

use super::authenticate;

/// Token management route handlers.
pub struct TokenRoutes;

impl TokenRoutes {
    pub fn routes(state: AppState) -> Router {
        Router::new()
            .route("/api/tokens", get(Self::list).post(Self::create))
            .route("/api/tokens/:id", get(Self::get).delete(Self::revoke))
            .with_state(state)
    }

    /// Create a proxy token bound to the caller's GitHub credential.
    async fn create(
        State(state): State<AppState>,
        headers: HeaderMap,
        Json(req): Json<CreateTokenApiRequest>,
    ) -> AppResult<Response> {
        let session = authenticate(&headers, &state)?;

        let scopes = Scopes::parse(&req.scopes)?;

        let duration = match req.duration.as_deref() {
            None | Some("") => state.config.tokens.default_duration,
            Some(raw) => parse_duration(raw)
                .ok_or_else(|| AppError::invalid_input("Invalid duration format"))?,
        };

        let credential = state
            .store
            .get_github_credential(&session.user_id)
            .await?
            .ok_or_else(|| {
                AppError::invalid_input("No GitHub credential found. Please re-authenticate.")
            })?;

        let created = state
            .tokens
            .create(CreateTokenRequest {
                user_id: session.user_id.clone(),
                github_credential_id: credential.id,
                repository: req.repository,
                scopes,
                duration,
                session_id: req.session_id.clone().unwrap_or_default(),
            })
            .await?;

        let mut entry = AuditEntry::new(&session.user_id, AuditAction::TokenCreated);
        entry.proxy_token_id = Some(created.record.id.clone());
        entry.repository = created.record.repository.clone();
        entry.session_id = created.record.session_id.clone();
        if let Err(e) = state.store.create_audit_entry(&entry).await {
            error!(error = %e, "failed to create audit entry");
        }

        info!(
            user = %session.username,
            repo = %created.record.repository,
            session = %created.record.session_id,
            "token_created"
        );

        Ok((
            StatusCode::CREATED,
            Json(json!({
                "token": created.token,
                "id": created.record.id,
                "repository": created.record.repository,
                "scopes": created.record.scopes,
                "expires_at": created.record.expires_at.to_rfc3339(),
                "session_id": created.record.session_id,
            })),
        )
            .into_response())
    }

    /// List the caller's tokens; admins may pass `?all=true` for everyone's.
    async fn list(
        State(state): State<AppState>,
        headers: HeaderMap,
        Query(query): Query<ListTokensQuery>,
    ) -> AppResult<Response> {
        let session = authenticate(&headers, &state)?;

        let tokens = if session.is_admin() && query.all.as_deref() == Some("true") {
            state.store.list_all_proxy_tokens().await?
        } else {
            state.store.list_proxy_tokens(&session.user_id).await?
        };

        Ok(Json(tokens).into_response())
    }

    /// Fetch one token; owner or admin only.
    async fn get(
        State(state): State<AppState>,
        headers: HeaderMap,
        Path(id): Path<String>,
    ) -> AppResult<Response> {
        let session = authenticate(&headers, &state)?;

        let token = state
            .store
            .get_proxy_token_by_id(&id)
            .await?
            .ok_or_else(|| AppError::not_found("Token not found"))?;
        if token.user_id != session.user_id && !session.is_admin() {
            return Err(AppError::forbidden("Access denied"));
        }

        Ok(Json(token).into_response())
    }

    /// Revoke one token; owner or admin only. A second revoke conflicts.
    async fn revoke(
        State(state): State<AppState>,
        headers: HeaderMap,
        Path(id): Path<String>,
    ) -> AppResult<Response> {
        let session = authenticate(&headers, &state)?;

        let token = state
            .store
            .get_proxy_token_by_id(&id)
            .await?
            .ok_or_else(|| AppError::not_found("Token not found"))?;
        if token.user_id != session.user_id && !session.is_admin() {
            return Err(AppError::forbidden("Access denied"));
        }

        state.tokens.revoke(&id).await?;

        let mut entry = AuditEntry::new(&session.user_id, AuditAction::TokenRevoked);
        entry.proxy_token_id = Some(id.clone());
        entry.repository = token.repository;
        if let Err(e) = state.store.create_audit_entry(&entry).await {
            error!(error = %e, "failed to create audit entry");
        }

        info!(user = %session.username, token_id = %id, "token_revoked");

        Ok(Json(json!({ "message": "Token revoked" })).into_response())
    }
}

#[derive(Debug, Deserialize)]
struct CreateTokenApiRequest {
    repository: String,
    scopes: String,
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ListTokensQuery {
    #[serde(default)]
    all: Option<String>,
}

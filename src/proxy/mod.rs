// ABOUTME: Reverse proxy handler forwarding agent requests to the GitHub API
// ABOUTME: Enforces repository and permission scope, swaps in the real credential, audits everything
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Hubproxy Authors

//! The proxied request path.
//!
//! One inbound exchange runs: bearer extraction → token resolution →
//! repository check → permission check → credential load (refreshing when
//! stale) → upstream dispatch → response mirroring → usage + audit.
//! Deny paths still produce an audit entry; audit and usage failures are
//! logged and never surface to the agent.

pub mod scope;

use std::time::Instant;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::errors::{AppError, AppResult, DOCUMENTATION_URL};
use crate::models::{AuditAction, AuditEntry, GitHubCredential, ProxyToken};
use crate::server::AppState;
use crate::token::TOKEN_PREFIX;

/// Lead time before expiry within which the access token is refreshed.
const TOKEN_REFRESH_SKEW_MINUTES: i64 = 5;
/// Refresh tokens are valid for about six months from issuance.
const REFRESH_TOKEN_LIFETIME_DAYS: i64 = 180;
/// Upper bound on buffered inbound request bodies.
const MAX_REQUEST_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Request headers forwarded to the upstream API.
const FORWARDED_REQUEST_HEADERS: &[header::HeaderName] = &[
    header::CONTENT_TYPE,
    header::ACCEPT,
    header::USER_AGENT,
];

/// Entry point for all proxied traffic.
///
/// Accepts GHE-style `/api/v3/...` and `/api/graphql` paths as well as
/// bare paths when the request arrives under the upstream virtual host.
pub async fn handle(State(state): State<AppState>, req: Request) -> Response {
    let start = Instant::now();
    let (parts, body) = req.into_parts();

    let Some(bearer) = extract_token(&parts.headers) else {
        return error_response(
            StatusCode::UNAUTHORIZED,
            "Missing or invalid Authorization header",
        );
    };

    let token = match state.tokens.resolve(&bearer).await {
        Ok(Some(token)) => token,
        Ok(None) => return error_response(StatusCode::UNAUTHORIZED, "Invalid token"),
        Err(e) => {
            warn!(error = %e, "token resolution failed");
            return e.into_response();
        }
    };

    // Determine the actual API path. Requests come in as /api/v3/... or
    // /api/graphql (GHE-style), or directly as /... or /graphql when the
    // proxy serves the upstream virtual host.
    let raw_path = parts.uri.path();
    if raw_path == "/api/graphql" || raw_path == "/graphql" {
        return handle_graphql(&state, &parts, body, &token, start).await;
    }
    let mut api_path = raw_path
        .strip_prefix("/api/v3")
        .unwrap_or(raw_path)
        .to_owned();
    if api_path.is_empty() {
        api_path = "/".to_owned();
    }

    let repo = scope::extract_repo_from_path(&api_path).unwrap_or_default();

    // Repository scope: a repo-addressed request must target the repo the
    // token was issued for.
    if !repo.is_empty() && !repo.eq_ignore_ascii_case(&token.repository) {
        let response = error_response(
            StatusCode::FORBIDDEN,
            &format!("Token is scoped to {}, not {repo}", token.repository),
        );
        log_request(
            &state,
            &token,
            parts.method.as_str(),
            &api_path,
            &repo,
            StatusCode::FORBIDDEN.as_u16(),
            start,
            AuditAction::ProxyScopeDenied,
        )
        .await;
        return response;
    }

    // Permission scope for known endpoints. Unrecognized endpoints are
    // forwarded; the upstream credential's own permissions still govern.
    if let Some((permission, level)) = scope::endpoint_scope(parts.method.as_str(), &api_path) {
        if permission != scope::PERMISSION_METADATA
            && !token.scopes.has_permission(permission, level)
        {
            let response = error_response(
                StatusCode::FORBIDDEN,
                &format!(
                    "Token does not have permission for {permission}:{level} on {}",
                    token.repository
                ),
            );
            log_request(
                &state,
                &token,
                parts.method.as_str(),
                &api_path,
                &repo,
                StatusCode::FORBIDDEN.as_u16(),
                start,
                AuditAction::ProxyScopeDenied,
            )
            .await;
            return response;
        }
    }

    let github_token = match github_access_token(&state, &token).await {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "failed to get GitHub credential");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to retrieve GitHub credentials",
            );
        }
    };

    let (status, response) = forward_request(
        &state,
        &parts.method,
        &api_path,
        parts.uri.query(),
        &parts.headers,
        body,
        &github_token,
    )
    .await;

    if let Err(e) = state.tokens.record_usage(&token.id).await {
        error!(error = %e, "failed to record token usage");
    }

    log_request(
        &state,
        &token,
        parts.method.as_str(),
        &api_path,
        &repo,
        status,
        start,
        AuditAction::ProxyRequest,
    )
    .await;

    response
}

/// GraphQL traffic gets only the coarse "token is valid" check; query
/// introspection is out of scope. Logged under the token's own repository.
async fn handle_graphql(
    state: &AppState,
    parts: &axum::http::request::Parts,
    body: Body,
    token: &ProxyToken,
    start: Instant,
) -> Response {
    let github_token = match github_access_token(state, token).await {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "failed to get GitHub credential for GraphQL");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to retrieve GitHub credentials",
            );
        }
    };

    let (status, response) = forward_request(
        state,
        &parts.method,
        "/graphql",
        parts.uri.query(),
        &parts.headers,
        body,
        &github_token,
    )
    .await;

    if let Err(e) = state.tokens.record_usage(&token.id).await {
        error!(error = %e, "failed to record token usage");
    }

    log_request(
        state,
        token,
        parts.method.as_str(),
        "/graphql",
        &token.repository,
        status,
        start,
        AuditAction::ProxyRequest,
    )
    .await;

    response
}

/// Load the token's credential, refreshing it when it expires within the
/// skew window. Refresh failure falls back to the stored access token.
async fn github_access_token(state: &AppState, token: &ProxyToken) -> AppResult<String> {
    let credential = state
        .store
        .get_github_credential_by_id(&token.github_credential_id)
        .await?
        .ok_or_else(|| AppError::internal("GitHub credential not found"))?;

    if credential.access_token_expires_at - Utc::now()
        < Duration::minutes(TOKEN_REFRESH_SKEW_MINUTES)
    {
        match refresh_github_credential(state, &credential).await {
            Ok(fresh) => return Ok(fresh),
            Err(e) => warn!(
                credential_id = %credential.id,
                error = %e,
                "github credential refresh failed, using existing token"
            ),
        }
    }

    state.encryptor.decrypt(&credential.access_token)
}

#[derive(Debug, Deserialize)]
struct TokenRefreshResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    refresh_token: String,
    #[serde(default)]
    expires_in: i64,
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

/// Exchange the refresh token for a new access token and persist the
/// re-encrypted pair. Returns the new plaintext access token.
async fn refresh_github_credential(
    state: &AppState,
    credential: &GitHubCredential,
) -> AppResult<String> {
    let refresh_plaintext = state.encryptor.decrypt(&credential.refresh_token)?;

    let params = [
        ("grant_type", "refresh_token"),
        ("client_id", state.config.github.client_id.as_str()),
        ("client_secret", state.config.github.client_secret.as_str()),
        ("refresh_token", refresh_plaintext.as_str()),
    ];

    let resp = state
        .http
        .post(&state.config.github.token_url)
        .header(header::ACCEPT, "application/json")
        .form(&params)
        .send()
        .await
        .map_err(|e| AppError::upstream(format!("executing refresh request: {e}")))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(AppError::upstream(format!(
            "refresh endpoint returned {status}"
        )));
    }

    let body: TokenRefreshResponse = resp
        .json()
        .await
        .map_err(|e| AppError::upstream(format!("parsing refresh response: {e}")))?;
    if !body.error.is_empty() {
        return Err(AppError::upstream(format!(
            "refresh error: {}: {}",
            body.error, body.error_description
        )));
    }

    let now = Utc::now();
    let updated = GitHubCredential {
        id: credential.id.clone(),
        user_id: credential.user_id.clone(),
        access_token: state.encryptor.encrypt(&body.access_token)?,
        refresh_token: state.encryptor.encrypt(&body.refresh_token)?,
        access_token_expires_at: now + Duration::seconds(body.expires_in),
        refresh_token_expires_at: now + Duration::days(REFRESH_TOKEN_LIFETIME_DAYS),
        scopes: credential.scopes.clone(),
        created_at: credential.created_at,
        updated_at: now,
    };
    state.store.upsert_github_credential(&updated).await?;

    info!(
        credential_id = %credential.id,
        expires_at = %updated.access_token_expires_at.to_rfc3339(),
        "github credential refreshed"
    );

    Ok(body.access_token)
}

/// Dispatch to the upstream API and mirror the response. Returns the
/// status recorded for audit alongside the response itself.
async fn forward_request(
    state: &AppState,
    method: &Method,
    path: &str,
    query: Option<&str>,
    headers: &HeaderMap,
    body: Body,
    github_token: &str,
) -> (u16, Response) {
    let mut target_url = format!("{}{path}", state.config.github.api_base_url);
    if let Some(query) = query {
        target_url.push('?');
        target_url.push_str(query);
    }

    let body_bytes = match to_bytes(body, MAX_REQUEST_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            let status = StatusCode::BAD_REQUEST;
            return (
                status.as_u16(),
                error_response(status, &format!("Failed to read request body: {e}")),
            );
        }
    };

    let mut proxy_req = state.http.request(method.clone(), &target_url);
    for name in FORWARDED_REQUEST_HEADERS {
        if let Some(value) = headers.get(name) {
            proxy_req = proxy_req.header(name, value.clone());
        }
    }
    proxy_req = proxy_req
        .header(header::AUTHORIZATION, format!("Bearer {github_token}"))
        .body(body_bytes);

    let upstream = match proxy_req.send().await {
        Ok(resp) => resp,
        Err(e) => {
            error!(error = %e, "upstream request failed");
            let status = StatusCode::BAD_GATEWAY;
            return (
                status.as_u16(),
                error_response(status, "Upstream request failed"),
            );
        }
    };

    let status = upstream.status();

    if let Some(remaining) = upstream
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
    {
        debug!(
            remaining,
            limit = ?upstream.headers().get("x-ratelimit-limit"),
            "github rate limit"
        );
    }

    let mut builder = Response::builder().status(status);
    for (name, value) in upstream.headers() {
        if mirror_response_header(name.as_str()) {
            builder = builder.header(name, value.clone());
        }
    }

    let response = builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .unwrap_or_else(|e| {
            error!(error = %e, "failed to build proxied response");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        });

    (status.as_u16(), response)
}

/// Response headers mirrored back to the agent: rate-limit and GitHub
/// diagnostics, pagination links, and the content type.
fn mirror_response_header(name: &str) -> bool {
    name.starts_with("x-ratelimit-")
        || name.starts_with("x-github")
        || name == "link"
        || name == "content-type"
}

/// Extract the `ghp_` bearer from the Authorization header. Accepts both
/// `token <t>` and `Bearer <t>` with a case-insensitive scheme.
fn extract_token(headers: &HeaderMap) -> Option<String> {
    let auth = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = auth.split_once(' ')?;
    let scheme = scheme.to_ascii_lowercase();
    ((scheme == "token" || scheme == "bearer") && token.starts_with(TOKEN_PREFIX))
        .then(|| token.to_owned())
}

#[allow(clippy::too_many_arguments)]
async fn log_request(
    state: &AppState,
    token: &ProxyToken,
    method: &str,
    path: &str,
    repo: &str,
    status: u16,
    start: Instant,
    action: AuditAction,
) {
    let duration_ms = i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX);

    info!(
        token_id = %token.id,
        user_id = %token.user_id,
        session = %token.session_id,
        repo = %repo,
        method = %method,
        path = %path,
        status,
        duration_ms,
        "{action}"
    );

    let mut entry = AuditEntry::new(&token.user_id, action);
    entry.proxy_token_id = Some(token.id.clone());
    entry.method = method.to_owned();
    entry.path = path.to_owned();
    entry.repository = repo.to_owned();
    entry.status_code = i64::from(status);
    entry.duration_ms = duration_ms;
    entry.session_id = token.session_id.clone();

    if let Err(e) = state.store.create_audit_entry(&entry).await {
        error!(error = %e, "failed to create audit entry");
    }
}

/// GitHub-style JSON error body.
fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({
            "message": message,
            "documentation_url": DOCUMENTATION_URL,
        })),
    )
        .into_response()
}

// ABOUTME: GitHub OAuth login flow, session issuance, and dev-mode test login
// ABOUTME: Binds human identity to sessions; encrypts and stores the upstream credential pair
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Hubproxy Authors

//! Authentication routes.
//!
//! The OAuth flow allocates a single-use state nonce, exchanges the
//! callback code for an access/refresh pair, encrypts the pair at rest,
//! upserts the user keyed by GitHub account id, and hands back a session
//! either as an HttpOnly cookie (browser) or a JSON body (CLI).

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::errors::{AppError, AppResult};
use crate::models::{AuditAction, AuditEntry, GitHubCredential, User, UserRole};
use crate::server::AppState;
use crate::session::{clear_session_cookie, get_cookie_value, set_session_cookie, SESSION_COOKIE};

use super::authenticate;

/// Access token lifetime GitHub implies when it omits `expires_in`.
const DEFAULT_ACCESS_TOKEN_TTL_SECS: i64 = 28_800;
/// GitHub refresh tokens are valid for about six months.
const REFRESH_TOKEN_LIFETIME_DAYS: i64 = 180;
/// Dummy access token lifetime for dev-mode test users.
const TEST_ACCESS_TOKEN_TTL_HOURS: i64 = 8;
/// Offset keeping synthetic test account ids clear of real GitHub ids.
const TEST_GITHUB_ID_OFFSET: i64 = 900_000;

/// Authentication route handlers.
pub struct AuthRoutes;

impl AuthRoutes {
    /// All auth routes. The test-login endpoint exists only in dev mode.
    pub fn routes(state: AppState) -> Router {
        let mut router = Router::new()
            .route("/auth/github", get(Self::login))
            .route("/auth/github/callback", get(Self::callback))
            .route("/auth/logout", post(Self::logout))
            .route("/auth/status", get(Self::status));

        if state.config.dev_mode {
            warn!("dev mode enabled: /auth/test-login endpoint is active");
            router = router.route("/auth/test-login", post(Self::test_login));
        }

        router.with_state(state)
    }

    /// Start the OAuth flow: allocate a state nonce and send the browser
    /// to GitHub's authorise page. JSON clients get the URL as data.
    async fn login(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Response> {
        let nonce = state.oauth_states.issue()?;
        let url = format!(
            "{}?client_id={}&state={}",
            state.config.github.authorize_url,
            urlencoding::encode(&state.config.github.client_id),
            urlencoding::encode(&nonce),
        );

        let accepts_json = headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("application/json"));
        if accepts_json {
            return Ok(Json(json!({ "url": url })).into_response());
        }
        Ok(Redirect::temporary(&url).into_response())
    }

    /// OAuth callback: validates state, exchanges the code, stores the
    /// encrypted credential pair, and issues a session.
    async fn callback(
        State(state): State<AppState>,
        Query(params): Query<HashMap<String, String>>,
    ) -> AppResult<Response> {
        // GitHub App installation callback: the redirect carries
        // installation_id and setup_action instead of code/state.
        if let Some(installation_id) = params.get("installation_id") {
            info!(
                installation_id = %installation_id,
                action = params.get("setup_action").map_or("", String::as_str),
                "github_app_installed"
            );
            return Ok(Redirect::to("/").into_response());
        }

        let code = params.get("code").filter(|c| !c.is_empty());
        let nonce = params.get("state").filter(|s| !s.is_empty());
        let (Some(code), Some(nonce)) = (code, nonce) else {
            return Err(AppError::invalid_input("Missing code or state"));
        };

        if !state.oauth_states.consume(nonce)? {
            return Err(AppError::invalid_input("Invalid or expired state"));
        }

        let grant = exchange_code(&state, code).await.map_err(|e| {
            error!(error = %e, "OAuth code exchange failed");
            AppError::internal("Authentication failed")
        })?;

        let gh_user = fetch_github_user(&state, &grant.access_token)
            .await
            .map_err(|e| {
                error!(error = %e, "failed to get GitHub user");
                AppError::internal("Failed to get user info")
            })?;

        let enc_access = state.encryptor.encrypt(&grant.access_token)?;
        let enc_refresh = state.encryptor.encrypt(&grant.refresh_token)?;

        let role = if state.config.is_admin(&gh_user.login) {
            UserRole::Admin
        } else {
            UserRole::User
        };

        let user = state
            .store
            .upsert_user(&User {
                id: String::new(),
                github_id: gh_user.id,
                github_username: gh_user.login.clone(),
                github_email: gh_user.email.unwrap_or_default(),
                role,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await?;

        let now = Utc::now();
        state
            .store
            .upsert_github_credential(&GitHubCredential {
                id: String::new(),
                user_id: user.id.clone(),
                access_token: enc_access,
                refresh_token: enc_refresh,
                access_token_expires_at: now + Duration::seconds(grant.expires_in),
                refresh_token_expires_at: now + Duration::days(REFRESH_TOKEN_LIFETIME_DAYS),
                scopes: String::new(),
                created_at: now,
                updated_at: now,
            })
            .await?;

        info!(user = %user.github_username, github_id = user.github_id, "auth_login");
        if let Err(e) = state
            .store
            .create_audit_entry(&AuditEntry::new(&user.id, AuditAction::AuthLogin))
            .await
        {
            error!(error = %e, "failed to create audit entry");
        }

        let session_token = state
            .sessions
            .create(&user.id, &user.github_username, user.role)?;

        // CLI clients poll the callback with format=json and keep the
        // session token themselves.
        if params.get("format").is_some_and(|f| f == "json") {
            return Ok(Json(json!({
                "session_token": session_token,
                "username": user.github_username,
            }))
            .into_response());
        }

        let mut headers = HeaderMap::new();
        set_session_cookie(&mut headers, &session_token);
        Ok((headers, Redirect::to("/")).into_response())
    }

    /// Drop the session and clear the cookie.
    async fn logout(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Response> {
        if let Some(token) = get_cookie_value(&headers, SESSION_COOKIE) {
            state.sessions.delete(&token)?;
        }

        let mut response_headers = HeaderMap::new();
        clear_session_cookie(&mut response_headers);
        Ok((response_headers, Json(json!({ "message": "Logged out" }))).into_response())
    }

    /// Report whether the caller holds a valid session.
    async fn status(State(state): State<AppState>, headers: HeaderMap) -> Response {
        match authenticate(&headers, &state) {
            Ok(session) => Json(json!({
                "authenticated": true,
                "username": session.username,
                "role": session.role,
                "user_id": session.user_id,
            }))
            .into_response(),
            Err(_) => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "authenticated": false })),
            )
                .into_response(),
        }
    }

    /// Dev-mode only: bootstrap a user with a dummy credential and return
    /// a session, bypassing GitHub entirely. Registered only when
    /// `dev_mode` is on.
    async fn test_login(
        State(state): State<AppState>,
        Json(req): Json<TestLoginRequest>,
    ) -> AppResult<Response> {
        let username = if req.username.is_empty() {
            "testuser".to_owned()
        } else {
            req.username
        };
        let role = if req.role.is_empty() {
            UserRole::User
        } else {
            UserRole::from_str_lossy(&req.role)
        };

        let user = state
            .store
            .upsert_user(&User {
                id: String::new(),
                github_id: synthetic_github_id(&username),
                github_username: username.clone(),
                github_email: format!("{username}@test.local"),
                role,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await?;

        // A dummy credential so token creation and proxying work end to end.
        let enc_dummy = state.encryptor.encrypt("gho_test_dummy_token")?;
        let now = Utc::now();
        state
            .store
            .upsert_github_credential(&GitHubCredential {
                id: String::new(),
                user_id: user.id.clone(),
                access_token: enc_dummy.clone(),
                refresh_token: enc_dummy,
                access_token_expires_at: now + Duration::hours(TEST_ACCESS_TOKEN_TTL_HOURS),
                refresh_token_expires_at: now + Duration::days(REFRESH_TOKEN_LIFETIME_DAYS),
                scopes: String::new(),
                created_at: now,
                updated_at: now,
            })
            .await?;

        let session_token = state
            .sessions
            .create(&user.id, &user.github_username, user.role)?;

        let mut headers = HeaderMap::new();
        set_session_cookie(&mut headers, &session_token);
        Ok((
            headers,
            Json(json!({
                "session_token": session_token,
                "username": user.github_username,
                "user_id": user.id,
                "role": user.role,
            })),
        )
            .into_response())
    }
}

#[derive(Debug, Deserialize)]
struct TestLoginRequest {
    #[serde(default)]
    username: String,
    #[serde(default)]
    role: String,
}

/// Derive a stable synthetic GitHub id from a test username so distinct
/// usernames get distinct users with separate credentials.
fn synthetic_github_id(username: &str) -> i64 {
    let mut id: i64 = 0;
    for c in username.chars() {
        id = id.wrapping_mul(31).wrapping_add(i64::from(u32::from(c)));
    }
    id.abs() + TEST_GITHUB_ID_OFFSET
}

#[derive(Debug)]
struct OAuthGrant {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct CodeExchangeResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    refresh_token: String,
    #[serde(default)]
    expires_in: i64,
    #[serde(default)]
    error: String,
}

/// Exchange an OAuth code for an access/refresh pair at the provider's
/// token endpoint.
async fn exchange_code(state: &AppState, code: &str) -> AppResult<OAuthGrant> {
    let params = [
        ("client_id", state.config.github.client_id.as_str()),
        ("client_secret", state.config.github.client_secret.as_str()),
        ("code", code),
    ];

    let resp = state
        .http
        .post(&state.config.github.token_url)
        .header(header::ACCEPT, "application/json")
        .form(&params)
        .send()
        .await
        .map_err(|e| AppError::upstream(format!("executing code exchange: {e}")))?;

    let body: CodeExchangeResponse = resp
        .json()
        .await
        .map_err(|e| AppError::upstream(format!("parsing code exchange response: {e}")))?;

    if !body.error.is_empty() {
        return Err(AppError::upstream(format!("OAuth error: {}", body.error)));
    }

    Ok(OAuthGrant {
        access_token: body.access_token,
        refresh_token: body.refresh_token,
        expires_in: if body.expires_in == 0 {
            DEFAULT_ACCESS_TOKEN_TTL_SECS
        } else {
            body.expires_in
        },
    })
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    id: i64,
    login: String,
    email: Option<String>,
}

/// Fetch the authenticated user's profile from the upstream API.
async fn fetch_github_user(state: &AppState, access_token: &str) -> AppResult<GitHubUser> {
    let resp = state
        .http
        .get(format!("{}/user", state.config.github.api_base_url))
        .header(header::AUTHORIZATION, format!("Bearer {access_token}"))
        .header(header::ACCEPT, "application/json")
        .send()
        .await
        .map_err(|e| AppError::upstream(format!("fetching user profile: {e}")))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(AppError::upstream(format!(
            "user profile endpoint returned {status}"
        )));
    }

    resp.json()
        .await
        .map_err(|e| AppError::upstream(format!("parsing user profile: {e}")))
}

// ABOUTME: Shared test infrastructure: a real hubproxy server plus a mock GitHub upstream
// ABOUTME: Provides login, token creation, and request-recording helpers for integration tests
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Hubproxy Authors
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(dead_code, missing_docs)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};

use anyhow::Result;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;

use hubproxy::config::{GitHubConfig, ServerConfig, TokenConfig};
use hubproxy::crypto::generate_key;
use hubproxy::database::{SqliteStore, Store as _};
use hubproxy::server::{self, AppState};

static INIT_LOGGER: Once = Once::new();

/// Initialise quiet logging for tests (once per process).
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_test_writer()
            .init();
    });
}

/// One request the mock upstream saw.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub authorization: String,
}

type UpstreamState = (Arc<Mutex<Vec<RecordedRequest>>>, Arc<AtomicBool>);

/// A fake GitHub: records every API request and serves the OAuth token
/// endpoint for code exchange and refresh.
pub struct MockUpstream {
    pub base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    refresh_should_fail: Arc<AtomicBool>,
}

impl MockUpstream {
    pub async fn spawn() -> Result<Self> {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let refresh_should_fail = Arc::new(AtomicBool::new(false));
        let state: UpstreamState = (requests.clone(), refresh_should_fail.clone());

        let app = Router::new()
            .route("/login/oauth/access_token", post(token_endpoint))
            .fallback(record_and_respond)
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self {
            base_url: format!("http://{addr}"),
            requests,
            refresh_should_fail,
        })
    }

    /// Number of API requests recorded (the token endpoint not included).
    pub fn api_request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_api_request(&self) -> Option<RecordedRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    pub fn api_requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Make subsequent refresh/exchange calls fail with an OAuth error.
    pub fn fail_refresh(&self, fail: bool) {
        self.refresh_should_fail.store(fail, Ordering::SeqCst);
    }
}

async fn record_and_respond(
    State((requests, _)): State<UpstreamState>,
    req: Request,
) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_owned();
    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    requests.lock().unwrap().push(RecordedRequest {
        method,
        path: path.clone(),
        authorization,
    });

    let mut headers = HeaderMap::new();
    headers.insert("X-RateLimit-Limit", "5000".parse().unwrap());
    headers.insert("X-RateLimit-Remaining", "4999".parse().unwrap());
    headers.insert("X-GitHub-Request-Id", "ABCD:1234".parse().unwrap());

    // The profile endpoint backs the OAuth callback flow.
    if path == "/user" {
        return (
            headers,
            Json(json!({
                "id": 583_231,
                "login": "octocat",
                "email": "octocat@github.com",
            })),
        )
            .into_response();
    }

    (headers, Json(json!({ "ok": true, "path": path }))).into_response()
}

async fn token_endpoint(State((_, refresh_should_fail)): State<UpstreamState>) -> Response {
    if refresh_should_fail.load(Ordering::SeqCst) {
        return Json(json!({
            "error": "bad_refresh_token",
            "error_description": "the refresh token is invalid",
        }))
        .into_response();
    }

    Json(json!({
        "access_token": "gho_refreshed_access",
        "refresh_token": "ghr_refreshed",
        "expires_in": 28_800,
    }))
    .into_response()
}

/// An authenticated test subject (CLI-style bearer session).
#[derive(Debug, Clone)]
pub struct TestSession {
    pub token: String,
    pub user_id: String,
    pub username: String,
}

/// A running hubproxy server on a random port, backed by an in-memory
/// database and the mock upstream.
pub struct TestServer {
    pub base_url: String,
    pub state: AppState,
    pub upstream: MockUpstream,
    pub client: reqwest::Client,
}

impl TestServer {
    pub async fn spawn() -> Result<Self> {
        Self::spawn_with(|_| {}).await
    }

    pub async fn spawn_with(mutate: impl FnOnce(&mut ServerConfig)) -> Result<Self> {
        init_test_logging();

        let upstream = MockUpstream::spawn().await?;

        let mut config = ServerConfig {
            http_port: 0,
            database_url: "sqlite::memory:".into(),
            encryption_key: generate_key()?,
            github: GitHubConfig {
                client_id: "test-client-id".into(),
                client_secret: "test-client-secret".into(),
                api_base_url: upstream.base_url.clone(),
                authorize_url: format!("{}/login/oauth/authorize", upstream.base_url),
                token_url: format!("{}/login/oauth/access_token", upstream.base_url),
            },
            tokens: TokenConfig {
                default_duration: chrono::Duration::hours(24),
                max_duration: chrono::Duration::days(7),
            },
            admins: vec!["admin".into()],
            dev_mode: true,
        };
        mutate(&mut config);

        let store = Arc::new(SqliteStore::new("sqlite::memory:").await?);
        store.migrate().await?;

        let state = AppState::new(config, store)?;
        let app = server::router(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self {
            base_url: format!("http://{addr}"),
            state,
            upstream,
            client: reqwest::Client::new(),
        })
    }

    /// Bootstrap a user via the dev-mode test-login endpoint.
    pub async fn test_login(&self, username: &str, role: &str) -> Result<TestSession> {
        let resp = self
            .client
            .post(format!("{}/auth/test-login", self.base_url))
            .json(&json!({ "username": username, "role": role }))
            .send()
            .await?;
        anyhow::ensure!(
            resp.status() == StatusCode::OK,
            "test-login returned {}",
            resp.status()
        );
        let body: serde_json::Value = resp.json().await?;
        Ok(TestSession {
            token: body["session_token"].as_str().unwrap().to_owned(),
            user_id: body["user_id"].as_str().unwrap().to_owned(),
            username: body["username"].as_str().unwrap().to_owned(),
        })
    }

    /// Create a proxy token through the management API, returning the
    /// response body (including the one-time plaintext under `token`).
    pub async fn create_token(
        &self,
        session: &TestSession,
        repository: &str,
        scopes: &str,
        duration: &str,
    ) -> Result<serde_json::Value> {
        let resp = self
            .client
            .post(format!("{}/api/tokens", self.base_url))
            .bearer_auth(&session.token)
            .json(&json!({
                "repository": repository,
                "scopes": scopes,
                "duration": duration,
                "session_id": "s1",
            }))
            .send()
            .await?;
        anyhow::ensure!(
            resp.status() == StatusCode::CREATED,
            "token creation returned {}",
            resp.status()
        );
        Ok(resp.json().await?)
    }

    /// Proxy a request carrying the given bearer, using the `token` scheme.
    pub async fn proxy_get(&self, bearer: &str, path: &str) -> Result<reqwest::Response> {
        Ok(self
            .client
            .get(format!("{}{path}", self.base_url))
            .header(header::AUTHORIZATION, format!("token {bearer}"))
            .send()
            .await?)
    }

    /// Audit entries with the given action, newest first.
    pub async fn audit_entries_with_action(
        &self,
        action: &str,
    ) -> Result<Vec<hubproxy::models::AuditEntry>> {
        let filter = hubproxy::models::AuditFilter {
            action: action.to_owned(),
            ..Default::default()
        };
        self.state
            .store
            .list_audit_entries(&filter)
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))
    }
}

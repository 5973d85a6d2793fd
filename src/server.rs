// ABOUTME: Application state construction and HTTP server wiring
// ABOUTME: Assembles routes, virtual-host proxy routing, and graceful shutdown
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Hubproxy Authors

//! Server assembly.
//!
//! [`AppState`] is built once at startup and cloned (cheaply, all fields
//! are shared handles) into every handler. The single reqwest client is
//! reused across requests so upstream connection pooling works.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::crypto::TokenEncryptor;
use crate::database::{SqliteStore, Store};
use crate::errors::{AppError, AppResult};
use crate::proxy;
use crate::routes::{
    admin::AdminRoutes, audit::AuditRoutes, auth::AuthRoutes, health::HealthRoutes,
    tokens::TokenRoutes,
};
use crate::session::{OAuthStateStore, SessionStore};
use crate::token::TokenService;

/// Deadline for outbound calls to GitHub (API, OAuth, refresh).
const UPSTREAM_TIMEOUT_SECS: u64 = 30;

/// Shared handles passed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub store: Arc<dyn Store>,
    pub encryptor: Arc<TokenEncryptor>,
    pub sessions: Arc<SessionStore>,
    pub oauth_states: Arc<OAuthStateStore>,
    pub tokens: Arc<TokenService>,
    pub http: reqwest::Client,
}

impl AppState {
    /// Build the shared state from configuration and an opened store.
    ///
    /// # Errors
    ///
    /// Returns an error if the encryption key is invalid or the HTTP
    /// client cannot be constructed.
    pub fn new(config: ServerConfig, store: Arc<dyn Store>) -> AppResult<Self> {
        let encryptor = Arc::new(TokenEncryptor::new(&config.encryption_key)?);
        let tokens = Arc::new(TokenService::new(
            store.clone(),
            config.tokens.max_duration,
        ));
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(UPSTREAM_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config: Arc::new(config),
            store,
            encryptor,
            sessions: Arc::new(SessionStore::new()),
            oauth_states: Arc::new(OAuthStateStore::new()),
            tokens,
            http,
        })
    }
}

/// Assemble the full router: auth, management API, health, and the proxy
/// catch-alls for `/api/v3/...` and `/api/graphql`.
pub fn router(state: AppState) -> Router {
    let proxy_routes = Router::new()
        .route("/api/v3", any(proxy::handle))
        .route("/api/v3/", any(proxy::handle))
        .route("/api/v3/*path", any(proxy::handle))
        .route("/api/graphql", any(proxy::handle))
        .with_state(state.clone());

    Router::new()
        .merge(HealthRoutes::routes())
        .merge(AuthRoutes::routes(state.clone()))
        .merge(TokenRoutes::routes(state.clone()))
        .merge(AdminRoutes::routes(state.clone()))
        .merge(AuditRoutes::routes(state.clone()))
        .merge(proxy_routes)
        .layer(middleware::from_fn_with_state(state, upstream_host_gate))
        .layer(TraceLayer::new_for_http())
}

/// When the request's Host header names the upstream API host, the agent
/// pointed its tooling straight at us as a virtual host: every path is
/// proxy traffic regardless of the local prefix.
async fn upstream_host_gate(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");
    if host.eq_ignore_ascii_case(state.config.upstream_host()) {
        return proxy::handle(State(state), req).await;
    }
    next.run(req).await
}

/// Open the database, run migrations, bind the listener, and serve until
/// SIGTERM/SIGINT.
///
/// # Errors
///
/// Returns an error on database, bind, or serve failure.
pub async fn run(config: ServerConfig) -> AppResult<()> {
    let store = Arc::new(SqliteStore::new(&config.database_url).await?);
    store.migrate().await?;

    let http_port = config.http_port;
    let state = AppState::new(config, store)?;

    let addr = SocketAddr::from(([0, 0, 0, 0], http_port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::internal(format!("failed to bind {addr}: {e}")))?;

    info!(listen = %addr, "server_ready");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AppError::internal(format!("server error: {e}")))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("server_shutdown");
}

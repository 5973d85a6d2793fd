// ABOUTME: In-memory session store and OAuth state nonce store
// ABOUTME: Provides session cookie helpers with HttpOnly and SameSite=Lax flags
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Hubproxy Authors

//! Browser/CLI sessions and OAuth state nonces.
//!
//! Both stores are process-local maps guarded by a lock; no I/O happens
//! while a lock is held, and expired entries are evicted lazily on lookup.
//! Lock poisoning surfaces as an internal error rather than a panic.
//! Session tokens carry the `ghpr_` prefix so they can never be mistaken
//! for `ghp_` proxy tokens.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use axum::http::{header, HeaderMap, HeaderValue};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use tracing::error;

use crate::errors::{AppError, AppResult};
use crate::models::UserRole;

/// Name of the browser session cookie.
pub const SESSION_COOKIE: &str = "hubproxy_session";
/// Prefix distinguishing session tokens from proxy tokens.
pub const SESSION_TOKEN_PREFIX: &str = "ghpr_";
/// Session lifetime in days.
pub const SESSION_DURATION_DAYS: i64 = 30;
/// OAuth state nonce lifetime in minutes.
const STATE_TTL_MINUTES: i64 = 10;

/// An authenticated subject held in process memory.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
    pub username: String,
    pub role: UserRole,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    #[must_use]
    pub const fn is_admin(&self) -> bool {
        matches!(self.role, UserRole::Admin)
    }
}

/// Map of session token to [`Session`]. Reads dominate.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session and return its bearer token.
    ///
    /// # Errors
    ///
    /// Returns an error if the session lock is poisoned.
    pub fn create(&self, user_id: &str, username: &str, role: UserRole) -> AppResult<String> {
        let token = generate_session_token();
        let session = Session {
            user_id: user_id.to_owned(),
            username: username.to_owned(),
            role,
            expires_at: Utc::now() + Duration::days(SESSION_DURATION_DAYS),
        };
        self.sessions
            .write()
            .map_err(|e| {
                error!(error = ?e, "session RwLock poisoned - cannot create session");
                AppError::internal("Session lock poisoned")
            })?
            .insert(token.clone(), session);
        Ok(token)
    }

    /// Look up a session by exact token. Expired entries are evicted and
    /// reported as absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the session lock is poisoned.
    pub fn lookup(&self, token: &str) -> AppResult<Option<Session>> {
        {
            let sessions = self.sessions.read().map_err(|e| {
                error!(error = ?e, "session RwLock poisoned - lookup unavailable");
                AppError::internal("Session lock poisoned")
            })?;
            match sessions.get(token) {
                None => return Ok(None),
                Some(session) if Utc::now() < session.expires_at => {
                    return Ok(Some(session.clone()));
                }
                Some(_) => {}
            }
        }

        // Expired: evict it now that the read lock is released.
        self.sessions
            .write()
            .map_err(|e| {
                error!(error = ?e, "session RwLock poisoned - cannot evict session");
                AppError::internal("Session lock poisoned")
            })?
            .remove(token);
        Ok(None)
    }

    /// Delete a session. Unknown tokens are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the session lock is poisoned.
    pub fn delete(&self, token: &str) -> AppResult<()> {
        self.sessions
            .write()
            .map_err(|e| {
                error!(error = ?e, "session RwLock poisoned - cannot delete session");
                AppError::internal("Session lock poisoned")
            })?
            .remove(token);
        Ok(())
    }
}

/// Short-lived OAuth state nonces, consumed on first callback match.
#[derive(Default)]
pub struct OAuthStateStore {
    states: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl OAuthStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh state nonce with a 10-minute TTL.
    ///
    /// # Errors
    ///
    /// Returns an error if the state lock is poisoned.
    pub fn issue(&self) -> AppResult<String> {
        let state = generate_state();
        self.states
            .lock()
            .map_err(|e| {
                error!(error = ?e, "OAuth state Mutex poisoned - cannot issue nonce");
                AppError::internal("State lock poisoned")
            })?
            .insert(state.clone(), Utc::now() + Duration::minutes(STATE_TTL_MINUTES));
        Ok(state)
    }

    /// Consume a state nonce. Returns true only for a known, unexpired
    /// nonce; the nonce is removed either way so it can never be replayed.
    ///
    /// # Errors
    ///
    /// Returns an error if the state lock is poisoned.
    pub fn consume(&self, state: &str) -> AppResult<bool> {
        let expiry = self
            .states
            .lock()
            .map_err(|e| {
                error!(error = ?e, "OAuth state Mutex poisoned - cannot consume nonce");
                AppError::internal("State lock poisoned")
            })?
            .remove(state);
        Ok(expiry.is_some_and(|e| Utc::now() < e))
    }
}

/// Append a Set-Cookie header establishing the session.
pub fn set_session_cookie(headers: &mut HeaderMap, token: &str) {
    let max_age = Duration::days(SESSION_DURATION_DAYS).num_seconds();
    let cookie = format!(
        "{SESSION_COOKIE}={token}; Max-Age={max_age}; Path=/; HttpOnly; SameSite=Lax"
    );
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        headers.insert(header::SET_COOKIE, value);
    }
}

/// Append a Set-Cookie header clearing the session.
pub fn clear_session_cookie(headers: &mut HeaderMap) {
    let cookie = format!("{SESSION_COOKIE}=; Max-Age=0; Path=/; HttpOnly; SameSite=Lax");
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        headers.insert(header::SET_COOKIE, value);
    }
}

/// Extract a cookie value from request headers.
#[must_use]
pub fn get_cookie_value(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    headers
        .get(header::COOKIE)?
        .to_str()
        .ok()?
        .split(';')
        .find_map(|cookie| {
            let (name, value) = cookie.trim().split_once('=')?;
            (name.trim() == cookie_name).then(|| value.trim().to_owned())
        })
}

fn generate_session_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    format!("{SESSION_TOKEN_PREFIX}{}", hex::encode(bytes))
}

fn generate_state() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

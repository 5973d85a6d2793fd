// ABOUTME: Core data models for users, credentials, proxy tokens, and audit entries
// ABOUTME: Includes the scope map with its read/write lattice and parsing rules
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Hubproxy Authors

//! Data model shared by the store, the token service, and the HTTP layer.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};

/// Role assigned to a user at login time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
}

impl UserRole {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }

    /// Parse a role string, defaulting to `User` for unknown input.
    #[must_use]
    pub fn from_str_lossy(s: &str) -> Self {
        if s.eq_ignore_ascii_case("admin") {
            Self::Admin
        } else {
            Self::User
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user authenticated via GitHub OAuth.
///
/// `github_id` is the stable join key: repeated logins with the same
/// GitHub account converge on one row even if the username changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub github_id: i64,
    pub github_username: String,
    pub github_email: String,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An encrypted GitHub OAuth access/refresh pair. One live row per user.
///
/// The token fields hold ciphertexts; plaintexts exist only transiently in
/// the proxy handler and OAuth callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubCredential {
    pub id: String,
    pub user_id: String,
    #[serde(skip_serializing)]
    pub access_token: String,
    #[serde(skip_serializing)]
    pub refresh_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token_expires_at: DateTime<Utc>,
    /// Free-form scope string reported by GitHub at grant time.
    pub scopes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Access level granted for a permission category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeLevel {
    Read,
    Write,
}

impl ScopeLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

impl fmt::Display for ScopeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScopeLevel {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            other => Err(AppError::invalid_input(format!(
                "invalid scope level {other:?} (must be read or write)"
            ))),
        }
    }
}

/// Map of permission category to granted level, e.g. `contents → write`.
///
/// Backed by a `BTreeMap` so serialization and display are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scopes(BTreeMap<String, ScopeLevel>);

impl Scopes {
    /// Parse a comma-separated scope string like `"contents:read, pulls:write"`.
    ///
    /// # Errors
    ///
    /// Returns an error if any segment is not `permission:level`, the level
    /// is not `read` or `write`, or the result is empty.
    pub fn parse(s: &str) -> AppResult<Self> {
        let mut scopes = BTreeMap::new();
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (permission, level) = part.split_once(':').ok_or_else(|| {
                AppError::invalid_input(format!(
                    "invalid scope format {part:?} (expected permission:level)"
                ))
            })?;
            let level: ScopeLevel = level.trim().parse()?;
            scopes.insert(permission.trim().to_owned(), level);
        }
        if scopes.is_empty() {
            return Err(AppError::invalid_input("no valid scopes provided"));
        }
        Ok(Self(scopes))
    }

    /// Whether the scopes satisfy `permission` at `level`.
    ///
    /// `write` grants both `read` and `write`; `read` grants only `read`.
    #[must_use]
    pub fn has_permission(&self, permission: &str, level: ScopeLevel) -> bool {
        self.0.get(permission).is_some_and(|granted| *granted >= level)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ScopeLevel)> {
        self.0.iter()
    }
}

impl fmt::Display for Scopes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (permission, level) in &self.0 {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{permission}:{level}")?;
            first = false;
        }
        Ok(())
    }
}

/// A scoped bearer token issued to a coding agent.
///
/// The plaintext is emitted exactly once at creation; only its SHA-256
/// hash and display prefix are stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyToken {
    pub id: String,
    #[serde(skip_serializing)]
    pub token_hash: String,
    /// First 8 characters of the plaintext, for human display.
    pub token_prefix: String,
    pub user_id: String,
    pub github_credential_id: String,
    /// Repository the token is pinned to, as `owner/name`.
    pub repository: String,
    pub scopes: Scopes,
    /// Free-form label grouping audit entries by agent session.
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    pub request_count: i64,
    pub created_at: DateTime<Utc>,
}

impl ProxyToken {
    /// Whether the token may still be used: not revoked and not expired.
    #[must_use]
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && now < self.expires_at
    }
}

/// Well-known audit actions. The audit log stores actions as strings so
/// readers treat unknown values as opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    AuthLogin,
    TokenCreated,
    TokenRevoked,
    ProxyRequest,
    ProxyScopeDenied,
}

impl AuditAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AuthLogin => "auth_login",
            Self::TokenCreated => "token_created",
            Self::TokenRevoked => "token_revoked",
            Self::ProxyRequest => "proxy_request",
            Self::ProxyScopeDenied => "proxy_scope_denied",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_token_id: Option<String>,
    pub action: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub method: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub repository: String,
    pub status_code: i64,
    pub duration_ms: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session_id: String,
    pub metadata: serde_json::Value,
}

impl AuditEntry {
    /// Minimal entry carrying only user and action; the store fills id and
    /// timestamp on insert.
    #[must_use]
    pub fn new(user_id: impl Into<String>, action: AuditAction) -> Self {
        Self {
            id: String::new(),
            timestamp: Utc::now(),
            user_id: user_id.into(),
            proxy_token_id: None,
            action: action.as_str().to_owned(),
            method: String::new(),
            path: String::new(),
            repository: String::new(),
            status_code: 0,
            duration_ms: 0,
            session_id: String::new(),
            metadata: serde_json::Value::Null,
        }
    }
}

/// Conjunction filter for audit queries. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub user_id: String,
    pub repository: String,
    pub token_id: String,
    pub action: String,
    pub status_code: Option<i64>,
    pub limit: i64,
    pub offset: i64,
}

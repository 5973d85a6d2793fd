// ABOUTME: Server configuration loaded from HUBPROXY_* environment variables
// ABOUTME: Covers encryption key, GitHub OAuth app, database, token durations, and dev mode
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Hubproxy Authors

//! Environment-driven configuration.
//!
//! Every knob has a `HUBPROXY_`-prefixed variable. The encryption key is
//! the only required setting; everything else carries a default suitable
//! for local development. GitHub endpoint URLs are overridable so tests
//! can point the server at a mock upstream.

use std::env;

use chrono::Duration;

use crate::errors::{AppError, AppResult};

/// Default token lifetime applied when a create request omits one.
const DEFAULT_TOKEN_DURATION_HOURS: i64 = 24;
/// Upper bound on requested token lifetimes.
const MAX_TOKEN_DURATION_HOURS: i64 = 7 * 24;

/// GitHub OAuth app and endpoint configuration.
#[derive(Debug, Clone)]
pub struct GitHubConfig {
    /// OAuth app client id used for the login and refresh flows.
    pub client_id: String,
    /// OAuth app client secret.
    pub client_secret: String,
    /// Base URL of the upstream REST API.
    pub api_base_url: String,
    /// Authorisation page users are redirected to at login.
    pub authorize_url: String,
    /// Token endpoint used for both code exchange and refresh.
    pub token_url: String,
}

/// Token issuance limits.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// Applied when a create request does not specify a duration.
    pub default_duration: Duration,
    /// Requests above this are rejected.
    pub max_duration: Duration,
}

/// Complete server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port the HTTP server listens on.
    pub http_port: u16,
    /// sqlx database URL, e.g. `sqlite:hubproxy.db`.
    pub database_url: String,
    /// Hex-encoded 32-byte AES-256-GCM key. Required.
    pub encryption_key: String,
    pub github: GitHubConfig,
    pub tokens: TokenConfig,
    /// Usernames granted the admin role at login (case-insensitive).
    pub admins: Vec<String>,
    /// Enables the test-login endpoint. Never enable in production.
    pub dev_mode: bool,
}

impl ServerConfig {
    /// Load configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the encryption key is missing or a numeric /
    /// duration variable fails to parse.
    pub fn from_env() -> AppResult<Self> {
        let encryption_key = env::var("HUBPROXY_ENCRYPTION_KEY").map_err(|_| {
            AppError::invalid_input(
                "HUBPROXY_ENCRYPTION_KEY is required (64 hex chars; generate one with hubproxy::crypto::generate_key)",
            )
        })?;

        let http_port = env_parse("HUBPROXY_HTTP_PORT", 8080_u16)?;

        let default_duration = env_duration(
            "HUBPROXY_TOKEN_DEFAULT_DURATION",
            Duration::hours(DEFAULT_TOKEN_DURATION_HOURS),
        )?;
        let max_duration = env_duration(
            "HUBPROXY_TOKEN_MAX_DURATION",
            Duration::hours(MAX_TOKEN_DURATION_HOURS),
        )?;
        if default_duration > max_duration {
            return Err(AppError::invalid_input(
                "default token duration exceeds the configured maximum",
            ));
        }

        let admins = env::var("HUBPROXY_ADMINS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect();

        Ok(Self {
            http_port,
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:hubproxy.db".into()),
            encryption_key,
            github: GitHubConfig {
                client_id: env::var("HUBPROXY_GITHUB_CLIENT_ID").unwrap_or_default(),
                client_secret: env::var("HUBPROXY_GITHUB_CLIENT_SECRET").unwrap_or_default(),
                api_base_url: env::var("HUBPROXY_GITHUB_API_BASE")
                    .unwrap_or_else(|_| "https://api.github.com".into()),
                authorize_url: env::var("HUBPROXY_GITHUB_AUTHORIZE_URL")
                    .unwrap_or_else(|_| "https://github.com/login/oauth/authorize".into()),
                token_url: env::var("HUBPROXY_GITHUB_TOKEN_URL")
                    .unwrap_or_else(|_| "https://github.com/login/oauth/access_token".into()),
            },
            tokens: TokenConfig {
                default_duration,
                max_duration,
            },
            admins,
            dev_mode: env::var("HUBPROXY_DEV_MODE").is_ok_and(|v| v == "1" || v == "true"),
        })
    }

    /// Whether the given GitHub username is in the admin allowlist.
    #[must_use]
    pub fn is_admin(&self, username: &str) -> bool {
        self.admins.iter().any(|a| a.eq_ignore_ascii_case(username))
    }

    /// Host portion of the upstream API base URL, used for virtual-host
    /// routing of proxied requests.
    #[must_use]
    pub fn upstream_host(&self) -> &str {
        let base = &self.github.api_base_url;
        let without_scheme = base
            .strip_prefix("https://")
            .or_else(|| base.strip_prefix("http://"))
            .unwrap_or(base);
        without_scheme
            .split('/')
            .next()
            .unwrap_or(without_scheme)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> AppResult<T> {
    match env::var(name) {
        Ok(v) => v
            .parse()
            .map_err(|_| AppError::invalid_input(format!("{name} is not a valid value: {v}"))),
        Err(_) => Ok(default),
    }
}

fn env_duration(name: &str, default: Duration) -> AppResult<Duration> {
    match env::var(name) {
        Ok(v) => parse_duration(&v)
            .ok_or_else(|| AppError::invalid_input(format!("{name} is not a valid duration: {v}"))),
        Err(_) => Ok(default),
    }
}

/// Parse a human duration like `90s`, `30m`, `8h`, `7d`, or `1h30m`.
///
/// Returns `None` for empty, malformed, or non-positive input.
#[must_use]
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut total = Duration::zero();
    let mut number = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            number.push(c);
            continue;
        }
        let value: i64 = number.parse().ok()?;
        number.clear();
        total = total
            + match c {
                's' => Duration::seconds(value),
                'm' => Duration::minutes(value),
                'h' => Duration::hours(value),
                'd' => Duration::days(value),
                _ => return None,
            };
    }
    // A trailing bare number has no unit.
    if !number.is_empty() {
        return None;
    }
    if total <= Duration::zero() {
        return None;
    }
    Some(total)
}

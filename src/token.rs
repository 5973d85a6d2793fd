// ABOUTME: Proxy token lifecycle: generation, hashing, resolution, revocation, usage
// ABOUTME: Tokens are ghp_ plus 43 base62 chars; only the SHA-256 hash is stored
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Hubproxy Authors

//! Proxy token service.
//!
//! The plaintext token is returned exactly once at creation. Lookups go
//! through the SHA-256 hash; revocation and expiry are checked after the
//! hash lookup, never before.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::database::Store;
use crate::errors::{AppError, AppResult};
use crate::models::{ProxyToken, Scopes};

/// Prefix carried by every proxy token.
pub const TOKEN_PREFIX: &str = "ghp_";
/// Random bytes backing a token body.
const TOKEN_BYTES: usize = 32;
/// Fixed base62 body width; 32 random bytes always fit in 43 digits.
const TOKEN_BODY_LEN: usize = 43;
/// Characters stored for human display.
const DISPLAY_PREFIX_LEN: usize = 8;

const ALPHABET: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Parameters for creating a new proxy token.
#[derive(Debug, Clone)]
pub struct CreateTokenRequest {
    pub user_id: String,
    pub github_credential_id: String,
    pub repository: String,
    pub scopes: Scopes,
    pub duration: Duration,
    pub session_id: String,
}

/// Result of creating a proxy token. `token` is the plaintext, shown once.
#[derive(Debug, Clone)]
pub struct CreatedToken {
    pub token: String,
    pub record: ProxyToken,
}

/// Manages proxy token lifecycle on top of a [`Store`].
pub struct TokenService {
    store: Arc<dyn Store>,
    max_duration: Duration,
}

impl TokenService {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, max_duration: Duration) -> Self {
        Self {
            store,
            max_duration,
        }
    }

    /// Generate a new token, persist its hash, and return the plaintext
    /// together with the stored row.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the repository is empty, the scope map is
    /// empty, or the duration is non-positive or above the configured
    /// maximum. Returns a database error if the insert fails.
    pub async fn create(&self, req: CreateTokenRequest) -> AppResult<CreatedToken> {
        if req.repository.is_empty() {
            return Err(AppError::invalid_input("repository is required"));
        }
        if req.scopes.is_empty() {
            return Err(AppError::invalid_input("at least one scope is required"));
        }
        if req.duration <= Duration::zero() {
            return Err(AppError::invalid_input("duration must be positive"));
        }
        if req.duration > self.max_duration {
            return Err(AppError::invalid_input(format!(
                "duration {}s exceeds maximum {}s",
                req.duration.num_seconds(),
                self.max_duration.num_seconds()
            )));
        }

        let plaintext = generate_token();
        let now = Utc::now();
        let record = ProxyToken {
            id: Uuid::new_v4().to_string(),
            token_hash: hash_token(&plaintext),
            token_prefix: plaintext[..DISPLAY_PREFIX_LEN].to_owned(),
            user_id: req.user_id,
            github_credential_id: req.github_credential_id,
            repository: req.repository,
            scopes: req.scopes,
            session_id: req.session_id,
            expires_at: now + req.duration,
            revoked_at: None,
            last_used_at: None,
            request_count: 0,
            created_at: now,
        };

        self.store.create_proxy_token(&record).await?;

        Ok(CreatedToken {
            token: plaintext,
            record,
        })
    }

    /// Resolve a plaintext token to its stored row.
    ///
    /// Returns `Ok(None)` when no row matches the hash (callers report
    /// Unauthorized without distinguishing).
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` if the prefix is wrong, the token was
    /// revoked, or it has expired.
    pub async fn resolve(&self, plaintext: &str) -> AppResult<Option<ProxyToken>> {
        if !plaintext.starts_with(TOKEN_PREFIX) {
            return Err(AppError::unauthorized("Invalid token prefix"));
        }

        let hash = hash_token(plaintext);
        let Some(token) = self.store.get_proxy_token_by_hash(&hash).await? else {
            return Ok(None);
        };

        if token.revoked_at.is_some() {
            return Err(AppError::unauthorized("Token has been revoked"));
        }
        if Utc::now() >= token.expires_at {
            return Err(AppError::unauthorized("Token has expired"));
        }

        Ok(Some(token))
    }

    /// Mark a token as revoked.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the token is absent or already revoked.
    pub async fn revoke(&self, id: &str) -> AppResult<()> {
        self.store.revoke_proxy_token(id).await
    }

    /// Advance `last_used_at` and `request_count`.
    ///
    /// # Errors
    ///
    /// Returns a database error if the update fails.
    pub async fn record_usage(&self, id: &str) -> AppResult<()> {
        self.store.update_proxy_token_usage(id).await
    }
}

/// SHA-256 hex digest of a token plaintext, prefix included.
#[must_use]
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Generate a `ghp_`-prefixed token from 32 random bytes, base62-encoded
/// and left-padded with `'0'` to a fixed 43-character body.
#[must_use]
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    format!("{TOKEN_PREFIX}{}", base62_encode(&bytes))
}

/// Encode a big-endian byte string in base62 via repeated long division.
fn base62_encode(bytes: &[u8]) -> String {
    let mut num = bytes.to_vec();
    let mut digits = Vec::with_capacity(TOKEN_BODY_LEN);

    while num.iter().any(|&b| b != 0) {
        let mut remainder: u32 = 0;
        for byte in &mut num {
            let acc = (remainder << 8) | u32::from(*byte);
            *byte = (acc / 62) as u8;
            remainder = acc % 62;
        }
        digits.push(ALPHABET[remainder as usize]);
    }

    while digits.len() < TOKEN_BODY_LEN {
        digits.push(ALPHABET[0]);
    }
    digits.reverse();

    String::from_utf8(digits).expect("base62 alphabet is ASCII")
}

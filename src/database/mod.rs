// ABOUTME: Persistence abstraction for hubproxy with swappable backends
// ABOUTME: Defines the Store trait covering users, credentials, proxy tokens, and the audit log
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Hubproxy Authors

//! Database abstraction layer.
//!
//! All backends implement [`Store`] so the rest of the application talks
//! to `Arc<dyn Store>`. Every mutation is individually durable; the only
//! cross-call guarantee a backend must provide is that
//! [`revoke_proxy_token`](Store::revoke_proxy_token) is atomic relative to
//! concurrent revokes.

use async_trait::async_trait;

use crate::errors::AppResult;
use crate::models::{AuditEntry, AuditFilter, GitHubCredential, ProxyToken, User};

/// SQLite reference backend.
pub mod sqlite;

pub use sqlite::SqliteStore;

/// Database operations required by hubproxy.
#[async_trait]
pub trait Store: Send + Sync {
    /// Run pending schema migrations.
    async fn migrate(&self) -> AppResult<()>;

    // ================================
    // Users
    // ================================

    /// Insert or update a user keyed by `github_id`, returning the stored
    /// row. On conflict the existing `id` and `created_at` are preserved
    /// and username/email/updated_at are refreshed.
    async fn upsert_user(&self, user: &User) -> AppResult<User>;

    /// Get a user by GitHub account id. `None` when absent.
    async fn get_user_by_github_id(&self, github_id: i64) -> AppResult<Option<User>>;

    /// Get a user by internal id. `None` when absent.
    async fn get_user_by_id(&self, id: &str) -> AppResult<Option<User>>;

    /// All users, oldest first.
    async fn list_users(&self) -> AppResult<Vec<User>>;

    // ================================
    // GitHub credentials
    // ================================

    /// Insert or replace the credential row for `credential.user_id`,
    /// returning the stored row (the existing row's id on conflict).
    async fn upsert_github_credential(
        &self,
        credential: &GitHubCredential,
    ) -> AppResult<GitHubCredential>;

    /// Get the credential row for a user. `None` when absent.
    async fn get_github_credential(&self, user_id: &str) -> AppResult<Option<GitHubCredential>>;

    /// Get a credential row by its id. `None` when absent.
    async fn get_github_credential_by_id(&self, id: &str)
        -> AppResult<Option<GitHubCredential>>;

    // ================================
    // Proxy tokens
    // ================================

    /// Insert a new proxy token. `token_hash` is unique; a colliding
    /// insert is an error.
    async fn create_proxy_token(&self, token: &ProxyToken) -> AppResult<()>;

    /// Look up a token by plaintext hash. Returns the row regardless of
    /// revoked/expired state; callers must check usability.
    async fn get_proxy_token_by_hash(&self, hash: &str) -> AppResult<Option<ProxyToken>>;

    /// Look up a token by id, regardless of state.
    async fn get_proxy_token_by_id(&self, id: &str) -> AppResult<Option<ProxyToken>>;

    /// Tokens belonging to a user, newest first.
    async fn list_proxy_tokens(&self, user_id: &str) -> AppResult<Vec<ProxyToken>>;

    /// All tokens, newest first.
    async fn list_all_proxy_tokens(&self) -> AppResult<Vec<ProxyToken>>;

    /// Set `revoked_at = now()` where it is still null. Fails with
    /// `Conflict` if the token is absent or already revoked.
    async fn revoke_proxy_token(&self, id: &str) -> AppResult<()>;

    /// Advance `last_used_at` and increment `request_count` atomically.
    async fn update_proxy_token_usage(&self, id: &str) -> AppResult<()>;

    // ================================
    // Audit log
    // ================================

    /// Append an audit entry. Callers treat failures as best-effort.
    async fn create_audit_entry(&self, entry: &AuditEntry) -> AppResult<()>;

    /// Audit entries matching the filter, newest first, capped at 100.
    async fn list_audit_entries(&self, filter: &AuditFilter) -> AppResult<Vec<AuditEntry>>;
}

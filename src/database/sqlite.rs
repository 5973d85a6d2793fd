// ABOUTME: SQLite implementation of the Store trait using sqlx
// ABOUTME: Reference backend with embedded migrations; in-memory pools serve the tests
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Hubproxy Authors

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, SqlitePool};
use uuid::Uuid;

use super::Store;
use crate::errors::{AppError, AppResult};
use crate::models::{AuditEntry, AuditFilter, GitHubCredential, ProxyToken, Scopes, User, UserRole};

/// Hard cap on audit listing page size.
const AUDIT_LIMIT_MAX: i64 = 100;

/// SQLite-backed [`Store`].
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (and create if necessary) a SQLite database at the given URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub async fn new(database_url: &str) -> AppResult<Self> {
        // In-memory databases must be pinned to a single connection, or
        // every pooled connection would see its own empty database.
        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect(database_url)
                .await
        } else {
            let connection_options = if database_url.starts_with("sqlite:") {
                format!("{database_url}?mode=rwc")
            } else {
                database_url.to_owned()
            };
            SqlitePool::connect(&connection_options).await
        }
        .map_err(|e| AppError::database(format!("Failed to connect to database: {e}")))?;

        Ok(Self { pool })
    }

    /// Access the underlying pool, mainly for test fixtures.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn row_to_user(row: &SqliteRow) -> User {
        let role: String = row.get("role");
        User {
            id: row.get("id"),
            github_id: row.get("github_id"),
            github_username: row.get("github_username"),
            github_email: row.get("github_email"),
            role: UserRole::from_str_lossy(&role),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    fn row_to_credential(row: &SqliteRow) -> GitHubCredential {
        GitHubCredential {
            id: row.get("id"),
            user_id: row.get("user_id"),
            access_token: row.get("access_token"),
            refresh_token: row.get("refresh_token"),
            access_token_expires_at: row.get("access_token_expires_at"),
            refresh_token_expires_at: row.get("refresh_token_expires_at"),
            scopes: row.get("scopes"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    fn row_to_proxy_token(row: &SqliteRow) -> AppResult<ProxyToken> {
        let scopes_json: String = row.get("scopes");
        let scopes: Scopes = serde_json::from_str(&scopes_json)
            .map_err(|e| AppError::database(format!("Stored scopes are malformed: {e}")))?;
        Ok(ProxyToken {
            id: row.get("id"),
            token_hash: row.get("token_hash"),
            token_prefix: row.get("token_prefix"),
            user_id: row.get("user_id"),
            github_credential_id: row.get("github_credential_id"),
            repository: row.get("repository"),
            scopes,
            session_id: row.get("session_id"),
            expires_at: row.get("expires_at"),
            revoked_at: row.get("revoked_at"),
            last_used_at: row.get("last_used_at"),
            request_count: row.get("request_count"),
            created_at: row.get("created_at"),
        })
    }

    fn row_to_audit_entry(row: &SqliteRow) -> AuditEntry {
        let metadata_json: String = row.get("metadata");
        let metadata = serde_json::from_str(&metadata_json).unwrap_or(serde_json::Value::Null);
        AuditEntry {
            id: row.get("id"),
            timestamp: row.get("timestamp"),
            user_id: row.get("user_id"),
            proxy_token_id: row.get("proxy_token_id"),
            action: row.get("action"),
            method: row.get("method"),
            path: row.get("path"),
            repository: row.get("repository"),
            status_code: row.get("status_code"),
            duration_ms: row.get("duration_ms"),
            session_id: row.get("session_id"),
            metadata,
        }
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn migrate(&self) -> AppResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    async fn upsert_user(&self, user: &User) -> AppResult<User> {
        let id = if user.id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            user.id.clone()
        };
        let now = Utc::now();

        sqlx::query(
            r"
            INSERT INTO users (id, github_id, github_username, github_email, role, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT(github_id) DO UPDATE SET
                github_username = excluded.github_username,
                github_email = excluded.github_email,
                updated_at = excluded.updated_at
            ",
        )
        .bind(&id)
        .bind(user.github_id)
        .bind(&user.github_username)
        .bind(&user.github_email)
        .bind(user.role.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to upsert user: {e}")))?;

        // Re-read so a conflicting insert returns the existing row's id,
        // role, and created_at. Role is fixed at first login.
        self.get_user_by_github_id(user.github_id)
            .await?
            .ok_or_else(|| AppError::database("Upserted user vanished"))
    }

    async fn get_user_by_github_id(&self, github_id: i64) -> AppResult<Option<User>> {
        let row = sqlx::query(
            "SELECT id, github_id, github_username, github_email, role, created_at, updated_at
             FROM users WHERE github_id = $1",
        )
        .bind(github_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get user: {e}")))?;

        Ok(row.as_ref().map(Self::row_to_user))
    }

    async fn get_user_by_id(&self, id: &str) -> AppResult<Option<User>> {
        let row = sqlx::query(
            "SELECT id, github_id, github_username, github_email, role, created_at, updated_at
             FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get user: {e}")))?;

        Ok(row.as_ref().map(Self::row_to_user))
    }

    async fn list_users(&self) -> AppResult<Vec<User>> {
        let rows = sqlx::query(
            "SELECT id, github_id, github_username, github_email, role, created_at, updated_at
             FROM users ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list users: {e}")))?;

        Ok(rows.iter().map(Self::row_to_user).collect())
    }

    async fn upsert_github_credential(
        &self,
        credential: &GitHubCredential,
    ) -> AppResult<GitHubCredential> {
        let id = if credential.id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            credential.id.clone()
        };
        let now = Utc::now();

        sqlx::query(
            r"
            INSERT INTO github_credentials (
                id, user_id, access_token, refresh_token,
                access_token_expires_at, refresh_token_expires_at,
                scopes, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT(user_id) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                access_token_expires_at = excluded.access_token_expires_at,
                refresh_token_expires_at = excluded.refresh_token_expires_at,
                scopes = excluded.scopes,
                updated_at = excluded.updated_at
            ",
        )
        .bind(&id)
        .bind(&credential.user_id)
        .bind(&credential.access_token)
        .bind(&credential.refresh_token)
        .bind(credential.access_token_expires_at)
        .bind(credential.refresh_token_expires_at)
        .bind(&credential.scopes)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to upsert credential: {e}")))?;

        self.get_github_credential(&credential.user_id)
            .await?
            .ok_or_else(|| AppError::database("Upserted credential vanished"))
    }

    async fn get_github_credential(&self, user_id: &str) -> AppResult<Option<GitHubCredential>> {
        let row = sqlx::query(
            "SELECT id, user_id, access_token, refresh_token, access_token_expires_at,
                    refresh_token_expires_at, scopes, created_at, updated_at
             FROM github_credentials WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get credential: {e}")))?;

        Ok(row.as_ref().map(Self::row_to_credential))
    }

    async fn get_github_credential_by_id(
        &self,
        id: &str,
    ) -> AppResult<Option<GitHubCredential>> {
        let row = sqlx::query(
            "SELECT id, user_id, access_token, refresh_token, access_token_expires_at,
                    refresh_token_expires_at, scopes, created_at, updated_at
             FROM github_credentials WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get credential: {e}")))?;

        Ok(row.as_ref().map(Self::row_to_credential))
    }

    async fn create_proxy_token(&self, token: &ProxyToken) -> AppResult<()> {
        let scopes_json = serde_json::to_string(&token.scopes)
            .map_err(|e| AppError::internal(format!("Failed to serialize scopes: {e}")))?;

        sqlx::query(
            r"
            INSERT INTO proxy_tokens (
                id, token_hash, token_prefix, user_id, github_credential_id,
                repository, scopes, session_id, expires_at, request_count, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 0, $10)
            ",
        )
        .bind(&token.id)
        .bind(&token.token_hash)
        .bind(&token.token_prefix)
        .bind(&token.user_id)
        .bind(&token.github_credential_id)
        .bind(&token.repository)
        .bind(scopes_json)
        .bind(&token.session_id)
        .bind(token.expires_at)
        .bind(token.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create proxy token: {e}")))?;

        Ok(())
    }

    async fn get_proxy_token_by_hash(&self, hash: &str) -> AppResult<Option<ProxyToken>> {
        let row = sqlx::query(
            "SELECT id, token_hash, token_prefix, user_id, github_credential_id, repository,
                    scopes, session_id, expires_at, revoked_at, last_used_at, request_count, created_at
             FROM proxy_tokens WHERE token_hash = $1",
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get proxy token: {e}")))?;

        row.as_ref().map(Self::row_to_proxy_token).transpose()
    }

    async fn get_proxy_token_by_id(&self, id: &str) -> AppResult<Option<ProxyToken>> {
        let row = sqlx::query(
            "SELECT id, token_hash, token_prefix, user_id, github_credential_id, repository,
                    scopes, session_id, expires_at, revoked_at, last_used_at, request_count, created_at
             FROM proxy_tokens WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get proxy token: {e}")))?;

        row.as_ref().map(Self::row_to_proxy_token).transpose()
    }

    async fn list_proxy_tokens(&self, user_id: &str) -> AppResult<Vec<ProxyToken>> {
        let rows = sqlx::query(
            "SELECT id, token_hash, token_prefix, user_id, github_credential_id, repository,
                    scopes, session_id, expires_at, revoked_at, last_used_at, request_count, created_at
             FROM proxy_tokens WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list proxy tokens: {e}")))?;

        rows.iter().map(Self::row_to_proxy_token).collect()
    }

    async fn list_all_proxy_tokens(&self) -> AppResult<Vec<ProxyToken>> {
        let rows = sqlx::query(
            "SELECT id, token_hash, token_prefix, user_id, github_credential_id, repository,
                    scopes, session_id, expires_at, revoked_at, last_used_at, request_count, created_at
             FROM proxy_tokens ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list proxy tokens: {e}")))?;

        rows.iter().map(Self::row_to_proxy_token).collect()
    }

    async fn revoke_proxy_token(&self, id: &str) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE proxy_tokens SET revoked_at = $1 WHERE id = $2 AND revoked_at IS NULL",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to revoke proxy token: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::conflict("Token not found or already revoked"));
        }
        Ok(())
    }

    async fn update_proxy_token_usage(&self, id: &str) -> AppResult<()> {
        sqlx::query(
            "UPDATE proxy_tokens SET last_used_at = $1, request_count = request_count + 1
             WHERE id = $2",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to update token usage: {e}")))?;

        Ok(())
    }

    async fn create_audit_entry(&self, entry: &AuditEntry) -> AppResult<()> {
        let id = if entry.id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            entry.id.clone()
        };
        let metadata = if entry.metadata.is_null() {
            "{}".to_owned()
        } else {
            entry.metadata.to_string()
        };

        sqlx::query(
            r"
            INSERT INTO audit_log (
                id, timestamp, user_id, proxy_token_id, action, method, path,
                repository, status_code, duration_ms, session_id, metadata
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ",
        )
        .bind(&id)
        .bind(Utc::now())
        .bind(&entry.user_id)
        .bind(&entry.proxy_token_id)
        .bind(&entry.action)
        .bind(&entry.method)
        .bind(&entry.path)
        .bind(&entry.repository)
        .bind(entry.status_code)
        .bind(entry.duration_ms)
        .bind(&entry.session_id)
        .bind(metadata)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create audit entry: {e}")))?;

        Ok(())
    }

    async fn list_audit_entries(&self, filter: &AuditFilter) -> AppResult<Vec<AuditEntry>> {
        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
            "SELECT id, timestamp, user_id, proxy_token_id, action, method, path,
                    repository, status_code, duration_ms, session_id, metadata
             FROM audit_log WHERE 1=1",
        );

        if !filter.user_id.is_empty() {
            builder.push(" AND user_id = ").push_bind(&filter.user_id);
        }
        if !filter.repository.is_empty() {
            builder
                .push(" AND repository = ")
                .push_bind(&filter.repository);
        }
        if !filter.token_id.is_empty() {
            builder
                .push(" AND proxy_token_id = ")
                .push_bind(&filter.token_id);
        }
        if !filter.action.is_empty() {
            builder.push(" AND action = ").push_bind(&filter.action);
        }
        if let Some(status) = filter.status_code {
            builder.push(" AND status_code = ").push_bind(status);
        }

        builder.push(" ORDER BY timestamp DESC");

        let limit = if filter.limit <= 0 {
            AUDIT_LIMIT_MAX
        } else {
            filter.limit.min(AUDIT_LIMIT_MAX)
        };
        builder.push(" LIMIT ").push_bind(limit);
        if filter.offset > 0 {
            builder.push(" OFFSET ").push_bind(filter.offset);
        }

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to list audit entries: {e}")))?;

        Ok(rows.iter().map(Self::row_to_audit_entry).collect())
    }
}

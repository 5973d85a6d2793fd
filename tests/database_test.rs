// ABOUTME: Store semantics tests against the SQLite backend
// ABOUTME: Validates upsert convergence, ordering, revoke atomicity, and audit filters
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Hubproxy Authors
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

use chrono::{Duration, Utc};
use hubproxy::database::{SqliteStore, Store};
use hubproxy::models::{
    AuditAction, AuditEntry, AuditFilter, GitHubCredential, ProxyToken, Scopes, User, UserRole,
};
use uuid::Uuid;

async fn test_store() -> SqliteStore {
    let store = SqliteStore::new("sqlite::memory:").await.unwrap();
    store.migrate().await.unwrap();
    store
}

fn sample_user(github_id: i64, username: &str) -> User {
    User {
        id: String::new(),
        github_id,
        github_username: username.to_owned(),
        github_email: format!("{username}@example.com"),
        role: UserRole::User,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn sample_credential(user_id: &str) -> GitHubCredential {
    GitHubCredential {
        id: String::new(),
        user_id: user_id.to_owned(),
        access_token: "ciphertext-access".into(),
        refresh_token: "ciphertext-refresh".into(),
        access_token_expires_at: Utc::now() + Duration::hours(8),
        refresh_token_expires_at: Utc::now() + Duration::days(180),
        scopes: "repo".into(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn sample_token(user_id: &str, credential_id: &str, repository: &str) -> ProxyToken {
    ProxyToken {
        id: Uuid::new_v4().to_string(),
        token_hash: Uuid::new_v4().to_string(),
        token_prefix: "ghp_abcd".into(),
        user_id: user_id.to_owned(),
        github_credential_id: credential_id.to_owned(),
        repository: repository.to_owned(),
        scopes: Scopes::parse("contents:read").unwrap(),
        session_id: "s1".into(),
        expires_at: Utc::now() + Duration::hours(1),
        revoked_at: None,
        last_used_at: None,
        request_count: 0,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn user_upsert_converges_on_github_id() {
    let store = test_store().await;

    let first = store.upsert_user(&sample_user(42, "octocat")).await.unwrap();
    assert!(!first.id.is_empty());

    // Same account, renamed: one row, same internal id, fresh username.
    let renamed = store
        .upsert_user(&sample_user(42, "octocat-renamed"))
        .await
        .unwrap();
    assert_eq!(renamed.id, first.id);
    assert_eq!(renamed.github_username, "octocat-renamed");
    assert_eq!(renamed.created_at, first.created_at);

    assert_eq!(store.list_users().await.unwrap().len(), 1);

    // Lookups by both keys.
    assert!(store.get_user_by_github_id(42).await.unwrap().is_some());
    assert!(store.get_user_by_id(&first.id).await.unwrap().is_some());
    assert!(store.get_user_by_github_id(999).await.unwrap().is_none());
}

#[tokio::test]
async fn users_list_oldest_first() {
    let store = test_store().await;

    for (id, name) in [(1, "first"), (2, "second"), (3, "third")] {
        store.upsert_user(&sample_user(id, name)).await.unwrap();
    }

    let users = store.list_users().await.unwrap();
    let names: Vec<_> = users.iter().map(|u| u.github_username.as_str()).collect();
    assert_eq!(names, ["first", "second", "third"]);
}

#[tokio::test]
async fn credential_upsert_replaces_in_place() {
    let store = test_store().await;
    let user = store.upsert_user(&sample_user(7, "carol")).await.unwrap();

    let first = store
        .upsert_github_credential(&sample_credential(&user.id))
        .await
        .unwrap();

    let mut replacement = sample_credential(&user.id);
    replacement.access_token = "new-ciphertext".into();
    let second = store
        .upsert_github_credential(&replacement)
        .await
        .unwrap();

    // One row per user, id stable across replacement.
    assert_eq!(second.id, first.id);
    assert_eq!(second.access_token, "new-ciphertext");

    let by_id = store
        .get_github_credential_by_id(&first.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_id.access_token, "new-ciphertext");
}

#[tokio::test]
async fn proxy_tokens_list_newest_first_and_scope_by_user() {
    let store = test_store().await;
    let alice = store.upsert_user(&sample_user(1, "alice")).await.unwrap();
    let bob = store.upsert_user(&sample_user(2, "bob")).await.unwrap();
    let cred_a = store
        .upsert_github_credential(&sample_credential(&alice.id))
        .await
        .unwrap();
    let cred_b = store
        .upsert_github_credential(&sample_credential(&bob.id))
        .await
        .unwrap();

    let mut old = sample_token(&alice.id, &cred_a.id, "acme/old");
    old.created_at = Utc::now() - Duration::hours(2);
    store.create_proxy_token(&old).await.unwrap();
    store
        .create_proxy_token(&sample_token(&alice.id, &cred_a.id, "acme/new"))
        .await
        .unwrap();
    store
        .create_proxy_token(&sample_token(&bob.id, &cred_b.id, "acme/other"))
        .await
        .unwrap();

    let alices = store.list_proxy_tokens(&alice.id).await.unwrap();
    assert_eq!(alices.len(), 2);
    assert_eq!(alices[0].repository, "acme/new");
    assert_eq!(alices[1].repository, "acme/old");

    assert_eq!(store.list_all_proxy_tokens().await.unwrap().len(), 3);
}

#[tokio::test]
async fn duplicate_token_hash_insert_fails() {
    let store = test_store().await;
    let user = store.upsert_user(&sample_user(1, "alice")).await.unwrap();
    let cred = store
        .upsert_github_credential(&sample_credential(&user.id))
        .await
        .unwrap();

    let token = sample_token(&user.id, &cred.id, "acme/widget");
    store.create_proxy_token(&token).await.unwrap();

    let mut clash = sample_token(&user.id, &cred.id, "acme/widget");
    clash.token_hash = token.token_hash.clone();
    assert!(store.create_proxy_token(&clash).await.is_err());
}

#[tokio::test]
async fn revoke_sets_timestamp_once() {
    let store = test_store().await;
    let user = store.upsert_user(&sample_user(1, "alice")).await.unwrap();
    let cred = store
        .upsert_github_credential(&sample_credential(&user.id))
        .await
        .unwrap();
    let token = sample_token(&user.id, &cred.id, "acme/widget");
    store.create_proxy_token(&token).await.unwrap();

    store.revoke_proxy_token(&token.id).await.unwrap();
    let revoked = store
        .get_proxy_token_by_id(&token.id)
        .await
        .unwrap()
        .unwrap();
    assert!(revoked.revoked_at.is_some());

    // Revoking again, or revoking a missing id, conflicts.
    assert!(store.revoke_proxy_token(&token.id).await.is_err());
    assert!(store.revoke_proxy_token("missing").await.is_err());
}

#[tokio::test]
async fn usage_update_is_monotonic() {
    let store = test_store().await;
    let user = store.upsert_user(&sample_user(1, "alice")).await.unwrap();
    let cred = store
        .upsert_github_credential(&sample_credential(&user.id))
        .await
        .unwrap();
    let token = sample_token(&user.id, &cred.id, "acme/widget");
    store.create_proxy_token(&token).await.unwrap();

    for _ in 0..5 {
        store.update_proxy_token_usage(&token.id).await.unwrap();
    }

    let updated = store
        .get_proxy_token_by_id(&token.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.request_count, 5);
}

#[tokio::test]
async fn token_lookup_by_hash_returns_row_regardless_of_state() {
    let store = test_store().await;
    let user = store.upsert_user(&sample_user(1, "alice")).await.unwrap();
    let cred = store
        .upsert_github_credential(&sample_credential(&user.id))
        .await
        .unwrap();

    let mut token = sample_token(&user.id, &cred.id, "acme/widget");
    token.expires_at = Utc::now() - Duration::hours(1);
    store.create_proxy_token(&token).await.unwrap();
    store.revoke_proxy_token(&token.id).await.unwrap();

    // The store does not police state; that's the token service's job.
    let row = store
        .get_proxy_token_by_hash(&token.token_hash)
        .await
        .unwrap()
        .expect("row should come back even revoked and expired");
    assert!(row.revoked_at.is_some());
    assert!(row.expires_at < Utc::now());
}

#[tokio::test]
async fn audit_entries_filter_by_conjunction() {
    let store = test_store().await;
    let alice = store.upsert_user(&sample_user(1, "alice")).await.unwrap();
    let bob = store.upsert_user(&sample_user(2, "bob")).await.unwrap();

    let mut entry = AuditEntry::new(&alice.id, AuditAction::ProxyRequest);
    entry.repository = "acme/widget".into();
    entry.status_code = 200;
    store.create_audit_entry(&entry).await.unwrap();

    let mut entry = AuditEntry::new(&alice.id, AuditAction::ProxyScopeDenied);
    entry.repository = "other/other".into();
    entry.status_code = 403;
    store.create_audit_entry(&entry).await.unwrap();

    let mut entry = AuditEntry::new(&bob.id, AuditAction::ProxyRequest);
    entry.repository = "acme/widget".into();
    entry.status_code = 200;
    store.create_audit_entry(&entry).await.unwrap();

    // By user.
    let filter = AuditFilter {
        user_id: alice.id.clone(),
        ..Default::default()
    };
    assert_eq!(store.list_audit_entries(&filter).await.unwrap().len(), 2);

    // By user AND action.
    let filter = AuditFilter {
        user_id: alice.id.clone(),
        action: "proxy_request".into(),
        ..Default::default()
    };
    assert_eq!(store.list_audit_entries(&filter).await.unwrap().len(), 1);

    // By repository across users.
    let filter = AuditFilter {
        repository: "acme/widget".into(),
        ..Default::default()
    };
    assert_eq!(store.list_audit_entries(&filter).await.unwrap().len(), 2);

    // By status code.
    let filter = AuditFilter {
        status_code: Some(403),
        ..Default::default()
    };
    let denied = store.list_audit_entries(&filter).await.unwrap();
    assert_eq!(denied.len(), 1);
    assert_eq!(denied[0].action, "proxy_scope_denied");
}

#[tokio::test]
async fn audit_listing_is_capped_at_100() {
    let store = test_store().await;
    let user = store.upsert_user(&sample_user(1, "alice")).await.unwrap();

    for _ in 0..120 {
        store
            .create_audit_entry(&AuditEntry::new(&user.id, AuditAction::ProxyRequest))
            .await
            .unwrap();
    }

    let entries = store
        .list_audit_entries(&AuditFilter::default())
        .await
        .unwrap();
    assert_eq!(entries.len(), 100);

    // An oversized limit is clamped, and offset pages past the cap.
    let filter = AuditFilter {
        limit: 1000,
        ..Default::default()
    };
    assert_eq!(store.list_audit_entries(&filter).await.unwrap().len(), 100);

    let filter = AuditFilter {
        offset: 100,
        ..Default::default()
    };
    assert_eq!(store.list_audit_entries(&filter).await.unwrap().len(), 20);
}

// ABOUTME: Integration tests for the token management and audit APIs
// ABOUTME: Covers ownership enforcement, admin listing, validation, and audit scoping
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Hubproxy Authors
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use axum::http::StatusCode;
use common::TestServer;
use serde_json::json;

#[tokio::test]
async fn created_token_response_contains_plaintext_exactly_once() {
    let server = TestServer::spawn().await.unwrap();
    let session = server.test_login("alice", "user").await.unwrap();

    let created = server
        .create_token(&session, "acme/widget", "contents:read", "1h")
        .await
        .unwrap();
    let bearer = created["token"].as_str().unwrap();
    assert_eq!(bearer.len(), 4 + 43);

    // Listings expose only the 8-char display prefix, never hash or body.
    let resp = server
        .client
        .get(format!("{}/api/tokens", server.base_url))
        .bearer_auth(&session.token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let listed: serde_json::Value = resp.json().await.unwrap();
    let entry = &listed.as_array().unwrap()[0];
    assert_eq!(entry["token_prefix"], bearer[..8].to_owned());
    assert!(entry.get("token_hash").is_none());
    assert!(entry.get("token").is_none());
}

#[tokio::test]
async fn token_creation_validates_input() {
    let server = TestServer::spawn().await.unwrap();
    let session = server.test_login("bob", "user").await.unwrap();

    // Malformed scopes.
    let resp = server
        .client
        .post(format!("{}/api/tokens", server.base_url))
        .bearer_auth(&session.token)
        .json(&json!({ "repository": "acme/widget", "scopes": "contents:execute" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // Empty scopes.
    let resp = server
        .client
        .post(format!("{}/api/tokens", server.base_url))
        .bearer_auth(&session.token)
        .json(&json!({ "repository": "acme/widget", "scopes": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // Bad duration format.
    let resp = server
        .client
        .post(format!("{}/api/tokens", server.base_url))
        .bearer_auth(&session.token)
        .json(&json!({
            "repository": "acme/widget",
            "scopes": "contents:read",
            "duration": "tomorrow",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // Duration above the configured maximum.
    let resp = server
        .client
        .post(format!("{}/api/tokens", server.base_url))
        .bearer_auth(&session.token)
        .json(&json!({
            "repository": "acme/widget",
            "scopes": "contents:read",
            "duration": "30d",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // Empty repository.
    let resp = server
        .client
        .post(format!("{}/api/tokens", server.base_url))
        .bearer_auth(&session.token)
        .json(&json!({ "repository": "", "scopes": "contents:read" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn omitted_duration_uses_the_configured_default() {
    let server = TestServer::spawn().await.unwrap();
    let session = server.test_login("carol", "user").await.unwrap();

    let resp = server
        .client
        .post(format!("{}/api/tokens", server.base_url))
        .bearer_auth(&session.token)
        .json(&json!({ "repository": "acme/widget", "scopes": "contents:read" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: serde_json::Value = resp.json().await.unwrap();

    let expires_at =
        chrono::DateTime::parse_from_rfc3339(body["expires_at"].as_str().unwrap()).unwrap();
    let expected = chrono::Utc::now() + chrono::Duration::hours(24);
    let delta = (expires_at.with_timezone(&chrono::Utc) - expected).num_seconds();
    assert!(delta.abs() < 60, "expiry {delta}s away from the default");
}

#[tokio::test]
async fn tokens_are_owner_scoped() {
    let server = TestServer::spawn().await.unwrap();
    let alice = server.test_login("alice", "user").await.unwrap();
    let eve = server.test_login("eve", "user").await.unwrap();

    let created = server
        .create_token(&alice, "acme/widget", "contents:read", "1h")
        .await
        .unwrap();
    let token_id = created["id"].as_str().unwrap();

    // Eve cannot read Alice's token.
    let resp = server
        .client
        .get(format!("{}/api/tokens/{token_id}", server.base_url))
        .bearer_auth(&eve.token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    // Nor revoke it.
    let resp = server
        .client
        .delete(format!("{}/api/tokens/{token_id}", server.base_url))
        .bearer_auth(&eve.token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    // Eve's listing does not include it.
    let resp = server
        .client
        .get(format!("{}/api/tokens", server.base_url))
        .bearer_auth(&eve.token)
        .send()
        .await
        .unwrap();
    let listed: serde_json::Value = resp.json().await.unwrap();
    assert!(listed.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn admin_sees_all_tokens_with_the_all_flag() {
    let server = TestServer::spawn().await.unwrap();
    let alice = server.test_login("alice", "user").await.unwrap();
    let admin = server.test_login("admin", "admin").await.unwrap();

    server
        .create_token(&alice, "acme/widget", "contents:read", "1h")
        .await
        .unwrap();

    let resp = server
        .client
        .get(format!("{}/api/tokens?all=true", server.base_url))
        .bearer_auth(&admin.token)
        .send()
        .await
        .unwrap();
    let listed: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 1);

    // Without the flag, the admin's own (empty) listing.
    let resp = server
        .client
        .get(format!("{}/api/tokens", server.base_url))
        .bearer_auth(&admin.token)
        .send()
        .await
        .unwrap();
    let listed: serde_json::Value = resp.json().await.unwrap();
    assert!(listed.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn double_revoke_conflicts() {
    let server = TestServer::spawn().await.unwrap();
    let session = server.test_login("dave", "user").await.unwrap();

    let created = server
        .create_token(&session, "acme/widget", "contents:read", "1h")
        .await
        .unwrap();
    let token_id = created["id"].as_str().unwrap();

    let url = format!("{}/api/tokens/{token_id}", server.base_url);
    let first = server
        .client
        .delete(&url)
        .bearer_auth(&session.token)
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = server
        .client
        .delete(&url)
        .bearer_auth(&session.token)
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::BAD_REQUEST);

    // Missing token is a 404, not a conflict.
    let resp = server
        .client
        .delete(format!("{}/api/tokens/no-such-id", server.base_url))
        .bearer_auth(&session.token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn user_listing_is_admin_only() {
    let server = TestServer::spawn().await.unwrap();
    let alice = server.test_login("alice", "user").await.unwrap();
    let admin = server.test_login("admin", "admin").await.unwrap();

    let resp = server
        .client
        .get(format!("{}/api/users", server.base_url))
        .bearer_auth(&alice.token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = server
        .client
        .get(format!("{}/api/users", server.base_url))
        .bearer_auth(&admin.token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let users: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(users.as_array().unwrap().len(), 2);

    // Per-user token listing, also admin only.
    let resp = server
        .client
        .get(format!(
            "{}/api/users/{}/tokens",
            server.base_url, alice.user_id
        ))
        .bearer_auth(&admin.token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn audit_listing_scopes_non_admins_to_their_own_entries() {
    let server = TestServer::spawn().await.unwrap();
    let alice = server.test_login("alice", "user").await.unwrap();
    let bob = server.test_login("bob", "user").await.unwrap();
    let admin = server.test_login("admin", "admin").await.unwrap();

    server
        .create_token(&alice, "acme/widget", "contents:read", "1h")
        .await
        .unwrap();
    server
        .create_token(&bob, "acme/gadget", "contents:read", "1h")
        .await
        .unwrap();

    // Alice sees only her own token_created entry.
    let resp = server
        .client
        .get(format!("{}/api/audit", server.base_url))
        .bearer_auth(&alice.token)
        .send()
        .await
        .unwrap();
    let entries: serde_json::Value = resp.json().await.unwrap();
    let entries = entries.as_array().unwrap();
    assert!(!entries.is_empty());
    assert!(entries
        .iter()
        .all(|e| e["user_id"] == serde_json::json!(alice.user_id)));

    // Even if she asks for Bob's.
    let resp = server
        .client
        .get(format!(
            "{}/api/audit?user_id={}",
            server.base_url, bob.user_id
        ))
        .bearer_auth(&alice.token)
        .send()
        .await
        .unwrap();
    let entries: serde_json::Value = resp.json().await.unwrap();
    assert!(entries
        .as_array()
        .unwrap()
        .iter()
        .all(|e| e["user_id"] == serde_json::json!(alice.user_id)));

    // The admin may filter by user.
    let resp = server
        .client
        .get(format!(
            "{}/api/audit?user_id={}",
            server.base_url, bob.user_id
        ))
        .bearer_auth(&admin.token)
        .send()
        .await
        .unwrap();
    let entries: serde_json::Value = resp.json().await.unwrap();
    let entries = entries.as_array().unwrap();
    assert!(!entries.is_empty());
    assert!(entries
        .iter()
        .all(|e| e["user_id"] == serde_json::json!(bob.user_id)));
}

#[tokio::test]
async fn management_api_requires_a_session() {
    let server = TestServer::spawn().await.unwrap();

    for path in ["/api/tokens", "/api/audit", "/api/users"] {
        let resp = server
            .client
            .get(format!("{}{path}", server.base_url))
            .send()
            .await
            .unwrap();
        assert!(
            resp.status() == StatusCode::UNAUTHORIZED,
            "{path} should require a session, got {}",
            resp.status()
        );
    }
}

// ABOUTME: Library entry point for hubproxy, a scoped-credential GitHub API reverse proxy
// ABOUTME: Agents hold short-lived ghp_ tokens; the real OAuth credential never leaves the server
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Hubproxy Authors

#![deny(unsafe_code)]

//! # hubproxy
//!
//! A GitHub API reverse proxy that issues short-lived, narrowly-scoped
//! opaque tokens to autonomous coding agents. Agents point their standard
//! GitHub tooling at the proxy; the proxy authenticates the bearer,
//! enforces the declared repository and permission scope on every request,
//! transparently substitutes the real upstream credential (obtained once
//! by a human via OAuth, stored encrypted at rest, refreshed on demand),
//! forwards the call, and records an audit entry.
//!
//! Agents never possess real credentials and cannot escape their
//! pre-approved repository/permission envelope.
//!
//! ## Architecture
//!
//! - **crypto** — AES-256-GCM encryption of the stored OAuth pair
//! - **database** — `Store` trait with a SQLite reference backend
//! - **session** — in-memory session and OAuth-state stores
//! - **token** — `ghp_` token generation, hashing, and resolution
//! - **proxy** — the enforcing request path and the endpoint scope table
//! - **routes** — OAuth login flow and the token management API
//! - **server** — state assembly, routing, graceful shutdown

/// Environment-driven server configuration.
pub mod config;

/// AES-256-GCM encryption for credentials at rest.
pub mod crypto;

/// Persistence abstraction and the SQLite backend.
pub mod database;

/// Unified error type and HTTP status mapping.
pub mod errors;

/// Structured logging setup.
pub mod logging;

/// Core data models.
pub mod models;

/// The reverse-proxy request path and scope enforcement.
pub mod proxy;

/// HTTP route handlers.
pub mod routes;

/// In-memory session and OAuth state stores.
pub mod session;

/// Server state and lifecycle.
pub mod server;

/// Proxy token lifecycle service.
pub mod token;

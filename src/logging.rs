// ABOUTME: Structured logging initialisation via tracing-subscriber
// ABOUTME: RUST_LOG controls the filter; defaults to info
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Hubproxy Authors

use tracing_subscriber::EnvFilter;

/// Initialise the global tracing subscriber. Call once at startup.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

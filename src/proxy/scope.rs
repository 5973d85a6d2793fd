// ABOUTME: Endpoint-to-permission mapping for the GitHub REST surface
// ABOUTME: Ordered regex rule table; first match wins, unknown endpoints map to nothing
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Hubproxy Authors

//! Scope rules for proxied endpoints.
//!
//! The table is compiled once at first use and scanned linearly; it is
//! small enough that anything cleverer would be a loss. Order matters:
//! more specific rules come first.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::ScopeLevel;

struct EndpointRule {
    pattern: Regex,
    /// `None` means any method matches.
    method: Option<&'static str>,
    permission: &'static str,
    level: ScopeLevel,
}

/// Permission category for endpoints that need only a valid token.
pub const PERMISSION_METADATA: &str = "metadata";

static RULES: LazyLock<Vec<EndpointRule>> = LazyLock::new(|| {
    use ScopeLevel::{Read, Write};

    let defs: &[(&str, Option<&'static str>, &'static str, ScopeLevel)] = &[
        // Contents
        (r"^/repos/[^/]+/[^/]+/contents(/.*)?$", Some("GET"), "contents", Read),
        (r"^/repos/[^/]+/[^/]+/contents(/.*)?$", Some("PUT"), "contents", Write),
        (r"^/repos/[^/]+/[^/]+/contents(/.*)?$", Some("DELETE"), "contents", Write),
        // Git refs, trees, blobs, commits (part of contents)
        (r"^/repos/[^/]+/[^/]+/git/(refs|trees|blobs|commits|tags)(/.*)?$", Some("GET"), "contents", Read),
        (r"^/repos/[^/]+/[^/]+/git/(refs|trees|blobs|commits|tags)(/.*)?$", Some("POST"), "contents", Write),
        (r"^/repos/[^/]+/[^/]+/git/(refs|trees|blobs|commits|tags)(/.*)?$", Some("PATCH"), "contents", Write),
        // Branches
        (r"^/repos/[^/]+/[^/]+/branches(/.*)?$", Some("GET"), "contents", Read),
        // Commits (list/get)
        (r"^/repos/[^/]+/[^/]+/commits(/.*)?$", Some("GET"), "contents", Read),
        // Compare
        (r"^/repos/[^/]+/[^/]+/compare/.*$", Some("GET"), "contents", Read),
        // Pull requests
        (r"^/repos/[^/]+/[^/]+/pulls(/[0-9]+)?$", Some("GET"), "pulls", Read),
        (r"^/repos/[^/]+/[^/]+/pulls$", Some("POST"), "pulls", Write),
        (r"^/repos/[^/]+/[^/]+/pulls/[0-9]+$", Some("PATCH"), "pulls", Write),
        (r"^/repos/[^/]+/[^/]+/pulls/[0-9]+/merge$", Some("PUT"), "pulls", Write),
        (r"^/repos/[^/]+/[^/]+/pulls/[0-9]+/(files|commits|reviews|comments|requested_reviewers)(/.*)?$", Some("GET"), "pulls", Read),
        (r"^/repos/[^/]+/[^/]+/pulls/[0-9]+/(reviews|comments|requested_reviewers)(/.*)?$", Some("POST"), "pulls", Write),
        (r"^/repos/[^/]+/[^/]+/pulls/[0-9]+/(reviews|comments|requested_reviewers)(/.*)?$", Some("PUT"), "pulls", Write),
        (r"^/repos/[^/]+/[^/]+/pulls/[0-9]+/(reviews|comments|requested_reviewers)(/.*)?$", Some("DELETE"), "pulls", Write),
        // Issues
        (r"^/repos/[^/]+/[^/]+/issues(/[0-9]+)?$", Some("GET"), "issues", Read),
        (r"^/repos/[^/]+/[^/]+/issues$", Some("POST"), "issues", Write),
        (r"^/repos/[^/]+/[^/]+/issues/[0-9]+$", Some("PATCH"), "issues", Write),
        (r"^/repos/[^/]+/[^/]+/issues/[0-9]+/comments(/.*)?$", Some("GET"), "issues", Read),
        (r"^/repos/[^/]+/[^/]+/issues/[0-9]+/comments(/.*)?$", Some("POST"), "issues", Write),
        (r"^/repos/[^/]+/[^/]+/issues/[0-9]+/labels(/.*)?$", Some("GET"), "issues", Read),
        (r"^/repos/[^/]+/[^/]+/issues/[0-9]+/labels(/.*)?$", Some("POST"), "issues", Write),
        (r"^/repos/[^/]+/[^/]+/issues/[0-9]+/labels(/.*)?$", Some("PUT"), "issues", Write),
        (r"^/repos/[^/]+/[^/]+/issues/[0-9]+/labels(/.*)?$", Some("DELETE"), "issues", Write),
        (r"^/repos/[^/]+/[^/]+/issues/[0-9]+/assignees(/.*)?$", Some("GET"), "issues", Read),
        (r"^/repos/[^/]+/[^/]+/issues/[0-9]+/assignees(/.*)?$", Some("POST"), "issues", Write),
        (r"^/repos/[^/]+/[^/]+/issues/[0-9]+/assignees(/.*)?$", Some("DELETE"), "issues", Write),
        // Statuses and checks
        (r"^/repos/[^/]+/[^/]+/statuses/.*$", Some("GET"), "statuses", Read),
        (r"^/repos/[^/]+/[^/]+/statuses/.*$", Some("POST"), "statuses", Write),
        (r"^/repos/[^/]+/[^/]+/check-runs(/.*)?$", Some("GET"), "checks", Read),
        (r"^/repos/[^/]+/[^/]+/check-runs(/.*)?$", Some("POST"), "checks", Write),
        (r"^/repos/[^/]+/[^/]+/check-suites(/.*)?$", Some("GET"), "checks", Read),
        // Actions
        (r"^/repos/[^/]+/[^/]+/actions(/.*)?$", Some("GET"), "actions", Read),
        (r"^/repos/[^/]+/[^/]+/actions/(workflows|runs)/[^/]+/dispatches$", Some("POST"), "actions", Write),
        // Releases
        (r"^/repos/[^/]+/[^/]+/releases(/.*)?$", Some("GET"), "contents", Read),
        (r"^/repos/[^/]+/[^/]+/releases(/.*)?$", Some("POST"), "contents", Write),
        // Repository metadata (always allowed with any valid token)
        (r"^/repos/[^/]+/[^/]+$", Some("GET"), PERMISSION_METADATA, Read),
        // User endpoint (always allowed)
        (r"^/user$", None, PERMISSION_METADATA, Read),
    ];

    defs.iter()
        .map(|(pattern, method, permission, level)| EndpointRule {
            pattern: Regex::new(pattern).expect("endpoint pattern is valid"),
            method: *method,
            permission,
            level: *level,
        })
        .collect()
});

/// Permission and level required for a method/path pair.
///
/// Returns `None` for unrecognized endpoints, which are forwarded without
/// a scope check; the upstream credential's own permissions still govern.
#[must_use]
pub fn endpoint_scope(method: &str, path: &str) -> Option<(&'static str, ScopeLevel)> {
    RULES
        .iter()
        .find(|rule| {
            rule.method.map_or(true, |m| m == method) && rule.pattern.is_match(path)
        })
        .map(|rule| (rule.permission, rule.level))
}

/// Extract `owner/name` from a `/repos/{owner}/{name}/...` path.
#[must_use]
pub fn extract_repo_from_path(path: &str) -> Option<String> {
    let mut parts = path.trim_start_matches('/').splitn(4, '/');
    if parts.next() != Some("repos") {
        return None;
    }
    let owner = parts.next()?;
    let name = parts.next()?;
    if owner.is_empty() || name.is_empty() {
        return None;
    }
    Some(format!("{owner}/{name}"))
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Session-key sanitization.
//!
//! Session keys are colon-delimited logical identifiers
//! (`"telegram:chat:42"`, `"main:threads:2024-05-06T120000Z-ab12cd34"`).
//! On disk each `:`-separated segment becomes one directory level, so every
//! segment must be reduced to a safe filename before it touches the
//! filesystem.

/// Sanitize one key segment into a safe path component.
///
/// Leading/trailing whitespace is stripped, anything outside
/// `[A-Za-z0-9._-]` becomes `_`, runs of `_` collapse to one, and
/// leading/trailing `.`/`_` are trimmed.  A segment that sanitizes to
/// nothing yields the literal `_`.
pub fn sanitize_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut prev_underscore = false;
    for c in segment.trim().chars() {
        let mapped = if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            c
        } else {
            '_'
        };
        if mapped == '_' {
            if prev_underscore {
                continue;
            }
            prev_underscore = true;
        } else {
            prev_underscore = false;
        }
        out.push(mapped);
    }
    let trimmed = out.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Split a session key on `:` and sanitize every segment.
///
/// An empty key yields the single segment `main`.
pub fn key_segments(key: &str) -> Vec<String> {
    if key.trim().is_empty() {
        return vec!["main".to_string()];
    }
    key.split(':').map(sanitize_segment).collect()
}

/// The sanitized rendering of a full key, segments re-joined with `:`.
pub fn sanitize_key(key: &str) -> String {
    key_segments(key).join(":")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

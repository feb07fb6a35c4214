// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Keyword and marker extraction for turn records.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

fn keyword_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // CJK runs of ≥ 2, ASCII words of ≥ 3, or digit runs of ≥ 3.
        Regex::new(r"[\p{Han}\p{Hiragana}\p{Katakana}\p{Hangul}]{2,}|[A-Za-z]{3,}|[0-9]{3,}")
            .unwrap()
    })
}

fn marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"#([A-Za-z0-9_-]{2,32})").unwrap())
}

/// Extract up to `cap` keywords from `text`, deduplicated case-folded, in
/// first-occurrence order.
pub fn extract_keywords(text: &str, cap: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for m in keyword_re().find_iter(text) {
        let folded = m.as_str().to_lowercase();
        if seen.insert(folded.clone()) {
            out.push(folded);
            if out.len() >= cap {
                break;
            }
        }
    }
    out
}

/// Extract `#tag`-style anchors (2–32 chars each), deduplicated, in
/// first-occurrence order.
pub fn extract_markers(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for caps in marker_re().captures_iter(text) {
        let tag = caps[1].to_string();
        if seen.insert(tag.clone()) {
            out.push(tag);
        }
    }
    out
}

/// Truncate `text` to at most `max_chars` characters (not bytes), appending
/// an ellipsis when anything was cut.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max_chars).collect();
    format!("{cut}…")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

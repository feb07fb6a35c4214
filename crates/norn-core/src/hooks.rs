// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;

use norn_model::Message;

/// Fixed per-message request overhead added on top of the content estimate
/// (role framing, separators, provider bookkeeping).
pub const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Deterministic request-size estimate: a chars/4 heuristic per message plus
/// a small fixed overhead.  Any monotonic approximation satisfies the
/// pressure contract; a real tokenizer can be substituted without touching
/// callers.
pub fn estimate_request_tokens(messages: &[Message]) -> usize {
    messages
        .iter()
        .map(|m| m.approx_tokens() + MESSAGE_OVERHEAD_TOKENS)
        .sum()
}

/// Read-only snapshot of a turn handed to hooks just before the model call.
pub struct TurnContext<'a> {
    pub session_key: &'a str,
    pub session_path: Option<&'a Path>,
    pub estimated_tokens: usize,
    pub messages: &'a [Message],
}

/// A per-turn inspector.
///
/// Hooks run in registration order and return zero or more extra user-role
/// messages injected after the turn's main user message (and persisted with
/// it).  Hooks must not mutate thread state; anything beyond message
/// injection goes through the public enqueue and sink paths.
pub trait TurnHook: Send + Sync {
    fn inspect(&self, ctx: &TurnContext<'_>) -> Vec<Message>;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

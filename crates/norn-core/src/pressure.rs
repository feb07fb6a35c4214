// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use norn_config::ContextConfig;
use norn_model::Message;

use crate::hooks::{TurnContext, TurnHook};

/// Injects a compression directive when the estimated request size crosses
/// the warning threshold.
///
/// The notice is a user-role message, so it is persisted with the turn and
/// keeps reminding the model on subsequent turns until the session is
/// actually compacted.
pub struct ContextPressureHook {
    window_tokens: usize,
    warn_ratio: f32,
}

impl ContextPressureHook {
    pub fn new(cfg: &ContextConfig) -> Self {
        Self { window_tokens: cfg.window_tokens, warn_ratio: cfg.warn_ratio }
    }

    fn threshold(&self) -> usize {
        let t = (self.window_tokens as f32 * self.warn_ratio).floor() as usize;
        if t == 0 {
            self.window_tokens
        } else {
            t
        }
    }
}

impl TurnHook for ContextPressureHook {
    fn inspect(&self, ctx: &TurnContext<'_>) -> Vec<Message> {
        if self.window_tokens == 0 {
            return Vec::new();
        }
        // Without a session file there is nothing to compress.
        let Some(path) = ctx.session_path else {
            return Vec::new();
        };
        if ctx.estimated_tokens < self.threshold() {
            return Vec::new();
        }

        let ratio = ctx.estimated_tokens as f32 / self.window_tokens as f32;
        vec![Message::user(format!(
            "[Context Pressure Notice]\n\
             Estimated request tokens are high for this thread.\n\
             - estimated_request_tokens: {}\n\
             - configured_context_window_tokens: {}\n\
             - estimated_usage_ratio: {:.2}\n\
             - session_key: {}\n\
             - session_file: {}\n\
             You MUST load and execute skill \"compress-context\" NOW, before responding to the user.",
            ctx.estimated_tokens,
            self.window_tokens,
            ratio,
            ctx.session_key,
            path.display(),
        ))]
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

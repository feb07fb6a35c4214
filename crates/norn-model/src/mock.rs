// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::{ChatRequest, ChatResponse, Role, ToolCall, Usage};

/// Deterministic mock provider for tests.  Echoes the last user message
/// back as the assistant response.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl crate::Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn chat(&self, req: ChatRequest) -> anyhow::Result<ChatResponse> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("[no input]");
        Ok(ChatResponse {
            content: format!("MOCK: {reply}"),
            reasoning_content: None,
            tool_calls: Vec::new(),
            usage: Usage { prompt_tokens: 10, completion_tokens: 10, total_tokens: 20 },
        })
    }
}

/// A pre-scripted mock provider.  Each call to `chat` pops the next response
/// from the front of the queue, so tests can specify exact sequences —
/// including tool calls — without network access.
pub struct ScriptedMockProvider {
    scripts: Arc<Mutex<Vec<ChatResponse>>>,
    /// Every `ChatRequest` seen by this provider, in call order.
    /// Written on each `chat()` call so tests can inspect what was sent.
    pub requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl ScriptedMockProvider {
    pub fn new(scripts: Vec<ChatResponse>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Convenience: provider that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![ChatResponse {
            content: reply.into(),
            ..Default::default()
        }])
    }

    /// Convenience: provider that returns a tool call, then a text reply.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        args_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            ChatResponse {
                tool_calls: vec![ToolCall {
                    id: tool_id.into(),
                    name: tool_name.into(),
                    arguments: args_json.into(),
                }],
                ..Default::default()
            },
            ChatResponse {
                content: final_text.into(),
                ..Default::default()
            },
        ])
    }

    /// The most recent request seen, if any.
    pub fn last_request(&self) -> Option<ChatRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl crate::Provider for ScriptedMockProvider {
    fn name(&self) -> &str {
        "scripted-mock"
    }
    fn model_name(&self) -> &str {
        "scripted-mock-model"
    }

    async fn chat(&self, req: ChatRequest) -> anyhow::Result<ChatResponse> {
        self.requests.lock().unwrap().push(req);
        let mut scripts = self.scripts.lock().unwrap();
        if scripts.is_empty() {
            // Default fallback when all scripts are consumed
            return Ok(ChatResponse {
                content: "[no more scripts]".into(),
                ..Default::default()
            });
        }
        Ok(scripts.remove(0))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

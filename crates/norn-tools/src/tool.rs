// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;

/// The result of executing a tool.
///
/// Tool results are always strings — the model reads them verbatim.  A
/// failed invocation is not an `Err`: it is an output flagged `is_error`,
/// which the registry renders with a leading `"Error: "` sentinel so the
/// runner can log it while the model recovers in-band.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(content: impl Into<String>) -> Self {
        Self { content: content.into(), is_error: false }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self { content: msg.into(), is_error: true }
    }
}

/// Trait that every built-in and per-thread tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for parameters
    fn parameters_schema(&self) -> Value;
    /// Execute the tool.  Failures are reported via [`ToolOutput::err`],
    /// never panics or `Err` returns.
    async fn invoke(&self, args: &Value) -> ToolOutput;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

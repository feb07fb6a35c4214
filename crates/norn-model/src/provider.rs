// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;

use norn_config::ProviderConfig;

use crate::{ChatRequest, ChatResponse};

/// The model capability the runtime consumes.
///
/// One call, one final response.  The runtime never streams: a turn either
/// produces a terminal text reply or a batch of tool calls to dispatch.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Human-readable provider name for status display.
    fn name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Send a completion request and return the final response.
    async fn chat(&self, req: ChatRequest) -> anyhow::Result<ChatResponse>;
}

/// Build a provider from configuration.
///
/// `"mock"` resolves to the deterministic echo provider (tests, dry runs);
/// everything else is treated as an OpenAI-compatible endpoint.  A missing
/// provider id is a configuration error and aborts startup.
pub fn from_config(cfg: &ProviderConfig) -> anyhow::Result<Arc<dyn Provider>> {
    match cfg.provider.as_str() {
        "" => bail!("no provider configured; set provider.provider in the config file"),
        "mock" => Ok(Arc::new(crate::MockProvider)),
        _ => Ok(Arc::new(crate::OpenAiCompatProvider::from_config(cfg)?)),
    }
}

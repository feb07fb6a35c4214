// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! OpenAI-compatible chat completion adapter.
//!
//! Most hosted and local providers (OpenAI, Groq, OpenRouter, Ollama, vLLM,
//! llama.cpp) speak the same `/chat/completions` wire format, so a single
//! adapter configured with a base URL and key covers all of them.

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use norn_config::ProviderConfig;

use crate::{ChatRequest, ChatResponse, Message, Role, ToolCall, Usage};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiCompatProvider {
    model: String,
    api_key: Option<String>,
    chat_url: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(model: String, api_key: Option<String>, base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            model,
            api_key,
            chat_url: format!("{base}/chat/completions"),
            max_tokens: None,
            temperature: None,
            client: reqwest::Client::new(),
        }
    }

    /// Build from config, resolving the key from `api_key` or the named
    /// environment variable.  Local endpoints may run keyless.
    pub fn from_config(cfg: &ProviderConfig) -> anyhow::Result<Self> {
        if cfg.model.is_empty() {
            bail!("provider.model is required");
        }
        let api_key = match (&cfg.api_key, &cfg.api_key_env) {
            (Some(k), _) if !k.is_empty() => Some(k.clone()),
            (_, Some(var)) if !var.is_empty() => std::env::var(var).ok().filter(|k| !k.is_empty()),
            _ => None,
        };
        let base = cfg.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let mut p = Self::new(cfg.model.clone(), api_key, base);
        p.max_tokens = cfg.max_tokens;
        p.temperature = cfg.temperature;
        Ok(p)
    }

    fn wire_message(msg: &Message) -> Value {
        let mut m = json!({
            "role": msg.role.to_string(),
            "content": msg.content,
        });
        if !msg.tool_calls.is_empty() {
            m["tool_calls"] = Value::Array(
                msg.tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": { "name": tc.name, "arguments": tc.arguments },
                        })
                    })
                    .collect(),
            );
        }
        if let Some(id) = &msg.tool_call_id {
            m["tool_call_id"] = json!(id);
        }
        if msg.role == Role::Tool {
            if let Some(name) = &msg.name {
                m["name"] = json!(name);
            }
        }
        m
    }

    fn build_body(&self, req: &ChatRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": req.messages.iter().map(Self::wire_message).collect::<Vec<_>>(),
            "stream": false,
        });
        if !req.tools.is_empty() {
            body["tools"] = Value::Array(
                req.tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            },
                        })
                    })
                    .collect(),
            );
        }
        if let Some(mt) = self.max_tokens {
            body["max_tokens"] = json!(mt);
        }
        if let Some(temp) = self.temperature {
            body["temperature"] = json!(temp);
        }
        body
    }

    fn parse_response(body: &Value) -> anyhow::Result<ChatResponse> {
        let message = body["choices"]
            .get(0)
            .map(|c| &c["message"])
            .context("response has no choices")?;

        let tool_calls = message["tool_calls"]
            .as_array()
            .map(|calls| {
                calls
                    .iter()
                    .map(|tc| ToolCall {
                        id: tc["id"].as_str().unwrap_or_default().to_string(),
                        name: tc["function"]["name"].as_str().unwrap_or_default().to_string(),
                        arguments: tc["function"]["arguments"]
                            .as_str()
                            .unwrap_or("{}")
                            .to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let usage = Usage {
            prompt_tokens: body["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: body["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
            total_tokens: body["usage"]["total_tokens"].as_u64().unwrap_or(0) as u32,
        };

        Ok(ChatResponse {
            content: message["content"].as_str().unwrap_or_default().to_string(),
            reasoning_content: message["reasoning_content"].as_str().map(str::to_string),
            tool_calls,
            usage,
        })
    }
}

#[async_trait]
impl crate::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        "openai-compat"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat(&self, req: ChatRequest) -> anyhow::Result<ChatResponse> {
        let body = self.build_body(&req);
        debug!(model = %self.model, messages = req.messages.len(), "chat request");

        let mut http = self.client.post(&self.chat_url).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let resp = http.send().await.context("chat request failed")?;
        let status = resp.status();
        let text = resp.text().await.context("reading chat response body")?;
        if !status.is_success() {
            bail!("chat API error {status}: {text}");
        }

        let value: Value =
            serde_json::from_str(&text).with_context(|| format!("invalid chat response: {text}"))?;
        Self::parse_response(&value)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolSchema;

    fn provider() -> OpenAiCompatProvider {
        OpenAiCompatProvider::new("test-model".into(), None, "http://localhost:9999/v1")
    }

    #[test]
    fn base_url_trailing_slash_is_normalised() {
        let p = OpenAiCompatProvider::new("m".into(), None, "http://h/v1/");
        assert_eq!(p.chat_url, "http://h/v1/chat/completions");
    }

    #[test]
    fn body_includes_tools_only_when_present() {
        let p = provider();
        let without = p.build_body(&ChatRequest {
            messages: vec![Message::user("hi")],
            tools: vec![],
        });
        assert!(without.get("tools").is_none());

        let with = p.build_body(&ChatRequest {
            messages: vec![Message::user("hi")],
            tools: vec![ToolSchema {
                name: "read_file".into(),
                description: "reads".into(),
                parameters: json!({"type": "object"}),
            }],
        });
        assert_eq!(with["tools"][0]["function"]["name"], "read_file");
    }

    #[test]
    fn tool_role_message_carries_correlation_fields() {
        let wire = OpenAiCompatProvider::wire_message(&Message::tool_result("t1", "shell", "out"));
        assert_eq!(wire["role"], "tool");
        assert_eq!(wire["tool_call_id"], "t1");
        assert_eq!(wire["name"], "shell");
    }

    #[test]
    fn assistant_tool_calls_serialise_in_order() {
        let msg = Message::assistant_with_tool_calls(
            "",
            None,
            vec![
                ToolCall { id: "a".into(), name: "one".into(), arguments: "{}".into() },
                ToolCall { id: "b".into(), name: "two".into(), arguments: "{}".into() },
            ],
        );
        let wire = OpenAiCompatProvider::wire_message(&msg);
        assert_eq!(wire["tool_calls"][0]["id"], "a");
        assert_eq!(wire["tool_calls"][1]["id"], "b");
    }

    #[test]
    fn parse_response_plain_text() {
        let body = json!({
            "choices": [{"message": {"content": "hello"}}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4},
        });
        let resp = OpenAiCompatProvider::parse_response(&body).unwrap();
        assert_eq!(resp.content, "hello");
        assert!(resp.tool_calls.is_empty());
        assert_eq!(resp.usage.total_tokens, 4);
    }

    #[test]
    fn parse_response_with_tool_calls() {
        let body = json!({
            "choices": [{"message": {
                "content": "",
                "tool_calls": [
                    {"id": "t1", "type": "function",
                     "function": {"name": "read_file", "arguments": "{\"path\":\"x\"}"}}
                ],
            }}],
        });
        let resp = OpenAiCompatProvider::parse_response(&body).unwrap();
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "read_file");
        assert_eq!(resp.tool_calls[0].arguments, "{\"path\":\"x\"}");
    }

    #[test]
    fn parse_response_without_choices_errors() {
        assert!(OpenAiCompatProvider::parse_response(&json!({})).is_err());
    }
}

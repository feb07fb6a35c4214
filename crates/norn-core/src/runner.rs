// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, error};

use norn_model::{ChatRequest, Message, Provider};
use norn_tools::ToolRegistry;

/// One request/response iteration loop: call the provider, dispatch any
/// requested tool calls in order, feed the results back, repeat until the
/// model produces a terminal text reply.
///
/// There is deliberately no round cap: models sometimes legitimately chain
/// many tool calls.  Cancellation comes from the caller's deadline on the
/// enclosing future.
pub struct TurnRunner {
    provider: Arc<dyn Provider>,
    tools: ToolRegistry,
}

impl TurnRunner {
    pub fn new(provider: Arc<dyn Provider>, tools: ToolRegistry) -> Self {
        Self { provider, tools }
    }

    /// Drive the loop over `messages`, appending the intermediate assistant
    /// tool-call and tool-result messages in place.  Returns the final text.
    pub async fn run_with_messages(&self, messages: &mut Vec<Message>) -> anyhow::Result<String> {
        loop {
            let response = self
                .provider
                .chat(ChatRequest {
                    messages: messages.clone(),
                    tools: self.tools.schemas(),
                })
                .await
                .context("provider error")?;

            if response.tool_calls.is_empty() {
                return Ok(response.content);
            }

            debug!(calls = response.tool_calls.len(), "model requested tool calls");
            messages.push(Message::assistant_with_tool_calls(
                response.content,
                response.reasoning_content,
                response.tool_calls.clone(),
            ));

            // Dispatch strictly in provider order; errors stay in-band so the
            // model can see them and recover.
            for call in &response.tool_calls {
                let result = self.tools.run(&call.name, &call.arguments).await;
                if result.starts_with("Error:") {
                    error!(tool = %call.name, call_id = %call.id, result = %result, "tool call failed");
                }
                messages.push(Message::tool_result(&call.id, &call.name, result));
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use norn_model::{ChatResponse, Role, ScriptedMockProvider, ToolCall};
    use norn_tools::{Tool, ToolOutput};
    use serde_json::{json, Value};

    struct StaticTool {
        name: &'static str,
        reply: &'static str,
    }

    #[async_trait]
    impl Tool for StaticTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "static"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn invoke(&self, _args: &Value) -> ToolOutput {
            ToolOutput::ok(self.reply)
        }
    }

    fn registry() -> ToolRegistry {
        let mut reg = ToolRegistry::new();
        reg.register(StaticTool { name: "read_file", reply: "FILE_CONTENTS" });
        reg
    }

    #[tokio::test]
    async fn plain_reply_returns_without_tool_dispatch() {
        let provider = Arc::new(ScriptedMockProvider::always_text("hello"));
        let runner = TurnRunner::new(provider, registry());
        let mut messages = vec![Message::user("hi")];
        let reply = runner.run_with_messages(&mut messages).await.unwrap();
        assert_eq!(reply, "hello");
        assert_eq!(messages.len(), 1, "no intermediate messages appended");
    }

    #[tokio::test]
    async fn tool_call_loop_appends_assistant_and_tool_messages() {
        let provider = Arc::new(ScriptedMockProvider::tool_then_text(
            "t1",
            "read_file",
            r#"{"path":"x"}"#,
            "OK",
        ));
        let runner = TurnRunner::new(provider, registry());
        let mut messages = vec![Message::user("read it")];
        let reply = runner.run_with_messages(&mut messages).await.unwrap();
        assert_eq!(reply, "OK");

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].tool_calls[0].id, "t1");
        assert_eq!(messages[2].role, Role::Tool);
        assert_eq!(messages[2].tool_call_id.as_deref(), Some("t1"));
        assert_eq!(messages[2].content, "FILE_CONTENTS");
    }

    #[tokio::test]
    async fn unknown_tool_result_fed_back_to_model() {
        let provider = Arc::new(ScriptedMockProvider::tool_then_text(
            "t1",
            "nope",
            "{}",
            "recovered",
        ));
        let runner = TurnRunner::new(provider, registry());
        let mut messages = vec![Message::user("go")];
        let reply = runner.run_with_messages(&mut messages).await.unwrap();
        assert_eq!(reply, "recovered");
        assert_eq!(messages[2].content, "Error: unknown tool 'nope'");
    }

    #[tokio::test]
    async fn multiple_tool_calls_dispatched_in_order() {
        let provider = Arc::new(ScriptedMockProvider::new(vec![
            ChatResponse {
                tool_calls: vec![
                    ToolCall { id: "a".into(), name: "read_file".into(), arguments: "{}".into() },
                    ToolCall { id: "b".into(), name: "read_file".into(), arguments: "{}".into() },
                ],
                ..Default::default()
            },
            ChatResponse { content: "done".into(), ..Default::default() },
        ]));
        let runner = TurnRunner::new(provider, registry());
        let mut messages = vec![Message::user("go")];
        runner.run_with_messages(&mut messages).await.unwrap();

        let tool_ids: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        assert_eq!(tool_ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn provider_error_is_wrapped() {
        struct FailingProvider;
        #[async_trait]
        impl Provider for FailingProvider {
            fn name(&self) -> &str {
                "fail"
            }
            fn model_name(&self) -> &str {
                "fail"
            }
            async fn chat(&self, _req: ChatRequest) -> anyhow::Result<ChatResponse> {
                anyhow::bail!("connection refused")
            }
        }

        let runner = TurnRunner::new(Arc::new(FailingProvider), registry());
        let mut messages = vec![Message::user("hi")];
        let err = runner.run_with_messages(&mut messages).await.unwrap_err();
        assert!(err.to_string().contains("provider error"));
    }
}

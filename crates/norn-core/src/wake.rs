// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

/// A one-shot delivery capability that routes a turn's final reply back to
/// the originating channel (chat adapter, CLI stdout, web socket).
#[async_trait]
pub trait Sink: Send + Sync {
    async fn send(&self, text: &str) -> anyhow::Result<()>;
}

/// Where a wake came from.  The closed set determines the action hint
/// injected into the model prompt; unrecognized tags fall through to a
/// generic hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakeSource {
    Telegram,
    Cli,
    Web,
    UserActive,
    ChildTask,
    ChildCompleted,
    Cron,
    CronFinished,
    External,
    Other(String),
}

impl WakeSource {
    pub fn parse(tag: &str) -> Self {
        match tag {
            "telegram" => Self::Telegram,
            "cli" => Self::Cli,
            "web" => Self::Web,
            "user_active" => Self::UserActive,
            "child_task" => Self::ChildTask,
            "child_completed" => Self::ChildCompleted,
            "cron" => Self::Cron,
            "cron_finished" => Self::CronFinished,
            "external" => Self::External,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Telegram => "telegram",
            Self::Cli => "cli",
            Self::Web => "web",
            Self::UserActive => "user_active",
            Self::ChildTask => "child_task",
            Self::ChildCompleted => "child_completed",
            Self::Cron => "cron",
            Self::CronFinished => "cron_finished",
            Self::External => "external",
            Self::Other(tag) => tag,
        }
    }

    /// The source-specific action hint placed in the wake payload.
    pub fn action_hint(&self) -> &'static str {
        match self {
            Self::Telegram | Self::Cli | Self::Web => "Respond directly to the user request.",
            Self::UserActive => "Resume the target session and respond to this wake message.",
            Self::ChildTask => "Execute this delegated task and return a result.",
            Self::ChildCompleted => {
                "A child thread completed. Summarize the result and report to the user."
            }
            Self::Cron => {
                "A scheduled cron task has started. Execute it based on the provided job context."
            }
            Self::CronFinished => {
                "A cron task has finished. Summarize the result and report to the user."
            }
            Self::External => "Process this external wake message and continue the session.",
            Self::Other(_) => "Process this wake message and continue.",
        }
    }
}

impl std::fmt::Display for WakeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An externally injected event that makes a thread runnable.
#[derive(Clone)]
pub struct WakeMessage {
    pub source: WakeSource,
    pub payload: String,
    /// Delivery capability for the turn's final reply.  When absent the
    /// thread falls back to the sink of the last wake that carried one.
    pub sink: Option<Arc<dyn Sink>>,
    /// When non-empty, rebind the thread's active agent for this turn.
    pub agent_name: Option<String>,
    /// Extra template variables applied to the agent before rendering.
    pub vars: HashMap<String, String>,
    /// Outer deadline for the turn this wake triggers.
    pub timeout: Option<Duration>,
}

impl WakeMessage {
    pub fn new(source: WakeSource, payload: impl Into<String>) -> Self {
        Self {
            source,
            payload: payload.into(),
            sink: None,
            agent_name: None,
            vars: HashMap::new(),
            timeout: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_agent(mut self, name: impl Into<String>) -> Self {
        self.agent_name = Some(name.into());
        self
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl std::fmt::Debug for WakeMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WakeMessage")
            .field("source", &self.source)
            .field("payload_len", &self.payload.len())
            .field("has_sink", &self.sink.is_some())
            .field("agent_name", &self.agent_name)
            .finish()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

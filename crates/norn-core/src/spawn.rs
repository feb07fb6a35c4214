// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Child-thread delegation.
//!
//! A parent spawns a child through the `spawn_thread` tool.  The child is a
//! full thread with a derived session key and a reduced tool registry
//! (no `spawn_thread`/`check_thread` — children cannot recurse).  Completion
//! flows back asynchronously: the child's wake carries a sink that enqueues
//! a `child_completed` wake to the parent, so the parent never holds a
//! reference to the child — only its id and a record in the child map.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use norn_tools::{Tool, ToolOutput};

use crate::manager::ManagerHandle;
use crate::thread::AgentBinding;
use crate::wake::{Sink, WakeMessage, WakeSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    Pending,
    Running,
    Done,
    Failed,
}

impl ChildState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

/// Parent-held record of one spawned child.
#[derive(Debug, Clone)]
pub struct ChildRecord {
    pub id: String,
    pub state: ChildState,
    pub result: Option<String>,
    pub err: Option<String>,
    pub completed_at: Option<Instant>,
}

pub(crate) type ChildMap = Arc<Mutex<HashMap<String, ChildRecord>>>;

/// Drop completed records older than the retention window.  Runs lazily on
/// every spawn/check access; the per-parent map is small.
fn sweep(children: &ChildMap, retention: Duration) {
    children.lock().unwrap().retain(|_, record| match record.completed_at {
        Some(at) => at.elapsed() < retention,
        None => true,
    });
}

/// Completion sink handed to the child's `child_task` wake.  Marks the
/// parent's record and wakes the parent; it never touches parent thread
/// state directly.
struct ChildCompletionSink {
    handle: ManagerHandle,
    parent_key: String,
    child_id: String,
    children: ChildMap,
}

#[async_trait]
impl Sink for ChildCompletionSink {
    async fn send(&self, text: &str) -> anyhow::Result<()> {
        let failed = text.starts_with("[Error]");
        {
            let mut children = self.children.lock().unwrap();
            if let Some(record) = children.get_mut(&self.child_id) {
                if failed {
                    record.state = ChildState::Failed;
                    record.err = Some(text.to_string());
                } else {
                    record.state = ChildState::Done;
                    record.result = Some(text.to_string());
                }
                record.completed_at = Some(Instant::now());
            }
        }

        let payload = if failed {
            format!("Child {} failed:\n{text}", self.child_id)
        } else if text.trim().is_empty() {
            format!("Child {} completed (no output)", self.child_id)
        } else {
            format!("Child {} completed:\n{text}", self.child_id)
        };
        info!(child = %self.child_id, parent = %self.parent_key, failed, "child completed");

        if !self.handle.wake(&self.parent_key, WakeMessage::new(WakeSource::ChildCompleted, payload)) {
            anyhow::bail!("manager gone; child completion for {} dropped", self.child_id);
        }
        Ok(())
    }
}

/// `spawn_thread` — delegate a task to a new child thread.
pub(crate) struct SpawnThreadTool {
    pub handle: ManagerHandle,
    pub parent_key: String,
    pub parent_agent: Arc<Mutex<AgentBinding>>,
    pub children: ChildMap,
}

impl SpawnThreadTool {
    fn child_id() -> String {
        let stamp = chrono::Utc::now().format("%Y-%m-%dT%H%M%SZ");
        let tail = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        format!("{stamp}-{tail}")
    }
}

#[async_trait]
impl Tool for SpawnThreadTool {
    fn name(&self) -> &str {
        "spawn_thread"
    }

    fn description(&self) -> &str {
        "Spawn a child thread to work on a task asynchronously. Returns the child id \
         immediately; you receive a child_completed wake when it finishes. \
         Pass wait=true only for short tasks whose result you need inline. \
         Children cannot spawn further threads."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": { "type": "string", "description": "The task for the child thread" },
                "agent": { "type": "string", "description": "Named agent template for the child (default: your agent with {{TASK}} substituted)" },
                "context": { "type": "string", "description": "Extra context appended to the task" },
                "wait": { "type": "boolean", "description": "Block until the child completes and return its result inline" }
            },
            "required": ["task"],
            "additionalProperties": false
        })
    }

    async fn invoke(&self, args: &Value) -> ToolOutput {
        let Some(scheduler) = self.handle.scheduler_config() else {
            return ToolOutput::err("scheduler is shutting down");
        };
        let retention = Duration::from_secs(scheduler.child_retention_secs);
        sweep(&self.children, retention);

        let task = match args.get("task").and_then(|v| v.as_str()).map(str::trim) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => return ToolOutput::err("task is required"),
        };
        let context = args.get("context").and_then(|v| v.as_str()).unwrap_or_default();
        let wait = args.get("wait").and_then(|v| v.as_bool()).unwrap_or(false);

        // Child agent: an explicitly named template, or the parent's agent
        // with {{TASK}} bound.
        let binding = match args.get("agent").and_then(|v| v.as_str()).filter(|a| !a.is_empty()) {
            Some(name) => match self.handle.resolve_agent(name) {
                Some(template) => {
                    let mut binding = AgentBinding::new(template);
                    binding.vars.insert("TASK".to_string(), task.clone());
                    binding
                }
                None => return ToolOutput::err(format!("unknown agent '{name}'")),
            },
            None => {
                let mut binding = self.parent_agent.lock().unwrap().clone();
                binding.vars.insert("TASK".to_string(), task.clone());
                binding
            }
        };

        let child_id = Self::child_id();
        let session_key = if self.handle.sessions_configured() {
            format!("{}:threads:{}", self.parent_key, child_id)
        } else {
            String::new()
        };
        // Stateless children still need a unique map entry.
        let map_key = if session_key.is_empty() {
            format!("thread:{child_id}")
        } else {
            session_key.clone()
        };

        if !self.handle.spawn_child(&map_key, session_key, binding) {
            return ToolOutput::err("scheduler is shutting down");
        }
        self.children.lock().unwrap().insert(
            child_id.clone(),
            ChildRecord {
                id: child_id.clone(),
                state: ChildState::Pending,
                result: None,
                err: None,
                completed_at: None,
            },
        );

        let payload = if context.is_empty() {
            task.clone()
        } else {
            format!("{task}\n\nContext:\n{context}")
        };
        let wake = WakeMessage::new(WakeSource::ChildTask, payload)
            .with_sink(Arc::new(ChildCompletionSink {
                handle: self.handle.clone(),
                parent_key: self.parent_key.clone(),
                child_id: child_id.clone(),
                children: self.children.clone(),
            }))
            .with_timeout(Duration::from_secs(scheduler.child_timeout_secs));

        if !self.handle.wake(&map_key, wake) {
            return ToolOutput::err("scheduler is shutting down");
        }
        if let Some(record) = self.children.lock().unwrap().get_mut(&child_id) {
            record.state = ChildState::Running;
        }
        debug!(child = %child_id, parent = %self.parent_key, wait, "child task enqueued");

        if wait {
            let deadline = Instant::now() + Duration::from_secs(scheduler.child_timeout_secs);
            loop {
                {
                    let children = self.children.lock().unwrap();
                    if let Some(record) = children.get(&child_id) {
                        match record.state {
                            ChildState::Done => {
                                let result = record.result.clone().unwrap_or_default();
                                return ToolOutput::ok(format!(
                                    "Thread {child_id} completed:\n{result}"
                                ));
                            }
                            ChildState::Failed => {
                                let err = record.err.clone().unwrap_or_default();
                                return ToolOutput::err(format!(
                                    "child {child_id} failed: {err}"
                                ));
                            }
                            ChildState::Pending | ChildState::Running => {}
                        }
                    }
                }
                if Instant::now() >= deadline {
                    return ToolOutput::ok(format!(
                        "Thread spawned with ID: {child_id}\n\
                         Still running after {}s; you will be woken when it completes.",
                        scheduler.child_timeout_secs
                    ));
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }

        ToolOutput::ok(format!(
            "Thread spawned with ID: {child_id}\n\
             Use check_thread to poll its status; you will receive a child_completed wake when it finishes."
        ))
    }
}

/// `check_thread` — inspect a spawned child's state.
pub(crate) struct CheckThreadTool {
    pub children: ChildMap,
    pub retention: Duration,
}

#[async_trait]
impl Tool for CheckThreadTool {
    fn name(&self) -> &str {
        "check_thread"
    }

    fn description(&self) -> &str {
        "Check the state of a child thread spawned with spawn_thread. \
         Completed results stay readable for a limited retention window."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string", "description": "Child id returned by spawn_thread" }
            },
            "required": ["id"],
            "additionalProperties": false
        })
    }

    async fn invoke(&self, args: &Value) -> ToolOutput {
        sweep(&self.children, self.retention);
        let Some(id) = args.get("id").and_then(|v| v.as_str()).filter(|i| !i.is_empty()) else {
            return ToolOutput::err("missing required parameter 'id'");
        };
        let children = self.children.lock().unwrap();
        match children.get(id) {
            Some(record) => {
                let mut text = format!("Thread {id}: {}", record.state.as_str());
                if let Some(result) = record.result.as_ref().or(record.err.as_ref()) {
                    text.push('\n');
                    text.push_str(result);
                }
                ToolOutput::ok(text)
            }
            None => ToolOutput::err(format!("unknown thread '{id}'")),
        }
    }
}

/// `wake_thread` — enqueue an external wake to an arbitrary session.
pub(crate) struct WakeThreadTool {
    pub handle: ManagerHandle,
}

#[async_trait]
impl Tool for WakeThreadTool {
    fn name(&self) -> &str {
        "wake_thread"
    }

    fn description(&self) -> &str {
        "Deliver a message to another session's thread, creating it if needed. \
         The target processes the message on its next scheduled turn."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "session_key": { "type": "string", "description": "Target session key" },
                "message": { "type": "string", "description": "The wake message payload" }
            },
            "required": ["session_key", "message"],
            "additionalProperties": false
        })
    }

    async fn invoke(&self, args: &Value) -> ToolOutput {
        let Some(key) = args.get("session_key").and_then(|v| v.as_str()).filter(|k| !k.is_empty())
        else {
            return ToolOutput::err("missing required parameter 'session_key'");
        };
        let message = args.get("message").and_then(|v| v.as_str()).unwrap_or_default();
        if message.trim().is_empty() {
            return ToolOutput::err("missing required parameter 'message'");
        }
        if self.handle.wake(key, WakeMessage::new(WakeSource::External, message)) {
            ToolOutput::ok(format!("Wake enqueued for session '{key}'"))
        } else {
            ToolOutput::err("scheduler is shutting down")
        }
    }
}

/// `health` — scheduler liveness and load snapshot.
pub(crate) struct HealthTool {
    pub handle: ManagerHandle,
}

#[async_trait]
impl Tool for HealthTool {
    fn name(&self) -> &str {
        "health"
    }

    fn description(&self) -> &str {
        "Report scheduler health: thread counts and the concurrency limit."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "additionalProperties": false })
    }

    async fn invoke(&self, _args: &Value) -> ToolOutput {
        match self.handle.stats() {
            Some((total, running, max)) => ToolOutput::ok(format!(
                "ok — {total} threads, {running} running, max concurrency {max}"
            )),
            None => ToolOutput::err("scheduler is shutting down"),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, state: ChildState, completed_secs_ago: Option<u64>) -> ChildRecord {
        ChildRecord {
            id: id.to_string(),
            state,
            result: Some("r".into()),
            err: None,
            completed_at: completed_secs_ago
                .map(|s| Instant::now() - Duration::from_secs(s)),
        }
    }

    #[test]
    fn sweep_keeps_recent_and_inflight_records() {
        let children: ChildMap = Arc::new(Mutex::new(HashMap::new()));
        {
            let mut map = children.lock().unwrap();
            map.insert("old".into(), record("old", ChildState::Done, Some(3600)));
            map.insert("fresh".into(), record("fresh", ChildState::Done, Some(10)));
            map.insert("running".into(), record("running", ChildState::Running, None));
        }
        sweep(&children, Duration::from_secs(1800));
        let map = children.lock().unwrap();
        assert!(!map.contains_key("old"));
        assert!(map.contains_key("fresh"));
        assert!(map.contains_key("running"));
    }

    #[tokio::test]
    async fn check_thread_reports_state_and_result() {
        let children: ChildMap = Arc::new(Mutex::new(HashMap::new()));
        children
            .lock()
            .unwrap()
            .insert("c1".into(), record("c1", ChildState::Done, Some(1)));
        let tool = CheckThreadTool { children, retention: Duration::from_secs(1800) };
        let out = tool.invoke(&json!({"id": "c1"})).await;
        assert!(!out.is_error);
        assert!(out.content.contains("Thread c1: done"));
        assert!(out.content.ends_with("\nr"), "result line missing: {}", out.content);
    }

    #[tokio::test]
    async fn check_thread_unknown_id_is_error() {
        let tool = CheckThreadTool {
            children: Arc::new(Mutex::new(HashMap::new())),
            retention: Duration::from_secs(1800),
        };
        let out = tool.invoke(&json!({"id": "nope"})).await;
        assert!(out.is_error);
    }

    #[test]
    fn child_id_has_timestamp_and_hex_tail() {
        let id = SpawnThreadTool::child_id();
        let (stamp, tail) = id.rsplit_once('-').unwrap();
        assert_eq!(tail.len(), 8);
        assert!(tail.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(stamp.ends_with('Z'));
        assert!(stamp.contains('T'));
    }
}

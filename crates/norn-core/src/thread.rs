// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The per-session thread state machine.
//!
//! A thread is a single-runner: at most one turn executes at any instant.
//! Wakes land in a bounded inbox; the scheduler flips the thread from
//! `Idle` to `Running` and drives [`Thread::run_once`] on a worker task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use norn_model::Message;
use norn_runtime::{AgentTemplate, PromptContext};
use norn_tools::ToolRegistry;

use crate::hooks::{estimate_request_tokens, TurnContext, TurnHook};
use crate::manager::RuntimeContext;
use crate::runner::TurnRunner;
use crate::spawn::ChildMap;
use crate::wake::{WakeMessage, WakeSource};

/// The thread's active agent: a template plus accumulated wake variables.
#[derive(Clone)]
pub struct AgentBinding {
    pub template: AgentTemplate,
    pub vars: HashMap<String, String>,
}

impl AgentBinding {
    pub fn new(template: AgentTemplate) -> Self {
        Self { template, vars: HashMap::new() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThreadState {
    Idle,
    Running,
}

pub struct Thread {
    id: String,
    session_key: String,
    state: Mutex<ThreadState>,
    inbox_tx: mpsc::Sender<WakeMessage>,
    inbox_rx: Mutex<mpsc::Receiver<WakeMessage>>,
    pending: AtomicUsize,
    /// Aggregate scheduler signal, poked after every enqueue.
    signal: mpsc::Sender<()>,
    agent: Arc<Mutex<AgentBinding>>,
    last_sink: Mutex<Option<Arc<dyn crate::Sink>>>,
    hooks: Mutex<Vec<Arc<dyn TurnHook>>>,
    tools: ToolRegistry,
    children: ChildMap,
    env: Arc<RuntimeContext>,
}

impl Thread {
    pub(crate) fn new(
        session_key: String,
        agent: Arc<Mutex<AgentBinding>>,
        tools: ToolRegistry,
        children: ChildMap,
        env: Arc<RuntimeContext>,
        signal: mpsc::Sender<()>,
    ) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::channel(env.scheduler.inbox_capacity.max(1));
        Self {
            id: uuid::Uuid::new_v4().simple().to_string()[..8].to_string(),
            session_key,
            state: Mutex::new(ThreadState::Idle),
            inbox_tx,
            inbox_rx: Mutex::new(inbox_rx),
            pending: AtomicUsize::new(0),
            signal,
            agent,
            last_sink: Mutex::new(None),
            hooks: Mutex::new(Vec::new()),
            tools,
            children,
            env,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Snapshot of a spawned child's record, if still retained.
    pub fn child_record(&self, child_id: &str) -> Option<crate::ChildRecord> {
        self.children.lock().unwrap().get(child_id).cloned()
    }

    /// Register a turn hook.  Hooks run in registration order.
    pub fn add_hook(&self, hook: Arc<dyn TurnHook>) {
        self.hooks.lock().unwrap().push(hook);
    }

    /// Push a wake into the inbox.  A full inbox drops the wake with a
    /// warning; the scheduler signal is poked either way.
    pub fn enqueue(&self, wake: WakeMessage) {
        match self.inbox_tx.try_send(wake) {
            Ok(()) => {
                self.pending.fetch_add(1, Ordering::SeqCst);
            }
            Err(mpsc::error::TrySendError::Full(wake)) => {
                warn!(
                    thread = %self.id,
                    session = %self.session_key,
                    source = %wake.source,
                    "inbox full, dropping wake"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(thread = %self.id, "inbox closed, dropping wake");
            }
        }
        let _ = self.signal.try_send(());
    }

    /// Atomically flip Idle→Running when there is work.  Called by the
    /// scheduler under its own lock; returns false when the thread is
    /// already running or has an empty inbox.
    pub(crate) fn try_begin_run(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if *state == ThreadState::Idle && self.pending() > 0 {
            *state = ThreadState::Running;
            true
        } else {
            false
        }
    }

    pub(crate) fn set_idle(&self) {
        *self.state.lock().unwrap() = ThreadState::Idle;
    }

    pub(crate) fn is_running(&self) -> bool {
        *self.state.lock().unwrap() == ThreadState::Running
    }

    /// Process at most one wake: rebind the agent, assemble the payload,
    /// run the turn, and deliver the reply to the effective sink.
    pub async fn run_once(&self) {
        let wake = {
            let mut rx = self.inbox_rx.lock().unwrap();
            match rx.try_recv() {
                Ok(wake) => wake,
                Err(_) => return,
            }
        };
        self.pending.fetch_sub(1, Ordering::SeqCst);
        debug!(thread = %self.id, session = %self.session_key, source = %wake.source, "processing wake");

        // Agent rebind: an unknown name keeps the current agent.
        if let Some(name) = wake.agent_name.as_deref().filter(|n| !n.is_empty()) {
            match self.env.agents.resolve(name) {
                Some(template) => self.agent.lock().unwrap().template = template,
                None => {
                    warn!(agent = name, thread = %self.id, "unknown agent in wake; keeping current agent");
                }
            }
        }
        if !wake.vars.is_empty() {
            self.agent.lock().unwrap().vars.extend(wake.vars.clone());
        }

        // Effective sink: this wake's, else the last one seen.
        if let Some(sink) = &wake.sink {
            *self.last_sink.lock().unwrap() = Some(sink.clone());
        }
        let sink = wake.sink.clone().or_else(|| self.last_sink.lock().unwrap().clone());

        // An empty wake payload never reaches the provider.
        let result = if wake.payload.trim().is_empty() {
            Ok(String::new())
        } else {
            let payload = self.wake_payload(&wake, sink.is_some());
            match wake.timeout {
                Some(limit) => match tokio::time::timeout(limit, self.turn(&payload)).await {
                    Ok(result) => result,
                    Err(_) => Err(anyhow!("turn timed out after {}s", limit.as_secs())),
                },
                None => self.turn(&payload).await,
            }
        };

        match result {
            Ok(reply) => {
                if !wake.payload.trim().is_empty() {
                    if let Some(recorder) = &self.env.memory {
                        if let Err(e) = recorder.record(
                            &self.session_key,
                            wake.source.as_str(),
                            wake.payload.trim(),
                            &reply,
                        ) {
                            warn!(error = %e, thread = %self.id, "memory recording failed");
                        }
                    }
                }
                // Child-task wakes always report back, even with no output,
                // so the parent's completion wake is never lost.
                let deliver = !reply.is_empty() || wake.source == WakeSource::ChildTask;
                if deliver {
                    if let Some(sink) = sink {
                        if let Err(e) = sink.send(&reply).await {
                            warn!(error = %e, thread = %self.id, "sink delivery failed");
                        }
                    }
                }
            }
            Err(e) => {
                error!(error = %e, thread = %self.id, session = %self.session_key, "turn failed");
                if let Some(sink) = sink {
                    if let Err(se) = sink.send(&format!("[Error] {e}")).await {
                        warn!(error = %se, thread = %self.id, "error delivery failed");
                    }
                }
            }
        }
    }

    /// Header + hints + wake message, as the model sees it.
    fn wake_payload(&self, wake: &WakeMessage, has_sink: bool) -> String {
        let now = chrono::Local::now();
        let header = format!(
            "[Wake reason: {} | thread: {} | session: {} | {} ({}, {}, UTC{})]",
            wake.source,
            self.id,
            self.session_key,
            now.format("%Y-%m-%dT%H:%M:%S%:z"),
            now.format("%A"),
            now.format("%Z"),
            now.format("%:z"),
        );
        let delivery = if has_sink {
            "Your reply will be delivered to the requesting channel."
        } else {
            "No delivery sink is bound; a non-empty reply may be dropped."
        };
        format!("{header}\n{delivery}\n{}\n\n{}", wake.source.action_hint(), wake.payload)
    }

    /// Assemble and execute one turn for `user_text`.
    ///
    /// Persistence failures are logged, never fatal: the reply is returned
    /// (and delivered) regardless.
    pub async fn turn(&self, user_text: &str) -> anyhow::Result<String> {
        let text = user_text.trim();
        if text.is_empty() {
            return Ok(String::new());
        }

        let binding = self.agent.lock().unwrap().clone();
        let system = binding.template.render(&self.prompt_context(&binding));

        let mut messages = vec![Message::system(system)];
        let mut persist = false;
        if let Some(store) = &self.env.sessions {
            if !self.session_key.is_empty() {
                match store.reload(&self.session_key).await {
                    Ok(session) => {
                        messages.extend(session.messages);
                        persist = true;
                    }
                    Err(e) => {
                        warn!(
                            error = %e,
                            key = %self.session_key,
                            "session load failed; running turn without persistence"
                        );
                    }
                }
            }
        }

        let prefix_len = messages.len();
        messages.push(Message::user(text));

        // Hooks see a snapshot including the new user message; their
        // injections land after it and are persisted with the turn.
        let estimated = estimate_request_tokens(&messages);
        let session_path = self
            .env
            .sessions
            .as_ref()
            .filter(|_| !self.session_key.is_empty())
            .map(|store| store.path_for_key(&self.session_key));
        let hooks = self.hooks.lock().unwrap().clone();
        let mut injected: Vec<Message> = Vec::new();
        {
            let ctx = TurnContext {
                session_key: &self.session_key,
                session_path: session_path.as_deref(),
                estimated_tokens: estimated,
                messages: &messages,
            };
            for hook in &hooks {
                injected.extend(hook.inspect(&ctx));
            }
        }
        messages.extend(injected);

        let runner = TurnRunner::new(self.env.provider.clone(), self.tools.clone());
        let reply = runner.run_with_messages(&mut messages).await?;

        // Everything added during this turn (user message, hook injections,
        // intermediate assistant/tool messages) plus the final reply.
        let mut new_messages = messages.split_off(prefix_len);
        new_messages.push(Message::assistant(&reply));

        if persist {
            if let Some(store) = &self.env.sessions {
                if let Err(e) = store.append(&self.session_key, new_messages).await {
                    warn!(
                        error = %e,
                        key = %self.session_key,
                        "session save failed; reply still delivered"
                    );
                }
            }
        }

        Ok(reply)
    }

    fn prompt_context(&self, binding: &AgentBinding) -> PromptContext {
        let mut ctx = PromptContext::now();
        ctx.workspace = self.env.workspace.display().to_string();
        ctx.tools = self.tools.names().join(", ");
        ctx.skills = self.env.skills.summary();
        ctx.memory = self
            .env
            .memory
            .as_ref()
            .map(|recorder| recorder.global_summary())
            .unwrap_or_default();
        ctx.task = binding.vars.get("TASK").cloned().unwrap_or_default();
        ctx.vars = binding.vars.clone();
        ctx
    }
}

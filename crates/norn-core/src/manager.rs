// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The central coordinator.
//!
//! The manager owns the session-key → thread map and a capacity-1 aggregate
//! signal.  Every enqueue pokes the signal; the scheduler loop drains it and
//! scans for idle threads with pending wakes, launching at most
//! `max_concurrency` concurrent turns via a semaphore.  Threads hold only a
//! [`ManagerHandle`] (a weak reference), so the map stays the single owner
//! and parent/child relations never form reference cycles.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::{debug, info, warn};

use norn_config::{ContextConfig, SchedulerConfig};
use norn_memory::TurnRecorder;
use norn_model::Provider;
use norn_runtime::{AgentRegistry, AgentTemplate, SkillRegistry};
use norn_session::SessionStore;
use norn_tools::ToolRegistry;

use crate::pressure::ContextPressureHook;
use crate::spawn::{CheckThreadTool, ChildMap, HealthTool, SpawnThreadTool, WakeThreadTool};
use crate::thread::{AgentBinding, Thread};
use crate::wake::WakeMessage;

/// Shared services and configuration injected into every thread.
pub struct RuntimeContext {
    pub provider: Arc<dyn Provider>,
    /// `None` runs the whole scheduler stateless.
    pub sessions: Option<Arc<SessionStore>>,
    pub agents: Arc<AgentRegistry>,
    pub skills: Arc<SkillRegistry>,
    /// Base tool set; each thread extends a shallow clone of it.
    pub base_tools: ToolRegistry,
    pub workspace: PathBuf,
    pub scheduler: SchedulerConfig,
    pub context: ContextConfig,
    pub memory: Option<Arc<TurnRecorder>>,
    /// Agent used when a wake does not name one.
    pub default_agent: Option<String>,
}

pub(crate) struct ManagerInner {
    pub(crate) ctx: Arc<RuntimeContext>,
    threads: Mutex<HashMap<String, Arc<Thread>>>,
    signal_tx: mpsc::Sender<()>,
    signal_rx: tokio::sync::Mutex<mpsc::Receiver<()>>,
    sem: Arc<Semaphore>,
    /// Self-reference handed to per-thread tools and completion sinks.
    me: Weak<ManagerInner>,
}

/// Cheaply cloneable scheduler front-end.
#[derive(Clone)]
pub struct ThreadManager {
    inner: Arc<ManagerInner>,
}

impl ThreadManager {
    pub fn new(ctx: RuntimeContext) -> Self {
        let (signal_tx, signal_rx) = mpsc::channel(1);
        let max_concurrency = ctx.scheduler.max_concurrency.max(1);
        Self {
            inner: Arc::new_cyclic(|me| ManagerInner {
                ctx: Arc::new(ctx),
                threads: Mutex::new(HashMap::new()),
                signal_tx,
                signal_rx: tokio::sync::Mutex::new(signal_rx),
                sem: Arc::new(Semaphore::new(max_concurrency)),
                me: me.clone(),
            }),
        }
    }

    /// A weak handle for tools and completion sinks.
    pub fn handle(&self) -> ManagerHandle {
        ManagerHandle { inner: Arc::downgrade(&self.inner) }
    }

    /// Deliver a wake: resolve or create the thread, enqueue, poke the
    /// scheduler.
    pub fn wake(&self, session_key: &str, wake: WakeMessage) {
        self.inner.wake(session_key, wake);
    }

    /// The scheduler loop.  Runs until `shutdown` fires; in-flight turns
    /// continue on their worker tasks until their own deadlines.
    pub async fn run(&self, mut shutdown: oneshot::Receiver<()>) {
        let mut signal_rx = self.inner.signal_rx.lock().await;
        info!(
            max_concurrency = self.inner.ctx.scheduler.max_concurrency,
            "scheduler running"
        );
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("scheduler stopping");
                    return;
                }
                received = signal_rx.recv() => match received {
                    Some(()) => self.inner.schedule_ready(),
                    None => return,
                },
            }
        }
    }

    /// Look up an existing thread (tests and introspection).
    pub fn thread(&self, session_key: &str) -> Option<Arc<Thread>> {
        self.inner.threads.lock().unwrap().get(session_key).cloned()
    }

    /// All registered session keys, sorted.
    pub fn session_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> =
            self.inner.threads.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// `(total threads, running threads)`.
    pub fn stats(&self) -> (usize, usize) {
        self.inner.stats()
    }
}

impl ManagerInner {
    fn handle(&self) -> ManagerHandle {
        ManagerHandle { inner: self.me.clone() }
    }

    fn wake(&self, session_key: &str, wake: WakeMessage) {
        let thread = self.resolve_or_create(session_key, wake.agent_name.as_deref());
        thread.enqueue(wake);
    }

    fn resolve_or_create(&self, session_key: &str, agent_name: Option<&str>) -> Arc<Thread> {
        let mut threads = self.threads.lock().unwrap();
        if let Some(thread) = threads.get(session_key) {
            return thread.clone();
        }

        let template = self.materialize_agent(agent_name);
        let thread = self.build_thread(
            session_key.to_string(),
            AgentBinding::new(template),
            false,
        );
        debug!(session = session_key, thread = thread.id(), "thread created");
        threads.insert(session_key.to_string(), thread.clone());
        thread
    }

    /// Resolve the wake's agent, falling back to the configured default and
    /// finally the built-in assistant.
    fn materialize_agent(&self, agent_name: Option<&str>) -> AgentTemplate {
        if let Some(name) = agent_name.filter(|n| !n.is_empty()) {
            if let Some(template) = self.ctx.agents.resolve(name) {
                return template;
            }
            warn!(agent = name, "unknown agent on thread creation; using default");
        }
        self.ctx
            .default_agent
            .as_deref()
            .and_then(|name| self.ctx.agents.resolve(name))
            .unwrap_or_else(AgentTemplate::fallback)
    }

    /// Construct a thread with its per-thread tool registry and standard
    /// hooks.  Children do not get the spawning tools.
    fn build_thread(
        &self,
        session_key: String,
        binding: AgentBinding,
        is_child: bool,
    ) -> Arc<Thread> {
        let handle = self.handle();
        let agent = Arc::new(Mutex::new(binding));
        let children: ChildMap = Arc::new(Mutex::new(HashMap::new()));
        let retention = Duration::from_secs(self.ctx.scheduler.child_retention_secs);

        let mut tools = self.ctx.base_tools.clone();
        tools.register(HealthTool { handle: handle.clone() });
        tools.register(WakeThreadTool { handle: handle.clone() });
        if !is_child {
            tools.register(SpawnThreadTool {
                handle: handle.clone(),
                parent_key: session_key.clone(),
                parent_agent: agent.clone(),
                children: children.clone(),
            });
            tools.register(CheckThreadTool { children: children.clone(), retention });
        }

        let thread = Arc::new(Thread::new(
            session_key,
            agent,
            tools,
            children,
            self.ctx.clone(),
            self.signal_tx.clone(),
        ));
        thread.add_hook(Arc::new(ContextPressureHook::new(&self.ctx.context)));
        thread
    }

    /// Insert a freshly built child thread under `map_key` and return it.
    /// `session_key` may be empty (stateless child).
    pub(crate) fn spawn_child(
        &self,
        map_key: &str,
        session_key: String,
        binding: AgentBinding,
    ) -> Arc<Thread> {
        let thread = self.build_thread(session_key, binding, true);
        debug!(key = map_key, thread = thread.id(), "child thread created");
        self.threads.lock().unwrap().insert(map_key.to_string(), thread.clone());
        thread
    }

    /// Scan all threads and launch a worker for every idle one with pending
    /// wakes.  State flips happen under the map lock; execution waits on the
    /// concurrency semaphore inside the worker.
    fn schedule_ready(&self) {
        let threads = self.threads.lock().unwrap();
        for thread in threads.values() {
            if !thread.try_begin_run() {
                continue;
            }
            let thread = thread.clone();
            let sem = self.sem.clone();
            let signal = self.signal_tx.clone();
            tokio::spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    thread.set_idle();
                    return;
                };
                thread.run_once().await;
                thread.set_idle();
                if thread.pending() > 0 {
                    let _ = signal.try_send(());
                }
            });
        }
    }

    fn stats(&self) -> (usize, usize) {
        let threads = self.threads.lock().unwrap();
        let running = threads.values().filter(|t| t.is_running()).count();
        (threads.len(), running)
    }
}

/// Weak reference to the manager, held by per-thread tools and child
/// completion sinks.  Upgrading fails only during shutdown.
#[derive(Clone)]
pub struct ManagerHandle {
    inner: Weak<ManagerInner>,
}

impl ManagerHandle {
    fn inner(&self) -> Option<Arc<ManagerInner>> {
        self.inner.upgrade()
    }

    /// Deliver a wake through the manager.  Returns false when the manager
    /// is gone.
    pub fn wake(&self, session_key: &str, wake: WakeMessage) -> bool {
        match self.inner() {
            Some(inner) => {
                inner.wake(session_key, wake);
                true
            }
            None => false,
        }
    }

    pub(crate) fn resolve_agent(&self, name: &str) -> Option<AgentTemplate> {
        self.inner()?.ctx.agents.resolve(name)
    }

    pub(crate) fn sessions_configured(&self) -> bool {
        self.inner().map(|i| i.ctx.sessions.is_some()).unwrap_or(false)
    }

    pub(crate) fn scheduler_config(&self) -> Option<SchedulerConfig> {
        self.inner().map(|i| i.ctx.scheduler.clone())
    }

    pub(crate) fn spawn_child(
        &self,
        map_key: &str,
        session_key: String,
        binding: AgentBinding,
    ) -> bool {
        match self.inner() {
            Some(inner) => {
                inner.spawn_child(map_key, session_key, binding);
                true
            }
            None => false,
        }
    }

    /// `(total threads, running threads, max concurrency)` for the health
    /// tool.
    pub fn stats(&self) -> Option<(usize, usize, usize)> {
        let inner = self.inner()?;
        let (total, running) = inner.stats();
        Some((total, running, inner.ctx.scheduler.max_concurrency))
    }
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
/// End-to-end scheduler scenarios driven through the public manager API.
///
/// Uses scripted and purpose-built mock providers so every scenario is
/// deterministic and requires no network access.
#[cfg(test)]
mod scheduler_tests {
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::sync::{mpsc, oneshot};

    use norn_config::{ContextConfig, SchedulerConfig};
    use norn_model::{
        ChatRequest, ChatResponse, Message, Provider, Role, ScriptedMockProvider, ToolCall,
    };
    use norn_runtime::{AgentRegistry, SkillRegistry};
    use norn_session::SessionStore;
    use norn_tools::{Tool, ToolOutput, ToolRegistry};

    use crate::{RuntimeContext, Sink, ThreadManager, WakeMessage, WakeSource};

    // ── Helpers ───────────────────────────────────────────────────────────────

    struct ChannelSink(mpsc::UnboundedSender<String>);

    #[async_trait]
    impl Sink for ChannelSink {
        async fn send(&self, text: &str) -> anyhow::Result<()> {
            let _ = self.0.send(text.to_string());
            Ok(())
        }
    }

    fn sink() -> (Arc<dyn Sink>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(ChannelSink(tx)), rx)
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for sink delivery")
            .expect("sink channel closed")
    }

    fn write_echo_agent(dir: &Path) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(
            dir.join("echo.md"),
            "---\nname: echo\ndescription: Echoes the user.\n---\n\nEcho the user.",
        )
        .unwrap();
    }

    struct Fixture {
        provider: Arc<dyn Provider>,
        sessions_root: Option<PathBuf>,
        agents_dir: Option<PathBuf>,
        base_tools: ToolRegistry,
        scheduler: SchedulerConfig,
        context: ContextConfig,
    }

    impl Fixture {
        fn new(provider: Arc<dyn Provider>) -> Self {
            Self {
                provider,
                sessions_root: None,
                agents_dir: None,
                base_tools: ToolRegistry::new(),
                scheduler: SchedulerConfig::default(),
                context: ContextConfig::default(),
            }
        }

        fn manager(self) -> (ThreadManager, oneshot::Sender<()>) {
            let ctx = RuntimeContext {
                provider: self.provider,
                sessions: self.sessions_root.map(|root| Arc::new(SessionStore::new(root))),
                agents: Arc::new(AgentRegistry::new(self.agents_dir)),
                skills: Arc::new(SkillRegistry::new(None)),
                base_tools: self.base_tools,
                workspace: PathBuf::from("."),
                scheduler: self.scheduler,
                context: self.context,
                memory: None,
                default_agent: None,
            };
            let manager = ThreadManager::new(ctx);
            let (shutdown_tx, shutdown_rx) = oneshot::channel();
            let runner = manager.clone();
            tokio::spawn(async move { runner.run(shutdown_rx).await });
            (manager, shutdown_tx)
        }
    }

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

    fn last_user_content(req: &ChatRequest) -> String {
        req.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }

    // ── Scenario A: simple turn ───────────────────────────────────────────────

    #[tokio::test]
    async fn simple_turn_delivers_and_persists() {
        let tmp = tempfile::TempDir::new().unwrap();
        let agents_dir = tmp.path().join("agents");
        write_echo_agent(&agents_dir);

        let provider = Arc::new(ScriptedMockProvider::always_text("hello"));
        let requests = provider.requests.clone();

        let mut fixture = Fixture::new(provider);
        fixture.sessions_root = Some(tmp.path().join("sessions"));
        fixture.agents_dir = Some(agents_dir);
        let (manager, _shutdown) = fixture.manager();

        let (reply_sink, mut rx) = sink();
        manager.wake(
            "alice",
            WakeMessage::new(WakeSource::Cli, "hello")
                .with_agent("echo")
                .with_sink(reply_sink),
        );

        assert_eq!(recv(&mut rx).await, "hello");

        // Provider was invoked once: [system, user=<wakeHeader>+payload].
        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let messages = &requests[0].messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, "Echo the user.");
        assert_eq!(messages[1].role, Role::User);
        assert!(messages[1].content.starts_with("[Wake reason: cli | thread: "));
        assert!(messages[1].content.contains("session: alice"));
        assert!(messages[1].content.ends_with("hello"));

        // One user + one assistant message persisted.
        let store = SessionStore::new(tmp.path().join("sessions"));
        let session = store.reload("alice").await.unwrap();
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[0].role, Role::User);
        assert!(session.messages[0].content.ends_with("hello"));
        assert_eq!(session.messages[1].role, Role::Assistant);
        assert_eq!(session.messages[1].content, "hello");
    }

    // ── Scenario B: tool call ─────────────────────────────────────────────────

    #[tokio::test]
    async fn tool_call_turn_persists_full_exchange() {
        let tmp = tempfile::TempDir::new().unwrap();
        let provider = Arc::new(ScriptedMockProvider::tool_then_text(
            "t1",
            "read_file",
            r#"{"path":"x"}"#,
            "OK",
        ));

        let mut fixture = Fixture::new(provider);
        fixture.sessions_root = Some(tmp.path().to_path_buf());
        fixture.base_tools.register(StaticTool { name: "read_file", reply: "FILE_CONTENTS" });
        let (manager, _shutdown) = fixture.manager();

        let (reply_sink, mut rx) = sink();
        manager.wake("alice", WakeMessage::new(WakeSource::Cli, "read it").with_sink(reply_sink));
        assert_eq!(recv(&mut rx).await, "OK");

        let store = SessionStore::new(tmp.path());
        let session = store.reload("alice").await.unwrap();
        let roles: Vec<Role> = session.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
        assert_eq!(session.messages[1].tool_calls[0].id, "t1");
        assert_eq!(session.messages[2].tool_call_id.as_deref(), Some("t1"));
        assert_eq!(session.messages[2].content, "FILE_CONTENTS");
        assert_eq!(session.messages[3].content, "OK");
    }

    // ── Scenario C: context pressure ──────────────────────────────────────────

    #[tokio::test]
    async fn context_pressure_notice_injected_and_persisted() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path());
        let mut session = norn_session::Session::new("alice");
        // 400 chars ≈ 100 estimated tokens, well past floor(100 × 0.5).
        session.messages.push(Message::user("x".repeat(400)));
        store.save(&session).await.unwrap();

        let provider = Arc::new(ScriptedMockProvider::always_text("compacting"));
        let requests = provider.requests.clone();

        let mut fixture = Fixture::new(provider);
        fixture.sessions_root = Some(tmp.path().to_path_buf());
        fixture.context = ContextConfig { window_tokens: 100, warn_ratio: 0.5 };
        let (manager, _shutdown) = fixture.manager();

        let (reply_sink, mut rx) = sink();
        manager.wake("alice", WakeMessage::new(WakeSource::Cli, "ping").with_sink(reply_sink));
        recv(&mut rx).await;

        // The notice is a user message after the payload.
        let requests = requests.lock().unwrap();
        let messages = &requests[0].messages;
        let payload_idx = messages
            .iter()
            .position(|m| m.role == Role::User && m.content.ends_with("ping"))
            .unwrap();
        let notice_idx = messages
            .iter()
            .position(|m| m.content.starts_with("[Context Pressure Notice]"))
            .expect("pressure notice not injected");
        assert!(notice_idx > payload_idx);
        assert!(messages[notice_idx].content.contains("compress-context"));

        // And it is persisted with the turn.
        let session = store.reload("alice").await.unwrap();
        assert!(session
            .messages
            .iter()
            .any(|m| m.role == Role::User && m.content.starts_with("[Context Pressure Notice]")));
    }

    // ── Scenario D: child spawning ────────────────────────────────────────────

    /// Routes responses by conversation shape instead of call order, because
    /// the parent's second round and the child's turn race on the scheduler.
    struct RoutingProvider;

    #[async_trait]
    impl Provider for RoutingProvider {
        fn name(&self) -> &str {
            "routing"
        }
        fn model_name(&self) -> &str {
            "routing"
        }

        async fn chat(&self, req: ChatRequest) -> anyhow::Result<ChatResponse> {
            let last_user = last_user_content(&req);
            if last_user.contains("[Wake reason: child_task") {
                return Ok(ChatResponse { content: "42".into(), ..Default::default() });
            }
            if last_user.contains("[Wake reason: child_completed") {
                return Ok(ChatResponse {
                    content: "The child finished.".into(),
                    ..Default::default()
                });
            }
            // Parent turn: request the spawn once, then acknowledge.
            let already_spawned = req
                .messages
                .iter()
                .any(|m| m.role == Role::Tool && m.name.as_deref() == Some("spawn_thread"));
            if already_spawned {
                Ok(ChatResponse { content: "spawned ok".into(), ..Default::default() })
            } else {
                Ok(ChatResponse {
                    tool_calls: vec![ToolCall {
                        id: "t1".into(),
                        name: "spawn_thread".into(),
                        arguments: r#"{"task":"compute"}"#.into(),
                    }],
                    ..Default::default()
                })
            }
        }
    }

    #[tokio::test]
    async fn child_spawn_completes_and_wakes_parent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut fixture = Fixture::new(Arc::new(RoutingProvider));
        fixture.sessions_root = Some(tmp.path().to_path_buf());
        let (manager, _shutdown) = fixture.manager();

        let (reply_sink, mut rx) = sink();
        manager.wake(
            "main",
            WakeMessage::new(WakeSource::Cli, "delegate this").with_sink(reply_sink),
        );

        // First delivery: the parent's own reply after the spawn tool call.
        assert_eq!(recv(&mut rx).await, "spawned ok");
        // Second delivery: the parent woken by child_completed, via lastSink.
        assert_eq!(recv(&mut rx).await, "The child finished.");

        // The parent session recorded the tool exchange and the completion wake.
        let store = SessionStore::new(tmp.path());
        let parent = store.reload("main").await.unwrap();
        assert!(parent
            .messages
            .iter()
            .any(|m| m.role == Role::Tool && m.content.contains("Thread spawned with ID:")));
        assert!(parent
            .messages
            .iter()
            .any(|m| m.role == Role::User && m.content.contains("completed:\n42")));

        // Child ran on a derived session key and persisted its reply.
        let child_key = manager
            .session_keys()
            .into_iter()
            .find(|k| k.starts_with("main:threads:"))
            .expect("child thread not registered");
        let child = store.reload(&child_key).await.unwrap();
        assert!(child.messages.iter().any(|m| m.content == "42"));

        // Children cannot recurse.
        let child_thread = manager.thread(&child_key).unwrap();
        assert!(!child_thread.tools().contains("spawn_thread"));
        assert!(!child_thread.tools().contains("check_thread"));
        assert!(child_thread.tools().contains("wake_thread"));
        let parent_thread = manager.thread("main").unwrap();
        assert!(parent_thread.tools().contains("spawn_thread"));
    }

    // ── Scenario E: bounded concurrency ───────────────────────────────────────

    struct CountingProvider {
        active: AtomicUsize,
        max_active: AtomicUsize,
        per_session: Mutex<HashMap<String, usize>>,
        per_session_max: AtomicUsize,
    }

    impl CountingProvider {
        fn new() -> Self {
            Self {
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                per_session: Mutex::new(HashMap::new()),
                per_session_max: AtomicUsize::new(0),
            }
        }

        fn session_of(req: &ChatRequest) -> String {
            let user = last_user_content(req);
            user.split("session: ")
                .nth(1)
                .and_then(|rest| rest.split(' ').next())
                .unwrap_or_default()
                .to_string()
        }
    }

    #[async_trait]
    impl Provider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }
        fn model_name(&self) -> &str {
            "counting"
        }

        async fn chat(&self, req: ChatRequest) -> anyhow::Result<ChatResponse> {
            let session = Self::session_of(&req);
            let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now_active, Ordering::SeqCst);
            {
                let mut per = self.per_session.lock().unwrap();
                let count = per.entry(session.clone()).or_insert(0);
                *count += 1;
                self.per_session_max.fetch_max(*count, Ordering::SeqCst);
            }

            tokio::time::sleep(Duration::from_millis(150)).await;

            self.per_session.lock().unwrap().entry(session).and_modify(|c| *c -= 1);
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(ChatResponse { content: "done".into(), ..Default::default() })
        }
    }

    #[tokio::test]
    async fn at_most_max_concurrency_turns_run() {
        let provider = Arc::new(CountingProvider::new());
        let mut fixture = Fixture::new(provider.clone());
        fixture.scheduler.max_concurrency = 2;
        let (manager, _shutdown) = fixture.manager();

        let (reply_sink, mut rx) = sink();
        for key in ["a", "b", "c"] {
            manager.wake(
                key,
                WakeMessage::new(WakeSource::Cli, "go").with_sink(reply_sink.clone()),
            );
        }
        for _ in 0..3 {
            assert_eq!(recv(&mut rx).await, "done");
        }

        assert!(
            provider.max_active.load(Ordering::SeqCst) <= 2,
            "observed {} concurrent turns",
            provider.max_active.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn single_thread_never_runs_concurrently_and_is_fifo() {
        let provider = Arc::new(CountingProvider::new());
        let mut fixture = Fixture::new(provider.clone());
        fixture.scheduler.max_concurrency = 8;
        let (manager, _shutdown) = fixture.manager();

        // MockProvider-style echo is not needed; order is observable through
        // the per-session serialization plus reply count.
        let (reply_sink, mut rx) = sink();
        for _ in 0..3 {
            manager.wake("solo", WakeMessage::new(WakeSource::Cli, "w").with_sink(reply_sink.clone()));
        }
        for _ in 0..3 {
            recv(&mut rx).await;
        }
        assert_eq!(
            provider.per_session_max.load(Ordering::SeqCst),
            1,
            "a thread must never execute two turns at once"
        );
    }

    #[tokio::test]
    async fn wakes_on_one_thread_processed_in_enqueue_order() {
        let tmp = tempfile::TempDir::new().unwrap();
        let provider = Arc::new(norn_model::MockProvider);
        let mut fixture = Fixture::new(provider);
        fixture.sessions_root = Some(tmp.path().to_path_buf());
        let (manager, _shutdown) = fixture.manager();

        let (reply_sink, mut rx) = sink();
        for payload in ["w1", "w2", "w3"] {
            manager.wake(
                "fifo",
                WakeMessage::new(WakeSource::Cli, payload).with_sink(reply_sink.clone()),
            );
        }

        let mut replies = Vec::new();
        for _ in 0..3 {
            replies.push(recv(&mut rx).await);
        }
        assert!(replies[0].ends_with("w1"), "replies: {replies:?}");
        assert!(replies[1].ends_with("w2"), "replies: {replies:?}");
        assert!(replies[2].ends_with("w3"), "replies: {replies:?}");
    }

    // ── Scenario F: reload-before-save ────────────────────────────────────────

    /// Appends a user message to the session file mid-provider-call, like an
    /// external editor racing the turn.
    struct MidTurnEditor {
        path: PathBuf,
    }

    #[async_trait]
    impl Provider for MidTurnEditor {
        fn name(&self) -> &str {
            "editor"
        }
        fn model_name(&self) -> &str {
            "editor"
        }

        async fn chat(&self, _req: ChatRequest) -> anyhow::Result<ChatResponse> {
            let raw = std::fs::read_to_string(&self.path)?;
            let mut session: norn_session::Session = serde_json::from_str(&raw)?;
            session.messages.push(Message::user("external"));
            std::fs::write(&self.path, serde_json::to_string_pretty(&session)?)?;
            Ok(ChatResponse { content: "final-reply".into(), ..Default::default() })
        }
    }

    #[tokio::test]
    async fn external_edit_mid_turn_survives_save() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path());
        let mut session = norn_session::Session::new("s");
        session.messages.push(Message::user("pre-existing"));
        store.save(&session).await.unwrap();

        let provider = Arc::new(MidTurnEditor { path: store.path_for_key("s") });
        let mut fixture = Fixture::new(provider);
        fixture.sessions_root = Some(tmp.path().to_path_buf());
        let (manager, _shutdown) = fixture.manager();

        let (reply_sink, mut rx) = sink();
        manager.wake("s", WakeMessage::new(WakeSource::Cli, "turn-user").with_sink(reply_sink));
        assert_eq!(recv(&mut rx).await, "final-reply");

        let finalised = store.reload("s").await.unwrap();
        let contents: Vec<String> =
            finalised.messages.iter().map(|m| m.content.clone()).collect();
        assert_eq!(contents[0], "pre-existing");
        assert_eq!(contents[1], "external");
        assert!(contents[2].ends_with("turn-user"));
        assert_eq!(contents[3], "final-reply");
    }

    // ── Boundary behaviors ────────────────────────────────────────────────────

    #[tokio::test]
    async fn empty_wake_payload_skips_provider() {
        let provider = Arc::new(ScriptedMockProvider::always_text("never"));
        let requests = provider.requests.clone();
        let fixture = Fixture::new(provider);
        let (manager, _shutdown) = fixture.manager();

        let (reply_sink, _rx) = sink();
        manager.wake("quiet", WakeMessage::new(WakeSource::Cli, "   ").with_sink(reply_sink));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(requests.lock().unwrap().is_empty(), "provider must not be called");
    }

    #[tokio::test]
    async fn full_inbox_drops_wake_but_thread_survives() {
        let provider = Arc::new(norn_model::MockProvider);
        let mut fixture = Fixture::new(provider);
        fixture.scheduler.inbox_capacity = 1;
        // Scheduler intentionally not started yet, so wakes pile up.
        let ctx = RuntimeContext {
            provider: Arc::new(norn_model::MockProvider),
            sessions: None,
            agents: Arc::new(AgentRegistry::new(None)),
            skills: Arc::new(SkillRegistry::new(None)),
            base_tools: ToolRegistry::new(),
            workspace: PathBuf::from("."),
            scheduler: fixture.scheduler.clone(),
            context: ContextConfig::default(),
            memory: None,
            default_agent: None,
        };
        let manager = ThreadManager::new(ctx);

        let (reply_sink, mut rx) = sink();
        manager.wake("k", WakeMessage::new(WakeSource::Cli, "kept").with_sink(reply_sink.clone()));
        manager.wake("k", WakeMessage::new(WakeSource::Cli, "dropped").with_sink(reply_sink));
        assert_eq!(manager.thread("k").unwrap().pending(), 1, "second wake dropped");

        // Start the scheduler; only the first wake produces a reply.
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let runner = manager.clone();
        tokio::spawn(async move { runner.run(shutdown_rx).await });

        let reply = recv(&mut rx).await;
        assert!(reply.ends_with("kept"));
        assert!(
            tokio::time::timeout(Duration::from_millis(300), rx.recv()).await.is_err(),
            "dropped wake must not produce a reply"
        );
        drop(shutdown_tx);
    }

    #[tokio::test]
    async fn unknown_agent_in_wake_keeps_current_agent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let agents_dir = tmp.path().join("agents");
        write_echo_agent(&agents_dir);

        let provider = Arc::new(ScriptedMockProvider::new(vec![
            ChatResponse { content: "one".into(), ..Default::default() },
            ChatResponse { content: "two".into(), ..Default::default() },
        ]));
        let requests = provider.requests.clone();

        let mut fixture = Fixture::new(provider);
        fixture.agents_dir = Some(agents_dir);
        let (manager, _shutdown) = fixture.manager();

        let (reply_sink, mut rx) = sink();
        manager.wake(
            "a",
            WakeMessage::new(WakeSource::Cli, "first").with_agent("echo").with_sink(reply_sink.clone()),
        );
        recv(&mut rx).await;
        manager.wake(
            "a",
            WakeMessage::new(WakeSource::Cli, "second").with_agent("missing").with_sink(reply_sink),
        );
        recv(&mut rx).await;

        let requests = requests.lock().unwrap();
        assert_eq!(requests[1].messages[0].content, "Echo the user.", "agent must be kept");
    }

    #[tokio::test]
    async fn provider_failure_reports_error_to_sink() {
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

        let fixture = Fixture::new(Arc::new(FailingProvider));
        let (manager, _shutdown) = fixture.manager();

        let (reply_sink, mut rx) = sink();
        manager.wake("e", WakeMessage::new(WakeSource::Cli, "boom").with_sink(reply_sink));
        let reply = recv(&mut rx).await;
        assert!(reply.starts_with("[Error]"), "got: {reply}");
        assert!(reply.contains("provider error"));
    }
}

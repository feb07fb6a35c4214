// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use tokio::sync::{mpsc, oneshot};
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use norn_config::Config;
use norn_core::{RuntimeContext, Sink, ThreadManager, WakeMessage, WakeSource};
use norn_memory::TurnRecorder;
use norn_runtime::{AgentRegistry, SkillRegistry};
use norn_session::SessionStore;
use norn_tools::{ListDirTool, ReadFileTool, ShellTool, ToolRegistry, UseSkillTool, WriteFileTool};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = norn_config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve => serve(&config).await,
        Commands::Chat { session_key, message, agent, timeout_secs } => {
            chat(&config, &session_key, &message, agent, timeout_secs).await
        }
        Commands::ShowConfig => {
            println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("NORN_LOG").unwrap_or_else(|_| EnvFilter::new("norn=info"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Assemble the manager from config: provider, stores, registries, base
/// tools.  Fails fast on configuration errors (missing provider, bad model).
fn build_manager(config: &Config) -> anyhow::Result<ThreadManager> {
    let provider = norn_model::from_config(&config.provider).context("building provider")?;
    let workspace = PathBuf::from(&config.workspace);

    let sessions = config
        .sessions
        .dir
        .as_ref()
        .map(|dir| Arc::new(SessionStore::new(dir)));
    let agents = Arc::new(AgentRegistry::new(config.agents.dir.as_ref().map(PathBuf::from)));
    let skills = Arc::new(SkillRegistry::new(config.skills.dir.as_ref().map(PathBuf::from)));
    let memory = TurnRecorder::from_config(&config.memory).map(Arc::new);

    let mut base_tools = ToolRegistry::new();
    base_tools.register(ReadFileTool { root: workspace.clone() });
    base_tools.register(WriteFileTool { root: workspace.clone() });
    base_tools.register(ListDirTool { root: workspace.clone() });
    base_tools.register(ShellTool {
        workdir: workspace.clone(),
        timeout_secs: config.tools.shell_timeout_secs,
    });
    base_tools.register(UseSkillTool { skills: skills.clone() });

    Ok(ThreadManager::new(RuntimeContext {
        provider,
        sessions,
        agents,
        skills,
        base_tools,
        workspace,
        scheduler: config.scheduler.clone(),
        context: config.context.clone(),
        memory,
        default_agent: config.agents.default.clone(),
    }))
}

async fn serve(config: &Config) -> anyhow::Result<()> {
    let manager = build_manager(config)?;
    info!(
        sessions = config.sessions.dir.as_deref().unwrap_or("(stateless)"),
        max_concurrency = config.scheduler.max_concurrency,
        "norn serving"
    );

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(());
    });
    manager.run(shutdown_rx).await;
    Ok(())
}

/// Forwards the reply to stdout and the waiting chat command.
struct StdoutSink {
    tx: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl Sink for StdoutSink {
    async fn send(&self, text: &str) -> anyhow::Result<()> {
        let _ = self.tx.send(text.to_string());
        Ok(())
    }
}

async fn chat(
    config: &Config,
    session_key: &str,
    message: &str,
    agent: Option<String>,
    timeout_secs: u64,
) -> anyhow::Result<()> {
    let manager = build_manager(config)?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let runner = manager.clone();
    tokio::spawn(async move { runner.run(shutdown_rx).await });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut wake =
        WakeMessage::new(WakeSource::Cli, message).with_sink(Arc::new(StdoutSink { tx }));
    if let Some(agent) = agent {
        wake = wake.with_agent(agent);
    }
    manager.wake(session_key, wake);

    let reply = tokio::time::timeout(Duration::from_secs(timeout_secs), rx.recv())
        .await
        .context("timed out waiting for the reply")?
        .context("scheduler stopped before replying")?;
    let _ = shutdown_tx.send(());

    println!("{reply}");
    if reply.starts_with("[Error]") {
        anyhow::bail!("turn failed");
    }
    Ok(())
}

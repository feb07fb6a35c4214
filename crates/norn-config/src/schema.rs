// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Workspace root exposed to agents via `{{WORKSPACE}}` and used as the
    /// base directory for relative tool paths.
    #[serde(default = "default_workspace")]
    pub workspace: String,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub skills: SkillsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

fn default_workspace() -> String {
    ".".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            workspace: default_workspace(),
            sessions: SessionsConfig::default(),
            agents: AgentsConfig::default(),
            skills: SkillsConfig::default(),
            scheduler: SchedulerConfig::default(),
            context: ContextConfig::default(),
            tools: ToolsConfig::default(),
            memory: MemoryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider identifier: "mock" or any OpenAI-compatible endpoint id.
    #[serde(default)]
    pub provider: String,
    /// Model name forwarded to the provider API.
    #[serde(default)]
    pub model: String,
    /// Environment variable that holds the API key (read at runtime).
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer api_key_env in config files to avoid secrets
    /// in version-controlled files.
    pub api_key: Option<String>,
    /// Base URL override.  Useful for local servers and proxies.
    pub base_url: Option<String>,
    /// Maximum tokens to request in a single completion.
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0–2.0).
    pub temperature: Option<f32>,
}

/// Session persistence.  When `dir` is unset the runtime is stateless:
/// no history is loaded or saved and child threads run without keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionsConfig {
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentsConfig {
    /// Directory of agent template markdown files.
    pub dir: Option<String>,
    /// Agent used for wakes that do not name one.
    pub default: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillsConfig {
    /// Directory of skill markdown files.
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of threads executing turns simultaneously.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Wake inbox capacity per thread.  A full inbox drops new wakes with a
    /// logged warning; raise this rather than expecting blocking delivery.
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,
    /// Timeout applied to a child thread's delegated turn.
    #[serde(default = "default_child_timeout")]
    pub child_timeout_secs: u64,
    /// How long completed child records stay readable via `check_thread`.
    #[serde(default = "default_child_retention")]
    pub child_retention_secs: u64,
}

fn default_max_concurrency() -> usize {
    16
}
fn default_inbox_capacity() -> usize {
    64
}
fn default_child_timeout() -> u64 {
    300
}
fn default_child_retention() -> u64 {
    1800
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            inbox_capacity: default_inbox_capacity(),
            child_timeout_secs: default_child_timeout(),
            child_retention_secs: default_child_retention(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Model context window in tokens.
    #[serde(default = "default_window_tokens")]
    pub window_tokens: usize,
    /// Fraction of the window at which the pressure notice fires.
    #[serde(default = "default_warn_ratio")]
    pub warn_ratio: f32,
}

fn default_window_tokens() -> usize {
    128_000
}
fn default_warn_ratio() -> f32 {
    0.75
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self { window_tokens: default_window_tokens(), warn_ratio: default_warn_ratio() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Timeout for shell tool invocations.
    #[serde(default = "default_shell_timeout")]
    pub shell_timeout_secs: u64,
}

fn default_shell_timeout() -> u64 {
    60
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self { shell_timeout_secs: default_shell_timeout() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Memory root directory.  Required when enabled.
    pub dir: Option<String>,
    #[serde(default = "default_excerpt_max")]
    pub excerpt_max_chars: usize,
    #[serde(default = "default_keyword_max")]
    pub keyword_max: usize,
    /// Daily index rotation threshold.
    #[serde(default = "default_max_turns_per_day")]
    pub max_turns_per_day: usize,
    /// Number of turns aggregated into the global summary.
    #[serde(default = "default_global_recent")]
    pub global_recent: usize,
}

fn default_excerpt_max() -> usize {
    240
}
fn default_keyword_max() -> usize {
    12
}
fn default_max_turns_per_day() -> usize {
    200
}
fn default_global_recent() -> usize {
    50
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: None,
            excerpt_max_chars: default_excerpt_max(),
            keyword_max: default_keyword_max(),
            max_turns_per_day: default_max_turns_per_day(),
            global_recent: default_global_recent(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

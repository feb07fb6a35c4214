// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Prompt-template rendering.
//!
//! Templates are plain markdown with literal `{{NAME}}` placeholders.
//! Rendering is a pure function over the template text and a
//! [`PromptContext`] snapshot — no runtime reflection, no open-ended
//! variable lookup beyond the wake-supplied `vars` map.

use std::collections::HashMap;

use chrono::Local;

/// Everything a template may reference, captured once per turn.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    /// Current local time, RFC3339.
    pub time: String,
    /// Current local date, `YYYY-MM-DD`.
    pub today: String,
    /// Workspace root path.
    pub workspace: String,
    /// Rendered list of available tool names.
    pub tools: String,
    /// Rendered skills summary section.
    pub skills: String,
    /// Global memory summary, empty when memory is disabled.
    pub memory: String,
    /// Delegated task text for child templates.
    pub task: String,
    /// Wake-supplied template variables, substituted as `{{KEY}}`.
    pub vars: HashMap<String, String>,
}

impl PromptContext {
    /// Context stamped with the current local time and date.
    pub fn now() -> Self {
        let now = Local::now();
        Self {
            time: now.to_rfc3339(),
            today: now.format("%Y-%m-%d").to_string(),
            ..Default::default()
        }
    }
}

/// Substitute all recognized placeholders in `template`.
///
/// Substitution is simple literal replacement; unknown placeholders are left
/// untouched so template typos stay visible instead of silently vanishing.
pub fn render_template(template: &str, ctx: &PromptContext) -> String {
    let mut out = template
        .replace("{{TIME}}", &ctx.time)
        .replace("{{TODAY}}", &ctx.today)
        .replace("{{WORKSPACE}}", &ctx.workspace)
        .replace("{{TOOLS}}", &ctx.tools)
        .replace("{{SKILLS}}", &ctx.skills)
        .replace("{{MEMORY}}", &ctx.memory)
        .replace("{{TASK}}", &ctx.task);
    for (key, value) in &ctx.vars {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

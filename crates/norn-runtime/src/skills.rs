// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Skill discovery and on-demand loading.
//!
//! A skill is a named prompt fragment that would be too expensive to carry
//! in every system prompt.  The registry renders a one-line-per-skill
//! summary for the `{{SKILLS}}` placeholder; the full body is returned only
//! when the model asks for it through the `use_skill` tool.
//!
//! Skill files are markdown with YAML frontmatter:
//!
//! ```markdown
//! ---
//! name: compress-context
//! description: Compact this thread's session history when context runs low.
//! ---
//!
//! # Steps
//! …
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use serde::Deserialize;
use tracing::warn;

use crate::agents::list_md_files;
use crate::MAX_TEMPLATE_FILE_BYTES;

/// A fully parsed skill.
#[derive(Debug, Clone)]
pub struct SkillInfo {
    pub name: String,
    /// Trigger description shown in the skills summary.
    pub description: String,
    /// Full prompt body, returned on demand.
    pub body: String,
}

#[derive(Debug, Deserialize)]
struct SkillFrontmatter {
    #[serde(default)]
    name: Option<String>,
    description: String,
}

fn parse_skill_file(raw: &str, stem: &str) -> Option<SkillInfo> {
    let rest = raw.trim_start_matches('\n');
    let after_open = rest.strip_prefix("---")?;
    let close = after_open.find("\n---")?;
    let yaml_block = &after_open[..close];
    let body = after_open[close + 4..].trim_start_matches('\n').to_string();

    let fm: SkillFrontmatter = serde_yaml::from_str(yaml_block).ok()?;
    if fm.description.trim().is_empty() {
        return None;
    }

    Some(SkillInfo {
        name: fm
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| stem.to_string()),
        description: fm.description.trim().to_string(),
        body,
    })
}

/// Named skill prompts loaded from a directory of `*.md` files.
pub struct SkillRegistry {
    dir: Option<PathBuf>,
    skills: RwLock<HashMap<String, SkillInfo>>,
}

impl SkillRegistry {
    pub fn new(dir: Option<PathBuf>) -> Self {
        let reg = Self { dir, skills: RwLock::new(HashMap::new()) };
        reg.reload();
        reg
    }

    pub fn reload(&self) {
        let Some(dir) = &self.dir else { return };
        let mut map = HashMap::new();
        for (stem, path) in list_md_files(dir) {
            let size = path.metadata().map(|m| m.len()).unwrap_or(0);
            if size > MAX_TEMPLATE_FILE_BYTES {
                warn!(path = %path.display(), size, "skipping oversized skill file");
                continue;
            }
            let raw = match std::fs::read_to_string(&path) {
                Ok(s) => s,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to read skill file");
                    continue;
                }
            };
            match parse_skill_file(&raw, &stem) {
                Some(skill) => {
                    map.insert(skill.name.clone(), skill);
                }
                None => {
                    warn!(path = %path.display(), "failed to parse skill frontmatter — skipping");
                }
            }
        }
        *self.skills.write().unwrap() = map;
    }

    /// Render the skills summary section for the system prompt, or an empty
    /// string when no skills are loaded.
    pub fn summary(&self) -> String {
        let skills = self.skills.read().unwrap();
        if skills.is_empty() {
            return String::new();
        }
        let mut lines: Vec<String> = skills
            .values()
            .map(|s| format!("- {}: {}", s.name, s.description))
            .collect();
        lines.sort();
        format!(
            "## Available skills\n\
             Load a skill's full instructions with the use_skill tool before applying it.\n\n{}",
            lines.join("\n")
        )
    }

    /// Full skill prompt by name.
    pub fn prompt(&self, name: &str) -> Option<String> {
        self.skills.read().unwrap().get(name).map(|s| s.body.clone())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.skills.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Agent template discovery and parsing.
//!
//! Agents are markdown files with optional YAML frontmatter:
//!
//! ```markdown
//! ---
//! name: echo
//! description: Echoes the user.
//! ---
//!
//! Echo the user.
//! ```
//!
//! The body is the system prompt; placeholders are rendered per turn from a
//! [`PromptContext`](crate::PromptContext).  `name` falls back to the file
//! stem, `description` to the first non-empty body line.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::Deserialize;
use tracing::warn;

use crate::{render_template, PromptContext, MAX_TEMPLATE_FILE_BYTES};

/// Fallback system prompt used when no template resolves or a template body
/// renders to nothing.
pub const DEFAULT_AGENT_PROMPT: &str = "You are a helpful AI assistant.";

/// A parsed agent template.
#[derive(Debug, Clone)]
pub struct AgentTemplate {
    pub name: String,
    pub description: String,
    /// Prompt body (everything after the closing `---` fence).
    pub body: String,
}

impl AgentTemplate {
    /// The built-in fallback agent.
    pub fn fallback() -> Self {
        Self {
            name: "assistant".to_string(),
            description: "General-purpose assistant.".to_string(),
            body: DEFAULT_AGENT_PROMPT.to_string(),
        }
    }

    /// Render the system prompt for one turn.  An empty render falls back to
    /// [`DEFAULT_AGENT_PROMPT`].
    pub fn render(&self, ctx: &PromptContext) -> String {
        let rendered = render_template(&self.body, ctx);
        if rendered.trim().is_empty() {
            DEFAULT_AGENT_PROMPT.to_string()
        } else {
            rendered
        }
    }
}

#[derive(Debug, Deserialize)]
struct AgentFrontmatter {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Parse a raw agent markdown file into an [`AgentTemplate`].
fn parse_agent_file(raw: &str, stem: &str, path: &Path) -> Option<AgentTemplate> {
    let rest = raw.trim_start_matches('\n');

    let (fm, body) = if let Some(after_open) = rest.strip_prefix("---") {
        let close = after_open.find("\n---")?;
        let yaml_block = &after_open[..close];
        let body = after_open[close + 4..].trim_start_matches('\n').to_string();

        let fm: AgentFrontmatter = match serde_yaml::from_str(yaml_block) {
            Ok(f) => f,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to parse agent frontmatter — skipping");
                return None;
            }
        };
        (fm, body)
    } else {
        (AgentFrontmatter { name: None, description: None }, rest.to_string())
    };

    if body.trim().is_empty() {
        return None;
    }

    let name = fm
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| stem.to_string());

    let description = fm
        .description
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| {
            body.lines()
                .find(|l| !l.trim().is_empty())
                .unwrap_or(stem)
                .trim_start_matches('#')
                .trim()
                .to_string()
        });

    Some(AgentTemplate { name, description, body })
}

/// Named agent templates loaded from a directory of `*.md` files.
pub struct AgentRegistry {
    dir: Option<PathBuf>,
    templates: RwLock<HashMap<String, AgentTemplate>>,
}

impl AgentRegistry {
    /// Load all templates from `dir`.  `None` yields an empty registry that
    /// resolves every name to nothing (callers fall back to the default
    /// agent).
    pub fn new(dir: Option<PathBuf>) -> Self {
        let reg = Self { dir, templates: RwLock::new(HashMap::new()) };
        reg.reload();
        reg
    }

    /// Re-scan the template directory, replacing the loaded set.
    pub fn reload(&self) {
        let Some(dir) = &self.dir else { return };
        let mut map = HashMap::new();
        for (stem, path) in list_md_files(dir) {
            let size = path.metadata().map(|m| m.len()).unwrap_or(0);
            if size > MAX_TEMPLATE_FILE_BYTES {
                warn!(path = %path.display(), size, "skipping oversized agent template");
                continue;
            }
            let raw = match std::fs::read_to_string(&path) {
                Ok(s) => s,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to read agent template");
                    continue;
                }
            };
            if let Some(template) = parse_agent_file(&raw, &stem, &path) {
                map.insert(template.name.clone(), template);
            }
        }
        *self.templates.write().unwrap() = map;
    }

    /// Resolve a template by name.
    pub fn resolve(&self, name: &str) -> Option<AgentTemplate> {
        self.templates.read().unwrap().get(name).cloned()
    }

    /// Sorted template names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> =
            self.templates.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

/// Enumerate `*.md` files in `dir` (non-recursive), sorted, as
/// `(stem, path)` pairs.
pub(crate) fn list_md_files(dir: &Path) -> Vec<(String, PathBuf)> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<(String, PathBuf)> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            let is_md = path.is_file()
                && path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.eq_ignore_ascii_case("md"))
                    .unwrap_or(false);
            if !is_md {
                return None;
            }
            let stem = path.file_stem()?.to_str()?.to_string();
            Some((stem, path))
        })
        .collect();
    files.sort_by(|a, b| a.1.cmp(&b.1));
    files
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_agent(dir: &Path, file: &str, content: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(file), content).unwrap();
    }

    #[test]
    fn parse_agent_file_valid() {
        let raw = "---\nname: echo\ndescription: Echoes the user.\n---\n\nEcho the user.";
        let t = parse_agent_file(raw, "echo-file", Path::new("/tmp/echo.md")).unwrap();
        assert_eq!(t.name, "echo");
        assert_eq!(t.description, "Echoes the user.");
        assert_eq!(t.body.trim(), "Echo the user.");
    }

    #[test]
    fn parse_agent_file_name_falls_back_to_stem() {
        let raw = "---\ndescription: D.\n---\n\nBody.";
        let t = parse_agent_file(raw, "stem", Path::new("/tmp/stem.md")).unwrap();
        assert_eq!(t.name, "stem");
    }

    #[test]
    fn parse_agent_file_no_frontmatter() {
        let raw = "# Researcher\n\nYou research things.";
        let t = parse_agent_file(raw, "researcher", Path::new("/tmp/r.md")).unwrap();
        assert_eq!(t.name, "researcher");
        assert_eq!(t.description, "Researcher");
        assert!(t.body.contains("You research things."));
    }

    #[test]
    fn parse_agent_file_empty_body_rejected() {
        let raw = "---\nname: x\ndescription: D.\n---\n\n";
        assert!(parse_agent_file(raw, "x", Path::new("/tmp/x.md")).is_none());
    }

    #[test]
    fn render_empty_result_falls_back_to_default() {
        let t = AgentTemplate {
            name: "t".into(),
            description: "d".into(),
            body: "{{TASK}}".into(),
        };
        assert_eq!(t.render(&PromptContext::default()), DEFAULT_AGENT_PROMPT);
    }

    #[test]
    fn registry_resolves_by_frontmatter_name() {
        let tmp = TempDir::new().unwrap();
        write_agent(
            tmp.path(),
            "some-file.md",
            "---\nname: echo\ndescription: E.\n---\n\nEcho the user.",
        );
        let reg = AgentRegistry::new(Some(tmp.path().to_path_buf()));
        assert!(reg.resolve("echo").is_some());
        assert!(reg.resolve("some-file").is_none());
    }

    #[test]
    fn registry_unknown_name_is_none() {
        let tmp = TempDir::new().unwrap();
        let reg = AgentRegistry::new(Some(tmp.path().to_path_buf()));
        assert!(reg.resolve("nope").is_none());
    }

    #[test]
    fn registry_without_dir_is_empty() {
        let reg = AgentRegistry::new(None);
        assert!(reg.names().is_empty());
    }

    #[test]
    fn registry_reload_picks_up_new_files() {
        let tmp = TempDir::new().unwrap();
        let reg = AgentRegistry::new(Some(tmp.path().to_path_buf()));
        assert!(reg.resolve("late").is_none());
        write_agent(tmp.path(), "late.md", "---\ndescription: L.\n---\n\nLate agent.");
        reg.reload();
        assert!(reg.resolve("late").is_some());
    }

    #[test]
    fn registry_names_sorted() {
        let tmp = TempDir::new().unwrap();
        write_agent(tmp.path(), "zebra.md", "Z body.");
        write_agent(tmp.path(), "apple.md", "A body.");
        let reg = AgentRegistry::new(Some(tmp.path().to_path_buf()));
        assert_eq!(reg.names(), vec!["apple", "zebra"]);
    }

    #[test]
    fn registry_skips_oversized_template() {
        let tmp = TempDir::new().unwrap();
        let big = format!("---\ndescription: Big.\n---\n\n{}", "x".repeat(260 * 1024));
        write_agent(tmp.path(), "big.md", &big);
        let reg = AgentRegistry::new(Some(tmp.path().to_path_buf()));
        assert!(reg.resolve("big").is_none());
    }
}

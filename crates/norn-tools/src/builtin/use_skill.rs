// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use norn_runtime::SkillRegistry;

use crate::{Tool, ToolOutput};

/// Load a skill's full prompt on demand, keeping its token cost out of the
/// system prompt until the model actually needs it.
pub struct UseSkillTool {
    pub skills: Arc<SkillRegistry>,
}

#[async_trait]
impl Tool for UseSkillTool {
    fn name(&self) -> &str {
        "use_skill"
    }

    fn description(&self) -> &str {
        "Load the full instructions of a named skill. \
         Call this before applying any skill listed in the system prompt."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Skill name as listed in the skills section" }
            },
            "required": ["name"],
            "additionalProperties": false
        })
    }

    async fn invoke(&self, args: &Value) -> ToolOutput {
        let name = match args.get("name").and_then(|v| v.as_str()) {
            Some(n) if !n.trim().is_empty() => n.trim(),
            _ => return ToolOutput::err("missing required parameter 'name'"),
        };
        debug!(skill = name, "use_skill tool");
        match self.skills.prompt(name) {
            Some(body) => ToolOutput::ok(body),
            None => ToolOutput::err(format!("unknown skill '{name}'")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry_with_skill() -> (TempDir, Arc<SkillRegistry>) {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("compress-context.md"),
            "---\nname: compress-context\ndescription: Compact history.\n---\n\n## Steps\nCompact.",
        )
        .unwrap();
        let reg = Arc::new(SkillRegistry::new(Some(tmp.path().to_path_buf())));
        (tmp, reg)
    }

    #[tokio::test]
    async fn returns_full_skill_body() {
        let (_tmp, skills) = registry_with_skill();
        let tool = UseSkillTool { skills };
        let out = tool.invoke(&json!({"name": "compress-context"})).await;
        assert!(!out.is_error);
        assert!(out.content.contains("## Steps"));
    }

    #[tokio::test]
    async fn unknown_skill_is_error() {
        let (_tmp, skills) = registry_with_skill();
        let tool = UseSkillTool { skills };
        let out = tool.invoke(&json!({"name": "nope"})).await;
        assert!(out.is_error);
        assert!(out.content.contains("unknown skill"));
    }
}

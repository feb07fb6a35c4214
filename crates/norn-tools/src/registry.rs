// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use norn_model::ToolSchema;

use crate::{Tool, ToolOutput};

/// Central registry mapping tool names to handlers.
///
/// Cloning is shallow (the handlers are shared), so a thread can extend its
/// own copy with per-thread tools without mutating the shared base, and a
/// child thread can receive a copy with the spawning tools removed.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// A shallow copy with the named tools removed.  Used to hand children a
    /// registry that cannot spawn further children.
    pub fn without(&self, names: &[&str]) -> Self {
        let mut copy = self.clone();
        for name in names {
            copy.tools.remove(*name);
        }
        copy
    }

    /// Schemas for all registered tools, sorted by name.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Dispatch one tool call and return the string the model will read.
    ///
    /// Errors are in-band: an unknown tool or a failed handler yields a
    /// string with a leading `"Error: "` sentinel rather than an `Err`.
    pub async fn run(&self, name: &str, args_json: &str) -> String {
        let tool = match self.tools.get(name) {
            Some(t) => t.clone(),
            None => return format!("Error: unknown tool '{name}'"),
        };

        let args: Value = if args_json.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str(args_json) {
                Ok(v) => v,
                Err(e) => {
                    warn!(tool = name, error = %e, "invalid tool arguments from model; substituting {{}}");
                    Value::Object(Default::default())
                }
            }
        };

        let ToolOutput { content, is_error } = tool.invoke(&args).await;
        if is_error && !content.starts_with("Error:") {
            format!("Error: {content}")
        } else {
            content
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

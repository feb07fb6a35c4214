// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::{Tool, ToolOutput};

/// Byte ceiling applied to file reads so a single tool result cannot flood
/// the model context.
const MAX_READ_BYTES: usize = 64_000;

fn resolve(root: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        root.join(p)
    }
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolOutput> {
    match args.get(key).and_then(|v| v.as_str()) {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(ToolOutput::err(format!("missing required parameter '{key}'"))),
    }
}

pub struct ReadFileTool {
    pub root: PathBuf,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a UTF-8 text file. Relative paths resolve against the workspace root. \
         Output is truncated at 64 KB; read large files in pieces via the shell tool."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Absolute or workspace-relative path" }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    async fn invoke(&self, args: &Value) -> ToolOutput {
        let path = match required_str(args, "path") {
            Ok(p) => p,
            Err(e) => return e,
        };
        let full = resolve(&self.root, path);
        debug!(path = %full.display(), "read_file tool");
        match tokio::fs::read_to_string(&full).await {
            Ok(mut text) => {
                if text.len() > MAX_READ_BYTES {
                    let mut cut = MAX_READ_BYTES;
                    while !text.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    text.truncate(cut);
                    text.push_str("\n[truncated]");
                }
                ToolOutput::ok(text)
            }
            Err(e) => ToolOutput::err(format!("read error: {e}")),
        }
    }
}

pub struct WriteFileTool {
    pub root: PathBuf,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories as needed. \
         Overwrites any existing content."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Absolute or workspace-relative path" },
                "content": { "type": "string", "description": "Full file content" }
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }

    async fn invoke(&self, args: &Value) -> ToolOutput {
        let path = match required_str(args, "path") {
            Ok(p) => p,
            Err(e) => return e,
        };
        let content = args.get("content").and_then(|v| v.as_str()).unwrap_or_default();
        let full = resolve(&self.root, path);
        debug!(path = %full.display(), bytes = content.len(), "write_file tool");
        if let Some(parent) = full.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolOutput::err(format!("create dir error: {e}"));
            }
        }
        match tokio::fs::write(&full, content).await {
            Ok(()) => ToolOutput::ok(format!("wrote {} bytes to {}", content.len(), path)),
            Err(e) => ToolOutput::err(format!("write error: {e}")),
        }
    }
}

pub struct ListDirTool {
    pub root: PathBuf,
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List directory entries, one per line; directories get a trailing slash."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory path (default: workspace root)" }
            },
            "additionalProperties": false
        })
    }

    async fn invoke(&self, args: &Value) -> ToolOutput {
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let full = resolve(&self.root, path);
        let mut reader = match tokio::fs::read_dir(&full).await {
            Ok(r) => r,
            Err(e) => return ToolOutput::err(format!("list error: {e}")),
        };
        let mut entries = Vec::new();
        while let Ok(Some(entry)) = reader.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push(if is_dir { format!("{name}/") } else { name });
        }
        entries.sort();
        if entries.is_empty() {
            ToolOutput::ok("(empty directory)")
        } else {
            ToolOutput::ok(entries.join("\n"))
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

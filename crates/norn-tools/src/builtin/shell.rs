// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use crate::{Tool, ToolOutput};

const OUTPUT_LIMIT: usize = 100_000;

pub struct ShellTool {
    pub workdir: PathBuf,
    pub timeout_secs: u64,
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a command with sh -c in the workspace directory. \
         Returns combined stdout/stderr plus the exit status. \
         Chain dependent commands with '&&'; avoid long-running servers or watchers."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "The shell command to run" },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Override the default timeout for slow commands"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    async fn invoke(&self, args: &Value) -> ToolOutput {
        let command = match args.get("command").and_then(|v| v.as_str()) {
            Some(c) if !c.trim().is_empty() => c.to_string(),
            _ => return ToolOutput::err("missing required parameter 'command'"),
        };
        let timeout_secs = args
            .get("timeout_secs")
            .and_then(|v| v.as_u64())
            .unwrap_or(self.timeout_secs);

        debug!(command = %command, timeout_secs, "shell tool");

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&command)
            .current_dir(&self.workdir)
            .kill_on_drop(true);

        let output = match tokio::time::timeout(Duration::from_secs(timeout_secs), cmd.output()).await {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => return ToolOutput::err(format!("spawn error: {e}")),
            Err(_) => {
                return ToolOutput::err(format!("command timed out after {timeout_secs}s"));
            }
        };

        let mut text = String::new();
        text.push_str(&String::from_utf8_lossy(&output.stdout));
        if !output.stderr.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&String::from_utf8_lossy(&output.stderr));
        }
        if text.len() > OUTPUT_LIMIT {
            let mut cut = OUTPUT_LIMIT;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
            text.push_str("\n[truncated]");
        }

        if output.status.success() {
            if text.is_empty() {
                ToolOutput::ok("(no output)")
            } else {
                ToolOutput::ok(text)
            }
        } else {
            let code = output.status.code().unwrap_or(-1);
            ToolOutput::err(format!("exit status {code}\n{text}"))
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

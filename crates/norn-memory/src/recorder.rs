// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Post-turn memory recording.
//!
//! After each successful turn the recorder appends one record to a per-day
//! JSONL index, writes the full user/assistant texts as small markdown
//! files, and regenerates the daily and global summaries.  The daily index
//! rotates when it exceeds the configured turn count; rotated-out turn
//! files are removed with their index lines.
//!
//! Layout under the memory root:
//!
//! ```text
//! <root>/MEMORY.md                  global summary (most recent N turns)
//! <root>/<YYYY-MM-DD>/index.jsonl   one JSON record per turn, append order
//! <root>/<YYYY-MM-DD>/SUMMARY.md    daily summary, newest first
//! <root>/<YYYY-MM-DD>/turns/<id>-user.md
//! <root>/<YYYY-MM-DD>/turns/<id>-assistant.md
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use norn_config::MemoryConfig;

use crate::extract::{excerpt, extract_keywords, extract_markers};

/// One recorded turn in the daily index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub session: String,
    pub source_ref: String,
    pub user_ref: String,
    pub assistant_ref: String,
    pub user_excerpt: String,
    pub assistant_excerpt: String,
    pub keywords: Vec<String>,
    pub markers: Vec<String>,
}

pub struct TurnRecorder {
    root: PathBuf,
    excerpt_max_chars: usize,
    keyword_max: usize,
    max_turns_per_day: usize,
    global_recent: usize,
}

impl TurnRecorder {
    /// Build a recorder when memory is enabled and a directory is
    /// configured; `None` otherwise.
    pub fn from_config(cfg: &MemoryConfig) -> Option<Self> {
        if !cfg.enabled {
            return None;
        }
        let dir = cfg.dir.as_deref()?;
        Some(Self {
            root: PathBuf::from(dir),
            excerpt_max_chars: cfg.excerpt_max_chars,
            keyword_max: cfg.keyword_max,
            max_turns_per_day: cfg.max_turns_per_day,
            global_recent: cfg.global_recent,
        })
    }

    /// Record one completed turn.
    pub fn record(
        &self,
        session: &str,
        source: &str,
        user_text: &str,
        assistant_text: &str,
    ) -> anyhow::Result<()> {
        let now = Utc::now();
        let day = now.format("%Y-%m-%d").to_string();
        let day_dir = self.root.join(&day);
        let turns_dir = day_dir.join("turns");
        std::fs::create_dir_all(&turns_dir).context("creating memory turn dir")?;

        let id = Uuid::new_v4().simple().to_string()[..8].to_string();
        let user_ref = format!("{day}/turns/{id}-user.md");
        let assistant_ref = format!("{day}/turns/{id}-assistant.md");
        std::fs::write(self.root.join(&user_ref), user_text)?;
        std::fs::write(self.root.join(&assistant_ref), assistant_text)?;

        let combined = format!("{user_text}\n{assistant_text}");
        let record = TurnRecord {
            id,
            timestamp: now,
            session: session.to_string(),
            source_ref: source.to_string(),
            user_ref,
            assistant_ref,
            user_excerpt: excerpt(user_text, self.excerpt_max_chars),
            assistant_excerpt: excerpt(assistant_text, self.excerpt_max_chars),
            keywords: extract_keywords(&combined, self.keyword_max),
            markers: extract_markers(&combined),
        };

        let mut records = read_index(&day_dir.join("index.jsonl"));
        records.push(record);

        // Rotate: drop the oldest records (and their turn files) beyond the cap.
        if records.len() > self.max_turns_per_day {
            let overflow = records.len() - self.max_turns_per_day;
            for old in records.drain(..overflow) {
                for file_ref in [&old.user_ref, &old.assistant_ref] {
                    if let Err(e) = std::fs::remove_file(self.root.join(file_ref)) {
                        warn!(file = %file_ref, error = %e, "failed to remove rotated turn file");
                    }
                }
            }
        }

        write_index(&day_dir.join("index.jsonl"), &records)?;
        std::fs::write(day_dir.join("SUMMARY.md"), render_summary(&day, &records))?;
        self.write_global_summary()?;
        Ok(())
    }

    /// The current global summary text, empty when none exists yet.
    pub fn global_summary(&self) -> String {
        std::fs::read_to_string(self.root.join("MEMORY.md")).unwrap_or_default()
    }

    fn write_global_summary(&self) -> anyhow::Result<()> {
        // Day directories sorted newest first; record order inside a day is
        // append order, so reverse per day.
        let mut days: Vec<String> = std::fs::read_dir(&self.root)
            .map(|entries| {
                entries
                    .flatten()
                    .filter(|e| e.path().is_dir())
                    .filter_map(|e| e.file_name().to_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        days.sort_by(|a, b| b.cmp(a));

        let mut recent: Vec<TurnRecord> = Vec::new();
        for day in days {
            if recent.len() >= self.global_recent {
                break;
            }
            let mut records = read_index(&self.root.join(&day).join("index.jsonl"));
            records.reverse();
            for record in records {
                recent.push(record);
                if recent.len() >= self.global_recent {
                    break;
                }
            }
        }

        let mut out = String::from("# Memory\n\nMost recent turns, newest first.\n\n");
        for record in &recent {
            out.push_str(&render_record(record));
        }
        std::fs::write(self.root.join("MEMORY.md"), out)?;
        Ok(())
    }
}

fn read_index(path: &Path) -> Vec<TurnRecord> {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    raw.lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping corrupt memory index line");
                None
            }
        })
        .collect()
}

fn write_index(path: &Path, records: &[TurnRecord]) -> anyhow::Result<()> {
    let mut out = String::new();
    for record in records {
        out.push_str(&serde_json::to_string(record)?);
        out.push('\n');
    }
    std::fs::write(path, out)?;
    Ok(())
}

fn render_record(record: &TurnRecord) -> String {
    let mut out = format!(
        "- {} [{}] `{}`",
        record.timestamp.format("%Y-%m-%d %H:%M:%SZ"),
        record.source_ref,
        record.session,
    );
    if !record.keywords.is_empty() {
        out.push_str(&format!(" — {}", record.keywords.join(", ")));
    }
    if !record.markers.is_empty() {
        let tags: Vec<String> = record.markers.iter().map(|m| format!("#{m}")).collect();
        out.push_str(&format!(" {}", tags.join(" ")));
    }
    out.push('\n');
    out.push_str(&format!("  - user: {}\n", record.user_excerpt));
    out.push_str(&format!("  - assistant: {}\n", record.assistant_excerpt));
    out
}

fn render_summary(day: &str, records: &[TurnRecord]) -> String {
    let mut out = format!("# {day}\n\n{} turns, newest first.\n\n", records.len());
    for record in records.iter().rev() {
        out.push_str(&render_record(record));
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

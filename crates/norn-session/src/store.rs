// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Per-key session persistence.
//!
//! Each session key maps to one JSON document at
//! `<root>/<sanitized segments...>/session.json`.  The in-memory cache is
//! advisory only: a save always re-reads the file first so edits made by
//! external tools between turns are never overwritten.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use norn_model::Message;

use crate::key::key_segments;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid session file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One persisted conversation.
///
/// The message list never starts with a system message — the system prompt
/// is rebuilt from the agent template on every turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub key: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self { key: key.into(), messages: Vec::new(), created_at: now, updated_at: now }
    }
}

/// Filesystem-backed session store.
///
/// Loads and the cache are guarded by a reader/writer lock; file I/O runs
/// unlocked.  Cross-thread write collisions on one key cannot occur because
/// a session key maps to exactly one single-runner thread.
pub struct SessionStore {
    root: PathBuf,
    cache: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), cache: RwLock::new(HashMap::new()) }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The on-disk path for a key: one directory level per sanitized
    /// `:`-segment, with `session.json` at the leaf.
    pub fn path_for_key(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        for segment in key_segments(key) {
            path.push(segment);
        }
        path.join("session.json")
    }

    /// Return the cached session, loading from disk on first access.
    /// A missing file yields a fresh empty session, not an error.
    pub async fn get(&self, key: &str) -> Result<Session, StoreError> {
        if let Some(session) = self.cache.read().await.get(key) {
            return Ok(session.clone());
        }
        self.reload(key).await
    }

    /// Force a disk read and refresh the cache.
    pub async fn reload(&self, key: &str) -> Result<Session, StoreError> {
        let session = self.read_from_disk(key)?;
        self.cache.write().await.insert(key.to_string(), session.clone());
        Ok(session)
    }

    /// Persist a session, stamping `updated_at`.
    pub async fn save(&self, session: &Session) -> Result<(), StoreError> {
        let mut stamped = session.clone();
        stamped.updated_at = Utc::now();

        let path = self.path_for_key(&stamped.key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&stamped)
            .map_err(|source| StoreError::Parse { path: path.clone(), source })?;
        std::fs::write(&path, json)?;
        debug!(key = %stamped.key, path = %path.display(), "session saved");

        self.cache.write().await.insert(stamped.key.clone(), stamped);
        Ok(())
    }

    /// Reload-append-save in one step: re-read the file fresh, append the
    /// turn's new messages after whatever is on disk, and write back.
    pub async fn append(&self, key: &str, new_messages: Vec<Message>) -> Result<(), StoreError> {
        let mut session = self.reload(key).await?;
        session.messages.extend(new_messages);
        self.save(&session).await
    }

    fn read_from_disk(&self, key: &str) -> Result<Session, StoreError> {
        let path = self.path_for_key(key);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Session::new(key));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&raw).map_err(|source| StoreError::Parse { path, source })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

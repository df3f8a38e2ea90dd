// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace-global message queue (§6 "Queue configuration").
//!
//! Scoped to a `Workspace` (working directory + agent binding), not to a
//! single session: a prompt submitted while a session is `isPrompting` is
//! appended here instead of being rejected, and [`WorkspaceQueue::drain`]
//! is called by the owning [`crate::manager::SessionManager`] once the
//! session has been idle for `delay_seconds`.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::QueueConfig;

/// One queued prompt, not yet delivered to the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: String,
    pub session_id: String,
    pub text: String,
    pub image_ids: Vec<String>,
    pub submitted_at: DateTime<Utc>,
    /// Short human label, present only when `auto_generate_titles` produced
    /// one at enqueue time.
    pub title: Option<String>,
}

/// Heuristic title generator: the core ships no LLM client (§4.4's
/// action-button worker makes the same tradeoff), so titles are derived
/// from the prompt text itself rather than from an auxiliary completion.
pub fn heuristic_title(text: &str) -> String {
    const MAX_WORDS: usize = 8;
    const MAX_CHARS: usize = 60;
    let words: Vec<&str> = text.split_whitespace().take(MAX_WORDS).collect();
    let mut title = words.join(" ");
    if title.chars().count() > MAX_CHARS {
        title = title.chars().take(MAX_CHARS).collect::<String>() + "…";
    }
    if title.is_empty() {
        title = "Queued prompt".to_owned();
    }
    title
}

/// FIFO queue for one workspace, bounded by `QueueConfig::max_size`.
pub struct WorkspaceQueue {
    config: QueueConfig,
    entries: Mutex<VecDeque<QueueEntry>>,
}

impl WorkspaceQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self { config, entries: Mutex::new(VecDeque::new()) }
    }

    pub fn config(&self) -> QueueConfig {
        self.config
    }

    /// Append a prompt. Returns `Err` if the queue is disabled or full —
    /// the caller (ClientLink, via BackgroundSession) surfaces that as a
    /// `prompt_in_progress`-flavored error rather than silently dropping
    /// the user's text.
    pub async fn enqueue(
        &self,
        session_id: impl Into<String>,
        id: impl Into<String>,
        text: impl Into<String>,
        image_ids: Vec<String>,
    ) -> Result<QueueEntry, QueueError> {
        if !self.config.enabled {
            return Err(QueueError::Disabled);
        }
        let mut entries = self.entries.lock().await;
        if entries.len() >= self.config.max_size {
            return Err(QueueError::Full);
        }
        let text = text.into();
        let title = self.config.auto_generate_titles.then(|| heuristic_title(&text));
        let entry = QueueEntry {
            id: id.into(),
            session_id: session_id.into(),
            text,
            image_ids,
            submitted_at: Utc::now(),
            title,
        };
        entries.push_back(entry.clone());
        Ok(entry)
    }

    /// Pop the oldest entry destined for `session_id`, if any. Called by
    /// the drain worker once the session has been idle for
    /// `delay_seconds`.
    pub async fn drain_one(&self, session_id: &str) -> Option<QueueEntry> {
        let mut entries = self.entries.lock().await;
        let idx = entries.iter().position(|e| e.session_id == session_id)?;
        entries.remove(idx)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("workspace message queue is disabled")]
    Disabled,
    #[error("workspace message queue is full")]
    Full,
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;

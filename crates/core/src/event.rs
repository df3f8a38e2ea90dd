// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The event tagged union (§3, §9): one variant per `kind`, replacing
//! string-keyed dispatch at the callback layer. [`EventRecord`] is the
//! on-disk/wire shape; [`Event`] carries the `seq`+timestamp envelope
//! BackgroundSession assigns around a [`EventKind`] payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Permission decision attached to a tool call, echoed back to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionOption {
    pub id: String,
    pub label: String,
}

/// One entry in the session's event log (§3 "Event").
///
/// Immutable once appended. `kind` carries its own payload fields; the
/// `#[serde(tag = "kind")]` on [`EventKind`] combined with flattening here
/// produces the on-disk schema `{seq, kind, ts, payload}` from §6 without a
/// separate untyped `payload` field in Rust.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    pub fn new(seq: u64, kind: EventKind) -> Self {
        Self { seq, ts: Utc::now(), kind }
    }
}

/// The closed set of event kinds enumerated in §3.
///
/// `#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]`
/// matches the on-disk schema exactly: `{"kind": "tool_call", "payload":
/// {...}}` once merged with [`Event`]'s `seq`/`ts` via `#[serde(flatten)]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum EventKind {
    UserPrompt { prompt_id: String, text: String },
    /// HTML payload, produced by [`crate::markdown_buffer::MarkdownBuffer`].
    AgentMessage { html: String },
    /// Plain text, unlike `AgentMessage`.
    AgentThought { text: String },
    ToolCall { id: String, title: String, status: ToolCallStatus },
    ToolUpdate { id: String, status: ToolCallStatus },
    Plan { entries: Vec<PlanEntry> },
    FileRead { path: String, size: u64 },
    FileWrite { path: String, size: u64 },
    PermissionRequest { request_id: String, params: PermissionRequestParams },
    PermissionAnswer { request_id: String, choice: String },
    Error { message: String, kind: Option<String> },
    PromptComplete { event_count: u64, cancelled: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub text: String,
    pub done: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRequestParams {
    pub tool_call_id: String,
    pub options: Vec<PermissionOption>,
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;

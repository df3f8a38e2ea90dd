// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The client-facing wire protocol (§4.6, §6): JSON over WebSocket, one
//! message per frame, envelope `{type, data}`. [`ClientMessage`] and
//! [`ServerMessage`] are the message catalogue in both directions,
//! modeled on the teacher's internally-tagged `MuxEvent` (`state.rs`)
//! rather than the loose `serde_json::Value` the teacher's `ws_mux`
//! client-input path uses, since every field here is load-bearing.

use serde::{Deserialize, Serialize};

use crate::event::{PermissionRequestParams, PlanEntry, ToolCallStatus};
use crate::session::ActionButton;

/// Browser/web-view → server (§4.6 "Client → server").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Prompt { prompt_id: String, text: String, #[serde(default)] image_ids: Vec<String> },
    Cancel,
    #[serde(rename_all = "camelCase")]
    PermissionAnswer { request_id: String, choice: String },
    #[serde(rename_all = "camelCase")]
    LoadEvents {
        #[serde(default)]
        after_seq: Option<u64>,
        #[serde(default)]
        before_seq: Option<u64>,
        #[serde(default)]
        limit: Option<usize>,
    },
    #[serde(rename_all = "camelCase")]
    Keepalive { client_time: i64 },
}

/// Server → browser/web-view (§4.6 "Server → client").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    PromptReceived { prompt_id: String },
    #[serde(rename_all = "camelCase")]
    Error { message: String, #[serde(skip_serializing_if = "Option::is_none")] kind: Option<String> },
    #[serde(rename_all = "camelCase")]
    UserPrompt { seq: u64, text: String, is_mine: bool },
    #[serde(rename_all = "camelCase")]
    AgentMessage { seq: u64, html: String },
    #[serde(rename_all = "camelCase")]
    AgentThought { seq: u64, text: String },
    #[serde(rename_all = "camelCase")]
    ToolCall { seq: u64, id: String, title: String, status: ToolCallStatus },
    #[serde(rename_all = "camelCase")]
    ToolUpdate { seq: u64, id: String, status: ToolCallStatus },
    #[serde(rename_all = "camelCase")]
    Plan { seq: u64, entries: Vec<PlanEntry> },
    #[serde(rename_all = "camelCase")]
    FileRead { seq: u64, path: String, size: u64 },
    #[serde(rename_all = "camelCase")]
    FileWrite { seq: u64, path: String, size: u64 },
    #[serde(rename_all = "camelCase")]
    Permission { request_id: String, params: PermissionRequestParams },
    #[serde(rename_all = "camelCase")]
    PromptComplete { event_count: u64 },
    #[serde(rename_all = "camelCase")]
    EventsLoaded { events: Vec<WireEvent>, last_seq: u64, has_more: bool, is_prepend: bool },
    #[serde(rename_all = "camelCase")]
    KeepaliveAck { client_time: i64, server_time: i64, server_max_seq: u64 },
    ActionButtons { buttons: Vec<ActionButton> },
    AcpStarted,
    #[serde(rename_all = "camelCase")]
    AcpStopped { reason: String },
    #[serde(rename_all = "camelCase")]
    SessionArchived { archived: bool },
    #[serde(rename_all = "camelCase")]
    SessionSettingsUpdated { settings: std::collections::BTreeMap<String, bool> },
}

/// One history event as carried by `events_loaded` — the persisted
/// [`crate::event::Event`] reshaped with the wire's `isMine` framing
/// omitted (history replay has no "authoring client" concept; only the
/// live `user_prompt` push carries `isMine`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEvent {
    pub seq: u64,
    pub kind: String,
    pub ts: chrono::DateTime<chrono::Utc>,
    pub payload: serde_json::Value,
}

impl WireEvent {
    pub fn from_event(event: &crate::event::Event) -> Self {
        let full = serde_json::to_value(event).unwrap_or(serde_json::Value::Null);
        let kind = full.get("kind").and_then(|v| v.as_str()).unwrap_or_default().to_owned();
        let payload = full.get("payload").cloned().unwrap_or(serde_json::Value::Null);
        Self { seq: event.seq, kind, ts: event.ts, payload }
    }
}

#[cfg(test)]
#[path = "wire_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test-only [`Observer`] double, grounded in the teacher's own
//! `test_support.rs` (a recording harness standing in for a real
//! transport peer so session-runtime tests don't need a live socket).
//! `RecordingObserver` satisfies the capability contract in-process and
//! records every callback for assertions, exactly as a `ClientLink`
//! would receive them over the wire.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::ErrorKind;
use crate::event::{PermissionRequestParams, PlanEntry, ToolCallStatus};
use crate::observer::Observer;
use crate::session::ActionButton;

/// One recorded callback, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    UserPrompt { seq: u64, text: String, is_mine: bool },
    AgentMessage { seq: u64, html: String },
    AgentThought { seq: u64, text: String },
    ToolCall { seq: u64, id: String, title: String, status: ToolCallStatus },
    ToolUpdate { seq: u64, id: String, status: ToolCallStatus },
    Plan { seq: u64, entries: Vec<PlanEntry> },
    FileRead { seq: u64, path: String, size: u64 },
    FileWrite { seq: u64, path: String, size: u64 },
    Permission { request_id: String, params: PermissionRequestParams },
    PromptReceived { prompt_id: String },
    PromptComplete { event_count: u64 },
    Error { message: String, kind: Option<ErrorKind> },
    ActionButtons { buttons: Vec<ActionButton> },
    AcpStarted,
    AcpStopped { reason: String },
    SessionArchived { archived: bool },
    SessionSettingsUpdated { settings: std::collections::BTreeMap<String, bool> },
    Close { reason: String },
}

pub struct RecordingObserver {
    client_id: String,
    events: Mutex<Vec<Recorded>>,
    last_sent_seq: AtomicU64,
}

impl RecordingObserver {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self { client_id: client_id.into(), events: Mutex::new(Vec::new()), last_sent_seq: AtomicU64::new(0) }
    }

    #[allow(clippy::disallowed_methods)]
    pub fn recorded(&self) -> Vec<Recorded> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.recorded().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, event: Recorded) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event);
    }
}

impl Observer for RecordingObserver {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn on_user_prompt(&self, seq: u64, text: &str, is_mine: bool) {
        self.push(Recorded::UserPrompt { seq, text: text.to_owned(), is_mine });
    }

    fn on_agent_message(&self, seq: u64, html: &str) {
        self.push(Recorded::AgentMessage { seq, html: html.to_owned() });
    }

    fn on_agent_thought(&self, seq: u64, text: &str) {
        self.push(Recorded::AgentThought { seq, text: text.to_owned() });
    }

    fn on_tool_call(&self, seq: u64, id: &str, title: &str, status: ToolCallStatus) {
        self.push(Recorded::ToolCall { seq, id: id.to_owned(), title: title.to_owned(), status });
    }

    fn on_tool_update(&self, seq: u64, id: &str, status: ToolCallStatus) {
        self.push(Recorded::ToolUpdate { seq, id: id.to_owned(), status });
    }

    fn on_plan(&self, seq: u64, entries: &[PlanEntry]) {
        self.push(Recorded::Plan { seq, entries: entries.to_vec() });
    }

    fn on_file_read(&self, seq: u64, path: &str, size: u64) {
        self.push(Recorded::FileRead { seq, path: path.to_owned(), size });
    }

    fn on_file_write(&self, seq: u64, path: &str, size: u64) {
        self.push(Recorded::FileWrite { seq, path: path.to_owned(), size });
    }

    fn on_permission(&self, request_id: &str, params: &PermissionRequestParams) {
        self.push(Recorded::Permission { request_id: request_id.to_owned(), params: params.clone() });
    }

    fn on_prompt_received(&self, prompt_id: &str) {
        self.push(Recorded::PromptReceived { prompt_id: prompt_id.to_owned() });
    }

    fn on_prompt_complete(&self, event_count: u64) {
        self.push(Recorded::PromptComplete { event_count });
    }

    fn on_error(&self, message: &str, kind: Option<ErrorKind>) {
        self.push(Recorded::Error { message: message.to_owned(), kind });
    }

    fn on_action_buttons(&self, buttons: &[ActionButton]) {
        self.push(Recorded::ActionButtons { buttons: buttons.to_vec() });
    }

    fn on_acp_started(&self) {
        self.push(Recorded::AcpStarted);
    }

    fn on_acp_stopped(&self, reason: &str) {
        self.push(Recorded::AcpStopped { reason: reason.to_owned() });
    }

    fn on_session_archived(&self, archived: bool) {
        self.push(Recorded::SessionArchived { archived });
    }

    fn on_session_settings_updated(&self, settings: &std::collections::BTreeMap<String, bool>) {
        self.push(Recorded::SessionSettingsUpdated { settings: settings.clone() });
    }

    fn on_close(&self, reason: &str) {
        self.push(Recorded::Close { reason: reason.to_owned() });
    }

    fn last_sent_seq(&self) -> u64 {
        self.last_sent_seq.load(Ordering::SeqCst)
    }

    fn set_last_sent_seq(&self, seq: u64) {
        self.last_sent_seq.store(seq, Ordering::SeqCst);
    }
}

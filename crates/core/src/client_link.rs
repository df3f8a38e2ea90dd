// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! [`ClientLink`] — the [`Observer`] implementation backing one attached
//! WebSocket peer. Translates every `on_*` callback into a [`ServerMessage`]
//! pushed onto a bounded outbound queue; the transport task owns the other
//! end and writes frames to the socket. Grounded on the teacher's
//! `Bridge`/per-client fan-out in `transport/ws_mux.rs`, generalized from a
//! raw-bytes broadcast subscriber to a typed, per-observer queue since each
//! client here tracks its own `last_sent_seq` replay cursor rather than
//! sharing one ring buffer.
//!
//! §5: "a slow ClientLink does not back-pressure the session, it is
//! dropped." A full queue means the peer isn't draining fast enough to
//! matter; `try_send` failing closes the link rather than blocking the
//! session loop or growing the queue unbounded.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ErrorKind;
use crate::event::{PermissionRequestParams, PlanEntry, ToolCallStatus};
use crate::observer::Observer;
use crate::session::ActionButton;
use crate::wire::ServerMessage;

/// One attached WebSocket peer, as seen by [`crate::session::BackgroundSession`].
pub struct ClientLink {
    session_id: String,
    client_id: String,
    last_sent_seq: AtomicU64,
    outbound: mpsc::Sender<ServerMessage>,
    closed: CancellationToken,
}

impl ClientLink {
    /// `outbound` is the sending half of the channel the transport task
    /// reads from to write WebSocket frames. `closed` is cancelled by this
    /// link when the queue overflows, so the transport task can tear the
    /// socket down instead of polling a queue no one refills.
    pub fn new(
        session_id: impl Into<String>,
        client_id: impl Into<String>,
        outbound: mpsc::Sender<ServerMessage>,
        closed: CancellationToken,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            client_id: client_id.into(),
            last_sent_seq: AtomicU64::new(0),
            outbound,
            closed,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// `true` once this link has closed itself due to a full outbound
    /// queue; the transport task should check this after every `send`.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Force the link closed without sending anything (e.g. after the
    /// transport task already pushed a terminal `error` message for a
    /// protocol violation, §7).
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Send a message that isn't one of the `Observer` callbacks —
    /// `events_loaded` and `keepalive_ack` are request/response replies to
    /// a specific `ClientMessage`, not session-broadcast events.
    pub fn send_direct(&self, message: ServerMessage) {
        self.send(message);
    }

    fn send(&self, message: ServerMessage) {
        if self.outbound.try_send(message).is_err() {
            debug!(session = %self.session_id, client = %self.client_id, "outbound queue full, closing link");
            self.closed.cancel();
        }
    }
}

impl Observer for ClientLink {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn on_user_prompt(&self, seq: u64, text: &str, is_mine: bool) {
        self.send(ServerMessage::UserPrompt { seq, text: text.to_owned(), is_mine });
    }

    fn on_agent_message(&self, seq: u64, html: &str) {
        self.send(ServerMessage::AgentMessage { seq, html: html.to_owned() });
    }

    fn on_agent_thought(&self, seq: u64, text: &str) {
        self.send(ServerMessage::AgentThought { seq, text: text.to_owned() });
    }

    fn on_tool_call(&self, seq: u64, id: &str, title: &str, status: ToolCallStatus) {
        self.send(ServerMessage::ToolCall { seq, id: id.to_owned(), title: title.to_owned(), status });
    }

    fn on_tool_update(&self, seq: u64, id: &str, status: ToolCallStatus) {
        self.send(ServerMessage::ToolUpdate { seq, id: id.to_owned(), status });
    }

    fn on_plan(&self, seq: u64, entries: &[PlanEntry]) {
        self.send(ServerMessage::Plan { seq, entries: entries.to_vec() });
    }

    fn on_file_read(&self, seq: u64, path: &str, size: u64) {
        self.send(ServerMessage::FileRead { seq, path: path.to_owned(), size });
    }

    fn on_file_write(&self, seq: u64, path: &str, size: u64) {
        self.send(ServerMessage::FileWrite { seq, path: path.to_owned(), size });
    }

    fn on_permission(&self, request_id: &str, params: &PermissionRequestParams) {
        self.send(ServerMessage::Permission { request_id: request_id.to_owned(), params: params.clone() });
    }

    fn on_prompt_received(&self, prompt_id: &str) {
        self.send(ServerMessage::PromptReceived { prompt_id: prompt_id.to_owned() });
    }

    fn on_prompt_complete(&self, event_count: u64) {
        self.send(ServerMessage::PromptComplete { event_count });
    }

    fn on_error(&self, message: &str, kind: Option<ErrorKind>) {
        self.send(ServerMessage::Error {
            message: message.to_owned(),
            kind: kind.map(|k| k.as_str().to_owned()),
        });
    }

    fn on_action_buttons(&self, buttons: &[ActionButton]) {
        self.send(ServerMessage::ActionButtons { buttons: buttons.to_vec() });
    }

    fn on_acp_started(&self) {
        self.send(ServerMessage::AcpStarted);
    }

    fn on_acp_stopped(&self, reason: &str) {
        self.send(ServerMessage::AcpStopped { reason: reason.to_owned() });
    }

    fn on_session_archived(&self, archived: bool) {
        self.send(ServerMessage::SessionArchived { archived });
    }

    fn on_session_settings_updated(&self, settings: &BTreeMap<String, bool>) {
        self.send(ServerMessage::SessionSettingsUpdated { settings: settings.clone() });
    }

    /// The session is tearing this link down (detach, fatal session error,
    /// or a graceful close). No wire message is sent for `reason` itself —
    /// the transport task closes the socket once it observes `is_closed`;
    /// a prior `acp_stopped`/`error` callback (if any) already told the
    /// peer why.
    fn on_close(&self, _reason: &str) {
        self.closed.cancel();
    }

    fn last_sent_seq(&self) -> u64 {
        self.last_sent_seq.load(Ordering::SeqCst)
    }

    fn set_last_sent_seq(&self, seq: u64) {
        self.last_sent_seq.store(seq, Ordering::SeqCst);
    }
}

#[cfg(test)]
#[path = "client_link_tests.rs"]
mod tests;

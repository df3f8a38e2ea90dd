// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The observer capability contract (§4.4, §9): "a capability contract,
//! not an inheritance hierarchy." [`ClientLink`](crate::client_link::ClientLink)
//! satisfies it over the wire; [`crate::test_support::RecordingObserver`]
//! satisfies it in-process for tests. Every method is a synchronous,
//! non-blocking hook — §5 requires observer callbacks to return quickly,
//! so implementations push onto a bounded outbound queue (`try_send`)
//! rather than doing any I/O here.
//!
//! Default bodies are no-ops: an implementation only overrides the event
//! kinds it cares about.

use crate::error::ErrorKind;
use crate::event::{PermissionRequestParams, PlanEntry, ToolCallStatus};
use crate::session::ActionButton;

pub trait Observer: Send + Sync {
    fn client_id(&self) -> &str;

    fn on_user_prompt(&self, _seq: u64, _text: &str, _is_mine: bool) {}
    fn on_agent_message(&self, _seq: u64, _html: &str) {}
    fn on_agent_thought(&self, _seq: u64, _text: &str) {}
    fn on_tool_call(&self, _seq: u64, _id: &str, _title: &str, _status: ToolCallStatus) {}
    fn on_tool_update(&self, _seq: u64, _id: &str, _status: ToolCallStatus) {}
    fn on_plan(&self, _seq: u64, _entries: &[PlanEntry]) {}
    fn on_file_read(&self, _seq: u64, _path: &str, _size: u64) {}
    fn on_file_write(&self, _seq: u64, _path: &str, _size: u64) {}
    fn on_permission(&self, _request_id: &str, _params: &PermissionRequestParams) {}
    fn on_prompt_received(&self, _prompt_id: &str) {}
    fn on_prompt_complete(&self, _event_count: u64) {}
    fn on_error(&self, _message: &str, _kind: Option<ErrorKind>) {}
    fn on_action_buttons(&self, _buttons: &[ActionButton]) {}
    fn on_acp_started(&self) {}
    fn on_acp_stopped(&self, _reason: &str) {}
    fn on_session_archived(&self, _archived: bool) {}
    fn on_session_settings_updated(&self, _settings: &std::collections::BTreeMap<String, bool>) {}

    /// The session is tearing down this observer's link (§5 "a slow
    /// ClientLink does not back-pressure the session, it is dropped", §7
    /// fatal-session paths).
    fn on_close(&self, _reason: &str) {}

    /// Highest `seq` this observer has been sent, across both the replay
    /// and live-stream paths. Updated by the dispatcher after every send
    /// that carries a `seq`, never reset to zero (§4.4 critical invariant).
    fn last_sent_seq(&self) -> u64;
    fn set_last_sent_seq(&self, seq: u64);
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use serde::{Deserialize, Serialize};

/// Wire-facing error classifier shared by every failure path that can reach
/// a client: bad input, contention on a session, a dead agent subprocess, a
/// failed write to the session store, or a stolen lock.
///
/// Each variant maps to one stable wire string (`as_str`), used verbatim as
/// the `kind` field of a `error` message (see [`crate::client_link`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or unrecognized client message.
    BadRequest,
    /// Missing or invalid bearer token.
    Unauthorized,
    /// A prompt was sent while one was already in flight for the session.
    PromptInProgress,
    /// Referenced session id does not exist (or was deleted).
    NotFound,
    /// The agent subprocess exited; the session's runtime is gone.
    AgentExited,
    /// A Store operation (append, metadata rewrite) failed.
    StoreError,
    /// Another process's heartbeat superseded this process's session lock.
    LockLost,
    /// The targeted session is archived and owns no subprocess; the
    /// request (prompt, cancel, permission answer) has no agent to reach.
    Archived,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::Unauthorized => "unauthorized",
            Self::PromptInProgress => "prompt_in_progress",
            Self::NotFound => "not_found",
            Self::AgentExited => "agent_exit",
            Self::StoreError => "store_error",
            Self::LockLost => "lock_lost",
            Self::Archived => "archived",
            Self::Internal => "internal",
        }
    }

    /// Parse a wire string back into its `ErrorKind`, the inverse of
    /// [`ErrorKind::as_str`]. Used when replaying a persisted `error` event
    /// back to a late-attaching observer.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bad_request" => Some(Self::BadRequest),
            "unauthorized" => Some(Self::Unauthorized),
            "prompt_in_progress" => Some(Self::PromptInProgress),
            "not_found" => Some(Self::NotFound),
            "agent_exit" => Some(Self::AgentExited),
            "store_error" => Some(Self::StoreError),
            "lock_lost" => Some(Self::LockLost),
            "archived" => Some(Self::Archived),
            "internal" => Some(Self::Internal),
            _ => None,
        }
    }

    /// The `acp_stopped{reason}` string used for fatal-session outcomes.
    /// Only the three session-terminating kinds have one; everything else
    /// is a per-message error that does not end the session.
    pub fn stop_reason(&self) -> Option<&'static str> {
        match self {
            Self::AgentExited => Some("agent_exit"),
            Self::StoreError => Some("store_error"),
            Self::LockLost => Some("lock_lost"),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error with a classifier and a human-readable message, sent verbatim
/// to the client as `error{message, kind}`.
#[derive(Debug, Clone)]
pub struct MittoError {
    pub kind: ErrorKind,
    pub message: String,
}

impl MittoError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn prompt_in_progress() -> Self {
        Self::new(ErrorKind::PromptInProgress, "a prompt is already in progress")
    }
}

impl fmt::Display for MittoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for MittoError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;

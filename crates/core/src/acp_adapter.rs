// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Owns one ACP agent subprocess (§4.3).
//!
//! Built on [`agent_client_protocol`], the real external library the spec
//! treats as an out-of-scope collaborator exposing typed notifications and
//! request/response. Its `Client` trait methods are `!Send` — the SDK
//! drives its connection loop on a `LocalSet` — so the adapter's entire
//! I/O loop runs on a dedicated OS thread with a single-threaded Tokio
//! runtime, and talks to [`crate::session`] (which lives on the main
//! multi-threaded runtime) over `tokio::sync::mpsc` channels. This mirrors
//! the pattern real ACP integrations in the wild use to bridge a `!Send`
//! SDK into a `Send` application (see e.g. block-builderbot's
//! `run_acp_prompt_with_session`, which spawns a blocking task with its
//! own `LocalSet` for the same reason).

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::rc::Rc;
use std::time::Duration;

use agent_client_protocol::{
    Agent, ClientSideConnection, ContentBlock as AcpContentBlock, Implementation,
    InitializeRequest, NewSessionRequest, PermissionOptionId, PromptRequest, ProtocolVersion,
    RequestPermissionOutcome, RequestPermissionRequest, RequestPermissionResponse,
    SelectedPermissionOutcome, SessionId as AcpSessionId, SessionNotification, StopReason,
    SessionUpdate, TextContent,
};
use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio_util::compat::{TokioAsyncReadCompatExt, TokioAsyncWriteCompatExt};
use tracing::{debug, error, warn};

use crate::event::{PermissionOption, PlanEntry, ToolCallStatus};
use crate::store::AcpBinding;

/// A reference to a previously uploaded image, resolved by the external
/// upload collaborator named in §1 (out of scope here); the adapter only
/// needs the id to build the ACP content block.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub image_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("agent binding has no command")]
    NoCommand,
    #[error("failed to spawn agent process: {0}")]
    Spawn(std::io::Error),
    #[error("ACP handshake timed out after {0:?}")]
    Timeout(Duration),
    #[error("ACP protocol mismatch: {0}")]
    ProtocolMismatch(String),
    #[error("a prompt is already in flight")]
    PromptInFlight,
    #[error("agent subprocess has exited")]
    Exited,
    #[error("ACP request failed: {0}")]
    Protocol(String),
}

/// A permission prompt forwarded from the agent. `respond` answers it,
/// unblocking the adapter's single in-flight ACP `request_permission` call.
pub struct PermissionRequest {
    pub request_id: String,
    pub tool_call_id: String,
    pub options: Vec<PermissionOption>,
    reply: oneshot::Sender<String>,
}

impl PermissionRequest {
    pub fn respond(self, option_id: impl Into<String>) {
        let _ = self.reply.send(option_id.into());
    }
}

/// Typed notification stream the adapter translates ACP traffic into
/// (§4.3 "translate agent notifications into a typed internal stream").
pub enum AdapterEvent {
    AgentMessageChunk { text: String },
    AgentThoughtChunk { text: String },
    ToolCall { id: String, title: String, status: ToolCallStatus },
    ToolCallUpdate { id: String, status: ToolCallStatus },
    Plan { entries: Vec<PlanEntry> },
    FileRead { path: String, size: u64 },
    FileWrite { path: String, size: u64 },
    PermissionRequest(PermissionRequest),
    PromptComplete { cancelled: bool },
    /// The subprocess exited. Fatal for the owning session (§7).
    Exited { error: Option<String> },
}

enum AgentCommand {
    Prompt { text: String, attachments: Vec<Attachment>, reply: oneshot::Sender<Result<(), AdapterError>> },
    Cancel,
    Shutdown,
}

/// Owns one ACP agent subprocess and exposes a `Send` interface to it.
pub struct AcpAdapter {
    commands: mpsc::UnboundedSender<AgentCommand>,
    exited: tokio::sync::watch::Receiver<bool>,
    _thread: std::thread::JoinHandle<()>,
}

impl AcpAdapter {
    /// Spawn the agent, perform the ACP handshake, and open a session
    /// rooted at `working_dir`. Returns the adapter plus the receiving end
    /// of its notification stream.
    pub async fn spawn(
        binding: &AcpBinding,
        working_dir: &Path,
        handshake_timeout: Duration,
    ) -> Result<(Self, mpsc::Receiver<AdapterEvent>), AdapterError> {
        let Some((program, args)) = binding.command.split_first() else {
            return Err(AdapterError::NoCommand);
        };
        let program = program.clone();
        let args = args.to_vec();
        let working_dir = working_dir.to_path_buf();

        let (events_tx, events_rx) = mpsc::channel::<AdapterEvent>(256);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel::<AgentCommand>();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), AdapterError>>();
        let (exited_tx, exited_rx) = tokio::sync::watch::channel(false);

        let thread = std::thread::Builder::new()
            .name("acp-adapter".to_owned())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AdapterError::Spawn(e)));
                        return;
                    }
                };
                let local = tokio::task::LocalSet::new();
                local.block_on(&rt, async move {
                    run_adapter_loop(
                        &program,
                        &args,
                        &working_dir,
                        events_tx,
                        commands_rx,
                        ready_tx,
                        exited_tx,
                    )
                    .await;
                });
            })
            .expect("spawn acp-adapter thread");

        match tokio::time::timeout(handshake_timeout, ready_rx).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => return Err(e),
            Ok(Err(_)) => return Err(AdapterError::Protocol("adapter thread dropped before handshake".into())),
            Err(_) => return Err(AdapterError::Timeout(handshake_timeout)),
        }

        Ok((Self { commands: commands_tx, exited: exited_rx, _thread: thread }, events_rx))
    }

    /// Send a prompt. §4.3 forbids overlapping calls; the caller
    /// (BackgroundSession, via `isPrompting`) enforces that, but a stray
    /// double-call still surfaces as [`AdapterError::PromptInFlight`]
    /// rather than silently racing.
    pub async fn prompt(&self, text: String, attachments: Vec<Attachment>) -> Result<(), AdapterError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(AgentCommand::Prompt { text, attachments, reply: reply_tx })
            .map_err(|_| AdapterError::Exited)?;
        reply_rx.await.map_err(|_| AdapterError::Exited)?
    }

    pub fn cancel(&self) {
        let _ = self.commands.send(AgentCommand::Cancel);
    }

    /// Resolves when the subprocess has exited.
    pub async fn wait_exited(&mut self) {
        let _ = self.exited.wait_for(|exited| *exited).await;
    }
}

impl Drop for AcpAdapter {
    fn drop(&mut self) {
        let _ = self.commands.send(AgentCommand::Shutdown);
    }
}

/// Body of the dedicated `LocalSet` thread: handshake, session creation,
/// then the command/notification pump until the child exits or is told to
/// shut down.
async fn run_adapter_loop(
    program: &str,
    args: &[String],
    working_dir: &Path,
    events_tx: mpsc::Sender<AdapterEvent>,
    mut commands_rx: mpsc::UnboundedReceiver<AgentCommand>,
    ready_tx: oneshot::Sender<Result<(), AdapterError>>,
    exited_tx: tokio::sync::watch::Sender<bool>,
) {
    let mut child = match Command::new(program)
        .args(args)
        .current_dir(working_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            let _ = ready_tx.send(Err(AdapterError::Spawn(e)));
            return;
        }
    };

    let Some(stdin) = child.stdin.take() else {
        let _ = ready_tx.send(Err(AdapterError::Protocol("no stdin on agent child".into())));
        return;
    };
    let Some(stdout) = child.stdout.take() else {
        let _ = ready_tx.send(Err(AdapterError::Protocol("no stdout on agent child".into())));
        return;
    };

    let client = AdapterClient { events: events_tx.clone() };
    let (connection, io_future) =
        ClientSideConnection::new(client, stdin.compat_write(), stdout.compat(), |fut| {
            tokio::task::spawn_local(fut);
        });
    tokio::task::spawn_local(async move {
        if let Err(e) = io_future.await {
            debug!("ACP connection closed: {e:?}");
        }
    });

    let init = InitializeRequest::new(ProtocolVersion::LATEST)
        .client_info(Implementation::new("mitto", env!("CARGO_PKG_VERSION")));
    if let Err(e) = connection.initialize(init).await {
        let _ = ready_tx.send(Err(AdapterError::ProtocolMismatch(format!("{e:?}"))));
        return;
    }

    let session_id: AcpSessionId =
        match connection.new_session(NewSessionRequest::new(working_dir.to_path_buf())).await {
            Ok(resp) => resp.session_id,
            Err(e) => {
                let _ = ready_tx.send(Err(AdapterError::Protocol(format!("new_session failed: {e:?}"))));
                return;
            }
        };

    if ready_tx.send(Ok(())).is_err() {
        return;
    }

    // Shared via `Rc` (methods take `&self`) so the turn itself can run on
    // a separately spawned local task while this loop keeps servicing
    // `Cancel` — a `session/prompt` call does not resolve until the whole
    // turn ends, so awaiting it inline here would starve `Cancel` for the
    // turn's entire duration (§4.3, §5 Cancellation).
    let connection = Rc::new(connection);

    loop {
        tokio::select! {
            command = commands_rx.recv() => {
                match command {
                    Some(AgentCommand::Prompt { text, attachments, reply }) => {
                        let mut blocks = vec![AcpContentBlock::Text(TextContent::new(text))];
                        for attachment in attachments {
                            blocks.push(AcpContentBlock::Text(TextContent::new(format!(
                                "[image:{}]",
                                attachment.image_id
                            ))));
                        }
                        let request = PromptRequest::new(session_id.clone(), blocks);
                        // Ack dispatch, not completion (§4.3 "Prompt(...) → async
                        // notification stream", §5 "non-blocking"): the caller
                        // learns the turn has started, and finds out it ended
                        // via `AdapterEvent::PromptComplete` off the spawned task.
                        let _ = reply.send(Ok(()));
                        let turn_connection = Rc::clone(&connection);
                        let turn_events = events_tx.clone();
                        tokio::task::spawn_local(async move {
                            match turn_connection.prompt(request).await {
                                Ok(response) => {
                                    let cancelled = response.stop_reason == StopReason::Cancelled;
                                    let _ = turn_events.send(AdapterEvent::PromptComplete { cancelled }).await;
                                }
                                Err(e) => {
                                    warn!("prompt turn failed: {e:?}");
                                    let _ = turn_events.send(AdapterEvent::PromptComplete { cancelled: false }).await;
                                }
                            }
                        });
                    }
                    Some(AgentCommand::Cancel) => {
                        // A notification, not a request: the agent is required to
                        // answer the *outstanding* `session/prompt` call with
                        // `StopReason::Cancelled` once it stops, so the spawned
                        // turn task above reports completion — sending one here
                        // too would double-emit `prompt_complete` for the turn.
                        if let Err(e) = connection.cancel(session_id.clone()).await {
                            warn!("cancel failed: {e:?}");
                        }
                    }
                    Some(AgentCommand::Shutdown) | None => break,
                }
            }
            status = child.wait() => {
                let error = match status {
                    Ok(status) if status.success() => None,
                    Ok(status) => Some(format!("agent exited with {status}")),
                    Err(e) => Some(format!("failed to wait on agent: {e}")),
                };
                if error.is_some() {
                    error!(?error, "agent subprocess exited abnormally");
                }
                let _ = events_tx.send(AdapterEvent::Exited { error }).await;
                break;
            }
        }
    }

    let _ = exited_tx.send(true);
    let _ = child.kill().await;
}

/// Implements `agent_client_protocol::Client`, translating every
/// notification into an [`AdapterEvent`] sent to the main runtime.
struct AdapterClient {
    events: mpsc::Sender<AdapterEvent>,
}

#[async_trait(?Send)]
impl agent_client_protocol::Client for AdapterClient {
    async fn request_permission(
        &self,
        args: RequestPermissionRequest,
    ) -> agent_client_protocol::Result<RequestPermissionResponse> {
        let options: Vec<PermissionOption> = args
            .options
            .iter()
            .map(|o| PermissionOption { id: o.option_id.0.to_string(), label: o.name.clone() })
            .collect();
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = PermissionRequest {
            request_id: uuid::Uuid::new_v4().to_string(),
            tool_call_id: args.tool_call.tool_call_id.0.to_string(),
            options,
            reply: reply_tx,
        };
        if self.events.send(AdapterEvent::PermissionRequest(request)).await.is_err() {
            return Ok(RequestPermissionResponse::new(RequestPermissionOutcome::Cancelled));
        }
        match reply_rx.await {
            Ok(option_id) => Ok(RequestPermissionResponse::new(RequestPermissionOutcome::Selected(
                SelectedPermissionOutcome::new(PermissionOptionId::new(option_id)),
            ))),
            Err(_) => Ok(RequestPermissionResponse::new(RequestPermissionOutcome::Cancelled)),
        }
    }

    async fn session_notification(
        &self,
        notification: SessionNotification,
    ) -> agent_client_protocol::Result<()> {
        let event = match notification.update {
            SessionUpdate::AgentMessageChunk(chunk) => text_of(&chunk.content)
                .map(|text| AdapterEvent::AgentMessageChunk { text }),
            SessionUpdate::AgentThoughtChunk(chunk) => {
                text_of(&chunk.content).map(|text| AdapterEvent::AgentThoughtChunk { text })
            }
            SessionUpdate::ToolCall(call) => Some(AdapterEvent::ToolCall {
                id: call.tool_call_id.0.to_string(),
                title: call.title.clone(),
                status: tool_status(&call.status),
            }),
            SessionUpdate::ToolCallUpdate(update) => Some(AdapterEvent::ToolCallUpdate {
                id: update.tool_call_id.0.to_string(),
                status: update.status.map(|s| tool_status(&s)).unwrap_or(ToolCallStatus::Running),
            }),
            SessionUpdate::Plan(plan) => Some(AdapterEvent::Plan {
                entries: plan
                    .entries
                    .iter()
                    .map(|e| PlanEntry { text: e.content.clone(), done: e.status.is_completed() })
                    .collect(),
            }),
            _ => None,
        };
        if let Some(event) = event {
            let _ = self.events.send(event).await;
        }
        Ok(())
    }
}

fn text_of(content: &AcpContentBlock) -> Option<String> {
    match content {
        AcpContentBlock::Text(text) => Some(text.text.clone()),
        _ => None,
    }
}

fn tool_status(status: &agent_client_protocol::ToolCallStatus) -> ToolCallStatus {
    use agent_client_protocol::ToolCallStatus as Acp;
    match status {
        Acp::Pending => ToolCallStatus::Pending,
        Acp::InProgress => ToolCallStatus::Running,
        Acp::Completed => ToolCallStatus::Completed,
        Acp::Failed => ToolCallStatus::Failed,
    }
}

#[cfg(test)]
#[path = "acp_adapter_tests.rs"]
mod tests;

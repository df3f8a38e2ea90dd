// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! [`BackgroundSession`] (§4.4) — the heart of the system. Owns one ACP
//! subprocess via [`AcpAdapter`], assigns every event's `seq` from a single
//! atomic counter, drives the [`MarkdownBuffer`], persists flushed events
//! through the [`Store`], and fans out to attached [`Observer`]s.
//!
//! Grounded on the teacher's `Session::run` (one `tokio::select!` loop per
//! session driving a PTY plus its observers); here the loop drives a reader
//! task pumping [`AdapterEvent`]s instead of PTY bytes, and attach/detach/
//! load_events are plain lock-holding async methods rather than select!
//! arms, since they don't need to interleave with agent traffic.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::action_buttons::{default_classifier, ActionButton, ActionButtonClassifier};
use super::event_buffer::EventBuffer;
use crate::acp_adapter::{AcpAdapter, AdapterError, AdapterEvent, Attachment, PermissionRequest};
use crate::config::Config;
use crate::error::ErrorKind;
use crate::event::{Event, EventKind, PermissionRequestParams};
use crate::markdown_buffer::{FlushedMessage, MarkdownBuffer};
use crate::observer::Observer;
use crate::queue::WorkspaceQueue;
use crate::store::{ActionButtonStore, AcpBinding, Metadata, SessionLock, Store, StoreError};

/// Shared collaborators a [`BackgroundSession`] needs at construction.
/// Bundled so `SessionManager` doesn't have to repeat four-argument calls
/// at every spawn/resume site.
#[derive(Clone)]
pub struct SessionParams {
    pub store: Arc<Store>,
    pub config: Arc<Config>,
    pub workspace_queue: Option<Arc<WorkspaceQueue>>,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error("session {0} is archived; unarchive it before resuming")]
    Archived(String),
}

/// A page of history returned by [`BackgroundSession::load_events`].
pub struct LoadEventsResult {
    pub events: Vec<Event>,
    pub last_seq: u64,
    pub has_more: bool,
    /// `true` when this page was fetched backwards from `before_seq`
    /// (older history prepended above the currently-rendered page) rather
    /// than forwards from `after_seq`.
    pub is_prepend: bool,
}

struct PromptInFlight {
    prompt_id: String,
    client_id: String,
    /// `seq` of the `user_prompt` event that opened this turn, used to
    /// compute `prompt_complete`'s `event_count`.
    start_seq: u64,
}

struct SessionState {
    observers: Vec<Arc<dyn Observer>>,
    is_prompting: Option<PromptInFlight>,
    event_buffer: EventBuffer,
    markdown_buffer: MarkdownBuffer,
    action_buttons: Vec<ActionButton>,
    action_button_classifier: ActionButtonClassifier,
    pending_permissions: HashMap<String, PermissionRequest>,
    metadata: Metadata,
    /// Snapshot of `metadata.advanced_settings` taken when this session
    /// instance started. `update_settings` persists into `metadata`
    /// immediately but deliberately leaves this copy untouched — §6: "a
    /// flag takes effect on the next session start ..., never mid-session."
    active_settings: std::collections::BTreeMap<String, bool>,
    /// Plain-text (tags stripped) of the most recently flushed
    /// `agent_message`, fed to the action-button classifier once a prompt
    /// completes.
    last_agent_text: Option<String>,
}

/// Owns one session's runtime: the ACP subprocess, in-memory state, and the
/// set of attached observers. Lives for as long as the session is resident
/// (i.e. not archived); archiving tears the adapter down and drops this
/// instance from [`crate::manager::SessionManager`]'s registry.
pub struct BackgroundSession {
    id: String,
    store: Arc<Store>,
    config: Arc<Config>,
    seq: AtomicU64,
    state: Mutex<SessionState>,
    adapter: Mutex<Option<AcpAdapter>>,
    adapter_active: AtomicBool,
    /// Set before a deliberate teardown (archive) so the reader task's
    /// observation of the adapter disappearing isn't mistaken for an
    /// unexpected agent crash.
    closing: AtomicBool,
    shutdown: CancellationToken,
    lock: Mutex<Option<SessionLock>>,
    reader_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    /// Pinged on every agent text chunk; the inactivity-flush task (§5:
    /// "one timer driving MarkdownBuffer SafeFlush on inactivity") debounces
    /// on this to force out a buffer stuck mid-structure once the agent
    /// goes quiet, rather than holding it until the next forced trigger.
    activity: Arc<tokio::sync::Notify>,
    workspace_queue: Option<Arc<WorkspaceQueue>>,
}

impl BackgroundSession {
    /// Create a brand-new session: write its metadata, acquire its lock,
    /// and spawn its agent subprocess.
    pub async fn spawn_new(
        params: SessionParams,
        name: String,
        working_dir: PathBuf,
        acp: AcpBinding,
    ) -> Result<Arc<Self>, SessionError> {
        let meta = Metadata {
            id: crate::store::new_session_id(),
            name,
            working_dir,
            acp,
            created_at: chrono::Utc::now(),
            archived: false,
            archived_at: None,
            last_seq: 0,
            advanced_settings: crate::settings::defaults(),
        };
        params.store.create(&meta).await?;
        Self::start_with_metadata(params, meta).await
    }

    /// Resume a non-archived session after process restart: re-acquire its
    /// lock (stealing a stale one if needed) and respawn its agent.
    pub async fn resume(params: SessionParams, session_id: &str) -> Result<Arc<Self>, SessionError> {
        let meta = params.store.get_metadata(session_id).await?;
        if meta.archived {
            return Err(SessionError::Archived(session_id.to_owned()));
        }
        Self::start_with_metadata(params, meta).await
    }

    /// Bring an archived session back: clear the archived flag, then start
    /// it exactly like `resume`. `seq` continues from `metadata.last_seq`,
    /// never resets (§4.4 "seq resumes at persisted_last_seq + 1").
    pub async fn unarchive(params: SessionParams, session_id: &str) -> Result<Arc<Self>, SessionError> {
        let mut meta = params.store.get_metadata(session_id).await?;
        meta.archived = false;
        meta.archived_at = None;
        params.store.update_metadata(session_id, &meta).await?;
        Self::start_with_metadata(params, meta).await
    }

    async fn start_with_metadata(params: SessionParams, meta: Metadata) -> Result<Arc<Self>, SessionError> {
        let SessionParams { store, config, workspace_queue } = params;
        let lock = store
            .try_acquire_lock(&meta.id, config.lock_heartbeat_interval(), config.lock_stale_threshold())
            .await?;
        let (adapter, events_rx) =
            AcpAdapter::spawn(&meta.acp, &meta.working_dir, config.handshake_timeout()).await?;
        let action_buttons = ActionButtonStore::read(store.root(), &meta.id);
        let seq = meta.last_seq;
        let id = meta.id.clone();
        let active_settings = meta.advanced_settings.clone();
        let lock_stolen = lock.stolen_receiver();

        let session = Arc::new(Self {
            id,
            store,
            config: Arc::clone(&config),
            seq: AtomicU64::new(seq),
            state: Mutex::new(SessionState {
                observers: Vec::new(),
                is_prompting: None,
                event_buffer: EventBuffer::new(512),
                markdown_buffer: MarkdownBuffer::new(config.markdown_flush_timeout()),
                action_buttons,
                action_button_classifier: Box::new(default_classifier),
                pending_permissions: HashMap::new(),
                metadata: meta,
                active_settings,
                last_agent_text: None,
            }),
            adapter: Mutex::new(Some(adapter)),
            adapter_active: AtomicBool::new(true),
            closing: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            lock: Mutex::new(Some(lock)),
            reader_task: Mutex::new(None),
            activity: Arc::new(tokio::sync::Notify::new()),
            workspace_queue,
        });

        let reader_session = Arc::clone(&session);
        let reader_shutdown = session.shutdown.clone();
        let handle = tokio::spawn(run_reader(reader_session, events_rx, reader_shutdown));
        *session.reader_task.lock().await = Some(handle);

        tokio::spawn(run_inactivity_flush(Arc::clone(&session), session.shutdown.clone()));
        tokio::spawn(run_lock_watcher(Arc::clone(&session), lock_stolen, session.shutdown.clone()));

        Ok(session)
    }

    /// Test-only construction that skips [`AcpAdapter::spawn`] entirely,
    /// leaving the session with no adapter attached. Submitting a prompt
    /// then exercises exactly the "no agent attached" fatal path a real
    /// agent crash would also take — the session-runtime logic under test
    /// doesn't know the difference.
    #[cfg(test)]
    pub(crate) async fn start_for_test(params: SessionParams, meta: Metadata) -> Result<Arc<Self>, SessionError> {
        let SessionParams { store, config, workspace_queue } = params;
        let lock = store
            .try_acquire_lock(&meta.id, config.lock_heartbeat_interval(), config.lock_stale_threshold())
            .await?;
        let action_buttons = ActionButtonStore::read(store.root(), &meta.id);
        let seq = meta.last_seq;
        let id = meta.id.clone();
        let active_settings = meta.advanced_settings.clone();

        Ok(Arc::new(Self {
            id,
            store,
            config,
            seq: AtomicU64::new(seq),
            state: Mutex::new(SessionState {
                observers: Vec::new(),
                is_prompting: None,
                event_buffer: EventBuffer::new(512),
                markdown_buffer: MarkdownBuffer::new(Duration::from_millis(200)),
                action_buttons,
                action_button_classifier: Box::new(default_classifier),
                pending_permissions: HashMap::new(),
                metadata: meta,
                active_settings,
                last_agent_text: None,
            }),
            adapter: Mutex::new(None),
            adapter_active: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            lock: Mutex::new(Some(lock)),
            reader_task: Mutex::new(None),
            activity: Arc::new(tokio::sync::Notify::new()),
            workspace_queue,
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn current_seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    pub async fn metadata(&self) -> Metadata {
        self.state.lock().await.metadata.clone()
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Attach an observer: replay everything it missed (persisted history
    /// past its `last_sent_seq`, then anything buffered since), deliver any
    /// cached action buttons, and register it for live fan-out. Mirrors
    /// `attachObserver` / "replay buffered events with dedup" from §4.4.
    pub async fn attach(&self, observer: Arc<dyn Observer>) {
        let mut state = self.state.lock().await;
        let mut last_seq = observer.last_sent_seq();

        let persisted = self.store.read_events_after(&self.id, last_seq, usize::MAX).await.unwrap_or_default();
        for event in &persisted {
            if event.seq > last_seq {
                deliver(&observer, event, "");
                last_seq = event.seq;
            }
        }
        for event in state.event_buffer.events_after(last_seq) {
            deliver(&observer, &event, "");
            last_seq = event.seq;
        }

        if !state.action_buttons.is_empty() {
            observer.on_action_buttons(&state.action_buttons);
        }
        if self.adapter_active.load(Ordering::SeqCst) {
            observer.on_acp_started();
        }
        state.observers.push(observer);
    }

    pub async fn detach(&self, client_id: &str) {
        let mut state = self.state.lock().await;
        if let Some(pos) = state.observers.iter().position(|o| o.client_id() == client_id) {
            let observer = state.observers.remove(pos);
            observer.on_close("detached");
        }
    }

    /// A page of event history for scrollback, forwards from `after_seq`
    /// or backwards from `before_seq` (mutually exclusive; `before_seq`
    /// wins if both are given).
    pub async fn load_events(
        &self,
        after_seq: Option<u64>,
        before_seq: Option<u64>,
        limit: usize,
    ) -> LoadEventsResult {
        let last_seq = self.current_seq();
        if let Some(before) = before_seq {
            let mut events = self.store.read_events_last(&self.id, limit + 1, Some(before)).await.unwrap_or_default();
            let has_more = events.len() > limit;
            if has_more {
                events = events.split_off(events.len() - limit);
            }
            return LoadEventsResult { events, last_seq, has_more, is_prepend: true };
        }
        let after = after_seq.unwrap_or(0);
        let mut events = self.store.read_events_after(&self.id, after, limit + 1).await.unwrap_or_default();
        let has_more = events.len() > limit;
        events.truncate(limit);
        LoadEventsResult { events, last_seq, has_more, is_prepend: false }
    }

    /// Submit a prompt on behalf of `client_id`. If a prompt is already in
    /// flight and this workspace's queue is enabled, the prompt is appended
    /// to the per-workspace FIFO instead (§6 "Queue configuration") and
    /// still acknowledged with `prompt_received` — it has been durably
    /// accepted, just not yet handed to the agent. With the queue disabled
    /// or full, the submission is rejected with `prompt_in_progress` (§4.4
    /// step 2, §8 S3). Either way persists and broadcasts the `user_prompt`
    /// event and forwards the prompt to the agent once accepted.
    pub async fn submit_prompt(
        self: &Arc<Self>,
        client_id: &str,
        prompt_id: &str,
        text: &str,
        image_ids: Vec<String>,
    ) {
        let mut state = self.state.lock().await;
        if state.is_prompting.is_some() {
            if let Some(queue) = &self.workspace_queue {
                match queue.enqueue(self.id.clone(), prompt_id.to_owned(), text.to_owned(), image_ids).await {
                    Ok(_) => {
                        if let Some(observer) = state.observers.iter().find(|o| o.client_id() == client_id) {
                            observer.on_prompt_received(prompt_id);
                        }
                    }
                    Err(_) => {
                        if let Some(observer) = state.observers.iter().find(|o| o.client_id() == client_id) {
                            observer.on_error("a prompt is already in progress", Some(ErrorKind::PromptInProgress));
                        }
                    }
                }
            } else if let Some(observer) = state.observers.iter().find(|o| o.client_id() == client_id) {
                observer.on_error("a prompt is already in progress", Some(ErrorKind::PromptInProgress));
            }
            return;
        }

        state.action_buttons.clear();
        ActionButtonStore::clear(self.store.root(), &self.id);

        let seq = self.next_seq();
        state.is_prompting =
            Some(PromptInFlight { prompt_id: prompt_id.to_owned(), client_id: client_id.to_owned(), start_seq: seq });
        let event = Event::new(seq, EventKind::UserPrompt { prompt_id: prompt_id.to_owned(), text: text.to_owned() });
        if !self.persist_only(&mut state, event.clone()).await {
            return;
        }
        for observer in &state.observers {
            deliver(observer, &event, client_id);
        }
        if let Some(observer) = state.observers.iter().find(|o| o.client_id() == client_id) {
            observer.on_prompt_received(prompt_id);
        }
        drop(state);

        let adapter = self.adapter.lock().await;
        let Some(adapter) = adapter.as_ref() else {
            drop(adapter);
            let mut state = self.state.lock().await;
            state.is_prompting = None;
            self.fatal(&mut state, ErrorKind::AgentExited, "no agent attached to this session".into()).await;
            return;
        };
        let attachments = image_ids.into_iter().map(|image_id| Attachment { image_id }).collect();
        let result = adapter.prompt(text.to_owned(), attachments).await;
        drop(adapter);
        if let Err(e) = result {
            let mut state = self.state.lock().await;
            state.is_prompting = None;
            if let Some(observer) = state.observers.iter().find(|o| o.client_id() == client_id) {
                observer.on_error(&e.to_string(), Some(ErrorKind::Internal));
            }
        }
    }

    /// Mark the session as mid-prompt without a real adapter round trip, so
    /// tests can exercise the "already prompting" guard in `submit_prompt`
    /// without a live agent subprocess to keep a prompt genuinely in flight.
    #[cfg(test)]
    pub(crate) async fn mark_prompting_for_test(&self, prompt_id: &str, client_id: &str) {
        let seq = self.next_seq();
        let mut state = self.state.lock().await;
        state.is_prompting =
            Some(PromptInFlight { prompt_id: prompt_id.to_owned(), client_id: client_id.to_owned(), start_seq: seq });
    }

    /// Feed one [`AdapterEvent`] straight through the session's dispatch
    /// path, exactly as the reader task would after receiving it from a
    /// live agent. Lets scenario tests (§8 S1/S2/S6) drive
    /// `BackgroundSession` without a real ACP subprocess.
    #[cfg(test)]
    pub(crate) async fn inject_adapter_event_for_test(self: &Arc<Self>, event: AdapterEvent) {
        self.handle_adapter_event(event).await;
    }

    /// Open a prompt turn exactly like `submit_prompt`'s first half
    /// (persist + broadcast `user_prompt`, mark `isPrompting`, ack the
    /// sender) without touching the adapter, so scenario tests can then
    /// drive the turn's remaining events via `inject_adapter_event_for_test`
    /// rather than needing a live agent subprocess.
    #[cfg(test)]
    pub(crate) async fn begin_prompt_for_test(self: &Arc<Self>, client_id: &str, prompt_id: &str, text: &str) {
        let mut state = self.state.lock().await;
        state.action_buttons.clear();
        ActionButtonStore::clear(self.store.root(), &self.id);
        let seq = self.next_seq();
        state.is_prompting =
            Some(PromptInFlight { prompt_id: prompt_id.to_owned(), client_id: client_id.to_owned(), start_seq: seq });
        let event = Event::new(seq, EventKind::UserPrompt { prompt_id: prompt_id.to_owned(), text: text.to_owned() });
        self.persist_and_broadcast(&mut state, event, client_id).await;
        if let Some(observer) = state.observers.iter().find(|o| o.client_id() == client_id) {
            observer.on_prompt_received(prompt_id);
        }
    }

    pub async fn cancel_prompt(&self) {
        let adapter = self.adapter.lock().await;
        if let Some(adapter) = adapter.as_ref() {
            adapter.cancel();
        }
    }

    pub async fn answer_permission(&self, request_id: &str, choice: &str) {
        let mut state = self.state.lock().await;
        if let Some(request) = state.pending_permissions.remove(request_id) {
            let seq = self.next_seq();
            let event = Event::new(
                seq,
                EventKind::PermissionAnswer { request_id: request_id.to_owned(), choice: choice.to_owned() },
            );
            self.persist_and_broadcast(&mut state, event, "").await;
            request.respond(choice.to_owned());
        }
    }

    /// Merge a settings update into metadata and persist it. Takes effect
    /// on the session's next start, not immediately (§6).
    pub async fn update_settings(&self, update: &BTreeMap<String, bool>) -> BTreeMap<String, bool> {
        let mut state = self.state.lock().await;
        crate::settings::apply_update(&mut state.metadata.advanced_settings, update);
        let meta = state.metadata.clone();
        if let Err(e) = self.store.update_metadata(&self.id, &meta).await {
            warn!(session = %self.id, error = %e, "failed to persist settings update");
        }
        for observer in &state.observers {
            observer.on_session_settings_updated(&meta.advanced_settings);
        }
        meta.advanced_settings
    }

    /// Archive this session: wait (bounded) for any in-flight prompt to
    /// finish, then tear down the adapter and release the lock. Returns
    /// `true` if the in-flight prompt finished gracefully before the
    /// timeout, `false` if the timeout forced the close.
    pub async fn archive(self: &Arc<Self>) -> bool {
        let graceful = self.wait_until_idle(self.config.archive_timeout()).await;
        let reason = if graceful { "archived" } else { "archived_timeout" };

        self.closing.store(true, Ordering::SeqCst);
        self.shutdown.cancel();
        {
            let mut adapter = self.adapter.lock().await;
            *adapter = None;
        }
        self.adapter_active.store(false, Ordering::SeqCst);

        if let Some(handle) = self.reader_task.lock().await.take() {
            let _ = handle.await;
        }

        let mut state = self.state.lock().await;
        if let Ok(mut meta) = self.store.get_metadata(&self.id).await {
            meta.archived = true;
            meta.archived_at = Some(chrono::Utc::now());
            if self.store.update_metadata(&self.id, &meta).await.is_ok() {
                state.metadata = meta;
            }
        }
        for observer in &state.observers {
            observer.on_acp_stopped(reason);
            observer.on_session_archived(true);
        }
        drop(state);

        if let Some(lock) = self.lock.lock().await.take() {
            lock.release().await;
        }

        graceful
    }

    /// Tear the session down for a reason other than archiving — a
    /// deliberate delete, a losing duplicate from a concurrent resume, or
    /// server shutdown (§4.5 CloseSessionGracefully). Unlike [`Self::archive`],
    /// metadata is left untouched: the caller decides separately whether
    /// the session still exists on disk afterward.
    pub async fn close_gracefully(self: &Arc<Self>, reason: &str, grace: Duration) -> bool {
        let graceful = self.wait_until_idle(grace).await;
        let wire_reason = if graceful { reason.to_owned() } else { format!("{reason}_timeout") };

        self.closing.store(true, Ordering::SeqCst);
        self.shutdown.cancel();
        {
            let mut adapter = self.adapter.lock().await;
            *adapter = None;
        }
        self.adapter_active.store(false, Ordering::SeqCst);

        if let Some(handle) = self.reader_task.lock().await.take() {
            let _ = handle.await;
        }

        let state = self.state.lock().await;
        for observer in &state.observers {
            observer.on_acp_stopped(&wire_reason);
            observer.on_close(&wire_reason);
        }
        drop(state);

        if let Some(lock) = self.lock.lock().await.take() {
            lock.release().await;
        }

        graceful
    }

    async fn wait_until_idle(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                {
                    let state = self.state.lock().await;
                    if state.is_prompting.is_none() {
                        return;
                    }
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .is_ok()
    }

    async fn handle_adapter_event(self: &Arc<Self>, event: AdapterEvent) {
        match event {
            AdapterEvent::AgentMessageChunk { text } => self.on_agent_text(text).await,
            AdapterEvent::AgentThoughtChunk { text } => {
                if self.verbose_thoughts_enabled().await {
                    self.on_forced_event(EventKind::AgentThought { text }).await;
                }
            }
            AdapterEvent::ToolCall { id, title, status } => {
                self.on_forced_event(EventKind::ToolCall { id, title, status }).await
            }
            AdapterEvent::ToolCallUpdate { id, status } => {
                self.on_forced_event(EventKind::ToolUpdate { id, status }).await
            }
            AdapterEvent::Plan { entries } => self.on_forced_event(EventKind::Plan { entries }).await,
            AdapterEvent::FileRead { path, size } => self.on_forced_event(EventKind::FileRead { path, size }).await,
            AdapterEvent::FileWrite { path, size } => self.on_forced_event(EventKind::FileWrite { path, size }).await,
            AdapterEvent::PermissionRequest(request) => self.on_permission_request(request).await,
            AdapterEvent::PromptComplete { cancelled } => self.on_prompt_complete(cancelled).await,
            AdapterEvent::Exited { error } => self.on_adapter_exited(error).await,
        }
    }

    async fn verbose_thoughts_enabled(&self) -> bool {
        let state = self.state.lock().await;
        crate::settings::is_enabled(&state.active_settings, "verbose_thoughts")
    }

    async fn on_agent_text(self: &Arc<Self>, text: String) {
        let mut state = self.state.lock().await;
        let seq = state.markdown_buffer.pending_seq().unwrap_or_else(|| self.next_seq());
        state.markdown_buffer.write(seq, &text);
        if let Some(flushed) = state.markdown_buffer.safe_flush() {
            self.emit_agent_message(&mut state, flushed).await;
        }
        drop(state);
        self.activity.notify_one();
    }

    /// A forced trigger (tool call, thought, file I/O, plan) first flushes
    /// any pending markdown regardless of structural position, then emits
    /// its own event under a fresh `seq` (§4.2 "forced triggers").
    async fn on_forced_event(self: &Arc<Self>, kind: EventKind) {
        let mut state = self.state.lock().await;
        if let Some(flushed) = state.markdown_buffer.flush() {
            self.emit_agent_message(&mut state, flushed).await;
        }
        let seq = self.next_seq();
        let event = Event::new(seq, kind);
        self.persist_and_broadcast(&mut state, event, "").await;
    }

    async fn emit_agent_message(&self, state: &mut SessionState, flushed: FlushedMessage) {
        state.last_agent_text = Some(strip_html_tags(&flushed.html));
        let event = Event::new(flushed.seq, EventKind::AgentMessage { html: flushed.html });
        self.persist_and_broadcast(state, event, "").await;
    }

    async fn on_permission_request(self: &Arc<Self>, request: PermissionRequest) {
        let mut state = self.state.lock().await;
        if should_auto_approve(&state.active_settings) {
            let option_id = request.options.first().map(|o| o.id.clone());
            drop(state);
            if let Some(option_id) = option_id {
                request.respond(option_id);
            } else {
                request.respond("approve");
            }
            return;
        }

        let seq = self.next_seq();
        let event = Event::new(
            seq,
            EventKind::PermissionRequest {
                request_id: request.request_id.clone(),
                params: PermissionRequestParams {
                    tool_call_id: request.tool_call_id.clone(),
                    options: request.options.clone(),
                },
            },
        );
        self.persist_and_broadcast(&mut state, event, "").await;
        state.pending_permissions.insert(request.request_id.clone(), request);
    }

    async fn on_prompt_complete(self: &Arc<Self>, cancelled: bool) {
        let mut state = self.state.lock().await;
        if let Some(flushed) = state.markdown_buffer.flush() {
            self.emit_agent_message(&mut state, flushed).await;
        }
        let seq = self.next_seq();
        let event_count = match state.is_prompting.as_ref() {
            Some(prompt) => seq.saturating_sub(prompt.start_seq) + 1,
            None => 0,
        };
        let event = Event::new(seq, EventKind::PromptComplete { event_count, cancelled });
        self.persist_and_broadcast(&mut state, event, "").await;
        state.is_prompting = None;
        let final_text = state.last_agent_text.clone();
        drop(state);

        self.spawn_action_button_worker(final_text);
        self.spawn_queue_drain_worker();
    }

    /// After the session becomes idle, wait `delay_seconds` (§6 "Queue
    /// configuration") then drain at most one queued entry destined for
    /// this session back through `submit_prompt`. A no-op when this
    /// workspace has no queue or the queue is empty.
    fn spawn_queue_drain_worker(self: &Arc<Self>) {
        let Some(queue) = self.workspace_queue.clone() else { return };
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let delay = queue.config().delay_seconds;
            if delay > 0 {
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }
            {
                let state = session.state.lock().await;
                if state.is_prompting.is_some() {
                    return;
                }
            }
            let Some(entry) = queue.drain_one(&session.id).await else { return };
            session.submit_prompt("", &entry.id, &entry.text, entry.image_ids).await;
        });
    }

    fn spawn_action_button_worker(self: &Arc<Self>, final_text: Option<String>) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let Some(text) = final_text else { return };
            let buttons = {
                let state = session.state.lock().await;
                (state.action_button_classifier)(&text)
            };
            if buttons.is_empty() {
                return;
            }
            let mut state = session.state.lock().await;
            state.action_buttons = buttons.clone();
            if let Err(e) = ActionButtonStore::write(session.store.root(), &session.id, &buttons) {
                warn!(session = %session.id, error = %e, "failed to persist action buttons");
            }
            for observer in &state.observers {
                observer.on_action_buttons(&buttons);
            }
        });
    }

    async fn on_adapter_exited(self: &Arc<Self>, error: Option<String>) {
        if self.closing.load(Ordering::SeqCst) {
            return;
        }
        let mut state = self.state.lock().await;
        let message = error.unwrap_or_else(|| "agent subprocess exited".to_owned());
        self.fatal(&mut state, ErrorKind::AgentExited, message).await;
    }

    async fn fatal(&self, state: &mut SessionState, kind: ErrorKind, message: String) {
        error!(session = %self.id, %message, "session closing fatally");
        let seq = self.next_seq();
        let event = Event::new(seq, EventKind::Error { message: message.clone(), kind: Some(kind.as_str().to_owned()) });
        let _ = self.store.append_event(&self.id, &event).await;
        for observer in &state.observers {
            deliver(observer, &event, "");
            if let Some(reason) = kind.stop_reason() {
                observer.on_acp_stopped(reason);
            }
            observer.on_close(kind.stop_reason().unwrap_or("internal"));
        }
        state.observers.clear();
        state.is_prompting = None;
        self.adapter_active.store(false, Ordering::SeqCst);
        self.shutdown.cancel();
    }

    async fn persist_only(&self, state: &mut SessionState, event: Event) -> bool {
        state.event_buffer.push(event.clone());
        if let Err(e) = self.store.append_event(&self.id, &event).await {
            self.fatal(state, ErrorKind::StoreError, format!("store write failed: {e}")).await;
            return false;
        }
        true
    }

    async fn persist_and_broadcast(&self, state: &mut SessionState, event: Event, origin_client_id: &str) {
        if !self.persist_only(state, event.clone()).await {
            return;
        }
        for observer in &state.observers {
            deliver(observer, &event, origin_client_id);
        }
    }
}

/// Dispatch one event to one observer, calling the matching `on_*` hook and
/// bumping `last_sent_seq`. `origin_client_id` marks which observer (if
/// any) authored a `user_prompt`, so each copy gets the right `is_mine`.
fn deliver(observer: &Arc<dyn Observer>, event: &Event, origin_client_id: &str) {
    let is_mine = !origin_client_id.is_empty() && observer.client_id() == origin_client_id;
    match &event.kind {
        EventKind::UserPrompt { text, .. } => observer.on_user_prompt(event.seq, text, is_mine),
        EventKind::AgentMessage { html } => observer.on_agent_message(event.seq, html),
        EventKind::AgentThought { text } => observer.on_agent_thought(event.seq, text),
        EventKind::ToolCall { id, title, status } => observer.on_tool_call(event.seq, id, title, *status),
        EventKind::ToolUpdate { id, status } => observer.on_tool_update(event.seq, id, *status),
        EventKind::Plan { entries } => observer.on_plan(event.seq, entries),
        EventKind::FileRead { path, size } => observer.on_file_read(event.seq, path, *size),
        EventKind::FileWrite { path, size } => observer.on_file_write(event.seq, path, *size),
        EventKind::PermissionRequest { request_id, params } => observer.on_permission(request_id, params),
        EventKind::PermissionAnswer { .. } => {}
        EventKind::Error { message, kind } => {
            observer.on_error(message, kind.as_deref().and_then(ErrorKind::parse));
        }
        EventKind::PromptComplete { event_count, .. } => observer.on_prompt_complete(*event_count),
    }
    if event.seq > observer.last_sent_seq() {
        observer.set_last_sent_seq(event.seq);
    }
}

fn should_auto_approve(settings: &BTreeMap<String, bool>) -> bool {
    crate::settings::is_enabled(settings, "auto_approve_edits")
        || crate::settings::is_enabled(settings, "auto_approve_commands")
}

/// Cheap tag-stripper so the action-button classifier (which pattern
/// matches on plain-text numbered lists) sees the markdown-shaped text
/// rather than the rendered HTML. Not a general-purpose HTML sanitizer —
/// only ever fed output of our own renderer.
fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

async fn run_reader(
    session: Arc<BackgroundSession>,
    mut events_rx: tokio::sync::mpsc::Receiver<AdapterEvent>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events_rx.recv() => {
                match event {
                    Some(event) => session.handle_adapter_event(event).await,
                    None => {
                        session.on_adapter_exited(None).await;
                        break;
                    }
                }
            }
        }
    }
    debug!(session = %session.id, "session reader task exiting");
}

/// Drives the MarkdownBuffer's inactivity flush (§5: "one timer driving
/// MarkdownBuffer SafeFlush on inactivity"). Waits for either the
/// configured flush timeout to elapse with no new chunk, or `activity` to
/// fire (reset the wait), or shutdown. On a genuine timeout it calls
/// `safe_flush_on_timeout`, which still declines mid-structure but, unlike
/// the write-triggered `safe_flush`, doesn't also require a line/paragraph
/// boundary — the agent having gone quiet is itself the boundary.
async fn run_inactivity_flush(session: Arc<BackgroundSession>, shutdown: CancellationToken) {
    loop {
        let timeout = session.config.markdown_flush_timeout();
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = session.activity.notified() => continue,
            _ = tokio::time::sleep(timeout) => {
                let mut state = session.state.lock().await;
                if let Some(flushed) = state.markdown_buffer.safe_flush_on_timeout() {
                    session.emit_agent_message(&mut state, flushed).await;
                }
            }
        }
    }
}

/// Watches the session's lock for a takeover by another process (§7 "Lock
/// stolen"). A clean `archive`/`close_gracefully` aborts the heartbeat task
/// before it could ever observe a foreign pid, so this only ever fires for
/// a genuine steal — another process judged our heartbeat stale while we
/// were still very much alive (e.g. a long GC pause or a clock skew) and
/// took over the session out from under us.
async fn run_lock_watcher(
    session: Arc<BackgroundSession>,
    mut stolen: tokio::sync::watch::Receiver<bool>,
    shutdown: CancellationToken,
) {
    tokio::select! {
        _ = shutdown.cancelled() => {}
        result = stolen.wait_for(|stolen| *stolen) => {
            if result.is_ok() {
                let mut state = session.state.lock().await;
                session
                    .fatal(&mut state, ErrorKind::LockLost, "session lock was stolen by another process".into())
                    .await;
            }
        }
    }
}

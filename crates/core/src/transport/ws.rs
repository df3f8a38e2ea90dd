// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket handlers: the per-session attach point and the global
//! lifecycle-events channel (§6). Grounded on the teacher's
//! `transport/ws.rs` `ws_handler`/`handle_ws` shape — upgrade, look the
//! target up, then a `tokio::select!` loop bridging the session's fan-out
//! to the socket and the socket's inbound frames back into the session.
//! Unlike the teacher's raw-text bridge, every frame here is a typed
//! [`ClientMessage`]/[`ServerMessage`], so parse failures are a protocol
//! violation (§7) rather than opaque bytes to relay.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{auth, AppState};
use crate::client_link::ClientLink;
use crate::error::ErrorKind;
use crate::manager::ManagerEvent;
use crate::observer::Observer;
use crate::session::{BackgroundSession, SessionError};
use crate::store::{Metadata, Store, StoreError};
use crate::wire::{ClientMessage, ServerMessage, WireEvent};

#[derive(Debug, Clone, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// `GET /api/sessions/{id}/ws` (§6 "Per-session URL").
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Query(query): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    if let Err(kind) = auth::validate_token_param(query.token.as_deref(), state.config.auth_token.as_deref()) {
        return unauthorized(kind);
    }

    let session = match state.manager.get(&session_id).await {
        Some(session) => session,
        None => match state.manager.resume_session(&session_id).await {
            Ok(session) => session,
            // §7 S5 "archive-while-prompting": "subsequent attach returns
            // history with no ACP" — an archived session owns no
            // subprocess to resume, but its persisted log is still
            // readable, so serve that instead of refusing the attach.
            Err(SessionError::Archived(id)) => {
                return match state.store.get_metadata(&id).await {
                    Ok(meta) => ws
                        .on_upgrade(move |socket| handle_archived_socket(socket, Arc::clone(&state.store), meta))
                        .into_response(),
                    Err(e) => session_error_response(SessionError::from(e)),
                };
            }
            Err(e) => return session_error_response(e),
        },
    };

    let queue_size = state.config.observer_queue_size;
    ws.on_upgrade(move |socket| handle_session_socket(socket, session, queue_size)).into_response()
}

/// `GET /api/events` — session-lifecycle notifications only (§6). The
/// broadcast content is produced entirely by [`crate::manager::SessionManager`];
/// this handler only subscribes and forwards.
pub async fn events_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    if let Err(kind) = auth::validate_token_param(query.token.as_deref(), state.config.auth_token.as_deref()) {
        return unauthorized(kind);
    }
    let receiver = state.manager.subscribe();
    ws.on_upgrade(move |socket| handle_events_socket(socket, receiver)).into_response()
}

async fn handle_session_socket(socket: WebSocket, session: Arc<BackgroundSession>, queue_size: usize) {
    let client_id = Uuid::new_v4().to_string();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerMessage>(queue_size);
    let closed = CancellationToken::new();
    let link = Arc::new(ClientLink::new(session.id().to_owned(), client_id.clone(), outbound_tx, closed.clone()));

    session.attach(Arc::clone(&link) as Arc<dyn Observer>).await;

    let (mut ws_tx, mut ws_rx) = socket.split();
    loop {
        tokio::select! {
            _ = closed.cancelled() => break,
            outgoing = outbound_rx.recv() => {
                match outgoing {
                    Some(message) => {
                        let Ok(text) = serde_json::to_string(&message) else { continue };
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_message(&session, &client_id, &link, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(session = %session.id(), error = %e, "websocket read error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    session.detach(&client_id).await;
}

async fn handle_client_message(
    session: &Arc<BackgroundSession>,
    client_id: &str,
    link: &Arc<ClientLink>,
    text: &str,
) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(session = %session.id(), error = %e, "malformed client message");
            link.on_error("malformed message", Some(ErrorKind::BadRequest));
            link.close();
            return;
        }
    };

    match message {
        ClientMessage::Prompt { prompt_id, text, image_ids } => {
            session.submit_prompt(client_id, &prompt_id, &text, image_ids).await;
        }
        ClientMessage::Cancel => session.cancel_prompt().await,
        ClientMessage::PermissionAnswer { request_id, choice } => {
            session.answer_permission(&request_id, &choice).await;
        }
        ClientMessage::LoadEvents { after_seq, before_seq, limit } => {
            let limit = limit.unwrap_or(200);
            let result = session.load_events(after_seq, before_seq, limit).await;
            let is_prepend = result.is_prepend;
            link.send_direct(ServerMessage::EventsLoaded {
                events: result.events.iter().map(WireEvent::from_event).collect(),
                last_seq: result.last_seq,
                has_more: result.has_more,
                is_prepend,
            });
        }
        ClientMessage::Keepalive { client_time } => {
            link.send_direct(ServerMessage::KeepaliveAck {
                client_time,
                server_time: chrono::Utc::now().timestamp_millis(),
                server_max_seq: session.current_seq(),
            });
        }
    }
}

/// Serves an archived session's read-only history: no [`BackgroundSession`]
/// is attached (there is no subprocess to own), so `load_events`/`keepalive`
/// are answered directly from the [`Store`], and any message that implies a
/// live agent (`prompt`, `cancel`, `permission_answer`) gets `error{kind:
/// "archived"}` rather than being silently swallowed (§7 "subsequent attach
/// returns history with no ACP").
async fn handle_archived_socket(socket: WebSocket, store: Arc<Store>, meta: Metadata) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    send_archived(&mut ws_tx, ServerMessage::SessionArchived { archived: true }).await;

    while let Some(incoming) = ws_rx.next().await {
        let text = match incoming {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            _ => continue,
        };
        let message: ClientMessage = match serde_json::from_str(&text) {
            Ok(message) => message,
            Err(_) => {
                let err = ServerMessage::Error { message: "malformed message".into(), kind: Some("bad_request".into()) };
                send_archived(&mut ws_tx, err).await;
                break;
            }
        };
        match message {
            ClientMessage::LoadEvents { after_seq, before_seq, limit } => {
                let limit = limit.unwrap_or(200);
                let (events, has_more, is_prepend) = if let Some(before) = before_seq {
                    let mut events =
                        store.read_events_last(&meta.id, limit + 1, Some(before)).await.unwrap_or_default();
                    let has_more = events.len() > limit;
                    if has_more {
                        events = events.split_off(events.len() - limit);
                    }
                    (events, has_more, true)
                } else {
                    let after = after_seq.unwrap_or(0);
                    let mut events = store.read_events_after(&meta.id, after, limit + 1).await.unwrap_or_default();
                    let has_more = events.len() > limit;
                    events.truncate(limit);
                    (events, has_more, false)
                };
                let loaded = ServerMessage::EventsLoaded {
                    events: events.iter().map(WireEvent::from_event).collect(),
                    last_seq: meta.last_seq,
                    has_more,
                    is_prepend,
                };
                send_archived(&mut ws_tx, loaded).await;
            }
            ClientMessage::Keepalive { client_time } => {
                let ack = ServerMessage::KeepaliveAck {
                    client_time,
                    server_time: chrono::Utc::now().timestamp_millis(),
                    server_max_seq: meta.last_seq,
                };
                send_archived(&mut ws_tx, ack).await;
            }
            ClientMessage::Prompt { .. } | ClientMessage::Cancel | ClientMessage::PermissionAnswer { .. } => {
                let err = ServerMessage::Error {
                    message: "session is archived; unarchive it first".into(),
                    kind: Some(ErrorKind::Archived.as_str().to_owned()),
                };
                send_archived(&mut ws_tx, err).await;
            }
        }
    }
}

async fn send_archived(
    tx: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    message: ServerMessage,
) {
    if let Ok(text) = serde_json::to_string(&message) {
        let _ = tx.send(Message::Text(text.into())).await;
    }
}

async fn handle_events_socket(socket: WebSocket, mut receiver: tokio::sync::broadcast::Receiver<ManagerEvent>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    loop {
        tokio::select! {
            event = receiver.recv() => {
                match event {
                    Ok(event) => {
                        let Ok(text) = serde_json::to_string(&event) else { continue };
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}

fn unauthorized(kind: ErrorKind) -> Response {
    (StatusCode::UNAUTHORIZED, Json(serde_json::json!({ "message": "unauthorized", "kind": kind.as_str() })))
        .into_response()
}

fn session_error_response(err: SessionError) -> Response {
    match err {
        SessionError::Store(StoreError::NotFound(id)) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "message": format!("session {id} not found"), "kind": "not_found" })),
        )
            .into_response(),
        SessionError::Archived(id) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "message": format!("session {id} is archived"), "kind": "archived" })),
        )
            .into_response(),
        other => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "message": other.to_string(), "kind": "internal" })),
        )
            .into_response(),
    }
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bearer-token auth, lifted near-verbatim from the teacher's
//! `transport/auth.rs`: constant-time comparison, an HTTP middleware layer
//! for everything except the health check and WebSocket upgrades (which
//! authenticate via a `?token=` query parameter instead, since browser
//! WebSocket clients cannot set an `Authorization` header).

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::AppState;
use crate::error::ErrorKind;

fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

pub fn validate_bearer(headers: &HeaderMap, expected: Option<&str>) -> Result<(), ErrorKind> {
    let Some(expected) = expected else { return Ok(()) };
    let header =
        headers.get("authorization").and_then(|v| v.to_str().ok()).ok_or(ErrorKind::Unauthorized)?;
    let token = header.strip_prefix("Bearer ").ok_or(ErrorKind::Unauthorized)?;
    if constant_time_eq(token, expected) {
        Ok(())
    } else {
        Err(ErrorKind::Unauthorized)
    }
}

pub fn validate_token_param(token: Option<&str>, expected: Option<&str>) -> Result<(), ErrorKind> {
    let Some(expected) = expected else { return Ok(()) };
    match token {
        Some(token) if constant_time_eq(token, expected) => Ok(()),
        _ => Err(ErrorKind::Unauthorized),
    }
}

/// Exempt: `/healthz` and anything ending in `/ws` (query-param auth) or
/// the global events channel (same query scheme, checked in the handler).
pub async fn auth_layer(
    State(state): State<Arc<AppState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path();
    if path == "/healthz" || path.ends_with("/ws") || path == "/api/events" {
        return next.run(req).await;
    }
    if let Err(kind) = validate_bearer(req.headers(), state.config.auth_token.as_deref()) {
        let body = serde_json::json!({ "message": "unauthorized", "kind": kind.as_str() });
        return (StatusCode::UNAUTHORIZED, Json(body)).into_response();
    }
    next.run(req).await
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::HeaderMap;

use super::*;

#[test]
fn no_expected_token_means_auth_is_disabled() {
    assert!(validate_bearer(&HeaderMap::new(), None).is_ok());
    assert!(validate_token_param(None, None).is_ok());
}

#[test]
fn missing_header_is_rejected_when_a_token_is_expected() {
    assert_eq!(validate_bearer(&HeaderMap::new(), Some("secret")), Err(ErrorKind::Unauthorized));
}

#[test]
fn wrong_bearer_token_is_rejected() {
    let mut headers = HeaderMap::new();
    headers.insert("authorization", "Bearer nope".parse().unwrap());
    assert_eq!(validate_bearer(&headers, Some("secret")), Err(ErrorKind::Unauthorized));
}

#[test]
fn correct_bearer_token_is_accepted() {
    let mut headers = HeaderMap::new();
    headers.insert("authorization", "Bearer secret".parse().unwrap());
    assert!(validate_bearer(&headers, Some("secret")).is_ok());
}

#[test]
fn missing_query_token_is_rejected_when_a_token_is_expected() {
    assert_eq!(validate_token_param(None, Some("secret")), Err(ErrorKind::Unauthorized));
}

#[test]
fn correct_query_token_is_accepted() {
    assert!(validate_token_param(Some("secret"), Some("secret")).is_ok());
}

#[test]
fn wrong_query_token_is_rejected() {
    assert_eq!(validate_token_param(Some("nope"), Some("secret")), Err(ErrorKind::Unauthorized));
}

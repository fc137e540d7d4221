// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! HTTP route handlers for the simulated secret and session endpoints.
//!
//! | Method | Path | Handler | Description |
//! |--------|------|---------|-------------|
//! | GET | `/health` | [`health`] | Health check endpoint |
//! | POST | `/` | [`secrets_manager`] | `GetSecretValue` / `DescribeSecret`, selected by `x-amz-target` |
//! | POST | `/sessions` | [`create_session`] | Exchange a certificate for temporary credentials |
//!
//! Secret calls identify their caller with the `x-amz-security-token`
//! header. Bodies are parsed regardless of content type, so both
//! `application/json` and `application/x-amz-json-1.1` are accepted.

use std::sync::Arc;

use crate::application::AppState;
use crate::constants::{SECURITY_TOKEN_HEADER, TARGET_HEADER};
use crate::errors::AppError;
use crate::models::{Credential, SecretIdRequest, SessionRequest};

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use validator::Validate;

pub const GET_SECRET_VALUE: &str = "secretsmanager.GetSecretValue";
pub const DESCRIBE_SECRET: &str = "secretsmanager.DescribeSecret";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    GetSecretValue,
    DescribeSecret,
}

impl Operation {
    fn from_target(target: &str) -> Result<Self, AppError> {
        match target {
            GET_SECRET_VALUE => Ok(Self::GetSecretValue),
            DESCRIBE_SECRET => Ok(Self::DescribeSecret),
            other => Err(AppError::UnknownOperation(other.to_string())),
        }
    }
}

/// Health check endpoint.
///
/// # Response
///
/// ```json
/// {"status": "ok"}
/// ```
pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Secrets Manager style JSON endpoint.
///
/// # Errors
///
/// - [`AppError::UnknownOperation`] - missing or unsupported `x-amz-target`
/// - [`AppError::MissingToken`] - no `x-amz-security-token`
/// - [`AppError::ValidationError`] - malformed body
/// - [`AppError::Access`] - unknown token, unknown secret or access denied
#[tracing::instrument(skip(state, headers, body))]
pub async fn secrets_manager(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let operation = Operation::from_target(header(&headers, TARGET_HEADER).unwrap_or_default())?;
    let token = header(&headers, SECURITY_TOKEN_HEADER)
        .filter(|token| !token.is_empty())
        .ok_or(AppError::MissingToken)?;

    let request: SecretIdRequest = serde_json::from_slice(&body).map_err(|e| {
        tracing::error!("[stacks] malformed request body: {}", e);
        AppError::ValidationError(e.to_string())
    })?;
    request.validate().map_err(|e| {
        tracing::error!("[stacks] validation failed: {}", e);
        AppError::ValidationError(e.to_string())
    })?;

    tracing::debug!("[stacks] {:?} on {}", operation, request.secret_id);
    let response = match operation {
        Operation::GetSecretValue => {
            let value = state
                .cloud
                .get_secret_value(token, &request.secret_id)
                .await?;
            Json(value).into_response()
        }
        Operation::DescribeSecret => {
            let description = state
                .cloud
                .describe_secret(token, &request.secret_id)
                .await?;
            Json(description).into_response()
        }
    };
    Ok(response)
}

/// Exchanges a certificate issued by the private CA for temporary
/// credentials of the profile's role.
///
/// # Response
///
/// A [`Credential`] in credential-process format.
#[tracing::instrument(skip(state, request))]
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SessionRequest>,
) -> Result<Json<Credential>, AppError> {
    request.validate().map_err(|e| {
        tracing::error!("[stacks] validation failed: {}", e);
        AppError::ValidationError(e.to_string())
    })?;

    let session = state.cloud.create_session(&request).await?;
    Ok(Json(Credential::from(session.credentials())))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

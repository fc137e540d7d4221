// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! HTTP integration tests for the simulated secret and session endpoints.
//!
//! These tests use `axum-test` to test the full HTTP request/response cycle
//! through the Axum router with all middleware applied.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::sync::Arc;

use abac_stacks::application::create_router;
use abac_stacks::provider::SimulatedCloud;
use abac_stacks::resources::CaStatus;
use abac_stacks::scenario::{FunctionRole, deploy_in_memory, role_session_token, session_request};
use abac_stacks::stack::Environment;
use abac_stacks::tags::TagConfig;
use axum::body::Bytes;
use axum::http::{HeaderName, HeaderValue};
use axum_test::TestServer;

const TARGET: HeaderName = HeaderName::from_static("x-amz-target");
const TOKEN: HeaderName = HeaderName::from_static("x-amz-security-token");

struct Harness {
    server: TestServer,
    cloud: Arc<SimulatedCloud>,
    config: TagConfig,
}

fn config() -> TagConfig {
    TagConfig::from_slice(
        br#"{"name":"demo","appid":"app1","appfunc":"web","appenv":"dev","dataclassification":"internal"}"#,
    )
    .unwrap()
}

/// Creates a test server for HTTP integration testing.
///
/// Every stack is deployed into a fresh in-memory provider first. The
/// server includes the same middleware as production (body limit, timeout).
async fn create_test_server() -> Harness {
    let config = config();
    let (cloud, _) = deploy_in_memory(&config, &Environment::default(), CaStatus::Active)
        .await
        .unwrap();
    let server = TestServer::new(create_router(cloud.clone())).unwrap();
    Harness {
        server,
        cloud,
        config,
    }
}

async fn token(harness: &Harness, role: FunctionRole) -> HeaderValue {
    let token = role_session_token(&harness.cloud, role, "http-test")
        .await
        .unwrap();
    HeaderValue::from_str(&token).unwrap()
}

fn secret_id(harness: &Harness) -> serde_json::Value {
    serde_json::json!({"SecretId": harness.config.secret_name()})
}

// =============================================================================
// Health Endpoint Tests
// =============================================================================

#[tokio::test]
async fn test_health_endpoint_returns_status_ok_body() {
    let harness = create_test_server().await;
    let response = harness.server.get("/health").await;
    response.assert_status_ok();
    response.assert_json(&serde_json::json!({"status": "ok"}));
}

// =============================================================================
// Secret Endpoint Tests
// =============================================================================

#[tokio::test]
async fn test_allowed_role_reads_secret() {
    let harness = create_test_server().await;
    let response = harness
        .server
        .post("/")
        .add_header(TARGET, HeaderValue::from_static("secretsmanager.GetSecretValue"))
        .add_header(TOKEN, token(&harness, FunctionRole::Allowed).await)
        .json(&secret_id(&harness))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["Name"], "/app1/web/dev/demo");
    assert_eq!(body["VersionStages"][0], "AWSCURRENT");
    let secret: serde_json::Value =
        serde_json::from_str(body["SecretString"].as_str().unwrap()).unwrap();
    assert_eq!(secret["engine"], "mysql");
    assert_eq!(secret["port"], 3306);
    assert!(secret["password"].as_str().unwrap().len() >= 16);
}

#[tokio::test]
async fn test_describe_secret_lists_tags_and_rotation() {
    let harness = create_test_server().await;
    let response = harness
        .server
        .post("/")
        .add_header(TARGET, HeaderValue::from_static("secretsmanager.DescribeSecret"))
        .add_header(TOKEN, token(&harness, FunctionRole::Allowed).await)
        .json(&secret_id(&harness))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["RotationEnabled"], true);
    assert_eq!(body["RotationRules"]["AutomaticallyAfterDays"], 30);
    let tags = body["Tags"].as_array().unwrap();
    assert_eq!(tags.len(), 5);
    assert!(
        tags.iter()
            .any(|tag| tag["Key"] == "appenv" && tag["Value"] == "dev")
    );
}

#[tokio::test]
async fn test_not_allowed_role_is_denied() {
    let harness = create_test_server().await;
    let response = harness
        .server
        .post("/")
        .add_header(TARGET, HeaderValue::from_static("secretsmanager.GetSecretValue"))
        .add_header(TOKEN, token(&harness, FunctionRole::NotAllowed).await)
        .json(&secret_id(&harness))
        .await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["__type"], "AccessDeniedException");
}

#[tokio::test]
async fn test_unknown_secret_returns_400() {
    let harness = create_test_server().await;
    let response = harness
        .server
        .post("/")
        .add_header(TARGET, HeaderValue::from_static("secretsmanager.GetSecretValue"))
        .add_header(TOKEN, token(&harness, FunctionRole::Allowed).await)
        .json(&serde_json::json!({"SecretId": "/app1/web/dev/other"}))
        .await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["__type"], "ResourceNotFoundException");
}

#[tokio::test]
async fn test_missing_token_returns_403() {
    let harness = create_test_server().await;
    let response = harness
        .server
        .post("/")
        .add_header(TARGET, HeaderValue::from_static("secretsmanager.GetSecretValue"))
        .json(&secret_id(&harness))
        .await;
    response.assert_status(axum::http::StatusCode::FORBIDDEN);
    let body: serde_json::Value = response.json();
    assert_eq!(body["__type"], "UnrecognizedClientException");
}

#[tokio::test]
async fn test_unknown_token_returns_403() {
    let harness = create_test_server().await;
    let response = harness
        .server
        .post("/")
        .add_header(TARGET, HeaderValue::from_static("secretsmanager.GetSecretValue"))
        .add_header(TOKEN, HeaderValue::from_static("not-a-session"))
        .json(&secret_id(&harness))
        .await;
    response.assert_status(axum::http::StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_unknown_target_returns_400() {
    let harness = create_test_server().await;
    let response = harness
        .server
        .post("/")
        .add_header(TARGET, HeaderValue::from_static("secretsmanager.DeleteSecret"))
        .add_header(TOKEN, token(&harness, FunctionRole::Allowed).await)
        .json(&secret_id(&harness))
        .await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["__type"], "UnknownOperationException");
}

#[tokio::test]
async fn test_amz_json_content_type_is_accepted() {
    let harness = create_test_server().await;
    let body = serde_json::to_vec(&secret_id(&harness)).unwrap();
    let response = harness
        .server
        .post("/")
        .add_header(TARGET, HeaderValue::from_static("secretsmanager.DescribeSecret"))
        .add_header(TOKEN, token(&harness, FunctionRole::Allowed).await)
        .content_type("application/x-amz-json-1.1")
        .bytes(Bytes::from(body))
        .await;
    response.assert_status_ok();
}

#[tokio::test]
async fn test_invalid_json_returns_400() {
    let harness = create_test_server().await;
    let response = harness
        .server
        .post("/")
        .add_header(TARGET, HeaderValue::from_static("secretsmanager.GetSecretValue"))
        .add_header(TOKEN, token(&harness, FunctionRole::Allowed).await)
        .content_type("application/json")
        .bytes(Bytes::from("{invalid json"))
        .await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["__type"], "ValidationException");
}

#[tokio::test]
async fn test_previous_version_stage_returns_400() {
    let harness = create_test_server().await;
    let response = harness
        .server
        .post("/")
        .add_header(TARGET, HeaderValue::from_static("secretsmanager.GetSecretValue"))
        .add_header(TOKEN, token(&harness, FunctionRole::Allowed).await)
        .json(&serde_json::json!({
            "SecretId": harness.config.secret_name(),
            "VersionStage": "AWSPREVIOUS"
        }))
        .await;
    response.assert_status_bad_request();
}

#[tokio::test]
async fn test_current_version_stage_reads_secret() {
    let harness = create_test_server().await;
    let response = harness
        .server
        .post("/")
        .add_header(TARGET, HeaderValue::from_static("secretsmanager.GetSecretValue"))
        .add_header(TOKEN, token(&harness, FunctionRole::Allowed).await)
        .json(&serde_json::json!({
            "SecretId": harness.config.secret_name(),
            "VersionStage": "AWSCURRENT"
        }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["VersionStages"][0], "AWSCURRENT");
}

// =============================================================================
// Session Endpoint Tests
// =============================================================================

#[tokio::test]
async fn test_session_returns_credential_process_output() {
    let harness = create_test_server().await;
    let ca_arn = harness
        .cloud
        .parameters()
        .get(&harness.config.parameter_key(abac_stacks::tags::ParameterSuffix::CertificateAuthority))
        .await
        .unwrap();
    let certificate = harness
        .cloud
        .issue_certificate(&ca_arn, "onprem.workload")
        .await
        .unwrap();
    let request = session_request(&harness.cloud, &harness.config, certificate.certificate.clone())
        .await
        .unwrap();

    let response = harness.server.post("/sessions").json(&request).await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["Version"], 1);
    assert!(body["AccessKeyId"].as_str().unwrap().starts_with("ASIA"));

    // the issued token works against the secret endpoint
    let token = HeaderValue::from_str(body["SessionToken"].as_str().unwrap()).unwrap();
    let response = harness
        .server
        .post("/")
        .add_header(TARGET, HeaderValue::from_static("secretsmanager.GetSecretValue"))
        .add_header(TOKEN, token)
        .json(&secret_id(&harness))
        .await;
    response.assert_status_ok();
}

#[tokio::test]
async fn test_session_with_unknown_certificate_is_denied() {
    let harness = create_test_server().await;
    let request = session_request(
        &harness.cloud,
        &harness.config,
        "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n".to_string(),
    )
    .await
    .unwrap();
    let response = harness.server.post("/sessions").json(&request).await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["__type"], "AccessDeniedException");
}

#[tokio::test]
async fn test_session_with_malformed_arn_returns_400() {
    let harness = create_test_server().await;
    let response = harness
        .server
        .post("/sessions")
        .json(&serde_json::json!({
            "certificate": "pem",
            "trustAnchorArn": "trust-anchor-without-arn",
            "profileArn": "arn:aws:rolesanywhere:us-east-1:111111111111:profile/p",
            "roleArn": "arn:aws:iam::111111111111:role/r"
        }))
        .await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["__type"], "ValidationException");
}

// =============================================================================
// Request Body Size Limit Tests
// =============================================================================

/// Test POST with >1MB body returns HTTP 413 Payload Too Large.
#[tokio::test]
async fn test_oversized_request_body_returns_413() {
    let harness = create_test_server().await;
    let oversized_body = vec![b'a'; 1024 * 1024 + 1];
    let response = harness
        .server
        .post("/")
        .add_header(TARGET, HeaderValue::from_static("secretsmanager.GetSecretValue"))
        .content_type("application/json")
        .bytes(Bytes::from(oversized_body))
        .await;
    response.assert_status(axum::http::StatusCode::PAYLOAD_TOO_LARGE);
}

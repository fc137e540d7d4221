// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Runs the handler against a mock Secrets Manager endpoint.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use axum::Router;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use secret_workload::configuration::WorkloadOptions;
use secret_workload::errors::WorkloadError;
use secret_workload::handler::handle;
use serde_json::json;
use tokio::net::TcpListener;

const ARN: &str = "arn:aws:secretsmanager:us-east-1:111111111111:secret:/app1/web/dev/demo-AbCdEf";

async fn mock(headers: HeaderMap, body: String) -> Response {
    let request: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(request["SecretId"], ARN);

    let token = headers
        .get("x-amz-security-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let target = headers
        .get("x-amz-target")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    match (token, target) {
        ("denied", _) => (
            StatusCode::BAD_REQUEST,
            axum::Json(json!({
                "__type": "AccessDeniedException",
                "message": "not authorized to perform secretsmanager:DescribeSecret"
            })),
        )
            .into_response(),
        (_, "secretsmanager.DescribeSecret") => axum::Json(json!({
            "ARN": ARN,
            "Name": "/app1/web/dev/demo",
            "RotationEnabled": true
        }))
        .into_response(),
        ("postgres", "secretsmanager.GetSecretValue") => axum::Json(json!({
            "ARN": ARN,
            "VersionId": "v1",
            "SecretString": r#"{"engine":"postgres","host":"db","username":"u","password":"p"}"#
        }))
        .into_response(),
        (_, "secretsmanager.GetSecretValue") => axum::Json(json!({
            "ARN": ARN,
            "VersionId": "v1",
            "SecretString": r#"{"engine":"mysql","host":"db.cluster.local","port":3306,"username":"admin","password":"p4ss","database":"demo"}"#
        }))
        .into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn spawn_mock() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let app = Router::new().route("/", post(mock));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{address}")
}

fn options(endpoint: &str, token: &str) -> WorkloadOptions {
    WorkloadOptions {
        asm_arn: ARN.to_string(),
        endpoint: endpoint.to_string(),
        session_token: token.to_string(),
    }
}

#[tokio::test]
async fn test_accessible_secret() {
    let endpoint = spawn_mock().await;
    let report = handle(&options(&endpoint, "allowed")).await.unwrap();
    assert!(report.accessible);
    let connection = report.connection.unwrap();
    assert_eq!(connection.host, "db.cluster.local");
    assert_eq!(connection.port, 3306);
    assert_eq!(connection.dbname.as_deref(), Some("demo"));
}

#[tokio::test]
async fn test_denied_is_reported_not_raised() {
    let endpoint = spawn_mock().await;
    let report = handle(&options(&endpoint, "denied")).await.unwrap();
    assert!(!report.accessible);
    assert!(report.message.contains("secretsmanager:DescribeSecret"));
    assert!(report.connection.is_none());
}

#[tokio::test]
async fn test_wrong_engine_is_an_error() {
    let endpoint = spawn_mock().await;
    let err = handle(&options(&endpoint, "postgres")).await.unwrap_err();
    assert!(matches!(err, WorkloadError::InvalidSecret(_)));
}

// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Failures while ordering a build graph.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("duplicate node: {0}")]
    DuplicateNode(String),
    #[error("{node} depends on unknown node {missing}")]
    MissingDependency { node: String, missing: String },
    #[error("dependency cycle between: {0:?}")]
    Cycle(Vec<String>),
}

/// Failures of the shared parameter store.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("parameter {key} is already published by {owner}")]
    Collision { key: String, owner: String },
    #[error("parameter not found: {0}")]
    NotFound(String),
    #[error("parameter store unavailable: {0}")]
    Unavailable(String),
}

/// Declarative apply failures. Each one aborts the whole stack.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DeployError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("stack {stack} requires stack {missing} to be deployed first")]
    MissingStack { stack: String, missing: String },
    #[error("stack {0} is not deployed")]
    StackNotDeployed(String),
    #[error("stack {stack} is still required by {dependent}")]
    StackInUse { stack: String, dependent: String },
    #[error("{node} has no attribute {attribute}")]
    UnknownAttribute { node: String, attribute: String },
    #[error("{0} is not deployed")]
    UnresolvedReference(String),
    #[error("parameter {0} was not declared by the stack")]
    UndeclaredParameter(String),
    #[error("name collision: {kind} {name} already exists")]
    NameCollision { kind: String, name: String },
    #[error("validation failed for {node}: {reason}")]
    Validation { node: String, reason: String },
    #[error("{node}: certificate authority is {state}, expected {expected}")]
    AuthorityState {
        node: String,
        state: String,
        expected: String,
    },
    #[error("{0} has deletion protection enabled")]
    DeletionProtected(String),
    #[error("parameter {key} belongs to stack {owner}, which has no saved state")]
    UnknownOwner { key: String, owner: String },
}

/// Outcomes of a data-plane call that the provider refuses.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("{principal} is not authorized to perform {action} on {resource}")]
    AccessDenied {
        principal: String,
        action: String,
        resource: String,
    },
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("the security token included in the request is invalid")]
    InvalidToken,
    #[error("untrusted certificate: {0}")]
    UntrustedCertificate(String),
    #[error("{0}")]
    Validation(String),
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum AppError {
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Deploy(#[from] DeployError),
    #[error("missing security token")]
    MissingToken,
    #[error("unknown operation: {0}")]
    UnknownOperation(String),
    #[error("internal server error")]
    InternalServerError,
    #[error("validation error: {0}")]
    ValidationError(String),
    #[error("configuration error: {0}")]
    ConfigError(String),
    #[error("function failed: {0}")]
    Workload(String),
}

impl AppError {
    fn error_type(&self) -> &'static str {
        match self {
            Self::Access(AccessError::AccessDenied { .. }) => "AccessDeniedException",
            Self::Access(AccessError::NotFound(_)) => "ResourceNotFoundException",
            Self::Access(AccessError::InvalidToken) | Self::MissingToken => {
                "UnrecognizedClientException"
            }
            Self::Access(AccessError::UntrustedCertificate(_)) => "AccessDeniedException",
            Self::Access(AccessError::Validation(_)) | Self::ValidationError(_) => {
                "ValidationException"
            }
            Self::UnknownOperation(_) => "UnknownOperationException",
            Self::Deploy(_)
            | Self::InternalServerError
            | Self::ConfigError(_)
            | Self::Workload(_) => "InternalFailure",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Access(AccessError::InvalidToken) | Self::MissingToken => StatusCode::FORBIDDEN,
            Self::Access(_) | Self::UnknownOperation(_) | Self::ValidationError(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Deploy(_)
            | Self::InternalServerError
            | Self::ConfigError(_)
            | Self::Workload(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = match &self {
            Self::Deploy(_) | Self::ConfigError(_) | Self::Workload(_) => {
                "Internal Server Error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({"__type": self.error_type(), "message": message}));

        (status, body).into_response()
    }
}

impl From<serde_json::Error> for AppError {
    fn from(_source: serde_json::Error) -> Self {
        tracing::error!("{:?}", _source);
        AppError::InternalServerError
    }
}

impl From<std::io::Error> for AppError {
    fn from(_source: std::io::Error) -> Self {
        tracing::error!("{:?}", _source);
        AppError::InternalServerError
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_of(error: AppError) -> (StatusCode, serde_json::Value) {
        let response = error.into_response();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_access_denied_shape() {
        let (status, body) = body_of(AppError::Access(AccessError::AccessDenied {
            principal: "arn:aws:sts::111111111111:assumed-role/r/s".into(),
            action: "secretsmanager:GetSecretValue".into(),
            resource: "arn:aws:secretsmanager:us-east-1:111111111111:secret:x".into(),
        }))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["__type"], "AccessDeniedException");
        assert!(
            body["message"]
                .as_str()
                .unwrap()
                .contains("secretsmanager:GetSecretValue")
        );
    }

    #[tokio::test]
    async fn test_missing_token_is_forbidden() {
        let (status, body) = body_of(AppError::MissingToken).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["__type"], "UnrecognizedClientException");
    }

    #[tokio::test]
    async fn test_internal_errors_hide_details() {
        let (status, body) = body_of(AppError::ConfigError("secret path".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Internal Server Error");
    }

    #[test]
    fn test_deploy_error_from_graph_error() {
        let err: DeployError = GraphError::Cycle(vec!["A".into(), "B".into()]).into();
        assert_eq!(err.to_string(), "dependency cycle between: [\"A\", \"B\"]");
    }
}

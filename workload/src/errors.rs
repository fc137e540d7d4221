// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

#[derive(thiserror::Error, Debug)]
pub enum WorkloadError {
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("{kind}: {message}")]
    Service { kind: String, message: String },
    #[error("invalid secret: {0}")]
    InvalidSecret(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl WorkloadError {
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Self::AccessDenied(_))
    }
}

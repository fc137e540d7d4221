// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Minimal Secrets Manager JSON client. The caller is identified by its
//! session token; requests are not signed.

use reqwest::Client;
use serde::de::DeserializeOwned;

use crate::constants::{
    ACCESS_DENIED, CONNECT_TIMEOUT, CONTENT_TYPE, DESCRIBE_SECRET, GET_SECRET_VALUE,
    REQUEST_TIMEOUT, SECURITY_TOKEN_HEADER, TARGET_HEADER,
};
use crate::errors::WorkloadError;
use crate::models::{ErrorBody, SecretDescription, SecretIdRequest, SecretValue};

#[derive(Clone)]
pub struct SecretsManagerClient {
    client: Client,
    endpoint: String,
    session_token: String,
}

impl SecretsManagerClient {
    pub fn new(
        endpoint: impl Into<String>,
        session_token: impl Into<String>,
    ) -> Result<Self, WorkloadError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            session_token: session_token.into(),
        })
    }

    #[tracing::instrument(skip(self))]
    pub async fn describe_secret(&self, secret_id: &str) -> Result<SecretDescription, WorkloadError> {
        self.call(DESCRIBE_SECRET, secret_id).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_secret_value(&self, secret_id: &str) -> Result<SecretValue, WorkloadError> {
        self.call(GET_SECRET_VALUE, secret_id).await
    }

    async fn call<T: DeserializeOwned>(
        &self,
        target: &str,
        secret_id: &str,
    ) -> Result<T, WorkloadError> {
        let body = serde_json::to_vec(&SecretIdRequest { secret_id })?;
        let response = self
            .client
            .post(&self.endpoint)
            .header(TARGET_HEADER, target)
            .header(SECURITY_TOKEN_HEADER, &self.session_token)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;
        if status.is_success() {
            return Ok(serde_json::from_slice(&bytes)?);
        }

        let error: ErrorBody = serde_json::from_slice(&bytes).unwrap_or_else(|_| ErrorBody {
            kind: status.to_string(),
            message: String::from_utf8_lossy(&bytes).into_owned(),
        });
        tracing::warn!("[workload] {} failed with {}", target, error.kind);
        if error.kind == ACCESS_DENIED {
            Err(WorkloadError::AccessDenied(error.message))
        } else {
            Err(WorkloadError::Service {
                kind: error.kind,
                message: error.message,
            })
        }
    }
}

// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use crate::client::SecretsManagerClient;
use crate::configuration::WorkloadOptions;
use crate::errors::WorkloadError;
use crate::models::{ConnectionInfo, Report, SecretDict};

/// Describes the secret, reads it and validates the credentials it holds.
/// Denied access is a normal outcome reported as `accessible: false`; any
/// other failure is returned as an error.
#[tracing::instrument(skip(options), fields(secret = %options.asm_arn))]
pub async fn handle(options: &WorkloadOptions) -> Result<Report, WorkloadError> {
    let client = SecretsManagerClient::new(&options.endpoint, &options.session_token)?;
    match fetch(&client, &options.asm_arn).await {
        Ok(dict) => {
            tracing::info!("[workload] read credentials for host {}", dict.host);
            Ok(Report {
                secret_arn: options.asm_arn.clone(),
                accessible: true,
                message: "Secret is accessible and holds MySQL credentials.".to_string(),
                connection: Some(ConnectionInfo {
                    host: dict.host.clone(),
                    port: dict.port,
                    dbname: dict.dbname.clone(),
                    use_ssl: dict.ssl.use_ssl,
                }),
            })
        }
        Err(err) if err.is_access_denied() => {
            tracing::warn!("[workload] {}", err);
            Ok(Report {
                secret_arn: options.asm_arn.clone(),
                accessible: false,
                message: err.to_string(),
                connection: None,
            })
        }
        Err(err) => Err(err),
    }
}

async fn fetch(client: &SecretsManagerClient, arn: &str) -> Result<SecretDict, WorkloadError> {
    let description = client.describe_secret(arn).await?;
    tracing::debug!(
        "[workload] {} rotation enabled: {}",
        description.name,
        description.rotation_enabled
    );
    let value = client.get_secret_value(arn).await?;
    SecretDict::parse(&value.secret_string)
}

// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Drives the deployed application the way its two kinds of consumers do:
//! the function running as one of the sample roles, and an on-premises
//! workload exchanging a certificate for a session.

use std::path::Path;
use std::sync::Arc;

use secret_workload::configuration::WorkloadOptions;
use secret_workload::handler::handle;
use secret_workload::models::Report;

use crate::constants::{
    DEFAULT_REGION, DEFAULT_SIMULATED_ACCOUNT, LAMBDA_SERVICE, SAMPLE_APP_STACK,
};
use crate::errors::{AccessError, AppError, DeployError};
use crate::models::{Credential, SessionRequest};
use crate::parameters::{InMemoryParameterStore, JsonFileParameterStore, ParameterStore};
use crate::policy::Caller;
use crate::provider::{DeployReport, SimulatedCloud};
use crate::resources::CaStatus;
use crate::snapshot::StateFile;
use crate::stack::{App, Environment};
use crate::tags::{ParameterSuffix, TagConfig};
use crate::units::build_app_with;

/// Which sample role the function runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionRole {
    Allowed,
    NotAllowed,
}

impl FunctionRole {
    fn output(&self) -> &'static str {
        match self {
            Self::Allowed => "AllowedRoleArn",
            Self::NotAllowed => "NotAllowedRoleArn",
        }
    }
}

/// Provider for `environment`; unset values fall back to the simulated
/// account and the default region.
pub fn simulated_cloud(
    environment: &Environment,
    parameters: Arc<dyn ParameterStore>,
) -> SimulatedCloud {
    SimulatedCloud::new(
        environment
            .account
            .as_deref()
            .unwrap_or(DEFAULT_SIMULATED_ACCOUNT),
        environment.region.as_deref().unwrap_or(DEFAULT_REGION),
        parameters,
    )
}

/// Deploys every stack into a fresh provider backed by an in-memory
/// parameter store.
#[tracing::instrument(skip(config))]
pub async fn deploy_in_memory(
    config: &TagConfig,
    environment: &Environment,
    ca_status: CaStatus,
) -> Result<(Arc<SimulatedCloud>, Vec<DeployReport>), AppError> {
    let app = build_app_with(config, environment, ca_status).map_err(DeployError::from)?;
    let cloud = Arc::new(simulated_cloud(
        environment,
        Arc::new(InMemoryParameterStore::new()),
    ));
    let reports = cloud.deploy_app(&app).await?;
    Ok((cloud, reports))
}

/// Deploys every stack of `app` against the parameters in `parameters` and
/// the provider state in `state`, saving the state afterwards. Parameters
/// owned by a stack the saved state does not know are refused.
#[tracing::instrument(skip(app))]
pub async fn deploy_to_files(
    app: &App,
    environment: &Environment,
    parameters: &Path,
    state: &Path,
) -> Result<Vec<DeployReport>, AppError> {
    let file = StateFile::new(state);
    let saved = file.load().await.map_err(DeployError::from)?;
    let store = Arc::new(JsonFileParameterStore::new(parameters));
    for parameter in store.list().await.map_err(DeployError::from)? {
        if !saved.stacks.contains_key(&parameter.owner) {
            return Err(DeployError::UnknownOwner {
                key: parameter.key,
                owner: parameter.owner,
            }
            .into());
        }
    }

    let cloud = simulated_cloud(environment, store).with_state(saved);
    let result = cloud.deploy_app(app).await;
    // stacks applied before a failure stay deployed
    file.save(&cloud.snapshot().await)
        .await
        .map_err(DeployError::from)?;
    result.map_err(AppError::from)
}

/// Session for one of the sample roles. The allowed role is assumed by the
/// function service, the other one by an identity of the account.
#[tracing::instrument(skip(cloud))]
pub async fn role_session_token(
    cloud: &SimulatedCloud,
    role: FunctionRole,
    session_name: &str,
) -> Result<String, AppError> {
    let outputs = cloud.outputs(SAMPLE_APP_STACK).await?;
    let role_arn = outputs
        .get(role.output())
        .ok_or_else(|| AccessError::NotFound(role.output().to_string()))?;
    let caller = match role {
        FunctionRole::Allowed => Caller::Service(LAMBDA_SERVICE.to_string()),
        FunctionRole::NotAllowed => Caller::Identity {
            arn: format!("arn:{}:iam::{}:root", cloud.partition(), cloud.account()),
            account: cloud.account().to_string(),
        },
    };
    let session = cloud.assume_role(&caller, role_arn, session_name).await?;
    Ok(session.session_token.clone())
}

/// Runs the deployed function's code as `role` against `endpoint`.
#[tracing::instrument(skip(cloud, config))]
pub async fn invoke_function(
    cloud: &SimulatedCloud,
    config: &TagConfig,
    role: FunctionRole,
    endpoint: &str,
) -> Result<Report, AppError> {
    let function_name = config.function_name();
    let function = cloud
        .function(&function_name)
        .await
        .ok_or_else(|| AccessError::NotFound(function_name.clone()))?;
    let asm_arn = function
        .environment
        .get("ASM_ARN")
        .cloned()
        .ok_or_else(|| AppError::ConfigError(format!("{function_name} has no ASM_ARN")))?;

    let options = WorkloadOptions {
        asm_arn,
        endpoint: endpoint.to_string(),
        session_token: role_session_token(cloud, role, &function_name).await?,
    };
    let report = handle(&options).await.map_err(|e| {
        tracing::error!("[stacks] {} failed: {}", function_name, e);
        AppError::Workload(e.to_string())
    })?;
    tracing::info!(
        "[stacks] {} as {:?}: accessible={}",
        function_name,
        role,
        report.accessible
    );
    Ok(report)
}

/// Exchange request for the on-premises role with `certificate`.
pub async fn session_request(
    cloud: &SimulatedCloud,
    config: &TagConfig,
    certificate: String,
) -> Result<SessionRequest, AppError> {
    Ok(SessionRequest {
        certificate,
        trust_anchor_arn: parameter(cloud, config, ParameterSuffix::TrustAnchor).await?,
        profile_arn: parameter(cloud, config, ParameterSuffix::Profile).await?,
        role_arn: parameter(cloud, config, ParameterSuffix::OnPremRole).await?,
        duration_seconds: None,
    })
}

async fn parameter(
    cloud: &SimulatedCloud,
    config: &TagConfig,
    suffix: ParameterSuffix,
) -> Result<String, AppError> {
    let value = cloud
        .parameters()
        .get(&config.parameter_key(suffix))
        .await
        .map_err(DeployError::from)?;
    Ok(value)
}

/// Issues a certificate for `common_name` from the private CA and exchanges
/// it for credentials of the on-premises role.
#[tracing::instrument(skip(cloud, config))]
pub async fn on_prem_session(
    cloud: &SimulatedCloud,
    config: &TagConfig,
    common_name: &str,
) -> Result<Credential, AppError> {
    let ca_arn = parameter(cloud, config, ParameterSuffix::CertificateAuthority).await?;
    let certificate = cloud.issue_certificate(&ca_arn, common_name).await?;
    let request = session_request(cloud, config, certificate.certificate.clone()).await?;
    let session = cloud.create_session(&request).await?;
    Ok(Credential::from(session.credentials()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::AuthorityStatus;

    fn config() -> TagConfig {
        TagConfig::from_slice(
            br#"{"name":"demo","appid":"app1","appfunc":"web","appenv":"dev","dataclassification":"internal"}"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_sample_roles_differ_only_in_access() {
        let config = config();
        let (cloud, reports) = deploy_in_memory(&config, &Environment::default(), CaStatus::Active)
            .await
            .unwrap();
        assert_eq!(reports.len(), 3);

        let secret_arn = cloud
            .parameters()
            .get(&config.parameter_key(ParameterSuffix::Secret))
            .await
            .unwrap();

        let allowed = role_session_token(&cloud, FunctionRole::Allowed, "test")
            .await
            .unwrap();
        let value = cloud.get_secret_value(&allowed, &secret_arn).await.unwrap();
        assert!(value.secret_string.contains("\"engine\":\"mysql\""));

        let not_allowed = role_session_token(&cloud, FunctionRole::NotAllowed, "test")
            .await
            .unwrap();
        let denied = cloud
            .get_secret_value(&not_allowed, &secret_arn)
            .await
            .unwrap_err();
        assert!(matches!(denied, AccessError::AccessDenied { .. }));
    }

    #[tokio::test]
    async fn test_on_prem_session_reads_secret() {
        let config = config();
        let (cloud, _) = deploy_in_memory(&config, &Environment::default(), CaStatus::Active)
            .await
            .unwrap();
        let credential = on_prem_session(&cloud, &config, "onprem.workload")
            .await
            .unwrap();
        assert_eq!(credential.version, 1);

        let value = cloud
            .get_secret_value(&credential.session_token, &config.secret_name())
            .await
            .unwrap();
        assert!(!value.secret_string.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_authority_refuses_sessions() {
        let config = config();
        let (cloud, _) = deploy_in_memory(&config, &Environment::default(), CaStatus::Active)
            .await
            .unwrap();
        let ca_arn = parameter(&cloud, &config, ParameterSuffix::CertificateAuthority)
            .await
            .unwrap();
        let certificate = cloud
            .issue_certificate(&ca_arn, "onprem.workload")
            .await
            .unwrap();

        let app = build_app_with(&config, &Environment::default(), CaStatus::Disabled).unwrap();
        for stack in app.deploy_order().unwrap() {
            cloud.deploy(stack).await.unwrap();
        }
        assert_eq!(
            cloud.authority_status(&ca_arn).await,
            Some(AuthorityStatus::Disabled)
        );

        let request = session_request(&cloud, &config, certificate.certificate.clone())
            .await
            .unwrap();
        let err = cloud.create_session(&request).await.unwrap_err();
        assert!(matches!(err, AccessError::UntrustedCertificate(_)));
        assert!(matches!(
            on_prem_session(&cloud, &config, "other.workload").await,
            Err(AppError::Access(AccessError::Validation(_)))
        ));
    }
}

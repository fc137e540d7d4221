// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Data-plane calls of the simulated provider: role sessions, the
//! certificate exchange and the two secret reads.
//!
//! A secret read is authorized in two steps, the way the real services
//! chain them: the caller's role policies (intersected with any session
//! policies) must allow the Secrets Manager action with the role tags as
//! principal tags and the secret tags as resource tags, and the key policy
//! of the secret's KMS key must then allow `kms:Decrypt` through Secrets
//! Manager from the same account.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, SystemTime};

use aws_credential_types::Credentials;
use chrono::{DateTime, Utc};
use zeroize::ZeroizeOnDrop;

use crate::constants::{ROLE_SESSION_DURATION, ROLES_ANYWHERE_SERVICE};
use crate::errors::AccessError;
use crate::models::{
    CURRENT_STAGE, RotationRules, SecretDescription, SecretValue, SessionRequest, Tag,
};
use crate::policy::{Caller, PolicyDocument, RequestContext, evaluate};
use crate::provider::{
    AuthorityStatus, CloudState, DeployedResource, ResourceState, SimulatedCloud, pem, uuid,
};

const ROLE: &str = "AWS::IAM::Role";
const MANAGED_POLICY: &str = "AWS::IAM::ManagedPolicy";
const SECRET: &str = "AWS::SecretsManager::Secret";
const KMS_KEY: &str = "AWS::KMS::Key";
const AUTHORITY: &str = "AWS::ACMPCA::CertificateAuthority";
const TRUST_ANCHOR: &str = "AWS::RolesAnywhere::TrustAnchor";
const PROFILE: &str = "AWS::RolesAnywhere::Profile";
const CERTIFICATE_VALIDITY_DAYS: i64 = 365;

#[derive(Clone, ZeroizeOnDrop)]
pub struct Session {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    /// `arn:aws:sts::{account}:assumed-role/{role}/{session}`
    #[zeroize(skip)]
    pub arn: String,
    #[zeroize(skip)]
    pub role_arn: String,
    #[zeroize(skip)]
    pub session_name: String,
    /// Profile policies further limiting what the role may do.
    #[zeroize(skip)]
    pub session_policy_arns: Option<Vec<String>>,
    #[zeroize(skip)]
    pub expires_at: DateTime<Utc>,
}

// Custom Debug implementation to prevent accidental logging of sensitive data
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_key_id", &"[REDACTED]")
            .field("secret_access_key", &"[REDACTED]")
            .field("session_token", &"[REDACTED]")
            .field("arn", &self.arn)
            .field("session_policy_arns", &self.session_policy_arns)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Session {
    pub fn credentials(&self) -> Credentials {
        Credentials::new(
            self.access_key_id.clone(),
            self.secret_access_key.clone(),
            Some(self.session_token.clone()),
            Some(SystemTime::from(self.expires_at)),
            "roles-anywhere",
        )
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    pub serial: String,
    pub subject: String,
    /// ARN of the issuing certificate authority.
    pub issuer: String,
    pub certificate: String,
    pub not_after: DateTime<Utc>,
}

impl SimulatedCloud {
    /// `sts:AssumeRole` on behalf of `caller`, checked against the role's
    /// trust policy.
    #[tracing::instrument(skip(self))]
    pub async fn assume_role(
        &self,
        caller: &Caller,
        role_arn: &str,
        session_name: &str,
    ) -> Result<Session, AccessError> {
        let mut state = self.state.write().await;
        let role = state
            .find(ROLE, role_arn)
            .ok_or_else(|| AccessError::NotFound(role_arn.to_string()))?;
        let ResourceState::Role { name, trust, .. } = &role.state else {
            return Err(AccessError::NotFound(role_arn.to_string()));
        };
        if !trust.trusts(caller, "sts:AssumeRole") {
            return Err(AccessError::AccessDenied {
                principal: caller.arn().to_string(),
                action: "sts:AssumeRole".into(),
                resource: role_arn.to_string(),
            });
        }

        let session = self.new_session(role, name, session_name, ROLE_SESSION_DURATION, None);
        record_session(&mut state, &session);
        tracing::info!("[stacks] {} assumed {}", caller.arn(), session.arn);
        Ok(session)
    }

    /// Issues an end-entity certificate from an active authority.
    #[tracing::instrument(skip(self))]
    pub async fn issue_certificate(
        &self,
        ca_arn: &str,
        common_name: &str,
    ) -> Result<IssuedCertificate, AccessError> {
        let mut state = self.state.write().await;
        let status = match state.find(AUTHORITY, ca_arn).map(|r| &r.state) {
            Some(ResourceState::Authority { status }) => *status,
            _ => return Err(AccessError::NotFound(ca_arn.to_string())),
        };
        if status != AuthorityStatus::Active {
            return Err(AccessError::Validation(format!(
                "certificate authority {ca_arn} is {status}"
            )));
        }

        let serial = format!("{:032x}", fastrand::u128(..));
        let certificate = IssuedCertificate {
            subject: format!("CN={common_name}"),
            issuer: ca_arn.to_string(),
            certificate: pem("CERTIFICATE", &format!("{ca_arn}/{common_name}/{serial}")),
            not_after: Utc::now() + chrono::Duration::days(CERTIFICATE_VALIDITY_DAYS),
            serial: serial.clone(),
        };
        let now = Utc::now();
        state.certificates.retain(|_, issued| issued.not_after > now);
        state.certificates.insert(serial, certificate.clone());
        Ok(certificate)
    }

    /// Exchanges a certificate for role credentials through a trust anchor
    /// and profile.
    #[tracing::instrument(skip(self, request), fields(role = %request.role_arn))]
    pub async fn create_session(&self, request: &SessionRequest) -> Result<Session, AccessError> {
        let mut state = self.state.write().await;

        let certificate = state
            .certificates
            .values()
            .find(|c| c.certificate == request.certificate)
            .cloned()
            .ok_or_else(|| AccessError::UntrustedCertificate("unknown certificate".into()))?;
        if certificate.not_after <= Utc::now() {
            return Err(AccessError::UntrustedCertificate(format!(
                "certificate {} expired",
                certificate.serial
            )));
        }

        let anchor = state
            .find(TRUST_ANCHOR, &request.trust_anchor_arn)
            .ok_or_else(|| AccessError::NotFound(request.trust_anchor_arn.clone()))?;
        let ResourceState::TrustAnchor {
            certificate_authority_arn,
            enabled,
        } = &anchor.state
        else {
            return Err(AccessError::NotFound(request.trust_anchor_arn.clone()));
        };
        if !enabled {
            return Err(AccessError::UntrustedCertificate(
                "trust anchor is disabled".into(),
            ));
        }
        if certificate_authority_arn != &certificate.issuer {
            return Err(AccessError::UntrustedCertificate(format!(
                "certificate {} was not issued by the trust anchor source",
                certificate.serial
            )));
        }
        match state.find(AUTHORITY, &certificate.issuer).map(|r| &r.state) {
            Some(ResourceState::Authority {
                status: AuthorityStatus::Active,
            }) => {}
            _ => {
                return Err(AccessError::UntrustedCertificate(
                    "issuing authority is not active".into(),
                ));
            }
        }

        let denied = || AccessError::AccessDenied {
            principal: certificate.subject.clone(),
            action: "rolesanywhere:CreateSession".into(),
            resource: request.role_arn.clone(),
        };
        let profile = state
            .find(PROFILE, &request.profile_arn)
            .ok_or_else(|| AccessError::NotFound(request.profile_arn.clone()))?;
        let ResourceState::Profile {
            enabled,
            duration_seconds,
            managed_policy_arns,
            role_arns,
        } = &profile.state
        else {
            return Err(AccessError::NotFound(request.profile_arn.clone()));
        };
        if !enabled || !role_arns.contains(&request.role_arn) {
            return Err(denied());
        }

        let role = state
            .find(ROLE, &request.role_arn)
            .ok_or_else(|| AccessError::NotFound(request.role_arn.clone()))?;
        let ResourceState::Role { name, trust, .. } = &role.state else {
            return Err(AccessError::NotFound(request.role_arn.clone()));
        };
        let service = Caller::Service(ROLES_ANYWHERE_SERVICE.to_string());
        if !["sts:AssumeRole", "sts:TagSession"]
            .iter()
            .all(|action| trust.trusts(&service, action))
        {
            return Err(denied());
        }

        let duration = request
            .duration_seconds
            .unwrap_or(*duration_seconds)
            .min(*duration_seconds);
        let session_policies = if managed_policy_arns.is_empty() {
            None
        } else {
            Some(managed_policy_arns.clone())
        };
        let session = self.new_session(
            role,
            name,
            &certificate.serial,
            Duration::from_secs(duration),
            session_policies,
        );
        record_session(&mut state, &session);
        tracing::info!(
            "[stacks] certificate {} opened session {}",
            certificate.serial,
            session.arn
        );
        Ok(session)
    }

    /// The live session behind `token`.
    pub async fn caller(&self, token: &str) -> Result<Session, AccessError> {
        let state = self.state.read().await;
        match state.sessions.get(token) {
            Some(session) if !session.is_expired() => Ok(session.clone()),
            _ => Err(AccessError::InvalidToken),
        }
    }

    #[tracing::instrument(skip(self, token))]
    pub async fn describe_secret(
        &self,
        token: &str,
        secret_id: &str,
    ) -> Result<SecretDescription, AccessError> {
        let state = self.state.read().await;
        let session = live_session(&state, token)?;
        let secret = find_secret(&state, secret_id)?;
        self.authorize(&state, session, "secretsmanager:DescribeSecret", secret)?;

        let ResourceState::Secret(value) = &secret.state else {
            return Err(AccessError::NotFound(secret_id.to_string()));
        };
        Ok(SecretDescription {
            arn: secret.physical_id.clone(),
            name: value.name.clone(),
            kms_key_id: value.kms_key_id.clone(),
            rotation_enabled: value.rotation_days.is_some(),
            rotation_rules: value.rotation_days.map(|days| RotationRules {
                automatically_after_days: days,
            }),
            tags: secret
                .tags
                .iter()
                .map(|(key, value)| Tag {
                    key: key.to_string(),
                    value: value.to_string(),
                })
                .collect(),
            created_date: epoch_seconds(value.created),
        })
    }

    #[tracing::instrument(skip(self, token))]
    pub async fn get_secret_value(
        &self,
        token: &str,
        secret_id: &str,
    ) -> Result<SecretValue, AccessError> {
        let state = self.state.read().await;
        let session = live_session(&state, token)?;
        let secret = find_secret(&state, secret_id)?;
        self.authorize(&state, session, "secretsmanager:GetSecretValue", secret)?;

        let ResourceState::Secret(value) = &secret.state else {
            return Err(AccessError::NotFound(secret_id.to_string()));
        };
        self.authorize_decrypt(&state, session, &value.kms_key_id)?;

        tracing::info!("[stacks] {} read {}", session.arn, secret.physical_id);
        Ok(SecretValue {
            arn: secret.physical_id.clone(),
            name: value.name.clone(),
            version_id: value.version_id.clone(),
            secret_string: value.value.clone(),
            version_stages: vec![CURRENT_STAGE.to_string()],
            created_date: epoch_seconds(value.created),
        })
    }

    fn new_session(
        &self,
        role: &DeployedResource,
        role_name: &str,
        session_name: &str,
        duration: Duration,
        session_policy_arns: Option<Vec<String>>,
    ) -> Session {
        let duration = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::hours(1));
        Session {
            access_key_id: format!("ASIA{}", random_uppercase(16)),
            secret_access_key: std::iter::repeat_with(fastrand::alphanumeric)
                .take(40)
                .collect(),
            session_token: uuid(),
            arn: format!(
                "arn:{}:sts::{}:assumed-role/{}/{}",
                self.partition(),
                self.account(),
                role_name,
                session_name
            ),
            role_arn: role.attributes.get("Arn").cloned().unwrap_or_default(),
            session_name: session_name.to_string(),
            session_policy_arns,
            expires_at: Utc::now() + duration,
        }
    }

    /// Identity policies of the session's role, then its session policies.
    fn authorize(
        &self,
        state: &CloudState,
        session: &Session,
        action: &str,
        secret: &DeployedResource,
    ) -> Result<(), AccessError> {
        let role = state.find(ROLE, &session.role_arn).ok_or(AccessError::InvalidToken)?;
        let ResourceState::Role {
            managed_policy_arns,
            ..
        } = &role.state
        else {
            return Err(AccessError::InvalidToken);
        };

        let context = BTreeMap::from([
            ("aws:PrincipalArn".to_string(), session.role_arn.clone()),
            ("aws:RequestedRegion".to_string(), self.region().to_string()),
        ]);
        let request = RequestContext {
            caller: Caller::Identity {
                arn: session.arn.clone(),
                account: self.account().to_string(),
            },
            action,
            resource: &secret.physical_id,
            principal_tags: &role.tags,
            resource_tags: &secret.tags,
            context: &context,
        };

        let mut policy_sets = vec![managed_policy_arns.as_slice()];
        if let Some(session_policies) = &session.session_policy_arns {
            policy_sets.push(session_policies.as_slice());
        }
        for arns in policy_sets {
            let documents = policy_documents(state, arns);
            let decision = evaluate(&documents, &request);
            tracing::debug!("[stacks] {} {}: {}", session.arn, action, decision.reason);
            if !decision.is_allowed() {
                return Err(AccessError::AccessDenied {
                    principal: session.arn.clone(),
                    action: action.to_string(),
                    resource: secret.physical_id.clone(),
                });
            }
        }
        Ok(())
    }

    fn authorize_decrypt(
        &self,
        state: &CloudState,
        session: &Session,
        key_id: &str,
    ) -> Result<(), AccessError> {
        let key = state
            .find(KMS_KEY, key_id)
            .ok_or_else(|| AccessError::NotFound(key_id.to_string()))?;
        let ResourceState::Key { policy } = &key.state else {
            return Err(AccessError::NotFound(key_id.to_string()));
        };
        let key_arn = key.attributes.get("Arn").cloned().unwrap_or_default();
        let context = BTreeMap::from([
            ("kms:CallerAccount".to_string(), self.account().to_string()),
            (
                "kms:ViaService".to_string(),
                self.service_host("secretsmanager"),
            ),
        ]);
        let no_tags = Default::default();
        let request = RequestContext {
            caller: Caller::Identity {
                arn: session.arn.clone(),
                account: self.account().to_string(),
            },
            action: "kms:Decrypt",
            resource: &key_arn,
            principal_tags: &no_tags,
            resource_tags: &key.tags,
            context: &context,
        };
        if evaluate(&[policy], &request).is_allowed() {
            Ok(())
        } else {
            Err(AccessError::AccessDenied {
                principal: session.arn.clone(),
                action: "kms:Decrypt".into(),
                resource: key_arn,
            })
        }
    }
}

fn live_session<'a>(state: &'a CloudState, token: &str) -> Result<&'a Session, AccessError> {
    match state.sessions.get(token) {
        Some(session) if !session.is_expired() => Ok(session),
        _ => Err(AccessError::InvalidToken),
    }
}

/// By ARN or by name.
/// Stores `session` and drops the sessions that have expired.
fn record_session(state: &mut CloudState, session: &Session) {
    state.sessions.retain(|_, live| !live.is_expired());
    state
        .sessions
        .insert(session.session_token.clone(), session.clone());
}

fn find_secret<'a>(
    state: &'a CloudState,
    secret_id: &str,
) -> Result<&'a DeployedResource, AccessError> {
    state
        .resources()
        .filter(|r| r.type_name == SECRET)
        .find(|r| match &r.state {
            ResourceState::Secret(secret) => r.physical_id == secret_id || secret.name == secret_id,
            _ => false,
        })
        .ok_or_else(|| AccessError::NotFound(secret_id.to_string()))
}

fn policy_documents<'a>(state: &'a CloudState, arns: &[String]) -> Vec<&'a PolicyDocument> {
    arns.iter()
        .filter_map(|arn| match &state.find(MANAGED_POLICY, arn)?.state {
            ResourceState::Policy { document } => Some(document),
            _ => None,
        })
        .collect()
}

fn epoch_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}

fn random_uppercase(len: usize) -> String {
    std::iter::repeat_with(|| {
        if fastrand::bool() {
            fastrand::uppercase()
        } else {
            fastrand::digit(10)
        }
    })
    .take(len)
    .collect()
}

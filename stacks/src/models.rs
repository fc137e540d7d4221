// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::fmt;

use aws_credential_types::Credentials;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;
use zeroize::ZeroizeOnDrop;

use crate::constants::MAX_SECRET_ID_LENGTH;

pub const CURRENT_STAGE: &str = "AWSCURRENT";
const MIN_SESSION_SECONDS: u64 = 900;
const MAX_SESSION_SECONDS: u64 = 43_200;
const MAX_ARN_LENGTH: u64 = 1011;
const MAX_CERTIFICATE_LENGTH: u64 = 16_384;

/// Body of `GetSecretValue` and `DescribeSecret`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SecretIdRequest {
    #[serde(rename = "SecretId")]
    #[validate(length(min = 1, max = MAX_SECRET_ID_LENGTH))]
    pub secret_id: String,

    /// Only `AWSCURRENT` passes validation; secrets keep no other version,
    /// so handlers never read this field.
    #[serde(rename = "VersionStage", default, skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "validate_version_stage"))]
    pub version_stage: Option<String>,
}

impl SecretIdRequest {
    pub fn new(secret_id: impl Into<String>) -> Self {
        Self {
            secret_id: secret_id.into(),
            version_stage: None,
        }
    }
}

/// Only the current version of a secret is kept.
fn validate_version_stage(stage: &str) -> Result<(), validator::ValidationError> {
    if stage == CURRENT_STAGE {
        Ok(())
    } else {
        Err(validator::ValidationError::new("unsupported_version_stage"))
    }
}

#[derive(Clone, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct SecretValue {
    #[serde(rename = "ARN")]
    #[zeroize(skip)]
    pub arn: String,

    #[serde(rename = "Name")]
    #[zeroize(skip)]
    pub name: String,

    #[serde(rename = "VersionId")]
    #[zeroize(skip)]
    pub version_id: String,

    #[serde(rename = "SecretString")]
    pub secret_string: String,

    #[serde(rename = "VersionStages")]
    #[zeroize(skip)]
    pub version_stages: Vec<String>,

    /// Seconds since the epoch.
    #[serde(rename = "CreatedDate")]
    #[zeroize(skip)]
    pub created_date: f64,
}

// Custom Debug implementation to prevent accidental logging of sensitive data
impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretValue")
            .field("arn", &self.arn)
            .field("name", &self.name)
            .field("version_id", &self.version_id)
            .field("secret_string", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Value")]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationRules {
    #[serde(rename = "AutomaticallyAfterDays")]
    pub automatically_after_days: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretDescription {
    #[serde(rename = "ARN")]
    pub arn: String,

    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "KmsKeyId")]
    pub kms_key_id: String,

    #[serde(rename = "RotationEnabled")]
    pub rotation_enabled: bool,

    #[serde(rename = "RotationRules", skip_serializing_if = "Option::is_none", default)]
    pub rotation_rules: Option<RotationRules>,

    #[serde(rename = "Tags")]
    pub tags: Vec<Tag>,

    #[serde(rename = "CreatedDate")]
    pub created_date: f64,
}

/// Certificate based exchange for temporary credentials.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    /// PEM of a certificate issued by the trust anchor's authority.
    #[validate(length(min = 1, max = MAX_CERTIFICATE_LENGTH))]
    pub certificate: String,

    #[validate(length(min = 20, max = MAX_ARN_LENGTH))]
    #[validate(custom(function = "validate_arn"))]
    pub trust_anchor_arn: String,

    #[validate(length(min = 20, max = MAX_ARN_LENGTH))]
    #[validate(custom(function = "validate_arn"))]
    pub profile_arn: String,

    #[validate(length(min = 20, max = MAX_ARN_LENGTH))]
    #[validate(custom(function = "validate_arn"))]
    pub role_arn: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = MIN_SESSION_SECONDS, max = MAX_SESSION_SECONDS))]
    pub duration_seconds: Option<u64>,
}

/// `arn:partition:service:region:account:resource`
fn validate_arn(arn: &str) -> Result<(), validator::ValidationError> {
    let parts: Vec<&str> = arn.splitn(6, ':').collect();
    if parts.len() != 6 || parts[0] != "arn" || parts[1].is_empty() || parts[2].is_empty() {
        return Err(validator::ValidationError::new("invalid_arn"));
    }
    if parts[5].is_empty() {
        return Err(validator::ValidationError::new("invalid_arn"));
    }
    Ok(())
}

/// Output of an external credential process.
#[derive(Clone, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct Credential {
    #[serde(rename = "Version")]
    #[zeroize(skip)]
    pub version: u8,

    #[serde(rename = "AccessKeyId")]
    pub access_key_id: String,

    #[serde(rename = "SecretAccessKey")]
    pub secret_access_key: String,

    #[serde(rename = "SessionToken")]
    pub session_token: String,

    /// RFC 3339
    #[serde(rename = "Expiration")]
    #[zeroize(skip)]
    pub expiration: String,
}

// Custom Debug implementation to prevent accidental logging of sensitive data
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_key_id", &"[REDACTED]")
            .field("secret_access_key", &"[REDACTED]")
            .field("session_token", &"[REDACTED]")
            .field("expiration", &self.expiration)
            .finish()
    }
}

impl From<Credentials> for Credential {
    fn from(credential: Credentials) -> Self {
        let token = match credential.session_token() {
            Some(token) => token.to_string(),
            None => "".to_string(),
        };
        let expiration = credential
            .expiry()
            .map(|expiry| DateTime::<Utc>::from(expiry).to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_default();

        Self {
            version: 1,
            access_key_id: credential.access_key_id().to_string(),
            secret_access_key: credential.secret_access_key().to_string(),
            session_token: token,
            expiration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn test_secret_id_request() {
        let request: SecretIdRequest =
            serde_json::from_str(r#"{"SecretId": "/app1/web/dev/demo"}"#).unwrap();
        assert!(request.validate().is_ok());

        let empty = SecretIdRequest::new("");
        assert!(empty.validate().is_err());

        let mut previous = SecretIdRequest::new("/app1/web/dev/demo");
        previous.version_stage = Some("AWSPREVIOUS".into());
        assert!(previous.validate().is_err());
        previous.version_stage = Some(CURRENT_STAGE.into());
        assert!(previous.validate().is_ok());
    }

    #[test]
    fn test_session_request_validation() {
        let request = SessionRequest {
            certificate: "-----BEGIN CERTIFICATE-----".into(),
            trust_anchor_arn: "arn:aws:rolesanywhere:us-east-1:111111111111:trust-anchor/a".into(),
            profile_arn: "arn:aws:rolesanywhere:us-east-1:111111111111:profile/p".into(),
            role_arn: "arn:aws:iam::111111111111:role/onprem".into(),
            duration_seconds: Some(900),
        };
        assert!(request.validate().is_ok());

        let mut short = request.clone();
        short.duration_seconds = Some(60);
        assert!(short.validate().is_err());

        let mut malformed = request;
        malformed.role_arn = "not-an-arn-at-all-really".into();
        assert!(malformed.validate().is_err());
    }

    #[test]
    fn test_credential_process_shape() {
        let expiry = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let credential = Credential::from(Credentials::new(
            "ASIAEXAMPLE",
            "wJalrXUtnFEMI",
            Some("token".into()),
            Some(expiry),
            "test",
        ));
        let json = serde_json::to_value(&credential).unwrap();
        assert_eq!(json["Version"], 1);
        assert_eq!(json["SessionToken"], "token");
        assert_eq!(json["Expiration"], "2023-11-14T22:13:20Z");
        assert!(!format!("{credential:?}").contains("wJalrXUtnFEMI"));
    }

    #[test]
    fn test_secret_value_debug_is_redacted() {
        let value = SecretValue {
            arn: "arn".into(),
            name: "name".into(),
            version_id: "v1".into(),
            secret_string: "hunter2".into(),
            version_stages: vec![CURRENT_STAGE.into()],
            created_date: 0.0,
        };
        assert!(!format!("{value:?}").contains("hunter2"));
    }
}

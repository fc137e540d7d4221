// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use zeroize::ZeroizeOnDrop;

use crate::constants::{DEFAULT_PORT, REQUIRED_ENGINE};
use crate::errors::WorkloadError;

const REQUIRED_FIELDS: [&str; 3] = ["host", "username", "password"];

#[derive(Debug, Clone, Serialize)]
pub struct SecretIdRequest<'a> {
    #[serde(rename = "SecretId")]
    pub secret_id: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecretDescription {
    #[serde(rename = "ARN")]
    pub arn: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "RotationEnabled", default)]
    pub rotation_enabled: bool,
}

#[derive(Clone, Deserialize, ZeroizeOnDrop)]
pub struct SecretValue {
    #[serde(rename = "ARN")]
    #[zeroize(skip)]
    pub arn: String,
    #[serde(rename = "VersionId")]
    #[zeroize(skip)]
    pub version_id: String,
    #[serde(rename = "SecretString")]
    pub secret_string: String,
}

// Custom Debug implementation to prevent accidental logging of sensitive data
impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretValue")
            .field("arn", &self.arn)
            .field("version_id", &self.version_id)
            .field("secret_string", &"[REDACTED]")
            .finish()
    }
}

/// AWS JSON error body.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(rename = "__type")]
    pub kind: String,
    #[serde(default)]
    pub message: String,
}

/// Database credentials held in the secret.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SecretDict {
    #[zeroize(skip)]
    pub host: String,
    #[zeroize(skip)]
    pub port: u16,
    #[zeroize(skip)]
    pub dbname: Option<String>,
    pub username: String,
    pub password: String,
    #[zeroize(skip)]
    pub ssl: SslConfig,
}

// Custom Debug implementation to prevent accidental logging of sensitive data
impl fmt::Debug for SecretDict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretDict")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("username", &"[REDACTED]")
            .field("password", &"[REDACTED]")
            .field("ssl", &self.ssl)
            .finish()
    }
}

impl SecretDict {
    /// Parses the secret string. The engine must be `mysql` and `host`,
    /// `username` and `password` must be present; `port` defaults to 3306.
    pub fn parse(secret_string: &str) -> Result<Self, WorkloadError> {
        let value: Value = serde_json::from_str(secret_string)?;
        let Value::Object(fields) = value else {
            return Err(WorkloadError::InvalidSecret(
                "secret string is not a JSON object".into(),
            ));
        };

        if fields.get("engine").and_then(Value::as_str) != Some(REQUIRED_ENGINE) {
            return Err(WorkloadError::InvalidSecret(format!(
                "database engine must be set to '{REQUIRED_ENGINE}'"
            )));
        }
        for field in REQUIRED_FIELDS {
            if !fields.contains_key(field) {
                return Err(WorkloadError::InvalidSecret(format!(
                    "{field} key is missing from secret JSON"
                )));
            }
        }

        let text = |key: &str| -> Result<String, WorkloadError> {
            fields
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| WorkloadError::InvalidSecret(format!("{key} must be a string")))
        };
        let port = match fields.get("port") {
            None => DEFAULT_PORT,
            Some(Value::Number(n)) => n
                .as_u64()
                .and_then(|n| u16::try_from(n).ok())
                .ok_or_else(|| WorkloadError::InvalidSecret("port is out of range".into()))?,
            Some(Value::String(s)) => s
                .parse()
                .map_err(|_| WorkloadError::InvalidSecret(format!("invalid port {s}")))?,
            Some(_) => return Err(WorkloadError::InvalidSecret("invalid port".into())),
        };
        let dbname = fields
            .get("dbname")
            .or_else(|| fields.get("database"))
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Self {
            host: text("host")?,
            port,
            dbname,
            username: text("username")?,
            password: text("password")?,
            ssl: SslConfig::from_value(fields.get("ssl")),
        })
    }
}

/// TLS mode for the database connection. Without a usable `ssl` value TLS
/// is attempted with fallback to plain text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SslConfig {
    pub use_ssl: bool,
    pub fall_back: bool,
}

impl SslConfig {
    pub fn from_value(value: Option<&Value>) -> Self {
        let (use_ssl, fall_back) = match value {
            Some(Value::Bool(ssl)) => (*ssl, false),
            Some(Value::String(ssl)) => match ssl.to_ascii_lowercase().as_str() {
                "true" => (true, false),
                "false" => (false, false),
                _ => (true, true),
            },
            _ => (true, true),
        };
        Self { use_ssl, fall_back }
    }
}

/// What the function returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub secret_arn: String,
    pub accessible: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub connection: Option<ConnectionInfo>,
}

/// Connection settings taken from the secret, never the credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub host: String,
    pub port: u16,
    pub dbname: Option<String>,
    pub use_ssl: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_defaults_port() {
        let dict = SecretDict::parse(
            r#"{"engine":"mysql","host":"db.local","username":"admin","password":"p4ss"}"#,
        )
        .unwrap();
        assert_eq!(dict.port, 3306);
        assert_eq!(dict.ssl, SslConfig { use_ssl: true, fall_back: true });
        assert!(!format!("{dict:?}").contains("p4ss"));
    }

    #[test]
    fn test_parse_rejects_other_engine() {
        let err = SecretDict::parse(
            r#"{"engine":"postgres","host":"h","username":"u","password":"p"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("mysql"));
    }

    #[test]
    fn test_parse_requires_fields() {
        let err = SecretDict::parse(r#"{"engine":"mysql","host":"h","username":"u"}"#)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid secret: password key is missing from secret JSON"
        );
    }

    #[test]
    fn test_port_as_string_and_database_alias() {
        let dict = SecretDict::parse(
            r#"{"engine":"mysql","host":"h","username":"u","password":"p","port":"3307","database":"demo"}"#,
        )
        .unwrap();
        assert_eq!(dict.port, 3307);
        assert_eq!(dict.dbname.as_deref(), Some("demo"));
    }

    #[test]
    fn test_ssl_config() {
        assert_eq!(
            SslConfig::from_value(Some(&json!(false))),
            SslConfig { use_ssl: false, fall_back: false }
        );
        assert_eq!(
            SslConfig::from_value(Some(&json!("TRUE"))),
            SslConfig { use_ssl: true, fall_back: false }
        );
        assert_eq!(
            SslConfig::from_value(Some(&json!("maybe"))),
            SslConfig { use_ssl: true, fall_back: true }
        );
        assert_eq!(
            SslConfig::from_value(Some(&json!(1))),
            SslConfig { use_ssl: true, fall_back: true }
        );
    }
}

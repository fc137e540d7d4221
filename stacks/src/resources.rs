// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Typed resource definitions.
//!
//! Each kind serializes its properties with the provider's PascalCase names,
//! so a [`Resource`] renders straight into a template entry. Values that
//! point at other resources are [`Token`]s.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::policy::PolicyDocument;
use crate::tags::TagSet;
use crate::tokens::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RemovalPolicy {
    #[default]
    Delete,
    Retain,
    Snapshot,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub logical_id: String,
    pub kind: ResourceKind,
    pub tags: TagSet,
    pub depends_on: BTreeSet<String>,
    pub removal_policy: RemovalPolicy,
}

impl Resource {
    pub fn new(logical_id: impl Into<String>, kind: impl Into<ResourceKind>) -> Self {
        Self {
            logical_id: logical_id.into(),
            kind: kind.into(),
            tags: TagSet::new(),
            depends_on: BTreeSet::new(),
            removal_policy: RemovalPolicy::default(),
        }
    }

    pub fn with_tags(mut self, tags: &TagSet) -> Self {
        self.tags = self.tags.merged(tags);
        self
    }

    pub fn depends_on(mut self, logical_id: impl Into<String>) -> Self {
        self.depends_on.insert(logical_id.into());
        self
    }

    pub fn with_removal_policy(mut self, policy: RemovalPolicy) -> Self {
        self.removal_policy = policy;
        self
    }

    pub fn deletion_protected(&self) -> bool {
        match &self.kind {
            ResourceKind::ServerlessCluster(cluster) => cluster.deletion_protection,
            _ => false,
        }
    }

    pub fn properties(&self) -> Value {
        let mut properties = match serde_json::to_value(&self.kind) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        if !self.tags.is_empty() {
            properties.insert("Tags".into(), self.tags.to_template());
        }
        Value::Object(properties)
    }

    pub fn to_template(&self) -> Value {
        let mut entry = Map::new();
        entry.insert("Type".into(), json!(self.kind.type_name()));
        entry.insert("Properties".into(), self.properties());
        if !self.depends_on.is_empty() {
            entry.insert("DependsOn".into(), json!(self.depends_on));
        }
        if self.removal_policy != RemovalPolicy::Delete {
            entry.insert("DeletionPolicy".into(), json!(self.removal_policy));
            entry.insert("UpdateReplacePolicy".into(), json!(self.removal_policy));
        }
        Value::Object(entry)
    }
}

macro_rules! resource_kinds {
    ($($variant:ident => $type_name:literal),+ $(,)?) => {
        #[derive(Debug, Clone, PartialEq, Serialize)]
        #[serde(untagged)]
        pub enum ResourceKind {
            $($variant($variant),)+
        }

        impl ResourceKind {
            pub fn type_name(&self) -> &'static str {
                match self {
                    $(Self::$variant(_) => $type_name,)+
                }
            }
        }

        $(
            impl From<$variant> for ResourceKind {
                fn from(kind: $variant) -> Self {
                    Self::$variant(kind)
                }
            }
        )+
    };
}

resource_kinds! {
    KmsKey => "AWS::KMS::Key",
    KmsAlias => "AWS::KMS::Alias",
    Secret => "AWS::SecretsManager::Secret",
    ManagedPolicy => "AWS::IAM::ManagedPolicy",
    Role => "AWS::IAM::Role",
    StringParameter => "AWS::SSM::Parameter",
    Vpc => "AWS::EC2::VPC",
    InterfaceEndpoint => "AWS::EC2::VPCEndpoint",
    LogGroup => "AWS::Logs::LogGroup",
    FlowLog => "AWS::EC2::FlowLog",
    Bucket => "AWS::S3::Bucket",
    BucketPolicy => "AWS::S3::BucketPolicy",
    CertificateAuthority => "AWS::ACMPCA::CertificateAuthority",
    ActivationCertificate => "AWS::ACMPCA::Certificate",
    CaActivation => "AWS::ACMPCA::CertificateAuthorityActivation",
    CaPermission => "AWS::ACMPCA::Permission",
    TrustAnchor => "AWS::RolesAnywhere::TrustAnchor",
    Profile => "AWS::RolesAnywhere::Profile",
    SecurityGroup => "AWS::EC2::SecurityGroup",
    ServerlessCluster => "AWS::RDS::DBCluster",
    Function => "AWS::Lambda::Function",
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct KmsKey {
    pub description: String,
    pub enable_key_rotation: bool,
    pub key_policy: PolicyDocument,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct KmsAlias {
    pub alias_name: String,
    pub target_key_id: Token,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GenerateSecretString {
    pub secret_string_template: String,
    pub generate_string_key: String,
    pub exclude_characters: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Secret {
    pub name: String,
    pub kms_key_id: Token,
    pub generate_secret_string: GenerateSecretString,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ManagedPolicy {
    pub description: String,
    pub policy_document: PolicyDocument,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Role {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub assume_role_policy_document: PolicyDocument,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub managed_policy_arns: Vec<Token>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StringParameter {
    pub name: String,
    pub description: String,
    #[serde(rename = "Type")]
    pub parameter_type: &'static str,
    pub value: Token,
}

impl StringParameter {
    pub fn new(name: impl Into<String>, description: impl Into<String>, value: Token) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameter_type: "String",
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SubnetType {
    #[serde(rename = "PUBLIC")]
    Public,
    #[serde(rename = "PRIVATE_WITH_NAT")]
    PrivateWithNat,
    #[serde(rename = "PRIVATE_ISOLATED")]
    PrivateIsolated,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SubnetConfiguration {
    pub name: String,
    pub subnet_type: SubnetType,
    pub cidr_mask: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Vpc {
    pub cidr_block: String,
    pub enable_dns_hostnames: bool,
    pub enable_dns_support: bool,
    pub subnet_configuration: Vec<SubnetConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct InterfaceEndpoint {
    pub vpc_id: Token,
    pub service_name: Token,
    pub private_dns_enabled: bool,
    pub vpc_endpoint_type: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogGroup {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_group_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention_in_days: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FlowLog {
    pub resource_id: Token,
    pub resource_type: &'static str,
    pub traffic_type: &'static str,
    pub log_destination_type: &'static str,
    pub log_group_name: Token,
    pub deliver_logs_permission_arn: Token,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Bucket {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_control: Option<String>,
    pub versioned: bool,
    pub encryption: &'static str,
    pub enforce_ssl: bool,
    pub block_public_access: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging_bucket: Option<Token>,
    /// Applies to current and non-current object versions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_days: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BucketPolicy {
    pub bucket: Token,
    pub policy_document: PolicyDocument,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Subject {
    pub organization: String,
    pub organizational_unit: String,
    pub country: String,
    pub state: String,
    pub locality: String,
    pub common_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CrlConfiguration {
    pub enabled: bool,
    pub expiration_in_days: u32,
    pub custom_cname: String,
    pub s3_bucket_name: Token,
    pub s3_object_acl: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CertificateAuthority {
    #[serde(rename = "Type")]
    pub ca_type: &'static str,
    pub key_algorithm: &'static str,
    pub signing_algorithm: &'static str,
    pub subject: Subject,
    pub crl_configuration: CrlConfiguration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Validity {
    #[serde(rename = "Type")]
    pub unit: &'static str,
    pub value: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActivationCertificate {
    pub certificate_authority_arn: Token,
    pub certificate_signing_request: Token,
    pub signing_algorithm: &'static str,
    pub template_arn: Token,
    pub validity: Validity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CaStatus {
    #[default]
    Active,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CaActivation {
    pub certificate: Token,
    pub certificate_authority_arn: Token,
    pub status: CaStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CaPermission {
    pub actions: Vec<String>,
    pub certificate_authority_arn: Token,
    pub principal: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TrustAnchor {
    pub name: String,
    pub enabled: bool,
    pub source: Value,
    #[serde(skip)]
    pub certificate_authority_arn: Token,
}

impl TrustAnchor {
    pub fn from_certificate_authority(name: impl Into<String>, ca_arn: Token) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            source: json!({
                "SourceData": {"AcmPcaArn": ca_arn},
                "SourceType": "AWS_ACM_PCA",
            }),
            certificate_authority_arn: ca_arn,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Profile {
    pub name: String,
    pub enabled: bool,
    pub duration_seconds: u64,
    pub managed_policy_arns: Vec<Token>,
    pub role_arns: Vec<Token>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct IngressRule {
    pub cidr_ip: Token,
    pub ip_protocol: &'static str,
    pub from_port: u16,
    pub to_port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SecurityGroup {
    pub group_description: String,
    pub vpc_id: Token,
    pub security_group_ingress: Vec<IngressRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerlessCluster {
    pub engine: &'static str,
    pub engine_version: &'static str,
    pub engine_mode: &'static str,
    pub master_user_secret: Token,
    pub vpc_id: Token,
    pub subnet_type: SubnetType,
    pub vpc_security_group_ids: Vec<Token>,
    pub enable_http_endpoint: bool,
    pub database_name: String,
    pub deletion_protection: bool,
    pub rotation_days: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Function {
    pub function_name: String,
    pub description: String,
    pub runtime: &'static str,
    pub handler: &'static str,
    pub code: String,
    pub environment: BTreeMap<String, Token>,
    pub role: Token,
    pub vpc_id: Token,
    pub subnet_type: SubnetType,
    pub timeout: u64,
    pub log_retention_in_days: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_retention_role: Option<Token>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_entry() {
        let resource = Resource::new(
            "CrlBucket",
            Bucket {
                access_control: None,
                versioned: true,
                encryption: "AES256",
                enforce_ssl: true,
                block_public_access: false,
                logging_bucket: Some(Token::reference("LoggingBucket")),
                expiration_days: None,
            },
        )
        .depends_on("LoggingBucket")
        .with_removal_policy(RemovalPolicy::Retain)
        .with_tags(&TagSet::from([("appid", "app1")]));

        assert_eq!(
            resource.to_template(),
            json!({
                "Type": "AWS::S3::Bucket",
                "Properties": {
                    "Versioned": true,
                    "Encryption": "AES256",
                    "EnforceSsl": true,
                    "BlockPublicAccess": false,
                    "LoggingBucket": {"Ref": "LoggingBucket"},
                    "Tags": [{"Key": "appid", "Value": "app1"}]
                },
                "DependsOn": ["LoggingBucket"],
                "DeletionPolicy": "Retain",
                "UpdateReplacePolicy": "Retain"
            })
        );
    }

    #[test]
    fn test_trust_anchor_source() {
        let anchor =
            TrustAnchor::from_certificate_authority("onPremAppTrustAnchor", Token::attr("CA", "Arn"));
        let properties = Resource::new("TrustAnchor", anchor).properties();
        assert_eq!(
            properties["Source"],
            json!({"SourceData": {"AcmPcaArn": {"Fn::GetAtt": ["CA", "Arn"]}}, "SourceType": "AWS_ACM_PCA"})
        );
        assert!(properties.get("CertificateAuthorityArn").is_none());
    }

    #[test]
    fn test_deletion_protection() {
        let cluster = ServerlessCluster {
            engine: "aurora-mysql",
            engine_version: "5.7.12",
            engine_mode: "serverless",
            master_user_secret: Token::Parameter("/a".into()),
            vpc_id: Token::Parameter("/b".into()),
            subnet_type: SubnetType::PrivateIsolated,
            vpc_security_group_ids: vec![],
            enable_http_endpoint: true,
            database_name: "db".into(),
            deletion_protection: true,
            rotation_days: 30,
        };
        assert!(Resource::new("Cluster", cluster).deletion_protected());
        assert!(
            !Resource::new(
                "Logs",
                LogGroup {
                    log_group_name: None,
                    retention_in_days: Some(14)
                }
            )
            .deletion_protected()
        );
    }

    #[test]
    fn test_ca_status_serialization() {
        assert_eq!(json!(CaStatus::Active), json!("ACTIVE"));
        assert_eq!(json!(CaStatus::Disabled), json!("DISABLED"));
    }
}

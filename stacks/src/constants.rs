// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::time::Duration;

pub const TAG_CONFIG_PATH: &str = "configs/tagconfig.json";
pub const TEMPLATE_OUTPUT_DIR: &str = "cdk.out";
pub const PARAMETER_STORE_PATH: &str = "cdk.out/parameters.json";
pub const STATE_FILE_PATH: &str = "cdk.out/state.json";

/// Account used by the simulated provider when neither the deploy nor the
/// default account is set.
pub const DEFAULT_SIMULATED_ACCOUNT: &str = "111111111111";
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_PARTITION: &str = "aws";

// Stack names
pub const COMMON_STACK: &str = "commonSecretsAndIamPolicyStack";
pub const ROLES_ANYWHERE_STACK: &str = "RolesanywhereabacStack";
pub const SAMPLE_APP_STACK: &str = "SampleAppOnAWSStack";

// Tag keys carried by every resource of the application
pub const TAG_NAME: &str = "name";
pub const TAG_APPID: &str = "appid";
pub const TAG_APPFUNC: &str = "appfunc";
pub const TAG_APPENV: &str = "appenv";
pub const TAG_DATA_CLASSIFICATION: &str = "dataclassification";

/// Tags matched between principal and resource by the ABAC condition.
pub const ACCESS_ATTRIBUTES: [&str; 3] = [TAG_APPFUNC, TAG_APPENV, TAG_APPID];

/// Environment tag given to the principal that must be refused.
pub const NOT_ALLOWED_APPENV: &str = "nonp";

pub const MAX_TAG_VALUE_LENGTH: u64 = 256;

// Service principals
pub const LAMBDA_SERVICE: &str = "lambda.amazonaws.com";
pub const ROLES_ANYWHERE_SERVICE: &str = "rolesanywhere.amazonaws.com";
pub const FLOW_LOGS_SERVICE: &str = "vpc-flow-logs.amazonaws.com";
pub const ACM_PCA_SERVICE: &str = "acm-pca.amazonaws.com";
pub const ACM_SERVICE: &str = "acm.amazonaws.com";

pub const SECRET_ACTIONS: [&str; 5] = [
    "secretsmanager:GetSecretValue",
    "secretsmanager:PutSecretValue",
    "secretsmanager:UpdateSecret",
    "secretsmanager:DeleteSecret",
    "secretsmanager:DescribeSecret",
];
pub const ON_PREM_SECRET_ACTIONS: [&str; 4] = [
    "secretsmanager:GetSecretValue",
    "secretsmanager:PutSecretValue",
    "secretsmanager:UpdateSecret",
    "secretsmanager:DeleteSecret",
];
pub const KMS_SECRET_ACTIONS: [&str; 6] = [
    "kms:Encrypt",
    "kms:Decrypt",
    "kms:ReEncrypt*",
    "kms:CreateGrant",
    "kms:DescribeKey",
    "kms:GenerateDataKey",
];
pub const ROLES_ANYWHERE_TRUST_ACTIONS: [&str; 3] =
    ["sts:AssumeRole", "sts:TagSession", "sts:SetSourceIdentity"];

// Network
pub const VPC_NAME: &str = "SampleVPCStack VPC";
pub const VPC_CIDR: &str = "172.31.0.0/16";
pub const MYSQL_PORT: u16 = 3306;

// Private certificate authority
pub const ROOT_DOMAIN: &str = "roles.anywhere.rootca";
pub const CRL_EXPIRATION_DAYS: u32 = 30;
pub const LOG_EXPIRATION_DAYS: u32 = 365 * 10;
pub const ACTIVATION_VALIDITY_YEARS: u32 = 3;
pub const TRUST_ANCHOR_NAME: &str = "onPremAppTrustAnchor";
pub const PROFILE_NAME: &str = "onPremAppProfile";
pub const PROFILE_SESSION_DURATION: Duration = Duration::from_secs(900);

// Sample application
pub const FUNCTION_PREFIX: &str = "asmFetchLambda";
pub const FUNCTION_TIMEOUT: Duration = Duration::from_secs(10);
pub const LOG_RETENTION_DAYS: u32 = 14;
pub const ROTATION_DAYS: u32 = 30;
pub const ROLE_SESSION_DURATION: Duration = Duration::from_secs(3600);

// Generated secret
pub const SECRET_TEMPLATE: &str =
    r#"{"database":"fill_name_of_the_database","username":"fill_username"}"#;
pub const GENERATED_KEY: &str = "password";
pub const EXCLUDED_CHARACTERS: &str = "\"@/\\";
pub const GENERATED_PASSWORD_LENGTH: usize = 32;

// HTTP
pub const REQUEST_BODY_LIMIT: usize = 1024 * 1024; // 1 MB
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const TARGET_HEADER: &str = "x-amz-target";
pub const SECURITY_TOKEN_HEADER: &str = "x-amz-security-token";
pub const MAX_SECRET_ID_LENGTH: u64 = 2048;

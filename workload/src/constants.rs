// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::time::Duration;

pub const TARGET_HEADER: &str = "x-amz-target";
pub const SECURITY_TOKEN_HEADER: &str = "x-amz-security-token";
pub const CONTENT_TYPE: &str = "application/x-amz-json-1.1";

pub const GET_SECRET_VALUE: &str = "secretsmanager.GetSecretValue";
pub const DESCRIBE_SECRET: &str = "secretsmanager.DescribeSecret";

pub const ACCESS_DENIED: &str = "AccessDeniedException";

pub const REQUIRED_ENGINE: &str = "mysql";
pub const DEFAULT_PORT: u16 = 3306;
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

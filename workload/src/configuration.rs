// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::fmt;

use clap::Parser;
use zeroize::ZeroizeOnDrop;

/// Environment contract of the deployed function.
#[derive(Clone, Parser, ZeroizeOnDrop)]
#[command(author, version, about, long_about = None)]
pub struct WorkloadOptions {
    /// ARN of the secret to read
    #[arg(long, env("ASM_ARN"))]
    #[zeroize(skip)]
    pub asm_arn: String,
    #[arg(long, env("SECRETS_MANAGER_ENDPOINT"))]
    #[zeroize(skip)]
    pub endpoint: String,
    /// Identity the function runs as
    #[arg(long, env("AWS_SESSION_TOKEN"), hide_env_values = true)]
    pub session_token: String,
}

// Custom Debug implementation to prevent accidental logging of sensitive data
impl fmt::Debug for WorkloadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkloadOptions")
            .field("asm_arn", &self.asm_arn)
            .field("endpoint", &self.endpoint)
            .field("session_token", &"[REDACTED]")
            .finish()
    }
}

impl Default for WorkloadOptions {
    fn default() -> Self {
        WorkloadOptions {
            asm_arn: String::new(),
            endpoint: "http://127.0.0.1:8080".to_string(),
            session_token: String::new(),
        }
    }
}

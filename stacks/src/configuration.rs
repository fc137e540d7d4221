// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::path::PathBuf;

use aws_config::meta::region::RegionProviderChain;
use clap::{ArgAction, Args, Parser, Subcommand};

use crate::constants::{PARAMETER_STORE_PATH, STATE_FILE_PATH, TAG_CONFIG_PATH, TEMPLATE_OUTPUT_DIR};
use crate::stack::Environment;

const DEPLOY_ACCOUNT: &str = "CDK_DEPLOY_ACCOUNT";
const DEPLOY_REGION: &str = "CDK_DEPLOY_REGION";
const DEFAULT_ACCOUNT: &str = "CDK_DEFAULT_ACCOUNT";
const DEFAULT_REGION: &str = "CDK_DEFAULT_REGION";

#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct StacksOptions {
    #[arg(long, default_value = TAG_CONFIG_PATH, env("ABAC_TAG_CONFIG"))]
    pub tag_config: PathBuf,
    #[arg(long, env("ABAC_ACCOUNT"))]
    pub account: Option<String>,
    #[arg(long, env("ABAC_REGION"))]
    pub region: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Write one template per stack
    Synth {
        #[arg(long, default_value = TEMPLATE_OUTPUT_DIR, env("ABAC_OUTPUT_DIR"))]
        output: PathBuf,
    },
    /// Print the stack and resource build order
    Plan,
    /// Apply every stack to the simulated provider, resuming from the
    /// state saved by earlier runs
    Deploy {
        #[arg(long, default_value = PARAMETER_STORE_PATH, env("ABAC_PARAMETER_STORE"))]
        parameters: PathBuf,
        #[arg(long, default_value = STATE_FILE_PATH, env("ABAC_STATE_FILE"))]
        state: PathBuf,
    },
    /// Deploy in memory and serve the secret and session endpoints
    Serve(ServeOptions),
    /// Deploy in memory and run the sample function
    Invoke {
        /// Run as the role tagged for another environment
        #[arg(long, default_value = "false", env("ABAC_NOT_ALLOWED"), action = ArgAction::SetTrue)]
        not_allowed: bool,
    },
    /// Deploy in memory and exchange a fresh certificate for on-premises
    /// credentials, printed in credential-process format
    Session {
        #[arg(long, default_value = "onprem.workload", env("ABAC_COMMON_NAME"))]
        common_name: String,
    },
}

#[derive(Debug, Clone, Args)]
pub struct ServeOptions {
    #[arg(long, default_value = "127.0.0.1", env("ABAC_HTTP_HOST"))]
    pub host: String,
    #[arg(long, default_value = "8080", env("ABAC_HTTP_PORT"))]
    pub port: u16,
}

impl Default for ServeOptions {
    fn default() -> Self {
        ServeOptions {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Default for StacksOptions {
    fn default() -> Self {
        StacksOptions {
            tag_config: PathBuf::from(TAG_CONFIG_PATH),
            account: None,
            region: None,
            command: Command::Plan,
        }
    }
}

impl StacksOptions {
    /// Target account and region: flags first, then the deploy and default
    /// variables, then the region provider chain. Whatever stays unknown is
    /// synthesized as a pseudo parameter.
    #[tracing::instrument(skip(self))]
    pub async fn environment(&self) -> Environment {
        let account = self
            .account
            .clone()
            .or_else(|| first_set(&[DEPLOY_ACCOUNT, DEFAULT_ACCOUNT]));
        let region = match self
            .region
            .clone()
            .or_else(|| first_set(&[DEPLOY_REGION, DEFAULT_REGION]))
        {
            Some(region) => Some(region),
            None => RegionProviderChain::default_provider()
                .region()
                .await
                .map(|region| region.to_string()),
        };
        tracing::debug!("[stacks] environment account={:?} region={:?}", account, region);
        Environment::new(account, region)
    }
}

fn first_set(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.is_empty())
}

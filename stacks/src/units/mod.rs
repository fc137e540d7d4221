// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! The deployable units of the application.
//!
//! | Stack | Publishes | Reads |
//! |-------|-----------|-------|
//! | `commonSecretsAndIamPolicyStack` | secret, policy and VPC parameters | |
//! | `RolesanywhereabacStack` | role, CA, trust anchor and profile parameters | |
//! | `SampleAppOnAWSStack` | | secret, policy and VPC parameters |

pub mod network;
pub mod pca;
pub mod roles_anywhere;
pub mod sample_app;
pub mod secrets;

use crate::errors::GraphError;
use crate::resources::CaStatus;
use crate::stack::{App, Environment};
use crate::tags::TagConfig;

/// Builds all three stacks for `config`.
pub fn build_app(config: &TagConfig, environment: &Environment) -> Result<App, GraphError> {
    build_app_with(config, environment, CaStatus::Active)
}

/// Same as [`build_app`] with an explicit certificate authority status.
pub fn build_app_with(
    config: &TagConfig,
    environment: &Environment,
    ca_status: CaStatus,
) -> Result<App, GraphError> {
    let mut app = App::new();
    app.add_stack(secrets::stack(config, environment)?)?;
    app.add_stack(roles_anywhere::stack(config, environment, ca_status)?)?;
    app.add_stack(sample_app::stack(config, environment)?)?;
    Ok(app)
}

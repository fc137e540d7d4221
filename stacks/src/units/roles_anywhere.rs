// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Trust bootstrap for workloads outside AWS: a private CA, a trust anchor
//! sourced from it, and a profile that hands out sessions for a role tagged
//! with the access attributes.

use crate::constants::{
    ON_PREM_SECRET_ACTIONS, PROFILE_NAME, PROFILE_SESSION_DURATION, ROLES_ANYWHERE_SERVICE,
    ROLES_ANYWHERE_STACK, ROLES_ANYWHERE_TRUST_ACTIONS, TRUST_ANCHOR_NAME,
};
use crate::errors::GraphError;
use crate::policy::{PolicyDocument, PolicyStatement, Principal, abac_statement};
use crate::resources::{CaStatus, ManagedPolicy, Profile, Resource, Role, TrustAnchor};
use crate::stack::{Environment, Stack};
use crate::tags::{ParameterSuffix, TagConfig};
use crate::tokens::Token;
use crate::units::pca;

pub fn stack(
    config: &TagConfig,
    environment: &Environment,
    ca_status: CaStatus,
) -> Result<Stack, GraphError> {
    let mut stack = Stack::new(ROLES_ANYWHERE_STACK, environment.clone())
        .with_description("Private CA and IAM Roles Anywhere trust for on-premises workloads");

    let ca = pca::add(&mut stack, ca_status)?;

    let policy = stack.add(Resource::new(
        "OnPremAbacPolicy",
        ManagedPolicy {
            description: "Tag based secret access for on-premises workloads".to_string(),
            policy_document: PolicyDocument::new([abac_statement(
                "secretsmanager",
                ON_PREM_SECRET_ACTIONS,
                [Token::literal("*")],
                &config.access_tags(),
            )]),
        },
    ))?;
    let role = stack.add(
        Resource::new(
            "OnPremAppRole",
            Role {
                description: Some("Assumed through IAM Roles Anywhere".to_string()),
                assume_role_policy_document: PolicyDocument::new([PolicyStatement::allow()
                    .with_principal(Principal::service(ROLES_ANYWHERE_SERVICE))
                    .with_actions(ROLES_ANYWHERE_TRUST_ACTIONS)]),
                managed_policy_arns: vec![policy.attr("PolicyArn")],
            },
        )
        .with_tags(&config.access_tags()),
    )?;

    let anchor = stack.add(
        Resource::new(
            "TrustAnchor",
            TrustAnchor::from_certificate_authority(TRUST_ANCHOR_NAME, ca.authority.arn()),
        )
        .depends_on(ca.activation.id()),
    )?;
    let profile = stack.add(
        Resource::new(
            "Profile",
            Profile {
                name: PROFILE_NAME.to_string(),
                enabled: true,
                duration_seconds: PROFILE_SESSION_DURATION.as_secs(),
                managed_policy_arns: vec![policy.attr("PolicyArn")],
                role_arns: vec![role.arn()],
            },
        )
        .depends_on(role.id()),
    )?;

    stack.publish(
        "OnPremAppRoleSsmParam",
        config.parameter_key(ParameterSuffix::OnPremRole),
        "ARN of the on-premises application role",
        role.arn(),
    )?;
    stack.publish(
        "PcaArnSsmParam",
        config.parameter_key(ParameterSuffix::CertificateAuthority),
        "ARN of the private root CA",
        ca.authority.arn(),
    )?;
    stack.publish(
        "TrustAnchorSsmParam",
        config.parameter_key(ParameterSuffix::TrustAnchor),
        "ARN of the Roles Anywhere trust anchor",
        anchor.attr("TrustAnchorArn"),
    )?;
    stack.publish(
        "ProfileSsmParam",
        config.parameter_key(ParameterSuffix::Profile),
        "ARN of the Roles Anywhere profile",
        profile.attr("ProfileArn"),
    )?;
    Ok(stack)
}

// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Shared-secret stack: KMS key, the secret, the ABAC access policy and the
//! application network.

use crate::constants::{
    COMMON_STACK, EXCLUDED_CHARACTERS, GENERATED_KEY, KMS_SECRET_ACTIONS, SECRET_ACTIONS,
    SECRET_TEMPLATE,
};
use crate::errors::GraphError;
use crate::policy::{PolicyDocument, PolicyStatement, Principal, STRING_EQUALS, abac_statement};
use crate::resources::{GenerateSecretString, KmsAlias, KmsKey, ManagedPolicy, Resource, Secret};
use crate::stack::{Environment, Handle, Stack};
use crate::tags::{ParameterSuffix, TagConfig};
use crate::tokens::Token;
use crate::units::network;

pub fn stack(config: &TagConfig, environment: &Environment) -> Result<Stack, GraphError> {
    let mut stack = Stack::new(COMMON_STACK, environment.clone())
        .with_description("Shared secret, its KMS key and the tag based access policy");

    network::add(&mut stack, config)?;
    let secret = add_secret(&mut stack, config)?;
    add_access_policy(&mut stack, config, &secret)?;
    Ok(stack)
}

/// Key, alias and secret. The key may only be used through Secrets
/// Manager by principals of the same account.
fn add_secret(stack: &mut Stack, config: &TagConfig) -> Result<Handle, GraphError> {
    let via_secrets_manager = Token::join([
        "secretsmanager.".into(),
        stack.environment.region(),
        ".amazonaws.com".into(),
    ]);
    let key_policy = PolicyDocument::new([PolicyStatement::allow()
        .with_sid("AllowSecretsManagerUse")
        .with_principal(Principal::Any)
        .with_actions(KMS_SECRET_ACTIONS)
        .with_resource("*")
        .with_condition(STRING_EQUALS, "kms:CallerAccount", stack.environment.account())
        .with_condition(STRING_EQUALS, "kms:ViaService", via_secrets_manager)]);

    let key = stack.add(
        Resource::new(
            "KmsKey",
            KmsKey {
                description: format!("Encrypts {}", config.secret_name()),
                enable_key_rotation: true,
                key_policy,
            },
        )
        .with_tags(&config.resource_tags()),
    )?;
    stack.add(Resource::new(
        "KmsKeyAlias",
        KmsAlias {
            alias_name: config.key_alias(),
            target_key_id: key.reference(),
        },
    ))?;

    let secret = stack.add(
        Resource::new(
            "Secret",
            Secret {
                name: config.secret_name(),
                kms_key_id: key.reference(),
                generate_secret_string: GenerateSecretString {
                    secret_string_template: SECRET_TEMPLATE.to_string(),
                    generate_string_key: GENERATED_KEY.to_string(),
                    exclude_characters: EXCLUDED_CHARACTERS.to_string(),
                },
            },
        )
        .with_tags(&config.resource_tags()),
    )?;
    stack.publish(
        "AsmSsmPara",
        config.parameter_key(ParameterSuffix::Secret),
        "ARN of the shared secret",
        secret.arn(),
    )?;
    Ok(secret)
}

/// Managed policy granting the secret actions only to principals whose
/// access attributes equal the secret's.
fn add_access_policy(
    stack: &mut Stack,
    config: &TagConfig,
    secret: &Handle,
) -> Result<Handle, GraphError> {
    let policy = stack.add(Resource::new(
        "AbacPolicy",
        ManagedPolicy {
            description: format!("Tag based access to {}", config.secret_name()),
            policy_document: PolicyDocument::new([abac_statement(
                "secretsmanager",
                SECRET_ACTIONS,
                [secret.arn()],
                &config.access_tags(),
            )]),
        },
    ))?;
    stack.publish(
        "IAMSsmPara",
        config.parameter_key(ParameterSuffix::Policy),
        "ARN of the tag based access policy",
        policy.attr("PolicyArn"),
    )?;
    Ok(policy)
}

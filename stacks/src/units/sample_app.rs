// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Consumer stack: an Aurora cluster bound to the shared secret, a function
//! that reads the secret, and two roles that differ only in their `appenv`
//! tag. The function runs as the allowed role; the other role is there to
//! show the tag condition refusing it.

use std::collections::BTreeMap;

use crate::constants::{
    COMMON_STACK, FUNCTION_TIMEOUT, LAMBDA_SERVICE, LOG_RETENTION_DAYS, MYSQL_PORT,
    NOT_ALLOWED_APPENV, ROLES_ANYWHERE_STACK, ROTATION_DAYS, SAMPLE_APP_STACK, VPC_CIDR,
};
use crate::errors::GraphError;
use crate::policy::{PolicyDocument, PolicyStatement, Principal};
use crate::resources::{
    Function, IngressRule, ManagedPolicy, RemovalPolicy, Resource, Role, SecurityGroup,
    ServerlessCluster, SubnetType,
};
use crate::stack::{Environment, Handle, Stack};
use crate::tags::{ParameterSuffix, TagConfig, TagSet};
use crate::tokens::Token;

pub const FUNCTION_RUNTIME: &str = "provided.al2023";
pub const FUNCTION_HANDLER: &str = "bootstrap";
/// Package name of the code the function runs.
pub const FUNCTION_CODE: &str = "secret-workload";

const ENI_ACTIONS: [&str; 5] = [
    "ec2:CreateNetworkInterface",
    "ec2:DescribeNetworkInterfaces",
    "ec2:DeleteNetworkInterface",
    "ec2:AssignPrivateIpAddresses",
    "ec2:UnassignPrivateIpAddresses",
];

pub fn stack(config: &TagConfig, environment: &Environment) -> Result<Stack, GraphError> {
    let mut stack = Stack::new(SAMPLE_APP_STACK, environment.clone())
        .with_description("Sample consumer of the shared secret");
    stack.add_dependency(COMMON_STACK);
    stack.add_dependency(ROLES_ANYWHERE_STACK);

    let secret_arn = stack.lookup(config.parameter_key(ParameterSuffix::Secret));
    let policy_arn = stack.lookup(config.parameter_key(ParameterSuffix::Policy));
    let vpc_id = stack.lookup(config.parameter_key(ParameterSuffix::Vpc));

    let exec_policy = add_execution_policy(&mut stack, config, &vpc_id)?;
    let managed = vec![policy_arn, exec_policy.attr("PolicyArn")];

    let allowed = add_role(
        &mut stack,
        "AllowedRole",
        "Has the tags of the secret",
        &managed,
        config.access_tags(),
    )?;
    let not_allowed = add_role(
        &mut stack,
        "NotAllowedRole",
        "Tagged for another environment",
        &managed,
        config.with_appenv(NOT_ALLOWED_APPENV).access_tags(),
    )?;

    add_database(&mut stack, config, &secret_arn, &vpc_id)?;
    let function = add_function(&mut stack, config, &allowed, secret_arn, vpc_id)?;

    stack.add_output("FunctionArn", function.arn(), "ARN of the secret fetching function");
    stack.add_output(
        "AllowedRoleName",
        allowed.reference(),
        "Role whose tags match the secret",
    );
    stack.add_output(
        "NotAllowedRoleName",
        not_allowed.reference(),
        "Role whose tags do not match the secret",
    );
    stack.add_output("AllowedRoleArn", allowed.arn(), "ARN of the allowed role");
    stack.add_output(
        "NotAllowedRoleArn",
        not_allowed.arn(),
        "ARN of the not allowed role",
    );
    Ok(stack)
}

fn add_execution_policy(
    stack: &mut Stack,
    config: &TagConfig,
    vpc_id: &Token,
) -> Result<Handle, GraphError> {
    let environment = &stack.environment;
    let log_group = Token::join([
        "arn:".into(),
        Token::partition(),
        ":logs:".into(),
        environment.region(),
        ":".into(),
        environment.account(),
        format!(":log-group:/aws/lambda/{}*", config.function_name()).into(),
    ]);
    let vpc_arn = Token::join([
        "arn:".into(),
        Token::partition(),
        ":ec2:".into(),
        environment.region(),
        ":".into(),
        environment.account(),
        ":vpc/".into(),
        vpc_id.clone(),
    ]);
    stack.add(Resource::new(
        "LambdaExecPolicy",
        ManagedPolicy {
            description: "Logging and network access for the secret fetching function"
                .to_string(),
            policy_document: PolicyDocument::new([
                PolicyStatement::allow()
                    .with_sid("AccessToLogs")
                    .with_actions([
                        "logs:CreateLogGroup",
                        "logs:CreateLogStream",
                        "logs:PutLogEvents",
                    ])
                    .with_resource(log_group),
                PolicyStatement::allow()
                    .with_sid("VpcENIAccess")
                    .with_actions(ENI_ACTIONS)
                    .with_resource(vpc_arn),
            ]),
        },
    ))
}

fn add_role(
    stack: &mut Stack,
    logical_id: &str,
    description: &str,
    managed_policy_arns: &[Token],
    tags: TagSet,
) -> Result<Handle, GraphError> {
    let trust = PolicyDocument::new([PolicyStatement::allow()
        .with_principal(Principal::service(LAMBDA_SERVICE))
        .with_principal(Principal::Account(stack.environment.account()))
        .with_actions(["sts:AssumeRole"])]);
    stack.add(
        Resource::new(
            logical_id,
            Role {
                description: Some(description.to_string()),
                assume_role_policy_document: trust,
                managed_policy_arns: managed_policy_arns.to_vec(),
            },
        )
        .with_tags(&tags),
    )
}

fn add_database(
    stack: &mut Stack,
    config: &TagConfig,
    secret_arn: &Token,
    vpc_id: &Token,
) -> Result<Handle, GraphError> {
    let security_group = stack.add(Resource::new(
        "DatabaseSecurityGroup",
        SecurityGroup {
            group_description: "MySQL access from inside the VPC".to_string(),
            vpc_id: vpc_id.clone(),
            security_group_ingress: vec![IngressRule {
                cidr_ip: VPC_CIDR.into(),
                ip_protocol: "tcp",
                from_port: MYSQL_PORT,
                to_port: MYSQL_PORT,
            }],
        },
    ))?;
    stack.add(
        Resource::new(
            "ServerlessCluster",
            ServerlessCluster {
                engine: "aurora-mysql",
                engine_version: "5.7.12",
                engine_mode: "serverless",
                master_user_secret: secret_arn.clone(),
                vpc_id: vpc_id.clone(),
                subnet_type: SubnetType::PrivateIsolated,
                vpc_security_group_ids: vec![security_group.attr("GroupId")],
                enable_http_endpoint: true,
                database_name: config.name.clone(),
                deletion_protection: true,
                rotation_days: ROTATION_DAYS,
            },
        )
        .with_tags(&config.resource_tags())
        .with_removal_policy(RemovalPolicy::Snapshot),
    )
}

fn add_function(
    stack: &mut Stack,
    config: &TagConfig,
    role: &Handle,
    secret_arn: Token,
    vpc_id: Token,
) -> Result<Handle, GraphError> {
    let retention_policy = stack.add(Resource::new(
        "LogRetentionPolicy",
        ManagedPolicy {
            description: "Sets the retention of the function's log group".to_string(),
            policy_document: PolicyDocument::new([PolicyStatement::allow()
                .with_actions(["logs:PutRetentionPolicy", "logs:DeleteRetentionPolicy"])
                .with_resource("*")]),
        },
    ))?;
    let retention_role = stack.add(Resource::new(
        "LogRetentionRole",
        Role {
            description: None,
            assume_role_policy_document: PolicyDocument::new([PolicyStatement::allow()
                .with_principal(Principal::service(LAMBDA_SERVICE))
                .with_actions(["sts:AssumeRole"])]),
            managed_policy_arns: vec![retention_policy.attr("PolicyArn")],
        },
    ))?;

    let endpoint = Token::join([
        "https://secretsmanager.".into(),
        stack.environment.region(),
        ".amazonaws.com".into(),
    ]);
    let environment = BTreeMap::from([
        ("ASM_ARN".to_string(), secret_arn),
        ("SECRETS_MANAGER_ENDPOINT".to_string(), endpoint),
    ]);
    stack.add(
        Resource::new(
            "AsmFetchFunction",
            Function {
                function_name: config.function_name(),
                description: "Check if lambda role can fetch asm secret".to_string(),
                runtime: FUNCTION_RUNTIME,
                handler: FUNCTION_HANDLER,
                code: FUNCTION_CODE.to_string(),
                environment,
                role: role.arn(),
                vpc_id,
                subnet_type: SubnetType::PrivateWithNat,
                timeout: FUNCTION_TIMEOUT.as_secs(),
                log_retention_in_days: LOG_RETENTION_DAYS,
                log_retention_role: Some(retention_role.arn()),
            },
        )
        .with_tags(&config.access_tags()),
    )
}

// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! VPC nested in the shared-secret stack: three subnet tiers, flow logs
//! and private endpoints for Secrets Manager and KMS.

use crate::constants::{FLOW_LOGS_SERVICE, VPC_CIDR, VPC_NAME};
use crate::errors::GraphError;
use crate::policy::{PolicyDocument, PolicyStatement, Principal};
use crate::resources::{
    FlowLog, InterfaceEndpoint, LogGroup, ManagedPolicy, Resource, Role, SubnetConfiguration,
    SubnetType, Vpc,
};
use crate::stack::{Handle, Stack};
use crate::tags::{ParameterSuffix, TagConfig, TagSet};
use crate::tokens::Token;

const ENDPOINT_SERVICES: [(&str, &str); 2] = [
    ("SecretsManagerEndpoint", "secretsmanager"),
    ("KmsEndpoint", "kms"),
];

/// Adds the network and publishes the VPC id. Returns the VPC.
pub fn add(stack: &mut Stack, config: &TagConfig) -> Result<Handle, GraphError> {
    let tags = config
        .resource_tags()
        .merged(&TagSet::from([("Name", VPC_NAME)]));
    let vpc = stack.add(
        Resource::new(
            "AppVpc",
            Vpc {
                cidr_block: VPC_CIDR.to_string(),
                enable_dns_hostnames: true,
                enable_dns_support: true,
                subnet_configuration: vec![
                    subnet("ingress", SubnetType::Public, 24),
                    subnet("application", SubnetType::PrivateWithNat, 24),
                    subnet("rds", SubnetType::PrivateIsolated, 28),
                ],
            },
        )
        .with_tags(&tags),
    )?;

    let log_group = stack.add(Resource::new(
        "FlowLogGroup",
        LogGroup {
            log_group_name: None,
            retention_in_days: None,
        },
    ))?;
    let delivery = stack.add(Resource::new(
        "FlowLogDeliveryPolicy",
        ManagedPolicy {
            description: "Lets VPC flow logs write to their log group".to_string(),
            policy_document: PolicyDocument::new([PolicyStatement::allow()
                .with_actions([
                    "logs:CreateLogStream",
                    "logs:PutLogEvents",
                    "logs:DescribeLogStreams",
                ])
                .with_resource(log_group.arn())]),
        },
    ))?;
    let role = stack.add(Resource::new(
        "FlowLogRole",
        Role {
            description: Some("Delivers VPC flow logs".to_string()),
            assume_role_policy_document: PolicyDocument::new([PolicyStatement::allow()
                .with_principal(Principal::service(FLOW_LOGS_SERVICE))
                .with_actions(["sts:AssumeRole"])]),
            managed_policy_arns: vec![delivery.attr("PolicyArn")],
        },
    ))?;
    stack.add(Resource::new(
        "FlowLog",
        FlowLog {
            resource_id: vpc.reference(),
            resource_type: "VPC",
            traffic_type: "ALL",
            log_destination_type: "cloud-watch-logs",
            log_group_name: log_group.reference(),
            deliver_logs_permission_arn: role.arn(),
        },
    ))?;

    let region = stack.environment.region();
    for (logical_id, service) in ENDPOINT_SERVICES {
        stack.add(Resource::new(
            logical_id,
            InterfaceEndpoint {
                vpc_id: vpc.reference(),
                service_name: Token::join([
                    "com.amazonaws.".into(),
                    region.clone(),
                    format!(".{service}").into(),
                ]),
                private_dns_enabled: true,
                vpc_endpoint_type: "Interface",
            },
        ))?;
    }

    stack.publish(
        "AppVpcSsmParam",
        config.parameter_key(ParameterSuffix::Vpc),
        "VPC of the sample application",
        vpc.reference(),
    )?;
    Ok(vpc)
}

fn subnet(name: &str, subnet_type: SubnetType, cidr_mask: u8) -> SubnetConfiguration {
    SubnetConfiguration {
        name: name.to_string(),
        subnet_type,
        cidr_mask,
    }
}

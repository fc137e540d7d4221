// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Private root certificate authority with its CRL bucket.
//!
//! The authority only becomes usable after its self-signed certificate is
//! issued and imported, so the activation chain is
//! `RootCA -> ActivationCertificate -> CaActivation`. Anything that needs an
//! active authority must depend on the returned activation handle.

use crate::constants::{
    ACM_PCA_SERVICE, ACM_SERVICE, ACTIVATION_VALIDITY_YEARS, CRL_EXPIRATION_DAYS,
    LOG_EXPIRATION_DAYS, ROOT_DOMAIN,
};
use crate::errors::GraphError;
use crate::policy::{PolicyDocument, PolicyStatement, Principal};
use crate::resources::{
    ActivationCertificate, Bucket, BucketPolicy, CaActivation, CaPermission, CaStatus,
    CertificateAuthority, CrlConfiguration, RemovalPolicy, Resource, Subject, Validity,
};
use crate::stack::{Handle, Stack};
use crate::tokens::Token;

const SIGNING_ALGORITHM: &str = "SHA256WITHRSA";

pub struct PrivateCa {
    pub authority: Handle,
    pub activation: Handle,
}

pub fn add(stack: &mut Stack, status: CaStatus) -> Result<PrivateCa, GraphError> {
    let logging = stack.add(
        Resource::new(
            "PcaLoggingBucket",
            Bucket {
                access_control: Some("LogDeliveryWrite".to_string()),
                versioned: true,
                encryption: "S3_MANAGED",
                enforce_ssl: true,
                block_public_access: true,
                logging_bucket: None,
                expiration_days: Some(LOG_EXPIRATION_DAYS),
            },
        )
        .with_removal_policy(RemovalPolicy::Retain),
    )?;
    let crl = stack.add(
        Resource::new(
            "CrlBucket",
            Bucket {
                access_control: None,
                versioned: true,
                encryption: "S3_MANAGED",
                enforce_ssl: true,
                block_public_access: false,
                logging_bucket: Some(logging.reference()),
                expiration_days: None,
            },
        )
        .with_removal_policy(RemovalPolicy::Retain),
    )?;
    let crl_policy = stack.add(Resource::new(
        "CrlBucketPolicy",
        BucketPolicy {
            bucket: crl.reference(),
            policy_document: PolicyDocument::new([PolicyStatement::allow()
                .with_principal(Principal::service(ACM_PCA_SERVICE))
                .with_actions([
                    "s3:PutObject",
                    "s3:PutObjectAcl",
                    "s3:GetBucketAcl",
                    "s3:GetBucketLocation",
                ])
                .with_resource(crl.arn())
                .with_resource(Token::join([crl.arn(), "/*".into()]))]),
        },
    ))?;

    let authority = stack.add(
        Resource::new(
            "RootCA",
            CertificateAuthority {
                ca_type: "ROOT",
                key_algorithm: "RSA_2048",
                signing_algorithm: SIGNING_ALGORITHM,
                subject: Subject {
                    organization: "AwesomeExampleAtWork".to_string(),
                    organizational_unit: "AwesomeTeamAtWork".to_string(),
                    country: "AU".to_string(),
                    state: "NSW".to_string(),
                    locality: "Sydney".to_string(),
                    common_name: ROOT_DOMAIN.to_string(),
                },
                crl_configuration: CrlConfiguration {
                    enabled: true,
                    expiration_in_days: CRL_EXPIRATION_DAYS,
                    custom_cname: ROOT_DOMAIN.to_string(),
                    s3_bucket_name: crl.reference(),
                    s3_object_acl: "BUCKET_OWNER_FULL_CONTROL",
                },
            },
        )
        .depends_on(crl_policy.id()),
    )?;
    let certificate = stack.add(Resource::new(
        "ActivationCertificate",
        ActivationCertificate {
            certificate_authority_arn: authority.arn(),
            certificate_signing_request: authority.attr("CertificateSigningRequest"),
            signing_algorithm: SIGNING_ALGORITHM,
            template_arn: Token::join([
                "arn:".into(),
                Token::partition(),
                ":acm-pca:::template/RootCACertificate/V1".into(),
            ]),
            validity: Validity {
                unit: "YEARS",
                value: ACTIVATION_VALIDITY_YEARS,
            },
        },
    ))?;
    let activation = stack.add(Resource::new(
        "CaActivation",
        CaActivation {
            certificate: certificate.attr("Certificate"),
            certificate_authority_arn: authority.arn(),
            status,
        },
    ))?;
    stack.add(
        Resource::new(
            "CaPermission",
            CaPermission {
                actions: ["IssueCertificate", "GetCertificate", "ListPermissions"]
                    .map(String::from)
                    .to_vec(),
                certificate_authority_arn: authority.arn(),
                principal: ACM_SERVICE.to_string(),
            },
        )
        .depends_on(activation.id()),
    )?;

    Ok(PrivateCa {
        authority,
        activation,
    })
}

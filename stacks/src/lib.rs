// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! # ABAC Stacks
//!
//! Infrastructure of an attribute based access control sample for Secrets
//! Manager, declared as typed resource graphs.
//!
//! ## Architecture
//!
//! ```text
//! tagconfig.json -> units -> App (stack graph) -> synth -> templates
//!                                 |
//!                                 +-> SimulatedCloud -> parameter store
//!                                          |
//!                                          +-> HTTP API <- secret-workload
//! ```
//!
//! Three stacks share identifiers through the parameter store:
//!
//! - **commonSecretsAndIamPolicyStack**: VPC, KMS key, the secret and the
//!   tag based access policy
//! - **RolesanywhereabacStack**: private CA, trust anchor, profile and the
//!   on-premises role
//! - **SampleAppOnAWSStack**: Aurora cluster, the secret reading function and
//!   the allowed and not-allowed roles
//!
//! ## Modules
//!
//! - [`access`]: sessions, certificate exchange and secret reads
//! - [`application`]: HTTP server setup with Axum, body limit and timeouts
//! - [`configuration`]: CLI argument parsing with clap
//! - [`constants`]: names, service principals, actions and limits
//! - [`errors`]: error types with HTTP response mapping
//! - [`graph`]: dependency graph with deterministic topological order
//! - [`models`]: request/response types with validation
//! - [`parameters`]: the shared parameter store
//! - [`policy`]: policy documents and their evaluation
//! - [`provider`]: simulated control plane applying stacks
//! - [`resources`]: typed resource definitions
//! - [`routes`]: HTTP route handlers (health, secrets, sessions)
//! - [`scenario`]: running the deployed function and on-premises exchange
//! - [`snapshot`]: provider state saved between runs
//! - [`stack`]: stacks, handles and the app
//! - [`tags`]: tag configuration and tag sets
//! - [`tokens`]: deploy-time values
//! - [`units`]: the three stacks
//!
//! ## Usage
//!
//! ```bash
//! abac-stacks synth --output cdk.out
//! abac-stacks invoke --not-allowed
//! abac-stacks serve --port 8080
//! ```

pub mod access;
pub mod application;
pub mod configuration;
pub mod constants;
pub mod errors;
pub mod graph;
pub mod models;
pub mod parameters;
pub mod policy;
pub mod provider;
pub mod resources;
pub mod routes;
pub mod scenario;
pub mod snapshot;
pub mod stack;
pub mod tags;
pub mod tokens;
pub mod units;

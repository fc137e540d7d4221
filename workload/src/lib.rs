// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! # Secret Workload
//!
//! The sample function of the consumer stack. It reads `ASM_ARN` and
//! `SECRETS_MANAGER_ENDPOINT` from its environment, describes and reads the
//! secret with its own identity, and checks that the secret holds MySQL
//! credentials.
//!
//! ## Modules
//!
//! - [`client`]: Secrets Manager JSON client built on reqwest
//! - [`configuration`]: environment contract parsed with clap
//! - [`constants`]: header names, targets and timeouts
//! - [`errors`]: workload error type
//! - [`handler`]: the function body
//! - [`models`]: wire types and secret validation

pub mod client;
pub mod configuration;
pub mod constants;
pub mod errors;
pub mod handler;
pub mod models;

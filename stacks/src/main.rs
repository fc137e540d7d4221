// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use abac_stacks::application::Application;
use abac_stacks::configuration::{Command, ServeOptions, StacksOptions};
use abac_stacks::resources::CaStatus;
use abac_stacks::scenario::{
    FunctionRole, deploy_in_memory, deploy_to_files, invoke_function, on_prem_session,
    role_session_token,
};
use abac_stacks::tags::TagConfig;
use abac_stacks::units::build_app;
use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        // this needs to be set to remove duplicated information in the log.
        .with_current_span(false)
        // this needs to be set to false, otherwise ANSI color codes will
        // show up in a confusing manner in CloudWatch logs.
        .with_ansi(false)
        // disabling time is handy because CloudWatch will add the ingestion time.
        .without_time()
        // remove the name of the function from every log entry
        .with_target(false)
        .init();

    // get configuration options from flags and environment variables
    let options = StacksOptions::parse();

    tracing::info!("[stacks] {:?}", &options);

    let config = TagConfig::load(&options.tag_config)
        .with_context(|| format!("loading {}", options.tag_config.display()))?;
    let environment = options.environment().await;

    match options.command {
        Command::Synth { output } => {
            let app = build_app(&config, &environment)?;
            for path in app.write_templates(&output)? {
                println!("{}", path.display());
            }
        }
        Command::Plan => {
            let app = build_app(&config, &environment)?;
            for stack in app.deploy_order()? {
                println!("{}", stack.name);
                for resource in stack.build_order()? {
                    println!("  {} ({})", resource.logical_id, resource.kind.type_name());
                }
            }
        }
        Command::Deploy { parameters, state } => {
            let app = build_app(&config, &environment)?;
            let reports = deploy_to_files(&app, &environment, &parameters, &state).await?;
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        Command::Serve(serve) => {
            let (cloud, _) = deploy_in_memory(&config, &environment, CaStatus::Active).await?;
            for role in [FunctionRole::Allowed, FunctionRole::NotAllowed] {
                let token = role_session_token(&cloud, role, "serve").await?;
                println!("{role:?} session token: {token}");
            }
            let application = Application::build(serve, cloud).await?;
            application.run_until_stopped().await?;
        }
        Command::Invoke { not_allowed } => {
            let (cloud, _) = deploy_in_memory(&config, &environment, CaStatus::Active).await?;
            let serve = ServeOptions {
                port: 0,
                ..ServeOptions::default()
            };
            let application = Application::build(serve.clone(), cloud.clone()).await?;
            let endpoint = format!("http://{}:{}", serve.host, application.port());
            tokio::spawn(application.run_until_stopped());

            let role = if not_allowed {
                FunctionRole::NotAllowed
            } else {
                FunctionRole::Allowed
            };
            let report = invoke_function(&cloud, &config, role, &endpoint).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Session { common_name } => {
            let (cloud, _) = deploy_in_memory(&config, &environment, CaStatus::Active).await?;
            let credential = on_prem_session(&cloud, &config, &common_name).await?;
            println!("{}", serde_json::to_string(&credential)?);
        }
    }

    Ok(())
}

// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use crate::configuration::ServeOptions;
use crate::constants::{REQUEST_BODY_LIMIT, REQUEST_TIMEOUT};
use crate::provider::SimulatedCloud;
use crate::routes;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::serve::Serve;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub cloud: Arc<SimulatedCloud>,
}

pub struct Application {
    port: u16,
    server: Serve<TcpListener, Router, Router>,
}

impl Application {
    pub async fn build(
        options: ServeOptions,
        cloud: Arc<SimulatedCloud>,
    ) -> Result<Self, std::io::Error> {
        let address = format!("{}:{}", options.host, options.port);
        let listener = TcpListener::bind(address).await?;
        let server = run(listener, cloud)?;
        let port = server.local_addr()?.port();

        tracing::info!("[stacks] listening at http://{}:{}", options.host, port);

        Ok(Self { port, server })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> {
        self.server.await
    }
}

/// Router with the secret, session and health endpoints behind the body
/// limit, timeout and trace layers.
pub fn create_router(cloud: Arc<SimulatedCloud>) -> Router {
    let state = Arc::new(AppState { cloud });

    Router::new()
        .route("/health", get(routes::health))
        .route("/", post(routes::secrets_manager))
        .route("/sessions", post(routes::create_session))
        .layer(DefaultBodyLimit::max(REQUEST_BODY_LIMIT))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tracing::instrument(skip(listener, cloud))]
pub fn run(
    listener: TcpListener,
    cloud: Arc<SimulatedCloud>,
) -> Result<Serve<TcpListener, Router, Router>, std::io::Error> {
    let app = create_router(cloud);
    Ok(axum::serve(listener, app))
}

//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (tracing, timeout, request ID)
//! - Bind server to listener
//! - Stop accepting on shutdown and drain in-flight requests

use axum::{
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::schema::ApiConfig;
use crate::http::handlers::{claim_reward, get_receipt, health, submit_intent};
use crate::http::request::{UuidRequestId, X_REQUEST_ID};
use crate::lifecycle::Shutdown;
use crate::relay::TransactionPipeline;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: TransactionPipeline,
}

/// HTTP server for the relay API.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(config: &ApiConfig, pipeline: TransactionPipeline) -> Self {
        let state = AppState { pipeline };
        let router = build_router(state, Duration::from_secs(config.request_timeout_secs));
        Self { router }
    }

    /// Serve until `shutdown` fires, then finish in-flight requests.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the Axum router with all middleware layers.
#[allow(deprecated)]
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/v1/intents", post(submit_intent))
        .route("/v1/claims/reward", post(claim_reward))
        .route("/v1/receipts/{key}", get(get_receipt))
        .route("/health", get(health))
        .with_state(state)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
        .layer(SetRequestIdLayer::new(X_REQUEST_ID, UuidRequestId))
}

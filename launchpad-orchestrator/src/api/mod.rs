//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod deploy;
pub mod error;
pub mod health;
pub mod run;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::CredentialValidator;
use crate::service::SessionRegistry;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub validator: Arc<dyn CredentialValidator>,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Deployment endpoints
        .route("/targets", get(deploy::list_targets))
        .route("/deploy/{target}", post(deploy::trigger_deployment))
        .route("/deploy/{target}/cancel", post(deploy::cancel_deployment))
        // Run endpoints
        .route("/status/{target}", get(run::get_target_status))
        .route("/runs/{id}", get(run::get_run))
        .route("/runs/{id}/events", get(run::stream_run_events))
        // Add state and middleware
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod auth;
pub mod config;
pub mod executor;
pub mod service;
pub mod shell;
pub mod stages;

use crate::api::AppState;
use crate::auth::{CredentialValidator, StaticTokenValidator};
use crate::config::Config;
use crate::executor::{RemoteExecutor, SshExecutor};
use crate::service::SessionRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Pick up a local .env before reading configuration
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "launchpad_orchestrator=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Launchpad Orchestrator...");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    tracing::info!(
        "Deploying to {} ({} target(s): {})",
        config.connection.destination(),
        config.targets.len(),
        config
            .targets
            .iter()
            .map(|t| t.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let validator: Arc<dyn CredentialValidator> = if config.auth_disabled {
        tracing::warn!("Caller authentication is disabled");
        Arc::new(StaticTokenValidator::allow_all())
    } else {
        Arc::new(StaticTokenValidator::new(config.api_tokens.clone()))
    };

    let bind_addr = config.bind_addr.clone();
    let executor: Arc<dyn RemoteExecutor> = Arc::new(SshExecutor::new());
    let registry = Arc::new(SessionRegistry::new(Arc::new(config), executor));

    // Build router with all API endpoints
    let app = api::create_router(AppState {
        registry,
        validator,
    });

    tracing::info!("Listening on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}

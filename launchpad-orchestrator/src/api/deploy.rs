//! Deployment API Handlers
//!
//! Trigger and cancel endpoints. Both require a caller credential.

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};
use launchpad_core::domain::run::PipelineRun;
use launchpad_core::domain::target::TargetSpec;
use launchpad_core::dto::deploy::TriggerResponse;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::auth::bearer_token;

/// GET /targets
/// List configured deployment targets
pub async fn list_targets(State(state): State<AppState>) -> Json<Vec<TargetSpec>> {
    Json(state.registry.targets().to_vec())
}

/// POST /deploy/{target}
/// Start a deployment of `target`
pub async fn trigger_deployment(
    State(state): State<AppState>,
    Path(target): Path<String>,
    headers: HeaderMap,
) -> ApiResult<(StatusCode, Json<TriggerResponse>)> {
    authorize(&state, &headers).await?;

    tracing::info!("Deployment requested for {}", target);

    let run = state.registry.trigger(&target).await.map_err(|e| {
        tracing::warn!("Deployment of {} rejected: {}", target, e);
        ApiError::from(e)
    })?;

    Ok((StatusCode::ACCEPTED, Json(TriggerResponse::from(&run))))
}

/// POST /deploy/{target}/cancel
/// Request cancellation of the target's in-flight run
pub async fn cancel_deployment(
    State(state): State<AppState>,
    Path(target): Path<String>,
    headers: HeaderMap,
) -> ApiResult<(StatusCode, Json<PipelineRun>)> {
    authorize(&state, &headers).await?;

    let run = state.registry.cancel(&target)?;

    Ok((StatusCode::ACCEPTED, Json(run)))
}

async fn authorize(state: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    if state.validator.validate(bearer_token(headers)).await {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

//! Run API Handlers
//!
//! Status snapshots and the live event stream of pipeline runs.

use axum::{
    Json,
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt, stream};
use launchpad_core::domain::run::PipelineRun;
use launchpad_core::dto::stream::{LaggedNotice, StreamFrame};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::service::log::{Delivery, LogSubscription};

/// GET /status/{target}
/// Current or last run of a target
pub async fn get_target_status(
    State(state): State<AppState>,
    Path(target): Path<String>,
) -> ApiResult<Json<PipelineRun>> {
    tracing::debug!("Getting status for {}", target);

    if !state.registry.targets().iter().any(|t| t.name == target) {
        return Err(ApiError::NotFound(format!("unknown target '{}'", target)));
    }

    let run = state
        .registry
        .status(&target)
        .ok_or_else(|| ApiError::NotFound(format!("no deployments of '{}' yet", target)))?;

    Ok(Json(run))
}

/// GET /runs/{id}
/// Snapshot of a run
pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PipelineRun>> {
    let run = state
        .registry
        .get_run(id)
        .ok_or_else(|| ApiError::NotFound(format!("Run {} not found", id)))?;

    Ok(Json(run))
}

/// GET /runs/{id}/events
/// Server-sent events: one snapshot, then live log events until the run ends
pub async fn stream_run_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, serde_json::Error>>>> {
    let (snapshot, subscription) = state
        .registry
        .subscribe(id)
        .ok_or_else(|| ApiError::NotFound(format!("Run {} not found", id)))?;

    tracing::debug!("Observer attached to run {}", id);

    let events = frames(snapshot, subscription).map(|frame| -> Result<Event, serde_json::Error> {
        Ok(Event::default()
            .event(frame.event_name())
            .data(frame.to_data()?))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

enum FrameState {
    Start(PipelineRun, Option<LogSubscription>),
    Live(LogSubscription),
    Done,
}

/// Frames for one observer: the snapshot, then events up to the terminal one
pub fn frames(
    snapshot: PipelineRun,
    subscription: Option<LogSubscription>,
) -> impl Stream<Item = StreamFrame> {
    stream::unfold(
        FrameState::Start(snapshot, subscription),
        |state| async move {
            match state {
                FrameState::Start(snapshot, subscription) => {
                    let next = match subscription {
                        Some(subscription) if !snapshot.is_terminal() => {
                            FrameState::Live(subscription)
                        }
                        _ => FrameState::Done,
                    };
                    Some((StreamFrame::Snapshot(Box::new(snapshot)), next))
                }
                FrameState::Live(mut subscription) => match subscription.next().await? {
                    Delivery::Event(event) => {
                        let next = if event.is_terminal() {
                            FrameState::Done
                        } else {
                            FrameState::Live(subscription)
                        };
                        Some((StreamFrame::Log(event), next))
                    }
                    Delivery::Lagged(skipped) => Some((
                        StreamFrame::Lagged(LaggedNotice { skipped }),
                        FrameState::Live(subscription),
                    )),
                },
                FrameState::Done => None,
            }
        },
    )
}

//! Run status and live event endpoints

use crate::LaunchpadClient;
use crate::error::{ClientError, Result};
use crate::sse::{SseMessage, SseParser};
use futures::stream::{self, BoxStream, StreamExt};
use launchpad_core::domain::run::PipelineRun;
use launchpad_core::dto::stream::StreamFrame;
use reqwest::header::ACCEPT;
use std::collections::VecDeque;
use std::pin::Pin;
use uuid::Uuid;

impl LaunchpadClient {
    /// Current or last run of a target
    pub async fn status(&self, target: &str) -> Result<PipelineRun> {
        let url = format!("{}/status/{}", self.base_url, target);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Snapshot of a run
    pub async fn get_run(&self, run_id: Uuid) -> Result<PipelineRun> {
        let url = format!("{}/runs/{}", self.base_url, run_id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Live frames of a run: a snapshot first, then log events
    ///
    /// The stream ends after the run's terminal transition (or right after
    /// the snapshot when the run had already finished).
    pub async fn stream_events(&self, run_id: Uuid) -> Result<BoxStream<'static, Result<StreamFrame>>> {
        let url = format!("{}/runs/{}/events", self.base_url, run_id);
        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        let response = self.check_status(response).await?;

        tracing::debug!("Following events of run {}", run_id);

        Ok(decode_frames(response.bytes_stream()).boxed())
    }
}

struct DecodeState<S> {
    body: Pin<Box<S>>,
    parser: SseParser,
    pending: VecDeque<SseMessage>,
    finished: bool,
}

/// Turns a raw SSE body into decoded frames, skipping unknown event names
fn decode_frames<S, B, E>(body: S) -> impl futures::Stream<Item = Result<StreamFrame>>
where
    S: futures::Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Into<ClientError> + Send,
{
    let state = DecodeState {
        body: Box::pin(body),
        parser: SseParser::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(message) = state.pending.pop_front() {
                match StreamFrame::decode(&message.event, &message.data) {
                    Ok(Some(frame)) => return Some((Ok(frame), state)),
                    Ok(None) => continue,
                    Err(e) => {
                        let err = ClientError::ParseError(format!(
                            "Invalid '{}' event: {}",
                            message.event, e
                        ));
                        return Some((Err(err), state));
                    }
                }
            }

            if state.finished {
                return None;
            }

            match state.body.next().await {
                Some(Ok(chunk)) => {
                    let messages = state.parser.push(chunk.as_ref());
                    state.pending.extend(messages);
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(e.into()), state));
                }
                None => state.finished = true,
            }
        }
    })
}

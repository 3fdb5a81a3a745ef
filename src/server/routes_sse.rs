//! SSE streaming of job events.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures::stream::{Stream, StreamExt};
use shiori_common::MetadataJobId;

use crate::server::routes_api::ApiError;
use crate::server::AppContext;

pub fn sse_routes() -> Router<AppContext> {
    Router::new().route("/jobs/:job_id/events", get(job_events))
}

/// Stream a job's events as unnamed SSE events carrying JSON payloads.
/// The stream ends once the job's terminal event has been delivered; a
/// subscriber attaching after completion still receives the terminal tail.
pub async fn job_events(
    State(ctx): State<AppContext>,
    Path(job_id): Path<MetadataJobId>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let events = ctx
        .jobs
        .get_metadata_job_events(&job_id)
        .ok_or_else(|| shiori_common::Error::not_found("job"))?;

    let stream = events.map(|event| {
        let data = serde_json::to_string(&event)
            .unwrap_or_else(|e| format!(r#"{{"error":"serialization failed: {e}"}}"#));
        Ok(Event::default().data(data))
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    ))
}

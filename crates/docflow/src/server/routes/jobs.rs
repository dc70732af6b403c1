//! Job watching, listing, cancellation and progress streaming

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::{future, stream, Stream, StreamExt};
use serde::Serialize;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

use crate::error::{Error, Result};
use crate::jobs::{JobEvent, JobKind, JobSnapshot, WatchRequest};
use crate::server::state::AppState;

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobSnapshot>,
    pub total: usize,
}

/// POST /api/jobs/:kind/watch - Start a server-side poller for a dispatched job
pub async fn watch_job(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(request): Json<WatchRequest>,
) -> Result<Json<JobSnapshot>> {
    let kind = JobKind::parse(&kind).ok_or_else(|| Error::invalid(format!("Unknown job kind: {}", kind)))?;
    let snapshot = state.watcher().watch(kind, &request).await?;
    Ok(Json(snapshot))
}

/// GET /api/jobs - All known jobs, newest first
pub async fn list_jobs(State(state): State<AppState>) -> Json<JobListResponse> {
    let jobs = state.jobs().list();
    Json(JobListResponse {
        total: jobs.len(),
        jobs,
    })
}

/// GET /api/jobs/:id
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobSnapshot>> {
    state
        .jobs()
        .get(&job_id)
        .map(Json)
        .ok_or_else(|| Error::not_found(format!("Job not found: {}", job_id)))
}

/// DELETE /api/jobs/:id - Stop watching locally; the upstream job keeps running
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobSnapshot>> {
    state
        .jobs()
        .cancel(&job_id)
        .map(Json)
        .ok_or_else(|| Error::not_found(format!("Job not found: {}", job_id)))
}

fn to_sse(event: &JobEvent) -> std::result::Result<Event, axum::Error> {
    Event::default().event(event.name()).json_data(&event.snapshot)
}

/// GET /api/jobs/:id/events - Server-Sent Events for one job.
///
/// The current snapshot is sent first; the stream ends after the first
/// terminal event. Events published before subscribing are not replayed.
pub async fn job_events(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>>> {
    // Subscribe before reading the snapshot so no transition falls in between
    let receiver = state.jobs().events().subscribe();
    let current = state
        .jobs()
        .get(&job_id)
        .ok_or_else(|| Error::not_found(format!("Job not found: {}", job_id)))?;

    tracing::debug!(
        job_id = %job_id,
        subscribers = state.jobs().events().subscriber_count(),
        "SSE subscriber attached"
    );

    let updates = BroadcastStream::new(receiver).filter_map(move |message| {
        let event = match message {
            Ok(event) if event.job_id == job_id => Some(event),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(missed)) => {
                tracing::warn!(job_id = %job_id, missed, "SSE subscriber lagged");
                None
            }
        };
        future::ready(event)
    });

    let events = stream::once(future::ready(JobEvent::new(current)))
        .chain(updates)
        .boxed();

    // Ends right after the terminal event
    let events = stream::unfold((events, false), |(mut events, finished)| async move {
        if finished {
            return None;
        }
        let event = events.next().await?;
        let finished = event.is_terminal();
        Some((to_sse(&event), (events, finished)))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

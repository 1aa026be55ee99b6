//! Collaborator-facing HTTP surface, served from the worker process: enqueue,
//! job/entity reads, and the per-job SSE progress stream. Auth, uploads and
//! user management live elsewhere; payload `userId`s arrive pre-verified.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use uuid::Uuid;

use crate::events::ProgressBus;
use crate::jobs::model::{Job, JobOptions, NewJob};
use crate::jobs::payload::ValidationError;
use crate::jobs::repo::EnqueueError;
use crate::jobs::{JobRunner, JobsRepo};
use crate::transcriptions::TranscriptionsRepo;

#[derive(Clone)]
pub struct ApiState {
    pub queue: String,
    pub jobs: JobsRepo,
    pub transcriptions: TranscriptionsRepo,
    pub runner: JobRunner,
    pub bus: Arc<ProgressBus>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/jobs", post(enqueue_job))
        .route("/jobs/:id", get(get_job))
        .route("/transcriptions/:id", get(get_transcription))
        .route("/progress/:job_id", get(progress_stream))
        .route("/maintenance/retry-failed-feedback", post(retry_failed_feedback))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnqueueRequest {
    queue_name: Option<String>,
    stage_name: String,
    payload: Value,
    #[serde(default)]
    options: Option<WireOptions>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireOptions {
    attempts: Option<i32>,
    backoff: Option<WireBackoff>,
    dedupe_key: Option<String>,
    remove_on_complete: Option<bool>,
    remove_on_fail: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct WireBackoff {
    #[serde(rename = "type")]
    kind: String,
    delay: i64,
}

async fn enqueue_job(
    State(state): State<ApiState>,
    Json(req): Json<EnqueueRequest>,
) -> Response {
    let mut options = JobOptions::default();
    if let Some(wire) = req.options {
        if let Some(attempts) = wire.attempts {
            options.max_attempts = attempts;
        }
        if let Some(backoff) = wire.backoff {
            if backoff.kind != "exponential" {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("unsupported backoff type: {}", backoff.kind),
                );
            }
            options.backoff_base_ms = backoff.delay;
        }
        options.dedupe_key = wire.dedupe_key;
        if let Some(v) = wire.remove_on_complete {
            options.remove_on_complete = v;
        }
        if let Some(v) = wire.remove_on_fail {
            options.remove_on_fail = v;
        }
    }

    let job = NewJob {
        queue: req.queue_name.unwrap_or_else(|| state.queue.clone()),
        stage: req.stage_name,
        payload: req.payload,
        options,
    };

    match state.jobs.enqueue(job).await {
        Ok(job_id) => (StatusCode::ACCEPTED, Json(json!({ "jobId": job_id }))).into_response(),
        Err(EnqueueError::Validation(err)) => {
            let status = match err {
                ValidationError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                _ => StatusCode::BAD_REQUEST,
            };
            error_response(status, err.to_string())
        }
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn get_job(State(state): State<ApiState>, Path(id): Path<Uuid>) -> Response {
    match state.jobs.get_job(id).await {
        Ok(Some(job)) => (StatusCode::OK, Json(job_view(&job))).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("job {id} not found")),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn get_transcription(State(state): State<ApiState>, Path(id): Path<Uuid>) -> Response {
    match state.transcriptions.get(id).await {
        Ok(Some(entity)) => (StatusCode::OK, Json(entity)).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("transcription {id} not found")),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

/// Live progress for one job. The subscription is dropped with the stream, so
/// a disconnecting client unregisters itself; the stream ends after a
/// terminal event. Clients that missed events fall back to `GET /jobs/:id`.
async fn progress_stream(
    State(state): State<ApiState>,
    Path(job_id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.bus.clone().subscribe(job_id);

    let stream = futures::stream::unfold(Some(subscription), |sub| async move {
        let mut sub = sub?;
        let event = sub.recv().await?;
        let done = event.is_terminal();
        let sse_event = Event::default()
            .event(event.name())
            .data(event.data().to_string());
        Some((Ok::<_, Infallible>(sse_event), if done { None } else { Some(sub) }))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn retry_failed_feedback(State(state): State<ApiState>) -> Response {
    match state
        .runner
        .retry_failed_feedback(&state.transcriptions, &state.queue)
        .await
    {
        Ok(requeued) => (StatusCode::OK, Json(json!({ "requeued": requeued }))).into_response(),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

fn job_view(job: &Job) -> Value {
    json!({
        "id": job.id,
        "queueName": job.queue,
        "stageName": job.stage,
        "state": job.state,
        "attempts": job.attempts,
        "maxAttempts": job.max_attempts,
        "progress": {
            "percent": job.progress_percent,
            "stage": job.progress_stage,
        },
        "result": job.result,
        "lastError": job.last_error_code.as_ref().map(|code| json!({
            "code": code,
            "message": job.last_error_message,
        })),
        "failedReason": job.failed_reason,
        "runAt": job.run_at,
        "createdAt": job.created_at,
        "updatedAt": job.updated_at,
    })
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

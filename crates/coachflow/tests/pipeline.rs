mod common;

use common::try_setup_db;

use coachflow::events::ProgressBus;
use coachflow::jobs::error_codes::ErrorCode;
use coachflow::jobs::payload::{
    FeedbackJobPayload, TranscriptionJobPayload, STAGE_FEEDBACK, STAGE_TRANSCRIPTION,
};
use coachflow::jobs::{Job, JobOptions, JobRunner, JobsRepo, NewJob};
use coachflow::providers::{
    FallbackChain, FeedbackProvider, MockFeedbackProvider, MockTranscriptionProvider, PollStatus,
    TranscriptionProvider,
};
use coachflow::stages::{self, PollConfig, StageDeps};
use coachflow::transcriptions::{Transcription, TranscriptionsRepo};
use coachflow::worker::{boxed, HandlerRegistry, WorkerPool, WorkerPoolConfig};
use serde_json::json;
use serial_test::serial;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const COACH_RESPONSE: &str = r#"<feedback_json>{
    "summary": "Solid delivery with a few fillers.",
    "metrics": { "totalWords": 8, "fillerWordsCount": 2, "paceWordsPerMinute": 48 },
    "scores": { "clarity": 80, "confidence": 72, "engagement": 68, "structure": 75, "language": 82 },
    "strengths": ["conversational tone"],
    "improvements": ["fewer fillers"],
    "suggestions": ["pause instead of um"]
}</feedback_json>
<advice>Practice pausing silently where you would normally say um or uh.</advice>"#;

fn deps_with(
    pool: &PgPool,
    stt: Arc<dyn TranscriptionProvider>,
    coach: FallbackChain,
) -> StageDeps {
    let jobs = JobsRepo::new(pool.clone());
    let bus = Arc::new(ProgressBus::new());
    StageDeps {
        queue: "tasks".to_string(),
        jobs: jobs.clone(),
        transcriptions: TranscriptionsRepo::new(pool.clone()),
        runner: JobRunner::new(jobs, bus),
        stt,
        coach,
        poll: PollConfig {
            interval: Duration::from_millis(2),
            max_attempts: 3,
        },
    }
}

fn mock_coach(name: &str) -> FallbackChain {
    FallbackChain::single(Arc::new(MockFeedbackProvider::succeeding(
        name,
        COACH_RESPONSE,
    )))
}

async fn claimed_transcription_job(deps: &StageDeps, entity: &Transcription) -> Job {
    let payload = serde_json::to_value(TranscriptionJobPayload {
        file_id: entity.file_id.clone(),
        transcription_id: entity.id,
        user_id: entity.user_id.clone(),
        file_url: "https://cdn.example.com/recording.mp3".to_string(),
    })
    .unwrap();

    deps.jobs
        .enqueue(NewJob {
            queue: "tasks".to_string(),
            stage: STAGE_TRANSCRIPTION.to_string(),
            payload,
            options: JobOptions::default(),
        })
        .await
        .unwrap();

    deps.jobs
        .claim("tasks", "worker-test", 30)
        .await
        .unwrap()
        .expect("transcription job claimable")
}

async fn claimed_feedback_job(deps: &StageDeps, entity: &Transcription) -> Job {
    let payload = serde_json::to_value(FeedbackJobPayload {
        transcription_id: entity.id,
        text: entity.text.clone().unwrap_or_default(),
        user_id: entity.user_id.clone(),
        file_id: entity.file_id.clone(),
    })
    .unwrap();

    deps.jobs
        .enqueue(NewJob {
            queue: "tasks".to_string(),
            stage: STAGE_FEEDBACK.to_string(),
            payload,
            options: JobOptions::default(),
        })
        .await
        .unwrap();

    deps.jobs
        .claim("tasks", "worker-test", 30)
        .await
        .unwrap()
        .expect("feedback job claimable")
}

async fn live_feedback_jobs(pool: &PgPool, transcription_id: Uuid) -> i64 {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM jobs WHERE stage = 'feedback' AND dedupe_key = $1",
    )
    .bind(format!("feedback:{transcription_id}"))
    .fetch_one(pool)
    .await
    .unwrap()
}

#[tokio::test]
#[serial]
async fn successful_transcription_chains_exactly_one_feedback_job() {
    let Some(pool) = try_setup_db().await else { return };

    let deps = deps_with(
        &pool,
        Arc::new(MockTranscriptionProvider::synchronous(
            "um so I think this is uh good",
        )),
        mock_coach("coach-a"),
    );

    let entity = deps.transcriptions.create("f-1", "u-1", Some(10.0)).await.unwrap();
    let job = claimed_transcription_job(&deps, &entity).await;

    let result = stages::transcription::run(&job, &deps).await.unwrap();
    assert_eq!(result["transcriptionId"], json!(entity.id));

    let updated = deps.transcriptions.get(entity.id).await.unwrap().unwrap();
    assert_eq!(updated.status, "completed");
    assert_eq!(updated.text.as_deref(), Some("um so I think this is uh good"));
    assert_eq!(updated.provider.as_deref(), Some("mock"));
    assert!(updated.completed_at.is_some());

    assert_eq!(live_feedback_jobs(&pool, entity.id).await, 1);

    // a stale retry of the same handler must not enqueue a second feedback job
    stages::transcription::run(&job, &deps).await.unwrap();
    assert_eq!(live_feedback_jobs(&pool, entity.id).await, 1);

    let again = deps.transcriptions.get(entity.id).await.unwrap().unwrap();
    assert_eq!(again.status, "completed");
}

#[tokio::test]
#[serial]
async fn polling_timeout_fails_entity_without_chaining() {
    let Some(pool) = try_setup_db().await else { return };

    // the scripted poll never reaches a terminal status
    let deps = deps_with(
        &pool,
        Arc::new(MockTranscriptionProvider::polling(vec![])),
        mock_coach("coach-a"),
    );

    let entity = deps.transcriptions.create("f-2", "u-1", None).await.unwrap();
    let job = claimed_transcription_job(&deps, &entity).await;

    let err = stages::transcription::run(&job, &deps).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::PollingTimeout);

    let updated = deps.transcriptions.get(entity.id).await.unwrap().unwrap();
    assert_eq!(updated.status, "failed");
    assert!(
        updated.error_message.unwrap().contains("polling timed out"),
        "timeout must be identifiable in the error message"
    );
    assert_eq!(live_feedback_jobs(&pool, entity.id).await, 0);
}

#[tokio::test]
#[serial]
async fn provider_reported_failure_is_distinct_from_timeout() {
    let Some(pool) = try_setup_db().await else { return };

    let deps = deps_with(
        &pool,
        Arc::new(MockTranscriptionProvider::polling(vec![PollStatus::Failed {
            reason: "audio file is corrupt".into(),
        }])),
        mock_coach("coach-a"),
    );

    let entity = deps.transcriptions.create("f-3", "u-1", None).await.unwrap();
    let job = claimed_transcription_job(&deps, &entity).await;

    let err = stages::transcription::run(&job, &deps).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ProviderFailed);

    let updated = deps.transcriptions.get(entity.id).await.unwrap().unwrap();
    assert_eq!(updated.status, "failed");
    let message = updated.error_message.unwrap();
    assert!(message.contains("audio file is corrupt"));
    assert!(!message.contains("polling timed out"));
    assert_eq!(live_feedback_jobs(&pool, entity.id).await, 0);
}

#[tokio::test]
#[serial]
async fn feedback_stage_completes_the_entity_idempotently() {
    let Some(pool) = try_setup_db().await else { return };

    let deps = deps_with(
        &pool,
        Arc::new(MockTranscriptionProvider::synchronous("unused")),
        mock_coach("coach-a"),
    );

    let entity = deps.transcriptions.create("f-4", "u-1", Some(10.0)).await.unwrap();
    deps.transcriptions
        .complete_transcript(entity.id, "um so I think this is uh good", Some("en"), Some(0.9), &json!({}))
        .await
        .unwrap();
    let entity = deps.transcriptions.get(entity.id).await.unwrap().unwrap();

    let job = claimed_feedback_job(&deps, &entity).await;
    let result = stages::feedback::run(&job, &deps).await.unwrap();
    assert_eq!(result["coachModel"], "coach-a");

    let updated = deps.transcriptions.get(entity.id).await.unwrap().unwrap();
    assert_eq!(updated.feedback_status, "completed");
    assert_eq!(updated.status, "completed");
    let feedback = updated.feedback.clone().unwrap();
    assert_eq!(feedback["summary"], "Solid delivery with a few fillers.");
    assert!(updated.feedback_advice.clone().unwrap().contains("Practice pausing"));
    assert_eq!(updated.metadata["coachModel"], "coach-a");

    // re-running the handler (retried job) converges to the same single state
    stages::feedback::run(&job, &deps).await.unwrap();
    let again = deps.transcriptions.get(entity.id).await.unwrap().unwrap();
    assert_eq!(again.feedback_status, "completed");
    assert_eq!(again.feedback.unwrap()["summary"], feedback["summary"]);
    assert_eq!(again.feedback_advice, updated.feedback_advice);
}

#[tokio::test]
#[serial]
async fn fallback_chain_records_the_winning_provider() {
    let Some(pool) = try_setup_db().await else { return };

    let chain = FallbackChain::new(vec![
        Arc::new(MockFeedbackProvider::failing("coach-a", "quota exceeded"))
            as Arc<dyn FeedbackProvider>,
        Arc::new(MockFeedbackProvider::failing("coach-b", "timeout")),
        Arc::new(MockFeedbackProvider::succeeding("coach-c", COACH_RESPONSE)),
    ]);
    let deps = deps_with(
        &pool,
        Arc::new(MockTranscriptionProvider::synchronous("unused")),
        chain,
    );

    let entity = deps.transcriptions.create("f-5", "u-1", None).await.unwrap();
    deps.transcriptions
        .complete_transcript(entity.id, "a fine talk about rust", None, None, &json!({}))
        .await
        .unwrap();
    let entity = deps.transcriptions.get(entity.id).await.unwrap().unwrap();

    let job = claimed_feedback_job(&deps, &entity).await;
    stages::feedback::run(&job, &deps).await.unwrap();

    let updated = deps.transcriptions.get(entity.id).await.unwrap().unwrap();
    assert_eq!(updated.feedback_status, "completed");
    assert_eq!(updated.metadata["coachModel"], "coach-c");
}

#[tokio::test]
#[serial]
async fn exhausted_chain_fails_feedback_with_aggregated_reasons() {
    let Some(pool) = try_setup_db().await else { return };

    let chain = FallbackChain::new(vec![
        Arc::new(MockFeedbackProvider::failing("coach-a", "quota exceeded"))
            as Arc<dyn FeedbackProvider>,
        Arc::new(MockFeedbackProvider::failing("coach-b", "connection refused")),
    ]);
    let deps = deps_with(
        &pool,
        Arc::new(MockTranscriptionProvider::synchronous("unused")),
        chain,
    );

    let entity = deps.transcriptions.create("f-6", "u-1", None).await.unwrap();
    deps.transcriptions
        .complete_transcript(entity.id, "some transcript", None, None, &json!({}))
        .await
        .unwrap();
    let entity = deps.transcriptions.get(entity.id).await.unwrap().unwrap();

    let job = claimed_feedback_job(&deps, &entity).await;
    let err = stages::feedback::run(&job, &deps).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::FallbackExhausted);

    let updated = deps.transcriptions.get(entity.id).await.unwrap().unwrap();
    assert_eq!(updated.feedback_status, "failed");
    let message = updated.error_message.unwrap();
    assert!(message.contains("coach-a") && message.contains("quota exceeded"));
    assert!(message.contains("coach-b") && message.contains("connection refused"));

    // the transcription itself is untouched
    assert_eq!(updated.status, "completed");
    assert_eq!(updated.text.as_deref(), Some("some transcript"));
}

#[tokio::test]
#[serial]
async fn parse_failure_preserves_the_completed_transcription() {
    let Some(pool) = try_setup_db().await else { return };

    let deps = deps_with(
        &pool,
        Arc::new(MockTranscriptionProvider::synchronous("unused")),
        FallbackChain::single(Arc::new(MockFeedbackProvider::succeeding(
            "coach-a",
            "I refuse to emit JSON today.",
        ))),
    );

    let entity = deps.transcriptions.create("f-7", "u-1", None).await.unwrap();
    deps.transcriptions
        .complete_transcript(entity.id, "some transcript", None, None, &json!({}))
        .await
        .unwrap();
    let entity = deps.transcriptions.get(entity.id).await.unwrap().unwrap();

    let job = claimed_feedback_job(&deps, &entity).await;
    let err = stages::feedback::run(&job, &deps).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Parse);

    let updated = deps.transcriptions.get(entity.id).await.unwrap().unwrap();
    assert_eq!(updated.feedback_status, "failed");
    assert_eq!(updated.status, "completed", "parse failure must not revert the transcription");
    // raw output retained for diagnosis
    assert_eq!(updated.metadata["coachRaw"], "I refuse to emit JSON today.");
    assert!(updated.feedback.is_none());
}

#[tokio::test]
#[serial]
async fn retry_failed_feedback_sweep_requeues_only_usable_entities() {
    let Some(pool) = try_setup_db().await else { return };

    let deps = deps_with(
        &pool,
        Arc::new(MockTranscriptionProvider::synchronous("unused")),
        mock_coach("coach-a"),
    );

    // failed feedback with text: should be requeued
    let retryable = deps.transcriptions.create("f-8", "u-1", None).await.unwrap();
    deps.transcriptions
        .complete_transcript(retryable.id, "usable transcript", None, None, &json!({}))
        .await
        .unwrap();
    deps.transcriptions
        .fail_feedback(retryable.id, "parse failed", &json!({}))
        .await
        .unwrap();

    // failed feedback without text: skipped
    let empty = deps.transcriptions.create("f-9", "u-1", None).await.unwrap();
    deps.transcriptions
        .fail_feedback(empty.id, "no transcription text to analyze", &json!({}))
        .await
        .unwrap();

    let requeued = deps
        .runner
        .retry_failed_feedback(&deps.transcriptions, "tasks")
        .await
        .unwrap();
    assert_eq!(requeued, 1);
    assert_eq!(live_feedback_jobs(&pool, retryable.id).await, 1);
    assert_eq!(live_feedback_jobs(&pool, empty.id).await, 0);

    // a second sweep dedupes against the job queued by the first
    let requeued_again = deps
        .runner
        .retry_failed_feedback(&deps.transcriptions, "tasks")
        .await
        .unwrap();
    assert_eq!(requeued_again, 1);
    assert_eq!(live_feedback_jobs(&pool, retryable.id).await, 1);
}

fn test_registry() -> Arc<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();
    registry.register(STAGE_TRANSCRIPTION, |job, deps| {
        boxed(stages::transcription::run(job, deps))
    });
    registry.register(STAGE_FEEDBACK, |job, deps| {
        boxed(stages::feedback::run(job, deps))
    });
    Arc::new(registry)
}

fn fast_pool_cfg() -> WorkerPoolConfig {
    WorkerPoolConfig {
        queue: "tasks".to_string(),
        concurrency: 2,
        lease_seconds: 30,
        heartbeat_interval: Duration::from_secs(10),
        reap_interval: Duration::from_millis(100),
        idle_sleep: Duration::from_millis(10),
    }
}

#[tokio::test]
#[serial]
async fn worker_pool_runs_both_stages_end_to_end() {
    let Some(pool) = try_setup_db().await else { return };

    let deps = Arc::new(deps_with(
        &pool,
        Arc::new(MockTranscriptionProvider::synchronous(
            "um so I think this is uh good",
        )),
        mock_coach("coach-a"),
    ));

    let entity = deps.transcriptions.create("f-10", "u-1", Some(10.0)).await.unwrap();
    let payload = serde_json::to_value(TranscriptionJobPayload {
        file_id: entity.file_id.clone(),
        transcription_id: entity.id,
        user_id: entity.user_id.clone(),
        file_url: "https://cdn.example.com/recording.mp3".to_string(),
    })
    .unwrap();
    deps.jobs
        .enqueue(NewJob {
            queue: "tasks".to_string(),
            stage: STAGE_TRANSCRIPTION.to_string(),
            payload,
            options: JobOptions::default(),
        })
        .await
        .unwrap();

    let handles = WorkerPool::new(test_registry(), deps.clone(), fast_pool_cfg()).spawn("pool-test");

    // both stages should complete well within the deadline
    let mut finished = false;
    for _ in 0..200 {
        tokio::time::sleep(Duration::from_millis(25)).await;
        let current = deps.transcriptions.get(entity.id).await.unwrap().unwrap();
        if current.feedback_status == "completed" {
            finished = true;
            break;
        }
    }

    for handle in &handles {
        handle.abort();
    }

    assert!(finished, "pipeline did not finish in time");
    let final_entity = deps.transcriptions.get(entity.id).await.unwrap().unwrap();
    assert_eq!(final_entity.status, "completed");
    assert_eq!(final_entity.feedback_status, "completed");
    assert_eq!(final_entity.metadata["coachModel"], "coach-a");
}

#[tokio::test]
#[serial]
async fn worker_pool_steps_over_unknown_stages() {
    let Some(pool) = try_setup_db().await else { return };

    let deps = Arc::new(deps_with(
        &pool,
        Arc::new(MockTranscriptionProvider::synchronous("unused")),
        mock_coach("coach-a"),
    ));

    let job_id = deps
        .jobs
        .enqueue(NewJob {
            queue: "tasks".to_string(),
            stage: "reindex".to_string(),
            payload: json!({ "anything": true }),
            options: JobOptions::default(),
        })
        .await
        .unwrap();

    let handles = WorkerPool::new(test_registry(), deps.clone(), fast_pool_cfg()).spawn("pool-test");

    let mut state = String::new();
    for _ in 0..200 {
        tokio::time::sleep(Duration::from_millis(25)).await;
        let job = deps.jobs.get_job(job_id).await.unwrap().unwrap();
        state = job.state.clone();
        if state == "completed" {
            assert_eq!(job.result.unwrap()["skipped"], true);
            break;
        }
    }

    for handle in &handles {
        handle.abort();
    }

    assert_eq!(state, "completed", "unknown stage must complete as a no-op");
}

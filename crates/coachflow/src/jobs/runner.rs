use crate::events::{JobEvent, ProgressBus};
use crate::jobs::error_codes::ErrorCode;
use crate::jobs::model::{JobOptions, NewJob};
use crate::jobs::payload::{FeedbackJobPayload, STAGE_FEEDBACK};
use crate::jobs::repo::{FailDisposition, JobsRepo};
use crate::transcriptions::TranscriptionsRepo;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Pairs job-store transitions with event-bus publishes so the two can never
/// drift apart across call sites. The bus is a best-effort live view; the
/// store write always happens first.
#[derive(Clone)]
pub struct JobRunner {
    jobs: JobsRepo,
    bus: Arc<ProgressBus>,
}

impl JobRunner {
    pub fn new(jobs: JobsRepo, bus: Arc<ProgressBus>) -> Self {
        Self { jobs, bus }
    }

    pub fn jobs(&self) -> &JobsRepo {
        &self.jobs
    }

    pub fn bus(&self) -> &Arc<ProgressBus> {
        &self.bus
    }

    pub async fn complete(
        &self,
        job_id: Uuid,
        worker_id: &str,
        result: Value,
    ) -> anyhow::Result<()> {
        if self.jobs.complete(job_id, worker_id, &result).await? {
            self.bus.publish(job_id, JobEvent::Completed { result });
        } else {
            warn!(%job_id, worker_id, "stale completion ignored, lease no longer held");
        }
        Ok(())
    }

    /// A `failed` event is only published when the job reaches a terminal
    /// state; retries reschedule silently and surface through progress.
    pub async fn fail(
        &self,
        job_id: Uuid,
        worker_id: &str,
        code: ErrorCode,
        message: &str,
    ) -> anyhow::Result<FailDisposition> {
        let disposition = self
            .jobs
            .fail(job_id, worker_id, code.as_str(), message)
            .await?;

        match &disposition {
            FailDisposition::Retried {
                attempts,
                next_run_at,
            } => {
                info!(%job_id, attempts, %next_run_at, code = code.as_str(), "job requeued with backoff");
            }
            FailDisposition::Failed { attempts, reason } => {
                info!(%job_id, attempts, reason, code = code.as_str(), "job terminally failed");
                self.bus.publish(
                    job_id,
                    JobEvent::Failed {
                        error: message.to_string(),
                    },
                );
            }
            FailDisposition::Removed { attempts } => {
                info!(%job_id, attempts, "failed job removed per its options");
                self.bus.publish(
                    job_id,
                    JobEvent::Failed {
                        error: message.to_string(),
                    },
                );
            }
            FailDisposition::LeaseLost => {
                warn!(%job_id, worker_id, "stale failure ignored, lease no longer held");
            }
        }

        Ok(disposition)
    }

    /// Best-effort: a progress write that fails must not fail the handler.
    pub async fn report_progress(&self, job_id: Uuid, percent: i32, stage_label: &str) {
        if let Err(err) = self.jobs.report_progress(job_id, percent, stage_label).await {
            warn!(%job_id, %err, "progress update failed");
        }
        self.bus.publish(
            job_id,
            JobEvent::Progress {
                percent,
                stage: stage_label.to_string(),
            },
        );
    }

    /// Sweep transcriptions whose feedback run failed and queue a fresh
    /// feedback job for each. Deduped per transcription, so repeated sweeps
    /// (or a sweep racing the pipeline) cannot stack duplicate jobs.
    pub async fn retry_failed_feedback(
        &self,
        transcriptions: &TranscriptionsRepo,
        queue: &str,
    ) -> anyhow::Result<u32> {
        let failed = transcriptions.list_failed_feedback().await?;
        info!(count = failed.len(), "found transcriptions with failed feedback");

        let mut requeued = 0;
        for t in failed {
            let text = t.text.clone().unwrap_or_default();
            if text.trim().is_empty() {
                continue;
            }

            let payload = serde_json::to_value(FeedbackJobPayload {
                transcription_id: t.id,
                text,
                user_id: t.user_id.clone(),
                file_id: t.file_id.clone(),
            })?;

            let job = NewJob {
                queue: queue.to_string(),
                stage: STAGE_FEEDBACK.to_string(),
                payload,
                options: JobOptions {
                    dedupe_key: Some(format!("feedback:{}", t.id)),
                    ..JobOptions::default()
                },
            };

            match self.jobs.enqueue(job).await {
                Ok(job_id) => {
                    info!(transcription_id = %t.id, %job_id, "feedback retry queued");
                    requeued += 1;
                }
                Err(err) => {
                    warn!(transcription_id = %t.id, %err, "could not queue feedback retry");
                }
            }
        }

        Ok(requeued)
    }
}

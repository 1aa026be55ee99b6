use crate::jobs::model::{Job, JobState, NewJob};
use crate::jobs::payload::{validate_stage_payload, ValidationError};
use crate::jobs::retry::{classify_error, next_delay_ms, ErrorClass, RetryConfig};
use chrono::{DateTime, Utc};
use rand::{rngs::StdRng, SeedableRng};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("dedupe race while resolving the existing job")]
    DedupeRace,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// What `fail` decided to do with the job, so callers can log and publish
/// the right event without re-deriving the retry policy.
#[derive(Debug, Clone)]
pub enum FailDisposition {
    Retried {
        attempts: i32,
        next_run_at: DateTime<Utc>,
    },
    Failed {
        attempts: i32,
        reason: &'static str,
    },
    Removed {
        attempts: i32,
    },
    /// The caller no longer holds the lease; nothing was written.
    LeaseLost,
}

#[derive(Clone)]
pub struct JobsRepo {
    pool: PgPool,
    retry: RetryConfig,
    max_payload_bytes: usize,
}

impl JobsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            retry: RetryConfig::default(),
            max_payload_bytes: 256 * 1024,
        }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_payload_bytes(mut self, max: usize) -> Self {
        self.max_payload_bytes = max;
        self
    }

    // ----------------------------
    // Enqueue
    // ----------------------------

    /// Insert a new waiting job. Payloads are validated structurally before
    /// anything touches the database; a job with a `dedupe_key` that matches a
    /// live (waiting or active) job in the same queue resolves to that job's id
    /// instead of inserting a duplicate.
    pub async fn enqueue(&self, job: NewJob) -> Result<Uuid, EnqueueError> {
        validate_stage_payload(&job.stage, &job.payload)?;

        let payload_bytes = serde_json::to_vec(&job.payload)
            .map(|b| b.len())
            .unwrap_or(usize::MAX);
        if payload_bytes > self.max_payload_bytes {
            return Err(ValidationError::PayloadTooLarge {
                max: self.max_payload_bytes,
                actual: payload_bytes,
            }
            .into());
        }

        let id = Uuid::new_v4();
        let inserted = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO jobs (
                id, queue, stage, payload, state,
                attempts, max_attempts, backoff_base_ms,
                dedupe_key, remove_on_complete, remove_on_fail, run_at
            )
            VALUES ($1, $2, $3, $4, $5, 0, $6, $7, $8, $9, $10, now())
            ON CONFLICT (queue, dedupe_key) WHERE state IN ('waiting', 'active') DO NOTHING
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(&job.queue)
        .bind(&job.stage)
        .bind(&job.payload)
        .bind(JobState::Waiting.as_str())
        .bind(job.options.max_attempts)
        .bind(job.options.backoff_base_ms)
        .bind(&job.options.dedupe_key)
        .bind(job.options.remove_on_complete)
        .bind(job.options.remove_on_fail)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(id) = inserted {
            return Ok(id);
        }

        // dedupe hit: hand back the live job carrying the same key
        let existing = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id FROM jobs
            WHERE queue = $1 AND dedupe_key = $2 AND state IN ('waiting', 'active')
            LIMIT 1
            "#,
        )
        .bind(&job.queue)
        .bind(&job.options.dedupe_key)
        .fetch_optional(&self.pool)
        .await?;

        existing.ok_or(EnqueueError::DedupeRace)
    }

    // ----------------------------
    // Reads
    // ----------------------------

    pub async fn get_job(&self, job_id: Uuid) -> anyhow::Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    // ----------------------------
    // Leasing
    // ----------------------------

    /// Claim exactly one ready job for this worker.
    ///
    /// Correctness: SELECT ... FOR UPDATE SKIP LOCKED inside a transaction, so
    /// two concurrent claimers can never take the same row. Ordering among
    /// ready jobs is run_at then created_at, i.e. approximately FIFO with
    /// backed-off retries slotting in at their scheduled time.
    pub async fn claim(
        &self,
        queue: &str,
        worker_id: &str,
        lease_seconds: i64,
    ) -> anyhow::Result<Option<Job>> {
        let mut tx = self.pool.begin().await?;

        let candidate = sqlx::query_as::<_, Job>(
            r#"
            SELECT *
            FROM jobs
            WHERE queue = $1
              AND state = 'waiting'
              AND run_at <= now()
            ORDER BY run_at ASC, created_at ASC
            FOR UPDATE SKIP LOCKED
            LIMIT 1
            "#,
        )
        .bind(queue)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(job) = candidate else {
            tx.commit().await?;
            return Ok(None);
        };

        let leased = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET state = 'active',
                locked_by = $2,
                locked_at = now(),
                lock_expires_at = now() + ($3::int * interval '1 second'),
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(job.id)
        .bind(worker_id)
        .bind(lease_seconds)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(leased))
    }

    /// Extend the lease of a job this worker is still processing. Returns
    /// false when the lease is no longer held (expired and reclaimed, or the
    /// job already reached a terminal state); the handler's writes will then
    /// be ignored by `complete`/`fail` as well.
    pub async fn heartbeat(
        &self,
        job_id: Uuid,
        worker_id: &str,
        lease_seconds: i64,
    ) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET lock_expires_at = now() + ($3::int * interval '1 second'),
                updated_at = now()
            WHERE id = $1
              AND locked_by = $2
              AND state = 'active'
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(lease_seconds)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    /// Return expired active jobs to the waiting state so another worker can
    /// claim them. Attempts are not consumed by a crash; only handler-reported
    /// failures count against the budget.
    pub async fn reap_expired_leases(&self) -> anyhow::Result<u64> {
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'waiting',
                locked_by = NULL,
                locked_at = NULL,
                lock_expires_at = NULL,
                updated_at = now()
            WHERE state = 'active'
              AND lock_expires_at IS NOT NULL
              AND lock_expires_at < now()
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected())
    }

    // ----------------------------
    // State transitions
    // ----------------------------

    /// Mark a job completed (or delete it when `remove_on_complete`). Returns
    /// false when the caller's lease is gone, so a stale worker finishing after
    /// reclaim must not overwrite the fresh owner's run.
    pub async fn complete(
        &self,
        job_id: Uuid,
        worker_id: &str,
        result: &serde_json::Value,
    ) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;

        let remove: Option<bool> = sqlx::query_scalar(
            r#"
            SELECT remove_on_complete FROM jobs
            WHERE id = $1 AND locked_by = $2 AND state = 'active'
            FOR UPDATE
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(remove) = remove else {
            tx.commit().await?;
            return Ok(false);
        };

        if remove {
            sqlx::query("DELETE FROM jobs WHERE id = $1")
                .bind(job_id)
                .execute(&mut *tx)
                .await?;
        } else {
            sqlx::query(
                r#"
                UPDATE jobs
                SET state = 'completed',
                    result = $2,
                    locked_by = NULL,
                    locked_at = NULL,
                    lock_expires_at = NULL,
                    updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(job_id)
            .bind(result)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    /// Record a failed attempt and decide its fate at the store boundary:
    /// retryable + budget left => requeue with exponential backoff; otherwise
    /// terminally failed (or deleted when `remove_on_fail`).
    pub async fn fail(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error_code: &str,
        error_message: &str,
    ) -> anyhow::Result<FailDisposition> {
        let mut tx = self.pool.begin().await?;

        let job = sqlx::query_as::<_, Job>(
            r#"
            SELECT * FROM jobs
            WHERE id = $1 AND locked_by = $2 AND state = 'active'
            FOR UPDATE
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(job) = job else {
            tx.commit().await?;
            return Ok(FailDisposition::LeaseLost);
        };

        let attempts = job.attempts + 1;
        let class = classify_error(error_code);

        if class == ErrorClass::Retryable && attempts < job.max_attempts {
            let mut rng = StdRng::from_entropy();
            let delay_ms = next_delay_ms(attempts, job.backoff_base_ms, &self.retry, &mut rng);
            let next_run_at = Utc::now() + chrono::Duration::milliseconds(delay_ms);

            sqlx::query(
                r#"
                UPDATE jobs
                SET state = 'waiting',
                    attempts = $2,
                    run_at = $3,
                    locked_by = NULL,
                    locked_at = NULL,
                    lock_expires_at = NULL,
                    last_error_code = $4,
                    last_error_message = $5,
                    updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(job_id)
            .bind(attempts)
            .bind(next_run_at)
            .bind(error_code)
            .bind(error_message)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            return Ok(FailDisposition::Retried {
                attempts,
                next_run_at,
            });
        }

        let reason = match class {
            ErrorClass::Terminal => "NON_RETRYABLE",
            ErrorClass::Retryable => "MAX_ATTEMPTS_EXCEEDED",
        };

        if job.remove_on_fail {
            sqlx::query("DELETE FROM jobs WHERE id = $1")
                .bind(job_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            return Ok(FailDisposition::Removed { attempts });
        }

        sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'failed',
                attempts = $2,
                failed_reason = $3,
                locked_by = NULL,
                locked_at = NULL,
                lock_expires_at = NULL,
                last_error_code = $4,
                last_error_message = $5,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(attempts)
        .bind(reason)
        .bind(error_code)
        .bind(error_message)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(FailDisposition::Failed { attempts, reason })
    }

    // ----------------------------
    // Progress
    // ----------------------------

    pub async fn report_progress(
        &self,
        job_id: Uuid,
        percent: i32,
        stage_label: &str,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET progress_percent = $2,
                progress_stage = $3,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(percent.clamp(0, 100))
        .bind(stage_label)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

use crate::transcriptions::model::Transcription;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

/// Id-keyed, idempotent writes to the transcriptions table. Every mutation is
/// an UPDATE against the entity id, never an insert-per-attempt, so a retried
/// stage re-running against the same entity converges instead of duplicating.
#[derive(Clone)]
pub struct TranscriptionsRepo {
    pool: PgPool,
}

impl TranscriptionsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Registration-time insert. In production this is driven by the file
    /// upload collaborator; kept here because the pipeline's tests and the
    /// admin surface need a way to mint entities.
    pub async fn create(
        &self,
        file_id: &str,
        user_id: &str,
        duration_seconds: Option<f64>,
    ) -> anyhow::Result<Transcription> {
        let row = sqlx::query_as::<_, Transcription>(
            r#"
            INSERT INTO transcriptions (id, file_id, user_id, duration_seconds)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(file_id)
        .bind(user_id)
        .bind(duration_seconds)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get(&self, id: Uuid) -> anyhow::Result<Option<Transcription>> {
        let row = sqlx::query_as::<_, Transcription>("SELECT * FROM transcriptions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    // ----------------------------
    // Transcription-stage writes
    // ----------------------------

    pub async fn mark_processing(&self, id: Uuid, provider: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE transcriptions
            SET status = 'processing',
                provider = $2,
                error_message = NULL,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(provider)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn complete_transcript(
        &self,
        id: Uuid,
        text: &str,
        language: Option<&str>,
        confidence: Option<f64>,
        metadata: &Value,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE transcriptions
            SET status = 'completed',
                text = $2,
                language = COALESCE($3, language),
                confidence = $4,
                metadata = metadata || $5,
                completed_at = now(),
                error_message = NULL,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(text)
        .bind(language)
        .bind(confidence)
        .bind(metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn fail_transcript(&self, id: Uuid, error_message: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE transcriptions
            SET status = 'failed',
                error_message = $2,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ----------------------------
    // Feedback-stage writes
    // ----------------------------

    pub async fn set_feedback_processing(&self, id: Uuid) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE transcriptions
            SET feedback_status = 'processing',
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn complete_feedback(
        &self,
        id: Uuid,
        feedback: &Value,
        advice: &str,
        metadata_patch: &Value,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE transcriptions
            SET feedback = $2,
                feedback_advice = $3,
                feedback_status = 'completed',
                metadata = metadata || $4,
                completed_at = now(),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(feedback)
        .bind(advice)
        .bind(metadata_patch)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Note: does not touch `status`/`text`: feedback failure must never
    /// revert a completed transcription.
    pub async fn fail_feedback(
        &self,
        id: Uuid,
        error_message: &str,
        metadata_patch: &Value,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE transcriptions
            SET feedback_status = 'failed',
                error_message = $2,
                metadata = metadata || $3,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error_message)
        .bind(metadata_patch)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ----------------------------
    // Maintenance reads
    // ----------------------------

    pub async fn list_failed_feedback(&self) -> anyhow::Result<Vec<Transcription>> {
        let rows = sqlx::query_as::<_, Transcription>(
            r#"
            SELECT * FROM transcriptions
            WHERE feedback_status = 'failed'
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

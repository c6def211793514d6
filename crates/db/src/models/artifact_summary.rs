use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Postgres};
use uuid::Uuid;

/// One-per-artifact LLM summary (§3, §4.H step "persist summary").
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ArtifactSummary {
    pub artifact_id: Uuid,
    pub summary_text: String,
    pub sentiment: String,
    pub priority: i32,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

pub struct NewArtifactSummary {
    pub summary_text: String,
    pub sentiment: String,
    pub priority: i32,
    pub confidence: f64,
}

impl ArtifactSummary {
    /// Full replace: re-analysis overwrites rather than appends (§4.H).
    pub async fn upsert<'e, E>(
        executor: E,
        artifact_id: Uuid,
        data: NewArtifactSummary,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as!(
            ArtifactSummary,
            r#"INSERT INTO artifact_summaries (artifact_id, summary_text, sentiment, priority, confidence)
               VALUES ($1, $2, $3, $4, $5)
               ON CONFLICT (artifact_id) DO UPDATE SET
                   summary_text = EXCLUDED.summary_text,
                   sentiment = EXCLUDED.sentiment,
                   priority = EXCLUDED.priority,
                   confidence = EXCLUDED.confidence
               RETURNING artifact_id as "artifact_id!: Uuid", summary_text, sentiment, priority,
                   confidence, created_at as "created_at!: DateTime<Utc>""#,
            artifact_id,
            data.summary_text,
            data.sentiment,
            data.priority,
            data.confidence,
        )
        .fetch_one(executor)
        .await
    }

    pub async fn find_by_artifact(
        pool: &sqlx::PgPool,
        artifact_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as!(
            ArtifactSummary,
            r#"SELECT artifact_id as "artifact_id!: Uuid", summary_text, sentiment, priority,
                   confidence, created_at as "created_at!: DateTime<Utc>"
               FROM artifact_summaries WHERE artifact_id = $1"#,
            artifact_id
        )
        .fetch_optional(pool)
        .await
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, PgPool, Postgres};
use uuid::Uuid;

/// A single LLM/embedding call's cost and token usage (§6 "Cost/usage
/// records"). One row per call, not per artifact, so retries and the
/// embedding call both show up individually.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CostUsageRecord {
    pub id: Uuid,
    pub artifact_id: Uuid,
    pub program_id: Uuid,
    pub model: String,
    pub input_tokens: i32,
    pub output_tokens: i32,
    pub cached_tokens: i32,
    pub cost_usd: f64,
    pub duration_ms: i64,
    pub created_at: DateTime<Utc>,
}

pub struct NewCostUsageRecord {
    pub program_id: Uuid,
    pub model: String,
    pub input_tokens: i32,
    pub output_tokens: i32,
    pub cached_tokens: i32,
    pub cost_usd: f64,
    pub duration_ms: i64,
}

impl CostUsageRecord {
    pub async fn insert<'e, E>(
        executor: E,
        id: Uuid,
        artifact_id: Uuid,
        data: NewCostUsageRecord,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as!(
            CostUsageRecord,
            r#"INSERT INTO cost_usage_records
               (id, artifact_id, program_id, model, input_tokens, output_tokens, cached_tokens, cost_usd, duration_ms)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
               RETURNING id as "id!: Uuid", artifact_id as "artifact_id!: Uuid", program_id as "program_id!: Uuid",
                   model, input_tokens, output_tokens, cached_tokens, cost_usd, duration_ms,
                   created_at as "created_at!: DateTime<Utc>""#,
            id,
            artifact_id,
            data.program_id,
            data.model,
            data.input_tokens,
            data.output_tokens,
            data.cached_tokens,
            data.cost_usd,
            data.duration_ms,
        )
        .fetch_one(executor)
        .await
    }

    pub async fn find_by_artifact(pool: &PgPool, artifact_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as!(
            CostUsageRecord,
            r#"SELECT id as "id!: Uuid", artifact_id as "artifact_id!: Uuid", program_id as "program_id!: Uuid",
                   model, input_tokens, output_tokens, cached_tokens, cost_usd, duration_ms,
                   created_at as "created_at!: DateTime<Utc>"
               FROM cost_usage_records WHERE artifact_id = $1 ORDER BY created_at ASC"#,
            artifact_id
        )
        .fetch_all(pool)
        .await
    }

    pub async fn total_cost_for_program(pool: &PgPool, program_id: Uuid) -> Result<f64, sqlx::Error> {
        let row = sqlx::query!(
            r#"SELECT COALESCE(SUM(cost_usd), 0.0) as "total!: f64" FROM cost_usage_records WHERE program_id = $1"#,
            program_id
        )
        .fetch_one(pool)
        .await?;
        Ok(row.total)
    }
}

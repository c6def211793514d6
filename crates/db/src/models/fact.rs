use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, PgPool, Postgres};
use uuid::Uuid;

/// A structured fact extracted from one artifact (§3, §4.E). At most one of
/// `normalized_numeric`/`normalized_date`/`normalized_bool` is set, matching
/// `fact_type`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Fact {
    pub id: Uuid,
    pub artifact_id: Uuid,
    pub fact_type: String,
    pub key: String,
    pub value: String,
    pub normalized_numeric: Option<f64>,
    pub normalized_date: Option<NaiveDate>,
    pub normalized_bool: Option<bool>,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

pub struct NewFact {
    pub fact_type: String,
    pub key: String,
    pub value: String,
    pub normalized_numeric: Option<f64>,
    pub normalized_date: Option<NaiveDate>,
    pub normalized_bool: Option<bool>,
    pub confidence: f64,
}

impl Fact {
    pub async fn insert<'e, E>(executor: E, id: Uuid, artifact_id: Uuid, data: NewFact) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as!(
            Fact,
            r#"INSERT INTO facts
               (id, artifact_id, fact_type, key, value, normalized_numeric, normalized_date, normalized_bool, confidence)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
               ON CONFLICT (artifact_id, key, value) DO UPDATE SET confidence = EXCLUDED.confidence
               RETURNING id as "id!: Uuid", artifact_id as "artifact_id!: Uuid", fact_type, key, value,
                   normalized_numeric, normalized_date, normalized_bool, confidence,
                   created_at as "created_at!: DateTime<Utc>""#,
            id,
            artifact_id,
            data.fact_type,
            data.key,
            data.value,
            data.normalized_numeric,
            data.normalized_date,
            data.normalized_bool,
            data.confidence,
        )
        .fetch_one(executor)
        .await
    }

    pub async fn find_by_artifact(pool: &PgPool, artifact_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as!(
            Fact,
            r#"SELECT id as "id!: Uuid", artifact_id as "artifact_id!: Uuid", fact_type, key, value,
                   normalized_numeric, normalized_date, normalized_bool, confidence,
                   created_at as "created_at!: DateTime<Utc>"
               FROM facts WHERE artifact_id = $1 ORDER BY key"#,
            artifact_id
        )
        .fetch_all(pool)
        .await
    }

    pub async fn delete_by_artifact<'e, E>(executor: E, artifact_id: Uuid) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query!("DELETE FROM facts WHERE artifact_id = $1", artifact_id)
            .execute(executor)
            .await?;
        Ok(())
    }
}

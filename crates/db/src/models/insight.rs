use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, PgPool, Postgres};
use uuid::Uuid;

/// An analyzer-derived insight (§3, §4.H), e.g. a risk flag or anomaly.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Insight {
    pub id: Uuid,
    pub artifact_id: Uuid,
    pub insight_type: String,
    pub title: String,
    pub description: String,
    pub severity: Option<String>,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

pub struct NewInsight {
    pub insight_type: String,
    pub title: String,
    pub description: String,
    pub severity: Option<String>,
    pub confidence: f64,
}

impl Insight {
    pub async fn insert<'e, E>(executor: E, id: Uuid, artifact_id: Uuid, data: NewInsight) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as!(
            Insight,
            r#"INSERT INTO insights (id, artifact_id, insight_type, title, description, severity, confidence)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               RETURNING id as "id!: Uuid", artifact_id as "artifact_id!: Uuid", insight_type, title,
                   description, severity, confidence, created_at as "created_at!: DateTime<Utc>""#,
            id,
            artifact_id,
            data.insight_type,
            data.title,
            data.description,
            data.severity,
            data.confidence,
        )
        .fetch_one(executor)
        .await
    }

    pub async fn find_by_artifact(pool: &PgPool, artifact_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as!(
            Insight,
            r#"SELECT id as "id!: Uuid", artifact_id as "artifact_id!: Uuid", insight_type, title,
                   description, severity, confidence, created_at as "created_at!: DateTime<Utc>"
               FROM insights WHERE artifact_id = $1 ORDER BY confidence DESC"#,
            artifact_id
        )
        .fetch_all(pool)
        .await
    }

    pub async fn delete_by_artifact<'e, E>(executor: E, artifact_id: Uuid) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query!("DELETE FROM insights WHERE artifact_id = $1", artifact_id)
            .execute(executor)
            .await?;
        Ok(())
    }
}

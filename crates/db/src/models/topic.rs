use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, PgPool, Postgres};
use uuid::Uuid;

/// A topic extracted from one artifact, optionally nested under a parent
/// topic within the same artifact (§3).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Topic {
    pub id: Uuid,
    pub artifact_id: Uuid,
    pub name: String,
    pub confidence: f64,
    pub parent_topic_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

pub struct NewTopic {
    pub name: String,
    pub confidence: f64,
    pub parent_topic_id: Option<Uuid>,
}

impl Topic {
    pub async fn insert<'e, E>(executor: E, id: Uuid, artifact_id: Uuid, data: NewTopic) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as!(
            Topic,
            r#"INSERT INTO topics (id, artifact_id, name, confidence, parent_topic_id)
               VALUES ($1, $2, $3, $4, $5)
               RETURNING id as "id!: Uuid", artifact_id as "artifact_id!: Uuid", name, confidence,
                   parent_topic_id as "parent_topic_id: Uuid", created_at as "created_at!: DateTime<Utc>""#,
            id,
            artifact_id,
            data.name,
            data.confidence,
            data.parent_topic_id,
        )
        .fetch_one(executor)
        .await
    }

    pub async fn find_by_artifact(pool: &PgPool, artifact_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as!(
            Topic,
            r#"SELECT id as "id!: Uuid", artifact_id as "artifact_id!: Uuid", name, confidence,
                   parent_topic_id as "parent_topic_id: Uuid", created_at as "created_at!: DateTime<Utc>"
               FROM topics WHERE artifact_id = $1 ORDER BY confidence DESC"#,
            artifact_id
        )
        .fetch_all(pool)
        .await
    }

    pub async fn delete_by_artifact<'e, E>(executor: E, artifact_id: Uuid) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query!("DELETE FROM topics WHERE artifact_id = $1", artifact_id)
            .execute(executor)
            .await?;
        Ok(())
    }
}

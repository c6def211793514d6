use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// A detected sequence of related artifacts over time (§4.D), e.g. a thread
/// of revisions to the same document.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TemporalSequence {
    pub id: Uuid,
    pub program_id: Uuid,
    pub artifact_ids: Vec<Uuid>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub detection_method: String,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

pub struct NewTemporalSequence {
    pub program_id: Uuid,
    pub artifact_ids: Vec<Uuid>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub detection_method: String,
    pub confidence: f64,
}

impl TemporalSequence {
    pub async fn create(pool: &PgPool, id: Uuid, data: NewTemporalSequence) -> Result<Self, sqlx::Error> {
        sqlx::query_as!(
            TemporalSequence,
            r#"INSERT INTO temporal_sequences
               (id, program_id, artifact_ids, start_date, end_date, detection_method, confidence)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               RETURNING id as "id!: Uuid", program_id as "program_id!: Uuid",
                   artifact_ids as "artifact_ids!: Vec<Uuid>", start_date, end_date,
                   detection_method, confidence, created_at as "created_at!: DateTime<Utc>""#,
            id,
            data.program_id,
            &data.artifact_ids,
            data.start_date,
            data.end_date,
            data.detection_method,
            data.confidence,
        )
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_program(pool: &PgPool, program_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as!(
            TemporalSequence,
            r#"SELECT id as "id!: Uuid", program_id as "program_id!: Uuid",
                   artifact_ids as "artifact_ids!: Vec<Uuid>", start_date, end_date,
                   detection_method, confidence, created_at as "created_at!: DateTime<Utc>"
               FROM temporal_sequences WHERE program_id = $1 ORDER BY start_date ASC NULLS LAST"#,
            program_id
        )
        .fetch_all(pool)
        .await
    }

    /// Sequences containing a given artifact — used when building context
    /// for that artifact so the whole thread can be surfaced (§4.D).
    pub async fn find_containing(
        pool: &PgPool,
        program_id: Uuid,
        artifact_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as!(
            TemporalSequence,
            r#"SELECT id as "id!: Uuid", program_id as "program_id!: Uuid",
                   artifact_ids as "artifact_ids!: Vec<Uuid>", start_date, end_date,
                   detection_method, confidence, created_at as "created_at!: DateTime<Utc>"
               FROM temporal_sequences
               WHERE program_id = $1 AND $2 = ANY(artifact_ids)"#,
            program_id,
            artifact_id
        )
        .fetch_all(pool)
        .await
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Per-program overrides read once at the start of `Analyze` (§9 design
/// note). A missing row means "use the default" — callers should treat
/// `find` returning `None` the same as `enriched_context_enabled: true`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ProgramSettings {
    pub program_id: Uuid,
    pub enriched_context_enabled: bool,
    pub updated_at: DateTime<Utc>,
}

impl ProgramSettings {
    pub async fn find(pool: &PgPool, program_id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as!(
            ProgramSettings,
            r#"SELECT program_id as "program_id!: Uuid", enriched_context_enabled,
                   updated_at as "updated_at!: DateTime<Utc>"
               FROM program_settings WHERE program_id = $1"#,
            program_id
        )
        .fetch_optional(pool)
        .await
    }

    pub async fn enriched_context_enabled(pool: &PgPool, program_id: Uuid) -> Result<bool, sqlx::Error> {
        Ok(Self::find(pool, program_id).await?.map(|s| s.enriched_context_enabled).unwrap_or(true))
    }

    pub async fn set_enriched_context_enabled(
        pool: &PgPool,
        program_id: Uuid,
        enabled: bool,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as!(
            ProgramSettings,
            r#"INSERT INTO program_settings (program_id, enriched_context_enabled)
               VALUES ($1, $2)
               ON CONFLICT (program_id) DO UPDATE SET
                   enriched_context_enabled = EXCLUDED.enriched_context_enabled,
                   updated_at = NOW()
               RETURNING program_id as "program_id!: Uuid", enriched_context_enabled,
                   updated_at as "updated_at!: DateTime<Utc>""#,
            program_id,
            enabled,
        )
        .fetch_one(pool)
        .await
    }
}

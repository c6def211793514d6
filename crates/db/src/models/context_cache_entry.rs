use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Durable tier of the two-tier context cache (§4.B). The fast tier lives in
/// an in-process `moka` cache fronting this table; a miss here is a true
/// cache miss that forces the context builder to rebuild the packet.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ContextCacheEntry {
    pub artifact_id: Uuid,
    pub program_id: Uuid,
    pub content_hash: String,
    pub packet_json: serde_json::Value,
    pub token_count: i32,
    pub included_artifact_ids: Vec<Uuid>,
    pub cache_version: i32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub struct NewContextCacheEntry {
    pub program_id: Uuid,
    pub content_hash: String,
    pub packet_json: serde_json::Value,
    pub token_count: i32,
    pub included_artifact_ids: Vec<Uuid>,
    pub cache_version: i32,
    pub expires_at: DateTime<Utc>,
}

impl ContextCacheEntry {
    pub async fn upsert(
        pool: &PgPool,
        artifact_id: Uuid,
        data: NewContextCacheEntry,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as!(
            ContextCacheEntry,
            r#"INSERT INTO context_cache_entries
               (artifact_id, program_id, content_hash, packet_json, token_count, included_artifact_ids, cache_version, expires_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               ON CONFLICT (artifact_id) DO UPDATE SET
                   content_hash = EXCLUDED.content_hash,
                   packet_json = EXCLUDED.packet_json,
                   token_count = EXCLUDED.token_count,
                   included_artifact_ids = EXCLUDED.included_artifact_ids,
                   cache_version = EXCLUDED.cache_version,
                   expires_at = EXCLUDED.expires_at,
                   created_at = NOW()
               RETURNING artifact_id as "artifact_id!: Uuid", program_id as "program_id!: Uuid",
                   content_hash, packet_json, token_count,
                   included_artifact_ids as "included_artifact_ids!: Vec<Uuid>", cache_version,
                   created_at as "created_at!: DateTime<Utc>", expires_at as "expires_at!: DateTime<Utc>""#,
            artifact_id,
            data.program_id,
            data.content_hash,
            data.packet_json,
            data.token_count,
            &data.included_artifact_ids,
            data.cache_version,
            data.expires_at,
        )
        .fetch_one(pool)
        .await
    }

    /// Returns `None` both on miss and on a row that has passed `expires_at` —
    /// callers don't need to special-case staleness themselves.
    pub async fn find_live(pool: &PgPool, artifact_id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as!(
            ContextCacheEntry,
            r#"SELECT artifact_id as "artifact_id!: Uuid", program_id as "program_id!: Uuid",
                   content_hash, packet_json, token_count,
                   included_artifact_ids as "included_artifact_ids!: Vec<Uuid>", cache_version,
                   created_at as "created_at!: DateTime<Utc>", expires_at as "expires_at!: DateTime<Utc>"
               FROM context_cache_entries WHERE artifact_id = $1 AND expires_at > NOW()"#,
            artifact_id
        )
        .fetch_optional(pool)
        .await
    }

    /// Entries whose packet referenced any of the given artifacts — used for
    /// invalidation when an upstream artifact is re-analyzed or deleted (§4.B).
    pub async fn find_referencing(
        pool: &PgPool,
        program_id: Uuid,
        artifact_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as!(
            ContextCacheEntry,
            r#"SELECT artifact_id as "artifact_id!: Uuid", program_id as "program_id!: Uuid",
                   content_hash, packet_json, token_count,
                   included_artifact_ids as "included_artifact_ids!: Vec<Uuid>", cache_version,
                   created_at as "created_at!: DateTime<Utc>", expires_at as "expires_at!: DateTime<Utc>"
               FROM context_cache_entries
               WHERE program_id = $1 AND $2 = ANY(included_artifact_ids)"#,
            program_id,
            artifact_id
        )
        .fetch_all(pool)
        .await
    }

    /// All cache entries written for a program, regardless of which artifact
    /// they're keyed on — used by `InvalidateProgram(programID)` (§4.B) to
    /// find what the fast tier needs to drop before the durable tier is
    /// cleared in one statement.
    pub async fn find_by_program(pool: &PgPool, program_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as!(
            ContextCacheEntry,
            r#"SELECT artifact_id as "artifact_id!: Uuid", program_id as "program_id!: Uuid",
                   content_hash, packet_json, token_count,
                   included_artifact_ids as "included_artifact_ids!: Vec<Uuid>", cache_version,
                   created_at as "created_at!: DateTime<Utc>", expires_at as "expires_at!: DateTime<Utc>"
               FROM context_cache_entries WHERE program_id = $1"#,
            program_id
        )
        .fetch_all(pool)
        .await
    }

    pub async fn invalidate_by_program(pool: &PgPool, program_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query!("DELETE FROM context_cache_entries WHERE program_id = $1", program_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn invalidate(pool: &PgPool, artifact_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query!("DELETE FROM context_cache_entries WHERE artifact_id = $1", artifact_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn invalidate_many(pool: &PgPool, artifact_ids: &[Uuid]) -> Result<(), sqlx::Error> {
        sqlx::query!(
            "DELETE FROM context_cache_entries WHERE artifact_id = ANY($1)",
            artifact_ids
        )
        .execute(pool)
        .await?;
        Ok(())
    }
}

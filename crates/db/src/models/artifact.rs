use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, PgPool, Postgres, Type};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

/// Lifecycle status of an artifact (§4.H).
///
/// ```text
/// pending -> processing -> {completed | failed | ocr_required}
///   ^                          |
///   '----- re-analyze ---------'   (re-entry only from {completed, failed})
/// ```
#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, EnumString, Display, Default)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ArtifactStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    OcrRequired,
}

impl ArtifactStatus {
    /// Whether `Analyze` may re-enter from this status (§4.H).
    pub fn reanalyzable(&self) -> bool {
        matches!(self, ArtifactStatus::Completed | ArtifactStatus::Failed)
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,
    pub program_id: Uuid,
    pub filename: String,
    pub content_hash: String,
    pub byte_size: i64,
    pub mime_type: String,
    pub raw_text: Option<String>,
    pub status: String,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub failure_reason: Option<String>,
    pub superseded_by_id: Option<Uuid>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub uploaded_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Artifact {
    pub fn status(&self) -> ArtifactStatus {
        self.status.parse().unwrap_or_default()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

pub struct CreateArtifact {
    pub program_id: Uuid,
    pub filename: String,
    pub content_hash: String,
    pub byte_size: i64,
    pub mime_type: String,
    pub category: Option<String>,
    pub subcategory: Option<String>,
}

impl Artifact {
    pub async fn create(pool: &PgPool, id: Uuid, data: CreateArtifact) -> Result<Self, sqlx::Error> {
        sqlx::query_as!(
            Artifact,
            r#"INSERT INTO artifacts
               (id, program_id, filename, content_hash, byte_size, mime_type, category, subcategory, status)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending')
               RETURNING
                id as "id!: Uuid",
                program_id as "program_id!: Uuid",
                filename, content_hash, byte_size, mime_type, raw_text, status,
                category, subcategory, failure_reason,
                superseded_by_id as "superseded_by_id: Uuid",
                deleted_at as "deleted_at: DateTime<Utc>",
                uploaded_at as "uploaded_at!: DateTime<Utc>",
                created_at as "created_at!: DateTime<Utc>",
                updated_at as "updated_at!: DateTime<Utc>""#,
            id,
            data.program_id,
            data.filename,
            data.content_hash,
            data.byte_size,
            data.mime_type,
            data.category,
            data.subcategory,
        )
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as!(
            Artifact,
            r#"SELECT
                id as "id!: Uuid",
                program_id as "program_id!: Uuid",
                filename, content_hash, byte_size, mime_type, raw_text, status,
                category, subcategory, failure_reason,
                superseded_by_id as "superseded_by_id: Uuid",
                deleted_at as "deleted_at: DateTime<Utc>",
                uploaded_at as "uploaded_at!: DateTime<Utc>",
                created_at as "created_at!: DateTime<Utc>",
                updated_at as "updated_at!: DateTime<Utc>"
               FROM artifacts WHERE id = $1"#,
            id
        )
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_content_hash(
        pool: &PgPool,
        program_id: Uuid,
        content_hash: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as!(
            Artifact,
            r#"SELECT
                id as "id!: Uuid",
                program_id as "program_id!: Uuid",
                filename, content_hash, byte_size, mime_type, raw_text, status,
                category, subcategory, failure_reason,
                superseded_by_id as "superseded_by_id: Uuid",
                deleted_at as "deleted_at: DateTime<Utc>",
                uploaded_at as "uploaded_at!: DateTime<Utc>",
                created_at as "created_at!: DateTime<Utc>",
                updated_at as "updated_at!: DateTime<Utc>"
               FROM artifacts
               WHERE program_id = $1 AND content_hash = $2
                 AND status = 'completed' AND deleted_at IS NULL"#,
            program_id,
            content_hash
        )
        .fetch_optional(pool)
        .await
    }

    pub async fn list_completed(
        pool: &PgPool,
        program_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as!(
            Artifact,
            r#"SELECT
                id as "id!: Uuid",
                program_id as "program_id!: Uuid",
                filename, content_hash, byte_size, mime_type, raw_text, status,
                category, subcategory, failure_reason,
                superseded_by_id as "superseded_by_id: Uuid",
                deleted_at as "deleted_at: DateTime<Utc>",
                uploaded_at as "uploaded_at!: DateTime<Utc>",
                created_at as "created_at!: DateTime<Utc>",
                updated_at as "updated_at!: DateTime<Utc>"
               FROM artifacts
               WHERE program_id = $1 AND status = 'completed' AND deleted_at IS NULL
               ORDER BY uploaded_at DESC
               LIMIT $2 OFFSET $3"#,
            program_id,
            limit,
            offset
        )
        .fetch_all(pool)
        .await
    }

    /// Compare-and-swap the status column. Returns `Ok(None)` if no row
    /// matched `from` (the transition lost a race or was invalid) — this is
    /// the single primitive every transition in §4.H's state machine funnels
    /// through, so two concurrent `Analyze` calls can never both win.
    pub async fn cas_status(
        pool: &PgPool,
        id: Uuid,
        from: ArtifactStatus,
        to: ArtifactStatus,
    ) -> Result<Option<Self>, sqlx::Error> {
        let from_str = from.to_string();
        let to_str = to.to_string();
        sqlx::query_as!(
            Artifact,
            r#"UPDATE artifacts
               SET status = $3, updated_at = NOW()
               WHERE id = $1 AND status = $2
               RETURNING
                id as "id!: Uuid",
                program_id as "program_id!: Uuid",
                filename, content_hash, byte_size, mime_type, raw_text, status,
                category, subcategory, failure_reason,
                superseded_by_id as "superseded_by_id: Uuid",
                deleted_at as "deleted_at: DateTime<Utc>",
                uploaded_at as "uploaded_at!: DateTime<Utc>",
                created_at as "created_at!: DateTime<Utc>",
                updated_at as "updated_at!: DateTime<Utc>""#,
            id,
            from_str,
            to_str
        )
        .fetch_optional(pool)
        .await
    }

    /// Force-set the status regardless of current value. Used only by the
    /// janitor reviving a crashed `processing` artifact, and by rollback on
    /// cancellation (§5).
    pub async fn force_status(
        pool: &PgPool,
        id: Uuid,
        to: ArtifactStatus,
        failure_reason: Option<&str>,
    ) -> Result<Option<Self>, sqlx::Error> {
        let to_str = to.to_string();
        sqlx::query_as!(
            Artifact,
            r#"UPDATE artifacts
               SET status = $2, failure_reason = $3, updated_at = NOW()
               WHERE id = $1
               RETURNING
                id as "id!: Uuid",
                program_id as "program_id!: Uuid",
                filename, content_hash, byte_size, mime_type, raw_text, status,
                category, subcategory, failure_reason,
                superseded_by_id as "superseded_by_id: Uuid",
                deleted_at as "deleted_at: DateTime<Utc>",
                uploaded_at as "uploaded_at!: DateTime<Utc>",
                created_at as "created_at!: DateTime<Utc>",
                updated_at as "updated_at!: DateTime<Utc>""#,
            id,
            to_str,
            failure_reason
        )
        .fetch_optional(pool)
        .await
    }

    pub async fn set_raw_text(pool: &PgPool, id: Uuid, raw_text: &str) -> Result<(), sqlx::Error> {
        sqlx::query!(
            "UPDATE artifacts SET raw_text = $2, updated_at = NOW() WHERE id = $1",
            id,
            raw_text
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn mark_failed(pool: &PgPool, id: Uuid, reason: &str) -> Result<(), sqlx::Error> {
        sqlx::query!(
            "UPDATE artifacts SET status = 'failed', failure_reason = $2, updated_at = NOW() WHERE id = $1",
            id,
            reason
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Soft-delete: artifacts are never physically removed while referenced (§3).
    pub async fn soft_delete(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query!(
            "UPDATE artifacts SET deleted_at = NOW(), updated_at = NOW() WHERE id = $1",
            id
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn set_superseded_by<'e, E>(executor: E, id: Uuid, new_id: Uuid) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query!(
            "UPDATE artifacts SET superseded_by_id = $2, updated_at = NOW() WHERE id = $1",
            id,
            new_id
        )
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn find_by_entity_overlap(
        pool: &PgPool,
        program_id: Uuid,
        exclude_id: Uuid,
        person_names: &[String],
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        if person_names.is_empty() {
            return Ok(Vec::new());
        }
        let lowered: Vec<String> = person_names.iter().map(|n| n.to_lowercase()).collect();
        sqlx::query_as!(
            Artifact,
            r#"SELECT
                a.id as "id!: Uuid",
                a.program_id as "program_id!: Uuid",
                a.filename, a.content_hash, a.byte_size, a.mime_type, a.raw_text, a.status,
                a.category, a.subcategory, a.failure_reason,
                a.superseded_by_id as "superseded_by_id: Uuid",
                a.deleted_at as "deleted_at: DateTime<Utc>",
                a.uploaded_at as "uploaded_at!: DateTime<Utc>",
                a.created_at as "created_at!: DateTime<Utc>",
                a.updated_at as "updated_at!: DateTime<Utc>"
               FROM artifacts a
               WHERE a.program_id = $1 AND a.id != $2
                 AND a.status = 'completed' AND a.deleted_at IS NULL
                 AND EXISTS (
                     SELECT 1 FROM person_mentions pm
                     WHERE pm.artifact_id = a.id AND lower(pm.name) = ANY($3)
                 )
               ORDER BY (
                   SELECT COUNT(DISTINCT lower(pm.name))
                   FROM person_mentions pm
                   WHERE pm.artifact_id = a.id AND lower(pm.name) = ANY($3)
               ) DESC, a.uploaded_at DESC
               LIMIT $4"#,
            program_id,
            exclude_id,
            &lowered,
            limit
        )
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_temporal_proximity(
        pool: &PgPool,
        program_id: Uuid,
        exclude_id: Uuid,
        pivot_time: DateTime<Utc>,
        window_before: chrono::Duration,
        window_after: chrono::Duration,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let lower = pivot_time - window_before;
        let upper = pivot_time + window_after;
        sqlx::query_as!(
            Artifact,
            r#"SELECT
                id as "id!: Uuid",
                program_id as "program_id!: Uuid",
                filename, content_hash, byte_size, mime_type, raw_text, status,
                category, subcategory, failure_reason,
                superseded_by_id as "superseded_by_id: Uuid",
                deleted_at as "deleted_at: DateTime<Utc>",
                uploaded_at as "uploaded_at!: DateTime<Utc>",
                created_at as "created_at!: DateTime<Utc>",
                updated_at as "updated_at!: DateTime<Utc>"
               FROM artifacts
               WHERE program_id = $1 AND id != $2
                 AND status = 'completed' AND deleted_at IS NULL
                 AND uploaded_at BETWEEN $3 AND $4
               ORDER BY uploaded_at DESC
               LIMIT $5"#,
            program_id,
            exclude_id,
            lower,
            upper,
            limit
        )
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_type(
        pool: &PgPool,
        program_id: Uuid,
        exclude_id: Uuid,
        category: &str,
        subcategory: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as!(
            Artifact,
            r#"SELECT
                id as "id!: Uuid",
                program_id as "program_id!: Uuid",
                filename, content_hash, byte_size, mime_type, raw_text, status,
                category, subcategory, failure_reason,
                superseded_by_id as "superseded_by_id: Uuid",
                deleted_at as "deleted_at: DateTime<Utc>",
                uploaded_at as "uploaded_at!: DateTime<Utc>",
                created_at as "created_at!: DateTime<Utc>",
                updated_at as "updated_at!: DateTime<Utc>"
               FROM artifacts
               WHERE program_id = $1 AND id != $2
                 AND status = 'completed' AND deleted_at IS NULL
                 AND category = $3
                 AND ($4::text IS NULL OR subcategory = $4)
               ORDER BY uploaded_at DESC
               LIMIT $5"#,
            program_id,
            exclude_id,
            category,
            subcategory,
            limit
        )
        .fetch_all(pool)
        .await
    }

    /// Temporal neighbors of a pivot artifact (§4.D): up to `k_before`
    /// completed artifacts immediately preceding, `k_after` immediately
    /// following, ties broken by id ascending.
    pub async fn temporal_neighbors(
        pool: &PgPool,
        program_id: Uuid,
        pivot_id: Uuid,
        pivot_time: DateTime<Utc>,
        k_before: i64,
        k_after: i64,
    ) -> Result<(Vec<Self>, Vec<Self>), sqlx::Error> {
        let before = sqlx::query_as!(
            Artifact,
            r#"SELECT
                id as "id!: Uuid",
                program_id as "program_id!: Uuid",
                filename, content_hash, byte_size, mime_type, raw_text, status,
                category, subcategory, failure_reason,
                superseded_by_id as "superseded_by_id: Uuid",
                deleted_at as "deleted_at: DateTime<Utc>",
                uploaded_at as "uploaded_at!: DateTime<Utc>",
                created_at as "created_at!: DateTime<Utc>",
                updated_at as "updated_at!: DateTime<Utc>"
               FROM artifacts
               WHERE program_id = $1 AND id != $2
                 AND status = 'completed' AND deleted_at IS NULL
                 AND (uploaded_at, id) < ($3, $2)
               ORDER BY uploaded_at DESC, id ASC
               LIMIT $4"#,
            program_id,
            pivot_id,
            pivot_time,
            k_before
        )
        .fetch_all(pool)
        .await?;

        let after = sqlx::query_as!(
            Artifact,
            r#"SELECT
                id as "id!: Uuid",
                program_id as "program_id!: Uuid",
                filename, content_hash, byte_size, mime_type, raw_text, status,
                category, subcategory, failure_reason,
                superseded_by_id as "superseded_by_id: Uuid",
                deleted_at as "deleted_at: DateTime<Utc>",
                uploaded_at as "uploaded_at!: DateTime<Utc>",
                created_at as "created_at!: DateTime<Utc>",
                updated_at as "updated_at!: DateTime<Utc>"
               FROM artifacts
               WHERE program_id = $1 AND id != $2
                 AND status = 'completed' AND deleted_at IS NULL
                 AND (uploaded_at, id) > ($3, $2)
               ORDER BY uploaded_at ASC, id ASC
               LIMIT $4"#,
            program_id,
            pivot_id,
            pivot_time,
            k_after
        )
        .fetch_all(pool)
        .await?;

        Ok((before, after))
    }

    /// Artifacts stuck in `processing` past `stuck_after`, across all
    /// programs — the janitor's revival query (§5, §9).
    pub async fn find_stuck_processing(pool: &PgPool, stuck_after: chrono::Duration) -> Result<Vec<Self>, sqlx::Error> {
        let cutoff = Utc::now() - stuck_after;
        sqlx::query_as!(
            Artifact,
            r#"SELECT
                id as "id!: Uuid",
                program_id as "program_id!: Uuid",
                filename, content_hash, byte_size, mime_type, raw_text, status,
                category, subcategory, failure_reason,
                superseded_by_id as "superseded_by_id: Uuid",
                deleted_at as "deleted_at: DateTime<Utc>",
                uploaded_at as "uploaded_at!: DateTime<Utc>",
                created_at as "created_at!: DateTime<Utc>",
                updated_at as "updated_at!: DateTime<Utc>"
               FROM artifacts
               WHERE status = 'processing' AND updated_at < $1
               ORDER BY updated_at ASC"#,
            cutoff
        )
        .fetch_all(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reanalyzable_only_from_terminal_states() {
        assert!(ArtifactStatus::Completed.reanalyzable());
        assert!(ArtifactStatus::Failed.reanalyzable());
        assert!(!ArtifactStatus::Pending.reanalyzable());
        assert!(!ArtifactStatus::Processing.reanalyzable());
        assert!(!ArtifactStatus::OcrRequired.reanalyzable());
    }

    #[test]
    fn status_round_trips_through_string() {
        for s in [
            ArtifactStatus::Pending,
            ArtifactStatus::Processing,
            ArtifactStatus::Completed,
            ArtifactStatus::Failed,
            ArtifactStatus::OcrRequired,
        ] {
            let parsed: ArtifactStatus = s.to_string().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }
}

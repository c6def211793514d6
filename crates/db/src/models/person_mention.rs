use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, PgPool, Postgres};
use uuid::Uuid;

/// A person mentioned within a single artifact (§3, §4.C). `name` is stored
/// as extracted; canonicalization (lowercase, whitespace-collapsed) happens
/// in the entity graph, not here, so the original casing survives for display.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PersonMention {
    pub id: Uuid,
    pub artifact_id: Uuid,
    pub name: String,
    pub role: Option<String>,
    pub organization: Option<String>,
    pub mention_count: i32,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

pub struct NewPersonMention {
    pub name: String,
    pub role: Option<String>,
    pub organization: Option<String>,
    pub mention_count: i32,
    pub confidence: f64,
}

impl PersonMention {
    pub async fn insert<'e, E>(
        executor: E,
        id: Uuid,
        artifact_id: Uuid,
        data: NewPersonMention,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as!(
            PersonMention,
            r#"INSERT INTO person_mentions
               (id, artifact_id, name, role, organization, mention_count, confidence)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               RETURNING id as "id!: Uuid", artifact_id as "artifact_id!: Uuid", name, role,
                   organization, mention_count, confidence, created_at as "created_at!: DateTime<Utc>""#,
            id,
            artifact_id,
            data.name,
            data.role,
            data.organization,
            data.mention_count,
            data.confidence,
        )
        .fetch_one(executor)
        .await
    }

    pub async fn find_by_artifact(pool: &PgPool, artifact_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as!(
            PersonMention,
            r#"SELECT id as "id!: Uuid", artifact_id as "artifact_id!: Uuid", name, role,
                   organization, mention_count, confidence, created_at as "created_at!: DateTime<Utc>"
               FROM person_mentions WHERE artifact_id = $1 ORDER BY mention_count DESC"#,
            artifact_id
        )
        .fetch_all(pool)
        .await
    }

    pub async fn delete_by_artifact<'e, E>(executor: E, artifact_id: Uuid) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query!("DELETE FROM person_mentions WHERE artifact_id = $1", artifact_id)
            .execute(executor)
            .await?;
        Ok(())
    }
}

/// Collapse internal whitespace and lowercase, used as the entity graph's
/// node key (§4.C: mention ids are per-artifact, identity is by name).
pub fn canonical_name(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_name_collapses_whitespace_and_case() {
        assert_eq!(canonical_name("  Jane   Doe\n"), "jane doe");
        assert_eq!(canonical_name("JANE DOE"), canonical_name("Jane Doe"));
    }
}

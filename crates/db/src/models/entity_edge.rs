use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, PgPool, Postgres};
use uuid::Uuid;

/// An undirected co-occurrence edge between two canonical person names
/// (§4.C). `person_a < person_b` is enforced by a check constraint so every
/// pair has exactly one row regardless of extraction order.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EntityEdge {
    pub program_id: Uuid,
    pub person_a: String,
    pub person_b: String,
    pub co_occurrence_count: i32,
    pub shared_artifact_ids: Vec<Uuid>,
    pub strength: f64,
    pub updated_at: DateTime<Utc>,
}

impl EntityEdge {
    /// Order a raw pair into the `(person_a, person_b)` storage order.
    pub fn canonical_pair(a: &str, b: &str) -> (String, String) {
        if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        }
    }

    /// Record a co-occurrence in `artifact_id`. Idempotent: re-ingesting the
    /// same artifact never double-counts, because `co_occurrence_count` is
    /// derived from whether `artifact_id` was already a member of
    /// `shared_artifact_ids` rather than blindly incremented — this keeps
    /// testable property 6 (`count == |shared_artifact_ids|`) true even if
    /// `Ingest` runs twice for the same artifact (e.g. after a janitor
    /// revival). `strength` is computed here, not by the caller, so there is
    /// one place that implements `strength = min(1, count/10)` (§3).
    pub async fn record_co_occurrence<'e, E>(
        executor: E,
        program_id: Uuid,
        person_a: &str,
        person_b: &str,
        artifact_id: Uuid,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let (a, b) = Self::canonical_pair(person_a, person_b);
        sqlx::query_as!(
            EntityEdge,
            r#"INSERT INTO entity_edges (program_id, person_a, person_b, co_occurrence_count, shared_artifact_ids, strength)
               VALUES ($1, $2, $3, 1, ARRAY[$4], LEAST(1.0, 1.0 / 10.0))
               ON CONFLICT (program_id, person_a, person_b) DO UPDATE SET
                   shared_artifact_ids = CASE
                       WHEN $4 = ANY(entity_edges.shared_artifact_ids) THEN entity_edges.shared_artifact_ids
                       ELSE array_append(entity_edges.shared_artifact_ids, $4)
                   END,
                   co_occurrence_count = CASE
                       WHEN $4 = ANY(entity_edges.shared_artifact_ids) THEN entity_edges.co_occurrence_count
                       ELSE entity_edges.co_occurrence_count + 1
                   END,
                   strength = LEAST(1.0, (CASE
                       WHEN $4 = ANY(entity_edges.shared_artifact_ids) THEN entity_edges.co_occurrence_count
                       ELSE entity_edges.co_occurrence_count + 1
                   END)::double precision / 10.0),
                   updated_at = NOW()
               RETURNING program_id as "program_id!: Uuid", person_a, person_b, co_occurrence_count,
                   shared_artifact_ids as "shared_artifact_ids!: Vec<Uuid>", strength,
                   updated_at as "updated_at!: DateTime<Utc>""#,
            program_id,
            a,
            b,
            artifact_id,
        )
        .fetch_one(executor)
        .await
    }

    /// All edges touching a canonical person name, ordered by strength
    /// descending — the entity graph's neighbor query (§4.C).
    pub async fn neighbors_of(
        pool: &PgPool,
        program_id: Uuid,
        person: &str,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as!(
            EntityEdge,
            r#"SELECT program_id as "program_id!: Uuid", person_a, person_b, co_occurrence_count,
                   shared_artifact_ids as "shared_artifact_ids!: Vec<Uuid>", strength,
                   updated_at as "updated_at!: DateTime<Utc>"
               FROM entity_edges
               WHERE program_id = $1 AND (person_a = $2 OR person_b = $2)
               ORDER BY strength DESC
               LIMIT $3"#,
            program_id,
            person,
            limit
        )
        .fetch_all(pool)
        .await
    }

    pub async fn all_for_program(pool: &PgPool, program_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as!(
            EntityEdge,
            r#"SELECT program_id as "program_id!: Uuid", person_a, person_b, co_occurrence_count,
                   shared_artifact_ids as "shared_artifact_ids!: Vec<Uuid>", strength,
                   updated_at as "updated_at!: DateTime<Utc>"
               FROM entity_edges WHERE program_id = $1"#,
            program_id
        )
        .fetch_all(pool)
        .await
    }

    /// The other endpoint of an edge relative to a known person, for
    /// building an adjacency view without a self-join in Rust.
    pub fn other(&self, person: &str) -> &str {
        if self.person_a == person { &self.person_b } else { &self.person_a }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_pair_is_order_independent() {
        assert_eq!(
            EntityEdge::canonical_pair("zoe", "amy"),
            EntityEdge::canonical_pair("amy", "zoe")
        );
    }
}

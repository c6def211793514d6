use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, PgPool, Postgres};
use uuid::Uuid;

/// An artifact's semantic embedding, stored as a plain `double precision[]`
/// column (§4.F semantic signal). Cosine similarity is computed in Rust by
/// the relevance scorer rather than pushed into SQL.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Embedding {
    pub artifact_id: Uuid,
    pub vector: Vec<f64>,
    pub dims: i32,
    pub created_at: DateTime<Utc>,
}

impl Embedding {
    pub async fn upsert<'e, E>(
        executor: E,
        artifact_id: Uuid,
        vector: Vec<f64>,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let dims = vector.len() as i32;
        sqlx::query_as!(
            Embedding,
            r#"INSERT INTO embeddings (artifact_id, vector, dims)
               VALUES ($1, $2, $3)
               ON CONFLICT (artifact_id) DO UPDATE SET vector = EXCLUDED.vector, dims = EXCLUDED.dims
               RETURNING artifact_id as "artifact_id!: Uuid", vector, dims,
                   created_at as "created_at!: DateTime<Utc>""#,
            artifact_id,
            &vector,
            dims,
        )
        .fetch_one(executor)
        .await
    }

    pub async fn find_by_artifact(pool: &PgPool, artifact_id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as!(
            Embedding,
            r#"SELECT artifact_id as "artifact_id!: Uuid", vector, dims,
                   created_at as "created_at!: DateTime<Utc>"
               FROM embeddings WHERE artifact_id = $1"#,
            artifact_id
        )
        .fetch_optional(pool)
        .await
    }

    pub async fn find_many(pool: &PgPool, artifact_ids: &[Uuid]) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as!(
            Embedding,
            r#"SELECT artifact_id as "artifact_id!: Uuid", vector, dims,
                   created_at as "created_at!: DateTime<Utc>"
               FROM embeddings WHERE artifact_id = ANY($1)"#,
            artifact_ids
        )
        .fetch_all(pool)
        .await
    }
}

/// Cosine similarity between two equal-length vectors. Returns `0.0` for
/// mismatched lengths or a zero-magnitude vector rather than erroring — the
/// scorer treats that as "no signal" (§4.F graceful degradation).
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let mag_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    (dot / (mag_a * mag_b)).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_have_similarity_one() {
        let v = vec![0.1, 0.2, 0.3];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn orthogonal_vectors_have_similarity_zero() {
        assert!((cosine_similarity(&[1.0, 0.0], &[0.0, 1.0])).abs() < 1e-9);
    }

    #[test]
    fn mismatched_lengths_degrade_to_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
    }
}

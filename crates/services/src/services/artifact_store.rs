use std::collections::HashSet;

use chrono::{DateTime, Utc};
use db::DBService;
use db::models::artifact::Artifact;
use db::models::artifact_summary::ArtifactSummary;
use db::models::embedding::Embedding;
use db::models::fact::Fact;
use db::models::person_mention::PersonMention;
use db::models::topic::Topic;
use uuid::Uuid;

/// Read-oriented façade over the artifact tables (§4.A). Every lookup is
/// scoped by program at the call site (the id arguments already belong to a
/// known program; this layer does not re-check tenancy, the caller does).
///
/// Transient store errors degrade to an empty result rather than propagate —
/// §4.A: "transient `Unavailable` that callers MUST treat as an empty
/// result". `sqlx::Error::Io`/`PoolTimedOut` are the transient cases; a
/// `RowNotFound` on a list/find-many query never occurs (those return `Vec`),
/// so this only matters for the `find_*` helpers that fan out to multiple
/// sources in the context builder.
#[derive(Clone)]
pub struct ArtifactStore {
    db: DBService,
}

fn is_transient(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
    )
}

impl ArtifactStore {
    pub fn new(db: DBService) -> Self {
        ArtifactStore { db }
    }

    pub async fn get_artifact(&self, id: Uuid) -> Result<Option<Artifact>, sqlx::Error> {
        Artifact::find_by_id(&self.db.pool, id).await
    }

    pub async fn get_summary(&self, artifact_id: Uuid) -> Result<Option<ArtifactSummary>, sqlx::Error> {
        ArtifactSummary::find_by_artifact(&self.db.pool, artifact_id).await
    }

    pub async fn get_persons(&self, artifact_id: Uuid) -> Result<Vec<PersonMention>, sqlx::Error> {
        PersonMention::find_by_artifact(&self.db.pool, artifact_id).await
    }

    pub async fn get_facts(&self, artifact_id: Uuid) -> Result<Vec<Fact>, sqlx::Error> {
        Fact::find_by_artifact(&self.db.pool, artifact_id).await
    }

    pub async fn get_topics(&self, artifact_id: Uuid) -> Result<Vec<Topic>, sqlx::Error> {
        Topic::find_by_artifact(&self.db.pool, artifact_id).await
    }

    pub async fn get_embedding(&self, artifact_id: Uuid) -> Result<Option<Embedding>, sqlx::Error> {
        Embedding::find_by_artifact(&self.db.pool, artifact_id).await
    }

    /// Artifact ids in `candidates` whose current status is `completed` and
    /// not soft-deleted — used by the cache's staleness check (§4.G step 1).
    pub async fn all_completed(&self, ids: &[Uuid]) -> Result<HashSet<Uuid>, sqlx::Error> {
        let mut completed = HashSet::new();
        for &id in ids {
            if let Some(a) = Artifact::find_by_id(&self.db.pool, id).await? {
                if a.status == "completed" && a.deleted_at.is_none() {
                    completed.insert(id);
                }
            }
        }
        Ok(completed)
    }

    pub async fn list_completed(
        &self,
        program_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Artifact>, sqlx::Error> {
        Artifact::list_completed(&self.db.pool, program_id, limit, offset).await
    }

    /// Degrades to `[]` on a transient store error, per §4.A.
    pub async fn find_by_entity_overlap(
        &self,
        program_id: Uuid,
        exclude_id: Uuid,
        person_names: &[String],
        limit: i64,
    ) -> Vec<Artifact> {
        match Artifact::find_by_entity_overlap(&self.db.pool, program_id, exclude_id, person_names, limit).await {
            Ok(rows) => rows,
            Err(e) if is_transient(&e) => {
                tracing::warn!(target: "context_graph::artifact_store", error = %e, "entity overlap query degraded to empty");
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(target: "context_graph::artifact_store", error = %e, "entity overlap query failed, degrading to empty");
                Vec::new()
            }
        }
    }

    /// Defaults: 30 days before/after (§4.A).
    pub async fn find_by_temporal_proximity(
        &self,
        program_id: Uuid,
        exclude_id: Uuid,
        pivot_time: DateTime<Utc>,
        window_before: chrono::Duration,
        window_after: chrono::Duration,
        limit: i64,
    ) -> Vec<Artifact> {
        match Artifact::find_by_temporal_proximity(
            &self.db.pool,
            program_id,
            exclude_id,
            pivot_time,
            window_before,
            window_after,
            limit,
        )
        .await
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(target: "context_graph::artifact_store", error = %e, "temporal proximity query degraded to empty");
                Vec::new()
            }
        }
    }

    pub async fn find_by_type(
        &self,
        program_id: Uuid,
        exclude_id: Uuid,
        category: &str,
        subcategory: Option<&str>,
        limit: i64,
    ) -> Vec<Artifact> {
        match Artifact::find_by_type(&self.db.pool, program_id, exclude_id, category, subcategory, limit).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(target: "context_graph::artifact_store", error = %e, "type-match query degraded to empty");
                Vec::new()
            }
        }
    }
}

use chrono::{DateTime, Utc};
use db::DBService;
use db::models::artifact::Artifact;
use db::models::temporal_sequence::TemporalSequence;
use uuid::Uuid;

use crate::config::PipelineConfig;

/// Chronological neighbor selection and sequence listing (§4.D). Sequence
/// detection itself is out of scope here — `sequences` only reads rows
/// populated by external tooling or a clustering job (§4.D, §9 open
/// question iii).
#[derive(Clone)]
pub struct TemporalOrganizer {
    db: DBService,
    k_before: i64,
    k_after: i64,
}

impl TemporalOrganizer {
    pub fn new(db: DBService, config: &PipelineConfig) -> Self {
        TemporalOrganizer {
            db,
            k_before: config.temporal_k_before,
            k_after: config.temporal_k_after,
        }
    }

    /// Up to `k_before` completed artifacts immediately preceding the pivot
    /// and up to `k_after` immediately following, ties broken by id
    /// ascending, excluding the pivot and soft-deleted artifacts (§4.D).
    pub async fn neighbors(
        &self,
        program_id: Uuid,
        pivot_id: Uuid,
        pivot_time: DateTime<Utc>,
    ) -> Result<(Vec<Artifact>, Vec<Artifact>), sqlx::Error> {
        Artifact::temporal_neighbors(&self.db.pool, program_id, pivot_id, pivot_time, self.k_before, self.k_after)
            .await
    }

    pub async fn sequences(&self, program_id: Uuid) -> Result<Vec<TemporalSequence>, sqlx::Error> {
        TemporalSequence::find_by_program(&self.db.pool, program_id).await
    }

    pub async fn sequences_containing(
        &self,
        program_id: Uuid,
        artifact_id: Uuid,
    ) -> Result<Vec<TemporalSequence>, sqlx::Error> {
        TemporalSequence::find_containing(&self.db.pool, program_id, artifact_id).await
    }
}

use db::DBService;
use db::models::entity_edge::EntityEdge;
use db::models::person_mention::{PersonMention, canonical_name};
use uuid::Uuid;

/// Incremental undirected co-occurrence graph of people within a program
/// (§4.C). Per-edge linearizability comes from the single atomic
/// `INSERT ... ON CONFLICT` statement in `EntityEdge::record_co_occurrence`;
/// no application-level locking is needed across concurrent `Ingest` calls
/// for different artifacts, since each edge row is its own serialization
/// point in Postgres.
#[derive(Clone)]
pub struct EntityGraph {
    db: DBService,
}

pub struct GraphStats {
    pub edge_count: i64,
    pub mean_strength: f64,
}

impl EntityGraph {
    pub fn new(db: DBService) -> Self {
        EntityGraph { db }
    }

    /// Ingest all person-pairs mentioned in one artifact (§4.C steps 1-3).
    pub async fn ingest(&self, program_id: Uuid, artifact_id: Uuid) -> Result<usize, sqlx::Error> {
        let mentions = PersonMention::find_by_artifact(&self.db.pool, artifact_id).await?;
        let mut names: Vec<String> = mentions.iter().map(|m| canonical_name(&m.name)).collect();
        names.sort();
        names.dedup();

        let mut edges_touched = 0;
        for i in 0..names.len() {
            for j in (i + 1)..names.len() {
                EntityEdge::record_co_occurrence(&self.db.pool, program_id, &names[i], &names[j], artifact_id)
                    .await?;
                edges_touched += 1;
            }
        }
        Ok(edges_touched)
    }

    /// Top-k neighbors of a canonical person name by strength desc (§4.C).
    pub async fn neighbors_of(
        &self,
        program_id: Uuid,
        person: &str,
        min_strength: f64,
        limit: i64,
    ) -> Result<Vec<(String, f64)>, sqlx::Error> {
        let person = canonical_name(person);
        let edges = EntityEdge::neighbors_of(&self.db.pool, program_id, &person, limit).await?;
        Ok(edges
            .into_iter()
            .filter(|e| e.strength >= min_strength)
            .map(|e| {
                let other = e.other(&person).to_string();
                (other, e.strength)
            })
            .collect())
    }

    /// Edges whose both endpoints are within `persons` (§4.C
    /// `CommonEdgesBetween`), used by the context builder's
    /// `entity_relationships` section.
    pub async fn common_edges_between(
        &self,
        program_id: Uuid,
        persons: &[String],
        min_strength: f64,
        limit: i64,
    ) -> Result<Vec<EntityEdge>, sqlx::Error> {
        let canonical: std::collections::HashSet<String> = persons.iter().map(|p| canonical_name(p)).collect();
        let mut edges = EntityEdge::all_for_program(&self.db.pool, program_id).await?;
        edges.retain(|e| {
            canonical.contains(&e.person_a) && canonical.contains(&e.person_b) && e.strength >= min_strength
        });
        edges.sort_by(|a, b| b.strength.partial_cmp(&a.strength).unwrap_or(std::cmp::Ordering::Equal));
        edges.truncate(limit as usize);
        Ok(edges)
    }

    pub async fn stats(&self, program_id: Uuid) -> Result<GraphStats, sqlx::Error> {
        let edges = EntityEdge::all_for_program(&self.db.pool, program_id).await?;
        let edge_count = edges.len() as i64;
        let mean_strength = if edges.is_empty() {
            0.0
        } else {
            edges.iter().map(|e| e.strength).sum::<f64>() / edges.len() as f64
        };
        Ok(GraphStats { edge_count, mean_strength })
    }
}

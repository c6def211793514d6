use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use db::models::artifact::Artifact;
use db::models::person_mention::canonical_name;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use utils::tokens::{estimate_tokens, truncate_to_token_budget};

use crate::config::PipelineConfig;
use crate::services::artifact_store::ArtifactStore;
use crate::services::context_cache::ContextCache;
use crate::services::entity_graph::EntityGraph;
use crate::services::fact_aggregator::{FactAggregator, FactOutcome};
use crate::services::relevance_scorer::{RelevanceScorer, ScoringInput, SignalVector};
use crate::services::temporal_organizer::TemporalOrganizer;

/// Roughly 200 tokens of summary text (§4.G section 1).
const RELATED_SUMMARY_TOKEN_CAP: i32 = 200;
/// Token estimate used for a candidate whose summary hasn't landed yet.
const DEFAULT_CANDIDATE_TOKEN_ESTIMATE: i32 = 300;

#[derive(Debug, Error)]
pub enum ContextBuilderError {
    #[error("pivot artifact {0} not found")]
    PivotNotFound(Uuid),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedArtifactEntry {
    pub artifact_id: Uuid,
    pub filename: String,
    pub category: Option<String>,
    pub summary: String,
    pub sentiment: Option<String>,
    pub priority: i32,
    pub score: f64,
    pub signals: SignalVector,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRelationshipPair {
    pub person_a: String,
    pub person_b: String,
    pub strength: f64,
    pub co_occurrence_count: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub artifact_id: Uuid,
    pub filename: String,
    pub uploaded_at: DateTime<Utc>,
    pub short_summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextPacketMeta {
    pub token_count: i32,
    pub included_ids: Vec<Uuid>,
    pub generated_at: DateTime<Utc>,
    pub budget: i64,
    pub weights: crate::config::ScorerWeights,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextPacket {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub related_artifacts: Vec<RelatedArtifactEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entity_relationships: Vec<EntityRelationshipPair>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub timeline: Vec<TimelineEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub aggregated_facts: Vec<FactOutcome>,
    pub meta: Option<ContextPacketMeta>,
}

struct CandidateContext {
    artifact: Artifact,
    persons: HashSet<String>,
    embedding: Option<Vec<f64>>,
    fact_count: usize,
    summary_text: Option<String>,
    sentiment: Option<String>,
    priority: i32,
}

/// The orchestrator (§4.G): assembles a bounded ContextPacket for a pivot
/// artifact by fanning out to A (artifact store), C (entity graph), D
/// (temporal organizer), E (fact aggregator) and F (relevance scorer), then
/// enforcing a token budget on the result.
#[derive(Clone)]
pub struct ContextBuilder {
    artifacts: ArtifactStore,
    cache: ContextCache,
    scorer: RelevanceScorer,
    entity_graph: EntityGraph,
    temporal: TemporalOrganizer,
    facts: FactAggregator,
    config: PipelineConfig,
}

impl ContextBuilder {
    pub fn new(
        artifacts: ArtifactStore,
        cache: ContextCache,
        entity_graph: EntityGraph,
        temporal: TemporalOrganizer,
        facts: FactAggregator,
        config: PipelineConfig,
    ) -> Self {
        let scorer = RelevanceScorer::new(config.scorer_weights, config.temporal_decay_tau_days);
        ContextBuilder { artifacts, cache, scorer, entity_graph, temporal, facts, config }
    }

    pub async fn build(&self, program_id: Uuid, pivot_id: Uuid) -> Result<ContextPacket, ContextBuilderError> {
        let pivot = self
            .artifacts
            .get_artifact(pivot_id)
            .await?
            .ok_or(ContextBuilderError::PivotNotFound(pivot_id))?;

        // Step 1: cache check.
        if let Some(cached) = self.cache.get(pivot_id).await {
            let completed = self.artifacts.all_completed(&cached.included_artifact_ids).await?;
            if cached.included_artifact_ids.iter().all(|id| completed.contains(id)) {
                if let Ok(packet) = serde_json::from_value::<ContextPacket>(cached.packet_json) {
                    return Ok(packet);
                }
            }
        }

        let pivot_persons = self.person_set(pivot_id).await?;
        let pivot_embedding = self.artifacts.get_embedding(pivot_id).await?.map(|e| e.vector);

        // Step 2: candidate gathering, three sources concurrently.
        let person_names: Vec<String> = pivot_persons.iter().cloned().collect();
        let cap = self.config.candidate_cap;
        let (by_entity, by_temporal, by_type) = tokio::join!(
            self.artifacts.find_by_entity_overlap(program_id, pivot_id, &person_names, cap),
            self.artifacts.find_by_temporal_proximity(
                program_id,
                pivot_id,
                pivot.uploaded_at,
                chrono::Duration::days(self.config.temporal_window_before_days),
                chrono::Duration::days(self.config.temporal_window_after_days),
                cap,
            ),
            async {
                match (&pivot.category, &pivot.subcategory) {
                    (Some(category), subcategory) => {
                        self.artifacts
                            .find_by_type(program_id, pivot_id, category, subcategory.as_deref(), cap)
                            .await
                    }
                    (None, _) => Vec::new(),
                }
            }
        );

        let mut union: HashMap<Uuid, Artifact> = HashMap::new();
        for artifact in by_entity.into_iter().chain(by_temporal).chain(by_type) {
            if artifact.id != pivot_id && artifact.deleted_at.is_none() {
                union.entry(artifact.id).or_insert(artifact);
            }
        }
        let candidates: Vec<Artifact> = union.into_values().take(cap as usize).collect();

        // Step 3: gather per-candidate data, bounded concurrency, then score.
        let contexts: Vec<CandidateContext> = stream::iter(candidates)
            .map(|artifact| self.load_candidate_context(artifact))
            .buffer_unordered(self.config.candidate_gathering_concurrency)
            .filter_map(|r| async move { r.ok() })
            .collect()
            .await;

        let scoring_input = ScoringInput {
            pivot_embedding: pivot_embedding.as_deref(),
            pivot_persons: &pivot_persons,
            pivot_time: pivot.uploaded_at,
            pivot_category: pivot.category.as_deref(),
            pivot_subcategory: pivot.subcategory.as_deref(),
        };

        let mut scored: Vec<(CandidateContext, f64, SignalVector)> = contexts
            .into_iter()
            .map(|ctx| {
                let (score, signals) = self.scorer.score(
                    &ctx.artifact,
                    ctx.embedding.as_deref(),
                    &ctx.persons,
                    ctx.fact_count,
                    &scoring_input,
                );
                (ctx, score, signals)
            })
            .collect();

        // Tie-break: score desc, then priority desc, then uploaded_at desc.
        scored.sort_by(|(a_ctx, a_score, _), (b_ctx, b_score, _)| {
            b_score
                .partial_cmp(a_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b_ctx.priority.cmp(&a_ctx.priority))
                .then(b_ctx.artifact.uploaded_at.cmp(&a_ctx.artifact.uploaded_at))
        });

        // Step 4: budget-aware greedy selection.
        let related_budget = (self.config.default_token_budget as f64 * self.config.related_artifacts_budget_fraction) as i32;
        let mut selected: Vec<(CandidateContext, f64, SignalVector)> = Vec::new();
        let mut running_tokens = 0_i32;
        for item in scored {
            if selected.len() as i64 >= self.config.included_cap {
                break;
            }
            let estimate = item
                .0
                .summary_text
                .as_ref()
                .map(|t| estimate_tokens(t))
                .unwrap_or(DEFAULT_CANDIDATE_TOKEN_ESTIMATE);
            if running_tokens + estimate > related_budget && !selected.is_empty() {
                break;
            }
            running_tokens += estimate;
            selected.push(item);
        }

        let included_ids: Vec<Uuid> = selected.iter().map(|(ctx, _, _)| ctx.artifact.id).collect();
        let mut all_persons: HashSet<String> = pivot_persons.clone();
        for (ctx, _, _) in &selected {
            all_persons.extend(ctx.persons.iter().cloned());
        }
        let person_list: Vec<String> = all_persons.into_iter().collect();

        let mut fact_scope = included_ids.clone();
        fact_scope.push(pivot_id);

        // Step 5: assemble sections concurrently.
        let (entity_relationships, timeline, aggregated_facts) = tokio::join!(
            self.build_entity_relationships(program_id, &person_list),
            self.build_timeline(program_id, pivot_id, pivot.uploaded_at),
            self.build_aggregated_facts(&fact_scope),
        );

        let related_artifacts: Vec<RelatedArtifactEntry> = selected
            .into_iter()
            .map(|(ctx, score, signals)| {
                let summary = ctx
                    .summary_text
                    .map(|t| truncate_to_token_budget(&t, RELATED_SUMMARY_TOKEN_CAP))
                    .unwrap_or_default();
                RelatedArtifactEntry {
                    artifact_id: ctx.artifact.id,
                    filename: ctx.artifact.filename,
                    category: ctx.artifact.category,
                    summary,
                    sentiment: ctx.sentiment,
                    priority: ctx.priority,
                    score,
                    signals,
                }
            })
            .collect();

        // Step 6: budget enforcement on the assembled packet.
        let mut packet = ContextPacket {
            related_artifacts,
            entity_relationships,
            timeline,
            aggregated_facts,
            meta: None,
        };
        enforce_budget(&mut packet.related_artifacts, self.config.default_token_budget as i32);

        let token_count = packet_token_count(&packet);
        packet.meta = Some(ContextPacketMeta {
            token_count,
            included_ids: packet.related_artifacts.iter().map(|e| e.artifact_id).collect(),
            generated_at: Utc::now(),
            budget: self.config.default_token_budget,
            weights: self.config.scorer_weights,
        });

        // Step 7: best-effort cache write.
        if let Ok(packet_json) = serde_json::to_value(&packet) {
            let included = packet.related_artifacts.iter().map(|e| e.artifact_id).collect();
            self.cache
                .put(program_id, pivot_id, &pivot.content_hash, packet_json, included, token_count)
                .await;
        }

        Ok(packet)
    }

    async fn person_set(&self, artifact_id: Uuid) -> Result<HashSet<String>, sqlx::Error> {
        let mentions = self.artifacts.get_persons(artifact_id).await?;
        Ok(mentions.into_iter().map(|m| canonical_name(&m.name)).collect())
    }

    async fn load_candidate_context(&self, artifact: Artifact) -> Result<CandidateContext, sqlx::Error> {
        let artifact_id = artifact.id;
        let persons = self.person_set(artifact_id).await?;
        let embedding = self.artifacts.get_embedding(artifact_id).await?.map(|e| e.vector);
        let facts = self.artifacts.get_facts(artifact_id).await?;
        let summary = self.artifacts.get_summary(artifact_id).await?;

        Ok(CandidateContext {
            artifact,
            persons,
            embedding,
            fact_count: facts.len(),
            summary_text: summary.as_ref().map(|s| s.summary_text.clone()),
            sentiment: summary.as_ref().map(|s| s.sentiment.clone()),
            priority: summary.map(|s| s.priority).unwrap_or(0),
        })
    }

    async fn build_entity_relationships(&self, program_id: Uuid, persons: &[String]) -> Vec<EntityRelationshipPair> {
        if persons.is_empty() {
            return Vec::new();
        }
        match self
            .entity_graph
            .common_edges_between(
                program_id,
                persons,
                self.config.entity_relationship_min_strength,
                self.config.entity_relationship_cap,
            )
            .await
        {
            Ok(edges) => edges
                .into_iter()
                .map(|e| EntityRelationshipPair {
                    person_a: e.person_a,
                    person_b: e.person_b,
                    strength: e.strength,
                    co_occurrence_count: e.co_occurrence_count,
                })
                .collect(),
            Err(e) => {
                tracing::warn!(target: "context_graph::context_builder", error = %e, "entity relationships section degraded to empty");
                Vec::new()
            }
        }
    }

    async fn build_timeline(&self, program_id: Uuid, pivot_id: Uuid, pivot_time: DateTime<Utc>) -> Vec<TimelineEntry> {
        match self.temporal.neighbors(program_id, pivot_id, pivot_time).await {
            Ok((before, after)) => {
                let mut entries: Vec<TimelineEntry> = before
                    .into_iter()
                    .chain(after)
                    .map(|a| TimelineEntry {
                        artifact_id: a.id,
                        filename: a.filename,
                        uploaded_at: a.uploaded_at,
                        short_summary: None,
                    })
                    .collect();
                entries.sort_by_key(|e| e.uploaded_at);
                entries
            }
            Err(e) => {
                tracing::warn!(target: "context_graph::context_builder", error = %e, "timeline section degraded to empty");
                Vec::new()
            }
        }
    }

    async fn build_aggregated_facts(&self, artifact_ids: &[Uuid]) -> Vec<FactOutcome> {
        match self.facts.aggregate(artifact_ids).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                tracing::warn!(target: "context_graph::context_builder", error = %e, "aggregated facts section degraded to empty");
                Vec::new()
            }
        }
    }

}

/// §4.G step 6: if the assembled packet exceeds budget, shave the longest
/// related-artifact summaries first (shortest-last), then drop the
/// lowest-scoring entries entirely if still over. A free function (rather
/// than a method) so it can be unit tested without a live `ContextBuilder`.
fn enforce_budget(entries: &mut Vec<RelatedArtifactEntry>, budget_tokens: i32) {
    let mut total: i32 = entries.iter().map(|e| estimate_tokens(&e.summary)).sum();
    if total <= budget_tokens {
        return;
    }

    // Shrink summaries proportionally, longest first, down to a floor.
    let floor_tokens = 120;
    let mut order: Vec<usize> = (0..entries.len()).collect();
    order.sort_by_key(|&i| std::cmp::Reverse(estimate_tokens(&entries[i].summary)));
    for idx in order {
        if total <= budget_tokens {
            break;
        }
        let current = estimate_tokens(&entries[idx].summary);
        if current <= floor_tokens {
            continue;
        }
        let shrunk = truncate_to_token_budget(&entries[idx].summary, floor_tokens);
        let new_len = estimate_tokens(&shrunk);
        total -= current - new_len;
        entries[idx].summary = shrunk;
    }

    if total <= budget_tokens {
        return;
    }

    // Still over: drop lowest-scoring entries until within budget.
    entries.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));
    while total > budget_tokens && !entries.is_empty() {
        let dropped = entries.remove(0);
        total -= estimate_tokens(&dropped.summary);
    }
    entries.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
}

fn packet_token_count(packet: &ContextPacket) -> i32 {
    let related: i32 = packet.related_artifacts.iter().map(|e| estimate_tokens(&e.summary)).sum();
    let other = serde_json::to_string(&(&packet.entity_relationships, &packet.timeline, &packet.aggregated_facts))
        .map(|s| estimate_tokens(&s))
        .unwrap_or(0);
    related + other
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(summary: &str, score: f64) -> RelatedArtifactEntry {
        RelatedArtifactEntry {
            artifact_id: Uuid::new_v4(),
            filename: "a.txt".to_string(),
            category: None,
            summary: summary.to_string(),
            sentiment: None,
            priority: 0,
            score,
            signals: SignalVector::default(),
        }
    }

    #[test]
    fn enforce_budget_is_noop_when_already_within_budget() {
        let mut entries = vec![entry("short", 0.5)];
        enforce_budget(&mut entries, 4000);
        assert_eq!(entries[0].summary, "short");
    }

    #[test]
    fn enforce_budget_shrinks_longest_summary_first() {
        let long = "word ".repeat(400);
        let mut entries = vec![entry(&long, 0.9), entry("tiny", 0.8)];
        let before_total: i32 = entries.iter().map(|e| estimate_tokens(&e.summary)).sum();
        enforce_budget(&mut entries, before_total / 2);
        let after_total: i32 = entries.iter().map(|e| estimate_tokens(&e.summary)).sum();
        assert!(after_total <= before_total / 2);
        assert_eq!(entries[1].summary, "tiny");
    }

    #[test]
    fn enforce_budget_drops_lowest_scoring_when_shrinking_is_not_enough() {
        let mut entries = vec![entry("word ", 0.9), entry("word ", 0.1), entry("word ", 0.5)];
        enforce_budget(&mut entries, 50);
        assert!(entries.len() < 3);
        assert!(entries.iter().all(|e| e.score >= 0.5));
    }
}

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use db::models::artifact::Artifact;
use db::models::embedding::cosine_similarity;
use serde::{Deserialize, Serialize};

use crate::config::ScorerWeights;

/// The decomposed per-signal contribution of one candidate's score (§4.F:
/// "returns ranked candidates and the decomposed signal vector (used in
/// observability, not for ranking)").
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SignalVector {
    pub semantic: Option<f64>,
    pub entity: f64,
    pub temporal: f64,
    pub type_match: f64,
    pub density: f64,
}

#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub artifact: Artifact,
    pub score: f64,
    pub signals: SignalVector,
}

pub struct ScoringInput<'a> {
    pub pivot_embedding: Option<&'a [f64]>,
    pub pivot_persons: &'a HashSet<String>,
    pub pivot_time: DateTime<Utc>,
    pub pivot_category: Option<&'a str>,
    pub pivot_subcategory: Option<&'a str>,
}

/// Weighted fusion of semantic/entity/temporal/type/density signals into a
/// single rank (§4.F). Absent signals degrade to 0 contribution and the
/// remaining weights are renormalized to still sum to 1, per the
/// graceful-degradation rule.
#[derive(Clone)]
pub struct RelevanceScorer {
    weights: ScorerWeights,
    temporal_tau_days: f64,
}

impl RelevanceScorer {
    pub fn new(weights: ScorerWeights, temporal_tau_days: f64) -> Self {
        RelevanceScorer { weights, temporal_tau_days }
    }

    /// Scores one candidate relative to the pivot. `candidate_embedding` and
    /// `candidate_persons`/`candidate_facts_count` come from the caller
    /// since they're already loaded for other purposes in the context
    /// builder; this keeps the scorer free of its own DB access.
    pub fn score(
        &self,
        candidate: &Artifact,
        candidate_embedding: Option<&[f64]>,
        candidate_persons: &HashSet<String>,
        candidate_fact_count: usize,
        input: &ScoringInput,
    ) -> (f64, SignalVector) {
        let mut available_weight = 0.0;
        let mut weighted_sum = 0.0;
        let mut signals = SignalVector::default();

        // Semantic: absent if either embedding is missing.
        if let (Some(pivot_vec), Some(cand_vec)) = (input.pivot_embedding, candidate_embedding) {
            let sim = cosine_similarity(pivot_vec, cand_vec).clamp(0.0, 1.0);
            signals.semantic = Some(sim);
            weighted_sum += self.weights.semantic * sim;
            available_weight += self.weights.semantic;
        }

        let entity = entity_overlap(input.pivot_persons, candidate_persons);
        signals.entity = entity;
        weighted_sum += self.weights.entity * entity;
        available_weight += self.weights.entity;

        let delta_days = (candidate.uploaded_at - input.pivot_time).num_seconds().abs() as f64 / 86_400.0;
        let temporal = (-delta_days / self.temporal_tau_days).exp();
        signals.temporal = temporal;
        weighted_sum += self.weights.temporal * temporal;
        available_weight += self.weights.temporal;

        let type_match = type_match_signal(
            input.pivot_category,
            input.pivot_subcategory,
            candidate.category.as_deref(),
            candidate.subcategory.as_deref(),
        );
        signals.type_match = type_match;
        weighted_sum += self.weights.type_match * type_match;
        available_weight += self.weights.type_match;

        let density = (candidate_fact_count as f64 / 20.0).min(1.0);
        signals.density = density;
        weighted_sum += self.weights.density * density;
        available_weight += self.weights.density;

        let score = if available_weight > 0.0 { (weighted_sum / available_weight).clamp(0.0, 1.0) } else { 0.0 };
        (score, signals)
    }
}

fn entity_overlap(pivot_persons: &HashSet<String>, candidate_persons: &HashSet<String>) -> f64 {
    if pivot_persons.is_empty() {
        return 0.0;
    }
    let overlap = pivot_persons.intersection(candidate_persons).count();
    overlap as f64 / pivot_persons.len().max(1) as f64
}

fn type_match_signal(
    pivot_category: Option<&str>,
    pivot_subcategory: Option<&str>,
    candidate_category: Option<&str>,
    candidate_subcategory: Option<&str>,
) -> f64 {
    match (pivot_category, candidate_category) {
        (Some(pc), Some(cc)) if pc == cc => {
            if pivot_subcategory.is_some() && pivot_subcategory == candidate_subcategory {
                1.0
            } else {
                0.5
            }
        }
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_overlap_is_fraction_of_pivot_persons() {
        let pivot: HashSet<String> = ["bob".to_string()].into_iter().collect();
        let candidate: HashSet<String> = ["bob".to_string(), "carol".to_string()].into_iter().collect();
        assert_eq!(entity_overlap(&pivot, &candidate), 1.0);
    }

    #[test]
    fn type_match_full_on_category_and_subcategory() {
        assert_eq!(type_match_signal(Some("invoice"), Some("recurring"), Some("invoice"), Some("recurring")), 1.0);
        assert_eq!(type_match_signal(Some("invoice"), Some("recurring"), Some("invoice"), Some("onetime")), 0.5);
        assert_eq!(type_match_signal(Some("invoice"), None, Some("contract"), None), 0.0);
    }

    #[test]
    fn missing_semantic_signal_renormalizes_remaining_weights() {
        let weights = ScorerWeights::default();
        let scorer = RelevanceScorer::new(weights, 14.0);
        let candidate = Artifact {
            id: uuid::Uuid::new_v4(),
            program_id: uuid::Uuid::new_v4(),
            filename: "x".to_string(),
            content_hash: "h".to_string(),
            byte_size: 0,
            mime_type: "text/plain".to_string(),
            raw_text: None,
            status: "completed".to_string(),
            category: None,
            subcategory: None,
            failure_reason: None,
            superseded_by_id: None,
            deleted_at: None,
            uploaded_at: Utc::now(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let pivot_persons = HashSet::new();
        let input = ScoringInput {
            pivot_embedding: None,
            pivot_persons: &pivot_persons,
            pivot_time: Utc::now(),
            pivot_category: None,
            pivot_subcategory: None,
        };
        let (score, signals) = scorer.score(&candidate, None, &HashSet::new(), 0, &input);
        assert!(signals.semantic.is_none());
        assert!((0.0..=1.0).contains(&score));
    }
}

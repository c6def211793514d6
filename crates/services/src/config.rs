use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("scorer weights must sum to 1 (±1e-6), got {0}")]
    WeightsDoNotSumToOne(f64),
    #[error("scorer weight {0} must be >= 0")]
    NegativeWeight(&'static str),
    #[error("invalid value for env var {0}: {1}")]
    InvalidEnvValue(&'static str, String),
}

/// Weights for the five relevance signals (§4.F). Immutable for the
/// duration of a single `Analyze` call (§9 open question ii).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScorerWeights {
    pub semantic: f64,
    pub entity: f64,
    pub temporal: f64,
    pub type_match: f64,
    pub density: f64,
}

impl Default for ScorerWeights {
    fn default() -> Self {
        ScorerWeights {
            semantic: 0.40,
            entity: 0.25,
            temporal: 0.20,
            type_match: 0.10,
            density: 0.05,
        }
    }
}

impl ScorerWeights {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, w) in [
            ("semantic", self.semantic),
            ("entity", self.entity),
            ("temporal", self.temporal),
            ("type_match", self.type_match),
            ("density", self.density),
        ] {
            if w < 0.0 {
                return Err(ConfigError::NegativeWeight(name));
            }
        }
        let sum = self.semantic + self.entity + self.temporal + self.type_match + self.density;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(ConfigError::WeightsDoNotSumToOne(sum));
        }
        Ok(())
    }
}

/// Immutable, process-wide configuration for the analysis pipeline, loaded
/// once at startup from the environment (§SPEC_FULL ambient stack: config).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub scorer_weights: ScorerWeights,

    /// Default token budget B for a ContextPacket (§4.G).
    pub default_token_budget: i64,
    /// Candidate cap K before scoring (§4.G).
    pub candidate_cap: i64,
    /// Included-artifact cap N in `related_artifacts` (§4.G).
    pub included_cap: i64,
    /// Fraction of the budget reserved for related-artifact summaries.
    pub related_artifacts_budget_fraction: f64,

    pub temporal_k_before: i64,
    pub temporal_k_after: i64,
    pub temporal_window_before_days: i64,
    pub temporal_window_after_days: i64,
    /// τ in `temporal(c,p) = exp(-Δdays / τ)` (§4.F).
    pub temporal_decay_tau_days: f64,

    pub entity_relationship_min_strength: f64,
    pub entity_relationship_cap: i64,

    /// ε for numeric fact conflict detection, as a fraction (§4.E).
    pub fact_conflict_epsilon: f64,
    pub fact_aggregate_cap: i64,

    pub fast_cache_ttl: Duration,
    pub durable_cache_ttl: Duration,

    /// Max in-flight LLM calls process-wide (§5).
    pub llm_concurrency_limit: usize,
    /// Token-bucket capacity / refill rate for the LLM client (§5).
    pub llm_rate_limit_per_minute: u64,
    /// Concurrent DB queries per context build during candidate gathering (§5).
    pub candidate_gathering_concurrency: usize,

    /// Artifact raw text cap before truncation, in estimated tokens (§4.H step 4).
    pub raw_text_token_cap: usize,
    /// Stuck-`processing`-artifact revival timeout for the janitor (§5).
    pub stuck_processing_timeout: Duration,
    pub janitor_poll_interval: Duration,

    pub llm_model: String,
    pub llm_max_retries: u32,
    pub embedding_dims: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            scorer_weights: ScorerWeights::default(),
            default_token_budget: 4000,
            candidate_cap: 50,
            included_cap: 8,
            related_artifacts_budget_fraction: 0.6,
            temporal_k_before: 5,
            temporal_k_after: 2,
            temporal_window_before_days: 30,
            temporal_window_after_days: 30,
            temporal_decay_tau_days: 14.0,
            entity_relationship_min_strength: 0.2,
            entity_relationship_cap: 20,
            fact_conflict_epsilon: 0.01,
            fact_aggregate_cap: 20,
            fast_cache_ttl: Duration::from_secs(60 * 60),
            durable_cache_ttl: Duration::from_secs(24 * 60 * 60),
            llm_concurrency_limit: 16,
            llm_rate_limit_per_minute: 100,
            candidate_gathering_concurrency: 3,
            raw_text_token_cap: 20_000,
            stuck_processing_timeout: Duration::from_secs(10 * 60),
            janitor_poll_interval: Duration::from_secs(60),
            llm_model: "gpt-4o".to_string(),
            llm_max_retries: 3,
            embedding_dims: 1536,
        }
    }
}

impl PipelineConfig {
    /// Load from the environment, falling back to defaults for anything
    /// unset. Mirrors the teacher's `DBService::new()` `env::var` convention.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = PipelineConfig::default();

        if let Ok(v) = env::var("CONTEXT_TOKEN_BUDGET") {
            cfg.default_token_budget = parse_env("CONTEXT_TOKEN_BUDGET", &v)?;
        }
        if let Ok(v) = env::var("CONTEXT_CANDIDATE_CAP") {
            cfg.candidate_cap = parse_env("CONTEXT_CANDIDATE_CAP", &v)?;
        }
        if let Ok(v) = env::var("CONTEXT_INCLUDED_CAP") {
            cfg.included_cap = parse_env("CONTEXT_INCLUDED_CAP", &v)?;
        }
        if let Ok(v) = env::var("LLM_CONCURRENCY_LIMIT") {
            cfg.llm_concurrency_limit = parse_env("LLM_CONCURRENCY_LIMIT", &v)?;
        }
        if let Ok(v) = env::var("LLM_RATE_LIMIT_PER_MINUTE") {
            cfg.llm_rate_limit_per_minute = parse_env("LLM_RATE_LIMIT_PER_MINUTE", &v)?;
        }
        if let Ok(v) = env::var("LLM_MODEL") {
            cfg.llm_model = v;
        }
        if let Ok(v) = env::var("STUCK_PROCESSING_TIMEOUT_SECS") {
            let secs: u64 = parse_env("STUCK_PROCESSING_TIMEOUT_SECS", &v)?;
            cfg.stuck_processing_timeout = Duration::from_secs(secs);
        }
        if let Ok(v) = env::var("SCORER_WEIGHT_SEMANTIC") {
            cfg.scorer_weights.semantic = parse_env("SCORER_WEIGHT_SEMANTIC", &v)?;
        }
        if let Ok(v) = env::var("SCORER_WEIGHT_ENTITY") {
            cfg.scorer_weights.entity = parse_env("SCORER_WEIGHT_ENTITY", &v)?;
        }
        if let Ok(v) = env::var("SCORER_WEIGHT_TEMPORAL") {
            cfg.scorer_weights.temporal = parse_env("SCORER_WEIGHT_TEMPORAL", &v)?;
        }
        if let Ok(v) = env::var("SCORER_WEIGHT_TYPE") {
            cfg.scorer_weights.type_match = parse_env("SCORER_WEIGHT_TYPE", &v)?;
        }
        if let Ok(v) = env::var("SCORER_WEIGHT_DENSITY") {
            cfg.scorer_weights.density = parse_env("SCORER_WEIGHT_DENSITY", &v)?;
        }

        cfg.scorer_weights.validate()?;
        Ok(cfg)
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidEnvValue(name, value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_sum_to_one() {
        ScorerWeights::default().validate().unwrap();
    }

    #[test]
    fn rejects_weights_not_summing_to_one() {
        let w = ScorerWeights {
            semantic: 0.5,
            entity: 0.5,
            temporal: 0.5,
            type_match: 0.0,
            density: 0.0,
        };
        assert!(w.validate().is_err());
    }

    #[test]
    fn rejects_negative_weight() {
        let w = ScorerWeights {
            semantic: -0.1,
            entity: 0.35,
            temporal: 0.4,
            type_match: 0.2,
            density: 0.15,
        };
        assert!(w.validate().is_err());
    }
}

use std::collections::HashMap;

use db::DBService;
use db::models::fact::Fact;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::PipelineConfig;

/// Conflict severity ordering used to sort the aggregated view (§4.E:
/// "Conflicts are ordered by severity: amount > date > string").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSeverity {
    String = 0,
    Date = 1,
    Amount = 2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictMember {
    pub value: String,
    pub artifact_id: Uuid,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FactOutcome {
    Consensus {
        fact_type: String,
        key: String,
        canonical_value: String,
        supporting_artifact_ids: Vec<Uuid>,
        confidence: f64,
    },
    Conflict {
        fact_type: String,
        key: String,
        members: Vec<ConflictMember>,
        severity: ConflictSeverity,
    },
}

impl FactOutcome {
    fn participant_count(&self) -> usize {
        match self {
            FactOutcome::Consensus { supporting_artifact_ids, .. } => supporting_artifact_ids.len(),
            FactOutcome::Conflict { members, .. } => members.len(),
        }
    }

    fn severity_rank(&self) -> i32 {
        match self {
            FactOutcome::Consensus { .. } => -1,
            FactOutcome::Conflict { severity, .. } => *severity as i32,
        }
    }
}

fn normalize_key(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn members_of(facts: &[Fact]) -> Vec<ConflictMember> {
    facts
        .iter()
        .map(|f| ConflictMember { value: f.value.clone(), artifact_id: f.artifact_id, confidence: f.confidence })
        .collect()
}

fn consensus(fact_type: String, key: String, facts: &[Fact]) -> FactOutcome {
    let canonical_value = facts.first().map(|f| f.value.clone()).unwrap_or_default();
    let confidence = facts.iter().map(|f| f.confidence).fold(0.0_f64, f64::max);
    let supporting_artifact_ids = facts.iter().map(|f| f.artifact_id).collect();
    FactOutcome::Consensus { fact_type, key, canonical_value, supporting_artifact_ids, confidence }
}

/// Group-and-reconcile one canonical-key group of facts into a Consensus or
/// Conflict outcome (§4.E steps 3). Free function so it can be unit tested
/// without a live database.
fn reconcile(fact_type: String, key: String, facts: Vec<Fact>, epsilon: f64) -> FactOutcome {
    let members = members_of(&facts);

    if fact_type == "amount" || fact_type == "metric" {
        let numerics: Option<Vec<f64>> = facts.iter().map(|f| f.normalized_numeric).collect();
        if let Some(values) = numerics {
            if !values.is_empty() {
                let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
                let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                let denom = max.abs().max(min.abs()).max(1e-9);
                let relative_range = (max - min) / denom;
                if relative_range > epsilon {
                    return FactOutcome::Conflict { fact_type, key, members, severity: ConflictSeverity::Amount };
                }
                return consensus(fact_type, key, &facts);
            }
        }
    }

    if fact_type == "date" {
        let dates: Option<Vec<chrono::NaiveDate>> = facts.iter().map(|f| f.normalized_date).collect();
        if let Some(dates) = dates {
            if !dates.is_empty() {
                let min = *dates.iter().min().unwrap();
                let max = *dates.iter().max().unwrap();
                if (max - min).num_days().abs() > 1 {
                    return FactOutcome::Conflict { fact_type, key, members, severity: ConflictSeverity::Date };
                }
                return consensus(fact_type, key, &facts);
            }
        }
    }

    let distinct: std::collections::HashSet<String> = facts.iter().map(|f| normalize_key(&f.value)).collect();
    if distinct.len() > 1 {
        return FactOutcome::Conflict { fact_type, key, members, severity: ConflictSeverity::String };
    }

    consensus(fact_type, key, &facts)
}

/// Cross-artifact fact rollup with conflict detection (§4.E).
#[derive(Clone)]
pub struct FactAggregator {
    db: DBService,
    epsilon: f64,
    cap: i64,
}

impl FactAggregator {
    pub fn new(db: DBService, config: &PipelineConfig) -> Self {
        FactAggregator {
            db,
            epsilon: config.fact_conflict_epsilon,
            cap: config.fact_aggregate_cap,
        }
    }

    pub async fn aggregate(&self, artifact_ids: &[Uuid]) -> Result<Vec<FactOutcome>, sqlx::Error> {
        let mut by_key: HashMap<(String, String), Vec<Fact>> = HashMap::new();
        for &artifact_id in artifact_ids {
            let facts = Fact::find_by_artifact(&self.db.pool, artifact_id).await?;
            for fact in facts {
                let canonical_key = (fact.fact_type.clone(), normalize_key(&fact.key));
                by_key.entry(canonical_key).or_default().push(fact);
            }
        }

        let mut outcomes: Vec<FactOutcome> = by_key
            .into_iter()
            .map(|((fact_type, key), facts)| reconcile(fact_type, key, facts, self.epsilon))
            .collect();

        outcomes.sort_by(|a, b| {
            b.severity_rank()
                .cmp(&a.severity_rank())
                .then(b.participant_count().cmp(&a.participant_count()))
        });
        outcomes.truncate(self.cap as usize);
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn fact(fact_type: &str, key: &str, value: &str, numeric: Option<f64>, confidence: f64) -> Fact {
        Fact {
            id: Uuid::new_v4(),
            artifact_id: Uuid::new_v4(),
            fact_type: fact_type.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            normalized_numeric: numeric,
            normalized_date: None,
            normalized_bool: None,
            confidence,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn numeric_within_epsilon_is_consensus() {
        let facts = vec![
            fact("amount", "Team Size", "50", Some(50.0), 0.9),
            fact("amount", "Team Size", "50", Some(50.0), 0.8),
        ];
        let outcome = reconcile("amount".to_string(), "team size".to_string(), facts, 0.01);
        assert!(matches!(outcome, FactOutcome::Consensus { .. }));
    }

    #[test]
    fn numeric_outside_epsilon_is_conflict() {
        let facts = vec![
            fact("amount", "Team Size", "50", Some(50.0), 0.9),
            fact("amount", "Team Size", "45", Some(45.0), 0.8),
        ];
        let outcome = reconcile("amount".to_string(), "team size".to_string(), facts, 0.01);
        assert!(matches!(outcome, FactOutcome::Conflict { severity: ConflictSeverity::Amount, .. }));
    }

    #[test]
    fn three_matching_amounts_yield_single_consensus() {
        let facts = vec![
            fact("amount", "Team Size", "50", Some(50.0), 0.9),
            fact("amount", "Team Size", "50", Some(50.0), 0.7),
            fact("amount", "Team Size", "50", Some(50.0), 0.95),
        ];
        let outcome = reconcile("amount".to_string(), "team size".to_string(), facts, 0.01);
        match outcome {
            FactOutcome::Consensus { confidence, supporting_artifact_ids, .. } => {
                assert_eq!(supporting_artifact_ids.len(), 3);
                assert!((confidence - 0.95).abs() < 1e-9);
            }
            _ => panic!("expected consensus"),
        }
    }

    #[test]
    fn string_facts_with_one_distinct_value_are_consensus() {
        let facts = vec![
            fact("commitment", "Delivery", "Friday", None, 0.8),
            fact("commitment", "Delivery", "friday", None, 0.6),
        ];
        let outcome = reconcile("commitment".to_string(), "delivery".to_string(), facts, 0.01);
        assert!(matches!(outcome, FactOutcome::Consensus { .. }));
    }
}

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use db::DBService;
use db::models::artifact::{Artifact, ArtifactStatus};
use db::models::artifact_summary::{ArtifactSummary, NewArtifactSummary};
use db::models::cost_usage_record::{CostUsageRecord, NewCostUsageRecord};
use db::models::embedding::Embedding;
use db::models::fact::{Fact, NewFact};
use db::models::insight::{Insight, NewInsight};
use db::models::person_mention::{NewPersonMention, PersonMention};
use db::models::program_settings::ProgramSettings;
use db::models::topic::{NewTopic, Topic};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;
use utils::tokens::truncate_to_token_budget;

use crate::config::PipelineConfig;
use crate::services::context_builder::{ContextBuilder, ContextPacket};
use crate::services::context_cache::ContextCache;
use crate::services::embedding::Embed;
use crate::services::entity_graph::EntityGraph;
use crate::services::events::{ArtifactAnalyzed, EventService};
use crate::services::llm::{complete_with_retry, Completion, ContextBlock, LlmError, Usage};
use crate::services::rate_limiter::LlmRateLimiter;
use crate::services::text_extraction::{ExtractionError, TextExtraction};

const ALLOWED_SENTIMENTS: [&str; 4] = ["positive", "neutral", "concern", "negative"];
const ALLOWED_SEVERITIES: [&str; 4] = ["low", "medium", "high", "critical"];
const ALLOWED_FACT_TYPES: [&str; 5] = ["date", "amount", "metric", "commitment", "deadline"];
const ALLOWED_INSIGHT_TYPES: [&str; 5] = ["risk", "opportunity", "action", "anomaly", "decision"];

#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("artifact {0} not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

#[derive(Debug, Deserialize)]
struct LlmAnalysis {
    summary: String,
    #[serde(default = "default_sentiment")]
    sentiment: String,
    #[serde(default)]
    priority: i32,
    #[serde(default = "default_confidence")]
    confidence: f64,
    #[serde(default)]
    persons: Vec<LlmPerson>,
    #[serde(default)]
    facts: Vec<LlmFact>,
    #[serde(default)]
    topics: Vec<LlmTopic>,
    #[serde(default)]
    insights: Vec<LlmInsight>,
}

fn default_sentiment() -> String {
    "neutral".to_string()
}
fn default_confidence() -> f64 {
    0.5
}

#[derive(Debug, Deserialize)]
struct LlmPerson {
    name: String,
    role: Option<String>,
    organization: Option<String>,
    #[serde(default = "one")]
    mention_count: i32,
    #[serde(default = "default_confidence")]
    confidence: f64,
}

fn one() -> i32 {
    1
}

#[derive(Debug, Deserialize)]
struct LlmFact {
    fact_type: String,
    key: String,
    value: String,
    #[serde(default)]
    normalized_numeric: Option<f64>,
    #[serde(default)]
    normalized_date: Option<chrono::NaiveDate>,
    #[serde(default)]
    normalized_bool: Option<bool>,
    #[serde(default = "default_confidence")]
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct LlmTopic {
    name: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct LlmInsight {
    insight_type: String,
    title: String,
    description: String,
    severity: Option<String>,
    #[serde(default = "default_confidence")]
    confidence: f64,
}

#[derive(Debug, Error)]
enum ValidationError {
    #[error("missing or empty summary")]
    EmptySummary,
    #[error("confidence {0} out of [0,1] range")]
    ConfidenceOutOfRange(f64),
    #[error("unknown sentiment: {0}")]
    UnknownSentiment(String),
    #[error("unknown severity: {0}")]
    UnknownSeverity(String),
    #[error("unknown fact_type: {0}")]
    UnknownFactType(String),
    #[error("unknown insight_type: {0}")]
    UnknownInsightType(String),
    #[error("priority {0} out of [1,5] range")]
    PriorityOutOfRange(i32),
}

fn validate(analysis: &LlmAnalysis) -> Result<(), ValidationError> {
    if analysis.summary.trim().is_empty() {
        return Err(ValidationError::EmptySummary);
    }
    if !(0.0..=1.0).contains(&analysis.confidence) {
        return Err(ValidationError::ConfidenceOutOfRange(analysis.confidence));
    }
    if !ALLOWED_SENTIMENTS.contains(&analysis.sentiment.as_str()) {
        return Err(ValidationError::UnknownSentiment(analysis.sentiment.clone()));
    }
    if !(1..=5).contains(&analysis.priority) {
        return Err(ValidationError::PriorityOutOfRange(analysis.priority));
    }
    for p in &analysis.persons {
        if !(0.0..=1.0).contains(&p.confidence) {
            return Err(ValidationError::ConfidenceOutOfRange(p.confidence));
        }
    }
    for f in &analysis.facts {
        if !(0.0..=1.0).contains(&f.confidence) {
            return Err(ValidationError::ConfidenceOutOfRange(f.confidence));
        }
        if !ALLOWED_FACT_TYPES.contains(&f.fact_type.as_str()) {
            return Err(ValidationError::UnknownFactType(f.fact_type.clone()));
        }
    }
    for t in &analysis.topics {
        if !(0.0..=1.0).contains(&t.confidence) {
            return Err(ValidationError::ConfidenceOutOfRange(t.confidence));
        }
    }
    for i in &analysis.insights {
        if !(0.0..=1.0).contains(&i.confidence) {
            return Err(ValidationError::ConfidenceOutOfRange(i.confidence));
        }
        if !ALLOWED_INSIGHT_TYPES.contains(&i.insight_type.as_str()) {
            return Err(ValidationError::UnknownInsightType(i.insight_type.clone()));
        }
        if let Some(sev) = &i.severity {
            if !ALLOWED_SEVERITIES.contains(&sev.as_str()) {
                return Err(ValidationError::UnknownSeverity(sev.clone()));
            }
        }
    }
    Ok(())
}

/// Strips a leading/trailing markdown code fence (```json ... ``` or ``` ... ```)
/// that LLMs commonly wrap JSON responses in (§4.H step 6).
fn strip_markdown_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(stripped) = trimmed.strip_prefix("```") {
        let stripped = stripped.strip_prefix("json").unwrap_or(stripped);
        let stripped = stripped.trim_start_matches(['\n', '\r']);
        if let Some(end) = stripped.rfind("```") {
            return stripped[..end].trim();
        }
        return stripped.trim();
    }
    trimmed
}

const SYSTEM_PROMPT: &str = "You extract structured knowledge from a single uploaded document. \
Respond with a single JSON object: summary (string, required), sentiment (one of positive/neutral/concern/negative), \
priority (integer, 1-5), confidence (0-1), persons[], facts[] (type one of date/amount/metric/commitment/deadline), \
topics[], insights[] (insight_type one of risk/opportunity/action/anomaly/decision). No prose outside the JSON object.";

/// Drives one artifact end-to-end through the state machine (§4.H).
#[derive(Clone)]
pub struct Analyzer {
    db: DBService,
    context_builder: ContextBuilder,
    cache: ContextCache,
    entity_graph: EntityGraph,
    events: EventService,
    rate_limiter: Arc<LlmRateLimiter>,
    completion: Arc<dyn Completion>,
    extraction: Arc<dyn TextExtraction>,
    embedder: Arc<dyn Embed>,
    config: PipelineConfig,
}

impl Analyzer {
    pub fn new(
        db: DBService,
        context_builder: ContextBuilder,
        cache: ContextCache,
        entity_graph: EntityGraph,
        events: EventService,
        rate_limiter: Arc<LlmRateLimiter>,
        completion: Arc<dyn Completion>,
        extraction: Arc<dyn TextExtraction>,
        embedder: Arc<dyn Embed>,
        config: PipelineConfig,
    ) -> Self {
        Analyzer { db, context_builder, cache, entity_graph, events, rate_limiter, completion, extraction, embedder, config }
    }

    /// `AnalyzeArtifact(programID, artifactID, force?)` (§6).
    pub async fn analyze(
        &self,
        program_id: Uuid,
        artifact_id: Uuid,
        force: bool,
    ) -> Result<Artifact, AnalyzerError> {
        let Some(artifact) = Artifact::find_by_id(&self.db.pool, artifact_id).await? else {
            return Err(AnalyzerError::NotFound(artifact_id));
        };

        if !force && artifact.status() == ArtifactStatus::Completed {
            return Ok(artifact);
        }

        // Step 1: transition pending -> processing, atomically (§4.H step 1,
        // §8 property 2). Try every status that may legally lead here; the
        // first CAS to land wins the race, everyone else observes the
        // resulting status and returns without doing any work.
        let mut transitioned = Artifact::cas_status(&self.db.pool, artifact_id, ArtifactStatus::Pending, ArtifactStatus::Processing).await?;
        if transitioned.is_none() && force && artifact.status().reanalyzable() {
            transitioned = Artifact::cas_status(&self.db.pool, artifact_id, artifact.status(), ArtifactStatus::Processing).await?;
        }

        let Some(artifact) = transitioned else {
            tracing::debug!(target: "context_graph::analyzer", %artifact_id, "lost the race for processing, returning current status");
            return Ok(Artifact::find_by_id(&self.db.pool, artifact_id).await?.unwrap_or(artifact));
        };

        let start = Instant::now();
        match self.run_pipeline(program_id, &artifact).await {
            Ok(completed) => Ok(completed),
            Err(reason) => {
                tracing::warn!(target: "context_graph::analyzer", %artifact_id, %reason, "analysis failed");
                let failed = Artifact::force_status(&self.db.pool, artifact_id, ArtifactStatus::Failed, Some(&reason))
                    .await?
                    .unwrap_or(artifact);
                self.publish_event(program_id, artifact_id, "failed", None, None, None, start.elapsed().as_millis() as i64);
                Ok(failed)
            }
        }
    }

    /// Steps 2-8 of §4.H; any `Err` here is surfaced by the caller as `failed`.
    async fn run_pipeline(&self, program_id: Uuid, artifact: &Artifact) -> Result<Artifact, String> {
        let artifact_id = artifact.id;
        let start = Instant::now();

        // Step 2: text extraction fallback.
        let raw_text = match &artifact.raw_text {
            Some(text) if !text.is_empty() => text.clone(),
            _ => match self.extraction.extract(&artifact.mime_type, artifact_id).await {
                Ok(text) => {
                    Artifact::set_raw_text(&self.db.pool, artifact_id, &text)
                        .await
                        .map_err(|e| e.to_string())?;
                    text
                }
                Err(ExtractionError::OcrRequired) => {
                    Artifact::force_status(&self.db.pool, artifact_id, ArtifactStatus::OcrRequired, Some("binary requires OCR"))
                        .await
                        .map_err(|e| e.to_string())?;
                    return Artifact::find_by_id(&self.db.pool, artifact_id)
                        .await
                        .map_err(|e| e.to_string())?
                        .ok_or_else(|| "artifact vanished after ocr_required transition".to_string());
                }
                Err(ExtractionError::Failed(reason)) => return Err(format!("text extraction failed: {reason}")),
            },
        };

        // Step 3: context packet, degrading to empty on any failure or when
        // the program has opted out (§9 design note).
        let enriched_enabled = ProgramSettings::enriched_context_enabled(&self.db.pool, program_id)
            .await
            .unwrap_or(true);
        let packet = if !enriched_enabled {
            ContextPacket::default()
        } else {
            match self.context_builder.build(program_id, artifact_id).await {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(target: "context_graph::analyzer", %artifact_id, error = %e, "context build failed, proceeding with empty packet");
                    ContextPacket::default()
                }
            }
        };

        // Step 4: compose the prompt.
        let program_context_block = ContextBlock {
            text: format!("Program: {program_id}\nArtifact: {}\nCategory: {:?}", artifact.filename, artifact.category),
            cache_hint: true,
        };
        let packet_text = serde_json::to_string(&packet).unwrap_or_else(|_| "{}".to_string());
        let packet_block = ContextBlock { text: packet_text, cache_hint: false };
        let capped_text = truncate_to_token_budget(&raw_text, self.config.raw_text_token_cap as i32);

        // Step 5: call the LLM, rate-limited and retried.
        let _permit = self
            .rate_limiter
            .acquire(&self.config.llm_model)
            .await
            .map_err(|e| e.to_string())?;

        let completion = complete_with_retry(
            self.completion.as_ref(),
            SYSTEM_PROMPT,
            &[program_context_block, packet_block],
            &capped_text,
            4096,
            0.0,
            self.config.llm_max_retries,
        )
        .await
        .map_err(|e| match e {
            LlmError::Transient(msg) => format!("LLM call failed after retries: {msg}"),
            LlmError::NonRetriable(msg) => format!("LLM call failed: {msg}"),
        })?;

        // Step 6: parse and validate.
        let json_text = strip_markdown_fence(&completion.text);
        let analysis: LlmAnalysis =
            serde_json::from_str(json_text).map_err(|e| format!("invalid LLM JSON response: {e}"))?;
        validate(&analysis).map_err(|e| format!("validation error: {e}"))?;

        // Semantic signal (§4.F, weight 0.40): compute once per analysis so
        // later context builds for other pivots can find this artifact's
        // embedding. Absence is tolerated (§6 Embed contract) — a failure
        // here degrades the semantic signal to "no signal", it never fails
        // the analysis.
        let embedding_vector = match self.embedder.embed(&capped_text).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                tracing::warn!(target: "context_graph::analyzer", %artifact_id, error = %e, "embedding unavailable, semantic signal will degrade to absent");
                None
            }
        };

        // Step 7: full-replace persistence in one transaction.
        let mut tx = self.db.pool.begin().await.map_err(|e| e.to_string())?;

        ArtifactSummary::upsert(
            &mut *tx,
            artifact_id,
            NewArtifactSummary {
                summary_text: analysis.summary.clone(),
                sentiment: analysis.sentiment.clone(),
                priority: analysis.priority,
                confidence: analysis.confidence,
            },
        )
        .await
        .map_err(|e| e.to_string())?;

        PersonMention::delete_by_artifact(&mut *tx, artifact_id).await.map_err(|e| e.to_string())?;
        for p in &analysis.persons {
            PersonMention::insert(
                &mut *tx,
                Uuid::new_v4(),
                artifact_id,
                NewPersonMention {
                    name: p.name.clone(),
                    role: p.role.clone(),
                    organization: p.organization.clone(),
                    mention_count: p.mention_count,
                    confidence: p.confidence,
                },
            )
            .await
            .map_err(|e| e.to_string())?;
        }

        Fact::delete_by_artifact(&mut *tx, artifact_id).await.map_err(|e| e.to_string())?;
        for f in &analysis.facts {
            Fact::insert(
                &mut *tx,
                Uuid::new_v4(),
                artifact_id,
                NewFact {
                    fact_type: f.fact_type.clone(),
                    key: f.key.clone(),
                    value: f.value.clone(),
                    normalized_numeric: f.normalized_numeric,
                    normalized_date: f.normalized_date,
                    normalized_bool: f.normalized_bool,
                    confidence: f.confidence,
                },
            )
            .await
            .map_err(|e| e.to_string())?;
        }

        Topic::delete_by_artifact(&mut *tx, artifact_id).await.map_err(|e| e.to_string())?;
        for t in &analysis.topics {
            Topic::insert(
                &mut *tx,
                Uuid::new_v4(),
                artifact_id,
                NewTopic { name: t.name.clone(), confidence: t.confidence, parent_topic_id: None },
            )
            .await
            .map_err(|e| e.to_string())?;
        }

        Insight::delete_by_artifact(&mut *tx, artifact_id).await.map_err(|e| e.to_string())?;
        for i in &analysis.insights {
            Insight::insert(
                &mut *tx,
                Uuid::new_v4(),
                artifact_id,
                NewInsight {
                    insight_type: i.insight_type.clone(),
                    title: i.title.clone(),
                    description: i.description.clone(),
                    severity: i.severity.clone(),
                    confidence: i.confidence,
                },
            )
            .await
            .map_err(|e| e.to_string())?;
        }

        if let Some(vector) = embedding_vector {
            Embedding::upsert(&mut *tx, artifact_id, vector).await.map_err(|e| e.to_string())?;
        }

        let cost_usd = estimate_cost_usd(&completion.model, &completion.usage);
        let duration_ms = start.elapsed().as_millis() as i64;
        CostUsageRecord::insert(
            &mut *tx,
            Uuid::new_v4(),
            artifact_id,
            NewCostUsageRecord {
                program_id,
                model: completion.model.clone(),
                input_tokens: completion.usage.input_tokens,
                output_tokens: completion.usage.output_tokens,
                cached_tokens: completion.usage.cached_tokens,
                cost_usd,
                duration_ms,
            },
        )
        .await
        .map_err(|e| e.to_string())?;

        tx.commit().await.map_err(|e| e.to_string())?;

        // Step 8: transition processing -> completed.
        let completed = Artifact::cas_status(&self.db.pool, artifact_id, ArtifactStatus::Processing, ArtifactStatus::Completed)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| "lost the processing->completed CAS unexpectedly".to_string())?;

        // Step 9: fire-and-forget side effects. None of these can fail the
        // analysis; a failure here is logged and otherwise ignored.
        self.cache.invalidate_cascade(program_id, artifact_id).await;
        if let Err(e) = self.entity_graph.ingest(program_id, artifact_id).await {
            tracing::warn!(target: "context_graph::analyzer", %artifact_id, error = %e, "entity graph ingest failed");
        }
        self.publish_event(
            program_id,
            artifact_id,
            "completed",
            Some(completion.model),
            Some(completion.usage),
            Some(cost_usd),
            duration_ms,
        );

        Ok(completed)
    }

    fn publish_event(
        &self,
        program_id: Uuid,
        artifact_id: Uuid,
        status: &str,
        ai_model: Option<String>,
        usage: Option<Usage>,
        cost_usd: Option<f64>,
        duration_ms: i64,
    ) {
        self.events.publish(ArtifactAnalyzed {
            event_id: Uuid::new_v4(),
            program_id,
            artifact_id,
            status: status.to_string(),
            ai_model,
            usage,
            cost_usd,
            duration_ms,
            timestamp: Utc::now(),
        });
    }
}

/// Placeholder per-model pricing; a real deployment would look this up from
/// a rate table keyed by model name. Kept deliberately simple since cost
/// accuracy isn't part of the testable properties.
fn estimate_cost_usd(_model: &str, usage: &Usage) -> f64 {
    let input_cost = usage.input_tokens as f64 * 0.000_005;
    let output_cost = usage.output_tokens as f64 * 0.000_015;
    input_cost + output_cost
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_code_fence() {
        let wrapped = "```json\n{\"summary\": \"hi\"}\n```";
        assert_eq!(strip_markdown_fence(wrapped), "{\"summary\": \"hi\"}");
    }

    #[test]
    fn passes_through_unwrapped_json() {
        let plain = "{\"summary\": \"hi\"}";
        assert_eq!(strip_markdown_fence(plain), plain);
    }

    #[test]
    fn validate_rejects_empty_summary() {
        let analysis = LlmAnalysis {
            summary: "   ".to_string(),
            sentiment: "neutral".to_string(),
            priority: 0,
            confidence: 0.5,
            persons: vec![],
            facts: vec![],
            topics: vec![],
            insights: vec![],
        };
        assert!(matches!(validate(&analysis), Err(ValidationError::EmptySummary)));
    }

    #[test]
    fn validate_rejects_unknown_sentiment() {
        let analysis = LlmAnalysis {
            summary: "ok".to_string(),
            sentiment: "ecstatic".to_string(),
            priority: 0,
            confidence: 0.5,
            persons: vec![],
            facts: vec![],
            topics: vec![],
            insights: vec![],
        };
        assert!(matches!(validate(&analysis), Err(ValidationError::UnknownSentiment(_))));
    }

    #[test]
    fn validate_rejects_out_of_range_confidence() {
        let analysis = LlmAnalysis {
            summary: "ok".to_string(),
            sentiment: "neutral".to_string(),
            priority: 0,
            confidence: 1.5,
            persons: vec![],
            facts: vec![],
            topics: vec![],
            insights: vec![],
        };
        assert!(matches!(validate(&analysis), Err(ValidationError::ConfidenceOutOfRange(_))));
    }

    #[test]
    fn validate_rejects_priority_out_of_range() {
        let analysis = LlmAnalysis {
            summary: "ok".to_string(),
            sentiment: "neutral".to_string(),
            priority: 0,
            confidence: 0.5,
            persons: vec![],
            facts: vec![],
            topics: vec![],
            insights: vec![],
        };
        assert!(matches!(validate(&analysis), Err(ValidationError::PriorityOutOfRange(0))));
    }

    #[test]
    fn validate_rejects_unknown_insight_type() {
        let analysis = LlmAnalysis {
            summary: "ok".to_string(),
            sentiment: "neutral".to_string(),
            priority: 3,
            confidence: 0.5,
            persons: vec![],
            facts: vec![],
            topics: vec![],
            insights: vec![LlmInsight {
                insight_type: "surprise".to_string(),
                title: "t".to_string(),
                description: "d".to_string(),
                severity: None,
                confidence: 0.5,
            }],
        };
        assert!(matches!(validate(&analysis), Err(ValidationError::UnknownInsightType(_))));
    }

    #[test]
    fn validate_accepts_well_formed_analysis() {
        let analysis = LlmAnalysis {
            summary: "A clear summary.".to_string(),
            sentiment: "positive".to_string(),
            priority: 1,
            confidence: 0.9,
            persons: vec![LlmPerson {
                name: "Alice".to_string(),
                role: None,
                organization: None,
                mention_count: 1,
                confidence: 0.8,
            }],
            facts: vec![LlmFact {
                fact_type: "amount".to_string(),
                key: "Team Size".to_string(),
                value: "50".to_string(),
                normalized_numeric: Some(50.0),
                normalized_date: None,
                normalized_bool: None,
                confidence: 0.9,
            }],
            topics: vec![],
            insights: vec![],
        };
        assert!(validate(&analysis).is_ok());
    }
}

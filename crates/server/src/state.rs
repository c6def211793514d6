use std::sync::Arc;

use db::DBService;
use services::PipelineConfig;
use services::services::analyzer::Analyzer;
use services::services::artifact_store::ArtifactStore;
use services::services::context_builder::ContextBuilder;
use services::services::context_cache::ContextCache;
use services::services::embedding::{Embed, HttpEmbeddingClient};
use services::services::entity_graph::EntityGraph;
use services::services::events::EventService;
use services::services::fact_aggregator::FactAggregator;
use services::services::llm::{Completion, HttpCompletionClient};
use services::services::rate_limiter::LlmRateLimiter;
use services::services::temporal_organizer::TemporalOrganizer;
use services::services::text_extraction::TextExtraction;

/// Shared application state (the teacher's `DeploymentImpl`, scoped down to
/// what this pipeline needs). Every route handler gets one of these cloned
/// into it by axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub db: DBService,
    pub artifacts: ArtifactStore,
    pub entity_graph: EntityGraph,
    pub events: EventService,
    pub context_builder: ContextBuilder,
    pub cache: ContextCache,
    pub analyzer: Analyzer,
}

impl AppState {
    pub fn build(
        db: DBService,
        config: PipelineConfig,
        completion: Arc<dyn Completion>,
        extraction: Arc<dyn TextExtraction>,
        embedder: Arc<dyn Embed>,
    ) -> Self {
        let artifacts = ArtifactStore::new(db.clone());
        let cache = ContextCache::new(db.clone(), &config);
        let entity_graph = EntityGraph::new(db.clone());
        let temporal = TemporalOrganizer::new(db.clone(), &config);
        let facts = FactAggregator::new(db.clone(), &config);
        let context_builder = ContextBuilder::new(
            artifacts.clone(),
            cache.clone(),
            entity_graph.clone(),
            temporal,
            facts,
            config.clone(),
        );
        let events = EventService::new(256);
        let rate_limiter = Arc::new(LlmRateLimiter::new(config.llm_concurrency_limit, config.llm_rate_limit_per_minute));

        let analyzer = Analyzer::new(
            db.clone(),
            context_builder.clone(),
            cache.clone(),
            entity_graph.clone(),
            events.clone(),
            rate_limiter,
            completion,
            extraction,
            embedder,
            config,
        );

        AppState { db, artifacts, entity_graph, events, context_builder, cache, analyzer }
    }
}

/// Wires a real HTTP-backed `Completion` client from the environment, the
/// way the teacher's executors read their credentials at startup.
pub fn completion_client_from_env(config: &PipelineConfig) -> Arc<dyn Completion> {
    let endpoint = std::env::var("LLM_ENDPOINT")
        .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string());
    let api_key = std::env::var("LLM_API_KEY").unwrap_or_default();
    Arc::new(HttpCompletionClient::new(endpoint, api_key, config.llm_model.clone()))
}

/// Wires a real HTTP-backed `Embed` client from the environment, the same
/// way as `completion_client_from_env`. Used to populate the semantic
/// signal (§4.F) on every analysis.
pub fn embedding_client_from_env(config: &PipelineConfig) -> Arc<dyn Embed> {
    let endpoint = std::env::var("EMBEDDING_ENDPOINT")
        .unwrap_or_else(|_| "https://api.openai.com/v1/embeddings".to_string());
    let api_key = std::env::var("EMBEDDING_API_KEY").unwrap_or_default();
    let model = std::env::var("EMBEDDING_MODEL").unwrap_or_else(|_| "text-embedding-3-small".to_string());
    Arc::new(HttpEmbeddingClient::new(endpoint, api_key, model, config.embedding_dims))
}

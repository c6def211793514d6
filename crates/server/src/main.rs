mod error;
mod routes;
mod state;

use std::sync::Arc;

use db::DBService;
use services::PipelineConfig;
use services::services::text_extraction::UnconfiguredExtraction;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let config = PipelineConfig::from_env()?;
    let db = DBService::new().await?;

    let completion = state::completion_client_from_env(&config);
    let extraction = Arc::new(UnconfiguredExtraction);
    let embedder = state::embedding_client_from_env(&config);
    let app_state = AppState::build(db.clone(), config.clone(), completion, extraction, embedder);

    let janitor_handle = services::services::janitor::JanitorService::spawn(
        db.clone(),
        config.janitor_poll_interval,
        chrono::Duration::from_std(config.stuck_processing_timeout)
            .unwrap_or_else(|_| chrono::Duration::minutes(10)),
    );

    let app = routes::router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8787").await?;
    tracing::info!(target: "context_graph::server", "listening on 0.0.0.0:8787");

    let server = axum::serve(listener, app.into_make_service());

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!(target: "context_graph::server", error = %e, "server exited with error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(target: "context_graph::server", "shutdown signal received");
        }
    }

    janitor_handle.abort();
    Ok(())
}

use axum::extract::{Path, Query, State};
use axum::response::Json as ResponseJson;
use axum::routing::{get, post};
use axum::{Json, Router};
use db::models::artifact::{Artifact, CreateArtifact};
use serde::Deserialize;
use services::services::context_builder::ContextPacket;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/programs/{program_id}/artifacts", post(create_artifact))
        .route("/programs/{program_id}/artifacts/{artifact_id}", get(get_artifact))
        .route("/programs/{program_id}/artifacts/{artifact_id}/analyze", post(analyze_artifact))
        .route("/programs/{program_id}/artifacts/{artifact_id}/context", get(get_context))
}

#[derive(Debug, Deserialize)]
pub struct CreateArtifactBody {
    pub filename: String,
    pub content_hash: String,
    pub byte_size: i64,
    pub mime_type: String,
    pub category: Option<String>,
    pub subcategory: Option<String>,
}

/// `Ingest` (§6): registers a new artifact in `pending` state. Analysis is
/// triggered separately via `POST .../analyze` rather than inline here, so
/// upload latency isn't coupled to LLM latency.
///
/// A re-upload with a content hash matching an existing completed artifact
/// supersedes it (§3, §8 S6): the prior artifact is soft-deleted and points
/// `superseded_by_id` at the new row, and any cache entries that referenced
/// it are invalidated, rather than letting the two rows collide on
/// `uq_artifacts_program_hash_completed` once the new upload is analyzed.
pub async fn create_artifact(
    State(state): State<AppState>,
    Path(program_id): Path<Uuid>,
    Json(body): Json<CreateArtifactBody>,
) -> Result<ResponseJson<ApiResponse<Artifact>>, ApiError> {
    let prior = Artifact::find_by_content_hash(&state.db.pool, program_id, &body.content_hash).await?;

    let artifact_id = Uuid::new_v4();
    let artifact = Artifact::create(
        &state.db.pool,
        artifact_id,
        CreateArtifact {
            program_id,
            filename: body.filename,
            content_hash: body.content_hash,
            byte_size: body.byte_size,
            mime_type: body.mime_type,
            category: body.category,
            subcategory: body.subcategory,
        },
    )
    .await?;

    if let Some(prior) = prior {
        Artifact::set_superseded_by(&state.db.pool, prior.id, artifact_id).await?;
        Artifact::soft_delete(&state.db.pool, prior.id).await?;
        state.cache.invalidate_cascade(program_id, prior.id).await;
    }

    Ok(ResponseJson(ApiResponse::success(artifact)))
}

pub async fn get_artifact(
    State(state): State<AppState>,
    Path((_program_id, artifact_id)): Path<(Uuid, Uuid)>,
) -> Result<ResponseJson<ApiResponse<Artifact>>, ApiError> {
    let artifact = state.artifacts.get_artifact(artifact_id).await?.ok_or(ApiError::NotFound)?;
    Ok(ResponseJson(ApiResponse::success(artifact)))
}

#[derive(Debug, Deserialize, Default)]
pub struct AnalyzeQuery {
    #[serde(default)]
    pub force: bool,
}

/// `AnalyzeArtifact(programID, artifactID, force?)` (§6).
pub async fn analyze_artifact(
    State(state): State<AppState>,
    Path((program_id, artifact_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<AnalyzeQuery>,
) -> Result<ResponseJson<ApiResponse<Artifact>>, ApiError> {
    let artifact = state.analyzer.analyze(program_id, artifact_id, query.force).await?;
    Ok(ResponseJson(ApiResponse::success(artifact)))
}

/// Builds (or serves from cache) the ContextPacket that would be handed to
/// the LLM for this pivot, without running analysis — useful for debugging
/// candidate selection and budget enforcement.
pub async fn get_context(
    State(state): State<AppState>,
    Path((program_id, artifact_id)): Path<(Uuid, Uuid)>,
) -> Result<ResponseJson<ApiResponse<ContextPacket>>, ApiError> {
    let packet = state.context_builder.build(program_id, artifact_id).await?;
    Ok(ResponseJson(ApiResponse::success(packet)))
}

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use services::services::analyzer::AnalyzerError;
use services::services::context_builder::ContextBuilderError;
use thiserror::Error;

/// Top-level error type for route handlers, mapped to an HTTP status the
/// way the teacher's routes convert domain errors at the boundary.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,
    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),
    #[error(transparent)]
    ContextBuilder(#[from] ContextBuilderError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Analyzer(AnalyzerError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::ContextBuilder(ContextBuilderError::PivotNotFound(_)) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(target: "context_graph::server", error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

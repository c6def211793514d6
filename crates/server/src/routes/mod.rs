use axum::Router;
use axum::routing::get;

use crate::state::AppState;

pub mod artifacts;
pub mod health;

pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health::health_check))
        .merge(artifacts::router())
        .with_state(state);

    Router::new().nest("/api", api_routes)
}

pub mod agents;
pub mod files;
pub mod runs;
pub mod sse;
pub mod ws;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/:channel_id", get(ws::channel_ws))
        .route("/sse/:channel_id", get(sse::channel_sse))
        .route("/agents", get(agents::list_agents))
        .route("/files", post(files::upload))
        .route("/files/:file_id", get(files::download))
        .route("/runs/:run_id", get(runs::get_run))
        .route("/runs/:run_id/cancel", post(runs::cancel_run))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

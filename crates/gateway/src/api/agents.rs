//! Agent config listing.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use relay_domain::agent::AgentMode;
use relay_stores::AgentStore;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AgentFilter {
    /// Optional mode filter: "local" or "assistant".
    pub mode: Option<AgentMode>,
}

/// GET /agents?mode=local
pub async fn list_agents(
    State(state): State<AppState>,
    Query(filter): Query<AgentFilter>,
) -> impl IntoResponse {
    match state.env.stores.agents.list(filter.mode).await {
        Ok(agents) => Json(agents).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

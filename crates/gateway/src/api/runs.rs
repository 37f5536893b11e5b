//! Run inspection and cancellation endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use uuid::Uuid;

use relay_stores::RunStore;

use crate::state::AppState;

/// GET /runs/{run_id}
pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> impl IntoResponse {
    match state.env.stores.runs.get(run_id).await {
        Ok(Some(run)) => Json(run).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "no such run").into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// POST /runs/{run_id}/cancel — sets the cooperative stop flag. The run
/// observes it before its next model request or tool dispatch.
pub async fn cancel_run(Path(run_id): Path<Uuid>) -> impl IntoResponse {
    if relay_runtime::registry().request_stop(run_id) {
        (StatusCode::ACCEPTED, "cancellation requested").into_response()
    } else {
        (StatusCode::NOT_FOUND, "no active run with that id").into_response()
    }
}

//! File upload and download endpoints backed by the data-source store.

use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;

use relay_domain::message::AttachmentKind;
use relay_stores::DataSourceStore;

use crate::state::AppState;

/// POST /files — multipart upload; returns the data source record.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().map(String::from);
        let content_type = field.content_type().map(String::from);
        let kind = match content_type.as_deref() {
            Some(ct) if ct.starts_with("image/") => AttachmentKind::Image,
            _ => AttachmentKind::File,
        };

        let bytes = match field.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(e) => {
                return (StatusCode::BAD_REQUEST, format!("upload read failed: {e}"))
                    .into_response()
            }
        };

        return match state
            .env
            .stores
            .data_sources
            .save_file(bytes, file_name, content_type, kind)
            .await
        {
            Ok(source) => (StatusCode::CREATED, Json(source)).into_response(),
            Err(e) => {
                tracing::warn!(error = %e, "file upload failed");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
            }
        };
    }
    (StatusCode::BAD_REQUEST, "missing 'file' field").into_response()
}

/// GET /files/{file_id} — the target of locally "presigned" URLs.
pub async fn download(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> impl IntoResponse {
    match state.env.stores.data_sources.get(&file_id).await {
        Ok(Some((source, bytes))) => {
            let content_type = source
                .content_type
                .unwrap_or_else(|| "application/octet-stream".into());
            ([(header::CONTENT_TYPE, content_type)], bytes).into_response()
        }
        Ok(None) => (StatusCode::NOT_FOUND, "no such file").into_response(),
        Err(e) => {
            tracing::warn!(error = %e, file_id, "file fetch failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

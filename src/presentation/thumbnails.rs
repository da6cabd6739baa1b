use super::api::AppState;
use crate::domain::{DomainError, ThumbnailState};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/thumbnails/stats", get(stats))
        .route("/thumbnails/cleanup", post(cleanup))
        .route("/thumbnails/generate/{id}", post(generate))
        .route("/thumbnails/preview/{id}", post(preview))
        .route("/thumbnails/{id}", get(serve_thumbnail))
}

/// ETag is `"<id>-<mtime>"`: a rescan after the file changes bumps the
/// modified stamp and busts client caches.
fn etag_for(id: i64, modified: f64) -> String {
    format!("\"{}-{}\"", id, modified as i64)
}

async fn serve_thumbnail(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Response, DomainError> {
    let engine = state.engine().await;
    let item = engine.get_item(id)?;

    let etag = etag_for(id, item.modified);
    if headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        == Some(etag.as_str())
    {
        return Ok((StatusCode::NOT_MODIFIED, [(header::ETAG, etag)]).into_response());
    }

    let data = match engine.thumbnails.get(&item.path)? {
        Some(data) => data,
        None => {
            // Generate on miss.
            match engine.thumbnails.generate(&item.path, "00:00:01", false).await {
                Ok(()) => {
                    engine.catalog.set_thumbnail_state(id, ThumbnailState::Ok)?;
                    engine
                        .thumbnails
                        .get(&item.path)?
                        .ok_or(DomainError::NotFound("Thumbnail"))?
                }
                Err(e) => {
                    engine.catalog.set_thumbnail_state(id, ThumbnailState::Failed)?;
                    return Err(e);
                }
            }
        }
    };

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/jpeg".to_string()),
            (header::CACHE_CONTROL, "public, max-age=3600".to_string()),
            (header::ETAG, etag),
        ],
        data,
    )
        .into_response())
}

#[derive(Deserialize)]
struct GenerateQuery {
    #[serde(default)]
    force: bool,
}

async fn generate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<GenerateQuery>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let item = engine.get_item(id)?;
    match engine.thumbnails.generate(&item.path, "00:00:01", query.force).await {
        Ok(()) => {
            engine.catalog.set_thumbnail_state(id, ThumbnailState::Ok)?;
            Ok(Json(json!({ "generated": true, "id": id })))
        }
        Err(e) => {
            engine.catalog.set_thumbnail_state(id, ThumbnailState::Failed)?;
            Err(e)
        }
    }
}

#[derive(Deserialize)]
struct PreviewQuery {
    /// Seconds into the video.
    #[serde(default = "default_preview_time")]
    time: i64,
}

fn default_preview_time() -> i64 {
    1
}

/// A one-off frame at the requested timestamp, never cached or stored.
async fn preview(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<PreviewQuery>,
) -> Result<Response, DomainError> {
    let engine = state.engine().await;
    let item = engine.get_item(id)?;
    let frame = crate::infrastructure::ffmpeg::extract_frame_seconds(
        std::path::Path::new(&item.path),
        query.time.max(0) as f64,
    )
    .await?
    .ok_or_else(|| DomainError::Dependency("Could not extract preview frame".to_string()))?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/jpeg".to_string()),
            (
                header::CACHE_CONTROL,
                "no-cache, no-store, must-revalidate".to_string(),
            ),
        ],
        frame,
    )
        .into_response())
}

async fn cleanup(State(state): State<AppState>) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let removed = engine.reconciler.cleanup_thumbnails()?;
    Ok(Json(json!({ "removed": removed })))
}

async fn stats(State(state): State<AppState>) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let (count, total_bytes) = engine.thumbnails.stats()?;
    Ok(Json(json!({
        "count": count,
        "total_bytes": total_bytes,
        "total_mb": total_bytes / (1024 * 1024),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etag_changes_when_the_file_changes() {
        let before = etag_for(7, 1_700_000_000.2);
        assert_eq!(before, "\"7-1700000000\"");
        let after = etag_for(7, 1_700_000_001.0);
        assert_ne!(before, after);
        // Same id and mtime: stable across requests.
        assert_eq!(before, etag_for(7, 1_700_000_000.9));
    }
}

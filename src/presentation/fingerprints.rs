use super::api::AppState;
use crate::application::fingerprint::DEFAULT_THRESHOLD;
use crate::domain::DomainError;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/videos/{id}/fingerprint",
            post(generate_fingerprint).delete(remove_fingerprint),
        )
        .route("/videos/{id}/check-duplicate", get(check_duplicate))
        .route("/videos/{id}/fingerprints", get(list_frames))
        .route("/videos/{id}/fingerprints/{fingerprint_id}", axum::routing::delete(delete_frame))
        .route("/videos/{id}/fingerprints/frames", post(add_frame))
        .route("/videos/{id}/fingerprints/from-image", post(add_frame_from_image))
        .route("/videos/{id}/fingerprints/extract-frames", get(extract_frames))
        .route("/fingerprints/find-all-duplicates", get(find_all_duplicates))
        .route("/fingerprints/stats", get(stats))
        .route("/fingerprints/stats/by-folder", get(stats_by_folder))
}

async fn generate_fingerprint(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let item = engine.get_item(id)?;
    let frames = engine.fingerprints.generate_and_store(&item).await?;
    Ok(Json(json!({ "id": id, "frames": frames })))
}

async fn remove_fingerprint(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    engine.get_item(id)?;
    let removed = engine.fingerprints.remove_fingerprints(id)?;
    Ok(Json(json!({ "id": id, "removed": removed })))
}

#[derive(Deserialize)]
struct ThresholdQuery {
    threshold: Option<u32>,
    folder: Option<String>,
}

async fn check_duplicate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<ThresholdQuery>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let item = engine.get_item(id)?;
    let matches = engine
        .fingerprints
        .check_duplicate(&item, query.threshold.unwrap_or(DEFAULT_THRESHOLD))
        .await?;
    Ok(Json(json!({
        "is_duplicate": !matches.is_empty(),
        "best_match": matches.first(),
        "matches": matches,
    })))
}

async fn find_all_duplicates(
    State(state): State<AppState>,
    Query(query): Query<ThresholdQuery>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let groups = engine.fingerprints.find_all_duplicates(
        query.threshold.unwrap_or(DEFAULT_THRESHOLD),
        query.folder.as_deref(),
    )?;
    let total: usize = groups.iter().map(|g| g.count).sum();
    Ok(Json(json!({
        "duplicate_groups": groups,
        "total_groups": groups.len(),
        "total_duplicates": total,
    })))
}

async fn stats(State(state): State<AppState>) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let (fingerprinted, total, frames) = engine.catalog.fingerprint_stats()?;
    Ok(Json(json!({
        "fingerprinted": fingerprinted,
        "total": total,
        "frames": frames,
        "coverage_percent": if total > 0 {
            (fingerprinted as f64 / total as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        },
    })))
}

async fn stats_by_folder(State(state): State<AppState>) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let rows = engine.catalog.fingerprint_stats_by_folder()?;
    Ok(Json(
        rows.into_iter()
            .map(|(folder, fingerprinted, total)| {
                json!({ "folder": folder, "fingerprinted": fingerprinted, "total": total })
            })
            .collect::<Vec<_>>(),
    ))
}

async fn list_frames(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    engine.get_item(id)?;
    Ok(Json(engine.catalog.fingerprints_for(id)?))
}

async fn delete_frame(
    State(state): State<AppState>,
    Path((id, fingerprint_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    if !engine.catalog.delete_fingerprint_frame(id, fingerprint_id)? {
        return Err(DomainError::NotFound("Fingerprint"));
    }
    // Losing the last frame clears the fingerprinted flag.
    if engine.catalog.fingerprints_for(id)?.is_empty() {
        engine.catalog.set_fingerprint_state(id, false)?;
    }
    Ok(Json(json!({ "message": "Fingerprint frame deleted" })))
}

#[derive(Deserialize)]
struct AddFrameRequest {
    /// Relative position in the video, 0..1.
    position: f64,
}

async fn add_frame(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<AddFrameRequest>,
) -> Result<impl IntoResponse, DomainError> {
    if !(0.0..=1.0).contains(&body.position) {
        return Err(DomainError::InvalidInput(
            "position must be between 0 and 1".to_string(),
        ));
    }
    let engine = state.engine().await;
    let item = engine.get_item(id)?;
    let phash = engine
        .fingerprints
        .single_frame_hash(&item, body.position)
        .await?
        .ok_or_else(|| DomainError::Dependency("Could not extract frame".to_string()))?;

    let position_percent = (body.position * 100.0).round() as i64;
    match engine.catalog.insert_fingerprint(id, position_percent, &phash)? {
        Some(frame) => {
            engine.catalog.set_fingerprint_state(id, true)?;
            Ok(Json(json!({ "added": true, "frame": frame })))
        }
        None => Ok(Json(json!({
            "added": false,
            "message": "A frame already exists near that position",
        }))),
    }
}

/// Build a frame from an uploaded still instead of extracting one; useful
/// for matching screenshots against the library.
async fn add_frame_from_image(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    mut multipart: axum::extract::Multipart,
) -> Result<impl IntoResponse, DomainError> {
    let mut image: Option<Vec<u8>> = None;
    let mut position: i64 = 50;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| DomainError::InvalidInput(format!("Bad multipart payload: {}", e)))?
    {
        match field.name().unwrap_or_default() {
            "image" | "file" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| DomainError::InvalidInput(format!("Bad upload: {}", e)))?;
                image = Some(bytes.to_vec());
            }
            "position" => {
                if let Ok(text) = field.text().await {
                    if let Ok(parsed) = text.parse::<i64>() {
                        position = parsed.clamp(0, 100);
                    }
                }
            }
            _ => {}
        }
    }
    let image = image.ok_or_else(|| DomainError::InvalidInput("No image uploaded".to_string()))?;

    let engine = state.engine().await;
    engine.get_item(id)?;
    let phash = engine.fingerprints.hash_image_bytes(&image)?;
    match engine.catalog.insert_fingerprint(id, position, &phash)? {
        Some(frame) => {
            engine.catalog.set_fingerprint_state(id, true)?;
            Ok(Json(json!({ "added": true, "frame": frame })))
        }
        None => Ok(Json(json!({
            "added": false,
            "message": "A frame already exists near that position",
        }))),
    }
}

#[derive(Deserialize)]
struct ExtractFramesQuery {
    /// Comma-separated relative positions, 0..1.
    positions: Option<String>,
}

async fn extract_frames(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<ExtractFramesQuery>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let item = engine.get_item(id)?;

    let positions: Vec<f64> = query
        .positions
        .as_deref()
        .map(|raw| {
            raw.split(',')
                .filter_map(|p| p.trim().parse().ok())
                .filter(|p| (0.0..=1.0).contains(p))
                .collect()
        })
        .unwrap_or_else(|| vec![0.05, 0.25, 0.5, 0.75, 0.95]);

    let mut frames = Vec::with_capacity(positions.len());
    for position in positions {
        let preview = engine.fingerprints.frame_preview(&item, position).await?;
        frames.push(json!({ "position": position, "image": preview }));
    }
    Ok(Json(json!({ "id": id, "frames": frames })))
}

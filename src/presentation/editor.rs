use super::api::AppState;
use crate::application::editor::{crop_rectangle, EditOperation, EditRequest, JobStatus};
use crate::domain::{DetectionMethod, DomainError};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/editor/process", post(process))
        .route("/editor/jobs", get(list_jobs))
        .route("/editor/jobs/{id}", get(get_job).delete(remove_job))
        .route("/editor/jobs/{id}/preserve-faces", post(preserve_faces))
        .route("/editor/jobs/{id}/copy-metadata", post(copy_metadata))
        .route("/editor/clear-completed", post(clear_completed))
}

async fn process(
    State(state): State<AppState>,
    Json(mut request): Json<EditRequest>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let item = engine.get_item(request.video_id)?;
    request.video_path = item.path.clone();

    // Crop presets need source dimensions; probe on demand when the catalog
    // has none yet.
    if matches!(request.operation, EditOperation::Crop | EditOperation::CutAndCrop)
        && request.crop_width.is_none()
    {
        if let Some(preset) = request.crop_preset.clone() {
            let (width, height) = match (item.width, item.height) {
                (Some(w), Some(h)) => (w, h),
                _ => {
                    let meta = crate::infrastructure::ffmpeg::probe_metadata(
                        std::path::Path::new(&item.path),
                    )
                    .await?
                    .ok_or_else(|| {
                        DomainError::Dependency("Could not determine source dimensions".to_string())
                    })?;
                    engine.catalog.update_technical(item.id, &meta)?;
                    (
                        meta.width.ok_or_else(|| {
                            DomainError::Dependency("Source has no width".to_string())
                        })?,
                        meta.height.ok_or_else(|| {
                            DomainError::Dependency("Source has no height".to_string())
                        })?,
                    )
                }
            };
            match crop_rectangle(&preset, width, height, request.crop_x, request.crop_y) {
                Some((w, h, x, y)) => {
                    request.crop_width = Some(w);
                    request.crop_height = Some(h);
                    request.crop_x = Some(x);
                    request.crop_y = Some(y);
                }
                None => {
                    return Err(DomainError::InvalidInput(format!(
                        "Unknown crop preset: {}",
                        preset
                    )))
                }
            }
        }
    }

    let job = engine.editor.create_job(request);
    Ok(Json(job))
}

async fn list_jobs(State(state): State<AppState>) -> impl IntoResponse {
    let engine = state.engine().await;
    Json(engine.editor.list_jobs())
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    engine
        .editor
        .get_job(id)
        .map(Json)
        .ok_or(DomainError::NotFound("Job"))
}

/// Import the finished output into the catalog and carry the source's face
/// links onto it.
async fn preserve_faces(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let job = engine.editor.get_job(id).ok_or(DomainError::NotFound("Job"))?;
    if job.status != JobStatus::Completed {
        return Err(DomainError::InvalidInput(
            "Job has not completed yet".to_string(),
        ));
    }

    let imported = engine.reconciler.scan_single_file(&job.output_path).await?;
    let copied =
        engine
            .catalog
            .copy_video_faces(job.video_id, imported.id, DetectionMethod::PreservedFromEdit)?;
    Ok(Json(json!({
        "imported_id": imported.id,
        "faces_copied": copied,
    })))
}

/// Import the finished output and copy the source's tags onto it.
async fn copy_metadata(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let job = engine.editor.get_job(id).ok_or(DomainError::NotFound("Job"))?;
    if job.status != JobStatus::Completed {
        return Err(DomainError::InvalidInput(
            "Job has not completed yet".to_string(),
        ));
    }

    let imported = engine.reconciler.scan_single_file(&job.output_path).await?;
    let tags_copied = engine.catalog.copy_tags(job.video_id, imported.id)?;
    Ok(Json(json!({
        "imported_id": imported.id,
        "tags_copied": tags_copied,
    })))
}

async fn remove_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    if !engine.editor.remove_job(id) {
        return Err(DomainError::NotFound("Job"));
    }
    Ok(Json(json!({ "message": "Job removed" })))
}

async fn clear_completed(State(state): State<AppState>) -> impl IntoResponse {
    let engine = state.engine().await;
    Json(json!({ "cleared": engine.editor.clear_completed() }))
}

use super::api::AppState;
use crate::application::faces::{generate_face_name, ApprovedDetection};
use crate::domain::{DetectionMethod, DomainError};
use axum::extract::{Multipart, Path, Query, State};
use axum::response::{IntoResponse, Json};
use axum::routing::{delete, get, post, put};
use axum::Router;
use serde::Deserialize;
use serde_json::json;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/faces/search", post(search_by_image).get(search_catalog))
        .route("/faces/create", post(create_face))
        .route("/faces/catalog", get(catalog))
        .route("/faces/merge", post(merge))
        .route("/faces/compare", post(compare))
        .route("/faces/group/similar", get(group_similar))
        .route("/faces/stats", get(stats))
        .route("/faces/cleanup-orphans", post(cleanup_orphans))
        .route("/faces/{id}", get(get_face).put(update_face).delete(delete_face))
        .route("/faces/{id}/add-encoding", post(add_encoding))
        .route("/faces/{id}/encodings", get(list_encodings))
        .route("/faces/{id}/encodings/{eid}", delete(delete_encoding))
        .route("/faces/{id}/cleanup/encodings", get(cleanup_encodings))
        .route("/faces/{id}/best-encoding", get(best_encoding))
        .route("/faces/{id}/duplicate-analysis", get(duplicate_analysis))
        .route("/faces/{id}/primary-encoding/{eid}", put(set_primary))
        .route("/faces/{id}/videos", get(face_videos))
        .route("/faces/{id}/images", get(face_images))
        .route("/videos/{id}/detect-faces", post(detect_faces))
        .route("/videos/{id}/add-detected-faces", post(add_detected_faces))
        .route("/videos/{id}/auto-scan-faces", post(auto_scan_faces))
        .route("/videos/{id}/faces/{face_id}", post(link_face).delete(unlink_face))
}

/// Multipart face search: an uploaded crop plus optional threshold/top_k.
async fn search_by_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, DomainError> {
    let mut image: Option<Vec<u8>> = None;
    let mut threshold: Option<f32> = None;
    let mut top_k: usize = 5;

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
            "threshold" => {
                if let Ok(text) = field.text().await {
                    threshold = text.parse().ok();
                }
            }
            "top_k" => {
                if let Ok(text) = field.text().await {
                    if let Ok(parsed) = text.parse() {
                        top_k = parsed;
                    }
                }
            }
            _ => {}
        }
    }

    let image =
        image.ok_or_else(|| DomainError::InvalidInput("No image uploaded".to_string()))?;
    let engine = state.engine().await;
    let result = engine.faces.search_by_image(&image, threshold, top_k.clamp(1, 50))?;
    Ok(Json(result))
}

#[derive(Deserialize)]
struct CatalogQuery {
    q: Option<String>,
    actor_id: Option<i64>,
}

async fn search_catalog(
    State(state): State<AppState>,
    Query(query): Query<CatalogQuery>,
) -> Result<impl IntoResponse, DomainError> {
    list_faces_with_previews(state, query.q, query.actor_id).await
}

async fn catalog(
    State(state): State<AppState>,
    Query(query): Query<CatalogQuery>,
) -> Result<impl IntoResponse, DomainError> {
    list_faces_with_previews(state, query.q, query.actor_id).await
}

async fn list_faces_with_previews(
    state: AppState,
    query: Option<String>,
    actor_id: Option<i64>,
) -> Result<Json<serde_json::Value>, DomainError> {
    let engine = state.engine().await;
    let faces = engine.catalog.list_faces(query.as_deref(), actor_id)?;
    let mut out = Vec::with_capacity(faces.len());
    for face in faces {
        let preview = engine.catalog.primary_or_best_encoding(face.id)?;
        let actor_name = match face.actor_id {
            Some(actor_id) => engine.catalog.get_actor(actor_id)?.map(|a| a.name),
            None => None,
        };
        out.push(json!({
            "face": face,
            "thumbnail": preview.as_ref().and_then(|e| e.thumbnail.clone()),
            "actor_name": actor_name,
        }));
    }
    Ok(Json(json!({ "count": out.len(), "faces": out })))
}

#[derive(Deserialize)]
struct CreateFaceRequest {
    name: Option<String>,
    actor_id: Option<i64>,
}

async fn create_face(
    State(state): State<AppState>,
    Json(body): Json<CreateFaceRequest>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let name = body
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(generate_face_name);
    Ok(Json(engine.catalog.create_face(&name, body.actor_id)?))
}

async fn get_face(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let face = engine
        .catalog
        .get_face(id)?
        .ok_or(DomainError::NotFound("Face"))?;
    let preview = engine.catalog.primary_or_best_encoding(id)?;
    let actor_name = match face.actor_id {
        Some(actor_id) => engine.catalog.get_actor(actor_id)?.map(|a| a.name),
        None => None,
    };
    Ok(Json(json!({
        "face": face,
        "thumbnail": preview.as_ref().and_then(|e| e.thumbnail.clone()),
        "actor_name": actor_name,
    })))
}

#[derive(Deserialize)]
struct UpdateFaceRequest {
    name: Option<String>,
    /// Present-but-null clears the actor link.
    #[serde(default, with = "double_option")]
    actor_id: Option<Option<i64>>,
}

/// Distinguishes an absent field from an explicit null.
mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(de: D) -> Result<Option<Option<i64>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<i64>::deserialize(de).map(Some)
    }
}

async fn update_face(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateFaceRequest>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    Ok(Json(engine.catalog.update_face(
        id,
        body.name.as_deref(),
        body.actor_id,
    )?))
}

async fn delete_face(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    if !engine.catalog.delete_face(id)? {
        return Err(DomainError::NotFound("Face"));
    }
    Ok(Json(json!({ "message": "Face deleted" })))
}

#[derive(Deserialize)]
struct AddEncodingRequest {
    encoding: String,
    thumbnail: Option<String>,
    confidence: Option<f64>,
    quality_score: Option<f64>,
    video_id: Option<i64>,
    #[serde(default)]
    frame_timestamp: f64,
}

async fn add_encoding(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<AddEncodingRequest>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    // Validate the payload decodes before storing it.
    crate::application::faces::base64_to_encoding(&body.encoding)?;
    let outcome = engine.catalog.add_encoding(
        id,
        body.video_id,
        body.frame_timestamp,
        &body.encoding,
        body.thumbnail.as_deref(),
        body.confidence,
        body.quality_score,
    )?;
    if let Some(video_id) = body.video_id {
        engine
            .catalog
            .upsert_video_face(video_id, id, DetectionMethod::ManualSearch)?;
    }
    Ok(match outcome {
        crate::infrastructure::AddEncodingOutcome::Added(encoding) => {
            Json(json!({ "added": true, "encoding": encoding }))
        }
        crate::infrastructure::AddEncodingOutcome::Skipped => Json(json!({
            "added": false,
            "skipped": true,
            "message": "Exact duplicate encoding already exists",
        })),
    })
}

async fn list_encodings(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    if engine.catalog.get_face(id)?.is_none() {
        return Err(DomainError::NotFound("Face"));
    }
    Ok(Json(engine.catalog.encodings_for_face(id)?))
}

async fn delete_encoding(
    State(state): State<AppState>,
    Path((id, eid)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let (remaining, new_primary) = engine.catalog.delete_encoding(id, eid)?;
    Ok(Json(json!({
        "face_id": id,
        "encoding_id": eid,
        "remaining_encodings": remaining,
        "new_primary_encoding_id": new_primary,
    })))
}

#[derive(Deserialize)]
struct CleanupQuery {
    threshold: Option<f64>,
}

async fn cleanup_encodings(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<CleanupQuery>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let reviews = engine.faces.cleanup_view(id, query.threshold.unwrap_or(0.3))?;
    Ok(Json(json!({ "face_id": id, "encodings": reviews })))
}

async fn best_encoding(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let encoding = engine
        .catalog
        .primary_or_best_encoding(id)?
        .ok_or(DomainError::NotFound("Encoding"))?;
    Ok(Json(encoding))
}

async fn duplicate_analysis(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let groups = engine.faces.duplicate_encoding_analysis(id)?;
    Ok(Json(json!({ "face_id": id, "groups": groups })))
}

async fn set_primary(
    State(state): State<AppState>,
    Path((id, eid)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    engine.catalog.set_primary_encoding(id, eid)?;
    Ok(Json(json!({ "face_id": id, "primary_encoding_id": eid })))
}

async fn face_media(
    state: AppState,
    id: i64,
    media_type: Option<&str>,
) -> Result<Json<serde_json::Value>, DomainError> {
    let engine = state.engine().await;
    if engine.catalog.get_face(id)?.is_none() {
        return Err(DomainError::NotFound("Face"));
    }
    let ids = engine.catalog.media_ids_for_face(id, media_type)?;
    let mut items = engine.catalog.get_media_many(&ids)?;
    engine.hydrate(&mut items)?;
    Ok(Json(json!({ "face_id": id, "count": items.len(), "items": items })))
}

async fn face_videos(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, DomainError> {
    face_media(state, id, Some("video")).await
}

async fn face_images(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, DomainError> {
    face_media(state, id, Some("image")).await
}

#[derive(Deserialize)]
struct MergeRequest {
    face_ids: Vec<i64>,
    new_name: Option<String>,
    #[serde(default, with = "double_option")]
    actor_id: Option<Option<i64>>,
}

async fn merge(
    State(state): State<AppState>,
    Json(body): Json<MergeRequest>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let merged = engine
        .faces
        .merge(&body.face_ids, body.new_name.as_deref(), body.actor_id)?;
    Ok(Json(json!({ "message": "Faces merged", "face": merged })))
}

#[derive(Deserialize)]
struct CompareRequest {
    face_ids: Vec<i64>,
}

async fn compare(
    State(state): State<AppState>,
    Json(body): Json<CompareRequest>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let matrix = engine.faces.compare_faces(&body.face_ids)?;
    Ok(Json(json!({ "face_ids": body.face_ids, "matrix": matrix })))
}

#[derive(Deserialize)]
struct GroupQuery {
    threshold: Option<f32>,
}

async fn group_similar(
    State(state): State<AppState>,
    Query(query): Query<GroupQuery>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let groups = engine.faces.group_similar_faces(query.threshold.unwrap_or(0.5))?;
    Ok(Json(json!({ "total_groups": groups.len(), "groups": groups })))
}

async fn stats(State(state): State<AppState>) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let (faces, encodings, with_actor, video_links) = engine.catalog.face_stats()?;
    Ok(Json(json!({
        "total_faces": faces,
        "total_encodings": encodings,
        "faces_with_actor": with_actor,
        "video_links": video_links,
    })))
}

async fn cleanup_orphans(State(state): State<AppState>) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let removed = engine.catalog.cleanup_orphan_faces()?;
    Ok(Json(json!({ "removed": removed })))
}

#[derive(Default, Deserialize)]
struct ScanRequest {
    num_frames: Option<usize>,
    /// Fast mode: fewer frames, bounded to the first `max_duration` seconds.
    #[serde(default)]
    fast: bool,
    max_duration: Option<f64>,
}

impl ScanRequest {
    fn frames(&self) -> usize {
        self.num_frames.unwrap_or(if self.fast {
            crate::application::faces::FAST_SCAN_FRAMES
        } else {
            crate::application::faces::DEFAULT_SCAN_FRAMES
        })
    }

    fn cap(&self) -> Option<f64> {
        self.max_duration.or(if self.fast { Some(3.0) } else { None })
    }
}

async fn detect_faces(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Option<Json<ScanRequest>>,
) -> Result<impl IntoResponse, DomainError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let engine = state.engine().await;
    let item = engine.get_item(id)?;
    let result = engine
        .faces
        .detect_for_review(&item, body.frames(), body.cap())
        .await?;
    Ok(Json(result))
}

#[derive(Deserialize)]
struct AddDetectedRequest {
    detections: Vec<ApprovedDetection>,
}

async fn add_detected_faces(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<AddDetectedRequest>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    engine.get_item(id)?;
    let summary = engine.faces.commit_detections(id, &body.detections)?;
    Ok(Json(summary))
}

async fn auto_scan_faces(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Option<Json<ScanRequest>>,
) -> Result<impl IntoResponse, DomainError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let engine = state.engine().await;
    let item = engine.get_item(id)?;
    let summary = engine.faces.auto_scan(&item, body.frames(), body.cap()).await?;
    Ok(Json(summary))
}

async fn link_face(
    State(state): State<AppState>,
    Path((vid, fid)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    engine.get_item(vid)?;
    if engine.catalog.get_face(fid)?.is_none() {
        return Err(DomainError::NotFound("Face"));
    }
    let created = engine
        .catalog
        .upsert_video_face(vid, fid, DetectionMethod::UserSelected)?;
    Ok(Json(json!({ "linked": true, "created": created })))
}

async fn unlink_face(
    State(state): State<AppState>,
    Path((vid, fid)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    if !engine.catalog.unlink_video_face(vid, fid)? {
        return Err(DomainError::NotFound("Face link"));
    }
    Ok(Json(json!({ "unlinked": true })))
}

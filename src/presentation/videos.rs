use super::api::AppState;
use crate::application::metadata::{parse_filename, should_update};
use crate::domain::{DomainError, EditorialUpdate, MediaType};
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/videos", get(list_videos))
        .route("/videos/page", get(page_videos))
        .route("/videos/bulk-update", post(bulk_update))
        .route("/videos/parse-metadata", post(parse_metadata))
        .route("/videos/extract-bulk", post(extract_bulk))
        .route("/videos/{id}", get(get_video).put(update_video))
        .route("/videos/{id}/update", post(update_video_post))
        .route("/videos/{id}/move", post(move_video))
        .route("/videos/{id}/rename", post(rename_video))
        .route("/videos/{id}/hash-rename", post(hash_rename))
        .route("/videos/{id}/delete", post(soft_delete))
        .route("/videos/{id}/delete-permanent", post(permanent_delete))
        .route("/videos/{id}/toggle-final", post(toggle_final))
        .route("/videos/{id}/extract-metadata", post(extract_metadata))
        .route("/videos/folder/{name}/extract-metadata", post(extract_folder_metadata))
}

/// Category listing routes mounted at the root (outside /api).
pub fn category_router() -> Router<AppState> {
    Router::new()
        .route("/videos/{category}", get(by_category))
        .route("/videos/{category}/{subcategory}", get(by_subcategory))
}

#[derive(Deserialize)]
struct MediaTypeQuery {
    media_type: Option<String>,
}

fn parse_media_type(raw: &Option<String>) -> Option<MediaType> {
    raw.as_deref().map(MediaType::from_str)
}

async fn list_videos(
    State(state): State<AppState>,
    Query(query): Query<MediaTypeQuery>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let mut items = engine.catalog.search_media(&crate::domain::SearchFilter {
        media_type: parse_media_type(&query.media_type),
        ..Default::default()
    })?;
    let ids: Vec<i64> = items.iter().map(|m| m.id).collect();
    let faces = engine.catalog.faces_for_videos(&ids)?;
    for item in items.iter_mut() {
        if let Some(summaries) = faces.get(&item.id) {
            item.faces = summaries.clone();
        }
    }
    Ok(Json(items))
}

#[derive(Deserialize)]
struct PageQuery {
    #[serde(default)]
    page: i64,
    #[serde(default = "default_page_size")]
    size: i64,
    media_type: Option<String>,
}

fn default_page_size() -> i64 {
    50
}

async fn page_videos(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let size = query.size.clamp(1, 200);
    let (mut items, total) =
        engine
            .catalog
            .page_media(query.page.max(0), size, parse_media_type(&query.media_type))?;
    engine.hydrate(&mut items)?;
    Ok(Json(json!({
        "items": items,
        "page": query.page.max(0),
        "size": size,
        "total": total,
    })))
}

async fn get_video(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let mut item = engine.get_item(id)?;
    engine.hydrate(std::slice::from_mut(&mut item))?;
    Ok(Json(item))
}

async fn update_video(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<EditorialUpdate>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    engine.catalog.update_editorial(id, &body)?;
    let mut item = engine.get_item(id)?;
    engine.hydrate(std::slice::from_mut(&mut item))?;
    Ok(Json(item))
}

async fn update_video_post(
    state: State<AppState>,
    id: Path<i64>,
    body: Json<EditorialUpdate>,
) -> Result<impl IntoResponse, DomainError> {
    update_video(state, id, body).await
}

#[derive(Deserialize)]
struct MoveRequest {
    target_category: String,
    target_subcategory: Option<String>,
    new_name: Option<String>,
}

async fn move_video(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<MoveRequest>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let mut item = engine.mover.move_media(
        id,
        &body.target_category,
        body.target_subcategory.as_deref(),
        body.new_name.as_deref(),
    )?;
    engine.hydrate(std::slice::from_mut(&mut item))?;
    Ok(Json(json!({ "message": "Video moved successfully", "video": item })))
}

#[derive(Deserialize)]
struct RenameRequest {
    new_name: String,
}

async fn rename_video(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<RenameRequest>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let mut item = engine.mover.rename_media(id, &body.new_name)?;
    engine.hydrate(std::slice::from_mut(&mut item))?;
    Ok(Json(json!({ "message": "Video renamed successfully", "video": item })))
}

async fn hash_rename(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let (mut item, hash) = engine.mover.hash_rename(id)?;
    engine.hydrate(std::slice::from_mut(&mut item))?;
    Ok(Json(json!({
        "message": "Video renamed successfully",
        "new_name": item.name,
        "hash": hash,
        "video": item,
    })))
}

async fn soft_delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let (item, original_category) = engine.mover.soft_delete(id)?;
    Ok(Json(json!({
        "message": "Video moved to DELETE folder",
        "original_category": original_category,
        "video": item,
    })))
}

async fn permanent_delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    engine.mover.permanent_delete(id)?;
    Ok(Json(json!({ "message": "Video permanently deleted" })))
}

async fn toggle_final(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let is_final = engine.catalog.toggle_final(id)?;
    Ok(Json(json!({ "id": id, "is_final": is_final })))
}

#[derive(Deserialize)]
struct BulkUpdateRequest {
    video_ids: Vec<i64>,
    #[serde(flatten)]
    fields: EditorialUpdate,
}

async fn bulk_update(
    State(state): State<AppState>,
    Json(body): Json<BulkUpdateRequest>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let updated = engine.catalog.bulk_update_editorial(&body.video_ids, &body.fields)?;
    Ok(Json(json!({ "updated": updated })))
}

#[derive(Deserialize)]
struct ParseMetadataRequest {
    video_ids: Vec<i64>,
    #[serde(default)]
    overwrite: bool,
}

/// Recover series/season/episode/year/channel from filenames. Parsed values
/// land only on empty fields unless `overwrite` is set.
async fn parse_metadata(
    State(state): State<AppState>,
    Json(body): Json<ParseMetadataRequest>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let items = engine.catalog.get_media_many(&body.video_ids)?;

    let mut updated = 0;
    let mut results = Vec::with_capacity(items.len());
    for item in items {
        let parsed = parse_filename(&item.name);
        let update = EditorialUpdate {
            series: should_update(&item.series, &parsed.series, body.overwrite)
                .then(|| parsed.series.clone().unwrap()),
            season: should_update(&item.season, &parsed.season, body.overwrite)
                .then(|| parsed.season.unwrap()),
            episode: should_update(&item.episode, &parsed.episode, body.overwrite)
                .then(|| parsed.episode.clone().unwrap()),
            year: should_update(&item.year, &parsed.year, body.overwrite)
                .then(|| parsed.year.unwrap()),
            channel: should_update(&item.channel, &parsed.channel, body.overwrite)
                .then(|| parsed.channel.clone().unwrap()),
            ..Default::default()
        };
        let changed = update.series.is_some()
            || update.season.is_some()
            || update.episode.is_some()
            || update.year.is_some()
            || update.channel.is_some();
        if changed {
            engine.catalog.update_editorial(item.id, &update)?;
            updated += 1;
        }
        results.push(json!({ "id": item.id, "parsed": parsed, "applied": changed }));
    }
    Ok(Json(json!({ "updated": updated, "results": results })))
}

async fn extract_metadata(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let item = engine.get_item(id)?;
    let extracted = engine.reconciler.extract_missing_metadata(&item).await?;
    let item = engine.get_item(id)?;
    Ok(Json(json!({ "extracted": extracted, "video": item })))
}

async fn extract_folder_metadata(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let items = engine.catalog.list_by_category(&name, None)?;
    let mut extracted = 0;
    for item in &items {
        if engine.reconciler.extract_missing_metadata(item).await? {
            extracted += 1;
        }
    }
    Ok(Json(json!({ "folder": name, "extracted": extracted, "total": items.len() })))
}

#[derive(Deserialize)]
struct ExtractBulkRequest {
    video_ids: Vec<i64>,
}

async fn extract_bulk(
    State(state): State<AppState>,
    Json(body): Json<ExtractBulkRequest>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let items = engine.catalog.get_media_many(&body.video_ids)?;
    let mut extracted = 0;
    for item in &items {
        if engine.reconciler.extract_missing_metadata(item).await? {
            extracted += 1;
        }
    }
    Ok(Json(json!({ "extracted": extracted, "total": items.len() })))
}

async fn by_category(
    State(state): State<AppState>,
    Path(category): Path<String>,
    Query(query): Query<MediaTypeQuery>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let mut items = engine
        .catalog
        .list_by_category(&category, parse_media_type(&query.media_type))?;
    engine.hydrate(&mut items)?;
    Ok(Json(items))
}

async fn by_subcategory(
    State(state): State<AppState>,
    Path((category, subcategory)): Path<(String, String)>,
    Query(query): Query<MediaTypeQuery>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let mut items = engine.catalog.list_by_subcategory(
        &category,
        Some(&subcategory),
        parse_media_type(&query.media_type),
    )?;
    engine.hydrate(&mut items)?;
    Ok(Json(items))
}

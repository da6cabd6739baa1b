use super::api::AppState;
use crate::domain::DomainError;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/scan", get(scan_overview))
        .route("/scan/folder/{name}/scan-only", post(scan_folder_only))
        .route("/scan/folder/{name}/smart-refresh", post(smart_refresh))
        .route("/scan/folder/{name}", post(scan_folder_full))
        .route("/scan/video/single", post(scan_single))
        .route("/scan/structure", get(structure))
        .route("/scan/hierarchical", get(hierarchical))
        .route("/scan/subfolders", get(subfolders))
        .route("/scan/status", get(scan_status))
        .route("/scan/prune", post(prune_missing))
}

/// Filesystem-only overview: categories with recognized media counts. No
/// catalog writes.
async fn scan_overview(State(state): State<AppState>) -> impl IntoResponse {
    let engine = state.engine().await;
    let mut categories = serde_json::Map::new();
    let mut total = 0usize;
    for category in engine.scanner.list_categories(engine.root()) {
        let files = engine.scanner.scan_category(&engine.root().join(&category));
        if files.is_empty() {
            continue;
        }
        total += files.len();
        categories.insert(
            category.clone(),
            json!({
                "path": engine.root().join(&category),
                "count": files.len(),
                "videos": files,
            }),
        );
    }
    let root_files = engine.scanner.scan_root_files(engine.root());
    if !root_files.is_empty() {
        total += root_files.len();
        categories.insert(
            "_root".to_string(),
            json!({
                "path": engine.root(),
                "count": root_files.len(),
                "videos": root_files,
            }),
        );
    }
    Json(json!({
        "root_directory": engine.root(),
        "categories": categories,
        "total_videos": total,
        "category_count": categories.len(),
    }))
}

async fn scan_folder_only(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let outcome = engine.reconciler.scan_folder(&name)?;
    Ok(Json(outcome))
}

async fn smart_refresh(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let outcome = engine.reconciler.smart_refresh(&name).await?;
    Ok(Json(outcome))
}

/// Full scan is the smart refresh under a different historical route.
async fn scan_folder_full(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let outcome = engine.reconciler.smart_refresh(&name).await?;
    Ok(Json(outcome))
}

#[derive(Deserialize)]
struct SingleScanRequest {
    file_path: String,
}

async fn scan_single(
    State(state): State<AppState>,
    Json(body): Json<SingleScanRequest>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let mut item = engine.reconciler.scan_single_file(&body.file_path).await?;
    engine.hydrate(std::slice::from_mut(&mut item))?;
    Ok(Json(item))
}

#[derive(Deserialize)]
struct StructureQuery {
    category: Option<String>,
}

async fn structure(
    State(state): State<AppState>,
    Query(query): Query<StructureQuery>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    match query.category {
        Some(category) => {
            let path = engine.root().join(&category);
            if !path.is_dir() {
                return Err(DomainError::NotFound("Folder"));
            }
            Ok(Json(json!(engine.scanner.category_structure(&path))))
        }
        None => {
            let mut all = serde_json::Map::new();
            for category in engine.scanner.list_categories(engine.root()) {
                let node = engine.scanner.category_structure(&engine.root().join(&category));
                all.insert(category, json!(node));
            }
            Ok(Json(json!(all)))
        }
    }
}

#[derive(Deserialize)]
struct HierarchicalQuery {
    folder: String,
    parent: Option<String>,
}

/// Direct files plus a shallow preview of immediate subfolders, for lazy
/// explorer expansion.
async fn hierarchical(
    State(state): State<AppState>,
    Query(query): Query<HierarchicalQuery>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let path = match &query.parent {
        Some(parent) => engine.root().join(parent).join(&query.folder),
        None => engine.root().join(&query.folder),
    };
    if !path.is_dir() {
        return Err(DomainError::NotFound("Folder"));
    }
    Ok(Json(
        engine
            .scanner
            .scan_hierarchical(&path, query.parent.as_deref()),
    ))
}

async fn subfolders(State(state): State<AppState>) -> impl IntoResponse {
    let engine = state.engine().await;
    Json(engine.scanner.all_subfolders(engine.root()))
}

async fn scan_status(State(state): State<AppState>) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let statuses = engine.catalog.list_scan_status()?;
    let (total, videos, images) = engine.catalog.media_counts()?;
    Ok(Json(json!({
        "folders": statuses,
        "total_items": total,
        "total_videos": videos,
        "total_images": images,
    })))
}

async fn prune_missing(State(state): State<AppState>) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let removed = engine.reconciler.prune_missing()?;
    Ok(Json(json!({ "removed": removed })))
}

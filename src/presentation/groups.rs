use super::api::AppState;
use crate::domain::DomainError;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post, put};
use axum::Router;
use serde::Deserialize;
use serde_json::json;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/folder-groups", get(list_groups).post(create_group))
        .route("/folder-groups/reorder", put(reorder_groups))
        .route("/folder-groups/{id}", put(update_group).delete(delete_group))
        .route("/folders/{name}/rename", post(rename_folder))
}

async fn list_groups(State(state): State<AppState>) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    Ok(Json(engine.catalog.list_folder_groups()?))
}

#[derive(Deserialize)]
struct GroupRequest {
    name: Option<String>,
    folders: Option<Vec<String>>,
    icon: Option<String>,
    color: Option<String>,
}

async fn create_group(
    State(state): State<AppState>,
    Json(body): Json<GroupRequest>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let name = body
        .name
        .as_deref()
        .ok_or_else(|| DomainError::InvalidInput("Group name is required".to_string()))?;
    let group = engine.catalog.create_folder_group(
        name,
        body.folders.as_deref().unwrap_or(&[]),
        body.icon.as_deref(),
        body.color.as_deref(),
    )?;
    Ok(Json(group))
}

async fn update_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<GroupRequest>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let group = engine.catalog.update_folder_group(
        &id,
        body.name.as_deref(),
        body.folders.as_deref(),
        body.icon.as_deref(),
        body.color.as_deref(),
    )?;
    Ok(Json(group))
}

async fn delete_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    if !engine.catalog.delete_folder_group(&id)? {
        return Err(DomainError::NotFound("Folder group"));
    }
    Ok(Json(json!({ "message": "Group deleted" })))
}

#[derive(Deserialize)]
struct ReorderRequest {
    group_ids: Vec<String>,
}

async fn reorder_groups(
    State(state): State<AppState>,
    Json(body): Json<ReorderRequest>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    engine.catalog.reorder_folder_groups(&body.group_ids)?;
    Ok(Json(engine.catalog.list_folder_groups()?))
}

#[derive(Deserialize)]
struct RenameFolderRequest {
    new_name: String,
}

async fn rename_folder(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<RenameFolderRequest>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let outcome = engine.mover.rename_folder(&name, &body.new_name)?;
    Ok(Json(outcome))
}

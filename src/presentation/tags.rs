use super::api::AppState;
use crate::domain::DomainError;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use axum::routing::{delete, get, post, put};
use axum::Router;
use serde::Deserialize;
use serde_json::json;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tags", get(list_tags))
        .route("/tags/unused", get(unused_tags).delete(delete_unused))
        .route("/tags/regenerate-colors", post(regenerate_colors))
        .route("/tags/{id}", put(rename_tag).delete(delete_tag))
        .route("/tags/videos/{id}/tags", post(add_tag))
        .route("/tags/videos/{id}/tags/{tag_id}", delete(remove_tag))
}

async fn list_tags(State(state): State<AppState>) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    Ok(Json(engine.catalog.list_tags()?))
}

#[derive(Deserialize)]
struct AddTagQuery {
    tag_name: String,
}

async fn add_tag(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<AddTagQuery>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let tag = engine.catalog.add_tag_to_media(id, &query.tag_name)?;
    Ok(Json(tag))
}

async fn remove_tag(
    State(state): State<AppState>,
    Path((id, tag_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    engine.catalog.remove_tag_from_media(id, tag_id)?;
    Ok(Json(json!({ "message": "Tag removed" })))
}

async fn unused_tags(State(state): State<AppState>) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    Ok(Json(engine.catalog.unused_tags()?))
}

async fn delete_unused(State(state): State<AppState>) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let deleted = engine.catalog.delete_unused_tags()?;
    Ok(Json(json!({ "deleted": deleted })))
}

async fn delete_tag(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    if !engine.catalog.delete_tag(id)? {
        return Err(DomainError::NotFound("Tag"));
    }
    Ok(Json(json!({ "message": "Tag deleted" })))
}

#[derive(Deserialize)]
struct RenameTagRequest {
    new_name: String,
}

async fn rename_tag(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<RenameTagRequest>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    Ok(Json(engine.catalog.rename_tag(id, &body.new_name)?))
}

async fn regenerate_colors(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let updated = engine.catalog.regenerate_tag_colors()?;
    Ok(Json(json!({ "updated": updated })))
}

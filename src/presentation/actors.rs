use super::api::AppState;
use crate::domain::DomainError;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/actors", get(list_actors).post(create_actor))
        .route("/actors/{id}", get(get_actor).put(update_actor).delete(delete_actor))
        .route("/actors/{id}/videos/{video_id}", post(link).delete(unlink))
        .route("/actors/{id}/videos", get(actor_videos))
}

async fn list_actors(State(state): State<AppState>) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    Ok(Json(engine.catalog.list_actors()?))
}

#[derive(Deserialize)]
struct ActorRequest {
    name: Option<String>,
    notes: Option<String>,
}

async fn create_actor(
    State(state): State<AppState>,
    Json(body): Json<ActorRequest>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let name = body
        .name
        .as_deref()
        .ok_or_else(|| DomainError::InvalidInput("Actor name is required".to_string()))?;
    Ok(Json(engine.catalog.create_actor(name, body.notes.as_deref())?))
}

async fn get_actor(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    engine
        .catalog
        .get_actor(id)?
        .map(Json)
        .ok_or(DomainError::NotFound("Actor"))
}

async fn update_actor(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<ActorRequest>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    Ok(Json(engine.catalog.update_actor(
        id,
        body.name.as_deref(),
        body.notes.as_deref(),
    )?))
}

async fn delete_actor(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    if !engine.catalog.delete_actor(id)? {
        return Err(DomainError::NotFound("Actor"));
    }
    Ok(Json(json!({ "message": "Actor deleted" })))
}

async fn link(
    State(state): State<AppState>,
    Path((actor_id, video_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    engine.get_item(video_id)?;
    if engine.catalog.get_actor(actor_id)?.is_none() {
        return Err(DomainError::NotFound("Actor"));
    }
    engine.catalog.link_actor(video_id, actor_id)?;
    Ok(Json(json!({ "message": "Actor linked" })))
}

async fn unlink(
    State(state): State<AppState>,
    Path((actor_id, video_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    engine.catalog.unlink_actor(video_id, actor_id)?;
    Ok(Json(json!({ "message": "Actor unlinked" })))
}

async fn actor_videos(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let mut items = engine.catalog.media_for_actor(id)?;
    engine.hydrate(&mut items)?;
    Ok(Json(items))
}

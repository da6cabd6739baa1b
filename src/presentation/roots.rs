use super::api::AppState;
use crate::domain::DomainError;
use axum::extract::State;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/roots", get(list_roots))
        .route("/roots/select", post(select_root))
}

async fn list_roots(State(state): State<AppState>) -> impl IntoResponse {
    let engine = state.engine().await;
    Json(json!({
        "roots": state.roots.list(),
        "current": engine.root_entry,
    }))
}

#[derive(Deserialize)]
struct SelectRootRequest {
    root_name: String,
}

async fn select_root(
    State(state): State<AppState>,
    Json(body): Json<SelectRootRequest>,
) -> Result<impl IntoResponse, DomainError> {
    let entry = state.switch_root(&body.root_name).await?;
    Ok(Json(json!({
        "message": format!("Switched to root '{}'", entry.name),
        "root": entry,
    })))
}

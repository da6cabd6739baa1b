use super::api::AppState;
use crate::domain::{DomainError, MediaType, SearchFilter};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use serde_json::json;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/search", get(search))
        .route("/search/suggestions", get(suggestions))
}

#[derive(Deserialize)]
struct SearchQuery {
    q: Option<String>,
    /// Comma-separated; all listed tags are required.
    tags: Option<String>,
    category: Option<String>,
    subcategory: Option<String>,
    duration_min: Option<f64>,
    duration_max: Option<f64>,
    media_type: Option<String>,
    #[serde(default)]
    include_deleted: bool,
}

async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let filter = SearchFilter {
        query: query.q,
        tags: query
            .tags
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect()
            })
            .unwrap_or_default(),
        category: query.category,
        subcategory: query.subcategory,
        duration_min: query.duration_min,
        duration_max: query.duration_max,
        media_type: query.media_type.as_deref().map(MediaType::from_str),
        include_deleted: query.include_deleted,
    };
    let mut items = engine.catalog.search_media(&filter)?;

    // Face summaries ride along, fetched in two batched queries.
    let ids: Vec<i64> = items.iter().map(|m| m.id).collect();
    let faces = engine.catalog.faces_for_videos(&ids)?;
    for item in items.iter_mut() {
        if let Some(summaries) = faces.get(&item.id) {
            item.faces = summaries.clone();
        }
    }

    Ok(Json(json!({ "count": items.len(), "results": items })))
}

#[derive(Deserialize)]
struct SuggestionsQuery {
    field: String,
}

async fn suggestions(
    State(state): State<AppState>,
    Query(query): Query<SuggestionsQuery>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let values = engine.catalog.metadata_suggestions(&query.field)?;
    Ok(Json(json!({
        "field": query.field,
        "suggestions": values
            .into_iter()
            .map(|(value, count)| json!({ "value": value, "count": count }))
            .collect::<Vec<_>>(),
    })))
}

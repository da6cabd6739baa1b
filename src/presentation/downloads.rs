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
        .route("/downloads", post(create_hls).get(list_hls))
        .route("/downloads/clear-completed", post(clear_hls))
        .route("/downloads/{id}", get(get_hls).delete(remove_hls))
        .route("/socks-downloads", post(create_socks).get(list_socks))
        .route("/socks-downloads/clear-completed", post(clear_socks))
        .route("/socks-downloads/{id}", get(get_socks).delete(remove_socks))
        .route(
            "/socks-config/proxy",
            get(get_proxy).post(set_proxy).delete(clear_proxy),
        )
        .route(
            "/socks-config/referer",
            get(get_referer).post(set_referer).delete(clear_referer),
        )
}

#[derive(Deserialize)]
struct HlsRequest {
    url: String,
    start_time: String,
    end_time: String,
    filename: Option<String>,
    #[serde(default)]
    use_ytdlp_fallback: bool,
}

fn validate_clock(time: &str) -> Result<(), DomainError> {
    let parts: Vec<&str> = time.split(':').collect();
    let ok = parts.len() == 3 && parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    if ok {
        Ok(())
    } else {
        Err(DomainError::InvalidInput(format!(
            "Expected HH:MM:SS, got '{}'",
            time
        )))
    }
}

async fn create_hls(
    State(state): State<AppState>,
    Json(body): Json<HlsRequest>,
) -> Result<impl IntoResponse, DomainError> {
    validate_clock(&body.start_time)?;
    validate_clock(&body.end_time)?;
    let engine = state.engine().await;
    let job = engine.hls_downloads.create_download(
        body.url,
        body.start_time,
        body.end_time,
        body.filename,
        body.use_ytdlp_fallback,
    );
    Ok(Json(job))
}

async fn list_hls(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine().await.hls_downloads.list())
}

async fn get_hls(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, DomainError> {
    state
        .engine()
        .await
        .hls_downloads
        .get(id)
        .map(Json)
        .ok_or(DomainError::NotFound("Download"))
}

async fn remove_hls(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, DomainError> {
    if !state.engine().await.hls_downloads.remove(id) {
        return Err(DomainError::NotFound("Download"));
    }
    Ok(Json(json!({ "message": "Download removed" })))
}

async fn clear_hls(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "cleared": state.engine().await.hls_downloads.clear_completed() }))
}

#[derive(Deserialize)]
struct SocksRequest {
    url: String,
    filename: Option<String>,
    proxy_url: Option<String>,
    referer: Option<String>,
}

async fn create_socks(
    State(state): State<AppState>,
    Json(body): Json<SocksRequest>,
) -> Result<impl IntoResponse, DomainError> {
    let engine = state.engine().await;
    let job = engine.socks_downloads.create_download(
        body.url,
        body.filename,
        body.proxy_url,
        body.referer,
    );
    Ok(Json(job))
}

async fn list_socks(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine().await.socks_downloads.list())
}

async fn get_socks(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, DomainError> {
    state
        .engine()
        .await
        .socks_downloads
        .get(id)
        .map(Json)
        .ok_or(DomainError::NotFound("Download"))
}

async fn remove_socks(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, DomainError> {
    if !state.engine().await.socks_downloads.remove(id) {
        return Err(DomainError::NotFound("Download"));
    }
    Ok(Json(json!({ "message": "Download removed" })))
}

async fn clear_socks(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "cleared": state.engine().await.socks_downloads.clear_completed() }))
}

#[derive(Deserialize)]
struct ProxyRequest {
    proxy_url: String,
}

async fn get_proxy(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "proxy_url": state.engine().await.socks_downloads.default_proxy() }))
}

async fn set_proxy(
    State(state): State<AppState>,
    Json(body): Json<ProxyRequest>,
) -> impl IntoResponse {
    let engine = state.engine().await;
    engine.socks_downloads.set_default_proxy(Some(body.proxy_url.clone()));
    Json(json!({ "proxy_url": body.proxy_url }))
}

async fn clear_proxy(State(state): State<AppState>) -> impl IntoResponse {
    state.engine().await.socks_downloads.set_default_proxy(None);
    Json(json!({ "message": "Proxy cleared" }))
}

#[derive(Deserialize)]
struct RefererRequest {
    referer: String,
}

async fn get_referer(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "referer": state.engine().await.socks_downloads.default_referer() }))
}

async fn set_referer(
    State(state): State<AppState>,
    Json(body): Json<RefererRequest>,
) -> impl IntoResponse {
    let engine = state.engine().await;
    engine.socks_downloads.set_default_referer(Some(body.referer.clone()));
    Json(json!({ "referer": body.referer }))
}

async fn clear_referer(State(state): State<AppState>) -> impl IntoResponse {
    state.engine().await.socks_downloads.set_default_referer(None);
    Json(json!({ "message": "Referer cleared" }))
}

mod application;
mod domain;
mod infrastructure;
mod presentation;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use application::{RootManager, Settings};
use axum::http::{HeaderValue, Method};
use axum::Router;
use presentation::{app_router, build_engine, AppState};
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clipper=info,warn".parse().unwrap()),
        )
        .init();

    let settings = Arc::new(Settings::from_env());

    let roots = match RootManager::load(Path::new("roots.json")) {
        Ok(roots) => Arc::new(roots),
        Err(e) => {
            eprintln!("Failed to load roots configuration: {}", e);
            std::process::exit(1);
        }
    };

    let active = roots.current();
    println!("Active root: {} ({})", active.name, active.path);

    let engine = match build_engine(&settings, &active) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Failed to initialize engine for root '{}': {}", active.name, e);
            std::process::exit(1);
        }
    };

    let local_mode = settings.local_mode;
    let root_dir = engine.root().to_path_buf();
    let state = AppState::new(engine, roots, settings.clone());

    let api_routes = app_router(state.clone());

    let cors_layer = {
        let origins: Vec<HeaderValue> = settings
            .cors_origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin).ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([axum::http::header::CONTENT_TYPE])
    };

    let mut app = Router::new()
        .nest("/api", api_routes)
        .merge(presentation::videos::category_router().with_state(state.clone()))
        .merge(presentation::stream::router().with_state(state.clone()));

    if local_mode {
        // Local mode serves the whole tree directly; only safe on a trusted
        // machine.
        println!("Local mode enabled: serving {} under /files", root_dir.display());
        app = app.nest_service("/files", ServeDir::new(root_dir));
    }

    let app = app.layer(cors_layer);

    let bind = format!("{}:{}", settings.host, settings.port);
    let listener = match TcpListener::bind(&bind).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Failed to bind {}: {}", bind, e);
            std::process::exit(1);
        }
    };

    println!("Server running on http://{}", bind);
    if let Err(e) = axum::serve(listener, app.into_make_service()).await {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}

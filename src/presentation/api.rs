use crate::application::roots::{prepare_root, RootEntry, RootPaths};
use crate::application::{
    FaceEngine, FaceModelHandle, FileScanner, FingerprintEngine, HlsDownloader, MoveCoordinator,
    RootManager, ScanReconciler, Settings, SocksDownloader, VideoEditor,
};
use crate::domain::{DomainError, MediaItem};
use crate::infrastructure::{CatalogStore, ThumbnailStore};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::Router;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

/// Everything that belongs to one active root. A root switch builds a fresh
/// Engine and swaps it in behind the state lock; old handles die with the
/// old Arc once in-flight requests drain.
pub struct Engine {
    pub root_entry: RootEntry,
    pub paths: RootPaths,
    pub catalog: Arc<CatalogStore>,
    pub thumbnails: Arc<ThumbnailStore>,
    pub scanner: FileScanner,
    pub reconciler: ScanReconciler,
    pub mover: MoveCoordinator,
    pub fingerprints: FingerprintEngine,
    pub faces: FaceEngine,
    pub editor: Arc<VideoEditor>,
    pub hls_downloads: Arc<HlsDownloader>,
    pub socks_downloads: Arc<SocksDownloader>,
}

impl Engine {
    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    /// Attach tags, actors, and face summaries to a batch of items.
    pub fn hydrate(&self, items: &mut [MediaItem]) -> Result<(), DomainError> {
        self.catalog.load_relations(items)?;
        let ids: Vec<i64> = items.iter().map(|m| m.id).collect();
        let faces = self.catalog.faces_for_videos(&ids)?;
        for item in items.iter_mut() {
            if let Some(summaries) = faces.get(&item.id) {
                item.faces = summaries.clone();
            }
        }
        Ok(())
    }

    pub fn get_item(&self, id: i64) -> Result<MediaItem, DomainError> {
        self.catalog
            .get_media(id)?
            .ok_or(DomainError::NotFound("Video"))
    }
}

pub fn build_engine(settings: &Settings, root_entry: &RootEntry) -> Result<Engine, DomainError> {
    let root = PathBuf::from(&root_entry.path);
    let paths = prepare_root(&root, settings.db_path_override.as_deref())?;

    let catalog = Arc::new(CatalogStore::open(&paths.catalog_db)?);
    let thumbnails = Arc::new(ThumbnailStore::open(&paths.thumbnails_db)?);
    let scanner = FileScanner::new(settings.excluded_folders.clone());

    let reconciler = ScanReconciler::new(
        catalog.clone(),
        thumbnails.clone(),
        scanner.clone(),
        paths.root.clone(),
    );
    let mover = MoveCoordinator::new(catalog.clone(), thumbnails.clone(), paths.root.clone());
    let fingerprints = FingerprintEngine::new(catalog.clone());
    let faces = FaceEngine::new(
        catalog.clone(),
        FaceModelHandle::new(
            settings.face_detect_model.clone(),
            settings.face_embed_model.clone(),
        ),
    );
    let editor = VideoEditor::new(paths.root.join("EDITED"))?;
    let hls_downloads = HlsDownloader::new(paths.root.join("DOWNLOADS"))?;
    let socks_downloads = SocksDownloader::new(paths.root.join("DOWNLOADS"))?;

    info!("Engine ready for root '{}' at {}", root_entry.name, root_entry.path);
    Ok(Engine {
        root_entry: root_entry.clone(),
        paths,
        catalog,
        thumbnails,
        scanner,
        reconciler,
        mover,
        fingerprints,
        faces,
        editor,
        hls_downloads,
        socks_downloads,
    })
}

#[derive(Clone)]
pub struct AppState {
    engine: Arc<RwLock<Arc<Engine>>>,
    pub roots: Arc<RootManager>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(engine: Engine, roots: Arc<RootManager>, settings: Arc<Settings>) -> AppState {
        AppState {
            engine: Arc::new(RwLock::new(Arc::new(engine))),
            roots,
            settings,
        }
    }

    /// Grab the current engine. The read lock is held only for the clone.
    pub async fn engine(&self) -> Arc<Engine> {
        self.engine.read().await.clone()
    }

    /// The root-switch barrier: hold the write lock (draining readers), build
    /// the replacement engine, swap. On failure the previous engine stays.
    pub async fn switch_root(&self, root_name: &str) -> Result<RootEntry, DomainError> {
        let mut guard = self.engine.write().await;
        let entry = self.roots.select(root_name)?;
        match build_engine(&self.settings, &entry) {
            Ok(engine) => {
                engine.faces.model.reset();
                *guard = Arc::new(engine);
                info!("Switched active root to '{}'", entry.name);
                Ok(entry)
            }
            Err(e) => {
                // Restore the previous selection; the old engine is untouched.
                let previous = guard.root_entry.name.clone();
                let _ = self.roots.select(&previous);
                error!("Root switch to '{}' failed: {}", root_name, e);
                Err(e)
            }
        }
    }
}

impl IntoResponse for DomainError {
    fn into_response(self) -> axum::response::Response {
        match &self {
            DomainError::NotFound(_)
            | DomainError::Conflict(_)
            | DomainError::InvalidInput(_)
            | DomainError::Forbidden(_) => {}
            DomainError::Dependency(e) => error!("Dependency error: {}", e),
            DomainError::Timeout(e) => error!("Timeout: {}", e),
            DomainError::Database(e) => error!("Database error: {}", e),
            DomainError::Io(e) => error!("IO error: {}", e),
        }

        let (status, message) = match self {
            DomainError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{} not found", what)),
            DomainError::Conflict(message) => (StatusCode::CONFLICT, message),
            DomainError::InvalidInput(message) => (StatusCode::BAD_REQUEST, message),
            DomainError::Forbidden(message) => (StatusCode::FORBIDDEN, message),
            DomainError::Dependency(message) | DomainError::Timeout(message) => {
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
            DomainError::Database(_) | DomainError::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };
        (status, Json(json!({ "detail": message }))).into_response()
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .merge(super::roots::router())
        .merge(super::scan::router())
        .merge(super::videos::router())
        .merge(super::tags::router())
        .merge(super::actors::router())
        .merge(super::search::router())
        .merge(super::thumbnails::router())
        .merge(super::fingerprints::router())
        .merge(super::faces::router())
        .merge(super::editor::router())
        .merge(super::downloads::router())
        .merge(super::groups::router())
        .with_state(state)
}

use crate::application::scanner::FileScanner;
use crate::domain::{DomainError, MediaItem, MediaType, ThumbnailState};
use crate::infrastructure::{ffmpeg, CatalogStore, ThumbnailStore};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Wall-clock budget for the smart-refresh thumbnail/metadata pass. Items
/// left over stay pending and generate on demand.
const REFRESH_BUDGET: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
pub struct ScanOutcome {
    pub folder: String,
    pub videos_found: usize,
    pub videos_deleted: usize,
    pub thumbnails_generated: usize,
    pub metadata_extracted: usize,
    pub scan_duration: f64,
}

/// Brings the catalog into agreement with the filesystem, one category at a
/// time. Editorial state never changes here; only filesystem-derived fields
/// move.
pub struct ScanReconciler {
    catalog: Arc<CatalogStore>,
    thumbnails: Arc<ThumbnailStore>,
    scanner: FileScanner,
    root: PathBuf,
}

impl ScanReconciler {
    pub fn new(
        catalog: Arc<CatalogStore>,
        thumbnails: Arc<ThumbnailStore>,
        scanner: FileScanner,
        root: PathBuf,
    ) -> ScanReconciler {
        ScanReconciler {
            catalog,
            thumbnails,
            scanner,
            root,
        }
    }

    fn folder_path(&self, folder_name: &str) -> Result<PathBuf, DomainError> {
        if folder_name.contains('/') || folder_name.contains('\\') {
            return Err(DomainError::InvalidInput(format!(
                "Invalid folder name: {}",
                folder_name
            )));
        }
        if self.scanner.should_exclude(folder_name) {
            return Err(DomainError::InvalidInput(format!(
                "Folder '{}' is excluded from scanning",
                folder_name
            )));
        }
        let path = self.root.join(folder_name);
        if !path.exists() {
            return Err(DomainError::NotFound("Folder"));
        }
        if !path.is_dir() {
            return Err(DomainError::InvalidInput(format!(
                "'{}' is not a directory",
                folder_name
            )));
        }
        Ok(path)
    }

    /// Fast folder scan: prune vanished rows in one bulk delete, upsert every
    /// disk file, stamp the cache-bust epoch, record scan status. No
    /// thumbnails, no metadata.
    pub fn scan_folder(&self, folder_name: &str) -> Result<ScanOutcome, DomainError> {
        let started = Instant::now();
        let folder = self.folder_path(folder_name)?;

        let disk_files = self.scanner.scan_category(&folder);
        let disk_paths: HashSet<&str> = disk_files.iter().map(|f| f.path.as_str()).collect();

        let existing = self.catalog.ids_and_paths_by_category(folder_name)?;
        let stale: Vec<i64> = existing
            .iter()
            .filter(|(_, path)| !disk_paths.contains(path.as_str()))
            .map(|(id, _)| *id)
            .collect();
        let deleted = self.catalog.delete_media_by_ids(&stale)?;
        if deleted > 0 {
            info!("Removed {} vanished items from {}", deleted, folder_name);
            self.catalog.recount_actor_links()?;
        }

        for file in &disk_files {
            self.catalog.upsert_scanned(file)?;
        }

        let scan_duration = started.elapsed().as_secs_f64();
        self.catalog
            .upsert_scan_status(folder_name, disk_files.len() as i64, scan_duration)?;

        Ok(ScanOutcome {
            folder: folder_name.to_string(),
            videos_found: disk_files.len(),
            videos_deleted: deleted,
            thumbnails_generated: 0,
            metadata_extracted: 0,
            scan_duration,
        })
    }

    /// Fast scan plus a budgeted thumbnail and metadata pass over items that
    /// still need either.
    pub async fn smart_refresh(&self, folder_name: &str) -> Result<ScanOutcome, DomainError> {
        let mut outcome = self.scan_folder(folder_name)?;
        let deadline = Instant::now() + REFRESH_BUDGET;

        let pending = self.catalog.media_needing_thumbnails(folder_name)?;
        for item in &pending {
            if Instant::now() >= deadline {
                info!(
                    "Refresh budget exhausted for {}; {} items left for on-demand generation",
                    folder_name,
                    pending.len() - outcome.thumbnails_generated
                );
                break;
            }
            match self.thumbnails.generate(&item.path, "00:00:01", false).await {
                Ok(()) => {
                    self.catalog.set_thumbnail_state(item.id, ThumbnailState::Ok)?;
                    outcome.thumbnails_generated += 1;
                }
                Err(e) => {
                    warn!("Thumbnail generation failed for {}: {}", item.path, e);
                    self.catalog
                        .set_thumbnail_state(item.id, ThumbnailState::Failed)?;
                }
            }
            if self.extract_missing_metadata(item).await? {
                outcome.metadata_extracted += 1;
            }
        }

        Ok(outcome)
    }

    /// Extract technical metadata when it is missing, committing per item so
    /// large folders never hold a long write.
    pub async fn extract_missing_metadata(&self, item: &MediaItem) -> Result<bool, DomainError> {
        match item.media_type {
            MediaType::Video if item.duration.is_none() => {
                if let Some(meta) = ffmpeg::probe_metadata(Path::new(&item.path)).await? {
                    self.catalog.update_technical(item.id, &meta)?;
                    return Ok(true);
                }
                Ok(false)
            }
            MediaType::Image if item.width.is_none() => {
                match image::image_dimensions(&item.path) {
                    Ok((w, h)) => {
                        self.catalog.update_technical(
                            item.id,
                            &crate::domain::MediaMetadata {
                                width: Some(w as i64),
                                height: Some(h as i64),
                                ..Default::default()
                            },
                        )?;
                        Ok(true)
                    }
                    Err(e) => {
                        warn!("Could not read dimensions of {}: {}", item.path, e);
                        Ok(false)
                    }
                }
            }
            _ => Ok(false),
        }
    }

    /// Insert or update a single file (used after an edit or download lands),
    /// with forced thumbnail generation and metadata extraction.
    pub async fn scan_single_file(&self, file_path: &str) -> Result<MediaItem, DomainError> {
        let path = Path::new(file_path);
        if !path.exists() {
            return Err(DomainError::NotFound("File"));
        }
        let relative = path
            .strip_prefix(&self.root)
            .map_err(|_| DomainError::InvalidInput("Path is outside the active root".to_string()))?;
        let components: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();

        let scanned = if components.len() <= 1 {
            self.scanner
                .scan_root_files(&self.root)
                .into_iter()
                .find(|f| f.path == file_path)
        } else {
            self.scanner
                .scan_category(&self.root.join(&components[0]))
                .into_iter()
                .find(|f| f.path == file_path)
        };
        let scanned = scanned.ok_or_else(|| {
            DomainError::InvalidInput(format!("Unsupported media file: {}", file_path))
        })?;

        let (id, created) = self.catalog.upsert_scanned(&scanned)?;
        let item = self
            .catalog
            .get_media(id)?
            .ok_or(DomainError::NotFound("Video"))?;

        self.extract_missing_metadata(&item).await?;
        match self.thumbnails.generate(&item.path, "00:00:01", true).await {
            Ok(()) => self.catalog.set_thumbnail_state(id, ThumbnailState::Ok)?,
            Err(e) => {
                warn!("Thumbnail generation failed for {}: {}", item.path, e);
                self.catalog.set_thumbnail_state(id, ThumbnailState::Failed)?;
            }
        }

        info!(
            "{} single file {}",
            if created { "Imported" } else { "Refreshed" },
            file_path
        );
        self.catalog
            .get_media(id)?
            .ok_or(DomainError::NotFound("Video"))
    }

    /// Root-wide prune: drop every row whose file no longer exists.
    pub fn prune_missing(&self) -> Result<usize, DomainError> {
        let all = self.catalog.all_ids_and_paths()?;
        let stale: Vec<i64> = all
            .iter()
            .filter(|(_, path)| !Path::new(path).exists())
            .map(|(id, _)| *id)
            .collect();
        let removed = self.catalog.delete_media_by_ids(&stale)?;
        if removed > 0 {
            info!("Pruned {} rows with missing files", removed);
            self.catalog.recount_actor_links()?;
        }
        Ok(removed)
    }

    /// Drop thumbnail rows whose path is no longer cataloged.
    pub fn cleanup_thumbnails(&self) -> Result<usize, DomainError> {
        let valid: HashSet<String> = self
            .catalog
            .all_ids_and_paths()?
            .into_iter()
            .map(|(_, path)| path)
            .collect();
        self.thumbnails.cleanup(&valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::catalog::TestDb;

    fn write_png(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let img = image::RgbImage::from_pixel(400, 200, image::Rgb([10, 200, 30]));
        img.save(path).unwrap();
    }

    fn write_stub(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"not really a video").unwrap();
    }

    fn reconciler(db: &TestDb, root: &Path) -> ScanReconciler {
        ScanReconciler::new(
            db.store.clone(),
            Arc::new(ThumbnailStore::open_temp().unwrap()),
            FileScanner::new(vec!["Temp".to_string()]),
            root.to_path_buf(),
        )
    }

    #[test]
    fn scan_reaches_catalog_disk_parity() {
        let dir = tempfile::tempdir().unwrap();
        let db = TestDb::new("reconcile_parity");
        let rec = reconciler(&db, dir.path());

        write_stub(&dir.path().join("A/one.mp4"));
        write_stub(&dir.path().join("A/nested/two.mkv"));
        write_stub(&dir.path().join("A/ignored.txt"));

        let outcome = rec.scan_folder("A").unwrap();
        assert_eq!(outcome.videos_found, 2);
        assert_eq!(outcome.videos_deleted, 0);

        let rows = db.store.ids_and_paths_by_category("A").unwrap();
        let db_paths: HashSet<String> = rows.into_iter().map(|(_, p)| p).collect();
        let disk_paths: HashSet<String> = [
            dir.path().join("A/one.mp4"),
            dir.path().join("A/nested/two.mkv"),
        ]
        .iter()
        .map(|p| p.to_string_lossy().to_string())
        .collect();
        assert_eq!(db_paths, disk_paths);

        // Deleting a file and rescanning prunes exactly that row.
        std::fs::remove_file(dir.path().join("A/one.mp4")).unwrap();
        let outcome = rec.scan_folder("A").unwrap();
        assert_eq!(outcome.videos_found, 1);
        assert_eq!(outcome.videos_deleted, 1);
        assert_eq!(db.store.ids_and_paths_by_category("A").unwrap().len(), 1);
    }

    #[test]
    fn rescan_preserves_editorial_fields() {
        let dir = tempfile::tempdir().unwrap();
        let db = TestDb::new("reconcile_editorial");
        let rec = reconciler(&db, dir.path());
        write_stub(&dir.path().join("A/one.mp4"));

        rec.scan_folder("A").unwrap();
        let (id, _) = db
            .store
            .ids_and_paths_by_category("A")
            .unwrap()
            .into_iter()
            .next()
            .unwrap();
        db.store
            .update_editorial(
                id,
                &crate::domain::EditorialUpdate {
                    rating: Some(5.0),
                    description: Some("pick of the litter".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        rec.scan_folder("A").unwrap();
        let item = db.store.get_media(id).unwrap().unwrap();
        assert_eq!(item.rating, Some(5.0));
        assert_eq!(item.description.as_deref(), Some("pick of the litter"));
    }

    #[test]
    fn scan_rejects_excluded_and_missing_folders() {
        let dir = tempfile::tempdir().unwrap();
        let db = TestDb::new("reconcile_guard");
        let rec = reconciler(&db, dir.path());

        assert!(matches!(rec.scan_folder("Temp"), Err(DomainError::InvalidInput(_))));
        assert!(matches!(rec.scan_folder("Nope"), Err(DomainError::NotFound(_))));
        assert!(matches!(rec.scan_folder("a/b"), Err(DomainError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn smart_refresh_generates_image_thumbnails() {
        let dir = tempfile::tempdir().unwrap();
        let db = TestDb::new("reconcile_refresh");
        let rec = reconciler(&db, dir.path());
        write_png(&dir.path().join("Pics/photo.png"));

        let outcome = rec.smart_refresh("Pics").await.unwrap();
        assert_eq!(outcome.videos_found, 1);
        assert_eq!(outcome.thumbnails_generated, 1);
        assert_eq!(outcome.metadata_extracted, 1);

        let (id, path) = db
            .store
            .ids_and_paths_by_category("Pics")
            .unwrap()
            .into_iter()
            .next()
            .unwrap();
        let item = db.store.get_media(id).unwrap().unwrap();
        assert_eq!(item.thumbnail_generated, ThumbnailState::Ok);
        assert_eq!(item.width, Some(400));
        assert!(rec.thumbnails.get(&path).unwrap().is_some());
    }

    #[tokio::test]
    async fn single_file_scan_imports_one_item() {
        let dir = tempfile::tempdir().unwrap();
        let db = TestDb::new("reconcile_single");
        let rec = reconciler(&db, dir.path());
        let path = dir.path().join("Pics/solo.png");
        write_png(&path);

        let item = rec.scan_single_file(&path.to_string_lossy()).await.unwrap();
        assert_eq!(item.category, "Pics");
        assert_eq!(item.thumbnail_generated, ThumbnailState::Ok);

        let outside = rec.scan_single_file("/definitely/elsewhere.png").await;
        assert!(outside.is_err());
    }

    #[test]
    fn prune_drops_rows_for_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let db = TestDb::new("reconcile_prune");
        let rec = reconciler(&db, dir.path());
        write_stub(&dir.path().join("A/one.mp4"));
        rec.scan_folder("A").unwrap();

        std::fs::remove_file(dir.path().join("A/one.mp4")).unwrap();
        assert_eq!(rec.prune_missing().unwrap(), 1);
        assert!(db.store.ids_and_paths_by_category("A").unwrap().is_empty());
    }
}

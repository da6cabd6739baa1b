use crate::domain::{DomainError, MediaItem};
use crate::infrastructure::{CatalogStore, ScanFields, ThumbnailStore};
use serde::Serialize;
use sha1::{Digest, Sha1};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Quarantine category for soft deletes. Hard deletes are only allowed from
/// here.
pub const DELETE_CATEGORY: &str = "DELETE";

/// Virtual category for files directly under the root.
pub const ROOT_CATEGORY: &str = "_root";

#[derive(Debug, Serialize)]
pub struct FolderRenameOutcome {
    pub old_category: String,
    pub new_category: String,
    pub videos_updated: usize,
    pub thumbnails_updated: usize,
}

/// Single entry point for any change to an item's on-disk location or name.
/// Sequence: filesystem rename, thumbnail rehash, catalog update; a catalog
/// failure after a successful rename attempts the reverse rename.
pub struct MoveCoordinator {
    catalog: Arc<CatalogStore>,
    thumbnails: Arc<ThumbnailStore>,
    root: PathBuf,
}

/// Build the 16-character identifier used by hash renames: hex nibbles 0-7,
/// then positions {2,4,6,10} forward and {10,6,4,2} reversed.
pub fn hash_identifier(sha1_hex: &str) -> String {
    let chars: Vec<char> = sha1_hex.chars().collect();
    let mut id = String::with_capacity(16);
    id.extend(&chars[0..4]);
    id.extend(&chars[4..8]);
    for &i in &[2usize, 4, 6, 10] {
        id.push(chars[i]);
    }
    for &i in &[10usize, 6, 4, 2] {
        id.push(chars[i]);
    }
    id
}

fn validate_subcategory(subcategory: &str) -> Result<Vec<String>, DomainError> {
    let parts: Vec<String> = subcategory
        .split(['/', '\\'])
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() || parts.iter().any(|p| p == "." || p == "..") {
        return Err(DomainError::InvalidInput("Invalid subcategory".to_string()));
    }
    Ok(parts)
}

impl MoveCoordinator {
    pub fn new(
        catalog: Arc<CatalogStore>,
        thumbnails: Arc<ThumbnailStore>,
        root: PathBuf,
    ) -> MoveCoordinator {
        MoveCoordinator {
            catalog,
            thumbnails,
            root,
        }
    }

    fn location_fields(
        &self,
        destination: &Path,
        category: &str,
        subcategory: Option<&str>,
    ) -> Result<ScanFields, DomainError> {
        let stat = destination.metadata()?;
        let relative = if category == ROOT_CATEGORY {
            destination
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
        } else {
            destination
                .strip_prefix(self.root.join(category))
                .ok()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
        };
        Ok(ScanFields {
            path: destination.to_string_lossy().to_string(),
            name: destination
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            category: category.to_string(),
            subcategory: subcategory.map(str::to_string),
            relative_path: relative,
            size: stat.len() as i64,
            modified: stat
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
            extension: destination
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
                .unwrap_or_default(),
        })
    }

    /// Move (and optionally rename) one item into a category/subcategory.
    pub fn move_media(
        &self,
        id: i64,
        target_category: &str,
        target_subcategory: Option<&str>,
        new_name: Option<&str>,
    ) -> Result<MediaItem, DomainError> {
        let item = self
            .catalog
            .get_media(id)?
            .ok_or(DomainError::NotFound("Video"))?;
        let source = PathBuf::from(&item.path);
        if !source.exists() {
            return Err(DomainError::NotFound("File"));
        }

        let target_category = target_category.trim();
        if target_category.is_empty()
            || (target_category != ROOT_CATEGORY
                && (target_category.contains('/') || target_category.contains('\\')))
        {
            return Err(DomainError::InvalidInput("Invalid target category".to_string()));
        }

        let mut dest_dir = if target_category == ROOT_CATEGORY {
            self.root.clone()
        } else {
            self.root.join(target_category)
        };
        let normalized_subcategory = match target_subcategory.filter(|s| !s.trim().is_empty()) {
            Some(sub) if target_category != ROOT_CATEGORY => {
                let parts = validate_subcategory(sub)?;
                for part in &parts {
                    dest_dir = dest_dir.join(part);
                }
                Some(parts.join("/"))
            }
            _ => None,
        };
        std::fs::create_dir_all(&dest_dir)?;

        let file_name = match new_name {
            Some(name) if !name.trim().is_empty() => {
                let name = name.trim();
                if Path::new(name).extension().is_some() {
                    name.to_string()
                } else {
                    // No extension supplied: inherit the source's.
                    format!(
                        "{}{}",
                        name,
                        source
                            .extension()
                            .map(|e| format!(".{}", e.to_string_lossy()))
                            .unwrap_or_default()
                    )
                }
            }
            _ => source
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
        };

        let destination = dest_dir.join(&file_name);
        if destination == source {
            return Ok(item);
        }
        if destination.exists() {
            return Err(DomainError::Conflict(
                "Destination file already exists".to_string(),
            ));
        }

        std::fs::rename(&source, &destination)
            .map_err(|e| DomainError::Io(format!("Filesystem move failed: {}", e)))?;

        if let Err(e) = self.thumbnails.rehash(&item.path, &destination.to_string_lossy()) {
            warn!("Thumbnail rehash failed for {}: {}", item.path, e);
        }

        let fields =
            self.location_fields(&destination, target_category, normalized_subcategory.as_deref());
        let update = fields.and_then(|f| self.catalog.update_location(id, &f));
        if let Err(e) = update {
            // Compensate: put the file back where it was.
            if let Err(revert) = std::fs::rename(&destination, &source) {
                error!("Could not revert move of {}: {}", item.path, revert);
            } else {
                let _ = self
                    .thumbnails
                    .rehash(&destination.to_string_lossy(), &item.path);
            }
            return Err(e);
        }

        info!("Moved {} -> {}", item.path, destination.display());
        self.catalog
            .get_media(id)?
            .ok_or(DomainError::NotFound("Video"))
    }

    /// Rename in place: same category and subcategory, new file name.
    pub fn rename_media(&self, id: i64, new_name: &str) -> Result<MediaItem, DomainError> {
        let item = self
            .catalog
            .get_media(id)?
            .ok_or(DomainError::NotFound("Video"))?;
        self.move_media(id, &item.category, item.subcategory.as_deref(), Some(new_name))
    }

    /// Content-derived rename: SHA-1 over the file, a deterministic 16-char
    /// identifier as the new stem, display name set to match.
    pub fn hash_rename(&self, id: i64) -> Result<(MediaItem, String), DomainError> {
        let item = self
            .catalog
            .get_media(id)?
            .ok_or(DomainError::NotFound("Video"))?;
        let source = PathBuf::from(&item.path);
        if !source.exists() {
            return Err(DomainError::NotFound("File"));
        }

        let mut hasher = Sha1::new();
        let mut file = std::fs::File::open(&source)?;
        let mut buffer = [0u8; 8192];
        loop {
            let read = file.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        let digest = hex::encode(hasher.finalize());
        let identifier = hash_identifier(&digest);

        let extension = source
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let new_name = format!("{}{}", identifier, extension);
        let destination = source.parent().unwrap_or(&self.root).join(&new_name);

        if destination == source {
            return Ok((item, identifier));
        }
        if destination.exists() {
            return Err(DomainError::Conflict(format!(
                "Target name already exists: {}",
                new_name
            )));
        }

        std::fs::rename(&source, &destination)
            .map_err(|e| DomainError::Io(format!("Filesystem rename failed: {}", e)))?;
        if let Err(e) = self.thumbnails.rehash(&item.path, &destination.to_string_lossy()) {
            warn!("Thumbnail rehash failed for {}: {}", item.path, e);
        }

        let fields = self.location_fields(
            &destination,
            &item.category,
            item.subcategory.as_deref(),
        );
        let update = fields.and_then(|f| self.catalog.update_location(id, &f)).and_then(|_| {
            self.catalog.update_editorial(
                id,
                &crate::domain::EditorialUpdate {
                    display_name: Some(identifier.clone()),
                    ..Default::default()
                },
            )
        });
        if let Err(e) = update {
            if std::fs::rename(&destination, &source).is_err() {
                error!("Could not revert hash rename of {}", item.path);
            }
            return Err(e);
        }

        let updated = self
            .catalog
            .get_media(id)?
            .ok_or(DomainError::NotFound("Video"))?;
        Ok((updated, identifier))
    }

    /// Rename a top-level category folder and rewrite every row in it.
    pub fn rename_folder(
        &self,
        old_name: &str,
        new_name: &str,
    ) -> Result<FolderRenameOutcome, DomainError> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(DomainError::InvalidInput("New folder name cannot be empty".to_string()));
        }
        const INVALID: [char; 9] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];
        if new_name.contains(INVALID) {
            return Err(DomainError::InvalidInput(
                "New folder name contains invalid characters".to_string(),
            ));
        }
        // Only top-level categories rename; subdirectories are refused.
        if old_name.contains(['/', '\\']) {
            return Err(DomainError::InvalidInput(
                "Only top-level categories can be renamed".to_string(),
            ));
        }

        let old_path = self.root.join(old_name);
        if !old_path.is_dir() {
            return Err(DomainError::NotFound("Folder"));
        }
        let new_path = self.root.join(new_name);
        if new_path.exists() {
            return Err(DomainError::Conflict(format!(
                "Destination folder already exists: {}",
                new_name
            )));
        }

        let rows = self.catalog.ids_and_paths_by_category(old_name)?;

        std::fs::rename(&old_path, &new_path)
            .map_err(|e| DomainError::Io(format!("Filesystem rename failed: {}", e)))?;

        let mut updated = 0;
        let mut rehashed = 0;
        let result: Result<(), DomainError> = (|| {
            for (id, old_item_path) in &rows {
                let suffix = Path::new(old_item_path)
                    .strip_prefix(&old_path)
                    .map_err(|_| {
                        DomainError::Database(format!("Row {} escaped its category", id))
                    })?
                    .to_path_buf();
                let new_item_path = new_path.join(&suffix);

                let item = self
                    .catalog
                    .get_media(*id)?
                    .ok_or(DomainError::NotFound("Video"))?;
                let fields = self.location_fields(
                    &new_item_path,
                    new_name,
                    item.subcategory.as_deref(),
                )?;
                self.catalog.update_location(*id, &fields)?;
                updated += 1;

                if self
                    .thumbnails
                    .rehash(old_item_path, &new_item_path.to_string_lossy())
                    .unwrap_or(false)
                {
                    rehashed += 1;
                }
            }
            self.catalog.rename_scan_status(old_name, new_name)?;
            Ok(())
        })();

        if let Err(e) = result {
            if std::fs::rename(&new_path, &old_path).is_err() {
                error!("Could not revert folder rename of {}", old_name);
            }
            return Err(e);
        }

        info!("Renamed folder {} -> {} ({} items)", old_name, new_name, updated);
        Ok(FolderRenameOutcome {
            old_category: old_name.to_string(),
            new_category: new_name.to_string(),
            videos_updated: updated,
            thumbnails_updated: rehashed,
        })
    }

    /// Soft delete: move into the quarantine category. Returns the item and
    /// its original category for undo UIs.
    pub fn soft_delete(&self, id: i64) -> Result<(MediaItem, String), DomainError> {
        let item = self
            .catalog
            .get_media(id)?
            .ok_or(DomainError::NotFound("Video"))?;
        let original_category = item.category.clone();
        if original_category == DELETE_CATEGORY {
            return Ok((item, original_category));
        }
        let moved = self.move_media(id, DELETE_CATEGORY, None, None)?;
        Ok((moved, original_category))
    }

    /// Hard delete: only allowed from the quarantine category. Removes the
    /// file and the row; cascades take fingerprints and links with it.
    pub fn permanent_delete(&self, id: i64) -> Result<(), DomainError> {
        let item = self
            .catalog
            .get_media(id)?
            .ok_or(DomainError::NotFound("Video"))?;
        if item.category != DELETE_CATEGORY {
            return Err(DomainError::Forbidden(format!(
                "Permanent delete requires the {} category",
                DELETE_CATEGORY
            )));
        }
        let path = Path::new(&item.path);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let _ = self.thumbnails.delete(&item.path);
        self.catalog.delete_media(id)?;
        self.catalog.recount_actor_links()?;
        info!("Permanently deleted {}", item.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DetectionMethod;
    use crate::infrastructure::catalog::TestDb;
    use crate::infrastructure::ThumbnailStore;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        db: TestDb,
        mover: MoveCoordinator,
    }

    fn fixture(prefix: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let db = TestDb::new(prefix);
        let mover = MoveCoordinator::new(
            db.store.clone(),
            Arc::new(ThumbnailStore::open_temp().unwrap()),
            root.clone(),
        );
        Fixture {
            _dir: dir,
            root,
            db,
            mover,
        }
    }

    fn seed_file(fixture: &Fixture, rel: &str, category: &str) -> i64 {
        let path = fixture.root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"media bytes").unwrap();
        let mut file =
            crate::infrastructure::catalog::test_scanned_file(&path.to_string_lossy(), category);
        file.relative_path = Path::new(rel)
            .strip_prefix(category)
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| file.name.clone());
        let (id, _) = fixture.db.store.upsert_scanned(&file).unwrap();
        id
    }

    #[test]
    fn hash_identifier_is_deterministic_permutation() {
        let digest = "0123456789abcdef0123456789abcdef01234567";
        let id = hash_identifier(digest);
        assert_eq!(id.len(), 16);
        assert_eq!(&id[0..8], "01234567");
        // Positions {2,4,6,10} then {10,6,4,2}.
        assert_eq!(&id[8..12], "246a");
        assert_eq!(&id[12..16], "a642");
        assert_eq!(id, hash_identifier(digest));
    }

    #[test]
    fn move_preserves_identity_and_relations() {
        let f = fixture("mover_identity");
        let id = seed_file(&f, "A/one.mp4", "A");
        f.db.store.add_tag_to_media(id, "keep").unwrap();
        let face = f.db.store.create_face("face-x", None).unwrap();
        f.db.store
            .add_encoding(face.id, Some(id), 0.0, "enc", None, None, None)
            .unwrap();
        f.db.store
            .upsert_video_face(id, face.id, DetectionMethod::ManualSearch)
            .unwrap();
        f.db.store.insert_fingerprint(id, 50, "00ff00ff00ff00ff").unwrap();

        // Pre-seed a thumbnail so the rehash has something to carry.
        let old_path = f.root.join("A/one.mp4").to_string_lossy().to_string();
        f.mover.thumbnails.store(&old_path, b"jpegish").unwrap();

        let moved = f.mover.move_media(id, "B", None, None).unwrap();
        assert_eq!(moved.id, id);
        assert_eq!(moved.category, "B");
        assert!(f.root.join("B/one.mp4").exists());
        assert!(!f.root.join("A/one.mp4").exists());

        let mut items = vec![moved];
        f.db.store.load_relations(&mut items).unwrap();
        assert_eq!(items[0].tags.len(), 1);
        assert_eq!(f.db.store.fingerprints_for(id).unwrap().len(), 1);
        assert_eq!(f.db.store.video_faces_for_face(face.id).unwrap().len(), 1);

        // Thumbnail travels with the rename.
        let new_path = f.root.join("B/one.mp4").to_string_lossy().to_string();
        assert_eq!(f.mover.thumbnails.get(&new_path).unwrap().unwrap(), b"jpegish");
        assert!(f.mover.thumbnails.get(&old_path).unwrap().is_none());
    }

    #[test]
    fn move_rejects_existing_destination() {
        let f = fixture("mover_conflict");
        let id = seed_file(&f, "A/one.mp4", "A");
        seed_file(&f, "B/one.mp4", "B");

        let err = f.mover.move_media(id, "B", None, None).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        // Source untouched.
        assert!(f.root.join("A/one.mp4").exists());
    }

    #[test]
    fn rename_inherits_extension() {
        let f = fixture("mover_rename");
        let id = seed_file(&f, "A/one.mp4", "A");
        let renamed = f.mover.rename_media(id, "fresh").unwrap();
        assert_eq!(renamed.name, "fresh.mp4");
        assert!(f.root.join("A/fresh.mp4").exists());
    }

    #[test]
    fn move_into_subcategory_creates_dirs() {
        let f = fixture("mover_subcat");
        let id = seed_file(&f, "A/one.mp4", "A");
        let moved = f.mover.move_media(id, "B", Some("Deep/Nest"), None).unwrap();
        assert_eq!(moved.subcategory.as_deref(), Some("Deep/Nest"));
        assert_eq!(moved.relative_path.as_deref(), Some("Deep/Nest/one.mp4"));
        assert!(f.root.join("B/Deep/Nest/one.mp4").exists());

        let err = f.mover.move_media(moved.id, "B", Some(".."), None).unwrap_err();
        assert!(matches!(err, DomainError::InvalidInput(_)));
    }

    #[test]
    fn soft_then_hard_delete_interlock() {
        let f = fixture("mover_delete");
        let id = seed_file(&f, "A/one.mp4", "A");
        f.db.store.insert_fingerprint(id, 50, "00ff00ff00ff00ff").unwrap();

        // Hard delete outside the quarantine is forbidden.
        let err = f.mover.permanent_delete(id).unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));

        let (moved, original) = f.mover.soft_delete(id).unwrap();
        assert_eq!(original, "A");
        assert_eq!(moved.category, DELETE_CATEGORY);
        assert!(f.root.join("DELETE/one.mp4").exists());

        f.mover.permanent_delete(id).unwrap();
        assert!(!f.root.join("DELETE/one.mp4").exists());
        assert!(f.db.store.get_media(id).unwrap().is_none());
        assert!(f.db.store.fingerprints_for(id).unwrap().is_empty());
    }

    #[test]
    fn hash_rename_sets_display_name() {
        let f = fixture("mover_hash");
        let id = seed_file(&f, "A/one.mp4", "A");
        let (renamed, identifier) = f.mover.hash_rename(id).unwrap();
        assert_eq!(identifier.len(), 16);
        assert_eq!(renamed.name, format!("{}.mp4", identifier));
        assert_eq!(renamed.display_name.as_deref(), Some(identifier.as_str()));
        assert!(f.root.join("A").join(format!("{}.mp4", identifier)).exists());

        // Renaming again is a no-op success (already at its hash name).
        let (again, id2) = f.mover.hash_rename(id).unwrap();
        assert_eq!(id2, identifier);
        assert_eq!(again.name, renamed.name);
    }

    #[test]
    fn folder_rename_rewrites_rows_and_thumbnails() {
        let f = fixture("mover_folder");
        let id1 = seed_file(&f, "Old/one.mp4", "Old");
        let id2 = seed_file(&f, "Old/nested/two.mp4", "Old");
        let old_nested = f.root.join("Old/nested/two.mp4").to_string_lossy().to_string();
        f.mover.thumbnails.store(&old_nested, b"thumb").unwrap();

        let outcome = f.mover.rename_folder("Old", "New").unwrap();
        assert_eq!(outcome.videos_updated, 2);
        assert_eq!(outcome.thumbnails_updated, 1);

        assert!(f.root.join("New/one.mp4").exists());
        let one = f.db.store.get_media(id1).unwrap().unwrap();
        assert_eq!(one.category, "New");
        let two = f.db.store.get_media(id2).unwrap().unwrap();
        assert!(two.path.contains("New/nested"));

        let new_nested = f.root.join("New/nested/two.mp4").to_string_lossy().to_string();
        assert!(f.mover.thumbnails.get(&new_nested).unwrap().is_some());

        let err = f.mover.rename_folder("New", "bad/name").unwrap_err();
        assert!(matches!(err, DomainError::InvalidInput(_)));
    }
}

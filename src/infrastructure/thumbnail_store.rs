use crate::domain::{now_epoch, DomainError};
use image::GenericImageView;
use md5::{Digest, Md5};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use tracing::{info, warn};

use super::ffmpeg;

const THUMBNAIL_EDGE: u32 = 320;
const JPEG_QUALITY: u8 = 85;

const IMAGE_EXTENSIONS: [&str; 5] = [".jpg", ".jpeg", ".png", ".gif", ".webp"];

/// Content-addressed JPEG store in its own SQLite file, keyed by the MD5 of
/// the owning file's absolute path. Renames rehash the key instead of
/// regenerating the image.
pub struct ThumbnailStore {
    conn: Mutex<Connection>,
}

pub fn path_hash(path: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(path.as_bytes());
    hex::encode(hasher.finalize())
}

impl ThumbnailStore {
    pub fn open(path: &Path) -> Result<Self, DomainError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| DomainError::Database(format!("Failed to open thumbnail db: {}", e)))?;
        let _: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |r| r.get(0))
            .unwrap_or_else(|_| "WAL".to_string());
        let _ = conn.execute("PRAGMA busy_timeout=30000", []);
        conn.execute(
            "CREATE TABLE IF NOT EXISTS thumbnails (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                video_path_hash TEXT NOT NULL UNIQUE,
                image_data BLOB NOT NULL,
                created_at REAL NOT NULL,
                file_size INTEGER NOT NULL,
                width INTEGER NOT NULL DEFAULT 320,
                height INTEGER
            )",
            [],
        )
        .map_err(|e| DomainError::Database(format!("Failed to create thumbnails table: {}", e)))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    #[cfg(test)]
    pub fn open_temp() -> Result<Self, DomainError> {
        let dir = std::env::temp_dir().join(format!("thumbs_{}.db", uuid::Uuid::new_v4()));
        Self::open(&dir)
    }

    pub fn get(&self, path: &str) -> Result<Option<Vec<u8>>, DomainError> {
        let conn = self.conn.lock().unwrap();
        let data = conn
            .query_row(
                "SELECT image_data FROM thumbnails WHERE video_path_hash = ?1",
                [path_hash(path)],
                |r| r.get(0),
            )
            .optional()?;
        Ok(data)
    }

    pub fn store(&self, path: &str, jpeg: &[u8]) -> Result<(), DomainError> {
        let (width, height) = image::load_from_memory(jpeg)
            .map(|img| {
                let (w, h) = img.dimensions();
                (w as i64, h as i64)
            })
            .unwrap_or((THUMBNAIL_EDGE as i64, 0));
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO thumbnails (video_path_hash, image_data, created_at, file_size, width, height)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(video_path_hash) DO UPDATE SET
                image_data = excluded.image_data,
                created_at = excluded.created_at,
                file_size = excluded.file_size,
                width = excluded.width,
                height = excluded.height",
            params![path_hash(path), jpeg, now_epoch(), jpeg.len() as i64, width, height],
        )?;
        Ok(())
    }

    pub fn delete(&self, path: &str) -> Result<bool, DomainError> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.execute(
            "DELETE FROM thumbnails WHERE video_path_hash = ?1",
            [path_hash(path)],
        )? > 0)
    }

    /// Re-key a row after a move or rename. Best-effort: a missing source row
    /// is reported, not an error.
    pub fn rehash(&self, old_path: &str, new_path: &str) -> Result<bool, DomainError> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE thumbnails SET video_path_hash = ?2 WHERE video_path_hash = ?1",
            params![path_hash(old_path), path_hash(new_path)],
        )?;
        if updated == 0 {
            warn!("No thumbnail to rehash for {}", old_path);
        }
        Ok(updated > 0)
    }

    /// Drop rows whose key does not correspond to any live path.
    pub fn cleanup(&self, valid_paths: &HashSet<String>) -> Result<usize, DomainError> {
        let valid_hashes: HashSet<String> = valid_paths.iter().map(|p| path_hash(p)).collect();
        let conn = self.conn.lock().unwrap();
        let all_hashes: Vec<String> = {
            let mut stmt = conn.prepare("SELECT video_path_hash FROM thumbnails")?;
            let rows = stmt.query_map([], |r| r.get(0))?;
            rows.filter_map(|r| r.ok()).collect()
        };
        let mut removed = 0;
        for hash in all_hashes {
            if !valid_hashes.contains(&hash) {
                removed += conn.execute(
                    "DELETE FROM thumbnails WHERE video_path_hash = ?1",
                    [&hash],
                )?;
            }
        }
        if removed > 0 {
            info!("Removed {} orphaned thumbnails", removed);
        }
        Ok(removed)
    }

    /// (row count, total stored bytes)
    pub fn stats(&self) -> Result<(i64, i64), DomainError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(file_size), 0) FROM thumbnails",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(DomainError::from)
    }

    /// Generate and store a thumbnail. Videos go through ffmpeg; images are
    /// decoded and resized directly (first frame for animated formats).
    pub async fn generate(
        &self,
        path: &str,
        timestamp: &str,
        force: bool,
    ) -> Result<(), DomainError> {
        let file = Path::new(path);
        if !file.exists() {
            return Err(DomainError::NotFound("File"));
        }

        let extension = file
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();
        if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
            return self.store_image_thumbnail(path);
        }

        if !force && self.get(path)?.is_some() {
            return Ok(());
        }

        let frame = ffmpeg::extract_frame_at(file, timestamp)
            .await?
            .ok_or_else(|| {
                DomainError::Dependency(format!("Could not extract a frame from {}", path))
            })?;
        self.store(path, &frame)
    }

    /// Resize an on-disk image to the thumbnail edge and re-encode as JPEG.
    pub fn store_image_thumbnail(&self, path: &str) -> Result<(), DomainError> {
        let img = image::open(path)
            .map_err(|e| DomainError::Io(format!("Failed to decode image {}: {}", path, e)))?;
        let (w, h) = img.dimensions();
        let resized = if w.max(h) > THUMBNAIL_EDGE {
            img.thumbnail(THUMBNAIL_EDGE, THUMBNAIL_EDGE)
        } else {
            img
        };

        let mut jpeg: Vec<u8> = Vec::new();
        let encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY);
        resized
            .to_rgb8()
            .write_with_encoder(encoder)
            .map_err(|e| DomainError::Io(format!("Failed to encode thumbnail: {}", e)))?;
        self.store(path, &jpeg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_jpeg() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(64, 32, image::Rgb([200, 40, 40]));
        let mut jpeg = Vec::new();
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 85);
        img.write_with_encoder(encoder).unwrap();
        jpeg
    }

    #[test]
    fn path_hash_is_md5_hex() {
        let hash = path_hash("/root/A/one.mp4");
        assert_eq!(hash.len(), 32);
        assert_eq!(hash, path_hash("/root/A/one.mp4"));
        assert_ne!(hash, path_hash("/root/A/two.mp4"));
    }

    #[test]
    fn store_get_roundtrip_and_overwrite() {
        let store = ThumbnailStore::open_temp().unwrap();
        let jpeg = sample_jpeg();
        store.store("/root/A/one.mp4", &jpeg).unwrap();
        assert_eq!(store.get("/root/A/one.mp4").unwrap().unwrap(), jpeg);

        let jpeg2 = {
            let img = image::RgbImage::from_pixel(16, 16, image::Rgb([0, 0, 255]));
            let mut out = Vec::new();
            let enc = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 85);
            img.write_with_encoder(enc).unwrap();
            out
        };
        store.store("/root/A/one.mp4", &jpeg2).unwrap();
        assert_eq!(store.get("/root/A/one.mp4").unwrap().unwrap(), jpeg2);
        assert_eq!(store.stats().unwrap().0, 1);
    }

    #[test]
    fn rehash_moves_the_row() {
        let store = ThumbnailStore::open_temp().unwrap();
        let jpeg = sample_jpeg();
        store.store("/root/A/one.mp4", &jpeg).unwrap();

        assert!(store.rehash("/root/A/one.mp4", "/root/B/one.mp4").unwrap());
        assert!(store.get("/root/A/one.mp4").unwrap().is_none());
        assert_eq!(store.get("/root/B/one.mp4").unwrap().unwrap(), jpeg);

        // Missing source is reported but not an error.
        assert!(!store.rehash("/root/A/ghost.mp4", "/root/B/ghost.mp4").unwrap());
    }

    #[test]
    fn cleanup_removes_only_orphans() {
        let store = ThumbnailStore::open_temp().unwrap();
        let jpeg = sample_jpeg();
        store.store("/root/A/keep.mp4", &jpeg).unwrap();
        store.store("/root/A/gone.mp4", &jpeg).unwrap();

        let valid: HashSet<String> = ["/root/A/keep.mp4".to_string()].into_iter().collect();
        assert_eq!(store.cleanup(&valid).unwrap(), 1);
        assert!(store.get("/root/A/keep.mp4").unwrap().is_some());
        assert!(store.get("/root/A/gone.mp4").unwrap().is_none());
    }
}

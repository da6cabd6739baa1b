mod actors;
mod faces;
mod fingerprints;
mod groups;
mod media;
mod tags;

pub use faces::AddEncodingOutcome;
pub use media::ScanFields;

use crate::domain::DomainError;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Condvar, Mutex};
use tracing::info;

const POOL_SIZE: usize = 4;

/// Relational catalog over a single SQLite file. Connections use WAL with a
/// generous busy timeout, so writes from any pooled connection serialize at
/// the SQLite level while reads stay concurrent.
pub struct CatalogStore {
    pool: Mutex<Vec<Connection>>,
    available: Condvar,
}

impl CatalogStore {
    pub fn open(path: &Path) -> Result<Self, DomainError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open_at(&path.to_string_lossy())
    }

    fn open_at(path: &str) -> Result<Self, DomainError> {
        info!("Opening catalog at {}", path);
        let conn = Self::open_conn(path)?;

        create_schema(&conn)?;
        migrate(&conn)?;

        let mut connections = vec![conn];
        for _ in 1..POOL_SIZE {
            connections.push(Self::open_conn(path)?);
        }

        Ok(Self {
            pool: Mutex::new(connections),
            available: Condvar::new(),
        })
    }

    fn open_conn(path: &str) -> Result<Connection, DomainError> {
        let conn = Connection::open(path)
            .map_err(|e| DomainError::Database(format!("Failed to open connection: {}", e)))?;

        let _: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |r| r.get(0))
            .unwrap_or_else(|_| "WAL".to_string());
        let _: i64 = conn
            .query_row("PRAGMA busy_timeout=30000", [], |r| r.get(0))
            .unwrap_or(30000);
        let _ = conn.execute("PRAGMA synchronous=NORMAL", []);
        // Required for the ON DELETE CASCADE / SET NULL contracts.
        let _ = conn.execute_batch("PRAGMA foreign_keys=ON");

        Ok(conn)
    }

    pub(crate) fn with_conn<T, F>(&self, f: F) -> Result<T, DomainError>
    where
        F: FnOnce(&mut Connection) -> Result<T, DomainError>,
    {
        let mut conn = {
            let mut pool = self.pool.lock().unwrap();
            loop {
                if let Some(conn) = pool.pop() {
                    break conn;
                }
                pool = self.available.wait(pool).unwrap();
            }
        };

        let result = f(&mut conn);

        self.pool.lock().unwrap().push(conn);
        self.available.notify_one();

        result
    }
}

fn create_schema(conn: &Connection) -> Result<(), DomainError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS videos (
            id INTEGER PRIMARY KEY,
            path TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            display_name TEXT,
            description TEXT,
            category TEXT NOT NULL,
            subcategory TEXT,
            relative_path TEXT,
            size INTEGER NOT NULL DEFAULT 0,
            modified REAL NOT NULL DEFAULT 0,
            extension TEXT NOT NULL DEFAULT '',
            media_type TEXT NOT NULL DEFAULT 'video',
            thumbnail_url TEXT,
            thumbnail_generated INTEGER NOT NULL DEFAULT 0,
            thumbnail_updated_at INTEGER NOT NULL DEFAULT 0,
            duration REAL,
            width INTEGER,
            height INTEGER,
            codec TEXT,
            bitrate INTEGER,
            fps REAL,
            fingerprint_generated INTEGER NOT NULL DEFAULT 0,
            fingerprinted_at REAL,
            series TEXT,
            season INTEGER,
            episode TEXT,
            year INTEGER,
            channel TEXT,
            rating REAL,
            favorite INTEGER NOT NULL DEFAULT 0,
            is_final INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS tags (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            color TEXT NOT NULL DEFAULT '#3b82f6'
        );

        CREATE TABLE IF NOT EXISTS video_tags (
            video_id INTEGER NOT NULL REFERENCES videos(id) ON DELETE CASCADE,
            tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
            PRIMARY KEY (video_id, tag_id)
        );

        CREATE TABLE IF NOT EXISTS actors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE COLLATE NOCASE,
            notes TEXT,
            video_count INTEGER NOT NULL DEFAULT 0,
            created_at REAL
        );

        CREATE TABLE IF NOT EXISTS video_actors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            video_id INTEGER NOT NULL REFERENCES videos(id) ON DELETE CASCADE,
            actor_id INTEGER NOT NULL REFERENCES actors(id) ON DELETE CASCADE,
            created_at REAL,
            UNIQUE (video_id, actor_id)
        );

        CREATE TABLE IF NOT EXISTS video_fingerprints (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            video_id INTEGER NOT NULL REFERENCES videos(id) ON DELETE CASCADE,
            frame_position INTEGER NOT NULL,
            phash TEXT NOT NULL,
            created_at REAL
        );

        CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            path TEXT NOT NULL,
            description TEXT
        );

        CREATE TABLE IF NOT EXISTS folder_scan_status (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            folder_name TEXT NOT NULL UNIQUE,
            last_scanned REAL,
            video_count INTEGER NOT NULL DEFAULT 0,
            scan_duration REAL,
            is_scanned INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS face_ids (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            actor_id INTEGER REFERENCES actors(id),
            primary_encoding_id INTEGER,
            encoding_count INTEGER NOT NULL DEFAULT 0,
            created_at REAL,
            updated_at REAL
        );

        CREATE TABLE IF NOT EXISTS face_encodings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            face_id INTEGER NOT NULL REFERENCES face_ids(id) ON DELETE CASCADE,
            video_id INTEGER REFERENCES videos(id) ON DELETE SET NULL,
            frame_timestamp REAL NOT NULL,
            encoding TEXT NOT NULL,
            thumbnail TEXT,
            confidence REAL,
            quality_score REAL,
            created_at REAL
        );

        CREATE TABLE IF NOT EXISTS video_faces (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            video_id INTEGER NOT NULL REFERENCES videos(id) ON DELETE CASCADE,
            face_id INTEGER NOT NULL REFERENCES face_ids(id) ON DELETE CASCADE,
            first_detected_at REAL,
            detection_method TEXT NOT NULL DEFAULT 'manual_search',
            appearance_count INTEGER NOT NULL DEFAULT 1,
            created_at REAL,
            UNIQUE (video_id, face_id)
        );

        CREATE TABLE IF NOT EXISTS folder_groups (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            folders TEXT NOT NULL,
            icon TEXT NOT NULL DEFAULT '📁',
            color TEXT NOT NULL DEFAULT '#f3f4f6',
            is_system INTEGER NOT NULL DEFAULT 0,
            position INTEGER NOT NULL DEFAULT 0,
            created_at REAL,
            updated_at REAL
        );

        CREATE INDEX IF NOT EXISTS idx_category_subcategory ON videos(category, subcategory);
        CREATE INDEX IF NOT EXISTS idx_media_type ON videos(media_type);
        CREATE INDEX IF NOT EXISTS idx_thumbnail_generated ON videos(thumbnail_generated);
        CREATE INDEX IF NOT EXISTS idx_modified ON videos(modified);
        CREATE INDEX IF NOT EXISTS idx_fingerprint_generated ON videos(fingerprint_generated);
        CREATE INDEX IF NOT EXISTS idx_series_season ON videos(series, season);
        CREATE INDEX IF NOT EXISTS idx_year ON videos(year);
        CREATE INDEX IF NOT EXISTS idx_favorite ON videos(favorite);
        CREATE INDEX IF NOT EXISTS idx_is_final ON videos(is_final);
        CREATE INDEX IF NOT EXISTS idx_actor_name ON actors(name);
        CREATE INDEX IF NOT EXISTS idx_fingerprints_video ON video_fingerprints(video_id);
        CREATE INDEX IF NOT EXISTS idx_fingerprints_phash ON video_fingerprints(phash);
        CREATE INDEX IF NOT EXISTS idx_face_name ON face_ids(name);
        CREATE INDEX IF NOT EXISTS idx_face_actor ON face_ids(actor_id);
        CREATE INDEX IF NOT EXISTS idx_encoding_face ON face_encodings(face_id);
        CREATE INDEX IF NOT EXISTS idx_encoding_video ON face_encodings(video_id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_video_face_unique ON video_faces(video_id, face_id);
        CREATE INDEX IF NOT EXISTS idx_video_faces_video ON video_faces(video_id);
        CREATE INDEX IF NOT EXISTS idx_video_faces_face ON video_faces(face_id);
        CREATE INDEX IF NOT EXISTS idx_folder_group_name ON folder_groups(name);",
    )
    .map_err(|e| DomainError::Database(format!("Failed to create schema: {}", e)))?;
    Ok(())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> bool {
    conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM pragma_table_info('{}') WHERE name = ?1",
            table
        ),
        [column],
        |row| row.get::<_, i64>(0),
    )
    .unwrap_or(0)
        > 0
}

/// Additive migration for databases created by older builds. Columns are only
/// ever added, never dropped; the one structural rewrite (making
/// `face_encodings.video_id` nullable) copies the table behind a temporary
/// name and swaps it in, preserving every row.
fn migrate(conn: &Connection) -> Result<(), DomainError> {
    let video_columns: [(&str, &str); 12] = [
        ("media_type", "TEXT NOT NULL DEFAULT 'video'"),
        ("thumbnail_url", "TEXT"),
        ("thumbnail_generated", "INTEGER NOT NULL DEFAULT 0"),
        ("thumbnail_updated_at", "INTEGER NOT NULL DEFAULT 0"),
        ("fingerprint_generated", "INTEGER NOT NULL DEFAULT 0"),
        ("fingerprinted_at", "REAL"),
        ("series", "TEXT"),
        ("season", "INTEGER"),
        ("episode", "TEXT"),
        ("year", "INTEGER"),
        ("channel", "TEXT"),
        ("rating", "REAL"),
    ];
    for (name, decl) in video_columns {
        if !column_exists(conn, "videos", name) {
            info!("Adding {} column to videos", name);
            let _ = conn.execute(&format!("ALTER TABLE videos ADD COLUMN {} {}", name, decl), []);
        }
    }

    if !column_exists(conn, "videos", "display_name") {
        info!("Adding display_name column to videos");
        let _ = conn.execute("ALTER TABLE videos ADD COLUMN display_name TEXT", []);
        // Backfill from the filename, extension stripped.
        let _ = conn.execute(
            "UPDATE videos
             SET display_name = CASE
                 WHEN instr(name, '.') > 0 THEN substr(name, 1, instr(name, '.') - 1)
                 ELSE name
             END
             WHERE display_name IS NULL",
            [],
        );
    }

    if !column_exists(conn, "face_ids", "primary_encoding_id") {
        info!("Adding primary_encoding_id column to face_ids");
        let _ = conn.execute(
            "ALTER TABLE face_ids ADD COLUMN primary_encoding_id INTEGER",
            [],
        );
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_face_primary_encoding ON face_ids(primary_encoding_id)",
            [],
        );
    }

    if !column_exists(conn, "folder_groups", "position") {
        info!("Adding position column to folder_groups");
        let _ = conn.execute(
            "ALTER TABLE folder_groups ADD COLUMN position INTEGER NOT NULL DEFAULT 0",
            [],
        );
        let _ = conn.execute(
            "UPDATE folder_groups
             SET position = (
                 SELECT COUNT(*) FROM folder_groups AS fg2
                 WHERE fg2.rowid <= folder_groups.rowid
             ) - 1",
            [],
        );
    }

    migrate_nullable_encoding_source(conn)?;
    repair_media_types(conn)?;

    Ok(())
}

/// Older schemas declared `face_encodings.video_id INTEGER NOT NULL`, which
/// destroyed encodings together with their source video. SQLite cannot relax
/// a NOT NULL in place, so the table is rebuilt and swapped.
fn migrate_nullable_encoding_source(conn: &Connection) -> Result<(), DomainError> {
    let sql: Option<String> = conn
        .query_row(
            "SELECT sql FROM sqlite_master WHERE type='table' AND name='face_encodings'",
            [],
            |row| row.get(0),
        )
        .ok();

    let needs_rewrite = sql
        .map(|s| s.contains("video_id INTEGER NOT NULL"))
        .unwrap_or(false);
    if !needs_rewrite {
        return Ok(());
    }

    info!("Rewriting face_encodings so video_id may be null");
    // Encodings may reference videos that vanished under the old NOT NULL
    // schema; the copy must not trip over them.
    conn.execute_batch(
        "PRAGMA foreign_keys=OFF;
        CREATE TABLE face_encodings_new (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            face_id INTEGER NOT NULL REFERENCES face_ids(id) ON DELETE CASCADE,
            video_id INTEGER REFERENCES videos(id) ON DELETE SET NULL,
            frame_timestamp REAL NOT NULL,
            encoding TEXT NOT NULL,
            thumbnail TEXT,
            confidence REAL,
            quality_score REAL,
            created_at REAL
        );
        INSERT INTO face_encodings_new SELECT * FROM face_encodings;
        DROP TABLE face_encodings;
        ALTER TABLE face_encodings_new RENAME TO face_encodings;
        CREATE INDEX IF NOT EXISTS idx_encoding_face ON face_encodings(face_id);
        CREATE INDEX IF NOT EXISTS idx_encoding_video ON face_encodings(video_id);
        PRAGMA foreign_keys=ON;",
    )
    .map_err(|e| DomainError::Database(format!("face_encodings migration failed: {}", e)))?;
    Ok(())
}

/// Rows written before image support landed are all typed 'video'. The
/// extension is authoritative, so reclassify from it.
fn repair_media_types(conn: &Connection) -> Result<(), DomainError> {
    let fixed = conn.execute(
        "UPDATE videos SET media_type = 'image'
         WHERE extension IN ('.jpg', '.jpeg', '.png', '.gif', '.webp')
           AND media_type != 'image'",
        [],
    )?;
    let fixed = fixed
        + conn.execute(
            "UPDATE videos SET media_type = 'video'
             WHERE extension IN ('.mp4', '.mov', '.avi', '.mkv', '.wmv', '.flv', '.webm')
               AND media_type != 'video'",
            [],
        )?;
    if fixed > 0 {
        info!("Reclassified media_type on {} rows", fixed);
    }
    Ok(())
}

/// A synthetic scanner descriptor for tests that need catalog rows without
/// touching the filesystem.
#[cfg(test)]
pub(crate) fn test_scanned_file(path: &str, category: &str) -> crate::domain::ScannedFile {
    let name = path.rsplit('/').next().unwrap().to_string();
    crate::domain::ScannedFile {
        path: path.to_string(),
        name: name.clone(),
        size: 1024,
        modified: 1_700_000_000.0,
        extension: ".mp4".to_string(),
        media_type: crate::domain::MediaType::Video,
        category: category.to_string(),
        subcategory: None,
        relative_path: name,
        breadcrumbs: vec![category.to_string()],
    }
}

/// RAII guard for test databases. Creates the DB in the system temp directory
/// and deletes it when dropped (even if the test panics).
#[cfg(test)]
pub(crate) struct TestDb {
    pub path: String,
    pub store: std::sync::Arc<CatalogStore>,
}

#[cfg(test)]
impl TestDb {
    pub fn new(prefix: &str) -> Self {
        let path = std::env::temp_dir()
            .join(format!("{}_{}.db", prefix, uuid::Uuid::new_v4()))
            .to_string_lossy()
            .to_string();
        let store = std::sync::Arc::new(CatalogStore::open_at(&path).unwrap());
        Self { path, store }
    }
}

#[cfg(test)]
impl Drop for TestDb {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent() {
        let db = TestDb::new("catalog_schema");
        db.store
            .with_conn(|conn| {
                create_schema(conn)?;
                migrate(conn)?;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn legacy_encoding_table_is_rewritten() {
        let path = std::env::temp_dir()
            .join(format!("catalog_legacy_{}.db", uuid::Uuid::new_v4()))
            .to_string_lossy()
            .to_string();

        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE face_ids (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    actor_id INTEGER,
                    encoding_count INTEGER NOT NULL DEFAULT 0,
                    created_at REAL,
                    updated_at REAL
                );
                CREATE TABLE face_encodings (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    face_id INTEGER NOT NULL,
                    video_id INTEGER NOT NULL,
                    frame_timestamp REAL NOT NULL,
                    encoding TEXT NOT NULL,
                    thumbnail TEXT,
                    confidence REAL,
                    quality_score REAL,
                    created_at REAL
                );
                INSERT INTO face_ids (name, created_at, updated_at) VALUES ('face-a1b2c3', 1.0, 1.0);
                INSERT INTO face_encodings
                    (face_id, video_id, frame_timestamp, encoding, created_at)
                    VALUES (1, 42, 0.0, 'AAAA', 1.0);",
            )
            .unwrap();
        }

        let store = CatalogStore::open_at(&path).unwrap();
        store
            .with_conn(|conn| {
                let sql: String = conn
                    .query_row(
                        "SELECT sql FROM sqlite_master WHERE type='table' AND name='face_encodings'",
                        [],
                        |row| row.get(0),
                    )
                    .unwrap();
                assert!(!sql.contains("video_id INTEGER NOT NULL"));
                let kept: i64 = conn
                    .query_row("SELECT COUNT(*) FROM face_encodings", [], |r| r.get(0))
                    .unwrap();
                assert_eq!(kept, 1);
                Ok(())
            })
            .unwrap();

        drop(store);
        let _ = std::fs::remove_file(&path);
    }
}

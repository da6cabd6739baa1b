use crate::domain::{
    now_epoch, DomainError, EditorialUpdate, MediaItem, MediaMetadata, MediaType, ScannedFile,
    SearchFilter, ThumbnailState,
};
use rusqlite::{params, params_from_iter, Connection, Row};

use super::CatalogStore;

const MEDIA_COLUMNS: &str = "id, path, name, display_name, description, category, subcategory, \
     relative_path, size, modified, extension, media_type, thumbnail_url, thumbnail_generated, \
     thumbnail_updated_at, duration, width, height, codec, bitrate, fps, fingerprint_generated, \
     fingerprinted_at, series, season, episode, year, channel, rating, favorite, is_final";

pub(crate) fn row_to_media_item(row: &Row) -> rusqlite::Result<MediaItem> {
    Ok(MediaItem {
        id: row.get(0)?,
        path: row.get(1)?,
        name: row.get(2)?,
        display_name: row.get(3)?,
        description: row.get(4)?,
        category: row.get(5)?,
        subcategory: row.get(6)?,
        relative_path: row.get(7)?,
        size: row.get(8)?,
        modified: row.get(9)?,
        extension: row.get(10)?,
        media_type: MediaType::from_str(&row.get::<_, String>(11)?),
        thumbnail_url: row.get(12)?,
        thumbnail_generated: ThumbnailState::from_i64(row.get(13)?),
        thumbnail_updated_at: row.get(14)?,
        duration: row.get(15)?,
        width: row.get(16)?,
        height: row.get(17)?,
        codec: row.get(18)?,
        bitrate: row.get(19)?,
        fps: row.get(20)?,
        fingerprint_generated: row.get::<_, i64>(21)? != 0,
        fingerprinted_at: row.get(22)?,
        series: row.get(23)?,
        season: row.get(24)?,
        episode: row.get(25)?,
        year: row.get(26)?,
        channel: row.get(27)?,
        rating: row.get(28)?,
        favorite: row.get::<_, i64>(29)? != 0,
        is_final: row.get::<_, i64>(30)? != 0,
        tags: Vec::new(),
        actors: Vec::new(),
        faces: Vec::new(),
    })
}

/// Location fields rewritten by the move coordinator. Everything else on the
/// row is left alone so user edits survive moves.
#[derive(Debug, Clone)]
pub struct ScanFields {
    pub path: String,
    pub name: String,
    pub category: String,
    pub subcategory: Option<String>,
    pub relative_path: Option<String>,
    pub size: i64,
    pub modified: f64,
    pub extension: String,
}

impl CatalogStore {
    /// Reconciler upsert. Touches only filesystem-derived fields on existing
    /// rows; editorial fields are never overwritten by a rescan.
    /// Returns (id, created).
    pub fn upsert_scanned(&self, file: &ScannedFile) -> Result<(i64, bool), DomainError> {
        let now = now_epoch() as i64;
        self.with_conn(|conn| {
            let existing: Option<i64> = conn
                .query_row("SELECT id FROM videos WHERE path = ?1", [&file.path], |r| {
                    r.get(0)
                })
                .ok();

            if let Some(id) = existing {
                conn.execute(
                    "UPDATE videos SET name = ?2, size = ?3, modified = ?4, extension = ?5,
                        media_type = ?6, category = ?7, subcategory = ?8, relative_path = ?9,
                        thumbnail_updated_at = ?10
                     WHERE id = ?1",
                    params![
                        id,
                        file.name,
                        file.size,
                        file.modified,
                        file.extension,
                        file.media_type.as_str(),
                        file.category,
                        file.subcategory,
                        file.relative_path,
                        now,
                    ],
                )?;
                return Ok((id, false));
            }

            let stem = file
                .name
                .rsplit_once('.')
                .map(|(s, _)| s.to_string())
                .unwrap_or_else(|| file.name.clone());
            conn.execute(
                "INSERT INTO videos (path, name, display_name, description, category, subcategory,
                    relative_path, size, modified, extension, media_type, thumbnail_updated_at)
                 VALUES (?1, ?2, ?3, '', ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    file.path,
                    file.name,
                    stem,
                    file.category,
                    file.subcategory,
                    file.relative_path,
                    file.size,
                    file.modified,
                    file.extension,
                    file.media_type.as_str(),
                    now,
                ],
            )?;
            let id = conn.last_insert_rowid();
            conn.execute(
                "UPDATE videos SET thumbnail_url = ?2 WHERE id = ?1",
                params![id, format!("/api/thumbnails/{}", id)],
            )?;
            Ok((id, true))
        })
    }

    pub fn get_media(&self, id: i64) -> Result<Option<MediaItem>, DomainError> {
        self.with_conn(|conn| {
            let item = conn
                .query_row(
                    &format!("SELECT {} FROM videos WHERE id = ?1", MEDIA_COLUMNS),
                    [id],
                    row_to_media_item,
                )
                .ok();
            Ok(item)
        })
    }

    pub fn get_media_many(&self, ids: &[i64]) -> Result<Vec<MediaItem>, DomainError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.with_conn(|conn| {
            let placeholders = vec!["?"; ids.len()].join(",");
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM videos WHERE id IN ({})",
                MEDIA_COLUMNS, placeholders
            ))?;
            let rows = stmt.query_map(params_from_iter(ids.iter()), row_to_media_item)?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        })
    }

    /// Attach tags and actors to each item, in two bulk queries.
    pub fn load_relations(&self, items: &mut [MediaItem]) -> Result<(), DomainError> {
        let ids: Vec<i64> = items.iter().map(|m| m.id).collect();
        let tags = self.tags_for_media_bulk(&ids)?;
        let actors = self.actors_for_media_bulk(&ids)?;
        for item in items.iter_mut() {
            if let Some(t) = tags.get(&item.id) {
                item.tags = t.clone();
            }
            if let Some(a) = actors.get(&item.id) {
                item.actors = a.clone();
            }
        }
        Ok(())
    }

    pub fn list_by_category(
        &self,
        category: &str,
        media_type: Option<MediaType>,
    ) -> Result<Vec<MediaItem>, DomainError> {
        self.with_conn(|conn| {
            let mut sql = format!(
                "SELECT {} FROM videos WHERE category = ?1",
                MEDIA_COLUMNS
            );
            let mut args: Vec<Box<dyn rusqlite::types::ToSql>> =
                vec![Box::new(category.to_string())];
            if let Some(mt) = media_type {
                sql.push_str(" AND media_type = ?2");
                args.push(Box::new(mt.as_str().to_string()));
            }
            sql.push_str(" ORDER BY name");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params_from_iter(args.iter().map(|a| a.as_ref())),
                row_to_media_item,
            )?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        })
    }

    pub fn list_by_subcategory(
        &self,
        category: &str,
        subcategory: Option<&str>,
        media_type: Option<MediaType>,
    ) -> Result<Vec<MediaItem>, DomainError> {
        self.with_conn(|conn| {
            let mut sql = format!("SELECT {} FROM videos WHERE category = ?1", MEDIA_COLUMNS);
            let mut args: Vec<Box<dyn rusqlite::types::ToSql>> =
                vec![Box::new(category.to_string())];
            match subcategory {
                Some(sub) => {
                    args.push(Box::new(sub.to_string()));
                    sql.push_str(&format!(" AND subcategory = ?{}", args.len()));
                }
                None => sql.push_str(" AND subcategory IS NULL"),
            }
            if let Some(mt) = media_type {
                args.push(Box::new(mt.as_str().to_string()));
                sql.push_str(&format!(" AND media_type = ?{}", args.len()));
            }
            sql.push_str(" ORDER BY name");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params_from_iter(args.iter().map(|a| a.as_ref())),
                row_to_media_item,
            )?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        })
    }

    /// Paginated listing, quarantine excluded, newest modification first.
    pub fn page_media(
        &self,
        page: i64,
        size: i64,
        media_type: Option<MediaType>,
    ) -> Result<(Vec<MediaItem>, i64), DomainError> {
        self.with_conn(|conn| {
            let mut where_sql = "WHERE category != 'DELETE'".to_string();
            let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
            if let Some(mt) = media_type {
                args.push(Box::new(mt.as_str().to_string()));
                where_sql.push_str(&format!(" AND media_type = ?{}", args.len()));
            }

            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM videos {}", where_sql),
                params_from_iter(args.iter().map(|a| a.as_ref())),
                |r| r.get(0),
            )?;

            args.push(Box::new(size));
            let limit_idx = args.len();
            args.push(Box::new(page.max(0) * size));
            let offset_idx = args.len();
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM videos {} ORDER BY modified DESC LIMIT ?{} OFFSET ?{}",
                MEDIA_COLUMNS, where_sql, limit_idx, offset_idx
            ))?;
            let rows = stmt.query_map(
                params_from_iter(args.iter().map(|a| a.as_ref())),
                row_to_media_item,
            )?;
            Ok((rows.filter_map(|r| r.ok()).collect(), total))
        })
    }

    pub fn ids_and_paths_by_category(
        &self,
        category: &str,
    ) -> Result<Vec<(i64, String)>, DomainError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, path FROM videos WHERE category = ?1")?;
            let rows = stmt.query_map([category], |r| Ok((r.get(0)?, r.get(1)?)))?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        })
    }

    pub fn all_ids_and_paths(&self) -> Result<Vec<(i64, String)>, DomainError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, path FROM videos")?;
            let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        })
    }

    /// Bulk delete, one statement per chunk. Cascades take fingerprints and
    /// video_faces with each row; encodings keep living with a null source.
    pub fn delete_media_by_ids(&self, ids: &[i64]) -> Result<usize, DomainError> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.with_conn(|conn| {
            let mut deleted = 0;
            for chunk in ids.chunks(500) {
                let placeholders = vec!["?"; chunk.len()].join(",");
                deleted += conn.execute(
                    &format!("DELETE FROM videos WHERE id IN ({})", placeholders),
                    params_from_iter(chunk.iter()),
                )?;
            }
            Ok(deleted)
        })
    }

    pub fn delete_media(&self, id: i64) -> Result<bool, DomainError> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM videos WHERE id = ?1", [id])? > 0))
    }

    pub fn update_location(&self, id: i64, fields: &ScanFields) -> Result<(), DomainError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE videos SET path = ?2, name = ?3, category = ?4, subcategory = ?5,
                    relative_path = ?6, size = ?7, modified = ?8, extension = ?9
                 WHERE id = ?1",
                params![
                    id,
                    fields.path,
                    fields.name,
                    fields.category,
                    fields.subcategory,
                    fields.relative_path,
                    fields.size,
                    fields.modified,
                    fields.extension,
                ],
            )?;
            if changed == 0 {
                return Err(DomainError::NotFound("Video"));
            }
            Ok(())
        })
    }

    pub fn update_editorial(&self, id: i64, update: &EditorialUpdate) -> Result<(), DomainError> {
        self.with_conn(|conn| Self::apply_editorial(conn, id, update))
    }

    pub fn bulk_update_editorial(
        &self,
        ids: &[i64],
        update: &EditorialUpdate,
    ) -> Result<usize, DomainError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut updated = 0;
            for id in ids {
                if Self::apply_editorial(&tx, *id, update).is_ok() {
                    updated += 1;
                }
            }
            tx.commit()?;
            Ok(updated)
        })
    }

    fn apply_editorial(
        conn: &Connection,
        id: i64,
        update: &EditorialUpdate,
    ) -> Result<(), DomainError> {
        if let Some(rating) = update.rating {
            if !(0.0..=5.0).contains(&rating) {
                return Err(DomainError::InvalidInput(
                    "rating must be between 0 and 5".to_string(),
                ));
            }
        }
        let mut sets: Vec<String> = Vec::new();
        let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(id)];

        macro_rules! set_field {
            ($field:expr, $column:literal) => {
                if let Some(value) = &$field {
                    args.push(Box::new(value.clone()));
                    sets.push(format!(concat!($column, " = ?{}"), args.len()));
                }
            };
        }
        set_field!(update.display_name, "display_name");
        set_field!(update.description, "description");
        set_field!(update.series, "series");
        set_field!(update.season, "season");
        set_field!(update.episode, "episode");
        set_field!(update.year, "year");
        set_field!(update.channel, "channel");
        set_field!(update.rating, "rating");
        if let Some(favorite) = update.favorite {
            args.push(Box::new(favorite as i64));
            sets.push(format!("favorite = ?{}", args.len()));
        }
        if let Some(is_final) = update.is_final {
            args.push(Box::new(is_final as i64));
            sets.push(format!("is_final = ?{}", args.len()));
        }

        if sets.is_empty() {
            return Ok(());
        }
        let changed = conn.execute(
            &format!("UPDATE videos SET {} WHERE id = ?1", sets.join(", ")),
            params_from_iter(args.iter().map(|a| a.as_ref())),
        )?;
        if changed == 0 {
            return Err(DomainError::NotFound("Video"));
        }
        Ok(())
    }

    pub fn update_technical(&self, id: i64, meta: &MediaMetadata) -> Result<(), DomainError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE videos SET duration = ?2, width = ?3, height = ?4, codec = ?5,
                    bitrate = ?6, fps = ?7
                 WHERE id = ?1",
                params![
                    id,
                    meta.duration,
                    meta.width,
                    meta.height,
                    meta.codec,
                    meta.bitrate,
                    meta.fps
                ],
            )?;
            Ok(())
        })
    }

    pub fn set_thumbnail_state(&self, id: i64, state: ThumbnailState) -> Result<(), DomainError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE videos SET thumbnail_generated = ?2 WHERE id = ?1",
                params![id, state.as_i64()],
            )?;
            Ok(())
        })
    }

    pub fn set_fingerprint_state(&self, id: i64, generated: bool) -> Result<(), DomainError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE videos SET fingerprint_generated = ?2, fingerprinted_at = ?3 WHERE id = ?1",
                params![
                    id,
                    generated as i64,
                    if generated { Some(now_epoch()) } else { None }
                ],
            )?;
            Ok(())
        })
    }

    pub fn toggle_final(&self, id: i64) -> Result<bool, DomainError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE videos SET is_final = 1 - is_final WHERE id = ?1",
                [id],
            )?;
            if changed == 0 {
                return Err(DomainError::NotFound("Video"));
            }
            let state: i64 =
                conn.query_row("SELECT is_final FROM videos WHERE id = ?1", [id], |r| {
                    r.get(0)
                })?;
            Ok(state != 0)
        })
    }

    /// Items in a category whose thumbnail is missing or failed, oldest first.
    pub fn media_needing_thumbnails(&self, category: &str) -> Result<Vec<MediaItem>, DomainError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM videos WHERE category = ?1 AND thumbnail_generated != 1
                 ORDER BY modified ASC",
                MEDIA_COLUMNS
            ))?;
            let rows = stmt.query_map([category], row_to_media_item)?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        })
    }

    pub fn fingerprinted_media(
        &self,
        category: Option<&str>,
    ) -> Result<Vec<MediaItem>, DomainError> {
        self.with_conn(|conn| {
            let mut sql = format!(
                "SELECT {} FROM videos WHERE fingerprint_generated = 1",
                MEDIA_COLUMNS
            );
            let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
            if let Some(cat) = category {
                args.push(Box::new(cat.to_string()));
                sql.push_str(" AND category = ?1");
            }
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params_from_iter(args.iter().map(|a| a.as_ref())),
                row_to_media_item,
            )?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        })
    }

    /// Structured + full-text search. Tag filters intersect;
    /// the free-text query fans out across names, editorial fields, tag and
    /// actor names, and (for all-digit queries) the year.
    pub fn search_media(&self, filter: &SearchFilter) -> Result<Vec<MediaItem>, DomainError> {
        let mut items = self.with_conn(|conn| {
            let mut conditions: Vec<String> = Vec::new();
            let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

            if !filter.include_deleted && filter.category.as_deref() != Some("DELETE") {
                conditions.push("category != 'DELETE'".to_string());
            }
            if let Some(min) = filter.duration_min {
                args.push(Box::new(min));
                conditions.push(format!("duration >= ?{}", args.len()));
            }
            if let Some(max) = filter.duration_max {
                args.push(Box::new(max));
                conditions.push(format!("duration <= ?{}", args.len()));
            }
            if let Some(category) = &filter.category {
                if category != "_all" {
                    args.push(Box::new(category.clone()));
                    conditions.push(format!("category = ?{}", args.len()));
                }
            }
            if let Some(subcategory) = &filter.subcategory {
                args.push(Box::new(subcategory.clone()));
                conditions.push(format!("subcategory = ?{}", args.len()));
            }
            if let Some(mt) = filter.media_type {
                args.push(Box::new(mt.as_str().to_string()));
                conditions.push(format!("media_type = ?{}", args.len()));
            }

            if let Some(query) = filter.query.as_deref().filter(|q| !q.is_empty()) {
                let pattern = format!("%{}%", query.to_lowercase());
                let mut ors: Vec<String> = Vec::new();
                for column in ["name", "display_name", "description", "series", "episode", "channel"]
                {
                    args.push(Box::new(pattern.clone()));
                    ors.push(format!("lower({}) LIKE ?{}", column, args.len()));
                }
                args.push(Box::new(pattern.clone()));
                ors.push(format!(
                    "id IN (SELECT vt.video_id FROM video_tags vt
                            JOIN tags t ON t.id = vt.tag_id WHERE t.name LIKE ?{})",
                    args.len()
                ));
                args.push(Box::new(pattern.clone()));
                ors.push(format!(
                    "id IN (SELECT va.video_id FROM video_actors va
                            JOIN actors a ON a.id = va.actor_id WHERE lower(a.name) LIKE ?{})",
                    args.len()
                ));
                if query.chars().all(|c| c.is_ascii_digit()) {
                    if let Ok(year) = query.parse::<i64>() {
                        args.push(Box::new(year));
                        ors.push(format!("year = ?{}", args.len()));
                    }
                }
                conditions.push(format!("({})", ors.join(" OR ")));
            }

            for tag in &filter.tags {
                args.push(Box::new(tag.to_lowercase()));
                conditions.push(format!(
                    "id IN (SELECT vt.video_id FROM video_tags vt
                            JOIN tags t ON t.id = vt.tag_id WHERE t.name = ?{})",
                    args.len()
                ));
            }

            let mut sql = format!("SELECT {} FROM videos", MEDIA_COLUMNS);
            if !conditions.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&conditions.join(" AND "));
            }
            sql.push_str(" ORDER BY modified DESC");

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params_from_iter(args.iter().map(|a| a.as_ref())),
                row_to_media_item,
            )?;
            Ok(rows.filter_map(|r| r.ok()).collect::<Vec<_>>())
        })?;
        self.load_relations(&mut items)?;
        Ok(items)
    }

    /// Distinct values of channel/series/year with usage counts, most used
    /// first. Null and empty values are excluded.
    pub fn metadata_suggestions(&self, field: &str) -> Result<Vec<(String, i64)>, DomainError> {
        let column = match field {
            "channel" => "channel",
            "series" => "series",
            "year" => "year",
            other => {
                return Err(DomainError::InvalidInput(format!(
                    "Unknown suggestion field: {}",
                    other
                )))
            }
        };
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT CAST({col} AS TEXT), COUNT(*) FROM videos
                 WHERE {col} IS NOT NULL AND CAST({col} AS TEXT) != ''
                 GROUP BY {col} ORDER BY COUNT(*) DESC",
                col = column
            ))?;
            let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        })
    }

    pub fn media_counts(&self) -> Result<(i64, i64, i64), DomainError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(media_type = 'video'), 0),
                        COALESCE(SUM(media_type = 'image'), 0)
                 FROM videos WHERE category != 'DELETE'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .map_err(DomainError::from)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_scanned_file as scanned;
    use super::super::TestDb;
    use super::*;

    #[test]
    fn upsert_creates_then_updates() {
        let db = TestDb::new("media_upsert");
        let file = scanned("/root/A/one.mp4", "A");

        let (id, created) = db.store.upsert_scanned(&file).unwrap();
        assert!(created);

        let item = db.store.get_media(id).unwrap().unwrap();
        assert_eq!(item.display_name.as_deref(), Some("one"));
        assert_eq!(item.thumbnail_url.as_deref(), Some(&format!("/api/thumbnails/{}", id)[..]));

        // Editorial state must survive a rescan of unchanged disk state.
        db.store
            .update_editorial(
                id,
                &EditorialUpdate {
                    display_name: Some("My Clip".to_string()),
                    rating: Some(4.5),
                    ..Default::default()
                },
            )
            .unwrap();

        let mut file2 = file.clone();
        file2.size = 2048;
        let (id2, created2) = db.store.upsert_scanned(&file2).unwrap();
        assert_eq!(id, id2);
        assert!(!created2);

        let item = db.store.get_media(id).unwrap().unwrap();
        assert_eq!(item.size, 2048);
        assert_eq!(item.display_name.as_deref(), Some("My Clip"));
        assert_eq!(item.rating, Some(4.5));
    }

    #[test]
    fn path_uniqueness_is_enforced() {
        let db = TestDb::new("media_unique");
        let file = scanned("/root/A/one.mp4", "A");
        let (id1, _) = db.store.upsert_scanned(&file).unwrap();
        let (id2, created) = db.store.upsert_scanned(&file).unwrap();
        assert_eq!(id1, id2);
        assert!(!created);
    }

    #[test]
    fn rating_out_of_range_is_rejected() {
        let db = TestDb::new("media_rating");
        let (id, _) = db.store.upsert_scanned(&scanned("/root/A/a.mp4", "A")).unwrap();
        let err = db
            .store
            .update_editorial(
                id,
                &EditorialUpdate {
                    rating: Some(7.0),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidInput(_)));
    }

    #[test]
    fn search_matches_text_tags_and_year() {
        let db = TestDb::new("media_search");
        let (id, _) = db.store.upsert_scanned(&scanned("/root/A/show.mp4", "A")).unwrap();
        db.store
            .update_editorial(
                id,
                &EditorialUpdate {
                    series: Some("Breaking News".to_string()),
                    year: Some(2023),
                    ..Default::default()
                },
            )
            .unwrap();
        db.store.add_tag_to_media(id, "keep").unwrap();

        let by_series = db
            .store
            .search_media(&SearchFilter {
                query: Some("breaking".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_series.len(), 1);
        assert_eq!(by_series[0].tags.len(), 1);

        let by_year = db
            .store
            .search_media(&SearchFilter {
                query: Some("2023".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_year.len(), 1);

        let by_tag = db
            .store
            .search_media(&SearchFilter {
                tags: vec!["keep".to_string()],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_tag.len(), 1);

        let missing_tag = db
            .store
            .search_media(&SearchFilter {
                tags: vec!["keep".to_string(), "other".to_string()],
                ..Default::default()
            })
            .unwrap();
        assert!(missing_tag.is_empty());
    }

    #[test]
    fn search_excludes_quarantine_by_default() {
        let db = TestDb::new("media_search_delete");
        db.store.upsert_scanned(&scanned("/root/DELETE/x.mp4", "DELETE")).unwrap();
        db.store.upsert_scanned(&scanned("/root/A/y.mp4", "A")).unwrap();

        let all = db.store.search_media(&SearchFilter::default()).unwrap();
        assert_eq!(all.len(), 1);

        let deleted = db
            .store
            .search_media(&SearchFilter {
                category: Some("DELETE".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(deleted.len(), 1);
    }

    #[test]
    fn suggestions_count_and_order() {
        let db = TestDb::new("media_suggestions");
        for (i, channel) in ["HBO", "HBO", "AMC"].iter().enumerate() {
            let (id, _) = db
                .store
                .upsert_scanned(&scanned(&format!("/root/A/v{}.mp4", i), "A"))
                .unwrap();
            db.store
                .update_editorial(
                    id,
                    &EditorialUpdate {
                        channel: Some(channel.to_string()),
                        ..Default::default()
                    },
                )
                .unwrap();
        }
        let suggestions = db.store.metadata_suggestions("channel").unwrap();
        assert_eq!(suggestions[0], ("HBO".to_string(), 2));
        assert_eq!(suggestions[1], ("AMC".to_string(), 1));
        assert!(db.store.metadata_suggestions("bogus").is_err());
    }

    #[test]
    fn toggle_final_flips() {
        let db = TestDb::new("media_final");
        let (id, _) = db.store.upsert_scanned(&scanned("/root/A/a.mp4", "A")).unwrap();
        assert!(db.store.toggle_final(id).unwrap());
        assert!(!db.store.toggle_final(id).unwrap());
    }
}

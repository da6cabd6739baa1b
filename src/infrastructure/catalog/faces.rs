use crate::domain::{
    now_epoch, DetectionMethod, DomainError, FaceEncoding, FaceId, FaceSummary, VideoFace,
};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::HashMap;

use super::CatalogStore;

const FACE_COLUMNS: &str =
    "id, name, actor_id, primary_encoding_id, encoding_count, created_at, updated_at";
const ENCODING_COLUMNS: &str =
    "id, face_id, video_id, frame_timestamp, encoding, thumbnail, confidence, quality_score, created_at";

fn row_to_face(row: &rusqlite::Row) -> rusqlite::Result<FaceId> {
    Ok(FaceId {
        id: row.get(0)?,
        name: row.get(1)?,
        actor_id: row.get(2)?,
        primary_encoding_id: row.get(3)?,
        encoding_count: row.get(4)?,
        created_at: row.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
        updated_at: row.get::<_, Option<f64>>(6)?.unwrap_or(0.0),
    })
}

fn row_to_encoding(row: &rusqlite::Row) -> rusqlite::Result<FaceEncoding> {
    Ok(FaceEncoding {
        id: row.get(0)?,
        face_id: row.get(1)?,
        media_item_id: row.get(2)?,
        frame_timestamp: row.get(3)?,
        encoding: row.get(4)?,
        thumbnail: row.get(5)?,
        confidence: row.get(6)?,
        quality_score: row.get(7)?,
        created_at: row.get::<_, Option<f64>>(8)?.unwrap_or(0.0),
    })
}

/// Result of adding an encoding. A byte-exact duplicate within the same face
/// is a successful "skipped", not an error.
#[derive(Debug)]
pub enum AddEncodingOutcome {
    Added(FaceEncoding),
    Skipped,
}

fn best_encoding_for(conn: &Connection, face_id: i64) -> Option<FaceEncoding> {
    conn.query_row(
        &format!(
            "SELECT {} FROM face_encodings WHERE face_id = ?1
             ORDER BY quality_score DESC, confidence DESC LIMIT 1",
            ENCODING_COLUMNS
        ),
        [face_id],
        row_to_encoding,
    )
    .ok()
}

impl CatalogStore {
    pub fn create_face(&self, name: &str, actor_id: Option<i64>) -> Result<FaceId, DomainError> {
        let now = now_epoch();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO face_ids (name, actor_id, encoding_count, created_at, updated_at)
                 VALUES (?1, ?2, 0, ?3, ?3)",
                params![name, actor_id, now],
            )?;
            conn.query_row(
                &format!("SELECT {} FROM face_ids WHERE id = ?1", FACE_COLUMNS),
                [conn.last_insert_rowid()],
                row_to_face,
            )
            .map_err(DomainError::from)
        })
    }

    pub fn get_face(&self, id: i64) -> Result<Option<FaceId>, DomainError> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {} FROM face_ids WHERE id = ?1", FACE_COLUMNS),
                    [id],
                    row_to_face,
                )
                .ok())
        })
    }

    pub fn list_faces(
        &self,
        query: Option<&str>,
        actor_id: Option<i64>,
    ) -> Result<Vec<FaceId>, DomainError> {
        self.with_conn(|conn| {
            let mut sql = format!("SELECT {} FROM face_ids", FACE_COLUMNS);
            let mut conditions: Vec<String> = Vec::new();
            let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
            if let Some(q) = query.filter(|q| !q.is_empty()) {
                args.push(Box::new(format!("%{}%", q.to_lowercase())));
                conditions.push(format!("lower(name) LIKE ?{}", args.len()));
            }
            if let Some(actor) = actor_id {
                args.push(Box::new(actor));
                conditions.push(format!("actor_id = ?{}", args.len()));
            }
            if !conditions.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&conditions.join(" AND "));
            }
            sql.push_str(" ORDER BY updated_at DESC");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params_from_iter(args.iter().map(|a| a.as_ref())),
                row_to_face,
            )?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        })
    }

    /// `actor_id` is Some(None) to clear the link, Some(Some(id)) to set it.
    pub fn update_face(
        &self,
        id: i64,
        name: Option<&str>,
        actor_id: Option<Option<i64>>,
    ) -> Result<FaceId, DomainError> {
        self.with_conn(|conn| {
            if let Some(name) = name {
                conn.execute(
                    "UPDATE face_ids SET name = ?2 WHERE id = ?1",
                    params![id, name],
                )?;
            }
            if let Some(actor) = actor_id {
                conn.execute(
                    "UPDATE face_ids SET actor_id = ?2 WHERE id = ?1",
                    params![id, actor],
                )?;
            }
            conn.execute(
                "UPDATE face_ids SET updated_at = ?2 WHERE id = ?1",
                params![id, now_epoch()],
            )?;
            conn.query_row(
                &format!("SELECT {} FROM face_ids WHERE id = ?1", FACE_COLUMNS),
                [id],
                row_to_face,
            )
            .map_err(|_| DomainError::NotFound("Face"))
        })
    }

    pub fn delete_face(&self, id: i64) -> Result<bool, DomainError> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM face_ids WHERE id = ?1", [id])? > 0))
    }

    /// Add an encoding to a face. Byte-exact duplicates within the face are
    /// skipped and leave `encoding_count` unchanged.
    pub fn add_encoding(
        &self,
        face_id: i64,
        video_id: Option<i64>,
        frame_timestamp: f64,
        encoding_b64: &str,
        thumbnail: Option<&str>,
        confidence: Option<f64>,
        quality_score: Option<f64>,
    ) -> Result<AddEncodingOutcome, DomainError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let face_exists: i64 =
                tx.query_row("SELECT COUNT(*) FROM face_ids WHERE id = ?1", [face_id], |r| {
                    r.get(0)
                })?;
            if face_exists == 0 {
                return Err(DomainError::NotFound("Face"));
            }

            let duplicate: Option<i64> = tx
                .query_row(
                    "SELECT id FROM face_encodings WHERE face_id = ?1 AND encoding = ?2",
                    params![face_id, encoding_b64],
                    |r| r.get(0),
                )
                .optional()?;
            if duplicate.is_some() {
                return Ok(AddEncodingOutcome::Skipped);
            }

            let now = now_epoch();
            tx.execute(
                "INSERT INTO face_encodings
                    (face_id, video_id, frame_timestamp, encoding, thumbnail, confidence,
                     quality_score, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    face_id,
                    video_id,
                    frame_timestamp,
                    encoding_b64,
                    thumbnail,
                    confidence,
                    quality_score,
                    now
                ],
            )?;
            let encoding_id = tx.last_insert_rowid();
            tx.execute(
                "UPDATE face_ids SET encoding_count = encoding_count + 1, updated_at = ?2
                 WHERE id = ?1",
                params![face_id, now],
            )?;
            let stored = tx.query_row(
                &format!("SELECT {} FROM face_encodings WHERE id = ?1", ENCODING_COLUMNS),
                [encoding_id],
                row_to_encoding,
            )?;
            tx.commit()?;
            Ok(AddEncodingOutcome::Added(stored))
        })
    }

    pub fn get_encoding(&self, id: i64) -> Result<Option<FaceEncoding>, DomainError> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {} FROM face_encodings WHERE id = ?1", ENCODING_COLUMNS),
                    [id],
                    row_to_encoding,
                )
                .ok())
        })
    }

    /// Encodings of one face, best quality first.
    pub fn encodings_for_face(&self, face_id: i64) -> Result<Vec<FaceEncoding>, DomainError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM face_encodings WHERE face_id = ?1
                 ORDER BY quality_score DESC, confidence DESC",
                ENCODING_COLUMNS
            ))?;
            let rows = stmt.query_map([face_id], row_to_encoding)?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        })
    }

    /// Every encoding in the catalog. The cosine search is an explicit linear
    /// scan over this set.
    pub fn all_encodings(&self) -> Result<Vec<FaceEncoding>, DomainError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {} FROM face_encodings", ENCODING_COLUMNS))?;
            let rows = stmt.query_map([], row_to_encoding)?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        })
    }

    /// Delete one encoding. If it was the primary, the next best encoding is
    /// promoted; if it was the last, the face survives as an encoding-less
    /// label with a null primary. Returns (remaining_count, new_primary_id).
    pub fn delete_encoding(
        &self,
        face_id: i64,
        encoding_id: i64,
    ) -> Result<(i64, Option<i64>), DomainError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let owner: Option<i64> = tx
                .query_row(
                    "SELECT face_id FROM face_encodings WHERE id = ?1",
                    [encoding_id],
                    |r| r.get(0),
                )
                .optional()?;
            match owner {
                None => return Err(DomainError::NotFound("Encoding")),
                Some(owner) if owner != face_id => {
                    return Err(DomainError::InvalidInput(format!(
                        "Encoding {} does not belong to face {}",
                        encoding_id, face_id
                    )))
                }
                Some(_) => {}
            }

            let was_primary: bool = tx
                .query_row(
                    "SELECT primary_encoding_id FROM face_ids WHERE id = ?1",
                    [face_id],
                    |r| r.get::<_, Option<i64>>(0),
                )?
                .map(|p| p == encoding_id)
                .unwrap_or(false);

            tx.execute("DELETE FROM face_encodings WHERE id = ?1", [encoding_id])?;
            tx.execute(
                "UPDATE face_ids SET encoding_count = MAX(encoding_count - 1, 0), updated_at = ?2
                 WHERE id = ?1",
                params![face_id, now_epoch()],
            )?;

            let remaining: i64 = tx.query_row(
                "SELECT COUNT(*) FROM face_encodings WHERE face_id = ?1",
                [face_id],
                |r| r.get(0),
            )?;

            let new_primary = if remaining == 0 {
                tx.execute(
                    "UPDATE face_ids SET primary_encoding_id = NULL WHERE id = ?1",
                    [face_id],
                )?;
                None
            } else if was_primary {
                let next = best_encoding_for(&tx, face_id).map(|e| e.id);
                tx.execute(
                    "UPDATE face_ids SET primary_encoding_id = ?2 WHERE id = ?1",
                    params![face_id, next],
                )?;
                next
            } else {
                tx.query_row(
                    "SELECT primary_encoding_id FROM face_ids WHERE id = ?1",
                    [face_id],
                    |r| r.get(0),
                )?
            };

            tx.commit()?;
            Ok((remaining, new_primary))
        })
    }

    pub fn set_primary_encoding(&self, face_id: i64, encoding_id: i64) -> Result<(), DomainError> {
        self.with_conn(|conn| {
            let owner: Option<i64> = conn
                .query_row(
                    "SELECT face_id FROM face_encodings WHERE id = ?1",
                    [encoding_id],
                    |r| r.get(0),
                )
                .optional()?;
            if owner != Some(face_id) {
                return Err(DomainError::InvalidInput(format!(
                    "Encoding {} does not belong to face {}",
                    encoding_id, face_id
                )));
            }
            conn.execute(
                "UPDATE face_ids SET primary_encoding_id = ?2, updated_at = ?3 WHERE id = ?1",
                params![face_id, encoding_id, now_epoch()],
            )?;
            Ok(())
        })
    }

    /// The user-chosen primary encoding when set and still present, otherwise
    /// the highest-quality one (ties broken by confidence).
    pub fn primary_or_best_encoding(
        &self,
        face_id: i64,
    ) -> Result<Option<FaceEncoding>, DomainError> {
        self.with_conn(|conn| {
            let primary_id: Option<i64> = conn
                .query_row(
                    "SELECT primary_encoding_id FROM face_ids WHERE id = ?1",
                    [face_id],
                    |r| r.get(0),
                )
                .optional()?
                .flatten();
            if let Some(pid) = primary_id {
                if let Ok(enc) = conn.query_row(
                    &format!(
                        "SELECT {} FROM face_encodings WHERE id = ?1 AND face_id = ?2",
                        ENCODING_COLUMNS
                    ),
                    params![pid, face_id],
                    row_to_encoding,
                ) {
                    return Ok(Some(enc));
                }
            }
            Ok(best_encoding_for(conn, face_id))
        })
    }

    /// Insert or bump the video↔face link. Returns true when newly created.
    pub fn upsert_video_face(
        &self,
        video_id: i64,
        face_id: i64,
        method: DetectionMethod,
    ) -> Result<bool, DomainError> {
        self.with_conn(|conn| {
            let now = now_epoch();
            let updated = conn.execute(
                "UPDATE video_faces SET appearance_count = appearance_count + 1
                 WHERE video_id = ?1 AND face_id = ?2",
                params![video_id, face_id],
            )?;
            if updated > 0 {
                return Ok(false);
            }
            conn.execute(
                "INSERT INTO video_faces
                    (video_id, face_id, first_detected_at, detection_method, appearance_count,
                     created_at)
                 VALUES (?1, ?2, ?3, ?4, 1, ?3)",
                params![video_id, face_id, now, method.as_str()],
            )?;
            Ok(true)
        })
    }

    pub fn unlink_video_face(&self, video_id: i64, face_id: i64) -> Result<bool, DomainError> {
        self.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM video_faces WHERE video_id = ?1 AND face_id = ?2",
                params![video_id, face_id],
            )? > 0)
        })
    }

    pub fn video_faces_for_face(&self, face_id: i64) -> Result<Vec<VideoFace>, DomainError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, video_id, face_id, first_detected_at, detection_method,
                        appearance_count
                 FROM video_faces WHERE face_id = ?1",
            )?;
            let rows = stmt.query_map([face_id], |r| {
                Ok(VideoFace {
                    id: r.get(0)?,
                    video_id: r.get(1)?,
                    face_id: r.get(2)?,
                    first_detected_at: r.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                    detection_method: DetectionMethod::from_str(&r.get::<_, String>(4)?),
                    appearance_count: r.get(5)?,
                })
            })?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        })
    }

    pub fn media_ids_for_face(
        &self,
        face_id: i64,
        media_type: Option<&str>,
    ) -> Result<Vec<i64>, DomainError> {
        self.with_conn(|conn| {
            let mut sql = "SELECT vf.video_id FROM video_faces vf
                 JOIN videos v ON v.id = vf.video_id WHERE vf.face_id = ?1"
                .to_string();
            let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(face_id)];
            if let Some(mt) = media_type {
                args.push(Box::new(mt.to_string()));
                sql.push_str(&format!(" AND v.media_type = ?{}", args.len()));
            }
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params_from_iter(args.iter().map(|a| a.as_ref())),
                |r| r.get::<_, i64>(0),
            )?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        })
    }

    /// Batched face summaries for a set of media items: one query for the
    /// links, one for the preview thumbnails.
    pub fn faces_for_videos(
        &self,
        video_ids: &[i64],
    ) -> Result<HashMap<i64, Vec<FaceSummary>>, DomainError> {
        let mut map: HashMap<i64, Vec<FaceSummary>> = HashMap::new();
        if video_ids.is_empty() {
            return Ok(map);
        }
        self.with_conn(|conn| {
            let mut links: Vec<(i64, i64, String, i64)> = Vec::new();
            for chunk in video_ids.chunks(500) {
                let placeholders = vec!["?"; chunk.len()].join(",");
                let mut stmt = conn.prepare(&format!(
                    "SELECT vf.video_id, f.id, f.name, vf.appearance_count
                     FROM video_faces vf JOIN face_ids f ON f.id = vf.face_id
                     WHERE vf.video_id IN ({})",
                    placeholders
                ))?;
                let rows = stmt.query_map(params_from_iter(chunk.iter()), |r| {
                    Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
                })?;
                links.extend(rows.filter_map(|r| r.ok()));
            }

            let face_ids: Vec<i64> = {
                let mut ids: Vec<i64> = links.iter().map(|l| l.1).collect();
                ids.sort_unstable();
                ids.dedup();
                ids
            };

            let mut thumbnails: HashMap<i64, String> = HashMap::new();
            for chunk in face_ids.chunks(500) {
                let placeholders = vec!["?"; chunk.len()].join(",");
                let mut stmt = conn.prepare(&format!(
                    "SELECT face_id, thumbnail FROM face_encodings
                     WHERE face_id IN ({}) AND thumbnail IS NOT NULL
                     ORDER BY quality_score DESC, confidence DESC",
                    placeholders
                ))?;
                let rows = stmt.query_map(params_from_iter(chunk.iter()), |r| {
                    Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?))
                })?;
                for (face_id, thumb) in rows.filter_map(|r| r.ok()) {
                    thumbnails.entry(face_id).or_insert(thumb);
                }
            }

            for (video_id, face_id, name, appearance_count) in links {
                map.entry(video_id).or_default().push(FaceSummary {
                    id: face_id,
                    name,
                    thumbnail: thumbnails.get(&face_id).cloned(),
                    appearance_count,
                });
            }
            Ok(())
        })?;
        Ok(map)
    }

    /// Merge source faces into the target: encodings reparent, video links
    /// combine with summed appearance counts, sources are deleted. The total
    /// number of encodings and the per-video appearance multiplicity are both
    /// conserved.
    pub fn merge_faces(&self, target_id: i64, source_ids: &[i64]) -> Result<FaceId, DomainError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let target_exists: i64 =
                tx.query_row("SELECT COUNT(*) FROM face_ids WHERE id = ?1", [target_id], |r| {
                    r.get(0)
                })?;
            if target_exists == 0 {
                return Err(DomainError::NotFound("Face"));
            }

            for &source_id in source_ids {
                if source_id == target_id {
                    continue;
                }
                tx.execute(
                    "UPDATE face_encodings SET face_id = ?2 WHERE face_id = ?1",
                    params![source_id, target_id],
                )?;

                let source_links: Vec<(i64, i64)> = {
                    let mut stmt = tx.prepare(
                        "SELECT video_id, appearance_count FROM video_faces WHERE face_id = ?1",
                    )?;
                    let rows = stmt.query_map([source_id], |r| Ok((r.get(0)?, r.get(1)?)))?;
                    rows.filter_map(|r| r.ok()).collect()
                };
                for (video_id, count) in source_links {
                    let combined = tx.execute(
                        "UPDATE video_faces SET appearance_count = appearance_count + ?3
                         WHERE video_id = ?1 AND face_id = ?2",
                        params![video_id, target_id, count],
                    )?;
                    if combined > 0 {
                        tx.execute(
                            "DELETE FROM video_faces WHERE video_id = ?1 AND face_id = ?2",
                            params![video_id, source_id],
                        )?;
                    } else {
                        tx.execute(
                            "UPDATE video_faces SET face_id = ?3
                             WHERE video_id = ?1 AND face_id = ?2",
                            params![video_id, source_id, target_id],
                        )?;
                    }
                }

                tx.execute("DELETE FROM face_ids WHERE id = ?1", [source_id])?;
            }

            tx.execute(
                "UPDATE face_ids SET
                    encoding_count = (SELECT COUNT(*) FROM face_encodings WHERE face_id = ?1),
                    updated_at = ?2
                 WHERE id = ?1",
                params![target_id, now_epoch()],
            )?;
            let merged = tx.query_row(
                &format!("SELECT {} FROM face_ids WHERE id = ?1", FACE_COLUMNS),
                [target_id],
                row_to_face,
            )?;
            tx.commit()?;
            Ok(merged)
        })
    }

    /// Delete identities with zero encodings AND zero video links. Either on
    /// its own keeps the face alive.
    pub fn cleanup_orphan_faces(&self) -> Result<usize, DomainError> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM face_ids WHERE
                    id NOT IN (SELECT DISTINCT face_id FROM face_encodings)
                    AND id NOT IN (SELECT DISTINCT face_id FROM video_faces)",
                [],
            )?;
            Ok(deleted)
        })
    }

    /// (faces, encodings, faces linked to an actor, video links)
    pub fn face_stats(&self) -> Result<(i64, i64, i64, i64), DomainError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT
                    (SELECT COUNT(*) FROM face_ids),
                    (SELECT COUNT(*) FROM face_encodings),
                    (SELECT COUNT(*) FROM face_ids WHERE actor_id IS NOT NULL),
                    (SELECT COUNT(*) FROM video_faces)",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .map_err(DomainError::from)
        })
    }

    /// Copy face links from one media item to another (used after an edit
    /// imports its output). Appearance counts carry over.
    pub fn copy_video_faces(
        &self,
        from_media: i64,
        to_media: i64,
        method: DetectionMethod,
    ) -> Result<usize, DomainError> {
        self.with_conn(|conn| {
            let copied = conn.execute(
                "INSERT OR IGNORE INTO video_faces
                    (video_id, face_id, first_detected_at, detection_method, appearance_count,
                     created_at)
                 SELECT ?2, face_id, ?3, ?4, appearance_count, ?3
                 FROM video_faces WHERE video_id = ?1",
                params![from_media, to_media, now_epoch(), method.as_str()],
            )?;
            Ok(copied)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_scanned_file as scanned;
    use super::super::TestDb;
    use super::*;

    fn add(db: &TestDb, face_id: i64, video: Option<i64>, bytes: &str) -> AddEncodingOutcome {
        db.store
            .add_encoding(face_id, video, 1.0, bytes, None, Some(0.9), Some(0.5))
            .unwrap()
    }

    #[test]
    fn duplicate_encoding_is_skipped() {
        let db = TestDb::new("faces_dup");
        let face = db.store.create_face("face-abc123", None).unwrap();

        assert!(matches!(add(&db, face.id, None, "AAAA"), AddEncodingOutcome::Added(_)));
        assert!(matches!(add(&db, face.id, None, "AAAA"), AddEncodingOutcome::Skipped));

        let face = db.store.get_face(face.id).unwrap().unwrap();
        assert_eq!(face.encoding_count, 1);
    }

    #[test]
    fn merge_conserves_encodings_and_appearances() {
        let db = TestDb::new("faces_merge");
        let f1 = db.store.create_face("face-one", None).unwrap();
        let f2 = db.store.create_face("face-two", None).unwrap();
        let (v, _) = db.store.upsert_scanned(&scanned("/root/A/v.mp4", "A")).unwrap();
        let (w, _) = db.store.upsert_scanned(&scanned("/root/A/w.mp4", "A")).unwrap();

        for i in 0..3 {
            add(&db, f1.id, Some(v), &format!("one-{}", i));
        }
        for i in 0..2 {
            add(&db, f2.id, Some(v), &format!("two-{}", i));
        }

        // F1→V appearance_count 4, F2→V 1, F2→W 2.
        for _ in 0..4 {
            db.store
                .upsert_video_face(v, f1.id, DetectionMethod::AutoScan)
                .unwrap();
        }
        db.store.upsert_video_face(v, f2.id, DetectionMethod::AutoScan).unwrap();
        for _ in 0..2 {
            db.store
                .upsert_video_face(w, f2.id, DetectionMethod::AutoScan)
                .unwrap();
        }

        let merged = db.store.merge_faces(f1.id, &[f2.id]).unwrap();
        assert_eq!(merged.encoding_count, 5);
        assert!(db.store.get_face(f2.id).unwrap().is_none());

        let links = db.store.video_faces_for_face(f1.id).unwrap();
        let by_video: HashMap<i64, i64> =
            links.iter().map(|l| (l.video_id, l.appearance_count)).collect();
        assert_eq!(by_video[&v], 5);
        assert_eq!(by_video[&w], 2);
    }

    #[test]
    fn delete_encoding_promotes_next_best_primary() {
        let db = TestDb::new("faces_primary");
        let face = db.store.create_face("face-p", None).unwrap();

        let first = match db
            .store
            .add_encoding(face.id, None, 0.0, "AAA", None, Some(0.9), Some(0.9))
            .unwrap()
        {
            AddEncodingOutcome::Added(e) => e,
            _ => panic!("expected add"),
        };
        let second = match db
            .store
            .add_encoding(face.id, None, 0.0, "BBB", None, Some(0.8), Some(0.5))
            .unwrap()
        {
            AddEncodingOutcome::Added(e) => e,
            _ => panic!("expected add"),
        };

        db.store.set_primary_encoding(face.id, first.id).unwrap();
        let (remaining, new_primary) = db.store.delete_encoding(face.id, first.id).unwrap();
        assert_eq!(remaining, 1);
        assert_eq!(new_primary, Some(second.id));

        // Last encoding out: the face survives as a label with no primary.
        let (remaining, new_primary) = db.store.delete_encoding(face.id, second.id).unwrap();
        assert_eq!(remaining, 0);
        assert_eq!(new_primary, None);
        assert!(db.store.get_face(face.id).unwrap().is_some());
    }

    #[test]
    fn delete_encoding_checks_ownership() {
        let db = TestDb::new("faces_owner");
        let a = db.store.create_face("face-a", None).unwrap();
        let b = db.store.create_face("face-b", None).unwrap();
        let enc = match add(&db, a.id, None, "AAA") {
            AddEncodingOutcome::Added(e) => e,
            _ => panic!("expected add"),
        };
        let err = db.store.delete_encoding(b.id, enc.id).unwrap_err();
        assert!(matches!(err, DomainError::InvalidInput(_)));
    }

    #[test]
    fn orphan_cleanup_spares_labels_with_links() {
        let db = TestDb::new("faces_orphans");
        let orphan = db.store.create_face("face-orphan", None).unwrap();
        let labeled = db.store.create_face("face-labeled", None).unwrap();
        let encoded = db.store.create_face("face-encoded", None).unwrap();
        let (v, _) = db.store.upsert_scanned(&scanned("/root/A/v.mp4", "A")).unwrap();

        db.store
            .upsert_video_face(v, labeled.id, DetectionMethod::UserSelected)
            .unwrap();
        add(&db, encoded.id, None, "AAA");

        assert_eq!(db.store.cleanup_orphan_faces().unwrap(), 1);
        assert!(db.store.get_face(orphan.id).unwrap().is_none());
        assert!(db.store.get_face(labeled.id).unwrap().is_some());
        assert!(db.store.get_face(encoded.id).unwrap().is_some());
    }

    #[test]
    fn media_delete_nulls_encoding_source_but_keeps_encoding() {
        let db = TestDb::new("faces_setnull");
        let face = db.store.create_face("face-n", None).unwrap();
        let (v, _) = db.store.upsert_scanned(&scanned("/root/A/v.mp4", "A")).unwrap();
        add(&db, face.id, Some(v), "AAA");

        db.store.delete_media(v).unwrap();
        let encodings = db.store.encodings_for_face(face.id).unwrap();
        assert_eq!(encodings.len(), 1);
        assert_eq!(encodings[0].media_item_id, None);
    }

    #[test]
    fn faces_for_videos_is_batched_by_video() {
        let db = TestDb::new("faces_batch");
        let face = db.store.create_face("face-b", None).unwrap();
        let (v, _) = db.store.upsert_scanned(&scanned("/root/A/v.mp4", "A")).unwrap();
        db.store
            .add_encoding(face.id, Some(v), 0.0, "AAA", Some("thumb"), Some(0.9), Some(0.9))
            .unwrap();
        db.store.upsert_video_face(v, face.id, DetectionMethod::AutoScan).unwrap();

        let map = db.store.faces_for_videos(&[v]).unwrap();
        let summaries = &map[&v];
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].thumbnail.as_deref(), Some("thumb"));
    }
}

use crate::domain::{now_epoch, DomainError, VideoFingerprint};
use rusqlite::{params, params_from_iter};
use std::collections::HashMap;

use super::CatalogStore;

fn row_to_fingerprint(row: &rusqlite::Row) -> rusqlite::Result<VideoFingerprint> {
    Ok(VideoFingerprint {
        id: row.get(0)?,
        video_id: row.get(1)?,
        frame_position: row.get(2)?,
        phash: row.get(3)?,
        created_at: row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
    })
}

impl CatalogStore {
    /// Insert a frame hash. A frame within ±1 position unit of an existing
    /// one is considered the same sample point and the insert is skipped.
    /// Returns the stored row, or None when skipped.
    pub fn insert_fingerprint(
        &self,
        video_id: i64,
        frame_position: i64,
        phash: &str,
    ) -> Result<Option<VideoFingerprint>, DomainError> {
        self.with_conn(|conn| {
            let nearby: i64 = conn.query_row(
                "SELECT COUNT(*) FROM video_fingerprints
                 WHERE video_id = ?1 AND ABS(frame_position - ?2) <= 1",
                params![video_id, frame_position],
                |r| r.get(0),
            )?;
            if nearby > 0 {
                return Ok(None);
            }
            conn.execute(
                "INSERT INTO video_fingerprints (video_id, frame_position, phash, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![video_id, frame_position, phash, now_epoch()],
            )?;
            conn.query_row(
                "SELECT id, video_id, frame_position, phash, created_at
                 FROM video_fingerprints WHERE id = ?1",
                [conn.last_insert_rowid()],
                row_to_fingerprint,
            )
            .map(Some)
            .map_err(DomainError::from)
        })
    }

    pub fn replace_fingerprints(
        &self,
        video_id: i64,
        frames: &[(i64, String)],
    ) -> Result<usize, DomainError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM video_fingerprints WHERE video_id = ?1", [video_id])?;
            let now = now_epoch();
            for (position, phash) in frames {
                tx.execute(
                    "INSERT INTO video_fingerprints (video_id, frame_position, phash, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![video_id, position, phash, now],
                )?;
            }
            tx.commit()?;
            Ok(frames.len())
        })
    }

    pub fn fingerprints_for(&self, video_id: i64) -> Result<Vec<VideoFingerprint>, DomainError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, video_id, frame_position, phash, created_at
                 FROM video_fingerprints WHERE video_id = ?1 ORDER BY frame_position",
            )?;
            let rows = stmt.query_map([video_id], row_to_fingerprint)?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        })
    }

    /// All fingerprints for the given items, keyed by item id. One query per
    /// 500-id chunk rather than one per item.
    pub fn fingerprints_for_many(
        &self,
        video_ids: &[i64],
    ) -> Result<HashMap<i64, Vec<VideoFingerprint>>, DomainError> {
        let mut map: HashMap<i64, Vec<VideoFingerprint>> = HashMap::new();
        if video_ids.is_empty() {
            return Ok(map);
        }
        self.with_conn(|conn| {
            for chunk in video_ids.chunks(500) {
                let placeholders = vec!["?"; chunk.len()].join(",");
                let mut stmt = conn.prepare(&format!(
                    "SELECT id, video_id, frame_position, phash, created_at
                     FROM video_fingerprints WHERE video_id IN ({})",
                    placeholders
                ))?;
                let rows = stmt.query_map(params_from_iter(chunk.iter()), row_to_fingerprint)?;
                for fp in rows.filter_map(|r| r.ok()) {
                    map.entry(fp.video_id).or_default().push(fp);
                }
            }
            Ok(())
        })?;
        Ok(map)
    }

    /// Every fingerprint in the library except those of `exclude_video`.
    pub fn all_fingerprints_except(
        &self,
        exclude_video: i64,
    ) -> Result<Vec<VideoFingerprint>, DomainError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, video_id, frame_position, phash, created_at
                 FROM video_fingerprints WHERE video_id != ?1",
            )?;
            let rows = stmt.query_map([exclude_video], row_to_fingerprint)?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        })
    }

    pub fn delete_fingerprints_for(&self, video_id: i64) -> Result<usize, DomainError> {
        self.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM video_fingerprints WHERE video_id = ?1", [video_id])?)
        })
    }

    pub fn delete_fingerprint_frame(
        &self,
        video_id: i64,
        fingerprint_id: i64,
    ) -> Result<bool, DomainError> {
        self.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM video_fingerprints WHERE id = ?1 AND video_id = ?2",
                params![fingerprint_id, video_id],
            )? > 0)
        })
    }

    /// (fingerprinted items, total items eligible, total frame rows)
    pub fn fingerprint_stats(&self) -> Result<(i64, i64, i64), DomainError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT
                    (SELECT COUNT(*) FROM videos WHERE fingerprint_generated = 1),
                    (SELECT COUNT(*) FROM videos WHERE category != 'DELETE'),
                    (SELECT COUNT(*) FROM video_fingerprints)",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .map_err(DomainError::from)
        })
    }

    /// Per-category (fingerprinted, total) pairs.
    pub fn fingerprint_stats_by_folder(
        &self,
    ) -> Result<Vec<(String, i64, i64)>, DomainError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT category,
                        COALESCE(SUM(fingerprint_generated = 1), 0),
                        COUNT(*)
                 FROM videos WHERE category != 'DELETE'
                 GROUP BY category ORDER BY category",
            )?;
            let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_scanned_file as scanned;
    use super::super::TestDb;

    #[test]
    fn nearby_positions_are_skipped() {
        let db = TestDb::new("fp_tolerance");
        let (id, _) = db.store.upsert_scanned(&scanned("/root/A/a.mp4", "A")).unwrap();

        assert!(db.store.insert_fingerprint(id, 50, "00ff00ff00ff00ff").unwrap().is_some());
        // Same sample point within tolerance.
        assert!(db.store.insert_fingerprint(id, 51, "1111111111111111").unwrap().is_none());
        assert!(db.store.insert_fingerprint(id, 49, "2222222222222222").unwrap().is_none());
        // Far enough away.
        assert!(db.store.insert_fingerprint(id, 75, "3333333333333333").unwrap().is_some());
        assert_eq!(db.store.fingerprints_for(id).unwrap().len(), 2);
    }

    #[test]
    fn replace_overwrites_previous_set() {
        let db = TestDb::new("fp_replace");
        let (id, _) = db.store.upsert_scanned(&scanned("/root/A/a.mp4", "A")).unwrap();
        db.store.insert_fingerprint(id, 5, "aaaaaaaaaaaaaaaa").unwrap();

        let frames = vec![
            (5, "bbbbbbbbbbbbbbbb".to_string()),
            (50, "cccccccccccccccc".to_string()),
        ];
        db.store.replace_fingerprints(id, &frames).unwrap();
        let stored = db.store.fingerprints_for(id).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].phash, "bbbbbbbbbbbbbbbb");
    }

    #[test]
    fn fingerprints_cascade_with_media() {
        let db = TestDb::new("fp_cascade");
        let (id, _) = db.store.upsert_scanned(&scanned("/root/A/a.mp4", "A")).unwrap();
        db.store.insert_fingerprint(id, 5, "aaaaaaaaaaaaaaaa").unwrap();
        db.store.delete_media(id).unwrap();
        assert!(db.store.fingerprints_for(id).unwrap().is_empty());
    }
}

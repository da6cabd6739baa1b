use crate::domain::{now_epoch, Actor, DomainError};
use rusqlite::{params, params_from_iter};
use std::collections::HashMap;

use super::CatalogStore;

/// Actor names are stored title-cased; uniqueness is case-insensitive at the
/// schema level (COLLATE NOCASE).
fn title_case(name: &str) -> String {
    name.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn row_to_actor(row: &rusqlite::Row) -> rusqlite::Result<Actor> {
    Ok(Actor {
        id: row.get(0)?,
        name: row.get(1)?,
        notes: row.get(2)?,
        video_count: row.get(3)?,
        created_at: row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
    })
}

impl CatalogStore {
    pub fn create_actor(&self, name: &str, notes: Option<&str>) -> Result<Actor, DomainError> {
        let name = title_case(name.trim());
        if name.is_empty() {
            return Err(DomainError::InvalidInput("Actor name cannot be empty".to_string()));
        }
        self.with_conn(|conn| {
            let existing: Option<i64> = conn
                .query_row("SELECT id FROM actors WHERE name = ?1", [&name], |r| r.get(0))
                .ok();
            if existing.is_some() {
                return Err(DomainError::Conflict(format!("Actor '{}' already exists", name)));
            }
            conn.execute(
                "INSERT INTO actors (name, notes, video_count, created_at) VALUES (?1, ?2, 0, ?3)",
                params![name, notes, now_epoch()],
            )?;
            conn.query_row(
                "SELECT id, name, notes, video_count, created_at FROM actors WHERE id = ?1",
                [conn.last_insert_rowid()],
                row_to_actor,
            )
            .map_err(DomainError::from)
        })
    }

    pub fn get_actor(&self, id: i64) -> Result<Option<Actor>, DomainError> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, name, notes, video_count, created_at FROM actors WHERE id = ?1",
                    [id],
                    row_to_actor,
                )
                .ok())
        })
    }

    pub fn list_actors(&self) -> Result<Vec<Actor>, DomainError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, notes, video_count, created_at FROM actors ORDER BY name",
            )?;
            let rows = stmt.query_map([], row_to_actor)?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        })
    }

    pub fn update_actor(
        &self,
        id: i64,
        name: Option<&str>,
        notes: Option<&str>,
    ) -> Result<Actor, DomainError> {
        self.with_conn(|conn| {
            if let Some(name) = name {
                let name = title_case(name.trim());
                let clash: Option<i64> = conn
                    .query_row("SELECT id FROM actors WHERE name = ?1", [&name], |r| r.get(0))
                    .ok();
                if clash.is_some() && clash != Some(id) {
                    return Err(DomainError::Conflict(format!(
                        "Actor '{}' already exists",
                        name
                    )));
                }
                conn.execute("UPDATE actors SET name = ?2 WHERE id = ?1", params![id, name])?;
            }
            if let Some(notes) = notes {
                conn.execute("UPDATE actors SET notes = ?2 WHERE id = ?1", params![id, notes])?;
            }
            conn.query_row(
                "SELECT id, name, notes, video_count, created_at FROM actors WHERE id = ?1",
                [id],
                row_to_actor,
            )
            .map_err(|_| DomainError::NotFound("Actor"))
        })
    }

    pub fn delete_actor(&self, id: i64) -> Result<bool, DomainError> {
        self.with_conn(|conn| {
            // Detach any face identities pointing at this actor first.
            conn.execute("UPDATE face_ids SET actor_id = NULL WHERE actor_id = ?1", [id])?;
            Ok(conn.execute("DELETE FROM actors WHERE id = ?1", [id])? > 0)
        })
    }

    /// Link an actor to a media item, keeping the denormalized video_count in
    /// step. Linking twice is a no-op.
    pub fn link_actor(&self, media_id: i64, actor_id: i64) -> Result<(), DomainError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO video_actors (video_id, actor_id, created_at)
                 VALUES (?1, ?2, ?3)",
                params![media_id, actor_id, now_epoch()],
            )?;
            if inserted > 0 {
                tx.execute(
                    "UPDATE actors SET video_count = video_count + 1 WHERE id = ?1",
                    [actor_id],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn unlink_actor(&self, media_id: i64, actor_id: i64) -> Result<(), DomainError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute(
                "DELETE FROM video_actors WHERE video_id = ?1 AND actor_id = ?2",
                params![media_id, actor_id],
            )?;
            if removed > 0 {
                tx.execute(
                    "UPDATE actors SET video_count = MAX(video_count - 1, 0) WHERE id = ?1",
                    [actor_id],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Recount after cascading deletes so the denormalized counter matches
    /// the junction table again.
    pub fn recount_actor_links(&self) -> Result<usize, DomainError> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE actors SET video_count = (
                    SELECT COUNT(DISTINCT video_id) FROM video_actors
                    WHERE video_actors.actor_id = actors.id
                )",
                [],
            )?;
            Ok(updated)
        })
    }

    pub fn media_for_actor(&self, actor_id: i64) -> Result<Vec<crate::domain::MediaItem>, DomainError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT v.id FROM videos v
                 JOIN video_actors va ON va.video_id = v.id
                 WHERE va.actor_id = ?1 ORDER BY v.modified DESC",
            )?;
            let rows = stmt.query_map([actor_id], |r| r.get::<_, i64>(0))?;
            Ok(rows.filter_map(|r| r.ok()).collect::<Vec<i64>>())
        })
        .and_then(|ids| self.get_media_many(&ids))
    }

    pub(crate) fn actors_for_media_bulk(
        &self,
        media_ids: &[i64],
    ) -> Result<HashMap<i64, Vec<Actor>>, DomainError> {
        let mut map: HashMap<i64, Vec<Actor>> = HashMap::new();
        if media_ids.is_empty() {
            return Ok(map);
        }
        self.with_conn(|conn| {
            for chunk in media_ids.chunks(500) {
                let placeholders = vec!["?"; chunk.len()].join(",");
                let mut stmt = conn.prepare(&format!(
                    "SELECT va.video_id, a.id, a.name, a.notes, a.video_count, a.created_at
                     FROM video_actors va JOIN actors a ON a.id = va.actor_id
                     WHERE va.video_id IN ({}) ORDER BY a.name",
                    placeholders
                ))?;
                let rows = stmt.query_map(params_from_iter(chunk.iter()), |r| {
                    Ok((
                        r.get::<_, i64>(0)?,
                        Actor {
                            id: r.get(1)?,
                            name: r.get(2)?,
                            notes: r.get(3)?,
                            video_count: r.get(4)?,
                            created_at: r.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
                        },
                    ))
                })?;
                for row in rows.filter_map(|r| r.ok()) {
                    map.entry(row.0).or_default().push(row.1);
                }
            }
            Ok(())
        })?;
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_scanned_file as scanned;
    use super::super::TestDb;
    use super::*;

    #[test]
    fn names_are_title_cased_and_case_insensitively_unique() {
        let db = TestDb::new("actors_case");
        let actor = db.store.create_actor("tom cruise", None).unwrap();
        assert_eq!(actor.name, "Tom Cruise");
        let err = db.store.create_actor("TOM CRUISE", None).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn link_unlink_maintains_video_count() {
        let db = TestDb::new("actors_count");
        let actor = db.store.create_actor("Jane Doe", None).unwrap();
        let (v1, _) = db.store.upsert_scanned(&scanned("/root/A/a.mp4", "A")).unwrap();
        let (v2, _) = db.store.upsert_scanned(&scanned("/root/A/b.mp4", "A")).unwrap();

        db.store.link_actor(v1, actor.id).unwrap();
        db.store.link_actor(v1, actor.id).unwrap(); // idempotent
        db.store.link_actor(v2, actor.id).unwrap();
        assert_eq!(db.store.get_actor(actor.id).unwrap().unwrap().video_count, 2);

        db.store.unlink_actor(v1, actor.id).unwrap();
        assert_eq!(db.store.get_actor(actor.id).unwrap().unwrap().video_count, 1);
    }

    #[test]
    fn recount_repairs_counter_after_cascade() {
        let db = TestDb::new("actors_recount");
        let actor = db.store.create_actor("Jane Doe", None).unwrap();
        let (v1, _) = db.store.upsert_scanned(&scanned("/root/A/a.mp4", "A")).unwrap();
        db.store.link_actor(v1, actor.id).unwrap();

        // Deleting the media cascades the junction row but not the counter.
        db.store.delete_media(v1).unwrap();
        db.store.recount_actor_links().unwrap();
        assert_eq!(db.store.get_actor(actor.id).unwrap().unwrap().video_count, 0);
    }
}

use crate::domain::{DomainError, Tag};
use rusqlite::{params, params_from_iter};
use std::collections::HashMap;

use super::CatalogStore;

/// Deterministic vibrant color for a tag name. FNV-1a over the lowercased
/// name picks the hue and one of three saturation/lightness bands, so the
/// same name always renders the same color and a regeneration pass is a
/// no-op unless the derivation itself changes.
pub fn vibrant_color(name: &str) -> String {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in name.to_lowercase().bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    let hue = (hash % 360) as f64;
    let (saturation, lightness) = match (hash >> 9) % 3 {
        0 => (0.72, 0.46),
        1 => (0.65, 0.52),
        _ => (0.80, 0.42),
    };
    let (r, g, b) = hsl_to_rgb(hue, saturation, lightness);
    format!("#{:02x}{:02x}{:02x}", r, g, b)
}

fn hsl_to_rgb(h: f64, s: f64, l: f64) -> (u8, u8, u8) {
    let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let hp = h / 60.0;
    let x = c * (1.0 - (hp % 2.0 - 1.0).abs());
    let (r1, g1, b1) = match hp as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = l - c / 2.0;
    (
        ((r1 + m) * 255.0).round() as u8,
        ((g1 + m) * 255.0).round() as u8,
        ((b1 + m) * 255.0).round() as u8,
    )
}

fn row_to_tag(row: &rusqlite::Row) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: row.get(0)?,
        name: row.get(1)?,
        color: row.get(2)?,
    })
}

impl CatalogStore {
    /// Tag names are stored lowercased and unique; the color is derived from
    /// the name on first use.
    pub fn get_or_create_tag(&self, name: &str) -> Result<Tag, DomainError> {
        let name = name.trim().to_lowercase();
        if name.is_empty() {
            return Err(DomainError::InvalidInput("Tag name cannot be empty".to_string()));
        }
        self.with_conn(|conn| {
            if let Ok(tag) = conn.query_row(
                "SELECT id, name, color FROM tags WHERE name = ?1",
                [&name],
                row_to_tag,
            ) {
                return Ok(tag);
            }
            let color = vibrant_color(&name);
            conn.execute(
                "INSERT INTO tags (name, color) VALUES (?1, ?2)",
                params![name, color],
            )?;
            Ok(Tag {
                id: conn.last_insert_rowid(),
                name,
                color,
            })
        })
    }

    pub fn add_tag_to_media(&self, media_id: i64, tag_name: &str) -> Result<Tag, DomainError> {
        let tag = self.get_or_create_tag(tag_name)?;
        self.with_conn(|conn| {
            let exists: i64 =
                conn.query_row("SELECT COUNT(*) FROM videos WHERE id = ?1", [media_id], |r| {
                    r.get(0)
                })?;
            if exists == 0 {
                return Err(DomainError::NotFound("Video"));
            }
            conn.execute(
                "INSERT OR IGNORE INTO video_tags (video_id, tag_id) VALUES (?1, ?2)",
                params![media_id, tag.id],
            )?;
            Ok(())
        })?;
        Ok(tag)
    }

    pub fn remove_tag_from_media(&self, media_id: i64, tag_id: i64) -> Result<(), DomainError> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM video_tags WHERE video_id = ?1 AND tag_id = ?2",
                params![media_id, tag_id],
            )?;
            Ok(())
        })
    }

    pub fn list_tags(&self) -> Result<Vec<Tag>, DomainError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, name, color FROM tags ORDER BY name")?;
            let rows = stmt.query_map([], row_to_tag)?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        })
    }

    pub fn delete_tag(&self, tag_id: i64) -> Result<bool, DomainError> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM tags WHERE id = ?1", [tag_id])? > 0))
    }

    pub fn rename_tag(&self, tag_id: i64, new_name: &str) -> Result<Tag, DomainError> {
        let new_name = new_name.trim().to_lowercase();
        if new_name.is_empty() {
            return Err(DomainError::InvalidInput("Tag name cannot be empty".to_string()));
        }
        self.with_conn(|conn| {
            let existing: Option<i64> = conn
                .query_row("SELECT id FROM tags WHERE name = ?1", [&new_name], |r| r.get(0))
                .ok();
            if let Some(existing_id) = existing {
                if existing_id != tag_id {
                    return Err(DomainError::Conflict(format!(
                        "Tag '{}' already exists",
                        new_name
                    )));
                }
            }
            let changed = conn.execute(
                "UPDATE tags SET name = ?2 WHERE id = ?1",
                params![tag_id, new_name],
            )?;
            if changed == 0 {
                return Err(DomainError::NotFound("Tag"));
            }
            conn.query_row(
                "SELECT id, name, color FROM tags WHERE id = ?1",
                [tag_id],
                row_to_tag,
            )
            .map_err(DomainError::from)
        })
    }

    pub fn unused_tags(&self) -> Result<Vec<Tag>, DomainError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT t.id, t.name, t.color FROM tags t
                 LEFT JOIN video_tags vt ON vt.tag_id = t.id
                 GROUP BY t.id HAVING COUNT(vt.video_id) = 0
                 ORDER BY t.name",
            )?;
            let rows = stmt.query_map([], row_to_tag)?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        })
    }

    pub fn delete_unused_tags(&self) -> Result<usize, DomainError> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM tags WHERE id NOT IN (SELECT DISTINCT tag_id FROM video_tags)",
                [],
            )?;
            Ok(deleted)
        })
    }

    pub fn regenerate_tag_colors(&self) -> Result<usize, DomainError> {
        self.with_conn(|conn| {
            let names: Vec<(i64, String)> = {
                let mut stmt = conn.prepare("SELECT id, name FROM tags")?;
                let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?;
                rows.filter_map(|r| r.ok()).collect()
            };
            let mut updated = 0;
            for (id, name) in names {
                updated += conn.execute(
                    "UPDATE tags SET color = ?2 WHERE id = ?1",
                    params![id, vibrant_color(&name)],
                )?;
            }
            Ok(updated)
        })
    }

    pub(crate) fn tags_for_media_bulk(
        &self,
        media_ids: &[i64],
    ) -> Result<HashMap<i64, Vec<Tag>>, DomainError> {
        let mut map: HashMap<i64, Vec<Tag>> = HashMap::new();
        if media_ids.is_empty() {
            return Ok(map);
        }
        self.with_conn(|conn| {
            for chunk in media_ids.chunks(500) {
                let placeholders = vec!["?"; chunk.len()].join(",");
                let mut stmt = conn.prepare(&format!(
                    "SELECT vt.video_id, t.id, t.name, t.color
                     FROM video_tags vt JOIN tags t ON t.id = vt.tag_id
                     WHERE vt.video_id IN ({}) ORDER BY t.name",
                    placeholders
                ))?;
                let rows = stmt.query_map(params_from_iter(chunk.iter()), |r| {
                    Ok((
                        r.get::<_, i64>(0)?,
                        Tag {
                            id: r.get(1)?,
                            name: r.get(2)?,
                            color: r.get(3)?,
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

    pub(crate) fn copy_tags(&self, from_media: i64, to_media: i64) -> Result<usize, DomainError> {
        self.with_conn(|conn| {
            let copied = conn.execute(
                "INSERT OR IGNORE INTO video_tags (video_id, tag_id)
                 SELECT ?2, tag_id FROM video_tags WHERE video_id = ?1",
                params![from_media, to_media],
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

    #[test]
    fn color_is_deterministic_and_well_formed() {
        let a = vibrant_color("keep");
        let b = vibrant_color("KEEP");
        assert_eq!(a, b);
        assert_eq!(a.len(), 7);
        assert!(a.starts_with('#'));
        // Different names should normally land on different colors.
        assert_ne!(vibrant_color("alpha"), vibrant_color("beta"));
    }

    #[test]
    fn tags_are_lowercased_and_unique() {
        let db = TestDb::new("tags_unique");
        let first = db.store.get_or_create_tag("Keep").unwrap();
        let second = db.store.get_or_create_tag("keep").unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.name, "keep");
        assert_eq!(db.store.list_tags().unwrap().len(), 1);
    }

    #[test]
    fn unused_tags_are_listed_and_deleted() {
        let db = TestDb::new("tags_unused");
        let (id, _) = db.store.upsert_scanned(&scanned("/root/A/a.mp4", "A")).unwrap();
        db.store.add_tag_to_media(id, "used").unwrap();
        db.store.get_or_create_tag("dangling").unwrap();

        let unused = db.store.unused_tags().unwrap();
        assert_eq!(unused.len(), 1);
        assert_eq!(unused[0].name, "dangling");

        assert_eq!(db.store.delete_unused_tags().unwrap(), 1);
        assert_eq!(db.store.list_tags().unwrap().len(), 1);
    }

    #[test]
    fn rename_into_existing_conflicts() {
        let db = TestDb::new("tags_rename");
        let a = db.store.get_or_create_tag("a").unwrap();
        db.store.get_or_create_tag("b").unwrap();
        let err = db.store.rename_tag(a.id, "b").unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        // Renaming to itself is fine.
        db.store.rename_tag(a.id, "A").unwrap();
    }

    #[test]
    fn tag_links_cascade_with_media() {
        let db = TestDb::new("tags_cascade");
        let (id, _) = db.store.upsert_scanned(&scanned("/root/A/a.mp4", "A")).unwrap();
        db.store.add_tag_to_media(id, "keep").unwrap();
        db.store.delete_media(id).unwrap();
        let unused = db.store.unused_tags().unwrap();
        assert_eq!(unused.len(), 1);
    }
}

use crate::domain::{now_epoch, DomainError, FolderGroup, FolderScanStatus};
use rusqlite::params;

use super::CatalogStore;

fn row_to_group(row: &rusqlite::Row) -> rusqlite::Result<FolderGroup> {
    let folders_json: String = row.get(2)?;
    Ok(FolderGroup {
        id: row.get(0)?,
        name: row.get(1)?,
        folders: serde_json::from_str(&folders_json).unwrap_or_default(),
        icon: row.get(3)?,
        color: row.get(4)?,
        is_system: row.get::<_, i64>(5)? != 0,
        position: row.get(6)?,
        created_at: row.get::<_, Option<f64>>(7)?.unwrap_or(0.0),
        updated_at: row.get::<_, Option<f64>>(8)?.unwrap_or(0.0),
    })
}

const GROUP_COLUMNS: &str =
    "id, name, folders, icon, color, is_system, position, created_at, updated_at";

impl CatalogStore {
    pub fn create_folder_group(
        &self,
        name: &str,
        folders: &[String],
        icon: Option<&str>,
        color: Option<&str>,
    ) -> Result<FolderGroup, DomainError> {
        if name.trim().is_empty() {
            return Err(DomainError::InvalidInput("Group name cannot be empty".to_string()));
        }
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_epoch();
        self.with_conn(|conn| {
            let position: i64 = conn
                .query_row("SELECT COALESCE(MAX(position) + 1, 0) FROM folder_groups", [], |r| {
                    r.get(0)
                })
                .unwrap_or(0);
            conn.execute(
                "INSERT INTO folder_groups (id, name, folders, icon, color, is_system, position,
                    created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?7)",
                params![
                    id,
                    name.trim(),
                    serde_json::to_string(folders).unwrap_or_else(|_| "[]".to_string()),
                    icon.unwrap_or("📁"),
                    color.unwrap_or("#f3f4f6"),
                    position,
                    now,
                ],
            )?;
            conn.query_row(
                &format!("SELECT {} FROM folder_groups WHERE id = ?1", GROUP_COLUMNS),
                [&id],
                row_to_group,
            )
            .map_err(DomainError::from)
        })
    }

    pub fn list_folder_groups(&self) -> Result<Vec<FolderGroup>, DomainError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM folder_groups ORDER BY position, name",
                GROUP_COLUMNS
            ))?;
            let rows = stmt.query_map([], row_to_group)?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        })
    }

    pub fn update_folder_group(
        &self,
        id: &str,
        name: Option<&str>,
        folders: Option<&[String]>,
        icon: Option<&str>,
        color: Option<&str>,
    ) -> Result<FolderGroup, DomainError> {
        self.with_conn(|conn| {
            if let Some(name) = name {
                conn.execute(
                    "UPDATE folder_groups SET name = ?2 WHERE id = ?1",
                    params![id, name.trim()],
                )?;
            }
            if let Some(folders) = folders {
                conn.execute(
                    "UPDATE folder_groups SET folders = ?2 WHERE id = ?1",
                    params![
                        id,
                        serde_json::to_string(folders).unwrap_or_else(|_| "[]".to_string())
                    ],
                )?;
            }
            if let Some(icon) = icon {
                conn.execute("UPDATE folder_groups SET icon = ?2 WHERE id = ?1", params![id, icon])?;
            }
            if let Some(color) = color {
                conn.execute(
                    "UPDATE folder_groups SET color = ?2 WHERE id = ?1",
                    params![id, color],
                )?;
            }
            conn.execute(
                "UPDATE folder_groups SET updated_at = ?2 WHERE id = ?1",
                params![id, now_epoch()],
            )?;
            conn.query_row(
                &format!("SELECT {} FROM folder_groups WHERE id = ?1", GROUP_COLUMNS),
                [id],
                row_to_group,
            )
            .map_err(|_| DomainError::NotFound("Folder group"))
        })
    }

    pub fn delete_folder_group(&self, id: &str) -> Result<bool, DomainError> {
        self.with_conn(|conn| {
            let is_system: Option<i64> = conn
                .query_row("SELECT is_system FROM folder_groups WHERE id = ?1", [id], |r| r.get(0))
                .ok();
            match is_system {
                None => Ok(false),
                Some(v) if v != 0 => Err(DomainError::Forbidden(
                    "System groups cannot be deleted".to_string(),
                )),
                Some(_) => Ok(conn.execute("DELETE FROM folder_groups WHERE id = ?1", [id])? > 0),
            }
        })
    }

    pub fn reorder_folder_groups(&self, ordered_ids: &[String]) -> Result<(), DomainError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            for (position, id) in ordered_ids.iter().enumerate() {
                tx.execute(
                    "UPDATE folder_groups SET position = ?2, updated_at = ?3 WHERE id = ?1",
                    params![id, position as i64, now_epoch()],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn upsert_scan_status(
        &self,
        folder_name: &str,
        video_count: i64,
        scan_duration: f64,
    ) -> Result<(), DomainError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO folder_scan_status
                    (folder_name, last_scanned, video_count, scan_duration, is_scanned)
                 VALUES (?1, ?2, ?3, ?4, 1)
                 ON CONFLICT(folder_name) DO UPDATE SET
                    last_scanned = excluded.last_scanned,
                    video_count = excluded.video_count,
                    scan_duration = excluded.scan_duration,
                    is_scanned = 1",
                params![folder_name, now_epoch(), video_count, scan_duration],
            )?;
            Ok(())
        })
    }

    pub fn list_scan_status(&self) -> Result<Vec<FolderScanStatus>, DomainError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT folder_name, last_scanned, video_count, scan_duration, is_scanned
                 FROM folder_scan_status ORDER BY folder_name",
            )?;
            let rows = stmt.query_map([], |r| {
                Ok(FolderScanStatus {
                    folder_name: r.get(0)?,
                    last_scanned: r.get(1)?,
                    video_count: r.get(2)?,
                    scan_duration: r.get(3)?,
                    is_scanned: r.get::<_, i64>(4)? != 0,
                })
            })?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        })
    }

    pub fn rename_scan_status(&self, old_name: &str, new_name: &str) -> Result<(), DomainError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE folder_scan_status SET folder_name = ?2 WHERE folder_name = ?1",
                params![old_name, new_name],
            )?;
            conn.execute(
                "UPDATE categories SET name = ?2 WHERE name = ?1",
                params![old_name, new_name],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::TestDb;
    use crate::domain::DomainError;

    #[test]
    fn group_crud_and_reorder() {
        let db = TestDb::new("groups_crud");
        let a = db
            .store
            .create_folder_group("Favorites", &["A".to_string(), "B".to_string()], None, None)
            .unwrap();
        let b = db.store.create_folder_group("Review", &[], Some("⭐"), None).unwrap();
        assert_eq!(a.position, 0);
        assert_eq!(b.position, 1);
        assert_eq!(a.folders, vec!["A".to_string(), "B".to_string()]);

        db.store
            .reorder_folder_groups(&[b.id.clone(), a.id.clone()])
            .unwrap();
        let listed = db.store.list_folder_groups().unwrap();
        assert_eq!(listed[0].name, "Review");

        let updated = db
            .store
            .update_folder_group(&a.id, Some("Keep"), Some(&["C".to_string()]), None, None)
            .unwrap();
        assert_eq!(updated.name, "Keep");
        assert_eq!(updated.folders, vec!["C".to_string()]);

        assert!(db.store.delete_folder_group(&a.id).unwrap());
        assert!(!db.store.delete_folder_group("nope").unwrap());
    }

    #[test]
    fn system_groups_resist_deletion() {
        let db = TestDb::new("groups_system");
        let group = db.store.create_folder_group("Sys", &[], None, None).unwrap();
        db.store
            .with_conn(|conn| {
                conn.execute("UPDATE folder_groups SET is_system = 1 WHERE id = ?1", [&group.id])?;
                Ok(())
            })
            .unwrap();
        let err = db.store.delete_folder_group(&group.id).unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));
    }

    #[test]
    fn scan_status_upserts() {
        let db = TestDb::new("groups_status");
        db.store.upsert_scan_status("A", 3, 0.5).unwrap();
        db.store.upsert_scan_status("A", 5, 0.7).unwrap();
        let statuses = db.store.list_scan_status().unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].video_count, 5);
        assert!(statuses[0].is_scanned);
    }
}

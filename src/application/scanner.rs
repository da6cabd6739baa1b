use crate::domain::{MediaType, ScannedFile};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

pub const VIDEO_EXTENSIONS: [&str; 7] = [".mp4", ".mov", ".avi", ".mkv", ".wmv", ".flv", ".webm"];
pub const IMAGE_EXTENSIONS: [&str; 5] = [".jpg", ".jpeg", ".png", ".gif", ".webp"];

/// Pure function of disk state: walks directories, classifies files by
/// extension, and emits stable descriptors. No I/O beyond stat.
#[derive(Debug, Clone)]
pub struct FileScanner {
    excluded_folders: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubfolderInfo {
    pub name: String,
    pub path: String,
    pub full_category_path: String,
    pub direct_video_count: usize,
    pub has_subfolders: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HierarchicalScan {
    pub folder_name: String,
    pub folder_path: String,
    pub parent_category: Option<String>,
    pub direct_videos: Vec<ScannedFile>,
    pub available_subfolders: Vec<SubfolderInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FolderNode {
    pub name: String,
    pub video_count: usize,
    pub children: BTreeMap<String, FolderNode>,
}

pub fn media_type_of(path: &Path) -> Option<MediaType> {
    let ext = extension_of(path);
    if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaType::Video)
    } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaType::Image)
    } else {
        None
    }
}

pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

impl FileScanner {
    pub fn new(excluded_folders: Vec<String>) -> FileScanner {
        FileScanner { excluded_folders }
    }

    pub fn should_exclude(&self, folder_name: &str) -> bool {
        folder_name.starts_with('.') || self.excluded_folders.iter().any(|f| f == folder_name)
    }

    fn describe(
        &self,
        path: &Path,
        category: &str,
        subcategory: Option<String>,
        relative_path: String,
    ) -> Option<ScannedFile> {
        let media_type = media_type_of(path)?;
        let meta = path.metadata().ok()?;
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        let mut breadcrumbs = vec![category.to_string()];
        if let Some(sub) = &subcategory {
            breadcrumbs.extend(sub.split('/').map(str::to_string));
        }

        Some(ScannedFile {
            path: path.to_string_lossy().to_string(),
            name: path.file_name()?.to_string_lossy().to_string(),
            size: meta.len() as i64,
            modified,
            extension: extension_of(path),
            media_type,
            category: category.to_string(),
            subcategory,
            relative_path,
            breadcrumbs,
        })
    }

    /// Recursive scan of one category: every recognized file under it, with
    /// computed subcategory and breadcrumbs.
    pub fn scan_category(&self, category_path: &Path) -> Vec<ScannedFile> {
        let category = match category_path.file_name() {
            Some(name) => name.to_string_lossy().to_string(),
            None => return Vec::new(),
        };
        let mut files = Vec::new();
        self.walk(category_path, category_path, &category, &mut files);
        files
    }

    fn walk(&self, base: &Path, dir: &Path, category: &str, out: &mut Vec<ScannedFile>) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                let name = entry.file_name().to_string_lossy().to_string();
                if !self.should_exclude(&name) {
                    self.walk(base, &path, category, out);
                }
                continue;
            }
            let relative = match path.strip_prefix(base) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            let relative_path = relative.to_string_lossy().replace('\\', "/");
            let subcategory = relative
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| p.to_string_lossy().replace('\\', "/"));
            if let Some(file) = self.describe(&path, category, subcategory, relative_path) {
                out.push(file);
            }
        }
    }

    /// Direct-only scan: just the files sitting in the category directory.
    pub fn scan_category_direct(&self, category_path: &Path) -> Vec<ScannedFile> {
        let category = match category_path.file_name() {
            Some(name) => name.to_string_lossy().to_string(),
            None => return Vec::new(),
        };
        let entries = match std::fs::read_dir(category_path) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };
        entries
            .flatten()
            .filter(|e| e.path().is_file())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                self.describe(&e.path(), &category, None, name)
            })
            .collect()
    }

    /// Files directly under the root itself (virtual category `_root`).
    pub fn scan_root_files(&self, root: &Path) -> Vec<ScannedFile> {
        let entries = match std::fs::read_dir(root) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };
        entries
            .flatten()
            .filter(|e| e.path().is_file())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                self.describe(&e.path(), "_root", None, name)
            })
            .collect()
    }

    /// Category directories of a root, exclusions applied.
    pub fn list_categories(&self, root: &Path) -> Vec<String> {
        let mut names: Vec<String> = match std::fs::read_dir(root) {
            Ok(entries) => entries
                .flatten()
                .filter(|e| e.path().is_dir())
                .map(|e| e.file_name().to_string_lossy().to_string())
                .filter(|name| !self.should_exclude(name))
                .collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }

    /// Direct files plus a shallow preview of immediate subfolders, for lazy
    /// explorer expansion.
    pub fn scan_hierarchical(
        &self,
        folder_path: &Path,
        parent_category: Option<&str>,
    ) -> HierarchicalScan {
        let folder_name = folder_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let mut direct_videos = Vec::new();
        let mut available_subfolders = Vec::new();

        if let Ok(entries) = std::fs::read_dir(folder_path) {
            for entry in entries.flatten() {
                let path = entry.path();
                let name = entry.file_name().to_string_lossy().to_string();
                if path.is_file() {
                    let (category, subcategory, relative) = match parent_category {
                        Some(parent) => (
                            parent.to_string(),
                            Some(folder_name.clone()),
                            format!("{}/{}", folder_name, name),
                        ),
                        None => (folder_name.clone(), None, name.clone()),
                    };
                    if let Some(file) = self.describe(&path, &category, subcategory, relative) {
                        direct_videos.push(file);
                    }
                } else if path.is_dir() && !self.should_exclude(&name) {
                    let mut direct_count = 0;
                    let mut has_subfolders = false;
                    if let Ok(subentries) = std::fs::read_dir(&path) {
                        for sub in subentries.flatten() {
                            let sub_path = sub.path();
                            if sub_path.is_file() && media_type_of(&sub_path).is_some() {
                                direct_count += 1;
                            } else if sub_path.is_dir()
                                && !self.should_exclude(&sub.file_name().to_string_lossy())
                            {
                                has_subfolders = true;
                            }
                        }
                    }
                    available_subfolders.push(SubfolderInfo {
                        full_category_path: match parent_category {
                            Some(_) => format!("{}/{}", folder_name, name),
                            None => name.clone(),
                        },
                        name,
                        path: path.to_string_lossy().to_string(),
                        direct_video_count: direct_count,
                        has_subfolders,
                    });
                }
            }
        }

        available_subfolders.sort_by(|a, b| a.name.cmp(&b.name));
        HierarchicalScan {
            folder_name,
            folder_path: folder_path.to_string_lossy().to_string(),
            parent_category: parent_category.map(str::to_string),
            direct_videos,
            available_subfolders,
        }
    }

    /// Nested folder tree of one category with per-node media counts.
    pub fn category_structure(&self, category_path: &Path) -> FolderNode {
        let mut root = FolderNode {
            name: category_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            video_count: 0,
            children: BTreeMap::new(),
        };
        for file in self.scan_category(category_path) {
            root.video_count += 1;
            if let Some(sub) = &file.subcategory {
                let mut node = &mut root;
                for part in sub.split('/') {
                    node = node
                        .children
                        .entry(part.to_string())
                        .or_insert_with(|| FolderNode {
                            name: part.to_string(),
                            video_count: 0,
                            children: BTreeMap::new(),
                        });
                    node.video_count += 1;
                }
            }
        }
        root
    }

    /// Every subfolder path (relative to its category) per category.
    pub fn all_subfolders(&self, root: &Path) -> BTreeMap<String, Vec<String>> {
        let mut map = BTreeMap::new();
        for category in self.list_categories(root) {
            let base = root.join(&category);
            let mut subs = Vec::new();
            self.collect_subfolders(&base, &base, &mut subs);
            subs.sort();
            map.insert(category, subs);
        }
        map
    }

    fn collect_subfolders(&self, base: &Path, dir: &Path, out: &mut Vec<String>) {
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    let name = entry.file_name().to_string_lossy().to_string();
                    if self.should_exclude(&name) {
                        continue;
                    }
                    if let Ok(rel) = path.strip_prefix(base) {
                        out.push(rel.to_string_lossy().replace('\\', "/"));
                    }
                    self.collect_subfolders(base, &path, out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scanner() -> FileScanner {
        FileScanner::new(vec!["Temp".to_string(), ".clipper".to_string()])
    }

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"data").unwrap();
    }

    #[test]
    fn classification_by_extension() {
        assert_eq!(media_type_of(Path::new("a/x.MP4")), Some(MediaType::Video));
        assert_eq!(media_type_of(Path::new("a/x.webp")), Some(MediaType::Image));
        assert_eq!(media_type_of(Path::new("a/x.txt")), None);
        assert_eq!(media_type_of(Path::new("a/noext")), None);
    }

    #[test]
    fn recursive_scan_computes_subcategories() {
        let dir = tempfile::tempdir().unwrap();
        let cat = dir.path().join("Movies");
        touch(&cat.join("top.mp4"));
        touch(&cat.join("Action/2023/deep.mkv"));
        touch(&cat.join("Action/skip.txt"));
        touch(&cat.join("Temp/excluded.mp4"));
        touch(&cat.join(".hidden/excluded.mp4"));

        let mut files = scanner().scan_category(&cat);
        files.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(files.len(), 2);

        let deep = files.iter().find(|f| f.name == "deep.mkv").unwrap();
        assert_eq!(deep.category, "Movies");
        assert_eq!(deep.subcategory.as_deref(), Some("Action/2023"));
        assert_eq!(deep.relative_path, "Action/2023/deep.mkv");
        assert_eq!(deep.breadcrumbs, vec!["Movies", "Action", "2023"]);

        let top = files.iter().find(|f| f.name == "top.mp4").unwrap();
        assert_eq!(top.subcategory, None);
        assert_eq!(top.breadcrumbs, vec!["Movies"]);
    }

    #[test]
    fn direct_scan_ignores_subfolders() {
        let dir = tempfile::tempdir().unwrap();
        let cat = dir.path().join("Movies");
        touch(&cat.join("top.mp4"));
        touch(&cat.join("Sub/nested.mp4"));

        let files = scanner().scan_category_direct(&cat);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "top.mp4");
    }

    #[test]
    fn hierarchical_scan_previews_subfolders() {
        let dir = tempfile::tempdir().unwrap();
        let cat = dir.path().join("Movies");
        touch(&cat.join("direct.mp4"));
        touch(&cat.join("Sub/one.mp4"));
        touch(&cat.join("Sub/two.jpg"));
        touch(&cat.join("Sub/Deeper/three.mp4"));

        let scan = scanner().scan_hierarchical(&cat, None);
        assert_eq!(scan.direct_videos.len(), 1);
        assert_eq!(scan.available_subfolders.len(), 1);
        let sub = &scan.available_subfolders[0];
        assert_eq!(sub.direct_video_count, 2);
        assert!(sub.has_subfolders);
        assert_eq!(sub.full_category_path, "Sub");
    }

    #[test]
    fn structure_counts_nested_media() {
        let dir = tempfile::tempdir().unwrap();
        let cat = dir.path().join("Movies");
        touch(&cat.join("a.mp4"));
        touch(&cat.join("Sub/b.mp4"));
        touch(&cat.join("Sub/c.mp4"));

        let structure = scanner().category_structure(&cat);
        assert_eq!(structure.video_count, 3);
        assert_eq!(structure.children["Sub"].video_count, 2);
    }

    #[test]
    fn excluded_and_dot_folders_are_skipped() {
        let s = scanner();
        assert!(s.should_exclude("Temp"));
        assert!(s.should_exclude(".clipper"));
        assert!(s.should_exclude(".anything"));
        assert!(!s.should_exclude("Movies"));
    }
}

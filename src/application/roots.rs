use crate::domain::DomainError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

const DEFAULT_EXCLUDED: &str = "Temp,.DS_Store,.clipper,@eaDir";

/// Process configuration, read once at startup from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub debug: bool,
    pub excluded_folders: Vec<String>,
    pub cors_origins: Vec<String>,
    pub local_mode: bool,
    pub db_path_override: Option<PathBuf>,
    pub face_detect_model: PathBuf,
    pub face_embed_model: PathBuf,
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

impl Settings {
    pub fn from_env() -> Settings {
        let port = std::env::var("CLIPPER_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8000);
        let excluded = std::env::var("CLIPPER_EXCLUDED_FOLDERS")
            .unwrap_or_else(|_| DEFAULT_EXCLUDED.to_string());
        let cors_default = format!("http://localhost:{0},http://127.0.0.1:{0}", port);
        let cors = std::env::var("CLIPPER_CORS_ORIGINS").unwrap_or(cors_default);

        Settings {
            host: std::env::var("CLIPPER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port,
            debug: env_flag("CLIPPER_DEBUG"),
            excluded_folders: excluded
                .split(',')
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect(),
            cors_origins: cors
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect(),
            local_mode: env_flag("CLIPPER_LOCAL_MODE"),
            db_path_override: std::env::var("CLIPPER_DB_PATH").ok().map(PathBuf::from),
            face_detect_model: std::env::var("CLIPPER_FACE_DETECT_MODEL")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("assets/models/version-slim-320.onnx")),
            face_embed_model: std::env::var("CLIPPER_FACE_EMBED_MODEL")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("assets/models/w600k_mbf.onnx")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootEntry {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub default: bool,
    #[serde(default = "default_layout")]
    pub layout: String,
}

fn default_layout() -> String {
    "horizontal".to_string()
}

#[derive(Debug, Deserialize)]
struct RootsFile {
    #[serde(default)]
    roots: Vec<RootEntry>,
    #[serde(default = "default_true", rename = "rememberLastRoot")]
    #[allow(dead_code)]
    remember_last_root: bool,
}

fn default_true() -> bool {
    true
}

/// Configured roots plus the active selection. The engine swap itself happens
/// at the presentation layer; this just tracks which entry is live.
pub struct RootManager {
    roots: Vec<RootEntry>,
    active: Mutex<usize>,
}

impl RootManager {
    /// Load `roots.json`, falling back to `CLIPPER_ROOT_DIRECTORY` (or
    /// `./videos`) when it is absent or unreadable.
    pub fn load(config_path: &Path) -> Result<RootManager, DomainError> {
        let roots = match std::fs::read_to_string(config_path) {
            Ok(raw) => match serde_json::from_str::<RootsFile>(&raw) {
                Ok(parsed) if !parsed.roots.is_empty() => {
                    info!("Loaded {} roots from {}", parsed.roots.len(), config_path.display());
                    parsed.roots
                }
                Ok(_) => return Err(DomainError::InvalidInput("No roots configured".to_string())),
                Err(e) => {
                    warn!("Unreadable {}: {}", config_path.display(), e);
                    vec![Self::fallback_root()]
                }
            },
            Err(_) => {
                let fallback = Self::fallback_root();
                warn!(
                    "{} not found, using root directory {}",
                    config_path.display(),
                    fallback.path
                );
                vec![fallback]
            }
        };

        let active = roots.iter().position(|r| r.default).unwrap_or(0);
        Ok(RootManager {
            roots,
            active: Mutex::new(active),
        })
    }

    fn fallback_root() -> RootEntry {
        RootEntry {
            name: "Default".to_string(),
            path: std::env::var("CLIPPER_ROOT_DIRECTORY").unwrap_or_else(|_| "./videos".to_string()),
            default: true,
            layout: default_layout(),
        }
    }

    pub fn list(&self) -> Vec<RootEntry> {
        self.roots.clone()
    }

    pub fn current(&self) -> RootEntry {
        self.roots[*self.active.lock().unwrap()].clone()
    }

    /// Mark a root active by name. The caller is responsible for rebuilding
    /// the engine before any request observes the change.
    pub fn select(&self, name: &str) -> Result<RootEntry, DomainError> {
        let index = self
            .roots
            .iter()
            .position(|r| r.name == name)
            .ok_or(DomainError::NotFound("Root"))?;
        *self.active.lock().unwrap() = index;
        Ok(self.roots[index].clone())
    }
}

/// Filesystem layout under one root.
#[derive(Debug, Clone)]
pub struct RootPaths {
    pub root: PathBuf,
    pub catalog_db: PathBuf,
    pub thumbnails_db: PathBuf,
}

/// Create the dot-directory skeleton for a root and resolve its store paths.
pub fn prepare_root(
    root: &Path,
    db_override: Option<&Path>,
) -> Result<RootPaths, DomainError> {
    std::fs::create_dir_all(root)?;
    let dot = root.join(".clipper");
    std::fs::create_dir_all(&dot)?;
    std::fs::create_dir_all(dot.join("Audios"))?;

    Ok(RootPaths {
        root: root.to_path_buf(),
        catalog_db: db_override
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| dot.join("clipper.db")),
        thumbnails_db: dot.join("thumbnails.db"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_prefers_default_flag() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("roots.json");
        std::fs::write(
            &config,
            r#"{"roots":[
                {"name":"First","path":"/tmp/first"},
                {"name":"Second","path":"/tmp/second","default":true,"layout":"vertical"}
            ],"rememberLastRoot":true}"#,
        )
        .unwrap();

        let manager = RootManager::load(&config).unwrap();
        assert_eq!(manager.current().name, "Second");
        assert_eq!(manager.current().layout, "vertical");

        manager.select("First").unwrap();
        assert_eq!(manager.current().name, "First");
        assert!(manager.select("Nope").is_err());
    }

    #[test]
    fn missing_config_falls_back_to_env_root() {
        let manager = RootManager::load(Path::new("/nonexistent/roots.json")).unwrap();
        assert_eq!(manager.list().len(), 1);
        assert_eq!(manager.current().name, "Default");
    }

    #[test]
    fn prepare_root_creates_skeleton() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("library");
        let paths = prepare_root(&root, None).unwrap();
        assert!(root.join(".clipper").is_dir());
        assert!(root.join(".clipper/Audios").is_dir());
        assert_eq!(paths.catalog_db, root.join(".clipper/clipper.db"));

        let with_override = prepare_root(&root, Some(Path::new("/tmp/other.db"))).unwrap();
        assert_eq!(with_override.catalog_db, PathBuf::from("/tmp/other.db"));
    }
}

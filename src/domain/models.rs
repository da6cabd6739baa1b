use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Video,
    Image,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Video => "video",
            MediaType::Image => "image",
        }
    }

    pub fn from_str(s: &str) -> MediaType {
        match s {
            "image" => MediaType::Image,
            _ => MediaType::Video,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThumbnailState {
    None,
    Ok,
    Failed,
}

impl ThumbnailState {
    pub fn as_i64(&self) -> i64 {
        match self {
            ThumbnailState::None => 0,
            ThumbnailState::Ok => 1,
            ThumbnailState::Failed => -1,
        }
    }

    pub fn from_i64(v: i64) -> ThumbnailState {
        match v {
            1 => ThumbnailState::Ok,
            -1 => ThumbnailState::Failed,
            _ => ThumbnailState::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    ManualSearch,
    BatchExtraction,
    AutoScan,
    UserSelected,
    PreservedFromEdit,
}

impl DetectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMethod::ManualSearch => "manual_search",
            DetectionMethod::BatchExtraction => "batch_extraction",
            DetectionMethod::AutoScan => "auto_scan",
            DetectionMethod::UserSelected => "user_selected",
            DetectionMethod::PreservedFromEdit => "preserved_from_edit",
        }
    }

    pub fn from_str(s: &str) -> DetectionMethod {
        match s {
            "batch_extraction" => DetectionMethod::BatchExtraction,
            "auto_scan" => DetectionMethod::AutoScan,
            "user_selected" => DetectionMethod::UserSelected,
            "preserved_from_edit" => DetectionMethod::PreservedFromEdit,
            _ => DetectionMethod::ManualSearch,
        }
    }
}

/// One physical file on disk, as cataloged. `path` is the natural key;
/// the integer id is stable across moves and renames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: i64,
    pub path: String,
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub category: String,
    pub subcategory: Option<String>,
    pub relative_path: Option<String>,
    pub size: i64,
    pub modified: f64,
    pub extension: String,
    pub media_type: MediaType,
    pub thumbnail_url: Option<String>,
    pub thumbnail_generated: ThumbnailState,
    pub thumbnail_updated_at: i64,
    pub duration: Option<f64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub codec: Option<String>,
    pub bitrate: Option<i64>,
    pub fps: Option<f64>,
    pub fingerprint_generated: bool,
    pub fingerprinted_at: Option<f64>,
    pub series: Option<String>,
    pub season: Option<i64>,
    pub episode: Option<String>,
    pub year: Option<i64>,
    pub channel: Option<String>,
    pub rating: Option<f64>,
    pub favorite: bool,
    pub is_final: bool,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub actors: Vec<Actor>,
    #[serde(default)]
    pub faces: Vec<FaceSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub color: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub id: i64,
    pub name: String,
    pub notes: Option<String>,
    pub video_count: i64,
    pub created_at: f64,
}

/// A person identity. Holds zero or more encodings; an encoding-less identity
/// is still a valid label as long as it stays linked to media.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceId {
    pub id: i64,
    pub name: String,
    pub actor_id: Option<i64>,
    pub primary_encoding_id: Option<i64>,
    pub encoding_count: i64,
    pub created_at: f64,
    pub updated_at: f64,
}

/// A single 512-D descriptor with provenance. `media_item_id` goes null when
/// the source file is deleted; the encoding itself survives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceEncoding {
    pub id: i64,
    pub face_id: i64,
    pub media_item_id: Option<i64>,
    pub frame_timestamp: f64,
    pub encoding: String,
    pub thumbnail: Option<String>,
    pub confidence: Option<f64>,
    pub quality_score: Option<f64>,
    pub created_at: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoFace {
    pub id: i64,
    pub video_id: i64,
    pub face_id: i64,
    pub first_detected_at: f64,
    pub detection_method: DetectionMethod,
    pub appearance_count: i64,
}

/// Face info attached to media list/detail responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceSummary {
    pub id: i64,
    pub name: String,
    pub thumbnail: Option<String>,
    pub appearance_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoFingerprint {
    pub id: i64,
    pub video_id: i64,
    pub frame_position: i64,
    pub phash: String,
    pub created_at: f64,
}

/// User-defined sidebar grouping of top-level categories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderGroup {
    pub id: String,
    pub name: String,
    pub folders: Vec<String>,
    pub icon: String,
    pub color: String,
    pub is_system: bool,
    pub position: i64,
    pub created_at: f64,
    pub updated_at: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderScanStatus {
    pub folder_name: String,
    pub last_scanned: Option<f64>,
    pub video_count: i64,
    pub scan_duration: Option<f64>,
    pub is_scanned: bool,
}

/// One file as seen by the filesystem scanner. Pure stat output; no catalog
/// state involved.
#[derive(Debug, Clone, Serialize)]
pub struct ScannedFile {
    pub path: String,
    pub name: String,
    pub size: i64,
    pub modified: f64,
    pub extension: String,
    pub media_type: MediaType,
    pub category: String,
    pub subcategory: Option<String>,
    pub relative_path: String,
    pub breadcrumbs: Vec<String>,
}

/// Technical metadata as reported by ffprobe. All fields optional; images get
/// width/height from the decoder instead.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MediaMetadata {
    pub duration: Option<f64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub codec: Option<String>,
    pub bitrate: Option<i64>,
    pub fps: Option<f64>,
}

/// Structured search over the catalog.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub query: Option<String>,
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub duration_min: Option<f64>,
    pub duration_max: Option<f64>,
    pub media_type: Option<MediaType>,
    pub include_deleted: bool,
}

/// Editorial fields a user may set. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EditorialUpdate {
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub series: Option<String>,
    pub season: Option<i64>,
    pub episode: Option<String>,
    pub year: Option<i64>,
    pub channel: Option<String>,
    pub rating: Option<f64>,
    pub favorite: Option<bool>,
    pub is_final: Option<bool>,
}

pub fn now_epoch() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thumbnail_state_round_trips() {
        for state in [ThumbnailState::None, ThumbnailState::Ok, ThumbnailState::Failed] {
            assert_eq!(ThumbnailState::from_i64(state.as_i64()), state);
        }
    }

    #[test]
    fn detection_method_round_trips() {
        for method in [
            DetectionMethod::ManualSearch,
            DetectionMethod::BatchExtraction,
            DetectionMethod::AutoScan,
            DetectionMethod::UserSelected,
            DetectionMethod::PreservedFromEdit,
        ] {
            assert_eq!(DetectionMethod::from_str(method.as_str()), method);
        }
    }

    #[test]
    fn unknown_media_type_defaults_to_video() {
        assert_eq!(MediaType::from_str("weird"), MediaType::Video);
        assert_eq!(MediaType::from_str("image"), MediaType::Image);
    }
}

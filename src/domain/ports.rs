use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Dependency(String),
    #[error("{0}")]
    Timeout(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("IO error: {0}")]
    Io(String),
}

impl From<rusqlite::Error> for DomainError {
    fn from(err: rusqlite::Error) -> Self {
        DomainError::Database(err.to_string())
    }
}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        DomainError::Io(err.to_string())
    }
}

/// One face found in a frame, with its 512-D descriptor.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub embedding: Vec<f32>,
    pub confidence: f32,
}

/// Seam for the external face model. The catalog treats descriptors as opaque
/// vectors; only implementations of this trait know how they are produced.
pub trait FaceEmbedder: Send + Sync {
    /// Embed a pre-cropped face image. Returns the strongest detection as
    /// (descriptor, detection confidence), or None when no face is visible.
    fn embed(&self, image_bytes: &[u8]) -> Result<Option<(Vec<f32>, f32)>, DomainError>;

    /// Detect every face in a frame and embed each one.
    fn detect(&self, image_bytes: &[u8]) -> Result<Vec<DetectedFace>, DomainError>;
}

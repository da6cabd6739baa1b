pub mod catalog;
pub mod embedder;
pub mod ffmpeg;
pub mod thumbnail_store;

pub use catalog::{AddEncodingOutcome, CatalogStore, ScanFields};
pub use embedder::OrtEmbedder;
pub use thumbnail_store::ThumbnailStore;

pub mod actors;
pub mod api;
pub mod downloads;
pub mod editor;
pub mod faces;
pub mod fingerprints;
pub mod groups;
pub mod roots;
pub mod scan;
pub mod search;
pub mod stream;
pub mod tags;
pub mod thumbnails;
pub mod videos;

pub use api::{app_router, build_engine, AppState, Engine};

use super::api::AppState;
use crate::domain::DomainError;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

/// Read granularity for range responses.
const CHUNK_SIZE: usize = 512 * 1024;

pub fn router() -> Router<AppState> {
    Router::new().route("/stream/{category}/{*rest}", get(stream_media))
}

fn content_type_for(extension: &str) -> &'static str {
    match extension {
        ".mp4" => "video/mp4",
        ".mov" => "video/quicktime",
        ".avi" => "video/x-msvideo",
        ".mkv" => "video/x-matroska",
        ".wmv" => "video/x-ms-wmv",
        ".flv" => "video/x-flv",
        ".webm" => "video/webm",
        ".jpg" | ".jpeg" => "image/jpeg",
        ".png" => "image/png",
        ".gif" => "image/gif",
        ".webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Parse `bytes=s-e`. Returns None for anything unsatisfiable: the caller
/// answers 416. An omitted end means end-of-file.
fn parse_range(header: &str, total: u64) -> Option<(u64, u64)> {
    if total == 0 {
        return None;
    }
    let spec = header.strip_prefix("bytes=")?;
    let (start_raw, end_raw) = spec.split_once('-')?;
    let start: u64 = if start_raw.is_empty() {
        0
    } else {
        start_raw.trim().parse().ok()?
    };
    let end: u64 = if end_raw.trim().is_empty() {
        total - 1
    } else {
        end_raw.trim().parse().ok()?
    };
    if start > total - 1 || end > total - 1 || start > end {
        return None;
    }
    Some((start, end))
}

async fn stream_media(
    State(state): State<AppState>,
    Path((category, rest)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, DomainError> {
    let engine = state.engine().await;
    let base = if category == "_root" {
        engine.root().to_path_buf()
    } else {
        engine.root().join(&category)
    };
    let requested = base.join(&rest);

    // Resolve symlinks and dot segments, then require the result to stay
    // inside the active root.
    let resolved = requested
        .canonicalize()
        .map_err(|_| DomainError::NotFound("File"))?;
    let root_resolved = engine
        .root()
        .canonicalize()
        .map_err(|e| DomainError::Io(format!("Unresolvable root: {}", e)))?;
    if !resolved.starts_with(&root_resolved) {
        return Err(DomainError::Forbidden("Path traversal detected".to_string()));
    }

    let extension = resolved
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default();
    if crate::application::scanner::media_type_of(&resolved).is_none() {
        return Err(DomainError::InvalidInput(
            "File is not a supported video or image".to_string(),
        ));
    }
    let content_type = content_type_for(&extension);

    let total = resolved.metadata()?.len();
    let range_header = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok());

    match range_header {
        Some(raw) => {
            let (start, end) = match parse_range(raw, total) {
                Some(range) => range,
                None => {
                    return Ok((
                        StatusCode::RANGE_NOT_SATISFIABLE,
                        [(header::CONTENT_RANGE, format!("bytes */{}", total))],
                    )
                        .into_response())
                }
            };
            let length = end - start + 1;

            let mut file = tokio::fs::File::open(&resolved).await?;
            file.seek(std::io::SeekFrom::Start(start)).await?;
            let stream = ReaderStream::with_capacity(file.take(length), CHUNK_SIZE);

            Ok((
                StatusCode::PARTIAL_CONTENT,
                [
                    (header::CONTENT_RANGE, format!("bytes {}-{}/{}", start, end, total)),
                    (header::ACCEPT_RANGES, "bytes".to_string()),
                    (header::CONTENT_LENGTH, length.to_string()),
                    (header::CONTENT_TYPE, content_type.to_string()),
                    (header::CACHE_CONTROL, "public, max-age=3600".to_string()),
                ],
                Body::from_stream(stream),
            )
                .into_response())
        }
        None => {
            let file = tokio::fs::File::open(&resolved).await?;
            let stream = ReaderStream::with_capacity(file, CHUNK_SIZE);
            Ok((
                StatusCode::OK,
                [
                    (header::ACCEPT_RANGES, "bytes".to_string()),
                    (header::CONTENT_LENGTH, total.to_string()),
                    (header::CONTENT_TYPE, content_type.to_string()),
                    (header::CACHE_CONTROL, "public, max-age=3600".to_string()),
                ],
                Body::from_stream(stream),
            )
                .into_response())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_parsing_covers_the_contract() {
        let total = 100;
        assert_eq!(parse_range("bytes=0-49", total), Some((0, 49)));
        assert_eq!(parse_range("bytes=50-", total), Some((50, 99)));
        assert_eq!(parse_range("bytes=-", total), Some((0, 99)));
        assert_eq!(parse_range("bytes=99-99", total), Some((99, 99)));
        // Start past the end, inverted, or end past the file: unsatisfiable.
        assert_eq!(parse_range("bytes=100-", total), None);
        assert_eq!(parse_range("bytes=10-5", total), None);
        assert_eq!(parse_range("bytes=0-100", total), None);
        assert_eq!(parse_range("chunks=0-1", total), None);
        assert_eq!(parse_range("bytes=0-0", 0), None);
    }

    #[test]
    fn range_lengths_reconstruct_the_file() {
        // Concatenating adjacent ranges must cover every byte exactly once.
        let total = 1000u64;
        let ranges = [(0u64, 333u64), (334, 666), (667, 999)];
        let mut covered = 0u64;
        for (start, end) in ranges {
            let (s, e) = parse_range(&format!("bytes={}-{}", start, end), total).unwrap();
            covered += e - s + 1;
        }
        assert_eq!(covered, total);
    }

    #[test]
    fn content_types_cover_supported_extensions() {
        assert_eq!(content_type_for(".mp4"), "video/mp4");
        assert_eq!(content_type_for(".webm"), "video/webm");
        assert_eq!(content_type_for(".jpeg"), "image/jpeg");
        assert_eq!(content_type_for(".xyz"), "application/octet-stream");
    }
}

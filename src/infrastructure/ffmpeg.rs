use crate::domain::{DomainError, MediaMetadata};
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const FRAME_TIMEOUT: Duration = Duration::from_secs(15);

/// Keep only the tail of a subprocess stderr for error reporting.
pub fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    if trimmed.len() <= 500 {
        trimmed.to_string()
    } else {
        let start = trimmed.len() - 500;
        // Avoid slicing through a multi-byte character.
        let start = (start..trimmed.len())
            .find(|i| trimmed.is_char_boundary(*i))
            .unwrap_or(start);
        trimmed[start..].to_string()
    }
}

async fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    what: &str,
) -> Result<std::process::Output, DomainError> {
    // A timeout must also terminate the subprocess, not just abandon it.
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);
    let child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            DomainError::Dependency(format!("{} is not installed", what))
        } else {
            DomainError::Io(format!("Failed to spawn {}: {}", what, e))
        }
    })?;
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => Ok(output?),
        Err(_) => Err(DomainError::Timeout(format!("{} timed out", what))),
    }
}

#[derive(Deserialize)]
struct ProbeOutput {
    format: Option<ProbeFormat>,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<i64>,
    height: Option<i64>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
}

fn parse_frame_rate(rate: Option<&str>) -> Option<f64> {
    let rate = rate?;
    let (num, den) = rate.split_once('/')?;
    let num: f64 = num.parse().ok()?;
    let den: f64 = den.parse().ok()?;
    if den == 0.0 {
        return Some(0.0);
    }
    Some(num / den)
}

/// Extract duration/dimensions/codec/bitrate/fps via ffprobe. Returns None
/// when the file has no video stream.
pub async fn probe_metadata(path: &Path) -> Result<Option<MediaMetadata>, DomainError> {
    let mut cmd = Command::new("ffprobe");
    cmd.args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(path);
    let output = run_with_timeout(cmd, PROBE_TIMEOUT, "ffprobe").await?;
    if !output.status.success() {
        warn!("ffprobe failed for {}: {}", path.display(), stderr_tail(&output.stderr));
        return Ok(None);
    }

    let parsed: ProbeOutput = serde_json::from_slice(&output.stdout)
        .map_err(|e| DomainError::Dependency(format!("Unparseable ffprobe output: {}", e)))?;

    let video_stream = match parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
    {
        Some(s) => s,
        None => {
            debug!("No video stream in {}", path.display());
            return Ok(None);
        }
    };

    let format = parsed.format.as_ref();
    Ok(Some(MediaMetadata {
        duration: format
            .and_then(|f| f.duration.as_deref())
            .and_then(|d| d.parse().ok()),
        width: video_stream.width,
        height: video_stream.height,
        codec: video_stream.codec_name.clone(),
        bitrate: format
            .and_then(|f| f.bit_rate.as_deref())
            .and_then(|b| b.parse().ok()),
        fps: parse_frame_rate(video_stream.r_frame_rate.as_deref())
            .or_else(|| parse_frame_rate(video_stream.avg_frame_rate.as_deref())),
    }))
}

pub async fn probe_duration(path: &Path) -> Result<Option<f64>, DomainError> {
    let mut cmd = Command::new("ffprobe");
    cmd.args([
        "-v",
        "error",
        "-show_entries",
        "format=duration",
        "-of",
        "default=noprint_wrappers=1:nokey=1",
    ])
    .arg(path);
    let output = run_with_timeout(cmd, PROBE_TIMEOUT, "ffprobe").await?;
    if !output.status.success() {
        return Ok(None);
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().parse().ok())
}

pub async fn has_audio_stream(path: &Path) -> bool {
    let mut cmd = Command::new("ffprobe");
    cmd.args([
        "-v",
        "error",
        "-select_streams",
        "a:0",
        "-show_entries",
        "stream=codec_type",
        "-of",
        "default=noprint_wrappers=1:nokey=1",
    ])
    .arg(path);
    match run_with_timeout(cmd, PROBE_TIMEOUT, "ffprobe").await {
        Ok(output) => String::from_utf8_lossy(&output.stdout).trim() == "audio",
        // Assume audio exists so edit jobs keep the track on probe failure.
        Err(_) => true,
    }
}

/// Extract one frame at an ffmpeg seek expression into JPEG bytes, scaled to
/// 320px width. The scratch file is removed on every exit path by the
/// tempfile guard.
pub async fn extract_frame_at(path: &Path, seek: &str) -> Result<Option<Vec<u8>>, DomainError> {
    let temp = tempfile::Builder::new()
        .suffix(".jpg")
        .tempfile()
        .map_err(|e| DomainError::Io(format!("Failed to create temp file: {}", e)))?;
    let temp_path = temp.path().to_path_buf();

    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-ss")
        .arg(seek)
        .arg("-i")
        .arg(path)
        .args(["-vframes", "1", "-vf", "scale=320:-1", "-q:v", "2", "-f", "mjpeg"])
        .args(["-threads", "1", "-loglevel", "error", "-y"])
        .arg(&temp_path);

    let output = run_with_timeout(cmd, FRAME_TIMEOUT, "ffmpeg").await?;
    if !output.status.success() {
        debug!(
            "Frame extraction failed at {} for {}: {}",
            seek,
            path.display(),
            stderr_tail(&output.stderr)
        );
        return Ok(None);
    }

    match std::fs::read(&temp_path) {
        Ok(bytes) if !bytes.is_empty() => Ok(Some(bytes)),
        _ => Ok(None),
    }
}

pub async fn extract_frame_seconds(
    path: &Path,
    seconds: f64,
) -> Result<Option<Vec<u8>>, DomainError> {
    extract_frame_at(path, &format!("{:.3}", seconds)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rate_parsing_guards_zero_denominator() {
        assert_eq!(parse_frame_rate(Some("30000/1001")), Some(30000.0 / 1001.0));
        assert_eq!(parse_frame_rate(Some("25/1")), Some(25.0));
        assert_eq!(parse_frame_rate(Some("0/0")), Some(0.0));
        assert_eq!(parse_frame_rate(Some("garbage")), None);
        assert_eq!(parse_frame_rate(None), None);
    }

    #[test]
    fn stderr_tail_truncates_to_500() {
        let long = "x".repeat(2000);
        assert_eq!(stderr_tail(long.as_bytes()).len(), 500);
        assert_eq!(stderr_tail(b"short"), "short");
    }

    #[test]
    fn stderr_tail_respects_char_boundaries() {
        let mut text = String::from("é").repeat(600);
        text.push('!');
        let tail = stderr_tail(text.as_bytes());
        assert!(tail.len() <= 501);
        assert!(tail.ends_with('!'));
    }
}

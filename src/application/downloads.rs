use super::editor::{JobStatus, JOB_TIMEOUT};
use crate::domain::{now_epoch, DomainError};
use crate::infrastructure::ffmpeg;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

const URL_CLEARED: &str = "[cleared after download]";

#[derive(Debug, Clone, Serialize)]
pub struct DownloadJob {
    pub id: i64,
    pub url: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub filename: String,
    pub status: JobStatus,
    pub created_at: f64,
    pub completed_at: Option<f64>,
    pub output_path: String,
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,
}

fn timestamped_default_name() -> String {
    format!("video_{}", chrono::Local::now().format("%Y%m%d_%H%M%S"))
}

fn url_without_query(url: &str) -> &str {
    let path = url.split('?').next().unwrap_or(url);
    path.split('#').next().unwrap_or(path)
}

/// The URL's basename, when it carries an extension worth keeping.
fn filename_from_url(url: &str) -> Option<String> {
    let path = url_without_query(url);
    let basename = path.rsplit('/').next().unwrap_or("");
    if !basename.is_empty() && basename.contains('.') {
        Some(basename.to_string())
    } else {
        None
    }
}

/// Sanitized extension recovered from the URL path (alphanumeric, max 5
/// chars); "bin" when the path has none.
fn extension_from_url(url: &str) -> String {
    let path = url_without_query(url);
    let ext: String = path
        .rsplit('.')
        .next()
        .filter(|_| path.contains('.'))
        .unwrap_or("bin")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(5)
        .collect();
    if ext.is_empty() {
        "bin".to_string()
    } else {
        ext
    }
}

async fn run_download(argv: &[String], cwd: Option<&PathBuf>) -> Result<(), String> {
    let mut command = tokio::process::Command::new(&argv[0]);
    command
        .args(&argv[1..])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }
    let child = command.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            format!("{} is not installed", argv[0])
        } else {
            format!("Failed to start {}: {}", argv[0], e)
        }
    })?;
    let output = tokio::time::timeout(JOB_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| "Download timeout (1 hour exceeded)".to_string())?
        .map_err(|e| e.to_string())?;
    if output.status.success() {
        Ok(())
    } else {
        Err(ffmpeg::stderr_tail(&output.stderr))
    }
}

/// HLS clip downloads: ffmpeg stream copy over a time window, with an
/// optional yt-dlp fallback when the playlist defeats ffmpeg.
pub struct HlsDownloader {
    download_folder: PathBuf,
    jobs: Mutex<HashMap<i64, DownloadJob>>,
    next_id: AtomicI64,
}

impl HlsDownloader {
    pub fn new(download_folder: PathBuf) -> Result<Arc<HlsDownloader>, DomainError> {
        std::fs::create_dir_all(&download_folder)?;
        Ok(Arc::new(HlsDownloader {
            download_folder,
            jobs: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }))
    }

    pub fn create_download(
        self: &Arc<Self>,
        url: String,
        start_time: String,
        end_time: String,
        filename: Option<String>,
        use_fallback: bool,
    ) -> DownloadJob {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let base = filename
            .filter(|f| !f.trim().is_empty())
            .map(|f| f.trim().trim_end_matches(".mp4").to_string())
            .unwrap_or_else(timestamped_default_name);
        let filename = format!(
            "{}_{}_{}.mp4",
            base,
            start_time.replace(':', ""),
            end_time.replace(':', "")
        );
        let output_path = self.download_folder.join(&filename);

        let job = DownloadJob {
            id,
            url: url.clone(),
            start_time: Some(start_time),
            end_time: Some(end_time),
            filename,
            status: JobStatus::Pending,
            created_at: now_epoch(),
            completed_at: None,
            output_path: output_path.to_string_lossy().to_string(),
            error_message: None,
            proxy_url: None,
            referer: None,
        };
        self.jobs.lock().unwrap().insert(id, job.clone());

        let downloader = self.clone();
        tokio::spawn(async move {
            downloader.worker(id, use_fallback).await;
        });

        info!("Created HLS download {}: {}", id, job.filename);
        job
    }

    fn update<F: FnOnce(&mut DownloadJob)>(&self, id: i64, f: F) {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&id) {
            f(job);
        }
    }

    async fn worker(&self, id: i64, use_fallback: bool) {
        let job = match self.jobs.lock().unwrap().get(&id).cloned() {
            Some(job) => job,
            None => return,
        };
        self.update(id, |j| j.status = JobStatus::Processing);

        let start = job.start_time.clone().unwrap_or_default();
        let end = job.end_time.clone().unwrap_or_default();
        let duration = (super::editor::time_to_seconds(&end)
            - super::editor::time_to_seconds(&start))
        .max(0.0);

        let ffmpeg_argv: Vec<String> = vec![
            "ffmpeg".into(),
            "-ss".into(),
            start.clone(),
            "-i".into(),
            job.url.clone(),
            "-t".into(),
            duration.to_string(),
            "-c".into(),
            "copy".into(),
            "-y".into(),
            job.output_path.clone(),
        ];

        let mut result = run_download(&ffmpeg_argv, None).await;
        if result.is_err() && use_fallback {
            warn!("ffmpeg failed for download {}, trying yt-dlp fallback", id);
            let fallback_argv: Vec<String> = vec![
                "yt-dlp".into(),
                "-f".into(),
                "bestvideo*+bestaudio/best".into(),
                "--hls-prefer-native".into(),
                "--download-sections".into(),
                format!("*{}-{}", start, end),
                "-o".into(),
                job.filename.clone(),
                job.url.clone(),
            ];
            result = run_download(&fallback_argv, Some(&self.download_folder)).await;
        }

        match result {
            Ok(()) => {
                self.update(id, |j| {
                    j.status = JobStatus::Completed;
                    j.completed_at = Some(now_epoch());
                });
                info!("Download {} completed", id);
            }
            Err(message) => {
                error!("Download {} failed: {}", id, message);
                self.update(id, |j| {
                    j.status = JobStatus::Failed;
                    j.completed_at = Some(now_epoch());
                    j.error_message = Some(message);
                });
            }
        }
    }

    pub fn get(&self, id: i64) -> Option<DownloadJob> {
        self.jobs.lock().unwrap().get(&id).cloned()
    }

    pub fn list(&self) -> Vec<DownloadJob> {
        let mut jobs: Vec<DownloadJob> = self.jobs.lock().unwrap().values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.total_cmp(&a.created_at));
        jobs
    }

    pub fn remove(&self, id: i64) -> bool {
        self.jobs.lock().unwrap().remove(&id).is_some()
    }

    pub fn clear_completed(&self) -> usize {
        let mut jobs = self.jobs.lock().unwrap();
        let before = jobs.len();
        jobs.retain(|_, j| !matches!(j.status, JobStatus::Completed | JobStatus::Failed));
        before - jobs.len()
    }
}

/// curl-driven downloads with optional SOCKS proxy and referer. Proxy and
/// referer defaults persist across jobs until cleared; the URL on a finished
/// job is scrubbed for privacy.
pub struct SocksDownloader {
    download_folder: PathBuf,
    jobs: Mutex<HashMap<i64, DownloadJob>>,
    next_id: AtomicI64,
    default_proxy: Mutex<Option<String>>,
    default_referer: Mutex<Option<String>>,
}

/// Browser-shaped headers; some hosts refuse obviously non-browser clients.
fn curl_headers(referer: Option<&str>) -> Vec<String> {
    let mut headers = vec![
        "accept: */*".to_string(),
        "accept-language: en-GB,en;q=0.8".to_string(),
        "priority: i".to_string(),
        "range: bytes=0-".to_string(),
    ];
    if let Some(referer) = referer {
        headers.push(format!("referer: {}", referer));
    }
    headers.extend([
        "sec-ch-ua: \"Brave\";v=\"143\", \"Chromium\";v=\"143\", \"Not A(Brand\";v=\"24\""
            .to_string(),
        "sec-ch-ua-mobile: ?0".to_string(),
        "sec-ch-ua-platform: \"Linux\"".to_string(),
        "sec-fetch-dest: video".to_string(),
        "sec-fetch-mode: no-cors".to_string(),
        "sec-fetch-site: cross-site".to_string(),
        "sec-fetch-storage-access: none".to_string(),
        "sec-gpc: 1".to_string(),
        "user-agent: Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
         Chrome/143.0.0.0 Safari/537.36"
            .to_string(),
    ]);
    headers
}

pub fn build_curl_argv(
    url: &str,
    output_path: &str,
    proxy: Option<&str>,
    referer: Option<&str>,
) -> Vec<String> {
    let mut argv: Vec<String> = vec!["curl".into(), "-L".into()];
    if let Some(proxy) = proxy {
        argv.push("-x".into());
        argv.push(proxy.to_string());
    }
    for header in curl_headers(referer) {
        argv.push("-H".into());
        argv.push(header);
    }
    argv.push("-o".into());
    argv.push(output_path.to_string());
    argv.push(url.to_string());
    argv
}

impl SocksDownloader {
    pub fn new(download_folder: PathBuf) -> Result<Arc<SocksDownloader>, DomainError> {
        std::fs::create_dir_all(&download_folder)?;
        Ok(Arc::new(SocksDownloader {
            download_folder,
            jobs: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            default_proxy: Mutex::new(None),
            default_referer: Mutex::new(None),
        }))
    }

    pub fn set_default_proxy(&self, proxy: Option<String>) {
        *self.default_proxy.lock().unwrap() = proxy;
    }

    pub fn default_proxy(&self) -> Option<String> {
        self.default_proxy.lock().unwrap().clone()
    }

    pub fn set_default_referer(&self, referer: Option<String>) {
        *self.default_referer.lock().unwrap() = referer;
    }

    pub fn default_referer(&self) -> Option<String> {
        self.default_referer.lock().unwrap().clone()
    }

    pub fn create_download(
        self: &Arc<Self>,
        url: String,
        filename: Option<String>,
        proxy_url: Option<String>,
        referer: Option<String>,
    ) -> DownloadJob {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        // No explicit name: keep the URL's own filename when it has an
        // extension, else a timestamped name with the URL's extension.
        let filename = filename
            .filter(|f| !f.trim().is_empty())
            .map(|f| f.trim().to_string())
            .or_else(|| filename_from_url(&url))
            .unwrap_or_else(|| {
                format!(
                    "download_{}.{}",
                    chrono::Local::now().format("%Y%m%d_%H%M%S"),
                    extension_from_url(&url)
                )
            });
        let output_path = self.download_folder.join(&filename);

        let effective_proxy = proxy_url.or_else(|| self.default_proxy());
        let effective_referer = referer.or_else(|| self.default_referer());

        let job = DownloadJob {
            id,
            url,
            start_time: None,
            end_time: None,
            filename,
            status: JobStatus::Pending,
            created_at: now_epoch(),
            completed_at: None,
            output_path: output_path.to_string_lossy().to_string(),
            error_message: None,
            proxy_url: effective_proxy,
            referer: effective_referer,
        };
        self.jobs.lock().unwrap().insert(id, job.clone());

        let downloader = self.clone();
        tokio::spawn(async move {
            downloader.worker(id).await;
        });

        info!("Created proxied download {}: {}", id, job.filename);
        job
    }

    fn update<F: FnOnce(&mut DownloadJob)>(&self, id: i64, f: F) {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&id) {
            f(job);
        }
    }

    async fn worker(&self, id: i64) {
        let job = match self.jobs.lock().unwrap().get(&id).cloned() {
            Some(job) => job,
            None => return,
        };
        self.update(id, |j| j.status = JobStatus::Processing);

        let argv = build_curl_argv(
            &job.url,
            &job.output_path,
            job.proxy_url.as_deref(),
            job.referer.as_deref(),
        );

        match run_download(&argv, None).await {
            Ok(()) => {
                self.update(id, |j| {
                    j.status = JobStatus::Completed;
                    j.completed_at = Some(now_epoch());
                    j.url = URL_CLEARED.to_string();
                });
                info!("Proxied download {} completed", id);
            }
            Err(message) => {
                error!("Proxied download {} failed: {}", id, message);
                self.update(id, |j| {
                    j.status = JobStatus::Failed;
                    j.completed_at = Some(now_epoch());
                    j.error_message = Some(message);
                });
            }
        }
    }

    pub fn get(&self, id: i64) -> Option<DownloadJob> {
        self.jobs.lock().unwrap().get(&id).cloned()
    }

    pub fn list(&self) -> Vec<DownloadJob> {
        let mut jobs: Vec<DownloadJob> = self.jobs.lock().unwrap().values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.total_cmp(&a.created_at));
        jobs
    }

    pub fn remove(&self, id: i64) -> bool {
        self.jobs.lock().unwrap().remove(&id).is_some()
    }

    pub fn clear_completed(&self) -> usize {
        let mut jobs = self.jobs.lock().unwrap();
        let before = jobs.len();
        jobs.retain(|_, j| !matches!(j.status, JobStatus::Completed | JobStatus::Failed));
        before - jobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curl_argv_includes_proxy_and_referer() {
        let argv = build_curl_argv(
            "https://example.com/clip.mp4",
            "/downloads/clip.mp4",
            Some("socks5h://127.0.0.1:9050"),
            Some("https://example.com/"),
        );
        assert_eq!(argv[0], "curl");
        assert!(argv.contains(&"-L".to_string()));
        let proxy = argv.iter().position(|a| a == "-x").unwrap();
        assert_eq!(argv[proxy + 1], "socks5h://127.0.0.1:9050");
        assert!(argv.iter().any(|a| a == "referer: https://example.com/"));
        assert_eq!(argv.last().unwrap(), "https://example.com/clip.mp4");

        let bare = build_curl_argv("u", "o", None, None);
        assert!(!bare.contains(&"-x".to_string()));
        assert!(!bare.iter().any(|a| a.starts_with("referer:")));
    }

    #[test]
    fn curl_headers_carry_the_full_browser_fingerprint() {
        let headers = curl_headers(None);
        for name in [
            "accept:",
            "accept-language:",
            "priority:",
            "range:",
            "sec-ch-ua:",
            "sec-ch-ua-mobile:",
            "sec-ch-ua-platform:",
            "sec-fetch-dest:",
            "sec-fetch-mode:",
            "sec-fetch-site:",
            "sec-fetch-storage-access:",
            "sec-gpc:",
            "user-agent:",
        ] {
            assert!(
                headers.iter().any(|h| h.starts_with(name)),
                "missing header {}",
                name
            );
        }
        assert!(!headers.iter().any(|h| h.starts_with("referer:")));
    }

    #[test]
    fn url_filenames_keep_their_real_extension() {
        assert_eq!(
            filename_from_url("https://example.com/media/photo.jpg?sig=abc#frag"),
            Some("photo.jpg".to_string())
        );
        assert_eq!(
            filename_from_url("https://example.com/archive.zip"),
            Some("archive.zip".to_string())
        );
        // No extension in the basename: the caller falls back.
        assert_eq!(filename_from_url("https://example.com/stream"), None);
        assert_eq!(filename_from_url("https://example.com/dir/"), None);

        assert_eq!(extension_from_url("https://example.com/clip.webm?x=1"), "webm");
        assert_eq!(extension_from_url("https://h/stream"), "bin");
        // Sanitized and capped at five characters.
        assert_eq!(extension_from_url("https://h/file.toolongext"), "toolo");
    }

    #[tokio::test]
    async fn socks_defaults_persist_until_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = SocksDownloader::new(dir.path().to_path_buf()).unwrap();

        downloader.set_default_proxy(Some("socks5h://127.0.0.1:9050".to_string()));
        downloader.set_default_referer(Some("https://ref.example/".to_string()));

        let job = downloader.create_download("https://example.com/x.mp4".to_string(), None, None, None);
        assert_eq!(job.proxy_url.as_deref(), Some("socks5h://127.0.0.1:9050"));
        assert_eq!(job.referer.as_deref(), Some("https://ref.example/"));
        assert_eq!(job.filename, "x.mp4");

        downloader.set_default_proxy(None);
        let job2 = downloader.create_download(
            "https://example.com/y.mp4".to_string(),
            Some("named.mp4".to_string()),
            None,
            None,
        );
        assert_eq!(job2.proxy_url, None);
        assert_eq!(job2.filename, "named.mp4");
    }

    #[tokio::test]
    async fn hls_filenames_carry_time_window() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = HlsDownloader::new(dir.path().to_path_buf()).unwrap();
        let job = downloader.create_download(
            "https://example.com/playlist.m3u8".to_string(),
            "00:01:00".to_string(),
            "00:02:00".to_string(),
            Some("clip".to_string()),
            false,
        );
        assert_eq!(job.filename, "clip_000100_000200.mp4");
        assert!(job.output_path.ends_with("clip_000100_000200.mp4"));
    }

    #[tokio::test]
    async fn clear_completed_retains_active_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = HlsDownloader::new(dir.path().to_path_buf()).unwrap();
        let job = downloader.create_download(
            "https://example.com/a.m3u8".to_string(),
            "00:00:00".to_string(),
            "00:00:01".to_string(),
            None,
            false,
        );
        // Force a terminal state regardless of whether ffmpeg exists here.
        downloader.update(job.id, |j| j.status = JobStatus::Failed);
        assert_eq!(downloader.clear_completed(), 1);
        assert!(downloader.get(job.id).is_none());
    }
}

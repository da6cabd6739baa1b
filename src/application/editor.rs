use crate::domain::DomainError;
use crate::infrastructure::ffmpeg;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info};

/// Ceiling for one edit or download subprocess.
pub const JOB_TIMEOUT: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CutMethod {
    /// Precise re-encode, frame-accurate.
    Ffmpeg,
    /// Stream copy, keyframe-aligned, fastest. Cannot crop.
    Copy,
    /// Keyframe-aware external tool. Cut only.
    Smartcut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditOperation {
    Cut,
    Crop,
    CutAndCrop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Fast,
    Balanced,
    High,
}

impl Quality {
    /// (crf, x264 preset)
    pub fn settings(&self) -> (&'static str, &'static str) {
        match self {
            Quality::Fast => ("28", "ultrafast"),
            Quality::Balanced => ("23", "medium"),
            Quality::High => ("18", "slow"),
        }
    }
}

/// Parse HH:MM:SS, MM:SS, or bare seconds.
pub fn time_to_seconds(time: &str) -> f64 {
    let parts: Vec<&str> = time.split(':').collect();
    let parse = |s: &str| s.parse::<f64>().unwrap_or(0.0);
    match parts.len() {
        3 => parse(parts[0]) * 3600.0 + parse(parts[1]) * 60.0 + parse(parts[2]),
        2 => parse(parts[0]) * 60.0 + parse(parts[1]),
        _ => parse(time),
    }
}

/// Crop rectangle (w, h, x, y) for a preset, centered unless custom offsets
/// are given. Needs the source dimensions.
pub fn crop_rectangle(
    preset: &str,
    input_width: i64,
    input_height: i64,
    custom_x: Option<i64>,
    custom_y: Option<i64>,
) -> Option<(i64, i64, i64, i64)> {
    if input_width <= 0 || input_height <= 0 {
        return None;
    }
    match preset {
        "9:16" => {
            let w = input_height * 9 / 16;
            let h = input_height;
            let x = custom_x.unwrap_or((input_width - w) / 2);
            let y = custom_y.unwrap_or(0);
            Some((w, h, x, y))
        }
        "16:9" => {
            let w = input_width;
            let h = input_width * 9 / 16;
            let x = custom_x.unwrap_or(0);
            let y = custom_y.unwrap_or((input_height - h) / 2);
            Some((w, h, x, y))
        }
        "1:1" => {
            let size = input_width.min(input_height);
            let x = custom_x.unwrap_or((input_width - size) / 2);
            let y = custom_y.unwrap_or((input_height - size) / 2);
            Some((size, size, x, y))
        }
        _ => None,
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EditRequest {
    pub video_id: i64,
    #[serde(skip)]
    pub video_path: String,
    pub operation: EditOperation,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    #[serde(default = "default_cut_method")]
    pub cut_method: CutMethod,
    pub crop_preset: Option<String>,
    pub crop_width: Option<i64>,
    pub crop_height: Option<i64>,
    pub crop_x: Option<i64>,
    pub crop_y: Option<i64>,
    #[serde(default = "default_true")]
    pub preserve_faces: bool,
    #[serde(default)]
    pub copy_other_items: bool,
    pub output_filename: Option<String>,
    #[serde(default = "default_output_location")]
    pub output_location: String,
    #[serde(default = "default_quality")]
    pub quality: Quality,
}

fn default_cut_method() -> CutMethod {
    CutMethod::Ffmpeg
}
fn default_true() -> bool {
    true
}
fn default_output_location() -> String {
    "same_folder".to_string()
}
fn default_quality() -> Quality {
    Quality::Balanced
}

#[derive(Debug, Clone, Serialize)]
pub struct EditJob {
    pub id: i64,
    pub video_id: i64,
    pub video_path: String,
    pub operation: EditOperation,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub cut_method: CutMethod,
    pub crop_width: Option<i64>,
    pub crop_height: Option<i64>,
    pub crop_x: Option<i64>,
    pub crop_y: Option<i64>,
    pub preserve_faces: bool,
    pub copy_other_items: bool,
    pub output_filename: String,
    pub quality: Quality,
    pub status: JobStatus,
    pub created_at: f64,
    pub completed_at: Option<f64>,
    pub output_path: String,
    pub error_message: Option<String>,
    pub progress: u8,
}

/// In-memory edit job runner. Nothing survives a restart.
pub struct VideoEditor {
    output_folder: PathBuf,
    jobs: Mutex<HashMap<i64, EditJob>>,
    next_id: AtomicI64,
}

impl VideoEditor {
    pub fn new(output_folder: PathBuf) -> Result<Arc<VideoEditor>, DomainError> {
        std::fs::create_dir_all(&output_folder)?;
        Ok(Arc::new(VideoEditor {
            output_folder,
            jobs: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }))
    }

    fn derive_filename(request: &EditRequest) -> String {
        if let Some(name) = request
            .output_filename
            .as_deref()
            .filter(|n| !n.trim().is_empty())
        {
            let name = name.trim();
            return if name.ends_with(".mp4") {
                name.to_string()
            } else {
                format!("{}.mp4", name)
            };
        }

        let stem = Path::new(&request.video_path)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "output".to_string());
        let operation = match request.operation {
            EditOperation::Cut => "cut",
            EditOperation::Crop => "crop",
            EditOperation::CutAndCrop => "cut_and_crop",
        };
        let mut suffix = format!("_{}", operation);
        if let (Some(start), Some(end)) = (&request.start_time, &request.end_time) {
            suffix.push_str(&format!(
                "_{}_{}",
                start.replace(':', ""),
                end.replace(':', "")
            ));
        }
        if let Some(preset) = &request.crop_preset {
            suffix.push_str(&format!("_{}", preset.replace(':', "x")));
        }
        format!("{}{}.mp4", stem, suffix)
    }

    /// Register a job and start it in the background.
    pub fn create_job(self: &Arc<Self>, request: EditRequest) -> EditJob {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let output_filename = Self::derive_filename(&request);
        let output_path = if request.output_location == "same_folder" {
            Path::new(&request.video_path)
                .parent()
                .map(|p| p.join(&output_filename))
                .unwrap_or_else(|| self.output_folder.join(&output_filename))
        } else {
            self.output_folder.join(&output_filename)
        };

        let job = EditJob {
            id,
            video_id: request.video_id,
            video_path: request.video_path.clone(),
            operation: request.operation,
            start_time: request.start_time.clone(),
            end_time: request.end_time.clone(),
            cut_method: request.cut_method,
            crop_width: request.crop_width,
            crop_height: request.crop_height,
            crop_x: request.crop_x,
            crop_y: request.crop_y,
            preserve_faces: request.preserve_faces,
            copy_other_items: request.copy_other_items,
            output_filename,
            quality: request.quality,
            status: JobStatus::Pending,
            created_at: crate::domain::now_epoch(),
            completed_at: None,
            output_path: output_path.to_string_lossy().to_string(),
            error_message: None,
            progress: 0,
        };
        self.jobs.lock().unwrap().insert(id, job.clone());

        let editor = self.clone();
        tokio::spawn(async move {
            editor.process_job(id).await;
        });

        info!("Created edit job {}: {:?} on {}", id, job.operation, job.video_path);
        job
    }

    fn update_job<F: FnOnce(&mut EditJob)>(&self, id: i64, f: F) {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&id) {
            f(job);
        }
    }

    async fn process_job(&self, id: i64) {
        let job = match self.jobs.lock().unwrap().get(&id).cloned() {
            Some(job) => job,
            None => return,
        };
        self.update_job(id, |j| {
            j.status = JobStatus::Processing;
            j.progress = 10;
        });

        let has_audio = ffmpeg::has_audio_stream(Path::new(&job.video_path)).await;
        let argv = build_command(&job, has_audio);
        self.update_job(id, |j| j.progress = 20);

        let mut command = tokio::process::Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let outcome = async {
            let child = command.spawn().map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    format!("{} is not installed", argv[0])
                } else {
                    format!("Failed to start {}: {}", argv[0], e)
                }
            })?;
            self.update_job(id, |j| j.progress = 50);
            let output = tokio::time::timeout(JOB_TIMEOUT, child.wait_with_output())
                .await
                .map_err(|_| "Edit timed out".to_string())?
                .map_err(|e| e.to_string())?;
            if output.status.success() {
                Ok(())
            } else {
                Err(ffmpeg::stderr_tail(&output.stderr))
            }
        }
        .await;

        match outcome {
            Ok(()) => {
                self.update_job(id, |j| {
                    j.status = JobStatus::Completed;
                    j.completed_at = Some(crate::domain::now_epoch());
                    j.progress = 100;
                });
                info!("Edit job {} completed", id);
            }
            Err(message) => {
                error!("Edit job {} failed: {}", id, message);
                self.update_job(id, |j| {
                    j.status = JobStatus::Failed;
                    j.completed_at = Some(crate::domain::now_epoch());
                    j.error_message = Some(message);
                });
            }
        }
    }

    pub fn get_job(&self, id: i64) -> Option<EditJob> {
        self.jobs.lock().unwrap().get(&id).cloned()
    }

    /// All jobs, newest first.
    pub fn list_jobs(&self) -> Vec<EditJob> {
        let mut jobs: Vec<EditJob> = self.jobs.lock().unwrap().values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.total_cmp(&a.created_at));
        jobs
    }

    /// Forget a job; its output file stays on disk.
    pub fn remove_job(&self, id: i64) -> bool {
        self.jobs.lock().unwrap().remove(&id).is_some()
    }

    pub fn clear_completed(&self) -> usize {
        let mut jobs = self.jobs.lock().unwrap();
        let before = jobs.len();
        jobs.retain(|_, j| !matches!(j.status, JobStatus::Completed | JobStatus::Failed));
        before - jobs.len()
    }
}

/// Choose and build the subprocess argv for a job.
pub fn build_command(job: &EditJob, has_audio: bool) -> Vec<String> {
    match (job.operation, job.cut_method) {
        (EditOperation::Cut, CutMethod::Smartcut) => build_smartcut_command(job),
        (EditOperation::Cut, CutMethod::Copy) => build_copy_command(job, has_audio),
        _ => build_ffmpeg_command(job, has_audio),
    }
}

/// Frame-accurate cut/crop: seek before input plus `-accurate_seek`, then
/// re-encode with the quality preset.
fn build_ffmpeg_command(job: &EditJob, has_audio: bool) -> Vec<String> {
    let mut cmd: Vec<String> = vec!["ffmpeg".into(), "-y".into(), "-hide_banner".into()];

    if let Some(start) = &job.start_time {
        cmd.push("-ss".into());
        cmd.push(start.clone());
    }
    cmd.push("-accurate_seek".into());
    cmd.push("-i".into());
    cmd.push(job.video_path.clone());

    match (&job.start_time, &job.end_time) {
        (Some(start), Some(end)) => {
            let duration = (time_to_seconds(end) - time_to_seconds(start)).max(0.0);
            cmd.push("-t".into());
            cmd.push(duration.to_string());
        }
        (None, Some(end)) => {
            cmd.push("-to".into());
            cmd.push(end.clone());
        }
        _ => {}
    }

    let has_time_cut = job.start_time.as_deref().is_some_and(|s| s != "0:00:00")
        || job.end_time.is_some();
    let mut needs_reencode =
        has_time_cut || matches!(job.operation, EditOperation::Crop | EditOperation::CutAndCrop);

    if matches!(job.operation, EditOperation::Crop | EditOperation::CutAndCrop) {
        if let (Some(w), Some(h)) = (job.crop_width, job.crop_height) {
            let x = job.crop_x.unwrap_or(0);
            let y = job.crop_y.unwrap_or(0);
            cmd.push("-vf".into());
            cmd.push(format!("crop={}:{}:{}:{}", w, h, x, y));
            needs_reencode = true;
        }
    }

    if needs_reencode {
        let (crf, preset) = job.quality.settings();
        cmd.extend([
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            preset.into(),
            "-crf".into(),
            crf.into(),
            "-avoid_negative_ts".into(),
            "make_zero".into(),
        ]);
        if has_audio {
            cmd.extend(["-c:a".into(), "aac".into(), "-b:a".into(), "128k".into()]);
        } else {
            cmd.push("-an".into());
        }
    } else {
        cmd.extend(["-c".into(), "copy".into()]);
    }

    cmd.push(job.output_path.clone());
    cmd
}

/// Keyframe-aligned stream copy: fastest, no re-encode, no crop.
fn build_copy_command(job: &EditJob, has_audio: bool) -> Vec<String> {
    let mut cmd: Vec<String> = vec!["ffmpeg".into(), "-hide_banner".into()];

    if let Some(start) = &job.start_time {
        cmd.push("-ss".into());
        cmd.push(start.clone());
    }
    cmd.push("-i".into());
    cmd.push(job.video_path.clone());

    match (&job.start_time, &job.end_time) {
        (Some(start), Some(end)) => {
            let duration = (time_to_seconds(end) - time_to_seconds(start)).max(0.0);
            cmd.push("-t".into());
            cmd.push(duration.to_string());
        }
        (None, Some(end)) => {
            cmd.push("-t".into());
            cmd.push(time_to_seconds(end).to_string());
        }
        _ => {}
    }

    cmd.extend(["-avoid_negative_ts".into(), "make_zero".into()]);
    cmd.extend(["-map".into(), "0:v".into(), "-c:v".into(), "copy".into()]);
    if has_audio {
        cmd.extend(["-map".into(), "0:a".into(), "-c:a".into(), "copy".into()]);
    }
    cmd.extend(["-map_metadata".into(), "0".into()]);
    cmd.extend(["-movflags".into(), "+faststart".into()]);
    cmd.extend(["-default_mode".into(), "infer_no_subs".into()]);
    cmd.push("-ignore_unknown".into());
    cmd.extend(["-f".into(), "mp4".into(), "-y".into(), job.output_path.clone()]);
    cmd
}

/// Keyframe-aware external cutter. The kept segment is expressed as a
/// `--keep` range; `s`/`e` mark stream start/end.
fn build_smartcut_command(job: &EditJob) -> Vec<String> {
    let mut cmd: Vec<String> = vec![
        "smartcut".into(),
        job.video_path.clone(),
        job.output_path.clone(),
    ];
    let start = job.start_time.as_deref().map(time_to_seconds);
    let end = job.end_time.as_deref().map(time_to_seconds);
    let keep = match (start, end) {
        (Some(s), Some(e)) => Some(format!("{},{}", s, e)),
        (Some(s), None) => Some(format!("{},e", s)),
        (None, Some(e)) => Some(format!("s,{}", e)),
        (None, None) => None,
    };
    if let Some(keep) = keep {
        cmd.push("--keep".into());
        cmd.push(keep);
    }
    cmd.extend(["--log-level".into(), "warning".into()]);
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(operation: EditOperation, cut_method: CutMethod) -> EditJob {
        EditJob {
            id: 1,
            video_id: 7,
            video_path: "/root/A/clip.mp4".to_string(),
            operation,
            start_time: Some("00:01:00".to_string()),
            end_time: Some("00:02:30".to_string()),
            cut_method,
            crop_width: None,
            crop_height: None,
            crop_x: None,
            crop_y: None,
            preserve_faces: true,
            copy_other_items: false,
            output_filename: "out.mp4".to_string(),
            quality: Quality::Balanced,
            status: JobStatus::Pending,
            created_at: 0.0,
            completed_at: None,
            output_path: "/root/EDITED/out.mp4".to_string(),
            error_message: None,
            progress: 0,
        }
    }

    #[test]
    fn time_parsing_accepts_three_shapes() {
        assert_eq!(time_to_seconds("01:02:03"), 3723.0);
        assert_eq!(time_to_seconds("02:30"), 150.0);
        assert_eq!(time_to_seconds("45"), 45.0);
        assert_eq!(time_to_seconds("junk"), 0.0);
    }

    #[test]
    fn crop_presets_center_by_default() {
        assert_eq!(crop_rectangle("9:16", 1920, 1080, None, None), Some((607, 1080, 656, 0)));
        assert_eq!(crop_rectangle("16:9", 1920, 1440, None, None), Some((1920, 1080, 0, 180)));
        assert_eq!(crop_rectangle("1:1", 1920, 1080, None, None), Some((1080, 1080, 420, 0)));
        assert_eq!(crop_rectangle("1:1", 1920, 1080, Some(0), Some(0)), Some((1080, 1080, 0, 0)));
        assert_eq!(crop_rectangle("freeform", 1920, 1080, None, None), None);
        assert_eq!(crop_rectangle("1:1", 0, 1080, None, None), None);
    }

    #[test]
    fn precise_cut_seeks_before_input_and_reencodes() {
        let cmd = build_ffmpeg_command(&job(EditOperation::Cut, CutMethod::Ffmpeg), true);
        let ss = cmd.iter().position(|a| a == "-ss").unwrap();
        let input = cmd.iter().position(|a| a == "-i").unwrap();
        assert!(ss < input);
        assert!(cmd.contains(&"-accurate_seek".to_string()));
        assert!(cmd.contains(&"90".to_string())); // 2:30 - 1:00
        assert!(cmd.contains(&"libx264".to_string()));
        assert!(cmd.contains(&"aac".to_string()));
        assert_eq!(cmd.last().unwrap(), "/root/EDITED/out.mp4");
    }

    #[test]
    fn silent_input_drops_audio_track() {
        let cmd = build_ffmpeg_command(&job(EditOperation::Cut, CutMethod::Ffmpeg), false);
        assert!(cmd.contains(&"-an".to_string()));
        assert!(!cmd.contains(&"aac".to_string()));
    }

    #[test]
    fn crop_filter_is_included() {
        let mut j = job(EditOperation::CutAndCrop, CutMethod::Ffmpeg);
        j.crop_width = Some(1080);
        j.crop_height = Some(1080);
        j.crop_x = Some(420);
        j.crop_y = Some(0);
        let cmd = build_ffmpeg_command(&j, true);
        let vf = cmd.iter().position(|a| a == "-vf").unwrap();
        assert_eq!(cmd[vf + 1], "crop=1080:1080:420:0");
    }

    #[test]
    fn copy_cut_streams_without_reencode() {
        let cmd = build_copy_command(&job(EditOperation::Cut, CutMethod::Copy), true);
        assert!(cmd.contains(&"copy".to_string()));
        assert!(!cmd.contains(&"libx264".to_string()));
        assert!(cmd.contains(&"+faststart".to_string()));
    }

    #[test]
    fn smartcut_converts_times_to_keep_ranges() {
        let cmd = build_smartcut_command(&job(EditOperation::Cut, CutMethod::Smartcut));
        let keep = cmd.iter().position(|a| a == "--keep").unwrap();
        assert_eq!(cmd[keep + 1], "60,150");

        let mut open_ended = job(EditOperation::Cut, CutMethod::Smartcut);
        open_ended.end_time = None;
        let cmd = build_smartcut_command(&open_ended);
        let keep = cmd.iter().position(|a| a == "--keep").unwrap();
        assert_eq!(cmd[keep + 1], "60,e");
    }

    #[test]
    fn crop_requests_fall_back_to_ffmpeg() {
        let mut j = job(EditOperation::Crop, CutMethod::Smartcut);
        j.crop_width = Some(100);
        j.crop_height = Some(100);
        let cmd = build_command(&j, true);
        assert_eq!(cmd[0], "ffmpeg");
    }

    #[test]
    fn derived_filenames_carry_operation_and_range() {
        let request = EditRequest {
            video_id: 1,
            video_path: "/root/A/clip.mp4".to_string(),
            operation: EditOperation::Cut,
            start_time: Some("00:01:00".to_string()),
            end_time: Some("00:02:30".to_string()),
            cut_method: CutMethod::Ffmpeg,
            crop_preset: None,
            crop_width: None,
            crop_height: None,
            crop_x: None,
            crop_y: None,
            preserve_faces: true,
            copy_other_items: false,
            output_filename: None,
            output_location: "edited_folder".to_string(),
            quality: Quality::Balanced,
        };
        assert_eq!(
            VideoEditor::derive_filename(&request),
            "clip_cut_000100_000230.mp4"
        );

        let named = EditRequest {
            output_filename: Some("custom".to_string()),
            ..request
        };
        assert_eq!(VideoEditor::derive_filename(&named), "custom.mp4");
    }
}

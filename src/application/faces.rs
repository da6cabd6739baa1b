use crate::domain::{DetectionMethod, DomainError, FaceEmbedder, FaceId, MediaItem, MediaType};
use crate::infrastructure::{ffmpeg, AddEncodingOutcome, CatalogStore, OrtEmbedder};
use base64::{engine::general_purpose, Engine as _};
use image::GenericImageView;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

pub const MANUAL_SEARCH_THRESHOLD: f32 = 0.4;
pub const AUTO_LINK_THRESHOLD: f32 = 0.8;
pub const DEFAULT_SCAN_FRAMES: usize = 10;
pub const MAX_SCAN_FRAMES: usize = 50;
pub const FAST_SCAN_FRAMES: usize = 5;

pub fn encoding_to_base64(encoding: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(encoding.len() * 4);
    for value in encoding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    general_purpose::STANDARD.encode(bytes)
}

pub fn base64_to_encoding(raw: &str) -> Result<Vec<f32>, DomainError> {
    let bytes = general_purpose::STANDARD
        .decode(raw)
        .map_err(|e| DomainError::InvalidInput(format!("Bad encoding payload: {}", e)))?;
    if bytes.len() % 4 != 0 {
        return Err(DomainError::InvalidInput(
            "Encoding byte length is not a multiple of 4".to_string(),
        ));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for i in 0..a.len() {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Sharpness-based quality estimate for a face crop: Laplacian variance of
/// the luma plane, normalized so ~200 maps to 1.0.
pub fn face_quality(img: &image::DynamicImage) -> f64 {
    let gray = img.to_luma8();
    let (w, h) = gray.dimensions();
    if w < 3 || h < 3 {
        return 0.5;
    }
    let mut values = Vec::with_capacity(((w - 2) * (h - 2)) as usize);
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let center = gray.get_pixel(x, y)[0] as f64;
            let neighbors = gray.get_pixel(x - 1, y)[0] as f64
                + gray.get_pixel(x + 1, y)[0] as f64
                + gray.get_pixel(x, y - 1)[0] as f64
                + gray.get_pixel(x, y + 1)[0] as f64;
            values.push(neighbors - 4.0 * center);
        }
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    (variance / 200.0).min(1.0)
}

pub fn generate_face_name() -> String {
    let suffix: [u8; 3] = rand::thread_rng().gen();
    format!("face-{}", hex::encode(suffix))
}

/// Lazily-initialized handle on the external embedding model. The root switch
/// resets it; the first request after a switch pays the reload.
pub struct FaceModelHandle {
    detect_model: PathBuf,
    embed_model: PathBuf,
    inner: Mutex<Option<Arc<dyn FaceEmbedder>>>,
}

impl FaceModelHandle {
    pub fn new(detect_model: PathBuf, embed_model: PathBuf) -> FaceModelHandle {
        FaceModelHandle {
            detect_model,
            embed_model,
            inner: Mutex::new(None),
        }
    }

    #[cfg(test)]
    pub fn with_embedder(embedder: Arc<dyn FaceEmbedder>) -> FaceModelHandle {
        FaceModelHandle {
            detect_model: PathBuf::new(),
            embed_model: PathBuf::new(),
            inner: Mutex::new(Some(embedder)),
        }
    }

    pub fn get(&self) -> Result<Arc<dyn FaceEmbedder>, DomainError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(model) = inner.as_ref() {
            return Ok(model.clone());
        }
        info!("Loading face model");
        let model: Arc<dyn FaceEmbedder> =
            Arc::new(OrtEmbedder::load(&self.detect_model, &self.embed_model)?);
        *inner = Some(model.clone());
        Ok(model)
    }

    pub fn reset(&self) {
        *self.inner.lock().unwrap() = None;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EncodingMatch {
    pub encoding_id: i64,
    pub face_id: i64,
    pub similarity: f64,
    pub similarity_percent: f64,
    pub thumbnail: Option<String>,
    pub confidence: Option<f64>,
    pub quality_score: Option<f64>,
    pub video_id: Option<i64>,
    pub frame_timestamp: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FaceMatch {
    pub face_id: i64,
    pub name: String,
    pub similarity: f64,
    pub similarity_percent: f64,
    pub encoding_count: i64,
    pub actor_id: Option<i64>,
    pub actor_name: Option<String>,
    pub matched_encodings: Vec<EncodingMatch>,
}

#[derive(Debug, Serialize)]
pub struct ManualSearchResult {
    pub encoding: String,
    pub thumbnail: Option<String>,
    pub confidence: f64,
    pub matches: Vec<FaceMatch>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchInfo {
    pub face_id: i64,
    pub name: String,
    pub similarity: f64,
    pub similarity_percent: f64,
}

#[derive(Debug, Serialize)]
pub struct DetectionCandidate {
    pub timestamp: f64,
    pub confidence: f64,
    pub quality_score: f64,
    pub thumbnail: Option<String>,
    pub encoding: String,
    pub matched_face: Option<MatchInfo>,
    pub is_match: bool,
}

#[derive(Debug, Serialize)]
pub struct ReviewResult {
    pub detected_faces: Vec<DetectionCandidate>,
    pub frames_scanned: usize,
    pub faces_with_matches: usize,
    pub faces_new: usize,
}

/// One detection to be committed (either user-approved from a review pass or
/// straight out of an auto scan).
#[derive(Debug, Clone, Deserialize)]
pub struct ApprovedDetection {
    pub timestamp: f64,
    pub encoding: String,
    pub thumbnail: Option<String>,
    pub confidence: Option<f64>,
    pub quality_score: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct AutoScanSummary {
    pub detected_count: usize,
    pub new_faces_count: usize,
    pub linked_faces_count: usize,
    pub unique_faces: usize,
    pub face_ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
pub struct EncodingReview {
    pub encoding_id: i64,
    pub similarity: f64,
    pub similarity_percent: f64,
    pub classification: &'static str,
    pub thumbnail: Option<String>,
    pub quality_score: Option<f64>,
    pub confidence: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct DuplicateEncodingGroup {
    pub kept_encoding_id: i64,
    pub duplicates: Vec<DuplicateEncodingEntry>,
}

#[derive(Debug, Serialize)]
pub struct DuplicateEncodingEntry {
    pub encoding_id: i64,
    pub similarity_percent: f64,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct SimilarFaceEntry {
    pub face: FaceId,
    pub similarity_percent: f64,
}

pub struct FaceEngine {
    catalog: Arc<CatalogStore>,
    pub model: FaceModelHandle,
    pub manual_threshold: f32,
    pub auto_link_threshold: f32,
}

struct RawDetection {
    timestamp: f64,
    encoding: Vec<f32>,
    thumbnail: Option<String>,
    confidence: f64,
    quality: f64,
}

impl FaceEngine {
    pub fn new(catalog: Arc<CatalogStore>, model: FaceModelHandle) -> FaceEngine {
        FaceEngine {
            catalog,
            model,
            manual_threshold: MANUAL_SEARCH_THRESHOLD,
            auto_link_threshold: AUTO_LINK_THRESHOLD,
        }
    }

    /// Linear cosine scan over every stored encoding, grouped per face with
    /// the matching encodings sorted by similarity. Complete modulo `top_k`
    /// truncation and the optional excluded face.
    pub fn search_similar(
        &self,
        encoding: &[f32],
        threshold: f32,
        top_k: usize,
        exclude_face_id: Option<i64>,
    ) -> Result<Vec<FaceMatch>, DomainError> {
        let all = self.catalog.all_encodings()?;
        let mut by_face: HashMap<i64, Vec<EncodingMatch>> = HashMap::new();

        for stored in &all {
            if exclude_face_id == Some(stored.face_id) {
                continue;
            }
            let vector = match base64_to_encoding(&stored.encoding) {
                Ok(v) => v,
                Err(_) => {
                    warn!("Undecodable encoding row {}", stored.id);
                    continue;
                }
            };
            let similarity = cosine_similarity(encoding, &vector) as f64;
            if similarity < threshold as f64 {
                continue;
            }
            by_face.entry(stored.face_id).or_default().push(EncodingMatch {
                encoding_id: stored.id,
                face_id: stored.face_id,
                similarity,
                similarity_percent: (similarity * 1000.0).round() / 10.0,
                thumbnail: stored.thumbnail.clone(),
                confidence: stored.confidence,
                quality_score: stored.quality_score,
                video_id: stored.media_item_id,
                frame_timestamp: stored.frame_timestamp,
            });
        }

        let mut results = Vec::with_capacity(by_face.len());
        for (face_id, mut encodings) in by_face {
            let face = match self.catalog.get_face(face_id)? {
                Some(face) => face,
                None => continue,
            };
            encodings.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
            let best = encodings[0].similarity;
            let actor_name = match face.actor_id {
                Some(actor_id) => self.catalog.get_actor(actor_id)?.map(|a| a.name),
                None => None,
            };
            results.push(FaceMatch {
                face_id,
                name: face.name,
                similarity: best,
                similarity_percent: (best * 1000.0).round() / 10.0,
                encoding_count: face.encoding_count,
                actor_id: face.actor_id,
                actor_name,
                matched_encodings: encodings,
            });
        }

        results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        results.truncate(top_k);
        Ok(results)
    }

    /// Manual-search ingest: embed an uploaded face crop and return matches
    /// plus the encoding/thumbnail so a later call can commit them.
    pub fn search_by_image(
        &self,
        image_bytes: &[u8],
        threshold: Option<f32>,
        top_k: usize,
    ) -> Result<ManualSearchResult, DomainError> {
        let model = self.model.get()?;
        let (encoding, confidence) = model
            .embed(image_bytes)?
            .ok_or_else(|| DomainError::InvalidInput("No face found in image".to_string()))?;
        let matches = self.search_similar(
            &encoding,
            threshold.unwrap_or(self.manual_threshold),
            top_k,
            None,
        )?;
        Ok(ManualSearchResult {
            encoding: encoding_to_base64(&encoding),
            thumbnail: Some(general_purpose::STANDARD.encode(image_bytes)),
            confidence: confidence as f64,
            matches,
        })
    }

    /// Random frame timestamps over the (possibly capped) duration, with a
    /// minimum gap so samples spread out.
    fn sample_timestamps(duration: f64, num_frames: usize, max_duration: Option<f64>) -> Vec<f64> {
        let effective = match max_duration {
            Some(cap) if cap > 0.0 => duration.min(cap),
            _ => duration,
        };
        if effective <= 0.0 {
            return Vec::new();
        }
        let min_gap = (effective / (num_frames as f64 * 2.0)).max(1.0);
        let mut rng = rand::thread_rng();
        let mut timestamps: Vec<f64> = Vec::new();
        for _ in 0..num_frames * 3 {
            let ts = rng.gen_range(effective * 0.005..effective * 0.995);
            if timestamps.iter().all(|t| (t - ts).abs() >= min_gap) {
                timestamps.push(ts);
                if timestamps.len() >= num_frames {
                    break;
                }
            }
        }
        timestamps.sort_by(f64::total_cmp);
        timestamps
    }

    /// Decode frames for a scan: one frame for images and animations, random
    /// samples for videos.
    async fn collect_frames(
        &self,
        item: &MediaItem,
        num_frames: usize,
        max_duration: Option<f64>,
    ) -> Result<Vec<(Vec<u8>, f64)>, DomainError> {
        let path = Path::new(&item.path);
        if !path.exists() {
            return Err(DomainError::NotFound("File"));
        }

        if item.media_type == MediaType::Image {
            if matches!(item.extension.as_str(), ".gif" | ".webp") {
                return Ok(ffmpeg::extract_frame_seconds(path, 0.0)
                    .await?
                    .map(|bytes| vec![(bytes, 0.0)])
                    .unwrap_or_default());
            }
            return Ok(vec![(std::fs::read(path)?, 0.0)]);
        }

        let duration = match item.duration {
            Some(d) if d > 0.0 => d,
            _ => match ffmpeg::probe_duration(path).await? {
                Some(d) if d > 0.0 => d,
                _ => return Ok(Vec::new()),
            },
        };

        let num_frames = num_frames.clamp(1, MAX_SCAN_FRAMES);
        let mut frames = Vec::new();
        for ts in Self::sample_timestamps(duration, num_frames, max_duration) {
            if let Some(bytes) = ffmpeg::extract_frame_seconds(path, ts).await? {
                frames.push((bytes, ts));
            }
        }
        Ok(frames)
    }

    async fn detect_in_item(
        &self,
        item: &MediaItem,
        num_frames: usize,
        max_duration: Option<f64>,
    ) -> Result<(Vec<RawDetection>, usize), DomainError> {
        let model = self.model.get()?;
        let frames = self.collect_frames(item, num_frames, max_duration).await?;
        let mut detections = Vec::new();

        for (jpeg, timestamp) in &frames {
            let frame_img = match image::load_from_memory(jpeg) {
                Ok(img) => img,
                Err(e) => {
                    warn!("Undecodable frame at {:.2}s of {}: {}", timestamp, item.path, e);
                    continue;
                }
            };
            let found = match model.detect(jpeg) {
                Ok(found) => found,
                Err(e) => {
                    warn!("Detection failed at {:.2}s of {}: {}", timestamp, item.path, e);
                    continue;
                }
            };
            for face in found {
                let (fw, fh) = frame_img.dimensions();
                let x = face.x1.max(0) as u32;
                let y = face.y1.max(0) as u32;
                let w = (face.x2.max(0) as u32).min(fw).saturating_sub(x);
                let h = (face.y2.max(0) as u32).min(fh).saturating_sub(y);
                let (thumbnail, quality) = if w >= 2 && h >= 2 {
                    let crop = frame_img.crop_imm(x, y, w, h);
                    let mut jpeg_out = Vec::new();
                    let encoder =
                        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg_out, 85);
                    match crop.to_rgb8().write_with_encoder(encoder) {
                        Ok(()) => (
                            Some(general_purpose::STANDARD.encode(&jpeg_out)),
                            face_quality(&crop),
                        ),
                        Err(_) => (None, 0.5),
                    }
                } else {
                    (None, 0.5)
                };
                detections.push(RawDetection {
                    timestamp: *timestamp,
                    encoding: face.embedding,
                    thumbnail,
                    confidence: face.confidence as f64,
                    quality,
                });
            }
        }
        Ok((detections, frames.len()))
    }

    /// Detect faces and return them for user review, without writing.
    pub async fn detect_for_review(
        &self,
        item: &MediaItem,
        num_frames: usize,
        max_duration: Option<f64>,
    ) -> Result<ReviewResult, DomainError> {
        let (detections, frames_scanned) =
            self.detect_in_item(item, num_frames, max_duration).await?;

        let mut candidates = Vec::with_capacity(detections.len());
        for detection in detections {
            let matches =
                self.search_similar(&detection.encoding, self.auto_link_threshold, 1, None)?;
            let matched_face = matches.first().map(|m| MatchInfo {
                face_id: m.face_id,
                name: m.name.clone(),
                similarity: m.similarity,
                similarity_percent: m.similarity_percent,
            });
            candidates.push(DetectionCandidate {
                timestamp: detection.timestamp,
                confidence: detection.confidence,
                quality_score: detection.quality,
                thumbnail: detection.thumbnail,
                encoding: encoding_to_base64(&detection.encoding),
                is_match: matched_face.is_some(),
                matched_face,
            });
        }

        let with_matches = candidates.iter().filter(|c| c.is_match).count();
        Ok(ReviewResult {
            faces_with_matches: with_matches,
            faces_new: candidates.len() - with_matches,
            detected_faces: candidates,
            frames_scanned,
        })
    }

    /// The assignment protocol: matched detections go to their best existing
    /// face; every unmatched detection in the batch lands in ONE new face
    /// (multiple unmatched detections from one scan are overwhelmingly the
    /// same person in different poses).
    fn assign_detections(
        &self,
        video_id: i64,
        detections: Vec<RawDetection>,
        method: DetectionMethod,
    ) -> Result<AutoScanSummary, DomainError> {
        let detected_count = detections.len();
        let mut matched: HashMap<i64, Vec<RawDetection>> = HashMap::new();
        let mut unmatched: Vec<RawDetection> = Vec::new();

        for detection in detections {
            let matches =
                self.search_similar(&detection.encoding, self.auto_link_threshold, 1, None)?;
            match matches.first() {
                Some(best) => matched.entry(best.face_id).or_default().push(detection),
                None => unmatched.push(detection),
            }
        }

        let mut linked_faces: Vec<i64> = Vec::new();
        let mut created_faces: Vec<i64> = Vec::new();

        for (face_id, group) in matched {
            for detection in &group {
                self.add_detection_encoding(face_id, video_id, detection)?;
            }
            linked_faces.push(face_id);
            info!("Added {} detections to existing face {}", group.len(), face_id);
        }

        if !unmatched.is_empty() {
            let face = self.catalog.create_face(&generate_face_name(), None)?;
            for detection in &unmatched {
                self.add_detection_encoding(face.id, video_id, detection)?;
            }
            info!(
                "Created face {} for {} unmatched detections",
                face.id,
                unmatched.len()
            );
            created_faces.push(face.id);
        }

        let mut unique: Vec<i64> = linked_faces.iter().chain(created_faces.iter()).copied().collect();
        unique.sort_unstable();
        unique.dedup();
        for face_id in &unique {
            self.catalog.upsert_video_face(video_id, *face_id, method)?;
        }

        Ok(AutoScanSummary {
            detected_count,
            new_faces_count: created_faces.len(),
            linked_faces_count: linked_faces.len(),
            unique_faces: unique.len(),
            face_ids: unique,
        })
    }

    fn add_detection_encoding(
        &self,
        face_id: i64,
        video_id: i64,
        detection: &RawDetection,
    ) -> Result<(), DomainError> {
        match self.catalog.add_encoding(
            face_id,
            Some(video_id),
            detection.timestamp,
            &encoding_to_base64(&detection.encoding),
            detection.thumbnail.as_deref(),
            Some(detection.confidence),
            Some(detection.quality),
        )? {
            AddEncodingOutcome::Added(_) => {}
            AddEncodingOutcome::Skipped => {
                info!("Skipped duplicate encoding for face {}", face_id)
            }
        }
        Ok(())
    }

    /// Full auto-scan: sample, detect, assign, link.
    pub async fn auto_scan(
        &self,
        item: &MediaItem,
        num_frames: usize,
        max_duration: Option<f64>,
    ) -> Result<AutoScanSummary, DomainError> {
        let (detections, _) = self.detect_in_item(item, num_frames, max_duration).await?;
        self.assign_detections(item.id, detections, DetectionMethod::AutoScan)
    }

    /// Commit a user-approved subset of reviewed detections.
    pub fn commit_detections(
        &self,
        video_id: i64,
        approved: &[ApprovedDetection],
    ) -> Result<AutoScanSummary, DomainError> {
        let mut detections = Vec::with_capacity(approved.len());
        for detection in approved {
            detections.push(RawDetection {
                timestamp: detection.timestamp,
                encoding: base64_to_encoding(&detection.encoding)?,
                thumbnail: detection.thumbnail.clone(),
                confidence: detection.confidence.unwrap_or(0.5),
                quality: detection.quality_score.unwrap_or(0.5),
            });
        }
        self.assign_detections(video_id, detections, DetectionMethod::UserSelected)
    }

    /// Score every encoding of a face against its primary (or best) one.
    pub fn cleanup_view(
        &self,
        face_id: i64,
        threshold: f64,
    ) -> Result<Vec<EncodingReview>, DomainError> {
        let reference = self
            .catalog
            .primary_or_best_encoding(face_id)?
            .ok_or(DomainError::NotFound("Encoding"))?;
        let reference_vec = base64_to_encoding(&reference.encoding)?;

        let mut reviews = Vec::new();
        for encoding in self.catalog.encodings_for_face(face_id)? {
            if encoding.id == reference.id {
                reviews.push(EncodingReview {
                    encoding_id: encoding.id,
                    similarity: 1.0,
                    similarity_percent: 100.0,
                    classification: "primary",
                    thumbnail: encoding.thumbnail,
                    quality_score: encoding.quality_score,
                    confidence: encoding.confidence,
                });
                continue;
            }
            let vector = base64_to_encoding(&encoding.encoding)?;
            let similarity = cosine_similarity(&reference_vec, &vector) as f64;
            let classification = if similarity >= 0.75 {
                "good"
            } else if similarity >= threshold {
                "acceptable"
            } else {
                "poor"
            };
            reviews.push(EncodingReview {
                encoding_id: encoding.id,
                similarity,
                similarity_percent: (similarity * 1000.0).round() / 10.0,
                classification,
                thumbnail: encoding.thumbnail,
                quality_score: encoding.quality_score,
                confidence: encoding.confidence,
            });
        }

        reviews.sort_by(|a, b| {
            let a_primary = a.classification == "primary";
            let b_primary = b.classification == "primary";
            b_primary
                .cmp(&a_primary)
                .then(b.similarity.total_cmp(&a.similarity))
        });
        Ok(reviews)
    }

    /// Near-identical encodings (>= 0.95 cosine) within one face: keep the
    /// best of each cluster, flag the rest.
    pub fn duplicate_encoding_analysis(
        &self,
        face_id: i64,
    ) -> Result<Vec<DuplicateEncodingGroup>, DomainError> {
        let encodings = self.catalog.encodings_for_face(face_id)?;
        let vectors: Vec<Option<Vec<f32>>> = encodings
            .iter()
            .map(|e| base64_to_encoding(&e.encoding).ok())
            .collect();

        let mut assigned = vec![false; encodings.len()];
        let mut groups = Vec::new();

        for i in 0..encodings.len() {
            if assigned[i] {
                continue;
            }
            let mut cluster = vec![i];
            for j in (i + 1)..encodings.len() {
                if assigned[j] {
                    continue;
                }
                if let (Some(a), Some(b)) = (&vectors[i], &vectors[j]) {
                    if cosine_similarity(a, b) >= 0.95 {
                        cluster.push(j);
                        assigned[j] = true;
                    }
                }
            }
            assigned[i] = true;
            if cluster.len() < 2 {
                continue;
            }

            // encodings_for_face is already best-quality-first.
            let keep = cluster[0];
            let duplicates = cluster[1..]
                .iter()
                .map(|&idx| {
                    let similarity = match (&vectors[keep], &vectors[idx]) {
                        (Some(a), Some(b)) => cosine_similarity(a, b) as f64,
                        _ => 1.0,
                    };
                    DuplicateEncodingEntry {
                        encoding_id: encodings[idx].id,
                        similarity_percent: (similarity * 1000.0).round() / 10.0,
                        reason: format!(
                            "{:.1}% similar to a higher-quality encoding",
                            similarity * 100.0
                        ),
                    }
                })
                .collect();
            groups.push(DuplicateEncodingGroup {
                kept_encoding_id: encodings[keep].id,
                duplicates,
            });
        }
        Ok(groups)
    }

    /// Cross-face grouping over each face's reference vector: union-find on
    /// pairwise cosine above the threshold. Groups of at least two faces,
    /// each member scored against the group's first.
    pub fn group_similar_faces(
        &self,
        threshold: f32,
    ) -> Result<Vec<Vec<SimilarFaceEntry>>, DomainError> {
        let faces = self.catalog.list_faces(None, None)?;
        let mut reference: Vec<(FaceId, Vec<f32>)> = Vec::new();
        for face in faces {
            if let Some(encoding) = self.catalog.primary_or_best_encoding(face.id)? {
                if let Ok(vector) = base64_to_encoding(&encoding.encoding) {
                    reference.push((face, vector));
                }
            }
        }

        let n = reference.len();
        let mut parent: Vec<usize> = (0..n).collect();
        fn find(parent: &mut Vec<usize>, x: usize) -> usize {
            if parent[x] != x {
                let up = parent[x];
                let root = find(parent, up);
                parent[x] = root;
            }
            parent[x]
        }
        for i in 0..n {
            for j in (i + 1)..n {
                if cosine_similarity(&reference[i].1, &reference[j].1) > threshold {
                    let ri = find(&mut parent, i);
                    let rj = find(&mut parent, j);
                    if ri != rj {
                        parent[ri] = rj;
                    }
                }
            }
        }

        let mut components: HashMap<usize, Vec<usize>> = HashMap::new();
        for i in 0..n {
            let root = find(&mut parent, i);
            components.entry(root).or_default().push(i);
        }

        let mut groups = Vec::new();
        for mut members in components.into_values() {
            if members.len() < 2 {
                continue;
            }
            members.sort_unstable();
            let first = members[0];
            let entries = members
                .iter()
                .map(|&idx| {
                    let similarity = if idx == first {
                        1.0
                    } else {
                        cosine_similarity(&reference[first].1, &reference[idx].1) as f64
                    };
                    SimilarFaceEntry {
                        face: reference[idx].0.clone(),
                        similarity_percent: (similarity * 1000.0).round() / 10.0,
                    }
                })
                .collect::<Vec<_>>();
            groups.push(entries);
        }
        groups.sort_by(|a, b| b.len().cmp(&a.len()));
        Ok(groups)
    }

    /// Full pairwise similarity matrix for the given faces. None marks a face
    /// with no usable reference encoding.
    pub fn compare_faces(
        &self,
        face_ids: &[i64],
    ) -> Result<Vec<Vec<Option<f64>>>, DomainError> {
        let mut vectors: Vec<Option<Vec<f32>>> = Vec::with_capacity(face_ids.len());
        for &face_id in face_ids {
            let vector = match self.catalog.primary_or_best_encoding(face_id)? {
                Some(encoding) => base64_to_encoding(&encoding.encoding).ok(),
                None => None,
            };
            vectors.push(vector);
        }

        let n = face_ids.len();
        let mut matrix = vec![vec![None; n]; n];
        for i in 0..n {
            for j in 0..n {
                matrix[i][j] = match (&vectors[i], &vectors[j]) {
                    (Some(a), Some(b)) => Some(cosine_similarity(a, b) as f64),
                    _ => None,
                };
            }
        }
        Ok(matrix)
    }

    /// Merge faces: first id is the target, the rest are absorbed.
    pub fn merge(
        &self,
        face_ids: &[i64],
        new_name: Option<&str>,
        actor_id: Option<Option<i64>>,
    ) -> Result<FaceId, DomainError> {
        if face_ids.len() < 2 {
            return Err(DomainError::InvalidInput(
                "Merging requires at least two faces".to_string(),
            ));
        }
        let target = face_ids[0];
        let merged = self.catalog.merge_faces(target, &face_ids[1..])?;
        if new_name.is_some() || actor_id.is_some() {
            return self.catalog.update_face(target, new_name, actor_id);
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::catalog::{test_scanned_file, TestDb};

    struct NoModel;
    impl FaceEmbedder for NoModel {
        fn embed(&self, _: &[u8]) -> Result<Option<(Vec<f32>, f32)>, DomainError> {
            Err(DomainError::Dependency("no model in tests".to_string()))
        }
        fn detect(&self, _: &[u8]) -> Result<Vec<crate::domain::DetectedFace>, DomainError> {
            Err(DomainError::Dependency("no model in tests".to_string()))
        }
    }

    fn engine(db: &TestDb) -> FaceEngine {
        FaceEngine::new(
            db.store.clone(),
            FaceModelHandle::with_embedder(Arc::new(NoModel)),
        )
    }

    fn seed_encoding(db: &TestDb, face_id: i64, vector: &[f32], quality: f64) {
        db.store
            .add_encoding(
                face_id,
                None,
                0.0,
                &encoding_to_base64(vector),
                None,
                Some(0.9),
                Some(quality),
            )
            .unwrap();
    }

    #[test]
    fn base64_round_trips_vectors() {
        let vector: Vec<f32> = (0..512).map(|i| (i as f32) * 0.25 - 64.0).collect();
        let encoded = encoding_to_base64(&vector);
        assert_eq!(base64_to_encoding(&encoded).unwrap(), vector);
        assert!(base64_to_encoding("!!!").is_err());
    }

    #[test]
    fn cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn generated_names_have_face_prefix() {
        let name = generate_face_name();
        assert!(name.starts_with("face-"));
        assert_eq!(name.len(), 11);
    }

    #[test]
    fn search_finds_every_face_above_threshold() {
        let db = TestDb::new("faces_search");
        let engine = engine(&db);

        let close = db.store.create_face("face-close", None).unwrap();
        let closer = db.store.create_face("face-closer", None).unwrap();
        let far = db.store.create_face("face-far", None).unwrap();
        seed_encoding(&db, close.id, &[0.9, 0.1, 0.0], 0.5);
        seed_encoding(&db, closer.id, &[1.0, 0.0, 0.0], 0.5);
        seed_encoding(&db, far.id, &[0.0, 0.0, 1.0], 0.5);

        let results = engine.search_similar(&[1.0, 0.0, 0.0], 0.5, 10, None).unwrap();
        let ids: Vec<i64> = results.iter().map(|m| m.face_id).collect();
        assert_eq!(ids.len(), 2);
        // Best match first.
        assert_eq!(ids[0], closer.id);
        assert!(ids.contains(&close.id));
        assert!(!ids.contains(&far.id));

        let excluded = engine
            .search_similar(&[1.0, 0.0, 0.0], 0.5, 10, Some(closer.id))
            .unwrap();
        assert_eq!(excluded.len(), 1);
        assert_eq!(excluded[0].face_id, close.id);
    }

    #[test]
    fn assignment_groups_unmatched_into_one_face() {
        let db = TestDb::new("faces_assign");
        let engine = engine(&db);
        let (video, _) = db
            .store
            .upsert_scanned(&test_scanned_file("/root/A/v.mp4", "A"))
            .unwrap();

        let known = db.store.create_face("face-known", None).unwrap();
        seed_encoding(&db, known.id, &[1.0, 0.0, 0.0, 0.0], 0.9);

        // One detection matches the known face, two are strangers (to the
        // catalog, and similar to each other).
        let approved = vec![
            ApprovedDetection {
                timestamp: 1.0,
                encoding: encoding_to_base64(&[0.99, 0.01, 0.0, 0.0]),
                thumbnail: None,
                confidence: Some(0.95),
                quality_score: Some(0.8),
            },
            ApprovedDetection {
                timestamp: 2.0,
                encoding: encoding_to_base64(&[0.0, 1.0, 0.0, 0.0]),
                thumbnail: None,
                confidence: Some(0.9),
                quality_score: Some(0.7),
            },
            ApprovedDetection {
                timestamp: 3.0,
                encoding: encoding_to_base64(&[0.0, 0.98, 0.02, 0.0]),
                thumbnail: None,
                confidence: Some(0.9),
                quality_score: Some(0.6),
            },
        ];

        let summary = engine.commit_detections(video, &approved).unwrap();
        assert_eq!(summary.detected_count, 3);
        assert_eq!(summary.linked_faces_count, 1);
        // The insight: both unmatched detections share ONE new face.
        assert_eq!(summary.new_faces_count, 1);
        assert_eq!(summary.unique_faces, 2);

        let known_after = db.store.get_face(known.id).unwrap().unwrap();
        assert_eq!(known_after.encoding_count, 2);

        let new_face_id = summary
            .face_ids
            .iter()
            .find(|id| **id != known.id)
            .copied()
            .unwrap();
        let new_face = db.store.get_face(new_face_id).unwrap().unwrap();
        assert_eq!(new_face.encoding_count, 2);

        // Both faces linked to the video.
        let map = db.store.faces_for_videos(&[video]).unwrap();
        assert_eq!(map[&video].len(), 2);
    }

    #[test]
    fn cleanup_view_classifies_against_primary() {
        let db = TestDb::new("faces_cleanup");
        let engine = engine(&db);
        let face = db.store.create_face("face-c", None).unwrap();

        // Highest quality becomes the fallback primary.
        seed_encoding(&db, face.id, &[1.0, 0.0, 0.0], 0.9);
        seed_encoding(&db, face.id, &[0.95, 0.05, 0.0], 0.5); // good
        seed_encoding(&db, face.id, &[0.5, 0.5, 0.0], 0.4); // acceptable-ish
        seed_encoding(&db, face.id, &[0.0, 0.0, 1.0], 0.3); // poor

        let reviews = engine.cleanup_view(face.id, 0.3).unwrap();
        assert_eq!(reviews.len(), 4);
        assert_eq!(reviews[0].classification, "primary");
        assert_eq!(reviews[1].classification, "good");
        assert_eq!(reviews[3].classification, "poor");
        // Descending similarity after the primary.
        assert!(reviews[1].similarity >= reviews[2].similarity);
    }

    #[test]
    fn duplicate_analysis_keeps_best_quality() {
        let db = TestDb::new("faces_dupes");
        let engine = engine(&db);
        let face = db.store.create_face("face-d", None).unwrap();

        seed_encoding(&db, face.id, &[1.0, 0.0, 0.0], 0.9);
        seed_encoding(&db, face.id, &[0.999, 0.001, 0.0], 0.4);
        seed_encoding(&db, face.id, &[0.0, 1.0, 0.0], 0.5);

        let groups = engine.duplicate_encoding_analysis(face.id).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].duplicates.len(), 1);

        let encodings = db.store.encodings_for_face(face.id).unwrap();
        // Kept one is the highest-quality member of the cluster.
        assert_eq!(groups[0].kept_encoding_id, encodings[0].id);
    }

    #[test]
    fn cross_face_grouping_uses_reference_vectors() {
        let db = TestDb::new("faces_groups");
        let engine = engine(&db);

        let a = db.store.create_face("face-a", None).unwrap();
        let b = db.store.create_face("face-b", None).unwrap();
        let c = db.store.create_face("face-c", None).unwrap();
        seed_encoding(&db, a.id, &[1.0, 0.0, 0.0], 0.9);
        seed_encoding(&db, b.id, &[0.97, 0.03, 0.0], 0.9);
        seed_encoding(&db, c.id, &[0.0, 0.0, 1.0], 0.9);

        let groups = engine.group_similar_faces(0.5).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[0][0].similarity_percent, 100.0);
    }

    #[test]
    fn compare_matrix_is_symmetric() {
        let db = TestDb::new("faces_compare");
        let engine = engine(&db);
        let a = db.store.create_face("face-a", None).unwrap();
        let b = db.store.create_face("face-b", None).unwrap();
        let empty = db.store.create_face("face-empty", None).unwrap();
        seed_encoding(&db, a.id, &[1.0, 0.0], 0.9);
        seed_encoding(&db, b.id, &[0.0, 1.0], 0.9);

        let matrix = engine.compare_faces(&[a.id, b.id, empty.id]).unwrap();
        assert_eq!(matrix[0][0], Some(1.0));
        assert_eq!(matrix[0][1], matrix[1][0]);
        assert_eq!(matrix[0][2], None);
        assert_eq!(matrix[2][2], None);
    }

    #[test]
    fn merge_requires_two_faces() {
        let db = TestDb::new("faces_merge_args");
        let engine = engine(&db);
        let a = db.store.create_face("face-a", None).unwrap();
        assert!(engine.merge(&[a.id], None, None).is_err());
    }

    #[test]
    fn sampled_timestamps_stay_in_bounds() {
        let timestamps = FaceEngine::sample_timestamps(100.0, 10, None);
        assert!(!timestamps.is_empty());
        assert!(timestamps.iter().all(|t| *t >= 0.5 && *t <= 99.5));
        assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));

        let capped = FaceEngine::sample_timestamps(100.0, 5, Some(3.0));
        assert!(capped.iter().all(|t| *t <= 3.0));

        assert!(FaceEngine::sample_timestamps(0.0, 5, None).is_empty());
    }

    #[test]
    fn face_quality_prefers_detail() {
        let flat = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            32,
            32,
            image::Rgb([128, 128, 128]),
        ));
        let busy = image::DynamicImage::ImageRgb8(image::RgbImage::from_fn(32, 32, |x, y| {
            if (x + y) % 2 == 0 {
                image::Rgb([255, 255, 255])
            } else {
                image::Rgb([0, 0, 0])
            }
        }));
        assert!(face_quality(&flat) < 0.01);
        assert!(face_quality(&busy) > face_quality(&flat));
    }
}

use crate::domain::{DetectedFace, DomainError, FaceEmbedder};
use image::{imageops::FilterType, GenericImageView};
use ndarray::Array4;
use ort::{inputs, session::Session, value::TensorRef};
use std::path::Path;
use std::sync::{Condvar, Mutex};
use tracing::debug;

const SESSION_POOL_SIZE: usize = 2;

/// Detection input size for the UltraFace-slim 320 model.
const DETECT_W: u32 = 320;
const DETECT_H: u32 = 240;
const DETECT_THRESHOLD: f32 = 0.7;

/// ArcFace-style embedders take a 112x112 crop and emit a 512-D vector.
const EMBED_EDGE: u32 = 112;

struct SessionPair {
    detect: Session,
    embed: Session,
}

/// ONNX face pipeline: an UltraFace-slim detector plus a 512-D embedding
/// model, both loaded from external files. Sessions are pooled because a
/// `Session::run` needs exclusive access.
pub struct OrtEmbedder {
    pool: Mutex<Vec<SessionPair>>,
    available: Condvar,
}

impl OrtEmbedder {
    pub fn load(detect_model: &Path, embed_model: &Path) -> Result<Self, DomainError> {
        if !detect_model.exists() || !embed_model.exists() {
            return Err(DomainError::Dependency(format!(
                "Face model files missing ({} / {})",
                detect_model.display(),
                embed_model.display()
            )));
        }
        let mut pairs = Vec::with_capacity(SESSION_POOL_SIZE);
        for _ in 0..SESSION_POOL_SIZE {
            let detect = Session::builder()
                .map_err(|e| DomainError::Dependency(e.to_string()))?
                .commit_from_file(detect_model)
                .map_err(|e| DomainError::Dependency(e.to_string()))?;
            let embed = Session::builder()
                .map_err(|e| DomainError::Dependency(e.to_string()))?
                .commit_from_file(embed_model)
                .map_err(|e| DomainError::Dependency(e.to_string()))?;
            pairs.push(SessionPair { detect, embed });
        }
        Ok(Self {
            pool: Mutex::new(pairs),
            available: Condvar::new(),
        })
    }

    fn with_sessions<T, F>(&self, f: F) -> Result<T, DomainError>
    where
        F: FnOnce(&mut SessionPair) -> Result<T, DomainError>,
    {
        let mut pair = {
            let mut pool = self
                .pool
                .lock()
                .map_err(|_| DomainError::Dependency("Session pool poisoned".to_string()))?;
            loop {
                if let Some(pair) = pool.pop() {
                    break pair;
                }
                pool = self
                    .available
                    .wait(pool)
                    .map_err(|_| DomainError::Dependency("Session pool wait failed".to_string()))?;
            }
        };

        let result = f(&mut pair);

        self.pool.lock().unwrap().push(pair);
        self.available.notify_one();

        result
    }

    fn embed_crop(&self, crop: &image::DynamicImage) -> Result<Vec<f32>, DomainError> {
        let resized = crop.resize_exact(EMBED_EDGE, EMBED_EDGE, FilterType::CatmullRom);
        let mut input = Array4::<f32>::zeros((1, 3, EMBED_EDGE as usize, EMBED_EDGE as usize));
        for (x, y, pixel) in resized.pixels() {
            input[[0, 0, y as usize, x as usize]] = (pixel[0] as f32 - 127.5) / 128.0;
            input[[0, 1, y as usize, x as usize]] = (pixel[1] as f32 - 127.5) / 128.0;
            input[[0, 2, y as usize, x as usize]] = (pixel[2] as f32 - 127.5) / 128.0;
        }
        let tensor = TensorRef::from_array_view(&input)
            .map_err(|e| DomainError::Dependency(e.to_string()))?;

        let mut embedding = self.with_sessions(|pair| {
            let outputs = pair
                .embed
                .run(inputs![tensor])
                .map_err(|e| DomainError::Dependency(format!("Embedding failed: {}", e)))?;
            Ok(outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| DomainError::Dependency(e.to_string()))?
                .1
                .to_vec())
        })?;

        let norm = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            let inv = 1.0 / norm;
            for x in embedding.iter_mut() {
                *x *= inv;
            }
        }
        Ok(embedding)
    }

    fn detect_boxes(
        &self,
        img: &image::DynamicImage,
    ) -> Result<Vec<(f32, i32, i32, i32, i32)>, DomainError> {
        let (width, height) = img.dimensions();
        let resized = img.resize_exact(DETECT_W, DETECT_H, FilterType::CatmullRom);
        let mut input = Array4::<f32>::zeros((1, 3, DETECT_H as usize, DETECT_W as usize));
        for (x, y, pixel) in resized.pixels() {
            input[[0, 0, y as usize, x as usize]] = (pixel[0] as f32 - 127.0) / 128.0;
            input[[0, 1, y as usize, x as usize]] = (pixel[1] as f32 - 127.0) / 128.0;
            input[[0, 2, y as usize, x as usize]] = (pixel[2] as f32 - 127.0) / 128.0;
        }
        let tensor = TensorRef::from_array_view(&input)
            .map_err(|e| DomainError::Dependency(e.to_string()))?;

        let (boxes, scores) = self.with_sessions(|pair| {
            let outputs = pair
                .detect
                .run(inputs![tensor])
                .map_err(|e| DomainError::Dependency(format!("Detection failed: {}", e)))?;
            let a = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| DomainError::Dependency(e.to_string()))?
                .1
                .to_vec();
            let b = outputs[1]
                .try_extract_tensor::<f32>()
                .map_err(|e| DomainError::Dependency(e.to_string()))?
                .1
                .to_vec();
            // Output order is not stable across exports; boxes are 4 floats
            // per anchor, scores 2.
            if a.len() == b.len() * 2 {
                Ok((a, b))
            } else if b.len() == a.len() * 2 {
                Ok((b, a))
            } else {
                Err(DomainError::Dependency(format!(
                    "Unexpected detector output shapes: {} / {}",
                    a.len(),
                    b.len()
                )))
            }
        })?;

        let anchors = ultraface_anchors();
        let mut candidates = Vec::new();
        for (i, anchor) in anchors.iter().enumerate() {
            let score = scores[i * 2 + 1];
            if score <= DETECT_THRESHOLD {
                continue;
            }
            let dx = boxes[i * 4];
            let dy = boxes[i * 4 + 1];
            let dw = boxes[i * 4 + 2];
            let dh = boxes[i * 4 + 3];

            let cx = anchor[0] + dx * 0.1 * anchor[2];
            let cy = anchor[1] + dy * 0.1 * anchor[3];
            let w = anchor[2] * (dw * 0.2).exp();
            let h = anchor[3] * (dh * 0.2).exp();

            candidates.push((
                score,
                ((cx - w / 2.0) * width as f32) as i32,
                ((cy - h / 2.0) * height as f32) as i32,
                ((cx + w / 2.0) * width as f32) as i32,
                ((cy + h / 2.0) * height as f32) as i32,
            ));
        }

        Ok(non_max_suppression(candidates))
    }
}

/// Anchor grid for UltraFace-slim 320.
fn ultraface_anchors() -> Vec<[f32; 4]> {
    let feature_maps = [[40, 30], [20, 15], [10, 8], [5, 4]];
    let strides = [8.0f32, 16.0, 32.0, 64.0];
    let min_sizes: [&[f32]; 4] = [
        &[10.0, 16.0, 24.0],
        &[32.0, 48.0],
        &[64.0, 96.0],
        &[128.0, 192.0, 256.0],
    ];

    let mut anchors = Vec::with_capacity(4420);
    for i in 0..4 {
        let [map_w, map_h] = feature_maps[i];
        for y in 0..map_h {
            for x in 0..map_w {
                for &min_size in min_sizes[i] {
                    anchors.push([
                        (x as f32 + 0.5) * strides[i] / DETECT_W as f32,
                        (y as f32 + 0.5) * strides[i] / DETECT_H as f32,
                        min_size / DETECT_W as f32,
                        min_size / DETECT_H as f32,
                    ]);
                }
            }
        }
    }
    anchors
}

fn non_max_suppression(
    mut candidates: Vec<(f32, i32, i32, i32, i32)>,
) -> Vec<(f32, i32, i32, i32, i32)> {
    candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    let mut picked: Vec<(f32, i32, i32, i32, i32)> = Vec::new();
    for (score, x1, y1, x2, y2) in candidates {
        let w = (x2 - x1).max(0);
        let h = (y2 - y1).max(0);
        let area = (w * h) as f32;
        if area <= 0.0 {
            continue;
        }
        let mut keep = true;
        for &(_, px1, py1, px2, py2) in &picked {
            let iw = (x2.min(px2) - x1.max(px1)).max(0);
            let ih = (y2.min(py2) - y1.max(py1)).max(0);
            let intersection = (iw * ih) as f32;
            if intersection <= 0.0 {
                continue;
            }
            let other_area = (((px2 - px1).max(0)) * ((py2 - py1).max(0))) as f32;
            let iou = intersection / (area + other_area - intersection);
            let iom = intersection / area.min(other_area);
            if iou > 0.3 || iom > 0.4 {
                keep = false;
                break;
            }
        }
        if keep {
            picked.push((score, x1, y1, x2, y2));
        }
    }
    picked
}

impl FaceEmbedder for OrtEmbedder {
    fn embed(&self, image_bytes: &[u8]) -> Result<Option<(Vec<f32>, f32)>, DomainError> {
        let img = image::load_from_memory(image_bytes)
            .map_err(|e| DomainError::InvalidInput(format!("Unreadable image: {}", e)))?;

        // Prefer the strongest detected face; fall back to treating the whole
        // input as an already-cropped face.
        let boxes = self.detect_boxes(&img)?;
        if let Some(&(score, x1, y1, x2, y2)) = boxes.first() {
            let (width, height) = img.dimensions();
            let x1 = x1.max(0) as u32;
            let y1 = y1.max(0) as u32;
            let w = (x2.max(0) as u32).min(width).saturating_sub(x1);
            let h = (y2.max(0) as u32).min(height).saturating_sub(y1);
            if w >= 2 && h >= 2 {
                let crop = img.crop_imm(x1, y1, w, h);
                return Ok(Some((self.embed_crop(&crop)?, score)));
            }
        }

        debug!("No detection in uploaded crop; embedding the full image");
        Ok(Some((self.embed_crop(&img)?, 0.5)))
    }

    fn detect(&self, image_bytes: &[u8]) -> Result<Vec<DetectedFace>, DomainError> {
        let img = image::load_from_memory(image_bytes)
            .map_err(|e| DomainError::InvalidInput(format!("Unreadable image: {}", e)))?;
        let (width, height) = img.dimensions();

        let mut detected = Vec::new();
        for (score, x1, y1, x2, y2) in self.detect_boxes(&img)? {
            // Pad the box so the crop covers the whole head, which embeds
            // more reliably than the bare face box.
            let face_w = (x2 - x1) as f32;
            let face_h = (y2 - y1) as f32;
            let mx = (face_w * 0.15) as i32;
            let my = (face_h * 0.15) as i32;

            let cx1 = (x1 - mx).max(0) as u32;
            let cy1 = (y1 - my).max(0) as u32;
            let cx2 = ((x2 + mx).max(0) as u32).min(width);
            let cy2 = ((y2 + my).max(0) as u32).min(height);
            let w = cx2.saturating_sub(cx1);
            let h = cy2.saturating_sub(cy1);
            if w < 2 || h < 2 {
                continue;
            }

            let crop = img.crop_imm(cx1, cy1, w, h);
            let embedding = self.embed_crop(&crop)?;
            detected.push(DetectedFace {
                x1: cx1 as i32,
                y1: cy1 as i32,
                x2: cx2 as i32,
                y2: cy2 as i32,
                embedding,
                confidence: score,
            });
        }
        Ok(detected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_grid_has_expected_size() {
        // 40*30*3 + 20*15*2 + 10*8*2 + 5*4*3 anchors
        assert_eq!(ultraface_anchors().len(), 4420);
    }

    #[test]
    fn nms_drops_contained_boxes() {
        let picked = non_max_suppression(vec![
            (0.9, 0, 0, 100, 100),
            (0.8, 10, 10, 90, 90),
            (0.7, 200, 200, 300, 300),
        ]);
        assert_eq!(picked.len(), 2);
        assert_eq!(picked[0].0, 0.9);
        assert_eq!(picked[1].0, 0.7);
    }

    #[test]
    fn nms_keeps_disjoint_boxes() {
        let picked = non_max_suppression(vec![(0.9, 0, 0, 50, 50), (0.8, 60, 60, 100, 100)]);
        assert_eq!(picked.len(), 2);
    }
}

use crate::domain::{DomainError, MediaItem, MediaType};
use crate::infrastructure::{ffmpeg, CatalogStore};
use base64::{engine::general_purpose, Engine as _};
use image_hasher::{HashAlg, HasherConfig};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Frame sample points for videos, in percent of duration. Edges avoided.
pub const FRAME_POSITIONS: [i64; 5] = [5, 25, 50, 75, 95];

pub const DEFAULT_THRESHOLD: u32 = 10;

/// 64 bits, so each differing bit costs 1.5625 similarity points.
pub fn similarity_percent(distance: u32) -> f64 {
    (100.0 - distance as f64 * 1.5625).max(0.0)
}

fn hasher() -> image_hasher::Hasher {
    // 8x8 DCT mean hash, the classic 64-bit pHash.
    HasherConfig::new()
        .hash_size(8, 8)
        .hash_alg(HashAlg::Mean)
        .preproc_dct()
        .to_hasher()
}

/// 16-char hex pHash of one decoded frame.
pub fn phash_image(img: &image::DynamicImage) -> String {
    hex::encode(hasher().hash_image(img).as_bytes())
}

/// Hamming distance between two hex hashes. None when either is malformed.
pub fn hamming(a: &str, b: &str) -> Option<u32> {
    let a = u64::from_str_radix(a, 16).ok()?;
    let b = u64::from_str_radix(b, 16).ok()?;
    Some((a ^ b).count_ones())
}

/// Minimum Hamming distance across all frame pairs of two items.
pub fn min_distance(a: &[String], b: &[String]) -> Option<u32> {
    let mut best: Option<u32> = None;
    for ha in a {
        for hb in b {
            if let Some(d) = hamming(ha, hb) {
                best = Some(best.map_or(d, |current| current.min(d)));
            }
        }
    }
    best
}

/// Disjoint-set with path compression and union by rank.
struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DuplicateMatch {
    pub item: MediaItem,
    pub hamming_distance: u32,
    pub similarity_percent: f64,
}

#[derive(Debug, Serialize)]
pub struct DuplicateGroup {
    pub items: Vec<DuplicateMatch>,
    pub count: usize,
}

pub struct FingerprintEngine {
    catalog: Arc<CatalogStore>,
}

impl FingerprintEngine {
    pub fn new(catalog: Arc<CatalogStore>) -> FingerprintEngine {
        FingerprintEngine { catalog }
    }

    /// Compute the fingerprint set for one item without persisting anything.
    /// Videos sample five frames; images hash the (first) frame. Missing
    /// frames are skipped, not failures.
    pub async fn compute_fingerprints(
        &self,
        item: &MediaItem,
    ) -> Result<Vec<(i64, String)>, DomainError> {
        let path = Path::new(&item.path);
        if !path.exists() {
            return Err(DomainError::NotFound("File"));
        }

        if item.media_type == MediaType::Image {
            let img = if matches!(item.extension.as_str(), ".gif" | ".webp") {
                // Animated formats go through ffmpeg for a clean first frame.
                match ffmpeg::extract_frame_seconds(path, 0.0).await? {
                    Some(bytes) => image::load_from_memory(&bytes)
                        .map_err(|e| DomainError::Io(format!("Unreadable frame: {}", e)))?,
                    None => return Ok(Vec::new()),
                }
            } else {
                image::open(path)
                    .map_err(|e| DomainError::Io(format!("Unreadable image: {}", e)))?
            };
            return Ok(vec![(0, phash_image(&img))]);
        }

        let duration = match ffmpeg::probe_duration(path).await? {
            Some(d) if d > 0.0 => d,
            _ => {
                warn!("No duration for {}", item.path);
                return Ok(Vec::new());
            }
        };

        let mut frames = Vec::new();
        for position in FRAME_POSITIONS {
            let timestamp = duration * position as f64 / 100.0;
            match ffmpeg::extract_frame_seconds(path, timestamp).await? {
                Some(bytes) => match image::load_from_memory(&bytes) {
                    Ok(img) => frames.push((position, phash_image(&img))),
                    Err(e) => warn!("Undecodable frame at {}% of {}: {}", position, item.path, e),
                },
                None => warn!("No frame at {}% of {}", position, item.path),
            }
        }
        Ok(frames)
    }

    /// Generate and persist the fingerprint set, replacing any previous one.
    pub async fn generate_and_store(&self, item: &MediaItem) -> Result<usize, DomainError> {
        let frames = self.compute_fingerprints(item).await?;
        if frames.is_empty() {
            return Err(DomainError::Dependency(format!(
                "Could not fingerprint {}",
                item.path
            )));
        }
        let stored = self.catalog.replace_fingerprints(item.id, &frames)?;
        self.catalog.set_fingerprint_state(item.id, true)?;
        info!("Fingerprinted {} ({} frames)", item.name, stored);
        Ok(stored)
    }

    pub fn remove_fingerprints(&self, item_id: i64) -> Result<usize, DomainError> {
        let removed = self.catalog.delete_fingerprints_for(item_id)?;
        self.catalog.set_fingerprint_state(item_id, false)?;
        Ok(removed)
    }

    /// Compare one item (fingerprinted on the fly) against the whole
    /// fingerprinted library. Matches are sorted by ascending distance.
    pub async fn check_duplicate(
        &self,
        item: &MediaItem,
        threshold: u32,
    ) -> Result<Vec<DuplicateMatch>, DomainError> {
        let query_frames = self.compute_fingerprints(item).await?;
        if query_frames.is_empty() {
            return Err(DomainError::Dependency(
                "Failed to generate fingerprint for comparison".to_string(),
            ));
        }
        let query_hashes: Vec<String> = query_frames.into_iter().map(|(_, h)| h).collect();

        let library = self.catalog.all_fingerprints_except(item.id)?;
        let mut scores: HashMap<i64, u32> = HashMap::new();
        for fp in &library {
            for query in &query_hashes {
                if let Some(d) = hamming(query, &fp.phash) {
                    scores
                        .entry(fp.video_id)
                        .and_modify(|best| *best = (*best).min(d))
                        .or_insert(d);
                }
            }
        }

        let mut matched: Vec<(i64, u32)> = scores
            .into_iter()
            .filter(|(_, distance)| *distance <= threshold)
            .collect();
        matched.sort_by_key(|(_, distance)| *distance);

        let ids: Vec<i64> = matched.iter().map(|(id, _)| *id).collect();
        let items = self.catalog.get_media_many(&ids)?;
        let by_id: HashMap<i64, MediaItem> = items.into_iter().map(|m| (m.id, m)).collect();

        Ok(matched
            .into_iter()
            .filter_map(|(id, distance)| {
                by_id.get(&id).map(|item| DuplicateMatch {
                    item: item.clone(),
                    hamming_distance: distance,
                    similarity_percent: (similarity_percent(distance) * 10.0).round() / 10.0,
                })
            })
            .collect())
    }

    /// Library-wide duplicate groups: pairwise min-distance, then transitive
    /// closure via union-find. Groups of at least two, largest first; each
    /// member carries its similarity to the group's first member.
    pub fn find_all_duplicates(
        &self,
        threshold: u32,
        folder: Option<&str>,
    ) -> Result<Vec<DuplicateGroup>, DomainError> {
        let items = self.catalog.fingerprinted_media(folder)?;
        if items.len() < 2 {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = items.iter().map(|m| m.id).collect();
        let fingerprints = self.catalog.fingerprints_for_many(&ids)?;
        let hashes: Vec<Vec<String>> = items
            .iter()
            .map(|m| {
                fingerprints
                    .get(&m.id)
                    .map(|fps| fps.iter().map(|fp| fp.phash.clone()).collect())
                    .unwrap_or_default()
            })
            .collect();

        // Pairwise scan is the hot loop; snapshot everything and let rayon
        // split the outer index.
        let n = items.len();
        let edges: Vec<(usize, usize, u32)> = (0..n)
            .into_par_iter()
            .flat_map_iter(|i| {
                let mut local = Vec::new();
                for j in (i + 1)..n {
                    if let Some(d) = min_distance(&hashes[i], &hashes[j]) {
                        if d <= threshold {
                            local.push((i, j, d));
                        }
                    }
                }
                local
            })
            .collect();

        let mut uf = UnionFind::new(n);
        let mut pair_distance: HashMap<(usize, usize), u32> = HashMap::new();
        for &(i, j, d) in &edges {
            uf.union(i, j);
            pair_distance.insert((i.min(j), i.max(j)), d);
        }

        let mut components: HashMap<usize, Vec<usize>> = HashMap::new();
        for i in 0..n {
            components.entry(uf.find(i)).or_default().push(i);
        }

        let mut groups: Vec<DuplicateGroup> = Vec::new();
        for mut members in components.into_values() {
            if members.len() < 2 {
                continue;
            }
            members.sort_unstable();
            let first = members[0];
            let group_items = members
                .iter()
                .map(|&idx| {
                    let distance = if idx == first {
                        0
                    } else {
                        pair_distance
                            .get(&(first.min(idx), first.max(idx)))
                            .copied()
                            .or_else(|| min_distance(&hashes[first], &hashes[idx]))
                            .unwrap_or(64)
                    };
                    DuplicateMatch {
                        item: items[idx].clone(),
                        hamming_distance: distance,
                        similarity_percent: (similarity_percent(distance) * 10.0).round() / 10.0,
                    }
                })
                .collect::<Vec<_>>();
            groups.push(DuplicateGroup {
                count: group_items.len(),
                items: group_items,
            });
        }
        groups.sort_by(|a, b| b.count.cmp(&a.count));
        Ok(groups)
    }

    /// One frame at a relative position (0..1) as a base64 JPEG data URL.
    pub async fn frame_preview(
        &self,
        item: &MediaItem,
        position: f64,
    ) -> Result<Option<String>, DomainError> {
        let path = Path::new(&item.path);
        let duration = match ffmpeg::probe_duration(path).await? {
            Some(d) if d > 0.0 => d,
            _ => return Ok(None),
        };
        let bytes = ffmpeg::extract_frame_seconds(path, duration * position).await?;
        Ok(bytes.map(|b| {
            format!(
                "data:image/jpeg;base64,{}",
                general_purpose::STANDARD.encode(b)
            )
        }))
    }

    /// pHash of one frame at a relative position (0..1).
    pub async fn single_frame_hash(
        &self,
        item: &MediaItem,
        position: f64,
    ) -> Result<Option<String>, DomainError> {
        let path = Path::new(&item.path);
        let duration = match ffmpeg::probe_duration(path).await? {
            Some(d) if d > 0.0 => d,
            _ => return Ok(None),
        };
        match ffmpeg::extract_frame_seconds(path, duration * position).await? {
            Some(bytes) => {
                let img = image::load_from_memory(&bytes)
                    .map_err(|e| DomainError::Io(format!("Unreadable frame: {}", e)))?;
                Ok(Some(phash_image(&img)))
            }
            None => Ok(None),
        }
    }

    /// pHash of an uploaded image, for building fingerprints from stills.
    pub fn hash_image_bytes(&self, bytes: &[u8]) -> Result<String, DomainError> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| DomainError::InvalidInput(format!("Unreadable image: {}", e)))?;
        Ok(phash_image(&img))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::catalog::TestDb;

    #[test]
    fn hamming_is_symmetric_and_exact() {
        assert_eq!(hamming("0000000000000000", "0000000000000000"), Some(0));
        assert_eq!(hamming("0000000000000000", "0000000000000001"), Some(1));
        assert_eq!(hamming("ffffffffffffffff", "0000000000000000"), Some(64));
        for (a, b) in [
            ("00ff00ff00ff00ff", "ff00ff00ff00ff00"),
            ("123456789abcdef0", "0fedcba987654321"),
        ] {
            assert_eq!(hamming(a, b), hamming(b, a));
        }
        assert_eq!(hamming("zz", "00"), None);
    }

    #[test]
    fn similarity_formula_matches_contract() {
        assert_eq!(similarity_percent(0), 100.0);
        assert_eq!(similarity_percent(64), 0.0);
        assert!((similarity_percent(10) - 84.375).abs() < 1e-9);
        assert_eq!(similarity_percent(100), 0.0);
    }

    #[test]
    fn phash_is_stable_and_robust_to_small_changes() {
        let base = image::DynamicImage::ImageRgb8(image::RgbImage::from_fn(64, 64, |x, y| {
            image::Rgb([((x * 4) % 256) as u8, ((y * 4) % 256) as u8, ((x + y) % 256) as u8])
        }));
        let hash1 = phash_image(&base);
        let hash2 = phash_image(&base);
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 16);

        // A resized copy of the same picture should stay close.
        let resized = base.resize_exact(48, 48, image::imageops::FilterType::Triangle);
        let hash3 = phash_image(&resized);
        assert!(hamming(&hash1, &hash3).unwrap() <= 10);
    }

    #[test]
    fn union_find_closure() {
        let mut uf = UnionFind::new(5);
        uf.union(0, 1);
        uf.union(2, 3);
        assert_eq!(uf.find(0), uf.find(1));
        assert_ne!(uf.find(0), uf.find(2));
        uf.union(1, 3);
        // Transitivity: 0~1, 1~3, 3~2 => all connected.
        assert_eq!(uf.find(0), uf.find(2));
        assert_ne!(uf.find(4), uf.find(0));
    }

    #[test]
    fn min_distance_takes_best_pair() {
        let a = vec!["0000000000000000".to_string(), "ffffffffffffffff".to_string()];
        let b = vec!["000000000000000f".to_string()];
        assert_eq!(min_distance(&a, &b), Some(4));
        assert_eq!(min_distance(&a, &[]), None);
    }

    #[test]
    fn grouping_is_transitive_over_pairs() {
        let db = TestDb::new("fp_groups");
        let engine = FingerprintEngine::new(db.store.clone());

        // a~b (distance 1), b~c (distance 1), a~c (distance 2): one group.
        // d is far from everything.
        let hashes = [
            ("a.mp4", "0000000000000000"),
            ("b.mp4", "0000000000000001"),
            ("c.mp4", "0000000000000003"),
            ("d.mp4", "ffffffffffffffff"),
        ];
        for (name, phash) in hashes {
            let file = crate::infrastructure::catalog::test_scanned_file(
                &format!("/root/A/{}", name),
                "A",
            );
            let (id, _) = db.store.upsert_scanned(&file).unwrap();
            db.store.insert_fingerprint(id, 50, phash).unwrap();
            db.store.set_fingerprint_state(id, true).unwrap();
        }

        let groups = engine.find_all_duplicates(2, None).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].count, 3);
        assert_eq!(groups[0].items[0].similarity_percent, 100.0);

        // Tighter threshold splits c away only if the chain breaks; at 1 the
        // chain a-b-c still holds through b.
        let groups = engine.find_all_duplicates(1, None).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].count, 3);

        // At 0 nothing is similar.
        assert!(engine.find_all_duplicates(0, None).unwrap().is_empty());
    }
}

//! Detection grouping (C10): clusters visually similar detections so a
//! reviewer sees one representative instead of a flood of near-duplicates.
//!
//! Grounded on the source's `DetectionGroupingService`: group by exact hash
//! first, then merge other exact-hash buckets into a group if their hash is
//! similar to the group's seed hash, capped at `max_group_size`; detections
//! with no hash are never merged, each standing as its own singleton group.

use std::collections::HashMap;

use crate::hash::are_similar;
use crate::persistence::models::Detection;

/// A cluster of visually similar detections with a chosen representative.
#[derive(Debug, Clone)]
pub struct DetectionGroup {
    pub primary: Detection,
    pub members: Vec<Detection>,
    pub visual_hash: Option<String>,
}

impl DetectionGroup {
    pub fn group_size(&self) -> usize {
        self.members.len()
    }

    pub fn has_multiple(&self) -> bool {
        self.group_size() > 1
    }
}

/// `select_primary_detection` (§4.10): highest max-foe-confidence wins, ties
/// broken by foe count, then by recency.
pub fn select_primary(detections: &[Detection]) -> usize {
    detections
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| score(a).total_cmp(&score(b)))
        .map(|(i, _)| i)
        .expect("caller guarantees at least one detection")
}

fn score(detection: &Detection) -> f64 {
    let max_confidence = detection
        .foes
        .iter()
        .map(|f| f.confidence)
        .fold(0.0f32, f32::max) as f64;

    max_confidence * 100.0
        + detection.foes.len() as f64 * 10.0
        + detection.created_at_unix as f64 / 1_000_000.0
}

/// `group_detections` (§4.10): buckets by exact hash, then merges other
/// buckets whose hash is similar to the bucket's own hash within
/// `similarity_threshold` hamming distance, bounded by `max_group_size`.
/// Unhashed detections are never merged into anything. `similarity_threshold`
/// is the configured setting (§6, §9) - distinct from `change_threshold` and
/// never shared with it.
pub fn group_detections(
    detections: Vec<Detection>,
    max_group_size: usize,
    similarity_threshold: u32,
) -> Vec<DetectionGroup> {
    if detections.is_empty() {
        return Vec::new();
    }

    let mut hashed: HashMap<String, Vec<Detection>> = HashMap::new();
    let mut unhashed = Vec::new();

    for detection in detections {
        match detection.visual_hash.clone() {
            Some(hash) => hashed.entry(hash).or_default().push(detection),
            None => unhashed.push(detection),
        }
    }

    let mut groups = Vec::new();
    let mut processed: Vec<String> = Vec::new();
    let hash_keys: Vec<String> = hashed.keys().cloned().collect();

    for seed_hash in &hash_keys {
        if processed.contains(seed_hash) {
            continue;
        }
        processed.push(seed_hash.clone());

        let mut merged = hashed[seed_hash].clone();

        if merged.len() < max_group_size {
            for other_hash in &hash_keys {
                if processed.contains(other_hash) {
                    continue;
                }
                let other_bucket = &hashed[other_hash];
                if merged.len() + other_bucket.len() > max_group_size {
                    continue;
                }
                if are_similar(seed_hash, other_hash, similarity_threshold) {
                    merged.extend(other_bucket.clone());
                    processed.push(other_hash.clone());
                }
            }
        }

        merged.sort_by_key(|d| std::cmp::Reverse(d.created_at_unix));
        let primary_index = select_primary(&merged);
        groups.push(DetectionGroup {
            primary: merged[primary_index].clone(),
            members: merged,
            visual_hash: Some(seed_hash.clone()),
        });
    }

    for detection in unhashed {
        groups.push(DetectionGroup {
            primary: detection.clone(),
            members: vec![detection],
            visual_hash: None,
        });
    }

    groups.sort_by_key(|g| std::cmp::Reverse(g.primary.created_at_unix));
    groups
}

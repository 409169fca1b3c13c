//! Visual hash service (C2): perceptual image hashing and similarity grouping.
//!
//! `average_hash` is the hash used throughout the rest of the system (the change
//! gate in C5, the grouping primitive in C10). The other algorithms named in the
//! design are selectable by callers that want them explicitly, but anything other
//! than `Average`/`Difference` falls back to average-hash with a log warning,
//! mirroring the source's handling of an unrecognized algorithm name.

use std::collections::HashSet;
use std::path::Path;

use image::imageops::FilterType;
use image::GenericImageView;

/// Hamming distance threshold, out of 64 bits, for the default `average-hash`
/// representation. Callers that group or compare hashes at runtime take the
/// threshold as a parameter from the `similarity_threshold` setting (§6); this
/// constant is only the default for tests and standalone callers with no
/// configured settings to read from.
pub const DEFAULT_SIMILARITY_THRESHOLD: u32 = 8;

/// Hash algorithm selector (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Average,
    Difference,
    Perceptual,
    Wavelet,
}

impl HashAlgorithm {
    fn parse(name: &str) -> Self {
        match name {
            "average" => Self::Average,
            "difference" => Self::Difference,
            "perceptual" => Self::Perceptual,
            "wavelet" => Self::Wavelet,
            other => {
                log::warn!("Unknown hash algorithm: {other}, using average");
                Self::Average
            }
        }
    }
}

/// Computes a perceptual hash for an image, returning a 16-hex-character string,
/// or `None` if the bytes could not be decoded.
pub fn calculate_hash(image_bytes: &[u8], algorithm: &str) -> Option<String> {
    let img = image::load_from_memory(image_bytes)
        .map_err(|e| log::error!("Failed to decode image for hashing: {e}"))
        .ok()?;

    let bits = match HashAlgorithm::parse(algorithm) {
        HashAlgorithm::Average | HashAlgorithm::Perceptual | HashAlgorithm::Wavelet => {
            average_hash_bits(&img)
        }
        HashAlgorithm::Difference => difference_hash_bits(&img),
    };

    Some(format!("{bits:016x}"))
}

/// Convenience wrapper matching the module-level `calculate_detection_hash` helper
/// in the source: hashes a file on disk using the default (average) algorithm.
pub fn calculate_detection_hash(path: &Path) -> Option<String> {
    let bytes = std::fs::read(path)
        .map_err(|e| log::warn!("Image file not found: {} ({e})", path.display()))
        .ok()?;
    calculate_hash(&bytes, "average")
}

fn average_hash_bits(img: &image::DynamicImage) -> u64 {
    let small = img
        .resize_exact(8, 8, FilterType::Triangle)
        .to_luma8();
    let pixels: Vec<u32> = small.pixels().map(|p| p.0[0] as u32).collect();
    let mean = pixels.iter().sum::<u32>() as f64 / pixels.len() as f64;

    let mut bits: u64 = 0;
    for (i, &p) in pixels.iter().enumerate() {
        if (p as f64) >= mean {
            bits |= 1 << i;
        }
    }
    bits
}

/// 8x8 "difference hash": compares each pixel to its right-hand neighbor over a
/// 9x8 reduced grid, yielding 64 bits.
fn difference_hash_bits(img: &image::DynamicImage) -> u64 {
    let small = img
        .resize_exact(9, 8, FilterType::Triangle)
        .to_luma8();

    let mut bits: u64 = 0;
    let mut i = 0;
    for y in 0..8u32 {
        for x in 0..8u32 {
            let left = small.get_pixel(x, y).0[0];
            let right = small.get_pixel(x + 1, y).0[0];
            if left < right {
                bits |= 1 << i;
            }
            i += 1;
        }
    }
    bits
}

fn parse_hex_hash(hash: &str) -> Option<u64> {
    u64::from_str_radix(hash, 16).ok()
}

/// Hamming distance between two hex-encoded hashes, or `None` if either is malformed.
pub fn hamming_distance(hash1: &str, hash2: &str) -> Option<u32> {
    let h1 = parse_hex_hash(hash1)?;
    let h2 = parse_hex_hash(hash2)?;
    Some((h1 ^ h2).count_ones())
}

/// Whether two hashes are similar under the given threshold.
pub fn are_similar(hash1: &str, hash2: &str, threshold: u32) -> bool {
    match hamming_distance(hash1, hash2) {
        Some(distance) => distance <= threshold,
        None => false,
    }
}

/// Finds every hash in `candidates` similar to `target`.
pub fn find_similar_hashes<'a>(
    target: &str,
    candidates: &'a [String],
    threshold: u32,
) -> Vec<&'a str> {
    candidates
        .iter()
        .filter(|h| are_similar(target, h, threshold))
        .map(String::as_str)
        .collect()
}

/// Greedy, non-transitive grouping (§4.2, §9): each group is seeded by the first
/// unprocessed hash; subsequent hashes join that group only if similar to the
/// *seed*, never to other members already added. This is deliberately not
/// transitive-closure clustering.
pub fn group_similar_hashes(hashes: &[String], threshold: u32) -> Vec<Vec<String>> {
    if hashes.is_empty() {
        return Vec::new();
    }

    let mut groups: Vec<Vec<String>> = Vec::new();
    let mut processed: HashSet<usize> = HashSet::new();

    for (i, seed) in hashes.iter().enumerate() {
        if processed.contains(&i) {
            continue;
        }

        let mut group = vec![seed.clone()];
        processed.insert(i);

        for (j, other) in hashes.iter().enumerate() {
            if j == i || processed.contains(&j) {
                continue;
            }
            if are_similar(seed, other, threshold) {
                group.push(other.clone());
                processed.insert(j);
            }
        }

        groups.push(group);
    }

    groups
}

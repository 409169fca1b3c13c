//! Detection pipeline (C5): the change gate, snapshot persistence, and
//! detector invocation that turn a raw camera frame into a `Detection` row.
//!
//! Grounded on the source's `DetectionProcessor.process_snapshot`: reject
//! frames over the configured size limit outright, hash the rest, skip
//! detection entirely if it hasn't changed enough from the camera's last
//! known hash, otherwise save the frame to disk, run the detector, and
//! persist a `Detection`. If the detector call itself errors, persist an
//! empty-foes `Detection` with `status = Failed` instead (§4.5 step 7) so the
//! worker sees `primary_foe_type() == None` and skips deterrence.

use std::path::{Path, PathBuf};

use crate::detection::foe_detector::FoeDetector;
use crate::hash::{calculate_hash, hamming_distance};
use crate::persistence::models::{Camera, Detection, DetectionStatus, FoeKind};
use crate::persistence::settings::SnapshotCaptureLevel;
use crate::persistence::Facade;

/// Outcome of running one camera's frame through the pipeline.
pub enum PipelineOutcome {
    /// The frame didn't change enough from the last one, or was over the
    /// configured size limit; nothing was persisted.
    NoSignificantChange,
    /// A `Detection` was created (it may or may not have found any foes).
    Detected(Detection),
}

/// `has_significant_change` (§4.5 step 2): an absent previous hash always
/// counts as changed, matching "first frame ever seen is always processed".
fn has_significant_change(current_hash: &str, previous_hash: Option<&str>, threshold: u32) -> bool {
    let Some(previous) = previous_hash else {
        return true;
    };
    match hamming_distance(current_hash, previous) {
        Some(distance) => distance >= threshold,
        None => true,
    }
}

/// Whether a snapshot that already passed the change gate should be kept on
/// disk once the detector result is known (§4.5 step 5).
fn should_retain_snapshot(level: SnapshotCaptureLevel, foes: &[crate::persistence::models::Foe]) -> bool {
    match level {
        SnapshotCaptureLevel::AllSnapshots => true,
        SnapshotCaptureLevel::ObjectRecognized => !foes.is_empty(),
        SnapshotCaptureLevel::FoeIdentified => foes.iter().any(|f| f.kind != FoeKind::Unknown),
    }
}

/// Runs the full pipeline for one captured frame: change gate, snapshot save,
/// detection, confidence filtering, capture-level retention, and persistence.
#[allow(clippy::too_many_arguments)]
pub async fn process_snapshot(
    facade: &Facade,
    detector: &dyn FoeDetector,
    camera: &mut Camera,
    image_bytes: &[u8],
    snapshots_dir: &Path,
    change_threshold: u32,
    confidence_threshold: f32,
    snapshot_capture_level: SnapshotCaptureLevel,
    max_image_size_mb: u32,
) -> Result<PipelineOutcome, crate::error::PersistenceError> {
    let max_bytes = max_image_size_mb as usize * 1024 * 1024;
    if image_bytes.len() > max_bytes {
        log::warn!(
            "Snapshot from {} is {} bytes, over the {max_image_size_mb}MB limit, discarding",
            camera.name,
            image_bytes.len()
        );
        return Ok(PipelineOutcome::NoSignificantChange);
    }

    let current_hash = calculate_hash(image_bytes, "average").unwrap_or_default();

    if !current_hash.is_empty()
        && !has_significant_change(&current_hash, camera.last_image_hash.as_deref(), change_threshold)
    {
        log::debug!("No significant change in {}, skipping detection", camera.name);
        return Ok(PipelineOutcome::NoSignificantChange);
    }

    if !current_hash.is_empty() {
        camera.last_image_hash = Some(current_hash.clone());
        facade.update_camera(camera)?;
    }

    let mut snapshot_path = save_snapshot(image_bytes, &camera.name, snapshots_dir).await;

    let result = match detector.detect_foes(image_bytes).await {
        Ok(result) => result,
        Err(e) => {
            log::error!("Detector failed for {}: {e}", camera.name);
            let detection = Detection {
                id: 0,
                camera_id: camera.id,
                created_at_unix: chrono::Utc::now().timestamp(),
                snapshot_path: snapshot_path.map(|p| p.display().to_string()),
                video_path: None,
                status: DetectionStatus::Failed,
                detector_blob: Some(serde_json::json!({ "error": e.to_string() })),
                ai_cost: 0.0,
                played_sounds: Vec::new(),
                visual_hash: Some(current_hash),
                foes: Vec::new(),
                deterrent_actions: Vec::new(),
            };
            let id = facade.insert_detection(detection.clone())?;
            let mut stored = detection;
            stored.id = id;
            return Ok(PipelineOutcome::Detected(stored));
        }
    };
    let foes: Vec<_> = result
        .foes
        .into_iter()
        .filter(|f| f.confidence >= confidence_threshold)
        .collect();

    if !should_retain_snapshot(snapshot_capture_level, &foes) {
        if let Some(path) = snapshot_path.take() {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                log::warn!("Failed to delete discarded snapshot {}: {e}", path.display());
            }
        }
    }

    let status = if !foes.is_empty() {
        DetectionStatus::Processed
    } else {
        DetectionStatus::Pending
    };

    let detection = Detection {
        id: 0,
        camera_id: camera.id,
        created_at_unix: chrono::Utc::now().timestamp(),
        snapshot_path: snapshot_path.map(|p| p.display().to_string()),
        video_path: None,
        status,
        detector_blob: None,
        ai_cost: result.cost_estimate,
        played_sounds: Vec::new(),
        visual_hash: Some(current_hash),
        foes,
        deterrent_actions: Vec::new(),
    };

    let id = facade.insert_detection(detection.clone())?;
    let mut stored = detection;
    stored.id = id;

    log::info!(
        "Created detection for {}: {} foe(s) detected",
        camera.name,
        stored.foes.len()
    );

    Ok(PipelineOutcome::Detected(stored))
}

async fn save_snapshot(image_bytes: &[u8], camera_name: &str, snapshots_dir: &Path) -> Option<PathBuf> {
    if let Err(e) = tokio::fs::create_dir_all(snapshots_dir).await {
        log::error!("Failed to create snapshots directory: {e}");
        return None;
    }

    let filename = format!(
        "{}_{}_{}.jpg",
        camera_name.chars().map(|c| if c.is_alphanumeric() { c } else { '_' }).collect::<String>(),
        chrono::Utc::now().format("%Y%m%d_%H%M%S"),
        &uuid::Uuid::new_v4().simple().to_string()[..8],
    );
    let path = snapshots_dir.join(filename);

    match tokio::fs::write(&path, image_bytes).await {
        Ok(()) => {
            log::info!("Saved snapshot to {}", path.display());
            Some(path)
        }
        Err(e) => {
            log::error!("Failed to save snapshot: {e}");
            None
        }
    }
}

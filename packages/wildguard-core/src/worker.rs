//! Detection worker (C9): the tick scheduler that ties every other component
//! together into the per-camera response protocol.
//!
//! Grounded on the source's `DetectionWorker`: a loop that, each
//! `detection_interval_secs`, fans out one independent task per active
//! camera and waits for all of them before sleeping again (replacing the
//! source's `asyncio.gather(return_exceptions=True)` with a `JoinSet`, and
//! its thread-based `start`/`stop` with a `CancellationToken`, per the
//! concurrency-model substitution). Camera subtasks run concurrently with
//! each other but never overlap with themselves across ticks, because a tick
//! doesn't begin its next iteration until every subtask from this one has
//! finished.
//!
//! Per camera (§4.9): capture a snapshot, run it through the pipeline, and if
//! a foe was found, kick off background video capture (if the camera exposes
//! an RTSP url). If `deterrents_enabled` is on, pick a deterrent sound, try
//! to play it on the camera falling back to local playback, wait the
//! hardcoded `DETERRENT_PLAYBACK_MAX_DURATION` window, take a follow-up
//! snapshot, detect on it, and record the effectiveness. The source's
//! literal 50/50 coin flip is replaced by the `explore_exploit_epsilon`
//! setting (§9).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::camera::CameraRegistry;
use crate::capture;
use crate::deterrent;
use crate::detection::foe_detector::FoeDetector;
use crate::detection::pipeline::{self, PipelineOutcome};
use crate::diagnostics::Diagnostics;
use crate::effectiveness;
use crate::persistence::models::{Camera, DeterrentAction, PlaybackMethod};
use crate::persistence::settings::SettingsCache;
use crate::persistence::Facade;
use crate::runtime::TaskSpawner;
use crate::sound;

/// Hard cap on a single deterrent sound's playback, regardless of file length
/// or which settings are in effect (§4.9 step 9, §5 Timeouts).
const DETERRENT_PLAYBACK_MAX_DURATION: Duration = Duration::from_secs(10);

/// How often the retention sweep runs, independent of the (usually much
/// shorter) detection tick interval - a directory walk every tick would be
/// wasted work for a cleanup that only matters on a day-scale cadence.
const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

pub struct WorkerPaths {
    pub snapshots_dir: PathBuf,
    pub videos_dir: PathBuf,
    pub sounds_dir: PathBuf,
}

/// The detection worker: owns no state of its own beyond what it needs to
/// fan subtasks out, everything durable lives behind the facade.
pub struct Worker {
    facade: Arc<Facade>,
    registry: Arc<CameraRegistry>,
    detector: Arc<dyn FoeDetector>,
    diagnostics: Arc<Diagnostics>,
    spawner: Arc<dyn TaskSpawner>,
    settings: SettingsCache,
    paths: WorkerPaths,
    last_retention_sweep: parking_lot::Mutex<Option<std::time::Instant>>,
}

impl Worker {
    pub fn new(
        facade: Arc<Facade>,
        registry: Arc<CameraRegistry>,
        detector: Arc<dyn FoeDetector>,
        diagnostics: Arc<Diagnostics>,
        spawner: Arc<dyn TaskSpawner>,
        paths: WorkerPaths,
    ) -> Self {
        Self {
            facade,
            registry,
            detector,
            diagnostics,
            spawner,
            settings: SettingsCache::default(),
            paths,
            last_retention_sweep: parking_lot::Mutex::new(None),
        }
    }

    /// Runs the main tick loop until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        loop {
            self.check_all_cameras().await;

            let settings = self.settings.get(&self.facade);
            self.maybe_run_retention_sweep(&settings).await;

            tokio::select! {
                _ = shutdown.cancelled() => {
                    log::info!("Detection worker shutting down");
                    return;
                }
                _ = tokio::time::sleep(Duration::from_secs(settings.detection_interval_secs)) => {}
            }
        }
    }

    /// `_check_all_cameras` (§4.9): one task per active camera, joined before
    /// the tick is considered complete.
    pub async fn check_all_cameras(&self) {
        let cameras = self.registry.active_cameras();
        let mut tasks = JoinSet::new();

        for camera in cameras {
            let facade = self.facade.clone();
            let registry = self.registry.clone();
            let detector = self.detector.clone();
            let diagnostics = self.diagnostics.clone();
            let spawner = self.spawner.clone();
            let settings = self.settings.get(&self.facade);
            let snapshots_dir = self.paths.snapshots_dir.clone();
            let videos_dir = self.paths.videos_dir.clone();
            let sounds_dir = self.paths.sounds_dir.clone();

            tasks.spawn(async move {
                if let Err(e) = check_camera(
                    &facade, &registry, detector.as_ref(), &diagnostics, spawner.as_ref(),
                    camera, &snapshots_dir, &videos_dir, &sounds_dir, settings,
                )
                .await
                {
                    log::error!("Camera check failed: {e}");
                }
            });
        }

        while tasks.join_next().await.is_some() {}
    }

    /// Runs the retention sweep at most once per `RETENTION_SWEEP_INTERVAL`,
    /// regardless of how often the detection tick itself fires.
    async fn maybe_run_retention_sweep(&self, settings: &crate::persistence::settings::Settings) {
        {
            let mut last = self.last_retention_sweep.lock();
            match *last {
                Some(at) if at.elapsed() < RETENTION_SWEEP_INTERVAL => return,
                _ => *last = Some(std::time::Instant::now()),
            }
        }

        let deleted = crate::retention::sweep_expired_files(
            &self.paths.snapshots_dir,
            settings.snapshot_retention_days,
        )
        .await
            + crate::retention::sweep_expired_files(&self.paths.videos_dir, settings.snapshot_retention_days).await;
        if deleted > 0 {
            log::info!("Retention sweep deleted {deleted} expired file(s)");
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn check_camera(
    facade: &Facade,
    registry: &CameraRegistry,
    detector: &dyn FoeDetector,
    diagnostics: &Diagnostics,
    spawner: &dyn TaskSpawner,
    mut camera: Camera,
    snapshots_dir: &std::path::Path,
    videos_dir: &std::path::Path,
    sounds_dir: &std::path::Path,
    settings: crate::persistence::settings::Settings,
) -> Result<(), crate::error::CaptureError> {
    let image_bytes = capture::capture_snapshot_with_retry(registry, &camera).await?;

    let outcome = pipeline::process_snapshot(
        facade,
        detector,
        &mut camera,
        &image_bytes,
        snapshots_dir,
        settings.change_threshold,
        settings.confidence_threshold,
        settings.snapshot_capture_level,
        settings.max_image_size_mb,
    )
    .await
    .map_err(|e| crate::error::CaptureError::Subprocess(e.to_string()))?;

    let PipelineOutcome::Detected(mut detection) = outcome else {
        return Ok(());
    };

    let Some(foe_type) = detection.primary_foe_type() else {
        return Ok(());
    };
    if foe_type == crate::persistence::models::FoeKind::Unknown {
        return Ok(());
    }

    let video_task = registry.rtsp_url(&camera).map(|rtsp_url| {
        let camera_name = camera.name.clone();
        let videos_dir = videos_dir.to_path_buf();
        let detection_id = detection.id;
        let duration = Duration::from_secs(settings.video_capture_duration_secs);
        let (tx, rx) = tokio::sync::oneshot::channel();
        spawner.spawn(async move {
            let result = capture::capture_video(&rtsp_url, &camera_name, detection_id, duration, &videos_dir).await;
            let _ = tx.send(result);
        });
        rx
    });
    if video_task.is_none() {
        log::warn!("No RTSP url or ffmpeg unavailable for {}, skipping video capture", camera.name);
    }

    let chosen_sound = if settings.deterrents_enabled {
        let available = sound::available_sounds(sounds_dir, foe_type);
        let hour = chrono::Utc::now().format("%H").to_string().parse::<u8>().unwrap_or(0);
        let mut rng = StdRng::from_entropy();
        deterrent::select_sound(facade, foe_type, hour, &available, settings.explore_exploit_epsilon, &mut rng)
    } else {
        None
    };

    if let Some(sound_file) = chosen_sound {
        let foes_before = detection.foes.len() as u32;
        let confidence_before = detection
            .foes
            .iter()
            .map(|f| f.confidence)
            .fold(0.0f32, f32::max);

        let sound_path = sounds_dir.join(foe_type.dir_name()).join(&sound_file);
        let (method, success) = play_deterrent_sound(registry, &camera, &sound_path, &sound_file).await;

        detection.deterrent_actions.push(DeterrentAction {
            action_kind: format!(
                "sound_{}_{}",
                if method == PlaybackMethod::Camera { "camera" } else { "local" },
                foe_type.dir_name(),
            ),
            triggered_at_unix: chrono::Utc::now().timestamp(),
            success,
            details: sound_file.clone(),
        });
        detection.played_sounds.push(sound_file.clone());
        facade.update_detection(&detection).map_err(|e| crate::error::CaptureError::Subprocess(e.to_string()))?;

        // §4.9 step 10: only wait for and measure an effect if playback actually
        // happened somewhere; a total playback failure has nothing to measure.
        if success {
            tokio::time::sleep(DETERRENT_PLAYBACK_MAX_DURATION).await;

            let follow_up = capture::capture_snapshot_with_retry(registry, &camera).await.ok();
            if let Some(follow_up_bytes) = follow_up {
                match detector.detect_foes(&follow_up_bytes).await {
                    Ok(result) => {
                        let foes_after = result.foes.len() as u32;
                        let confidence_after =
                            result.foes.iter().map(|f| f.confidence).fold(0.0f32, f32::max);

                        let scored = effectiveness::record_effectiveness(
                            facade, detection.id, foe_type, &sound_file, method,
                            foes_before, foes_after, confidence_before, confidence_after,
                            DETERRENT_PLAYBACK_MAX_DURATION.as_secs() as u32, None,
                        );
                        match scored {
                            Ok(row) => {
                                log::info!(
                                    "Deterrent outcome for detection {}: {:?}",
                                    detection.id,
                                    row.result
                                );
                                detection.status = crate::persistence::models::DetectionStatus::Deterred;
                                if let Err(e) = facade.update_detection(&detection) {
                                    log::error!("Failed to mark detection {} deterred: {e}", detection.id);
                                }
                            }
                            Err(e) => log::error!("Failed to record effectiveness: {e}"),
                        }
                    }
                    Err(e) => log::error!("Follow-up detection failed for {}: {e}", camera.name),
                }
            }
        }
    }

    if let Some(rx) = video_task {
        if let Ok(Ok(video_path)) = rx.await {
            detection.video_path = Some(video_path.display().to_string());
            if let Err(e) = facade.update_detection(&detection) {
                log::error!("Failed to attach video path to detection: {e}");
            }
        }
    }

    diagnostics.camera_health(camera.id, &camera.name);
    Ok(())
}

/// Tries camera playback first, falling back to local playback (§4.9 step 8).
async fn play_deterrent_sound(
    registry: &CameraRegistry,
    camera: &Camera,
    sound_path: &std::path::Path,
    sound_file: &str,
) -> (PlaybackMethod, bool) {
    match registry.play_sound_on_camera(camera, sound_file).await {
        Ok(()) => (PlaybackMethod::Camera, true),
        Err(e) => {
            log::warn!("Camera playback unavailable for {}: {e}, falling back to local", camera.name);
            let played = sound::play_sound(sound_path, DETERRENT_PLAYBACK_MAX_DURATION).await;
            (PlaybackMethod::Local, played)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::dummy::DummyAdapter;
    use crate::detection::foe_detector::NullDetector;
    use crate::persistence::models::{CameraCapabilities, CameraStatus, Integration, IntegrationStatus};
    use crate::rate_limiter::PerResourceRateLimiter;
    use crate::runtime::TokioSpawner;

    fn solid_jpeg(gray: u8) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(16, 16, image::Rgb([gray, gray, gray]));
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Jpeg)
            .unwrap();
        buf
    }

    #[tokio::test]
    async fn tick_with_no_active_cameras_completes_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let facade = Arc::new(Facade::open(dir.path()).unwrap());
        let registry = Arc::new(CameraRegistry::new(
            facade.clone(),
            Arc::new(PerResourceRateLimiter::new(1000.0, 1000.0)),
            Arc::new(Diagnostics::new(100)),
        ));
        let worker = Worker::new(
            facade,
            registry,
            Arc::new(NullDetector),
            Arc::new(Diagnostics::new(100)),
            Arc::new(TokioSpawner::current()),
            WorkerPaths {
                snapshots_dir: dir.path().join("snapshots"),
                videos_dir: dir.path().join("videos"),
                sounds_dir: dir.path().join("sounds"),
            },
        );
        worker.check_all_cameras().await;
    }

    #[tokio::test]
    async fn tick_with_no_foes_detected_skips_deterrent_and_video() {
        let dir = tempfile::tempdir().unwrap();
        let facade = Arc::new(Facade::open(dir.path()).unwrap());
        let diagnostics = Arc::new(Diagnostics::new(100));
        let registry = Arc::new(CameraRegistry::new(
            facade.clone(),
            Arc::new(PerResourceRateLimiter::new(1000.0, 1000.0)),
            diagnostics.clone(),
        ));

        let images_dir = dir.path().join("dummy-images");
        std::fs::create_dir_all(&images_dir).unwrap();
        std::fs::write(images_dir.join("frame.jpg"), solid_jpeg(42)).unwrap();
        registry.register_adapter(1, Arc::new(DummyAdapter::new(&images_dir)));

        let integration_id = facade
            .insert_integration(Integration {
                id: 0,
                name: "dummy".to_string(),
                kind: "dummy".to_string(),
                enabled: true,
                status: IntegrationStatus::Connected,
                config: serde_json::json!({}),
            })
            .unwrap();
        facade
            .insert_camera(Camera {
                id: 0,
                integration_id,
                name: "dummy-cam".to_string(),
                status: CameraStatus::Online,
                provider_id: "dummy-cam-001".to_string(),
                capabilities: CameraCapabilities::default(),
                last_image_hash: None,
            })
            .unwrap();

        let worker = Worker::new(
            facade.clone(),
            registry,
            Arc::new(NullDetector),
            diagnostics,
            Arc::new(TokioSpawner::current()),
            WorkerPaths {
                snapshots_dir: dir.path().join("snapshots"),
                videos_dir: dir.path().join("videos"),
                sounds_dir: dir.path().join("sounds"),
            },
        );

        worker.check_all_cameras().await;

        let detections = facade.list_detections().unwrap();
        assert_eq!(detections.len(), 1);
        assert!(detections[0].deterrent_actions.is_empty());
        assert!(detections[0].video_path.is_none());
    }

    struct AlwaysDetectsRats;

    #[async_trait::async_trait]
    impl FoeDetector for AlwaysDetectsRats {
        async fn detect_foes(
            &self,
            _image_bytes: &[u8],
        ) -> Result<crate::detection::foe_detector::DetectionResult, crate::error::DetectorError> {
            use crate::persistence::models::{BoundingBox, Foe, FoeKind};
            Ok(crate::detection::foe_detector::DetectionResult {
                foes: vec![Foe {
                    kind: FoeKind::Rats,
                    confidence: 0.9,
                    bbox: BoundingBox { x: 0.0, y: 0.0, width: 1.0, height: 1.0 },
                    description: None,
                }],
                model_used: "test".to_string(),
                processing_time_secs: 0.01,
                cost_estimate: 0.0,
            })
        }
    }

    #[tokio::test]
    async fn deterrents_disabled_skips_sound_selection_even_with_foes() {
        let dir = tempfile::tempdir().unwrap();
        let facade = Arc::new(Facade::open(dir.path()).unwrap());
        facade
            .set_setting_raw(crate::persistence::settings::KEY_DETERRENTS_ENABLED, "false")
            .unwrap();
        let diagnostics = Arc::new(Diagnostics::new(100));
        let registry = Arc::new(CameraRegistry::new(
            facade.clone(),
            Arc::new(PerResourceRateLimiter::new(1000.0, 1000.0)),
            diagnostics.clone(),
        ));

        let images_dir = dir.path().join("dummy-images");
        std::fs::create_dir_all(&images_dir).unwrap();
        std::fs::write(images_dir.join("frame.jpg"), solid_jpeg(77)).unwrap();
        registry.register_adapter(1, Arc::new(DummyAdapter::new(&images_dir)));

        let integration_id = facade
            .insert_integration(Integration {
                id: 0,
                name: "dummy".to_string(),
                kind: "dummy".to_string(),
                enabled: true,
                status: IntegrationStatus::Connected,
                config: serde_json::json!({}),
            })
            .unwrap();
        facade
            .insert_camera(Camera {
                id: 0,
                integration_id,
                name: "dummy-cam".to_string(),
                status: CameraStatus::Online,
                provider_id: "dummy-cam-001".to_string(),
                capabilities: CameraCapabilities::default(),
                last_image_hash: None,
            })
            .unwrap();

        let worker = Worker::new(
            facade.clone(),
            registry,
            Arc::new(AlwaysDetectsRats),
            diagnostics,
            Arc::new(TokioSpawner::current()),
            WorkerPaths {
                snapshots_dir: dir.path().join("snapshots"),
                videos_dir: dir.path().join("videos"),
                sounds_dir: dir.path().join("sounds"),
            },
        );

        worker.check_all_cameras().await;

        let detections = facade.list_detections().unwrap();
        assert_eq!(detections.len(), 1);
        assert!(detections[0].deterrent_actions.is_empty());
    }
}

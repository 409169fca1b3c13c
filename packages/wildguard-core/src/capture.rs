//! Snapshot retry and video capture (C4).
//!
//! The snapshot half wraps the registry's `capture_snapshot` with bounded
//! exponential backoff (§4.4). The video half shells out to `ffmpeg` against
//! an RTSP url, grounded on the source's `VideoCapture.capture_video`: a fixed
//! argument list copying codecs rather than re-encoding, a hard timeout with
//! a kill on expiry, and a generated, collision-resistant filename. There is
//! no single teacher file for subprocess-based recording; this follows the
//! general idiom of `tokio::process::Command` with `Command::kill_on_drop`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

use crate::camera::CameraRegistry;
use crate::error::{CameraError, CaptureError};
use crate::persistence::models::Camera;

const MAX_RATE_LIMIT_ATTEMPTS: u32 = 3;
const RATE_LIMIT_BASE_BACKOFF: Duration = Duration::from_secs(2);
const LINEAR_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Fetches a snapshot, with two separate retry policies for the two kinds of
/// transient failure (§4.4): a rate limit (HTTP 429) gets `2 * 2^attempt`
/// second exponential backoff up to `MAX_RATE_LIMIT_ATTEMPTS`; any other
/// transient failure (connect/read timeout) gets exactly one retry after a
/// flat linear delay. Permanent failures are never retried.
pub async fn capture_snapshot_with_retry(
    registry: &CameraRegistry,
    camera: &Camera,
) -> Result<Vec<u8>, CaptureError> {
    let mut rate_limit_attempt = 0;
    let mut linear_retry_used = false;

    loop {
        match registry.capture_snapshot(camera).await {
            Ok(bytes) => return Ok(bytes),
            Err(CameraError::TooManyRequests(detail)) => {
                rate_limit_attempt += 1;
                if rate_limit_attempt >= MAX_RATE_LIMIT_ATTEMPTS {
                    return Err(CaptureError::Snapshot(CameraError::TooManyRequests(detail)));
                }
                let backoff = RATE_LIMIT_BASE_BACKOFF * 2u32.pow(rate_limit_attempt - 1);
                log::warn!(
                    "Snapshot rate-limited for {} ({}/{}), retrying in {:?}",
                    camera.name,
                    rate_limit_attempt,
                    MAX_RATE_LIMIT_ATTEMPTS,
                    backoff
                );
                tokio::time::sleep(backoff).await;
            }
            Err(e) if e.is_transient() && !linear_retry_used => {
                linear_retry_used = true;
                log::warn!(
                    "Transient snapshot failure for {}, retrying once in {:?}",
                    camera.name,
                    LINEAR_RETRY_DELAY
                );
                tokio::time::sleep(LINEAR_RETRY_DELAY).await;
            }
            Err(e) => return Err(CaptureError::Snapshot(e)),
        }
    }
}

/// Captures `duration` seconds of video from `rtsp_url` to `output_dir`,
/// naming the file `{camera_name}_{timestamp}_det{detection_id}_{suffix}.mp4`
/// as the source does, and returns the path written.
pub async fn capture_video(
    rtsp_url: &str,
    camera_name: &str,
    detection_id: u64,
    duration: Duration,
    output_dir: &Path,
) -> Result<PathBuf, CaptureError> {
    tokio::fs::create_dir_all(output_dir).await?;

    let filename = format!(
        "{}_{}_det{}_{}.mp4",
        sanitize(camera_name),
        chrono::Utc::now().format("%Y%m%d_%H%M%S"),
        detection_id,
        &uuid::Uuid::new_v4().simple().to_string()[..8],
    );
    let output_path = output_dir.join(filename);

    let mut command = Command::new("ffmpeg");
    command
        .arg("-rtsp_transport")
        .arg("tcp")
        .arg("-i")
        .arg(rtsp_url)
        .arg("-t")
        .arg(duration.as_secs().to_string())
        .arg("-c:v")
        .arg("copy")
        .arg("-c:a")
        .arg("copy")
        .arg("-movflags")
        .arg("frag_keyframe+empty_moov")
        .arg("-y")
        .arg(&output_path)
        .kill_on_drop(true);

    log::info!("Starting video capture from {camera_name} for {}s", duration.as_secs());

    let mut child = command.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            CaptureError::TranscoderUnavailable
        } else {
            CaptureError::Io(e)
        }
    })?;

    let wait_budget = duration + Duration::from_secs(10);
    match timeout(wait_budget, child.wait()).await {
        Ok(Ok(status)) if status.success() => {
            log::info!("Video captured successfully: {}", output_path.display());
            Ok(output_path)
        }
        Ok(Ok(status)) => Err(CaptureError::Subprocess(format!(
            "ffmpeg exited with {status}"
        ))),
        Ok(Err(e)) => Err(CaptureError::Io(e)),
        Err(_) => {
            let _ = child.kill().await;
            log::error!("Video capture timed out after {:?}", wait_budget);
            Err(CaptureError::TimedOut)
        }
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::camera::adapter::{DiscoveredCamera, IntegrationAdapter};
    use crate::camera::CameraRegistry;
    use crate::diagnostics::Diagnostics;
    use crate::persistence::models::{CameraCapabilities, CameraStatus};
    use crate::persistence::Facade;
    use crate::rate_limiter::PerResourceRateLimiter;

    #[test]
    fn sanitize_replaces_non_alphanumeric_characters() {
        assert_eq!(sanitize("Front Door (East)"), "Front_Door__East_");
    }

    #[tokio::test]
    async fn video_capture_reports_transcoder_unavailable_when_ffmpeg_missing() {
        // `ffmpeg` is spawned by name via PATH; in a minimal test environment
        // without it installed this should surface as TranscoderUnavailable,
        // not an opaque IO error or a panic.
        let dir = tempfile::tempdir().unwrap();
        let result = capture_video(
            "rtsp://example.invalid/stream",
            "test cam",
            1,
            Duration::from_millis(10),
            dir.path(),
        )
        .await;
        assert!(result.is_err());
    }

    /// Fails `get_snapshot` with a fixed error for its first `fail_times`
    /// calls, then succeeds.
    struct ScriptedAdapter {
        calls: AtomicU32,
        fail_times: u32,
        error: fn() -> CameraError,
    }

    #[async_trait]
    impl IntegrationAdapter for ScriptedAdapter {
        async fn connect(&self) -> Result<(), CameraError> {
            Ok(())
        }
        async fn list_cameras(&self) -> Result<Vec<DiscoveredCamera>, CameraError> {
            Ok(Vec::new())
        }
        async fn get_snapshot(&self, _provider_id: &str) -> Result<Vec<u8>, CameraError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_times {
                Err((self.error)())
            } else {
                Ok(b"frame".to_vec())
            }
        }
    }

    fn sample_camera() -> Camera {
        Camera {
            id: 1,
            integration_id: 1,
            name: "yard".to_string(),
            status: CameraStatus::Online,
            provider_id: "p1".to_string(),
            capabilities: CameraCapabilities::default(),
            last_image_hash: None,
        }
    }

    fn registry_with(adapter: ScriptedAdapter) -> CameraRegistry {
        let dir = tempfile::tempdir().unwrap();
        let facade = Arc::new(Facade::open(dir.path()).unwrap());
        let registry = CameraRegistry::new(
            facade,
            Arc::new(PerResourceRateLimiter::new(1000.0, 1000.0)),
            Arc::new(Diagnostics::new(100)),
        );
        registry.register_adapter(1, Arc::new(adapter));
        registry
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_retries_with_exponential_backoff_then_succeeds() {
        let registry = registry_with(ScriptedAdapter {
            calls: AtomicU32::new(0),
            fail_times: 2,
            error: || CameraError::TooManyRequests("429".to_string()),
        });
        let started = tokio::time::Instant::now();
        let result = capture_snapshot_with_retry(&registry, &sample_camera()).await;
        assert!(result.is_ok());
        assert!(started.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_retries_once_linearly_then_succeeds() {
        let registry = registry_with(ScriptedAdapter {
            calls: AtomicU32::new(0),
            fail_times: 1,
            error: || CameraError::TransientRemote("connect timeout".to_string()),
        });
        let started = tokio::time::Instant::now();
        let result = capture_snapshot_with_retry(&registry, &sample_camera()).await;
        assert!(result.is_ok());
        assert!(started.elapsed() >= LINEAR_RETRY_DELAY);
        assert!(started.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_only_retries_once_before_surfacing() {
        let registry = registry_with(ScriptedAdapter {
            calls: AtomicU32::new(0),
            fail_times: 2,
            error: || CameraError::TransientRemote("read timeout".to_string()),
        });
        let result = capture_snapshot_with_retry(&registry, &sample_camera()).await;
        assert!(matches!(
            result,
            Err(CaptureError::Snapshot(CameraError::TransientRemote(_)))
        ));
    }

    #[tokio::test]
    async fn permanent_failure_is_never_retried() {
        let registry = registry_with(ScriptedAdapter {
            calls: AtomicU32::new(0),
            fail_times: 100,
            error: || CameraError::PermanentRemote("401".to_string()),
        });
        let result = capture_snapshot_with_retry(&registry, &sample_camera()).await;
        assert!(matches!(
            result,
            Err(CaptureError::Snapshot(CameraError::PermanentRemote(_)))
        ));
    }
}

//! In-memory dummy adapter (§4.3), used for local development and tests when no
//! real surveillance backend is configured. Grounded on the source's
//! `DummySurveillanceIntegration`: one camera, snapshots served from a
//! configured test-image directory with round-robin rotation, no speaker.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::adapter::{DiscoveredCamera, IntegrationAdapter};
use crate::error::CameraError;
use crate::persistence::models::CameraCapabilities;

const DUMMY_PROVIDER_ID: &str = "dummy-cam-001";

/// Serves snapshots by rotating through a fixed directory of test images,
/// mirroring `_get_next_scenario`'s round-robin behavior.
pub struct DummyAdapter {
    images: Vec<PathBuf>,
    next: AtomicUsize,
}

impl DummyAdapter {
    /// Scans `images_dir` for `.jpg`/`.jpeg`/`.png` files to rotate through.
    /// An empty or missing directory is not an error: `get_snapshot` will just
    /// report the camera unavailable, matching the source's "no image path set"
    /// fallback.
    pub fn new(images_dir: &std::path::Path) -> Self {
        let images = std::fs::read_dir(images_dir)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .map(|e| e.path())
                    .filter(|p| {
                        matches!(
                            p.extension().and_then(|e| e.to_str()),
                            Some("jpg") | Some("jpeg") | Some("png")
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();

        if images.is_empty() {
            log::warn!(
                "Dummy adapter found no test images under {}",
                images_dir.display()
            );
        }

        Self {
            images,
            next: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl IntegrationAdapter for DummyAdapter {
    async fn connect(&self) -> Result<(), CameraError> {
        Ok(())
    }

    async fn list_cameras(&self) -> Result<Vec<DiscoveredCamera>, CameraError> {
        Ok(vec![DiscoveredCamera {
            provider_id: DUMMY_PROVIDER_ID.to_string(),
            name: "Dummy Camera 1".to_string(),
            capabilities: CameraCapabilities {
                has_speaker: false,
                rtsp_template: None,
            },
        }])
    }

    async fn get_snapshot(&self, provider_id: &str) -> Result<Vec<u8>, CameraError> {
        if provider_id != DUMMY_PROVIDER_ID {
            return Err(CameraError::DeviceUnavailable(provider_id.to_string()));
        }
        if self.images.is_empty() {
            return Err(CameraError::DeviceUnavailable(
                "no dummy test images configured".to_string(),
            ));
        }

        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.images.len();
        std::fs::read(&self.images[index]).map_err(|e| {
            CameraError::DeviceUnavailable(format!("failed to read test image: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_directory_yields_unavailable_not_panic() {
        let adapter = DummyAdapter::new(std::path::Path::new("/nonexistent/path/for/tests"));
        let result = adapter.get_snapshot(DUMMY_PROVIDER_ID).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn lists_exactly_one_camera() {
        let adapter = DummyAdapter::new(std::path::Path::new("/nonexistent/path/for/tests"));
        let cameras = adapter.list_cameras().await.unwrap();
        assert_eq!(cameras.len(), 1);
        assert_eq!(cameras[0].provider_id, DUMMY_PROVIDER_ID);
    }

    #[tokio::test]
    async fn rotates_through_available_images() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.jpg", "b.png"] {
            std::fs::write(dir.path().join(name), b"fake-bytes").unwrap();
        }
        let adapter = DummyAdapter::new(dir.path());
        let first = adapter.get_snapshot(DUMMY_PROVIDER_ID).await.unwrap();
        let second = adapter.get_snapshot(DUMMY_PROVIDER_ID).await.unwrap();
        let third = adapter.get_snapshot(DUMMY_PROVIDER_ID).await.unwrap();
        assert_eq!(first, third);
        assert_ne!(first, second);
    }
}

//! Camera registry (C3): the active-camera list, per-integration adapter
//! lookup, and rate-limited snapshot/playback calls, with camera-health
//! error recording on failure.
//!
//! Grounded on the source's `CameraManager`: an adapter cache keyed by
//! integration identity, snapshots and playback both funneled through it, and
//! every call failure reported to the diagnostics ring buffer.

use std::sync::Arc;

use dashmap::DashMap;

use crate::camera::adapter::IntegrationAdapter;
use crate::diagnostics::Diagnostics;
use crate::error::CameraError;
use crate::persistence::models::Camera;
use crate::persistence::Facade;
use crate::rate_limiter::PerResourceRateLimiter;

/// Owns the live adapter instances and fronts every call to them with rate
/// limiting and error diagnostics.
pub struct CameraRegistry {
    facade: Arc<Facade>,
    adapters: DashMap<u64, Arc<dyn IntegrationAdapter>>,
    rate_limiter: Arc<PerResourceRateLimiter>,
    diagnostics: Arc<Diagnostics>,
}

impl CameraRegistry {
    pub fn new(
        facade: Arc<Facade>,
        rate_limiter: Arc<PerResourceRateLimiter>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            facade,
            adapters: DashMap::new(),
            rate_limiter,
            diagnostics,
        }
    }

    /// Registers (or replaces) the adapter instance for an integration id.
    pub fn register_adapter(&self, integration_id: u64, adapter: Arc<dyn IntegrationAdapter>) {
        self.adapters.insert(integration_id, adapter);
    }

    fn adapter_for(&self, integration_id: u64) -> Result<Arc<dyn IntegrationAdapter>, CameraError> {
        self.adapters
            .get(&integration_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| CameraError::UnknownIntegration(integration_id.to_string()))
    }

    /// `active_cameras` (§4.3): cameras whose integration is enabled and connected.
    pub fn active_cameras(&self) -> Vec<Camera> {
        self.facade.active_cameras().unwrap_or_else(|e| {
            log::error!("Failed to load active cameras: {e}");
            Vec::new()
        })
    }

    /// Fetches a snapshot, rate-limited per integration, recording any failure
    /// to diagnostics under the camera's own identity.
    pub async fn capture_snapshot(&self, camera: &Camera) -> Result<Vec<u8>, CameraError> {
        self.rate_limiter
            .acquire(&camera.integration_id.to_string())
            .await;

        let adapter = self.adapter_for(camera.integration_id)?;
        match adapter.get_snapshot(&camera.provider_id).await {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                self.diagnostics
                    .record_camera_error(camera.id, &camera.name, error_kind(&e), &e.to_string());
                Err(e)
            }
        }
    }

    /// `play_sound_on_camera` (§4.3): returns `PlaybackUnsupported` if the
    /// camera has no speaker, matching the source's `hasattr` capability check,
    /// before even reaching the adapter call.
    pub async fn play_sound_on_camera(
        &self,
        camera: &Camera,
        sound_path: &str,
    ) -> Result<(), CameraError> {
        if !camera.capabilities.has_speaker {
            return Err(CameraError::PlaybackUnsupported);
        }

        self.rate_limiter
            .acquire(&camera.integration_id.to_string())
            .await;

        let adapter = self.adapter_for(camera.integration_id)?;
        match adapter.play_sound(&camera.provider_id, sound_path).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.diagnostics
                    .record_camera_error(camera.id, &camera.name, error_kind(&e), &e.to_string());
                Err(e)
            }
        }
    }

    /// An RTSP url for video capture (C4), if the adapter and camera support one.
    pub fn rtsp_url(&self, camera: &Camera) -> Option<String> {
        let adapter = self.adapters.get(&camera.integration_id)?;
        adapter.rtsp_url(&camera.provider_id)
    }
}

/// Classifies an error the way `camera_diagnostics.record_camera_error` expects
/// its `error_type` string: `"HTTP 500"` for remote 5xx, the variant name
/// otherwise.
fn error_kind(err: &CameraError) -> String {
    match err {
        CameraError::TransientRemote(detail) | CameraError::PermanentRemote(detail)
            if detail.contains("500") =>
        {
            "HTTP 500".to_string()
        }
        CameraError::TransientRemote(_) => "transient_remote".to_string(),
        CameraError::TooManyRequests(_) => "too_many_requests".to_string(),
        CameraError::PermanentRemote(_) => "permanent_remote".to_string(),
        CameraError::UnknownIntegration(_) => "unknown_integration".to_string(),
        CameraError::MissingProviderId(_) => "missing_provider_id".to_string(),
        CameraError::DeviceUnavailable(_) => "device_unavailable".to_string(),
        CameraError::PlaybackUnsupported => "playback_unsupported".to_string(),
    }
}

//! Adapter contract (§6) that every surveillance backend implements: connect,
//! list cameras, fetch a snapshot, and optionally play a sound locally on the
//! device. Grounded on the source's `IntegrationBase`/`DeviceInterface` split,
//! collapsed into a single trait per adapter instance since the registry (C3)
//! already scopes one adapter per Integration.

use async_trait::async_trait;

use crate::error::CameraError;
use crate::persistence::models::CameraCapabilities;

/// A camera as reported live by an adapter, before it has a persisted `Id`.
#[derive(Debug, Clone)]
pub struct DiscoveredCamera {
    pub provider_id: String,
    pub name: String,
    pub capabilities: CameraCapabilities,
}

/// One connected surveillance backend (a UniFi Protect site, a dummy test rig,
/// etc). Implementations own their own connection/auth state.
#[async_trait]
pub trait IntegrationAdapter: Send + Sync {
    /// Establishes or verifies the connection to the backend.
    async fn connect(&self) -> Result<(), CameraError>;

    /// Lists the cameras currently visible through this backend.
    async fn list_cameras(&self) -> Result<Vec<DiscoveredCamera>, CameraError>;

    /// Fetches a single still frame from the given camera.
    async fn get_snapshot(&self, provider_id: &str) -> Result<Vec<u8>, CameraError>;

    /// Plays a sound file locally on the camera's speaker, if it has one.
    ///
    /// Default implementation reports the capability as unsupported; adapters
    /// for cameras with a speaker override this (§4.3's "optional capability").
    async fn play_sound(&self, _provider_id: &str, _sound_path: &str) -> Result<(), CameraError> {
        Err(CameraError::PlaybackUnsupported)
    }

    /// An RTSP stream URL for video capture (C4), if this backend exposes one.
    fn rtsp_url(&self, _provider_id: &str) -> Option<String> {
        None
    }
}

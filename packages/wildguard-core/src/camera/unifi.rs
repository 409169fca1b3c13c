//! UniFi Protect adapter (§6), grounded on the source's `UniFiProtectIntegration`
//! /`UniFiProtectDevice`: a `reqwest` client with TLS verification disabled (UniFi
//! controllers are commonly reached over a self-signed certificate), camera
//! discovery restricted to an explicit allow-list, and sound playback via an
//! RTP talkback session piped through `ffmpeg`. A single snapshot attempt just
//! classifies the HTTP status it gets back; retry policy (exponential on a
//! rate limit, linear otherwise) lives one layer up in `capture.rs`, which is
//! shared across every adapter rather than duplicated per backend.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;

use crate::camera::adapter::{DiscoveredCamera, IntegrationAdapter};
use crate::error::CameraError;
use crate::persistence::models::CameraCapabilities;

#[derive(Debug, Clone, Deserialize)]
struct UnifiConfig {
    host: String,
    api_key: String,
    #[serde(default)]
    enabled_cameras: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct UnifiCamera {
    id: String,
    name: String,
    #[serde(default, rename = "featureFlags")]
    feature_flags: UnifiFeatureFlags,
}

#[derive(Debug, Default, Deserialize)]
struct UnifiFeatureFlags {
    #[serde(default, rename = "hasSpeaker")]
    has_speaker: bool,
}

/// Talks to a single UniFi Protect controller over its integration API.
pub struct UnifiProtectAdapter {
    client: reqwest::Client,
    host: String,
    enabled_cameras: Vec<String>,
}

impl UnifiProtectAdapter {
    /// Builds an adapter from an integration's opaque `config` value, which
    /// must deserialize into `{host, api_key, enabled_cameras}`.
    pub fn new(config: &serde_json::Value) -> Result<Self, CameraError> {
        let config: UnifiConfig = serde_json::from_value(config.clone())
            .map_err(|e| CameraError::PermanentRemote(format!("invalid unifi config: {e}")))?;

        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    "X-API-KEY",
                    reqwest::header::HeaderValue::from_str(&config.api_key)
                        .map_err(|e| CameraError::PermanentRemote(e.to_string()))?,
                );
                headers
            })
            .build()
            .map_err(|e| CameraError::PermanentRemote(e.to_string()))?;

        Ok(Self {
            client,
            host: config.host.trim_end_matches('/').to_string(),
            enabled_cameras: config.enabled_cameras,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/proxy/protect/integration/v1{path}", self.host)
    }

    async fn talkback_session(&self, provider_id: &str) -> Result<TalkbackSession, CameraError> {
        let response = self
            .client
            .post(self.url(&format!("/cameras/{provider_id}/talkback-session")))
            .send()
            .await
            .map_err(|e| CameraError::TransientRemote(e.to_string()))?;

        if !response.status().is_success() {
            return Err(classify_status(response.status().as_u16()));
        }

        response
            .json::<TalkbackSession>()
            .await
            .map_err(|e| CameraError::PermanentRemote(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct TalkbackSession {
    url: String,
    #[serde(default = "default_codec")]
    codec: String,
}

fn default_codec() -> String {
    "opus".to_string()
}

fn classify_status(status: u16) -> CameraError {
    match status {
        401 | 403 => CameraError::PermanentRemote(format!("HTTP {status}: authentication failed")),
        404 => CameraError::PermanentRemote(format!("HTTP {status}: camera not found")),
        429 => CameraError::TooManyRequests(format!("HTTP {status}")),
        500..=599 => CameraError::TransientRemote(format!("HTTP {status}")),
        other => CameraError::PermanentRemote(format!("HTTP {other}")),
    }
}

#[async_trait]
impl IntegrationAdapter for UnifiProtectAdapter {
    async fn connect(&self) -> Result<(), CameraError> {
        let response = self
            .client
            .get(self.url("/meta/info"))
            .send()
            .await
            .map_err(|e| CameraError::TransientRemote(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(classify_status(response.status().as_u16()))
        }
    }

    async fn list_cameras(&self) -> Result<Vec<DiscoveredCamera>, CameraError> {
        if self.enabled_cameras.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .get(self.url("/cameras"))
            .send()
            .await
            .map_err(|e| CameraError::TransientRemote(e.to_string()))?;

        if !response.status().is_success() {
            return Err(classify_status(response.status().as_u16()));
        }

        let cameras: Vec<UnifiCamera> = response
            .json()
            .await
            .map_err(|e| CameraError::PermanentRemote(e.to_string()))?;

        Ok(cameras
            .into_iter()
            .filter(|c| self.enabled_cameras.iter().any(|id| id == &c.id))
            .map(|c| DiscoveredCamera {
                provider_id: c.id,
                name: c.name,
                capabilities: CameraCapabilities {
                    has_speaker: c.feature_flags.has_speaker,
                    rtsp_template: None,
                },
            })
            .collect())
    }

    async fn get_snapshot(&self, provider_id: &str) -> Result<Vec<u8>, CameraError> {
        let response = self
            .client
            .get(self.url(&format!("/cameras/{provider_id}/snapshot")))
            .send()
            .await
            .map_err(|e| CameraError::TransientRemote(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status.as_u16()));
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| CameraError::TransientRemote(e.to_string()))
    }

    async fn play_sound(&self, provider_id: &str, sound_path: &str) -> Result<(), CameraError> {
        let session = self.talkback_session(provider_id).await?;

        let mut command = Command::new("ffmpeg");
        command
            .arg("-re")
            .arg("-i")
            .arg(sound_path)
            .arg("-c:a")
            .arg(&session.codec)
            .arg("-ac")
            .arg("1")
            .arg("-strict")
            .arg("-2")
            .arg("-b:a")
            .arg("24k")
            .arg("-f")
            .arg("rtp")
            .arg(&session.url)
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CameraError::PermanentRemote("ffmpeg not available for talkback".to_string())
            } else {
                CameraError::PermanentRemote(e.to_string())
            }
        })?;

        match timeout(Duration::from_secs(10), child.wait()).await {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(CameraError::PermanentRemote(format!(
                "talkback ffmpeg exited with {status}"
            ))),
            Ok(Err(e)) => Err(CameraError::PermanentRemote(e.to_string())),
            Err(_) => {
                let _ = child.kill().await;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_host_in_config_is_rejected_without_panicking() {
        let config = serde_json::json!({});
        assert!(UnifiProtectAdapter::new(&config).is_err());
    }

    #[test]
    fn valid_config_builds_adapter() {
        let config = serde_json::json!({
            "host": "https://192.168.1.1",
            "api_key": "secret",
            "enabled_cameras": ["cam-1"],
        });
        let adapter = UnifiProtectAdapter::new(&config).unwrap();
        assert_eq!(adapter.host, "https://192.168.1.1");
        assert_eq!(adapter.enabled_cameras, vec!["cam-1".to_string()]);
    }

    #[test]
    fn status_classification_matches_source_semantics() {
        assert!(matches!(classify_status(401), CameraError::PermanentRemote(_)));
        assert!(matches!(classify_status(429), CameraError::TooManyRequests(_)));
        assert!(matches!(classify_status(500), CameraError::TransientRemote(_)));
    }
}

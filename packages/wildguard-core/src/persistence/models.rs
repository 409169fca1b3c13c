//! Data model entities (§3). Attributes are semantic, not schema-bound; this module
//! gives them concrete Rust shapes for the embedded store (C12).

use serde::{Deserialize, Serialize};

/// Opaque identifier assigned by the persistence facade.
pub type Id = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegrationStatus {
    Connected,
    Disconnected,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Integration {
    pub id: Id,
    pub name: String,
    pub kind: String,
    pub enabled: bool,
    pub status: IntegrationStatus,
    /// Opaque, integration-specific configuration (host, credentials reference, etc).
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CameraStatus {
    Online,
    Offline,
    Error,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CameraCapabilities {
    pub has_speaker: bool,
    pub rtsp_template: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Camera {
    pub id: Id,
    pub integration_id: Id,
    pub name: String,
    pub status: CameraStatus,
    /// Opaque provider-side identifier, e.g. UniFi's camera id.
    pub provider_id: String,
    pub capabilities: CameraCapabilities,
    /// Hash of the last snapshot seen from this camera; used by the change gate.
    pub last_image_hash: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectionStatus {
    Pending,
    Processed,
    Deterred,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FoeKind {
    Rats,
    Crows,
    Cats,
    Herons,
    Pigeons,
    Unknown,
}

impl FoeKind {
    /// Normalizes an arbitrary detector-reported kind string into the closed enum
    /// (§4.5 step 4): anything unrecognized becomes `Unknown`.
    pub fn normalize(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "RATS" => Self::Rats,
            "CROWS" => Self::Crows,
            "CATS" => Self::Cats,
            "HERONS" => Self::Herons,
            "PIGEONS" => Self::Pigeons,
            _ => Self::Unknown,
        }
    }

    /// Lowercase directory name used under `<sounds_dir>/<pest-kind>/` (§6).
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Rats => "rats",
            Self::Crows => "crows",
            Self::Cats => "cats",
            Self::Herons => "herons",
            Self::Pigeons => "pigeons",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Foe {
    pub kind: FoeKind,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeterrentAction {
    pub action_kind: String,
    pub triggered_at_unix: i64,
    pub success: bool,
    pub details: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub id: Id,
    pub camera_id: Id,
    pub created_at_unix: i64,
    pub snapshot_path: Option<String>,
    pub video_path: Option<String>,
    pub status: DetectionStatus,
    pub detector_blob: Option<serde_json::Value>,
    pub ai_cost: f64,
    pub played_sounds: Vec<String>,
    pub visual_hash: Option<String>,
    pub foes: Vec<Foe>,
    pub deterrent_actions: Vec<DeterrentAction>,
}

impl Detection {
    /// `primary_foe_type` (§4.5): the kind of the highest-confidence Foe, or `None`.
    pub fn primary_foe_type(&self) -> Option<FoeKind> {
        self.foes
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
            .map(|f| f.kind)
    }

    /// `pest present` (§3): Foes non-empty and some kind != Unknown.
    pub fn has_pest(&self) -> bool {
        self.foes.iter().any(|f| f.kind != FoeKind::Unknown)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackMethod {
    Camera,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeterrentResult {
    Success,
    Partial,
    Failure,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoundEffectiveness {
    pub id: Id,
    pub detection_id: Id,
    pub foe_type: FoeKind,
    pub sound_file: String,
    pub playback_method: PlaybackMethod,
    pub foes_before: u32,
    pub foes_after: u32,
    pub confidence_before: f32,
    pub confidence_after: f32,
    pub wait_duration_secs: u32,
    pub result: DeterrentResult,
    pub effectiveness_score: f64,
    pub follow_up_image_path: Option<String>,
    pub timestamp_unix: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoundStatistics {
    pub foe_type: FoeKind,
    pub sound_file: String,
    pub total_uses: u64,
    pub successful_uses: u64,
    pub partial_uses: u64,
    pub failed_uses: u64,
    pub success_rate: f64,
    pub average_effectiveness: f64,
    pub first_used_unix: i64,
    pub last_used_unix: i64,
}

impl SoundStatistics {
    pub fn new(foe_type: FoeKind, sound_file: String, first_used_unix: i64) -> Self {
        Self {
            foe_type,
            sound_file,
            total_uses: 0,
            successful_uses: 0,
            partial_uses: 0,
            failed_uses: 0,
            success_rate: 0.0,
            average_effectiveness: 0.0,
            first_used_unix,
            last_used_unix: first_used_unix,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeBasedEffectiveness {
    pub foe_type: FoeKind,
    pub hour_of_day: u8,
    pub total_detections: u64,
    pub successful_deterrents: u64,
    pub best_sound: Option<String>,
    pub best_sound_success_rate: f64,
}

impl TimeBasedEffectiveness {
    pub fn new(foe_type: FoeKind, hour_of_day: u8) -> Self {
        Self {
            foe_type,
            hour_of_day,
            total_detections: 0,
            successful_deterrents: 0,
            best_sound: None,
            best_sound_success_rate: 0.0,
        }
    }
}

/// Key used to look up `SoundStatistics`, stable across process restarts.
pub fn sound_stats_key(foe_type: FoeKind, sound_file: &str) -> String {
    format!("{foe_type:?}|{sound_file}")
}

/// Key used to look up `TimeBasedEffectiveness`.
pub fn time_pattern_key(foe_type: FoeKind, hour_of_day: u8) -> String {
    format!("{foe_type:?}|{hour_of_day}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrecognized_kind_normalizes_to_unknown() {
        assert_eq!(FoeKind::normalize("squirrel"), FoeKind::Unknown);
        assert_eq!(FoeKind::normalize("crows"), FoeKind::Crows);
        assert_eq!(FoeKind::normalize("CROWS"), FoeKind::Crows);
    }

    #[test]
    fn primary_foe_type_picks_highest_confidence() {
        let detection = Detection {
            id: 1,
            camera_id: 1,
            created_at_unix: 0,
            snapshot_path: None,
            video_path: None,
            status: DetectionStatus::Processed,
            detector_blob: None,
            ai_cost: 0.0,
            played_sounds: vec![],
            visual_hash: None,
            foes: vec![
                Foe {
                    kind: FoeKind::Cats,
                    confidence: 0.4,
                    bbox: BoundingBox { x: 0.0, y: 0.0, width: 1.0, height: 1.0 },
                    description: None,
                },
                Foe {
                    kind: FoeKind::Crows,
                    confidence: 0.9,
                    bbox: BoundingBox { x: 0.0, y: 0.0, width: 1.0, height: 1.0 },
                    description: None,
                },
            ],
            deterrent_actions: vec![],
        };
        assert_eq!(detection.primary_foe_type(), Some(FoeKind::Crows));
        assert!(detection.has_pest());
    }

    #[test]
    fn no_foes_has_no_primary_type() {
        let detection = Detection {
            id: 1,
            camera_id: 1,
            created_at_unix: 0,
            snapshot_path: None,
            video_path: None,
            status: DetectionStatus::Processed,
            detector_blob: None,
            ai_cost: 0.0,
            played_sounds: vec![],
            visual_hash: None,
            foes: vec![],
            deterrent_actions: vec![],
        };
        assert_eq!(detection.primary_foe_type(), None);
        assert!(!detection.has_pest());
    }
}

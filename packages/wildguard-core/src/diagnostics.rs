//! Bounded per-camera error diagnostics (C11).
//!
//! Grounded on the source's `CameraDiagnostics`: an in-memory ring of the last
//! 100 errors per camera, a health view derived from errors in the last five
//! minutes, and a small rule-based `suggest_fixes` that reads the recent error
//! history rather than anything structural about the camera.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

const HEALTH_WINDOW: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct CameraErrorRecord {
    pub timestamp_unix: i64,
    pub camera_name: String,
    pub error_type: String,
    pub error_details: String,
}

#[derive(Debug, Clone)]
pub struct CameraHealth {
    pub camera_id: u64,
    pub camera_name: String,
    pub is_healthy: bool,
    pub recent_error_count: usize,
    pub last_error: Option<CameraErrorRecord>,
}

/// Per-camera bounded ring buffers of recorded errors (C11, §8 P14: capacity
/// never exceeds `max_error_history`).
pub struct Diagnostics {
    max_error_history: usize,
    errors: Mutex<HashMap<u64, Vec<CameraErrorRecord>>>,
}

impl Diagnostics {
    pub fn new(max_error_history: usize) -> Self {
        Self {
            max_error_history,
            errors: Mutex::new(HashMap::new()),
        }
    }

    /// Appends an error, truncating the camera's history to the last
    /// `max_error_history` entries (oldest first discarded).
    pub fn record_camera_error(
        &self,
        camera_id: u64,
        camera_name: &str,
        error_type: impl Into<String>,
        error_details: impl Into<String>,
    ) {
        let record = CameraErrorRecord {
            timestamp_unix: now_unix(),
            camera_name: camera_name.to_string(),
            error_type: error_type.into(),
            error_details: error_details.into(),
        };

        let mut errors = self.errors.lock();
        let history = errors.entry(camera_id).or_default();
        history.push(record);
        if history.len() > self.max_error_history {
            let overflow = history.len() - self.max_error_history;
            history.drain(0..overflow);
        }
    }

    /// `get_camera_health_status` (§4.11): a camera is healthy iff it has no
    /// recorded errors within the last five minutes.
    pub fn camera_health(&self, camera_id: u64, camera_name: &str) -> CameraHealth {
        let errors = self.errors.lock();
        let history = errors.get(&camera_id);
        let threshold = now_unix() - HEALTH_WINDOW.as_secs() as i64;

        let recent_error_count = history
            .map(|h| h.iter().filter(|e| e.timestamp_unix >= threshold).count())
            .unwrap_or(0);

        CameraHealth {
            camera_id,
            camera_name: camera_name.to_string(),
            is_healthy: recent_error_count == 0,
            recent_error_count,
            last_error: history.and_then(|h| h.last().cloned()),
        }
    }

    /// `get_camera_error_history` (§4.11): the most recent `limit` entries.
    pub fn camera_error_history(&self, camera_id: u64, limit: usize) -> Vec<CameraErrorRecord> {
        let errors = self.errors.lock();
        match errors.get(&camera_id) {
            Some(history) => {
                let start = history.len().saturating_sub(limit);
                history[start..].to_vec()
            }
            None => Vec::new(),
        }
    }

    /// `suggest_fixes` (§4.11): independent, evidence-based rules over the last
    /// 10 recorded errors, each appending its own advice when it matches -
    /// several rules can fire on the same error history - falling back to a
    /// generic message only when none match at all.
    pub fn suggest_fixes(&self, camera_id: u64) -> Vec<String> {
        let recent = self.camera_error_history(camera_id, 10);
        if recent.is_empty() {
            return vec!["No errors recorded for this camera".to_string()];
        }

        let mut suggestions = Vec::new();

        let last_three_are_http_500 = recent.len() >= 3
            && recent[recent.len() - 3..]
                .iter()
                .all(|e| e.error_type == "HTTP 500");
        if last_three_are_http_500 {
            suggestions.push("Camera appears to be offline or unreachable".to_string());
            suggestions.push("Check the camera's power and network connection".to_string());
            suggestions.push("Verify the camera is visible in the UniFi Protect app".to_string());
            suggestions.push("Check if the camera needs a firmware update".to_string());
        }

        let any_timeout = recent
            .iter()
            .any(|e| e.error_details.to_lowercase().contains("timeout"));
        if any_timeout {
            suggestions.push("Network connectivity issues detected".to_string());
            suggestions.push("Check the network path between the server and camera".to_string());
            suggestions.push("Consider increasing the timeout value if the network is slow".to_string());
        }

        let any_auth_failure = recent
            .iter()
            .any(|e| e.error_type.contains("401") || e.error_type.contains("403"));
        if any_auth_failure {
            suggestions.push("Authentication failures detected".to_string());
            suggestions.push("Re-authenticate the integration".to_string());
            suggestions.push("Verify the camera's permissions and credentials".to_string());
        }

        if suggestions.is_empty() {
            suggestions.push("No specific issues detected. Monitor camera behavior.".to_string());
        }

        suggestions
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

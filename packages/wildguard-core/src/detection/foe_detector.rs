//! Pluggable foe detector contract (§6): given image bytes, returns zero or
//! more detected foes plus whatever cost/latency bookkeeping the detector
//! wants to report, or an error if the call itself failed. Grounded on the
//! source's `AIDetector.detect_foes` return shape (`foes_detected`, `foes`,
//! `model_used`, `processing_time`, `cost_estimate`) and on its call site's
//! `try`/`except` around the detector invocation (§4.5 step 7).

use async_trait::async_trait;

use crate::error::DetectorError;
use crate::persistence::models::Foe;

/// One detector invocation's result.
#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub foes: Vec<Foe>,
    pub model_used: String,
    pub processing_time_secs: f64,
    pub cost_estimate: f64,
}

impl DetectionResult {
    pub fn foes_detected(&self) -> bool {
        !self.foes.is_empty()
    }
}

/// A pluggable image classifier. Implementations might call a remote AI
/// service or, for tests, return canned results. An `Err` means the call
/// itself failed (raised, timed out, or returned a failure marker), not that
/// zero foes were found - that case is `Ok` with an empty `foes` list.
#[async_trait]
pub trait FoeDetector: Send + Sync {
    async fn detect_foes(&self, image_bytes: &[u8]) -> Result<DetectionResult, DetectorError>;
}

/// A detector that reports no foes for every image; useful for wiring the
/// worker loop in tests and for a deployment with no detector configured yet.
pub struct NullDetector;

#[async_trait]
impl FoeDetector for NullDetector {
    async fn detect_foes(&self, _image_bytes: &[u8]) -> Result<DetectionResult, DetectorError> {
        Ok(DetectionResult {
            foes: Vec::new(),
            model_used: "none".to_string(),
            processing_time_secs: 0.0,
            cost_estimate: 0.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_detector_reports_no_foes() {
        let result = NullDetector.detect_foes(b"irrelevant").await.unwrap();
        assert!(!result.foes_detected());
    }
}

pub mod foe_detector;
pub mod grouping;
pub mod pipeline;

pub use foe_detector::{DetectionResult, FoeDetector};
pub use grouping::{group_detections, DetectionGroup};
pub use pipeline::{process_snapshot, PipelineOutcome};

//! Centralized error types for the wildguard core library.
//!
//! Subsystems define their own `thiserror` enums with an [`is_transient`](WildguardError::is_transient)-style
//! classifier matching the error taxonomy in the design notes; this module provides the
//! top-level enum that wraps them for the composition root and CLI, where a single
//! `Result` return type is convenient. Per-camera subtasks and the tick scheduler do not
//! use this type to propagate errors - they log and continue, by design.

use thiserror::Error;

/// Trait for error types that provide a machine-readable error code.
pub trait ErrorCode {
    /// Returns a machine-readable error code, stable across releases.
    fn code(&self) -> &'static str;
}

/// Errors raised by the camera registry and its adapters (C3).
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("integration {0} has no registered adapter")]
    UnknownIntegration(String),

    #[error("camera {0} has no provider id in its capability metadata")]
    MissingProviderId(String),

    #[error("device interface unavailable for camera {0}")]
    DeviceUnavailable(String),

    #[error("remote call failed with transient status: {0}")]
    TransientRemote(String),

    #[error("remote call was rate-limited: {0}")]
    TooManyRequests(String),

    #[error("remote call failed with permanent status: {0}")]
    PermanentRemote(String),

    #[error("playback not supported by this device")]
    PlaybackUnsupported,
}

impl CameraError {
    /// Whether retrying this error locally is worthwhile at all (§7, "Transient remote").
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientRemote(_) | Self::TooManyRequests(_))
    }

    /// Whether this transient failure is specifically a rate limit, which gets
    /// the exponential backoff policy rather than the linear one (§4.4).
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::TooManyRequests(_))
    }
}

impl ErrorCode for CameraError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnknownIntegration(_) => "unknown_integration",
            Self::MissingProviderId(_) => "missing_provider_id",
            Self::DeviceUnavailable(_) => "device_unavailable",
            Self::TransientRemote(_) => "transient_remote",
            Self::TooManyRequests(_) => "too_many_requests",
            Self::PermanentRemote(_) => "permanent_remote",
            Self::PlaybackUnsupported => "playback_unsupported",
        }
    }
}

/// Errors raised by snapshot and video capture (C4).
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("snapshot fetch failed: {0}")]
    Snapshot(#[from] CameraError),

    #[error("transcoder binary not available")]
    TranscoderUnavailable,

    #[error("video capture subprocess failed: {0}")]
    Subprocess(String),

    #[error("video capture timed out and was killed")]
    TimedOut,

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
}

impl ErrorCode for CaptureError {
    fn code(&self) -> &'static str {
        match self {
            Self::Snapshot(_) => "snapshot_failed",
            Self::TranscoderUnavailable => "transcoder_unavailable",
            Self::Subprocess(_) => "capture_subprocess_failed",
            Self::TimedOut => "capture_timed_out",
            Self::Io(_) => "capture_io_error",
        }
    }
}

/// Errors raised by a pluggable foe detector implementation (C5).
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("detector call failed: {0}")]
    Failed(String),
}

impl ErrorCode for DetectorError {
    fn code(&self) -> &'static str {
        match self {
            Self::Failed(_) => "detector_failed",
        }
    }
}

/// Errors raised by the persistence facade (C12).
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("store error: {0}")]
    Store(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("transaction aborted: {0}")]
    TransactionAborted(String),

    #[error("record not found: {0}")]
    NotFound(String),
}

impl ErrorCode for PersistenceError {
    fn code(&self) -> &'static str {
        match self {
            Self::Store(_) => "store_error",
            Self::Serde(_) => "serialization_error",
            Self::TransactionAborted(_) => "transaction_aborted",
            Self::NotFound(_) => "not_found",
        }
    }
}

/// Application-wide error type, used only at fatal startup boundaries.
#[derive(Debug, Error)]
pub enum WildguardError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl WildguardError {
    /// Returns a machine-readable error code for logging/diagnostics.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Camera(e) => e.code(),
            Self::Capture(e) => e.code(),
            Self::Persistence(e) => e.code(),
            Self::Detector(e) => e.code(),
            Self::Configuration(_) => "configuration_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

/// Convenience Result alias for application-wide operations.
pub type WildguardResult<T> = Result<T, WildguardError>;

//! Typed settings accessor (§6, §9): parses raw stored strings on read, clamps
//! to the declared range, and never panics on a malformed or missing value -
//! it falls back to the documented default and logs a warning instead.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::Facade;

macro_rules! clamp_numeric {
    ($value:expr, $min:expr, $max:expr) => {
        if $value < $min {
            $min
        } else if $value > $max {
            $max
        } else {
            $value
        }
    };
}

/// Snapshot persistence level (§4.5): how eagerly a passed-change-gate
/// snapshot is kept on disk once a detector result comes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotCaptureLevel {
    /// Persist only if at least one non-UNKNOWN foe was found.
    FoeIdentified,
    /// Persist if the detector returned any foe at all, including UNKNOWN.
    ObjectRecognized,
    /// Persist every snapshot that passed the change gate.
    AllSnapshots,
}

impl SnapshotCaptureLevel {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::FoeIdentified,
            2 => Self::AllSnapshots,
            _ => Self::ObjectRecognized,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::FoeIdentified => 0,
            Self::ObjectRecognized => 1,
            Self::AllSnapshots => 2,
        }
    }
}

/// All tunables named in §6, with their declared ranges and defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub detection_interval_secs: u64,
    pub calls_per_second: f64,
    pub burst: f64,
    pub change_threshold: u32,
    pub similarity_threshold: u32,
    pub explore_exploit_epsilon: f64,
    pub max_group_size: usize,
    pub video_capture_duration_secs: u64,
    pub snapshot_capture_level: SnapshotCaptureLevel,
    pub deterrents_enabled: bool,
    pub confidence_threshold: f32,
    pub max_image_size_mb: u32,
    pub snapshot_retention_days: u32,
    pub timezone: String,
    pub user_language: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            detection_interval_secs: 10,
            calls_per_second: crate::rate_limiter::DEFAULT_CALLS_PER_SECOND,
            burst: crate::rate_limiter::DEFAULT_BURST,
            change_threshold: 10,
            similarity_threshold: crate::hash::DEFAULT_SIMILARITY_THRESHOLD,
            explore_exploit_epsilon: 0.5,
            max_group_size: 5,
            video_capture_duration_secs: 15,
            snapshot_capture_level: SnapshotCaptureLevel::ObjectRecognized,
            deterrents_enabled: true,
            confidence_threshold: 0.5,
            max_image_size_mb: 10,
            snapshot_retention_days: 7,
            timezone: "UTC".to_string(),
            user_language: "en".to_string(),
        }
    }
}

const KEY_DETECTION_INTERVAL: &str = "detection_interval";
const KEY_CALLS_PER_SECOND: &str = "calls_per_second";
const KEY_BURST: &str = "burst";
const KEY_CHANGE_THRESHOLD: &str = "change_threshold";
const KEY_SIMILARITY_THRESHOLD: &str = "similarity_threshold";
const KEY_EPSILON: &str = "explore_exploit_epsilon";
const KEY_MAX_GROUP_SIZE: &str = "max_group_size";
const KEY_VIDEO_DURATION: &str = "video_capture_duration_secs";
const KEY_SNAPSHOT_CAPTURE_LEVEL: &str = "snapshot_capture_level";
pub(crate) const KEY_DETERRENTS_ENABLED: &str = "deterrents_enabled";
const KEY_CONFIDENCE_THRESHOLD: &str = "confidence_threshold";
const KEY_MAX_IMAGE_SIZE_MB: &str = "max_image_size_mb";
const KEY_SNAPSHOT_RETENTION_DAYS: &str = "snapshot_retention_days";
const KEY_TIMEZONE: &str = "timezone";
const KEY_USER_LANGUAGE: &str = "user_language";

fn parse_or_default<T: std::str::FromStr>(raw: Option<String>, key: &str, default: T) -> T {
    match raw {
        None => default,
        Some(text) => text.trim().parse().unwrap_or_else(|_| {
            log::warn!("Setting {key}={text:?} is not valid, using default");
            default
        }),
    }
}

/// Reads every declared setting from the facade, clamping each to its range.
/// Missing or malformed values fall back to the documented default (§6, §8 P13).
pub fn read_settings(facade: &Facade) -> Settings {
    let defaults = Settings::default();

    let detection_interval_secs = clamp_numeric!(
        parse_or_default(
            facade.get_setting_raw(KEY_DETECTION_INTERVAL).ok().flatten(),
            KEY_DETECTION_INTERVAL,
            defaults.detection_interval_secs,
        ),
        1,
        3600
    );

    let calls_per_second = clamp_numeric!(
        parse_or_default(
            facade.get_setting_raw(KEY_CALLS_PER_SECOND).ok().flatten(),
            KEY_CALLS_PER_SECOND,
            defaults.calls_per_second,
        ),
        0.01,
        100.0
    );

    let burst = clamp_numeric!(
        parse_or_default(
            facade.get_setting_raw(KEY_BURST).ok().flatten(),
            KEY_BURST,
            defaults.burst,
        ),
        1.0,
        1000.0
    );

    let change_threshold = clamp_numeric!(
        parse_or_default(
            facade.get_setting_raw(KEY_CHANGE_THRESHOLD).ok().flatten(),
            KEY_CHANGE_THRESHOLD,
            defaults.change_threshold,
        ),
        0,
        64
    );

    let similarity_threshold = clamp_numeric!(
        parse_or_default(
            facade.get_setting_raw(KEY_SIMILARITY_THRESHOLD).ok().flatten(),
            KEY_SIMILARITY_THRESHOLD,
            defaults.similarity_threshold,
        ),
        0,
        64
    );

    let explore_exploit_epsilon = clamp_numeric!(
        parse_or_default(
            facade.get_setting_raw(KEY_EPSILON).ok().flatten(),
            KEY_EPSILON,
            defaults.explore_exploit_epsilon,
        ),
        0.0,
        1.0
    );

    let max_group_size = clamp_numeric!(
        parse_or_default(
            facade.get_setting_raw(KEY_MAX_GROUP_SIZE).ok().flatten(),
            KEY_MAX_GROUP_SIZE,
            defaults.max_group_size,
        ),
        1,
        50
    );

    let video_capture_duration_secs = clamp_numeric!(
        parse_or_default(
            facade.get_setting_raw(KEY_VIDEO_DURATION).ok().flatten(),
            KEY_VIDEO_DURATION,
            defaults.video_capture_duration_secs,
        ),
        1,
        120
    );

    let snapshot_capture_level = SnapshotCaptureLevel::from_u8(clamp_numeric!(
        parse_or_default(
            facade.get_setting_raw(KEY_SNAPSHOT_CAPTURE_LEVEL).ok().flatten(),
            KEY_SNAPSHOT_CAPTURE_LEVEL,
            defaults.snapshot_capture_level.as_u8(),
        ),
        0,
        2
    ));

    let deterrents_enabled = parse_or_default(
        facade.get_setting_raw(KEY_DETERRENTS_ENABLED).ok().flatten(),
        KEY_DETERRENTS_ENABLED,
        defaults.deterrents_enabled,
    );

    let confidence_threshold = clamp_numeric!(
        parse_or_default(
            facade.get_setting_raw(KEY_CONFIDENCE_THRESHOLD).ok().flatten(),
            KEY_CONFIDENCE_THRESHOLD,
            defaults.confidence_threshold,
        ),
        0.1,
        1.0
    );

    let max_image_size_mb = clamp_numeric!(
        parse_or_default(
            facade.get_setting_raw(KEY_MAX_IMAGE_SIZE_MB).ok().flatten(),
            KEY_MAX_IMAGE_SIZE_MB,
            defaults.max_image_size_mb,
        ),
        1,
        50
    );

    let snapshot_retention_days = clamp_numeric!(
        parse_or_default(
            facade.get_setting_raw(KEY_SNAPSHOT_RETENTION_DAYS).ok().flatten(),
            KEY_SNAPSHOT_RETENTION_DAYS,
            defaults.snapshot_retention_days,
        ),
        1,
        365
    );

    let timezone = facade
        .get_setting_raw(KEY_TIMEZONE)
        .ok()
        .flatten()
        .unwrap_or_else(|| defaults.timezone.clone());

    let user_language = facade
        .get_setting_raw(KEY_USER_LANGUAGE)
        .ok()
        .flatten()
        .unwrap_or_else(|| defaults.user_language.clone());

    Settings {
        detection_interval_secs,
        calls_per_second,
        burst,
        change_threshold,
        similarity_threshold,
        explore_exploit_epsilon,
        max_group_size,
        video_capture_duration_secs,
        snapshot_capture_level,
        deterrents_enabled,
        confidence_threshold,
        max_image_size_mb,
        snapshot_retention_days,
        timezone,
        user_language,
    }
}

/// Caches `Settings` for one tick (§9) so a worker doesn't re-read and re-parse
/// the store on every per-camera subtask within the same iteration.
pub struct SettingsCache {
    ttl: Duration,
    cached: Mutex<Option<(Settings, Instant)>>,
}

impl SettingsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cached: Mutex::new(None),
        }
    }

    /// Returns the cached settings if still within `ttl`, otherwise re-reads
    /// from `facade` and refreshes the cache.
    pub fn get(&self, facade: &Facade) -> Settings {
        let mut cached = self.cached.lock();
        if let Some((settings, read_at)) = cached.as_ref() {
            if read_at.elapsed() < self.ttl {
                return settings.clone();
            }
        }
        let settings = read_settings(facade);
        *cached = Some((settings.clone(), Instant::now()));
        settings
    }
}

impl Default for SettingsCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_settings_use_documented_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let facade = Facade::open(dir.path()).unwrap();
        let settings = read_settings(&facade);
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn out_of_range_value_is_clamped_not_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let facade = Facade::open(dir.path()).unwrap();
        facade.set_setting_raw(KEY_EPSILON, "5.0").unwrap();
        let settings = read_settings(&facade);
        assert_eq!(settings.explore_exploit_epsilon, 1.0);
    }

    #[test]
    fn malformed_value_falls_back_to_default_without_panicking() {
        let dir = tempfile::tempdir().unwrap();
        let facade = Facade::open(dir.path()).unwrap();
        facade.set_setting_raw(KEY_MAX_GROUP_SIZE, "not-a-number").unwrap();
        let settings = read_settings(&facade);
        assert_eq!(settings.max_group_size, Settings::default().max_group_size);
    }

    #[test]
    fn confidence_threshold_below_minimum_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let facade = Facade::open(dir.path()).unwrap();
        facade.set_setting_raw(KEY_CONFIDENCE_THRESHOLD, "0.0").unwrap();
        let settings = read_settings(&facade);
        assert_eq!(settings.confidence_threshold, 0.1);
    }

    #[test]
    fn deterrents_enabled_parses_bool_and_defaults_true() {
        let dir = tempfile::tempdir().unwrap();
        let facade = Facade::open(dir.path()).unwrap();
        assert!(read_settings(&facade).deterrents_enabled);
        facade.set_setting_raw(KEY_DETERRENTS_ENABLED, "false").unwrap();
        assert!(!read_settings(&facade).deterrents_enabled);
    }

    #[test]
    fn snapshot_capture_level_out_of_range_clamps_to_all_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let facade = Facade::open(dir.path()).unwrap();
        facade.set_setting_raw(KEY_SNAPSHOT_CAPTURE_LEVEL, "9").unwrap();
        let settings = read_settings(&facade);
        assert_eq!(settings.snapshot_capture_level, SnapshotCaptureLevel::AllSnapshots);
    }

    #[test]
    fn cache_reuses_value_within_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let facade = Facade::open(dir.path()).unwrap();
        let cache = SettingsCache::new(Duration::from_secs(60));
        let first = cache.get(&facade);
        facade.set_setting_raw(KEY_MAX_GROUP_SIZE, "2").unwrap();
        let second = cache.get(&facade);
        assert_eq!(first, second);
    }
}

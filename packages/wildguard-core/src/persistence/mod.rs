//! Persistence facade (C12): scoped sessions and safe commit over an embedded
//! transactional store, standing in for the excluded SQL/ORM/migrations layer
//! (§1 Non-goals, §9 "ambient persistence substitution").
//!
//! `sled` gives byte-oriented trees with its own write-ahead log; a "session" here
//! is a closure that receives the facade, does its reads/writes against the trees,
//! and is followed by an explicit flush on success. The two aggregate-statistics
//! updates in C6 that must never lose a concurrent write use sled's native
//! multi-tree transaction API instead, which gives genuine atomicity rather than
//! the best-effort semantics of the general `scoped_session` path.

pub mod models;
pub mod settings;

use std::path::Path;

use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};

use crate::error::PersistenceError;
use models::{
    sound_stats_key, time_pattern_key, Camera, Detection, FoeKind, Id, Integration,
    IntegrationStatus, SoundEffectiveness, SoundStatistics, TimeBasedEffectiveness,
};

const TREE_INTEGRATIONS: &str = "integrations";
const TREE_CAMERAS: &str = "cameras";
const TREE_DETECTIONS: &str = "detections";
const TREE_EFFECTIVENESS: &str = "effectiveness";
const TREE_SOUND_STATS: &str = "sound_statistics";
const TREE_TIME_PATTERNS: &str = "time_patterns";
const TREE_SETTINGS: &str = "settings";

/// The embedded-store-backed persistence facade.
pub struct Facade {
    db: sled::Db,
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, PersistenceError> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, PersistenceError> {
    Ok(serde_json::from_slice(bytes)?)
}

impl Facade {
    /// Opens (or creates) the store at `path` (`<data_dir>/wildguard.db`, §6).
    pub fn open(path: &Path) -> Result<Self, PersistenceError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// `scoped_session` (§4.12): runs `f` against this facade; on success the
    /// writes made within it are flushed to disk (the "commit"); on failure
    /// nothing is explicitly flushed and the error propagates.
    pub fn scoped_session<F, T>(&self, f: F) -> Result<T, PersistenceError>
    where
        F: FnOnce(&Self) -> Result<T, PersistenceError>,
    {
        match f(self) {
            Ok(value) => {
                self.db.flush()?;
                Ok(value)
            }
            Err(e) => Err(e),
        }
    }

    /// `safe_commit` (§4.12): attempts to commit (flush), returning whether it
    /// succeeded rather than propagating the error.
    pub fn safe_commit(&self) -> bool {
        match self.db.flush() {
            Ok(_) => true,
            Err(e) => {
                log::error!("safe_commit failed: {e}");
                false
            }
        }
    }

    fn tree(&self, name: &str) -> Result<sled::Tree, PersistenceError> {
        Ok(self.db.open_tree(name)?)
    }

    fn next_id(&self) -> Result<Id, PersistenceError> {
        Ok(self.db.generate_id()?)
    }

    // ---- Integrations --------------------------------------------------

    pub fn insert_integration(&self, mut integration: Integration) -> Result<Id, PersistenceError> {
        let id = self.next_id()?;
        integration.id = id;
        self.tree(TREE_INTEGRATIONS)?
            .insert(id.to_be_bytes(), encode(&integration)?)?;
        Ok(id)
    }

    pub fn get_integration(&self, id: Id) -> Result<Option<Integration>, PersistenceError> {
        match self.tree(TREE_INTEGRATIONS)?.get(id.to_be_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn list_integrations(&self) -> Result<Vec<Integration>, PersistenceError> {
        self.tree(TREE_INTEGRATIONS)?
            .iter()
            .values()
            .map(|v| decode(&v?))
            .collect()
    }

    // ---- Cameras --------------------------------------------------------

    pub fn insert_camera(&self, mut camera: Camera) -> Result<Id, PersistenceError> {
        let id = self.next_id()?;
        camera.id = id;
        self.tree(TREE_CAMERAS)?
            .insert(id.to_be_bytes(), encode(&camera)?)?;
        Ok(id)
    }

    pub fn get_camera(&self, id: Id) -> Result<Option<Camera>, PersistenceError> {
        match self.tree(TREE_CAMERAS)?.get(id.to_be_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn update_camera(&self, camera: &Camera) -> Result<(), PersistenceError> {
        self.tree(TREE_CAMERAS)?
            .insert(camera.id.to_be_bytes(), encode(camera)?)?;
        Ok(())
    }

    /// `active_cameras()` (§4.3): cameras whose Integration is enabled and connected.
    pub fn active_cameras(&self) -> Result<Vec<Camera>, PersistenceError> {
        let integrations: std::collections::HashMap<Id, Integration> = self
            .list_integrations()?
            .into_iter()
            .map(|i| (i.id, i))
            .collect();

        let cameras = self
            .tree(TREE_CAMERAS)?
            .iter()
            .values()
            .map(|v| decode::<Camera>(&v?))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(cameras
            .into_iter()
            .filter(|cam| {
                integrations
                    .get(&cam.integration_id)
                    .is_some_and(|i| i.enabled && i.status == IntegrationStatus::Connected)
            })
            .collect())
    }

    // ---- Detections -------------------------------------------------------

    pub fn insert_detection(&self, mut detection: Detection) -> Result<Id, PersistenceError> {
        let id = self.next_id()?;
        detection.id = id;
        self.tree(TREE_DETECTIONS)?
            .insert(id.to_be_bytes(), encode(&detection)?)?;
        Ok(id)
    }

    pub fn get_detection(&self, id: Id) -> Result<Option<Detection>, PersistenceError> {
        match self.tree(TREE_DETECTIONS)?.get(id.to_be_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn update_detection(&self, detection: &Detection) -> Result<(), PersistenceError> {
        self.tree(TREE_DETECTIONS)?
            .insert(detection.id.to_be_bytes(), encode(detection)?)?;
        Ok(())
    }

    pub fn list_detections(&self) -> Result<Vec<Detection>, PersistenceError> {
        self.tree(TREE_DETECTIONS)?
            .iter()
            .values()
            .map(|v| decode(&v?))
            .collect()
    }

    // ---- Effectiveness aggregates ------------------------------------------

    /// Appends a `SoundEffectiveness` row and atomically updates `SoundStatistics`
    /// and `TimeBasedEffectiveness` for its keys, using a genuine sled transaction
    /// so that two concurrent `record_effectiveness` calls for the same
    /// (pest, sound) or (pest, hour) key never lose an update (§5).
    pub fn record_effectiveness_atomic(
        &self,
        effectiveness: SoundEffectiveness,
    ) -> Result<(), PersistenceError> {
        let effectiveness_tree = self.tree(TREE_EFFECTIVENESS)?;
        let stats_tree = self.tree(TREE_SOUND_STATS)?;
        let patterns_tree = self.tree(TREE_TIME_PATTERNS)?;
        let id = self.next_id()?;

        let mut row = effectiveness;
        row.id = id;

        let result = (&effectiveness_tree, &stats_tree, &patterns_tree).transaction(
            |(eff_tx, stats_tx, patterns_tx)| {
                eff_tx.insert(&id.to_be_bytes(), encode(&row).map_err(abort)?)?;

                let stats_key = sound_stats_key(row.foe_type, &row.sound_file);
                let mut stats = match stats_tx.get(stats_key.as_bytes())? {
                    Some(bytes) => decode::<SoundStatistics>(&bytes).map_err(abort)?,
                    None => SoundStatistics::new(
                        row.foe_type,
                        row.sound_file.clone(),
                        row.timestamp_unix,
                    ),
                };
                apply_effectiveness_to_stats(&mut stats, &row);
                stats_tx.insert(stats_key.as_bytes(), encode(&stats).map_err(abort)?)?;

                let hour = row.timestamp_unix_to_hour();
                let pattern_key = time_pattern_key(row.foe_type, hour);
                let mut pattern = match patterns_tx.get(pattern_key.as_bytes())? {
                    Some(bytes) => decode::<TimeBasedEffectiveness>(&bytes).map_err(abort)?,
                    None => TimeBasedEffectiveness::new(row.foe_type, hour),
                };
                apply_effectiveness_to_pattern(&mut pattern, &row, &stats);
                patterns_tx.insert(pattern_key.as_bytes(), encode(&pattern).map_err(abort)?)?;

                Ok(())
            },
        );

        match result {
            Ok(()) => {
                self.db.flush()?;
                Ok(())
            }
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(e.into()),
        }
    }

    pub fn get_sound_statistics(
        &self,
        foe_type: FoeKind,
        sound_file: &str,
    ) -> Result<Option<SoundStatistics>, PersistenceError> {
        let key = sound_stats_key(foe_type, sound_file);
        match self.tree(TREE_SOUND_STATS)?.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn list_sound_statistics(
        &self,
        foe_type: Option<FoeKind>,
    ) -> Result<Vec<SoundStatistics>, PersistenceError> {
        let all: Vec<SoundStatistics> = self
            .tree(TREE_SOUND_STATS)?
            .iter()
            .values()
            .map(|v| decode(&v?))
            .collect::<Result<_, _>>()?;
        Ok(match foe_type {
            Some(kind) => all.into_iter().filter(|s| s.foe_type == kind).collect(),
            None => all,
        })
    }

    pub fn get_time_pattern(
        &self,
        foe_type: FoeKind,
        hour: u8,
    ) -> Result<Option<TimeBasedEffectiveness>, PersistenceError> {
        let key = time_pattern_key(foe_type, hour);
        match self.tree(TREE_TIME_PATTERNS)?.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn list_time_patterns(
        &self,
        foe_type: FoeKind,
    ) -> Result<Vec<TimeBasedEffectiveness>, PersistenceError> {
        let mut patterns: Vec<TimeBasedEffectiveness> = self
            .tree(TREE_TIME_PATTERNS)?
            .iter()
            .values()
            .map(|v| decode(&v?))
            .collect::<Result<Vec<_>, _>>()?;
        patterns.retain(|p| p.foe_type == foe_type);
        patterns.sort_by_key(|p| p.hour_of_day);
        Ok(patterns)
    }

    // ---- Settings ---------------------------------------------------------

    pub fn get_setting_raw(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        match self.tree(TREE_SETTINGS)?.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            None => Ok(None),
        }
    }

    pub fn set_setting_raw(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        self.tree(TREE_SETTINGS)?
            .insert(key.as_bytes(), value.as_bytes())?;
        self.db.flush()?;
        Ok(())
    }
}

fn abort<E: std::fmt::Display>(e: E) -> ConflictableTransactionError<PersistenceError> {
    ConflictableTransactionError::Abort(PersistenceError::TransactionAborted(e.to_string()))
}

impl SoundEffectiveness {
    fn timestamp_unix_to_hour(&self) -> u8 {
        use chrono::{TimeZone, Utc};
        Utc.timestamp_opt(self.timestamp_unix, 0)
            .single()
            .map(|dt| {
                use chrono::Timelike;
                dt.hour() as u8
            })
            .unwrap_or(0)
    }
}

/// Mutates `stats` in place to reflect one more `SoundEffectiveness` row.
/// `average_effectiveness` uses the running-mean update `new = old + (x -
/// old)/n`, which is the same value replaying the full history and
/// recomputing the arithmetic mean would produce, to floating-point
/// tolerance, without the O(n) history walk.
fn apply_effectiveness_to_stats(stats: &mut SoundStatistics, row: &SoundEffectiveness) {
    use models::DeterrentResult;

    stats.total_uses += 1;
    match row.result {
        DeterrentResult::Success => stats.successful_uses += 1,
        DeterrentResult::Partial => stats.partial_uses += 1,
        DeterrentResult::Failure => stats.failed_uses += 1,
        DeterrentResult::Unknown => {}
    }
    stats.success_rate = stats.successful_uses as f64 / stats.total_uses as f64;
    stats.last_used_unix = row.timestamp_unix;

    // Recompute the mean incrementally (equivalent to replaying history since we
    // only ever add rows, never remove them): new_mean = old_mean + (x - old_mean)/n.
    let n = stats.total_uses as f64;
    stats.average_effectiveness += (row.effectiveness_score - stats.average_effectiveness) / n;
}

fn apply_effectiveness_to_pattern(
    pattern: &mut TimeBasedEffectiveness,
    row: &SoundEffectiveness,
    updated_stats: &SoundStatistics,
) {
    use models::DeterrentResult;

    pattern.total_detections += 1;
    if row.result == DeterrentResult::Success {
        pattern.successful_deterrents += 1;
    }

    if pattern.best_sound.is_none() || updated_stats.success_rate > pattern.best_sound_success_rate
    {
        pattern.best_sound = Some(row.sound_file.clone());
        pattern.best_sound_success_rate = updated_stats.success_rate;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use models::{CameraStatus, DeterrentResult, PlaybackMethod};

    fn temp_facade() -> (Facade, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let facade = Facade::open(dir.path()).unwrap();
        (facade, dir)
    }

    fn sample_row(foe_type: FoeKind, sound_file: &str, result: DeterrentResult, score: f64) -> SoundEffectiveness {
        SoundEffectiveness {
            id: 0,
            detection_id: 1,
            foe_type,
            sound_file: sound_file.to_string(),
            playback_method: PlaybackMethod::Camera,
            foes_before: 1,
            foes_after: 0,
            confidence_before: 0.9,
            confidence_after: 0.0,
            wait_duration_secs: 10,
            result,
            effectiveness_score: score,
            follow_up_image_path: None,
            timestamp_unix: 1_700_000_000,
        }
    }

    #[test]
    fn active_cameras_filters_by_integration_status() {
        let (facade, _dir) = temp_facade();
        let connected = Integration {
            id: 0,
            name: "front".into(),
            kind: "unifi".into(),
            enabled: true,
            status: IntegrationStatus::Connected,
            config: serde_json::json!({}),
        };
        let disconnected = Integration {
            id: 0,
            name: "back".into(),
            kind: "unifi".into(),
            enabled: true,
            status: IntegrationStatus::Disconnected,
            config: serde_json::json!({}),
        };
        let connected_id = facade.insert_integration(connected).unwrap();
        let disconnected_id = facade.insert_integration(disconnected).unwrap();

        facade
            .insert_camera(Camera {
                id: 0,
                integration_id: connected_id,
                name: "online-cam".into(),
                status: CameraStatus::Online,
                provider_id: "p1".into(),
                capabilities: Default::default(),
                last_image_hash: None,
            })
            .unwrap();
        facade
            .insert_camera(Camera {
                id: 0,
                integration_id: disconnected_id,
                name: "offline-cam".into(),
                status: CameraStatus::Online,
                provider_id: "p2".into(),
                capabilities: Default::default(),
                last_image_hash: None,
            })
            .unwrap();

        let active = facade.active_cameras().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "online-cam");
    }

    #[test]
    fn record_effectiveness_updates_aggregates_atomically() {
        let (facade, _dir) = temp_facade();
        facade
            .record_effectiveness_atomic(sample_row(FoeKind::Rats, "rat_a.wav", DeterrentResult::Success, 1.0))
            .unwrap();
        facade
            .record_effectiveness_atomic(sample_row(FoeKind::Rats, "rat_a.wav", DeterrentResult::Failure, 0.0))
            .unwrap();

        let stats = facade
            .get_sound_statistics(FoeKind::Rats, "rat_a.wav")
            .unwrap()
            .unwrap();
        assert_eq!(stats.total_uses, 2);
        assert_eq!(stats.successful_uses, 1);
        assert!((stats.success_rate - 0.5).abs() < 1e-9);
        assert!((stats.average_effectiveness - 0.5).abs() < 1e-9);
    }

    #[test]
    fn best_sound_tracks_highest_success_rate_sound() {
        let (facade, _dir) = temp_facade();
        facade
            .record_effectiveness_atomic(sample_row(FoeKind::Crows, "a.mp3", DeterrentResult::Success, 1.0))
            .unwrap();
        facade
            .record_effectiveness_atomic(sample_row(FoeKind::Crows, "b.mp3", DeterrentResult::Failure, 0.0))
            .unwrap();

        let hour = sample_row(FoeKind::Crows, "a.mp3", DeterrentResult::Success, 1.0)
            .timestamp_unix_to_hour();
        let pattern = facade.get_time_pattern(FoeKind::Crows, hour).unwrap().unwrap();
        assert_eq!(pattern.best_sound.as_deref(), Some("a.mp3"));
    }

    #[test]
    fn scoped_session_flushes_on_success() {
        let (facade, _dir) = temp_facade();
        let result: Result<(), PersistenceError> = facade.scoped_session(|f| {
            f.set_setting_raw("detection_interval", "5")?;
            Ok(())
        });
        assert!(result.is_ok());
        assert_eq!(
            facade.get_setting_raw("detection_interval").unwrap(),
            Some("5".to_string())
        );
    }
}

//! Effectiveness tracking (C6): scoring one deterrent attempt and querying the
//! aggregates the deterrent selector (C7) reads back.
//!
//! Grounded on the source's `EffectivenessTracker`: `record_effectiveness`
//! classifies the outcome from before/after foe counts, scores it, and the
//! facade's atomic transaction (§5) folds the result into per-sound and
//! per-hour aggregates. `get_best_sound_for_foe` prefers the time-of-day
//! pattern's best sound, falling back to the highest all-time
//! `average_effectiveness` sound; `get_statistics_summary` mirrors the
//! source's per-foe rollup with a capped, filtered top-performers list.

use crate::persistence::models::{
    DeterrentResult, FoeKind, PlaybackMethod, SoundEffectiveness, SoundStatistics,
};
use crate::persistence::Facade;

/// Minimum uses and average effectiveness for a sound to count as a "top
/// performer" in the statistics summary (§4.6).
const TOP_PERFORMER_MIN_USES: u64 = 5;
const TOP_PERFORMER_MIN_EFFECTIVENESS: f64 = 0.7;
const TOP_PERFORMER_LIMIT: usize = 10;

/// `calculate_effectiveness_score` (§4.6): blends the fractional foe-count
/// drop with the fractional confidence drop, then forces the score to 0 if
/// the follow-up found as many or more foes than before.
fn effectiveness_score(foes_before: u32, foes_after: u32, confidence_before: f32, confidence_after: f32) -> f64 {
    if foes_before == 0 {
        return 0.0;
    }
    if foes_after == 0 {
        return 1.0;
    }

    let count_before = foes_before as f64;
    let count_after = foes_after as f64;
    let r = (count_before - count_after) / count_before;
    let c = if confidence_before > 0.0 {
        1.0 - (confidence_after as f64 / confidence_before as f64)
    } else {
        1.0
    };

    let mut score = ((r + c) / 2.0).clamp(0.0, 1.0);
    if foes_after >= foes_before {
        score = 0.0;
    }
    score
}

fn classify_result(foes_before: u32, foes_after: u32) -> DeterrentResult {
    if foes_after == 0 {
        DeterrentResult::Success
    } else if foes_after < foes_before {
        DeterrentResult::Partial
    } else {
        DeterrentResult::Failure
    }
}

/// Records one deterrent attempt's effectiveness and folds it into the
/// per-sound and per-hour aggregates atomically.
pub fn record_effectiveness(
    facade: &Facade,
    detection_id: u64,
    foe_type: FoeKind,
    sound_file: &str,
    playback_method: PlaybackMethod,
    foes_before: u32,
    foes_after: u32,
    confidence_before: f32,
    confidence_after: f32,
    wait_duration_secs: u32,
    follow_up_image_path: Option<String>,
) -> Result<SoundEffectiveness, crate::error::PersistenceError> {
    let row = SoundEffectiveness {
        id: 0,
        detection_id,
        foe_type,
        sound_file: sound_file.to_string(),
        playback_method,
        foes_before,
        foes_after,
        confidence_before,
        confidence_after,
        wait_duration_secs,
        result: classify_result(foes_before, foes_after),
        effectiveness_score: effectiveness_score(foes_before, foes_after, confidence_before, confidence_after),
        follow_up_image_path,
        timestamp_unix: chrono::Utc::now().timestamp(),
    };

    facade.record_effectiveness_atomic(row.clone())?;

    log::info!(
        "Deterrent result for {foe_type:?} with {sound_file}: {:?} (score {:.2})",
        row.result,
        row.effectiveness_score
    );

    Ok(row)
}

/// `get_best_sound_for_foe` (§4.6): prefers the current hour's time pattern
/// best sound; falls back to the sound with the highest all-time
/// `average_effectiveness` for this foe type.
pub fn best_sound_for_foe(
    facade: &Facade,
    foe_type: FoeKind,
    hour: u8,
) -> Result<Option<String>, crate::error::PersistenceError> {
    if let Some(pattern) = facade.get_time_pattern(foe_type, hour)? {
        if let Some(sound) = pattern.best_sound {
            return Ok(Some(sound));
        }
    }

    let stats = facade.list_sound_statistics(Some(foe_type))?;
    Ok(best_by_average_effectiveness(&stats).map(|s| s.sound_file.clone()))
}

fn best_by_average_effectiveness(stats: &[SoundStatistics]) -> Option<&SoundStatistics> {
    stats
        .iter()
        .max_by(|a, b| a.average_effectiveness.total_cmp(&b.average_effectiveness))
}

/// `get_least_tested_sound` (§4.6, used by the explore branch of C7): the
/// candidate sound with the fewest recorded uses, with untested sounds (no
/// `SoundStatistics` row at all) always preferred over any tested sound.
pub fn least_tested_sound(
    facade: &Facade,
    foe_type: FoeKind,
    candidates: &[String],
) -> Result<Option<String>, crate::error::PersistenceError> {
    if candidates.is_empty() {
        return Ok(None);
    }

    let stats = facade.list_sound_statistics(Some(foe_type))?;
    let uses = |name: &str| stats.iter().find(|s| s.sound_file == name).map_or(0, |s| s.total_uses);

    Ok(candidates
        .iter()
        .min_by_key(|name| uses(name))
        .cloned())
}

/// Per-foe-type rollup row for the statistics summary (§4.6).
#[derive(Debug, Clone)]
pub struct FoeSummary {
    pub foe_type: FoeKind,
    pub sounds_tested: usize,
    pub total_uses: u64,
    pub overall_success_rate: f64,
    pub best_sound: Option<String>,
}

/// `get_statistics_summary` (§4.6): per-foe rollups plus a capped
/// top-performers list across all foe types.
pub fn statistics_summary(
    facade: &Facade,
    foe_type: Option<FoeKind>,
) -> Result<(Vec<FoeSummary>, Vec<SoundStatistics>), crate::error::PersistenceError> {
    let all_stats = facade.list_sound_statistics(foe_type)?;

    let mut by_foe: std::collections::HashMap<FoeKind, Vec<&SoundStatistics>> =
        std::collections::HashMap::new();
    for stat in &all_stats {
        by_foe.entry(stat.foe_type).or_default().push(stat);
    }

    let mut summaries = Vec::new();
    for (kind, stats) in &by_foe {
        let total_uses: u64 = stats.iter().map(|s| s.total_uses).sum();
        let successful: u64 = stats.iter().map(|s| s.successful_uses).sum();
        let overall_success_rate = if total_uses > 0 {
            successful as f64 / total_uses as f64
        } else {
            0.0
        };
        let best_sound = best_by_average_effectiveness(
            &stats.iter().map(|s| (*s).clone()).collect::<Vec<_>>(),
        )
        .map(|s| s.sound_file.clone());

        summaries.push(FoeSummary {
            foe_type: *kind,
            sounds_tested: stats.len(),
            total_uses,
            overall_success_rate,
            best_sound,
        });
    }

    let mut top_performers: Vec<SoundStatistics> = all_stats
        .into_iter()
        .filter(|s| s.total_uses >= TOP_PERFORMER_MIN_USES && s.average_effectiveness >= TOP_PERFORMER_MIN_EFFECTIVENESS)
        .collect();
    top_performers.sort_by(|a, b| b.average_effectiveness.total_cmp(&a.average_effectiveness));
    top_performers.truncate(TOP_PERFORMER_LIMIT);

    Ok((summaries, top_performers))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_foe_drop_scores_one() {
        assert_eq!(effectiveness_score(3, 0, 0.9, 0.0), 1.0);
        assert_eq!(classify_result(3, 0), DeterrentResult::Success);
    }

    #[test]
    fn partial_drop_with_matching_confidence_drop_scores_proportionally() {
        // r = (4-2)/4 = 0.5, c = 1 - (0.3/0.9) = 0.667, score = min(1, (0.5+0.667)/2) = 0.583
        let score = effectiveness_score(4, 2, 0.9, 0.3);
        assert!((score - 0.5833333333333333).abs() < 1e-9);
        assert_eq!(classify_result(4, 2), DeterrentResult::Partial);
    }

    #[test]
    fn no_change_scores_zero() {
        assert_eq!(effectiveness_score(2, 2, 0.8, 0.8), 0.0);
        assert_eq!(classify_result(2, 2), DeterrentResult::Failure);
    }

    #[test]
    fn increase_in_foe_count_scores_zero_even_if_confidence_dropped() {
        assert_eq!(effectiveness_score(1, 3, 0.9, 0.1), 0.0);
        assert_eq!(classify_result(1, 3), DeterrentResult::Failure);
    }

    #[test]
    fn zero_confidence_before_treats_confidence_term_as_full_drop() {
        // r = (2-1)/2 = 0.5, c = 1 (since conf_before == 0), score = min(1, 0.75) = 0.75
        let score = effectiveness_score(2, 1, 0.0, 0.0);
        assert!((score - 0.75).abs() < 1e-9);
    }

    #[test]
    fn best_sound_prefers_time_pattern_over_all_time_average() {
        let dir = tempfile::tempdir().unwrap();
        let facade = Facade::open(dir.path()).unwrap();

        record_effectiveness(
            &facade, 1, FoeKind::Crows, "loud.mp3", PlaybackMethod::Camera,
            3, 0, 0.9, 0.0, 10, None,
        ).unwrap();
        record_effectiveness(
            &facade, 2, FoeKind::Crows, "quiet.mp3", PlaybackMethod::Camera,
            3, 3, 0.9, 0.9, 10, None,
        ).unwrap();

        let hour = chrono::Utc::now().format("%H").to_string().parse::<u8>().unwrap();
        let best = best_sound_for_foe(&facade, FoeKind::Crows, hour).unwrap();
        assert_eq!(best.as_deref(), Some("loud.mp3"));
    }

    #[test]
    fn least_tested_sound_prefers_untested_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let facade = Facade::open(dir.path()).unwrap();
        record_effectiveness(
            &facade, 1, FoeKind::Rats, "known.wav", PlaybackMethod::Local,
            2, 0, 0.9, 0.0, 10, None,
        ).unwrap();

        let candidates = vec!["known.wav".to_string(), "never_tried.wav".to_string()];
        let chosen = least_tested_sound(&facade, FoeKind::Rats, &candidates).unwrap();
        assert_eq!(chosen.as_deref(), Some("never_tried.wav"));
    }

    #[test]
    fn summary_excludes_sounds_below_top_performer_thresholds() {
        let dir = tempfile::tempdir().unwrap();
        let facade = Facade::open(dir.path()).unwrap();
        // Only two uses recorded: below TOP_PERFORMER_MIN_USES (5).
        record_effectiveness(
            &facade, 1, FoeKind::Pigeons, "a.mp3", PlaybackMethod::Camera,
            2, 0, 0.9, 0.0, 10, None,
        ).unwrap();
        record_effectiveness(
            &facade, 2, FoeKind::Pigeons, "a.mp3", PlaybackMethod::Camera,
            2, 0, 0.9, 0.0, 10, None,
        ).unwrap();

        let (summaries, top_performers) = statistics_summary(&facade, None).unwrap();
        assert_eq!(summaries.len(), 1);
        assert!(top_performers.is_empty());
    }
}

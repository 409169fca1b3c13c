//! Deterrent sound selection (C7): epsilon-greedy choice between the
//! best-known sound for a foe (exploit) and the least-tested candidate
//! (explore).
//!
//! Grounded on the source's `DetectionWorker._check_camera` explore/exploit
//! branch, generalized from its literal `random.random() < 0.5` coin flip to
//! a configurable `explore_exploit_epsilon` setting (§9's resolved Open
//! Question): with probability `epsilon` explore, otherwise exploit. Either
//! branch falls back to a uniform-random pick from the available sounds if
//! it can't name a specific one (no statistics yet, or the named sound file
//! is no longer present on disk).

use rand::Rng;

use crate::effectiveness;
use crate::persistence::models::FoeKind;
use crate::persistence::Facade;

/// Picks a sound file name for `foe_type` from `available_sounds`, or `None`
/// if there are no candidates at all.
pub fn select_sound(
    facade: &Facade,
    foe_type: FoeKind,
    hour: u8,
    available_sounds: &[String],
    epsilon: f64,
    rng: &mut impl Rng,
) -> Option<String> {
    if available_sounds.is_empty() {
        return None;
    }

    let explore = rng.gen_bool(epsilon.clamp(0.0, 1.0));

    let chosen = if explore {
        effectiveness::least_tested_sound(facade, foe_type, available_sounds)
            .ok()
            .flatten()
    } else {
        effectiveness::best_sound_for_foe(facade, foe_type, hour)
            .ok()
            .flatten()
            .filter(|sound| available_sounds.contains(sound))
    };

    chosen.or_else(|| random_sound(available_sounds, rng))
}

fn random_sound(available_sounds: &[String], rng: &mut impl Rng) -> Option<String> {
    if available_sounds.is_empty() {
        return None;
    }
    let index = rng.gen_range(0..available_sounds.len());
    Some(available_sounds[index].clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::models::PlaybackMethod;
    use rand::rngs::mock::StepRng;

    #[test]
    fn no_available_sounds_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let facade = Facade::open(dir.path()).unwrap();
        let mut rng = StepRng::new(0, 1);
        let chosen = select_sound(&facade, FoeKind::Rats, 12, &[], 0.5, &mut rng);
        assert_eq!(chosen, None);
    }

    #[test]
    fn exploit_branch_falls_back_to_random_with_no_statistics() {
        let dir = tempfile::tempdir().unwrap();
        let facade = Facade::open(dir.path()).unwrap();
        let candidates = vec!["a.wav".to_string(), "b.wav".to_string()];
        // epsilon 0.0 never explores; StepRng's gen_bool(0.0) is always false.
        let mut rng = StepRng::new(0, 1);
        let chosen = select_sound(&facade, FoeKind::Cats, 9, &candidates, 0.0, &mut rng);
        assert!(chosen.is_some());
        assert!(candidates.contains(&chosen.unwrap()));
    }

    #[test]
    fn exploit_branch_prefers_known_best_sound() {
        let dir = tempfile::tempdir().unwrap();
        let facade = Facade::open(dir.path()).unwrap();
        effectiveness::record_effectiveness(
            &facade, 1, FoeKind::Herons, "splash.mp3", PlaybackMethod::Camera,
            3, 0, 0.9, 0.0, 10, None,
        ).unwrap();

        let hour = chrono::Utc::now().format("%H").to_string().parse::<u8>().unwrap();
        let candidates = vec!["splash.mp3".to_string(), "other.mp3".to_string()];
        let mut rng = StepRng::new(0, 1);
        let chosen = select_sound(&facade, FoeKind::Herons, hour, &candidates, 0.0, &mut rng);
        assert_eq!(chosen.as_deref(), Some("splash.mp3"));
    }
}

//! Local sound playback (C8): listing available sound files per pest type and
//! playing one through whatever OS-level player is present.
//!
//! Grounded on the source's `SoundPlayer`: sounds live under
//! `<sounds_dir>/<pest-kind>/*.{mp3,wav}`, partial downloads (`.crdownload`)
//! are filtered out, and playback probes `afplay` (native duration support)
//! before falling back to `timeout`-wrapped `paplay`/`aplay`/`mpg123`, and
//! finally to those same players uncapped if `timeout` itself isn't present.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::Rng;
use tokio::process::Command;

use crate::persistence::models::FoeKind;

/// `get_available_sounds` (§4.8): every non-partial `.mp3`/`.wav` file under
/// `<sounds_dir>/<foe_type>/`.
pub fn available_sounds(sounds_dir: &Path, foe_type: FoeKind) -> Vec<String> {
    let dir = sounds_dir.join(foe_type.dir_name());
    let Ok(entries) = std::fs::read_dir(&dir) else {
        log::warn!("Sounds directory not found: {}", dir.display());
        return Vec::new();
    };

    entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let path = entry.path();
            let name = path.file_name()?.to_str()?.to_string();
            if name.ends_with(".crdownload") {
                return None;
            }
            let is_sound = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("mp3") | Some("wav")
            );
            is_sound.then_some(name)
        })
        .collect()
}

/// `_select_random_sound` (§4.8).
pub fn select_random_sound(available: &[String], rng: &mut impl Rng) -> Option<String> {
    if available.is_empty() {
        return None;
    }
    Some(available[rng.gen_range(0..available.len())].clone())
}

async fn command_exists(command: &str) -> bool {
    Command::new("which")
        .arg(command)
        .output()
        .await
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// `play_sound` (§4.8): plays `sound_path` locally, capping playback at
/// `max_duration` where the available tooling allows it.
pub async fn play_sound(sound_path: &Path, max_duration: Duration) -> bool {
    if cfg!(target_os = "windows") {
        return play_windows(sound_path).await;
    }
    play_posix(sound_path, max_duration).await
}

async fn play_windows(sound_path: &Path) -> bool {
    match Command::new("cmd")
        .arg("/C")
        .arg("start")
        .arg(sound_path)
        .status()
        .await
    {
        Ok(status) => status.success(),
        Err(e) => {
            log::error!("Failed to start sound playback: {e}");
            false
        }
    }
}

async fn play_posix(sound_path: &Path, max_duration: Duration) -> bool {
    if command_exists("afplay").await {
        let seconds = max_duration.as_secs().to_string();
        return run_player("afplay", &["-t", &seconds, &path_str(sound_path)]).await;
    }

    let candidate_players = ["paplay", "aplay", "mpg123"];
    let has_timeout = command_exists("timeout").await;

    for player in candidate_players {
        if !command_exists(player).await {
            continue;
        }
        if has_timeout {
            let seconds = max_duration.as_secs().to_string();
            return run_player("timeout", &[&seconds, player, &path_str(sound_path)]).await;
        }
        log::warn!("`timeout` not available, playing {player} without a duration cap");
        return run_player(player, &[&path_str(sound_path)]).await;
    }

    log::error!("No suitable audio player found for {}", sound_path.display());
    false
}

fn path_str(path: &Path) -> String {
    path.display().to_string()
}

async fn run_player(program: &str, args: &[&str]) -> bool {
    match Command::new(program).args(args).status().await {
        Ok(status) => status.success(),
        Err(e) => {
            log::error!("Failed to run {program}: {e}");
            false
        }
    }
}

/// `list_sounds_by_type` (§4.8): a per-pest-kind inventory, for diagnostics
/// and onboarding rather than the hot path.
pub fn list_sounds_by_type(sounds_dir: &Path) -> Vec<(String, Vec<String>)> {
    let Ok(entries) = std::fs::read_dir(sounds_dir) else {
        return Vec::new();
    };

    let mut result: Vec<(String, Vec<String>)> = entries
        .filter_map(Result::ok)
        .filter(|e| e.path().is_dir())
        .filter_map(|e| {
            let name = e.file_name().to_str()?.to_string();
            if name.starts_with('.') {
                return None;
            }
            Some((name, e.path()))
        })
        .map(|(name, path): (String, PathBuf)| {
            let files: Vec<String> = std::fs::read_dir(&path)
                .map(|entries| {
                    entries
                        .filter_map(Result::ok)
                        .filter_map(|e| e.file_name().to_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            (name, files)
        })
        .collect();

    result.sort_by(|a, b| a.0.cmp(&b.0));
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sounds_directory_returns_empty_not_error() {
        let sounds = available_sounds(Path::new("/nonexistent/sounds"), FoeKind::Rats);
        assert!(sounds.is_empty());
    }

    #[test]
    fn partial_downloads_are_filtered_out() {
        let dir = tempfile::tempdir().unwrap();
        let rats_dir = dir.path().join("rats");
        std::fs::create_dir_all(&rats_dir).unwrap();
        std::fs::write(rats_dir.join("a.mp3"), b"x").unwrap();
        std::fs::write(rats_dir.join("b.mp3.crdownload"), b"x").unwrap();
        std::fs::write(rats_dir.join("notes.txt"), b"x").unwrap();

        let sounds = available_sounds(dir.path(), FoeKind::Rats);
        assert_eq!(sounds, vec!["a.mp3".to_string()]);
    }

    #[test]
    fn select_random_sound_returns_none_for_empty_list() {
        let mut rng = rand::rngs::mock::StepRng::new(0, 1);
        assert_eq!(select_random_sound(&[], &mut rng), None);
    }
}

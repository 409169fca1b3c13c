//! Snapshot and video retention sweep (§4.4), grounded on the source's
//! `VideoCapture.cleanup_old_videos`: delete files older than a retention
//! window, keyed off each file's modification time rather than a filename
//! timestamp. The source only sweeps its video directory; this build applies
//! the same sweep to snapshots too, since `snapshot_retention_days` is named
//! generically rather than video-specific (§6).

use std::path::Path;
use std::time::{Duration, SystemTime};

/// Deletes every file directly under `dir` whose modification time is older
/// than `retention_days`. Missing directories and per-file IO errors are
/// logged and skipped rather than treated as fatal, matching the source's
/// broad `except Exception` around the whole sweep.
pub async fn sweep_expired_files(dir: &Path, retention_days: u32) -> usize {
    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs(retention_days as u64 * 24 * 60 * 60));
    let Some(cutoff) = cutoff else {
        log::warn!("Retention window too large to compute a cutoff, skipping sweep of {}", dir.display());
        return 0;
    };

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
        Err(e) => {
            log::error!("Failed to read directory {} for retention sweep: {e}", dir.display());
            return 0;
        }
    };

    let mut deleted = 0;
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                log::error!("Error walking {} during retention sweep: {e}", dir.display());
                break;
            }
        };

        let path = entry.path();
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(e) => {
                log::warn!("Failed to stat {} during retention sweep: {e}", path.display());
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }

        let modified = match metadata.modified() {
            Ok(modified) => modified,
            Err(e) => {
                log::warn!("Failed to read mtime of {}: {e}", path.display());
                continue;
            }
        };

        if modified < cutoff {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    log::info!("Deleted expired file: {}", path.display());
                    deleted += 1;
                }
                Err(e) => log::error!("Failed to delete expired file {}: {e}", path.display()),
            }
        }
    }

    deleted
}

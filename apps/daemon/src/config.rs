//! Daemon configuration.
//!
//! Supports loading from YAML files with environment variable overrides
//! (§6, ambient configuration layer - distinct from the runtime `Settings`
//! the persistence facade exposes for values like the detection interval,
//! which live in the store and can change without a restart).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Daemon configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Directory for the persistence store and generated media.
    /// Override: `WILDGUARD_DATA_DIR`
    pub data_dir: PathBuf,

    /// Directory of deterrent sound files, laid out as `<dir>/<pest-kind>/*.{mp3,wav}`.
    /// Override: `WILDGUARD_SOUNDS_DIR`
    pub sounds_dir: Option<PathBuf>,

    /// Directory where captured snapshots are written.
    /// Override: `WILDGUARD_SNAPSHOTS_DIR`
    pub snapshots_dir: Option<PathBuf>,

    /// Directory where captured deterrent videos are written.
    /// Override: `WILDGUARD_VIDEOS_DIR`
    pub videos_dir: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            sounds_dir: None,
            snapshots_dir: None,
            videos_dir: None,
        }
    }
}

impl DaemonConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("WILDGUARD_SOUNDS_DIR") {
            self.sounds_dir = Some(PathBuf::from(val));
        }
        if let Ok(val) = std::env::var("WILDGUARD_SNAPSHOTS_DIR") {
            self.snapshots_dir = Some(PathBuf::from(val));
        }
        if let Ok(val) = std::env::var("WILDGUARD_VIDEOS_DIR") {
            self.videos_dir = Some(PathBuf::from(val));
        }

        // Note: WILDGUARD_DATA_DIR is handled by clap via #[arg(env = ...)] in main.rs
    }

    /// Converts to wildguard-core's `DataPaths`, defaulting the media
    /// directories to subdirectories of `data_dir` when not set explicitly.
    pub fn to_data_paths(&self) -> wildguard_core::DataPaths {
        wildguard_core::DataPaths {
            sounds_dir: self
                .sounds_dir
                .clone()
                .unwrap_or_else(|| self.data_dir.join("sounds")),
            snapshots_dir: self
                .snapshots_dir
                .clone()
                .unwrap_or_else(|| self.data_dir.join("snapshots")),
            videos_dir: self
                .videos_dir
                .clone()
                .unwrap_or_else(|| self.data_dir.join("videos")),
            data_dir: self.data_dir.clone(),
        }
    }
}

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::acceptance::DEFAULT_RETRIES;
use super::render::Quality;
use crate::common::paths;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChronoConfig {
    /// How fast the anchor moves through each source relative to the target timeline
    pub speed: f64,
    /// Fraction of a source the jitter window covers around the anchor
    pub scope: f64,
}

impl Default for ChronoConfig {
    fn default() -> Self {
        Self {
            speed: 1.0,
            scope: 1.0,
        }
    }
}

/// Seconds added to every clip length, compensating for encoder frame alignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OffsetConfig {
    pub reencode: f64,
    pub increment: f64,
    pub mixed: f64,
}

impl Default for OffsetConfig {
    fn default() -> Self {
        Self {
            reencode: -0.0415,
            increment: -0.0245,
            mixed: -0.045,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Scene score above which a frame counts as a cut
    pub cuts_threshold: f64,
    /// Scene score above which a frame counts as fast motion
    pub pace_threshold: f64,
    /// Share of fast frames that makes a clip fast
    pub pace_rate: f64,
    /// Command judging a still frame for faces; exit status 0 means found
    pub face_command: Option<String>,
    /// Command judging a still frame for on-screen text; exit status 0 means found
    pub text_command: Option<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            cuts_threshold: 0.05,
            pace_threshold: 0.02,
            pace_rate: 0.2,
            face_command: None,
            text_command: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Command printing audio feature points in seconds; `{}` is replaced by the audio path
    pub command: Option<String>,
    /// Scene score threshold for cut detection in source videos
    pub scene_threshold: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            command: None,
            scene_threshold: 0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedupConfig {
    pub bpm: f64,
    /// Ramps per beat
    pub freq: f64,
}

impl Default for SpeedupConfig {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            freq: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MontageConfig {
    pub retries: usize,
    /// Acceptance workers; chronological selection always uses one
    pub threads: usize,
    pub seed: u64,
    pub quality: Quality,
    /// Preferred source height when resolving remote videos
    pub videos_height: Option<u32>,
    /// Boundaries closer than this are merged
    pub min_interval: f64,
    pub chrono: ChronoConfig,
    pub offsets: OffsetConfig,
    pub filters: FilterConfig,
    pub detector: DetectorConfig,
    pub speedup: SpeedupConfig,
}

impl Default for MontageConfig {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            threads: default_threads(),
            seed: 0,
            quality: Quality::default(),
            videos_height: Some(1080),
            min_interval: 0.2,
            chrono: ChronoConfig::default(),
            offsets: OffsetConfig::default(),
            filters: FilterConfig::default(),
            detector: DetectorConfig::default(),
            speedup: SpeedupConfig::default(),
        }
    }
}

fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() { value } else { fallback }
}

fn positive_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        fallback
    }
}

impl MontageConfig {
    pub fn load() -> Result<Self> {
        Self::load_from_path(paths::config_file_path()?)
    }

    /// Load, creating the file with defaults when it does not exist yet.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            let config = Self::default();
            config.save_to_path(path)?;
            return Ok(config);
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config.sanitized())
    }

    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating config directory {}", parent.display()))?;
        }

        let toml = toml::to_string_pretty(self).context("serializing config")?;
        fs::write(path, toml).with_context(|| format!("writing config to {}", path.display()))?;
        Ok(())
    }

    /// Replace values that would break a run with their defaults.
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if self.threads == 0 {
            self.threads = defaults.threads;
        }
        self.min_interval = finite_or(self.min_interval, defaults.min_interval).max(0.0);

        self.chrono.speed = positive_or(self.chrono.speed, defaults.chrono.speed);
        self.chrono.scope = positive_or(self.chrono.scope, defaults.chrono.scope).min(1.0);

        self.offsets.reencode = finite_or(self.offsets.reencode, defaults.offsets.reencode);
        self.offsets.increment = finite_or(self.offsets.increment, defaults.offsets.increment);
        self.offsets.mixed = finite_or(self.offsets.mixed, defaults.offsets.mixed);

        let filters = &mut self.filters;
        filters.cuts_threshold =
            positive_or(filters.cuts_threshold, defaults.filters.cuts_threshold);
        filters.pace_threshold =
            positive_or(filters.pace_threshold, defaults.filters.pace_threshold);
        filters.pace_rate = positive_or(filters.pace_rate, defaults.filters.pace_rate);

        self.detector.scene_threshold = positive_or(
            self.detector.scene_threshold,
            defaults.detector.scene_threshold,
        );
        self.speedup.bpm = positive_or(self.speedup.bpm, defaults.speedup.bpm);
        self.speedup.freq = positive_or(self.speedup.freq, defaults.speedup.freq);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = MontageConfig::load_from_path(&path).unwrap();
        assert_eq!(config, MontageConfig::default());
        assert!(path.exists());

        let reloaded = MontageConfig::load_from_path(&path).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "retries = 5\nquality = \"high\"\n[offsets]\nmixed = -0.05\n[filters]\nface_command = \"faces {}\"\n",
        )
        .unwrap();

        let config = MontageConfig::load_from_path(&path).unwrap();
        assert_eq!(config.retries, 5);
        assert_eq!(config.quality, Quality::High);
        assert_eq!(config.offsets.mixed, -0.05);
        assert_eq!(config.offsets.reencode, -0.0415);
        assert_eq!(config.filters.face_command.as_deref(), Some("faces {}"));
        assert_eq!(config.chrono, ChronoConfig::default());
    }

    #[test]
    fn sanitizing_restores_unusable_values() {
        let mut config = MontageConfig::default();
        config.threads = 0;
        config.chrono.scope = 4.0;
        config.chrono.speed = -1.0;
        config.filters.pace_rate = f64::NAN;
        config.speedup.bpm = 0.0;

        let config = config.sanitized();
        assert!(config.threads > 0);
        assert_eq!(config.chrono.scope, 1.0);
        assert_eq!(config.chrono.speed, 1.0);
        assert_eq!(config.filters.pace_rate, 0.2);
        assert_eq!(config.speedup.bpm, 120.0);
    }

    #[test]
    fn malformed_files_report_their_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "retries = \"many\"").unwrap();
        let err = MontageConfig::load_from_path(&path).unwrap_err();
        assert!(format!("{err:#}").contains("config.toml"));
    }
}

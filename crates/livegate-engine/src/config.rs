//! Per-session configuration: defaults, environment overrides, TOML files.

use std::path::Path;

use livegate_core::{LivenessTuning, QualityThresholds};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Capture session configuration.
///
/// Defaults mirror the reference capture thresholds. Every field can be
/// overridden from a TOML file ([`SessionConfig::load`]) or from
/// `LIVEGATE_*` environment variables ([`SessionConfig::from_env`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Whether this capture backs an enrollment (vs an authentication).
    /// The decision logic is identical; the flag travels with the session
    /// so the submission layer can route the evidence.
    pub is_enrollment: bool,
    /// Capture a frame at each direction's midpoint in addition to its
    /// endpoint.
    pub require_midpoint_capture: bool,
    /// Liveness frames required before the session can complete.
    pub num_liveness_frames: usize,
    /// Fill-ratio band for subject distance.
    pub min_face_fill_ratio: f32,
    pub max_face_fill_ratio: f32,
    /// Minimum rolling-average quality-model score for the selfie anchor.
    pub quality_threshold: f32,
    /// Rolling window length for the quality score.
    pub quality_history_len: usize,
    /// Strict-mode forced-failure budget. `None` disables the timer.
    pub strict_mode_timeout_ms: Option<u64>,
    /// Minimum mean luma (0–255).
    pub min_luminance: f32,
    /// Preview zoom factor defining the viewfinder sub-region.
    pub viewfinder_scale: f32,
    /// Faces below this fraction of frame area are ignored as bystanders.
    pub min_face_area_fraction: f32,
    /// Extreme-pose limits for the selfie anchor, degrees.
    pub max_pitch: f32,
    pub max_yaw: f32,
    pub max_roll: f32,
    /// Eye-open probability below which an eye counts as closed.
    pub min_eye_open: f32,
    /// Minimum interval between admitted frames.
    pub intra_frame_min_delay_ms: u64,
    /// How long the face may be lost mid-liveness before a full reset.
    pub no_face_reset_delay_ms: u64,
    /// Liveness state-machine tuning.
    pub liveness: LivenessTuning,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            is_enrollment: true,
            require_midpoint_capture: true,
            num_liveness_frames: 6,
            min_face_fill_ratio: 0.10,
            max_face_fill_ratio: 0.30,
            quality_threshold: 0.5,
            quality_history_len: 7,
            strict_mode_timeout_ms: Some(120_000),
            min_luminance: 50.0,
            viewfinder_scale: 1.3,
            min_face_area_fraction: 0.03,
            max_pitch: 30.0,
            max_yaw: 15.0,
            max_roll: 30.0,
            min_eye_open: 0.3,
            intra_frame_min_delay_ms: 250,
            no_face_reset_delay_ms: 500,
            liveness: LivenessTuning::default(),
        }
    }
}

impl SessionConfig {
    /// Defaults overlaid with `LIVEGATE_*` environment variables.
    /// `LIVEGATE_STRICT_TIMEOUT_MS=0` disables the strict-mode timer.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_var("LIVEGATE_IS_ENROLLMENT") {
            cfg.is_enrollment = v;
        }
        if let Some(v) = env_var("LIVEGATE_MIDPOINT_CAPTURE") {
            cfg.require_midpoint_capture = v;
        }
        if let Some(v) = env_var("LIVEGATE_NUM_LIVENESS_FRAMES") {
            cfg.num_liveness_frames = v;
        }
        if let Some(v) = env_var("LIVEGATE_MIN_FACE_FILL_RATIO") {
            cfg.min_face_fill_ratio = v;
        }
        if let Some(v) = env_var("LIVEGATE_MAX_FACE_FILL_RATIO") {
            cfg.max_face_fill_ratio = v;
        }
        if let Some(v) = env_var("LIVEGATE_QUALITY_THRESHOLD") {
            cfg.quality_threshold = v;
        }
        if let Some(v) = env_var::<u64>("LIVEGATE_STRICT_TIMEOUT_MS") {
            cfg.strict_mode_timeout_ms = (v > 0).then_some(v);
        }
        if let Some(v) = env_var("LIVEGATE_MIN_LUMINANCE") {
            cfg.min_luminance = v;
        }
        if let Some(v) = env_var("LIVEGATE_INTRA_FRAME_MIN_DELAY_MS") {
            cfg.intra_frame_min_delay_ms = v;
        }
        if let Some(v) = env_var("LIVEGATE_NO_FACE_RESET_DELAY_MS") {
            cfg.no_face_reset_delay_ms = v;
        }
        if let Some(v) = env_var("LIVEGATE_STABILITY_TIME_MS") {
            cfg.liveness.stability_time_ms = v;
        }
        cfg
    }

    /// Load from a TOML file. Missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let cfg: Self = toml::from_str(&contents)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// The quality-evaluator view of this configuration.
    pub fn quality_thresholds(&self) -> QualityThresholds {
        QualityThresholds {
            min_luminance: self.min_luminance,
            viewfinder_scale: self.viewfinder_scale,
            min_face_area_fraction: self.min_face_area_fraction,
            min_fill_ratio: self.min_face_fill_ratio,
            max_fill_ratio: self.max_face_fill_ratio,
            max_pitch: self.max_pitch,
            max_yaw: self.max_yaw,
            max_roll: self.max_roll,
            min_eye_open: self.min_eye_open,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_liveness_frames == 0 {
            return Err(ConfigError::Invalid("num_liveness_frames must be > 0"));
        }
        if self.min_face_fill_ratio <= 0.0
            || self.max_face_fill_ratio > 1.0
            || self.min_face_fill_ratio >= self.max_face_fill_ratio
        {
            return Err(ConfigError::Invalid(
                "face fill ratios must satisfy 0 < min < max <= 1",
            ));
        }
        if !(0.0..=1.0).contains(&self.quality_threshold) {
            return Err(ConfigError::Invalid("quality_threshold must be in [0, 1]"));
        }
        if self.quality_history_len == 0 {
            return Err(ConfigError::Invalid("quality_history_len must be > 0"));
        }
        if self.viewfinder_scale < 1.0 {
            return Err(ConfigError::Invalid("viewfinder_scale must be >= 1.0"));
        }
        if !(0.0..=1.0).contains(&self.liveness.smoothing_alpha)
            || self.liveness.smoothing_alpha == 0.0
        {
            return Err(ConfigError::Invalid("smoothing_alpha must be in (0, 1]"));
        }
        if self.liveness.base_increment <= 0.0
            || self.liveness.max_increment < self.liveness.base_increment
        {
            return Err(ConfigError::Invalid(
                "liveness increments must satisfy 0 < base <= max",
            ));
        }
        if self.liveness.max_consecutive_misses == 0 {
            return Err(ConfigError::Invalid("max_consecutive_misses must be > 0"));
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

fn env_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

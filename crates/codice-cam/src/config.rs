//! JSON configuration file and named profiles for the full pipeline.

use codice_detect::{DecoderParams, DetectorParams, ExtractorParams, PreprocessParams};
use codice_tuio::TrackingParams;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Errors while loading, saving or validating a [`CodiceConfig`].
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
    #[error("unknown profile '{0}' (expected one of: default, high_performance, low_latency, debug)")]
    UnknownProfile(String),
}

/// Named parameter presets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    #[default]
    Default,
    HighPerformance,
    LowLatency,
    Debug,
}

impl Profile {
    pub const ALL: [Profile; 4] = [
        Profile::Default,
        Profile::HighPerformance,
        Profile::LowLatency,
        Profile::Debug,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Profile::Default => "default",
            Profile::HighPerformance => "high_performance",
            Profile::LowLatency => "low_latency",
            Profile::Debug => "debug",
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Profile {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Profile::ALL
            .into_iter()
            .find(|p| p.name() == s.trim())
            .ok_or_else(|| ConfigError::UnknownProfile(s.to_string()))
    }
}

/// Contour and decoder settings of the detector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub extractor: ExtractorParams,
    pub decoder: DecoderParams,
    pub min_confidence: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        let params = DetectorParams::default();
        Self {
            extractor: params.extractor,
            decoder: params.decoder,
            min_confidence: params.min_confidence,
        }
    }
}

/// Frame pacing and protocol endpoint settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Host of the protocol client the server sends to.
    pub host: String,
    pub port: u16,
    /// Upper bound on processed frames per second.
    pub max_fps: u32,
    /// Interval between statistics log lines; `0` disables them.
    pub stats_interval_ms: u64,
    /// Raise the default log level to `debug`.
    pub debug_logging: bool,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3333,
            max_fps: 30,
            stats_interval_ms: 5000,
            debug_logging: false,
        }
    }
}

impl StreamingConfig {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Time budget of one frame at `max_fps`.
    pub fn frame_budget(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.max_fps.max(1)))
    }
}

/// Complete pipeline configuration as stored on disk.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodiceConfig {
    pub preprocess: PreprocessParams,
    pub detection: DetectionConfig,
    pub tracking: TrackingParams,
    pub streaming: StreamingConfig,
}

impl CodiceConfig {
    pub fn for_profile(profile: Profile) -> Self {
        let mut cfg = Self::default();
        match profile {
            Profile::Default => {}
            Profile::HighPerformance => {
                cfg.streaming.max_fps = 60;
                cfg.preprocess.close_edges = false;
            }
            Profile::LowLatency => {
                cfg.tracking.marker_timeout_ms = 500;
                cfg.streaming.max_fps = 30;
            }
            Profile::Debug => {
                cfg.streaming.max_fps = 15;
                cfg.streaming.debug_logging = true;
                cfg.streaming.stats_interval_ms = 1000;
            }
        }
        cfg
    }

    pub fn detector_params(&self) -> DetectorParams {
        DetectorParams {
            preprocess: self.preprocess.clone(),
            extractor: self.detection.extractor.clone(),
            decoder: self.detection.decoder.clone(),
            min_confidence: self.detection.min_confidence,
        }
    }

    /// Check every section and report all violated rules at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if let Err(err) = self.detector_params().validate() {
            problems.push(format!("detection: {err}"));
        }
        if self.detection.extractor.min_perimeter < 0.0 {
            problems.push(format!(
                "detection: min perimeter must be non-negative (got {})",
                self.detection.extractor.min_perimeter
            ));
        }
        let ex = &self.detection.extractor;
        if !(ex.min_aspect_ratio > 0.0 && ex.min_aspect_ratio <= ex.max_aspect_ratio) {
            problems.push(format!(
                "detection: invalid aspect ratio bounds (min={}, max={})",
                ex.min_aspect_ratio, ex.max_aspect_ratio
            ));
        }
        if let Err(err) = self.tracking.validate() {
            problems.push(format!("tracking: {err}"));
        }
        if !(1..=120).contains(&self.streaming.max_fps) {
            problems.push(format!(
                "streaming: max fps must be in 1..=120 (got {})",
                self.streaming.max_fps
            ));
        }
        if self.streaming.port == 0 {
            problems.push("streaming: port must be in 1..=65535".to_string());
        }
        if self.streaming.host.trim().is_empty() {
            problems.push("streaming: host must not be empty".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    /// Load and validate a JSON configuration file.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

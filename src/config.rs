//! Monitor configuration
//!
//! Every tunable constant of the pipeline lives here with its default. Configs
//! deserialize from partial JSON: missing fields take their defaults.

use crate::error::ThreatError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default capture sample rate (Hz)
pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

/// Where audio samples come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioSourceKind {
    /// Internal synthetic generator (also the fallback for failed hardware)
    Synthetic,
    /// Host pushes samples through `ThreatMonitor::push_audio`
    External,
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub sample_rate: u32,
    /// Samples per capture chunk
    pub chunk_size: usize,
    /// Ring buffer length (seconds of audio kept)
    pub buffer_seconds: f64,
    /// Audio analyzed per tick (seconds)
    pub analysis_window_seconds: f64,
    pub tick_interval_ms: u64,
    /// Entries kept in the threat history ring
    pub history_capacity: usize,
    /// Entries returned in a snapshot
    pub snapshot_history: usize,
    /// Capacity of each transition subscriber queue
    pub transition_queue: usize,
    pub audio_source: AudioSourceKind,
    /// Trained emotion model weights (JSON); heuristic-only when absent
    pub model_path: Option<PathBuf>,
    pub speech: SpeechConfig,
    pub motion: MotionConfig,
    pub context: ContextConfig,
    pub fusion: FusionConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            chunk_size: 1024,
            buffer_seconds: 3.0,
            analysis_window_seconds: 1.0,
            tick_interval_ms: 1000,
            history_capacity: 100,
            snapshot_history: 20,
            transition_queue: 32,
            audio_source: AudioSourceKind::Synthetic,
            model_path: None,
            speech: SpeechConfig::default(),
            motion: MotionConfig::default(),
            context: ContextConfig::default(),
            fusion: FusionConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Parse a (possibly partial) JSON config and validate it
    pub fn from_json(json: &str) -> Result<Self, ThreatError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file
    pub fn from_file(path: &Path) -> Result<Self, ThreatError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Serialize the full config, defaults included
    pub fn to_json(&self) -> Result<String, ThreatError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Ring buffer capacity in samples
    pub fn buffer_capacity(&self) -> usize {
        (self.buffer_seconds * self.sample_rate as f64).round() as usize
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ThreatError> {
        let invalid = |msg: &str| Err(ThreatError::InvalidConfig(msg.to_string()));

        if self.sample_rate < 8_000 {
            return invalid("sample_rate must be at least 8000 Hz");
        }
        if self.chunk_size == 0 {
            return invalid("chunk_size must be positive");
        }
        if !(self.analysis_window_seconds > 0.0) {
            return invalid("analysis_window_seconds must be positive");
        }
        if self.buffer_seconds < self.analysis_window_seconds {
            return invalid("buffer_seconds must cover analysis_window_seconds");
        }
        if self.tick_interval_ms == 0 {
            return invalid("tick_interval_ms must be positive");
        }
        if self.history_capacity == 0 {
            return invalid("history_capacity must be positive");
        }
        if self.transition_queue == 0 {
            return invalid("transition_queue must be positive");
        }
        if !(0.0..=1.0).contains(&self.speech.confidence_gate) {
            return invalid("speech.confidence_gate must be within [0, 1]");
        }
        if self.speech.smoothing_window == 0 || self.motion.smoothing_window == 0 {
            return invalid("smoothing windows must be positive");
        }
        if !(self.motion.min_area_ratio > 0.0) {
            return invalid("motion.min_area_ratio must be positive");
        }
        if !(self.motion.learning_rate > 0.0 && self.motion.learning_rate < 1.0) {
            return invalid("motion.learning_rate must be within (0, 1)");
        }
        if self.motion.median_kernel % 2 == 0 {
            return invalid("motion.median_kernel must be odd");
        }
        if !(self.context.ema_alpha > 0.0 && self.context.ema_alpha <= 1.0) {
            return invalid("context.ema_alpha must be within (0, 1]");
        }
        if self.context.night_start > 23 || self.context.night_end > 23 {
            return invalid("context night hours must be within 0..=23");
        }
        let f = &self.fusion;
        if !(f.behavior_weight >= 0.0 && f.behavior_weight <= 1.0) {
            return invalid("fusion.behavior_weight must be within [0, 1]");
        }
        if !(f.latch_level > 0.0 && f.latch_level <= 1.0) {
            return invalid("fusion.latch_level must be within (0, 1]");
        }
        if f.latch_duration_secs <= 0.0 {
            return invalid("fusion.latch_duration_secs must be positive");
        }
        if !(f.alpha_min <= f.alpha_max && f.alpha_max < 1.0 && f.alpha_min > 0.0) {
            return invalid("fusion alpha bounds must satisfy 0 < min <= max < 1");
        }
        Ok(())
    }
}

/// Speech scorer constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Windows with fewer real samples are not analyzed
    pub min_samples: usize,
    /// Minimum top-class probability accepted from a trained model
    pub confidence_gate: f64,
    /// Heuristic confidence moving-average window
    pub smoothing_window: usize,
    /// Floor applied to confidence before weighting
    pub confidence_floor: f64,
    /// RMS below which the heuristic reports neutral
    pub low_energy: f64,
    /// RMS at or above which the heuristic reports fear/anger
    pub high_energy: f64,
    /// Spectral centroid separating fear from anger (Hz)
    pub fear_centroid_hz: f64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            min_samples: 200,
            confidence_gate: 0.6,
            smoothing_window: 3,
            confidence_floor: 0.25,
            low_energy: 0.02,
            high_energy: 0.25,
            fear_centroid_hz: 1500.0,
        }
    }
}

/// Motion scorer and background model constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    pub shadow_removal: bool,
    /// Foreground ratio below which no motion is reported
    pub min_area_ratio: f64,
    pub sensitivity: f64,
    pub learning_rate: f32,
    /// Squared Mahalanobis distance for background classification
    pub var_threshold: f32,
    /// Squared Mahalanobis distance for updating a matched component
    pub var_threshold_gen: f32,
    pub smoothing_window: usize,
    pub warmup_frames: usize,
    /// Minimum score once warmed up
    pub score_floor: f64,
    /// Fixed score while warming up
    pub warmup_score: f64,
    /// Score when no frame is available
    pub missing_score: f64,
    pub median_kernel: usize,
    /// Smallest region counted as a moving entity (fraction of frame area)
    pub min_blob_ratio: f64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            shadow_removal: true,
            min_area_ratio: 0.001,
            sensitivity: 1.0,
            learning_rate: 0.003,
            var_threshold: 48.0,
            var_threshold_gen: 9.0,
            smoothing_window: 4,
            warmup_frames: 10,
            score_floor: 0.03,
            warmup_score: 0.05,
            missing_score: 0.03,
            median_kernel: 5,
            min_blob_ratio: 0.0005,
        }
    }
}

/// Context engine constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// First night hour (inclusive)
    pub night_start: u32,
    /// Last night hour (inclusive)
    pub night_end: u32,
    /// First evening hour (inclusive)
    pub evening_start: u32,
    /// Mean luminance below which the scene counts as dark
    pub dark_threshold: f64,
    pub ema_alpha: f64,
    pub history_size: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            night_start: 22,
            night_end: 5,
            evening_start: 18,
            dark_threshold: 70.0,
            ema_alpha: 0.4,
            history_size: 10,
        }
    }
}

/// Fusion engine constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Softmax sharpness over modality reliabilities
    pub attention_sharpness: f64,
    /// Share of the behavioral score in the blended score (rest is context)
    pub behavior_weight: f64,
    pub alpha_base: f64,
    pub alpha_latch: f64,
    /// How strongly a high fused score shortens smoothing
    pub alpha_gain: f64,
    pub alpha_min: f64,
    pub alpha_max: f64,
    pub latch_level: f64,
    pub latch_duration_secs: f64,
    pub latch_speech_score: f64,
    pub latch_confidence: f64,
    pub latch_keyword: f64,
    /// Reliability proxy used when no transcript arrived
    pub default_asr_confidence: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            attention_sharpness: 4.0,
            behavior_weight: 0.70,
            alpha_base: 0.92,
            alpha_latch: 0.995,
            alpha_gain: 1.5,
            alpha_min: 0.85,
            alpha_max: 0.99,
            latch_level: 0.70,
            latch_duration_secs: 10.0,
            latch_speech_score: 0.35,
            latch_confidence: 0.70,
            latch_keyword: 0.25,
            default_asr_confidence: 0.5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_validate() {
        assert!(MonitorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config = MonitorConfig::from_json(
            r#"{"tick_interval_ms": 250, "fusion": {"latch_duration_secs": 5.0}}"#,
        )
        .unwrap();

        assert_eq!(config.tick_interval_ms, 250);
        assert_eq!(config.fusion.latch_duration_secs, 5.0);
        assert_eq!(config.fusion.latch_level, 0.70);
        assert_eq!(config.speech, SpeechConfig::default());
        assert_eq!(config.audio_source, AudioSourceKind::Synthetic);
    }

    #[test]
    fn test_round_trip() {
        let mut config = MonitorConfig::default();
        config.audio_source = AudioSourceKind::External;
        config.model_path = Some(PathBuf::from("models/emotion.json"));

        let json = config.to_json().unwrap();
        let loaded = MonitorConfig::from_json(&json).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(MonitorConfig::from_json(r#"{"tick_interval_ms": 0}"#).is_err());
        assert!(MonitorConfig::from_json(r#"{"motion": {"median_kernel": 4}}"#).is_err());
        assert!(MonitorConfig::from_json(r#"{"context": {"ema_alpha": 0.0}}"#).is_err());
        assert!(
            MonitorConfig::from_json(r#"{"buffer_seconds": 0.5, "analysis_window_seconds": 1.0}"#)
                .is_err()
        );
        assert!(MonitorConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_buffer_capacity() {
        let config = MonitorConfig::default();
        assert_eq!(config.buffer_capacity(), 48_000);
    }
}

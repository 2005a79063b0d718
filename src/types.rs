//! Core types for the threatsense pipeline
//!
//! This module defines the data structures that flow through each tick:
//! emotion estimates, speech and motion readings, context snapshots, the fused
//! state and the observational history exposed to collaborators.

use crate::motion::ForegroundMask;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Clip a value into `[lo, hi]`, mapping NaN to `lo`.
pub(crate) fn clip(value: f64, lo: f64, hi: f64) -> f64 {
    if value.is_nan() {
        return lo;
    }
    value.max(lo).min(hi)
}

/// Emotion labels understood by the speech path
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emotion {
    Neutral,
    Happiness,
    Sadness,
    Anger,
    Fear,
    /// High arousal without a clear valence. Never surfaces to fusion.
    SituationalArousal,
}

impl Emotion {
    /// Every label, in model output order
    pub const ALL: [Emotion; 6] = [
        Emotion::Neutral,
        Emotion::Happiness,
        Emotion::Sadness,
        Emotion::Anger,
        Emotion::Fear,
        Emotion::SituationalArousal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Neutral => "neutral",
            Emotion::Happiness => "happiness",
            Emotion::Sadness => "sadness",
            Emotion::Anger => "anger",
            Emotion::Fear => "fear",
            Emotion::SituationalArousal => "situational_arousal",
        }
    }

    /// Parse a label as written in model files
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|e| e.as_str().eq_ignore_ascii_case(label.trim()))
    }

    /// Label as seen by the fusion stage.
    ///
    /// `situational_arousal` has no entry in the threat weight table and is
    /// reported as `neutral`.
    pub fn surfaced(self) -> Self {
        match self {
            Emotion::SituationalArousal => Emotion::Neutral,
            other => other,
        }
    }

    /// Threat contribution per unit of confidence
    pub fn threat_weight(&self) -> f64 {
        match self {
            Emotion::Fear => 0.75,
            Emotion::Anger => 0.65,
            Emotion::Sadness => 0.45,
            Emotion::Happiness => 0.05,
            Emotion::Neutral | Emotion::SituationalArousal => 0.10,
        }
    }

    /// Highest-severity class, the only one allowed to arm the emergency latch
    pub fn is_highest_severity(&self) -> bool {
        matches!(self, Emotion::Fear)
    }
}

/// Discrete alert state derived from the running score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThreatState {
    Safe,
    Medium,
    High,
    Critical,
}

impl ThreatState {
    /// Monotonic classification of a running score
    pub fn from_score(score: f64) -> Self {
        if score >= 0.85 {
            ThreatState::Critical
        } else if score >= 0.60 {
            ThreatState::High
        } else if score >= 0.25 {
            ThreatState::Medium
        } else {
            ThreatState::Safe
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatState::Safe => "SAFE",
            ThreatState::Medium => "MEDIUM",
            ThreatState::High => "HIGH",
            ThreatState::Critical => "CRITICAL",
        }
    }

    /// States a collaborator is expected to alert on
    pub fn is_alert(&self) -> bool {
        matches!(self, ThreatState::High | ThreatState::Critical)
    }
}

/// Result of emotion classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionEstimate {
    pub label: Emotion,
    /// Confidence of `label` (0.0 - 1.0)
    pub confidence: f64,
    /// Per-label probability (0.0 - 1.0 each)
    pub probabilities: BTreeMap<Emotion, f64>,
}

impl EmotionEstimate {
    /// Estimate with a single label and no probability mass elsewhere
    pub fn single(label: Emotion, confidence: f64) -> Self {
        let confidence = clip(confidence, 0.0, 1.0);
        let probabilities = Emotion::ALL
            .iter()
            .map(|&e| (e, if e == label { confidence } else { 0.0 }))
            .collect();
        Self {
            label,
            confidence,
            probabilities,
        }
    }
}

/// Which path produced the speech emotion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmotionSource {
    /// Trained classifier cleared its confidence gate
    Model,
    /// Spectral heuristic (no model, or the model declined)
    Heuristic,
    /// Input too short to analyze; fixed neutral default
    Degenerate,
}

/// Speech scorer output for one window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechAssessment {
    /// Threat contribution (0.0 - 1.0)
    pub score: f64,
    pub emotion: Emotion,
    /// Confidence of `emotion` (0.0 - 1.0)
    pub confidence: f64,
    pub source: EmotionSource,
}

impl SpeechAssessment {
    /// Default reported when the window cannot be analyzed
    pub fn degenerate() -> Self {
        Self {
            score: 0.1,
            emotion: Emotion::Neutral,
            confidence: 0.0,
            source: EmotionSource::Degenerate,
        }
    }
}

/// Transcript fragment delivered by an external speech recognizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    /// Recognizer confidence (0.0 - 1.0)
    pub confidence: f64,
}

/// Lifecycle of the motion detector for a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionPhase {
    /// No frame was available this tick
    Missing,
    /// Background model still learning; fixed baseline reported
    WarmingUp,
    Active,
}

/// Motion scorer output for one frame
#[derive(Debug, Clone)]
pub struct MotionReading {
    /// Stabilized motion intensity (0.0 - 1.0)
    pub score: f64,
    /// Cleaned foreground mask, when a frame was processed
    pub mask: Option<ForegroundMask>,
    /// Connected moving regions in the cleaned mask
    pub blob_count: usize,
    pub phase: MotionPhase,
    /// Reliability proxy for fusion (0.0 - 1.0)
    pub quality: f64,
}

/// Coarse location category reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationContext {
    pub near_police: bool,
    pub near_hospital: bool,
    pub public_place: bool,
}

impl Default for LocationContext {
    fn default() -> Self {
        Self {
            near_police: false,
            near_hospital: false,
            public_place: true,
        }
    }
}

/// Situational risk breakdown for one tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub time_risk: f64,
    pub location_risk: f64,
    pub environment_risk: f64,
    pub isolation_risk: f64,
    /// Exponentially smoothed weighted sum (0.0 - 1.0)
    pub context_score: f64,
}

/// The single long-lived mutable record owned by the fusion engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionState {
    pub current_score: f64,
    pub current_state: ThreatState,
    pub latch_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latch_expires_at: Option<DateTime<Utc>>,
}

impl Default for FusionState {
    fn default() -> Self {
        Self {
            current_score: 0.0,
            current_state: ThreatState::Safe,
            latch_active: false,
            latch_expires_at: None,
        }
    }
}

/// Per-tick breakdown of how each modality entered the fused score
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ModalityContributions {
    pub speech_score: f64,
    pub motion_score: f64,
    pub keyword_score: f64,
    pub speech_reliability: f64,
    pub motion_reliability: f64,
    pub keyword_reliability: f64,
    pub speech_weight: f64,
    pub motion_weight: f64,
    pub keyword_weight: f64,
    /// Reliability-normalized behavioral score before context blending
    pub behavioral_score: f64,
    pub context_score: f64,
    /// Instantaneous blended score fed into temporal smoothing
    pub fused_score: f64,
}

/// Observational record of one tick (not a source of truth)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub score: f64,
    pub state: ThreatState,
    pub speech: f64,
    pub motion: f64,
    pub keyword: f64,
    pub context: f64,
    pub emotion: Emotion,
    pub latch_active: bool,
}

/// Emitted whenever classification moves the state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub session_id: Uuid,
    pub from: ThreatState,
    pub to: ThreatState,
    pub score: f64,
    pub at: DateTime<Utc>,
}

/// Read-only view handed to collaborators polling the monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    pub score: f64,
    pub state: ThreatState,
    pub latch_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latch_expires_at: Option<DateTime<Utc>>,
    pub contributions: ModalityContributions,
    /// Speech path used on the latest tick; `degenerate` flags fail-open
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_source: Option<EmotionSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motion_phase: Option<MotionPhase>,
    pub monitoring_active: bool,
    pub recent_history: Vec<ThreatHistoryEntry>,
}

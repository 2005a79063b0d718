//! Multimodal threat fusion
//!
//! The fusion engine owns the only long-lived, cross-thread state of the
//! monitor: the running threat score, the alert state, the emergency latch
//! and the observational history. Per tick it:
//!
//! 1. Turns each modality's quality signal into a reliability
//! 2. Derives attention weights with a softmax over reliabilities
//! 3. Computes a reliability-normalized behavioral score, blended with context
//! 4. Arms or expires the emergency latch
//! 5. Applies adaptive temporal smoothing (faster when the fused score is high)
//! 6. Classifies the running score into SAFE / MEDIUM / HIGH / CRITICAL
//!
//! Steps 1-3 are pure and run outside the lock; 4-6 and the history append
//! run under a single `parking_lot::Mutex`.

use crate::config::{FusionConfig, MonitorConfig};
use crate::types::{
    clip, EmotionSource, FusionState, ModalityContributions, MotionPhase, MotionReading,
    SpeechAssessment, ThreatHistoryEntry, ThreatSnapshot, ThreatState,
};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;

const EPSILON: f64 = 1e-9;

/// Keyword score and the recognizer's confidence in the transcript behind it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeywordEvidence {
    pub score: f64,
    pub asr_confidence: f64,
}

/// Per-modality inputs for one tick
#[derive(Debug, Clone, PartialEq)]
pub struct FusionInputs {
    pub speech: SpeechAssessment,
    pub motion_score: f64,
    pub motion_quality: f64,
    pub motion_phase: MotionPhase,
    /// `None` when no transcript arrived since the last tick
    pub keyword: Option<KeywordEvidence>,
}

impl FusionInputs {
    pub fn new(speech: SpeechAssessment, motion: &MotionReading) -> Self {
        Self {
            speech,
            motion_score: motion.score,
            motion_quality: motion.quality,
            motion_phase: motion.phase,
            keyword: None,
        }
    }

    pub fn with_keyword(mut self, score: f64, asr_confidence: f64) -> Self {
        self.keyword = Some(KeywordEvidence {
            score,
            asr_confidence,
        });
        self
    }
}

/// Result of one fusion update
#[derive(Debug, Clone, PartialEq)]
pub struct FusionOutcome {
    pub state: FusionState,
    pub previous: ThreatState,
    pub contributions: ModalityContributions,
    pub entry: ThreatHistoryEntry,
}

impl FusionOutcome {
    /// Whether classification moved to a different state this tick
    pub fn transitioned(&self) -> bool {
        self.previous != self.state.current_state
    }
}

struct FusionCore {
    state: FusionState,
    history: VecDeque<ThreatHistoryEntry>,
    contributions: ModalityContributions,
    speech_source: Option<EmotionSource>,
    motion_phase: Option<MotionPhase>,
}

impl FusionCore {
    fn new(capacity: usize) -> Self {
        Self {
            state: FusionState::default(),
            history: VecDeque::with_capacity(capacity),
            contributions: ModalityContributions::default(),
            speech_source: None,
            motion_phase: None,
        }
    }
}

/// Fusion engine shared between the tick worker and pollers
pub struct FusionEngine {
    config: FusionConfig,
    history_capacity: usize,
    core: Mutex<FusionCore>,
}

impl FusionEngine {
    pub fn new(config: FusionConfig, history_capacity: usize) -> Self {
        let history_capacity = history_capacity.max(1);
        Self {
            config,
            history_capacity,
            core: Mutex::new(FusionCore::new(history_capacity)),
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(config.fusion.clone(), config.history_capacity)
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Reliabilities, attention weights and the blended instantaneous score.
    ///
    /// Pure: reads configuration only.
    pub fn blend(&self, inputs: &FusionInputs, context_score: f64) -> ModalityContributions {
        let cfg = &self.config;
        let keyword = inputs.keyword.unwrap_or(KeywordEvidence {
            score: 0.0,
            asr_confidence: cfg.default_asr_confidence,
        });

        let speech_score = clip(inputs.speech.score, 0.0, 1.0);
        let motion_score = clip(inputs.motion_score, 0.0, 1.0);
        let keyword_score = clip(keyword.score, 0.0, 1.0);

        let r_s = clip(0.25 + 0.75 * clip(inputs.speech.confidence, 0.0, 1.0), 0.30, 0.99);
        let r_m = clip(0.30 + 0.70 * clip(inputs.motion_quality, 0.0, 1.0), 0.20, 0.99);
        let r_k = clip(0.30 + 0.70 * clip(keyword.asr_confidence, 0.0, 1.0), 0.25, 0.95);

        let e_s = (cfg.attention_sharpness * r_s).exp();
        let e_m = (cfg.attention_sharpness * r_m).exp();
        let e_k = (cfg.attention_sharpness * r_k).exp();
        let total = e_s + e_m + e_k + EPSILON;
        let (w_s, w_m, w_k) = (e_s / total, e_m / total, e_k / total);

        let numerator = w_s * speech_score * r_s + w_m * motion_score * r_m + w_k * keyword_score * r_k;
        let denominator = w_s * r_s + w_m * r_m + w_k * r_k + EPSILON;
        let behavioral = clip(numerator / denominator, 0.0, 1.0);

        let context = clip(context_score, 0.0, 1.0);
        let fused = clip(
            cfg.behavior_weight * behavioral + (1.0 - cfg.behavior_weight) * context,
            0.0,
            1.0,
        );

        ModalityContributions {
            speech_score,
            motion_score,
            keyword_score,
            speech_reliability: r_s,
            motion_reliability: r_m,
            keyword_reliability: r_k,
            speech_weight: w_s,
            motion_weight: w_m,
            keyword_weight: w_k,
            behavioral_score: behavioral,
            context_score: context,
            fused_score: fused,
        }
    }

    /// Fuse one tick's signals at the current time
    pub fn update(&self, inputs: FusionInputs, context_score: f64) -> FusionOutcome {
        self.update_at(inputs, context_score, Utc::now())
    }

    /// Fuse one tick's signals at `now`
    pub fn update_at(&self, inputs: FusionInputs, context_score: f64, now: DateTime<Utc>) -> FusionOutcome {
        let cfg = &self.config;
        let contributions = self.blend(&inputs, context_score);
        let fused = contributions.fused_score;
        let arm = inputs.speech.emotion.is_highest_severity()
            && inputs.speech.confidence >= cfg.latch_confidence
            && contributions.speech_score >= cfg.latch_speech_score
            && contributions.keyword_score >= cfg.latch_keyword;
        let latch_duration = Duration::milliseconds((cfg.latch_duration_secs * 1000.0).round() as i64);

        let mut core = self.core.lock();
        let previous = core.state.current_state;
        let state = &mut core.state;

        if !state.latch_active && arm {
            state.latch_active = true;
            state.latch_expires_at = Some(now + latch_duration);
            state.current_score = state.current_score.max(cfg.latch_level);
            log::warn!(
                "Emergency latch armed until {}",
                (now + latch_duration).to_rfc3339()
            );
        }

        if state.latch_active && state.latch_expires_at.map_or(true, |expires| now >= expires) {
            state.latch_active = false;
            state.latch_expires_at = None;
            log::info!("Emergency latch expired");
        }

        let alpha = if state.latch_active {
            cfg.alpha_latch
        } else {
            clip(
                1.0 - (1.0 - cfg.alpha_base) * (1.0 + cfg.alpha_gain * fused),
                cfg.alpha_min,
                cfg.alpha_max,
            )
        };

        let mut score = alpha * state.current_score + (1.0 - alpha) * fused;
        if state.latch_active {
            score = score.max(cfg.latch_level);
        }
        state.current_score = clip(score, 0.0, 1.0);
        state.current_state = ThreatState::from_score(state.current_score);
        let snapshot_state = state.clone();

        let entry = ThreatHistoryEntry {
            timestamp: now,
            score: snapshot_state.current_score,
            state: snapshot_state.current_state,
            speech: contributions.speech_score,
            motion: contributions.motion_score,
            keyword: contributions.keyword_score,
            context: contributions.context_score,
            emotion: inputs.speech.emotion,
            latch_active: snapshot_state.latch_active,
        };
        core.history.push_back(entry.clone());
        while core.history.len() > self.history_capacity {
            core.history.pop_front();
        }
        core.contributions = contributions;
        core.speech_source = Some(inputs.speech.source);
        core.motion_phase = Some(inputs.motion_phase);
        drop(core);

        log::trace!(
            "fusion alpha={:.4} fused={:.3} score={:.3} latch={}",
            alpha,
            fused,
            snapshot_state.current_score,
            snapshot_state.latch_active
        );

        let outcome = FusionOutcome {
            state: snapshot_state,
            previous,
            contributions,
            entry,
        };

        if outcome.transitioned() {
            let to = outcome.state.current_state;
            if to.is_alert() {
                log::warn!(
                    "Threat state {} -> {} (score {:.3})",
                    previous.as_str(),
                    to.as_str(),
                    outcome.state.current_score
                );
            } else {
                log::info!(
                    "Threat state {} -> {} (score {:.3})",
                    previous.as_str(),
                    to.as_str(),
                    outcome.state.current_score
                );
            }
        }

        outcome
    }

    /// Current fused state
    pub fn state(&self) -> FusionState {
        self.core.lock().state.clone()
    }

    /// Full history, oldest first
    pub fn history(&self) -> Vec<ThreatHistoryEntry> {
        self.core.lock().history.iter().cloned().collect()
    }

    /// Consistent view of state, latest contributions and the last `recent` history entries
    pub fn snapshot(&self, recent: usize) -> ThreatSnapshot {
        let core = self.core.lock();
        let skip = core.history.len().saturating_sub(recent);
        ThreatSnapshot {
            session_id: None,
            score: core.state.current_score,
            state: core.state.current_state,
            latch_active: core.state.latch_active,
            latch_expires_at: core.state.latch_expires_at,
            contributions: core.contributions,
            speech_source: core.speech_source,
            motion_phase: core.motion_phase,
            monitoring_active: false,
            recent_history: core.history.iter().skip(skip).cloned().collect(),
        }
    }

    /// Return to the initial SAFE state with no latch and no history
    pub fn reset(&self) {
        *self.core.lock() = FusionCore::new(self.history_capacity);
    }
}

impl Default for FusionEngine {
    fn default() -> Self {
        Self::from_config(&MonitorConfig::default())
    }
}

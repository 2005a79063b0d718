//! Per-tick orchestration
//!
//! [`ThreatPipeline`] owns the stateful per-modality scorers and runs one
//! analysis tick: speech, motion and context are scored independently and
//! then handed to the shared [`FusionEngine`].
//!
//! Pipeline stages:
//! 1. SpeechScorer - Emotion threat from the audio window
//! 2. MotionScorer - Motion intensity from the newest frame (or the missing default)
//! 3. ContextEngine - Situational risk from time, location and scene
//! 4. keyword_score - Keyword threat from a pending transcript, if any
//! 5. FusionEngine - Reliability-weighted fusion, latch, smoothing, classification

use crate::buffer::AudioWindow;
use crate::config::MonitorConfig;
use crate::context::{ContextEngine, ContextObservation};
use crate::fusion::{FusionEngine, FusionInputs, FusionOutcome};
use crate::motion::{Frame, MotionScorer};
use crate::speech::{keyword_score, SpeechScorer};
use crate::types::{ContextSnapshot, LocationContext, MotionReading, SpeechAssessment, Transcript};
use chrono::{DateTime, Utc};

/// Everything one tick consumes
#[derive(Debug, Clone)]
pub struct TickInputs {
    pub window: AudioWindow,
    pub frame: Option<Frame>,
    pub transcript: Option<Transcript>,
    pub location: LocationContext,
    /// Local hour of day (0 - 23)
    pub hour: u32,
}

/// Everything one tick produced
#[derive(Debug, Clone)]
pub struct TickReport {
    pub speech: SpeechAssessment,
    pub motion: MotionReading,
    pub context: ContextSnapshot,
    pub outcome: FusionOutcome,
}

/// Stateful per-modality scorers driven once per tick
pub struct ThreatPipeline {
    speech: SpeechScorer,
    motion: MotionScorer,
    context: ContextEngine,
}

impl ThreatPipeline {
    pub fn new(speech: SpeechScorer, motion: MotionScorer, context: ContextEngine) -> Self {
        Self {
            speech,
            motion,
            context,
        }
    }

    /// Build every scorer from configuration, loading the emotion model if one
    /// is configured
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(
            SpeechScorer::from_config(config),
            MotionScorer::new(config.motion.clone()),
            ContextEngine::new(config.context.clone()),
        )
    }

    pub fn speech(&self) -> &SpeechScorer {
        &self.speech
    }

    /// Run one analysis tick and feed the result into `fusion`
    pub fn tick(&mut self, inputs: TickInputs, fusion: &FusionEngine, now: DateTime<Utc>) -> TickReport {
        let speech = self.speech.score(&inputs.window);

        let (motion, mean_luminance) = match &inputs.frame {
            Some(frame) => (self.motion.score(frame), Some(frame.mean_luminance())),
            None => (self.motion.missing_frame(), None),
        };

        let context = self.context.update(&ContextObservation {
            hour: inputs.hour,
            location: inputs.location,
            mean_luminance,
            motion_intensity: motion.score,
            moving_entities: motion.blob_count,
        });

        let mut fusion_inputs = FusionInputs::new(speech.clone(), &motion);
        if let Some(transcript) = &inputs.transcript {
            fusion_inputs = fusion_inputs.with_keyword(keyword_score(&transcript.text), transcript.confidence);
        }

        let outcome = fusion.update_at(fusion_inputs, context.context_score, now);

        TickReport {
            speech,
            motion,
            context,
            outcome,
        }
    }

    /// Rebuild the motion background model
    pub fn reset_motion(&mut self) {
        self.motion.reset();
    }

    /// Forget all per-session state
    pub fn reset(&mut self) {
        self.speech.reset();
        self.motion.reset();
        self.context.reset();
    }
}

impl Default for ThreatPipeline {
    fn default() -> Self {
        Self::from_config(&MonitorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Emotion, EmotionSource, MotionPhase, ThreatState};
    use chrono::{Duration, TimeZone};
    use std::f32::consts::PI;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn tone(freq: f32, amplitude: f32) -> AudioWindow {
        let samples = (0..16_000)
            .map(|i| amplitude * (2.0 * PI * freq * i as f32 / 16_000.0).sin())
            .collect();
        AudioWindow::from_samples(samples, 16_000)
    }

    fn inputs(window: AudioWindow) -> TickInputs {
        TickInputs {
            window,
            frame: None,
            transcript: None,
            location: LocationContext::default(),
            hour: 14,
        }
    }

    #[test]
    fn test_loud_low_voice_raises_threat() {
        let mut pipeline = ThreatPipeline::default();
        let fusion = FusionEngine::default();

        let mut last = 0.0;
        for i in 0..3 {
            let report = pipeline.tick(inputs(tone(150.0, 0.8)), &fusion, t0() + Duration::seconds(i));
            assert!(matches!(report.speech.emotion, Emotion::Fear | Emotion::Anger));
            assert!(report.speech.confidence >= 0.6);
            assert_eq!(report.speech.source, EmotionSource::Heuristic);
            assert!(report.outcome.state.current_score > last);
            last = report.outcome.state.current_score;
        }
    }

    #[test]
    fn test_silence_without_camera_is_safe() {
        let mut pipeline = ThreatPipeline::default();
        let fusion = FusionEngine::default();
        let empty = AudioWindow {
            samples: vec![0.0; 16_000],
            sample_rate: 16_000,
            filled: 0,
        };

        let report = pipeline.tick(inputs(empty), &fusion, t0());
        assert_eq!(report.speech.source, EmotionSource::Degenerate);
        assert_eq!(report.motion.phase, MotionPhase::Missing);
        assert_eq!(report.context.environment_risk, 0.5);
        assert_eq!(report.outcome.state.current_state, ThreatState::Safe);
    }

    #[test]
    fn test_screamed_help_arms_latch() {
        let mut pipeline = ThreatPipeline::default();
        let fusion = FusionEngine::default();
        let mut tick = inputs(tone(3_000.0, 0.8));
        tick.transcript = Some(Transcript {
            text: "help me, stop!".to_string(),
            confidence: 0.9,
        });

        let report = pipeline.tick(tick, &fusion, t0());
        assert_eq!(report.speech.emotion, Emotion::Fear);
        assert!(report.outcome.state.latch_active);
        assert!(report.outcome.state.current_score >= 0.70);
        assert_eq!(report.outcome.state.current_state, ThreatState::High);
    }

    #[test]
    fn test_frames_drive_motion_and_context() {
        let mut pipeline = ThreatPipeline::default();
        let fusion = FusionEngine::default();
        let dark = Frame::uniform(32, 32, 20);

        let mut report = None;
        for i in 0..12 {
            let mut tick = inputs(tone(440.0, 0.05));
            tick.frame = Some(dark.clone());
            report = Some(pipeline.tick(tick, &fusion, t0() + Duration::seconds(i)));
        }
        let report = report.unwrap();
        assert_eq!(report.motion.phase, MotionPhase::Active);
        // Dark and still: 0.6·0.7 + 0.4·0.3
        assert!((report.context.environment_risk - 0.54).abs() < 1e-9);

        pipeline.reset_motion();
        let mut tick = inputs(tone(440.0, 0.05));
        tick.frame = Some(dark);
        let report = pipeline.tick(tick, &fusion, t0() + Duration::seconds(13));
        assert_eq!(report.motion.phase, MotionPhase::WarmingUp);
    }
}

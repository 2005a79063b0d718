//! Property-based checks for bounded outputs and monotonic classification

use crate::buffer::{AudioWindow, SampleBuffer};
use crate::config::SpeechConfig;
use crate::context::{ContextEngine, ContextObservation};
use crate::features::FeatureExtractor;
use crate::fusion::{FusionEngine, FusionInputs};
use crate::speech::{keyword_score, SpeechScorer};
use crate::types::{Emotion, EmotionSource, LocationContext, MotionPhase, SpeechAssessment, ThreatState};
use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

fn emotion() -> impl Strategy<Value = Emotion> {
    prop::sample::select(Emotion::ALL.to_vec())
}

prop_compose! {
    fn fusion_inputs()(
        speech_score in -0.5f64..1.5,
        confidence in -0.5f64..1.5,
        emotion in emotion(),
        motion_score in -0.5f64..1.5,
        motion_quality in -0.5f64..1.5,
        keyword in prop::option::of((-0.5f64..1.5, -0.5f64..1.5)),
    ) -> FusionInputs {
        let inputs = FusionInputs {
            speech: SpeechAssessment {
                score: speech_score,
                emotion,
                confidence,
                source: EmotionSource::Heuristic,
            },
            motion_score,
            motion_quality,
            motion_phase: MotionPhase::Active,
            keyword: None,
        };
        match keyword {
            Some((score, asr)) => inputs.with_keyword(score, asr),
            None => inputs,
        }
    }
}

proptest! {
    #[test]
    fn test_fused_scores_stay_bounded(
        ticks in prop::collection::vec((fusion_inputs(), -0.5f64..1.5), 1..40),
    ) {
        let engine = FusionEngine::default();
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();

        for (i, (inputs, context)) in ticks.into_iter().enumerate() {
            let outcome = engine.update_at(inputs, context, t0 + Duration::seconds(i as i64));
            let c = outcome.contributions;
            prop_assert!((0.0..=1.0).contains(&c.fused_score));
            prop_assert!((0.0..=1.0).contains(&c.behavioral_score));
            prop_assert!((0.0..=1.0).contains(&outcome.state.current_score));
            prop_assert!((c.speech_weight + c.motion_weight + c.keyword_weight - 1.0).abs() < 1e-6);
            prop_assert_eq!(
                outcome.state.current_state,
                ThreatState::from_score(outcome.state.current_score)
            );
            if outcome.state.latch_active {
                prop_assert!(outcome.state.current_score >= 0.70);
            }
        }
    }

    #[test]
    fn test_classification_is_monotonic(a in 0.0f64..=1.0, b in 0.0f64..=1.0) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(ThreatState::from_score(lo) <= ThreatState::from_score(hi));
    }

    #[test]
    fn test_keyword_score_bounded(text in ".{0,200}") {
        let score = keyword_score(&text);
        prop_assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn test_buffer_never_exceeds_capacity(
        capacity in 1usize..500,
        chunks in prop::collection::vec(prop::collection::vec(-1.0f32..1.0, 0..300), 0..20),
    ) {
        let buffer = SampleBuffer::new(capacity, 100);
        for chunk in &chunks {
            buffer.push(chunk);
            prop_assert!(buffer.len() <= capacity);
        }
        let window = buffer.take_window(2.0);
        prop_assert_eq!(window.samples.len(), 200);
        prop_assert!(window.filled <= capacity.min(200));
    }

    #[test]
    fn test_context_score_bounded(
        observations in prop::collection::vec(
            (0u32..24, any::<bool>(), any::<bool>(), any::<bool>(),
             prop::option::of(0.0f64..255.0), 0.0f64..1.0, 0usize..20),
            1..30,
        ),
    ) {
        let mut engine = ContextEngine::default();
        for (hour, near_police, near_hospital, public_place, lum, motion, entities) in observations {
            let snapshot = engine.update(&ContextObservation {
                hour,
                location: LocationContext { near_police, near_hospital, public_place },
                mean_luminance: lum,
                motion_intensity: motion,
                moving_entities: entities,
            });
            prop_assert!((0.0..=1.0).contains(&snapshot.context_score));
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_speech_score_bounded(samples in prop::collection::vec(-1.0f32..1.0, 0..4_000)) {
        let mut scorer = SpeechScorer::new(SpeechConfig::default());
        let assessment = scorer.score(&AudioWindow::from_samples(samples, 16_000));
        prop_assert!((0.0..=1.0).contains(&assessment.score));
        prop_assert!((0.0..=1.0).contains(&assessment.confidence));
        prop_assert_ne!(assessment.emotion, Emotion::SituationalArousal);
    }

    #[test]
    fn test_features_are_finite(samples in prop::collection::vec(-1.0f32..1.0, 200..3_000)) {
        let mut extractor = FeatureExtractor::new();
        let features = extractor.extract(&samples, 16_000);
        prop_assert!(features.coefficients.iter().all(|c| c.is_finite()));
        prop_assert!(features.energy.is_finite());
        prop_assert!(features.centroid_hz.is_finite());
    }
}

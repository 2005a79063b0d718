//! Speech threat scoring
//!
//! Converts an audio window into a threat contribution through emotion
//! recognition, and transcript text into a keyword threat score.

use crate::buffer::AudioWindow;
use crate::classifier::{
    ClassifierOutcome, EmotionClassifier, LinearEmotionModel, SpectralHeuristic, Unavailable,
};
use crate::config::{MonitorConfig, SpeechConfig};
use crate::error::panic_message;
use crate::features::{FeatureExtractor, FeatureVector};
use crate::types::{clip, EmotionEstimate, EmotionSource, SpeechAssessment};
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};

const THREAT_WORDS: [&str; 10] = [
    "help", "stop", "no", "danger", "emergency", "scream", "fear", "scared", "afraid", "threat",
];
const SAFE_WORDS: [&str; 6] = ["okay", "fine", "safe", "good", "alright", "secure"];

/// Keyword threat score of a transcript fragment (0.0 - 1.0).
///
/// Matching is per word and case-insensitive, and each keyword counts once
/// however often it repeats. Any threat word dominates; safe words only
/// lower the neutral baseline of 0.1.
pub fn keyword_score(text: &str) -> f64 {
    let mut threats: BTreeSet<&str> = BTreeSet::new();
    let mut safe: BTreeSet<&str> = BTreeSet::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
    {
        let word = word.to_lowercase();
        let word = word.trim_matches('\'');
        if let Some(&keyword) = THREAT_WORDS.iter().find(|k| **k == word) {
            threats.insert(keyword);
        } else if let Some(&keyword) = SAFE_WORDS.iter().find(|k| **k == word) {
            safe.insert(keyword);
        }
    }

    if !threats.is_empty() {
        (0.4 + 0.15 * threats.len() as f64).min(1.0)
    } else if !safe.is_empty() {
        (0.1 - 0.03 * safe.len() as f64).max(0.0)
    } else {
        0.1
    }
}

/// Speech scorer with a primary classifier and a heuristic fallback
pub struct SpeechScorer {
    config: SpeechConfig,
    extractor: FeatureExtractor,
    primary: Option<Box<dyn EmotionClassifier>>,
    heuristic: SpectralHeuristic,
}

impl SpeechScorer {
    /// Heuristic-only scorer
    pub fn new(config: SpeechConfig) -> Self {
        Self {
            extractor: FeatureExtractor::new(),
            primary: None,
            heuristic: SpectralHeuristic::new(&config),
            config,
        }
    }

    /// Scorer with a trained classifier in front of the heuristic
    pub fn with_classifier(config: SpeechConfig, classifier: Box<dyn EmotionClassifier>) -> Self {
        let mut scorer = Self::new(config);
        scorer.primary = Some(classifier);
        scorer
    }

    /// Select the classifier by availability: a configured model that loads
    /// becomes primary, anything else leaves the scorer heuristic-only.
    pub fn from_config(config: &MonitorConfig) -> Self {
        let speech = config.speech.clone();
        let Some(path) = &config.model_path else {
            log::info!("No emotion model configured, using spectral heuristic");
            return Self::new(speech);
        };

        match LinearEmotionModel::load(path, speech.confidence_gate) {
            Ok(model) => {
                log::info!("Loaded emotion model from {}", path.display());
                Self::with_classifier(speech, Box::new(model))
            }
            Err(e) => {
                log::warn!("{e}; falling back to spectral heuristic");
                Self::new(speech)
            }
        }
    }

    /// Name of the classifier tried first
    pub fn classifier_name(&self) -> &str {
        match &self.primary {
            Some(classifier) => classifier.name(),
            None => self.heuristic.name(),
        }
    }

    pub fn has_model(&self) -> bool {
        self.primary.is_some()
    }

    /// Forget per-session smoothing
    pub fn reset(&mut self) {
        self.heuristic.reset();
        if let Some(primary) = self.primary.as_mut() {
            primary.reset();
        }
    }

    /// Score one audio window. Never fails.
    pub fn score(&mut self, window: &AudioWindow) -> SpeechAssessment {
        if window.filled < self.config.min_samples {
            return SpeechAssessment::degenerate();
        }

        let features = self.extractor.extract(window.captured(), window.sample_rate);
        if features.is_fallback() {
            return SpeechAssessment::degenerate();
        }

        let (estimate, source) = self.classify(features);
        let confidence = clip(estimate.confidence, 0.0, 1.0);
        let score = clip(
            estimate.label.threat_weight() * confidence.max(self.config.confidence_floor),
            0.0,
            1.0,
        );

        log::trace!(
            "speech emotion={} conf={:.3} score={:.3} energy={:.4} centroid={:.0}Hz",
            estimate.label.as_str(),
            confidence,
            score,
            features.energy,
            features.centroid_hz
        );

        SpeechAssessment {
            score,
            emotion: estimate.label,
            confidence,
            source,
        }
    }

    fn classify(&mut self, features: FeatureVector) -> (EmotionEstimate, EmotionSource) {
        if let Some(primary) = self.primary.as_mut() {
            let sequence = vec![features; primary.sequence_len().max(1)];
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| primary.classify(&sequence)))
                .unwrap_or_else(|payload| {
                    ClassifierOutcome::Unavailable(Unavailable::Failed(panic_message(payload.as_ref())))
                });
            match outcome {
                ClassifierOutcome::Confident(estimate) => {
                    return (surfaced(estimate), EmotionSource::Model);
                }
                ClassifierOutcome::Unavailable(reason) => {
                    log::debug!("{} unavailable: {reason}", primary.name());
                }
            }
        }

        match self.heuristic.classify(&[features]) {
            ClassifierOutcome::Confident(estimate) => (surfaced(estimate), EmotionSource::Heuristic),
            ClassifierOutcome::Unavailable(reason) => {
                log::debug!("spectral heuristic unavailable: {reason}");
                (EmotionEstimate::single(SpeechAssessment::degenerate().emotion, 0.0), EmotionSource::Degenerate)
            }
        }
    }
}

fn surfaced(mut estimate: EmotionEstimate) -> EmotionEstimate {
    estimate.label = estimate.label.surfaced();
    estimate
}

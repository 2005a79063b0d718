//! Emotion classification
//!
//! The speech scorer talks to classifiers through [`EmotionClassifier`]. Two
//! variants ship with the crate:
//! - [`LinearEmotionModel`]: trained weights loaded from JSON, gated on confidence
//! - [`SpectralHeuristic`]: deterministic energy/centroid rules, always answers
//!
//! A classifier that cannot produce a trustworthy answer returns
//! [`ClassifierOutcome::Unavailable`] rather than a guess.

use crate::config::SpeechConfig;
use crate::error::ThreatError;
use crate::features::{FeatureVector, N_MFCC};
use crate::types::{clip, Emotion, EmotionEstimate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Why a classifier declined to answer
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Unavailable {
    #[error("no trained model loaded")]
    NoModel,

    #[error("malformed input: expected {expected} feature vectors, got {got}")]
    MalformedInput { expected: usize, got: usize },

    #[error("top class {label:?} at {confidence:.3} is below the confidence gate")]
    BelowGate { label: Emotion, confidence: f64 },

    #[error("classifier failed: {0}")]
    Failed(String),
}

/// Result of one classification request
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifierOutcome {
    Confident(EmotionEstimate),
    Unavailable(Unavailable),
}

/// Maps a sequence of feature vectors to an emotion estimate
pub trait EmotionClassifier: Send {
    /// Short identifier used in logs and diagnostics
    fn name(&self) -> &str;

    /// Number of feature vectors expected per request
    fn sequence_len(&self) -> usize;

    fn classify(&mut self, sequence: &[FeatureVector]) -> ClassifierOutcome;

    /// Drop any per-session state
    fn reset(&mut self) {}
}

/// Rule-based classifier over window energy and spectral centroid
pub struct SpectralHeuristic {
    low_energy: f64,
    high_energy: f64,
    fear_centroid_hz: f64,
    window: usize,
    recent: VecDeque<f64>,
}

impl SpectralHeuristic {
    pub fn new(config: &SpeechConfig) -> Self {
        Self {
            low_energy: config.low_energy,
            high_energy: config.high_energy,
            fear_centroid_hz: config.fear_centroid_hz,
            window: config.smoothing_window.max(1),
            recent: VecDeque::with_capacity(config.smoothing_window),
        }
    }

    /// Unsmoothed rule output for one feature vector
    pub fn rule(&self, features: &FeatureVector) -> (Emotion, f64) {
        let energy = features.energy as f64;
        if energy < self.low_energy {
            (Emotion::Neutral, 0.20)
        } else if energy >= self.high_energy && features.centroid_hz as f64 >= self.fear_centroid_hz {
            (Emotion::Fear, 0.90)
        } else if energy >= self.high_energy {
            (Emotion::Anger, 0.75)
        } else {
            (Emotion::Sadness, 0.35)
        }
    }
}

impl EmotionClassifier for SpectralHeuristic {
    fn name(&self) -> &str {
        "spectral-heuristic"
    }

    fn sequence_len(&self) -> usize {
        1
    }

    fn classify(&mut self, sequence: &[FeatureVector]) -> ClassifierOutcome {
        let Some(features) = sequence.last() else {
            return ClassifierOutcome::Unavailable(Unavailable::MalformedInput {
                expected: 1,
                got: 0,
            });
        };

        let (label, confidence) = self.rule(features);
        self.recent.push_back(confidence);
        while self.recent.len() > self.window {
            self.recent.pop_front();
        }
        let smoothed = self.recent.iter().sum::<f64>() / self.recent.len() as f64;

        ClassifierOutcome::Confident(EmotionEstimate::single(label, smoothed))
    }

    fn reset(&mut self) {
        self.recent.clear();
    }
}

/// On-disk format of the trained linear emotion model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModelWeights {
    /// Output labels in logit order
    pub labels: Vec<String>,
    /// Feature vectors per request
    pub sequence_len: usize,
    /// Per-coefficient standardization mean
    pub scaler_mean: Vec<f64>,
    /// Per-coefficient standardization scale
    pub scaler_scale: Vec<f64>,
    /// One row of `N_MFCC` weights per label
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
}

/// Trained classifier: standardize, mean-pool over time, linear layer, softmax
#[derive(Debug, Clone)]
pub struct LinearEmotionModel {
    labels: Vec<Emotion>,
    sequence_len: usize,
    mean: Vec<f64>,
    scale: Vec<f64>,
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
    gate: f64,
}

impl LinearEmotionModel {
    /// Build a model from weights, rejecting inconsistent shapes
    pub fn from_weights(weights: LinearModelWeights, gate: f64) -> Result<Self, ThreatError> {
        let bad = |msg: String| Err(ThreatError::ModelLoad(msg));

        if weights.labels.is_empty() {
            return bad("model has no labels".to_string());
        }
        if weights.sequence_len == 0 {
            return bad("sequence_len must be positive".to_string());
        }
        let labels = weights
            .labels
            .iter()
            .map(|l| Emotion::from_label(l).ok_or_else(|| ThreatError::ModelLoad(format!("unknown label '{l}'"))))
            .collect::<Result<Vec<_>, _>>()?;

        if weights.scaler_mean.len() != N_MFCC || weights.scaler_scale.len() != N_MFCC {
            return bad(format!("scaler must have {N_MFCC} entries"));
        }
        if weights.scaler_scale.iter().any(|s| !(s.abs() > 0.0)) {
            return bad("scaler_scale entries must be non-zero".to_string());
        }
        if weights.weights.len() != labels.len() || weights.bias.len() != labels.len() {
            return bad(format!("expected {} weight rows and biases", labels.len()));
        }
        if weights.weights.iter().any(|row| row.len() != N_MFCC) {
            return bad(format!("every weight row must have {N_MFCC} entries"));
        }

        Ok(Self {
            labels,
            sequence_len: weights.sequence_len,
            mean: weights.scaler_mean,
            scale: weights.scaler_scale,
            weights: weights.weights,
            bias: weights.bias,
            gate,
        })
    }

    pub fn from_json(json: &str, gate: f64) -> Result<Self, ThreatError> {
        let weights: LinearModelWeights =
            serde_json::from_str(json).map_err(|e| ThreatError::ModelLoad(e.to_string()))?;
        Self::from_weights(weights, gate)
    }

    /// Load model weights from a JSON file
    pub fn load(path: &Path, gate: f64) -> Result<Self, ThreatError> {
        let json = fs::read_to_string(path)
            .map_err(|e| ThreatError::ModelLoad(format!("{}: {e}", path.display())))?;
        Self::from_json(&json, gate)
    }

    /// Softmax probabilities in label order
    pub fn probabilities(&self, sequence: &[FeatureVector]) -> Vec<f64> {
        let mut pooled = [0.0f64; N_MFCC];
        for features in sequence {
            for (i, p) in pooled.iter_mut().enumerate() {
                *p += (features.coefficients[i] as f64 - self.mean[i]) / self.scale[i];
            }
        }
        let n = sequence.len().max(1) as f64;
        pooled.iter_mut().for_each(|p| *p /= n);

        let logits: Vec<f64> = self
            .weights
            .iter()
            .zip(&self.bias)
            .map(|(row, b)| row.iter().zip(&pooled).map(|(w, x)| w * x).sum::<f64>() + b)
            .collect();
        softmax(&logits)
    }
}

impl EmotionClassifier for LinearEmotionModel {
    fn name(&self) -> &str {
        "linear-model"
    }

    fn sequence_len(&self) -> usize {
        self.sequence_len
    }

    fn classify(&mut self, sequence: &[FeatureVector]) -> ClassifierOutcome {
        if sequence.len() != self.sequence_len {
            return ClassifierOutcome::Unavailable(Unavailable::MalformedInput {
                expected: self.sequence_len,
                got: sequence.len(),
            });
        }

        let probs = self.probabilities(sequence);
        let (top, confidence) = probs
            .iter()
            .copied()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (i, p)| if p > best.1 { (i, p) } else { best });
        let raw_label = self.labels[top];

        if !(confidence >= self.gate) {
            return ClassifierOutcome::Unavailable(Unavailable::BelowGate {
                label: raw_label,
                confidence,
            });
        }

        let mut probabilities: BTreeMap<Emotion, f64> = Emotion::ALL
            .iter()
            .filter(|e| e.surfaced() == **e)
            .map(|&e| (e, 0.0))
            .collect();
        for (label, p) in self.labels.iter().zip(&probs) {
            *probabilities.entry(label.surfaced()).or_insert(0.0) += p;
        }

        ClassifierOutcome::Confident(EmotionEstimate {
            label: raw_label.surfaced(),
            confidence: clip(confidence, 0.0, 1.0),
            probabilities,
        })
    }
}

fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exp: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f64 = exp.iter().sum();
    if !(sum > 0.0) || !sum.is_finite() {
        return vec![1.0 / logits.len().max(1) as f64; logits.len()];
    }
    exp.into_iter().map(|e| e / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn features(energy: f32, centroid_hz: f32) -> FeatureVector {
        FeatureVector {
            coefficients: [0.0; N_MFCC],
            energy,
            centroid_hz,
            fallback: false,
        }
    }

    /// Model whose only informative weight pushes coefficient 0 toward `boost`
    fn model_weights(boost: &str, gain: f64) -> LinearModelWeights {
        let labels: Vec<String> = Emotion::ALL.iter().map(|e| e.as_str().to_string()).collect();
        let weights = labels
            .iter()
            .map(|l| {
                let mut row = vec![0.0; N_MFCC];
                if l == boost {
                    row[0] = gain;
                }
                row
            })
            .collect();
        LinearModelWeights {
            bias: vec![0.0; labels.len()],
            labels,
            sequence_len: 4,
            scaler_mean: vec![0.0; N_MFCC],
            scaler_scale: vec![1.0; N_MFCC],
            weights,
        }
    }

    fn sequence(c0: f32, len: usize) -> Vec<FeatureVector> {
        let mut v = features(0.1, 500.0);
        v.coefficients[0] = c0;
        vec![v; len]
    }

    #[test]
    fn test_heuristic_rules() {
        let h = SpectralHeuristic::new(&SpeechConfig::default());
        assert_eq!(h.rule(&features(0.01, 3000.0)), (Emotion::Neutral, 0.20));
        assert_eq!(h.rule(&features(0.4, 2500.0)), (Emotion::Fear, 0.90));
        assert_eq!(h.rule(&features(0.4, 300.0)), (Emotion::Anger, 0.75));
        assert_eq!(h.rule(&features(0.1, 300.0)), (Emotion::Sadness, 0.35));
    }

    #[test]
    fn test_heuristic_smooths_confidence() {
        let mut h = SpectralHeuristic::new(&SpeechConfig::default());
        h.classify(&[features(0.01, 0.0)]); // 0.20
        h.classify(&[features(0.4, 3000.0)]); // 0.90
        let outcome = h.classify(&[features(0.4, 3000.0)]); // 0.90

        match outcome {
            ClassifierOutcome::Confident(est) => {
                assert_eq!(est.label, Emotion::Fear);
                assert!((est.confidence - (0.20 + 0.90 + 0.90) / 3.0).abs() < 1e-9);
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        // Oldest value falls out of the window
        let outcome = h.classify(&[features(0.4, 3000.0)]);
        if let ClassifierOutcome::Confident(est) = outcome {
            assert!((est.confidence - 0.90).abs() < 1e-9);
        }
    }

    #[test]
    fn test_heuristic_reset_clears_window() {
        let mut h = SpectralHeuristic::new(&SpeechConfig::default());
        h.classify(&[features(0.01, 0.0)]);
        h.reset();
        let outcome = h.classify(&[features(0.4, 300.0)]);
        assert_eq!(outcome, ClassifierOutcome::Confident(EmotionEstimate::single(Emotion::Anger, 0.75)));
    }

    #[test]
    fn test_heuristic_empty_sequence() {
        let mut h = SpectralHeuristic::new(&SpeechConfig::default());
        assert!(matches!(
            h.classify(&[]),
            ClassifierOutcome::Unavailable(Unavailable::MalformedInput { .. })
        ));
    }

    #[test]
    fn test_model_confident_prediction() {
        let mut model = LinearEmotionModel::from_weights(model_weights("fear", 10.0), 0.6).unwrap();
        match model.classify(&sequence(1.0, 4)) {
            ClassifierOutcome::Confident(est) => {
                assert_eq!(est.label, Emotion::Fear);
                assert!(est.confidence > 0.99);
                let total: f64 = est.probabilities.values().sum();
                assert!((total - 1.0).abs() < 1e-9);
                assert!(!est.probabilities.contains_key(&Emotion::SituationalArousal));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_model_below_gate() {
        let mut model = LinearEmotionModel::from_weights(model_weights("fear", 10.0), 0.6).unwrap();
        // All logits equal → uniform over six labels
        match model.classify(&sequence(0.0, 4)) {
            ClassifierOutcome::Unavailable(Unavailable::BelowGate { confidence, .. }) => {
                assert!((confidence - 1.0 / 6.0).abs() < 1e-9);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_model_rejects_wrong_length() {
        let mut model = LinearEmotionModel::from_weights(model_weights("fear", 10.0), 0.6).unwrap();
        assert_eq!(
            model.classify(&sequence(1.0, 3)),
            ClassifierOutcome::Unavailable(Unavailable::MalformedInput { expected: 4, got: 3 })
        );
    }

    #[test]
    fn test_model_remaps_situational_arousal() {
        let mut model =
            LinearEmotionModel::from_weights(model_weights("situational_arousal", 10.0), 0.6).unwrap();
        match model.classify(&sequence(1.0, 4)) {
            ClassifierOutcome::Confident(est) => assert_eq!(est.label, Emotion::Neutral),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_model_load_rejects_bad_shapes() {
        let mut weights = model_weights("fear", 1.0);
        weights.bias.pop();
        assert!(matches!(
            LinearEmotionModel::from_weights(weights, 0.6),
            Err(ThreatError::ModelLoad(_))
        ));

        let mut weights = model_weights("fear", 1.0);
        weights.labels[0] = "disgust".to_string();
        assert!(LinearEmotionModel::from_weights(weights, 0.6).is_err());

        assert!(LinearEmotionModel::from_json("not json", 0.6).is_err());
        assert!(LinearEmotionModel::load(Path::new("/nonexistent/model.json"), 0.6).is_err());
    }

    #[test]
    fn test_model_json_round_trip() {
        let json = serde_json::to_string(&model_weights("anger", 5.0)).unwrap();
        let model = LinearEmotionModel::from_json(&json, 0.6).unwrap();
        assert_eq!(model.sequence_len(), 4);
        assert_eq!(model.name(), "linear-model");
    }
}

//! Situational context risk
//!
//! Scores the circumstances around the user rather than their behavior:
//! time of day, coarse location, scene brightness and motion, and how many
//! moving entities are around. The four factors are combined with weights
//! that shift toward environment and isolation when the situation already
//! looks dangerous, then smoothed over time.

use crate::config::ContextConfig;
use crate::types::{clip, ContextSnapshot, LocationContext};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Everything the engine looks at for one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextObservation {
    /// Local hour of day (0 - 23)
    pub hour: u32,
    pub location: LocationContext,
    /// Mean frame luminance (0 - 255); `None` when no frame was available
    pub mean_luminance: Option<f64>,
    /// Current motion intensity (0.0 - 1.0)
    pub motion_intensity: f64,
    /// Connected moving regions in the latest motion mask
    pub moving_entities: usize,
}

/// Relative importance of each context factor. Sums to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContextWeights {
    pub time: f64,
    pub location: f64,
    pub environment: f64,
    pub isolation: f64,
}

impl ContextWeights {
    /// Weights used when time and environment both look risky
    pub const DANGER: ContextWeights = ContextWeights {
        time: 0.15,
        location: 0.25,
        environment: 0.30,
        isolation: 0.30,
    };

    pub const NORMAL: ContextWeights = ContextWeights {
        time: 0.20,
        location: 0.30,
        environment: 0.20,
        isolation: 0.30,
    };

    pub fn total(&self) -> f64 {
        self.time + self.location + self.environment + self.isolation
    }
}

/// Stateful context scorer with exponential smoothing
#[derive(Debug, Clone)]
pub struct ContextEngine {
    config: ContextConfig,
    ema: f64,
    history: VecDeque<f64>,
}

impl ContextEngine {
    pub fn new(config: ContextConfig) -> Self {
        Self {
            history: VecDeque::with_capacity(config.history_size),
            ema: 0.0,
            config,
        }
    }

    pub fn time_risk(&self, hour: u32) -> f64 {
        let c = &self.config;
        let night = if c.night_start > c.night_end {
            hour >= c.night_start || hour <= c.night_end
        } else {
            (c.night_start..=c.night_end).contains(&hour)
        };

        if night {
            0.8
        } else if hour >= c.evening_start && hour < c.night_start {
            0.5
        } else {
            0.3
        }
    }

    pub fn location_risk(location: &LocationContext) -> f64 {
        if location.near_police {
            0.2
        } else if location.near_hospital {
            0.3
        } else if location.public_place {
            0.45
        } else {
            0.75
        }
    }

    /// Brightness and motion chaos of the scene; 0.5 when there is no frame
    pub fn environment_risk(&self, mean_luminance: Option<f64>, motion_intensity: f64) -> f64 {
        let Some(luminance) = mean_luminance else {
            return 0.5;
        };

        let brightness_risk = if luminance < self.config.dark_threshold { 0.7 } else { 0.3 };
        let motion_risk = if motion_intensity > 0.6 {
            0.7
        } else if motion_intensity > 0.3 {
            0.5
        } else {
            0.3
        };
        0.6 * brightness_risk + 0.4 * motion_risk
    }

    /// Fewer people around means more risk
    pub fn isolation_risk(moving_entities: usize) -> f64 {
        match moving_entities {
            0 => 0.85,
            1..=2 => 0.65,
            3..=5 => 0.40,
            _ => 0.25,
        }
    }

    pub fn weights(time_risk: f64, environment_risk: f64) -> ContextWeights {
        if time_risk > 0.6 && environment_risk > 0.6 {
            ContextWeights::DANGER
        } else {
            ContextWeights::NORMAL
        }
    }

    /// Score one observation and advance the smoothed context score
    pub fn update(&mut self, observation: &ContextObservation) -> ContextSnapshot {
        let time_risk = self.time_risk(observation.hour);
        let location_risk = Self::location_risk(&observation.location);
        let environment_risk = self.environment_risk(observation.mean_luminance, observation.motion_intensity);
        let isolation_risk = Self::isolation_risk(observation.moving_entities);

        let w = Self::weights(time_risk, environment_risk);
        let raw = time_risk * w.time
            + location_risk * w.location
            + environment_risk * w.environment
            + isolation_risk * w.isolation;

        let alpha = self.config.ema_alpha;
        self.ema = alpha * raw + (1.0 - alpha) * self.ema;

        self.history.push_back(self.ema);
        while self.history.len() > self.config.history_size {
            self.history.pop_front();
        }

        ContextSnapshot {
            time_risk,
            location_risk,
            environment_risk,
            isolation_risk,
            context_score: clip(self.ema, 0.0, 1.0),
        }
    }

    /// Recent smoothed scores, oldest first
    pub fn history(&self) -> impl Iterator<Item = f64> + '_ {
        self.history.iter().copied()
    }

    pub fn reset(&mut self) {
        self.ema = 0.0;
        self.history.clear();
    }
}

impl Default for ContextEngine {
    fn default() -> Self {
        Self::new(ContextConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(hour: u32) -> ContextObservation {
        ContextObservation {
            hour,
            location: LocationContext::default(),
            mean_luminance: None,
            motion_intensity: 0.0,
            moving_entities: 0,
        }
    }

    #[test]
    fn test_time_risk_bands() {
        let engine = ContextEngine::default();
        assert_eq!(engine.time_risk(23), 0.8);
        assert_eq!(engine.time_risk(22), 0.8);
        assert_eq!(engine.time_risk(3), 0.8);
        assert_eq!(engine.time_risk(5), 0.8);
        assert_eq!(engine.time_risk(6), 0.3);
        assert_eq!(engine.time_risk(18), 0.5);
        assert_eq!(engine.time_risk(21), 0.5);
        assert_eq!(engine.time_risk(12), 0.3);
    }

    #[test]
    fn test_location_priority() {
        let police_and_hospital = LocationContext {
            near_police: true,
            near_hospital: true,
            public_place: false,
        };
        assert_eq!(ContextEngine::location_risk(&police_and_hospital), 0.2);
        assert_eq!(ContextEngine::location_risk(&LocationContext::default()), 0.45);
        let private = LocationContext {
            public_place: false,
            ..LocationContext::default()
        };
        assert_eq!(ContextEngine::location_risk(&private), 0.75);
    }

    #[test]
    fn test_environment_risk() {
        let engine = ContextEngine::default();
        assert_eq!(engine.environment_risk(None, 0.9), 0.5);
        assert!((engine.environment_risk(Some(30.0), 0.9) - (0.6 * 0.7 + 0.4 * 0.7)).abs() < 1e-9);
        assert!((engine.environment_risk(Some(200.0), 0.4) - (0.6 * 0.3 + 0.4 * 0.5)).abs() < 1e-9);
        assert!((engine.environment_risk(Some(200.0), 0.1) - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_isolation_bands() {
        assert_eq!(ContextEngine::isolation_risk(0), 0.85);
        assert_eq!(ContextEngine::isolation_risk(2), 0.65);
        assert_eq!(ContextEngine::isolation_risk(5), 0.40);
        assert_eq!(ContextEngine::isolation_risk(6), 0.25);
    }

    #[test]
    fn test_weights_sum_to_one() {
        assert!((ContextWeights::DANGER.total() - 1.0).abs() < 1e-12);
        assert!((ContextWeights::NORMAL.total() - 1.0).abs() < 1e-12);
        assert_eq!(ContextEngine::weights(0.8, 0.7), ContextWeights::DANGER);
        assert_eq!(ContextEngine::weights(0.8, 0.5), ContextWeights::NORMAL);
    }

    #[test]
    fn test_ema_starts_from_zero() {
        let mut engine = ContextEngine::default();
        let obs = observation(12);
        // 0.3·0.2 + 0.45·0.3 + 0.5·0.2 + 0.85·0.3
        let raw = 0.06 + 0.135 + 0.10 + 0.255;

        let first = engine.update(&obs);
        assert!((first.context_score - 0.4 * raw).abs() < 1e-9);

        let second = engine.update(&obs);
        assert!((second.context_score - (0.4 * raw + 0.6 * 0.4 * raw)).abs() < 1e-9);
        assert!(second.context_score > first.context_score);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut engine = ContextEngine::default();
        for _ in 0..25 {
            engine.update(&observation(1));
        }
        assert_eq!(engine.history().count(), 10);

        engine.reset();
        assert_eq!(engine.history().count(), 0);
        assert!((engine.update(&observation(12)).context_score) < 0.3);
    }

    #[test]
    fn test_converges_to_raw_score() {
        let mut engine = ContextEngine::default();
        let obs = ContextObservation {
            hour: 23,
            location: LocationContext {
                public_place: false,
                ..LocationContext::default()
            },
            mean_luminance: Some(20.0),
            motion_intensity: 0.9,
            moving_entities: 0,
        };
        let mut snapshot = engine.update(&obs);
        for _ in 0..60 {
            snapshot = engine.update(&obs);
        }
        // Danger weights: 0.8·0.15 + 0.75·0.25 + 0.7·0.30 + 0.85·0.30
        let raw = 0.12 + 0.1875 + 0.21 + 0.255;
        assert!((snapshot.context_score - raw).abs() < 1e-6);
    }
}

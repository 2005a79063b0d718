//! Adaptive per-pixel background model
//!
//! A mixture of up to three Gaussians per pixel on luminance. Components are
//! kept sorted by weight; the heaviest ones whose cumulative weight reaches
//! `BACKGROUND_RATIO` describe the background.

use crate::config::MotionConfig;
use crate::motion::frame::{ForegroundMask, Frame, BACKGROUND, FOREGROUND, SHADOW};

const MAX_COMPONENTS: usize = 3;
const BACKGROUND_RATIO: f32 = 0.9;
const INITIAL_VARIANCE: f32 = 15.0;
const MIN_VARIANCE: f32 = 4.0;
const MAX_VARIANCE: f32 = 75.0;
/// Darkest ratio to a background mean still considered a shadow
const SHADOW_TAU: f32 = 0.5;

#[derive(Debug, Clone, Copy, Default)]
struct Gaussian {
    weight: f32,
    mean: f32,
    variance: f32,
}

#[derive(Debug, Clone, Copy, Default)]
struct PixelModel {
    components: [Gaussian; MAX_COMPONENTS],
    used: usize,
}

impl PixelModel {
    fn seeded(value: f32) -> Self {
        let mut model = Self::default();
        model.components[0] = Gaussian {
            weight: 1.0,
            mean: value,
            variance: INITIAL_VARIANCE,
        };
        model.used = 1;
        model
    }

    /// Classify `value` against the current background, then learn from it
    fn classify_and_update(&mut self, value: f32, params: &ModelParams) -> u8 {
        let label = self.classify(value, params);
        self.update(value, params);
        label
    }

    fn classify(&self, value: f32, params: &ModelParams) -> u8 {
        let mut cumulative = 0.0;
        let mut shadow = false;

        for g in &self.components[..self.used] {
            let diff = value - g.mean;
            if diff * diff < params.var_threshold * g.variance {
                return BACKGROUND;
            }
            if params.detect_shadows && g.mean > 0.0 {
                let ratio = value / g.mean;
                if (SHADOW_TAU..1.0).contains(&ratio) {
                    shadow = true;
                }
            }
            cumulative += g.weight;
            if cumulative > BACKGROUND_RATIO {
                break;
            }
        }

        if shadow {
            SHADOW
        } else {
            FOREGROUND
        }
    }

    fn update(&mut self, value: f32, params: &ModelParams) {
        let alpha = params.learning_rate;
        let mut matched = None;

        for (idx, g) in self.components[..self.used].iter_mut().enumerate() {
            let diff = value - g.mean;
            let d2 = diff * diff;
            if matched.is_none() && d2 < params.var_threshold_gen * g.variance {
                g.weight += alpha * (1.0 - g.weight);
                let rho = (alpha / g.weight).min(1.0);
                g.mean += rho * diff;
                g.variance = (g.variance + rho * (d2 - g.variance)).clamp(MIN_VARIANCE, MAX_VARIANCE);
                matched = Some(idx);
            } else {
                g.weight *= 1.0 - alpha;
            }
        }

        if matched.is_none() {
            let replacement = Gaussian {
                weight: alpha,
                mean: value,
                variance: INITIAL_VARIANCE,
            };
            if self.used < MAX_COMPONENTS {
                self.components[self.used] = replacement;
                self.used += 1;
            } else {
                // Sorted by weight, so the last component is the weakest.
                self.components[MAX_COMPONENTS - 1] = replacement;
            }
        }

        let total: f32 = self.components[..self.used].iter().map(|g| g.weight).sum();
        if total > 0.0 {
            for g in &mut self.components[..self.used] {
                g.weight /= total;
            }
        }

        self.components[..self.used]
            .sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal));
    }
}

#[derive(Debug, Clone, Copy)]
struct ModelParams {
    learning_rate: f32,
    var_threshold: f32,
    var_threshold_gen: f32,
    detect_shadows: bool,
}

/// Mixture-of-Gaussians background subtractor
#[derive(Debug, Clone)]
pub struct BackgroundModel {
    params: ModelParams,
    width: usize,
    height: usize,
    pixels: Vec<PixelModel>,
}

impl BackgroundModel {
    pub fn new(config: &MotionConfig) -> Self {
        Self {
            params: ModelParams {
                learning_rate: config.learning_rate,
                var_threshold: config.var_threshold,
                var_threshold_gen: config.var_threshold_gen,
                detect_shadows: config.shadow_removal,
            },
            width: 0,
            height: 0,
            pixels: Vec::new(),
        }
    }

    /// Forget everything learned so far
    pub fn reset(&mut self) {
        self.width = 0;
        self.height = 0;
        self.pixels.clear();
    }

    pub fn is_initialized(&self) -> bool {
        !self.pixels.is_empty()
    }

    /// Dimensions the model was learned on
    pub fn dimensions(&self) -> Option<(usize, usize)> {
        self.is_initialized().then_some((self.width, self.height))
    }

    /// Subtract the background from `frame` and update the model.
    ///
    /// The first frame (or the first after a size change) seeds the model
    /// and yields an empty mask.
    pub fn apply(&mut self, frame: &Frame) -> ForegroundMask {
        if self.dimensions() != Some((frame.width(), frame.height())) {
            self.width = frame.width();
            self.height = frame.height();
            self.pixels = frame
                .pixels()
                .iter()
                .map(|&p| PixelModel::seeded(p as f32))
                .collect();
            return ForegroundMask::new(self.width, self.height);
        }

        let params = self.params;
        let values = self
            .pixels
            .iter_mut()
            .zip(frame.pixels())
            .map(|(model, &p)| model.classify_and_update(p as f32, &params))
            .collect();

        ForegroundMask::from_values(self.width, self.height, values)
    }
}

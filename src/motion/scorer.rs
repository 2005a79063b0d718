//! Motion intensity scoring
//!
//! Maps each frame to a stabilized motion intensity in [0, 1]:
//! background subtraction → shadow removal → median + opening → foreground
//! ratio → adaptive scaling → moving average with a non-zero floor.

use crate::config::MotionConfig;
use crate::motion::background::BackgroundModel;
use crate::motion::frame::Frame;
use crate::motion::morphology::{count_regions, median_filter, open};
use crate::types::{clip, MotionPhase, MotionReading};
use std::collections::VecDeque;

/// Upper edge of the band where small motion is amplified
const LOW_SIGNAL_BAND: f64 = 0.15;
const LOW_SIGNAL_GAIN: f64 = 1.5;

/// Fusion reliability proxies per phase
const QUALITY_ACTIVE: f64 = 0.6;
const QUALITY_WARMING_UP: f64 = 0.3;
const QUALITY_MISSING: f64 = 0.0;

/// Stateful motion scorer
pub struct MotionScorer {
    config: MotionConfig,
    background: BackgroundModel,
    history: VecDeque<f64>,
    frame_count: usize,
}

impl MotionScorer {
    pub fn new(config: MotionConfig) -> Self {
        Self {
            background: BackgroundModel::new(&config),
            history: VecDeque::with_capacity(config.smoothing_window),
            frame_count: 0,
            config,
        }
    }

    /// Whether the warm-up period has passed
    pub fn is_warmed_up(&self) -> bool {
        self.frame_count >= self.config.warmup_frames
    }

    /// Rebuild the background model from scratch (camera switch, rotation)
    pub fn reset(&mut self) {
        self.background.reset();
        self.history.clear();
        self.frame_count = 0;
    }

    /// Reading used when no frame is available this tick
    pub fn missing_frame(&self) -> MotionReading {
        MotionReading {
            score: self.config.missing_score,
            mask: None,
            blob_count: 0,
            phase: MotionPhase::Missing,
            quality: QUALITY_MISSING,
        }
    }

    /// Score one frame
    pub fn score(&mut self, frame: &Frame) -> MotionReading {
        if let Some(dims) = self.background.dimensions() {
            if dims != (frame.width(), frame.height()) {
                log::info!(
                    "Frame size changed from {}x{} to {}x{}, rebuilding background",
                    dims.0,
                    dims.1,
                    frame.width(),
                    frame.height()
                );
                self.reset();
            }
        }

        self.frame_count += 1;
        let mut mask = self.background.apply(frame);

        if self.frame_count < self.config.warmup_frames {
            return MotionReading {
                score: self.config.warmup_score,
                mask: Some(mask),
                blob_count: 0,
                phase: MotionPhase::WarmingUp,
                quality: QUALITY_WARMING_UP,
            };
        }

        if self.config.shadow_removal {
            mask.drop_shadows();
        }
        let mask = open(&median_filter(&mask, self.config.median_kernel));

        let ratio = mask.foreground_ratio();
        let raw = self.scale_ratio(ratio);
        let min_blob = ((frame.area() as f64 * self.config.min_blob_ratio).ceil() as usize).max(1);
        let blob_count = count_regions(&mask, min_blob);
        let score = self.smooth(raw);

        log::trace!(
            "motion ratio={:.5} raw={:.3} smoothed={:.3} blobs={}",
            ratio,
            raw,
            score,
            blob_count
        );

        MotionReading {
            score,
            mask: Some(mask),
            blob_count,
            phase: MotionPhase::Active,
            quality: QUALITY_ACTIVE,
        }
    }

    /// Map a foreground ratio to an unsmoothed score
    fn scale_ratio(&self, ratio: f64) -> f64 {
        if ratio < self.config.min_area_ratio {
            return 0.0;
        }
        let mut raw = ratio / self.config.min_area_ratio * self.config.sensitivity;
        if raw > 0.0 && raw < LOW_SIGNAL_BAND {
            raw *= LOW_SIGNAL_GAIN;
        }
        clip(raw, 0.0, 1.0)
    }

    fn smooth(&mut self, raw: f64) -> f64 {
        self.history.push_back(raw);
        while self.history.len() > self.config.smoothing_window {
            self.history.pop_front();
        }
        let mean = self.history.iter().sum::<f64>() / self.history.len() as f64;
        clip(mean.max(self.config.score_floor), 0.0, 1.0)
    }
}

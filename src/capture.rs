//! Capture sources
//!
//! Hardware is reached through the [`AudioCapture`] and [`FrameCapture`]
//! traits. When no device is available the monitor runs on the synthetic
//! sources defined here, so the rest of the pipeline always has input.

use crate::error::ThreatError;
use crate::motion::Frame;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::PI;
use std::thread;
use std::time::{Duration, Instant};

/// Microphone-like audio source
pub trait AudioCapture: Send {
    fn open(&mut self) -> Result<(), ThreatError>;

    /// Block until the next chunk of normalized samples is available.
    /// `None` means nothing arrived this time; the caller may retry.
    fn read_chunk(&mut self) -> Option<Vec<f32>>;

    /// Release the device. Safe to call more than once.
    fn close(&mut self);

    fn sample_rate(&self) -> u32;
}

/// Camera-like frame source
pub trait FrameCapture: Send {
    fn open(&mut self) -> Result<(), ThreatError>;

    /// Block until the next frame is available
    fn read_frame(&mut self) -> Option<Frame>;

    /// Release the device. Safe to call more than once.
    fn close(&mut self);
}

/// Sleeps so successive reads follow a fixed cadence
#[derive(Debug, Clone)]
struct Pacer {
    period: Duration,
    next: Option<Instant>,
}

impl Pacer {
    fn new(period: Duration) -> Self {
        Self { period, next: None }
    }

    fn wait(&mut self) {
        let now = Instant::now();
        let deadline = self.next.unwrap_or(now);
        if deadline > now {
            thread::sleep(deadline - now);
        }
        // Do not accumulate debt after a stall.
        self.next = Some(deadline.max(now) + self.period);
    }

    fn reset(&mut self) {
        self.next = None;
    }
}

/// Standard normal sample (Box-Muller)
fn gaussian(rng: &mut StdRng) -> f32 {
    let u1: f32 = rng.gen_range(f32::EPSILON..1.0);
    let u2: f32 = rng.gen::<f32>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

/// Synthetic microphone: 3 s of a noisy 440 Hz tone out of every 7 s, low
/// noise otherwise
pub struct SyntheticAudioSource {
    sample_rate: u32,
    chunk_size: usize,
    rng: StdRng,
    position: u64,
    pacer: Option<Pacer>,
    open: bool,
}

impl SyntheticAudioSource {
    const TONE_HZ: f32 = 440.0;
    const TONE_AMPLITUDE: f32 = 0.1;
    const TONE_NOISE: f32 = 0.02;
    const IDLE_NOISE: f32 = 0.01;
    const CYCLE_SECONDS: u64 = 7;
    const ACTIVE_SECONDS: u64 = 3;

    /// Real-time source paced at `chunk_size / sample_rate`
    pub fn new(sample_rate: u32, chunk_size: usize) -> Self {
        let period = Duration::from_secs_f64(chunk_size as f64 / sample_rate.max(1) as f64);
        Self {
            sample_rate,
            chunk_size: chunk_size.max(1),
            rng: StdRng::from_entropy(),
            position: 0,
            pacer: Some(Pacer::new(period)),
            open: false,
        }
    }

    /// Deterministic, unpaced source for tests and offline simulation
    pub fn seeded(sample_rate: u32, chunk_size: usize, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            pacer: None,
            ..Self::new(sample_rate, chunk_size)
        }
    }

    /// Whether the synthetic timeline is inside a tone burst at `sample`
    fn tone_active(&self, sample: u64) -> bool {
        let second = sample / self.sample_rate.max(1) as u64;
        second % Self::CYCLE_SECONDS < Self::ACTIVE_SECONDS
    }

    /// Generate the next chunk without pacing
    pub fn generate(&mut self) -> Vec<f32> {
        let rate = self.sample_rate.max(1) as f32;
        let mut chunk = Vec::with_capacity(self.chunk_size);
        for _ in 0..self.chunk_size {
            let sample = if self.tone_active(self.position) {
                let t = (self.position % self.sample_rate.max(1) as u64) as f32 / rate;
                Self::TONE_AMPLITUDE * (2.0 * PI * Self::TONE_HZ * t).sin()
                    + Self::TONE_NOISE * gaussian(&mut self.rng)
            } else {
                Self::IDLE_NOISE * gaussian(&mut self.rng)
            };
            chunk.push(sample.clamp(-1.0, 1.0));
            self.position += 1;
        }
        chunk
    }
}

impl AudioCapture for SyntheticAudioSource {
    fn open(&mut self) -> Result<(), ThreatError> {
        self.open = true;
        if let Some(pacer) = self.pacer.as_mut() {
            pacer.reset();
        }
        Ok(())
    }

    fn read_chunk(&mut self) -> Option<Vec<f32>> {
        if !self.open {
            return None;
        }
        if let Some(pacer) = self.pacer.as_mut() {
            pacer.wait();
        }
        Some(self.generate())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Synthetic camera: grey scene with a bright square sweeping back and forth
pub struct SyntheticFrameSource {
    width: usize,
    height: usize,
    square: usize,
    step: usize,
    frame_index: usize,
    pacer: Option<Pacer>,
    open: bool,
}

impl SyntheticFrameSource {
    const BACKGROUND_LUMA: u8 = 90;
    const SQUARE_LUMA: u8 = 230;

    /// Real-time source at `fps` frames per second
    pub fn new(width: usize, height: usize, fps: f64) -> Self {
        let period = Duration::from_secs_f64(1.0 / fps.max(0.1));
        Self {
            width: width.max(1),
            height: height.max(1),
            square: (width.min(height) / 8).max(1),
            step: 2,
            frame_index: 0,
            pacer: Some(Pacer::new(period)),
            open: false,
        }
    }

    /// Unpaced source for tests and offline simulation
    pub fn unpaced(width: usize, height: usize) -> Self {
        Self {
            pacer: None,
            ..Self::new(width, height, 10.0)
        }
    }

    /// Render the next frame without pacing
    pub fn render(&mut self) -> Frame {
        let mut frame = Frame::uniform(self.width, self.height, Self::BACKGROUND_LUMA);
        let travel = self.width.saturating_sub(self.square).max(1);
        let offset = (self.frame_index * self.step) % (2 * travel);
        let x0 = if offset < travel { offset } else { 2 * travel - offset };
        let y0 = (self.height - self.square.min(self.height)) / 2;

        let width = self.width;
        let pixels = frame.pixels_mut();
        for y in y0..(y0 + self.square).min(self.height) {
            for x in x0..(x0 + self.square).min(self.width) {
                pixels[y * width + x] = Self::SQUARE_LUMA;
            }
        }

        self.frame_index += 1;
        frame
    }
}

impl FrameCapture for SyntheticFrameSource {
    fn open(&mut self) -> Result<(), ThreatError> {
        self.open = true;
        if let Some(pacer) = self.pacer.as_mut() {
            pacer.reset();
        }
        Ok(())
    }

    fn read_frame(&mut self) -> Option<Frame> {
        if !self.open {
            return None;
        }
        if let Some(pacer) = self.pacer.as_mut() {
            pacer.wait();
        }
        Some(self.render())
    }

    fn close(&mut self) {
        self.open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn test_synthetic_audio_requires_open() {
        let mut source = SyntheticAudioSource::seeded(16_000, 1024, 7);
        assert!(source.read_chunk().is_none());
        source.open().unwrap();
        assert_eq!(source.read_chunk().map(|c| c.len()), Some(1024));
        source.close();
        assert!(source.read_chunk().is_none());
    }

    #[test]
    fn test_synthetic_audio_bursts() {
        let mut source = SyntheticAudioSource::seeded(1_000, 1_000, 42);
        let seconds: Vec<f32> = (0..7).map(|_| rms(&source.generate())).collect();

        // Tone seconds carry ~0.07 RMS, idle seconds ~0.01
        for &level in &seconds[..3] {
            assert!(level > 0.05, "tone rms {level}");
        }
        for &level in &seconds[3..] {
            assert!(level < 0.03, "idle rms {level}");
        }
    }

    #[test]
    fn test_seeded_audio_is_reproducible() {
        let mut a = SyntheticAudioSource::seeded(16_000, 256, 3);
        let mut b = SyntheticAudioSource::seeded(16_000, 256, 3);
        assert_eq!(a.generate(), b.generate());
    }

    #[test]
    fn test_synthetic_frames_move() {
        let mut source = SyntheticFrameSource::unpaced(64, 48);
        source.open().unwrap();
        let first = source.read_frame().unwrap();
        let second = source.read_frame().unwrap();

        assert_eq!((first.width(), first.height()), (64, 48));
        assert_ne!(first.pixels(), second.pixels());
        assert!(first.mean_luminance() > 90.0);
    }

    #[test]
    fn test_square_stays_in_bounds() {
        let mut source = SyntheticFrameSource::unpaced(20, 20);
        for _ in 0..100 {
            let frame = source.render();
            let lit = frame.pixels().iter().filter(|&&p| p == 230).count();
            assert_eq!(lit, 4);
        }
    }
}

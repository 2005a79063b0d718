//! Spectral feature extraction
//!
//! This module turns a raw audio window into a fixed-length MFCC descriptor:
//! - DC removal and pre-emphasis
//! - 25 ms Hamming frames with a 10 ms hop
//! - FFT power spectrum through a 26-band triangular Mel filterbank
//! - Log energies, DCT-II, first 13 coefficients, mean-pooled and z-normalized
//!
//! Alongside the coefficients it reports two window-level descriptors used by
//! the spectral heuristic: RMS energy and mean spectral centroid.

use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

/// Number of cepstral coefficients kept
pub const N_MFCC: usize = 13;
/// Number of triangular Mel filters
pub const N_MEL_FILTERS: usize = 26;
/// Minimum FFT size
pub const NFFT: usize = 512;
/// Inputs shorter than this yield the fallback vector
pub const MIN_SAMPLES: usize = 200;

const PRE_EMPHASIS: f32 = 0.97;
const FRAME_SECONDS: f64 = 0.025;
const HOP_SECONDS: f64 = 0.010;
const NORM_EPSILON: f64 = 1e-10;

/// Fixed-length spectral descriptor of one audio window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector {
    /// Mean-pooled, z-normalized MFCCs
    pub coefficients: [f32; N_MFCC],
    /// RMS of the DC-removed window
    pub energy: f32,
    /// Mean power-spectrum centroid (Hz)
    pub centroid_hz: f32,
    /// Set when the input was too short to analyze
    pub fallback: bool,
}

impl FeatureVector {
    /// All-zero vector returned for insufficient input
    pub fn fallback() -> Self {
        Self {
            coefficients: [0.0; N_MFCC],
            energy: 0.0,
            centroid_hz: 0.0,
            fallback: true,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback
    }
}

/// MFCC extractor with cached FFT plans and filterbanks
pub struct FeatureExtractor {
    planner: FftPlanner<f32>,
    filterbank: Option<Filterbank>,
    dct: Vec<f32>,
}

struct Filterbank {
    sample_rate: u32,
    nfft: usize,
    filters: Vec<Vec<f32>>,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureExtractor {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
            filterbank: None,
            dct: dct_table(),
        }
    }

    /// Extract features from raw samples.
    ///
    /// Deterministic for a given input; never fails. Inputs shorter than
    /// `MIN_SAMPLES` or than one analysis frame yield `FeatureVector::fallback()`.
    pub fn extract(&mut self, samples: &[f32], sample_rate: u32) -> FeatureVector {
        let n = samples.len();
        if n < MIN_SAMPLES || sample_rate == 0 {
            return FeatureVector::fallback();
        }

        let frame_len = (FRAME_SECONDS * sample_rate as f64) as usize;
        let hop = ((HOP_SECONDS * sample_rate as f64) as usize).max(1);
        if frame_len == 0 || frame_len >= n {
            return FeatureVector::fallback();
        }

        let mean = samples.iter().map(|&s| s as f64).sum::<f64>() / n as f64;
        let centered: Vec<f32> = samples.iter().map(|&s| s - mean as f32).collect();
        let energy = (centered.iter().map(|&s| (s as f64).powi(2)).sum::<f64>() / n as f64).sqrt();

        let mut emphasized = Vec::with_capacity(n);
        emphasized.push(centered[0]);
        emphasized.extend(centered.windows(2).map(|w| w[1] - PRE_EMPHASIS * w[0]));

        let nfft = frame_len.next_power_of_two().max(NFFT);
        let fft = self.planner.plan_fft_forward(nfft);
        let filters = Self::filterbank(&mut self.filterbank, sample_rate, nfft);
        let window = hamming(frame_len);
        let bin_hz = sample_rate as f64 / nfft as f64;

        let mut sums = [0.0f64; N_MFCC];
        let mut centroid_sum = 0.0f64;
        let mut centroid_frames = 0usize;
        let mut frames = 0usize;
        let mut spectrum = vec![Complex32::default(); nfft];
        let mut power = vec![0.0f32; nfft / 2 + 1];
        let mut log_mel = [0.0f32; N_MEL_FILTERS];

        let mut start = 0;
        while start + frame_len < n {
            power_spectrum(&fft, &emphasized[start..start + frame_len], &window, &mut spectrum, &mut power);
            for (out, filter) in log_mel.iter_mut().zip(filters.iter()) {
                let e: f32 = filter.iter().zip(&power).map(|(w, p)| w * p).sum();
                *out = e.max(f32::EPSILON).ln();
            }
            for (k, sum) in sums.iter_mut().enumerate() {
                let row = &self.dct[k * N_MEL_FILTERS..(k + 1) * N_MEL_FILTERS];
                *sum += row.iter().zip(&log_mel).map(|(c, x)| c * x).sum::<f32>() as f64;
            }

            // Centroid is measured on the un-emphasized signal.
            power_spectrum(&fft, &centered[start..start + frame_len], &window, &mut spectrum, &mut power);
            let total: f64 = power.iter().map(|&p| p as f64).sum();
            if total > 0.0 {
                let weighted: f64 = power
                    .iter()
                    .enumerate()
                    .map(|(k, &p)| k as f64 * bin_hz * p as f64)
                    .sum();
                centroid_sum += weighted / total;
                centroid_frames += 1;
            }

            frames += 1;
            start += hop;
        }

        if frames == 0 {
            return FeatureVector::fallback();
        }

        let pooled: Vec<f64> = sums.iter().map(|s| s / frames as f64).collect();
        let mu = pooled.iter().sum::<f64>() / N_MFCC as f64;
        let sigma = (pooled.iter().map(|c| (c - mu).powi(2)).sum::<f64>() / N_MFCC as f64).sqrt();

        let mut coefficients = [0.0f32; N_MFCC];
        for (out, c) in coefficients.iter_mut().zip(&pooled) {
            *out = ((c - mu) / (sigma + NORM_EPSILON)) as f32;
        }

        FeatureVector {
            coefficients,
            energy: energy as f32,
            centroid_hz: if centroid_frames > 0 {
                (centroid_sum / centroid_frames as f64) as f32
            } else {
                0.0
            },
            fallback: false,
        }
    }

    fn filterbank(cache: &mut Option<Filterbank>, sample_rate: u32, nfft: usize) -> &[Vec<f32>] {
        let stale = !matches!(cache, Some(fb) if fb.sample_rate == sample_rate && fb.nfft == nfft);
        if stale {
            *cache = Some(Filterbank {
                sample_rate,
                nfft,
                filters: mel_filterbank(sample_rate, nfft, N_MEL_FILTERS),
            });
        }
        match cache {
            Some(fb) => &fb.filters,
            None => &[],
        }
    }
}

/// Windowed, zero-padded power spectrum (`|X|² / nfft`) of one frame
fn power_spectrum(
    fft: &Arc<dyn Fft<f32>>,
    frame: &[f32],
    window: &[f32],
    spectrum: &mut [Complex32],
    power: &mut [f32],
) {
    let nfft = spectrum.len();
    for (i, slot) in spectrum.iter_mut().enumerate() {
        *slot = match (frame.get(i), window.get(i)) {
            (Some(s), Some(w)) => Complex32::new(s * w, 0.0),
            _ => Complex32::default(),
        };
    }
    fft.process(spectrum);
    for (p, x) in power.iter_mut().zip(spectrum.iter()) {
        *p = x.norm_sqr() / nfft as f32;
    }
}

fn hamming(len: usize) -> Vec<f32> {
    if len == 1 {
        return vec![1.0];
    }
    (0..len)
        .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f32 / (len - 1) as f32).cos())
        .collect()
}

fn hz_to_mel(hz: f64) -> f64 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f64) -> f64 {
    700.0 * (10f64.powf(mel / 2595.0) - 1.0)
}

/// Triangular filters evenly spaced on the Mel scale from 0 to Nyquist
pub fn mel_filterbank(sample_rate: u32, nfft: usize, n_filters: usize) -> Vec<Vec<f32>> {
    let n_bins = nfft / 2 + 1;
    let high_mel = hz_to_mel((sample_rate / 2) as f64);
    let bins: Vec<usize> = (0..n_filters + 2)
        .map(|i| {
            let mel = high_mel * i as f64 / (n_filters + 1) as f64;
            let bin = ((nfft + 1) as f64 * mel_to_hz(mel) / sample_rate as f64).floor();
            (bin.max(0.0) as usize).min(nfft / 2)
        })
        .collect();

    (1..=n_filters)
        .map(|i| {
            let (left, center, right) = (bins[i - 1], bins[i], bins[i + 1]);
            let mut filter = vec![0.0f32; n_bins];
            if center == left || right == center {
                return filter;
            }
            for k in left..center {
                filter[k] = (k - left) as f32 / (center - left) as f32;
            }
            for k in center..right {
                filter[k] = (right - k) as f32 / (right - center) as f32;
            }
            filter
        })
        .collect()
}

/// Unnormalized DCT-II rows `cos(π (m + ½) k / M)` for the kept coefficients
fn dct_table() -> Vec<f32> {
    let m = N_MEL_FILTERS as f32;
    (0..N_MFCC)
        .flat_map(|k| (0..N_MEL_FILTERS).map(move |n| (PI * (n as f32 + 0.5) * k as f32 / m).cos()))
        .collect()
}

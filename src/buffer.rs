//! Capture buffers
//!
//! Decouples capture cadence from analysis cadence. Producers append without
//! waiting on the analysis tick; the tick reads the most recent data and never
//! waits on a producer.

use crate::motion::Frame;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// A fixed-length slice of recent audio handed to one analysis tick
#[derive(Debug, Clone, PartialEq)]
pub struct AudioWindow {
    /// Normalized samples, oldest first
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Samples that came from capture; the remainder is left zero padding
    pub filled: usize,
}

impl AudioWindow {
    /// Window built from samples that are all real capture data
    pub fn from_samples(samples: Vec<f32>, sample_rate: u32) -> Self {
        let filled = samples.len();
        Self {
            samples,
            sample_rate,
            filled,
        }
    }

    /// The captured part of the window, without left padding
    pub fn captured(&self) -> &[f32] {
        &self.samples[self.samples.len().saturating_sub(self.filled)..]
    }

    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Bounded rolling store of raw audio samples, shared between threads
pub struct SampleBuffer {
    samples: Mutex<VecDeque<f32>>,
    capacity: usize,
    sample_rate: u32,
}

impl SampleBuffer {
    /// Create a buffer holding at most `capacity` samples
    pub fn new(capacity: usize, sample_rate: u32) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            sample_rate,
        }
    }

    /// Create a buffer holding `seconds` of audio
    pub fn with_duration(seconds: f64, sample_rate: u32) -> Self {
        Self::new((seconds * sample_rate as f64).round() as usize, sample_rate)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a chunk, dropping the oldest samples beyond capacity
    pub fn push(&self, chunk: &[f32]) {
        // Only the newest `capacity` samples of an oversized chunk can survive.
        let chunk = if chunk.len() > self.capacity {
            &chunk[chunk.len() - self.capacity..]
        } else {
            chunk
        };

        let mut samples = self.samples.lock();
        let overflow = (samples.len() + chunk.len()).saturating_sub(self.capacity);
        samples.drain(..overflow);
        samples.extend(chunk.iter().map(|s| if s.is_finite() { *s } else { 0.0 }));
    }

    /// Most recent `duration_seconds` of audio, left-padded with zeros when
    /// the buffer holds less.
    pub fn take_window(&self, duration_seconds: f64) -> AudioWindow {
        let required = (duration_seconds.max(0.0) * self.sample_rate as f64).round() as usize;
        let mut window = vec![0.0; required];

        let filled = {
            let samples = self.samples.lock();
            let available = samples.len().min(required);
            let start = samples.len() - available;
            for (slot, sample) in window[required - available..]
                .iter_mut()
                .zip(samples.range(start..))
            {
                *slot = *sample;
            }
            available
        };

        AudioWindow {
            samples: window,
            sample_rate: self.sample_rate,
            filled,
        }
    }

    pub fn clear(&self) {
        self.samples.lock().clear();
    }
}

/// Latest-frame slot: capacity one, newest frame wins
#[derive(Default)]
pub struct FrameSlot {
    latest: Mutex<Option<Frame>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace any unread frame
    pub fn publish(&self, frame: Frame) {
        *self.latest.lock() = Some(frame);
    }

    /// Take the newest frame, if one arrived since the last take
    pub fn take(&self) -> Option<Frame> {
        self.latest.lock().take()
    }

    pub fn clear(&self) {
        self.latest.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_left_pads_short_history() {
        let buffer = SampleBuffer::new(100, 10);
        buffer.push(&[1.0, 2.0, 3.0]);

        let window = buffer.take_window(0.5);
        assert_eq!(window.samples, vec![0.0, 0.0, 1.0, 2.0, 3.0]);
        assert_eq!(window.filled, 3);
        assert_eq!(window.captured(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_window_keeps_most_recent() {
        let buffer = SampleBuffer::new(100, 10);
        let samples: Vec<f32> = (0..20).map(|i| i as f32).collect();
        buffer.push(&samples);

        let window = buffer.take_window(0.4);
        assert_eq!(window.samples, vec![16.0, 17.0, 18.0, 19.0]);
        assert_eq!(window.filled, 4);
    }

    #[test]
    fn test_capacity_is_bounded() {
        let buffer = SampleBuffer::new(8, 10);
        for i in 0..10 {
            buffer.push(&[i as f32; 3]);
        }
        assert_eq!(buffer.len(), 8);

        let window = buffer.take_window(0.8);
        assert_eq!(window.samples[7], 9.0);
        assert_eq!(window.samples[0], 7.0);
    }

    #[test]
    fn test_oversized_chunk_keeps_tail() {
        let buffer = SampleBuffer::new(4, 10);
        let samples: Vec<f32> = (0..10).map(|i| i as f32).collect();
        buffer.push(&samples);

        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.take_window(0.4).samples, vec![6.0, 7.0, 8.0, 9.0]);
    }

    #[test]
    fn test_non_finite_samples_zeroed() {
        let buffer = SampleBuffer::new(4, 10);
        buffer.push(&[f32::NAN, 0.5, f32::INFINITY]);
        assert_eq!(buffer.take_window(0.3).samples, vec![0.0, 0.5, 0.0]);
    }

    #[test]
    fn test_empty_buffer_yields_silence() {
        let buffer = SampleBuffer::with_duration(1.0, 100);
        let window = buffer.take_window(0.5);
        assert_eq!(window.samples.len(), 50);
        assert_eq!(window.filled, 0);
        assert!(window.samples.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_frame_slot_newest_wins() {
        let slot = FrameSlot::new();
        slot.publish(Frame::uniform(2, 2, 10));
        slot.publish(Frame::uniform(2, 2, 20));

        let frame = slot.take().unwrap();
        assert_eq!(frame.pixels()[0], 20);
        assert!(slot.take().is_none());
    }
}

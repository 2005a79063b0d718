//! Grayscale frames and foreground masks

use crate::error::ThreatError;

/// Mask value for foreground pixels
pub const FOREGROUND: u8 = 255;
/// Mask value for pixels classified as shadow
pub const SHADOW: u8 = 127;
/// Mask value for background pixels
pub const BACKGROUND: u8 = 0;

/// 8-bit luminance frame, row-major
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

impl Frame {
    /// Wrap luminance pixels; `pixels.len()` must equal `width * height`
    pub fn from_luma(width: usize, height: usize, pixels: Vec<u8>) -> Result<Self, ThreatError> {
        if width == 0 || height == 0 || pixels.len() != width * height {
            return Err(ThreatError::Capture(format!(
                "luma frame {}x{} expects {} pixels, got {}",
                width,
                height,
                width * height,
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Convert interleaved RGB (or BGR with `bgr = true`) to luminance
    pub fn from_rgb(width: usize, height: usize, data: &[u8], bgr: bool) -> Result<Self, ThreatError> {
        if data.len() != width * height * 3 {
            return Err(ThreatError::Capture(format!(
                "rgb frame {}x{} expects {} bytes, got {}",
                width,
                height,
                width * height * 3,
                data.len()
            )));
        }
        let pixels = data
            .chunks_exact(3)
            .map(|px| {
                let (r, b) = if bgr { (px[2], px[0]) } else { (px[0], px[2]) };
                let g = px[1];
                (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32).round() as u8
            })
            .collect();
        Self::from_luma(width, height, pixels)
    }

    /// Frame with every pixel set to `value`
    pub fn uniform(width: usize, height: usize, value: u8) -> Self {
        Self {
            width,
            height,
            pixels: vec![value; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn area(&self) -> usize {
        self.width * self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    /// Mean luminance (0 - 255)
    pub fn mean_luminance(&self) -> f64 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.pixels.iter().map(|&p| p as u64).sum();
        sum as f64 / self.pixels.len() as f64
    }
}

/// Per-pixel classification produced by background subtraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForegroundMask {
    width: usize,
    height: usize,
    values: Vec<u8>,
}

impl ForegroundMask {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            values: vec![BACKGROUND; width * height],
        }
    }

    pub(crate) fn from_values(width: usize, height: usize, values: Vec<u8>) -> Self {
        debug_assert_eq!(values.len(), width * height);
        Self {
            width,
            height,
            values,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn values(&self) -> &[u8] {
        &self.values
    }

    pub(crate) fn values_mut(&mut self) -> &mut [u8] {
        &mut self.values
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.values[y * self.width + x]
    }

    /// Zero out shadow-classified pixels
    pub fn drop_shadows(&mut self) {
        for v in &mut self.values {
            if *v == SHADOW {
                *v = BACKGROUND;
            }
        }
    }

    pub fn count_nonzero(&self) -> usize {
        self.values.iter().filter(|&&v| v != BACKGROUND).count()
    }

    /// Fraction of pixels that are non-zero
    pub fn foreground_ratio(&self) -> f64 {
        let area = (self.width * self.height).max(1);
        self.count_nonzero() as f64 / area as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_mismatched_dimensions() {
        assert!(Frame::from_luma(4, 4, vec![0; 15]).is_err());
        assert!(Frame::from_rgb(2, 2, &[0; 11], false).is_err());
    }

    #[test]
    fn test_rgb_and_bgr_conversion() {
        let red = Frame::from_rgb(1, 1, &[255, 0, 0], false).unwrap();
        let red_bgr = Frame::from_rgb(1, 1, &[0, 0, 255], true).unwrap();
        assert_eq!(red.pixels()[0], 76);
        assert_eq!(red, red_bgr);
    }

    #[test]
    fn test_mean_luminance() {
        let frame = Frame::from_luma(2, 2, vec![0, 100, 200, 100]).unwrap();
        assert!((frame.mean_luminance() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_drop_shadows() {
        let mut mask = ForegroundMask::from_values(3, 1, vec![FOREGROUND, SHADOW, BACKGROUND]);
        assert_eq!(mask.count_nonzero(), 2);
        mask.drop_shadows();
        assert_eq!(mask.values(), &[FOREGROUND, BACKGROUND, BACKGROUND]);
    }
}

//! Mask denoising and region counting

use crate::motion::frame::{ForegroundMask, BACKGROUND, FOREGROUND};

/// Median filter with a square `kernel` (odd), replicating edges
pub fn median_filter(mask: &ForegroundMask, kernel: usize) -> ForegroundMask {
    let (w, h) = (mask.width(), mask.height());
    if kernel <= 1 || w == 0 || h == 0 {
        return mask.clone();
    }
    let radius = (kernel / 2) as isize;
    let mut window = Vec::with_capacity(kernel * kernel);
    let mut out = Vec::with_capacity(w * h);

    for y in 0..h as isize {
        for x in 0..w as isize {
            window.clear();
            for dy in -radius..=radius {
                let yy = (y + dy).clamp(0, h as isize - 1) as usize;
                for dx in -radius..=radius {
                    let xx = (x + dx).clamp(0, w as isize - 1) as usize;
                    window.push(mask.get(xx, yy));
                }
            }
            let mid = window.len() / 2;
            let (_, median, _) = window.select_nth_unstable(mid);
            out.push(*median);
        }
    }

    ForegroundMask::from_values(w, h, out)
}

/// 3x3 cross structuring element offsets
const CROSS: [(isize, isize); 5] = [(0, 0), (-1, 0), (1, 0), (0, -1), (0, 1)];

fn erode(mask: &ForegroundMask) -> ForegroundMask {
    morph(mask, |vals| vals.iter().copied().min().unwrap_or(BACKGROUND))
}

fn dilate(mask: &ForegroundMask) -> ForegroundMask {
    morph(mask, |vals| vals.iter().copied().max().unwrap_or(BACKGROUND))
}

fn morph(mask: &ForegroundMask, reduce: impl Fn(&[u8]) -> u8) -> ForegroundMask {
    let (w, h) = (mask.width() as isize, mask.height() as isize);
    let mut vals = [0u8; 5];
    let mut out = Vec::with_capacity(mask.values().len());

    for y in 0..h {
        for x in 0..w {
            let mut n = 0;
            for (dx, dy) in CROSS {
                let (xx, yy) = (x + dx, y + dy);
                if xx >= 0 && yy >= 0 && xx < w && yy < h {
                    vals[n] = mask.get(xx as usize, yy as usize);
                    n += 1;
                }
            }
            out.push(reduce(&vals[..n]));
        }
    }

    ForegroundMask::from_values(mask.width(), mask.height(), out)
}

/// Morphological opening (erode then dilate) with a 3x3 cross
pub fn open(mask: &ForegroundMask) -> ForegroundMask {
    dilate(&erode(mask))
}

/// Count 4-connected foreground regions of at least `min_area` pixels
pub fn count_regions(mask: &ForegroundMask, min_area: usize) -> usize {
    let (w, h) = (mask.width(), mask.height());
    let mut visited = vec![false; w * h];
    let mut stack = Vec::new();
    let mut regions = 0;

    for start in 0..w * h {
        if visited[start] || mask.values()[start] != FOREGROUND {
            continue;
        }
        visited[start] = true;
        stack.push(start);
        let mut area = 0;

        while let Some(idx) = stack.pop() {
            area += 1;
            let (x, y) = (idx % w, idx / w);
            let neighbors = [
                (x > 0).then(|| idx - 1),
                (x + 1 < w).then(|| idx + 1),
                (y > 0).then(|| idx - w),
                (y + 1 < h).then(|| idx + w),
            ];
            for n in neighbors.into_iter().flatten() {
                if !visited[n] && mask.values()[n] == FOREGROUND {
                    visited[n] = true;
                    stack.push(n);
                }
            }
        }

        if area >= min_area {
            regions += 1;
        }
    }

    regions
}

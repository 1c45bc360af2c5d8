//! Low-pass smoothing and gradient operators on Mono8 images.
//!
//! Borders are handled by reflection without repeating the edge pixel
//! (`dcb|abcd|cba`), so a uniform image stays uniform and has zero gradient
//! everywhere, including along the frame edges.

use anyhow::{anyhow, Result};
use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Noise-suppression kernel applied before edge counting and binarization.
///
/// All kernels are separable and applied along rows, then columns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SmoothingKernel {
    /// Pass-through.
    None,
    /// Uniform mean over `size` pixels.
    Box { size: usize },
    /// Gaussian with explicit sigma. A non-positive sigma is derived from the size.
    Gaussian { size: usize, sigma: f32 },
    /// Quadratic Savitzky-Golay smoothing over `window` pixels.
    SavitzkyGolay { window: usize },
}

impl Default for SmoothingKernel {
    fn default() -> Self {
        SmoothingKernel::Gaussian {
            size: 25,
            sigma: 3.0,
        }
    }
}

impl SmoothingKernel {
    pub fn validate(&self) -> Result<()> {
        match *self {
            SmoothingKernel::None => Ok(()),
            SmoothingKernel::Box { size } | SmoothingKernel::Gaussian { size, .. } => {
                if size == 0 || size % 2 == 0 {
                    return Err(anyhow!("smoothing kernel size must be odd, got {}", size));
                }
                Ok(())
            }
            SmoothingKernel::SavitzkyGolay { window } => {
                if window < 3 || window % 2 == 0 {
                    return Err(anyhow!(
                        "Savitzky-Golay window must be odd and at least 3, got {}",
                        window
                    ));
                }
                Ok(())
            }
        }
    }

    /// One-dimensional weights, or `None` for the pass-through kernel.
    pub fn weights(&self) -> Option<Vec<f32>> {
        match *self {
            SmoothingKernel::None => None,
            SmoothingKernel::Box { size } => Some(vec![1.0 / size as f32; size]),
            SmoothingKernel::Gaussian { size, sigma } => Some(gaussian_weights(size, sigma)),
            SmoothingKernel::SavitzkyGolay { window } => Some(savitzky_golay_weights(window)),
        }
    }

    pub fn apply(&self, image: &GrayImage) -> GrayImage {
        match self.weights() {
            Some(weights) => convolve_separable(image, &weights),
            None => image.clone(),
        }
    }
}

fn gaussian_weights(size: usize, sigma: f32) -> Vec<f32> {
    let sigma = if sigma > 0.0 {
        sigma
    } else {
        0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8
    };
    let center = (size / 2) as f32;
    let mut weights: Vec<f32> = (0..size)
        .map(|i| {
            let x = i as f32 - center;
            (-(x * x) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f32 = weights.iter().sum();
    for w in &mut weights {
        *w /= sum;
    }
    weights
}

/// Closed-form quadratic/cubic smoothing coefficients for a window of `2m + 1`.
fn savitzky_golay_weights(window: usize) -> Vec<f32> {
    let m = (window / 2) as f64;
    let denom = (2.0 * m + 1.0) * (4.0 * m * m + 4.0 * m - 3.0);
    let base = 3.0 * (3.0 * m * m + 3.0 * m - 1.0);
    (0..window)
        .map(|idx| {
            let i = idx as f64 - m;
            ((base - 15.0 * i * i) / denom) as f32
        })
        .collect()
}

pub(crate) fn reflect_101(index: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let period = 2 * (len as isize - 1);
    let mut i = index.rem_euclid(period);
    if i >= len as isize {
        i = period - i;
    }
    i as usize
}

fn convolve_separable(image: &GrayImage, weights: &[f32]) -> GrayImage {
    let (width, height) = image.dimensions();
    let (w, h) = (width as usize, height as usize);
    if w == 0 || h == 0 {
        return image.clone();
    }
    let radius = (weights.len() / 2) as isize;
    let src = image.as_raw();

    let mut horizontal = vec![0f32; w * h];
    for y in 0..h {
        let row = &src[y * w..(y + 1) * w];
        for x in 0..w {
            let mut acc = 0f32;
            for (k, weight) in weights.iter().enumerate() {
                let sx = reflect_101(x as isize + k as isize - radius, w);
                acc += weight * row[sx] as f32;
            }
            horizontal[y * w + x] = acc;
        }
    }

    let mut out = vec![0u8; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0f32;
            for (k, weight) in weights.iter().enumerate() {
                let sy = reflect_101(y as isize + k as isize - radius, h);
                acc += weight * horizontal[sy * w + x];
            }
            out[y * w + x] = clamp_to_u8(acc);
        }
    }

    GrayImage::from_raw(width, height, out).unwrap_or_else(|| image.clone())
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// Per-pixel 3x3 Sobel gradient magnitude, row-major.
pub fn gradient_magnitude(image: &GrayImage) -> Vec<f32> {
    let (width, height) = image.dimensions();
    let (w, h) = (width as usize, height as usize);
    let src = image.as_raw();
    let at = |x: isize, y: isize| -> f32 {
        let sx = reflect_101(x, w);
        let sy = reflect_101(y, h);
        src[sy * w + sx] as f32
    };

    let mut magnitude = vec![0f32; w * h];
    for y in 0..h as isize {
        for x in 0..w as isize {
            let gx = (at(x + 1, y - 1) + 2.0 * at(x + 1, y) + at(x + 1, y + 1))
                - (at(x - 1, y - 1) + 2.0 * at(x - 1, y) + at(x - 1, y + 1));
            let gy = (at(x - 1, y + 1) + 2.0 * at(x, y + 1) + at(x + 1, y + 1))
                - (at(x - 1, y - 1) + 2.0 * at(x, y - 1) + at(x + 1, y - 1));
            magnitude[y as usize * w + x as usize] = gx.hypot(gy);
        }
    }
    magnitude
}

use anyhow::{anyhow, Result};
use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::detect::result::ClassificationResult;
use crate::detect::smoothing::{gradient_magnitude, SmoothingKernel};

/// Tunables for the focus screen.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    /// A frame is accepted when more than this many pixels are sharp edges.
    pub sharp_edges_threshold: u32,
    /// Per-pixel gradient magnitude a sharp edge must exceed.
    /// `None` reuses `sharp_edges_threshold`.
    pub edge_magnitude: Option<f32>,
    pub smoothing: SmoothingKernel,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            sharp_edges_threshold: 200,
            edge_magnitude: None,
            smoothing: SmoothingKernel::default(),
        }
    }
}

impl ClassifierSettings {
    pub fn validate(&self) -> Result<()> {
        self.smoothing.validate()?;
        if let Some(magnitude) = self.edge_magnitude {
            if !magnitude.is_finite() || magnitude < 0.0 {
                return Err(anyhow!(
                    "edge magnitude must be a non-negative number, got {}",
                    magnitude
                ));
            }
        }
        Ok(())
    }

    fn magnitude_threshold(&self) -> f32 {
        self.edge_magnitude
            .unwrap_or(self.sharp_edges_threshold as f32)
    }
}

/// Gradient-based "crystal in focus" screen.
///
/// Blurred or empty frames have weak gradients everywhere; an in-focus,
/// textured crystal produces many strong ones. Smoothing always runs before
/// counting so sensor noise does not register as edges.
#[derive(Clone, Debug)]
pub struct FocusClassifier {
    settings: ClassifierSettings,
}

impl FocusClassifier {
    pub fn new(settings: ClassifierSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &ClassifierSettings {
        &self.settings
    }

    /// The noise-suppression pass shared with the feature extractor.
    pub fn smooth(&self, image: &GrayImage) -> GrayImage {
        self.settings.smoothing.apply(image)
    }

    pub fn classify(&self, image: &GrayImage) -> ClassificationResult {
        self.classify_smoothed(&self.smooth(image))
    }

    /// Classify an image that has already been through `smooth`.
    pub fn classify_smoothed(&self, smoothed: &GrayImage) -> ClassificationResult {
        let threshold = self.settings.magnitude_threshold();
        let sharp_edge_count = gradient_magnitude(smoothed)
            .into_iter()
            .filter(|m| *m > threshold)
            .count() as u64;
        ClassificationResult {
            accepted: sharp_edge_count > self.settings.sharp_edges_threshold as u64,
            sharp_edge_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn checkerboard(size: u32, cell: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            if ((x / cell) + (y / cell)) % 2 == 0 {
                Luma([10])
            } else {
                Luma([240])
            }
        })
    }

    fn settings(threshold: u32) -> ClassifierSettings {
        ClassifierSettings {
            sharp_edges_threshold: threshold,
            edge_magnitude: Some(100.0),
            smoothing: SmoothingKernel::Gaussian {
                size: 5,
                sigma: 1.0,
            },
        }
    }

    #[test]
    fn sharp_texture_is_accepted() {
        let classifier = FocusClassifier::new(settings(200)).unwrap();
        let result = classifier.classify(&checkerboard(128, 16));
        assert!(result.accepted, "count = {}", result.sharp_edge_count);
    }

    #[test]
    fn saturated_and_dark_frames_are_rejected() {
        let classifier = FocusClassifier::new(ClassifierSettings::default()).unwrap();
        for value in [0u8, 255u8] {
            let result = classifier.classify(&GrayImage::from_pixel(64, 48, Luma([value])));
            assert!(!result.accepted);
            assert_eq!(result.sharp_edge_count, 0);
        }
    }

    #[test]
    fn smoothing_suppresses_pixel_noise() {
        // Fine 2x2 speckle, far above the crystal scale.
        let noisy = GrayImage::from_fn(96, 96, |x, y| {
            Luma([if (x / 2 + y / 2) % 2 == 0 { 100 } else { 160 }])
        });
        let smoothed = FocusClassifier::new(settings(50)).unwrap();
        let raw = FocusClassifier::new(ClassifierSettings {
            smoothing: SmoothingKernel::None,
            ..settings(50)
        })
        .unwrap();
        assert!(raw.classify(&noisy).accepted);
        assert!(!smoothed.classify(&noisy).accepted);
    }

    #[test]
    fn raising_threshold_never_turns_reject_into_accept() {
        let image = checkerboard(96, 12);
        let mut previously_accepted = true;
        for threshold in (0..20_000).step_by(250) {
            let classifier = FocusClassifier::new(ClassifierSettings {
                sharp_edges_threshold: threshold,
                edge_magnitude: None,
                smoothing: SmoothingKernel::Gaussian {
                    size: 5,
                    sigma: 1.0,
                },
            })
            .unwrap();
            let accepted = classifier.classify(&image).accepted;
            assert!(
                previously_accepted || !accepted,
                "threshold {} flipped a reject into an accept",
                threshold
            );
            previously_accepted = accepted;
        }
    }

    #[test]
    fn count_is_reported_on_reject() {
        let classifier = FocusClassifier::new(settings(u32::MAX)).unwrap();
        let result = classifier.classify(&checkerboard(64, 8));
        assert!(!result.accepted);
        assert!(result.sharp_edge_count > 0);
    }
}

//! Per-crystal shape features for accepted frames.
//!
//! Pipeline: binarize the smoothed frame, close small gaps, label connected
//! regions, drop specks below the minimum diameter, then describe each
//! surviving region as a `Crystal`.

mod mask;
mod regions;

use anyhow::{anyhow, Result};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

pub use mask::{Mask, Polarity};
pub use regions::{equivalent_diameter, label, Connectivity, Region, RegionProps};

/// One connected foreground region of an accepted frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Crystal {
    pub centroid_row: f64,
    pub centroid_col: f64,
    /// Major-axis angle in degrees, measured from the image column axis
    /// towards increasing rows, in (-90, 90].
    pub orientation_deg: f64,
    /// Minor/major axis ratio in [0, 1].
    pub aspect_ratio: f64,
    /// Equivalent diameter in physical units (`pixel_size` per pixel).
    pub diameter: f64,
    /// Perimeter / (pi * equivalent diameter). ~1 for a disc, larger when branched.
    pub complexity: f64,
    pub area_px: usize,
    pub equivalent_diameter_px: f64,
}

impl Crystal {
    fn from_props(props: &RegionProps, pixel_size: f64) -> Self {
        let complexity = if props.equivalent_diameter > 0.0 {
            props.perimeter / (PI * props.equivalent_diameter)
        } else {
            0.0
        };
        Self {
            centroid_row: props.centroid.0,
            centroid_col: props.centroid.1,
            orientation_deg: props.orientation.to_degrees(),
            aspect_ratio: props.aspect_ratio(),
            diameter: props.equivalent_diameter * pixel_size,
            complexity,
            area_px: props.area,
            equivalent_diameter_px: props.equivalent_diameter,
        }
    }

    /// `((row, col), orientation, aspect ratio, diameter, complexity)` as written
    /// to the run summary.
    pub fn summary_tuple(&self) -> ((f64, f64), f64, f64, f64, f64) {
        (
            (self.centroid_row, self.centroid_col),
            self.orientation_deg,
            self.aspect_ratio,
            self.diameter,
            self.complexity,
        )
    }
}

/// Tunables for segmentation and filtering.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorSettings {
    pub binarize_threshold: u8,
    pub polarity: Polarity,
    /// Side of the square structuring element used for closing.
    pub structuring_element: usize,
    pub closing_iterations: usize,
    pub connectivity: Connectivity,
    /// Regions with a smaller equivalent diameter (pixels) are discarded.
    pub min_diameter_px: f64,
    /// Physical size of one pixel.
    pub pixel_size: f64,
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            binarize_threshold: 50,
            polarity: Polarity::Bright,
            structuring_element: 3,
            closing_iterations: 2,
            connectivity: Connectivity::Eight,
            min_diameter_px: 50.0,
            pixel_size: 1.0,
        }
    }
}

impl ExtractorSettings {
    pub fn validate(&self) -> Result<()> {
        if self.structuring_element == 0 || self.structuring_element % 2 == 0 {
            return Err(anyhow!(
                "structuring element size must be odd, got {}",
                self.structuring_element
            ));
        }
        if !self.min_diameter_px.is_finite() || self.min_diameter_px < 0.0 {
            return Err(anyhow!("minimum diameter must be non-negative"));
        }
        if !self.pixel_size.is_finite() || self.pixel_size <= 0.0 {
            return Err(anyhow!("pixel size must be greater than zero"));
        }
        Ok(())
    }
}

/// Region-based crystal feature extractor.
#[derive(Clone, Debug)]
pub struct CrystalExtractor {
    settings: ExtractorSettings,
}

impl CrystalExtractor {
    pub fn new(settings: ExtractorSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &ExtractorSettings {
        &self.settings
    }

    pub fn binarize(&self, smoothed: &GrayImage) -> Mask {
        Mask::from_threshold(
            smoothed,
            self.settings.binarize_threshold,
            self.settings.polarity,
        )
    }

    /// Extract crystals from an already smoothed frame. An empty list means
    /// no measurable crystal.
    pub fn extract(&self, smoothed: &GrayImage) -> Vec<Crystal> {
        self.extract_from_mask(&self.binarize(smoothed))
    }

    pub fn extract_from_mask(&self, mask: &Mask) -> Vec<Crystal> {
        let closed = mask.close(
            self.settings.structuring_element,
            self.settings.closing_iterations,
        );
        label(&closed, self.settings.connectivity)
            .iter()
            .map(RegionProps::measure)
            .filter(|props| props.equivalent_diameter >= self.settings.min_diameter_px)
            .map(|props| Crystal::from_props(&props, self.settings.pixel_size))
            .collect()
    }
}

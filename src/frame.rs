//! Raw frame container.
//!
//! - `Frame`: one monochrome (8-bit) capture plus its acquisition time.
//!
//! A frame is owned by exactly one stage at a time: the source creates it, the
//! queue holds it, the consumer takes it. There is no `Clone` impl, so a frame
//! cannot be handed to two consumers.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};
use image::GrayImage;
use std::time::{Duration, Instant};

/// Opaque grayscale frame. Deliberately not `Clone`.
pub struct Frame {
    /// Row-major Mono8 pixels, `width * height` bytes.
    data: Vec<u8>,

    pub width: u32,
    pub height: u32,

    /// Per-source capture counter, starting at 1.
    pub sequence: u64,

    /// Wall-clock acquisition time (correlates frames with weather lines).
    pub captured_at: DateTime<Local>,

    /// Monotonic capture instant, used for queue latency reporting.
    capture_instant: Instant,
}

impl Frame {
    /// Wrap a Mono8 buffer. Fails when the buffer length does not match the dimensions.
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "Mono8 frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            sequence,
            captured_at: Local::now(),
            capture_instant: Instant::now(),
        })
    }

    pub fn from_gray_image(image: GrayImage, sequence: u64) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            sequence,
            captured_at: Local::now(),
            capture_instant: Instant::now(),
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Time since capture.
    pub fn age(&self) -> Duration {
        self.capture_instant.elapsed()
    }

    /// Consume the frame into an image buffer, optionally turned 180 degrees
    /// (the camera hangs upside down under the drone).
    pub fn into_gray_image(self, rotate_180: bool) -> Result<GrayImage> {
        let mut image = GrayImage::from_raw(self.width, self.height, self.data)
            .ok_or_else(|| anyhow!("frame buffer does not fit {}x{}", self.width, self.height))?;
        if rotate_180 {
            image::imageops::rotate180_in_place(&mut image);
        }
        Ok(image)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Pixel data is never printed.
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("captured_at", &self.captured_at)
            .finish()
    }
}

//! Synthetic drone camera (`stub://...`).
//!
//! Produces a repeating ten-frame pattern paced at the configured frame rate:
//! - mostly dark frames with sensor noise
//! - frame 5: an out-of-focus blob
//! - frame 7: a sharp hexagonal plate
//! - frame 9: a sharp six-armed dendrite
//!
//! Every 37th acquisition is reported incomplete. Pixel content depends only
//! on the frame sequence number, so runs are reproducible.
//!
//! Special URLs:
//! - `stub://missing`: `open` reports `DeviceNotFound`
//! - `stub://fail-after/<n>`: fatal device error after `n` acquisitions

use anyhow::{anyhow, Result};
use image::{GrayImage, Luma};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use std::time::Duration;

use super::{FrameEvent, FrameSource, OpenOutcome, Pacer, SourceStats};
use crate::config::CameraSettings;
use crate::frame::Frame;

const INCOMPLETE_EVERY: u64 = 37;
const BACKGROUND_LEVEL: f64 = 12.0;
const NOISE_AMPLITUDE: f64 = 6.0;
const CRYSTAL_LEVEL: f64 = 255.0;
/// Longest exposure the stub sensor supports.
const MAX_EXPOSURE_US: u32 = 30_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scene {
    Empty,
    BlurredBlob,
    Plate,
    Dendrite,
}

impl Scene {
    pub fn for_sequence(sequence: u64) -> Self {
        match sequence % 10 {
            5 => Scene::BlurredBlob,
            7 => Scene::Plate,
            9 => Scene::Dendrite,
            _ => Scene::Empty,
        }
    }
}

pub struct SyntheticSource {
    url: String,
    fail_after: Option<u64>,
    missing: bool,
    opened: bool,
    settings: Option<CameraSettings>,
    pacer: Pacer,
    stopped: bool,
    attempts: u64,
    sequence: u64,
    stats: SourceStats,
}

impl SyntheticSource {
    pub fn new(url: &str) -> Result<Self> {
        let target = url
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("synthetic source requires a stub:// url, got {}", url))?;
        let fail_after = match target.strip_prefix("fail-after/") {
            Some(count) => Some(
                count
                    .parse::<u64>()
                    .map_err(|_| anyhow!("invalid fail-after count in {}", url))?,
            ),
            None => None,
        };
        Ok(Self {
            url: url.to_string(),
            fail_after,
            missing: target == "missing",
            opened: false,
            settings: None,
            pacer: Pacer::new(Duration::from_millis(100)),
            stopped: false,
            attempts: 0,
            sequence: 0,
            stats: SourceStats::default(),
        })
    }
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> &str {
        &self.url
    }

    fn open(&mut self) -> Result<OpenOutcome> {
        if self.missing {
            return Ok(OpenOutcome::DeviceNotFound);
        }
        self.opened = true;
        log::info!("SyntheticSource: opened {}", self.url);
        Ok(OpenOutcome::Ready)
    }

    fn configure(&mut self, settings: &CameraSettings) -> Result<OpenOutcome> {
        if !self.opened {
            return Err(anyhow!("{} configured before open", self.url));
        }
        if settings.exposure_time_us == 0 || settings.exposure_time_us > MAX_EXPOSURE_US {
            return Ok(OpenOutcome::ConfigurationRejected(format!(
                "exposure {} us outside 1..={} us",
                settings.exposure_time_us, MAX_EXPOSURE_US
            )));
        }
        let period_us = settings.frame_period().as_micros();
        let strobe_end = settings.strobe_delay_us as u128 + settings.strobe_duration_us as u128;
        if strobe_end > period_us {
            return Ok(OpenOutcome::ConfigurationRejected(format!(
                "strobe ends {} us after trigger, frame period is {} us",
                strobe_end, period_us
            )));
        }
        self.pacer = Pacer::new(settings.frame_period());
        self.settings = Some(settings.clone());
        log::info!(
            "SyntheticSource: {}x{} @ {} Hz, exposure {} us, gain {} dB, strobe {}+{} us",
            settings.width,
            settings.height,
            settings.frame_rate_hz,
            settings.exposure_time_us,
            settings.gain_db,
            settings.strobe_delay_us,
            settings.strobe_duration_us
        );
        Ok(OpenOutcome::Ready)
    }

    fn next_frame(&mut self, timeout: Duration) -> Result<FrameEvent> {
        if self.stopped {
            return Ok(FrameEvent::EndOfStream);
        }
        let settings = self
            .settings
            .as_ref()
            .ok_or_else(|| anyhow!("{} is not configured", self.url))?;
        if !self.pacer.wait(timeout) {
            self.stats.timeouts += 1;
            return Ok(FrameEvent::Timeout);
        }

        self.attempts += 1;
        if let Some(limit) = self.fail_after {
            if self.attempts > limit {
                return Err(anyhow!(
                    "{}: lost communication with camera after {} frames",
                    self.url,
                    limit
                ));
            }
        }
        if self.attempts % INCOMPLETE_EVERY == 0 {
            self.stats.incomplete += 1;
            return Ok(FrameEvent::Incomplete {
                status: "image incomplete (missing packets)".to_string(),
            });
        }

        self.sequence += 1;
        self.stats.frames_captured += 1;
        let image = render(
            Scene::for_sequence(self.sequence),
            settings.width,
            settings.height,
            self.sequence,
        );
        Ok(FrameEvent::Frame(Frame::from_gray_image(image, self.sequence)))
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            log::info!("SyntheticSource: acquisition stopped ({})", self.url);
        }
    }

    fn close(&mut self) -> Result<()> {
        self.stop();
        self.opened = false;
        self.settings = None;
        Ok(())
    }

    fn stats(&self) -> SourceStats {
        self.stats.clone()
    }
}

/// Render one synthetic frame. Deterministic in `sequence`.
pub fn render(scene: Scene, width: u32, height: u32, sequence: u64) -> GrayImage {
    let mut rng = StdRng::seed_from_u64(sequence);
    let cx = width as f64 / 2.0 + rng.gen_range(-0.1..0.1) * width as f64;
    let cy = height as f64 / 2.0 + rng.gen_range(-0.1..0.1) * height as f64;
    let radius = width.min(height) as f64 / 5.0;
    let rotation = rng.gen_range(0.0..PI / 3.0);

    let mut image = GrayImage::new(width, height);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let noise = rng.gen_range(-NOISE_AMPLITUDE..=NOISE_AMPLITUDE);
        let dx = x as f64 + 0.5 - cx;
        let dy = y as f64 + 0.5 - cy;
        let shape = match scene {
            Scene::Empty => 0.0,
            Scene::BlurredBlob => {
                let sigma = radius / 2.0;
                180.0 * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp()
            }
            Scene::Plate => {
                if inside_hexagon(dx, dy, radius, rotation) {
                    CRYSTAL_LEVEL
                } else {
                    0.0
                }
            }
            Scene::Dendrite => {
                if inside_hexagon(dx, dy, radius / 4.0, rotation)
                    || on_arm(dx, dy, radius * 1.2, 4.0, rotation)
                {
                    CRYSTAL_LEVEL
                } else {
                    0.0
                }
            }
        };
        let value = (BACKGROUND_LEVEL + noise).max(shape);
        *pixel = Luma([value.round().clamp(0.0, 255.0) as u8]);
    }
    image
}

fn inside_hexagon(dx: f64, dy: f64, radius: f64, rotation: f64) -> bool {
    let apothem = radius * 3f64.sqrt() / 2.0;
    (0..3).all(|k| {
        let theta = rotation + PI / 6.0 + k as f64 * PI / 3.0;
        (dx * theta.cos() + dy * theta.sin()).abs() <= apothem
    })
}

fn on_arm(dx: f64, dy: f64, length: f64, half_width: f64, rotation: f64) -> bool {
    (0..6).any(|k| {
        let theta = rotation + k as f64 * PI / 3.0;
        let along = dx * theta.cos() + dy * theta.sin();
        let across = -dx * theta.sin() + dy * theta.cos();
        (0.0..=length).contains(&along) && across.abs() <= half_width
    })
}

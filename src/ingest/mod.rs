//! Frame acquisition sources.
//!
//! Every camera sits behind the narrow `FrameSource` capability:
//! open, configure, next_frame, stop, close.
//!
//! - `stub://...`: synthetic drone camera (testing, bench runs)
//! - `dir://<path>` or a plain directory: replay of saved BMP/PNG frames
//!
//! Hardware bindings plug in by implementing the trait.
//!
//! A source never blocks longer than the timeout passed to `next_frame`, and
//! distinguishes per-frame trouble (`FrameEvent::Incomplete`) from device
//! failure (`Err`). Only the latter ends a run.

pub mod capture;
pub mod directory;
pub mod synthetic;

use anyhow::{anyhow, Result};
use std::path::Path;
use std::time::{Duration, Instant};

use crate::config::CameraSettings;
use crate::frame::Frame;

pub use capture::{CaptureLoop, CaptureStats};
pub use directory::DirectorySource;
pub use synthetic::SyntheticSource;

/// Outcome of opening or configuring a device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OpenOutcome {
    Ready,
    DeviceNotFound,
    ConfigurationRejected(String),
}

impl OpenOutcome {
    /// Turn anything but `Ready` into an error naming the source.
    pub fn require_ready(self, source: &str) -> Result<()> {
        match self {
            OpenOutcome::Ready => Ok(()),
            OpenOutcome::DeviceNotFound => Err(anyhow!("no camera found at {}", source)),
            OpenOutcome::ConfigurationRejected(reason) => Err(anyhow!(
                "camera {} rejected its configuration: {}",
                source,
                reason
            )),
        }
    }
}

/// One acquisition attempt.
#[derive(Debug)]
pub enum FrameEvent {
    Frame(Frame),
    /// The device delivered a damaged frame. It has been discarded.
    Incomplete { status: String },
    /// Nothing arrived within the timeout.
    Timeout,
    /// The source has nothing more to deliver.
    EndOfStream,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub incomplete: u64,
    pub timeouts: u64,
}

/// Capability interface over a camera.
pub trait FrameSource: Send {
    fn name(&self) -> &str;

    fn open(&mut self) -> Result<OpenOutcome>;

    /// Apply exposure, gain, strobe and frame-rate settings. Must follow `open`.
    fn configure(&mut self, settings: &CameraSettings) -> Result<OpenOutcome>;

    /// Block at most `timeout` for the next frame. `Err` is a fatal device error.
    fn next_frame(&mut self, timeout: Duration) -> Result<FrameEvent>;

    /// End acquisition. Idempotent; later `next_frame` calls report `EndOfStream`.
    fn stop(&mut self);

    /// Release the device.
    fn close(&mut self) -> Result<()>;

    fn stats(&self) -> SourceStats;
}

/// Build the source named by a camera URL.
pub fn open_source(url: &str) -> Result<Box<dyn FrameSource>> {
    let url = url.trim();
    if url.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(url)?));
    }
    if let Some(path) = url.strip_prefix("dir://") {
        return Ok(Box::new(DirectorySource::new(path)));
    }
    if !url.contains("://") && Path::new(url).is_dir() {
        return Ok(Box::new(DirectorySource::new(url)));
    }
    Err(anyhow!(
        "unsupported camera source '{}' (expected stub://... or dir://<path>)",
        url
    ))
}

/// Spaces frames one period apart.
#[derive(Debug)]
pub(crate) struct Pacer {
    period: Duration,
    next_due: Option<Instant>,
}

impl Pacer {
    pub(crate) fn new(period: Duration) -> Self {
        Self {
            period,
            next_due: None,
        }
    }

    /// Sleep until the next frame is due. Returns false (after sleeping
    /// `timeout`) when that is further away than `timeout`.
    pub(crate) fn wait(&mut self, timeout: Duration) -> bool {
        let now = Instant::now();
        let due = *self.next_due.get_or_insert(now);
        let wait = due.saturating_duration_since(now);
        if wait > timeout {
            std::thread::sleep(timeout);
            return false;
        }
        std::thread::sleep(wait);
        // Re-anchor after a stall so a slow consumer does not cause a burst.
        self.next_due = Some((due + self.period).max(Instant::now()));
        true
    }
}

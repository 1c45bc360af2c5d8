//! Replay of saved frames from a local directory (`dir://<path>`).
//!
//! BMP and PNG files are delivered in lexical file-name order, converted to
//! 8-bit grayscale and paced at the configured frame rate. A file that fails
//! to decode is reported as an incomplete frame.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{FrameEvent, FrameSource, OpenOutcome, Pacer, SourceStats};
use crate::config::CameraSettings;
use crate::frame::Frame;

pub struct DirectorySource {
    name: String,
    root: PathBuf,
    files: Vec<PathBuf>,
    cursor: usize,
    pacer: Option<Pacer>,
    stopped: bool,
    stats: SourceStats,
}

impl DirectorySource {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            name: format!("dir://{}", root.display()),
            root,
            files: Vec::new(),
            cursor: 0,
            pacer: None,
            stopped: false,
            stats: SourceStats::default(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.files.len().saturating_sub(self.cursor)
    }
}

fn is_frame_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("bmp") || ext.eq_ignore_ascii_case("png"))
            .unwrap_or(false)
}

impl FrameSource for DirectorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> Result<OpenOutcome> {
        if !self.root.is_dir() {
            return Ok(OpenOutcome::DeviceNotFound);
        }
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.root)
            .with_context(|| format!("failed to list {}", self.root.display()))?
        {
            let path = entry?.path();
            if is_frame_file(&path) {
                files.push(path);
            }
        }
        files.sort();
        log::info!("DirectorySource: {} frames in {}", files.len(), self.root.display());
        self.files = files;
        self.cursor = 0;
        Ok(OpenOutcome::Ready)
    }

    fn configure(&mut self, settings: &CameraSettings) -> Result<OpenOutcome> {
        self.pacer = Some(Pacer::new(settings.frame_period()));
        Ok(OpenOutcome::Ready)
    }

    fn next_frame(&mut self, timeout: Duration) -> Result<FrameEvent> {
        if self.stopped || self.cursor >= self.files.len() {
            return Ok(FrameEvent::EndOfStream);
        }
        let pacer = self
            .pacer
            .as_mut()
            .ok_or_else(|| anyhow!("{} is not configured", self.name))?;
        if !pacer.wait(timeout) {
            self.stats.timeouts += 1;
            return Ok(FrameEvent::Timeout);
        }

        let path = &self.files[self.cursor];
        self.cursor += 1;
        match image::open(path) {
            Ok(decoded) => {
                self.stats.frames_captured += 1;
                Ok(FrameEvent::Frame(Frame::from_gray_image(
                    decoded.to_luma8(),
                    self.stats.frames_captured,
                )))
            }
            Err(e) => {
                self.stats.incomplete += 1;
                Ok(FrameEvent::Incomplete {
                    status: format!("{}: {}", path.display(), e),
                })
            }
        }
    }

    fn stop(&mut self) {
        if !self.stopped && self.remaining() > 0 {
            log::info!("DirectorySource: stopped with {} frames left", self.remaining());
        }
        self.stopped = true;
    }

    fn close(&mut self) -> Result<()> {
        self.stop();
        self.files.clear();
        Ok(())
    }

    fn stats(&self) -> SourceStats {
        self.stats.clone()
    }
}

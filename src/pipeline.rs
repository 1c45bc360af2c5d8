//! Consumer side: classify, persist and measure every queued frame.
//!
//! State machine:
//! - `Running`: take frames as they arrive; back off briefly when the queue is empty.
//! - `Draining`: entered once the capture side has closed the queue. Everything
//!   still queued is processed.
//! - `Stopped`: the queue is empty and closed; the summary is flushed once.
//!
//! An empty queue alone never ends the run. Per-frame failures are logged and
//! counted; only a failed summary flush is an error.

use anyhow::{anyhow, Result};
use image::GrayImage;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::config::PipelineSettings;
use crate::detect::FocusClassifier;
use crate::features::CrystalExtractor;
use crate::frame::Frame;
use crate::queue::{FrameReceiver, GetOutcome};
use crate::storage::PersistenceSink;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Running,
    Draining,
    Stopped,
}

impl PipelineState {
    fn as_u8(self) -> u8 {
        match self {
            PipelineState::Running => 0,
            PipelineState::Draining => 1,
            PipelineState::Stopped => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => PipelineState::Running,
            1 => PipelineState::Draining,
            _ => PipelineState::Stopped,
        }
    }
}

/// Read-only view of the controller's state from another thread.
#[derive(Clone, Debug)]
pub struct StateHandle(Arc<AtomicU8>);

impl StateHandle {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(PipelineState::Running.as_u8())))
    }

    pub fn get(&self) -> PipelineState {
        PipelineState::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn set(&self, state: PipelineState) {
        self.0.store(state.as_u8(), Ordering::SeqCst);
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PipelineReport {
    pub processed: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub crystals: u64,
    /// Frames that could not be decoded or saved.
    pub frame_errors: u64,
    pub summary_path: PathBuf,
}

pub struct PipelineController {
    receiver: FrameReceiver,
    classifier: FocusClassifier,
    extractor: CrystalExtractor,
    sink: PersistenceSink,
    settings: PipelineSettings,
    rotate_180: bool,
    state: StateHandle,
}

impl PipelineController {
    pub fn new(
        receiver: FrameReceiver,
        classifier: FocusClassifier,
        extractor: CrystalExtractor,
        sink: PersistenceSink,
        settings: PipelineSettings,
        rotate_180: bool,
    ) -> Self {
        Self {
            receiver,
            classifier,
            extractor,
            sink,
            settings,
            rotate_180,
            state: StateHandle::new(),
        }
    }

    pub fn state(&self) -> StateHandle {
        self.state.clone()
    }

    /// Run to completion on the current thread.
    pub fn run(mut self) -> Result<PipelineReport> {
        let mut report = PipelineReport::default();
        log::info!("pipeline running");

        loop {
            match self.state.get() {
                PipelineState::Running => {
                    if self.receiver.is_closed() {
                        log::info!(
                            "capture stopped; draining {} queued frames",
                            self.receiver.len()
                        );
                        self.state.set(PipelineState::Draining);
                        continue;
                    }
                    match self.receiver.get_timeout(self.settings.idle_wait) {
                        GetOutcome::Frame(frame) => self.process(frame, &mut report),
                        GetOutcome::Empty => {}
                        GetOutcome::Drained => self.state.set(PipelineState::Draining),
                    }
                }
                PipelineState::Draining => match self.receiver.try_get() {
                    Some(frame) => self.process(frame, &mut report),
                    None => {
                        self.state.set(PipelineState::Stopped);
                    }
                },
                PipelineState::Stopped => break,
            }
        }

        log::info!(
            "pipeline stopped: processed={} accepted={} rejected={} crystals={}",
            report.processed,
            report.accepted,
            report.rejected,
            report.crystals
        );
        report.summary_path = self.sink.flush()?;
        Ok(report)
    }

    /// Run on a dedicated thread.
    pub fn spawn(self) -> Result<PipelineHandle> {
        let state = self.state();
        let join = std::thread::Builder::new()
            .name("pipeline".to_string())
            .spawn(move || self.run())
            .map_err(|e| anyhow!("failed to spawn pipeline thread: {}", e))?;
        Ok(PipelineHandle { join, state })
    }

    fn process(&mut self, frame: Frame, report: &mut PipelineReport) {
        report.processed += 1;
        let sequence = frame.sequence;
        log::debug!(
            "frame {} captured at {} dequeued after {:?}",
            sequence,
            frame.captured_at.format("%H:%M:%S%.3f"),
            frame.age()
        );
        let image = match frame.into_gray_image(self.rotate_180) {
            Ok(image) => image,
            Err(e) => {
                report.frame_errors += 1;
                log::warn!("frame {} unusable: {:#}", sequence, e);
                return;
            }
        };

        let smoothed = self.classifier.smooth(&image);
        let result = self.classifier.classify_smoothed(&smoothed);
        if !result.accepted {
            report.rejected += 1;
            log::info!(
                "frame {} rejected: {} sharp edges",
                sequence,
                result.sharp_edge_count
            );
            return;
        }

        report.accepted += 1;
        if let Err(e) = self.persist(&image, &smoothed, report) {
            report.frame_errors += 1;
            log::error!("frame {} not saved: {:#}", sequence, e);
        }
    }

    fn persist(
        &mut self,
        image: &GrayImage,
        smoothed: &GrayImage,
        report: &mut PipelineReport,
    ) -> Result<()> {
        let path = self.sink.save_frame(image)?;
        let crystals = self.extractor.extract(smoothed);
        log::info!(
            "snowflake saved to {} ({} crystals)",
            path.display(),
            crystals.len()
        );
        report.crystals += crystals.len() as u64;
        self.sink.record(path, crystals);
        Ok(())
    }
}

pub struct PipelineHandle {
    join: JoinHandle<Result<PipelineReport>>,
    state: StateHandle,
}

impl PipelineHandle {
    pub fn state(&self) -> PipelineState {
        self.state.get()
    }

    /// Wait for the drain and the summary flush.
    pub fn join(self) -> Result<PipelineReport> {
        self.join
            .join()
            .map_err(|_| anyhow!("pipeline thread panicked"))?
    }
}

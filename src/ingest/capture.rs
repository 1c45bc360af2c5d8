//! Producer side of the pipeline: pulls frames from a source into the queue.

use anyhow::Result;
use std::time::{Duration, Instant};

use super::{FrameEvent, FrameSource};
use crate::frame::Frame;
use crate::queue::{FrameSender, PutOutcome};
use crate::shutdown::StopFlag;

const HEALTH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub captured: u64,
    pub enqueued: u64,
    pub dropped: u64,
    pub incomplete: u64,
    pub timeouts: u64,
    /// The source ran out of frames (replay sources only).
    pub end_of_stream: bool,
}

/// Blocking acquisition loop run on the capture thread.
#[derive(Clone, Debug)]
pub struct CaptureLoop {
    timeout: Duration,
}

impl CaptureLoop {
    /// `timeout` bounds each wait on the device.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Capture until `stop` is requested, the source ends, or the device fails.
    ///
    /// On every exit path the source is stopped and the sender is closed, which
    /// tells the consumer that no further frames will arrive. A device failure
    /// also raises `stop` and is returned as the error.
    pub fn run(
        &self,
        source: &mut dyn FrameSource,
        sender: FrameSender,
        stop: &StopFlag,
    ) -> Result<CaptureStats> {
        let mut stats = CaptureStats::default();
        let mut last_health_log = Instant::now();
        log::info!("capture started on {}", source.name());

        let outcome = loop {
            if stop.is_requested() {
                break Ok(());
            }
            match source.next_frame(self.timeout) {
                Ok(FrameEvent::Frame(frame)) => {
                    stats.captured += 1;
                    let sequence = frame.sequence;
                    match sender.put(frame) {
                        PutOutcome::Enqueued => stats.enqueued += 1,
                        PutOutcome::Dropped => {
                            stats.dropped += 1;
                            log::warn!(
                                "frame {} dropped: queue full ({}/{})",
                                sequence,
                                sender.len(),
                                sender.capacity()
                            );
                        }
                    }
                }
                Ok(FrameEvent::Incomplete { status }) => {
                    stats.incomplete += 1;
                    log::warn!("incomplete frame discarded: {}", status);
                }
                Ok(FrameEvent::Timeout) => {
                    stats.timeouts += 1;
                    log::debug!("no frame within {:?}", self.timeout);
                }
                Ok(FrameEvent::EndOfStream) => {
                    stats.end_of_stream = true;
                    log::info!("{} has no more frames", source.name());
                    stop.request();
                    break Ok(());
                }
                Err(e) => {
                    log::error!("camera failure on {}: {:#}", source.name(), e);
                    stop.request();
                    break Err(e);
                }
            }

            if last_health_log.elapsed() >= HEALTH_INTERVAL {
                log::info!(
                    "capture health: captured={} dropped={} incomplete={} queue={}/{}",
                    stats.captured,
                    stats.dropped,
                    stats.incomplete,
                    sender.len(),
                    sender.capacity()
                );
                last_health_log = Instant::now();
            }
        };

        source.stop();
        sender.close();
        let device = source.stats();
        log::info!(
            "capture stopped: captured={} enqueued={} dropped={} device_frames={} device_incomplete={} device_timeouts={}",
            stats.captured,
            stats.enqueued,
            stats.dropped,
            device.frames_captured,
            device.incomplete,
            device.timeouts
        );
        outcome.map(|()| stats)
    }

    /// Hand up to `count` frames to `on_frame` as they arrive, without the
    /// queue (test mode). Stops early on `stop` or end of stream. Frames handed
    /// over before a device failure stay handled; the failure is returned.
    pub fn for_each_frame<F>(
        &self,
        source: &mut dyn FrameSource,
        count: usize,
        stop: &StopFlag,
        mut on_frame: F,
    ) -> Result<usize>
    where
        F: FnMut(Frame) -> Result<()>,
    {
        let mut taken = 0;
        let outcome = loop {
            if taken >= count || stop.is_requested() {
                break Ok(());
            }
            match source.next_frame(self.timeout) {
                Ok(FrameEvent::Frame(frame)) => {
                    taken += 1;
                    if let Err(e) = on_frame(frame) {
                        break Err(e);
                    }
                }
                Ok(FrameEvent::Incomplete { status }) => {
                    log::warn!("incomplete frame discarded: {}", status)
                }
                Ok(FrameEvent::Timeout) => {}
                Ok(FrameEvent::EndOfStream) => break Ok(()),
                Err(e) => {
                    log::error!("camera failure on {}: {:#}", source.name(), e);
                    break Err(e);
                }
            }
        };
        source.stop();
        outcome.map(|()| taken)
    }
}

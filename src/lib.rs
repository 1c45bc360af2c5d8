//! Snowscope
//!
//! Acquisition and screening pipeline for a drone-mounted, strobe-lit snow
//! crystal camera.
//!
//! # Architecture
//!
//! ```text
//! FrameSource -> capture thread -> bounded queue -> pipeline thread
//!                                                   (classify -> save -> measure)
//! weather station -> weather thread -> timestamped log
//! ```
//!
//! Guarantees:
//!
//! 1. **Bounded memory**: the queue holds at most `queue_size` frames; a full
//!    queue drops new frames instead of blocking the camera.
//! 2. **Exactly-once processing**: every enqueued frame is handed to one
//!    pipeline iteration, including frames still queued when capture stops.
//! 3. **Ordered shutdown**: capture stops, the queue drains, the summary is
//!    written once, then the weather logger and the device are released.
//!
//! # Module Structure
//!
//! - `frame`: owned Mono8 frame
//! - `queue`: bounded frame queue
//! - `detect`: smoothing kernels and the focus classifier
//! - `features`: segmentation and per-crystal shape features
//! - `storage`: image files and the run summary
//! - `ingest`: frame sources and the capture loop
//! - `pipeline`: consumer state machine
//! - `weather`: serial weather-station logger
//! - `session`: run orchestration

use chrono::{DateTime, TimeZone};
use std::path::{Path, PathBuf};

pub mod config;
pub mod detect;
pub mod features;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod queue;
pub mod session;
pub mod shutdown;
pub mod storage;
pub mod weather;

pub use config::{
    CameraSettings, OutputSettings, PipelineSettings, SnowscopeConfig, WeatherSettings,
};
pub use detect::{ClassificationResult, ClassifierSettings, FocusClassifier, SmoothingKernel};
pub use features::{Crystal, CrystalExtractor, ExtractorSettings};
pub use frame::Frame;
pub use ingest::{open_source, FrameEvent, FrameSource, OpenOutcome};
pub use pipeline::{PipelineController, PipelineReport, PipelineState};
pub use queue::{frame_queue, FrameReceiver, FrameSender, PutOutcome};
pub use session::{RunReport, Session};
pub use shutdown::{ShutdownSignal, StopFlag};
pub use storage::{ImageExtension, PersistenceSink};
pub use weather::WeatherLogger;

/// Per-run output directory: `<root>/<month>-<day>_<hour>-<minute>-<second>`,
/// unpadded.
pub fn run_directory<Tz: TimeZone>(root: &Path, started: &DateTime<Tz>) -> PathBuf
where
    Tz::Offset: std::fmt::Display,
{
    root.join(started.format("%-m-%-d_%-H-%-M-%-S").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn run_directory_is_unpadded() {
        let started = Utc.with_ymd_and_hms(2024, 1, 5, 9, 3, 7).unwrap();
        assert_eq!(
            run_directory(Path::new("/data"), &started),
            PathBuf::from("/data/1-5_9-3-7")
        );
    }
}

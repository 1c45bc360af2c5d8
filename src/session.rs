//! One acquisition run: wires the source, queue, pipeline and weather logger
//! together and carries out the shutdown sequence.
//!
//! Shutdown order, whatever the trigger (operator stop, end of stream, camera
//! failure):
//! 1. capture stops and closes the queue
//! 2. the pipeline drains the queue and flushes the summary
//! 3. the shutdown signal is raised and the weather logger exits
//! 4. the device is closed

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::SnowscopeConfig;
use crate::detect::FocusClassifier;
use crate::features::CrystalExtractor;
use crate::ingest::{CaptureLoop, CaptureStats, FrameSource};
use crate::pipeline::{PipelineController, PipelineReport};
use crate::queue::frame_queue;
use crate::shutdown::{ShutdownSignal, StopFlag};
use crate::storage::PersistenceSink;
use crate::weather::{WeatherHandle, WeatherLogger, WeatherStats};

const STOP_POLL: Duration = Duration::from_millis(50);

#[derive(Clone, Debug, Default)]
pub struct RunReport {
    pub capture: CaptureStats,
    pub pipeline: PipelineReport,
    /// `None` when the logger was disabled or failed.
    pub weather: Option<WeatherStats>,
    /// Set when the run ended on a camera failure.
    pub capture_error: Option<String>,
}

impl RunReport {
    pub fn capture_failed(&self) -> bool {
        self.capture_error.is_some()
    }
}

pub struct Session {
    config: SnowscopeConfig,
    run_dir: PathBuf,
}

type CaptureJoin = std::thread::JoinHandle<(Box<dyn FrameSource>, Result<CaptureStats>)>;

impl Session {
    pub fn new(config: SnowscopeConfig, run_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            run_dir: run_dir.into(),
        }
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Run until `stop` is requested or capture ends on its own.
    ///
    /// A camera failure does not make this return `Err`: the run is drained and
    /// reported with `capture_error` set. Errors are setup failures (output
    /// directory, device open) and a failed summary flush.
    pub fn run(&self, mut source: Box<dyn FrameSource>, stop: &StopFlag) -> Result<RunReport> {
        let sink = PersistenceSink::create(&self.run_dir, self.config.output.image_extension)?;
        let classifier = FocusClassifier::new(self.config.classifier.clone())?;
        let extractor = CrystalExtractor::new(self.config.extractor.clone())?;

        open_and_configure(source.as_mut(), &self.config)?;
        let (sender, receiver) = match frame_queue(self.config.pipeline.queue_size) {
            Ok(queue) => queue,
            Err(e) => {
                release(source.as_mut());
                return Err(e);
            }
        };

        let shutdown = ShutdownSignal::new();
        let weather = if self.config.weather.enabled {
            let logger = WeatherLogger::new(self.config.weather.log_path(&self.run_dir));
            match logger.spawn(&self.config.weather, shutdown.clone()) {
                Ok(handle) => Some(handle),
                Err(e) => {
                    log::error!("weather logger not started: {:#}", e);
                    None
                }
            }
        } else {
            log::info!("weather logging disabled");
            None
        };

        let pipeline = match PipelineController::new(
            receiver,
            classifier,
            extractor,
            sink,
            self.config.pipeline.clone(),
            self.config.camera.rotate_180,
        )
        .spawn()
        {
            Ok(pipeline) => pipeline,
            Err(e) => {
                abort_startup(&shutdown, weather, source.as_mut());
                return Err(e);
            }
        };

        let capture_loop = CaptureLoop::new(self.config.camera.capture_timeout());
        let capture_stop = stop.clone();
        let capture: Result<CaptureJoin> = std::thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || {
                let result = capture_loop.run(source.as_mut(), sender, &capture_stop);
                (source, result)
            })
            .map_err(|e| anyhow!("failed to spawn capture thread: {}", e));

        let (source, capture_result) = match capture {
            Ok(join) => {
                while !stop.is_requested() && !join.is_finished() {
                    std::thread::sleep(STOP_POLL);
                }
                stop.request();
                log::info!("stopping capture");
                match join.join() {
                    Ok((source, result)) => (Some(source), result),
                    Err(_) => (None, Err(anyhow!("capture thread panicked"))),
                }
            }
            // The sender went down with the closure, so the pipeline still drains.
            Err(e) => (None, Err(e)),
        };

        let pipeline_result = pipeline.join();
        shutdown.trigger();
        let weather = weather.and_then(|handle| handle.join());

        if let Some(mut source) = source {
            release(source.as_mut());
        }

        let pipeline = pipeline_result?;
        let (capture, capture_error) = match capture_result {
            Ok(stats) => (stats, None),
            Err(e) => (CaptureStats::default(), Some(format!("{:#}", e))),
        };
        Ok(RunReport {
            capture,
            pipeline,
            weather,
            capture_error,
        })
    }

    /// Test mode: save `count` frames as captured, without screening, and
    /// close the device. Each frame is saved as it arrives, so a camera failure
    /// keeps the frames already on disk.
    pub fn run_test_capture(
        &self,
        mut source: Box<dyn FrameSource>,
        count: usize,
        stop: &StopFlag,
    ) -> Result<Vec<PathBuf>> {
        let mut sink = PersistenceSink::create(&self.run_dir, self.config.output.image_extension)?;
        open_and_configure(source.as_mut(), &self.config)?;

        let rotate_180 = self.config.camera.rotate_180;
        let mut saved = Vec::with_capacity(count);
        let captured = CaptureLoop::new(self.config.camera.capture_timeout()).for_each_frame(
            source.as_mut(),
            count,
            stop,
            |frame| {
                let image = frame.into_gray_image(rotate_180)?;
                let path = sink.save_frame(&image)?;
                log::info!("test frame saved to {}", path.display());
                saved.push(path);
                Ok(())
            },
        );
        let close = source.close();
        log::info!("test mode captured {} of {} frames", saved.len(), count);
        captured?;
        close?;
        Ok(saved)
    }
}

/// Open then configure the device. A device that opened but cannot be
/// configured is closed before the error is returned.
fn open_and_configure(source: &mut dyn FrameSource, config: &SnowscopeConfig) -> Result<()> {
    let name = source.name().to_string();
    source.open()?.require_ready(&name)?;
    let configured = source
        .configure(&config.camera)
        .and_then(|outcome| outcome.require_ready(&name));
    if let Err(e) = configured {
        release(source);
        return Err(e);
    }
    log::info!("camera {} ready", name);
    Ok(())
}

/// Undo a partly started run: stop the weather logger and release the device.
fn abort_startup(
    shutdown: &ShutdownSignal,
    weather: Option<WeatherHandle>,
    source: &mut dyn FrameSource,
) {
    shutdown.trigger();
    if let Some(handle) = weather {
        handle.join();
    }
    release(source);
}

fn release(source: &mut dyn FrameSource) {
    if let Err(e) = source.close() {
        log::warn!("failed to close {}: {:#}", source.name(), e);
    }
}

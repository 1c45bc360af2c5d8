//! snowscope - drone snow crystal camera
//!
//! Captures frames, keeps those with a crystal in focus, measures the crystals
//! and logs the weather station alongside. Ctrl-C stops capture; frames already
//! queued are still processed before exit.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use snowscope::{open_source, run_directory, Session, SnowscopeConfig, StopFlag};

#[derive(Parser, Debug)]
#[command(author, version, about = "Snow crystal acquisition and focus screening")]
struct Args {
    /// JSON or TOML configuration file.
    #[arg(long, env = "SNOWSCOPE_CONFIG")]
    config: Option<PathBuf>,

    /// Camera source (stub://..., dir://<path>).
    #[arg(long)]
    source: Option<String>,

    /// Exposure time in microseconds.
    #[arg(short = 'e', long)]
    exposure_time: Option<u32>,

    /// Strobe pulse duration in microseconds.
    #[arg(long)]
    strobe_duration: Option<u32>,

    /// Delay between trigger and strobe in microseconds.
    #[arg(long)]
    strobe_delay: Option<u32>,

    /// Sensor gain in dB.
    #[arg(short = 'g', long)]
    gain: Option<f64>,

    /// Acquisition frame rate in Hz.
    #[arg(short = 'f', long)]
    frame_rate: Option<f64>,

    /// Frame queue capacity.
    #[arg(short = 'q', long)]
    queue_size: Option<usize>,

    /// Minimum number of sharp-edge pixels for a frame to be kept.
    #[arg(long)]
    sharp_edges_threshold: Option<u32>,

    /// Physical size of one pixel (diameter units in the summary).
    #[arg(long)]
    pixel_size: Option<f64>,

    /// Smallest crystal kept, as equivalent diameter in pixels.
    #[arg(long)]
    min_diameter: Option<f64>,

    /// Parent directory of the per-run output directories.
    #[arg(short = 'o', long)]
    output_root: Option<PathBuf>,

    /// Do not start the weather station logger.
    #[arg(long)]
    no_weather: bool,

    /// Save a few frames unscreened and exit.
    #[arg(short = 'T', long)]
    test: bool,

    /// Number of frames to save in test mode.
    #[arg(short = 'n', long, default_value_t = 10)]
    num_images: usize,
}

impl Args {
    fn apply(&self, config: &mut SnowscopeConfig) {
        if let Some(source) = &self.source {
            config.camera.source = source.clone();
        }
        if let Some(exposure) = self.exposure_time {
            config.camera.exposure_time_us = exposure;
        }
        if let Some(duration) = self.strobe_duration {
            config.camera.strobe_duration_us = duration;
        }
        if let Some(delay) = self.strobe_delay {
            config.camera.strobe_delay_us = delay;
        }
        if let Some(gain) = self.gain {
            config.camera.gain_db = gain;
        }
        if let Some(rate) = self.frame_rate {
            config.camera.frame_rate_hz = rate;
        }
        if let Some(queue_size) = self.queue_size {
            config.pipeline.queue_size = queue_size;
        }
        if let Some(threshold) = self.sharp_edges_threshold {
            config.classifier.sharp_edges_threshold = threshold;
        }
        if let Some(pixel_size) = self.pixel_size {
            config.extractor.pixel_size = pixel_size;
        }
        if let Some(min_diameter) = self.min_diameter {
            config.extractor.min_diameter_px = min_diameter;
        }
        if let Some(root) = &self.output_root {
            config.output.root = root.clone();
        }
        if self.no_weather {
            config.weather.enabled = false;
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = SnowscopeConfig::load_from(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    let run_dir = run_directory(&config.output.root, &chrono::Local::now());
    let source = open_source(&config.camera.source)?;
    let session = Session::new(config, run_dir);

    let stop = StopFlag::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        if handler_stop.request() {
            log::info!("interrupt received, stopping capture...");
        }
    })
    .expect("error setting Ctrl-C handler");

    if args.test {
        log::info!("test mode: saving {} frames", args.num_images);
        let saved = session.run_test_capture(source, args.num_images, &stop)?;
        log::info!(
            "test mode done: {} frames in {}",
            saved.len(),
            session.run_dir().display()
        );
        return Ok(());
    }

    log::info!("snowscope running. writing to {}", session.run_dir().display());
    let report = session.run(source, &stop)?;
    if !report.capture_failed() {
        log::info!(
            "capture: captured={} dropped={} incomplete={}",
            report.capture.captured,
            report.capture.dropped,
            report.capture.incomplete
        );
    }
    log::info!(
        "run complete: processed={} accepted={} rejected={} crystals={}",
        report.pipeline.processed,
        report.pipeline.accepted,
        report.pipeline.rejected,
        report.pipeline.crystals
    );
    log::info!("summary: {}", report.pipeline.summary_path.display());

    if let Some(error) = &report.capture_error {
        log::error!("run ended on camera failure: {}", error);
        std::process::exit(1);
    }
    Ok(())
}

//! weather_log - log the weather station without the camera.
//!
//! Writes `<timestamp> - <line>` for every serial line into
//! `<output root>/<run directory>/<log file>` until Ctrl-C.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use snowscope::weather::open_serial;
use snowscope::{run_directory, ShutdownSignal, SnowscopeConfig, WeatherLogger};

#[derive(Parser, Debug)]
#[command(author, version, about = "Timestamped weather station logger")]
struct Args {
    /// JSON or TOML configuration file.
    #[arg(long, env = "SNOWSCOPE_CONFIG")]
    config: Option<PathBuf>,

    /// Serial device of the weather station.
    #[arg(long)]
    device: Option<PathBuf>,

    #[arg(long)]
    baud_rate: Option<u32>,

    /// Parent directory of the per-run output directories.
    #[arg(short = 'o', long)]
    output_root: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = SnowscopeConfig::load_from(args.config.as_deref())?;
    if let Some(device) = args.device {
        config.weather.device = device;
    }
    if let Some(baud_rate) = args.baud_rate {
        config.weather.baud_rate = baud_rate;
    }
    if let Some(root) = args.output_root {
        config.output.root = root;
    }
    config.validate()?;

    let run_dir = run_directory(&config.output.root, &chrono::Local::now());
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create {}", run_dir.display()))?;
    let logger = WeatherLogger::new(config.weather.log_path(&run_dir));
    let port = open_serial(&config.weather.device, config.weather.baud_rate)?;

    let shutdown = ShutdownSignal::new();
    let handler_shutdown = shutdown.clone();
    ctrlc::set_handler(move || {
        handler_shutdown.trigger();
    })
    .expect("error setting Ctrl-C handler");

    log::info!(
        "weather_log reading {} at {} baud",
        config.weather.device.display(),
        config.weather.baud_rate
    );
    let stats = logger
        .run(port, &shutdown)
        .map_err(|e| anyhow!("weather logging failed: {:#}", e))?;
    log::info!("weather_log stopped after {} lines", stats.lines);
    Ok(())
}

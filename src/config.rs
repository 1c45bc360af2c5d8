use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::detect::ClassifierSettings;
use crate::features::ExtractorSettings;
use crate::storage::ImageExtension;

const DEFAULT_SOURCE: &str = "stub://drone_camera";
const DEFAULT_EXPOSURE_US: u32 = 200;
const DEFAULT_GAIN_DB: f64 = 29.0;
const DEFAULT_STROBE_DELAY_US: u32 = 50;
const DEFAULT_STROBE_DURATION_US: u32 = 100;
const DEFAULT_FRAME_RATE_HZ: f64 = 10.0;
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_QUEUE_SIZE: usize = 100;
const DEFAULT_IDLE_WAIT_MS: u64 = 10;
const DEFAULT_OUTPUT_ROOT: &str = "snowflake_data";
const DEFAULT_SERIAL_DEVICE: &str = "/dev/ttyUSB0";
const DEFAULT_BAUD_RATE: u32 = 115_200;
const DEFAULT_WEATHER_LOG: &str = "trisonica.log";

#[derive(Debug, Deserialize, Default)]
struct SnowscopeConfigFile {
    camera: Option<CameraConfigFile>,
    pipeline: Option<PipelineConfigFile>,
    classifier: Option<ClassifierSettings>,
    extractor: Option<ExtractorSettings>,
    output: Option<OutputConfigFile>,
    weather: Option<WeatherConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    source: Option<String>,
    exposure_time_us: Option<u32>,
    gain_db: Option<f64>,
    strobe_delay_us: Option<u32>,
    strobe_duration_us: Option<u32>,
    frame_rate_hz: Option<f64>,
    width: Option<u32>,
    height: Option<u32>,
    rotate_180: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    queue_size: Option<usize>,
    idle_wait_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    root: Option<PathBuf>,
    image_extension: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct WeatherConfigFile {
    enabled: Option<bool>,
    device: Option<PathBuf>,
    baud_rate: Option<u32>,
    log_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SnowscopeConfig {
    pub camera: CameraSettings,
    pub pipeline: PipelineSettings,
    pub classifier: ClassifierSettings,
    pub extractor: ExtractorSettings,
    pub output: OutputSettings,
    pub weather: WeatherSettings,
}

/// Acquisition parameters handed to `FrameSource::configure`.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraSettings {
    /// `stub://...` for the synthetic camera, `dir://<path>` to replay images.
    pub source: String,
    pub exposure_time_us: u32,
    pub gain_db: f64,
    pub strobe_delay_us: u32,
    pub strobe_duration_us: u32,
    pub frame_rate_hz: f64,
    pub width: u32,
    pub height: u32,
    /// The camera hangs upside down under the drone.
    pub rotate_180: bool,
}

impl CameraSettings {
    pub fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate_hz)
    }

    /// How long one `next_frame` call may block: one and a half frame periods.
    pub fn capture_timeout(&self) -> Duration {
        self.frame_period().mul_f64(1.5).max(Duration::from_millis(1))
    }
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            source: DEFAULT_SOURCE.to_string(),
            exposure_time_us: DEFAULT_EXPOSURE_US,
            gain_db: DEFAULT_GAIN_DB,
            strobe_delay_us: DEFAULT_STROBE_DELAY_US,
            strobe_duration_us: DEFAULT_STROBE_DURATION_US,
            frame_rate_hz: DEFAULT_FRAME_RATE_HZ,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            rotate_180: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub queue_size: usize,
    /// Consumer back-off while the queue is empty.
    pub idle_wait: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            queue_size: DEFAULT_QUEUE_SIZE,
            idle_wait: Duration::from_millis(DEFAULT_IDLE_WAIT_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputSettings {
    /// Parent of the per-run directories.
    pub root: PathBuf,
    pub image_extension: ImageExtension,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_OUTPUT_ROOT),
            image_extension: ImageExtension::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeatherSettings {
    pub enabled: bool,
    pub device: PathBuf,
    pub baud_rate: u32,
    /// Relative paths are placed inside the run directory.
    pub log_file: PathBuf,
}

impl WeatherSettings {
    pub fn log_path(&self, run_dir: &Path) -> PathBuf {
        if self.log_file.is_absolute() {
            self.log_file.clone()
        } else {
            run_dir.join(&self.log_file)
        }
    }
}

impl Default for WeatherSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            device: PathBuf::from(DEFAULT_SERIAL_DEVICE),
            baud_rate: DEFAULT_BAUD_RATE,
            log_file: PathBuf::from(DEFAULT_WEATHER_LOG),
        }
    }
}

impl Default for SnowscopeConfig {
    fn default() -> Self {
        Self {
            camera: CameraSettings::default(),
            pipeline: PipelineSettings::default(),
            classifier: ClassifierSettings::default(),
            extractor: ExtractorSettings::default(),
            output: OutputSettings::default(),
            weather: WeatherSettings::default(),
        }
    }
}

impl SnowscopeConfig {
    /// Defaults, then the file named by `SNOWSCOPE_CONFIG`, then `SNOWSCOPE_*`
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SNOWSCOPE_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SnowscopeConfigFile) -> Result<Self> {
        let defaults = Self::default();

        let camera_file = file.camera.unwrap_or_default();
        let camera = CameraSettings {
            source: camera_file.source.unwrap_or(defaults.camera.source),
            exposure_time_us: camera_file
                .exposure_time_us
                .unwrap_or(defaults.camera.exposure_time_us),
            gain_db: camera_file.gain_db.unwrap_or(defaults.camera.gain_db),
            strobe_delay_us: camera_file
                .strobe_delay_us
                .unwrap_or(defaults.camera.strobe_delay_us),
            strobe_duration_us: camera_file
                .strobe_duration_us
                .unwrap_or(defaults.camera.strobe_duration_us),
            frame_rate_hz: camera_file
                .frame_rate_hz
                .unwrap_or(defaults.camera.frame_rate_hz),
            width: camera_file.width.unwrap_or(defaults.camera.width),
            height: camera_file.height.unwrap_or(defaults.camera.height),
            rotate_180: camera_file.rotate_180.unwrap_or(defaults.camera.rotate_180),
        };

        let pipeline_file = file.pipeline.unwrap_or_default();
        let pipeline = PipelineSettings {
            queue_size: pipeline_file
                .queue_size
                .unwrap_or(defaults.pipeline.queue_size),
            idle_wait: pipeline_file
                .idle_wait_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.pipeline.idle_wait),
        };

        let output_file = file.output.unwrap_or_default();
        let output = OutputSettings {
            root: output_file.root.unwrap_or(defaults.output.root),
            image_extension: match output_file.image_extension {
                Some(ext) => ImageExtension::parse(&ext)?,
                None => defaults.output.image_extension,
            },
        };

        let weather_file = file.weather.unwrap_or_default();
        let weather = WeatherSettings {
            enabled: weather_file.enabled.unwrap_or(defaults.weather.enabled),
            device: weather_file.device.unwrap_or(defaults.weather.device),
            baud_rate: weather_file.baud_rate.unwrap_or(defaults.weather.baud_rate),
            log_file: weather_file.log_file.unwrap_or(defaults.weather.log_file),
        };

        Ok(Self {
            camera,
            pipeline,
            classifier: file.classifier.unwrap_or(defaults.classifier),
            extractor: file.extractor.unwrap_or(defaults.extractor),
            output,
            weather,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(source) = std::env::var("SNOWSCOPE_SOURCE") {
            if !source.trim().is_empty() {
                self.camera.source = source;
            }
        }
        if let Some(rate) = parse_env("SNOWSCOPE_FRAME_RATE")? {
            self.camera.frame_rate_hz = rate;
        }
        if let Some(queue_size) = parse_env("SNOWSCOPE_QUEUE_SIZE")? {
            self.pipeline.queue_size = queue_size;
        }
        if let Some(threshold) = parse_env("SNOWSCOPE_SHARP_EDGES_THRESHOLD")? {
            self.classifier.sharp_edges_threshold = threshold;
        }
        if let Some(pixel_size) = parse_env("SNOWSCOPE_PIXEL_SIZE")? {
            self.extractor.pixel_size = pixel_size;
        }
        if let Some(min_diameter) = parse_env("SNOWSCOPE_MIN_DIAMETER")? {
            self.extractor.min_diameter_px = min_diameter;
        }
        if let Ok(root) = std::env::var("SNOWSCOPE_OUTPUT_DIR") {
            if !root.trim().is_empty() {
                self.output.root = PathBuf::from(root);
            }
        }
        if let Some(enabled) = parse_env("SNOWSCOPE_WEATHER_ENABLED")? {
            self.weather.enabled = enabled;
        }
        if let Ok(device) = std::env::var("SNOWSCOPE_WEATHER_DEVICE") {
            if !device.trim().is_empty() {
                self.weather.device = PathBuf::from(device);
            }
        }
        Ok(())
    }

    /// Check cross-field constraints. Call again after applying CLI overrides.
    pub fn validate(&self) -> Result<()> {
        if self.camera.source.trim().is_empty() {
            return Err(anyhow!("camera source must not be empty"));
        }
        if !self.camera.frame_rate_hz.is_finite() || self.camera.frame_rate_hz <= 0.0 {
            return Err(anyhow!("frame rate must be greater than zero"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        if self.pipeline.queue_size == 0 {
            return Err(anyhow!("queue_size must be at least 1"));
        }
        if self.weather.baud_rate == 0 {
            return Err(anyhow!("weather baud rate must be greater than zero"));
        }
        self.classifier.validate()?;
        self.extractor.validate()?;
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<SnowscopeConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_env<T: FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} has an invalid value '{}'", name, value)),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::SmoothingKernel;

    #[test]
    fn capture_timeout_is_one_and_a_half_periods() {
        let camera = CameraSettings {
            frame_rate_hz: 10.0,
            ..CameraSettings::default()
        };
        assert_eq!(camera.capture_timeout(), Duration::from_millis(150));
    }

    #[test]
    fn defaults_validate() {
        let cfg = SnowscopeConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.pipeline.queue_size, 100);
        assert_eq!(cfg.classifier.sharp_edges_threshold, 200);
        assert_eq!(cfg.camera.exposure_time_us, 200);
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() -> Result<()> {
        let file: SnowscopeConfigFile = serde_json::from_str(
            r#"{"classifier": {"sharp_edges_threshold": 350}, "extractor": {"pixel_size": 2.0}}"#,
        )?;
        let cfg = SnowscopeConfig::from_file(file)?;
        assert_eq!(cfg.classifier.sharp_edges_threshold, 350);
        assert_eq!(cfg.classifier.smoothing, SmoothingKernel::default());
        assert_eq!(cfg.extractor.pixel_size, 2.0);
        assert_eq!(cfg.extractor.min_diameter_px, 50.0);
        Ok(())
    }

    #[test]
    fn relative_weather_log_lands_in_run_dir() {
        let weather = WeatherSettings::default();
        assert_eq!(
            weather.log_path(Path::new("/data/run")),
            PathBuf::from("/data/run/trisonica.log")
        );
    }

    #[test]
    fn zero_queue_is_rejected() {
        let mut cfg = SnowscopeConfig::default();
        cfg.pipeline.queue_size = 0;
        assert!(cfg.validate().is_err());
    }
}

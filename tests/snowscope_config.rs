use std::sync::Mutex;

use tempfile::NamedTempFile;

use snowscope::config::SnowscopeConfig;
use snowscope::{ImageExtension, SmoothingKernel};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SNOWSCOPE_CONFIG",
        "SNOWSCOPE_SOURCE",
        "SNOWSCOPE_FRAME_RATE",
        "SNOWSCOPE_QUEUE_SIZE",
        "SNOWSCOPE_SHARP_EDGES_THRESHOLD",
        "SNOWSCOPE_PIXEL_SIZE",
        "SNOWSCOPE_MIN_DIAMETER",
        "SNOWSCOPE_OUTPUT_DIR",
        "SNOWSCOPE_WEATHER_ENABLED",
        "SNOWSCOPE_WEATHER_DEVICE",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "camera": {
            "source": "stub://field",
            "exposure_time_us": 150,
            "gain_db": 20.5,
            "frame_rate_hz": 20.0,
            "rotate_180": false
        },
        "pipeline": { "queue_size": 32, "idle_wait_ms": 5 },
        "classifier": {
            "sharp_edges_threshold": 300,
            "smoothing": { "kind": "savitzky_golay", "window": 7 }
        },
        "extractor": { "binarize_threshold": 80, "connectivity": "four" },
        "output": { "root": "/tmp/flakes", "image_extension": "png" },
        "weather": { "device": "/dev/ttyACM0", "baud_rate": 57600 }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("SNOWSCOPE_CONFIG", file.path());
    std::env::set_var("SNOWSCOPE_QUEUE_SIZE", "64");
    std::env::set_var("SNOWSCOPE_PIXEL_SIZE", "3.2");

    let cfg = SnowscopeConfig::load().expect("load config");

    assert_eq!(cfg.camera.source, "stub://field");
    assert_eq!(cfg.camera.exposure_time_us, 150);
    assert_eq!(cfg.camera.gain_db, 20.5);
    assert_eq!(cfg.camera.strobe_duration_us, 100);
    assert!(!cfg.camera.rotate_180);
    assert_eq!(cfg.pipeline.queue_size, 64);
    assert_eq!(cfg.pipeline.idle_wait.as_millis(), 5);
    assert_eq!(cfg.classifier.sharp_edges_threshold, 300);
    assert_eq!(
        cfg.classifier.smoothing,
        SmoothingKernel::SavitzkyGolay { window: 7 }
    );
    assert_eq!(cfg.extractor.binarize_threshold, 80);
    assert_eq!(cfg.extractor.pixel_size, 3.2);
    assert_eq!(cfg.extractor.min_diameter_px, 50.0);
    assert_eq!(cfg.output.image_extension, ImageExtension::Png);
    assert_eq!(cfg.weather.baud_rate, 57600);
    assert!(cfg.weather.enabled);

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
[camera]
source = "dir:///data/replay"
frame_rate_hz = 5.0

[classifier]
sharp_edges_threshold = 120

[classifier.smoothing]
kind = "box"
size = 5

[weather]
enabled = false
"#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    let cfg = SnowscopeConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.camera.source, "dir:///data/replay");
    assert_eq!(cfg.camera.frame_rate_hz, 5.0);
    assert_eq!(cfg.classifier.sharp_edges_threshold, 120);
    assert_eq!(cfg.classifier.smoothing, SmoothingKernel::Box { size: 5 });
    assert!(!cfg.weather.enabled);
    assert_eq!(cfg.pipeline.queue_size, 100);

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SNOWSCOPE_QUEUE_SIZE", "0");
    assert!(SnowscopeConfig::load().is_err());
    clear_env();

    std::env::set_var("SNOWSCOPE_PIXEL_SIZE", "wide");
    assert!(SnowscopeConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(
        &mut file,
        br#"{"classifier": {"smoothing": {"kind": "gaussian", "size": 4, "sigma": 1.0}}}"#,
    )
    .expect("write config");
    assert!(SnowscopeConfig::load_from(Some(file.path())).is_err());

    clear_env();
}

#[test]
fn defaults_without_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = SnowscopeConfig::load().expect("defaults load");
    assert_eq!(cfg.camera.exposure_time_us, 200);
    assert_eq!(cfg.camera.strobe_delay_us, 50);
    assert_eq!(cfg.camera.gain_db, 29.0);
    assert_eq!(cfg.camera.frame_rate_hz, 10.0);
    assert_eq!(cfg.pipeline.queue_size, 100);
    assert_eq!(
        cfg.classifier.smoothing,
        SmoothingKernel::Gaussian {
            size: 25,
            sigma: 3.0
        }
    );
    assert_eq!(cfg.weather.device.to_str(), Some("/dev/ttyUSB0"));
    assert_eq!(cfg.weather.log_file.to_str(), Some("trisonica.log"));

    clear_env();
}

use anyhow::Result;
use image::{GrayImage, Luma};
use std::path::Path;
use std::time::Duration;

use snowscope::config::SnowscopeConfig;
use snowscope::storage::SUMMARY_FILE_NAME;
use snowscope::{
    frame_queue, open_source, ClassifierSettings, CrystalExtractor, ExtractorSettings,
    FocusClassifier, Frame, ImageExtension, PersistenceSink, PipelineController, Session,
    SmoothingKernel, StopFlag,
};

fn crystal_image() -> GrayImage {
    GrayImage::from_fn(128, 96, |x, y| {
        if (34..94).contains(&x) && (18..78).contains(&y) {
            Luma([240])
        } else {
            Luma([10])
        }
    })
}

fn blank_image() -> GrayImage {
    GrayImage::from_pixel(128, 96, Luma([10]))
}

fn test_config(source: &str) -> SnowscopeConfig {
    let mut config = SnowscopeConfig::default();
    config.camera.source = source.to_string();
    config.camera.frame_rate_hz = 200.0;
    config.camera.width = 128;
    config.camera.height = 96;
    config.pipeline.queue_size = 64;
    config.classifier = ClassifierSettings {
        sharp_edges_threshold: 100,
        edge_magnitude: Some(100.0),
        smoothing: SmoothingKernel::Gaussian {
            size: 9,
            sigma: 1.5,
        },
    };
    config.weather.enabled = false;
    config
}

fn summary_rows(dir: &Path) -> Result<usize> {
    let summary = std::fs::read_to_string(dir.join(SUMMARY_FILE_NAME))?;
    Ok(summary.lines().count() - 1)
}

#[test]
fn every_enqueued_frame_is_processed_once() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = test_config("stub://unused");
    let (sender, receiver) = frame_queue(4)?;
    let pipeline = PipelineController::new(
        receiver,
        FocusClassifier::new(config.classifier.clone())?,
        CrystalExtractor::new(ExtractorSettings::default())?,
        PersistenceSink::create(dir.path(), ImageExtension::Bmp)?,
        config.pipeline.clone(),
        false,
    )
    .spawn()?;

    let producer = std::thread::spawn(move || -> Result<(u64, u64)> {
        for seq in 1..=40u64 {
            let image = if seq % 2 == 0 {
                crystal_image()
            } else {
                blank_image()
            };
            sender.put(Frame::from_gray_image(image, seq));
            if seq % 8 == 0 {
                std::thread::sleep(Duration::from_millis(5));
            }
        }
        let counts = (sender.enqueued(), sender.dropped());
        sender.close();
        Ok(counts)
    });

    let (enqueued, dropped) = producer.join().expect("producer thread")?;
    let report = pipeline.join()?;

    assert_eq!(enqueued + dropped, 40);
    assert_eq!(report.processed, enqueued);
    assert_eq!(report.accepted + report.rejected, enqueued);
    assert_eq!(summary_rows(dir.path())? as u64, report.accepted);
    Ok(())
}

#[test]
fn directory_replay_runs_to_end_of_stream() -> Result<()> {
    let frames = tempfile::tempdir()?;
    for i in 0..5 {
        let image = if i < 3 { crystal_image() } else { blank_image() };
        image.save(frames.path().join(format!("frame_{:02}.png", i)))?;
    }
    let out = tempfile::tempdir()?;
    let run_dir = out.path().join("run");
    let source_url = format!("dir://{}", frames.path().display());

    let session = Session::new(test_config(&source_url), &run_dir);
    let report = session.run(open_source(&source_url)?, &StopFlag::new())?;

    assert!(!report.capture_failed());
    assert!(report.capture.end_of_stream);
    assert_eq!(report.capture.captured, 5);
    assert_eq!(report.pipeline.processed, 5);
    assert_eq!(report.pipeline.accepted, 3);
    assert_eq!(report.pipeline.crystals, 3);
    assert_eq!(summary_rows(&run_dir)?, 3);
    assert!(run_dir.join("Snowflake_3.bmp").exists());
    assert!(!run_dir.join("Snowflake_4.bmp").exists());
    Ok(())
}

#[test]
fn camera_failure_still_drains_and_flushes() -> Result<()> {
    let out = tempfile::tempdir()?;
    let url = "stub://fail-after/12";
    let session = Session::new(test_config(url), out.path());
    let report = session.run(open_source(url)?, &StopFlag::new())?;

    assert!(report.capture_failed());
    assert!(report.pipeline.processed <= 12);
    assert!(out.path().join(SUMMARY_FILE_NAME).exists());
    assert_eq!(summary_rows(out.path())? as u64, report.pipeline.accepted);
    Ok(())
}

#[test]
fn operator_stop_ends_a_live_run() -> Result<()> {
    let out = tempfile::tempdir()?;
    let url = "stub://bench";
    let session = Session::new(test_config(url), out.path());
    let stop = StopFlag::new();
    let remote = stop.clone();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(200));
        remote.request();
    });

    let report = session.run(open_source(url)?, &stop)?;
    assert!(!report.capture_failed());
    assert!(!report.capture.end_of_stream);
    assert!(report.capture.captured > 0);
    assert_eq!(report.pipeline.processed, report.capture.enqueued);
    assert!(out.path().join(SUMMARY_FILE_NAME).exists());
    Ok(())
}

#[test]
fn weather_lines_are_logged_next_to_the_images() -> Result<()> {
    let out = tempfile::tempdir()?;
    let station = out.path().join("station.txt");
    std::fs::write(&station, b"S 01.20 D 270 T -03.1\nS 01.10 D 268 T -03.0\n")?;

    let url = "stub://bench";
    let mut config = test_config(url);
    config.weather.enabled = true;
    config.weather.device = station;
    let run_dir = out.path().join("run");
    let stop = StopFlag::new();
    let remote = stop.clone();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(300));
        remote.request();
    });

    let report = Session::new(config, &run_dir).run(open_source(url)?, &stop)?;
    assert_eq!(report.weather.map(|w| w.lines), Some(2));
    let log = std::fs::read_to_string(run_dir.join("trisonica.log"))?;
    assert_eq!(log.lines().count(), 2);
    assert!(log.lines().all(|line| line.contains(" - S 01.")));
    Ok(())
}

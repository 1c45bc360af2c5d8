//! Anemometer / weather station logger.
//!
//! Reads newline-terminated lines from the serial station and appends each
//! non-empty line to a log file as `<local ISO-8601 timestamp> - <line>`,
//! flushing after every line. Runs until the shutdown signal is raised.
//! Independent of the imaging pipeline: its errors end only its own thread.

mod serial;

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::WeatherSettings;
use crate::shutdown::ShutdownSignal;

pub use serial::open_serial;

/// Back-off after a read that returned nothing.
const IDLE_WAIT: Duration = Duration::from_millis(50);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WeatherStats {
    pub lines: u64,
}

pub struct WeatherLogger {
    log_path: PathBuf,
}

impl WeatherLogger {
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Copy timestamped lines from `reader` until `shutdown` is raised.
    ///
    /// A read returning no data, or `WouldBlock` from a non-blocking pipe, is
    /// treated as "nothing yet", not as the end of input.
    pub fn run<R: Read>(&self, mut reader: R, shutdown: &ShutdownSignal) -> Result<WeatherStats> {
        let mut out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .with_context(|| format!("failed to open weather log {}", self.log_path.display()))?;
        log::info!("weather logging to {}", self.log_path.display());

        let mut stats = WeatherStats::default();
        let mut pending: Vec<u8> = Vec::new();
        let mut buf = [0u8; 512];

        while !shutdown.is_triggered() {
            let n = match reader.read(&mut buf) {
                Ok(0) => {
                    std::thread::sleep(IDLE_WAIT);
                    continue;
                }
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    std::thread::sleep(IDLE_WAIT);
                    continue;
                }
                Err(e) => return Err(e).context("weather station read failed"),
            };
            pending.extend_from_slice(&buf[..n]);

            while let Some(end) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=end).collect();
                if write_line(&mut out, &line)? {
                    stats.lines += 1;
                }
            }
        }

        if !pending.is_empty() {
            log::debug!("discarding {} bytes of unterminated input", pending.len());
        }
        log::info!("weather logger stopped after {} lines", stats.lines);
        Ok(stats)
    }

    /// Open the configured serial device and log on a dedicated thread.
    pub fn spawn(
        self,
        settings: &WeatherSettings,
        shutdown: ShutdownSignal,
    ) -> Result<WeatherHandle> {
        let device = settings.device.clone();
        let baud_rate = settings.baud_rate;
        let join = std::thread::Builder::new()
            .name("weather".to_string())
            .spawn(move || {
                let result =
                    open_serial(&device, baud_rate).and_then(|port| self.run(port, &shutdown));
                match result {
                    Ok(stats) => Some(stats),
                    Err(e) => {
                        log::error!("weather logger failed: {:#}", e);
                        None
                    }
                }
            })
            .map_err(|e| anyhow!("failed to spawn weather thread: {}", e))?;
        Ok(WeatherHandle { join })
    }
}

/// Returns false for blank lines, which are skipped.
fn write_line(out: &mut File, raw: &[u8]) -> Result<bool> {
    let text = String::from_utf8_lossy(raw);
    let line = text.trim();
    if line.is_empty() {
        return Ok(false);
    }
    let timestamp = Local::now().format("%Y-%m-%dT%H:%M:%S%.6f");
    writeln!(out, "{} - {}", timestamp, line)?;
    out.flush()?;
    Ok(true)
}

pub struct WeatherHandle {
    join: JoinHandle<Option<WeatherStats>>,
}

impl WeatherHandle {
    /// `None` when the logger failed (already logged).
    pub fn join(self) -> Option<WeatherStats> {
        match self.join.join() {
            Ok(stats) => stats,
            Err(_) => {
                log::error!("weather thread panicked");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Reader that raises the shutdown signal once its input is exhausted.
    struct ThenShutdown {
        inner: Cursor<Vec<u8>>,
        shutdown: ShutdownSignal,
    }

    impl Read for ThenShutdown {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let len = buf.len().min(7);
            let n = self.inner.read(&mut buf[..len])?;
            if n == 0 {
                self.shutdown.trigger();
            }
            Ok(n)
        }
    }

    #[test]
    fn timestamps_each_non_empty_line() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let logger = WeatherLogger::new(dir.path().join("trisonica.log"));
        let shutdown = ShutdownSignal::new();
        let reader = ThenShutdown {
            inner: Cursor::new(b"S 01.2 D 270\r\n\nS 00.8 D 265\npartial".to_vec()),
            shutdown: shutdown.clone(),
        };
        let stats = logger.run(reader, &shutdown)?;
        assert_eq!(stats.lines, 2);

        let log = std::fs::read_to_string(logger.log_path())?;
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" - S 01.2 D 270"), "{}", lines[0]);
        assert!(lines[1].ends_with(" - S 00.8 D 265"));
        let (timestamp, _) = lines[0].split_once(" - ").unwrap();
        assert!(chrono::NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M:%S%.f").is_ok());
        Ok(())
    }

    #[test]
    fn raised_signal_stops_immediately() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let logger = WeatherLogger::new(dir.path().join("w.log"));
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();
        let stats = logger.run(Cursor::new(b"ignored\n".to_vec()), &shutdown)?;
        assert_eq!(stats.lines, 0);
        Ok(())
    }

    #[test]
    fn missing_device_ends_only_the_logger() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let settings = WeatherSettings {
            device: dir.path().join("ttyMISSING"),
            ..WeatherSettings::default()
        };
        let handle = WeatherLogger::new(dir.path().join("w.log"))
            .spawn(&settings, ShutdownSignal::new())?;
        assert_eq!(handle.join(), None);
        Ok(())
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn silent_pipe_does_not_block_shutdown() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let fifo = dir.path().join("station.fifo");
        serial::make_fifo(&fifo)?;
        let settings = WeatherSettings {
            device: fifo.clone(),
            ..WeatherSettings::default()
        };
        let shutdown = ShutdownSignal::new();
        let handle = WeatherLogger::new(dir.path().join("w.log")).spawn(&settings, shutdown.clone())?;

        // Writer stays connected but never sends anything.
        let _writer = OpenOptions::new().write(true).open(&fifo)?;
        std::thread::sleep(Duration::from_millis(100));
        shutdown.trigger();
        assert_eq!(handle.join(), Some(WeatherStats { lines: 0 }));
        Ok(())
    }
}

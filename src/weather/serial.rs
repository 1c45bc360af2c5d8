use anyhow::{Context, Result};
use std::fs::File;
use std::path::Path;

/// Open a serial device for line reading.
///
/// On Linux a tty is switched to raw mode at `baud_rate` with a one second
/// read timeout (VMIN=0, VTIME=10), so reads return periodically even when
/// the anemometer is silent. Anything else (regular file, pipe, FIFO) is left
/// non-blocking, so a silent writer never stalls the logger's shutdown check.
#[cfg(target_os = "linux")]
pub fn open_serial(path: &Path, baud_rate: u32) -> Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    use std::os::unix::io::AsRawFd;

    let file = std::fs::OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
        .open(path)
        .with_context(|| format!("failed to open serial device {}", path.display()))?;

    let fd = file.as_raw_fd();
    // SAFETY: fd is a valid open descriptor owned by `file`.
    if unsafe { libc::isatty(fd) } != 1 {
        log::debug!("{} is not a tty; reading non-blocking", path.display());
        return Ok(file);
    }

    let speed = baud_constant(baud_rate)?;
    // SAFETY: termios is plain data; tcgetattr fills it before use.
    let mut tio: libc::termios = unsafe { std::mem::zeroed() };
    unsafe {
        if libc::tcgetattr(fd, &mut tio) != 0 {
            return Err(anyhow::anyhow!(
                "tcgetattr failed on {}: {}",
                path.display(),
                std::io::Error::last_os_error()
            ));
        }
        libc::cfmakeraw(&mut tio);
        libc::cfsetspeed(&mut tio, speed);
        tio.c_cflag |= libc::CLOCAL | libc::CREAD;
        tio.c_cc[libc::VMIN] = 0;
        tio.c_cc[libc::VTIME] = 10;
        if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
            return Err(anyhow::anyhow!(
                "tcsetattr failed on {}: {}",
                path.display(),
                std::io::Error::last_os_error()
            ));
        }
        // VTIME bounds tty reads, so the descriptor can block again.
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK) != 0 {
            return Err(anyhow::anyhow!(
                "failed to clear O_NONBLOCK on {}: {}",
                path.display(),
                std::io::Error::last_os_error()
            ));
        }
    }
    log::info!("serial {} configured at {} baud", path.display(), baud_rate);
    Ok(file)
}

#[cfg(not(target_os = "linux"))]
pub fn open_serial(path: &Path, _baud_rate: u32) -> Result<File> {
    File::open(path).with_context(|| format!("failed to open serial device {}", path.display()))
}

#[cfg(target_os = "linux")]
fn baud_constant(baud_rate: u32) -> Result<libc::speed_t> {
    Ok(match baud_rate {
        9_600 => libc::B9600,
        19_200 => libc::B19200,
        38_400 => libc::B38400,
        57_600 => libc::B57600,
        115_200 => libc::B115200,
        230_400 => libc::B230400,
        other => return Err(anyhow::anyhow!("unsupported baud rate {}", other)),
    })
}

/// Create a FIFO for tests that need a silent pipe.
#[cfg(all(test, target_os = "linux"))]
pub(crate) fn make_fifo(path: &Path) -> Result<()> {
    use std::os::unix::ffi::OsStrExt;
    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())?;
    // SAFETY: c_path is a valid NUL-terminated string.
    if unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) } != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn regular_files_open_without_tty_setup() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("capture.txt");
        std::fs::write(&path, b"line\n")?;
        open_serial(&path, 115_200)?;
        Ok(())
    }

    #[test]
    fn fifo_opens_without_a_writer() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("station.fifo");
        make_fifo(&path)?;
        // A blocking open would wait here for a writer.
        let mut port = open_serial(&path, 115_200)?;
        let mut buf = [0u8; 8];
        assert!(matches!(std::io::Read::read(&mut port, &mut buf), Ok(0)));
        Ok(())
    }

    #[test]
    fn rejects_unknown_baud_rates() {
        assert!(baud_constant(115_200).is_ok());
        assert!(baud_constant(12_345).is_err());
    }

}

use std::io::{Read, Write};
use std::time::Duration;

#[cfg(feature = "serial")]
use tracing::debug;

use crate::error::Result;
#[cfg(feature = "serial")]
use crate::error::TransportError;

/// Timeout used for serial ports when the caller asks for "no timeout".
///
/// Serial drivers always need a finite value; reads that hit it surface as
/// `ErrorKind::TimedOut` and are treated as an idle tick by the link reader.
#[cfg(feature = "serial")]
const SERIAL_BLOCKING_TIMEOUT: Duration = Duration::from_secs(3600);

/// A connected link byte stream. Implements `Read` and `Write`.
///
/// On hardware this wraps a serial port. Bench setups and tests use a Unix
/// stream socket instead.
pub struct LinkStream {
    inner: LinkStreamInner,
}

enum LinkStreamInner {
    #[cfg(feature = "serial")]
    Serial(Box<dyn serialport::SerialPort>),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl Read for LinkStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(feature = "serial")]
            LinkStreamInner::Serial(port) => port.read(buf),
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for LinkStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(feature = "serial")]
            LinkStreamInner::Serial(port) => port.write(buf),
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            #[cfg(feature = "serial")]
            LinkStreamInner::Serial(port) => port.flush(),
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.flush(),
        }
    }
}

impl LinkStream {
    /// Wrap an opened serial port.
    #[cfg(feature = "serial")]
    pub fn from_serial(port: Box<dyn serialport::SerialPort>) -> Self {
        Self {
            inner: LinkStreamInner::Serial(port),
        }
    }

    /// Wrap a connected Unix stream socket.
    #[cfg(unix)]
    pub fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: LinkStreamInner::Unix(stream),
        }
    }

    /// Set the read timeout.
    ///
    /// Serial ports share one timeout for both directions, so this also
    /// governs serial writes.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        match &mut self.inner {
            #[cfg(feature = "serial")]
            LinkStreamInner::Serial(port) => port
                .set_timeout(timeout.unwrap_or(SERIAL_BLOCKING_TIMEOUT))
                .map_err(|err| TransportError::Io(err.into())),
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
        }
    }

    /// Set the write timeout.
    ///
    /// Ignored for serial ports, whose single timeout is owned by
    /// [`LinkStream::set_read_timeout`].
    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        match &mut self.inner {
            #[cfg(feature = "serial")]
            LinkStreamInner::Serial(_) => {
                debug!(?timeout, "serial write timeout follows read timeout");
                Ok(())
            }
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
        }
    }

    /// Try to clone this stream so reads and writes can live on different threads.
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            #[cfg(feature = "serial")]
            LinkStreamInner::Serial(port) => {
                let cloned = port
                    .try_clone()
                    .map_err(|err| TransportError::Io(err.into()))?;
                Ok(Self::from_serial(cloned))
            }
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => {
                let cloned = stream.try_clone()?;
                Ok(Self::from_unix(cloned))
            }
        }
    }

    /// Short name of the underlying channel, for logs and diagnostics.
    pub fn kind(&self) -> &'static str {
        match &self.inner {
            #[cfg(feature = "serial")]
            LinkStreamInner::Serial(_) => "serial",
            #[cfg(unix)]
            LinkStreamInner::Unix(_) => "unix",
        }
    }
}

impl std::fmt::Debug for LinkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            #[cfg(feature = "serial")]
            LinkStreamInner::Serial(port) => f
                .debug_struct("LinkStream")
                .field("type", &"serial")
                .field("name", &port.name())
                .finish(),
            #[cfg(unix)]
            LinkStreamInner::Unix(_) => f.debug_struct("LinkStream").field("type", &"unix").finish(),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn unix_stream_round_trips_bytes() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut left = LinkStream::from_unix(left);
        let mut right = LinkStream::from_unix(right);

        left.write_all(&[0xFE, 0x41, 0xFF]).unwrap();
        let mut buf = [0u8; 3];
        right.read_exact(&mut buf).unwrap();

        assert_eq!(buf, [0xFE, 0x41, 0xFF]);
        assert_eq!(left.kind(), "unix");
    }

    #[test]
    fn cloned_stream_shares_the_channel() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let left = LinkStream::from_unix(left);
        let mut writer = left.try_clone().unwrap();
        let mut right = LinkStream::from_unix(right);

        writer.write_all(b"ok").unwrap();
        let mut buf = [0u8; 2];
        right.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ok");
    }

    #[test]
    fn read_timeout_surfaces_as_would_block_or_timed_out() {
        let (left, _right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut left = LinkStream::from_unix(left);
        left.set_read_timeout(Some(Duration::from_millis(10)))
            .unwrap();

        let mut buf = [0u8; 1];
        let err = left.read(&mut buf).unwrap_err();
        assert!(matches!(
            err.kind(),
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
        ));
    }

    #[test]
    fn debug_names_the_channel() {
        let (left, _right) = std::os::unix::net::UnixStream::pair().unwrap();
        let left = LinkStream::from_unix(left);
        assert!(format!("{left:?}").contains("unix"));
    }
}

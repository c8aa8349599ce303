use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Result, TransportError};
use crate::serial::{open_serial, SerialConfig};
use crate::stream::LinkStream;

/// Prefix selecting a Unix stream socket instead of a serial device.
pub const UNIX_PREFIX: &str = "unix:";

/// Where a link lives: a serial device path, or `unix:<path>` for a bridged socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAddress {
    Serial(String),
    Unix(PathBuf),
}

impl LinkAddress {
    /// Open the link as a client.
    pub fn open(&self, serial: &SerialConfig) -> Result<LinkStream> {
        match self {
            LinkAddress::Serial(path) => open_serial(path, serial),
            LinkAddress::Unix(path) => open_unix(path),
        }
    }
}

#[cfg(unix)]
fn open_unix(path: &std::path::Path) -> Result<LinkStream> {
    crate::uds::UnixLink::connect(path)
}

#[cfg(not(unix))]
fn open_unix(path: &std::path::Path) -> Result<LinkStream> {
    Err(TransportError::Unsupported(format!(
        "unix socket {} on this platform",
        path.display()
    )))
}

impl FromStr for LinkAddress {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(path) = s.strip_prefix(UNIX_PREFIX) {
            if path.is_empty() {
                return Err(TransportError::InvalidAddress(s.to_string()));
            }
            return Ok(LinkAddress::Unix(PathBuf::from(path)));
        }
        if s.is_empty() {
            return Err(TransportError::InvalidAddress(s.to_string()));
        }
        Ok(LinkAddress::Serial(s.to_string()))
    }
}

impl fmt::Display for LinkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkAddress::Serial(path) => f.write_str(path),
            LinkAddress::Unix(path) => write!(f, "{UNIX_PREFIX}{}", path.display()),
        }
    }
}

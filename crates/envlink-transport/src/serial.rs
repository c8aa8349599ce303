use std::time::Duration;

#[cfg(feature = "serial")]
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::LinkStream;

/// Default UART speed used by the sensor node.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Serial line settings. The node always runs 8N1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Line speed in baud.
    pub baud_rate: u32,
    /// Read timeout applied when the port is opened.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: Duration::from_millis(100),
        }
    }
}

/// Open a serial device as a link stream.
#[cfg(feature = "serial")]
pub fn open_serial(path: &str, config: &SerialConfig) -> Result<LinkStream> {
    let port = serialport::new(path, config.baud_rate)
        .data_bits(serialport::DataBits::Eight)
        .stop_bits(serialport::StopBits::One)
        .parity(serialport::Parity::None)
        .flow_control(serialport::FlowControl::None)
        .timeout(config.timeout)
        .open()
        .map_err(|err| TransportError::Open {
            path: path.to_string(),
            source: err.into(),
        })?;

    // Stale bytes from a previous session would only be discarded by the
    // decoder anyway; dropping them here keeps the noise counters honest.
    if let Err(err) = port.clear(serialport::ClearBuffer::Input) {
        debug!(path, %err, "failed to clear serial input buffer");
    }

    info!(path, baud_rate = config.baud_rate, "opened serial port");
    Ok(LinkStream::from_serial(port))
}

/// Open a serial device as a link stream.
#[cfg(not(feature = "serial"))]
pub fn open_serial(path: &str, _config: &SerialConfig) -> Result<LinkStream> {
    Err(TransportError::Unsupported(format!(
        "serial port {path} (built without the `serial` feature)"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_node_uart() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.timeout, Duration::from_millis(100));
    }

    #[test]
    #[cfg(feature = "serial")]
    fn missing_device_reports_open_error() {
        let err = open_serial("/dev/envlink-does-not-exist", &SerialConfig::default())
            .expect_err("opening a missing device should fail");
        assert!(matches!(err, TransportError::Open { ref path, .. } if path.ends_with("not-exist")));
    }
}

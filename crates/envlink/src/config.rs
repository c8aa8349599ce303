//! Optional TOML configuration.
//!
//! ```toml
//! [link]
//! port = "/dev/ttyS1"
//! baud_rate = 115200
//! max_payload_size = 4194304
//! stall_timeout_ms = 2000
//!
//! [storage]
//! image_path = "/var/lib/envlink/output.jpeg"
//! numbered = false
//! ```
//!
//! Command-line flags win over `ENVLINK_PORT`, which wins over the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use envlink_frame::FrameConfig;
use envlink_transport::{LinkAddress, SerialConfig};
use serde::Deserialize;

use crate::cmd::LinkArgs;
use crate::exit::{io_error, transport_error, CliError, CliResult, DATA_INVALID, USAGE};

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub link: LinkSection,
    pub storage: StorageSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkSection {
    pub port: Option<String>,
    pub baud_rate: Option<u32>,
    pub max_payload_size: Option<usize>,
    pub stall_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSection {
    pub image_path: Option<PathBuf>,
    pub numbered: Option<bool>,
}

impl FileConfig {
    /// Load `path`, or return defaults when no file was given.
    pub fn load(path: Option<&Path>) -> CliResult<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
        Self::parse(&text)
            .map_err(|err| CliError::new(DATA_INVALID, format!("{}: {err}", path.display())))
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

/// Everything needed to open one link.
#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub address: LinkAddress,
    pub serial: SerialConfig,
    pub frame: FrameConfig,
}

impl LinkSettings {
    pub fn resolve(args: &LinkArgs, file: &FileConfig) -> CliResult<Self> {
        let port = args
            .port
            .as_deref()
            .or(file.link.port.as_deref())
            .ok_or_else(|| {
                CliError::new(USAGE, "no link given: use --port, ENVLINK_PORT or [link] port")
            })?;
        let address: LinkAddress = port
            .parse()
            .map_err(|err| transport_error("invalid --port", err))?;

        let mut serial = SerialConfig::default();
        if let Some(baud) = args.baud.or(file.link.baud_rate) {
            serial.baud_rate = baud;
        }

        let mut frame = FrameConfig::default();
        if let Some(max) = args.max_payload.or(file.link.max_payload_size) {
            frame.max_payload_size = max;
        }
        frame.stall_timeout = match &args.stall_timeout {
            Some(text) => Some(crate::cmd::parse_duration(text)?),
            None => file.link.stall_timeout_ms.map(Duration::from_millis),
        };

        Ok(Self {
            address,
            serial,
            frame,
        })
    }
}

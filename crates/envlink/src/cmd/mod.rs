use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};
use envlink_endpoint::{
    DiscardImages, EndpointConfig, FileImageSink, ImageSink, LinkEndpoint,
};
use tracing::info;

use crate::config::{FileConfig, LinkSettings};
use crate::exit::{endpoint_error, transport_error, CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod capture;
pub mod field;
pub mod monitor;
pub mod send;
pub mod simulate;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Bridge a node: print telemetry and store images.
    Monitor(MonitorArgs),
    /// Send one command frame.
    Send(SendArgs),
    /// Request one image and write it to a file.
    Capture(CaptureArgs),
    /// Wait for telemetry and print one field.
    Field(FieldArgs),
    /// Run a simulated sensor node.
    Simulate(SimulateArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, file: &FileConfig, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Monitor(args) => monitor::run(args, file, format),
        Command::Send(args) => send::run(args, file),
        Command::Capture(args) => capture::run(args, file, format),
        Command::Field(args) => field::run(args, file, format),
        Command::Simulate(args) => simulate::run(args, file),
        Command::Version(args) => version::run(args),
    }
}

/// Link selection shared by every subcommand that opens a port.
#[derive(Args, Debug, Clone)]
pub struct LinkArgs {
    /// Serial device path, or unix:<path> for a Unix stream socket.
    #[arg(long, short = 'p', env = "ENVLINK_PORT")]
    pub port: Option<String>,
    /// Serial line speed.
    #[arg(long)]
    pub baud: Option<u32>,
    /// Largest accepted frame payload in bytes.
    #[arg(long, value_name = "BYTES")]
    pub max_payload: Option<usize>,
    /// Discard a partial frame after this much silence (e.g. 2s, 500ms).
    #[arg(long, value_name = "DURATION")]
    pub stall_timeout: Option<String>,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Write received images here. Default: [storage] image_path, else discard.
    #[arg(long, value_name = "FILE")]
    pub images: Option<PathBuf>,
    /// Number each stored image instead of overwriting one file.
    #[arg(long)]
    pub numbered: bool,
    /// Exit after N telemetry updates.
    #[arg(long)]
    pub count: Option<usize>,
    /// Print link counters on exit.
    #[arg(long)]
    pub stats: bool,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Send the words as-is instead of validating a built-in command.
    #[arg(long)]
    pub raw: bool,
    /// Command token and arguments, e.g. CAPTURE or SETFRAMESIZE VGA.
    #[arg(required = true, num_args = 1..)]
    pub command: Vec<String>,
}

#[derive(Args, Debug)]
pub struct CaptureArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Output file. Default: [storage] image_path, else capture.jpeg.
    #[arg(long, short = 'o', value_name = "FILE")]
    pub output: Option<PathBuf>,
    /// How long to wait for the image (e.g. 10s, 500ms).
    #[arg(long, default_value = "10s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct FieldArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Telemetry key, e.g. Temp or CO_2.
    pub key: String,
    /// How long to wait for telemetry (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Bind the unix: address and serve hosts one at a time.
    #[arg(long)]
    pub listen: bool,
    /// Telemetry period (e.g. 1s, 250ms).
    #[arg(long, default_value = "1s")]
    pub interval: String,
    /// Read a real air-quality sensor from this port (9600 baud).
    #[arg(long, value_name = "PORT")]
    pub air_quality: Option<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

/// Open a host-side endpoint on the resolved link.
pub fn open_endpoint(
    settings: &LinkSettings,
    sink: Box<dyn ImageSink>,
) -> CliResult<LinkEndpoint> {
    let stream = settings
        .address
        .open(&settings.serial)
        .map_err(|err| transport_error("open failed", err))?;
    let config = EndpointConfig {
        frame: settings.frame.clone(),
        ..EndpointConfig::default()
    };
    let endpoint = LinkEndpoint::open(stream, config, sink)
        .map_err(|err| endpoint_error("open failed", err))?;
    info!(port = %settings.address, "link open");
    Ok(endpoint)
}

/// Image sink from flags, then `[storage]`.
pub fn image_sink(
    path: Option<PathBuf>,
    numbered: bool,
    file: &FileConfig,
) -> Box<dyn ImageSink> {
    let numbered = numbered || file.storage.numbered.unwrap_or(false);
    match path.or_else(|| file.storage.image_path.clone()) {
        Some(path) if numbered => Box::new(FileImageSink::numbered(path)),
        Some(path) => Box::new(FileImageSink::overwrite(path)),
        None => Box::new(DiscardImages),
    }
}

pub fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, std::sync::atomic::Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

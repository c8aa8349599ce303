//! Duplex link endpoint for envlink.
//!
//! One [`LinkEndpoint`] sits on each end of a serial link. It owns a reader
//! thread that reassembles frames and routes them by kind: telemetry into a
//! [`TelemetrySnapshot`], images into an [`ImageSink`], commands into a
//! [`CommandDispatcher`]. Outbound frames from any thread go through one
//! mutex-serialized writer.

pub mod config;
pub mod device;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod sink;
pub mod snapshot;
pub mod telemetry;

pub use config::EndpointConfig;
pub use device::{AirQualityMonitor, AirQualityState, Camera, ClimateSensor, DeviceNode};
pub use dispatch::{Command, CommandDispatcher, DeviceControl, FrameSize};
pub use endpoint::{LinkEndpoint, LinkSender, LinkStats};
pub use error::{EndpointError, Result};
pub use sink::{DiscardImages, FileImageSink, ImageSink};
pub use snapshot::{Snapshot, TelemetrySnapshot};
pub use telemetry::{lookup_field, parse_fields, TelemetryReadings};

//! Byte-channel abstraction for envlink serial links.
//!
//! A link is a full-duplex byte stream between a sensor node and its host
//! bridge. In the field that is a UART; on the bench it is often a serial
//! adapter bridged to a Unix stream socket (`socat`, QEMU, tests). Both are
//! exposed through one [`LinkStream`] type so the framing layer never cares
//! which one it is talking to.

pub mod address;
pub mod error;
pub mod serial;
pub mod stream;

#[cfg(unix)]
pub mod uds;

pub use address::LinkAddress;
pub use error::{Result, TransportError};
pub use serial::{open_serial, SerialConfig, DEFAULT_BAUD_RATE};
pub use stream::LinkStream;

#[cfg(unix)]
pub use uds::{UnixLink, UnixLinkListener};

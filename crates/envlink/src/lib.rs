//! Framed serial link between an environmental sensor node and its host.
//!
//! One UART carries three kinds of traffic: text telemetry from the node,
//! text commands from the host, and binary camera images. Each travels as a
//! `HEAD`-delimited, byte-escaped frame; the receiver reassembles them with
//! a small state machine and resynchronizes on the next `HEAD` after any
//! corruption.
//!
//! # Crate Structure
//!
//! - [`transport`]: serial ports and Unix stream sockets behind one `LinkStream`
//! - [`frame`]: codec, receiver state machine, blocking reader/writer,
//!   fixed-length air-quality frames
//! - [`endpoint`]: duplex link endpoint, telemetry snapshot, command
//!   dispatch, device-node runtime

/// Re-export transport types.
pub mod transport {
    pub use envlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use envlink_frame::*;
}

/// Re-export endpoint types.
pub mod endpoint {
    pub use envlink_endpoint::*;
}

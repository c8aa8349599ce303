//! Marker-delimited serial framing for envlink.
//!
//! Every frame on the wire is:
//! - a `HEAD` marker (0xFE)
//! - the payload, with any reserved byte preceded by `ESCAPE` (0x7E)
//! - a terminator: `END` (0xFF) for telemetry/command text, `IMAGE_END`
//!   (0x01) for camera images
//!
//! There is no length prefix and no checksum. The receiver is a byte-at-a-time
//! state machine ([`FrameDecoder`]) that resynchronizes on the next `HEAD`.

pub mod air_quality;
pub mod codec;
pub mod command;
pub mod decoder;
pub mod error;
pub mod reader;
#[cfg(feature = "async")]
pub mod tokio_codec;
pub mod writer;

pub use air_quality::{
    encode_air_quality, parse_air_quality, AirQualityReader, AirQualitySample,
    AIR_QUALITY_FRAME_LEN,
};
pub use codec::{
    classify_text, encode_frame, encoded_len, is_reserved, Frame, FrameConfig, FrameKind,
    DEFAULT_MAX_PAYLOAD, DEFAULT_WRITE_TIMEOUT, END, ESCAPE, HEAD, IMAGE_END,
};
pub use command::{CAPTURE, DEFAULT_COMMAND_PREFIXES, SET_FRAME_SIZE};
pub use decoder::{DecodeState, DecoderStats, FrameDecoder};
pub use error::{FrameError, Result};
pub use reader::{is_timeout, FrameReader};
#[cfg(feature = "async")]
pub use tokio_codec::LinkCodec;
pub use writer::FrameWriter;

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use crate::command::{has_command_prefix, DEFAULT_COMMAND_PREFIXES};
use crate::error::{FrameError, Result};

/// Frame start marker.
pub const HEAD: u8 = 0xFE;

/// Frame end marker for telemetry and command frames.
pub const END: u8 = 0xFF;

/// Escape marker: the next byte is literal payload.
pub const ESCAPE: u8 = 0x7E;

/// Frame end marker for binary image frames.
pub const IMAGE_END: u8 = 0x01;

/// Every byte value that must be escaped inside a payload.
pub const RESERVED: [u8; 4] = [HEAD, END, ESCAPE, IMAGE_END];

/// Default maximum payload size: 4 MiB, enough for one UXGA JPEG.
pub const DEFAULT_MAX_PAYLOAD: usize = 4 * 1024 * 1024;

/// Default bound on writing one frame, including waits on a full link.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// What a frame carries.
///
/// `Telemetry` and `Command` share the `END` terminator on the wire; the
/// receiver tells them apart by the payload's leading token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Telemetry,
    Command,
    Image,
}

impl FrameKind {
    /// The marker byte that closes a frame of this kind.
    pub fn terminator(self) -> u8 {
        match self {
            FrameKind::Telemetry | FrameKind::Command => END,
            FrameKind::Image => IMAGE_END,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FrameKind::Telemetry => "telemetry",
            FrameKind::Command => "command",
            FrameKind::Image => "image",
        }
    }
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reassembled frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The kind resolved from the terminator (and, for `END`, the payload).
    pub kind: FrameKind,
    /// The unescaped payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(kind: FrameKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// The number of bytes this frame occupies on the wire.
    pub fn wire_size(&self) -> usize {
        encoded_len(&self.payload)
    }
}

/// Returns true if `byte` collides with a marker and must be escaped.
#[inline]
pub fn is_reserved(byte: u8) -> bool {
    matches!(byte, HEAD | END | ESCAPE | IMAGE_END)
}

/// Exact encoded size of `payload`, including head and terminator.
pub fn encoded_len(payload: &[u8]) -> usize {
    let escapes = payload.iter().filter(|&&b| is_reserved(b)).count();
    payload.len() + escapes + 2
}

/// Encode a payload into its wire representation.
///
/// Wire format:
/// ```text
/// ┌──────┬──────────────────────────────┬──────────────────┐
/// │ HEAD │ payload, reserved bytes      │ END | IMAGE_END  │
/// │ 0xFE │ prefixed with ESCAPE (0x7E)  │ 0xFF | 0x01      │
/// └──────┴──────────────────────────────┴──────────────────┘
/// ```
pub fn encode_frame(kind: FrameKind, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(encoded_len(payload));
    dst.put_u8(HEAD);
    for &byte in payload {
        if is_reserved(byte) {
            dst.put_u8(ESCAPE);
        }
        dst.put_u8(byte);
    }
    dst.put_u8(kind.terminator());
    Ok(())
}

/// Resolve the kind of an `END`-terminated payload.
pub fn classify_text<S: AsRef<str>>(payload: &[u8], command_prefixes: &[S]) -> FrameKind {
    if has_command_prefix(payload, command_prefixes) {
        FrameKind::Command
    } else {
        FrameKind::Telemetry
    }
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. A longer partial frame is discarded. Default: 4 MiB.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<Duration>,
    /// Longest a single frame write may take. `None` waits indefinitely.
    /// Default: 5 s.
    pub write_timeout: Option<Duration>,
    /// Discard a partial frame that has seen no byte for this long. Default: disabled.
    pub stall_timeout: Option<Duration>,
    /// Leading tokens that mark an `END`-terminated payload as a command.
    pub command_prefixes: Vec<String>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: Some(DEFAULT_WRITE_TIMEOUT),
            stall_timeout: None,
            command_prefixes: DEFAULT_COMMAND_PREFIXES
                .iter()
                .map(|prefix| prefix.to_string())
                .collect(),
        }
    }
}

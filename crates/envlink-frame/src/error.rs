/// Errors that can occur during frame encoding/decoding.
///
/// Framing errors (noise, truncated frames) are not represented here: the
/// decoder recovers from them silently by resynchronizing on the next `HEAD`.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A fixed-length sensor frame failed its checksum.
    #[error("sensor frame checksum mismatch (expected 0x{expected:02X}, got 0x{actual:02X})")]
    ChecksumMismatch { expected: u8, actual: u8 },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame could not be written within the write timeout. Only the
    /// first `written` of `total` wire bytes went out.
    #[error("frame write timed out after {written} of {total} bytes")]
    WriteTimeout { written: usize, total: usize },

    /// The link was closed. Any partially received frame is lost.
    #[error("connection closed")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;

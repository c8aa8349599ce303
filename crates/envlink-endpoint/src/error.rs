/// Errors that can occur in endpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] envlink_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] envlink_frame::FrameError),

    /// I/O error outside the framing layer (thread spawn, image sink).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A synchronous request got no answer in time.
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The endpoint has been shut down or its reader has stopped.
    #[error("endpoint closed")]
    Closed,

    /// A command payload could not be parsed.
    #[error("invalid command: {0}")]
    InvalidCommand(String),
}

pub type Result<T> = std::result::Result<T, EndpointError>;

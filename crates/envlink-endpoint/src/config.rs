use std::time::Duration;

use envlink_frame::FrameConfig;

/// Default read timeout used as the reader thread's shutdown poll tick.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Default depth of the inbound command queue.
pub const DEFAULT_COMMAND_QUEUE_DEPTH: usize = 10;

/// Endpoint behavior configuration.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Framing limits and command prefixes for both directions.
    pub frame: FrameConfig,
    /// Read timeout applied to the reader side of a link. The reader checks
    /// for shutdown once per tick.
    pub poll_interval: Duration,
    /// Commands buffered for the dispatcher before new ones are dropped.
    pub command_queue_depth: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            command_queue_depth: DEFAULT_COMMAND_QUEUE_DEPTH,
        }
    }
}

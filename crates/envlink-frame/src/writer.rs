//! Blocking frame output.
//!
//! A link can stop taking bytes in the middle of a frame: a full socket
//! buffer, a flow-controlled UART, a host that stopped reading. Each frame
//! therefore gets one deadline (`FrameConfig::write_timeout`) covering every
//! write and the final flush. A frame that misses it is left cut off on the
//! wire. The receiver drops a cut-off frame when the next `HEAD` arrives, so
//! the writer only has to make sure that `HEAD` is not swallowed by an
//! escape pair the cut left open.

use std::io::{ErrorKind, Write};
use std::thread;
use std::time::{Duration, Instant};

use bytes::{BufMut, BytesMut};
use envlink_transport::LinkStream;
use tracing::{trace, warn};

use crate::codec::{encode_frame, Frame, FrameConfig, FrameKind, ESCAPE};
use crate::error::{FrameError, Result};
use crate::reader::{is_timeout, transport_to_frame_error};

const INITIAL_WIRE_CAPACITY: usize = 1024;

/// Pause before retrying a link that reported it is full.
const BLOCKED_BACKOFF: Duration = Duration::from_millis(1);

/// Literal byte that closes an escape pair left open by a cut-off frame.
const ESCAPE_FILLER: u8 = 0x00;

/// What the previous send left on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tail {
    Clean,
    CutOff,
    /// Cut right after an `ESCAPE`: the receiver would read our next `HEAD`
    /// as a literal byte.
    CutOffInEscape,
}

/// Writes complete frames to any `Write` stream.
///
/// Not synchronized; share one writer behind a lock so frames from
/// different threads never interleave.
pub struct FrameWriter<T> {
    inner: T,
    wire: BytesMut,
    config: FrameConfig,
    tail: Tail,
    cut_off_frames: u64,
}

impl<T: Write> FrameWriter<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            wire: BytesMut::with_capacity(INITIAL_WIRE_CAPACITY),
            config,
            tail: Tail::Clean,
            cut_off_frames: 0,
        }
    }

    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.send(frame.kind, frame.payload.as_ref())
    }

    /// Encode `payload` as a `kind` frame and write it out (blocking).
    ///
    /// Fails with [`FrameError::WriteTimeout`] when the frame is not out
    /// within `write_timeout`. The writer stays usable afterwards.
    pub fn send(&mut self, kind: FrameKind, payload: &[u8]) -> Result<()> {
        if payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_size,
            });
        }

        self.wire.clear();
        if self.tail == Tail::CutOffInEscape {
            self.wire.put_u8(ESCAPE_FILLER);
        }
        encode_frame(kind, payload, &mut self.wire)?;

        let deadline = self.deadline();
        self.write_wire(deadline)?;
        self.flush_until(deadline)
    }

    /// Flush the underlying stream within the write timeout.
    pub fn flush(&mut self) -> Result<()> {
        let deadline = self.deadline();
        self.flush_until(deadline)
    }

    /// Frames that went out incomplete since creation.
    pub fn cut_off_frames(&self) -> u64 {
        self.cut_off_frames
    }

    /// Change the per-frame deadline for subsequent sends.
    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) {
        self.config.write_timeout = timeout;
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    fn deadline(&self) -> Option<Instant> {
        self.config.write_timeout.map(|timeout| Instant::now() + timeout)
    }

    fn write_wire(&mut self, deadline: Option<Instant>) -> Result<()> {
        let total = self.wire.len();
        let mut written = 0usize;
        while written < total {
            match self.inner.write(&self.wire[written..]) {
                Ok(0) => {
                    self.record_cut_off(written);
                    return Err(FrameError::ConnectionClosed);
                }
                Ok(n) => written += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) if is_timeout(&err) => {
                    if !back_off(deadline) {
                        self.record_cut_off(written);
                        return Err(FrameError::WriteTimeout { written, total });
                    }
                }
                Err(err) => {
                    self.record_cut_off(written);
                    return Err(FrameError::Io(err));
                }
            }
        }
        self.tail = Tail::Clean;
        Ok(())
    }

    fn flush_until(&mut self, deadline: Option<Instant>) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) if is_timeout(&err) => {
                    if !back_off(deadline) {
                        let total = self.wire.len();
                        return Err(FrameError::WriteTimeout {
                            written: total,
                            total,
                        });
                    }
                }
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    fn record_cut_off(&mut self, written: usize) {
        // Nothing reached the wire; whatever the previous send left stands.
        if written == 0 {
            return;
        }
        self.cut_off_frames += 1;
        self.tail = if ends_in_open_escape(&self.wire[..written]) {
            Tail::CutOffInEscape
        } else {
            Tail::CutOff
        };
        warn!(
            written,
            total = self.wire.len(),
            "frame cut off on the wire"
        );
    }
}

impl FrameWriter<LinkStream> {
    /// Create a frame writer for a link and apply the write timeout to the
    /// socket or port as well.
    pub fn with_config_link(mut inner: LinkStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

/// Sleep briefly unless `deadline` has passed. Returns false once it has.
fn back_off(deadline: Option<Instant>) -> bool {
    let pause = match deadline {
        None => BLOCKED_BACKOFF,
        Some(deadline) => {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return false;
            }
            left.min(BLOCKED_BACKOFF)
        }
    };
    trace!(?pause, "link full, backing off");
    thread::sleep(pause);
    true
}

fn ends_in_open_escape(sent: &[u8]) -> bool {
    let mut open = false;
    for &byte in sent {
        open = !open && byte == ESCAPE;
    }
    open
}

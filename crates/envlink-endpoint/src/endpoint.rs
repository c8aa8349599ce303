use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use envlink_frame::{
    is_timeout, DecoderStats, Frame, FrameError, FrameKind, FrameReader, FrameWriter,
};
use envlink_transport::LinkStream;
use tracing::{debug, error, info, trace, warn};

use crate::config::EndpointConfig;
use crate::dispatch::{Command, CommandDispatcher};
use crate::error::{EndpointError, Result};
use crate::sink::ImageSink;
use crate::snapshot::{Snapshot, TelemetrySnapshot};
use crate::telemetry::lookup_field;

type BoxedWriter = FrameWriter<Box<dyn Write + Send>>;

/// Counters for one endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub telemetry_frames: u64,
    pub command_frames: u64,
    pub image_frames: u64,
    /// Frames written by this endpoint.
    pub frames_sent: u64,
    /// Images the sink failed to store.
    pub sink_failures: u64,
    /// Commands dropped because the queue was full or the dispatcher stopped.
    pub dropped_commands: u64,
    /// Receiver-side framing counters.
    pub decoder: DecoderStats,
}

#[derive(Default)]
struct Counters {
    telemetry_frames: AtomicU64,
    command_frames: AtomicU64,
    image_frames: AtomicU64,
    frames_sent: AtomicU64,
    sink_failures: AtomicU64,
    dropped_commands: AtomicU64,
}

struct CommandRoute {
    tx: SyncSender<Bytes>,
    prefixes: Vec<String>,
}

struct Shared {
    writer: Mutex<BoxedWriter>,
    telemetry: TelemetrySnapshot,
    last_image: Snapshot<Bytes>,
    sink: Mutex<Box<dyn ImageSink>>,
    route: Mutex<Option<CommandRoute>>,
    counters: Counters,
    decoder_stats: Mutex<DecoderStats>,
    stop: AtomicBool,
    running: AtomicBool,
    terminal_error: Mutex<Option<String>>,
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn handle_frame(&self, frame: Frame) {
        trace!(kind = %frame.kind, len = frame.payload.len(), "frame received");
        match frame.kind {
            FrameKind::Telemetry if self.is_routed_command(&frame.payload) => {
                self.route_command(frame.payload)
            }
            FrameKind::Telemetry => {
                self.counters.telemetry_frames.fetch_add(1, Ordering::Relaxed);
                self.telemetry.publish(frame.payload);
            }
            FrameKind::Command => self.route_command(frame.payload),
            FrameKind::Image => {
                self.counters.image_frames.fetch_add(1, Ordering::Relaxed);
                self.on_image_frame(frame.payload);
            }
        }
    }

    // Dispatcher prefixes beyond the decoder's own list arrive as telemetry.
    fn is_routed_command(&self, payload: &[u8]) -> bool {
        lock(&self.route).as_ref().is_some_and(|route| {
            route
                .prefixes
                .iter()
                .any(|prefix| payload.starts_with(prefix.as_bytes()))
        })
    }

    fn route_command(&self, payload: Bytes) {
        let route = lock(&self.route);
        let Some(route) = route.as_ref() else {
            // Without a dispatcher every END frame is telemetry text.
            trace!("no dispatcher installed, publishing as telemetry");
            self.counters.telemetry_frames.fetch_add(1, Ordering::Relaxed);
            self.telemetry.publish(payload);
            return;
        };
        self.counters.command_frames.fetch_add(1, Ordering::Relaxed);
        match route.tx.try_send(payload) {
            Ok(()) => {}
            Err(TrySendError::Full(payload)) => {
                warn!(
                    command = %String::from_utf8_lossy(&payload),
                    "command queue full, dropping command"
                );
                self.counters.dropped_commands.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("dispatcher stopped, dropping command");
                self.counters.dropped_commands.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn on_image_frame(&self, payload: Bytes) {
        self.last_image.publish(payload.clone());
        if let Err(err) = lock(&self.sink).store(&payload) {
            warn!(error = %err, bytes = payload.len(), "image sink failed");
            self.counters.sink_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn send_frame(&self, kind: FrameKind, payload: &[u8]) -> Result<()> {
        if self.stop.load(Ordering::Acquire) {
            return Err(EndpointError::Closed);
        }
        lock(&self.writer).send(kind, payload)?;
        self.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
        trace!(%kind, len = payload.len(), "frame sent");
        Ok(())
    }

    fn record_terminal_error(&self, err: &FrameError) {
        let mut slot = lock(&self.terminal_error);
        if slot.is_none() {
            *slot = Some(err.to_string());
        }
    }
}

/// Cloneable handle for sending frames on a link from any thread.
///
/// All handles share the endpoint's writer lock, so concurrent frames never
/// interleave on the wire.
#[derive(Clone)]
pub struct LinkSender {
    shared: Arc<Shared>,
}

impl LinkSender {
    pub fn send_frame(&self, kind: FrameKind, payload: &[u8]) -> Result<()> {
        self.shared.send_frame(kind, payload)
    }

    pub fn send_command(&self, command: &Command) -> Result<()> {
        self.send_frame(FrameKind::Command, command.to_payload().as_bytes())
    }

    /// Send `token` followed by `args`, separated by one space.
    pub fn send_command_raw(&self, token: &str, args: &str) -> Result<()> {
        let payload = if args.is_empty() {
            token.to_string()
        } else {
            format!("{token} {args}")
        };
        self.send_frame(FrameKind::Command, payload.as_bytes())
    }

    pub fn send_telemetry(&self, payload: &[u8]) -> Result<()> {
        self.send_frame(FrameKind::Telemetry, payload)
    }

    pub fn send_image(&self, payload: &[u8]) -> Result<()> {
        self.send_frame(FrameKind::Image, payload)
    }
}

impl std::fmt::Debug for LinkSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkSender").finish_non_exhaustive()
    }
}

/// One end of a duplex link.
///
/// A reader thread reassembles inbound frames and routes them by kind.
/// Outbound frames from any thread are serialized through one writer lock.
/// Dropping the endpoint shuts it down.
pub struct LinkEndpoint {
    shared: Arc<Shared>,
    config: EndpointConfig,
    reader: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl LinkEndpoint {
    /// Start an endpoint on a serial port or socket.
    ///
    /// The reader side gets `config.poll_interval` as its read timeout so it
    /// notices shutdown; the writer side gets `config.frame.write_timeout`.
    pub fn open(
        stream: LinkStream,
        config: EndpointConfig,
        sink: Box<dyn ImageSink>,
    ) -> Result<Self> {
        let mut reader = stream.try_clone()?;
        reader.set_read_timeout(Some(config.poll_interval))?;
        let mut writer = stream;
        writer.set_write_timeout(config.frame.write_timeout)?;
        debug!(link = writer.kind(), "opening link endpoint");
        Self::from_parts(reader, writer, config, sink)
    }

    /// Start an endpoint on an arbitrary reader/writer pair.
    ///
    /// A reader without a read timeout keeps its thread blocked until the
    /// peer sends data or closes; shutdown then detaches it.
    pub fn from_parts<R, W>(
        reader: R,
        writer: W,
        config: EndpointConfig,
        sink: Box<dyn ImageSink>,
    ) -> Result<Self>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let frame_reader = FrameReader::with_config(reader, config.frame.clone());
        let boxed: Box<dyn Write + Send> = Box::new(writer);
        let frame_writer = FrameWriter::with_config(boxed, config.frame.clone());

        let shared = Arc::new(Shared {
            writer: Mutex::new(frame_writer),
            telemetry: TelemetrySnapshot::new(),
            last_image: Snapshot::new(),
            sink: Mutex::new(sink),
            route: Mutex::new(None),
            counters: Counters::default(),
            decoder_stats: Mutex::new(DecoderStats::default()),
            stop: AtomicBool::new(false),
            running: AtomicBool::new(true),
            terminal_error: Mutex::new(None),
        });

        let reader_shared = Arc::clone(&shared);
        let reader = thread::Builder::new()
            .name("envlink-reader".to_string())
            .spawn(move || reader_loop(frame_reader, reader_shared))?;

        Ok(Self {
            shared,
            config,
            reader: Some(reader),
            dispatcher: None,
        })
    }

    /// Route inbound commands to `dispatcher` on its own thread.
    ///
    /// Commands queue up to `command_queue_depth`; further commands are
    /// dropped until the dispatcher catches up. Replaces any previous
    /// dispatcher.
    pub fn with_dispatcher(mut self, dispatcher: CommandDispatcher) -> Result<Self> {
        self.stop_dispatcher();

        let (tx, rx) = mpsc::sync_channel(self.config.command_queue_depth);
        let prefixes = dispatcher.prefixes();
        let handle = thread::Builder::new()
            .name("envlink-dispatch".to_string())
            .spawn(move || dispatch_loop(rx, dispatcher))?;

        *lock(&self.shared.route) = Some(CommandRoute { tx, prefixes });
        self.dispatcher = Some(handle);
        Ok(self)
    }

    /// A cloneable sending handle.
    pub fn sender(&self) -> LinkSender {
        LinkSender {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Replace the telemetry snapshot.
    pub fn publish_telemetry(&self, payload: impl Into<Bytes>) {
        self.shared.telemetry.publish(payload.into());
    }

    /// The telemetry slot, for callers that track sequence numbers.
    pub fn telemetry(&self) -> &TelemetrySnapshot {
        &self.shared.telemetry
    }

    /// The latest telemetry payload, if any has arrived.
    pub fn telemetry_snapshot(&self) -> Option<Bytes> {
        self.shared.telemetry.latest()
    }

    /// Numeric value of `key` in the latest telemetry; `0.0` when absent.
    pub fn lookup_telemetry_field(&self, key: &str) -> f32 {
        match self.telemetry_snapshot() {
            Some(payload) => lookup_field(&payload, key),
            None => 0.0,
        }
    }

    /// Hand an image to the sink. Sink errors are logged and counted.
    pub fn on_image_frame(&self, payload: impl Into<Bytes>) {
        self.shared.on_image_frame(payload.into());
    }

    pub fn send_command(&self, command: &Command) -> Result<()> {
        self.sender().send_command(command)
    }

    pub fn send_command_raw(&self, token: &str, args: &str) -> Result<()> {
        self.sender().send_command_raw(token, args)
    }

    pub fn send_telemetry(&self, payload: &[u8]) -> Result<()> {
        self.shared.send_frame(FrameKind::Telemetry, payload)
    }

    pub fn send_image(&self, payload: &[u8]) -> Result<()> {
        self.shared.send_frame(FrameKind::Image, payload)
    }

    pub fn send_frame(&self, kind: FrameKind, payload: &[u8]) -> Result<()> {
        self.shared.send_frame(kind, payload)
    }

    /// Wait for the next telemetry frame.
    pub fn wait_for_telemetry(&self, timeout: Duration) -> Result<Bytes> {
        let seq = self.shared.telemetry.sequence();
        self.ensure_running()?;
        match self.shared.telemetry.wait_newer(seq, timeout) {
            Some((_, payload)) => Ok(payload),
            None => Err(self.timeout_or_closed(timeout)),
        }
    }

    /// Send `CAPTURE` and wait for the image that answers it.
    ///
    /// The image also goes to the sink as usual.
    pub fn capture_image(&self, timeout: Duration) -> Result<Bytes> {
        let seq = self.shared.last_image.sequence();
        self.ensure_running()?;
        self.send_command(&Command::Capture)?;
        match self.shared.last_image.wait_newer(seq, timeout) {
            Some((_, image)) => Ok(image),
            None => Err(self.timeout_or_closed(timeout)),
        }
    }

    pub fn stats(&self) -> LinkStats {
        let counters = &self.shared.counters;
        LinkStats {
            telemetry_frames: counters.telemetry_frames.load(Ordering::Relaxed),
            command_frames: counters.command_frames.load(Ordering::Relaxed),
            image_frames: counters.image_frames.load(Ordering::Relaxed),
            frames_sent: counters.frames_sent.load(Ordering::Relaxed),
            sink_failures: counters.sink_failures.load(Ordering::Relaxed),
            dropped_commands: counters.dropped_commands.load(Ordering::Relaxed),
            decoder: *lock(&self.shared.decoder_stats),
        }
    }

    /// True while the reader thread is receiving.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire) && !self.shared.stop.load(Ordering::Acquire)
    }

    /// The error that stopped the reader, if it stopped on one.
    pub fn terminal_error(&self) -> Option<String> {
        lock(&self.shared.terminal_error).clone()
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// Stop both threads. Idempotent.
    pub fn shutdown(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        self.stop_dispatcher();

        if let Some(reader) = self.reader.take() {
            let grace = self.config.poll_interval * 2 + Duration::from_millis(50);
            let deadline = Instant::now() + grace;
            while !reader.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            if reader.is_finished() {
                if reader.join().is_err() {
                    error!("link reader thread panicked");
                }
            } else {
                debug!("link reader still blocked in read, detaching");
            }
            info!("link endpoint shut down");
        }
    }

    fn stop_dispatcher(&mut self) {
        // Dropping the sender ends the dispatcher once its queue drains.
        lock(&self.shared.route).take();
        if let Some(handle) = self.dispatcher.take() {
            if handle.join().is_err() {
                error!("command dispatcher thread panicked");
            }
        }
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(EndpointError::Closed)
        }
    }

    fn timeout_or_closed(&self, timeout: Duration) -> EndpointError {
        if self.is_running() {
            EndpointError::Timeout(timeout)
        } else {
            EndpointError::Closed
        }
    }
}

impl Drop for LinkEndpoint {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for LinkEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkEndpoint")
            .field("running", &self.is_running())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn reader_loop<R: Read>(mut reader: FrameReader<R>, shared: Arc<Shared>) {
    debug!("link reader started");
    while !shared.stop.load(Ordering::Acquire) {
        let result = reader.read_frame();
        *lock(&shared.decoder_stats) = reader.stats();
        match result {
            Ok(frame) => shared.handle_frame(frame),
            Err(FrameError::Io(err)) if is_timeout(&err) => continue,
            Err(FrameError::ConnectionClosed) => {
                info!("link closed by peer");
                break;
            }
            Err(err) => {
                error!(error = %err, "link reader failed");
                shared.record_terminal_error(&err);
                break;
            }
        }
    }
    shared.running.store(false, Ordering::Release);
    lock(&shared.route).take();
    debug!("link reader stopped");
}

fn dispatch_loop(rx: Receiver<Bytes>, mut dispatcher: CommandDispatcher) {
    while let Ok(payload) = rx.recv() {
        dispatcher.dispatch(&payload);
    }
    debug!("command dispatcher stopped");
}

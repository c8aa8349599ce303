//! Node-side runtime: periodic telemetry, camera commands and the
//! air-quality sensor channel.

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use envlink_frame::{is_timeout, AirQualityReader, AirQualitySample, FrameError};
use tracing::{debug, info, warn};

use crate::dispatch::{CommandDispatcher, DeviceControl, FrameSize};
use crate::endpoint::{LinkEndpoint, LinkSender};
use crate::error::{EndpointError, Result};
use crate::telemetry::TelemetryReadings;

/// A camera that produces one encoded image per capture.
pub trait Camera: Send + Sync {
    fn capture(&self) -> io::Result<Vec<u8>>;
    fn set_frame_size(&self, size: FrameSize) -> io::Result<()>;
}

/// Humidity/temperature sensor. `None` means the read failed.
pub trait ClimateSensor: Send {
    /// `(humidity %, temperature °C)`.
    fn read(&mut self) -> Option<(f32, f32)>;
}

/// Latest air-quality sample, shared between the monitor and the sampler.
#[derive(Debug, Clone, Default)]
pub struct AirQualityState(Arc<Mutex<AirQualitySample>>);

impl AirQualityState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> AirQualitySample {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, sample: AirQualitySample) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = sample;
    }
}

/// Feeds fixed-length sensor frames into an [`AirQualityState`].
///
/// Frames with a bad checksum leave the state unchanged. After
/// `offline_threshold` of them in a row the sensor is reported offline,
/// once, until a good frame arrives.
#[derive(Debug)]
pub struct AirQualityMonitor {
    state: AirQualityState,
    offline_threshold: u32,
    consecutive_failures: u32,
}

impl AirQualityMonitor {
    pub fn new(state: AirQualityState, offline_threshold: u32) -> Self {
        Self {
            state,
            offline_threshold: offline_threshold.max(1),
            consecutive_failures: 0,
        }
    }

    /// Apply one read result. Returns an error only for failures that end
    /// the channel.
    pub fn observe(
        &mut self,
        result: std::result::Result<AirQualitySample, FrameError>,
    ) -> std::result::Result<(), FrameError> {
        match result {
            Ok(sample) => {
                if self.is_offline() {
                    info!("air-quality sensor back online");
                }
                self.consecutive_failures = 0;
                self.state.set(sample);
                Ok(())
            }
            Err(FrameError::ChecksumMismatch { expected, actual }) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                debug!(expected, actual, "air-quality checksum mismatch");
                if self.consecutive_failures == self.offline_threshold {
                    warn!(
                        failures = self.consecutive_failures,
                        "air-quality sensor appears offline"
                    );
                }
                Ok(())
            }
            Err(FrameError::Io(err)) if is_timeout(&err) => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub fn is_offline(&self) -> bool {
        self.consecutive_failures >= self.offline_threshold
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Read until the channel closes or fails.
    pub fn run<R: Read>(
        &mut self,
        mut reader: AirQualityReader<R>,
    ) -> std::result::Result<(), FrameError> {
        loop {
            match self.observe(reader.read_sample()) {
                Ok(()) => {}
                Err(FrameError::ConnectionClosed) => {
                    info!("air-quality channel closed");
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Run on a background thread.
    pub fn spawn<R: Read + Send + 'static>(
        mut self,
        reader: AirQualityReader<R>,
    ) -> io::Result<JoinHandle<std::result::Result<(), FrameError>>> {
        thread::Builder::new()
            .name("envlink-air-quality".to_string())
            .spawn(move || {
                let result = self.run(reader);
                if let Err(err) = &result {
                    warn!(error = %err, "air-quality monitor stopped");
                }
                result
            })
    }
}

struct NodeControl {
    camera: Arc<dyn Camera>,
    sender: LinkSender,
    capturing: Arc<AtomicBool>,
}

impl DeviceControl for NodeControl {
    fn capture(&self) {
        if self.capturing.swap(true, Ordering::AcqRel) {
            debug!("capture already in progress, ignoring CAPTURE");
            return;
        }
        let camera = Arc::clone(&self.camera);
        let sender = self.sender.clone();
        let capturing = Arc::clone(&self.capturing);
        let spawned = thread::Builder::new()
            .name("envlink-capture".to_string())
            .spawn(move || {
                match camera.capture() {
                    Ok(image) => {
                        debug!(bytes = image.len(), "image captured");
                        if let Err(err) = sender.send_image(&image) {
                            warn!(error = %err, "failed to send image");
                        }
                    }
                    Err(err) => warn!(error = %err, "camera capture failed"),
                }
                capturing.store(false, Ordering::Release);
            });
        if let Err(err) = spawned {
            warn!(error = %err, "failed to start capture");
            self.capturing.store(false, Ordering::Release);
        }
    }

    fn set_frame_size(&self, size: FrameSize) {
        match self.camera.set_frame_size(size) {
            Ok(()) => info!(%size, "frame size changed"),
            Err(err) => warn!(%size, error = %err, "failed to change frame size"),
        }
    }
}

/// A running device node: telemetry sampler plus camera command handling.
pub struct DeviceNode {
    endpoint: LinkEndpoint,
    stop: Option<Sender<()>>,
    sampler: Option<JoinHandle<()>>,
}

impl DeviceNode {
    /// Install the device dispatcher on `endpoint` and start sending one
    /// telemetry frame per `interval`.
    pub fn start(
        endpoint: LinkEndpoint,
        camera: Arc<dyn Camera>,
        climate: Box<dyn ClimateSensor>,
        air_quality: AirQualityState,
        interval: Duration,
    ) -> Result<Self> {
        let sender = endpoint.sender();
        let control = Arc::new(NodeControl {
            camera,
            sender: sender.clone(),
            capturing: Arc::new(AtomicBool::new(false)),
        });
        let endpoint = endpoint.with_dispatcher(CommandDispatcher::for_device(control))?;

        let (stop_tx, stop_rx) = mpsc::channel();
        let sampler = thread::Builder::new()
            .name("envlink-sampler".to_string())
            .spawn(move || sample_loop(sender, climate, air_quality, interval, stop_rx))?;
        info!(?interval, "device node started");

        Ok(Self {
            endpoint,
            stop: Some(stop_tx),
            sampler: Some(sampler),
        })
    }

    pub fn endpoint(&self) -> &LinkEndpoint {
        &self.endpoint
    }

    /// Stop sampling and shut the endpoint down. Idempotent.
    pub fn shutdown(&mut self) {
        self.stop.take();
        if let Some(sampler) = self.sampler.take() {
            if sampler.join().is_err() {
                warn!("telemetry sampler panicked");
            }
        }
        self.endpoint.shutdown();
    }
}

impl Drop for DeviceNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn sample_loop(
    sender: LinkSender,
    mut climate: Box<dyn ClimateSensor>,
    air_quality: AirQualityState,
    interval: Duration,
    stop: Receiver<()>,
) {
    let mut climate_reading = (0.0, 0.0);
    loop {
        match climate.read() {
            Some(reading) => climate_reading = reading,
            None => warn!("climate sensor read failed, reporting previous values"),
        }
        let air = air_quality.get();
        let readings = TelemetryReadings {
            humidity: climate_reading.0,
            temperature: climate_reading.1,
            ch2o: air.ch2o,
            tvoc: air.tvoc,
            co2: air.co2,
        };
        match sender.send_telemetry(readings.to_payload().as_bytes()) {
            Ok(()) => {}
            Err(EndpointError::Closed) => break,
            Err(err) => warn!(error = %err, "failed to send telemetry"),
        }

        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("telemetry sampler stopped");
}

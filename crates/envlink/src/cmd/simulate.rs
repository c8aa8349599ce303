use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use envlink_endpoint::{
    AirQualityMonitor, AirQualityState, Camera, ClimateSensor, DeviceNode, DiscardImages,
    EndpointConfig, FrameSize, LinkEndpoint,
};
use envlink_frame::{encode_air_quality, AirQualityReader, AirQualitySample};
use envlink_transport::{LinkAddress, LinkStream, SerialConfig};
use tracing::{info, warn};

use crate::cmd::{install_ctrlc_handler, parse_duration, SimulateArgs};
use crate::config::{FileConfig, LinkSettings};
use crate::exit::{
    endpoint_error, io_error, transport_error, CliError, CliResult, SUCCESS, TRANSPORT_ERROR,
    USAGE,
};

const AIR_QUALITY_BAUD: u32 = 9600;
const OFFLINE_THRESHOLD: u32 = 5;
const IDLE_POLL: Duration = Duration::from_millis(100);

pub fn run(args: SimulateArgs, file: &FileConfig) -> CliResult<i32> {
    let interval = parse_duration(&args.interval)?;
    let settings = LinkSettings::resolve(&args.link, file)?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let air = AirQualityState::new();
    start_air_quality(args.air_quality.as_deref(), air.clone(), interval)?;
    let camera: Arc<dyn Camera> = Arc::new(SimulatedCamera::default());

    if args.listen {
        let LinkAddress::Unix(path) = &settings.address else {
            return Err(CliError::new(USAGE, "--listen needs a unix: port"));
        };
        listen(path, &settings, camera, air, interval, &running)?;
    } else {
        let stream = settings
            .address
            .open(&settings.serial)
            .map_err(|err| transport_error("open failed", err))?;
        serve(stream, &settings, camera, air, interval, &running)?;
    }
    Ok(SUCCESS)
}

#[cfg(unix)]
fn listen(
    path: &std::path::Path,
    settings: &LinkSettings,
    camera: Arc<dyn Camera>,
    air: AirQualityState,
    interval: Duration,
    running: &AtomicBool,
) -> CliResult<()> {
    let listener = envlink_transport::UnixLinkListener::bind(path)
        .map_err(|err| transport_error("bind failed", err))?;
    info!(path = %listener.path().display(), "simulated node listening");

    while running.load(Ordering::SeqCst) {
        let stream = listener
            .accept()
            .map_err(|err| transport_error("accept failed", err))?;
        info!("host connected");
        if let Err(err) = serve(
            stream,
            settings,
            Arc::clone(&camera),
            air.clone(),
            interval,
            running,
        ) {
            warn!(error = %err, "session ended with error");
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn listen(
    _path: &std::path::Path,
    _settings: &LinkSettings,
    _camera: Arc<dyn Camera>,
    _air: AirQualityState,
    _interval: Duration,
    _running: &AtomicBool,
) -> CliResult<()> {
    Err(CliError::new(USAGE, "--listen requires Unix sockets"))
}

/// Run one node session until the link closes or Ctrl-C.
fn serve(
    stream: LinkStream,
    settings: &LinkSettings,
    camera: Arc<dyn Camera>,
    air: AirQualityState,
    interval: Duration,
    running: &AtomicBool,
) -> CliResult<()> {
    let config = EndpointConfig {
        frame: settings.frame.clone(),
        ..EndpointConfig::default()
    };
    let endpoint = LinkEndpoint::open(stream, config, Box::new(DiscardImages))
        .map_err(|err| endpoint_error("open failed", err))?;
    let mut node = DeviceNode::start(
        endpoint,
        camera,
        Box::new(SimulatedClimate::default()),
        air,
        interval,
    )
    .map_err(|err| endpoint_error("node start failed", err))?;

    while running.load(Ordering::SeqCst) && node.endpoint().is_running() {
        thread::sleep(IDLE_POLL);
    }

    let terminal = node.endpoint().terminal_error();
    node.shutdown();
    match terminal {
        Some(err) => Err(CliError::new(TRANSPORT_ERROR, format!("link failed: {err}"))),
        None => {
            info!("host disconnected");
            Ok(())
        }
    }
}

fn start_air_quality(
    port: Option<&str>,
    state: AirQualityState,
    interval: Duration,
) -> CliResult<()> {
    let monitor = AirQualityMonitor::new(state, OFFLINE_THRESHOLD);
    let spawned = match port {
        Some(port) => {
            let address: LinkAddress = port
                .parse()
                .map_err(|err| transport_error("invalid --air-quality", err))?;
            let serial = SerialConfig {
                baud_rate: AIR_QUALITY_BAUD,
                ..SerialConfig::default()
            };
            let mut stream = address
                .open(&serial)
                .map_err(|err| transport_error("air-quality open failed", err))?;
            // Frames carry no start marker; a timeout mid-frame would misalign them.
            stream
                .set_read_timeout(None)
                .map_err(|err| transport_error("air-quality open failed", err))?;
            info!(port = %address, "reading air-quality sensor");
            monitor.spawn(AirQualityReader::new(stream))
        }
        None => monitor.spawn(AirQualityReader::new(SyntheticAirSensor::new(interval))),
    };
    spawned
        .map(drop)
        .map_err(|err| io_error("air-quality monitor start failed", err))
}

/// Produces a JPEG-shaped blob whose size tracks the frame size.
#[derive(Debug)]
struct SimulatedCamera {
    size: Mutex<FrameSize>,
    shots: AtomicU32,
}

impl Default for SimulatedCamera {
    fn default() -> Self {
        Self {
            size: Mutex::new(FrameSize::Qvga),
            shots: AtomicU32::new(0),
        }
    }
}

impl Camera for SimulatedCamera {
    fn capture(&self) -> io::Result<Vec<u8>> {
        let size = *self.size.lock().unwrap_or_else(PoisonError::into_inner);
        let shot = self.shots.fetch_add(1, Ordering::Relaxed);
        Ok(synthetic_jpeg(size, shot))
    }

    fn set_frame_size(&self, size: FrameSize) -> io::Result<()> {
        *self.size.lock().unwrap_or_else(PoisonError::into_inner) = size;
        Ok(())
    }
}

fn synthetic_jpeg(size: FrameSize, shot: u32) -> Vec<u8> {
    let (width, height) = size.dimensions();
    let body = usize::from(width) * usize::from(height) / 64;
    let mut image = Vec::with_capacity(body + 8);
    image.extend_from_slice(&[0xFF, 0xD8]);
    image.extend_from_slice(&shot.to_be_bytes());
    let seed = shot as u8;
    image.extend((0..body).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)));
    image.extend_from_slice(&[0xFF, 0xD9]);
    image
}

/// Slowly drifting humidity and temperature.
#[derive(Debug, Default)]
struct SimulatedClimate {
    tick: u32,
}

impl ClimateSensor for SimulatedClimate {
    fn read(&mut self) -> Option<(f32, f32)> {
        self.tick = self.tick.wrapping_add(1);
        let phase = (self.tick % 40) as f32;
        let wave = if phase < 20.0 { phase } else { 40.0 - phase };
        Some((40.0 + wave * 0.5, 21.0 + wave * 0.1))
    }
}

/// Byte stream that emits one 9-byte sensor frame per interval.
struct SyntheticAirSensor {
    interval: Duration,
    pending: Vec<u8>,
    frame: u32,
}

impl SyntheticAirSensor {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            pending: Vec::new(),
            frame: 0,
        }
    }

    fn next_sample(&mut self) -> AirQualitySample {
        self.frame = self.frame.wrapping_add(1);
        let step = (self.frame % 30) as f32;
        AirQualitySample {
            tvoc: 0.10 + step * 0.01,
            ch2o: 0.02 + step * 0.001,
            co2: 410.0 + step * 5.0,
        }
    }
}

impl Read for SyntheticAirSensor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            thread::sleep(self.interval);
            let sample = self.next_sample();
            self.pending.extend_from_slice(&encode_air_quality(&sample));
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use envlink_frame::parse_air_quality;

    use super::*;

    #[test]
    fn synthetic_images_scale_with_frame_size() {
        let camera = SimulatedCamera::default();
        let small = camera.capture().unwrap();
        camera.set_frame_size(FrameSize::Uxga).unwrap();
        let large = camera.capture().unwrap();

        assert_eq!(&small[..2], &[0xFF, 0xD8]);
        assert_eq!(&large[large.len() - 2..], &[0xFF, 0xD9]);
        assert!(large.len() > small.len());
    }

    #[test]
    fn synthetic_sensor_frames_pass_checksum() {
        let mut sensor = SyntheticAirSensor::new(Duration::from_millis(1));
        let mut frame = [0u8; 9];
        sensor.read_exact(&mut frame).unwrap();
        let sample = parse_air_quality(&frame).unwrap();
        assert!(sample.co2 >= 410.0);
    }

    #[test]
    fn climate_stays_in_range() {
        let mut climate = SimulatedClimate::default();
        for _ in 0..100 {
            let (humidity, temperature) = climate.read().unwrap();
            assert!((40.0..=50.0).contains(&humidity));
            assert!((21.0..=23.0).contains(&temperature));
        }
    }
}

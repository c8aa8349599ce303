//! A host endpoint and a device node talking over an in-process socket pair.
//!
//! Run with:
//!   cargo run --example loopback

#[cfg(unix)]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    use std::io;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use envlink::endpoint::{
        AirQualityState, Camera, ClimateSensor, DeviceNode, DiscardImages, EndpointConfig,
        FrameSize, LinkEndpoint,
    };
    use envlink::frame::AirQualitySample;
    use envlink::transport::UnixLink;

    struct StillCamera(Mutex<FrameSize>);

    impl Camera for StillCamera {
        fn capture(&self) -> io::Result<Vec<u8>> {
            let (w, h) = self.0.lock().map_err(|_| io::Error::other("poisoned"))?.dimensions();
            let mut image = vec![0xFF, 0xD8];
            image.extend(std::iter::repeat(0x7E).take(usize::from(w) * usize::from(h) / 100));
            image.extend_from_slice(&[0xFF, 0xD9]);
            Ok(image)
        }

        fn set_frame_size(&self, size: FrameSize) -> io::Result<()> {
            *self.0.lock().map_err(|_| io::Error::other("poisoned"))? = size;
            Ok(())
        }
    }

    struct Room;

    impl ClimateSensor for Room {
        fn read(&mut self) -> Option<(f32, f32)> {
            Some((47.0, 22.5))
        }
    }

    let (node_link, host_link) = UnixLink::pair()?;

    let air = AirQualityState::new();
    air.set(AirQualitySample {
        tvoc: 0.15,
        ch2o: 0.03,
        co2: 512.0,
    });
    let node_endpoint =
        LinkEndpoint::open(node_link, EndpointConfig::default(), Box::new(DiscardImages))?;
    let _node = DeviceNode::start(
        node_endpoint,
        Arc::new(StillCamera(Mutex::new(FrameSize::Qvga))),
        Box::new(Room),
        air,
        Duration::from_millis(200),
    )?;

    let host = LinkEndpoint::open(host_link, EndpointConfig::default(), Box::new(DiscardImages))?;
    let telemetry = host.wait_for_telemetry(Duration::from_secs(2))?;
    eprintln!("telemetry: {}", String::from_utf8_lossy(&telemetry));
    eprintln!("CO_2 = {}", host.lookup_telemetry_field("CO_2"));

    let image = host.capture_image(Duration::from_secs(2))?;
    eprintln!("captured {} bytes", image.len());

    eprintln!("stats: {:?}", host.stats());
    Ok(())
}

#[cfg(not(unix))]
fn main() {
    eprintln!("this example needs Unix sockets");
}

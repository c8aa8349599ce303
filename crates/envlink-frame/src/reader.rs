use std::collections::VecDeque;
use std::io::{ErrorKind, Read};
use std::time::Instant;

use envlink_transport::LinkStream;

use crate::codec::{Frame, FrameConfig};
use crate::decoder::{DecoderStats, FrameDecoder};
use crate::error::{FrameError, Result};

const READ_CHUNK_SIZE: usize = 4 * 1024;

/// Reads complete frames from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete frames.
/// Bytes that arrive after a completed frame in the same read are kept for
/// the next call.
pub struct FrameReader<T> {
    inner: T,
    decoder: FrameDecoder,
    ready: VecDeque<Frame>,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(&config),
            ready: VecDeque::new(),
            config,
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached. Read
    /// timeouts surface as `FrameError::Io` with `TimedOut`/`WouldBlock`;
    /// the partial frame, if any, is kept and the call can be retried.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Ok(frame);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    if is_timeout(&err) {
                        self.decoder.expire_stale(Instant::now());
                    }
                    return Err(FrameError::Io(err));
                }
            };

            if read == 0 {
                self.decoder.reset();
                return Err(FrameError::ConnectionClosed);
            }

            let now = Instant::now();
            self.decoder.expire_stale(now);
            let ready = &mut self.ready;
            self.decoder
                .decode(&chunk[..read], |frame| ready.push_back(frame));
            self.decoder.mark_activity(now);
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Decoder counters (noise, truncations, overflows, stalls).
    pub fn stats(&self) -> DecoderStats {
        self.decoder.stats()
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<LinkStream> {
    /// Create a frame reader for a link and apply the read timeout from config.
    pub fn with_config_link(mut inner: LinkStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

/// True for the error kinds a read timeout produces on sockets and serial ports.
pub fn is_timeout(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock)
}

pub(crate) fn transport_to_frame_error(err: envlink_transport::TransportError) -> FrameError {
    match err {
        envlink_transport::TransportError::Io(io)
        | envlink_transport::TransportError::Accept(io) => FrameError::Io(io),
        envlink_transport::TransportError::Open { source, .. }
        | envlink_transport::TransportError::Bind { source, .. }
        | envlink_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::time::Duration;

    use bytes::BytesMut;

    use super::*;
    use crate::codec::{encode_frame, FrameKind, END, HEAD};

    fn wire(frames: &[(FrameKind, &[u8])]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for (kind, payload) in frames {
            encode_frame(*kind, payload, &mut buf).unwrap();
        }
        buf.to_vec()
    }

    #[test]
    fn read_single_frame() {
        let data = wire(&[(FrameKind::Telemetry, b"Humi:50.000;")]);
        let mut reader = FrameReader::new(Cursor::new(data));
        let frame = reader.read_frame().unwrap();

        assert_eq!(frame.kind, FrameKind::Telemetry);
        assert_eq!(frame.payload.as_ref(), b"Humi:50.000;");
    }

    #[test]
    fn read_multiple_frames_from_one_chunk() {
        let data = wire(&[
            (FrameKind::Telemetry, b"one"),
            (FrameKind::Image, &[0x01, 0xFE]),
            (FrameKind::Command, b"CAPTURE"),
        ]);
        let mut reader = FrameReader::new(Cursor::new(data));

        let f1 = reader.read_frame().unwrap();
        let f2 = reader.read_frame().unwrap();
        let f3 = reader.read_frame().unwrap();

        assert_eq!((f1.kind, f1.payload.as_ref()), (FrameKind::Telemetry, b"one".as_ref()));
        assert_eq!((f2.kind, f2.payload.as_ref()), (FrameKind::Image, [0x01, 0xFE].as_ref()));
        assert_eq!((f3.kind, f3.payload.as_ref()), (FrameKind::Command, b"CAPTURE".as_ref()));
    }

    #[test]
    fn read_large_image_spanning_many_chunks() {
        let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
        let data = wire(&[(FrameKind::Image, &payload)]);

        let mut reader = FrameReader::new(Cursor::new(data));
        let frame = reader.read_frame().unwrap();

        assert_eq!(frame.kind, FrameKind::Image);
        assert_eq!(frame.payload.as_ref(), payload.as_slice());
    }

    #[test]
    fn byte_by_byte_delivery() {
        let data = wire(&[
            (FrameKind::Telemetry, &[b'T', 0x7E, 0xFF, b'!']),
            (FrameKind::Image, &[0x01, 0x01]),
        ]);
        let mut reader = FrameReader::new(ByteByByteReader { bytes: data, pos: 0 });

        let f1 = reader.read_frame().unwrap();
        let f2 = reader.read_frame().unwrap();
        assert_eq!(f1.payload.as_ref(), &[b'T', 0x7E, 0xFF, b'!']);
        assert_eq!(f2.payload.as_ref(), &[0x01, 0x01]);
    }

    #[test]
    fn noise_then_frame_yields_one_frame() {
        let mut data = vec![0x00, 0x55, 0xAA, 0x01, 0xFF];
        data.extend(wire(&[(FrameKind::Telemetry, b"CO_2:400.000;")]));

        let mut reader = FrameReader::new(Cursor::new(data));
        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.payload.as_ref(), b"CO_2:400.000;");
        assert_eq!(reader.stats().noise_bytes, 5);
        assert!(matches!(reader.read_frame(), Err(FrameError::ConnectionClosed)));
    }

    #[test]
    fn connection_closed_cleanly() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn connection_closed_mid_frame() {
        let mut reader = FrameReader::new(Cursor::new(vec![HEAD, b'p', b'a', b'r']));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn interrupted_read_retries() {
        let data = wire(&[(FrameKind::Telemetry, b"ok")]);
        let reader = ErrorThenData {
            first: Some(ErrorKind::Interrupted),
            bytes: data,
            pos: 0,
        };
        let mut framed = FrameReader::new(reader);
        let frame = framed.read_frame().unwrap();
        assert_eq!(frame.payload.as_ref(), b"ok");
    }

    #[test]
    fn timeout_is_reported_and_retry_keeps_partial_frame() {
        let reader = ErrorThenData {
            first: None,
            bytes: vec![HEAD, b'h', b'i'],
            pos: 0,
        };
        let mut framed = FrameReader::new(reader);

        let err = framed.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::Io(ref e) if is_timeout(e)));

        framed.get_mut().bytes.push(END);
        let frame = framed.read_frame().unwrap();
        assert_eq!(frame.payload.as_ref(), b"hi");
    }

    #[test]
    fn stall_timeout_discards_partial_frame_on_idle_read() {
        let config = FrameConfig {
            stall_timeout: Some(Duration::from_millis(1)),
            ..FrameConfig::default()
        };
        let reader = ErrorThenData {
            first: None,
            bytes: vec![HEAD, b'o', b'l', b'd'],
            pos: 0,
        };
        let mut framed = FrameReader::with_config(reader, config);

        assert!(framed.read_frame().is_err());
        std::thread::sleep(Duration::from_millis(5));
        assert!(framed.read_frame().is_err());
        assert_eq!(framed.stats().stalls, 1);

        framed.get_mut().bytes.extend(wire(&[(FrameKind::Telemetry, b"new")]));
        let frame = framed.read_frame().unwrap();
        assert_eq!(frame.payload.as_ref(), b"new");
    }

    #[test]
    #[cfg(unix)]
    fn roundtrip_over_socket_pair() {
        let (node, host) = envlink_transport::UnixLink::pair().unwrap();
        let mut writer = crate::writer::FrameWriter::new(node);
        let mut reader = FrameReader::new(host);

        writer.send(FrameKind::Telemetry, b"Temp:25.000;").unwrap();
        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.payload.as_ref(), b"Temp:25.000;");
    }

    #[test]
    #[cfg(unix)]
    fn link_reader_applies_read_timeout() {
        let (node, _host) = envlink_transport::UnixLink::pair().unwrap();
        let config = FrameConfig {
            read_timeout: Some(Duration::from_millis(10)),
            ..FrameConfig::default()
        };
        let mut reader = FrameReader::with_config_link(node, config).unwrap();
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::Io(ref e) if is_timeout(e)));
    }

    #[test]
    fn accessors_and_into_inner() {
        let cursor = Cursor::new(Vec::<u8>::new());
        let mut reader = FrameReader::new(cursor);

        let _ = reader.get_ref();
        let _ = reader.get_mut();
        assert_eq!(reader.config().max_payload_size, crate::DEFAULT_MAX_PAYLOAD);
        let _inner = reader.into_inner();
    }

    #[derive(Debug)]
    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    /// Returns `first` once (if set), then the data, then `WouldBlock`.
    struct ErrorThenData {
        first: Option<ErrorKind>,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ErrorThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if let Some(kind) = self.first.take() {
                return Err(std::io::Error::from(kind));
            }
            if self.pos >= self.bytes.len() {
                return Err(std::io::Error::from(ErrorKind::WouldBlock));
            }
            let remaining = self.bytes.len() - self.pos;
            let n = remaining.min(buf.len());
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }
}

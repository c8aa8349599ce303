//! `tokio-util` codec over the same framing, for async hosts.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{encode_frame, Frame, FrameConfig};
use crate::decoder::{DecoderStats, FrameDecoder};
use crate::error::{FrameError, Result};

/// Frame codec for `FramedRead` / `FramedWrite` / `Framed`.
///
/// Decoding consumes every byte it is given: partial frames live in the
/// inner [`FrameDecoder`], not in the read buffer.
#[derive(Debug)]
pub struct LinkCodec {
    decoder: FrameDecoder,
    max_payload: usize,
}

impl LinkCodec {
    pub fn new() -> Self {
        Self::with_config(&FrameConfig::default())
    }

    pub fn with_config(config: &FrameConfig) -> Self {
        Self {
            decoder: FrameDecoder::new(config),
            max_payload: config.max_payload_size,
        }
    }

    pub fn stats(&self) -> DecoderStats {
        self.decoder.stats()
    }
}

impl Default for LinkCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LinkCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        let mut consumed = 0;
        let mut found = None;
        for &byte in src.iter() {
            consumed += 1;
            if let Some(frame) = self.decoder.feed(byte) {
                found = Some(frame);
                break;
            }
        }
        src.advance(consumed);
        Ok(found)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                // A frame cut off by EOF is dropped, like on the blocking path.
                self.decoder.reset();
                Ok(None)
            }
        }
    }
}

impl Encoder<Frame> for LinkCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        if frame.payload.len() > self.max_payload {
            return Err(FrameError::PayloadTooLarge {
                size: frame.payload.len(),
                max: self.max_payload,
            });
        }
        encode_frame(frame.kind, &frame.payload, dst)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio::io::AsyncWriteExt;
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;
    use crate::codec::{FrameKind, HEAD};

    #[test]
    fn decode_stops_after_one_frame_and_keeps_the_rest() {
        let mut codec = LinkCodec::new();
        let mut src = BytesMut::new();
        encode_frame(FrameKind::Telemetry, b"Temp:20.000;", &mut src).unwrap();
        let first_len = src.len();
        encode_frame(FrameKind::Command, b"CAPTURE", &mut src).unwrap();
        let total = src.len();

        let frame = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(frame.payload.as_ref(), b"Temp:20.000;");
        assert_eq!(src.len(), total - first_len);

        let frame = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(frame.kind, FrameKind::Command);
        assert!(src.is_empty());
        assert!(codec.decode(&mut src).unwrap().is_none());
    }

    #[tokio::test]
    async fn framed_round_trip() {
        let (node, host) = tokio::io::duplex(16 * 1024);
        let mut sink = FramedWrite::new(node, LinkCodec::new());
        let mut stream = FramedRead::new(host, LinkCodec::new());

        let image: Vec<u8> = (0u8..=255).collect();
        sink.send(Frame::new(FrameKind::Telemetry, &b"Humi:40.000;"[..]))
            .await
            .unwrap();
        sink.send(Frame::new(FrameKind::Image, image.clone()))
            .await
            .unwrap();
        sink.send(Frame::new(FrameKind::Command, &b"CAPTURE"[..]))
            .await
            .unwrap();
        drop(sink);

        let f1 = stream.next().await.unwrap().unwrap();
        let f2 = stream.next().await.unwrap().unwrap();
        let f3 = stream.next().await.unwrap().unwrap();
        assert_eq!(f1, Frame::new(FrameKind::Telemetry, &b"Humi:40.000;"[..]));
        assert_eq!(f2, Frame::new(FrameKind::Image, image));
        assert_eq!(f3.kind, FrameKind::Command);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn noise_and_truncated_tail_are_dropped() {
        let (mut node, host) = tokio::io::duplex(64);
        let mut stream = FramedRead::new(host, LinkCodec::new());

        let mut wire = BytesMut::new();
        wire.extend_from_slice(&[0x10, 0x20]);
        encode_frame(FrameKind::Telemetry, b"ok", &mut wire).unwrap();
        wire.extend_from_slice(&[HEAD, b'c', b'u', b't']);
        node.write_all(&wire).await.unwrap();
        drop(node);

        let frame = stream.next().await.unwrap().unwrap();
        assert_eq!(frame.payload.as_ref(), b"ok");
        assert!(stream.next().await.is_none());
        assert_eq!(stream.decoder().stats().noise_bytes, 2);
    }

    #[test]
    fn encoder_enforces_payload_limit() {
        let mut codec = LinkCodec::with_config(&FrameConfig {
            max_payload_size: 2,
            ..FrameConfig::default()
        });
        let mut dst = BytesMut::new();
        let err = codec
            .encode(Frame::new(FrameKind::Image, &b"abc"[..]), &mut dst)
            .unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
        assert!(dst.is_empty());
    }
}

use std::time::{Duration, Instant};

use bytes::BytesMut;
use tracing::{debug, trace};

use crate::codec::{classify_text, Frame, FrameConfig, FrameKind, END, ESCAPE, HEAD, IMAGE_END};

const INITIAL_SCRATCH_CAPACITY: usize = 1024;

/// Receiver state. There is no terminal state: the decoder re-arms after
/// every frame and runs for the lifetime of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    /// Discarding bytes until a `HEAD` marker.
    AwaitingHead,
    /// Collecting payload bytes.
    Accumulating,
    /// The previous byte was `ESCAPE`; the next byte is literal.
    Escaped,
    /// Skipping the rest of a dropped frame up to its own terminator.
    Discarding,
    /// Skipping an escaped byte inside a dropped frame.
    DiscardingEscaped,
}

/// Counters kept by a [`FrameDecoder`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Completed frames of any kind.
    pub frames: u64,
    /// Bytes discarded while waiting for a `HEAD` marker.
    pub noise_bytes: u64,
    /// Bytes skipped from the tail of an oversized or stalled frame.
    pub discarded_bytes: u64,
    /// Partial frames abandoned because a new `HEAD` arrived.
    pub truncated: u64,
    /// Partial frames discarded for exceeding the payload limit.
    pub overflows: u64,
    /// Partial frames discarded by the stall timeout.
    pub stalls: u64,
}

/// Byte-at-a-time frame reassembly.
///
/// Holds all mutable reconstruction state for one direction of a link and is
/// driven by exactly one reader, so it needs no locking. Malformed input is
/// never reported as an error: the decoder drops what it has and waits for
/// the next `HEAD`.
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecodeState,
    scratch: BytesMut,
    max_payload: usize,
    stall_timeout: Option<Duration>,
    command_prefixes: Vec<String>,
    last_activity: Option<Instant>,
    stats: DecoderStats,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(&FrameConfig::default())
    }
}

impl FrameDecoder {
    /// Create a decoder using the limits and command prefixes from `config`.
    pub fn new(config: &FrameConfig) -> Self {
        Self {
            state: DecodeState::AwaitingHead,
            scratch: BytesMut::with_capacity(INITIAL_SCRATCH_CAPACITY),
            max_payload: config.max_payload_size,
            stall_timeout: config.stall_timeout,
            command_prefixes: config.command_prefixes.clone(),
            last_activity: None,
            stats: DecoderStats::default(),
        }
    }

    /// Consume one byte, returning a frame when it completes one.
    pub fn feed(&mut self, byte: u8) -> Option<Frame> {
        match self.state {
            DecodeState::AwaitingHead => {
                if byte == HEAD {
                    self.scratch.clear();
                    self.state = DecodeState::Accumulating;
                } else {
                    self.stats.noise_bytes += 1;
                }
                None
            }
            DecodeState::Accumulating => match byte {
                ESCAPE => {
                    self.state = DecodeState::Escaped;
                    None
                }
                END => {
                    let kind = classify_text(&self.scratch, &self.command_prefixes);
                    Some(self.complete(kind))
                }
                IMAGE_END => Some(self.complete(FrameKind::Image)),
                HEAD => {
                    debug!(
                        discarded = self.scratch.len(),
                        "frame restarted before its terminator"
                    );
                    self.stats.truncated += 1;
                    self.scratch.clear();
                    None
                }
                _ => {
                    self.push(byte);
                    None
                }
            },
            DecodeState::Escaped => {
                self.state = DecodeState::Accumulating;
                self.push(byte);
                None
            }
            // An escaped HEAD in the tail must not open a frame, but a bare
            // one still does: the sender may have restarted.
            DecodeState::Discarding => {
                match byte {
                    ESCAPE => self.state = DecodeState::DiscardingEscaped,
                    END | IMAGE_END => self.state = DecodeState::AwaitingHead,
                    HEAD => {
                        self.scratch.clear();
                        self.state = DecodeState::Accumulating;
                        return None;
                    }
                    _ => {}
                }
                self.stats.discarded_bytes += 1;
                None
            }
            DecodeState::DiscardingEscaped => {
                self.state = DecodeState::Discarding;
                self.stats.discarded_bytes += 1;
                None
            }
        }
    }

    /// Consume a run of bytes, calling `on_frame` for each completed frame.
    pub fn decode(&mut self, data: &[u8], mut on_frame: impl FnMut(Frame)) {
        for &byte in data {
            if let Some(frame) = self.feed(byte) {
                on_frame(frame);
            }
        }
    }

    /// Record that bytes arrived at `now`, for the stall timeout.
    pub fn mark_activity(&mut self, now: Instant) {
        self.last_activity = Some(now);
    }

    /// Drop a partial frame that has been idle longer than the stall timeout.
    ///
    /// If the sender later resumes the stalled frame, its tail is skipped up
    /// to the frame's own terminator. Returns true if a partial frame was
    /// discarded.
    pub fn expire_stale(&mut self, now: Instant) -> bool {
        let (Some(timeout), Some(last)) = (self.stall_timeout, self.last_activity) else {
            return false;
        };
        if now.saturating_duration_since(last) < timeout {
            return false;
        }
        match self.state {
            DecodeState::AwaitingHead => false,
            // A dropped tail that went quiet is not coming back.
            DecodeState::Discarding | DecodeState::DiscardingEscaped => {
                self.state = DecodeState::AwaitingHead;
                false
            }
            DecodeState::Accumulating | DecodeState::Escaped => {
                debug!(
                    discarded = self.scratch.len(),
                    ?timeout,
                    "partial frame stalled; skipping to its terminator"
                );
                self.stats.stalls += 1;
                self.discard();
                true
            }
        }
    }

    /// Abandon any partial frame and wait for the next `HEAD`.
    pub fn reset(&mut self) {
        self.scratch.clear();
        self.state = DecodeState::AwaitingHead;
    }

    /// Current receiver state.
    pub fn state(&self) -> DecodeState {
        self.state
    }

    /// Payload bytes held for the frame in progress.
    pub fn buffered(&self) -> usize {
        self.scratch.len()
    }

    /// Counters since creation.
    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Update maximum payload size for subsequent frames.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.max_payload = max_payload_size;
    }

    fn push(&mut self, byte: u8) {
        if self.scratch.len() >= self.max_payload {
            debug!(
                max = self.max_payload,
                "partial frame exceeds payload limit; skipping to its terminator"
            );
            self.stats.overflows += 1;
            self.discard();
            self.stats.discarded_bytes += 1;
            return;
        }
        self.scratch.extend_from_slice(&[byte]);
    }

    fn discard(&mut self) {
        self.scratch.clear();
        self.state = DecodeState::Discarding;
    }

    fn complete(&mut self, kind: FrameKind) -> Frame {
        self.state = DecodeState::AwaitingHead;
        self.stats.frames += 1;
        let payload = self.scratch.split().freeze();
        trace!(%kind, len = payload.len(), "frame complete");
        Frame { kind, payload }
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::codec::{encode_frame, RESERVED};

    fn wire(kind: FrameKind, payload: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_frame(kind, payload, &mut buf).unwrap();
        buf.to_vec()
    }

    fn decode_all(decoder: &mut FrameDecoder, data: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        decoder.decode(data, |frame| frames.push(frame));
        frames
    }

    #[test]
    fn round_trips_every_kind() {
        let cases: [(FrameKind, &[u8]); 4] = [
            (FrameKind::Telemetry, b"Humi:41.000;Temp:22.000;"),
            (FrameKind::Command, b"SETFRAMESIZE VGA"),
            (FrameKind::Image, &[0xFF, 0xD8, 0x01, 0x7E, 0xFE, 0xFF, 0xD9]),
            (FrameKind::Telemetry, b""),
        ];
        for (kind, payload) in cases {
            let mut decoder = FrameDecoder::default();
            let frames = decode_all(&mut decoder, &wire(kind, payload));
            assert_eq!(frames, vec![Frame::new(kind, payload.to_vec())]);
            assert_eq!(decoder.state(), DecodeState::AwaitingHead);
        }
    }

    #[test]
    fn reserved_bytes_survive_in_every_position() {
        for &marker in &RESERVED {
            for position in 0..4 {
                let mut payload = vec![b'a', b'b', b'c'];
                payload.insert(position, marker);

                let mut decoder = FrameDecoder::default();
                let frames = decode_all(&mut decoder, &wire(FrameKind::Image, &payload));
                assert_eq!(frames.len(), 1, "marker {marker:#04x} at {position}");
                assert_eq!(frames[0].payload.as_ref(), payload.as_slice());
            }
        }
    }

    #[test]
    fn escape_transparency_for_all_markers() {
        let payload = [0xFE, 0x7E, 0xFF, 0x01];
        let encoded = wire(FrameKind::Telemetry, &payload);
        assert_eq!(
            encoded,
            vec![0xFE, 0x7E, 0xFE, 0x7E, 0x7E, 0x7E, 0xFF, 0x7E, 0x01, 0xFF]
        );

        let mut decoder = FrameDecoder::default();
        let frames = decode_all(&mut decoder, &encoded);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload.as_ref(), &payload);
        assert_eq!(frames[0].kind, FrameKind::Telemetry);
    }

    #[test]
    fn noise_before_head_is_discarded() {
        let mut data = vec![0x00, 0x13, 0xFF, 0x01, 0x7E, 0x42];
        data.extend(wire(FrameKind::Telemetry, b"Temp:20.000;"));

        let mut decoder = FrameDecoder::default();
        let frames = decode_all(&mut decoder, &data);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload.as_ref(), b"Temp:20.000;");
        assert_eq!(decoder.stats().noise_bytes, 6);
    }

    #[test]
    fn noise_alone_yields_nothing() {
        let noise: Vec<u8> = (0u8..=255).filter(|&b| b != HEAD).cycle().take(2048).collect();

        let mut decoder = FrameDecoder::default();
        assert!(decode_all(&mut decoder, &noise).is_empty());
        assert_eq!(decoder.state(), DecodeState::AwaitingHead);
        assert_eq!(decoder.stats().frames, 0);
    }

    #[test]
    fn byte_at_a_time_matches_bulk_decode() {
        let mut data = wire(FrameKind::Telemetry, b"CH2O:0.120;");
        data.extend(wire(FrameKind::Image, &[0x01, 0x02, 0xFE, 0x7E]));
        data.extend(wire(FrameKind::Command, b"CAPTURE"));

        let mut bulk = FrameDecoder::default();
        let bulk_frames = decode_all(&mut bulk, &data);

        let mut single = FrameDecoder::default();
        let single_frames: Vec<Frame> = data.iter().filter_map(|&b| single.feed(b)).collect();

        assert_eq!(bulk_frames.len(), 3);
        assert_eq!(bulk_frames, single_frames);
    }

    #[test]
    fn trailing_escape_waits_for_more_bytes() {
        let mut decoder = FrameDecoder::default();
        assert!(decode_all(&mut decoder, &[HEAD, b'x', ESCAPE]).is_empty());
        assert_eq!(decoder.state(), DecodeState::Escaped);

        let frames = decode_all(&mut decoder, &[END, END]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload.as_ref(), &[b'x', END]);
    }

    #[test]
    fn new_head_discards_interrupted_frame() {
        let mut data = vec![HEAD, b'l', b'o', b's', b't'];
        data.extend(wire(FrameKind::Telemetry, b"Temp:19.000;"));

        let mut decoder = FrameDecoder::default();
        let frames = decode_all(&mut decoder, &data);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload.as_ref(), b"Temp:19.000;");
        assert_eq!(decoder.stats().truncated, 1);
    }

    #[test]
    fn end_marker_payloads_are_classified() {
        let mut decoder = FrameDecoder::default();
        let mut data = wire(FrameKind::Command, b"CAPTURE");
        data.extend(wire(FrameKind::Telemetry, b"TVOC:0.300;"));

        let kinds: Vec<FrameKind> = decode_all(&mut decoder, &data)
            .into_iter()
            .map(|frame| frame.kind)
            .collect();
        assert_eq!(kinds, vec![FrameKind::Command, FrameKind::Telemetry]);
    }

    #[test]
    fn custom_prefixes_control_classification() {
        let config = FrameConfig {
            command_prefixes: vec!["LED".to_string()],
            ..FrameConfig::default()
        };
        let mut decoder = FrameDecoder::new(&config);

        let mut data = wire(FrameKind::Command, b"LED ON");
        data.extend(wire(FrameKind::Telemetry, b"CAPTURE"));
        let kinds: Vec<FrameKind> = decode_all(&mut decoder, &data)
            .into_iter()
            .map(|frame| frame.kind)
            .collect();
        assert_eq!(kinds, vec![FrameKind::Command, FrameKind::Telemetry]);
    }

    #[test]
    fn oversized_frame_is_dropped_and_decoder_recovers() {
        let config = FrameConfig {
            max_payload_size: 4,
            ..FrameConfig::default()
        };
        let mut decoder = FrameDecoder::new(&config);

        let mut data = wire(FrameKind::Telemetry, b"too long");
        data.extend(wire(FrameKind::Telemetry, b"fits"));
        let frames = decode_all(&mut decoder, &data);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload.as_ref(), b"fits");
        assert_eq!(decoder.stats().overflows, 1);
    }

    #[test]
    fn stalled_partial_frame_expires() {
        let config = FrameConfig {
            stall_timeout: Some(Duration::from_millis(50)),
            ..FrameConfig::default()
        };
        let mut decoder = FrameDecoder::new(&config);
        let start = Instant::now();

        decoder.decode(&[HEAD, b'a', b'b'], |_| panic!("no frame expected"));
        decoder.mark_activity(start);

        assert!(!decoder.expire_stale(start + Duration::from_millis(10)));
        assert_eq!(decoder.buffered(), 2);

        assert!(decoder.expire_stale(start + Duration::from_millis(60)));
        assert_eq!(decoder.state(), DecodeState::Discarding);
        assert_eq!(decoder.stats().stalls, 1);

        // The tail of the stalled frame is skipped.
        assert!(decode_all(&mut decoder, &[b'c', END]).is_empty());
        assert_eq!(decoder.state(), DecodeState::AwaitingHead);
    }

    #[test]
    fn oversized_tail_with_escaped_head_yields_no_frame() {
        let config = FrameConfig {
            max_payload_size: 4,
            ..FrameConfig::default()
        };
        let mut decoder = FrameDecoder::new(&config);

        let frames = decode_all(&mut decoder, &wire(FrameKind::Image, b"abcdef\xFEgh"));
        assert!(frames.is_empty());
        assert_eq!(decoder.state(), DecodeState::AwaitingHead);
        assert_eq!(decoder.stats().overflows, 1);
        assert_eq!(decoder.stats().truncated, 0);

        let frames = decode_all(&mut decoder, &wire(FrameKind::Image, b"ok"));
        assert_eq!(frames, vec![Frame::new(FrameKind::Image, &b"ok"[..])]);
    }

    #[test]
    fn stalled_tail_with_escaped_markers_yields_no_frame() {
        let config = FrameConfig {
            stall_timeout: Some(Duration::from_millis(50)),
            ..FrameConfig::default()
        };
        let mut decoder = FrameDecoder::new(&config);
        let start = Instant::now();

        let encoded = wire(FrameKind::Image, &[b'a', b'b', HEAD, b'c', END, b'd']);
        let (head, tail) = encoded.split_at(3);
        assert!(decode_all(&mut decoder, head).is_empty());
        decoder.mark_activity(start);
        assert!(decoder.expire_stale(start + Duration::from_millis(60)));

        // The sender resumes the old frame, then sends a fresh one.
        let mut data = tail.to_vec();
        data.extend(wire(FrameKind::Telemetry, b"Temp:21.000;"));
        let frames = decode_all(&mut decoder, &data);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload.as_ref(), b"Temp:21.000;");
        assert_eq!(decoder.stats().frames, 1);
    }

    #[test]
    fn bare_head_while_discarding_starts_a_new_frame() {
        let config = FrameConfig {
            max_payload_size: 2,
            ..FrameConfig::default()
        };
        let mut decoder = FrameDecoder::new(&config);

        let mut data = vec![HEAD, b'x', b'y', b'z', b'w'];
        data.extend(wire(FrameKind::Command, b"OK"));
        let frames = decode_all(&mut decoder, &data);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload.as_ref(), b"OK");
        assert_eq!(decoder.stats().discarded_bytes, 2);
    }

    #[test]
    fn quiet_discard_returns_to_awaiting_head() {
        let config = FrameConfig {
            max_payload_size: 1,
            stall_timeout: Some(Duration::from_millis(5)),
            ..FrameConfig::default()
        };
        let mut decoder = FrameDecoder::new(&config);
        let start = Instant::now();

        decoder.decode(&[HEAD, b'a', b'b'], |_| panic!("no frame expected"));
        decoder.mark_activity(start);
        assert_eq!(decoder.state(), DecodeState::Discarding);

        assert!(!decoder.expire_stale(start + Duration::from_millis(10)));
        assert_eq!(decoder.state(), DecodeState::AwaitingHead);
        assert_eq!(decoder.stats().stalls, 0);
    }

    #[test]
    fn idle_decoder_never_expires() {
        let config = FrameConfig {
            stall_timeout: Some(Duration::from_millis(1)),
            ..FrameConfig::default()
        };
        let mut decoder = FrameDecoder::new(&config);
        let start = Instant::now();
        decoder.mark_activity(start);
        assert!(!decoder.expire_stale(start + Duration::from_secs(5)));
        assert_eq!(decoder.stats().stalls, 0);
    }

    #[test]
    fn reset_abandons_partial_frame() {
        let mut decoder = FrameDecoder::default();
        decoder.decode(&[HEAD, b'z'], |_| {});
        decoder.reset();
        assert_eq!(decoder.buffered(), 0);
        assert!(decode_all(&mut decoder, &[END]).is_empty());
    }
}

//! Fixed-length frames from the TVOC/CH2O/CO2 sensor.
//!
//! The sensor streams 9-byte frames at 9600 baud with no start marker:
//!
//! ```text
//! ┌────┬────┬──────────┬──────────┬──────────┬──────────┐
//! │ b0 │ b1 │ TVOC b2b3│ CH2O b4b5│ CO2 b6b7 │ checksum │
//! └────┴────┴──────────┴──────────┴──────────┴──────────┘
//! ```
//!
//! The checksum is the sum of bytes 0..8 modulo 256.

use std::io::{ErrorKind, Read};

use crate::error::{FrameError, Result};

/// Length of one sensor frame.
pub const AIR_QUALITY_FRAME_LEN: usize = 9;

/// One decoded sensor reading.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AirQualitySample {
    /// Total volatile organic compounds, mg/m³.
    pub tvoc: f32,
    /// Formaldehyde, mg/m³.
    pub ch2o: f32,
    /// Carbon dioxide, ppm.
    pub co2: f32,
}

/// Sum of `bytes` modulo 256.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Decode one frame, rejecting it if the checksum does not match.
pub fn parse_air_quality(frame: &[u8; AIR_QUALITY_FRAME_LEN]) -> Result<AirQualitySample> {
    let expected = checksum(&frame[..8]);
    let actual = frame[8];
    if expected != actual {
        return Err(FrameError::ChecksumMismatch { expected, actual });
    }

    let word = |hi: usize| u16::from_be_bytes([frame[hi], frame[hi + 1]]) as f32;
    Ok(AirQualitySample {
        tvoc: word(2) * 0.01,
        ch2o: word(4) * 0.01,
        co2: word(6),
    })
}

/// Encode a sample the way the sensor does. Used by simulators and tests.
pub fn encode_air_quality(sample: &AirQualitySample) -> [u8; AIR_QUALITY_FRAME_LEN] {
    let scaled = |value: f32| (value * 100.0).round().clamp(0.0, u16::MAX as f32) as u16;
    let tvoc = scaled(sample.tvoc).to_be_bytes();
    let ch2o = scaled(sample.ch2o).to_be_bytes();
    let co2 = (sample.co2.round().clamp(0.0, u16::MAX as f32) as u16).to_be_bytes();

    let mut frame = [
        0x2C, 0xE4, tvoc[0], tvoc[1], ch2o[0], ch2o[1], co2[0], co2[1], 0,
    ];
    frame[8] = checksum(&frame[..8]);
    frame
}

/// Reads fixed-length sensor frames from a byte stream.
pub struct AirQualityReader<T> {
    inner: T,
}

impl<T: Read> AirQualityReader<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    /// Read exactly one frame (blocking).
    ///
    /// Returns `FrameError::ChecksumMismatch` for a corrupt frame; the next
    /// call reads the following 9 bytes.
    pub fn read_sample(&mut self) -> Result<AirQualitySample> {
        let mut frame = [0u8; AIR_QUALITY_FRAME_LEN];
        match self.inner.read_exact(&mut frame) {
            Ok(()) => parse_air_quality(&frame),
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => Err(FrameError::ConnectionClosed),
            Err(err) => Err(FrameError::Io(err)),
        }
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

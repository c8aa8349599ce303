//! `Key:Value;` telemetry text.
//!
//! A node reports its sensors as a flat list of `Key:Value;` pairs with
//! three decimals, for example
//! `Humi:45.000;Temp:23.500;CH2O:0.010;TVOC:0.120;CO_2:420.000;`.

use std::fmt::Write as _;

pub const HUMIDITY: &str = "Humi";
pub const TEMPERATURE: &str = "Temp";
pub const CH2O: &str = "CH2O";
pub const TVOC: &str = "TVOC";
pub const CO2: &str = "CO_2";

/// One full set of node readings.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TelemetryReadings {
    /// Relative humidity, %.
    pub humidity: f32,
    /// Temperature, °C.
    pub temperature: f32,
    /// Formaldehyde, mg/m³.
    pub ch2o: f32,
    /// Total volatile organic compounds, mg/m³.
    pub tvoc: f32,
    /// Carbon dioxide, ppm.
    pub co2: f32,
}

impl TelemetryReadings {
    /// Render as a telemetry payload, keys in fixed order.
    pub fn to_payload(&self) -> String {
        let mut out = String::with_capacity(64);
        for (key, value) in [
            (HUMIDITY, self.humidity),
            (TEMPERATURE, self.temperature),
            (CH2O, self.ch2o),
            (TVOC, self.tvoc),
            (CO2, self.co2),
        ] {
            let _ = write!(out, "{key}:{value:.3};");
        }
        out
    }

    /// Build readings from a payload. Missing keys read as `0.0`.
    pub fn from_payload(payload: &[u8]) -> Self {
        Self {
            humidity: lookup_field(payload, HUMIDITY),
            temperature: lookup_field(payload, TEMPERATURE),
            ch2o: lookup_field(payload, CH2O),
            tvoc: lookup_field(payload, TVOC),
            co2: lookup_field(payload, CO2),
        }
    }
}

/// All `(key, value)` pairs in a payload, in order.
///
/// Pairs without a `:` or with a non-numeric value are skipped.
pub fn parse_fields(payload: &[u8]) -> Vec<(String, f32)> {
    String::from_utf8_lossy(payload)
        .split(';')
        .filter_map(|pair| {
            let (key, value) = pair.split_once(':')?;
            let value = value.trim().parse::<f32>().ok()?;
            Some((key.trim().to_string(), value))
        })
        .collect()
}

/// Value of `key`, or `0.0` if it is absent or unparsable.
///
/// Keys match exactly, so `CO_2` never matches a `CO` field.
pub fn lookup_field(payload: &[u8], key: &str) -> f32 {
    parse_fields(payload)
        .into_iter()
        .find(|(k, _)| k == key)
        .map(|(_, value)| value)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_fixed_order_three_decimals() {
        let readings = TelemetryReadings {
            humidity: 45.0,
            temperature: 23.5,
            ch2o: 0.01,
            tvoc: 0.12,
            co2: 420.0,
        };
        assert_eq!(
            readings.to_payload(),
            "Humi:45.000;Temp:23.500;CH2O:0.010;TVOC:0.120;CO_2:420.000;"
        );
    }

    #[test]
    fn lookup_finds_each_key() {
        let payload = b"Humi:45.000;Temp:23.500;CH2O:0.010;TVOC:0.120;CO_2:420.000;";
        assert_eq!(lookup_field(payload, TEMPERATURE), 23.5);
        assert_eq!(lookup_field(payload, CO2), 420.0);
        assert!((lookup_field(payload, CH2O) - 0.01).abs() < 1e-6);
    }

    #[test]
    fn missing_key_reads_as_zero() {
        assert_eq!(lookup_field(b"Temp:23.500;", HUMIDITY), 0.0);
        assert_eq!(lookup_field(b"", TEMPERATURE), 0.0);
    }

    #[test]
    fn exact_key_match_only() {
        assert_eq!(lookup_field(b"CO:3.000;CO_2:500.000;", "CO"), 3.0);
        assert_eq!(lookup_field(b"XTemp:9.000;", TEMPERATURE), 0.0);
    }

    #[test]
    fn tolerates_unknown_and_malformed_pairs() {
        let fields = parse_fields(b"Lux:120.000;junk;Temp:abc;Temp:21.000");
        assert_eq!(
            fields,
            vec![("Lux".to_string(), 120.0), ("Temp".to_string(), 21.0)]
        );
    }

    #[test]
    fn payload_parses_back_into_readings() {
        let readings = TelemetryReadings {
            humidity: 50.25,
            temperature: -3.5,
            ch2o: 0.02,
            tvoc: 0.3,
            co2: 800.0,
        };
        let parsed = TelemetryReadings::from_payload(readings.to_payload().as_bytes());
        assert!((parsed.humidity - 50.25).abs() < 1e-3);
        assert!((parsed.temperature + 3.5).abs() < 1e-3);
        assert_eq!(parsed.co2, 800.0);
    }
}

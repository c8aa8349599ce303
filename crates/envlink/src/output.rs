use std::io::{IsTerminal, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use envlink_endpoint::{parse_fields, LinkStats};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct TelemetryOutput<'a> {
    kind: &'static str,
    port: &'a str,
    fields: serde_json::Map<String, serde_json::Value>,
    payload: String,
    timestamp: String,
}

pub fn print_telemetry(payload: &[u8], port: &str, format: OutputFormat) {
    let fields = parse_fields(payload);
    match format {
        OutputFormat::Json => {
            let out = TelemetryOutput {
                kind: "telemetry",
                port,
                fields: fields
                    .iter()
                    .map(|(key, value)| (key.clone(), serde_json::json!(value)))
                    .collect(),
                payload: String::from_utf8_lossy(payload).into_owned(),
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(fields.iter().map(|(key, _)| key.as_str()))
                .add_row(fields.iter().map(|(_, value)| format!("{value:.3}")));
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let line: Vec<String> = fields
                .iter()
                .map(|(key, value)| format!("{key}={value:.3}"))
                .collect();
            println!("{}", line.join(" "));
        }
        OutputFormat::Raw => {
            print_raw(payload);
            println!();
        }
    }
}

#[derive(Serialize)]
struct FieldOutput<'a> {
    kind: &'static str,
    key: &'a str,
    value: f32,
    present: bool,
}

pub fn print_field(key: &str, value: f32, present: bool, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&FieldOutput {
            kind: "field",
            key,
            value,
            present,
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_header(vec!["KEY", "VALUE"])
                .add_row(vec![key.to_string(), format!("{value:.3}")]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("{key}={value:.3}"),
        OutputFormat::Raw => println!("{value:.3}"),
    }
}

#[derive(Serialize)]
struct CaptureOutput {
    kind: &'static str,
    path: String,
    size: usize,
    timestamp: String,
}

pub fn print_capture(path: &Path, size: usize, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&CaptureOutput {
            kind: "capture",
            path: path.display().to_string(),
            size,
            timestamp: now_unix_seconds(),
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_header(vec!["PATH", "SIZE"])
                .add_row(vec![path.display().to_string(), size.to_string()]);
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            println!("{} ({size} bytes)", path.display())
        }
    }
}

#[derive(Serialize)]
struct StatsOutput {
    kind: &'static str,
    telemetry_frames: u64,
    command_frames: u64,
    image_frames: u64,
    frames_sent: u64,
    sink_failures: u64,
    dropped_commands: u64,
    noise_bytes: u64,
    truncated: u64,
    overflows: u64,
    stalls: u64,
}

pub fn print_stats(stats: &LinkStats, format: OutputFormat) {
    let out = StatsOutput {
        kind: "stats",
        telemetry_frames: stats.telemetry_frames,
        command_frames: stats.command_frames,
        image_frames: stats.image_frames,
        frames_sent: stats.frames_sent,
        sink_failures: stats.sink_failures,
        dropped_commands: stats.dropped_commands,
        noise_bytes: stats.decoder.noise_bytes,
        truncated: stats.decoder.truncated,
        overflows: stats.decoder.overflows,
        stalls: stats.decoder.stalls,
    };
    match format {
        OutputFormat::Json => print_json(&out),
        _ => {
            let mut table = Table::new();
            table.load_preset(UTF8_FULL).set_header(vec!["COUNTER", "VALUE"]);
            for (name, value) in [
                ("telemetry frames", out.telemetry_frames),
                ("command frames", out.command_frames),
                ("image frames", out.image_frames),
                ("frames sent", out.frames_sent),
                ("sink failures", out.sink_failures),
                ("dropped commands", out.dropped_commands),
                ("noise bytes", out.noise_bytes),
                ("truncated frames", out.truncated),
                ("oversized frames", out.overflows),
                ("stalled frames", out.stalls),
            ] {
                table.add_row(vec![name.to_string(), value.to_string()]);
            }
            println!("{table}");
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

//! Frames through the tokio codec over an in-memory duplex pipe.
//!
//! Run with:
//!   cargo run --example async-loopback --features async

use envlink::frame::{Frame, FrameKind, LinkCodec};
use futures_util::{SinkExt, StreamExt};
use tokio_util::codec::{FramedRead, FramedWrite};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (node, host) = tokio::io::duplex(64 * 1024);
    let mut tx = FramedWrite::new(node, LinkCodec::new());
    let mut rx = FramedRead::new(host, LinkCodec::new());

    tx.send(Frame::new(
        FrameKind::Telemetry,
        &b"Humi:45.000;Temp:23.500;CH2O:0.010;TVOC:0.120;CO_2:420.000;"[..],
    ))
    .await?;
    tx.send(Frame::new(FrameKind::Image, vec![0xFF, 0xD8, 0x01, 0xFE, 0xFF, 0xD9]))
        .await?;
    drop(tx);

    while let Some(frame) = rx.next().await {
        let frame = frame?;
        eprintln!("{} frame, {} bytes", frame.kind, frame.payload.len());
    }
    eprintln!("decoder: {:?}", rx.decoder().stats());
    Ok(())
}

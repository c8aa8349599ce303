use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::cmd::{image_sink, install_ctrlc_handler, open_endpoint, MonitorArgs};
use crate::config::{FileConfig, LinkSettings};
use crate::exit::{CliError, CliResult, SUCCESS, TRANSPORT_ERROR};
use crate::output::{print_stats, print_telemetry, OutputFormat};

const POLL: Duration = Duration::from_millis(250);

pub fn run(args: MonitorArgs, file: &FileConfig, format: OutputFormat) -> CliResult<i32> {
    let settings = LinkSettings::resolve(&args.link, file)?;
    let sink = image_sink(args.images.clone(), args.numbered, file);
    let endpoint = open_endpoint(&settings, sink)?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let port = settings.address.to_string();
    let mut seen = endpoint.telemetry().sequence();
    let mut printed = 0usize;

    let result = loop {
        if !running.load(Ordering::SeqCst) {
            break Ok(SUCCESS);
        }
        match endpoint.telemetry().wait_newer(seen, POLL) {
            Some((seq, payload)) => {
                seen = seq;
                print_telemetry(&payload, &port, format);
                printed = printed.saturating_add(1);
                if args.count.is_some_and(|count| printed >= count) {
                    break Ok(SUCCESS);
                }
            }
            None if endpoint.is_running() => continue,
            None => match endpoint.terminal_error() {
                Some(err) => {
                    break Err(CliError::new(TRANSPORT_ERROR, format!("link failed: {err}")))
                }
                None => {
                    info!(port = %port, "link closed by node");
                    break Ok(SUCCESS);
                }
            },
        }
    };

    if args.stats {
        print_stats(&endpoint.stats(), format);
    }
    result
}

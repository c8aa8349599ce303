use envlink_endpoint::{parse_fields, DiscardImages};

use crate::cmd::{open_endpoint, parse_duration, FieldArgs};
use crate::config::{FileConfig, LinkSettings};
use crate::exit::{endpoint_error, CliResult, FAILURE, SUCCESS};
use crate::output::{print_field, OutputFormat};

/// Prints the field from the next telemetry frame. A missing key prints
/// `0.000` and exits with `FAILURE`.
pub fn run(args: FieldArgs, file: &FileConfig, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let settings = LinkSettings::resolve(&args.link, file)?;
    let endpoint = open_endpoint(&settings, Box::new(DiscardImages))?;

    endpoint
        .wait_for_telemetry(timeout)
        .map_err(|err| endpoint_error("no telemetry", err))?;

    let value = endpoint.lookup_telemetry_field(&args.key);
    let present = endpoint
        .telemetry_snapshot()
        .is_some_and(|payload| parse_fields(&payload).iter().any(|(k, _)| *k == args.key));
    print_field(&args.key, value, present, format);

    Ok(if present { SUCCESS } else { FAILURE })
}

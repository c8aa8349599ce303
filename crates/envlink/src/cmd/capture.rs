use std::path::PathBuf;

use envlink_endpoint::DiscardImages;
use tracing::info;

use crate::cmd::{open_endpoint, parse_duration, CaptureArgs};
use crate::config::{FileConfig, LinkSettings};
use crate::exit::{endpoint_error, io_error, CliResult, SUCCESS};
use crate::output::{print_capture, OutputFormat};

const DEFAULT_OUTPUT: &str = "capture.jpeg";

pub fn run(args: CaptureArgs, file: &FileConfig, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let output = args
        .output
        .clone()
        .or_else(|| file.storage.image_path.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT));

    let settings = LinkSettings::resolve(&args.link, file)?;
    let endpoint = open_endpoint(&settings, Box::new(DiscardImages))?;

    let image = endpoint
        .capture_image(timeout)
        .map_err(|err| endpoint_error("capture failed", err))?;
    std::fs::write(&output, &image)
        .map_err(|err| io_error(&format!("failed writing {}", output.display()), err))?;
    info!(path = %output.display(), bytes = image.len(), "image saved");

    print_capture(&output, image.len(), format);
    Ok(SUCCESS)
}

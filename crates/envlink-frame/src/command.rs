//! Built-in command tokens.
//!
//! Commands share the `END` terminator with telemetry, so the receiver tells
//! them apart by their leading token. The counterpart firmware is fixed, so
//! this dual use of `END` is kept as-is.

/// Start an image capture; the node answers with one image frame.
pub const CAPTURE: &str = "CAPTURE";

/// Change the camera resolution: `SETFRAMESIZE <name>`.
pub const SET_FRAME_SIZE: &str = "SETFRAMESIZE";

/// Prefixes that mark an `END`-terminated payload as a command.
pub const DEFAULT_COMMAND_PREFIXES: &[&str] = &[CAPTURE, SET_FRAME_SIZE];

/// Returns true if `payload` starts with any of `prefixes`.
pub fn has_command_prefix<S: AsRef<str>>(payload: &[u8], prefixes: &[S]) -> bool {
    prefixes
        .iter()
        .any(|prefix| payload.starts_with(prefix.as_ref().as_bytes()))
}

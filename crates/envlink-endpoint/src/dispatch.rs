//! Inbound control commands.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use envlink_frame::{CAPTURE, SET_FRAME_SIZE};
use tracing::{debug, warn};

use crate::error::{EndpointError, Result};

/// Camera resolutions a node understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameSize {
    R96x96,
    Qqvga,
    Qcif,
    Hqvga,
    R240x240,
    Qvga,
    Cif,
    Hvga,
    Vga,
    Svga,
    Xga,
    Hd,
    Sxga,
    Uxga,
}

impl FrameSize {
    pub const ALL: [FrameSize; 14] = [
        FrameSize::R96x96,
        FrameSize::Qqvga,
        FrameSize::Qcif,
        FrameSize::Hqvga,
        FrameSize::R240x240,
        FrameSize::Qvga,
        FrameSize::Cif,
        FrameSize::Hvga,
        FrameSize::Vga,
        FrameSize::Svga,
        FrameSize::Xga,
        FrameSize::Hd,
        FrameSize::Sxga,
        FrameSize::Uxga,
    ];

    /// Wire name, as carried after `SETFRAMESIZE`.
    pub fn name(self) -> &'static str {
        match self {
            FrameSize::R96x96 => "96X96",
            FrameSize::Qqvga => "QQVGA",
            FrameSize::Qcif => "QCIF",
            FrameSize::Hqvga => "HQVGA",
            FrameSize::R240x240 => "240X240",
            FrameSize::Qvga => "QVGA",
            FrameSize::Cif => "CIF",
            FrameSize::Hvga => "HVGA",
            FrameSize::Vga => "VGA",
            FrameSize::Svga => "SVGA",
            FrameSize::Xga => "XGA",
            FrameSize::Hd => "HD",
            FrameSize::Sxga => "SXGA",
            FrameSize::Uxga => "UXGA",
        }
    }

    /// Width and height in pixels.
    pub fn dimensions(self) -> (u16, u16) {
        match self {
            FrameSize::R96x96 => (96, 96),
            FrameSize::Qqvga => (160, 120),
            FrameSize::Qcif => (176, 144),
            FrameSize::Hqvga => (240, 176),
            FrameSize::R240x240 => (240, 240),
            FrameSize::Qvga => (320, 240),
            FrameSize::Cif => (400, 296),
            FrameSize::Hvga => (480, 320),
            FrameSize::Vga => (640, 480),
            FrameSize::Svga => (800, 600),
            FrameSize::Xga => (1024, 768),
            FrameSize::Hd => (1280, 720),
            FrameSize::Sxga => (1280, 1024),
            FrameSize::Uxga => (1600, 1200),
        }
    }
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FrameSize {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        FrameSize::ALL
            .into_iter()
            .find(|size| size.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| EndpointError::InvalidCommand(format!("unknown frame size: {s:?}")))
    }
}

/// A built-in control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Capture,
    SetFrameSize(FrameSize),
}

impl Command {
    /// Parse a command payload such as `CAPTURE` or `SETFRAMESIZE VGA`.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| EndpointError::InvalidCommand("payload is not utf-8".to_string()))?
            .trim();
        let (token, args) = match text.split_once(char::is_whitespace) {
            Some((token, args)) => (token, args.trim()),
            None => (text, ""),
        };
        match token {
            CAPTURE if args.is_empty() => Ok(Command::Capture),
            SET_FRAME_SIZE => Ok(Command::SetFrameSize(args.parse()?)),
            _ => Err(EndpointError::InvalidCommand(text.to_string())),
        }
    }

    pub fn to_payload(&self) -> String {
        match self {
            Command::Capture => CAPTURE.to_string(),
            Command::SetFrameSize(size) => format!("{SET_FRAME_SIZE} {size}"),
        }
    }
}

/// Device operations that inbound commands drive.
pub trait DeviceControl: Send + Sync {
    /// Start a capture. Must return without waiting for the image.
    fn capture(&self);
    fn set_frame_size(&self, size: FrameSize);
}

type Handler = Box<dyn FnMut(&str) + Send>;

/// Routes command payloads to handlers by leading token.
///
/// Handlers are checked in registration order; the first whose prefix
/// starts the payload gets the rest of it, leading whitespace trimmed.
#[derive(Default)]
pub struct CommandDispatcher {
    handlers: Vec<(String, Handler)>,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher wired to the built-in commands of a device.
    pub fn for_device(control: Arc<dyn DeviceControl>) -> Self {
        let capture = Arc::clone(&control);
        let mut dispatcher = Self::new();
        dispatcher.register(CAPTURE, move |_| capture.capture());
        dispatcher.register(SET_FRAME_SIZE, move |args| match args.parse::<FrameSize>() {
            Ok(size) => control.set_frame_size(size),
            Err(err) => warn!(error = %err, "dropping SETFRAMESIZE"),
        });
        dispatcher
    }

    /// Add a handler for payloads starting with `prefix`.
    pub fn register<F>(&mut self, prefix: impl Into<String>, handler: F) -> &mut Self
    where
        F: FnMut(&str) + Send + 'static,
    {
        self.handlers.push((prefix.into(), Box::new(handler)));
        self
    }

    /// Run the first matching handler. Returns false if none matched.
    pub fn dispatch(&mut self, payload: &[u8]) -> bool {
        let text = String::from_utf8_lossy(payload);
        for (prefix, handler) in &mut self.handlers {
            if let Some(rest) = text.strip_prefix(prefix.as_str()) {
                debug!(command = %prefix, "dispatching command");
                handler(rest.trim_start());
                return true;
            }
        }
        debug!(payload = %text, "no handler for command");
        false
    }

    /// Registered prefixes, in order. Feed these to
    /// `FrameConfig::command_prefixes` so the decoder classifies them.
    pub fn prefixes(&self) -> Vec<String> {
        self.handlers.iter().map(|(prefix, _)| prefix.clone()).collect()
    }
}

impl fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("prefixes", &self.prefixes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn frame_size_names_round_trip() {
        for size in FrameSize::ALL {
            assert_eq!(size.name().parse::<FrameSize>().unwrap(), size);
        }
        assert_eq!("vga".parse::<FrameSize>().unwrap(), FrameSize::Vga);
        assert!("8K".parse::<FrameSize>().is_err());
    }

    #[test]
    fn parses_builtin_commands() {
        assert_eq!(Command::parse(b"CAPTURE").unwrap(), Command::Capture);
        assert_eq!(
            Command::parse(b"SETFRAMESIZE  SVGA").unwrap(),
            Command::SetFrameSize(FrameSize::Svga)
        );
        assert!(Command::parse(b"SETFRAMESIZE BOGUS").is_err());
        assert!(Command::parse(b"REBOOT").is_err());
        assert!(Command::parse(&[0xC3, 0x28]).is_err());
    }

    #[test]
    fn command_payloads() {
        assert_eq!(Command::Capture.to_payload(), "CAPTURE");
        assert_eq!(
            Command::SetFrameSize(FrameSize::R240x240).to_payload(),
            "SETFRAMESIZE 240X240"
        );
    }

    #[test]
    fn first_matching_handler_gets_remainder() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = CommandDispatcher::new();
        for prefix in ["LED", "LEDX"] {
            let seen = Arc::clone(&seen);
            dispatcher.register(prefix, move |rest| {
                seen.lock().unwrap().push(format!("{prefix}|{rest}"));
            });
        }

        assert!(dispatcher.dispatch(b"LED   on"));
        assert!(dispatcher.dispatch(b"LEDX off"));
        assert_eq!(*seen.lock().unwrap(), vec!["LED|on", "LED|X off"]);
        assert_eq!(dispatcher.prefixes(), vec!["LED", "LEDX"]);
    }

    #[test]
    fn unknown_command_is_dropped() {
        let mut dispatcher = CommandDispatcher::new();
        dispatcher.register("CAPTURE", |_| panic!("must not run"));
        assert!(!dispatcher.dispatch(b"REBOOT"));
    }

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl DeviceControl for Recorder {
        fn capture(&self) {
            self.calls.lock().unwrap().push("capture".into());
        }

        fn set_frame_size(&self, size: FrameSize) {
            self.calls.lock().unwrap().push(format!("size {size}"));
        }
    }

    #[test]
    fn device_dispatcher_drives_control() {
        let recorder = Arc::new(Recorder::default());
        let mut dispatcher = CommandDispatcher::for_device(recorder.clone());

        assert!(dispatcher.dispatch(b"CAPTURE"));
        assert!(dispatcher.dispatch(b"SETFRAMESIZE QVGA"));
        // Matched but dropped: unknown size name.
        assert!(dispatcher.dispatch(b"SETFRAMESIZE HUGE"));

        assert_eq!(
            *recorder.calls.lock().unwrap(),
            vec!["capture".to_string(), "size QVGA".to_string()]
        );
        assert_eq!(dispatcher.prefixes(), vec![CAPTURE, SET_FRAME_SIZE]);
    }
}

use envlink_endpoint::{Command, DiscardImages};
use tracing::debug;

use crate::cmd::{open_endpoint, SendArgs};
use crate::config::{FileConfig, LinkSettings};
use crate::exit::{endpoint_error, CliError, CliResult, SUCCESS, USAGE};

pub fn run(args: SendArgs, file: &FileConfig) -> CliResult<i32> {
    let payload = resolve_command(&args)?;
    let settings = LinkSettings::resolve(&args.link, file)?;
    let endpoint = open_endpoint(&settings, Box::new(DiscardImages))?;

    match &payload {
        Outgoing::Builtin(command) => endpoint.send_command(command),
        Outgoing::Raw { token, args } => endpoint.send_command_raw(token, args),
    }
    .map_err(|err| endpoint_error("send failed", err))?;
    debug!(command = %payload.describe(), "command sent");

    Ok(SUCCESS)
}

#[derive(Debug, PartialEq)]
enum Outgoing {
    Builtin(Command),
    Raw { token: String, args: String },
}

impl Outgoing {
    fn describe(&self) -> String {
        match self {
            Outgoing::Builtin(command) => command.to_payload(),
            Outgoing::Raw { token, args } if args.is_empty() => token.clone(),
            Outgoing::Raw { token, args } => format!("{token} {args}"),
        }
    }
}

fn resolve_command(args: &SendArgs) -> CliResult<Outgoing> {
    let Some((token, rest)) = args.command.split_first() else {
        return Err(CliError::new(USAGE, "no command given"));
    };
    if args.raw {
        return Ok(Outgoing::Raw {
            token: token.clone(),
            args: rest.join(" "),
        });
    }
    Command::parse(args.command.join(" ").as_bytes())
        .map(Outgoing::Builtin)
        .map_err(|err| endpoint_error("invalid command", err))
}

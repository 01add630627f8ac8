use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use wirechan_encoding::{EncoderFactory, EncoderKind, ProtocolVersion};
use wirechan_transport::Via;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod request;
pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Listen on a via and echo requests back as replies.
    Serve(ServeArgs),
    /// Send a request and print the correlated reply.
    Request(RequestArgs),
    /// Send a one-way message.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Request(args) => request::run(args, format),
        Command::Send(args) => send::run(args),
        Command::Version(args) => version::run(args),
    }
}

/// Wire encoding selection shared by all subcommands.
#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum Encoding {
    Binary,
    BinarySession,
    Text,
    Mtom,
}

impl Encoding {
    pub fn factory(self) -> EncoderFactory {
        let version = ProtocolVersion::default();
        match self {
            Encoding::Binary => EncoderFactory::new(EncoderKind::Binary, version),
            Encoding::BinarySession => {
                EncoderFactory::new(EncoderKind::Binary, version).for_session()
            }
            Encoding::Text => EncoderFactory::new(EncoderKind::Text, version),
            Encoding::Mtom => EncoderFactory::new(EncoderKind::Mtom, version),
        }
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Via to listen on, e.g. tcp://127.0.0.1:9000 or pipe:///tmp/svc.sock.
    pub via: String,
    /// Wire encoding to accept.
    #[arg(long, value_enum, default_value = "binary")]
    pub encoding: Encoding,
    /// Exit after answering N requests.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct RequestArgs {
    /// Via to connect to.
    pub via: String,
    /// Action header of the request.
    #[arg(long, default_value = "urn:wirechan:echo")]
    pub action: String,
    /// Raw string body.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// JSON body (validated before sending).
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Read the body from a file.
    #[arg(long, conflicts_with_all = ["data", "json"])]
    pub file: Option<PathBuf>,
    /// Wire encoding to use.
    #[arg(long, value_enum, default_value = "binary")]
    pub encoding: Encoding,
    /// Budget for each of open, send and reply wait (e.g. 5s, 500ms).
    #[arg(long, default_value = "30s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Via to connect to.
    pub via: String,
    /// Action header of the message.
    #[arg(long, default_value = "urn:wirechan:notify")]
    pub action: String,
    /// Raw string body.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read the body from a file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Wire encoding to use.
    #[arg(long, value_enum, default_value = "binary")]
    pub encoding: Encoding,
    /// Budget for open and send (e.g. 5s, 500ms).
    #[arg(long, default_value = "30s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_via(input: &str) -> CliResult<Via> {
    Via::parse(input).map_err(|err| CliError::new(USAGE, err.to_string()))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

/// Resolve the body bytes from whichever payload flag was given.
pub fn resolve_body(
    data: Option<String>,
    json: Option<String>,
    file: Option<PathBuf>,
) -> CliResult<Vec<u8>> {
    if let Some(data) = data {
        return Ok(data.into_bytes());
    }
    if let Some(json) = json {
        serde_json::from_str::<serde_json::Value>(&json)
            .map_err(|err| CliError::new(USAGE, format!("invalid JSON body: {err}")))?;
        return Ok(json.into_bytes());
    }
    if let Some(file) = file {
        return std::fs::read(&file)
            .map_err(|err| crate::exit::io_error(&format!("reading {}", file.display()), err));
    }
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
    }

    #[test]
    fn resolve_body_validates_json() {
        assert!(resolve_body(None, Some("{not json".into()), None).is_err());
        assert_eq!(
            resolve_body(None, Some("{\"x\":1}".into()), None).unwrap(),
            b"{\"x\":1}"
        );
    }
}

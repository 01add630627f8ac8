use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use serde::Serialize;
use wirechan_encoding::Message;

use crate::exit::{channel_error, CliResult};

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    action: &'a str,
    message_id: &'a str,
    relates_to: Option<&'a str>,
    to: Option<&'a str>,
    body_size: usize,
    body: String,
}

/// Print a decoded message. `Raw` writes the body bytes verbatim to
/// stdout; the other formats show headers plus a body preview.
pub fn print_message(message: &mut Message, max_body: usize, format: OutputFormat) -> CliResult<()> {
    let body = message
        .body_bytes(max_body)
        .map_err(|err| channel_error("materializing body", err.into()))?;
    let headers = message.headers();

    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                action: &headers.action,
                message_id: &headers.message_id,
                relates_to: headers.relates_to.as_deref(),
                to: headers.to.as_deref(),
                body_size: body.len(),
                body: body_preview(&body),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Pretty => {
            println!(
                "action={} id={} relates_to={} size={} body={}",
                headers.action,
                headers.message_id,
                headers.relates_to.as_deref().unwrap_or("-"),
                body.len(),
                body_preview(&body)
            );
        }
        OutputFormat::Raw => {
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(&body);
            let _ = stdout.flush();
        }
    }
    Ok(())
}

const PREVIEW_LIMIT: usize = 512;

fn body_preview(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.len() <= PREVIEW_LIMIT {
        text.into_owned()
    } else {
        let mut cut = PREVIEW_LIMIT;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}… ({} bytes total)", &text[..cut], body.len())
    }
}

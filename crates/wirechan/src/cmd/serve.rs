use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};
use wirechan_channel::{Binding, ChannelListener, ReplyChannel};
use wirechan_encoding::Message;

use crate::cmd::{parse_via, ServeArgs};
use crate::exit::{channel_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::OutputFormat;

// Accept waits run in short slices so Ctrl-C is observed promptly.
const ACCEPT_WAIT: Duration = Duration::from_millis(500);

pub fn run(args: ServeArgs, _format: OutputFormat) -> CliResult<i32> {
    let via = parse_via(&args.via)?;
    let binding = Binding::new(args.encoding.factory());
    let max_body = binding.quotas.max_message_size;

    let listener = ChannelListener::bind(binding, &via)
        .map_err(|err| channel_error("bind failed", err))?;
    info!(via = %listener.local_via(), "serving echo");

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut answered = 0usize;

    while running.load(Ordering::SeqCst) {
        let channel = match listener.accept_channel(Some(ACCEPT_WAIT)) {
            Ok(Some(channel)) => channel,
            Ok(None) => continue,
            Err(err) => return Err(channel_error("accept failed", err)),
        };
        debug!(peer = %channel.peer_via(), "session started");

        match serve_session(channel, max_body, args.count.map(|c| c - answered)) {
            Ok(served) => {
                answered = answered.saturating_add(served);
                if let Some(count) = args.count {
                    if answered >= count {
                        return Ok(SUCCESS);
                    }
                }
            }
            Err(err) => {
                // One broken session does not stop the server.
                debug!(error = %err, "session ended with error");
            }
        }
    }

    Ok(SUCCESS)
}

/// Answer requests on one session until the peer ends it. Returns the
/// number of replies sent.
fn serve_session(
    mut channel: ReplyChannel,
    max_body: usize,
    remaining: Option<usize>,
) -> CliResult<usize> {
    let mut served = 0usize;
    loop {
        let Some(mut context) = channel
            .receive_request(None)
            .map_err(|err| channel_error("receive failed", err))?
        else {
            return Ok(served);
        };

        let action = context.request().headers().action.clone();
        let body = context
            .request_mut()
            .body_bytes(max_body)
            .map_err(|err| channel_error("reading request body", err.into()))?;

        let reply = Message::reply_to(context.request(), format!("{action}Response"))
            .with_body(body);
        context
            .reply(reply)
            .map_err(|err| channel_error("reply failed", err))?;
        served += 1;

        if matches!(remaining, Some(limit) if served >= limit) {
            let _ = channel.close();
            return Ok(served);
        }
    }
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

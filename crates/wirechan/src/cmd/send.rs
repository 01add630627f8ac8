use tracing::debug;
use wirechan_channel::{Binding, ChannelFactory, ChannelShape, DefaultTimeouts};
use wirechan_encoding::{Message, ProtocolVersion};

use crate::cmd::{parse_duration, parse_via, resolve_body, SendArgs};
use crate::exit::{channel_error, CliResult, SUCCESS};

pub fn run(args: SendArgs) -> CliResult<i32> {
    let via = parse_via(&args.via)?;
    let budget = parse_duration(&args.timeout)?;
    let body = resolve_body(args.data, None, args.file)?;

    let binding = Binding::new(args.encoding.factory()).with_timeouts(DefaultTimeouts {
        open: budget,
        send: budget,
        receive: budget,
        close: budget,
    });
    let factory = ChannelFactory::new(binding);

    let mut channel = factory
        .create_channel(ChannelShape::Output, &via)
        .map_err(|err| channel_error("channel setup failed", err))?;
    channel
        .open()
        .map_err(|err| channel_error("open failed", err))?;

    let mut message = Message::new(ProtocolVersion::default(), args.action);
    if !body.is_empty() {
        message = message.with_body(body);
    }
    debug!(message_id = %message.headers().message_id, "sending one-way message");

    channel
        .send(message)
        .map_err(|err| channel_error("send failed", err))?;
    channel
        .close()
        .map_err(|err| channel_error("close failed", err))?;

    Ok(SUCCESS)
}

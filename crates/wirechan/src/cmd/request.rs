use tracing::debug;
use wirechan_channel::{Binding, ChannelFactory, ChannelShape, DefaultTimeouts};
use wirechan_encoding::{Message, ProtocolVersion};

use crate::cmd::{parse_duration, parse_via, resolve_body, RequestArgs};
use crate::exit::{channel_error, CliResult, SUCCESS};
use crate::output::{print_message, OutputFormat};

pub fn run(args: RequestArgs, format: OutputFormat) -> CliResult<i32> {
    let via = parse_via(&args.via)?;
    let budget = parse_duration(&args.timeout)?;
    let body = resolve_body(args.data, args.json, args.file)?;

    let binding = Binding::new(args.encoding.factory()).with_timeouts(DefaultTimeouts {
        open: budget,
        send: budget,
        receive: budget,
        close: budget,
    });
    let max_body = binding.quotas.max_message_size;
    let factory = ChannelFactory::new(binding);

    let mut channel = factory
        .create_channel(ChannelShape::RequestReply, &via)
        .map_err(|err| channel_error("channel setup failed", err))?;
    channel
        .open()
        .map_err(|err| channel_error("open failed", err))?;

    let mut message = Message::new(ProtocolVersion::default(), args.action);
    if !body.is_empty() {
        message = message.with_body(body);
    }
    debug!(message_id = %message.headers().message_id, "sending request");

    let mut reply = channel
        .request(message)
        .map_err(|err| channel_error("request failed", err))?;
    channel
        .close()
        .map_err(|err| channel_error("close failed", err))?;

    print_message(&mut reply, max_body, format)?;
    Ok(SUCCESS)
}

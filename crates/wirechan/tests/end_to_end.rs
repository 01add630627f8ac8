//! Full-stack exchanges over real transports: listener and factory on
//! both ends of a live connection.

use std::thread;
use std::time::Duration;

use wirechan::channel::{
    Binding, ChannelError, ChannelFactory, ChannelListener, ChannelShape, CommunicationState,
};
use wirechan::encoding::{EncoderFactory, EncoderKind, Message, ProtocolVersion};
use wirechan::transport::Via;

const ACCEPT_WAIT: Option<Duration> = Some(Duration::from_secs(5));

/// Serve echo sessions until `sessions` of them end cleanly.
fn spawn_echo_server(
    listener: ChannelListener,
    sessions: usize,
) -> thread::JoinHandle<Result<(), ChannelError>> {
    thread::spawn(move || {
        let mut completed = 0;
        while completed < sessions {
            let Some(mut channel) = listener.accept_channel(ACCEPT_WAIT)? else {
                continue;
            };
            while let Some(mut context) = channel.receive_request(ACCEPT_WAIT)? {
                let action = context.request().headers().action.clone();
                let body = context.request_mut().body_bytes(1 << 20)?;
                let reply = Message::reply_to(context.request(), format!("{action}Response"))
                    .with_body(body);
                context.reply(reply)?;
            }
            completed += 1;
        }
        Ok(())
    })
}

#[test]
fn tcp_request_reply_round_trip() {
    let listener = ChannelListener::bind(Binding::default(), &Via::tcp("127.0.0.1", 0)).unwrap();
    let via = listener.local_via().clone();
    let server = spawn_echo_server(listener, 1);

    let factory = ChannelFactory::new(Binding::default());
    let mut channel = factory
        .create_channel(ChannelShape::RequestReply, &via)
        .unwrap();
    channel.open().unwrap();
    assert_eq!(channel.state(), CommunicationState::Opened);

    let request = Message::new(ProtocolVersion::default(), "urn:ops/Ping").with_body(&b"ping"[..]);
    let request_id = request.headers().message_id.clone();

    let mut reply = channel.request(request).unwrap();
    assert_eq!(reply.headers().action, "urn:ops/PingResponse");
    assert_eq!(reply.headers().relates_to.as_deref(), Some(&request_id[..]));
    assert_eq!(reply.body_bytes(1 << 20).unwrap().as_ref(), b"ping");

    channel.close().unwrap();
    assert_eq!(channel.state(), CommunicationState::Closed);

    // The clean close parked the connection for reuse.
    assert_eq!(factory.pool().idle_count(&via.to_string()), 1);

    server.join().unwrap().unwrap();
}

#[cfg(unix)]
#[test]
fn pipe_request_reply_round_trip() {
    let path = format!(
        "/tmp/wirechan-e2e-{}-{}.sock",
        std::process::id(),
        line!()
    );
    let listener = ChannelListener::bind(Binding::default(), &Via::pipe(&path)).unwrap();
    let via = listener.local_via().clone();
    let server = spawn_echo_server(listener, 1);

    let factory = ChannelFactory::new(Binding::default());
    let mut channel = factory
        .create_channel(ChannelShape::RequestReply, &via)
        .unwrap();
    channel.open().unwrap();

    let request =
        Message::new(ProtocolVersion::default(), "urn:ops/Echo").with_body(&b"over a pipe"[..]);
    let mut reply = channel.request(request).unwrap();
    assert_eq!(reply.body_bytes(1 << 20).unwrap().as_ref(), b"over a pipe");

    channel.close().unwrap();
    server.join().unwrap().unwrap();
}

#[test]
fn text_encoding_end_to_end() {
    let binding = Binding::new(EncoderFactory::new(
        EncoderKind::Text,
        ProtocolVersion::default(),
    ));
    let listener = ChannelListener::bind(binding.clone(), &Via::tcp("127.0.0.1", 0)).unwrap();
    let via = listener.local_via().clone();
    let server = spawn_echo_server(listener, 1);

    let factory = ChannelFactory::new(binding);
    let mut channel = factory
        .create_channel(ChannelShape::RequestReply, &via)
        .unwrap();
    channel.open().unwrap();

    let request = Message::new(ProtocolVersion::default(), "urn:ops/Hello")
        .with_body(&b"<Hello/>"[..]);
    let mut reply = channel.request(request).unwrap();
    assert_eq!(reply.headers().action, "urn:ops/HelloResponse");
    assert_eq!(reply.body_bytes(1 << 20).unwrap().as_ref(), b"<Hello/>");

    channel.close().unwrap();
    server.join().unwrap().unwrap();
}

#[test]
fn sequential_exchanges_reuse_the_session() {
    let listener = ChannelListener::bind(Binding::default(), &Via::tcp("127.0.0.1", 0)).unwrap();
    let via = listener.local_via().clone();
    let server = spawn_echo_server(listener, 1);

    let factory = ChannelFactory::new(Binding::default());
    let mut channel = factory
        .create_channel(ChannelShape::RequestReply, &via)
        .unwrap();
    channel.open().unwrap();

    for i in 0..3 {
        let body = format!("round {i}");
        let request = Message::new(ProtocolVersion::default(), "urn:ops/Echo")
            .with_body(body.clone().into_bytes());
        let mut reply = if i == 0 {
            channel
                .request_timeout(request, Duration::from_secs(5))
                .unwrap()
        } else {
            channel.request(request).unwrap()
        };
        assert_eq!(reply.body_bytes(1 << 20).unwrap().as_ref(), body.as_bytes());
    }

    channel.close().unwrap();
    server.join().unwrap().unwrap();
}

#[test]
fn pooled_connection_survives_channel_turnover() {
    let listener = ChannelListener::bind(Binding::default(), &Via::tcp("127.0.0.1", 0)).unwrap();
    let via = listener.local_via().clone();
    let server = spawn_echo_server(listener, 2);

    let factory = ChannelFactory::new(Binding::default());
    for i in 0..2 {
        let mut channel = factory
            .create_channel(ChannelShape::RequestReply, &via)
            .unwrap();
        channel.open().unwrap();
        let request = Message::new(ProtocolVersion::default(), "urn:ops/Ping")
            .with_body(format!("turn {i}").into_bytes());
        channel.request(request).unwrap();
        channel.close().unwrap();
        assert_eq!(factory.pool().idle_count(&via.to_string()), 1);
    }

    server.join().unwrap().unwrap();
}

#[test]
fn one_way_send_is_delivered() {
    let listener = ChannelListener::bind(Binding::default(), &Via::tcp("127.0.0.1", 0)).unwrap();
    let via = listener.local_via().clone();

    let server = thread::spawn(move || -> Result<Vec<u8>, ChannelError> {
        let mut channel = loop {
            if let Some(channel) = listener.accept_channel(ACCEPT_WAIT)? {
                break channel;
            }
        };
        let mut context = channel
            .receive_request(ACCEPT_WAIT)?
            .expect("expected one message");
        let body = context.request_mut().body_bytes(1 << 20)?.to_vec();
        context.abort();
        Ok(body)
    });

    let factory = ChannelFactory::new(Binding::default());
    let mut channel = factory.create_channel(ChannelShape::Output, &via).unwrap();
    channel.open().unwrap();
    let message =
        Message::new(ProtocolVersion::default(), "urn:ops/Notify").with_body(&b"fire and forget"[..]);
    channel.send(message).unwrap();
    channel.close().unwrap();

    assert_eq!(server.join().unwrap().unwrap(), b"fire and forget");
}

#[test]
fn request_on_output_channel_is_unsupported() {
    let listener = ChannelListener::bind(Binding::default(), &Via::tcp("127.0.0.1", 0)).unwrap();
    let via = listener.local_via().clone();

    let accepting = thread::spawn(move || {
        let _ = listener.accept_channel(ACCEPT_WAIT);
    });

    let factory = ChannelFactory::new(Binding::default());
    let mut channel = factory.create_channel(ChannelShape::Output, &via).unwrap();
    channel.open().unwrap();

    let request = Message::new(ProtocolVersion::default(), "urn:ops/Ping");
    assert!(matches!(
        channel.request(request),
        Err(ChannelError::Unsupported(_))
    ));

    channel.abort();
    accepting.join().unwrap();
}

#[test]
fn second_reply_attempt_is_rejected() {
    let listener = ChannelListener::bind(Binding::default(), &Via::tcp("127.0.0.1", 0)).unwrap();
    let via = listener.local_via().clone();

    let server = thread::spawn(move || -> Result<(), ChannelError> {
        let mut channel = loop {
            if let Some(channel) = listener.accept_channel(ACCEPT_WAIT)? {
                break channel;
            }
        };
        let mut context = channel
            .receive_request(ACCEPT_WAIT)?
            .expect("expected a request");

        let first = Message::reply_to(context.request(), "urn:ops/PingResponse");
        context.reply(first)?;

        // The single reply is spent; this one must not reach the wire.
        let second = Message::reply_to(context.request(), "urn:ops/PingResponse");
        assert!(matches!(
            context.reply(second),
            Err(ChannelError::InvalidOperation(_))
        ));

        // Drain the session end.
        assert!(channel.receive_request(ACCEPT_WAIT)?.is_none());
        Ok(())
    });

    let factory = ChannelFactory::new(Binding::default());
    let mut channel = factory
        .create_channel(ChannelShape::RequestReply, &via)
        .unwrap();
    channel.open().unwrap();
    let reply = channel
        .request(Message::new(ProtocolVersion::default(), "urn:ops/Ping"))
        .unwrap();
    assert_eq!(reply.headers().action, "urn:ops/PingResponse");
    channel.close().unwrap();

    server.join().unwrap().unwrap();
}

#[test]
fn mismatched_content_type_faults_the_open() {
    // Listener speaks text only; the client insists on binary.
    let listener = ChannelListener::bind(
        Binding::new(EncoderFactory::new(
            EncoderKind::Text,
            ProtocolVersion::default(),
        )),
        &Via::tcp("127.0.0.1", 0),
    )
    .unwrap();
    let via = listener.local_via().clone();

    let rejecting = thread::spawn(move || {
        // The preamble is rejected, so no channel surfaces.
        let outcome = listener.accept_channel(Some(Duration::from_secs(2)));
        assert!(matches!(outcome, Ok(None)));
    });

    let factory = ChannelFactory::new(Binding::default());
    let mut channel = factory
        .create_channel(ChannelShape::RequestReply, &via)
        .unwrap();
    let err = channel.open().unwrap_err();
    assert!(matches!(err, ChannelError::Faulted(_)));
    assert_eq!(channel.state(), CommunicationState::Faulted);

    rejecting.join().unwrap();
}

#[test]
fn silent_peer_times_out_the_open_and_faults() {
    use wirechan::channel::DefaultTimeouts;
    use wirechan::transport::TcpTransportListener;

    // A bound socket that never answers the preamble.
    let silent = TcpTransportListener::bind(&Via::tcp("127.0.0.1", 0)).unwrap();
    let via = silent.local_via().clone();

    let binding = Binding::default().with_timeouts(DefaultTimeouts {
        open: Duration::from_millis(200),
        ..DefaultTimeouts::default()
    });
    let factory = ChannelFactory::new(binding);
    let mut channel = factory
        .create_channel(ChannelShape::RequestReply, &via)
        .unwrap();

    let err = channel.open().unwrap_err();
    assert!(matches!(err, ChannelError::Timeout(_)));
    assert_eq!(channel.state(), CommunicationState::Faulted);

    // Close stays legal on a faulted channel and reaches Closed.
    channel.close().unwrap();
    assert_eq!(channel.state(), CommunicationState::Closed);
}

#[test]
fn explicit_open_budget_overrides_the_binding() {
    use std::time::Instant;
    use wirechan::transport::TcpTransportListener;

    // A bound socket that never answers the preamble; the binding keeps
    // its generous default open budget.
    let silent = TcpTransportListener::bind(&Via::tcp("127.0.0.1", 0)).unwrap();
    let via = silent.local_via().clone();

    let factory = ChannelFactory::new(Binding::default());
    let mut channel = factory
        .create_channel(ChannelShape::RequestReply, &via)
        .unwrap();

    let started = Instant::now();
    let err = channel.open_timeout(Duration::from_millis(200)).unwrap_err();
    assert!(matches!(err, ChannelError::Timeout(_)));
    assert!(
        started.elapsed() < Duration::from_secs(10),
        "the per-call budget must cut the wait short"
    );
    assert_eq!(channel.state(), CommunicationState::Faulted);
}

#[test]
fn explicit_close_budget_parks_the_connection() {
    let listener = ChannelListener::bind(Binding::default(), &Via::tcp("127.0.0.1", 0)).unwrap();
    let via = listener.local_via().clone();
    let server = spawn_echo_server(listener, 1);

    let factory = ChannelFactory::new(Binding::default());
    let mut channel = factory
        .create_channel(ChannelShape::RequestReply, &via)
        .unwrap();
    channel.open().unwrap();
    let request = Message::new(ProtocolVersion::default(), "urn:ops/Ping").with_body(&b"x"[..]);
    channel.request(request).unwrap();

    channel.close_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(channel.state(), CommunicationState::Closed);
    assert_eq!(factory.pool().idle_count(&via.to_string()), 1);

    server.join().unwrap().unwrap();
}

#[test]
fn request_before_open_is_invalid() {
    let factory = ChannelFactory::new(Binding::default());
    let mut channel = factory
        .create_channel(ChannelShape::RequestReply, &Via::tcp("127.0.0.1", 1))
        .unwrap();
    assert!(matches!(
        channel.request(Message::new(ProtocolVersion::default(), "urn:ops/Ping")),
        Err(ChannelError::InvalidOperation(_))
    ));
}

#[test]
fn channel_async_handles_round_trip() {
    let listener = ChannelListener::bind(Binding::default(), &Via::tcp("127.0.0.1", 0)).unwrap();
    let via = listener.local_via().clone();
    let server = spawn_echo_server(listener, 1);

    let factory = ChannelFactory::new(Binding::default());
    let channel = factory
        .create_channel(ChannelShape::RequestReply, &via)
        .unwrap();
    let channel = channel.open_async().wait().unwrap();

    let request = Message::new(ProtocolVersion::default(), "urn:ops/Ping").with_body(&b"bg"[..]);
    let (channel, mut reply) = channel.request_async(request).wait().unwrap();
    assert_eq!(reply.body_bytes(1 << 20).unwrap().as_ref(), b"bg");

    channel.close_async().wait().unwrap();
    server.join().unwrap().unwrap();
}

#[test]
fn async_exchange_through_the_factory() {
    let listener = ChannelListener::bind(Binding::default(), &Via::tcp("127.0.0.1", 0)).unwrap();
    let via = listener.local_via().clone();
    let server = spawn_echo_server(listener, 1);

    let factory = ChannelFactory::new(Binding::default());
    let message =
        Message::new(ProtocolVersion::default(), "urn:ops/Ping").with_body(&b"async"[..]);
    let handle = factory.request_async(&via, message);
    let mut reply = handle.wait().unwrap();
    assert_eq!(reply.headers().action, "urn:ops/PingResponse");
    assert_eq!(reply.body_bytes(1 << 20).unwrap().as_ref(), b"async");

    server.join().unwrap().unwrap();
}

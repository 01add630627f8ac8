use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info};
use wirechan_encoding::{select_encoder, EncoderKind, MessageEncoder};
use wirechan_framing::{FramedConnection, PreambleOffer, PreambleValidator};
use wirechan_transport::{NetStream, Scheme, TransportListener, Via};

use crate::config::Binding;
use crate::error::{ChannelError, Result};
use crate::lifecycle::{CommunicationState, Lifecycle};
use crate::reply::{ReadyQueue, ReplyChannel};

// How long a parked connection gets to produce its next preamble when
// an accept pass picks it up.
const REUSE_GRACE: Duration = Duration::from_millis(100);

// Transport accepts run in slices so parked connections are observed
// between them.
const ACCEPT_SLICE: Duration = Duration::from_millis(200);

/// Accepts connections on a via and turns validated preambles into
/// reply channels.
///
/// Connections handed back by cleanly closed reply channels are polled
/// for a fresh preamble ahead of the transport listener, so a client
/// reusing a pooled connection is served without a new dial.
pub struct ChannelListener {
    binding: Binding,
    listener: TransportListener,
    lifecycle: Lifecycle,
    candidates: Vec<Arc<dyn MessageEncoder>>,
    ready: Arc<ReadyQueue>,
}

impl ChannelListener {
    /// Bind on `via` and start listening.
    pub fn bind(binding: Binding, via: &Via) -> Result<Self> {
        let listener = TransportListener::bind(via)?;
        let candidates = encoder_candidates(&binding);
        let mut lifecycle = Lifecycle::new("channel listener");
        lifecycle.begin_open()?;
        lifecycle.complete_open();
        info!(via = %listener.local_via(), "channel listener open");
        Ok(Self {
            binding,
            listener,
            lifecycle,
            candidates,
            ready: Arc::new(Mutex::new(VecDeque::new())),
        })
    }

    pub fn state(&self) -> CommunicationState {
        self.lifecycle.state()
    }

    /// The via actually bound, with the assigned port for TCP port-0
    /// binds.
    pub fn local_via(&self) -> &Via {
        self.listener.local_via()
    }

    /// Connections parked for preamble reuse.
    pub fn parked_count(&self) -> usize {
        self.ready.lock().expect("ready queue poisoned").len()
    }

    /// Accept the next channel, waiting at most `timeout`.
    ///
    /// `Ok(None)` on expiry. Connections whose preamble fails
    /// validation are dropped and the wait continues; only transport
    /// failures surface as errors.
    pub fn accept_channel(&self, timeout: Option<Duration>) -> Result<Option<ReplyChannel>> {
        self.lifecycle.ensure_opened("accept")?;
        let deadline = timeout.map(|t| Instant::now() + t);
        let validator = EndpointValidator {
            candidates: &self.candidates,
            local_via: self.listener.local_via(),
        };

        loop {
            if let Some(channel) = self.drain_parked(&validator)? {
                return Ok(Some(channel));
            }

            let slice = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(None);
                    }
                    remaining.min(ACCEPT_SLICE)
                }
                None => ACCEPT_SLICE,
            };

            let Some(stream) = self.listener.accept_timeout(Some(slice))? else {
                continue;
            };
            if let Some(channel) = self.handshake(stream, &validator)? {
                return Ok(Some(channel));
            }
        }
    }

    /// Try each parked connection for an in-flight preamble.
    fn drain_parked(&self, validator: &EndpointValidator<'_>) -> Result<Option<ReplyChannel>> {
        loop {
            let parked = self
                .ready
                .lock()
                .expect("ready queue poisoned")
                .pop_front();
            let Some(mut conn) = parked else {
                return Ok(None);
            };
            conn.set_read_timeout(Some(REUSE_GRACE))?;
            match conn.accept(validator) {
                Ok(offer) => {
                    debug!(via = %offer.via, "parked connection reused");
                    return Ok(Some(self.channel_from(conn, offer)?));
                }
                Err(err) => {
                    // The reusing client handles this by dialing fresh.
                    debug!(error = %err, "parked connection dropped");
                }
            }
        }
    }

    fn handshake(
        &self,
        stream: NetStream,
        validator: &EndpointValidator<'_>,
    ) -> Result<Option<ReplyChannel>> {
        let mut conn = FramedConnection::new(
            stream,
            Some(self.binding.timeouts.open),
            Some(self.binding.timeouts.send),
        )?;
        match conn.accept(validator) {
            Ok(offer) => Ok(Some(self.channel_from(conn, offer)?)),
            Err(err) => {
                debug!(error = %err, "inbound preamble rejected");
                Ok(None)
            }
        }
    }

    fn channel_from(
        &self,
        mut conn: FramedConnection,
        offer: PreambleOffer,
    ) -> Result<ReplyChannel> {
        let encoder = select_encoder(&self.candidates, &offer.content_type)
            .cloned()
            .ok_or_else(|| {
                ChannelError::Protocol(format!(
                    "validated content type {:?} has no encoder",
                    offer.content_type
                ))
            })?;
        conn.set_read_timeout(Some(self.binding.timeouts.receive))?;
        Ok(ReplyChannel::new(
            self.binding.clone(),
            encoder,
            conn,
            self.ready.clone(),
            offer.via,
        ))
    }

    /// Stop listening. Parked connections are dropped.
    pub fn close(&mut self) -> Result<()> {
        if !self.lifecycle.begin_close()? {
            return Ok(());
        }
        self.ready.lock().expect("ready queue poisoned").clear();
        self.lifecycle.complete_close();
        Ok(())
    }
}

impl std::fmt::Debug for ChannelListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelListener")
            .field("via", self.listener.local_via())
            .field("state", &self.lifecycle.state())
            .finish_non_exhaustive()
    }
}

/// Preamble policy for one listener: the via must name this endpoint
/// and the content type must map to a configured encoder.
struct EndpointValidator<'a> {
    candidates: &'a [Arc<dyn MessageEncoder>],
    local_via: &'a Via,
}

impl PreambleValidator for EndpointValidator<'_> {
    fn supports_content_type(&self, content_type: &str) -> bool {
        select_encoder(self.candidates, content_type).is_some()
    }

    fn services_via(&self, via: &str) -> bool {
        let Ok(declared) = via.parse::<Via>() else {
            return false;
        };
        if declared.scheme() != self.local_via.scheme() {
            return false;
        }
        match declared.scheme() {
            // Hostnames vary between dialer and listener; the port is
            // the identity that matters locally.
            Scheme::Tcp => {
                let declared_port = declared.authority().rsplit(':').next();
                let local_port = self.local_via.authority().rsplit(':').next();
                declared_port.is_some() && declared_port == local_port
            }
            Scheme::Pipe => declared.authority() == self.local_via.authority(),
        }
    }
}

/// The encoders a listener accepts: the bound encoder plus, for the
/// binary encoding, its session/non-session sibling.
fn encoder_candidates(binding: &Binding) -> Vec<Arc<dyn MessageEncoder>> {
    let mut candidates = vec![binding.encoder.create()];
    if binding.encoder.kind() == EncoderKind::Binary {
        let sibling = if binding.encoder.is_session() {
            wirechan_encoding::EncoderFactory::new(
                EncoderKind::Binary,
                candidates[0].protocol_version(),
            )
        } else {
            wirechan_encoding::EncoderFactory::new(
                EncoderKind::Binary,
                candidates[0].protocol_version(),
            )
            .for_session()
        };
        candidates.push(sibling.create());
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use wirechan_encoding::EncoderFactory;

    #[test]
    fn validator_matches_tcp_by_port() {
        let local = Via::tcp("127.0.0.1", 9000);
        let binding = Binding::default();
        let candidates = encoder_candidates(&binding);
        let validator = EndpointValidator {
            candidates: &candidates,
            local_via: &local,
        };
        assert!(validator.services_via("tcp://localhost:9000"));
        assert!(validator.services_via("tcp://127.0.0.1:9000"));
        assert!(!validator.services_via("tcp://127.0.0.1:9001"));
        assert!(!validator.services_via("pipe:///tmp/x.sock"));
        assert!(!validator.services_via("not a via"));
    }

    #[test]
    fn validator_matches_pipe_by_path() {
        let local = Via::pipe("/tmp/svc.sock");
        let binding = Binding::default();
        let candidates = encoder_candidates(&binding);
        let validator = EndpointValidator {
            candidates: &candidates,
            local_via: &local,
        };
        assert!(validator.services_via("pipe:///tmp/svc.sock"));
        assert!(!validator.services_via("pipe:///tmp/other.sock"));
    }

    #[test]
    fn binary_binding_accepts_both_session_variants() {
        let binding = Binding::default();
        let candidates = encoder_candidates(&binding);
        let validator = EndpointValidator {
            candidates: &candidates,
            local_via: &Via::tcp("127.0.0.1", 1),
        };
        assert!(validator.supports_content_type("application/vnd.wirechan.msgbin"));
        assert!(validator.supports_content_type("application/vnd.wirechan.msgbin+session"));
        assert!(!validator.supports_content_type("application/soap+xml; charset=utf-8"));
    }

    #[test]
    fn text_binding_rejects_binary_content_types() {
        let binding = Binding::new(EncoderFactory::new(
            EncoderKind::Text,
            wirechan_encoding::ProtocolVersion::default(),
        ));
        let candidates = encoder_candidates(&binding);
        let validator = EndpointValidator {
            candidates: &candidates,
            local_via: &Via::tcp("127.0.0.1", 1),
        };
        assert!(validator.supports_content_type("application/soap+xml; charset=utf-8"));
        assert!(!validator.supports_content_type("application/vnd.wirechan.msgbin"));
    }
}

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;
use wirechan_encoding::{Message, MessageEncoder};
use wirechan_framing::{FramedConnection, PreambleSettings};
use wirechan_transport::{EndpointAddress, Via};

use crate::config::{Binding, ChannelShape};
use crate::error::{ChannelError, Result};
use crate::handle::OperationHandle;
use crate::lifecycle::{CommunicationState, Lifecycle};
use crate::pool::{ConnectionPool, PooledConnection};

/// Client-side channel for one-way sends and correlated request/reply
/// exchanges.
///
/// Connections come from the factory's outbound pool: open reuses an
/// idle pooled connection when one survives a fresh preamble, and close
/// hands the connection back after a clean session end. A failure in
/// any exchange faults the channel and discards the connection.
pub struct RequestChannel {
    binding: Binding,
    via: Via,
    via_key: String,
    to: EndpointAddress,
    shape: ChannelShape,
    encoder: Arc<dyn MessageEncoder>,
    pool: Arc<ConnectionPool>,
    lifecycle: Lifecycle,
    conn: Option<PooledConnection>,
    slot_held: bool,
}

impl RequestChannel {
    pub(crate) fn new(
        binding: Binding,
        via: Via,
        pool: Arc<ConnectionPool>,
        shape: ChannelShape,
    ) -> Self {
        let encoder = binding.encoder.create();
        let to = EndpointAddress::from_via(&via);
        let via_key = via.to_string();
        Self {
            binding,
            via,
            via_key,
            to,
            shape,
            encoder,
            pool,
            lifecycle: Lifecycle::new("request channel"),
            conn: None,
            slot_held: false,
        }
    }

    pub fn state(&self) -> CommunicationState {
        self.lifecycle.state()
    }

    pub fn via(&self) -> &Via {
        &self.via
    }

    pub fn remote_address(&self) -> &EndpointAddress {
        &self.to
    }

    /// Establish the connection and run the preamble, all within the
    /// binding's open budget. Failure faults the channel.
    pub fn open(&mut self) -> Result<()> {
        self.open_inner(self.binding.timeouts.open)
    }

    /// Like [`open`](Self::open) with an explicit budget overriding the
    /// binding's open timeout.
    pub fn open_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.open_inner(timeout)
    }

    fn open_inner(&mut self, budget: Duration) -> Result<()> {
        self.lifecycle.begin_open()?;
        let deadline = Instant::now() + budget;
        match self.establish(deadline) {
            Ok(conn) => {
                self.conn = Some(conn);
                self.lifecycle.complete_open();
                Ok(())
            }
            Err(err) => {
                self.release_slot();
                self.lifecycle.fault(err.to_string());
                Err(err)
            }
        }
    }

    /// Send one message and block for the correlated reply.
    ///
    /// The full request transfer is written and flushed before the
    /// reply read begins. A reply that does not relate to the request's
    /// message id is a protocol violation.
    pub fn request(&mut self, message: Message) -> Result<Message> {
        self.lifecycle.ensure_opened("request")?;
        if self.shape != ChannelShape::RequestReply {
            return Err(ChannelError::Unsupported(
                "request/reply on a one-way channel".into(),
            ));
        }
        self.request_inner(message, None)
    }

    /// Like [`request`](Self::request) with an explicit reply-wait
    /// budget overriding the binding's receive timeout.
    pub fn request_timeout(&mut self, message: Message, timeout: Duration) -> Result<Message> {
        self.lifecycle.ensure_opened("request")?;
        if self.shape != ChannelShape::RequestReply {
            return Err(ChannelError::Unsupported(
                "request/reply on a one-way channel".into(),
            ));
        }
        self.request_inner(message, Some(timeout))
    }

    fn request_inner(&mut self, message: Message, timeout: Option<Duration>) -> Result<Message> {
        match self.exchange(message, timeout) {
            Ok(reply) => Ok(reply),
            Err(err) => {
                if err.faults_channel() {
                    self.fault_and_teardown(&err);
                }
                Err(err)
            }
        }
    }

    /// Send one message with no reply expected.
    pub fn send(&mut self, mut message: Message) -> Result<()> {
        self.lifecycle.ensure_opened("send")?;
        self.address(&mut message);
        let mode = self.binding.transfer_mode;
        let outcome: Result<()> = (|| {
            let payload = self
                .encoder
                .write_message_bytes(message, self.binding.quotas.max_message_size)?;
            let conn = self.active_conn()?;
            conn.connection.write_message(&payload, mode)?;
            Ok(())
        })();
        if let Err(err) = &outcome {
            if err.faults_channel() {
                let reason = err.to_string();
                self.teardown(reason);
            }
        }
        outcome
    }

    /// Run the exchange on a worker thread; the channel travels with
    /// it and comes back alongside the reply.
    pub fn request_async(mut self, message: Message) -> OperationHandle<(Self, Message)> {
        OperationHandle::spawn("request", move || {
            let reply = self.request(message)?;
            Ok((self, reply))
        })
    }

    /// Open on a worker thread, handing the channel back once opened.
    pub fn open_async(mut self) -> OperationHandle<Self> {
        OperationHandle::spawn("open", move || {
            self.open()?;
            Ok(self)
        })
    }

    /// Close on a worker thread, consuming the channel.
    pub fn close_async(mut self) -> OperationHandle<()> {
        OperationHandle::spawn("close", move || self.close())
    }

    /// End the session gracefully and park the connection for reuse.
    ///
    /// Closing a faulted channel is legal: the connection is discarded
    /// rather than parked and the channel still reaches `Closed`.
    pub fn close(&mut self) -> Result<()> {
        self.close_inner(None)
    }

    /// Like [`close`](Self::close) with an explicit budget bounding the
    /// session-end exchange instead of the binding's send timeout.
    pub fn close_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.close_inner(Some(timeout))
    }

    fn close_inner(&mut self, timeout: Option<Duration>) -> Result<()> {
        let faulted = self.lifecycle.state() == CommunicationState::Faulted;
        if !self.lifecycle.begin_close()? {
            return Ok(());
        }
        if faulted {
            if let Some(mut pooled) = self.conn.take() {
                pooled.connection.shutdown();
            }
            self.release_slot();
        } else if let Some(mut pooled) = self.conn.take() {
            if let Some(budget) = timeout {
                // Best-effort; a broken connection fails the session
                // end below either way.
                let _ = pooled.connection.set_write_timeout(Some(budget));
            }
            match pooled.connection.end_session() {
                Ok(()) => {
                    if timeout.is_some() {
                        // Parked connections keep the binding budget.
                        let _ = pooled
                            .connection
                            .set_write_timeout(Some(self.binding.timeouts.send));
                    }
                    self.pool.give_back(&self.via_key, pooled);
                    self.slot_held = false;
                }
                Err(err) => {
                    debug!(error = %err, "session end failed; discarding connection");
                    pooled.connection.shutdown();
                    self.release_slot();
                }
            }
        } else {
            self.release_slot();
        }
        self.lifecycle.complete_close();
        Ok(())
    }

    /// Immediate teardown. Never fails, always leaves the channel
    /// closed.
    pub fn abort(&mut self) {
        if let Some(mut pooled) = self.conn.take() {
            pooled.connection.shutdown();
        }
        self.release_slot();
        self.lifecycle.abort();
    }

    fn exchange(&mut self, mut message: Message, timeout: Option<Duration>) -> Result<Message> {
        self.address(&mut message);
        let request_id = message.headers().message_id.clone();
        let payload = self
            .encoder
            .write_message_bytes(message, self.binding.quotas.max_message_size)?;

        let max = self.binding.quotas.max_message_size;
        let mode = self.binding.transfer_mode;
        let receive = self.binding.timeouts.receive;
        let conn = self.active_conn()?;
        conn.connection.write_message(&payload, mode)?;

        if let Some(timeout) = timeout {
            conn.connection.set_read_timeout(Some(timeout))?;
        }
        let read = conn.connection.read_message(max);
        if timeout.is_some() {
            // Best-effort restore; the read outcome is the one to report.
            let _ = conn.connection.set_read_timeout(Some(receive));
        }
        let reply_bytes = match read? {
            Some(bytes) => bytes,
            None => {
                return Err(ChannelError::Communication(
                    "peer ended the session before replying".into(),
                ))
            }
        };
        let reply = self
            .encoder
            .read_message(&reply_bytes, &self.binding.quotas)?;
        match reply.headers().relates_to.as_deref() {
            Some(relates_to) if relates_to == request_id => Ok(reply),
            other => Err(ChannelError::Protocol(format!(
                "reply relates to {other:?}, expected {request_id:?}"
            ))),
        }
    }

    fn establish(&mut self, deadline: Instant) -> Result<PooledConnection> {
        let settings = PreambleSettings {
            via: self.via_key.clone(),
            content_type: self.encoder.content_type().to_owned(),
        };

        let reusable = self.pool.checkout(&self.via_key, deadline)?;
        self.slot_held = true;

        if let Some(mut pooled) = reusable {
            match self.revive(&mut pooled.connection, &settings, deadline) {
                Ok(()) => {
                    debug!(via = %self.via, "reusing pooled connection");
                    return Ok(pooled);
                }
                Err(err) => {
                    debug!(via = %self.via, error = %err, "pooled connection unusable; dialing");
                    pooled.connection.shutdown();
                }
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ChannelError::Timeout(format!("opening channel to {}", self.via)));
        }
        let stream = wirechan_transport::connect(&self.via, remaining)?;
        let mut conn = FramedConnection::new(
            stream,
            Some(self.binding.timeouts.receive),
            Some(self.binding.timeouts.send),
        )?;
        self.run_preamble(&mut conn, &settings, deadline)?;
        Ok(PooledConnection::fresh(conn))
    }

    /// Reset a parked connection and re-run the preamble on it.
    fn revive(
        &self,
        conn: &mut FramedConnection,
        settings: &PreambleSettings,
        deadline: Instant,
    ) -> Result<()> {
        conn.recycle()?;
        self.run_preamble(conn, settings, deadline)
    }

    /// The preamble acknowledgement wait is bounded by the remaining
    /// open budget, then the read timeout reverts to the receive budget.
    fn run_preamble(
        &self,
        conn: &mut FramedConnection,
        settings: &PreambleSettings,
        deadline: Instant,
    ) -> Result<()> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ChannelError::Timeout(format!("opening channel to {}", self.via)));
        }
        conn.set_read_timeout(Some(remaining))?;
        conn.initiate(settings)?;
        conn.set_read_timeout(Some(self.binding.timeouts.receive))?;
        Ok(())
    }

    fn address(&self, message: &mut Message) {
        if message.headers().to.is_none() {
            message.headers_mut().to = Some(self.to.uri().to_owned());
        }
    }

    fn active_conn(&mut self) -> Result<&mut PooledConnection> {
        self.conn.as_mut().ok_or_else(|| {
            ChannelError::InvalidOperation("channel has no active connection".into())
        })
    }

    fn fault_and_teardown(&mut self, err: &ChannelError) {
        self.teardown(err.to_string());
    }

    fn teardown(&mut self, reason: String) {
        if let Some(mut pooled) = self.conn.take() {
            pooled.connection.shutdown();
        }
        self.release_slot();
        self.lifecycle.fault(reason);
    }

    fn release_slot(&mut self) {
        if self.slot_held {
            self.pool.discard(&self.via_key);
            self.slot_held = false;
        }
    }
}

impl Drop for RequestChannel {
    fn drop(&mut self) {
        if self.conn.is_some() || self.slot_held {
            debug!(via = %self.via, "dropping channel without close; aborting");
            self.abort();
        }
    }
}

impl std::fmt::Debug for RequestChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestChannel")
            .field("via", &self.via_key)
            .field("shape", &self.shape)
            .field("state", &self.lifecycle.state())
            .finish_non_exhaustive()
    }
}

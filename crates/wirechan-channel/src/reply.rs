use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};
use wirechan_encoding::{Message, MessageEncoder};
use wirechan_framing::FramedConnection;

use crate::config::Binding;
use crate::error::{ChannelError, Result};
use crate::handle::OperationHandle;
use crate::lifecycle::{CommunicationState, Lifecycle};

/// Connections returned by closing reply channels, awaiting a fresh
/// preamble from a reusing client.
pub(crate) type ReadyQueue = Mutex<VecDeque<FramedConnection>>;

/// Server-side channel over one accepted connection.
///
/// The preamble has already been validated by the listener. Each
/// [`receive_request`](Self::receive_request) yields a
/// [`RequestContext`] that owes the peer exactly one reply; a clean
/// session end parks the connection with the listener for reuse.
pub struct ReplyChannel {
    binding: Binding,
    encoder: Arc<dyn MessageEncoder>,
    lifecycle: Lifecycle,
    conn: Option<Arc<Mutex<FramedConnection>>>,
    ready: Arc<ReadyQueue>,
    peer_via: String,
}

impl ReplyChannel {
    pub(crate) fn new(
        binding: Binding,
        encoder: Arc<dyn MessageEncoder>,
        conn: FramedConnection,
        ready: Arc<ReadyQueue>,
        peer_via: String,
    ) -> Self {
        let mut lifecycle = Lifecycle::new("reply channel");
        // The listener completed the handshake; the channel starts opened.
        let _ = lifecycle.begin_open();
        lifecycle.complete_open();
        Self {
            binding,
            encoder,
            lifecycle,
            conn: Some(Arc::new(Mutex::new(conn))),
            ready,
            peer_via,
        }
    }

    pub fn state(&self) -> CommunicationState {
        self.lifecycle.state()
    }

    /// The via the peer declared in its preamble.
    pub fn peer_via(&self) -> &str {
        &self.peer_via
    }

    pub fn content_type(&self) -> &str {
        self.encoder.content_type()
    }

    /// Block for the next request on this session.
    ///
    /// `Ok(None)` means the peer ended the session cleanly; the channel
    /// closes and its connection goes back to the listener for reuse.
    /// `timeout` overrides the binding's receive budget for this call.
    pub fn receive_request(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<Option<RequestContext>> {
        self.lifecycle.ensure_opened("receive")?;
        let conn = self.active_conn()?;
        let budget = timeout.unwrap_or(self.binding.timeouts.receive);

        let read = {
            let mut conn = conn.lock().expect("reply connection poisoned");
            conn.set_read_timeout(Some(budget))?;
            conn.read_message(self.binding.quotas.max_message_size)
        };

        match read {
            Ok(Some(bytes)) => {
                let request = match self.encoder.read_message(&bytes, &self.binding.quotas) {
                    Ok(request) => request,
                    Err(err) => {
                        let converted = ChannelError::from(err);
                        self.fault_and_teardown(&converted);
                        return Err(converted);
                    }
                };
                debug!(
                    action = %request.headers().action,
                    message_id = %request.headers().message_id,
                    "request received"
                );
                Ok(Some(RequestContext::new(
                    request,
                    self.conn.clone().ok_or_else(|| {
                        ChannelError::InvalidOperation("channel has no active connection".into())
                    })?,
                    self.encoder.clone(),
                    &self.binding,
                )))
            }
            Ok(None) => {
                debug!(peer = %self.peer_via, "session ended by peer");
                self.park_connection();
                if self.lifecycle.begin_close()? {
                    self.lifecycle.complete_close();
                }
                Ok(None)
            }
            Err(err) => {
                let converted = ChannelError::from(err);
                self.fault_and_teardown(&converted);
                Err(converted)
            }
        }
    }

    /// End the session from this side and close.
    pub fn close(&mut self) -> Result<()> {
        if !self.lifecycle.begin_close()? {
            return Ok(());
        }
        if let Some(conn) = self.conn.take() {
            match Arc::try_unwrap(conn) {
                Ok(mutex) => {
                    if let Ok(mut conn) = mutex.into_inner() {
                        if let Err(err) = conn.end_session() {
                            debug!(error = %err, "session end failed during close");
                        }
                    }
                }
                Err(shared) => {
                    // An outstanding request context still holds it.
                    shared
                        .lock()
                        .expect("reply connection poisoned")
                        .shutdown();
                }
            }
        }
        self.lifecycle.complete_close();
        Ok(())
    }

    /// Immediate teardown; never fails.
    pub fn abort(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.lock().expect("reply connection poisoned").shutdown();
        }
        self.lifecycle.abort();
    }

    /// Recycle the ended connection into the listener's ready queue.
    fn park_connection(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        // An outstanding request context still holds the connection;
        // it cannot be reused in that case.
        let Ok(mutex) = Arc::try_unwrap(conn) else {
            debug!("connection still referenced; not parking");
            return;
        };
        let Ok(mut conn) = mutex.into_inner() else {
            return;
        };
        match conn.recycle() {
            Ok(()) => {
                self.ready
                    .lock()
                    .expect("ready queue poisoned")
                    .push_back(conn);
                debug!("connection parked for preamble reuse");
            }
            Err(err) => debug!(error = %err, "connection not reusable"),
        }
    }

    fn active_conn(&self) -> Result<&Arc<Mutex<FramedConnection>>> {
        self.conn.as_ref().ok_or_else(|| {
            ChannelError::InvalidOperation("channel has no active connection".into())
        })
    }

    fn fault_and_teardown(&mut self, err: &ChannelError) {
        if err.faults_channel() {
            if let Some(conn) = self.conn.take() {
                conn.lock().expect("reply connection poisoned").shutdown();
            }
            self.lifecycle.fault(err.to_string());
        }
    }
}

impl std::fmt::Debug for ReplyChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyChannel")
            .field("peer_via", &self.peer_via)
            .field("state", &self.lifecycle.state())
            .finish_non_exhaustive()
    }
}

/// One received request and the obligation to answer it exactly once.
///
/// The first [`reply`](Self::reply) wins; any later attempt is an
/// error and writes nothing to the wire. Dropping an unanswered
/// context aborts the underlying connection so the peer sees a failure
/// rather than a hang.
pub struct RequestContext {
    request: Message,
    request_id: String,
    conn: Arc<Mutex<FramedConnection>>,
    encoder: Arc<dyn MessageEncoder>,
    max_message_size: usize,
    transfer_mode: wirechan_framing::TransferMode,
    replied: bool,
    aborted: bool,
}

impl RequestContext {
    fn new(
        request: Message,
        conn: Arc<Mutex<FramedConnection>>,
        encoder: Arc<dyn MessageEncoder>,
        binding: &Binding,
    ) -> Self {
        let request_id = request.headers().message_id.clone();
        Self {
            request,
            request_id,
            conn,
            encoder,
            max_message_size: binding.quotas.max_message_size,
            transfer_mode: binding.transfer_mode,
            replied: false,
            aborted: false,
        }
    }

    pub fn request(&self) -> &Message {
        &self.request
    }

    /// Mutable access, for materializing a streamed request body.
    pub fn request_mut(&mut self) -> &mut Message {
        &mut self.request
    }

    /// Message id of the request, for correlation.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Send the reply, correlating it to the request if the caller has
    /// not set `relates_to` already.
    pub fn reply(&mut self, mut message: Message) -> Result<()> {
        if self.aborted {
            return Err(ChannelError::InvalidOperation(
                "cannot reply on an aborted request context".into(),
            ));
        }
        if self.replied {
            return Err(ChannelError::InvalidOperation(
                "request already has a reply".into(),
            ));
        }
        // Claimed before any wire traffic: a failed attempt consumed
        // the one reply this context offers.
        self.replied = true;

        if message.headers().relates_to.is_none() {
            message.headers_mut().relates_to = Some(self.request_id.clone());
        }
        let payload = self
            .encoder
            .write_message_bytes(message, self.max_message_size)?;
        let mut conn = self.conn.lock().expect("reply connection poisoned");
        conn.write_message(&payload, self.transfer_mode)?;
        debug!(request_id = %self.request_id, "reply sent");
        Ok(())
    }

    /// Send the reply from a worker thread, consuming the context.
    pub fn reply_async(mut self, message: Message) -> OperationHandle<()> {
        OperationHandle::spawn("reply", move || self.reply(message))
    }

    /// Give up on this request. Idempotent; tears the connection down
    /// if no reply was sent.
    pub fn abort(&mut self) {
        if self.aborted {
            return;
        }
        self.aborted = true;
        if !self.replied {
            self.conn
                .lock()
                .expect("reply connection poisoned")
                .shutdown();
        }
    }

    /// Finish with this context; aborts if no reply went out.
    pub fn close(mut self) {
        if !self.replied {
            self.abort();
        }
    }
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        if !self.replied && !self.aborted {
            warn!(request_id = %self.request_id, "request dropped without a reply");
            self.abort();
        }
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("replied", &self.replied)
            .field("aborted", &self.aborted)
            .finish_non_exhaustive()
    }
}

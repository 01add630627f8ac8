use std::time::Duration;

use wirechan_encoding::{EncoderFactory, ReaderQuotas};
use wirechan_framing::TransferMode;

/// Per-operation time budgets of a channel.
///
/// Each channel operation runs under exactly one of these budgets;
/// expiry surfaces as a timeout error and faults the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultTimeouts {
    /// Connection establishment plus the preamble exchange.
    pub open: Duration,
    /// One outbound message transfer.
    pub send: Duration,
    /// Waiting for an inbound message.
    pub receive: Duration,
    /// Graceful session shutdown.
    pub close: Duration,
}

impl Default for DefaultTimeouts {
    fn default() -> Self {
        Self {
            open: Duration::from_secs(60),
            send: Duration::from_secs(60),
            receive: Duration::from_secs(600),
            close: Duration::from_secs(60),
        }
    }
}

/// Outbound connection pool tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// How long an idle pooled connection stays reusable.
    pub idle_timeout: Duration,
    /// Total lifetime of a pooled connection, busy or idle.
    pub lease_timeout: Duration,
    /// Concurrent outbound connections per via; checkouts beyond this
    /// block until one is returned or the open budget expires.
    pub max_outbound_per_via: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(120),
            lease_timeout: Duration::from_secs(300),
            max_outbound_per_via: 10,
        }
    }
}

/// Message exchange shape of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelShape {
    /// Receive-only.
    Input,
    /// Send-only, no reply.
    Output,
    /// Correlated request/reply pairs.
    RequestReply,
    /// Uncorrelated two-way flow.
    Duplex,
}

/// Everything a factory or listener needs to build channels: encoder
/// selection, decode quotas, transfer mode and time budgets.
#[derive(Debug, Clone)]
pub struct Binding {
    pub encoder: EncoderFactory,
    pub quotas: ReaderQuotas,
    pub transfer_mode: TransferMode,
    pub timeouts: DefaultTimeouts,
    pub pool: PoolSettings,
}

impl Binding {
    pub fn new(encoder: EncoderFactory) -> Self {
        Self {
            encoder,
            quotas: ReaderQuotas::default(),
            transfer_mode: TransferMode::default(),
            timeouts: DefaultTimeouts::default(),
            pool: PoolSettings::default(),
        }
    }

    pub fn with_quotas(mut self, quotas: ReaderQuotas) -> Self {
        self.quotas = quotas;
        self
    }

    pub fn with_transfer_mode(mut self, mode: TransferMode) -> Self {
        self.transfer_mode = mode;
        self
    }

    pub fn with_timeouts(mut self, timeouts: DefaultTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_pool(mut self, pool: PoolSettings) -> Self {
        self.pool = pool;
        self
    }
}

impl Default for Binding {
    fn default() -> Self {
        Self::new(EncoderFactory::default())
    }
}

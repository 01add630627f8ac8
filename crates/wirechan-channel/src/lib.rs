//! Channel layer: lifecycle, factories, listeners and request/reply
//! correlation over framed stream connections.
//!
//! A [`ChannelFactory`] creates client-side [`RequestChannel`]s for a
//! [`Binding`]; a [`ChannelListener`] accepts server-side
//! [`ReplyChannel`]s. Every channel walks the
//! `Created → Opening → Opened → Closing → Closed` state machine, with
//! `Faulted` reachable from any failure during use.
//!
//! Outbound connections are pooled per via and reused across channel
//! opens; a reused connection runs a fresh preamble so both sides agree
//! on the encoding before any message flows.

pub mod config;
pub mod error;
pub mod factory;
pub mod handle;
pub mod lifecycle;
pub mod listener;
pub mod pool;
pub mod reply;
pub mod request;

pub use config::{Binding, ChannelShape, DefaultTimeouts, PoolSettings};
pub use error::{ChannelError, Result};
pub use factory::ChannelFactory;
pub use handle::OperationHandle;
pub use lifecycle::{CommunicationState, Lifecycle};
pub use listener::ChannelListener;
pub use pool::{ConnectionPool, PooledConnection};
pub use reply::{ReplyChannel, RequestContext};
pub use request::RequestChannel;

//! Stream transport abstraction for wirechan.
//!
//! Provides a unified interface over the raw byte streams the framing
//! protocol runs on:
//! - TCP sockets (`tcp://host:port`)
//! - Local named pipes (`pipe://path`, Unix domain sockets on unix)
//!
//! This is the lowest layer of wirechan. Everything else builds on top of
//! the [`NetStream`] type provided here, addressed by a [`Via`].

pub mod error;
pub mod pipe;
pub mod stream;
pub mod tcp;
pub mod via;

pub use error::{Result, TransportError};
pub use pipe::PipeListener;
pub use stream::NetStream;
pub use tcp::TcpTransportListener;
pub use via::{EndpointAddress, Scheme, Via};

use std::time::Duration;

/// A bound listener for either supported transport.
pub enum TransportListener {
    Tcp(TcpTransportListener),
    Pipe(PipeListener),
}

impl TransportListener {
    /// Bind a listener on the given via.
    pub fn bind(via: &Via) -> Result<Self> {
        match via.scheme() {
            Scheme::Tcp => Ok(Self::Tcp(TcpTransportListener::bind(via)?)),
            Scheme::Pipe => Ok(Self::Pipe(PipeListener::bind(via)?)),
        }
    }

    /// Accept the next incoming connection (blocking).
    pub fn accept(&self) -> Result<NetStream> {
        match self {
            Self::Tcp(listener) => listener.accept(),
            Self::Pipe(listener) => listener.accept(),
        }
    }

    /// Accept with an optional deadline; `Ok(None)` on expiry.
    pub fn accept_timeout(&self, timeout: Option<Duration>) -> Result<Option<NetStream>> {
        match self {
            Self::Tcp(listener) => listener.accept_timeout(timeout),
            Self::Pipe(listener) => listener.accept_timeout(timeout),
        }
    }

    /// The via this listener is actually bound to.
    ///
    /// For TCP binds on port 0 this carries the assigned port.
    pub fn local_via(&self) -> &Via {
        match self {
            Self::Tcp(listener) => listener.local_via(),
            Self::Pipe(listener) => listener.local_via(),
        }
    }
}

/// Dial the transport endpoint named by `via` (blocking, bounded).
///
/// The timeout bounds connection establishment only; read/write timeouts
/// are applied to the resulting stream separately.
pub fn connect(via: &Via, timeout: Duration) -> Result<NetStream> {
    match via.scheme() {
        Scheme::Tcp => tcp::connect(via, timeout),
        Scheme::Pipe => pipe::connect(via, timeout),
    }
}

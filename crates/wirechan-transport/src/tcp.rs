use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::NetStream;
use crate::via::{Scheme, Via};

/// TCP transport listener.
pub struct TcpTransportListener {
    listener: TcpListener,
    via: Via,
}

impl TcpTransportListener {
    /// Bind and listen on a TCP via.
    ///
    /// Binding to port 0 is supported; the assigned port is reflected in
    /// [`local_via`](Self::local_via).
    pub fn bind(via: &Via) -> Result<Self> {
        expect_scheme(via)?;

        let listener = TcpListener::bind(via.authority()).map_err(|e| TransportError::Bind {
            via: via.to_string(),
            source: e,
        })?;
        let local = listener.local_addr().map_err(|e| TransportError::Bind {
            via: via.to_string(),
            source: e,
        })?;
        let via = Via::tcp(&local.ip().to_string(), local.port());

        info!(%via, "listening on tcp");

        Ok(Self { listener, via })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<NetStream> {
        let (stream, addr) = self.listener.accept().map_err(TransportError::Accept)?;
        stream.set_nodelay(true).map_err(TransportError::Accept)?;
        debug!(%addr, "accepted tcp connection");
        Ok(NetStream::from_tcp(stream))
    }

    /// Accept with an optional deadline.
    ///
    /// `Ok(None)` when the deadline expires with no connection. The
    /// listener is polled in nonblocking mode and restored afterwards.
    pub fn accept_timeout(&self, timeout: Option<Duration>) -> Result<Option<NetStream>> {
        let Some(timeout) = timeout else {
            return self.accept().map(Some);
        };
        let deadline = Instant::now() + timeout;
        self.listener
            .set_nonblocking(true)
            .map_err(TransportError::Accept)?;
        let outcome = loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    debug!(%addr, "accepted tcp connection");
                    break Ok(Some(stream));
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        break Ok(None);
                    }
                    std::thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => break Err(TransportError::Accept(err)),
            }
        };
        self.listener
            .set_nonblocking(false)
            .map_err(TransportError::Accept)?;
        match outcome? {
            Some(stream) => {
                stream.set_nodelay(true).map_err(TransportError::Accept)?;
                Ok(Some(NetStream::from_tcp(stream)))
            }
            None => Ok(None),
        }
    }

    /// The via this listener is bound to, with the assigned port.
    pub fn local_via(&self) -> &Via {
        &self.via
    }
}

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Connect to a TCP via within an overall deadline.
pub fn connect(via: &Via, timeout: Duration) -> Result<NetStream> {
    expect_scheme(via)?;

    let deadline = Instant::now() + timeout;
    let addrs = via
        .authority()
        .to_socket_addrs()
        .map_err(|e| TransportError::Connect {
            via: via.to_string(),
            source: e,
        })?;

    let mut last_err = None;
    for addr in addrs {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(TransportError::ConnectTimeout {
                via: via.to_string(),
                timeout,
            });
        }
        match TcpStream::connect_timeout(&addr, remaining) {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                debug!(%via, "connected over tcp");
                return Ok(NetStream::from_tcp(stream));
            }
            Err(err) if err.kind() == std::io::ErrorKind::TimedOut => {
                return Err(TransportError::ConnectTimeout {
                    via: via.to_string(),
                    timeout,
                });
            }
            Err(err) => last_err = Some(err),
        }
    }

    Err(TransportError::Connect {
        via: via.to_string(),
        source: last_err
            .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses")),
    })
}

fn expect_scheme(via: &Via) -> Result<()> {
    if via.scheme() != Scheme::Tcp {
        return Err(TransportError::SchemeMismatch {
            expected: Scheme::Tcp,
            actual: via.scheme(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    #[test]
    fn bind_accept_connect() {
        let listener = TcpTransportListener::bind(&Via::tcp("127.0.0.1", 0)).unwrap();
        let via = listener.local_via().clone();

        let handle = std::thread::spawn(move || {
            let mut client = connect(&via, Duration::from_secs(5)).unwrap();
            client.write_all(b"hello").unwrap();
        });

        let mut server = listener.accept().unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        handle.join().unwrap();
    }

    #[test]
    fn bind_rejects_pipe_via() {
        let result = TcpTransportListener::bind(&Via::pipe("/tmp/x.sock"));
        assert!(matches!(result, Err(TransportError::SchemeMismatch { .. })));
    }

    #[test]
    fn connect_refused_reports_via() {
        // Bind then drop to find a port that is very likely closed.
        let scratch = TcpTransportListener::bind(&Via::tcp("127.0.0.1", 0)).unwrap();
        let via = scratch.local_via().clone();
        drop(scratch);

        let result = connect(&via, Duration::from_secs(1));
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }
}

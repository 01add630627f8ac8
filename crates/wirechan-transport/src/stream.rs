use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use crate::error::Result;

/// A connected transport stream; implements Read + Write.
///
/// This is the fundamental I/O type returned by transport operations.
/// The framing engine exclusively owns a `NetStream` for the duration of
/// a handshake or message transfer; cloning produces a second descriptor
/// for split read/write halves, not for concurrent exchanges.
pub struct NetStream {
    inner: NetStreamInner,
}

enum NetStreamInner {
    Tcp(TcpStream),
    #[cfg(unix)]
    Pipe(std::os::unix::net::UnixStream),
}

impl Read for NetStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            NetStreamInner::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            NetStreamInner::Pipe(stream) => stream.read(buf),
        }
    }
}

impl Write for NetStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            NetStreamInner::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            NetStreamInner::Pipe(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            NetStreamInner::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            NetStreamInner::Pipe(stream) => stream.flush(),
        }
    }
}

impl NetStream {
    pub(crate) fn from_tcp(stream: TcpStream) -> Self {
        Self {
            inner: NetStreamInner::Tcp(stream),
        }
    }

    #[cfg(unix)]
    pub(crate) fn from_pipe(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: NetStreamInner::Pipe(stream),
        }
    }

    /// Wrap an already-connected TCP stream.
    ///
    /// The seam for callers that establish (or security-upgrade) the
    /// connection themselves before handing it to the framing engine.
    pub fn from_tcp_stream(stream: TcpStream) -> Self {
        Self::from_tcp(stream)
    }

    /// Wrap an already-connected Unix stream (e.g. a socketpair half).
    #[cfg(unix)]
    pub fn from_unix_stream(stream: std::os::unix::net::UnixStream) -> Self {
        Self::from_pipe(stream)
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            NetStreamInner::Tcp(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            NetStreamInner::Pipe(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
        }
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            NetStreamInner::Tcp(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            NetStreamInner::Pipe(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            NetStreamInner::Tcp(stream) => Ok(Self::from_tcp(stream.try_clone()?)),
            #[cfg(unix)]
            NetStreamInner::Pipe(stream) => Ok(Self::from_pipe(stream.try_clone()?)),
        }
    }

    /// Shut down both directions of the connection.
    pub fn shutdown(&self) -> Result<()> {
        match &self.inner {
            NetStreamInner::Tcp(stream) => stream
                .shutdown(std::net::Shutdown::Both)
                .or_else(ignore_not_connected),
            #[cfg(unix)]
            NetStreamInner::Pipe(stream) => stream
                .shutdown(std::net::Shutdown::Both)
                .or_else(ignore_not_connected),
        }
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            NetStreamInner::Tcp(_) => "tcp",
            #[cfg(unix)]
            NetStreamInner::Pipe(_) => "pipe",
        }
    }
}

// Shutting down a connection the peer already dropped is not an error.
fn ignore_not_connected(err: std::io::Error) -> Result<()> {
    if err.kind() == std::io::ErrorKind::NotConnected {
        Ok(())
    } else {
        Err(err.into())
    }
}

impl std::fmt::Debug for NetStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetStream")
            .field("transport", &self.transport_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(unix)]
    fn pipe_stream_roundtrip() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut a = NetStream::from_pipe(left);
        let mut b = NetStream::from_pipe(right);

        a.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        b.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
        assert_eq!(a.transport_name(), "pipe");
    }

    #[test]
    #[cfg(unix)]
    fn shutdown_is_idempotent() {
        let (left, _right) = std::os::unix::net::UnixStream::pair().unwrap();
        let stream = NetStream::from_pipe(left);
        stream.shutdown().unwrap();
        stream.shutdown().unwrap();
    }

    #[test]
    #[cfg(unix)]
    fn clone_shares_the_connection() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let writer = NetStream::from_pipe(left);
        let mut reader = NetStream::from_pipe(right);

        let mut clone = writer.try_clone().unwrap();
        clone.write_all(b"x").unwrap();

        let mut buf = [0u8; 1];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"x");
    }
}

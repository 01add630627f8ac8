//! Local named pipe transport.
//!
//! On unix this is a filesystem-path Unix domain socket, which is the
//! conventional stand-in for a named pipe endpoint: local-only, path
//! addressed, stream oriented.

#[cfg(unix)]
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
#[cfg(unix)]
use std::os::unix::net::UnixListener;
use std::path::PathBuf;
use std::time::Duration;
#[cfg(unix)]
use std::time::Instant;

#[cfg(unix)]
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(25);

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::NetStream;
use crate::via::{Scheme, Via};

/// Local named pipe listener.
///
/// The pipe endpoint is created at the via's path. A stale endpoint left
/// by a crashed process is removed before bind; a non-socket file at the
/// same path is never removed.
pub struct PipeListener {
    #[cfg(unix)]
    listener: UnixListener,
    via: Via,
    path: PathBuf,
    created_inode: Option<(u64, u64)>,
}

impl PipeListener {
    /// Default permission mode for created pipe endpoints.
    pub const DEFAULT_PIPE_MODE: u32 = 0o600;
    /// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind and listen on a pipe via.
    #[cfg(unix)]
    pub fn bind(via: &Via) -> Result<Self> {
        Self::bind_with_mode(via, Self::DEFAULT_PIPE_MODE)
    }

    /// Bind and listen on a pipe via with an explicit permission mode.
    #[cfg(unix)]
    pub fn bind_with_mode(via: &Via, mode: u32) -> Result<Self> {
        expect_scheme(via)?;
        let path = PathBuf::from(via.authority());

        let path_bytes = path.as_os_str().len();
        if path_bytes >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path: via.authority().to_string(),
                len: path_bytes,
                max: Self::MAX_PATH_LEN,
            });
        }

        let bind_err = |e: std::io::Error| TransportError::Bind {
            via: via.to_string(),
            source: e,
        };

        // Remove a stale endpoint if one exists, but never remove non-socket files.
        if path.exists() {
            let metadata = std::fs::symlink_metadata(&path).map_err(bind_err)?;
            if metadata.file_type().is_socket() {
                debug!(?path, "removing stale pipe endpoint");
                std::fs::remove_file(&path).map_err(bind_err)?;
            } else {
                return Err(bind_err(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "existing path is not a pipe endpoint",
                )));
            }
        }

        let listener = UnixListener::bind(&path).map_err(bind_err)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).map_err(bind_err)?;
        let created_metadata = std::fs::symlink_metadata(&path).map_err(bind_err)?;
        let created_inode = Some((created_metadata.dev(), created_metadata.ino()));

        info!(%via, "listening on pipe");

        Ok(Self {
            listener,
            via: via.clone(),
            path,
            created_inode,
        })
    }

    /// Accept an incoming connection (blocking).
    #[cfg(unix)]
    pub fn accept(&self) -> Result<NetStream> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!("accepted pipe connection");
        Ok(NetStream::from_pipe(stream))
    }

    /// Accept with an optional deadline.
    ///
    /// `Ok(None)` when the deadline expires with no connection. The
    /// listener is polled in nonblocking mode and restored afterwards.
    #[cfg(unix)]
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
                Ok((stream, _addr)) => {
                    debug!("accepted pipe connection");
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
                // Accepted sockets inherit nonblocking mode on some platforms.
                stream
                    .set_nonblocking(false)
                    .map_err(TransportError::Accept)?;
                Ok(Some(NetStream::from_pipe(stream)))
            }
            None => Ok(None),
        }
    }

    /// The via this listener is bound to.
    pub fn local_via(&self) -> &Via {
        &self.via
    }

    /// The filesystem path of the pipe endpoint.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[cfg(unix)]
impl Drop for PipeListener {
    fn drop(&mut self) {
        if let Some((expected_dev, expected_ino)) = self.created_inode {
            if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
                if metadata.file_type().is_socket()
                    && metadata.dev() == expected_dev
                    && metadata.ino() == expected_ino
                {
                    debug!(path = ?self.path, "cleaning up pipe endpoint");
                    let _ = std::fs::remove_file(&self.path);
                } else {
                    debug!(path = ?self.path, "endpoint identity changed; skipping cleanup");
                }
            }
        }
    }
}

/// Connect to a listening pipe endpoint (blocking).
///
/// Local pipe connects complete immediately or fail; the timeout applies
/// to read/write operations configured on the returned stream, not to
/// connection establishment.
#[cfg(unix)]
pub fn connect(via: &Via, _timeout: Duration) -> Result<NetStream> {
    expect_scheme(via)?;
    let path = PathBuf::from(via.authority());
    let stream =
        std::os::unix::net::UnixStream::connect(&path).map_err(|e| TransportError::Connect {
            via: via.to_string(),
            source: e,
        })?;
    debug!(%via, "connected over pipe");
    Ok(NetStream::from_pipe(stream))
}

fn expect_scheme(via: &Via) -> Result<()> {
    if via.scheme() != Scheme::Pipe {
        return Err(TransportError::SchemeMismatch {
            expected: Scheme::Pipe,
            actual: via.scheme(),
        });
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    fn pipe_via(tag: &str) -> Via {
        let dir = std::env::temp_dir().join(format!("wirechan-pipe-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        Via::pipe(dir.join("svc.sock").to_string_lossy())
    }

    #[test]
    fn bind_accept_connect() {
        let via = pipe_via("bind");
        let listener = PipeListener::bind(&via).unwrap();

        let via_clone = via.clone();
        let handle = std::thread::spawn(move || {
            let mut client = connect(&via_clone, Duration::from_secs(5)).unwrap();
            client.write_all(b"hello").unwrap();
        });

        let mut server = listener.accept().unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        handle.join().unwrap();

        let path = listener.path().to_path_buf();
        drop(listener);
        assert!(!path.exists(), "endpoint should be cleaned up on drop");
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn path_too_long_rejected() {
        let via = Via::pipe(format!("/tmp/{}.sock", "a".repeat(200)));
        let result = PipeListener::bind(&via);
        assert!(matches!(result, Err(TransportError::PathTooLong { .. })));
    }

    #[test]
    fn bind_default_permissions_hardened() {
        let via = pipe_via("perms");
        let listener = PipeListener::bind(&via).unwrap();
        let mode = std::fs::metadata(listener.path()).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        let parent = listener.path().parent().unwrap().to_path_buf();
        drop(listener);
        let _ = std::fs::remove_dir_all(parent);
    }

    #[test]
    fn bind_rejects_existing_non_socket_file() {
        let via = pipe_via("file");
        std::fs::write(via.authority(), b"regular-file").unwrap();

        let result = PipeListener::bind(&via);
        assert!(matches!(result, Err(TransportError::Bind { .. })));

        let _ = std::fs::remove_file(via.authority());
    }

    #[test]
    fn drop_does_not_remove_replaced_path() {
        let via = pipe_via("race");
        let listener = PipeListener::bind(&via).unwrap();
        let path = listener.path().to_path_buf();

        // Replace path while listener is alive.
        std::fs::remove_file(&path).unwrap();
        std::fs::write(&path, b"replacement-file").unwrap();

        drop(listener);
        assert!(path.exists(), "drop must not remove a replaced path");

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn connect_rejects_tcp_via() {
        let result = connect(&Via::tcp("127.0.0.1", 1), Duration::from_secs(1));
        assert!(matches!(result, Err(TransportError::SchemeMismatch { .. })));
    }
}

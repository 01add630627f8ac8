use std::fmt;
use std::str::FromStr;

use crate::error::{Result, TransportError};

/// Transport scheme a via may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// TCP socket, `tcp://host:port`.
    Tcp,
    /// Local named pipe, `pipe://path` (Unix domain socket on unix).
    Pipe,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Tcp => write!(f, "tcp"),
            Scheme::Pipe => write!(f, "pipe"),
        }
    }
}

/// The physical transport address a channel actually dials.
///
/// Distinct from the logical destination carried in message headers
/// (see [`EndpointAddress`]): a request addressed to one logical service
/// may be dialed through a different physical endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Via {
    scheme: Scheme,
    authority: String,
}

impl Via {
    /// Build a TCP via from host and port.
    pub fn tcp(host: &str, port: u16) -> Self {
        Self {
            scheme: Scheme::Tcp,
            authority: format!("{host}:{port}"),
        }
    }

    /// Build a pipe via from a filesystem path.
    pub fn pipe(path: impl AsRef<str>) -> Self {
        Self {
            scheme: Scheme::Pipe,
            authority: path.as_ref().to_string(),
        }
    }

    /// Parse a via string of the form `scheme://authority`.
    pub fn parse(input: &str) -> Result<Self> {
        let (scheme, authority) =
            input
                .split_once("://")
                .ok_or_else(|| TransportError::InvalidVia {
                    via: input.to_string(),
                    reason: "missing '://' separator".to_string(),
                })?;

        let scheme = match scheme {
            "tcp" => Scheme::Tcp,
            "pipe" => Scheme::Pipe,
            other => {
                return Err(TransportError::InvalidVia {
                    via: input.to_string(),
                    reason: format!("unknown scheme '{other}'"),
                })
            }
        };

        if authority.is_empty() {
            return Err(TransportError::InvalidVia {
                via: input.to_string(),
                reason: "empty authority".to_string(),
            });
        }

        if scheme == Scheme::Tcp {
            let (_, port) =
                authority
                    .rsplit_once(':')
                    .ok_or_else(|| TransportError::InvalidVia {
                        via: input.to_string(),
                        reason: "tcp via requires host:port".to_string(),
                    })?;
            port.parse::<u16>().map_err(|_| TransportError::InvalidVia {
                via: input.to_string(),
                reason: format!("invalid port '{port}'"),
            })?;
        }

        Ok(Self {
            scheme,
            authority: authority.to_string(),
        })
    }

    /// The transport scheme.
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Host:port for TCP vias, pipe path for pipe vias.
    pub fn authority(&self) -> &str {
        &self.authority
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority)
    }
}

impl FromStr for Via {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Logical destination identity carried in message headers.
///
/// Opaque at this layer; resolution of logical addresses belongs to the
/// configuration layers above the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointAddress {
    uri: String,
}

impl EndpointAddress {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }

    /// Logical address derived directly from a via (the common case when
    /// no separate logical identity is configured).
    pub fn from_via(via: &Via) -> Self {
        Self {
            uri: via.to_string(),
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri)
    }
}

//! Transport abstraction: a request/reply message channel.
//!
//! Concrete implementations:
//! - [`ReqSocket`](crate::adapters::req_socket::ReqSocket): ZMTP 3.0 REQ
//!   over TCP, the server's native pattern.
//! - scripted in-memory mocks in the integration tests.
//!
//! The session is generic over `Transport`, so swapping the wire needs
//! zero changes to the state machine.

use core::fmt;

use crate::error::TransportError;

/// Default server address (scheme + host).
pub const DEFAULT_ADDRESS: &str = "tcp://localhost";

/// Default server port.
pub const DEFAULT_PORT: &str = "5555";

/// Message-oriented request/reply channel.
///
/// Implementations must never block in [`send`](Self::send) or
/// [`try_recv`](Self::try_recv); progress that cannot be made right now is
/// deferred to the next call.
pub trait Transport {
    /// Open a connection, closing any existing one first.
    fn connect(&mut self, endpoint: &Endpoint) -> Result<(), TransportError>;

    /// Hand one complete request message to the transport.
    fn send(&mut self, message: &[u8]) -> Result<(), TransportError>;

    /// Poll for one complete reply message. `Ok(None)` is the normal
    /// "not yet" answer.
    fn try_recv(&mut self) -> Result<Option<Vec<u8>>, TransportError>;

    /// Release the connection. Calling it when already closed (or never
    /// opened) is a no-op.
    fn close(&mut self);

    /// Whether a connection is currently open.
    fn is_connected(&self) -> bool;
}

// ═══════════════════════════════════════════════════════════════
//  Endpoint
// ═══════════════════════════════════════════════════════════════

/// A `tcp://host:port` server location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Build from the host-facing address and port strings
    /// (e.g. `"tcp://localhost"`, `"5555"`).
    pub fn from_parts(address: &str, port: &str) -> Result<Self, TransportError> {
        let host = address
            .strip_prefix("tcp://")
            .ok_or_else(|| TransportError::InvalidEndpoint(address.to_owned()))?;
        // IPv6 literals arrive bracketed; the resolver wants them bare.
        let host = match host.strip_prefix('[') {
            Some(inner) => inner
                .strip_suffix(']')
                .ok_or_else(|| TransportError::InvalidEndpoint(address.to_owned()))?,
            None => host,
        };
        if host.is_empty() {
            return Err(TransportError::InvalidEndpoint(address.to_owned()));
        }
        let port: u16 = port
            .trim()
            .parse()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| TransportError::InvalidEndpoint(format!("{address}:{port}")))?;
        Ok(Self {
            host: host.to_owned(),
            port,
        })
    }

    /// Parse a full `tcp://host:port` string.
    pub fn parse(s: &str) -> Result<Self, TransportError> {
        let (address, port) = s
            .rsplit_once(':')
            .filter(|(a, _)| a.starts_with("tcp://"))
            .ok_or_else(|| TransportError::InvalidEndpoint(s.to_owned()))?;
        Self::from_parts(address, port)
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 5555,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "tcp://[{}]:{}", self.host, self.port)
        } else {
            write!(f, "tcp://{}:{}", self.host, self.port)
        }
    }
}

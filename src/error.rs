//! Unified error types for the AEPsych client.
//!
//! Every session operation funnels into [`ClientError`], whose variants
//! mirror the four failure families a caller has to tell apart:
//! protocol misuse, transport failure, message (de)serialization, and
//! configuration. Nothing in this crate logs-and-continues on these;
//! they are always returned.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::rpc::message::RequestType;
use crate::rpc::session::Status;

// ---------------------------------------------------------------------------
// Top-level client error
// ---------------------------------------------------------------------------

/// Every fallible session operation returns this type.
#[derive(Debug, Error)]
pub enum ClientError {
    /// An operation was invoked in a session state that does not admit it.
    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),
    /// Connecting, sending or receiving failed.
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    /// A request could not be encoded or a reply did not have the shape
    /// the call site asked for.
    #[error("serialization: {0}")]
    Serialization(#[from] CodecError),
    /// The setup configuration source could not be read.
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    /// No reply arrived before the caller's deadline. The request is still
    /// outstanding.
    #[error("no reply to {kind} request after {waited:?}")]
    DeadlineExceeded { kind: RequestType, waited: Duration },
}

impl ClientError {
    /// Convenience for tests and callers that only care about the family.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    pub fn is_serialization(&self) -> bool {
        matches!(self, Self::Serialization(_))
    }
}

// ---------------------------------------------------------------------------
// Protocol errors
// ---------------------------------------------------------------------------

/// Illegal call sequences rejected by the session state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// A request was issued while another one is still awaiting its reply.
    #[error("a {pending} request is still awaiting its reply")]
    RequestInFlight { pending: RequestType },
    /// A request was issued while the reply to the previous one is unread.
    #[error("the reply to the previous {kind} request has not been consumed")]
    UnconsumedReply { kind: RequestType },
    /// A reply getter was called with no reply available.
    #[error("no reply available (session is {status:?})")]
    NoReply { status: Status },
}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

/// Errors originating from the request/reply transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The endpoint string could not be parsed.
    #[error("invalid endpoint '{0}'")]
    InvalidEndpoint(String),
    /// The host name did not resolve to any socket address.
    #[error("could not resolve '{0}'")]
    Resolve(String),
    /// TCP connect failed (refused, unreachable, timed out).
    #[error("connect to {endpoint} failed: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    /// Operation requires an open connection but none is present.
    #[error("not connected")]
    NotConnected,
    /// Socket I/O failure on an open connection.
    #[error("socket I/O: {0}")]
    Io(#[from] io::Error),
    /// The peer's greeting or READY command was unacceptable.
    #[error("handshake: {0}")]
    Handshake(String),
    /// The byte stream violated ZMTP framing.
    #[error("malformed stream: {0}")]
    Malformed(String),
    /// The peer closed the connection.
    #[error("peer closed the connection")]
    PeerClosed,
    /// A send was attempted while the previous request's reply is pending.
    #[error("send issued before the previous reply was received")]
    Alternation,
    /// A frame announced a size above the guardrail.
    #[error("frame too large: {len} > {max}")]
    FrameTooLarge { len: u64, max: u64 },
}

// ---------------------------------------------------------------------------
// Codec errors
// ---------------------------------------------------------------------------

/// Message encoding / decoding failures.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A request could not be serialized.
    #[error("encode request: {0}")]
    Encode(#[source] serde_json::Error),
    /// A reply did not decode as the shape requested by the call site.
    #[error("reply is not a valid {expected}: {source}")]
    Decode {
        expected: &'static str,
        #[source]
        source: serde_json::Error,
    },
    /// A trial configuration broke its invariants.
    #[error("invalid trial config: {0}")]
    InvalidTrialConfig(String),
    /// A trial configuration named a parameter the server never declared.
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),
    /// A request envelope was structurally valid JSON but not a request.
    #[error("invalid request envelope: {0}")]
    InvalidRequest(String),
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

/// Failures loading client settings or the experiment configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// A setting failed range validation.
    #[error("invalid setting: {0}")]
    Invalid(&'static str),
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Client-wide `Result` alias.
pub type Result<T> = core::result::Result<T, ClientError>;

//! ZMTP REQ socket adapter.
//!
//! Implements [`Transport`](crate::rpc::transport::Transport) as a
//! client-side REQ socket that talks to a ZeroMQ REP (or ROUTER) server
//! over plain TCP with the NULL security mechanism.
//!
//! ## Connection model
//!
//! 1. `connect()` performs a bounded TCP connect, switches the stream to
//!    non-blocking mode and queues our greeting plus `READY`.
//! 2. Every `send()` / `try_recv()` pumps the connection: flush as much
//!    of the outbound buffer as the kernel takes, read whatever is
//!    available, and advance the handshake.
//! 3. Requests sent before the handshake completes wait in the outbound
//!    buffer behind the greeting, exactly as libzmq queues them.
//! 4. `close()` drops the stream and returns to `Closed`.
//!
//! The socket enforces REQ alternation itself: a second `send()` before
//! the reply has been received fails with
//! [`TransportError::Alternation`].

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use log::{debug, info, trace, warn};

use crate::error::TransportError;
use crate::rpc::transport::{Endpoint, Transport};
use crate::rpc::zmtp::{self, Frame, FrameDecoder};

// ───────────────────────────────────────────────────────────────
// Constants
// ───────────────────────────────────────────────────────────────

const READ_BUF_SIZE: usize = 4096;

/// Default bound on the blocking TCP connect.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Live TCP connections held by all `ReqSocket`s in this process.
static OPEN_CONNECTIONS: AtomicUsize = AtomicUsize::new(0);

/// Number of TCP connections currently held open by `ReqSocket`s.
pub fn open_connections() -> usize {
    OPEN_CONNECTIONS.load(Ordering::SeqCst)
}

// ───────────────────────────────────────────────────────────────
// Connection state
// ───────────────────────────────────────────────────────────────

/// Socket lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// No connection.
    Closed,
    /// TCP is up; waiting for the peer greeting.
    AwaitingGreeting,
    /// Greeting accepted; waiting for the peer READY.
    AwaitingReady,
    /// Handshake complete.
    Open,
}

/// A TCP stream that keeps the process-wide connection count honest.
struct Connection {
    stream: TcpStream,
}

impl Connection {
    fn new(stream: TcpStream) -> Self {
        OPEN_CONNECTIONS.fetch_add(1, Ordering::SeqCst);
        Self { stream }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        OPEN_CONNECTIONS.fetch_sub(1, Ordering::SeqCst);
    }
}

// ───────────────────────────────────────────────────────────────
// ReqSocket
// ───────────────────────────────────────────────────────────────

/// Client REQ socket.
pub struct ReqSocket {
    state: SocketState,
    conn: Option<Connection>,
    decoder: FrameDecoder,
    outbound: Vec<u8>,
    /// Message parts of a reply still being assembled.
    parts: Vec<Frame>,
    awaiting_reply: bool,
    /// The peer shut down its side; frames already decoded are still
    /// delivered before `PeerClosed` surfaces.
    peer_eof: bool,
    connect_timeout: Duration,
}

impl Default for ReqSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl ReqSocket {
    pub fn new() -> Self {
        Self::with_connect_timeout(DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_connect_timeout(connect_timeout: Duration) -> Self {
        Self {
            state: SocketState::Closed,
            conn: None,
            decoder: FrameDecoder::new(),
            outbound: Vec::new(),
            parts: Vec::new(),
            awaiting_reply: false,
            peer_eof: false,
            connect_timeout,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SocketState {
        self.state
    }

    /// Whether the ZMTP handshake has completed.
    pub fn is_handshake_complete(&self) -> bool {
        self.state == SocketState::Open
    }

    fn open_stream(&self, endpoint: &Endpoint) -> Result<TcpStream, TransportError> {
        let addrs: Vec<SocketAddr> = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()
            .map_err(|_| TransportError::Resolve(endpoint.host.clone()))?
            .collect();
        if addrs.is_empty() {
            return Err(TransportError::Resolve(endpoint.host.clone()));
        }

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!("REQ: connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }
        Err(TransportError::Connect {
            endpoint: endpoint.to_string(),
            source: last_err.unwrap_or_else(|| io::Error::from(io::ErrorKind::NotFound)),
        })
    }

    /// Tear down after a fatal stream error and hand the error back.
    fn fail(&mut self, err: TransportError) -> TransportError {
        warn!("REQ: connection dropped: {}", err);
        self.close();
        err
    }

    /// Flush pending output and absorb pending input. Never blocks.
    fn pump(&mut self) -> Result<(), TransportError> {
        if self.peer_eof {
            if let Err(e) = self.advance_handshake() {
                return Err(self.fail(e));
            }
            return Ok(());
        }
        if let Err(e) = self.flush_outbound() {
            return Err(self.fail(e));
        }
        if let Err(e) = self.read_available() {
            return Err(self.fail(e));
        }
        if let Err(e) = self.advance_handshake() {
            return Err(self.fail(e));
        }
        // READY from the peer may have unlocked nothing new to write, but a
        // PONG queued while handling commands should go out promptly.
        if self.peer_eof {
            return Ok(());
        }
        if let Err(e) = self.flush_outbound() {
            return Err(self.fail(e));
        }
        Ok(())
    }

    fn flush_outbound(&mut self) -> Result<(), TransportError> {
        let conn = self.conn.as_mut().ok_or(TransportError::NotConnected)?;
        while !self.outbound.is_empty() {
            match conn.stream.write(&self.outbound) {
                Ok(0) => return Err(TransportError::PeerClosed),
                Ok(n) => {
                    self.outbound.drain(..n);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(TransportError::Io(e)),
            }
        }
        Ok(())
    }

    fn read_available(&mut self) -> Result<(), TransportError> {
        let conn = self.conn.as_mut().ok_or(TransportError::NotConnected)?;
        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            match conn.stream.read(&mut buf) {
                Ok(0) => {
                    debug!("REQ: peer sent EOF");
                    self.peer_eof = true;
                    return Ok(());
                }
                Ok(n) => {
                    trace!("REQ: read {} bytes", n);
                    self.decoder.feed(&buf[..n])?;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(TransportError::Io(e)),
            }
        }
    }

    fn advance_handshake(&mut self) -> Result<(), TransportError> {
        if self.state == SocketState::AwaitingGreeting {
            let Some(g) = self.decoder.take_greeting() else {
                return Ok(());
            };
            let peer = zmtp::parse_greeting(&g)?;
            debug!("REQ: peer greeting ZMTP {}.{}", peer.major, peer.minor);
            self.state = SocketState::AwaitingReady;
        }

        if self.state == SocketState::AwaitingReady {
            let Some(ready) = self.decoder.next_frame() else {
                return Ok(());
            };
            if let Some(reason) = zmtp::error_reason(&ready) {
                return Err(TransportError::Handshake(format!("peer sent ERROR: {reason}")));
            }
            let socket_type = zmtp::peer_socket_type(&ready)?;
            if !matches!(socket_type.as_str(), "REP" | "ROUTER") {
                return Err(TransportError::Handshake(format!(
                    "REQ cannot talk to a {socket_type} socket"
                )));
            }
            info!("REQ: handshake complete (peer {})", socket_type);
            self.state = SocketState::Open;
        }
        Ok(())
    }

    /// Handle a command frame received after the handshake.
    fn handle_command(&mut self, frame: &Frame) -> Result<(), TransportError> {
        match frame.command_name() {
            Some("PING") => {
                // PING data: 2-byte TTL, then the context PONG must echo.
                let context = frame.command_data().get(2..).unwrap_or(&[]);
                zmtp::encode_frame(&Frame::command("PONG", context), &mut self.outbound);
            }
            Some("ERROR") => {
                let reason = zmtp::error_reason(frame).unwrap_or_default();
                return Err(TransportError::Handshake(format!("peer sent ERROR: {reason}")));
            }
            name => debug!("REQ: ignoring command {:?}", name),
        }
        Ok(())
    }

    /// Assemble the next complete reply from decoded frames, answering
    /// commands on the way.
    fn next_reply(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        while let Some(frame) = self.decoder.next_frame() {
            if frame.is_command() {
                self.handle_command(&frame)?;
                continue;
            }
            let last = !frame.has_more();
            self.parts.push(frame);
            if !last {
                continue;
            }

            let parts = core::mem::take(&mut self.parts);
            if !self.awaiting_reply {
                warn!("REQ: dropping reply with no request outstanding");
                continue;
            }
            self.awaiting_reply = false;
            return Ok(Some(Self::unwrap_reply(parts)));
        }
        Ok(None)
    }

    /// Strip the REQ envelope (frames up to and including the empty
    /// delimiter) and join the remaining parts.
    fn unwrap_reply(parts: Vec<Frame>) -> Vec<u8> {
        let body_start = parts
            .iter()
            .position(|f| f.body.is_empty())
            .map_or(0, |i| i + 1);
        parts
            .into_iter()
            .skip(body_start)
            .flat_map(|f| f.body)
            .collect()
    }
}

// ───────────────────────────────────────────────────────────────
// Transport implementation
// ───────────────────────────────────────────────────────────────

impl Transport for ReqSocket {
    fn connect(&mut self, endpoint: &Endpoint) -> Result<(), TransportError> {
        self.close();

        let stream = self.open_stream(endpoint)?;
        let conn = Connection::new(stream);
        conn.stream.set_nodelay(true)?;
        conn.stream.set_nonblocking(true)?;

        self.outbound.extend_from_slice(&zmtp::greeting(false));
        zmtp::encode_frame(&Frame::ready("REQ"), &mut self.outbound);
        self.conn = Some(conn);
        self.state = SocketState::AwaitingGreeting;
        info!("REQ: connected to {}", endpoint);

        if let Err(e) = self.flush_outbound() {
            return Err(self.fail(e));
        }
        Ok(())
    }

    fn send(&mut self, message: &[u8]) -> Result<(), TransportError> {
        if self.conn.is_none() {
            return Err(TransportError::NotConnected);
        }
        if self.awaiting_reply {
            return Err(TransportError::Alternation);
        }
        if self.peer_eof {
            return Err(self.fail(TransportError::PeerClosed));
        }

        zmtp::encode_frame(&Frame::delimiter(), &mut self.outbound);
        zmtp::encode_frame(&Frame::message(message.to_vec(), false), &mut self.outbound);
        self.awaiting_reply = true;
        trace!("REQ: queued {} byte request", message.len());

        self.pump()?;
        if self.peer_eof {
            // Nobody is left to answer.
            return Err(self.fail(TransportError::PeerClosed));
        }
        Ok(())
    }

    fn try_recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        if self.conn.is_none() {
            return Err(TransportError::NotConnected);
        }
        self.pump()?;
        if self.state == SocketState::Open {
            match self.next_reply() {
                Ok(Some(reply)) => return Ok(Some(reply)),
                Ok(None) => {}
                Err(e) => return Err(self.fail(e)),
            }
        }
        if self.peer_eof {
            return Err(self.fail(TransportError::PeerClosed));
        }

        if !self.outbound.is_empty() {
            if let Err(e) = self.flush_outbound() {
                return Err(self.fail(e));
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        if self.conn.take().is_some() {
            info!("REQ: connection closed");
        }
        self.state = SocketState::Closed;
        self.decoder.reset();
        self.outbound.clear();
        self.parts.clear();
        self.awaiting_reply = false;
        self.peer_eof = false;
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────

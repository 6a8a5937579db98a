//! Session state machine.
//!
//! One session owns one transport and admits at most one outstanding
//! request. The lifecycle is a closed three-state machine:
//!
//! ```text
//!            submit()                poll() -> reply
//!   Ready ──────────────▶ RequestSent ──────────────▶ ResponseReady
//!     ▲                        │                            │
//!     │        cancel()        │                            │
//!     ├────────────────────────┘                            │
//!     │          take_*() (decode ok) / discard_reply()     │
//!     └─────────────────────────────────────────────────────┘
//! ```
//!
//! `submit` is only legal from `Ready`; the `take_*` getters only from
//! `ResponseReady`. Every violation is returned as a
//! [`ProtocolError`] and leaves the state untouched.

use core::future::Future;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use super::codec;
use super::message::{QueryMessage, Request, RequestType, TrialConfig};
use super::transport::{Endpoint, Transport};
use crate::error::{ClientError, CodecError, ProtocolError, Result};

// ═══════════════════════════════════════════════════════════════
//  Status
// ═══════════════════════════════════════════════════════════════

/// Host-visible session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// No request outstanding; a new request may be sent.
    Ready,
    /// A request is on the wire and its reply has not arrived.
    RequestSent,
    /// The reply has arrived and is waiting for a typed getter.
    ResponseReady,
}

/// Internal state. Carries exactly the data each state owns, so a
/// pending reply cannot exist outside `ResponseReady`.
#[derive(Debug)]
enum SessionState {
    Ready,
    RequestSent { kind: RequestType, sent_at: Instant },
    ResponseReady { kind: RequestType, reply: Vec<u8> },
}

impl SessionState {
    fn status(&self) -> Status {
        match self {
            Self::Ready => Status::Ready,
            Self::RequestSent { .. } => Status::RequestSent,
            Self::ResponseReady { .. } => Status::ResponseReady,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Session
// ═══════════════════════════════════════════════════════════════

/// Client side of one logical connection to the optimization server.
pub struct Session<T: Transport> {
    transport: T,
    endpoint: Endpoint,
    state: SessionState,
    current_strategy: Option<i64>,
    base_config: Option<TrialConfig>,
    finished: bool,
    declared: Option<Vec<String>>,
}

impl<T: Transport> Session<T> {
    /// Wrap a transport without connecting it.
    pub fn new(transport: T, endpoint: Endpoint) -> Self {
        Self {
            transport,
            endpoint,
            state: SessionState::Ready,
            current_strategy: None,
            base_config: None,
            finished: false,
            declared: None,
        }
    }

    /// Wrap a transport and connect it to `endpoint`.
    pub fn connect_to(transport: T, endpoint: Endpoint) -> Result<Self> {
        let mut session = Self::new(transport, endpoint);
        session.connect()?;
        Ok(session)
    }

    /// (Re)connect to the configured endpoint. Any existing connection is
    /// closed first and any in-flight exchange is discarded.
    pub fn connect(&mut self) -> Result<()> {
        self.close();
        self.transport.connect(&self.endpoint)?;
        info!("Session: connected to {}", self.endpoint);
        Ok(())
    }

    /// Close the connection. Idempotent.
    pub fn close(&mut self) {
        if let SessionState::RequestSent { kind, .. } = self.state {
            warn!("Session: closing with a {} request in flight", kind);
        }
        self.transport.close();
        self.state = SessionState::Ready;
    }

    /// Abandon the current exchange and reconnect.
    ///
    /// A sent request cannot be recalled, so the only way to get back in
    /// step with the server is a fresh connection.
    pub fn cancel(&mut self) -> Result<()> {
        match self.state {
            SessionState::Ready => debug!("Session: cancel with nothing pending"),
            SessionState::RequestSent { kind, .. } | SessionState::ResponseReady { kind, .. } => {
                info!("Session: cancelling {} exchange", kind);
            }
        }
        self.connect()
    }

    pub fn status(&self) -> Status {
        self.state.status()
    }

    /// True iff a request is awaiting its reply.
    pub fn is_busy(&self) -> bool {
        matches!(self.state, SessionState::RequestSent { .. })
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Point future (re)connects at a different server.
    pub fn set_endpoint(&mut self, endpoint: Endpoint) {
        self.endpoint = endpoint;
    }

    /// Strategy id from the last setup/resume exchange.
    pub fn current_strategy(&self) -> Option<i64> {
        self.current_strategy
    }

    /// Last trial configuration decoded from a reply.
    pub fn base_config(&self) -> Option<&TrialConfig> {
        self.base_config.as_ref()
    }

    /// Sticky end-of-experiment flag.
    pub fn finished(&self) -> bool {
        self.finished
    }

    /// Parameter names from the last `parameters` reply.
    pub fn declared_parameters(&self) -> Option<&[String]> {
        self.declared.as_deref()
    }

    /// Kind of the request currently sent or answered, if any.
    pub fn pending_kind(&self) -> Option<RequestType> {
        match self.state {
            SessionState::Ready => None,
            SessionState::RequestSent { kind, .. } | SessionState::ResponseReady { kind, .. } => {
                Some(kind)
            }
        }
    }

    /// When the outstanding request was sent, `None` unless `RequestSent`.
    pub fn sent_at(&self) -> Option<Instant> {
        match self.state {
            SessionState::RequestSent { sent_at, .. } => Some(sent_at),
            _ => None,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    // ── Request side ─────────────────────────────────────────

    /// Reject a new request unless the session is `Ready`.
    pub(crate) fn ensure_ready(&self) -> Result<()> {
        let err = match self.state {
            SessionState::Ready => return Ok(()),
            SessionState::RequestSent { kind, .. } => ProtocolError::RequestInFlight { pending: kind },
            SessionState::ResponseReady { kind, .. } => ProtocolError::UnconsumedReply { kind },
        };
        warn!("Session: request rejected: {}", err);
        Err(err.into())
    }

    /// Encode and send one request, moving to `RequestSent`.
    ///
    /// On any failure the session stays `Ready`.
    pub fn submit(&mut self, request: &Request) -> Result<()> {
        self.ensure_ready()?;
        let kind = request.kind();
        let bytes = codec::encode_request(request)?;
        trace!("Session: >> {}", String::from_utf8_lossy(&bytes));

        self.transport.send(&bytes)?;
        debug!("Session: sent {} request ({} bytes)", kind, bytes.len());
        self.state = SessionState::RequestSent {
            kind,
            sent_at: Instant::now(),
        };
        Ok(())
    }

    // ── Reply side ───────────────────────────────────────────

    /// Advance the session by at most one non-blocking receive attempt.
    ///
    /// No-op unless a request is outstanding. A transport error is
    /// returned as-is and the session stays `RequestSent`.
    pub fn poll(&mut self) -> Result<Status> {
        let SessionState::RequestSent { kind, sent_at } = self.state else {
            return Ok(self.status());
        };
        if let Some(reply) = self.transport.try_recv()? {
            debug!(
                "Session: {} reply ({} bytes) after {:?}",
                kind,
                reply.len(),
                sent_at.elapsed()
            );
            trace!("Session: << {}", String::from_utf8_lossy(&reply));
            self.state = SessionState::ResponseReady { kind, reply };
        }
        Ok(self.status())
    }

    /// Decode the pending reply with `decode`. The reply is consumed
    /// only when decoding succeeds.
    fn take_with<R>(
        &mut self,
        decode: impl FnOnce(&[u8]) -> core::result::Result<R, CodecError>,
    ) -> Result<(RequestType, R)> {
        let SessionState::ResponseReady { kind, reply } = &self.state else {
            let err = ProtocolError::NoReply {
                status: self.status(),
            };
            warn!("Session: getter rejected: {}", err);
            return Err(err.into());
        };
        let kind = *kind;
        let value = decode(reply)?;
        self.state = SessionState::Ready;
        Ok((kind, value))
    }

    /// Read the pending reply as a trial configuration (reply to setup's
    /// follow-ups, `ask`, `tell` and `parameters`).
    ///
    /// Updates `base_config`; updates `finished` only when the reply
    /// carries the reserved key; records the declared parameter names
    /// when answering `parameters`.
    pub fn take_config(&mut self) -> Result<TrialConfig> {
        let (kind, config) = self.take_with(codec::decode_trial_config)?;
        if let Some(done) = config.finished_flag() {
            if done && !self.finished {
                info!("Session: server reports experiment finished");
            }
            self.finished = done;
        }
        if kind == RequestType::Parameters {
            let names = config.parameter_names();
            debug!("Session: server declared parameters {:?}", names);
            self.declared = Some(names);
        }
        self.base_config = Some(config.clone());
        Ok(config)
    }

    /// Read the pending reply as a strategy id (reply to `setup` and
    /// `resume`).
    pub fn take_strategy(&mut self) -> Result<i64> {
        let (_, id) = self.take_with(codec::decode_integer)?;
        self.current_strategy = Some(id);
        Ok(id)
    }

    /// Read the pending reply as a query result.
    pub fn take_query_response(&mut self) -> Result<QueryMessage> {
        self.take_with(codec::decode_query_message)
            .map(|(_, message)| message)
    }

    /// Drop an unconsumed reply without decoding it.
    pub fn discard_reply(&mut self) -> Result<()> {
        self.take_with(|_| Ok(())).map(|(kind, ())| {
            debug!("Session: discarded {} reply", kind);
        })
    }

    // ── Waiting ──────────────────────────────────────────────

    /// Poll until the session leaves `RequestSent`, awaiting `step`
    /// between attempts so the host's executor keeps running.
    pub async fn wait_ready<F, Fut>(&mut self, mut step: F) -> Result<Status>
    where
        F: FnMut() -> Fut,
        Fut: Future,
    {
        loop {
            let status = self.poll()?;
            if status != Status::RequestSent {
                return Ok(status);
            }
            step().await;
        }
    }

    /// [`wait_ready`](Self::wait_ready) bounded by `deadline`.
    ///
    /// On expiry the request stays outstanding; the caller chooses
    /// between waiting again and [`cancel`](Self::cancel).
    pub async fn wait_ready_within<F, Fut>(&mut self, deadline: Duration, mut step: F) -> Result<Status>
    where
        F: FnMut() -> Fut,
        Fut: Future,
    {
        let started = Instant::now();
        loop {
            let status = self.poll()?;
            let SessionState::RequestSent { kind, .. } = self.state else {
                return Ok(status);
            };
            let waited = started.elapsed();
            if waited >= deadline {
                warn!("Session: {} reply not received within {:?}", kind, deadline);
                return Err(ClientError::DeadlineExceeded { kind, waited });
            }
            step().await;
        }
    }

    /// Wait using a timer between polls, optionally bounded.
    pub async fn wait_ready_paced(
        &mut self,
        interval: Duration,
        deadline: Option<Duration>,
    ) -> Result<Status> {
        let step = || async_io_mini::Timer::after(interval);
        match deadline {
            Some(d) => self.wait_ready_within(d, step).await,
            None => self.wait_ready(step).await,
        }
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        self.transport.close();
    }
}

//! Tick-driven polling driver.
//!
//! For hosts that run a frame or event loop instead of an async
//! executor. The host calls [`PollDriver::tick`] once per loop turn; the
//! driver advances the session by at most one receive attempt and
//! notifies a [`ReplyDelegate`] when the reply lands or the tick budget
//! runs out.
//!
//! ```text
//!   host loop ──tick()──▶ PollDriver ──poll()──▶ Session ──try_recv()──▶ Transport
//!                             │
//!                             ▼
//!                       ReplyDelegate
//!              on_reply_ready / on_deadline
//! ```

use std::time::Instant;

use log::{debug, warn};

use crate::error::{ClientError, Result};
use crate::rpc::message::RequestType;
use crate::rpc::session::{Session, Status};
use crate::rpc::transport::Transport;

/// Receives completion notifications from [`PollDriver::tick`].
pub trait ReplyDelegate {
    /// The reply to a `kind` request is ready for its getter.
    fn on_reply_ready(&mut self, kind: RequestType);

    /// `ticks` ticks passed without a reply to a `kind` request.
    fn on_deadline(&mut self, kind: RequestType, ticks: u32) {
        let _ = (kind, ticks);
    }
}

/// Outcome of one [`PollDriver::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing outstanding.
    Idle,
    /// Still waiting.
    Pending,
    /// The reply arrived on this tick.
    Completed(RequestType),
}

/// Counts ticks spent waiting on the current request.
#[derive(Debug, Default)]
pub struct PollDriver {
    /// Give up after this many ticks without a reply.
    deadline_ticks: Option<u32>,
    waited_ticks: u32,
    /// The request the tick count belongs to.
    tracking: Option<(RequestType, Instant)>,
    tick_interval: Option<core::time::Duration>,
}

impl PollDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a deadline once `ticks` ticks pass without a reply.
    #[must_use]
    pub fn with_deadline_ticks(mut self, ticks: u32) -> Self {
        self.deadline_ticks = Some(ticks);
        self
    }

    /// Nominal tick length, used only to report wall-clock waits.
    #[must_use]
    pub fn with_tick_interval(mut self, interval: core::time::Duration) -> Self {
        self.tick_interval = Some(interval);
        self
    }

    /// Ticks spent on the current request so far.
    pub fn waited_ticks(&self) -> u32 {
        self.waited_ticks
    }

    /// Advance the session by one step. Never blocks.
    pub fn tick<T: Transport>(
        &mut self,
        session: &mut Session<T>,
        delegate: &mut dyn ReplyDelegate,
    ) -> Result<TickOutcome> {
        let (Some(kind), Some(sent_at)) = (session.pending_kind(), session.sent_at()) else {
            self.waited_ticks = 0;
            self.tracking = None;
            return Ok(TickOutcome::Idle);
        };
        if self.tracking != Some((kind, sent_at)) {
            // A new request, possibly issued after a cancel between ticks.
            self.tracking = Some((kind, sent_at));
            self.waited_ticks = 0;
        }

        if session.poll()? == Status::ResponseReady {
            debug!("PollDriver: {} reply after {} ticks", kind, self.waited_ticks);
            self.waited_ticks = 0;
            delegate.on_reply_ready(kind);
            return Ok(TickOutcome::Completed(kind));
        }

        self.waited_ticks = self.waited_ticks.saturating_add(1);
        if let Some(limit) = self.deadline_ticks {
            if self.waited_ticks >= limit {
                warn!("PollDriver: no {} reply after {} ticks", kind, self.waited_ticks);
                delegate.on_deadline(kind, self.waited_ticks);
                let waited = self
                    .tick_interval
                    .map(|i| i * self.waited_ticks)
                    .unwrap_or_default();
                self.waited_ticks = 0;
                return Err(ClientError::DeadlineExceeded { kind, waited });
            }
        }
        Ok(TickOutcome::Pending)
    }
}

//! AEPsych client library.
//!
//! Drives an adaptive experiment on a remote AEPsych optimization server
//! over a ZeroMQ request/reply connection without blocking the host's
//! loop. The [`Session`] state machine admits one outstanding request at
//! a time; hosts advance it either from an async task
//! ([`Session::wait_ready`]) or once per frame ([`PollDriver::tick`]).
//!
//! ```no_run
//! use aepsych_client::{ReqSocket, Session, Endpoint};
//!
//! # fn main() -> aepsych_client::Result<()> {
//! let mut session = Session::new(ReqSocket::new(), Endpoint::default());
//! session.setup("[common]\nparnames = [x]\n")?;
//! futures_lite::future::block_on(session.wait_ready(futures_lite::future::yield_now))?;
//! let strategy = session.take_strategy()?;
//! # let _ = strategy;
//! # Ok(())
//! # }
//! ```

#![deny(unused_must_use)]

pub mod adapters;
pub mod config;
pub mod driver;
pub mod error;
pub mod rpc;

// Pulls in the host time driver (`_embassy_time_now`, `_embassy_time_schedule_wake`)
// that `async_io_mini::Timer` links against.
use embassy_time as _;
use critical_section as _;

pub use adapters::req_socket::{open_connections, ReqSocket};
pub use config::ClientConfig;
pub use driver::{PollDriver, ReplyDelegate, TickOutcome};
pub use error::{ClientError, CodecError, ConfigError, ProtocolError, Result, TransportError};
pub use rpc::message::{QueryMessage, QueryType, Request, RequestType, TrialConfig};
pub use rpc::session::{Session, Status};
pub use rpc::transport::{Endpoint, Transport};

//! Client-side RPC subsystem.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      RPC Stack                             │
//! │                                                            │
//! │  ┌───────────┐   ┌──────────┐   ┌───────────────────────┐  │
//! │  │  client   │──▶│  codec   │──▶│  Transport (trait)    │  │
//! │  │ (builders)│   │  (JSON)  │   │  → ReqSocket / mock   │  │
//! │  └───────────┘   └──────────┘   └───────────┬───────────┘  │
//! │        │                                    │              │
//! │        ▼                                    ▼              │
//! │  ┌────────────────────────────┐       ┌──────────┐         │
//! │  │  session (state machine)   │◀──────│   zmtp   │         │
//! │  │  Ready → Sent → Response   │ poll  │ (framing)│         │
//! │  └────────────────────────────┘       └──────────┘         │
//! └────────────────────────────────────────────────────────────┘
//! ```

pub mod client;
pub mod codec;
pub mod message;
pub mod session;
pub mod transport;
pub mod zmtp;

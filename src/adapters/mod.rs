//! Adapters: concrete implementations of the port traits.
//!
//! | Adapter      | Implements | Connects to                 |
//! |--------------|------------|-----------------------------|
//! | `req_socket` | Transport  | ZeroMQ REP server (ZMTP 3.0)|

pub mod req_socket;

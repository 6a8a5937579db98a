//! Scripted transport for integration tests.
//!
//! Records every request and hands out queued replies one `try_recv`
//! at a time, so tests control exactly when a reply "arrives".

#![allow(dead_code)]

use std::collections::VecDeque;

use aepsych_client::rpc::codec::decode_request;
use aepsych_client::{Endpoint, Request, Transport, TransportError};

/// What the next `try_recv` returns.
#[derive(Debug)]
pub enum Step {
    /// Nothing yet.
    Pending,
    /// A complete reply.
    Reply(Vec<u8>),
    /// The connection broke.
    Fail,
}

#[derive(Default)]
pub struct ScriptedTransport {
    pub connected: bool,
    pub connects: usize,
    pub closes: usize,
    pub sent: Vec<Vec<u8>>,
    pub script: VecDeque<Step>,
    pub fail_next_send: bool,
    pub endpoints: Vec<Endpoint>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(&mut self, body: &str) {
        self.script.push_back(Step::Reply(body.as_bytes().to_vec()));
    }

    pub fn pending(&mut self, polls: usize) {
        for _ in 0..polls {
            self.script.push_back(Step::Pending);
        }
    }

    pub fn fail(&mut self) {
        self.script.push_back(Step::Fail);
    }

    /// Requests sent so far, decoded.
    pub fn requests(&self) -> Vec<Request> {
        self.sent
            .iter()
            .map(|b| decode_request(b).expect("client sent a malformed envelope"))
            .collect()
    }

    pub fn last_request(&self) -> Option<Request> {
        self.requests().pop()
    }
}

impl Transport for ScriptedTransport {
    fn connect(&mut self, endpoint: &Endpoint) -> Result<(), TransportError> {
        self.connected = true;
        self.connects += 1;
        self.endpoints.push(endpoint.clone());
        Ok(())
    }

    fn send(&mut self, message: &[u8]) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        if std::mem::take(&mut self.fail_next_send) {
            return Err(TransportError::PeerClosed);
        }
        self.sent.push(message.to_vec());
        Ok(())
    }

    fn try_recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        match self.script.pop_front() {
            None | Some(Step::Pending) => Ok(None),
            Some(Step::Reply(bytes)) => Ok(Some(bytes)),
            Some(Step::Fail) => Err(TransportError::PeerClosed),
        }
    }

    fn close(&mut self) {
        if self.connected {
            self.closes += 1;
        }
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

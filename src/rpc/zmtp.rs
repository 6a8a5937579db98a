//! ZMTP 3.0 framing (NULL mechanism).
//!
//! Stream layout:
//! ```text
//! ┌──────────────────┬───────────────┬─────────┬─────────┬───
//! │ Greeting (64 B)  │ READY command │ frame   │ frame   │ ...
//! └──────────────────┴───────────────┴─────────┴─────────┴───
//!
//! frame:
//! ┌───────────┬──────────────────────────┬──────────────┐
//! │ flags (1B)│ size: 1B, or 8B BE (LONG)│ body (size B)│
//! └───────────┴──────────────────────────┴──────────────┘
//! flags: 0x01 MORE · 0x02 LONG · 0x04 COMMAND
//! ```
//!
//! The decoder accumulates incoming bytes and yields complete frames.
//! A single socket read may return part of the greeting, part of a size
//! field, or several frames at once; all of that is handled here so the
//! socket adapter only ever sees whole frames.

use std::collections::VecDeque;

use crate::error::TransportError;

/// Greeting length in bytes.
pub const GREETING_LEN: usize = 64;

/// Largest accepted frame body (guards against memory exhaustion).
pub const MAX_FRAME_SIZE: u64 = 64 * 1024 * 1024;

pub const FLAG_MORE: u8 = 0x01;
pub const FLAG_LONG: u8 = 0x02;
pub const FLAG_COMMAND: u8 = 0x04;
const FLAG_RESERVED: u8 = !(FLAG_MORE | FLAG_LONG | FLAG_COMMAND);

const MECHANISM_NULL: &[u8] = b"NULL";

// ═══════════════════════════════════════════════════════════════
//  Greeting
// ═══════════════════════════════════════════════════════════════

/// Our greeting: version 3.0, NULL mechanism, `as-server` set for the REP side.
pub fn greeting(as_server: bool) -> [u8; GREETING_LEN] {
    let mut g = [0u8; GREETING_LEN];
    g[0] = 0xFF;
    g[9] = 0x7F;
    g[10] = 3;
    g[11] = 0;
    g[12..12 + MECHANISM_NULL.len()].copy_from_slice(MECHANISM_NULL);
    g[32] = u8::from(as_server);
    g
}

/// The fields of a peer greeting we care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub major: u8,
    pub minor: u8,
    pub as_server: bool,
}

/// Validate a peer greeting.
pub fn parse_greeting(g: &[u8; GREETING_LEN]) -> Result<Greeting, TransportError> {
    if g[0] != 0xFF || g[9] & 0x01 == 0 {
        return Err(TransportError::Handshake("bad greeting signature".into()));
    }
    let major = g[10];
    if major < 3 {
        return Err(TransportError::Handshake(format!(
            "unsupported ZMTP version {major}.{}",
            g[11]
        )));
    }
    let mechanism = &g[12..32];
    let end = mechanism.iter().position(|b| *b == 0).unwrap_or(mechanism.len());
    if &mechanism[..end] != MECHANISM_NULL {
        return Err(TransportError::Handshake(format!(
            "unsupported security mechanism '{}'",
            String::from_utf8_lossy(&mechanism[..end])
        )));
    }
    Ok(Greeting {
        major,
        minor: g[11],
        as_server: g[32] != 0,
    })
}

// ═══════════════════════════════════════════════════════════════
//  Frames
// ═══════════════════════════════════════════════════════════════

/// One ZMTP frame. `flags` never carries `FLAG_LONG`; the encoder picks
/// the size width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub flags: u8,
    pub body: Vec<u8>,
}

impl Frame {
    /// A message frame; `more` marks it as not the last part.
    pub fn message(body: Vec<u8>, more: bool) -> Self {
        Self {
            flags: if more { FLAG_MORE } else { 0 },
            body,
        }
    }

    /// The empty delimiter that opens every REQ/REP envelope.
    pub fn delimiter() -> Self {
        Self::message(Vec::new(), true)
    }

    /// A command frame: `name-size | name | data`.
    pub fn command(name: &str, data: &[u8]) -> Self {
        let mut body = Vec::with_capacity(1 + name.len() + data.len());
        body.push(name.len() as u8);
        body.extend_from_slice(name.as_bytes());
        body.extend_from_slice(data);
        Self {
            flags: FLAG_COMMAND,
            body,
        }
    }

    /// `READY` announcing our socket type.
    pub fn ready(socket_type: &str) -> Self {
        let mut data = Vec::new();
        push_property(&mut data, "Socket-Type", socket_type.as_bytes());
        Self::command("READY", &data)
    }

    pub fn is_command(&self) -> bool {
        self.flags & FLAG_COMMAND != 0
    }

    pub fn has_more(&self) -> bool {
        self.flags & FLAG_MORE != 0
    }

    /// Command name, if this is a well-formed command frame.
    pub fn command_name(&self) -> Option<&str> {
        if !self.is_command() {
            return None;
        }
        let n = *self.body.first()? as usize;
        core::str::from_utf8(self.body.get(1..1 + n)?).ok()
    }

    /// Command payload after the name.
    pub fn command_data(&self) -> &[u8] {
        let n = self.body.first().map_or(0, |n| *n as usize);
        self.body.get(1 + n..).unwrap_or(&[])
    }
}

/// Append `frame` to `out` in wire form.
pub fn encode_frame(frame: &Frame, out: &mut Vec<u8>) {
    let flags = frame.flags & !FLAG_LONG;
    let len = frame.body.len();
    if len > usize::from(u8::MAX) {
        out.push(flags | FLAG_LONG);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    } else {
        out.push(flags);
        out.push(len as u8);
    }
    out.extend_from_slice(&frame.body);
}

fn push_property(out: &mut Vec<u8>, name: &str, value: &[u8]) {
    out.push(name.len() as u8);
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(&(value.len() as u32).to_be_bytes());
    out.extend_from_slice(value);
}

/// Parse READY metadata into `(name, value)` pairs.
pub fn parse_properties(mut data: &[u8]) -> Result<Vec<(String, Vec<u8>)>, TransportError> {
    let truncated = || TransportError::Malformed("truncated READY metadata".into());
    let mut props = Vec::new();
    while !data.is_empty() {
        let name_len = data[0] as usize;
        let name = data.get(1..1 + name_len).ok_or_else(truncated)?;
        let rest = &data[1 + name_len..];
        let size_bytes: [u8; 4] = rest
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(truncated)?;
        let value_len = u32::from_be_bytes(size_bytes) as usize;
        let value = rest.get(4..4 + value_len).ok_or_else(truncated)?;
        props.push((String::from_utf8_lossy(name).into_owned(), value.to_vec()));
        data = &rest[4 + value_len..];
    }
    Ok(props)
}

/// Socket type advertised in a READY command (property names are
/// case-insensitive).
pub fn peer_socket_type(ready: &Frame) -> Result<String, TransportError> {
    if ready.command_name() != Some("READY") {
        return Err(TransportError::Handshake(format!(
            "expected READY, got {:?}",
            ready.command_name()
        )));
    }
    parse_properties(ready.command_data())?
        .into_iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("Socket-Type"))
        .map(|(_, v)| String::from_utf8_lossy(&v).into_owned())
        .ok_or_else(|| TransportError::Handshake("READY without Socket-Type".into()))
}

/// Reason text of an `ERROR` command, `None` for any other frame.
pub fn error_reason(frame: &Frame) -> Option<String> {
    if frame.command_name() != Some("ERROR") {
        return None;
    }
    let data = frame.command_data();
    let n = data.first().map_or(0, |n| *n as usize);
    let reason = data.get(1..).map_or(&[][..], |rest| &rest[..n.min(rest.len())]);
    Some(String::from_utf8_lossy(reason).into_owned())
}

// ═══════════════════════════════════════════════════════════════
//  Streaming decoder
// ═══════════════════════════════════════════════════════════════

/// Decoder state machine.
enum DecoderState {
    /// Collecting the 64-byte greeting.
    Greeting { collected: usize },
    /// Waiting for a flags byte.
    Flags,
    /// Collecting a 1- or 8-byte size field.
    Size {
        flags: u8,
        width: usize,
        collected: usize,
    },
    /// Size known, collecting the body.
    Body { flags: u8, expected: usize },
}

/// Streaming frame decoder.
pub struct FrameDecoder {
    state: DecoderState,
    greeting_buf: [u8; GREETING_LEN],
    greeting: Option<[u8; GREETING_LEN]>,
    size_buf: [u8; 8],
    body: Vec<u8>,
    frames: VecDeque<Frame>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Decoder for a fresh connection: greeting first, then frames.
    pub fn new() -> Self {
        Self::starting_in(DecoderState::Greeting { collected: 0 })
    }

    /// Decoder for a stream positioned after the greeting.
    pub fn frames_only() -> Self {
        Self::starting_in(DecoderState::Flags)
    }

    fn starting_in(state: DecoderState) -> Self {
        Self {
            state,
            greeting_buf: [0; GREETING_LEN],
            greeting: None,
            size_buf: [0; 8],
            body: Vec::new(),
            frames: VecDeque::new(),
        }
    }

    /// Feed bytes into the decoder. Complete frames are queued for
    /// [`next_frame`](Self::next_frame).
    pub fn feed(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut offset = 0;

        while offset < data.len() {
            match &mut self.state {
                DecoderState::Greeting { collected } => {
                    let to_copy = (GREETING_LEN - *collected).min(data.len() - offset);
                    self.greeting_buf[*collected..*collected + to_copy]
                        .copy_from_slice(&data[offset..offset + to_copy]);
                    *collected += to_copy;
                    offset += to_copy;

                    if *collected == GREETING_LEN {
                        self.greeting = Some(self.greeting_buf);
                        self.state = DecoderState::Flags;
                    }
                }

                DecoderState::Flags => {
                    let flags = data[offset];
                    offset += 1;
                    if flags & FLAG_RESERVED != 0 {
                        return Err(TransportError::Malformed(format!(
                            "reserved flag bits set: {flags:#04x}"
                        )));
                    }
                    let width = if flags & FLAG_LONG != 0 { 8 } else { 1 };
                    self.state = DecoderState::Size {
                        flags: flags & !FLAG_LONG,
                        width,
                        collected: 0,
                    };
                }

                DecoderState::Size {
                    flags,
                    width,
                    collected,
                } => {
                    let to_copy = (*width - *collected).min(data.len() - offset);
                    self.size_buf[*collected..*collected + to_copy]
                        .copy_from_slice(&data[offset..offset + to_copy]);
                    *collected += to_copy;
                    offset += to_copy;

                    if *collected == *width {
                        let len = if *width == 1 {
                            u64::from(self.size_buf[0])
                        } else {
                            u64::from_be_bytes(self.size_buf)
                        };
                        if len > MAX_FRAME_SIZE {
                            return Err(TransportError::FrameTooLarge {
                                len,
                                max: MAX_FRAME_SIZE,
                            });
                        }
                        let flags = *flags;
                        if len == 0 {
                            self.frames.push_back(Frame {
                                flags,
                                body: Vec::new(),
                            });
                            self.state = DecoderState::Flags;
                        } else {
                            let expected = len as usize;
                            self.body = Vec::with_capacity(expected.min(64 * 1024));
                            self.state = DecoderState::Body { flags, expected };
                        }
                    }
                }

                DecoderState::Body { flags, expected } => {
                    let to_copy = (*expected - self.body.len()).min(data.len() - offset);
                    self.body.extend_from_slice(&data[offset..offset + to_copy]);
                    offset += to_copy;

                    if self.body.len() == *expected {
                        let flags = *flags;
                        let body = core::mem::take(&mut self.body);
                        self.frames.push_back(Frame { flags, body });
                        self.state = DecoderState::Flags;
                    }
                }
            }
        }

        Ok(())
    }

    /// Take the peer greeting once it has fully arrived.
    pub fn take_greeting(&mut self) -> Option<[u8; GREETING_LEN]> {
        self.greeting.take()
    }

    /// Pop the next complete frame.
    pub fn next_frame(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    /// Reset to expect a greeting (e.g. after a reconnect).
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

//! JSON envelope codec.
//!
//! Request wire format (field names and tags are a frozen contract with
//! the server):
//! ```text
//! {
//!   "message": <payload or "">,
//!   "type":    "setup" | "ask" | "tell" | "resume" | "query" | "parameters",
//!   "version": "<string>"            // setup and resume only
//! }
//! ```
//!
//! Replies carry no kind tag. The three `decode_*` functions are the only
//! legal ways to read one, and the caller picks the function that matches
//! the request it sent:
//!
//! | request                         | decoder                  |
//! |---------------------------------|--------------------------|
//! | setup, ask, tell, parameters    | [`decode_trial_config`]  |
//! | resume (and setup's strategy id)| [`decode_integer`]       |
//! | query                           | [`decode_query_message`] |

use serde::{Deserialize, Serialize};

use super::message::{QueryMessage, Request, RequestType, TrialConfig};
use crate::error::CodecError;

// ── Encoding ─────────────────────────────────────────────────

#[derive(Serialize)]
struct Envelope<'a> {
    message: Payload<'a>,
    #[serde(rename = "type")]
    kind: RequestType,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Payload<'a> {
    Empty(&'static str),
    Setup { config_str: &'a str },
    Tell { config: &'a TrialConfig, outcome: i64 },
    Resume { strat_id: i64 },
    Query(&'a QueryMessage),
}

impl<'a> From<&'a Request> for Envelope<'a> {
    fn from(req: &'a Request) -> Self {
        let message = match req {
            Request::Setup { config_str, .. } => Payload::Setup { config_str },
            Request::Ask | Request::Parameters => Payload::Empty(""),
            Request::Tell { config, outcome } => Payload::Tell {
                config,
                outcome: *outcome,
            },
            Request::Resume { strat_id, .. } => Payload::Resume {
                strat_id: *strat_id,
            },
            Request::Query(q) => Payload::Query(q),
        };
        Self {
            message,
            kind: req.kind(),
            version: req.version(),
        }
    }
}

/// Serialize a request into its wire envelope.
pub fn encode_request(req: &Request) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(&Envelope::from(req)).map_err(CodecError::Encode)
}

// ── Request decoding (server view) ───────────────────────────

#[derive(Deserialize)]
struct RawEnvelope {
    message: serde_json::Value,
    #[serde(rename = "type")]
    kind: RequestType,
    #[serde(default)]
    version: Option<String>,
}

#[derive(Deserialize)]
struct SetupBody {
    config_str: String,
}

#[derive(Deserialize)]
struct TellBody {
    config: TrialConfig,
    outcome: i64,
}

#[derive(Deserialize)]
struct ResumeBody {
    strat_id: i64,
}

/// Parse a request envelope back into a typed [`Request`].
///
/// This is the server's side of the contract; the client uses it for
/// its in-process test peer.
pub fn decode_request(bytes: &[u8]) -> Result<Request, CodecError> {
    let raw: RawEnvelope = decode_as(bytes, "request envelope")?;
    let body = raw.message;

    let req = match raw.kind {
        RequestType::Setup => {
            let b: SetupBody = body_as(body, "setup payload")?;
            Request::Setup {
                config_str: b.config_str,
                version: require_version(raw.version, raw.kind)?,
            }
        }
        RequestType::Resume => {
            let b: ResumeBody = body_as(body, "resume payload")?;
            Request::Resume {
                strat_id: b.strat_id,
                version: require_version(raw.version, raw.kind)?,
            }
        }
        RequestType::Tell => {
            let b: TellBody = body_as(body, "tell payload")?;
            Request::Tell {
                config: b.config,
                outcome: b.outcome,
            }
        }
        RequestType::Query => Request::Query(body_as(body, "query payload")?),
        RequestType::Ask | RequestType::Parameters => {
            if body.as_str() != Some("") {
                return Err(CodecError::InvalidRequest(format!(
                    "{} payload must be an empty string",
                    raw.kind
                )));
            }
            if raw.kind == RequestType::Ask {
                Request::Ask
            } else {
                Request::Parameters
            }
        }
    };
    Ok(req)
}

fn require_version(version: Option<String>, kind: RequestType) -> Result<String, CodecError> {
    version.ok_or_else(|| CodecError::InvalidRequest(format!("{kind} envelope without version")))
}

fn body_as<T: serde::de::DeserializeOwned>(
    body: serde_json::Value,
    expected: &'static str,
) -> Result<T, CodecError> {
    serde_json::from_value(body).map_err(|source| CodecError::Decode { expected, source })
}

// ── Reply decoding (call-site directed) ──────────────────────

fn decode_as<'a, T: Deserialize<'a>>(bytes: &'a [u8], expected: &'static str) -> Result<T, CodecError> {
    serde_json::from_slice(bytes).map_err(|source| CodecError::Decode { expected, source })
}

/// Decode a reply to `setup`, `ask`, `tell` or `parameters`.
pub fn decode_trial_config(bytes: &[u8]) -> Result<TrialConfig, CodecError> {
    decode_as(bytes, "trial config")
}

/// Decode a bare integer reply (strategy id).
pub fn decode_integer(bytes: &[u8]) -> Result<i64, CodecError> {
    decode_as(bytes, "integer")
}

/// Decode a reply to `query`.
pub fn decode_query_message(bytes: &[u8]) -> Result<QueryMessage, CodecError> {
    decode_as(bytes, "query message")
}

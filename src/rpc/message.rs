//! Message shapes exchanged with the optimization server.
//!
//! The request side is a closed set of six kinds, each with its own
//! payload. The response side is *not* self-describing: a reply carries
//! no kind tag, so the call site that issued a request is the only place
//! that knows which decoder applies (see [`codec`](super::codec)).

use core::fmt;
use std::collections::BTreeMap;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CodecError;

/// Protocol version sent with `setup` and `resume` unless the caller
/// overrides it.
pub const DEFAULT_PROTOCOL_VERSION: &str = "0.01";

/// Reserved trial-config key the server uses to signal the end of an
/// experiment.
pub const FINISHED_KEY: &str = "finished";

// ═══════════════════════════════════════════════════════════════
//  Tags
// ═══════════════════════════════════════════════════════════════

/// Request kind. Serializes to the fixed lowercase wire tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    Setup,
    Ask,
    Tell,
    Resume,
    Query,
    Parameters,
}

impl RequestType {
    pub const ALL: [RequestType; 6] = [
        Self::Setup,
        Self::Ask,
        Self::Tell,
        Self::Resume,
        Self::Query,
        Self::Parameters,
    ];

    /// Wire tag.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Ask => "ask",
            Self::Tell => "tell",
            Self::Resume => "resume",
            Self::Query => "query",
            Self::Parameters => "parameters",
        }
    }

    /// Whether envelopes of this kind carry a `version` field.
    pub const fn is_versioned(self) -> bool {
        matches!(self, Self::Setup | Self::Resume)
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a `query` request asks the model for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Min,
    Max,
    Prediction,
    Inverse,
}

impl QueryType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Max => "max",
            Self::Prediction => "prediction",
            Self::Inverse => "inverse",
        }
    }
}

impl core::str::FromStr for QueryType {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "prediction" => Ok(Self::Prediction),
            "inverse" => Ok(Self::Inverse),
            other => Err(CodecError::InvalidRequest(format!(
                "unknown query type '{other}'"
            ))),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  TrialConfig
// ═══════════════════════════════════════════════════════════════

/// Ordered mapping of parameter name to a non-empty list of values.
///
/// Keys are unique and keep the order the server (or caller) gave them.
/// The reserved [`FINISHED_KEY`] entry, when present, flags the end of
/// the experiment: its first value is `1.0` for finished.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrialConfig {
    entries: Vec<(String, Vec<f64>)>,
}

impl TrialConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parameter. Rejects duplicate names and empty value lists.
    pub fn insert(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<(), CodecError> {
        let name = name.into();
        if values.is_empty() {
            return Err(CodecError::InvalidTrialConfig(format!(
                "'{name}' has no values"
            )));
        }
        if self.get(&name).is_some() {
            return Err(CodecError::InvalidTrialConfig(format!(
                "duplicate key '{name}'"
            )));
        }
        self.entries.push((name, values));
        Ok(())
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, name: impl Into<String>, values: Vec<f64>) -> Result<Self, CodecError> {
        self.insert(name, values)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_slice())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in order, including the reserved key.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Parameter entries only (the reserved key is skipped).
    pub fn parameters(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.iter().filter(|(k, _)| *k != FINISHED_KEY)
    }

    /// Parameter names in order, reserved key excluded.
    pub fn parameter_names(&self) -> Vec<String> {
        self.parameters().map(|(k, _)| k.to_owned()).collect()
    }

    /// `Some(true)` if the reserved key is present with a first value of
    /// exactly `1.0`, `Some(false)` for any other value, `None` if absent.
    #[allow(clippy::float_cmp)]
    pub fn finished_flag(&self) -> Option<bool> {
        self.get(FINISHED_KEY).map(|v| v[0] == 1.0)
    }

    /// Check every key against the declared parameter vocabulary.
    pub fn check_vocabulary(&self, declared: &[String]) -> Result<(), CodecError> {
        for (name, _) in self.parameters() {
            if !declared.iter().any(|d| d == name) {
                return Err(CodecError::UnknownParameter(name.to_owned()));
            }
        }
        Ok(())
    }
}

impl TryFrom<Vec<(String, Vec<f64>)>> for TrialConfig {
    type Error = CodecError;

    fn try_from(entries: Vec<(String, Vec<f64>)>) -> Result<Self, Self::Error> {
        let mut cfg = Self::new();
        for (k, v) in entries {
            cfg.insert(k, v)?;
        }
        Ok(cfg)
    }
}

impl Serialize for TrialConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for TrialConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TrialConfigVisitor;

        impl<'de> Visitor<'de> for TrialConfigVisitor {
            type Value = TrialConfig;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of parameter name to a non-empty list of floats")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<TrialConfig, A::Error> {
                let mut cfg = TrialConfig::new();
                while let Some((name, values)) = access.next_entry::<String, Vec<f64>>()? {
                    cfg.insert(name, values).map_err(de::Error::custom)?;
                }
                Ok(cfg)
            }
        }

        deserializer.deserialize_map(TrialConfigVisitor)
    }
}

// ═══════════════════════════════════════════════════════════════
//  QueryMessage
// ═══════════════════════════════════════════════════════════════

/// Query payload; the server echoes the same shape back with the
/// answer filled in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMessage {
    pub query_type: QueryType,
    /// A point in parameter space (may be empty).
    pub x: Vec<f64>,
    pub y: f64,
    /// Dimension index -> fixed value.
    pub constraints: BTreeMap<usize, f64>,
    pub probability_space: bool,
}

impl QueryMessage {
    /// A query with every optional field at its default: no point,
    /// `y = 0.0`, no constraints, not in probability space.
    pub fn new(query_type: QueryType) -> Self {
        Self {
            query_type,
            x: Vec::new(),
            y: 0.0,
            constraints: BTreeMap::new(),
            probability_space: false,
        }
    }

    #[must_use]
    pub fn with_x(mut self, x: Vec<f64>) -> Self {
        self.x = x;
        self
    }

    #[must_use]
    pub fn with_y(mut self, y: f64) -> Self {
        self.y = y;
        self
    }

    /// Fix dimension `dim` to `value`. A repeated dimension overwrites.
    #[must_use]
    pub fn with_constraint(mut self, dim: usize, value: f64) -> Self {
        self.constraints.insert(dim, value);
        self
    }

    #[must_use]
    pub fn in_probability_space(mut self, on: bool) -> Self {
        self.probability_space = on;
        self
    }
}

// ═══════════════════════════════════════════════════════════════
//  Request
// ═══════════════════════════════════════════════════════════════

/// One outbound request. Built per call, encoded, handed to the
/// transport, then dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Start an experiment from the full configuration text.
    Setup { config_str: String, version: String },
    /// Ask for the next trial.
    Ask,
    /// Report a trial outcome.
    Tell { config: TrialConfig, outcome: i64 },
    /// Resume a server-side strategy by id.
    Resume { strat_id: i64, version: String },
    /// Ask the model a question.
    Query(QueryMessage),
    /// Ask for the declared parameter space.
    Parameters,
}

impl Request {
    pub fn setup(config_str: impl Into<String>, version: impl Into<String>) -> Self {
        Self::Setup {
            config_str: config_str.into(),
            version: version.into(),
        }
    }

    pub fn tell(config: TrialConfig, outcome: i64) -> Self {
        Self::Tell { config, outcome }
    }

    pub fn resume(strat_id: i64, version: impl Into<String>) -> Self {
        Self::Resume {
            strat_id,
            version: version.into(),
        }
    }

    pub fn query(message: QueryMessage) -> Self {
        Self::Query(message)
    }

    pub fn kind(&self) -> RequestType {
        match self {
            Self::Setup { .. } => RequestType::Setup,
            Self::Ask => RequestType::Ask,
            Self::Tell { .. } => RequestType::Tell,
            Self::Resume { .. } => RequestType::Resume,
            Self::Query(_) => RequestType::Query,
            Self::Parameters => RequestType::Parameters,
        }
    }

    /// Protocol version, present only on `setup` and `resume`.
    pub fn version(&self) -> Option<&str> {
        match self {
            Self::Setup { version, .. } | Self::Resume { version, .. } => Some(version),
            _ => None,
        }
    }
}

//! Request builders, one method per request kind.
//!
//! Each method builds its payload, applies defaults, and hands it to
//! [`Session::submit`]. The reply is read later through the getter that
//! matches the kind:
//!
//! | call                | getter                        |
//! |---------------------|-------------------------------|
//! | `setup`, `resume`   | [`Session::take_strategy`]    |
//! | `ask`, `tell`, `parameters` | [`Session::take_config`] |
//! | `query`             | [`Session::take_query_response`] |

use std::path::Path;

use log::info;

use super::message::{QueryMessage, QueryType, Request, TrialConfig, DEFAULT_PROTOCOL_VERSION};
use super::session::Session;
use super::transport::Transport;
use crate::error::Result;

impl<T: Transport> Session<T> {
    /// Start an experiment with the default protocol version.
    pub fn setup(&mut self, config_str: &str) -> Result<()> {
        self.setup_with_version(config_str, DEFAULT_PROTOCOL_VERSION)
    }

    /// Start an experiment. Reconnects first so the server sees a fresh
    /// peer; the configuration text is sent verbatim.
    pub fn setup_with_version(&mut self, config_str: &str, version: &str) -> Result<()> {
        self.ensure_ready()?;
        self.connect()?;
        info!(
            "Session: setup ({} bytes of config, version {})",
            config_str.len(),
            version
        );
        self.submit(&Request::setup(config_str, version))
    }

    /// [`setup_with_version`](Self::setup_with_version) with the text read
    /// from `path`.
    pub fn setup_from_file(&mut self, path: &Path, version: &str) -> Result<()> {
        let config_str = crate::config::read_setup_config(path)?;
        self.setup_with_version(&config_str, version)
    }

    /// Ask for the next trial.
    pub fn ask(&mut self) -> Result<()> {
        self.submit(&Request::Ask)
    }

    /// Report the outcome of `config`.
    ///
    /// When the server has declared its parameters, every key of `config`
    /// must be one of them (the reserved `finished` key is always allowed).
    pub fn tell(&mut self, config: TrialConfig, outcome: i64) -> Result<()> {
        self.ensure_ready()?;
        if let Some(declared) = self.declared_parameters() {
            config.check_vocabulary(declared)?;
        }
        self.submit(&Request::tell(config, outcome))
    }

    /// Ask for the declared parameter space.
    pub fn parameters(&mut self) -> Result<()> {
        self.submit(&Request::Parameters)
    }

    /// Send a fully built query.
    pub fn query(&mut self, message: QueryMessage) -> Result<()> {
        self.submit(&Request::query(message))
    }

    /// Query with every optional field at its default.
    pub fn query_default(&mut self, query_type: QueryType) -> Result<()> {
        self.query(QueryMessage::new(query_type))
    }

    /// Resume strategy `strat_id` with the default protocol version.
    pub fn resume(&mut self, strat_id: i64) -> Result<()> {
        self.resume_with_version(strat_id, DEFAULT_PROTOCOL_VERSION)
    }

    pub fn resume_with_version(&mut self, strat_id: i64, version: &str) -> Result<()> {
        info!("Session: resume strategy {}", strat_id);
        self.submit(&Request::resume(strat_id, version))
    }
}

//! aepsych-client: command-line driver for an AEPsych server.
//!
//! Runs one request/reply exchange per invocation and prints the decoded
//! reply as JSON on stdout. Logs go to stderr (`RUST_LOG`, default
//! `info`).
//!
//! ```text
//! aepsych-client setup experiment.ini
//! aepsych-client --strategy 3 ask
//! aepsych-client tell '{"x":[0.25]}' 1
//! aepsych-client query max --constraint 0=1.0 --probability-space
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use serde_json::json;

use aepsych_client::{
    ClientConfig, QueryMessage, QueryType, ReqSocket, Session, Status, TrialConfig,
};

/// AEPsych request/reply client
#[derive(Parser)]
#[command(name = "aepsych-client", version, about = "AEPsych request/reply client")]
struct Cli {
    /// JSON client configuration file
    #[arg(long, env = "AEPSYCH_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Server address, e.g. tcp://localhost
    #[arg(long, global = true)]
    address: Option<String>,

    /// Server port
    #[arg(long, global = true)]
    port: Option<String>,

    /// Give up waiting for a reply after this many milliseconds
    #[arg(long, global = true)]
    deadline_ms: Option<u64>,

    /// Resume this strategy before running ask/tell/parameters/query
    #[arg(long, global = true)]
    strategy: Option<i64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start an experiment from a configuration file
    Setup {
        /// Experiment configuration (defaults to setup_config_path)
        experiment_config: Option<PathBuf>,
    },
    /// Resume a server-side strategy
    Resume { strat_id: i64 },
    /// Ask for the next trial
    Ask,
    /// Show the declared parameter space
    Parameters,
    /// Report a trial outcome
    Tell {
        /// Trial configuration as JSON, e.g. '{"x":[0.25]}'
        trial: String,
        outcome: i64,
    },
    /// Query the model
    Query {
        /// min, max, prediction or inverse
        query_type: QueryType,
        /// Point in parameter space (comma separated)
        #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
        x: Vec<f64>,
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        y: f64,
        /// Fix a dimension, DIM=VALUE (repeatable)
        #[arg(long = "constraint", value_parser = parse_constraint)]
        constraints: Vec<(usize, f64)>,
        #[arg(long)]
        probability_space: bool,
    },
}

fn parse_constraint(s: &str) -> Result<(usize, f64), String> {
    let (dim, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected DIM=VALUE, got '{s}'"))?;
    let dim = dim.trim().parse().map_err(|e| format!("bad dimension '{dim}': {e}"))?;
    let value = value.trim().parse().map_err(|e| format!("bad value '{value}': {e}"))?;
    Ok((dim, value))
}

fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let mut cfg = match &cli.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };
    cfg.apply_env_overrides();
    if let Some(address) = &cli.address {
        cfg.server_address.clone_from(address);
    }
    if let Some(port) = &cli.port {
        cfg.server_port.clone_from(port);
    }
    if cli.deadline_ms.is_some() {
        cfg.reply_deadline_ms = cli.deadline_ms;
    }
    cfg.validate().context("invalid client configuration")?;
    Ok(cfg)
}

/// Wait for the outstanding reply, pacing polls with a timer.
async fn await_reply(session: &mut Session<ReqSocket>, cfg: &ClientConfig) -> Result<()> {
    let status = session
        .wait_ready_paced(cfg.tick_interval(), cfg.reply_deadline())
        .await?;
    debug_assert_eq!(status, Status::ResponseReady);
    Ok(())
}

async fn run(cli: Cli, cfg: ClientConfig) -> Result<serde_json::Value> {
    let endpoint = cfg.endpoint().context("invalid server endpoint")?;
    let mut session = Session::new(ReqSocket::with_connect_timeout(cfg.connect_timeout()), endpoint);

    let needs_strategy = !matches!(cli.command, Command::Setup { .. } | Command::Resume { .. });
    if !matches!(cli.command, Command::Setup { .. }) {
        session.connect().context("connect to server")?;
    }
    if let (true, Some(id)) = (needs_strategy, cli.strategy) {
        session.resume_with_version(id, &cfg.protocol_version)?;
        await_reply(&mut session, &cfg).await?;
        let resumed = session.take_strategy()?;
        info!("resumed strategy {}", resumed);
    }

    let reply = match cli.command {
        Command::Setup { experiment_config } => {
            let Some(path) = experiment_config.or_else(|| cfg.setup_config_path.clone()) else {
                bail!("no experiment configuration given and setup_config_path is unset");
            };
            session.setup_from_file(&path, &cfg.protocol_version)?;
            await_reply(&mut session, &cfg).await?;
            json!({ "strat_id": session.take_strategy()? })
        }
        Command::Resume { strat_id } => {
            session.resume_with_version(strat_id, &cfg.protocol_version)?;
            await_reply(&mut session, &cfg).await?;
            json!({ "strat_id": session.take_strategy()? })
        }
        Command::Ask => {
            session.ask()?;
            await_reply(&mut session, &cfg).await?;
            let trial = session.take_config()?;
            json!({ "config": trial, "finished": session.finished() })
        }
        Command::Parameters => {
            session.parameters()?;
            await_reply(&mut session, &cfg).await?;
            serde_json::to_value(session.take_config()?)?
        }
        Command::Tell { trial, outcome } => {
            let config: TrialConfig =
                serde_json::from_str(&trial).context("trial must be a JSON map of name to [floats]")?;
            session.tell(config, outcome)?;
            await_reply(&mut session, &cfg).await?;
            serde_json::to_value(session.take_config()?)?
        }
        Command::Query {
            query_type,
            x,
            y,
            constraints,
            probability_space,
        } => {
            let message = constraints
                .into_iter()
                .fold(QueryMessage::new(query_type).with_x(x).with_y(y), |q, (dim, v)| {
                    q.with_constraint(dim, v)
                })
                .in_probability_space(probability_space);
            session.query(message)?;
            await_reply(&mut session, &cfg).await?;
            serde_json::to_value(session.take_query_response()?)?
        }
    };

    session.close();
    Ok(reply)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let cfg = load_config(&cli)?;
    info!(
        "aepsych-client {} -> {}:{}",
        env!("CARGO_PKG_VERSION"),
        cfg.server_address,
        cfg.server_port
    );

    let reply = futures_lite::future::block_on(run(cli, cfg))?;
    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}

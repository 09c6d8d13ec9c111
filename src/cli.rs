//! Command-line interface: a `clap`-derive struct with `env`-backed fields
//! that layer on top of the YAML-file configuration.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// A policy-enforcing command-execution gateway.
#[derive(Parser, Debug)]
#[command(name = "cmdgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, env = "CMDGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to the plugin manifest JSON file. Overrides the config file.
    #[arg(short, long, env = "CMDGATE_MANIFEST")]
    pub manifest: Option<PathBuf>,

    /// Jail root directory. Overrides the config file.
    #[arg(long, env = "CMDGATE_JAIL_ROOT")]
    pub jail_root: Option<PathBuf>,

    /// Which protocol frontend to run.
    #[arg(long, value_enum, env = "CMDGATE_TRANSPORT")]
    pub transport: Option<TransportArg>,

    /// HTTP port. Only meaningful with `--transport http`.
    #[arg(short, long, env = "CMDGATE_PORT")]
    pub port: Option<u16>,

    /// HTTP bind host. Only meaningful with `--transport http`.
    #[arg(long, env = "CMDGATE_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "CMDGATE_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json).
    #[arg(long, env = "CMDGATE_LOG_FORMAT")]
    pub log_format: Option<String>,
}

/// CLI mirror of [`crate::config::TransportChoice`] — `clap::ValueEnum`
/// needs its own type since the config one doesn't derive it.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TransportArg {
    /// Line-delimited JSON-RPC over stdin/stdout.
    Stdio,
    /// Session-oriented HTTP + SSE streaming.
    Http,
}

impl From<TransportArg> for crate::config::TransportChoice {
    fn from(value: TransportArg) -> Self {
        match value {
            TransportArg::Stdio => Self::Stdio,
            TransportArg::Http => Self::Http,
        }
    }
}

//! Configuration management.
//!
//! Layered loading via `figment`: defaults, then a YAML file, then
//! environment variables. The schema itself is specific to this crate's
//! data model: a jail root, a manifest path, an audit database path,
//! transport selection, and the stdio bearer token.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Top-level configuration, loaded once at process startup and immutable
/// for the remainder of the process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory under which every tool's `cwd` must resolve (§4.C.1).
    pub jail_root: PathBuf,
    /// Path to the plugin manifest JSON file.
    pub manifest_path: PathBuf,
    /// Path to the audit store's SQLite database file.
    pub audit_db_path: PathBuf,
    /// Which frontend to run.
    pub transport: TransportChoice,
    /// stdio frontend settings.
    pub stdio: StdioConfig,
    /// HTTP streaming frontend settings.
    pub http: HttpConfig,
    /// Default per-call limits, used when a tool doesn't override them.
    pub limits: LimitsConfig,
    /// Namespace-isolation helper settings.
    pub namespace: NamespaceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            jail_root: PathBuf::from("/srv/cmdgate"),
            manifest_path: PathBuf::from("manifest.json"),
            audit_db_path: PathBuf::from("cmdgate-audit.db"),
            transport: TransportChoice::Stdio,
            stdio: StdioConfig::default(),
            http: HttpConfig::default(),
            limits: LimitsConfig::default(),
            namespace: NamespaceConfig::default(),
        }
    }
}

/// Which protocol frontend a process instance runs. Mutually exclusive
/// per process (see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportChoice {
    /// Line-delimited JSON-RPC over stdin/stdout.
    Stdio,
    /// Session-oriented HTTP + SSE streaming.
    Http,
}

/// stdio frontend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StdioConfig {
    /// Expected bearer credential. Supports the literal value `"auto"`,
    /// which generates a random token once at startup and logs it.
    /// `None` disables stdio authentication (for local/testing use only).
    pub bearer_token: Option<String>,
}

impl Default for StdioConfig {
    fn default() -> Self {
        Self { bearer_token: None }
    }
}

/// HTTP streaming frontend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Bind address, e.g. `"127.0.0.1"`.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Bearer credential expected on every request (checked the same way
    /// as the stdio frontend's, but per-request rather than at construction
    /// — see `gateway::auth`).
    pub bearer_token: Option<String>,
    /// Session idle time-to-live, in seconds, before the sweeper reclaims
    /// it.
    pub session_ttl_secs: u64,
    /// Per-subscriber SSE buffer depth; a full buffer drops events rather
    /// than blocking the broadcaster (§5).
    pub sse_buffer: usize,
    /// Interval between SSE keep-alive comments, in seconds.
    pub keep_alive_secs: u64,
}

impl HttpConfig {
    /// Session TTL as a [`Duration`].
    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// Keep-alive interval as a [`Duration`].
    #[must_use]
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8443,
            bearer_token: None,
            session_ttl_secs: 3600,
            sse_buffer: 64,
            keep_alive_secs: 15,
        }
    }
}

/// Default per-call execution limits (§4.C), overridable per tool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Default wall-clock timeout, in milliseconds.
    pub timeout_ms: u64,
    /// Default per-stream output cap, in bytes.
    pub max_output_bytes: usize,
}

impl LimitsConfig {
    /// Default timeout as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_output_bytes: 1024 * 1024,
        }
    }
}

/// Namespace-isolation backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceConfig {
    /// Path to the external namespace helper binary.
    pub helper_path: PathBuf,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            helper_path: PathBuf::from("/usr/libexec/cmdgate-sandbox-helper"),
        }
    }
}

impl Config {
    /// Load configuration by layering defaults, an optional YAML file, and
    /// `CMDGATE_`-prefixed environment variables, in that precedence order
    /// (later layers win).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the YAML file exists but fails to parse,
    /// or if environment overrides don't deserialize into the schema.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment =
            Figment::from(figment::providers::Serialized::defaults(Config::default()));

        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }

        figment = figment.merge(Env::prefixed("CMDGATE_").split("__"));

        figment
            .extract()
            .map_err(|e| Error::Config(format!("loading configuration: {e}")))
    }
}

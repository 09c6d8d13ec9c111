//! A policy-enforcing command-execution gateway.
//!
//! Exposes a manifest of tools over JSON-RPC, routes every `tools/call`
//! through a policy evaluator and a pluggable isolation backend (none,
//! namespace, or WebAssembly), and records an append-only audit trail of
//! every outcome. Two interchangeable frontends speak the same method set:
//! a line-delimited stdio transport and a session-oriented HTTP + SSE
//! transport.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod auth;
pub mod backend;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod frontend;
pub mod manifest;
pub mod methods;
pub mod pattern;
pub mod policy;
pub mod protocol;
pub mod resources;
pub mod session;

pub use error::{Error, Result};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Set up global tracing. `RUST_LOG`, if set, overrides `level`; `format`
/// of `"json"` switches to structured output, anything else (including
/// absence) to human-readable text.
///
/// # Errors
///
/// This never actually fails today — it returns [`Result`] so a future
/// subscriber backend that can fail doesn't need a signature change.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}

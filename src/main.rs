//! cmdgate: a policy-enforcing command-execution gateway.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use cmdgate::audit::AuditStore;
use cmdgate::auth::StdioAuthenticator;
use cmdgate::cli::Cli;
use cmdgate::config::{Config, HttpConfig, StdioConfig, TransportChoice};
use cmdgate::dispatch::Dispatcher;
use cmdgate::error::Error;
use cmdgate::frontend::http::{self, AppState};
use cmdgate::frontend::stdio::StdioFrontend;
use cmdgate::manifest::Manifest;
use cmdgate::methods::MethodRouter;
use cmdgate::pattern::PatternCache;
use cmdgate::session::SessionManager;
use cmdgate::{setup_tracing, Result};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("failed to set up tracing: {e}");
        return ExitCode::FAILURE;
    }

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(manifest_path) = &cli.manifest {
        config.manifest_path = manifest_path.clone();
    }
    if let Some(jail_root) = &cli.jail_root {
        config.jail_root = jail_root.clone();
    }
    if let Some(transport) = cli.transport {
        config.transport = transport.into();
    }
    if let Some(port) = cli.port {
        config.http.port = port;
    }
    if let Some(ref host) = cli.host {
        config.http.host = host.clone();
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        transport = ?config.transport,
        manifest = %config.manifest_path.display(),
        "starting cmdgate"
    );

    let patterns = Arc::new(PatternCache::new());
    let manifest = match Manifest::load(&config.manifest_path, &patterns) {
        Ok(manifest) => Arc::new(manifest),
        Err(e) => {
            error!("failed to load manifest: {e}");
            return ExitCode::FAILURE;
        }
    };

    let audit = match AuditStore::open(&config.audit_db_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("failed to open audit store: {e}");
            return ExitCode::FAILURE;
        }
    };

    let dispatcher = Arc::new(Dispatcher::new(
        manifest,
        patterns,
        &config.namespace,
        audit,
        config.limits,
        config.jail_root.clone(),
    ));

    let router = MethodRouter::new(dispatcher);

    let result = match config.transport {
        TransportChoice::Stdio => run_stdio(router, &config.stdio).await,
        TransportChoice::Http => run_http(router, &config.http).await,
    };

    match result {
        Ok(()) => {
            info!("cmdgate shut down cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("cmdgate exited with an error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Run the line-delimited stdio frontend over the process's own stdin/
/// stdout. The one-shot bearer credential, if configured, is read from
/// `CMDGATE_STDIO_TOKEN` once at startup (§4.F.1) — there is no per-message
/// exchange on this transport.
async fn run_stdio(router: MethodRouter, config: &StdioConfig) -> Result<()> {
    let presented = std::env::var("CMDGATE_STDIO_TOKEN").ok();
    let authenticator = StdioAuthenticator::new(config.bearer_token.as_deref());
    let frontend = StdioFrontend::new(router, &authenticator, presented.as_deref())?;
    frontend.run(tokio::io::stdin(), tokio::io::stdout()).await
}

/// Run the session-oriented HTTP + SSE frontend, binding `config.host:port`
/// and serving until a shutdown signal is received.
async fn run_http(router: MethodRouter, config: &HttpConfig) -> Result<()> {
    let sessions = SessionManager::new(config.session_ttl(), config.sse_buffer);
    sessions.spawn_sweeper();

    let state = Arc::new(AppState::new(router, Arc::clone(&sessions), config.clone()));
    let app = http::create_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::Internal(format!("binding {addr}: {e}")))?;

    info!(addr = %addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::Internal(e.to_string()))?;

    sessions.stop();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received");
}

//! Line-delimited stdio frontend (§4.F.1).
//!
//! One JSON-RPC value per line in each direction: `BufReader::lines()` on
//! the way in, a flush after every write on the way out. This gateway is
//! the JSON-RPC server on this transport, not a client driving a
//! subprocess.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use crate::audit::Mode;
use crate::auth::StdioAuthenticator;
use crate::error::{rpc_codes, Error, Result};
use crate::methods::MethodRouter;
use crate::protocol::messages::{JsonRpcRequest, JsonRpcResponse};

/// Serves one stdio session to completion.
pub struct StdioFrontend {
    router: MethodRouter,
}

impl StdioFrontend {
    /// Build the frontend, checking the one-shot bearer credential once
    /// (§4.F.1). `presented` is whatever credential this process instance
    /// was started with (e.g. an environment variable read once at
    /// startup) — there is no per-message exchange on this transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthorized`] if authentication is enabled and
    /// `presented` doesn't match the configured token.
    pub fn new(
        router: MethodRouter,
        authenticator: &StdioAuthenticator,
        presented: Option<&str>,
    ) -> Result<Self> {
        if authenticator.is_enabled() && !authenticator.check(presented.unwrap_or_default()) {
            return Err(Error::Unauthorized);
        }
        Ok(Self { router })
    }

    /// Read JSON-RPC requests from `input` one newline-terminated line at a
    /// time, writing each non-notification response to `output`. Returns
    /// cleanly on EOF.
    pub async fn run<R, W>(&self, input: R, mut output: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = BufReader::new(input).lines();
        loop {
            let Some(line) = lines.next_line().await? else {
                info!("stdin closed, shutting down stdio frontend");
                return Ok(());
            };

            if line.trim().is_empty() {
                continue;
            }

            if let Some(response) = self.handle_line(&line).await {
                let encoded = serde_json::to_string(&response)?;
                output.write_all(encoded.as_bytes()).await?;
                output.write_all(b"\n").await?;
                output.flush().await?;
            }
        }
    }

    async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let request: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "malformed JSON-RPC payload on stdin");
                self.router.audit_envelope_failure(Mode::Stdio, line, &e.to_string());
                return Some(JsonRpcResponse::error(
                    None,
                    rpc_codes::PARSE_ERROR,
                    format!("parse error: {e}"),
                ));
            }
        };

        if request.is_notification() {
            self.router.handle_notification(&request.method);
            return None;
        }

        Some(self.router.handle(Mode::Stdio, &request).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditStore;
    use crate::config::{LimitsConfig, NamespaceConfig};
    use crate::dispatch::Dispatcher;
    use crate::manifest::Manifest;
    use crate::pattern::PatternCache;
    use std::io::Cursor;
    use std::sync::Arc;
    use tokio::io::AsyncReadExt;

    fn router_without_tools() -> (MethodRouter, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let manifest = Arc::new(Manifest {
            tools: vec![],
            allowed_env_keys: vec![],
        });
        let patterns = Arc::new(PatternCache::new());
        let audit = Arc::new(AuditStore::open(&dir.path().join("audit.db")).unwrap());
        let dispatcher = Arc::new(Dispatcher::new(
            manifest,
            patterns,
            &NamespaceConfig::default(),
            audit,
            LimitsConfig::default(),
            dir.path().to_path_buf(),
        ));
        (MethodRouter::new(dispatcher), dir)
    }

    async fn run_and_collect(frontend: &StdioFrontend, input: &'static [u8]) -> String {
        let (write_half, mut read_half) = tokio::io::duplex(8192);
        let run = frontend.run(Cursor::new(input), write_half);
        let drain = async {
            let mut buf = Vec::new();
            read_half.read_to_end(&mut buf).await.unwrap();
            buf
        };
        let (result, buf) = tokio::join!(run, drain);
        result.unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn construction_fails_closed_on_bad_credential() {
        let (router, _dir) = router_without_tools();
        let authenticator = StdioAuthenticator::new(Some("expected"));
        assert!(StdioFrontend::new(router, &authenticator, Some("wrong")).is_err());
    }

    #[tokio::test]
    async fn construction_succeeds_with_no_authenticator() {
        let (router, _dir) = router_without_tools();
        let authenticator = StdioAuthenticator::new(None);
        assert!(StdioFrontend::new(router, &authenticator, None).is_ok());
    }

    #[tokio::test]
    async fn malformed_line_yields_parse_error_and_loop_continues() {
        let (router, _dir) = router_without_tools();
        let authenticator = StdioAuthenticator::new(None);
        let frontend = StdioFrontend::new(router, &authenticator, None).unwrap();

        let input: &'static [u8] =
            b"not json\n{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n";
        let text = run_and_collect(&frontend, input).await;
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: JsonRpcResponse = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.error.unwrap().code, rpc_codes::PARSE_ERROR);

        let second: JsonRpcResponse = serde_json::from_str(lines[1]).unwrap();
        assert!(second.result.is_some());
    }

    #[tokio::test]
    async fn malformed_envelope_is_audited() {
        let (router, dir) = router_without_tools();
        let authenticator = StdioAuthenticator::new(None);
        let frontend = StdioFrontend::new(router, &authenticator, None).unwrap();

        run_and_collect(&frontend, b"not json\n").await;

        let audit = AuditStore::open(&dir.path().join("audit.db")).unwrap();
        assert_eq!(audit.count(&crate::audit::AuditFilter::default()).unwrap(), 1);
    }

    #[tokio::test]
    async fn notification_gets_no_response() {
        let (router, _dir) = router_without_tools();
        let authenticator = StdioAuthenticator::new(None);
        let frontend = StdioFrontend::new(router, &authenticator, None).unwrap();

        let input: &'static [u8] = b"{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n";
        let text = run_and_collect(&frontend, input).await;
        assert!(text.is_empty());
    }

    #[tokio::test]
    async fn empty_lines_are_ignored() {
        let (router, _dir) = router_without_tools();
        let authenticator = StdioAuthenticator::new(None);
        let frontend = StdioFrontend::new(router, &authenticator, None).unwrap();

        let input: &'static [u8] = b"\n\n{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n";
        let text = run_and_collect(&frontend, input).await;
        assert_eq!(text.lines().count(), 1);
    }

    #[tokio::test]
    async fn eof_on_empty_input_ends_the_loop_cleanly() {
        let (router, _dir) = router_without_tools();
        let authenticator = StdioAuthenticator::new(None);
        let frontend = StdioFrontend::new(router, &authenticator, None).unwrap();

        let text = run_and_collect(&frontend, b"").await;
        assert!(text.is_empty());
    }
}

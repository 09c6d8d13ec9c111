//! Unsandboxed execution backend (`isolation: none`).
//!
//! Confinement is jail-root-only: before spawning, `cwd` is canonicalized
//! (resolving symlinks) and checked to still live under the configured
//! jail root. Spawning uses `tokio::process::Command` with piped stdio and
//! a `tokio::time::timeout` wrapping the wait, parameterized per-call by
//! command/args/env/cwd.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use super::{cap_output, timeout_marker, ExecutionBackend, ExecutionRequest, ExecutionResult};
use crate::error::{Error, Result};

/// Chunk size used while draining a captured stream.
const READ_CHUNK: usize = 8192;

/// Runs the tool's command directly on the host, confined only by the
/// jail-root check.
#[derive(Debug, Default)]
pub struct NoneBackend;

impl NoneBackend {
    /// Build a new backend instance. Stateless — every call resolves its
    /// own jail check independently.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// Resolve `cwd` to an absolute, symlink-resolved path and confirm it is
/// still under `jail_root`.
///
/// # Errors
///
/// Returns [`Error::ExecutionFailed`] if `cwd` does not exist, cannot be
/// canonicalized, or resolves outside `jail_root`.
pub fn resolve_jailed_cwd(jail_root: &Path, cwd: &Path) -> Result<PathBuf> {
    let candidate = if cwd.is_absolute() {
        cwd.to_path_buf()
    } else {
        jail_root.join(cwd)
    };

    let resolved = candidate.canonicalize().map_err(|e| {
        Error::ExecutionFailed(format!("resolving cwd {}: {e}", candidate.display()))
    })?;
    let jail_root = jail_root
        .canonicalize()
        .map_err(|e| Error::ExecutionFailed(format!("resolving jail root: {e}")))?;

    if !resolved.starts_with(&jail_root) {
        return Err(Error::ExecutionFailed(format!(
            "cwd {} resolves outside root directory {}",
            resolved.display(),
            jail_root.display()
        )));
    }

    Ok(resolved)
}

#[async_trait]
impl ExecutionBackend for NoneBackend {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        let command = request
            .command
            .as_deref()
            .ok_or_else(|| Error::ExecutionFailed("no command configured".to_string()))?;

        let cwd = resolve_jailed_cwd(&request.jail_root, &request.cwd)?;

        let mut cmd = Command::new(command);
        cmd.args(&request.args)
            .current_dir(&cwd)
            .env_clear()
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| Error::ExecutionFailed(format!("spawning {command}: {e}")))?;

        let mut stdout_pipe = child.stdout.take().expect("stdout piped");
        let mut stderr_pipe = child.stderr.take().expect("stderr piped");
        let cap = request.max_output_bytes;

        let run = async {
            let (stdout, stderr, status) = tokio::join!(
                read_capped(&mut stdout_pipe, cap),
                read_capped(&mut stderr_pipe, cap),
                child.wait(),
            );
            let status = status.map_err(|e| Error::ExecutionFailed(format!("waiting: {e}")))?;
            Ok::<_, Error>((stdout, stderr, status))
        };

        match tokio::time::timeout(request.timeout, run).await {
            Ok(Ok(((mut stdout, _), (mut stderr, _), status))) => {
                stdout = cap_output(stdout, cap);
                stderr = cap_output(stderr, cap);
                Ok(ExecutionResult {
                    stdout,
                    stderr,
                    exit_code: status.code().unwrap_or(-1),
                    duration_ms: elapsed_ms(started),
                    timed_out: false,
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_elapsed) => {
                let _ = child.kill().await;
                let mut stderr = Vec::new();
                stderr.extend_from_slice(timeout_marker(request.timeout).as_bytes());
                Ok(ExecutionResult {
                    stdout: Vec::new(),
                    stderr,
                    exit_code: -1,
                    duration_ms: elapsed_ms(started),
                    timed_out: true,
                })
            }
        }
    }
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Read `reader` to EOF, retaining at most `cap` bytes; the rest is drained
/// and discarded so a chatty process never blocks on a full pipe, but
/// never held in memory.
pub(crate) async fn read_capped<R>(reader: &mut R, cap: usize) -> (Vec<u8>, bool)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    let mut truncated = false;
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if buf.len() < cap {
                    let take = (cap - buf.len()).min(n);
                    buf.extend_from_slice(&chunk[..take]);
                    if take < n {
                        truncated = true;
                    }
                } else {
                    truncated = true;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    (buf, truncated)
}

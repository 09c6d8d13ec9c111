//! OS-namespace isolation backend (`isolation: namespace`).
//!
//! Delegates the actual sandboxing (fresh user/PID/net/UTS/cgroup
//! namespaces, a read-only overlay of `/usr`, `/bin`, `/lib`, `/etc` and
//! friends, a minimal `/dev`, a fresh `/tmp`, parent-death signal) to an
//! external helper binary this crate does not implement — that's a
//! privileged, platform-specific concern out of scope for an in-process
//! Rust backend. Reuses [`super::none`]'s spawn/capture/timeout handling.
//!
//! **Redesign flag:** if the helper is missing or fails its preflight
//! check, this backend fails closed — it never silently executes the
//! tool unsandboxed. See DESIGN.md.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;

use super::none::{elapsed_ms, read_capped};
use super::{cap_output, timeout_marker, ExecutionBackend, ExecutionRequest, ExecutionResult};
use crate::error::{Error, Result};

/// Runs the tool's command inside the external namespace helper.
pub struct NamespaceBackend {
    helper_path: PathBuf,
}

impl NamespaceBackend {
    /// Build a backend pointed at `helper_path`. The path is not checked
    /// at construction time — availability can change between process
    /// startup and a given call, so the check happens per-call, not once.
    #[must_use]
    pub fn new(helper_path: PathBuf) -> Self {
        Self { helper_path }
    }

    /// Preflight: the helper must exist and be executable. This is checked
    /// on every call rather than cached, since an operator removing the
    /// helper mid-run must fail the very next call, not keep succeeding on
    /// a stale assumption.
    fn preflight(&self) -> Result<()> {
        let meta = std::fs::metadata(&self.helper_path).map_err(|e| {
            Error::ExecutionFailed(format!(
                "namespace helper {} is unavailable: {e}",
                self.helper_path.display()
            ))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if meta.permissions().mode() & 0o111 == 0 {
                return Err(Error::ExecutionFailed(format!(
                    "namespace helper {} is not executable",
                    self.helper_path.display()
                )));
            }
        }
        #[cfg(not(unix))]
        {
            let _ = meta;
        }

        Ok(())
    }
}

#[async_trait]
impl ExecutionBackend for NamespaceBackend {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        self.preflight()?;

        let command = request
            .command
            .as_deref()
            .ok_or_else(|| Error::ExecutionFailed("no command configured".to_string()))?;

        let relative_cwd = request
            .cwd
            .strip_prefix(&request.jail_root)
            .unwrap_or(&request.cwd);

        let mut cmd = Command::new(&self.helper_path);
        cmd.arg("--jail-root")
            .arg(&request.jail_root)
            .arg("--cwd")
            .arg(relative_cwd)
            .arg("--")
            .arg(command)
            .args(&request.args)
            .env_clear()
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| {
            Error::ExecutionFailed(format!(
                "spawning namespace helper {}: {e}",
                self.helper_path.display()
            ))
        })?;

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

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn missing_helper_fails_closed() {
        let backend = NamespaceBackend::new(PathBuf::from("/nonexistent/cmdgate-helper"));
        let request = ExecutionRequest {
            command: Some("/bin/echo".to_string()),
            args: vec!["hi".to_string()],
            cwd: PathBuf::from("/tmp"),
            jail_root: PathBuf::from("/tmp"),
            env: HashMap::new(),
            module_path: None,
            timeout: std::time::Duration::from_secs(5),
            max_output_bytes: 1024,
        };
        let err = backend.execute(request).await.unwrap_err();
        assert_eq!(err.to_rpc_code(), crate::error::rpc_codes::EXECUTION_FAILED);
    }
}

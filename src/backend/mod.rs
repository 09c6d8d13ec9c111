//! Execution backends: the three isolation strategies a tool can declare
//! (§4.C), sharing one `execute` contract.
//!
//! A trait-object registry (`ExecutionBackend` + `async_trait`, a lookup
//! keyed by a discriminant) targeting inbound process/wasm execution —
//! this gateway's backends run commands, they don't proxy to another MCP
//! server.

pub mod namespace;
pub mod none;
pub mod wasm;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::manifest::Isolation;

/// Everything a backend needs to run one call. Built by the dispatch
/// pipeline after policy evaluation, environment filtering, and
/// `args_prefix` application (§4.E steps 2-5) have already happened — a
/// backend never sees unfiltered input.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// The command to run (ignored by the wasm backend).
    pub command: Option<String>,
    /// Final argv, `args_prefix` already prepended.
    pub args: Vec<String>,
    /// Resolved, jail-checked working directory.
    pub cwd: PathBuf,
    /// The jail root every `none`/`namespace` call is confined to.
    pub jail_root: PathBuf,
    /// Filtered environment.
    pub env: HashMap<String, String>,
    /// Wasm module path (ignored by `none`/`namespace`).
    pub module_path: Option<PathBuf>,
    /// Wall-clock budget for this call.
    pub timeout: Duration,
    /// Per-stream output cap, in bytes.
    pub max_output_bytes: usize,
}

/// The outcome of one backend invocation (§3's Execution result).
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Captured stdout, possibly truncated.
    pub stdout: Vec<u8>,
    /// Captured stderr, possibly truncated or carrying a timeout marker.
    pub stderr: Vec<u8>,
    /// Process/module exit status. `-1` iff `timed_out`.
    pub exit_code: i32,
    /// Wall-clock duration of the call.
    pub duration_ms: u64,
    /// Whether the call was killed for exceeding its timeout.
    pub timed_out: bool,
}

/// Shared contract every isolation backend implements.
///
/// A backend never returns a partial result for a call that actually ran:
/// either a complete [`ExecutionResult`] (possibly `timed_out` or
/// truncated) or an `Err` for a failure internal to the backend itself
/// (spawn failure, missing helper, instantiation failure). A non-zero exit
/// from the tool's own command is always `Ok`, never `Err`.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Run one call to completion (or until its timeout/cancellation).
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult>;
}

/// The marker appended to `stderr` when a call is killed for exceeding its
/// timeout.
#[must_use]
pub fn timeout_marker(timeout: Duration) -> String {
    format!("[execution timed out after {}ms]", timeout.as_millis())
}

/// The marker appended to a captured stream when it is cut off for
/// exceeding its byte cap.
#[must_use]
pub fn truncation_marker(cap: usize) -> String {
    format!("[output truncated, exceeded {cap} bytes]")
}

/// Owns one instance of each isolation backend and routes a call to the
/// one its tool declares.
pub struct BackendSet {
    none: none::NoneBackend,
    namespace: namespace::NamespaceBackend,
    wasm: wasm::WasmBackend,
}

impl BackendSet {
    /// Build the full set of backends.
    #[must_use]
    pub fn new(namespace_helper_path: PathBuf) -> Self {
        Self {
            none: none::NoneBackend::new(),
            namespace: namespace::NamespaceBackend::new(namespace_helper_path),
            wasm: wasm::WasmBackend::new(),
        }
    }

    /// Run `request` through the backend `isolation` names.
    pub async fn execute(
        &self,
        isolation: Isolation,
        request: ExecutionRequest,
    ) -> Result<ExecutionResult> {
        match isolation {
            Isolation::None => self.none.execute(request).await,
            Isolation::Namespace => self.namespace.execute(request).await,
            Isolation::Wasm => self.wasm.execute(request).await,
        }
    }
}

/// Read up to `cap` bytes from an already-collected buffer, appending the
/// truncation marker if it was cut off. Shared by every backend that
/// captures process/instance output so the truncation behavior (§4.C,
/// property 4 in §8) is identical regardless of which backend produced the
/// bytes.
pub(crate) fn cap_output(mut buf: Vec<u8>, cap: usize) -> Vec<u8> {
    if buf.len() > cap {
        buf.truncate(cap);
        buf.extend_from_slice(truncation_marker(cap).as_bytes());
    }
    buf
}

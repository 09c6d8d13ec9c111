//! The dispatch pipeline (§4.E): the one path every `tools/call` invocation
//! runs through, regardless of which frontend received it.
//!
//! Built around this gateway's own ordered eight steps: resolve the tool,
//! check policy, default `cwd`, filter the environment, apply
//! `args_prefix`, run the backend, shape the response, and always record
//! an outcome. The one invariant that holds across every exit point is
//! "never skip recording an outcome" — exactly one audit record per call.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::audit::{AuditRecord, AuditStore, Mode};
use crate::backend::{BackendSet, ExecutionRequest};
use crate::config::{LimitsConfig, NamespaceConfig};
use crate::error::{Error, Result};
use crate::manifest::Manifest;
use crate::pattern::PatternCache;
use crate::policy::PolicyEvaluator;

/// One `tools/call` invocation's parsed arguments, already decoded from
/// the wire's `ToolsCallParams`.
#[derive(Debug, Clone)]
pub struct CallRequest {
    /// The tool name the caller asked for.
    pub tool_name: String,
    /// Caller-supplied positional arguments.
    pub args: Vec<String>,
    /// Caller-supplied working-directory override.
    pub cwd: Option<String>,
}

/// The shaped result of a call that actually reached a backend (§4.E step 7).
#[derive(Debug, Clone)]
pub struct CallOutcome {
    /// Captured stdout, lossily decoded to UTF-8.
    pub stdout: String,
    /// Captured stderr, lossily decoded to UTF-8.
    pub stderr: String,
    /// Process/module exit status.
    pub exit_code: i32,
    /// Set when `exit_code != 0`. Never turned into a JSON-RPC error.
    pub is_error: bool,
    /// Whether the call was killed for exceeding its timeout.
    pub timed_out: bool,
}

/// Wires together every component the pipeline needs: the manifest, the
/// policy evaluator, the backend set, the audit store, and the jail root
/// every `none`/`namespace` call is confined to.
pub struct Dispatcher {
    manifest: Arc<Manifest>,
    policy: PolicyEvaluator,
    backends: Arc<BackendSet>,
    audit: Arc<AuditStore>,
    limits: LimitsConfig,
    jail_root: PathBuf,
}

impl Dispatcher {
    /// Build a dispatcher. `patterns` is shared with whatever already
    /// compiled the manifest's globs at load time.
    #[must_use]
    pub fn new(
        manifest: Arc<Manifest>,
        patterns: Arc<PatternCache>,
        namespace: &NamespaceConfig,
        audit: Arc<AuditStore>,
        limits: LimitsConfig,
        jail_root: PathBuf,
    ) -> Self {
        Self {
            manifest,
            policy: PolicyEvaluator::new(patterns),
            backends: Arc::new(BackendSet::new(namespace.helper_path.clone())),
            audit,
            limits,
            jail_root,
        }
    }

    /// The shared audit store, exposed so frontends can record outcomes
    /// (parse failures, unrecognised methods) that never reach this
    /// pipeline — §4.E step 8's "exactly one record per call" covers those
    /// too, but they never have a tool name to look up, so they don't go
    /// through [`Self::call_tool`] at all.
    #[must_use]
    pub fn audit(&self) -> &Arc<AuditStore> {
        &self.audit
    }

    /// `tools/list`'s manifest view.
    #[must_use]
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Run the full dispatch pipeline for one `tools/call` (§4.E). Always
    /// writes exactly one audit record before returning, on every outcome:
    /// tool-not-found, policy-denied, backend-internal failure, or success.
    pub async fn call_tool(&self, mode: Mode, call: CallRequest, params_json: &str) -> Result<CallOutcome> {
        let started = Instant::now();
        let outcome = self.call_tool_inner(&call).await;
        let duration_ms = elapsed_ms(started);

        match &outcome {
            Ok(result) => {
                let response_json = serde_json::json!({
                    "stdout": result.stdout,
                    "stderr": result.stderr,
                    "exit_code": result.exit_code,
                    "timed_out": result.timed_out,
                })
                .to_string();
                self.record(
                    mode,
                    "tools/call",
                    Some(call.tool_name.clone()),
                    params_json,
                    &response_json,
                    None,
                    duration_ms,
                );
            }
            Err(err) => {
                // A tool-not-found outcome never resolved a tool, so it is
                // recorded with no tool_name (§4.E step 1); every other
                // failure mode did resolve the tool by the time it failed.
                let tool_name = if matches!(err, Error::MethodNotFound(_)) {
                    None
                } else {
                    Some(call.tool_name.clone())
                };
                self.record(mode, "tools/call", tool_name, params_json, "", Some(err.to_string()), duration_ms);
            }
        }

        outcome
    }

    async fn call_tool_inner(&self, call: &CallRequest) -> Result<CallOutcome> {
        // Step 1: tool lookup.
        let tool = self
            .manifest
            .find(&call.tool_name)
            .ok_or_else(|| Error::MethodNotFound(call.tool_name.clone()))?;

        // Step 2: policy evaluation. Must happen before args_prefix is
        // applied — the caller's tail is checked, the tool author's
        // prefix never is (§4.E step 5).
        let decision = self.policy.evaluate_args(tool, &call.args)?;
        if !decision.allowed {
            warn!(tool = %tool.name, reason = %decision.reason, "policy denied call");
            return Err(Error::PolicyDenied {
                reason: decision.reason,
            });
        }

        // Step 3: cwd defaulting.
        let cwd = call
            .cwd
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.jail_root.clone());

        // Step 4: environment filtering.
        let host_env: HashMap<String, String> = std::env::vars().collect();
        let allowed_env_keys = self.manifest.allowed_env_keys_for(tool);
        let env = self.policy.filter_env(allowed_env_keys, &host_env)?;

        // Step 5: args_prefix applied strictly after policy evaluation.
        let mut args = tool.args_prefix.clone();
        args.extend(call.args.iter().cloned());

        let timeout = tool
            .timeout_ms
            .map(std::time::Duration::from_millis)
            .unwrap_or_else(|| self.limits.timeout());
        let max_output_bytes = tool.max_output_bytes.unwrap_or(self.limits.max_output_bytes);

        let request = ExecutionRequest {
            command: tool.command.clone(),
            args,
            cwd,
            jail_root: self.jail_root.clone(),
            env,
            module_path: tool.module_path.clone(),
            timeout,
            max_output_bytes,
        };

        // Step 6: backend selection and execution.
        let result = self.backends.execute(tool.isolation, request).await?;

        // Step 7: response shaping — a non-zero exit is never a JSON-RPC
        // error, only an `is_error` flag on an otherwise-successful
        // response.
        info!(
            tool = %tool.name,
            exit_code = result.exit_code,
            timed_out = result.timed_out,
            duration_ms = result.duration_ms,
            "call completed"
        );

        Ok(CallOutcome {
            stdout: String::from_utf8_lossy(&result.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&result.stderr).into_owned(),
            exit_code: result.exit_code,
            is_error: result.exit_code != 0,
            timed_out: result.timed_out,
        })
    }

    /// Record an audit entry for an outcome, logging (but not propagating)
    /// a failure of the audit write itself — the call already completed
    /// from the caller's point of view, and the audit store being briefly
    /// unavailable must never turn into a user-visible dispatch failure.
    fn record(
        &self,
        mode: Mode,
        method: &str,
        tool_name: Option<String>,
        params_json: &str,
        response_json: &str,
        error: Option<String>,
        duration_ms: u64,
    ) {
        let record = AuditRecord {
            mode,
            method: method.to_string(),
            tool_name,
            params: params_json.to_string(),
            response: response_json.to_string(),
            error,
            request_size: params_json.len(),
            response_size: response_json.len(),
            duration_ms,
        };
        if let Err(e) = self.audit.append(record) {
            warn!(error = %e, "failed to write audit record");
        }
    }
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditFilter;
    use crate::config::{LimitsConfig, NamespaceConfig};
    use crate::manifest::{Isolation, Manifest, Tool, ToolPresentation};

    fn dispatcher_with(tools: Vec<Tool>) -> (Dispatcher, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let jail_root = dir.path().to_path_buf();
        let manifest = Arc::new(Manifest {
            tools,
            allowed_env_keys: vec![],
        });
        let patterns = Arc::new(PatternCache::new());
        let audit = Arc::new(crate::audit::AuditStore::open(&dir.path().join("audit.db")).unwrap());
        let dispatcher = Dispatcher::new(
            manifest,
            patterns,
            &NamespaceConfig::default(),
            audit,
            LimitsConfig::default(),
            jail_root,
        );
        (dispatcher, dir)
    }

    fn echo_tool() -> Tool {
        Tool {
            name: "echo".to_string(),
            description: "echoes".to_string(),
            command: Some("/bin/echo".to_string()),
            args_prefix: vec![],
            allowed_arg_globs: vec![],
            allowed_env_keys: None,
            isolation: Isolation::None,
            module_path: None,
            timeout_ms: None,
            max_output_bytes: None,
            presentation: ToolPresentation::default(),
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_audited_without_tool_name() {
        let (dispatcher, _dir) = dispatcher_with(vec![]);
        let call = CallRequest {
            tool_name: "nope".to_string(),
            args: vec![],
            cwd: None,
        };
        let err = dispatcher.call_tool(Mode::Stdio, call, "{}").await.unwrap_err();
        assert!(matches!(err, Error::MethodNotFound(_)));

        let rows = dispatcher.audit().list(&AuditFilter::default(), 10, 0).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].tool_name.is_none());
        assert!(rows[0].error.is_some());
    }

    #[tokio::test]
    async fn policy_denied_never_invokes_backend_and_is_audited() {
        let mut tool = echo_tool();
        tool.allowed_arg_globs = vec!["--safe".to_string()];
        let (dispatcher, _dir) = dispatcher_with(vec![tool]);
        let call = CallRequest {
            tool_name: "echo".to_string(),
            args: vec!["--dangerous".to_string()],
            cwd: None,
        };
        let err = dispatcher.call_tool(Mode::Stdio, call, "{}").await.unwrap_err();
        assert!(matches!(err, Error::PolicyDenied { .. }));

        let rows = dispatcher.audit().list(&AuditFilter::default(), 10, 0).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].tool_name.as_deref(), Some("echo"));
    }

    #[tokio::test]
    async fn successful_call_audits_exactly_once() {
        let (dispatcher, _dir) = dispatcher_with(vec![echo_tool()]);
        let call = CallRequest {
            tool_name: "echo".to_string(),
            args: vec!["hi".to_string()],
            cwd: None,
        };
        let outcome = dispatcher.call_tool(Mode::Stdio, call, "{}").await.unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert!(!outcome.is_error);
        assert!(outcome.stdout.contains("hi"));

        assert_eq!(dispatcher.audit().count(&AuditFilter::default()).unwrap(), 1);
    }

    #[tokio::test]
    async fn args_prefix_always_leads_caller_args() {
        let mut tool = echo_tool();
        tool.args_prefix = vec!["prefix-marker".to_string()];
        let (dispatcher, _dir) = dispatcher_with(vec![tool]);
        let call = CallRequest {
            tool_name: "echo".to_string(),
            args: vec!["caller-arg".to_string()],
            cwd: None,
        };
        let outcome = dispatcher.call_tool(Mode::Stdio, call, "{}").await.unwrap();
        let prefix_pos = outcome.stdout.find("prefix-marker").unwrap();
        let caller_pos = outcome.stdout.find("caller-arg").unwrap();
        assert!(prefix_pos < caller_pos);
    }
}

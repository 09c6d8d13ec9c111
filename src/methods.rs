//! Shared JSON-RPC method routing (§4.F): both frontends decode one
//! `JsonRpcRequest` and hand it to [`MethodRouter::handle`], which
//! dispatches by method name and always returns a well-formed
//! `JsonRpcResponse` — nothing at this layer propagates a Rust error past
//! its own boundary.
//!
//! `tools/call` is the one method that descends into the dispatch pipeline
//! ([`crate::dispatch::Dispatcher`]); every other method here is answered
//! directly since none of them touch a tool's execution path.

use std::sync::Arc;

use serde_json::Value;

use crate::audit::{AuditRecord, Mode};
use crate::dispatch::{CallRequest, Dispatcher};
use crate::error::rpc_codes;
use crate::manifest::Tool;
use crate::protocol::messages::*;
use crate::protocol::types::*;
use crate::resources::ResultCache;

/// Routes every JSON-RPC method this gateway serves to its handler, sharing
/// one [`Dispatcher`] and one [`ResultCache`] across both frontends.
pub struct MethodRouter {
    dispatcher: Arc<Dispatcher>,
    results: ResultCache,
    server_info: Info,
}

impl MethodRouter {
    /// Build a router over a shared dispatcher.
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            results: ResultCache::new(),
            server_info: Info {
                name: "cmdgate".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }

    /// Handle one JSON-RPC request, returning the response to send back.
    /// Callers must not invoke this for a notification (`request.is_notification()`);
    /// see [`Self::handle_notification`] for that case.
    pub async fn handle(&self, mode: Mode, request: &JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        match request.method.as_str() {
            "initialize" => self.handle_initialize(id, request),
            "tools/list" => self.handle_tools_list(id),
            "tools/call" => self.handle_tools_call(mode, id, request).await,
            "resources/list" => self.handle_resources_list(id),
            "resources/read" => self.handle_resources_read(id, request),
            "ping" => JsonRpcResponse::success(id, serde_json::json!({})),
            other => {
                let params_text = request.params.clone().unwrap_or(Value::Null).to_string();
                self.audit_raw_failure(mode, other, &params_text, "method not found");
                JsonRpcResponse::error(
                    id,
                    rpc_codes::METHOD_NOT_FOUND,
                    format!("unknown method: {other}"),
                )
            }
        }
    }

    /// Handle a notification (a request with no `id`): per §4.F.1, an
    /// unrecognised one is logged and dropped, never an error, and nothing
    /// is ever sent back on any transport.
    pub fn handle_notification(&self, method: &str) {
        match method {
            "notifications/initialized" | "notifications/cancelled" => {
                tracing::debug!(method, "received notification");
            }
            other => {
                tracing::debug!(method = other, "dropped unrecognised notification");
            }
        }
    }

    fn handle_initialize(&self, id: Option<RequestId>, request: &JsonRpcRequest) -> JsonRpcResponse {
        let params_json = request.params.clone().unwrap_or(Value::Null);
        match serde_json::from_value::<InitializeParams>(params_json) {
            Ok(_params) => {
                let result = InitializeResult {
                    protocol_version: PROTOCOL_VERSION.to_string(),
                    capabilities: ServerCapabilities {
                        tools: ToolsCapability { list_changed: false },
                        resources: Some(ResourcesCapability {
                            subscribe: false,
                            list_changed: false,
                        }),
                    },
                    server_info: self.server_info.clone(),
                };
                JsonRpcResponse::success(id, serde_json::to_value(result).unwrap_or(Value::Null))
            }
            Err(e) => JsonRpcResponse::error(
                id,
                rpc_codes::INVALID_PARAMS,
                format!("invalid initialize params: {e}"),
            ),
        }
    }

    fn handle_tools_list(&self, id: Option<RequestId>) -> JsonRpcResponse {
        let tools = self
            .dispatcher
            .manifest()
            .tools
            .iter()
            .map(tool_to_wire)
            .collect();
        let result = ToolsListResult { tools };
        JsonRpcResponse::success(id, serde_json::to_value(result).unwrap_or(Value::Null))
    }

    async fn handle_tools_call(
        &self,
        mode: Mode,
        id: Option<RequestId>,
        request: &JsonRpcRequest,
    ) -> JsonRpcResponse {
        let params_json = request.params.clone().unwrap_or(Value::Null);
        let params_text = params_json.to_string();

        let parsed: ToolsCallParams = match serde_json::from_value(params_json) {
            Ok(p) => p,
            Err(e) => {
                // No tool name was ever resolved, so this can't go through
                // `Dispatcher::call_tool` — it records its own audit entry
                // directly (§4.E step 8 still applies: every outcome is
                // audited, even one that never entered the pipeline proper).
                self.audit_raw_failure(mode, "tools/call", &params_text, &e.to_string());
                return JsonRpcResponse::error(
                    id,
                    rpc_codes::INVALID_PARAMS,
                    format!("invalid tools/call params: {e}"),
                );
            }
        };

        let call = CallRequest {
            tool_name: parsed.name.clone(),
            args: parsed.arguments.args.clone(),
            cwd: parsed.arguments.cwd.clone(),
        };

        match self.dispatcher.call_tool(mode, call, &params_text).await {
            Ok(outcome) => {
                self.results.record(&parsed.name, &outcome.stdout);
                let result = ToolsCallResult {
                    content: vec![Content::Text { text: outcome.stdout }],
                    is_error: outcome.is_error,
                    metadata: Some(ToolsCallMetadata {
                        exit_code: outcome.exit_code,
                        stderr: outcome.stderr,
                    }),
                    meta: Some(serde_json::json!({
                        "ui": { "resource_uri": format!("ui://{}/result", parsed.name) }
                    })),
                };
                JsonRpcResponse::success(id, serde_json::to_value(result).unwrap_or(Value::Null))
            }
            Err(e) => JsonRpcResponse::error(id, e.to_rpc_code(), e.to_string()),
        }
    }

    fn handle_resources_list(&self, id: Option<RequestId>) -> JsonRpcResponse {
        let manifest = self.dispatcher.manifest();
        let resources = self
            .results
            .list()
            .into_iter()
            .filter(|resource| {
                manifest
                    .find(&resource.name)
                    .is_some_and(|tool| tool.presentation.has_hints())
            })
            .collect();
        let result = ResourcesListResult { resources };
        JsonRpcResponse::success(id, serde_json::to_value(result).unwrap_or(Value::Null))
    }

    fn handle_resources_read(&self, id: Option<RequestId>, request: &JsonRpcRequest) -> JsonRpcResponse {
        let params_json = request.params.clone().unwrap_or(Value::Null);
        let parsed: ResourcesReadParams = match serde_json::from_value(params_json) {
            Ok(p) => p,
            Err(e) => {
                return JsonRpcResponse::error(
                    id,
                    rpc_codes::INVALID_PARAMS,
                    format!("invalid resources/read params: {e}"),
                )
            }
        };

        let template_path = ResultCache::tool_name_from_uri(&parsed.uri)
            .ok()
            .and_then(|tool_name| self.dispatcher.manifest().find(tool_name))
            .and_then(|tool| tool.presentation.template_path.clone());

        match self.results.read(&parsed.uri, template_path.as_deref()) {
            Ok(contents) => {
                let result = ResourcesReadResult {
                    contents: vec![contents],
                };
                JsonRpcResponse::success(id, serde_json::to_value(result).unwrap_or(Value::Null))
            }
            Err(e) => JsonRpcResponse::error(id, e.to_rpc_code(), e.to_string()),
        }
    }

    /// Record an outcome that never reached [`Dispatcher::call_tool`]:
    /// malformed params for a known method, an unrecognised method name,
    /// or (via [`Self::audit_envelope_failure`]) an envelope that didn't
    /// even parse as JSON-RPC. The audit trail covers every kind of
    /// outcome, not only ones that resolved a tool name.
    pub fn audit_raw_failure(&self, mode: Mode, method: &str, raw: &str, error: &str) {
        let record = AuditRecord {
            mode,
            method: method.to_string(),
            tool_name: None,
            params: raw.to_string(),
            response: String::new(),
            error: Some(error.to_string()),
            request_size: raw.len(),
            response_size: 0,
            duration_ms: 0,
        };
        if let Err(e) = self.dispatcher.audit().append(record) {
            tracing::warn!(error = %e, "failed to write audit record");
        }
    }

    /// Record a top-level JSON-RPC envelope that failed to parse at all —
    /// there is no method name to attribute it to, so the method field
    /// carries a fixed marker.
    pub fn audit_envelope_failure(&self, mode: Mode, raw: &str, error: &str) {
        self.audit_raw_failure(mode, "parse_error", raw, error);
    }
}

fn tool_to_wire(tool: &Tool) -> crate::protocol::types::Tool {
    let presentation = &tool.presentation;
    let meta = if presentation.has_hints() {
        Some(serde_json::json!({
            "presentation": {
                "title": presentation.title,
                "readOnly": presentation.read_only,
                "destructive": presentation.destructive,
                "idempotent": presentation.idempotent,
                "openWorld": presentation.open_world,
            }
        }))
    } else {
        None
    };

    crate::protocol::types::Tool {
        name: tool.name.clone(),
        description: Some(tool.description.clone()),
        input_schema: tool_input_schema(),
        meta,
    }
}

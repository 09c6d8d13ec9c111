//! JSON-RPC 2.0 envelope and per-method request/response shapes.
//!
//! Grounded on `protocol/messages.rs`'s envelope types (`JsonRpcRequest`,
//! `JsonRpcResponse`, untagged `RequestId`, the `JsonRpcMessage` enum used
//! to classify an inbound line before routing it) — trimmed to the method
//! set in §4.F plus the two notifications this gateway actually accepts.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{ClientCapabilities, Info, Resource, ResourceContents, ServerCapabilities, Tool};

/// The JSON-RPC protocol version string this gateway requires on the HTTP
/// frontend (§4.F.2) and reports during `initialize`.
pub const PROTOCOL_VERSION: &str = "2025-06-18";

/// A parsed, well-formed JSON-RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Request id. Absent/`null` means this is actually a notification —
    /// see [`JsonRpcMessage`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    /// Method name.
    pub method: String,
    /// Parameters, method-specific.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// True iff this request carries no id — a notification per JSON-RPC
    /// 2.0 and per §4.F.1's explicit id-or-null rule.
    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// A JSON-RPC response: exactly one of `result`/`error` is populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Echoes the request's id, or `null` for responses to malformed
    /// requests whose id could not be recovered.
    pub id: Option<RequestId>,
    /// Result payload, present on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload, present on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Build a success response.
    #[must_use]
    pub fn success(id: Option<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response.
    #[must_use]
    pub fn error(id: Option<RequestId>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code (§4.F / §7).
    pub code: i32,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A JSON-RPC request id: string or number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// String-typed id.
    String(String),
    /// Number-typed id.
    Number(i64),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

// ---------------------------------------------------------------------
// initialize
// ---------------------------------------------------------------------

/// `initialize` request params.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeParams {
    /// Client's protocol version.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Client capabilities (accepted, not otherwise inspected).
    #[serde(default)]
    pub capabilities: ClientCapabilities,
    /// Client identification.
    #[serde(rename = "clientInfo")]
    pub client_info: Info,
}

/// `initialize` result.
#[derive(Debug, Clone, Serialize)]
pub struct InitializeResult {
    /// Echoes [`PROTOCOL_VERSION`].
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// What this gateway supports.
    pub capabilities: ServerCapabilities,
    /// This gateway's identification.
    #[serde(rename = "serverInfo")]
    pub server_info: Info,
}

// ---------------------------------------------------------------------
// tools/list, tools/call
// ---------------------------------------------------------------------

/// `tools/list` result.
#[derive(Debug, Clone, Serialize)]
pub struct ToolsListResult {
    /// Every tool the caller's identity is permitted to see (§1: denied
    /// tools are reported, not hidden — every configured tool is listed).
    pub tools: Vec<Tool>,
}

/// `tools/call` request params.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsCallParams {
    /// Tool name.
    pub name: String,
    /// `{cwd?: string, args?: string[]}`.
    #[serde(default)]
    pub arguments: ToolsCallArguments,
}

/// The `arguments` object of a `tools/call` request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolsCallArguments {
    /// Working directory override. Defaults to the jail root (§4.E step 3).
    #[serde(default)]
    pub cwd: Option<String>,
    /// Caller-supplied positional arguments.
    #[serde(default)]
    pub args: Vec<String>,
}

/// `tools/call` result.
#[derive(Debug, Clone, Serialize)]
pub struct ToolsCallResult {
    /// Always one text item: the command's stdout.
    pub content: Vec<super::types::Content>,
    /// Set when the command ran but exited non-zero (§4.E step 7).
    #[serde(rename = "isError", skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
    /// Side-channel exit status/stderr, never the JSON-RPC error channel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ToolsCallMetadata>,
    /// UI hint linking to a rendered presentation of this result.
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// `tools/call` response metadata.
#[derive(Debug, Clone, Serialize)]
pub struct ToolsCallMetadata {
    /// Process/module exit status (`-1` iff timed out).
    pub exit_code: i32,
    /// Captured stderr.
    pub stderr: String,
}

// ---------------------------------------------------------------------
// resources/list, resources/read
// ---------------------------------------------------------------------

/// `resources/list` result.
#[derive(Debug, Clone, Serialize)]
pub struct ResourcesListResult {
    /// One entry per tool that declares UI presentation hints.
    pub resources: Vec<Resource>,
}

/// `resources/read` request params.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourcesReadParams {
    /// `ui://<tool>/result[?data=<base64url>]`.
    pub uri: String,
}

/// `resources/read` result.
#[derive(Debug, Clone, Serialize)]
pub struct ResourcesReadResult {
    /// Always exactly one entry.
    pub contents: Vec<ResourceContents>,
}

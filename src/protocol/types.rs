//! Wire-level JSON-RPC payload types.
//!
//! Trimmed to the method set this gateway actually serves (§4.F):
//! tool/resource listing and calling, `initialize`, and `ping`. Prompts,
//! sampling, elicitation, roots, and resource-subscription types have no
//! counterpart here — this gateway never acts as an MCP *client* to
//! another server, so none of that surface applies.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool entry as returned by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Tool name.
    pub name: String,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Input JSON Schema: always `{cwd?: string, args?: string[]}`, no
    /// required fields (§6).
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
    /// Presentation metadata, present only for tools with UI hints.
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// Build the fixed input schema every tool shares.
#[must_use]
pub fn tool_input_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "cwd": {"type": "string"},
            "args": {"type": "array", "items": {"type": "string"}},
        },
        "required": [],
    })
}

/// A resource entry as returned by `resources/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    /// `ui://<tool>/result` URI.
    pub uri: String,
    /// Resource name (the tool name).
    pub name: String,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// MIME type of the rendered resource.
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

/// The body of one `resources/read` content entry. This gateway only ever
/// renders text documents (a presentation of a tool's last output); a
/// binary/blob variant has no counterpart here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceContents {
    /// The URI that was read.
    pub uri: String,
    /// MIME type.
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    /// Rendered text.
    pub text: String,
}

/// Content item in a `tools/call` response. Only `text` is produced by
/// this gateway's tool results.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    /// Text content — always present, carrying the command's stdout.
    Text {
        /// The text payload.
        text: String,
    },
}

/// Client or server identification, exchanged during `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Info {
    /// Name.
    pub name: String,
    /// Version.
    pub version: String,
}

/// Server capabilities advertised during `initialize`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Tools capability — always present since this gateway only exists to
    /// serve tools.
    pub tools: ToolsCapability,
    /// Resources capability — present only when the richer plugin-loader
    /// variant (UI metadata, `resources/*`) is active. See DESIGN.md.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesCapability>,
}

/// Tools capability flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsCapability {
    /// Whether `notifications/tools/list_changed` is emitted. This gateway
    /// never emits it — the manifest is immutable for the process lifetime
    /// (§3) — so this is always `false`.
    #[serde(rename = "listChanged", default)]
    pub list_changed: bool,
}

/// Resources capability flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourcesCapability {
    /// Subscriptions are not supported.
    #[serde(default)]
    pub subscribe: bool,
    /// List-changed notifications are not supported (same reasoning as
    /// `ToolsCapability::list_changed`).
    #[serde(rename = "listChanged", default)]
    pub list_changed: bool,
}

/// Client capabilities, accepted but not otherwise inspected — this
/// gateway doesn't negotiate client-side features like sampling or
/// elicitation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientCapabilities {
    /// Anything the client advertises that this gateway doesn't recognise
    /// is accepted and ignored (forward compatibility).
    #[serde(flatten)]
    pub other: std::collections::HashMap<String, Value>,
}

//! JSON-RPC wire protocol: envelope, error codes, and per-method payloads.

mod messages;
mod types;

pub use messages::{
    InitializeParams, InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
    RequestId, ResourcesListResult, ResourcesReadParams, ResourcesReadResult, ToolsCallArguments,
    ToolsCallMetadata, ToolsCallParams, ToolsCallResult, ToolsListResult, PROTOCOL_VERSION,
};
pub use types::{
    tool_input_schema, ClientCapabilities, Content, Info, Resource, ResourceContents,
    ResourcesCapability, ServerCapabilities, Tool, ToolsCapability,
};

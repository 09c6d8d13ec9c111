//! Error types for the gateway.

use std::io;

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway errors.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration or manifest error discovered at load time.
    #[error("configuration error: {0}")]
    Config(String),

    /// A tool name referenced by a caller does not exist in the manifest.
    #[error("unknown tool: {0}")]
    MethodNotFound(String),

    /// An unrecognised JSON-RPC method was requested.
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    /// Policy evaluation denied the call.
    #[error("policy denied: {reason}")]
    PolicyDenied {
        /// Human-readable reason the evaluator gave.
        reason: String,
    },

    /// A backend failed for reasons internal to it (spawn failure,
    /// instantiation failure) rather than a non-zero exit from the tool
    /// itself.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// The caller is not authenticated, or the credential presented is
    /// invalid.
    #[error("unauthorised")]
    Unauthorized,

    /// Malformed JSON-RPC envelope.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A JSON-RPC method's params did not match what the method expects.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// JSON (de)serialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Audit store failure.
    #[error("audit store error: {0}")]
    Audit(String),

    /// I/O failure.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Catch-all for failures that don't fit another variant.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error onto the JSON-RPC error code it should be reported
    /// as, per the domain error table.
    #[must_use]
    pub fn to_rpc_code(&self) -> i32 {
        match self {
            Self::Json(_) => rpc_codes::PARSE_ERROR,
            Self::InvalidRequest(_) => rpc_codes::INVALID_REQUEST,
            Self::MethodNotFound(_) | Self::UnknownMethod(_) => rpc_codes::METHOD_NOT_FOUND,
            Self::InvalidParams(_) => rpc_codes::INVALID_PARAMS,
            Self::Unauthorized => rpc_codes::UNAUTHORIZED,
            Self::PolicyDenied { .. } => rpc_codes::POLICY_DENIED,
            Self::ExecutionFailed(_) => rpc_codes::EXECUTION_FAILED,
            Self::Config(_) | Self::Audit(_) | Self::Io(_) | Self::Internal(_) => {
                rpc_codes::INTERNAL_ERROR
            }
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Audit(e.to_string())
    }
}

/// JSON-RPC error codes, standard and domain-specific.
pub mod rpc_codes {
    /// Parse error — invalid JSON was received.
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid Request — the JSON sent is not a valid request object.
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error.
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Caller is not authorised.
    pub const UNAUTHORIZED: i32 = -32001;
    /// Policy evaluator denied the call.
    pub const POLICY_DENIED: i32 = -32002;
    /// Backend execution failed internally.
    pub const EXECUTION_FAILED: i32 = -32003;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_denied_maps_to_domain_code() {
        let err = Error::PolicyDenied {
            reason: "arg did not match any allowed pattern".into(),
        };
        assert_eq!(err.to_rpc_code(), -32002);
    }

    #[test]
    fn method_not_found_maps_to_standard_code() {
        let err = Error::MethodNotFound("frobnicate".into());
        assert_eq!(err.to_rpc_code(), -32601);
    }

    #[test]
    fn execution_failed_maps_to_domain_code() {
        let err = Error::ExecutionFailed("namespace helper not found".into());
        assert_eq!(err.to_rpc_code(), -32003);
    }

    #[test]
    fn unauthorized_maps_to_domain_code() {
        assert_eq!(Error::Unauthorized.to_rpc_code(), -32001);
    }
}

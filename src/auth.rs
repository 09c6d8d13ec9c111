//! Bearer-token authentication shared by both frontends.
//!
//! Simplified down to the one credential kind this gateway has (no API
//! keys, no public-path bypass — every call on an authenticated transport
//! is authenticated, per §4.F). The token comparison itself uses `subtle`'s
//! constant-time equality: the stdio frontend authenticates exactly once
//! per process, at construction, so a timing side-channel there is cheap
//! to close.

use subtle::ConstantTimeEq;

/// Compare two strings for equality in constant time (w.r.t. their
/// contents; still short-circuits on length, which reveals only the
/// credential's length, not its value).
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Resolve a configured bearer-token value. The literal `"auto"` generates
/// a fresh random token and logs it once; any other value is used
/// verbatim; `None` disables authentication on that transport.
#[must_use]
pub fn resolve_bearer_token(configured: Option<&str>) -> Option<String> {
    match configured {
        Some("auto") => {
            let token = generate_token();
            tracing::info!(token = %token, "auto-generated bearer token");
            Some(token)
        }
        Some(value) => Some(value.to_string()),
        None => None,
    }
}

fn generate_token() -> String {
    use rand::Rng;
    let random_bytes: [u8; 32] = rand::rng().random();
    format!(
        "cmdgate_{}",
        base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, random_bytes)
    )
}

/// A one-shot authenticator for the stdio frontend: the expected token is
/// resolved once at process construction and every inbound request is
/// checked against it — there is no per-message credential exchange on
/// this transport (§4.F.1).
pub struct StdioAuthenticator {
    expected: Option<String>,
}

impl StdioAuthenticator {
    /// Build an authenticator from a configured token value. `None`
    /// disables authentication.
    #[must_use]
    pub fn new(configured: Option<&str>) -> Self {
        Self {
            expected: resolve_bearer_token(configured),
        }
    }

    /// Whether authentication is required at all on this transport.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.expected.is_some()
    }

    /// Check a presented token. Always `true` when authentication is
    /// disabled.
    #[must_use]
    pub fn check(&self, presented: &str) -> bool {
        match &self.expected {
            Some(expected) => constant_time_eq(expected, presented),
            None => true,
        }
    }
}

/// Parse an `Authorization: Bearer <token>` header value, returning the
/// token on success.
#[must_use]
pub fn parse_bearer_header(value: &str) -> Option<&str> {
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
}

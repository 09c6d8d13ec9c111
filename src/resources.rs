//! Per-tool "last result" presentation surface (§6): every successful
//! `tools/call` updates a `ui://<tool>/result` resource holding that call's
//! stdout, readable later via `resources/read` — including a
//! `?data=<base64url>` variant for rendering a specific captured result
//! rather than just the most recent one.
//!
//! A tool whose presentation carries a `template_path` gets its captured
//! output rendered into that template (a "presentation document") rather
//! than returned as raw `text/plain`; see [`render_into_template`].
//!
//! Pairs tool presentation hints (feeding a richer `tools/list`) with the
//! `resources/*` surface the richer plugin-loader variant calls for (see
//! DESIGN.md).

use std::path::Path;

use dashmap::DashMap;

use crate::error::{Error, Result};
use crate::protocol::types::{Resource, ResourceContents};

/// Placeholder substituted with a tool's captured output inside a
/// presentation template.
const OUTPUT_PLACEHOLDER: &str = "{{output}}";

/// Render `output` into the template at `template_path`, substituting
/// [`OUTPUT_PLACEHOLDER`].
///
/// # Errors
///
/// Returns [`Error::Internal`] if the template file cannot be read.
fn render_into_template(template_path: &Path, output: &str) -> Result<String> {
    let template = std::fs::read_to_string(template_path).map_err(|e| {
        Error::Internal(format!(
            "reading presentation template {}: {e}",
            template_path.display()
        ))
    })?;
    Ok(template.replace(OUTPUT_PLACEHOLDER, output))
}

/// Holds the most recent captured stdout per tool, keyed by tool name.
pub struct ResultCache {
    last: DashMap<String, String>,
}

impl ResultCache {
    /// An empty cache — nothing has run yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last: DashMap::new(),
        }
    }

    /// Record a tool's latest captured stdout, overwriting any prior one.
    pub fn record(&self, tool_name: &str, text: &str) {
        self.last.insert(tool_name.to_string(), text.to_string());
    }

    /// One `Resource` entry per tool that has ever produced a result.
    #[must_use]
    pub fn list(&self) -> Vec<Resource> {
        self.last
            .iter()
            .map(|entry| Resource {
                uri: format!("ui://{}/result", entry.key()),
                name: entry.key().clone(),
                description: None,
                mime_type: "text/plain".to_string(),
            })
            .collect()
    }

    /// Extract the tool name `path` segment from a `ui://<tool>/result[...]`
    /// URI, without resolving anything against the cache.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParams`] if the URI isn't of this shape.
    pub fn tool_name_from_uri(uri: &str) -> Result<&str> {
        let rest = uri
            .strip_prefix("ui://")
            .ok_or_else(|| Error::InvalidParams(format!("not a ui:// resource uri: {uri}")))?;
        let path = rest.split_once('?').map_or(rest, |(path, _)| path);
        path.strip_suffix("/result")
            .ok_or_else(|| Error::InvalidParams(format!("unsupported resource path: {uri}")))
    }

    /// Resolve a `ui://<tool>/result[?data=<base64url>]` URI to its
    /// contents, rendering through `template_path` (the tool's
    /// `presentation.template_path`, if any) into a presentation document
    /// instead of returning raw captured output.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParams`] if the URI isn't of this shape, its
    /// `data` query value isn't valid base64url, or (when no `data` query
    /// is present) no result has been recorded for that tool yet. Returns
    /// [`Error::Internal`] if `template_path` is set but cannot be read.
    pub fn read(&self, uri: &str, template_path: Option<&Path>) -> Result<ResourceContents> {
        let rest = uri
            .strip_prefix("ui://")
            .ok_or_else(|| Error::InvalidParams(format!("not a ui:// resource uri: {uri}")))?;
        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (rest, None),
        };
        let tool_name = path
            .strip_suffix("/result")
            .ok_or_else(|| Error::InvalidParams(format!("unsupported resource path: {uri}")))?;

        let raw = if let Some(query) = query {
            if let Some(data) = query.strip_prefix("data=") {
                let bytes = base64::Engine::decode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, data)
                    .map_err(|e| Error::InvalidParams(format!("invalid base64url data: {e}")))?;
                Some(String::from_utf8_lossy(&bytes).into_owned())
            } else {
                None
            }
        } else {
            None
        };

        let raw = match raw {
            Some(raw) => raw,
            None => self
                .last
                .get(tool_name)
                .map(|entry| entry.clone())
                .ok_or_else(|| Error::InvalidParams(format!("no cached result for tool {tool_name:?}")))?,
        };

        match template_path {
            Some(template_path) => Ok(ResourceContents {
                uri: uri.to_string(),
                mime_type: "text/html".to_string(),
                text: render_into_template(template_path, &raw)?,
            }),
            None => Ok(ResourceContents {
                uri: uri.to_string(),
                mime_type: "text/plain".to_string(),
                text: raw,
            }),
        }
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new()
    }
}

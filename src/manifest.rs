//! Plugin manifest: tool definitions and the validation that runs once at
//! load time.
//!
//! Grounded on `capability/definition.rs` (struct shape, `#[serde(default)]`
//! fields, a `to_mcp_tool()`-style conversion into the wire `Tool` type) and
//! `capability/loader.rs` (parse-then-validate-with-severity idiom), but
//! flattened: the manifest here is one JSON file holding a flat tool list,
//! not a directory of per-capability YAML files with fallback-provider
//! arrays, since the distilled spec's manifest shape is much simpler.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::pattern::PatternCache;

/// How a tool's command runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Isolation {
    /// Run directly on the host, confined only by the jail-root check.
    None,
    /// Run inside fresh OS namespaces via the external namespace helper.
    Namespace,
    /// Run as a WebAssembly guest module.
    Wasm,
}

/// UI presentation hints carried alongside a tool definition, consumed by
/// `tools/list` responses. Part of the richer plugin-loader variant this
/// crate adopts — see DESIGN.md.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolPresentation {
    /// Human-facing title, distinct from the machine `name`.
    #[serde(default)]
    pub title: Option<String>,
    /// Hints that the call only reads state.
    #[serde(default)]
    pub read_only: bool,
    /// Hints that the call may destroy state irreversibly.
    #[serde(default)]
    pub destructive: bool,
    /// Hints that repeated identical calls have the same effect as one.
    #[serde(default)]
    pub idempotent: bool,
    /// Hints that the tool's effects are visible outside this gateway.
    #[serde(default)]
    pub open_world: bool,
    /// Path to a presentation template, resolved against the manifest's
    /// directory the same way `module_path` is. When set, `resources/read`
    /// renders the tool's last captured output into this template instead
    /// of returning it as raw `text/plain`.
    #[serde(default)]
    pub template_path: Option<PathBuf>,
}

impl ToolPresentation {
    /// Whether any hint was actually set, as opposed to an all-default
    /// (absent) presentation. Tools without a presentation hint are listed
    /// in `tools/list` without `_meta` and are not exposed via
    /// `resources/*` at all.
    #[must_use]
    pub fn has_hints(&self) -> bool {
        self.title.is_some()
            || self.read_only
            || self.destructive
            || self.idempotent
            || self.open_world
            || self.template_path.is_some()
    }
}

/// One entry in the plugin manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Unique name within the manifest.
    pub name: String,
    /// Shown to callers in `tools/list`.
    pub description: String,
    /// The command to run. Required unless `isolation == Wasm`.
    #[serde(default)]
    pub command: Option<String>,
    /// Arguments prepended to the caller's, after policy evaluation.
    #[serde(default)]
    pub args_prefix: Vec<String>,
    /// Glob patterns the joined caller argv must match at least one of.
    /// Empty means "allow any arguments".
    #[serde(default)]
    pub allowed_arg_globs: Vec<String>,
    /// Per-tool override of the manifest-level `allowed_env_keys`. `None`
    /// means "use the manifest default".
    #[serde(default)]
    pub allowed_env_keys: Option<Vec<String>>,
    /// Isolation strategy.
    #[serde(default = "default_isolation")]
    pub isolation: Isolation,
    /// WebAssembly module path. Required iff `isolation == Wasm`.
    #[serde(default)]
    pub module_path: Option<PathBuf>,
    /// Overrides the default 30s timeout.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Overrides the default 1MiB per-stream output cap.
    #[serde(default)]
    pub max_output_bytes: Option<usize>,
    /// UI presentation hints.
    #[serde(default)]
    pub presentation: ToolPresentation,
}

fn default_isolation() -> Isolation {
    Isolation::None
}

/// Top-level manifest shape: `{ "tools": [...], "allowed_env_keys": [...] }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// The tool catalogue.
    pub tools: Vec<Tool>,
    /// Default environment-key allow-list applied to every tool that
    /// doesn't declare its own `allowed_env_keys`.
    #[serde(default)]
    pub allowed_env_keys: Vec<String>,
}

impl Manifest {
    /// Load, parse, and validate a manifest file. Relative paths inside it
    /// (a tool's `module_path`) resolve against the manifest's own
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read, is not valid
    /// JSON, or fails structural validation (duplicate names, `..`
    /// traversal, missing required fields for the declared isolation, or
    /// an `allowed_arg_globs`/`allowed_env_keys` pattern that fails to
    /// compile).
    pub fn load(path: &Path, patterns: &PatternCache) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("reading manifest {}: {e}", path.display())))?;
        let mut manifest: Manifest = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("parsing manifest {}: {e}", path.display())))?;

        let manifest_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        for tool in &mut manifest.tools {
            resolve_module_path(tool, &manifest_dir)?;
            resolve_template_path(tool, &manifest_dir)?;
        }

        validate(&manifest, patterns)?;
        Ok(manifest)
    }

    /// Look up a tool by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Effective `allowed_env_keys` for a tool: its own override, or the
    /// manifest default.
    #[must_use]
    pub fn allowed_env_keys_for<'a>(&'a self, tool: &'a Tool) -> &'a [String] {
        tool.allowed_env_keys
            .as_deref()
            .unwrap_or(&self.allowed_env_keys)
    }
}

fn resolve_module_path(tool: &mut Tool, manifest_dir: &Path) -> Result<()> {
    let Some(module_path) = &tool.module_path else {
        return Ok(());
    };
    if module_path.is_absolute() {
        return Ok(());
    }
    let resolved = manifest_dir.join(module_path);
    tool.module_path = Some(resolved);
    Ok(())
}

fn resolve_template_path(tool: &mut Tool, manifest_dir: &Path) -> Result<()> {
    let Some(template_path) = &tool.presentation.template_path else {
        return Ok(());
    };
    if template_path.is_absolute() {
        return Ok(());
    }
    let resolved = manifest_dir.join(template_path);
    tool.presentation.template_path = Some(resolved);
    Ok(())
}

fn contains_traversal(path: &str) -> bool {
    Path::new(path)
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
}

fn validate(manifest: &Manifest, patterns: &PatternCache) -> Result<()> {
    let mut seen = HashSet::new();
    for tool in &manifest.tools {
        if !seen.insert(tool.name.as_str()) {
            return Err(Error::Config(format!("duplicate tool name: {}", tool.name)));
        }

        match tool.isolation {
            Isolation::Wasm => {
                if tool.module_path.is_none() {
                    return Err(Error::Config(format!(
                        "tool {:?} has isolation=wasm but no module_path",
                        tool.name
                    )));
                }
            }
            Isolation::None | Isolation::Namespace => {
                if tool.command.is_none() {
                    return Err(Error::Config(format!(
                        "tool {:?} requires a command for isolation={:?}",
                        tool.name, tool.isolation
                    )));
                }
            }
        }

        if let Some(command) = &tool.command {
            if contains_traversal(command) {
                return Err(Error::Config(format!(
                    "tool {:?} command contains a '..' path segment",
                    tool.name
                )));
            }
        }
        for arg in &tool.args_prefix {
            if contains_traversal(arg) {
                return Err(Error::Config(format!(
                    "tool {:?} args_prefix contains a '..' path segment",
                    tool.name
                )));
            }
        }
        if let Some(module_path) = &tool.module_path {
            if contains_traversal(&module_path.to_string_lossy()) {
                return Err(Error::Config(format!(
                    "tool {:?} module_path contains a '..' path segment",
                    tool.name
                )));
            }
        }
        if let Some(template_path) = &tool.presentation.template_path {
            if contains_traversal(&template_path.to_string_lossy()) {
                return Err(Error::Config(format!(
                    "tool {:?} template_path contains a '..' path segment",
                    tool.name
                )));
            }
        }

        for glob in &tool.allowed_arg_globs {
            patterns.compile(glob)?;
        }
        for glob in manifest.allowed_env_keys_for(tool) {
            patterns.compile(glob)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_manifest(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("manifest.json");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_minimal_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(
            &dir,
            r#"{"tools":[{"name":"echo","description":"echoes","command":"/bin/echo"}]}"#,
        );
        let patterns = PatternCache::new();
        let manifest = Manifest::load(&path, &patterns).unwrap();
        assert_eq!(manifest.tools.len(), 1);
        assert_eq!(manifest.find("echo").unwrap().isolation, Isolation::None);
    }

    #[test]
    fn rejects_duplicate_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(
            &dir,
            r#"{"tools":[
                {"name":"a","description":"x","command":"/bin/true"},
                {"name":"a","description":"y","command":"/bin/false"}
            ]}"#,
        );
        let patterns = PatternCache::new();
        assert!(Manifest::load(&path, &patterns).is_err());
    }

    #[test]
    fn wasm_requires_module_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(
            &dir,
            r#"{"tools":[{"name":"w","description":"x","isolation":"wasm"}]}"#,
        );
        let patterns = PatternCache::new();
        assert!(Manifest::load(&path, &patterns).is_err());
    }

    #[test]
    fn non_wasm_requires_command() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(
            &dir,
            r#"{"tools":[{"name":"w","description":"x","isolation":"namespace"}]}"#,
        );
        let patterns = PatternCache::new();
        assert!(Manifest::load(&path, &patterns).is_err());
    }

    #[test]
    fn rejects_parent_dir_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(
            &dir,
            r#"{"tools":[{"name":"w","description":"x","command":"../../bin/sh"}]}"#,
        );
        let patterns = PatternCache::new();
        assert!(Manifest::load(&path, &patterns).is_err());
    }

    #[test]
    fn rejects_invalid_glob_at_load_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(
            &dir,
            r#"{"tools":[{"name":"w","description":"x","command":"/bin/true","allowed_arg_globs":["[unterminated"]}]}"#,
        );
        let patterns = PatternCache::new();
        assert!(Manifest::load(&path, &patterns).is_err());
    }

    #[test]
    fn relative_module_path_resolves_against_manifest_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(
            &dir,
            r#"{"tools":[{"name":"w","description":"x","isolation":"wasm","module_path":"mods/w.wasm"}]}"#,
        );
        let patterns = PatternCache::new();
        let manifest = Manifest::load(&path, &patterns).unwrap();
        let resolved = manifest.find("w").unwrap().module_path.as_ref().unwrap();
        assert!(resolved.starts_with(dir.path()));
    }

    #[test]
    fn relative_template_path_resolves_against_manifest_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(
            &dir,
            r#"{"tools":[{"name":"w","description":"x","command":"/bin/true","presentation":{"template_path":"views/result.html"}}]}"#,
        );
        let patterns = PatternCache::new();
        let manifest = Manifest::load(&path, &patterns).unwrap();
        let resolved = manifest
            .find("w")
            .unwrap()
            .presentation
            .template_path
            .as_ref()
            .unwrap();
        assert!(resolved.starts_with(dir.path()));
    }

    #[test]
    fn rejects_template_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(
            &dir,
            r#"{"tools":[{"name":"w","description":"x","command":"/bin/true","presentation":{"template_path":"../escape.html"}}]}"#,
        );
        let patterns = PatternCache::new();
        assert!(Manifest::load(&path, &patterns).is_err());
    }

    #[test]
    fn tool_level_env_override_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(
            &dir,
            r#"{"tools":[{"name":"w","description":"x","command":"/bin/true","allowed_env_keys":["PATH"]}],"allowed_env_keys":["HOME"]}"#,
        );
        let patterns = PatternCache::new();
        let manifest = Manifest::load(&path, &patterns).unwrap();
        let tool = manifest.find("w").unwrap();
        assert_eq!(manifest.allowed_env_keys_for(tool), &["PATH".to_string()]);
    }
}

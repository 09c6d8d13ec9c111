//! Policy evaluator: per-call argument and environment-key filtering.
//!
//! An allow/deny evaluation shape (`check(...) -> Result<()>`-style
//! decision with a logged reason), built around the richer
//! [`crate::pattern::PatternCache`] glob language and this gateway's own
//! `evaluate_args`/`filter_env` contracts — this gateway has no concept of
//! multiple upstream servers to qualify a tool name by.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::manifest::Tool;
use crate::pattern::PatternCache;

/// The outcome of evaluating one call's arguments against a tool's policy.
#[derive(Debug, Clone)]
pub struct PolicyDecision {
    /// Whether the call is allowed to proceed.
    pub allowed: bool,
    /// Human-readable explanation, always populated.
    pub reason: String,
    /// Names of the patterns that matched (empty on denial).
    pub matched_rules: Vec<String>,
}

impl PolicyDecision {
    fn allow(reason: impl Into<String>, matched_rules: Vec<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
            matched_rules,
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            matched_rules: Vec::new(),
        }
    }
}

/// Evaluates tool-call arguments and filters environments, backed by a
/// shared [`PatternCache`].
pub struct PolicyEvaluator {
    patterns: Arc<PatternCache>,
}

impl PolicyEvaluator {
    /// Build an evaluator over the given pattern cache.
    #[must_use]
    pub fn new(patterns: Arc<PatternCache>) -> Self {
        Self { patterns }
    }

    /// Decide whether `args` are allowed for `tool`.
    ///
    /// An empty `allowed_arg_globs` list allows unconditionally. Otherwise
    /// the arguments are shell-quote-joined into one command-line string
    /// and tested against every configured glob; the call is allowed iff
    /// at least one matches.
    ///
    /// # Errors
    ///
    /// Returns an error only if a pattern that was supposed to have been
    /// validated at manifest-load time somehow fails to compile here —
    /// this should not happen in practice since [`crate::manifest::Manifest::load`]
    /// compiles every glob up front.
    pub fn evaluate_args(&self, tool: &Tool, args: &[String]) -> Result<PolicyDecision> {
        if tool.allowed_arg_globs.is_empty() {
            return Ok(PolicyDecision::allow(
                "no argument restrictions configured",
                Vec::new(),
            ));
        }

        let joined = shlex::try_join(args.iter().map(String::as_str))
            .unwrap_or_else(|_| args.join(" "));

        for pattern in &tool.allowed_arg_globs {
            if self.patterns.matches(pattern, &joined)? {
                return Ok(PolicyDecision::allow(
                    format!("arguments matched pattern {pattern:?}"),
                    vec![format!("arg_allow:{pattern}")],
                ));
            }
        }

        Ok(PolicyDecision::deny("arguments not in allowed patterns"))
    }

    /// Filter `env` down to only the keys allowed for a tool, per
    /// `allowed_env_keys`. An empty allow-list leaves `env` unchanged.
    pub fn filter_env(
        &self,
        allowed_env_keys: &[String],
        env: &HashMap<String, String>,
    ) -> Result<HashMap<String, String>> {
        if allowed_env_keys.is_empty() {
            return Ok(env.clone());
        }

        let mut filtered = HashMap::new();
        for (key, value) in env {
            if self.patterns.matches_any(allowed_env_keys, key)? {
                filtered.insert(key.clone(), value.clone());
            }
        }
        Ok(filtered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{Isolation, Tool, ToolPresentation};

    fn tool_with_globs(globs: &[&str]) -> Tool {
        Tool {
            name: "t".into(),
            description: "d".into(),
            command: Some("/bin/true".into()),
            args_prefix: vec![],
            allowed_arg_globs: globs.iter().map(|s| s.to_string()).collect(),
            allowed_env_keys: None,
            isolation: Isolation::None,
            module_path: None,
            timeout_ms: None,
            max_output_bytes: None,
            presentation: ToolPresentation::default(),
        }
    }

    fn evaluator() -> PolicyEvaluator {
        PolicyEvaluator::new(Arc::new(PatternCache::new()))
    }

    #[test]
    fn empty_glob_list_allows_any_args() {
        let eval = evaluator();
        let tool = tool_with_globs(&[]);
        let decision = eval
            .evaluate_args(&tool, &["--anything".into(), "goes".into()])
            .unwrap();
        assert!(decision.allowed);
    }

    #[test]
    fn matching_glob_allows() {
        let eval = evaluator();
        let tool = tool_with_globs(&["--dir *"]);
        let decision = eval.evaluate_args(&tool, &["--dir".into(), "x".into()]).unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.matched_rules, vec!["arg_allow:--dir *".to_string()]);
    }

    #[test]
    fn non_matching_glob_denies_with_reason() {
        let eval = evaluator();
        let tool = tool_with_globs(&["--dir *"]);
        let decision = eval.evaluate_args(&tool, &["--rm".into(), "-rf".into()]).unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "arguments not in allowed patterns");
        assert!(decision.matched_rules.is_empty());
    }

    #[test]
    fn filter_env_empty_allowlist_is_passthrough() {
        let eval = evaluator();
        let mut env = HashMap::new();
        env.insert("SECRET".to_string(), "x".to_string());
        let filtered = eval.filter_env(&[], &env).unwrap();
        assert_eq!(filtered, env);
    }

    #[test]
    fn filter_env_keeps_only_matching_keys() {
        let eval = evaluator();
        let mut env = HashMap::new();
        env.insert("PATH".to_string(), "/usr/bin".to_string());
        env.insert("SECRET_KEY".to_string(), "shh".to_string());
        let filtered = eval.filter_env(&["PATH".to_string()], &env).unwrap();
        assert_eq!(filtered.len(), 1);
        assert!(filtered.contains_key("PATH"));
    }

    #[test]
    fn arg_shell_quoting_prevents_boundary_confusion() {
        let eval = evaluator();
        // A glob for the literal two-token command line must not also match
        // when the caller tries to smuggle the second token in as part of
        // the first via quoting.
        let tool = tool_with_globs(&["echo hello"]);
        let decision = eval
            .evaluate_args(&tool, &["echo hello".into()])
            .unwrap();
        assert!(!decision.allowed);
    }
}

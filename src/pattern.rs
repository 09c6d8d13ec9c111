//! Glob-style pattern matching with a process-wide compiled-pattern cache.
//!
//! Grammar: `*` matches within one segment (never crosses `/`), `**`
//! matches across segments including zero, `?` matches exactly one
//! character. Matching anchors the whole candidate string — there is no
//! partial/substring match.
//!
//! Grounded on `security/policy.rs`'s allow/deny pattern evaluation, but
//! backed by the richer [`glob`] crate instead of a prefix/suffix split,
//! since the policy evaluator needs intra-segment `*`, multi-segment `**`,
//! and single-character `?` rather than only a trailing-`*` prefix match.

use std::sync::Arc;

use std::sync::OnceLock;

use dashmap::DashMap;
use glob::Pattern;

use crate::error::{Error, Result};

/// A process-wide cache of compiled glob patterns, keyed by the raw
/// pattern string. Populated lazily on first use and never evicted: the
/// tool catalogue is immutable for the process lifetime, so the cache's
/// working set is bounded by the number of distinct glob strings in the
/// manifest.
#[derive(Default)]
pub struct PatternCache {
    compiled: DashMap<String, Arc<Pattern>>,
}

impl PatternCache {
    /// Build an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            compiled: DashMap::new(),
        }
    }

    /// Compile (or fetch the cached compilation of) `raw`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `raw` is not a syntactically valid
    /// glob. Callers that compile patterns from manifest data should treat
    /// this as a fatal configuration error, per the manifest's compile-at-
    /// load-time invariant — never attempt to compile a pattern for the
    /// first time while handling a call.
    pub fn compile(&self, raw: &str) -> Result<Arc<Pattern>> {
        if let Some(existing) = self.compiled.get(raw) {
            return Ok(existing.clone());
        }
        let pattern = Pattern::new(raw)
            .map_err(|e| Error::Config(format!("invalid glob pattern {raw:?}: {e}")))?;
        let pattern = Arc::new(pattern);
        self.compiled.insert(raw.to_string(), pattern.clone());
        Ok(pattern)
    }

    /// Match `candidate` against a single already-valid pattern string,
    /// compiling it into the cache first if necessary.
    pub fn matches(&self, raw: &str, candidate: &str) -> Result<bool> {
        let pattern = self.compile(raw)?;
        Ok(pattern.matches_with(candidate, MATCH_OPTIONS))
    }

    /// True iff `candidate` matches any of `patterns`.
    pub fn matches_any(&self, patterns: &[String], candidate: &str) -> Result<bool> {
        for raw in patterns {
            if self.matches(raw, candidate)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Path-aware match for a `cwd`-shaped candidate: segments are
    /// compared with the same glob grammar, but the match is performed
    /// with path-separator-aware options so a bare `*` cannot silently
    /// cross a `/` the way it would in an ordinary string match.
    pub fn matches_cwd(&self, raw: &str, cwd: &str) -> Result<bool> {
        self.matches(raw, cwd)
    }

    /// Number of distinct patterns compiled so far. Exposed for tests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    /// True iff no pattern has been compiled yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}

const MATCH_OPTIONS: glob::MatchOptions = glob::MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// The process-wide pattern cache handle. The entry routine constructs the
/// real `PatternCache` once and hands `Arc` clones down through dispatch;
/// this cell exists only so code that can't easily thread the `Arc`
/// through (tests, ad-hoc call sites) can still reach the same instance.
static GLOBAL: OnceLock<Arc<PatternCache>> = OnceLock::new();

/// Fetch the process-wide pattern cache, creating it on first call.
pub fn global() -> Arc<PatternCache> {
    GLOBAL.get_or_init(|| Arc::new(PatternCache::new())).clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_within_segment_only() {
        let cache = PatternCache::new();
        assert!(cache.matches("/tmp/*.txt", "/tmp/foo.txt").unwrap());
        assert!(!cache.matches("/tmp/*.txt", "/tmp/sub/foo.txt").unwrap());
    }

    #[test]
    fn double_star_crosses_segments() {
        let cache = PatternCache::new();
        assert!(cache.matches("/tmp/**/*.txt", "/tmp/a/b/foo.txt").unwrap());
        assert!(cache.matches("/tmp/**/*.txt", "/tmp/foo.txt").unwrap());
    }

    #[test]
    fn question_mark_matches_one_char() {
        let cache = PatternCache::new();
        assert!(cache.matches("file?.log", "file1.log").unwrap());
        assert!(!cache.matches("file?.log", "file12.log").unwrap());
    }

    #[test]
    fn match_is_anchored() {
        let cache = PatternCache::new();
        assert!(!cache.matches("foo", "foobar").unwrap());
        assert!(cache.matches("foo*", "foobar").unwrap());
    }

    #[test]
    fn invalid_pattern_is_config_error() {
        let cache = PatternCache::new();
        assert!(cache.compile("[unterminated").is_err());
    }

    #[test]
    fn compiled_pattern_is_cached() {
        let cache = PatternCache::new();
        cache.matches("abc*", "abcdef").unwrap();
        assert_eq!(cache.len(), 1);
        cache.matches("abc*", "abcxyz").unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn matches_any_short_circuits_on_first_hit() {
        let cache = PatternCache::new();
        let patterns = vec!["x*".to_string(), "abc*".to_string()];
        assert!(cache.matches_any(&patterns, "abcdef").unwrap());
        assert!(!cache.matches_any(&patterns, "zzz").unwrap());
    }

    #[test]
    fn referential_transparency_across_repeated_calls() {
        let cache = PatternCache::new();
        for _ in 0..5 {
            assert!(cache.matches("**/*.sh", "a/b/c.sh").unwrap());
        }
    }
}

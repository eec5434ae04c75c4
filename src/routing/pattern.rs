//! Servlet-style path patterns.
//!
//! # Responsibilities
//! - Compile human patterns once, at registration time
//! - Order rules by dispatch precedence
//! - Find the best (or every) rule matching a request path
//!
//! # Precedence (first wins)
//! 1. Exact path (`/foo`)
//! 2. Longest prefix (`/foo/*`)
//! 3. Longest extension (`*.ext`), tested against the last path segment
//! 4. Default (`/`)
//!
//! # Design Decisions
//! - No regex: every rule is a string comparison, O(len) per rule
//! - Extension and default rules carry a scope (the context path) so that a
//!   context-qualified `*.jsp` only matches below that context

use std::cmp::Ordering;

use thiserror::Error;

/// Error produced when a pattern cannot be compiled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid pattern {pattern:?}: {reason}")]
pub struct PatternError {
    pub pattern: String,
    pub reason: &'static str,
}

impl PatternError {
    fn new(pattern: &str, reason: &'static str) -> Self {
        Self {
            pattern: pattern.to_string(),
            reason,
        }
    }
}

/// Structural class of a rule, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RuleKind {
    Exact,
    Prefix,
    Extension,
    Default,
}

/// A compiled pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Rule {
    pattern: String,
    kind: RuleKind,
    /// Exact path, prefix (without `/*`) or scope, depending on `kind`.
    path: String,
    /// Extension including its leading dot; empty unless `kind` is `Extension`.
    extension: String,
}

/// Compile a pattern.
///
/// Accepted forms: `/exact`, `/prefix/*`, `/*`, `*.ext`, `/` and the empty
/// pattern (context root). Context-qualified forms such as `/app*.jsp` and
/// `/app/` are accepted as scoped extension and default rules.
pub fn compile(pattern: &str) -> Result<Rule, PatternError> {
    if pattern.is_empty() {
        return Ok(Rule::new(pattern, RuleKind::Exact, "/", ""));
    }

    if let Some(at) = pattern.find("*.") {
        let (scope, ext) = (&pattern[..at], &pattern[at + 1..]);
        if !scope.is_empty() && !scope.starts_with('/') {
            return Err(PatternError::new(pattern, "extension scope must start with '/'"));
        }
        if scope.ends_with('/') {
            return Err(PatternError::new(pattern, "extension scope must not end with '/'"));
        }
        if ext.len() < 2 || ext[1..].contains(['/', '*']) {
            return Err(PatternError::new(pattern, "malformed extension"));
        }
        if scope.contains('*') {
            return Err(PatternError::new(pattern, "wildcard only allowed once"));
        }
        return Ok(Rule::new(pattern, RuleKind::Extension, scope, ext));
    }

    if !pattern.starts_with('/') {
        return Err(PatternError::new(pattern, "must start with '/' or '*.'"));
    }

    if let Some(prefix) = pattern.strip_suffix("/*") {
        if prefix.contains('*') {
            return Err(PatternError::new(pattern, "wildcard only allowed once"));
        }
        return Ok(Rule::new(pattern, RuleKind::Prefix, prefix, ""));
    }

    if pattern.contains('*') {
        return Err(PatternError::new(pattern, "wildcard only allowed as '/*' suffix or '*.' extension"));
    }

    if let Some(scope) = pattern.strip_suffix('/') {
        return Ok(Rule::new(pattern, RuleKind::Default, scope, ""));
    }

    Ok(Rule::new(pattern, RuleKind::Exact, pattern, ""))
}

/// Compile a local pattern qualified by a context prefix (`""` for the root).
pub fn compile_in(prefix: &str, local: &str) -> Result<Rule, PatternError> {
    compile(&format!("{}{}", prefix, local))
}

/// The most specific rule matching `path`, if any.
pub fn best_match<'r>(rules: &'r [Rule], path: &str) -> Option<&'r Rule> {
    rules.iter().filter(|r| r.matches(path)).min()
}

/// Every rule matching `path`, most specific first.
pub fn all_matches<'r>(rules: &'r [Rule], path: &str) -> Vec<&'r Rule> {
    let mut matches: Vec<&Rule> = rules.iter().filter(|r| r.matches(path)).collect();
    matches.sort();
    matches
}

fn in_scope(path: &str, scope: &str) -> bool {
    scope.is_empty()
        || path
            .strip_prefix(scope)
            .is_some_and(|rest| rest.starts_with('/'))
}

impl Rule {
    fn new(pattern: &str, kind: RuleKind, path: &str, extension: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            kind,
            path: path.to_string(),
            extension: extension.to_string(),
        }
    }

    /// The pattern this rule was compiled from.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn kind(&self) -> RuleKind {
        self.kind
    }

    /// Whether this rule matches the request path.
    pub fn matches(&self, path: &str) -> bool {
        match self.kind {
            RuleKind::Exact => path == self.path || (self.path == "/" && path.is_empty()),
            RuleKind::Prefix => {
                self.path.is_empty()
                    || path == self.path
                    || path
                        .strip_prefix(self.path.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            }
            RuleKind::Extension => {
                in_scope(path, &self.path)
                    && path
                        .rsplit('/')
                        .next()
                        .is_some_and(|segment| segment.ends_with(self.extension.as_str()))
            }
            RuleKind::Default => path == self.path || in_scope(path, &self.path),
        }
    }

    /// Split a matched path into servlet path and path info.
    pub fn split<'a>(&self, path: &'a str) -> (&'a str, Option<&'a str>) {
        match self.kind {
            RuleKind::Prefix if path.len() >= self.path.len() => {
                let (servlet_path, info) = path.split_at(self.path.len());
                (servlet_path, if info.is_empty() { None } else { Some(info) })
            }
            _ => (path, None),
        }
    }

    /// Specificity order: structural class, then longer path, then longer
    /// extension; the pattern text keeps the order total.
    fn specificity(&self, other: &Rule) -> Ordering {
        self.kind
            .cmp(&other.kind)
            .then_with(|| other.path.len().cmp(&self.path.len()))
            .then_with(|| other.extension.len().cmp(&self.extension.len()))
            .then_with(|| self.pattern.cmp(&other.pattern))
    }
}

impl Ord for Rule {
    fn cmp(&self, other: &Self) -> Ordering {
        self.specificity(other)
    }
}

impl PartialOrd for Rule {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(patterns: &[&str]) -> Vec<Rule> {
        patterns.iter().map(|p| compile(p).unwrap()).collect()
    }

    fn best(rules: &[Rule], path: &str) -> Option<String> {
        best_match(rules, path).map(|r| r.pattern().to_string())
    }

    #[test]
    fn test_compile_kinds() {
        assert_eq!(compile("/a/b").unwrap().kind(), RuleKind::Exact);
        assert_eq!(compile("/a/*").unwrap().kind(), RuleKind::Prefix);
        assert_eq!(compile("/*").unwrap().kind(), RuleKind::Prefix);
        assert_eq!(compile("*.txt").unwrap().kind(), RuleKind::Extension);
        assert_eq!(compile("/app*.jsp").unwrap().kind(), RuleKind::Extension);
        assert_eq!(compile("/").unwrap().kind(), RuleKind::Default);
        assert_eq!(compile("/app/").unwrap().kind(), RuleKind::Default);
        assert_eq!(compile("").unwrap().kind(), RuleKind::Exact);
    }

    #[test]
    fn test_compile_rejects_malformed() {
        assert!(compile("foo").is_err());
        assert!(compile("/a/*/b").is_err());
        assert!(compile("/a*").is_err());
        assert!(compile("*.").is_err());
        assert!(compile("**.txt").is_err());
        assert!(compile("*.a/b").is_err());
    }

    #[test]
    fn test_precedence() {
        let rules = rules(&["/a/*", "/a/b", "*.txt", "/"]);
        assert_eq!(best(&rules, "/a/b").as_deref(), Some("/a/b"));
        assert_eq!(best(&rules, "/a/b/c").as_deref(), Some("/a/*"));
        assert_eq!(best(&rules, "/a/x.txt").as_deref(), Some("/a/*"));
        assert_eq!(best(&rules, "/x.txt").as_deref(), Some("*.txt"));
        assert_eq!(best(&rules, "/nothing").as_deref(), Some("/"));
    }

    #[test]
    fn test_longest_prefix_wins() {
        let rules = rules(&["/*", "/a/*", "/a/b/*"]);
        assert_eq!(best(&rules, "/a/b/c").as_deref(), Some("/a/b/*"));
        assert_eq!(best(&rules, "/a/c").as_deref(), Some("/a/*"));
        assert_eq!(best(&rules, "/a").as_deref(), Some("/a/*"));
        assert_eq!(best(&rules, "/ab").as_deref(), Some("/*"));
    }

    #[test]
    fn test_extension_uses_last_segment() {
        let rules = rules(&["*.gz", "*.tar.gz"]);
        assert_eq!(best(&rules, "/d/a.tar.gz").as_deref(), Some("*.tar.gz"));
        assert_eq!(best(&rules, "/d/a.gz").as_deref(), Some("*.gz"));
        assert_eq!(best(&rules, "/d.gz/a"), None);
    }

    #[test]
    fn test_scoped_rules() {
        let rules = rules(&["/app*.jsp", "/app/"]);
        assert_eq!(best(&rules, "/app/x.jsp").as_deref(), Some("/app*.jsp"));
        assert_eq!(best(&rules, "/other/x.jsp"), None);
        assert_eq!(best(&rules, "/app/anything").as_deref(), Some("/app/"));
        assert_eq!(best(&rules, "/app").as_deref(), Some("/app/"));
    }

    #[test]
    fn test_all_matches_order() {
        let rules = rules(&["/", "*.txt", "/a/*", "/a/b.txt"]);
        let matches: Vec<_> = all_matches(&rules, "/a/b.txt")
            .into_iter()
            .map(|r| r.pattern().to_string())
            .collect();
        assert_eq!(matches, vec!["/a/b.txt", "/a/*", "*.txt", "/"]);
    }

    #[test]
    fn test_split() {
        let prefix = compile("/a/*").unwrap();
        assert_eq!(prefix.split("/a/b/c"), ("/a", Some("/b/c")));
        assert_eq!(prefix.split("/a"), ("/a", None));
        let exact = compile("/a/b").unwrap();
        assert_eq!(exact.split("/a/b"), ("/a/b", None));
    }
}

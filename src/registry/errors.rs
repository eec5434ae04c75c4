//! Error-page routing.
//!
//! # Responsibilities
//! - Parse declared error conditions into route keys
//! - Resolve the handler for an error by exception type chain, then status code
//!
//! # Design Decisions
//! - `4xx` and `5xx` expand to every code of the class (case-insensitive)
//! - Exception types are plain names; the caller supplies the chain from the
//!   concrete type up to (excluding) the root boundary
//! - `ErrorMapping` is immutable; `update` returns a new instance

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::handler::RankedHandler;

/// A route key in the error-page table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorKey {
    Code(u16),
    Exception(String),
}

impl std::fmt::Display for ErrorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKey::Code(code) => write!(f, "{}", code),
            ErrorKey::Exception(name) => f.write_str(name),
        }
    }
}

/// Parse one declared error condition.
pub fn parse_error_page(declared: &str) -> Vec<ErrorKey> {
    let declared = declared.trim();
    if declared.eq_ignore_ascii_case("4xx") {
        return (400..500).map(ErrorKey::Code).collect();
    }
    if declared.eq_ignore_ascii_case("5xx") {
        return (500..600).map(ErrorKey::Code).collect();
    }
    if declared.len() == 3 && declared.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(code) = declared.parse::<u16>() {
            return vec![ErrorKey::Code(code)];
        }
    }
    if declared.is_empty() {
        return Vec::new();
    }
    vec![ErrorKey::Exception(declared.to_string())]
}

/// Parse every declared error condition of a handler, deduplicated.
pub fn parse_error_pages<S: AsRef<str>>(declared: &[S]) -> BTreeSet<ErrorKey> {
    declared
        .iter()
        .flat_map(|d| parse_error_page(d.as_ref()))
        .collect()
}

/// Type names of an error, most specific first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExceptionChain {
    types: Vec<String>,
}

impl ExceptionChain {
    pub fn new<S: Into<String>>(types: impl IntoIterator<Item = S>) -> Self {
        Self {
            types: types.into_iter().map(Into::into).collect(),
        }
    }

    /// Chain for a single Rust error type.
    pub fn of<E: 'static>() -> Self {
        Self::new([std::any::type_name::<E>()])
    }

    /// Append a more general type.
    pub fn with_parent(mut self, name: impl Into<String>) -> Self {
        self.types.push(name.into());
        self
    }

    pub fn types(&self) -> &[String] {
        &self.types
    }
}

/// Immutable status-code and exception-type tables.
#[derive(Debug, Clone, Default)]
pub struct ErrorMapping {
    codes: BTreeMap<u16, RankedHandler>,
    exceptions: HashMap<String, RankedHandler>,
}

impl ErrorMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new mapping with `removed` dropped and `added` applied.
    pub fn update(
        &self,
        added: &BTreeMap<ErrorKey, RankedHandler>,
        removed: &BTreeMap<ErrorKey, RankedHandler>,
    ) -> Self {
        let mut next = self.clone();
        for (key, handler) in removed {
            match key {
                ErrorKey::Code(code) => {
                    if next.codes.get(code).is_some_and(|h| h.id() == handler.id()) {
                        next.codes.remove(code);
                    }
                }
                ErrorKey::Exception(name) => {
                    if next.exceptions.get(name).is_some_and(|h| h.id() == handler.id()) {
                        next.exceptions.remove(name);
                    }
                }
            }
        }
        for (key, handler) in added {
            match key {
                ErrorKey::Code(code) => {
                    next.codes.insert(*code, handler.clone());
                }
                ErrorKey::Exception(name) => {
                    next.exceptions.insert(name.clone(), handler.clone());
                }
            }
        }
        next
    }

    /// Handler for an error: the first hit walking the exception chain,
    /// otherwise the one registered for `status`.
    pub fn resolve(&self, exception: Option<&ExceptionChain>, status: u16) -> Option<&RankedHandler> {
        exception
            .and_then(|chain| chain.types().iter().find_map(|name| self.exceptions.get(name)))
            .or_else(|| self.codes.get(&status))
    }

    pub fn by_code(&self, code: u16) -> Option<&RankedHandler> {
        self.codes.get(&code)
    }

    pub fn by_exception(&self, name: &str) -> Option<&RankedHandler> {
        self.exceptions.get(name)
    }

    /// Active codes and exception names of one handler.
    pub fn keys_of(&self, id: i64) -> (Vec<u16>, Vec<String>) {
        let codes = self
            .codes
            .iter()
            .filter(|(_, h)| h.id() == id)
            .map(|(code, _)| *code)
            .collect();
        let mut exceptions: Vec<String> = self
            .exceptions
            .iter()
            .filter(|(_, h)| h.id() == id)
            .map(|(name, _)| name.clone())
            .collect();
        exceptions.sort();
        (codes, exceptions)
    }

    pub fn len(&self) -> usize {
        self.codes.len() + self.exceptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty() && self.exceptions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{ContextInfo, Handler, HandlerInfo, Lifecycle};
    use std::any::Any;
    use std::sync::Arc;

    struct Noop;

    impl Lifecycle for Noop {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn ranked(id: i64) -> RankedHandler {
        RankedHandler::new(
            ContextInfo::default_context().rank(),
            Arc::new(Handler::new(HandlerInfo::new(id), Arc::new(Noop))),
        )
    }

    #[test]
    fn test_parse_error_pages() {
        let keys = parse_error_pages(&["404", "4XX", "java.io.IOException", "5xx"]);
        assert_eq!(keys.len(), 201);
        assert!(keys.contains(&ErrorKey::Code(404)));
        assert!(keys.contains(&ErrorKey::Code(599)));
        assert!(keys.contains(&ErrorKey::Exception("java.io.IOException".into())));

        assert_eq!(parse_error_page("4040"), vec![ErrorKey::Exception("4040".into())]);
        assert!(parse_error_page("  ").is_empty());
    }

    #[test]
    fn test_exception_chain_wins_over_status() {
        let by_code = ranked(1);
        let by_type = ranked(2);
        let added: BTreeMap<_, _> = [
            (ErrorKey::Code(500), by_code.clone()),
            (ErrorKey::Exception("io::Error".into()), by_type.clone()),
        ]
        .into_iter()
        .collect();
        let mapping = ErrorMapping::new().update(&added, &BTreeMap::new());

        let chain = ExceptionChain::new(["io::TimedOut"]).with_parent("io::Error");
        assert_eq!(mapping.resolve(Some(&chain), 500).map(RankedHandler::id), Some(2));

        let unrelated = ExceptionChain::new(["fmt::Error"]);
        assert_eq!(mapping.resolve(Some(&unrelated), 500).map(RankedHandler::id), Some(1));
        assert_eq!(mapping.resolve(None, 500).map(RankedHandler::id), Some(1));
        assert!(mapping.resolve(None, 404).is_none());
    }

    #[test]
    fn test_update_only_removes_matching_handler() {
        let first = ranked(1);
        let second = ranked(2);
        let add_first: BTreeMap<_, _> = [(ErrorKey::Code(404), first.clone())].into_iter().collect();
        let replace: BTreeMap<_, _> = [(ErrorKey::Code(404), second.clone())].into_iter().collect();

        let mapping = ErrorMapping::new().update(&add_first, &BTreeMap::new());
        let swapped = mapping.update(&replace, &add_first);
        assert_eq!(swapped.by_code(404).map(RankedHandler::id), Some(2));
        assert_eq!(mapping.by_code(404).map(RankedHandler::id), Some(1));

        // Removing a stale pair leaves the current head alone
        let stale = swapped.update(&BTreeMap::new(), &add_first);
        assert_eq!(stale.by_code(404).map(RankedHandler::id), Some(2));
        assert_eq!(stale.keys_of(2), (vec![404], vec![]));
    }
}

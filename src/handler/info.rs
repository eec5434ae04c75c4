//! Handler and context metadata.
//!
//! Both types are immutable once built and carry the ordering rules used for
//! conflict resolution. Every ordering here is a *preference* order: the
//! element that should win sorts first.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Id of the legacy default context that hosts alias registrations.
pub const DEFAULT_CONTEXT_ID: i64 = 0;

/// Request dispatch kinds a filter can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DispatcherType {
    Request,
    Forward,
    Include,
    Error,
    Async,
}

/// Event families a listener subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerType {
    Context,
    ContextAttribute,
    Request,
    RequestAttribute,
    Session,
    SessionAttribute,
    SessionId,
}

impl ListenerType {
    pub fn as_str(self) -> &'static str {
        match self {
            ListenerType::Context => "context",
            ListenerType::ContextAttribute => "context_attribute",
            ListenerType::Request => "request",
            ListenerType::RequestAttribute => "request_attribute",
            ListenerType::Session => "session",
            ListenerType::SessionAttribute => "session_attribute",
            ListenerType::SessionId => "session_id",
        }
    }
}

/// Tie-break on ids. Non-negative ids sort ascending (older registrations first);
/// as soon as one id is negative the order is reversed, so among negative ids
/// -1 precedes -2.
pub(crate) fn compare_ids(a: i64, b: i64) -> Ordering {
    if a >= 0 && b >= 0 {
        a.cmp(&b)
    } else {
        b.cmp(&a)
    }
}

/// Metadata describing a routable handler, supplied by the registering party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerInfo {
    /// Unique id within a registry.
    pub id: i64,
    /// Higher ranking wins conflicts.
    pub ranking: i32,
    /// Owning context.
    pub context_id: i64,
    /// Human-readable name, also used for lookups by name.
    pub name: Option<String>,
    /// Servlet-style path patterns, local to the context.
    pub patterns: Vec<String>,
    /// Declared error conditions: status codes, `4xx`/`5xx`, or exception type names.
    pub error_pages: Vec<String>,
    /// Servlet names a filter is bound to, in addition to its patterns.
    pub servlet_names: Vec<String>,
    /// Dispatch kinds a filter applies to.
    pub dispatcher: Vec<DispatcherType>,
    /// Event families a listener receives.
    pub listener_types: Vec<ListenerType>,
    /// Opaque parameters handed to the handler on `init`.
    pub init_params: BTreeMap<String, String>,
}

impl HandlerInfo {
    /// Create metadata for the given id in the default context.
    pub fn new(id: i64) -> Self {
        Self {
            id,
            ranking: 0,
            context_id: DEFAULT_CONTEXT_ID,
            name: None,
            patterns: Vec::new(),
            error_pages: Vec::new(),
            servlet_names: Vec::new(),
            dispatcher: vec![DispatcherType::Request],
            listener_types: Vec::new(),
            init_params: BTreeMap::new(),
        }
    }

    pub fn with_ranking(mut self, ranking: i32) -> Self {
        self.ranking = ranking;
        self
    }

    pub fn with_context(mut self, context_id: i64) -> Self {
        self.context_id = context_id;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    pub fn with_error_page(mut self, error_page: impl Into<String>) -> Self {
        self.error_pages.push(error_page.into());
        self
    }

    pub fn with_servlet_name(mut self, servlet_name: impl Into<String>) -> Self {
        self.servlet_names.push(servlet_name.into());
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Vec<DispatcherType>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_listener_type(mut self, listener_type: ListenerType) -> Self {
        if !self.listener_types.contains(&listener_type) {
            self.listener_types.push(listener_type);
        }
        self
    }

    pub fn with_init_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.init_params.insert(key.into(), value.into());
        self
    }

    /// Name used in logs and DTOs.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("handler-{}", self.id),
        }
    }

    /// Preference order within one context: higher ranking first, then ids.
    pub fn preference(&self, other: &HandlerInfo) -> Ordering {
        other
            .ranking
            .cmp(&self.ranking)
            .then_with(|| compare_ids(self.id, other.id))
    }
}

/// A path-prefixed namespace with its own ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextInfo {
    pub id: i64,
    pub name: String,
    /// `/` or a path starting with `/` and not ending with `/`.
    pub path: String,
    pub ranking: i32,
}

impl ContextInfo {
    pub fn new(id: i64, name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            path: path.into(),
            ranking: 0,
        }
    }

    pub fn with_ranking(mut self, ranking: i32) -> Self {
        self.ranking = ranking;
        self
    }

    /// The legacy default context.
    pub fn default_context() -> Self {
        Self::new(DEFAULT_CONTEXT_ID, "default", "/")
    }

    /// True for `/` and for paths starting with `/` that do not end with `/`.
    pub fn is_valid_path(path: &str) -> bool {
        path == "/" || (path.starts_with('/') && !path.ends_with('/'))
    }

    /// Path prepended to local patterns (`/` maps to the empty prefix).
    pub fn prefix(&self) -> &str {
        if self.path == "/" {
            ""
        } else {
            &self.path
        }
    }

    /// Qualify a local pattern with this context's path.
    ///
    /// Extension patterns stay scoped by keeping the prefix in front of the `*.`.
    pub fn full_pattern(&self, local: &str) -> String {
        format!("{}{}", self.prefix(), local)
    }

    /// Returns the part of `path` below this context, or `None` when the
    /// path is outside it.
    pub fn is_matching<'a>(&self, path: &'a str) -> Option<&'a str> {
        if path == self.path {
            return Some("");
        }
        let prefix = self.prefix();
        if prefix.is_empty() {
            return Some(path);
        }
        match path.strip_prefix(prefix) {
            Some(rest) if rest.starts_with('/') => Some(rest),
            _ => None,
        }
    }

    /// Copyable ordering key.
    pub fn rank(&self) -> ContextRank {
        ContextRank {
            id: self.id,
            path_len: self.path.len(),
            ranking: self.ranking,
        }
    }
}

/// Ordering key of a context, detached from its strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextRank {
    pub id: i64,
    pub path_len: usize,
    pub ranking: i32,
}

impl ContextRank {
    /// Longer path first; among equal paths the default context sorts last,
    /// then higher ranking, then the id tie-break.
    pub fn preference(&self, other: &ContextRank) -> Ordering {
        other
            .path_len
            .cmp(&self.path_len)
            .then_with(|| {
                match (self.id == DEFAULT_CONTEXT_ID, other.id == DEFAULT_CONTEXT_ID) {
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    _ => Ordering::Equal,
                }
            })
            .then_with(|| other.ranking.cmp(&self.ranking))
            .then_with(|| compare_ids(self.id, other.id))
    }
}

//! Runtime introspection DTOs.
//!
//! Serializable point-in-time view of what is registered, what serves which
//! routes, and why the rest does not. Built on demand from the published
//! snapshots, so it never blocks dispatch.

use serde::{Deserialize, Serialize};

use crate::error::FailureReason;
use crate::handler::{DispatcherType, HandlerInfo, ListenerType};

/// Registration kind, also used as the `kind` metrics label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    Servlet,
    Filter,
    ErrorPage,
    Resource,
    Listener,
    Alias,
}

impl HandlerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            HandlerKind::Servlet => "servlet",
            HandlerKind::Filter => "filter",
            HandlerKind::ErrorPage => "error_page",
            HandlerKind::Resource => "resource",
            HandlerKind::Listener => "listener",
            HandlerKind::Alias => "alias",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeDto {
    pub contexts: Vec<ContextDto>,
    pub aliases: Vec<AliasDto>,
    pub failures: Vec<FailureDto>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextDto {
    pub id: i64,
    pub name: String,
    pub path: String,
    pub ranking: i32,
    pub servlets: Vec<ServletDto>,
    pub resources: Vec<ResourceDto>,
    pub filters: Vec<FilterDto>,
    pub error_pages: Vec<ErrorPageDto>,
    pub listeners: Vec<ListenerDto>,
}

/// A servlet serving at least one pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServletDto {
    pub id: i64,
    pub name: String,
    pub ranking: i32,
    /// Patterns this servlet currently serves.
    pub patterns: Vec<String>,
    /// Declared patterns owned by a competitor.
    pub shadowed_patterns: Vec<String>,
}

/// Static resources served below a filesystem prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDto {
    pub id: i64,
    pub patterns: Vec<String>,
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerDto {
    pub id: i64,
    pub name: String,
    pub ranking: i32,
    pub types: Vec<ListenerType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterDto {
    pub id: i64,
    pub name: String,
    pub ranking: i32,
    pub patterns: Vec<String>,
    pub servlet_names: Vec<String>,
    pub dispatcher: Vec<DispatcherType>,
}

/// An error page serving at least one code or exception type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPageDto {
    pub id: i64,
    pub name: String,
    pub error_codes: Vec<u16>,
    pub exceptions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasDto {
    pub id: i64,
    pub alias: String,
    pub name: String,
}

/// A registration that is known but not serving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDto {
    pub id: i64,
    pub name: String,
    pub kind: HandlerKind,
    pub context_id: i64,
    pub reason: FailureReason,
    /// Numeric form of `reason`.
    pub code: i32,
}

impl FailureDto {
    pub fn new(info: &HandlerInfo, kind: HandlerKind, reason: FailureReason) -> Self {
        Self {
            id: info.id,
            name: info.display_name(),
            kind,
            context_id: info.context_id,
            reason,
            code: reason.code(),
        }
    }
}

impl RuntimeDto {
    /// Failure reason currently recorded for a handler id, if any.
    pub fn failure_of(&self, id: i64) -> Option<FailureReason> {
        self.failures.iter().find(|f| f.id == id).map(|f| f.reason)
    }

    pub fn context(&self, id: i64) -> Option<&ContextDto> {
        self.contexts.iter().find(|c| c.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_serializes_reason_and_code() {
        let info = HandlerInfo::new(5).with_name("svc").with_context(3);
        let failure = FailureDto::new(&info, HandlerKind::Servlet, FailureReason::Shadowed);
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["reason"], "FAILURE_SHADOWED");
        assert_eq!(json["code"], 3);
        assert_eq!(json["kind"], "servlet");
        assert_eq!(json["context_id"], 3);
    }
}

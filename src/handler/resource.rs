//! Static resource registrations.
//!
//! A resource is served by a servlet the registry creates itself: the
//! matched path below the servlet path is resolved against a filesystem
//! prefix. Resources compete with servlets for patterns under the same rules.

use std::any::Any;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::BoxError;
use crate::handler::info::{HandlerInfo, DEFAULT_CONTEXT_ID};
use crate::handler::lifecycle::Lifecycle;

/// Patterns served from a directory (or a single file for exact patterns).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub id: i64,
    pub ranking: i32,
    pub context_id: i64,
    pub patterns: Vec<String>,
    pub prefix: String,
}

impl ResourceInfo {
    pub fn new(id: i64, prefix: impl Into<String>) -> Self {
        Self {
            id,
            ranking: 0,
            context_id: DEFAULT_CONTEXT_ID,
            patterns: Vec::new(),
            prefix: prefix.into(),
        }
    }

    pub fn with_context(mut self, context_id: i64) -> Self {
        self.context_id = context_id;
        self
    }

    pub fn with_ranking(mut self, ranking: i32) -> Self {
        self.ranking = ranking;
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    /// Metadata the resource servlet is routed under.
    pub fn servlet_info(&self) -> HandlerInfo {
        let mut info = HandlerInfo::new(self.id)
            .with_context(self.context_id)
            .with_ranking(self.ranking)
            .with_name(format!("resource:{}", self.prefix));
        info.patterns = self.patterns.clone();
        info
    }
}

/// Servlet answering with files below its prefix.
#[derive(Debug, Clone)]
pub struct ResourceServlet {
    prefix: PathBuf,
}

impl ResourceServlet {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// File for the part of a request path below the servlet path. `None`
    /// when the path would leave the prefix.
    pub fn resolve(&self, relative: &str) -> Option<PathBuf> {
        let mut path = self.prefix.clone();
        for component in Path::new(relative.trim_start_matches('/')).components() {
            match component {
                Component::Normal(segment) => path.push(segment),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(path)
    }
}

impl Lifecycle for ResourceServlet {
    fn init(&self, info: &HandlerInfo) -> Result<(), BoxError> {
        if !self.prefix.exists() {
            return Err(format!("resource prefix {} does not exist", self.prefix.display()).into());
        }
        tracing::debug!(id = info.id, prefix = %self.prefix.display(), "Resource servlet initialized");
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

//! Handler instances built from configuration.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};

use crate::error::BoxError;
use crate::handler::{HandlerInfo, Lifecycle};

/// Servlet answering every request with the same response.
#[derive(Debug, Clone)]
pub struct StaticServlet {
    status: StatusCode,
    body: String,
    content_type: HeaderValue,
}

impl StaticServlet {
    pub fn new(status: StatusCode, body: String, content_type: HeaderValue) -> Self {
        Self {
            status,
            body,
            content_type,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn content_type(&self) -> &HeaderValue {
        &self.content_type
    }
}

impl Lifecycle for StaticServlet {
    fn init(&self, info: &HandlerInfo) -> Result<(), BoxError> {
        tracing::debug!(
            id = info.id,
            name = %info.display_name(),
            params = info.init_params.len(),
            "Static servlet initialized"
        );
        Ok(())
    }

    fn destroy(&self) {
        tracing::debug!(status = %self.status, "Static servlet destroyed");
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Filter setting one response header.
#[derive(Debug, Clone)]
pub struct HeaderFilter {
    name: HeaderName,
    value: HeaderValue,
}

impl HeaderFilter {
    pub fn new(name: HeaderName, value: HeaderValue) -> Self {
        Self { name, value }
    }

    /// Add the header, keeping values set by earlier filters.
    pub fn apply(&self, headers: &mut HeaderMap) {
        headers.append(self.name.clone(), self.value.clone());
    }
}

impl Lifecycle for HeaderFilter {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Listener logging the request events of its context.
#[derive(Debug, Default)]
pub struct EventLogListener {
    started: AtomicU64,
    finished: AtomicU64,
}

impl EventLogListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_initialized(&self, request_id: &str, path: &str) {
        self.started.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(request_id, path, "Request initialized");
    }

    pub fn request_destroyed(&self, request_id: &str, path: &str, status: StatusCode) {
        self.finished.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(request_id, path, status = status.as_u16(), "Request destroyed");
    }

    /// Requests seen as (initialized, destroyed).
    pub fn counts(&self) -> (u64, u64) {
        (
            self.started.load(Ordering::Relaxed),
            self.finished.load(Ordering::Relaxed),
        )
    }
}

impl Lifecycle for EventLogListener {
    fn init(&self, info: &HandlerInfo) -> Result<(), BoxError> {
        let types: Vec<&str> = info.listener_types.iter().map(|t| t.as_str()).collect();
        tracing::debug!(id = info.id, types = ?types, "Event listener initialized");
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_filter_appends() {
        let filter = HeaderFilter::new(
            HeaderName::from_static("x-chain"),
            HeaderValue::from_static("a"),
        );
        let mut headers = HeaderMap::new();
        filter.apply(&mut headers);
        filter.apply(&mut headers);
        assert_eq!(headers.get_all("x-chain").iter().count(), 2);
    }

    #[test]
    fn test_event_log_listener_counts_requests() {
        let listener = EventLogListener::new();
        listener.request_initialized("r1", "/a");
        listener.request_initialized("r2", "/b");
        listener.request_destroyed("r1", "/a", StatusCode::OK);
        assert_eq!(listener.counts(), (2, 1));
    }
}

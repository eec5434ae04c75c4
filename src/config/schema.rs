//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the whiteboard
//! server. All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::handler::{DispatcherType, ListenerType, DEFAULT_CONTEXT_ID};
use crate::registry::ShadowPolicy;

/// Root configuration for the whiteboard server.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct WhiteboardConfig {
    /// Listener settings.
    pub server: ServerConfig,

    /// Conflict resolution settings.
    pub registry: RegistryConfig,

    /// Log output settings.
    pub logging: LoggingConfig,

    /// Prometheus exporter settings.
    pub metrics: MetricsConfig,

    /// Admin endpoint settings.
    pub admin: AdminConfig,

    /// Servlet contexts. The default context (id 0, `/`) is implicit.
    pub contexts: Vec<ContextConfig>,

    /// Servlets serving a static response.
    pub servlets: Vec<ServletConfig>,

    /// Filters adding a response header.
    pub filters: Vec<FilterConfig>,

    /// Error-page servlets.
    pub error_pages: Vec<ErrorPageConfig>,

    /// Directories served under servlet patterns.
    pub resources: Vec<ResourceConfig>,

    /// Event listeners that log the events they receive.
    pub listeners: Vec<ListenerConfig>,

    /// Legacy alias registrations in the default context.
    pub aliases: Vec<AliasConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    /// What happens to a handler that loses all of its routes.
    pub shadow_policy: ShadowPolicy,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable the Prometheus scrape endpoint.
    pub enabled: bool,

    /// Scrape endpoint bind address.
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AdminConfig {
    /// Mount `/admin/*` on the main listener.
    pub enabled: bool,

    /// Bearer token required by the admin endpoints, when set.
    pub api_key: Option<String>,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
        }
    }
}

/// A servlet context.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ContextConfig {
    pub id: i64,
    pub name: String,
    /// `/`, or a path not ending with `/`.
    pub path: String,
    #[serde(default)]
    pub ranking: i32,
}

fn default_context() -> i64 {
    DEFAULT_CONTEXT_ID
}

fn default_status() -> u16 {
    200
}

fn default_content_type() -> String {
    "text/plain; charset=utf-8".to_string()
}

fn default_dispatcher() -> Vec<DispatcherType> {
    vec![DispatcherType::Request]
}

/// A servlet answering with a fixed response.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServletConfig {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_context")]
    pub context: i64,
    #[serde(default)]
    pub ranking: i32,
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Error conditions this servlet also handles.
    #[serde(default)]
    pub error_pages: Vec<String>,
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub body: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub init_params: BTreeMap<String, String>,
}

/// A filter adding one header to matching responses.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FilterConfig {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_context")]
    pub context: i64,
    #[serde(default)]
    pub ranking: i32,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub servlet_names: Vec<String>,
    #[serde(default = "default_dispatcher")]
    pub dispatcher: Vec<DispatcherType>,
    pub header: String,
    pub value: String,
}

/// A servlet registered for error conditions only.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ErrorPageConfig {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_context")]
    pub context: i64,
    #[serde(default)]
    pub ranking: i32,
    /// Status codes, `4xx`/`5xx`, or exception type names.
    pub errors: Vec<String>,
    #[serde(default)]
    pub body: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

/// Files below `prefix`, served for the given patterns.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ResourceConfig {
    pub id: i64,
    #[serde(default = "default_context")]
    pub context: i64,
    #[serde(default)]
    pub ranking: i32,
    pub patterns: Vec<String>,
    pub prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ListenerConfig {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_context")]
    pub context: i64,
    #[serde(default)]
    pub ranking: i32,
    /// Event families the listener subscribes to.
    pub types: Vec<ListenerType>,
}

/// A legacy alias answering with a fixed response.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AliasConfig {
    pub alias: String,
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub body: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub init_params: BTreeMap<String, String>,
}

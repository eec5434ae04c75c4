//! HTTP whiteboard routing core.
//!
//! Servlets, resources, filters, error pages, listeners and legacy aliases are
//! registered at runtime with metadata (patterns, ranking, owning context). The registry resolves
//! conflicts between them and publishes immutable routing snapshots that
//! request threads read without locking.

pub mod config;
pub mod error;
pub mod handler;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod provision;
pub mod registry;
pub mod routing;

pub use config::WhiteboardConfig;
pub use error::{FailureReason, RegistrationError, RegistrationResult};
pub use handler::{
    ContextInfo, DispatcherType, Handler, HandlerInfo, Lifecycle, ListenerType, ResourceInfo,
};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use registry::{ShadowPolicy, Whiteboard};

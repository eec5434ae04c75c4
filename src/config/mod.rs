//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → WhiteboardConfig (validated, immutable)
//!     → provisioner registers the declared handlers
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → mpsc channel → provisioner diffs and re-registers
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Listener, logging and metrics settings apply at startup only

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AliasConfig, ContextConfig, ErrorPageConfig, FilterConfig, ListenerConfig, LogFormat,
    LoggingConfig, ResourceConfig, ServletConfig, WhiteboardConfig,
};
pub use validation::{validate_config, ValidationError};
pub use watcher::{ConfigWatcher, Reload};

//! Registration errors and failure reasons.
//!
//! # Responsibilities
//! - Report why a registration did not take effect
//! - Map every rejection (and the non-fatal shadowed state) to a stable reason code
//!
//! # Design Decisions
//! - Reason codes are stable identifiers, not implementation types
//! - Numeric codes follow the HTTP Whiteboard runtime DTO constants
//! - Shadowing is a state, never an error variant

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Boxed error returned by handler `init` callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Stable failure reason reported for handlers that are registered but not serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FailureReason {
    /// The owning context is not registered.
    #[serde(rename = "FAILURE_CONTEXT_UNAVAILABLE")]
    ContextUnavailable,
    /// A higher-ranked handler owns every route this handler claims.
    #[serde(rename = "FAILURE_SHADOWED")]
    Shadowed,
    /// The handler's `init` callback failed.
    #[serde(rename = "FAILURE_EXCEPTION_ON_INIT")]
    ExceptionOnInit,
    /// The handler metadata is malformed (pattern, alias, error page).
    #[serde(rename = "FAILURE_VALIDATION_FAILED")]
    ValidationFailed,
    /// The same handler identity (or alias) is already registered.
    #[serde(rename = "FAILURE_ALREADY_USED")]
    AlreadyUsed,
}

impl FailureReason {
    /// Numeric DTO code.
    pub fn code(self) -> i32 {
        match self {
            FailureReason::ContextUnavailable => 2,
            FailureReason::Shadowed => 3,
            FailureReason::ExceptionOnInit => 4,
            FailureReason::ValidationFailed => 6,
            FailureReason::AlreadyUsed => 7,
        }
    }

    /// Stable identifier.
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::ContextUnavailable => "FAILURE_CONTEXT_UNAVAILABLE",
            FailureReason::Shadowed => "FAILURE_SHADOWED",
            FailureReason::ExceptionOnInit => "FAILURE_EXCEPTION_ON_INIT",
            FailureReason::ValidationFailed => "FAILURE_VALIDATION_FAILED",
            FailureReason::AlreadyUsed => "FAILURE_ALREADY_USED",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that reject a registration. A rejected registration leaves no trace
/// in any published routing table.
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// The handler id is already registered in this registry.
    #[error("handler {id} ({name}) already registered")]
    AlreadyUsed { id: i64, name: String },

    /// The alias is bound to another handler.
    #[error("alias {0} is already in use")]
    AliasInUse(String),

    /// The owning context is not registered.
    #[error("context {context_id} unavailable for handler {id}")]
    ContextUnavailable { id: i64, context_id: i64 },

    /// The handler's `init` callback failed.
    #[error("handler {id} ({name}) failed to initialize: {source}")]
    InitializationFailure {
        id: i64,
        name: String,
        #[source]
        source: BoxError,
    },

    /// A declared pattern could not be compiled.
    #[error("invalid pattern {pattern:?} for handler {id}: {reason}")]
    InvalidPattern {
        id: i64,
        pattern: String,
        reason: String,
    },

    /// A legacy alias is malformed.
    #[error("malformed alias {0:?}")]
    InvalidAlias(String),

    /// A registry mutation was attempted from inside a handler callback that
    /// the same registry is currently running. This is a programming error.
    #[error("re-entrant registration attempted while the registry is being updated")]
    Reentrant,
}

impl RegistrationError {
    /// The failure reason reported for this rejection.
    pub fn reason(&self) -> FailureReason {
        match self {
            RegistrationError::AlreadyUsed { .. } | RegistrationError::AliasInUse(_) => {
                FailureReason::AlreadyUsed
            }
            RegistrationError::ContextUnavailable { .. } => FailureReason::ContextUnavailable,
            RegistrationError::InitializationFailure { .. } => FailureReason::ExceptionOnInit,
            RegistrationError::InvalidPattern { .. }
            | RegistrationError::InvalidAlias(_)
            | RegistrationError::Reentrant => FailureReason::ValidationFailed,
        }
    }
}

/// Result type for registry operations.
pub type RegistrationResult<T> = Result<T, RegistrationError>;

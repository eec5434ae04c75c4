//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (handlers reference existing contexts)
//! - Validate patterns, context paths and aliases with the routing rules
//! - Detect duplicate ids and aliases
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: WhiteboardConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use axum::http::{HeaderName, HeaderValue, StatusCode};
use thiserror::Error;

use crate::config::schema::WhiteboardConfig;
use crate::handler::{ContextInfo, DEFAULT_CONTEXT_ID};
use crate::registry::legacy::is_valid_alias;
use crate::routing::compile;

/// A semantic problem in a configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid {field} address {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("context id 0 is reserved for the default context")]
    ReservedContextId,

    #[error("duplicate context id {0}")]
    DuplicateContext(i64),

    #[error("invalid path {path:?} for context {id}")]
    InvalidContextPath { id: i64, path: String },

    #[error("duplicate handler id {0}")]
    DuplicateHandler(i64),

    #[error("handler {id} references unknown context {context}")]
    UnknownContext { id: i64, context: i64 },

    #[error("invalid pattern {pattern:?} for handler {id}: {reason}")]
    InvalidPattern {
        id: i64,
        pattern: String,
        reason: &'static str,
    },

    #[error("handler {0} has nothing to match on")]
    NoTargets(i64),

    #[error("invalid alias {0:?}")]
    InvalidAlias(String),

    #[error("duplicate alias {0:?}")]
    DuplicateAlias(String),

    #[error("invalid status {status} for {owner}")]
    InvalidStatus { owner: String, status: u16 },

    #[error("invalid content type {content_type:?} for {owner}")]
    InvalidContentType { owner: String, content_type: String },

    #[error("invalid header {header:?} for filter {id}")]
    InvalidHeader { id: i64, header: String },

    #[error("resource {0} has an empty prefix")]
    EmptyPrefix(i64),
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &WhiteboardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "server.bind_address",
            value: config.server.bind_address.clone(),
        });
    }
    if config.metrics.enabled && config.metrics.address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "metrics.address",
            value: config.metrics.address.clone(),
        });
    }

    let mut contexts = HashSet::from([DEFAULT_CONTEXT_ID]);
    for context in &config.contexts {
        if context.id == DEFAULT_CONTEXT_ID {
            errors.push(ValidationError::ReservedContextId);
            continue;
        }
        if !contexts.insert(context.id) {
            errors.push(ValidationError::DuplicateContext(context.id));
        }
        if !ContextInfo::is_valid_path(&context.path) {
            errors.push(ValidationError::InvalidContextPath {
                id: context.id,
                path: context.path.clone(),
            });
        }
    }

    let mut ids = HashSet::new();
    let mut check_handler = |id: i64, context: i64, patterns: &[String], errors: &mut Vec<_>| {
        if !ids.insert(id) {
            errors.push(ValidationError::DuplicateHandler(id));
        }
        if !contexts.contains(&context) {
            errors.push(ValidationError::UnknownContext { id, context });
        }
        for pattern in patterns {
            if let Err(e) = compile(pattern) {
                errors.push(ValidationError::InvalidPattern {
                    id,
                    pattern: pattern.clone(),
                    reason: e.reason,
                });
            }
        }
    };

    for servlet in &config.servlets {
        check_handler(servlet.id, servlet.context, &servlet.patterns, &mut errors);
        if servlet.patterns.is_empty() && servlet.error_pages.is_empty() {
            errors.push(ValidationError::NoTargets(servlet.id));
        }
        check_response(
            format!("servlet {}", servlet.id),
            servlet.status,
            &servlet.content_type,
            &mut errors,
        );
    }
    for filter in &config.filters {
        check_handler(filter.id, filter.context, &filter.patterns, &mut errors);
        if filter.patterns.is_empty() && filter.servlet_names.is_empty() {
            errors.push(ValidationError::NoTargets(filter.id));
        }
        if HeaderName::from_bytes(filter.header.as_bytes()).is_err()
            || HeaderValue::from_str(&filter.value).is_err()
        {
            errors.push(ValidationError::InvalidHeader {
                id: filter.id,
                header: filter.header.clone(),
            });
        }
    }
    for page in &config.error_pages {
        check_handler(page.id, page.context, &[], &mut errors);
        if page.errors.is_empty() {
            errors.push(ValidationError::NoTargets(page.id));
        }
        check_response(format!("error page {}", page.id), 500, &page.content_type, &mut errors);
    }

    for resource in &config.resources {
        check_handler(resource.id, resource.context, &resource.patterns, &mut errors);
        if resource.patterns.is_empty() {
            errors.push(ValidationError::NoTargets(resource.id));
        }
        if resource.prefix.is_empty() {
            errors.push(ValidationError::EmptyPrefix(resource.id));
        }
    }
    for listener in &config.listeners {
        check_handler(listener.id, listener.context, &[], &mut errors);
        if listener.types.is_empty() {
            errors.push(ValidationError::NoTargets(listener.id));
        }
    }

    let mut aliases = HashSet::new();
    for alias in &config.aliases {
        if !is_valid_alias(&alias.alias) {
            errors.push(ValidationError::InvalidAlias(alias.alias.clone()));
        } else if !aliases.insert(alias.alias.as_str()) {
            errors.push(ValidationError::DuplicateAlias(alias.alias.clone()));
        }
        check_response(
            format!("alias {}", alias.alias),
            alias.status,
            &alias.content_type,
            &mut errors,
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_response(
    owner: String,
    status: u16,
    content_type: &str,
    errors: &mut Vec<ValidationError>,
) {
    if HeaderValue::from_str(content_type).is_err() {
        errors.push(ValidationError::InvalidContentType {
            owner: owner.clone(),
            content_type: content_type.to_string(),
        });
    }
    if StatusCode::from_u16(status).is_err() {
        errors.push(ValidationError::InvalidStatus { owner, status });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> WhiteboardConfig {
        toml::from_str(toml_str).unwrap()
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&WhiteboardConfig::default()).is_ok());
    }

    #[test]
    fn test_reports_all_errors() {
        let config = parse(
            r#"
            [[contexts]]
            id = 0
            name = "dup"
            path = "/"

            [[contexts]]
            id = 1
            name = "bad"
            path = "/bad/"

            [[servlets]]
            id = 5
            context = 7
            patterns = ["/a/*.jsp"]

            [[servlets]]
            id = 5
            patterns = ["/ok"]

            [[aliases]]
            alias = "noslash"
            "#,
        );
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::ReservedContextId));
        assert!(errors.contains(&ValidationError::InvalidContextPath {
            id: 1,
            path: "/bad/".to_string()
        }));
        assert!(errors.contains(&ValidationError::UnknownContext { id: 5, context: 7 }));
        assert!(errors.contains(&ValidationError::DuplicateHandler(5)));
        assert!(errors.contains(&ValidationError::InvalidAlias("noslash".to_string())));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidPattern { id: 5, .. })));
    }

    #[test]
    fn test_resources_and_listeners_need_targets() {
        let config = parse(
            r#"
            [[servlets]]
            id = 1
            patterns = ["/a"]

            [[resources]]
            id = 1
            patterns = []
            prefix = ""

            [[listeners]]
            id = 2
            context = 3
            types = []
            "#,
        );
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::DuplicateHandler(1),
                ValidationError::NoTargets(1),
                ValidationError::EmptyPrefix(1),
                ValidationError::UnknownContext { id: 2, context: 3 },
                ValidationError::NoTargets(2),
            ]
        );
    }

    #[test]
    fn test_filter_needs_target_and_header() {
        let config = parse(
            r#"
            [[filters]]
            id = 1
            header = "bad header"
            value = "x"
            "#,
        );
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::NoTargets(1),
                ValidationError::InvalidHeader {
                    id: 1,
                    header: "bad header".to_string()
                },
            ]
        );
    }
}

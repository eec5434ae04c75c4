//! Configuration-driven registration.
//!
//! # Data Flow
//! ```text
//! WhiteboardConfig (validated)
//!     → diff against the last applied config, keyed by id (alias text for aliases)
//!     → removals: listeners, aliases, filters, error pages, resources,
//!       servlets, then contexts
//!     → additions: contexts, servlets, resources, error pages, filters,
//!       aliases, then listeners
//! ```
//!
//! # Design Decisions
//! - A changed entry is removed and added again
//! - Entries of a changed or removed context are re-registered with it,
//!   since removing a context evicts everything inside it
//! - A rejected entry is logged and reported; the rest of the config still applies

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue, StatusCode};
use parking_lot::Mutex;
use thiserror::Error;

use crate::config::{
    AliasConfig, ContextConfig, ErrorPageConfig, FilterConfig, ListenerConfig, ResourceConfig,
    ServletConfig, WhiteboardConfig,
};
use crate::error::RegistrationError;
use crate::handler::{
    ContextInfo, Handler, HandlerInfo, Lifecycle, ResourceInfo, DEFAULT_CONTEXT_ID,
};
use crate::registry::Whiteboard;

mod instances;

pub use instances::{EventLogListener, HeaderFilter, StaticServlet};

/// Why one configured entry could not be applied.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("invalid status {0}")]
    InvalidStatus(u16),

    #[error("invalid header {0:?}")]
    InvalidHeader(String),

    #[error(transparent)]
    Registration(#[from] RegistrationError),
}

/// Outcome of one `apply` call.
#[derive(Debug, Default)]
pub struct ProvisionReport {
    pub added: usize,
    pub removed: usize,
    /// Entry label and the reason it was rejected.
    pub rejected: Vec<(String, ProvisionError)>,
}

impl ProvisionReport {
    fn record(&mut self, label: String, result: Result<(), ProvisionError>) {
        match result {
            Ok(()) => self.added += 1,
            Err(err) => {
                tracing::warn!(entry = %label, error = %err, "Configured entry rejected");
                self.rejected.push((label, err));
            }
        }
    }
}

/// Keeps the whiteboard in line with the configured handler tables.
pub struct Provisioner {
    whiteboard: Arc<Whiteboard>,
    applied: Mutex<WhiteboardConfig>,
}

impl Provisioner {
    pub fn new(whiteboard: Arc<Whiteboard>) -> Self {
        Self {
            whiteboard,
            applied: Mutex::new(WhiteboardConfig::default()),
        }
    }

    pub fn whiteboard(&self) -> &Arc<Whiteboard> {
        &self.whiteboard
    }

    /// Bring the registrations in line with `config`.
    pub fn apply(&self, config: &WhiteboardConfig) -> ProvisionReport {
        let mut applied = self.applied.lock();
        let old = &*applied;
        let mut report = ProvisionReport::default();

        let old_contexts = by_key(&old.contexts, |c| c.id);
        let new_contexts = by_key(&config.contexts, |c| c.id);
        let stale: HashSet<i64> = old_contexts
            .iter()
            .filter(|(id, context)| new_contexts.get(*id) != Some(*context))
            .map(|(id, _)| *id)
            .collect();

        let servlets = Diff::new(&old.servlets, &config.servlets, |s| s.id, |s| s.context, &stale);
        let pages = Diff::new(&old.error_pages, &config.error_pages, |p| p.id, |p| p.context, &stale);
        let filters = Diff::new(&old.filters, &config.filters, |f| f.id, |f| f.context, &stale);
        let resources = Diff::new(&old.resources, &config.resources, |r| r.id, |r| r.context, &stale);
        let listeners = Diff::new(&old.listeners, &config.listeners, |l| l.id, |l| l.context, &stale);
        let aliases = Diff::new(
            &old.aliases,
            &config.aliases,
            |a| a.alias.clone(),
            |_| DEFAULT_CONTEXT_ID,
            &stale,
        );

        for listener in &listeners.removed {
            self.count_removal(&mut report, self.whiteboard.remove_listener(listener.id), listener.id);
        }
        for alias in &aliases.removed {
            self.count_removal(&mut report, self.whiteboard.remove_alias(&alias.alias), &alias.alias);
        }
        for filter in &filters.removed {
            self.count_removal(&mut report, self.whiteboard.remove_filter(filter.id), filter.id);
        }
        for page in &pages.removed {
            self.count_removal(&mut report, self.whiteboard.remove_servlet(page.id), page.id);
        }
        for resource in &resources.removed {
            self.count_removal(&mut report, self.whiteboard.remove_resource(resource.id), resource.id);
        }
        for servlet in &servlets.removed {
            self.count_removal(&mut report, self.whiteboard.remove_servlet(servlet.id), servlet.id);
        }
        for id in &stale {
            self.count_removal(&mut report, self.whiteboard.remove_context(*id), *id);
        }

        for context in config.contexts.iter().filter(|c| {
            stale.contains(&c.id) || !old_contexts.contains_key(&c.id)
        }) {
            let result = self.add_context(context);
            report.record(format!("context {}", context.id), result);
        }
        for servlet in &servlets.added {
            let result = self.add_servlet(servlet);
            report.record(format!("servlet {}", servlet.id), result);
        }
        for resource in &resources.added {
            let result = self.add_resource(resource);
            report.record(format!("resource {}", resource.id), result);
        }
        for page in &pages.added {
            let result = self.add_error_page(page);
            report.record(format!("error page {}", page.id), result);
        }
        for filter in &filters.added {
            let result = self.add_filter(filter);
            report.record(format!("filter {}", filter.id), result);
        }
        for alias in &aliases.added {
            let result = self.add_alias(alias);
            report.record(format!("alias {}", alias.alias), result);
        }
        for listener in &listeners.added {
            let result = self.add_listener(listener);
            report.record(format!("listener {}", listener.id), result);
        }

        tracing::info!(
            added = report.added,
            removed = report.removed,
            rejected = report.rejected.len(),
            "Configuration applied"
        );
        *applied = config.clone();
        report
    }

    fn count_removal(
        &self,
        report: &mut ProvisionReport,
        result: Result<bool, RegistrationError>,
        key: impl std::fmt::Display,
    ) {
        match result {
            Ok(true) => report.removed += 1,
            Ok(false) => {}
            Err(err) => tracing::error!(entry = %key, error = %err, "Failed to remove entry"),
        }
    }

    fn add_context(&self, context: &ContextConfig) -> Result<(), ProvisionError> {
        let info = ContextInfo::new(context.id, context.name.clone(), context.path.clone())
            .with_ranking(context.ranking);
        Ok(self.whiteboard.add_context(info)?)
    }

    fn add_servlet(&self, servlet: &ServletConfig) -> Result<(), ProvisionError> {
        let mut info = HandlerInfo::new(servlet.id)
            .with_context(servlet.context)
            .with_ranking(servlet.ranking);
        info.name = servlet.name.clone();
        info.patterns = servlet.patterns.clone();
        info.error_pages = servlet.error_pages.clone();
        info.init_params = servlet.init_params.clone();

        let instance = StaticServlet::new(
            status(servlet.status)?,
            servlet.body.clone(),
            header_value(&servlet.content_type)?,
        );
        Ok(self
            .whiteboard
            .add_servlet(Arc::new(Handler::new(info, Arc::new(instance))))?)
    }

    fn add_error_page(&self, page: &ErrorPageConfig) -> Result<(), ProvisionError> {
        let mut info = HandlerInfo::new(page.id)
            .with_context(page.context)
            .with_ranking(page.ranking);
        info.name = page.name.clone();
        info.error_pages = page.errors.clone();

        let instance = StaticServlet::new(
            StatusCode::OK,
            page.body.clone(),
            header_value(&page.content_type)?,
        );
        Ok(self
            .whiteboard
            .add_servlet(Arc::new(Handler::new(info, Arc::new(instance))))?)
    }

    fn add_filter(&self, filter: &FilterConfig) -> Result<(), ProvisionError> {
        let mut info = HandlerInfo::new(filter.id)
            .with_context(filter.context)
            .with_ranking(filter.ranking)
            .with_dispatcher(filter.dispatcher.clone());
        info.name = filter.name.clone();
        info.patterns = filter.patterns.clone();
        info.servlet_names = filter.servlet_names.clone();

        let header = HeaderName::from_bytes(filter.header.as_bytes())
            .map_err(|_| ProvisionError::InvalidHeader(filter.header.clone()))?;
        let instance = HeaderFilter::new(header, header_value(&filter.value)?);
        Ok(self
            .whiteboard
            .add_filter(Arc::new(Handler::new(info, Arc::new(instance))))?)
    }

    fn add_resource(&self, resource: &ResourceConfig) -> Result<(), ProvisionError> {
        let mut info = ResourceInfo::new(resource.id, resource.prefix.clone())
            .with_context(resource.context)
            .with_ranking(resource.ranking);
        info.patterns = resource.patterns.clone();
        Ok(self.whiteboard.add_resource(info)?)
    }

    fn add_listener(&self, listener: &ListenerConfig) -> Result<(), ProvisionError> {
        let mut info = HandlerInfo::new(listener.id)
            .with_context(listener.context)
            .with_ranking(listener.ranking);
        info.name = listener.name.clone();
        for listener_type in &listener.types {
            info = info.with_listener_type(*listener_type);
        }
        Ok(self
            .whiteboard
            .add_listener(Arc::new(Handler::new(info, Arc::new(EventLogListener::new()))))?)
    }

    fn add_alias(&self, alias: &AliasConfig) -> Result<(), ProvisionError> {
        let instance: Arc<dyn Lifecycle> = Arc::new(StaticServlet::new(
            status(alias.status)?,
            alias.body.clone(),
            header_value(&alias.content_type)?,
        ));
        self.whiteboard
            .add_alias(&alias.alias, instance, alias.init_params.clone())?;
        Ok(())
    }
}

impl std::fmt::Debug for Provisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner")
            .field("whiteboard", &self.whiteboard)
            .finish()
    }
}

fn status(code: u16) -> Result<StatusCode, ProvisionError> {
    StatusCode::from_u16(code).map_err(|_| ProvisionError::InvalidStatus(code))
}

fn header_value(value: &str) -> Result<HeaderValue, ProvisionError> {
    HeaderValue::from_str(value).map_err(|_| ProvisionError::InvalidHeader(value.to_string()))
}

fn by_key<T, K: Ord>(items: &[T], key: impl Fn(&T) -> K) -> BTreeMap<K, &T> {
    items.iter().map(|item| (key(item), item)).collect()
}

/// Entries to remove and to add for one table.
struct Diff<'a, T> {
    removed: Vec<&'a T>,
    added: Vec<&'a T>,
}

impl<'a, T: PartialEq> Diff<'a, T> {
    fn new<K: Ord>(
        old: &'a [T],
        new: &'a [T],
        key: impl Fn(&T) -> K,
        context: impl Fn(&T) -> i64,
        stale: &HashSet<i64>,
    ) -> Self {
        let old_by_key = by_key(old, &key);
        let new_by_key = by_key(new, &key);

        let removed = old
            .iter()
            .filter(|item| {
                stale.contains(&context(*item)) || new_by_key.get(&key(*item)) != Some(item)
            })
            .collect();
        let added = new
            .iter()
            .filter(|item| {
                stale.contains(&context(*item)) || old_by_key.get(&key(*item)) != Some(item)
            })
            .collect();
        Self { removed, added }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::handler::{DispatcherType, ListenerType};

    fn provisioner() -> Provisioner {
        Provisioner::new(Arc::new(Whiteboard::default()))
    }

    const BASE: &str = r#"
        [[contexts]]
        id = 1
        name = "app"
        path = "/app"

        [[servlets]]
        id = 10
        context = 1
        patterns = ["/*"]
        body = "app"

        [[servlets]]
        id = 11
        patterns = ["/hello"]
        body = "hello"

        [[filters]]
        id = 20
        context = 1
        patterns = ["/*"]
        header = "x-app"
        value = "1"

        [[error_pages]]
        id = 30
        errors = ["4xx"]
        body = "missing"

        [[aliases]]
        alias = "/legacy"
        body = "old"
    "#;

    #[test]
    fn test_initial_apply_registers_everything() {
        let provisioner = provisioner();
        let report = provisioner.apply(&parse_config(BASE).unwrap());
        assert_eq!(report.added, 6);
        assert!(report.rejected.is_empty());

        let whiteboard = provisioner.whiteboard();
        assert_eq!(whiteboard.dispatch("/app/x").unwrap().handler.id(), 10);
        assert_eq!(whiteboard.dispatch("/hello").unwrap().handler.id(), 11);
        assert_eq!(whiteboard.dispatch("/legacy").unwrap().handler.id(), -1);
        assert_eq!(whiteboard.resolve_error(0, None, 404).unwrap().id(), 30);
        let route = whiteboard.route("/app/x", DispatcherType::Request).unwrap();
        assert_eq!(route.filters.len(), 1);
    }

    #[test]
    fn test_reapply_same_config_is_noop() {
        let provisioner = provisioner();
        let config = parse_config(BASE).unwrap();
        provisioner.apply(&config);
        let report = provisioner.apply(&config);
        assert_eq!((report.added, report.removed), (0, 0));
    }

    #[test]
    fn test_changed_context_reregisters_its_handlers() {
        let provisioner = provisioner();
        provisioner.apply(&parse_config(BASE).unwrap());

        let moved = BASE.replace("path = \"/app\"", "path = \"/v2\"");
        let report = provisioner.apply(&parse_config(&moved).unwrap());
        assert!(report.rejected.is_empty());

        let whiteboard = provisioner.whiteboard();
        assert!(whiteboard.dispatch("/app/x").is_none());
        assert_eq!(whiteboard.dispatch("/v2/x").unwrap().handler.id(), 10);
        let route = whiteboard.route("/v2/x", DispatcherType::Request).unwrap();
        assert_eq!(route.filters.len(), 1);
    }

    #[test]
    fn test_resources_and_listeners_follow_config() {
        let provisioner = provisioner();
        let dir = std::env::temp_dir().join(format!("whiteboard-provision-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let tables = format!(
            "{}\n[[resources]]\nid = 40\ncontext = 1\npatterns = [\"/static/*\"]\nprefix = {:?}\n\n[[listeners]]\nid = 50\ncontext = 1\ntypes = [\"request\"]\n",
            BASE,
            dir.to_string_lossy()
        );
        let report = provisioner.apply(&parse_config(&tables).unwrap());
        assert_eq!(report.added, 8);
        assert!(report.rejected.is_empty(), "{:?}", report.rejected);

        let whiteboard = provisioner.whiteboard();
        assert_eq!(whiteboard.dispatch("/app/static/x").unwrap().handler.id(), 40);
        let listeners = whiteboard.listeners(1, ListenerType::Request);
        assert_eq!(listeners.len(), 1);
        assert!(listeners[0].instance_as::<EventLogListener>().is_some());

        let report = provisioner.apply(&parse_config(BASE).unwrap());
        assert_eq!(report.removed, 2);
        assert_eq!(whiteboard.dispatch("/app/static/x").unwrap().handler.id(), 10);
        assert!(whiteboard.listeners(1, ListenerType::Request).is_empty());
    }

    #[test]
    fn test_removed_entries_are_unregistered() {
        let provisioner = provisioner();
        provisioner.apply(&parse_config(BASE).unwrap());
        let report = provisioner.apply(&WhiteboardConfig::default());

        assert_eq!(report.removed, 6);
        let whiteboard = provisioner.whiteboard();
        assert!(whiteboard.dispatch("/hello").is_none());
        assert!(whiteboard.dispatch("/legacy").is_none());
        assert!(whiteboard.context(1).is_none());
    }
}

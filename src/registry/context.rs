//! Per-context registry: filters, error pages and listeners of one context.
//!
//! # Responsibilities
//! - Register filters and listeners and publish immutable tables for them
//! - Resolve error-page conflicts through the ranking resolver
//! - Build filter chains and resolve error handlers for requests
//!
//! # Design Decisions
//! - Every table is published through `ArcSwap`; readers never lock
//! - Filters and listeners never conflict: all registered ones are active
//! - A rejected registration leaves every published table untouched
//! - Handler callbacks run with the writer lock released
//! - A closed registry (its context was removed) rejects every registration

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::error::{FailureReason, RegistrationError, RegistrationResult};
use crate::handler::{ContextInfo, DispatcherType, Handler, HandlerInfo, ListenerType, RankedHandler};
use crate::observability::metrics;
use crate::registry::errors::{parse_error_pages, ErrorKey, ErrorMapping, ExceptionChain};
use crate::registry::guard::WriterLock;
use crate::registry::ranking::{RankingMultimap, ShadowPolicy, Update};
use crate::registry::runtime::{ErrorPageDto, FailureDto, FilterDto, HandlerKind, ListenerDto};
use crate::registry::{compile_patterns, transact, Ranked};
use crate::routing::{HandlerMapping, MappingEntry, Rule};

#[derive(Clone)]
struct FilterEntry {
    handler: RankedHandler,
    rules: Vec<Rule>,
}

#[derive(Clone)]
struct ErrorEntry {
    handler: RankedHandler,
    keys: BTreeSet<ErrorKey>,
}

#[derive(Clone)]
struct ContextTables {
    filters: BTreeMap<i64, FilterEntry>,
    listeners: BTreeMap<i64, RankedHandler>,
    error_pages: RankingMultimap<ErrorKey, RankedHandler>,
    error_entries: BTreeMap<i64, ErrorEntry>,
    failures: BTreeMap<(HandlerKind, i64), FailureDto>,
    closed: bool,
}

impl ContextTables {
    fn fail(&mut self, info: &HandlerInfo, kind: HandlerKind, reason: FailureReason) {
        self.failures
            .insert((kind, info.id), FailureDto::new(info, kind, reason));
    }

    fn contains(&self, kind: HandlerKind, id: i64) -> bool {
        match kind {
            HandlerKind::Filter => self.filters.contains_key(&id),
            HandlerKind::Listener => self.listeners.contains_key(&id),
            HandlerKind::ErrorPage => self.error_entries.contains_key(&id),
            _ => false,
        }
    }

    /// Shared admission checks for every kind this registry holds.
    fn admit(&self, kind: HandlerKind, info: &HandlerInfo) -> RegistrationResult<()> {
        if self.closed {
            return Err(RegistrationError::ContextUnavailable {
                id: info.id,
                context_id: info.context_id,
            });
        }
        if self.contains(kind, info.id) {
            return Err(RegistrationError::AlreadyUsed {
                id: info.id,
                name: info.display_name(),
            });
        }
        Ok(())
    }
}

impl Ranked for ContextTables {
    type Key = ErrorKey;

    fn resolver(&mut self) -> &mut RankingMultimap<ErrorKey, RankedHandler> {
        &mut self.error_pages
    }

    fn evict(&mut self, handler: &RankedHandler, err: &RegistrationError) -> Vec<ErrorKey> {
        let id = handler.id();
        match self.error_entries.get(&id) {
            Some(entry) if Arc::ptr_eq(entry.handler.handler(), handler.handler()) => {}
            _ => return Vec::new(),
        }
        let keys = self
            .error_entries
            .remove(&id)
            .map(|entry| entry.keys.into_iter().collect())
            .unwrap_or_default();
        self.fail(handler.handler().info(), HandlerKind::ErrorPage, err.reason());
        keys
    }
}

/// Published filter table.
#[derive(Debug, Clone, Default)]
pub struct FilterMapping {
    patterns: HandlerMapping,
    by_servlet_name: HashMap<String, Vec<RankedHandler>>,
    filters: Vec<RankedHandler>,
}

impl FilterMapping {
    fn build(entries: &BTreeMap<i64, FilterEntry>) -> Self {
        let patterns = HandlerMapping::from_entries(entries.values().flat_map(|entry| {
            entry
                .rules
                .iter()
                .map(|rule| MappingEntry::new(rule.clone(), entry.handler.clone()))
        }));

        let mut by_servlet_name: HashMap<String, Vec<RankedHandler>> = HashMap::new();
        for entry in entries.values() {
            for name in &entry.handler.handler().info().servlet_names {
                by_servlet_name
                    .entry(name.clone())
                    .or_default()
                    .push(entry.handler.clone());
            }
        }
        for handlers in by_servlet_name.values_mut() {
            handlers.sort();
        }

        let mut filters: Vec<RankedHandler> = entries.values().map(|e| e.handler.clone()).collect();
        filters.sort();

        Self {
            patterns,
            by_servlet_name,
            filters,
        }
    }

    /// Filters for a request: pattern matches (most specific rule first, then
    /// priority) followed by filters bound to the target servlet's name.
    pub fn chain(
        &self,
        path: &str,
        servlet_name: Option<&str>,
        dispatcher: DispatcherType,
    ) -> Vec<Arc<Handler>> {
        let accepts = |h: &RankedHandler| h.handler().info().dispatcher.contains(&dispatcher);
        let mut chain: Vec<Arc<Handler>> = Vec::new();

        let by_pattern = self.patterns.all_matches(path).into_iter().map(|e| &e.handler);
        let by_name = servlet_name
            .and_then(|name| self.by_servlet_name.get(name))
            .into_iter()
            .flatten();

        for handler in by_pattern.chain(by_name) {
            if accepts(handler) && !chain.iter().any(|h| h.id() == handler.id()) {
                chain.push(handler.handler().clone());
            }
        }
        chain
    }

    /// Every registered filter, preferred first.
    pub fn filters(&self) -> &[RankedHandler] {
        &self.filters
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

/// Published listener table: per event family, listeners in preference order.
#[derive(Debug, Clone, Default)]
pub struct ListenerMapping {
    by_type: BTreeMap<ListenerType, Vec<Arc<Handler>>>,
    listeners: Vec<RankedHandler>,
}

impl ListenerMapping {
    fn build(entries: &BTreeMap<i64, RankedHandler>) -> Self {
        let mut listeners: Vec<RankedHandler> = entries.values().cloned().collect();
        listeners.sort();

        let mut by_type: BTreeMap<ListenerType, Vec<Arc<Handler>>> = BTreeMap::new();
        for listener in &listeners {
            for listener_type in &listener.handler().info().listener_types {
                by_type
                    .entry(*listener_type)
                    .or_default()
                    .push(listener.handler().clone());
            }
        }
        Self { by_type, listeners }
    }

    /// Listeners receiving events of one family.
    pub fn of(&self, listener_type: ListenerType) -> &[Arc<Handler>] {
        self.by_type
            .get(&listener_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn listeners(&self) -> &[RankedHandler] {
        &self.listeners
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
struct ContextStatus {
    error_pages: Vec<RankedHandler>,
    failures: Vec<FailureDto>,
    closed: bool,
}

/// Runtime view of one context's filters, error pages and listeners.
#[derive(Debug, Clone, Default)]
pub struct ContextRuntime {
    pub filters: Vec<FilterDto>,
    pub error_pages: Vec<ErrorPageDto>,
    pub listeners: Vec<ListenerDto>,
    pub failures: Vec<FailureDto>,
}

/// Filters, error pages and listeners of one context.
pub struct PerContextRegistry {
    context: ContextInfo,
    writer: WriterLock<ContextTables>,
    filters: ArcSwap<FilterMapping>,
    errors: ArcSwap<ErrorMapping>,
    listeners: ArcSwap<ListenerMapping>,
    status: ArcSwap<ContextStatus>,
}

impl PerContextRegistry {
    pub fn new(context: ContextInfo, policy: ShadowPolicy) -> Self {
        Self {
            context,
            writer: WriterLock::new(ContextTables {
                filters: BTreeMap::new(),
                listeners: BTreeMap::new(),
                error_pages: RankingMultimap::new(policy),
                error_entries: BTreeMap::new(),
                failures: BTreeMap::new(),
                closed: false,
            }),
            filters: ArcSwap::from_pointee(FilterMapping::default()),
            errors: ArcSwap::from_pointee(ErrorMapping::default()),
            listeners: ArcSwap::from_pointee(ListenerMapping::default()),
            status: ArcSwap::from_pointee(ContextStatus::default()),
        }
    }

    pub fn context(&self) -> &ContextInfo {
        &self.context
    }

    /// Path remainder below this context, or `None` when outside it.
    pub fn is_matching<'a>(&self, path: &'a str) -> Option<&'a str> {
        self.context.is_matching(path)
    }

    /// Register a filter. It must declare patterns or servlet names.
    pub fn add_filter(&self, handler: Arc<Handler>) -> RegistrationResult<()> {
        let context = &self.context;
        self.register(
            HandlerKind::Filter,
            &handler,
            |tables, info| {
                tables.admit(HandlerKind::Filter, info)?;
                if info.patterns.is_empty() && info.servlet_names.is_empty() {
                    return Err(RegistrationError::InvalidPattern {
                        id: info.id,
                        pattern: String::new(),
                        reason: "filter declares neither patterns nor servlet names".to_string(),
                    });
                }
                compile_patterns(context, info)
            },
            |tables, rules| {
                tables.filters.insert(
                    handler.id(),
                    FilterEntry {
                        handler: RankedHandler::new(context.rank(), handler.clone()),
                        rules,
                    },
                );
                self.publish_filters(tables);
            },
        )
    }

    /// Unregister a filter. Returns false when it was not registered.
    pub fn remove_filter(&self, id: i64) -> RegistrationResult<bool> {
        let entry = {
            let mut tables = self.writer.write()?;
            let had_failure = tables.failures.remove(&(HandlerKind::Filter, id)).is_some();
            let entry = tables.filters.remove(&id);
            if entry.is_some() {
                self.publish_filters(&tables);
            }
            if entry.is_some() || had_failure {
                self.publish_status(&tables);
            }
            entry
        };
        let Some(entry) = entry else {
            return Ok(false);
        };
        entry.handler.handler().destroy();

        tracing::info!(context = %self.context.name, filter = id, "Filter unregistered");
        metrics::record_registration(HandlerKind::Filter, "removed");
        Ok(true)
    }

    /// Register a listener for the event families it declares.
    pub fn add_listener(&self, handler: Arc<Handler>) -> RegistrationResult<()> {
        let context = &self.context;
        self.register(
            HandlerKind::Listener,
            &handler,
            |tables, info| {
                tables.admit(HandlerKind::Listener, info)?;
                if info.listener_types.is_empty() {
                    return Err(RegistrationError::InvalidPattern {
                        id: info.id,
                        pattern: String::new(),
                        reason: "listener declares no listener types".to_string(),
                    });
                }
                Ok(())
            },
            |tables, ()| {
                tables
                    .listeners
                    .insert(handler.id(), RankedHandler::new(context.rank(), handler.clone()));
                self.publish_listeners(tables);
            },
        )
    }

    /// Unregister a listener. Returns false when it was not registered.
    pub fn remove_listener(&self, id: i64) -> RegistrationResult<bool> {
        let removed = {
            let mut tables = self.writer.write()?;
            let had_failure = tables.failures.remove(&(HandlerKind::Listener, id)).is_some();
            let removed = tables.listeners.remove(&id);
            if removed.is_some() {
                self.publish_listeners(&tables);
            }
            if removed.is_some() || had_failure {
                self.publish_status(&tables);
            }
            removed
        };
        let Some(listener) = removed else {
            return Ok(false);
        };
        listener.handler().destroy();

        tracing::info!(context = %self.context.name, listener = id, "Listener unregistered");
        metrics::record_registration(HandlerKind::Listener, "removed");
        Ok(true)
    }

    /// Register a handler for its declared error codes and exception types.
    pub fn add_error_page(&self, handler: Arc<Handler>) -> RegistrationResult<()> {
        let info = handler.info();
        let keys = parse_error_pages(&info.error_pages);
        let outcome = transact(
            &self.writer,
            Some(info.id),
            |tables| {
                tables.admit(HandlerKind::ErrorPage, info)?;
                if keys.is_empty() {
                    return Err(RegistrationError::InvalidPattern {
                        id: info.id,
                        pattern: info.error_pages.join(","),
                        reason: "no error codes or exception types declared".to_string(),
                    });
                }
                let ranked = RankedHandler::new(self.context.rank(), handler.clone());
                let update = tables.error_pages.add(&keys, ranked.clone());
                tables.failures.remove(&(HandlerKind::ErrorPage, info.id));
                tables.error_entries.insert(
                    info.id,
                    ErrorEntry {
                        handler: ranked,
                        keys: keys.clone(),
                    },
                );
                Ok((update, ()))
            },
            |tables, update| self.publish_errors(tables, update),
        );
        if let Err(err) = outcome {
            return Err(self.reject(HandlerKind::ErrorPage, info, err));
        }

        let (codes, exceptions) = self.errors.load().keys_of(info.id);
        let active = !codes.is_empty() || !exceptions.is_empty();
        tracing::info!(
            context = %self.context.name,
            error_page = info.id,
            name = %info.display_name(),
            active,
            "Error page registered"
        );
        metrics::record_registration(
            HandlerKind::ErrorPage,
            if active { "active" } else { "shadowed" },
        );
        Ok(())
    }

    /// Unregister an error page, promoting shadowed competitors.
    pub fn remove_error_page(&self, id: i64) -> RegistrationResult<bool> {
        let removed = transact(
            &self.writer,
            None,
            |tables| {
                tables.failures.remove(&(HandlerKind::ErrorPage, id));
                match tables.error_entries.remove(&id) {
                    Some(entry) => Ok((tables.error_pages.remove(&entry.keys, &entry.handler), true)),
                    None => Ok((Update::default(), false)),
                }
            },
            |tables, update| self.publish_errors(tables, update),
        )?;
        if removed {
            tracing::info!(context = %self.context.name, error_page = id, "Error page unregistered");
            metrics::record_registration(HandlerKind::ErrorPage, "removed");
        }
        Ok(removed)
    }

    /// Drop every filter, error page and listener, destroying what was
    /// initialized. The registry keeps accepting registrations.
    pub fn remove_all(&self) -> RegistrationResult<()> {
        self.clear(false)
    }

    /// Like `remove_all`, then reject every later registration with
    /// `ContextUnavailable`. Used when the context itself goes away.
    pub fn close(&self) -> RegistrationResult<()> {
        self.clear(true)
    }

    pub fn is_closed(&self) -> bool {
        self.status.load().closed
    }

    /// True when an error page with this id is registered, serving or not.
    pub fn has_error_page(&self, id: i64) -> bool {
        self.status.load().error_pages.iter().any(|h| h.id() == id)
    }

    /// Filter chain for a request path (full path, including the context).
    pub fn filter_chain(
        &self,
        path: &str,
        servlet_name: Option<&str>,
        dispatcher: DispatcherType,
    ) -> Vec<Arc<Handler>> {
        self.filters.load().chain(path, servlet_name, dispatcher)
    }

    /// Handler for an error in this context.
    pub fn resolve_error(&self, exception: Option<&ExceptionChain>, status: u16) -> Option<Arc<Handler>> {
        self.errors
            .load()
            .resolve(exception, status)
            .map(|h| h.handler().clone())
    }

    /// Listeners of one event family, preferred first.
    pub fn listeners(&self, listener_type: ListenerType) -> Vec<Arc<Handler>> {
        self.listeners.load().of(listener_type).to_vec()
    }

    pub fn filter_mapping(&self) -> Arc<FilterMapping> {
        self.filters.load_full()
    }

    pub fn error_mapping(&self) -> Arc<ErrorMapping> {
        self.errors.load_full()
    }

    pub fn listener_mapping(&self) -> Arc<ListenerMapping> {
        self.listeners.load_full()
    }

    /// Why a filter, error page or listener of this context is not active.
    pub fn failure_reason(&self, kind: HandlerKind, id: i64) -> Option<FailureReason> {
        let status = self.status.load();
        if let Some(failure) = status.failures.iter().find(|f| f.kind == kind && f.id == id) {
            return Some(failure.reason);
        }
        if kind != HandlerKind::ErrorPage || !status.error_pages.iter().any(|h| h.id() == id) {
            return None;
        }
        let (codes, exceptions) = self.errors.load().keys_of(id);
        (codes.is_empty() && exceptions.is_empty()).then_some(FailureReason::Shadowed)
    }

    /// Filters, serving error pages, listeners and failures of this context.
    pub fn runtime(&self) -> ContextRuntime {
        let filters = self
            .filters
            .load()
            .filters()
            .iter()
            .map(|h| {
                let info = h.handler().info();
                FilterDto {
                    id: info.id,
                    name: info.display_name(),
                    ranking: info.ranking,
                    patterns: info.patterns.clone(),
                    servlet_names: info.servlet_names.clone(),
                    dispatcher: info.dispatcher.clone(),
                }
            })
            .collect();

        let listeners = self
            .listeners
            .load()
            .listeners()
            .iter()
            .map(|h| {
                let info = h.handler().info();
                ListenerDto {
                    id: info.id,
                    name: info.display_name(),
                    ranking: info.ranking,
                    types: info.listener_types.clone(),
                }
            })
            .collect();

        let errors = self.errors.load();
        let status = self.status.load();
        let mut error_pages = Vec::new();
        let mut failures = status.failures.clone();
        for handler in &status.error_pages {
            let info = handler.handler().info();
            let (error_codes, exceptions) = errors.keys_of(info.id);
            if error_codes.is_empty() && exceptions.is_empty() {
                failures.push(FailureDto::new(info, HandlerKind::ErrorPage, FailureReason::Shadowed));
            } else {
                error_pages.push(ErrorPageDto {
                    id: info.id,
                    name: info.display_name(),
                    error_codes,
                    exceptions,
                });
            }
        }
        ContextRuntime {
            filters,
            error_pages,
            listeners,
            failures,
        }
    }

    /// Register a handler that never conflicts with others: validate under
    /// the lock, initialize with the lock released, then validate again and
    /// insert. A registration rejected after `init` is destroyed again.
    fn register<P>(
        &self,
        kind: HandlerKind,
        handler: &Arc<Handler>,
        validate: impl Fn(&ContextTables, &HandlerInfo) -> RegistrationResult<P>,
        insert: impl FnOnce(&mut ContextTables, P),
    ) -> RegistrationResult<()> {
        let info = handler.info();
        let validated = {
            let tables = self.writer.write()?;
            validate(&tables, info)
        };
        let prepared = match validated.and_then(|prepared| handler.init().map(|()| prepared)) {
            Ok(prepared) => prepared,
            Err(err) => return Err(self.reject(kind, info, err)),
        };

        let mut tables = match self.writer.write() {
            Ok(tables) => tables,
            Err(err) => {
                handler.destroy();
                return Err(err);
            }
        };
        if let Err(err) = validate(&tables, info) {
            drop(tables);
            handler.destroy();
            return Err(self.reject(kind, info, err));
        }
        tables.failures.remove(&(kind, info.id));
        insert(&mut tables, prepared);
        self.publish_status(&tables);
        drop(tables);

        tracing::info!(
            context = %self.context.name,
            kind = kind.as_str(),
            id = info.id,
            name = %info.display_name(),
            "Handler registered"
        );
        metrics::record_registration(kind, "active");
        Ok(())
    }

    /// Log a rejection and record it unless it is a duplicate, the context
    /// is closed, or the id has been registered since.
    fn reject(&self, kind: HandlerKind, info: &HandlerInfo, err: RegistrationError) -> RegistrationError {
        tracing::warn!(
            context = %self.context.name,
            kind = kind.as_str(),
            id = info.id,
            reason = %err.reason(),
            error = %err,
            "Registration rejected"
        );
        metrics::record_registration(kind, "rejected");
        if matches!(err, RegistrationError::AlreadyUsed { .. }) {
            return err;
        }
        if let Ok(mut tables) = self.writer.write() {
            if !tables.closed && !tables.contains(kind, info.id) {
                tables.fail(info, kind, err.reason());
                self.publish_status(&tables);
            }
        }
        err
    }

    fn clear(&self, close: bool) -> RegistrationResult<()> {
        let (filters, listeners, update) = {
            let mut tables = self.writer.write()?;
            let filters = std::mem::take(&mut tables.filters);
            let listeners = std::mem::take(&mut tables.listeners);
            let update = tables.error_pages.clear();
            tables.error_entries.clear();
            tables.failures.clear();
            tables.closed |= close;

            self.filters.store(Arc::new(FilterMapping::default()));
            self.errors.store(Arc::new(ErrorMapping::default()));
            self.listeners.store(Arc::new(ListenerMapping::default()));
            self.publish_status(&tables);
            (filters, listeners, update)
        };

        for entry in filters.values() {
            entry.handler.handler().destroy();
        }
        for listener in listeners.values() {
            listener.handler().destroy();
        }
        for handler in update.destroy() {
            handler.handler().destroy();
        }
        tracing::debug!(
            context = %self.context.name,
            filters = filters.len(),
            listeners = listeners.len(),
            closed = close,
            "Context registry cleared"
        );
        Ok(())
    }

    /// Swap the error mapping and status. Runs under the writer lock.
    fn publish_errors(&self, tables: &ContextTables, update: &Update<ErrorKey, RankedHandler>) {
        if !update.activated().is_empty() || !update.deactivated().is_empty() {
            let next = self
                .errors
                .load()
                .update(update.activated(), update.deactivated());
            self.errors.store(Arc::new(next));
            metrics::record_snapshot_swap("error_pages");
        }
        self.publish_status(tables);
    }

    fn publish_filters(&self, tables: &ContextTables) {
        let mapping = FilterMapping::build(&tables.filters);
        tracing::debug!(
            context = %self.context.name,
            filters = mapping.len(),
            "Filter table published"
        );
        self.filters.store(Arc::new(mapping));
        metrics::record_snapshot_swap("filters");
    }

    fn publish_listeners(&self, tables: &ContextTables) {
        let mapping = ListenerMapping::build(&tables.listeners);
        metrics::set_active_handlers(HandlerKind::Listener, mapping.len());
        self.listeners.store(Arc::new(mapping));
        metrics::record_snapshot_swap("listeners");
    }

    fn publish_status(&self, tables: &ContextTables) {
        let mut error_pages: Vec<RankedHandler> =
            tables.error_entries.values().map(|e| e.handler.clone()).collect();
        error_pages.sort();
        self.status.store(Arc::new(ContextStatus {
            error_pages,
            failures: tables.failures.values().cloned().collect(),
            closed: tables.closed,
        }));
    }
}

impl std::fmt::Debug for PerContextRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerContextRegistry")
            .field("context", &self.context)
            .field("filters", &self.filters.load().len())
            .field("error_pages", &self.errors.load().len())
            .field("listeners", &self.listeners.load().len())
            .finish()
    }
}

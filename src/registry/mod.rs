//! Registry subsystem.
//!
//! # Data Flow
//! ```text
//! Registration (any thread):
//!     Whiteboard::add_* (HandlerInfo + instance)
//!     → servlet.rs / context.rs: lock, plan on a copy (ranking.rs Update)
//!     → unlock, init → lock, re-plan, ArcSwap snapshot store
//!     → unlock, destroy
//!
//! Dispatch (any thread, lock-free):
//!     path → RoutingSnapshot::resolve → PathMatch
//!          → PerContextRegistry::filter_chain
//!          → on error: ErrorMapping::resolve (context, then default context)
//! ```
//!
//! # Design Decisions
//! - Readers load one immutable snapshot; a swap is the only synchronization
//! - Writers serialize per registry; no lock is held while a handler runs
//! - Servlets, resources and error pages share one id space
//! - Shadowing is a state reported through runtime DTOs, never an error
//! - The default context (id 0, `/`) always exists

pub mod context;
pub mod errors;
pub mod guard;
pub mod legacy;
pub mod ranking;
pub mod runtime;
pub mod servlet;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{FailureReason, RegistrationError, RegistrationResult};
use crate::handler::{
    ContextInfo, DispatcherType, Handler, HandlerInfo, Lifecycle, ListenerType, RankedHandler,
    ResourceInfo, ResourceServlet, DEFAULT_CONTEXT_ID,
};
use crate::observability::metrics;
use crate::registry::guard::WriterLock;
use crate::routing::{compile_in, Rule};

pub use context::{ContextRuntime, FilterMapping, ListenerMapping, PerContextRegistry};
pub use errors::{ErrorKey, ErrorMapping, ExceptionChain};
pub use legacy::AliasRegistry;
pub use ranking::{RankingMultimap, ShadowPolicy, Update};
pub use runtime::{FailureDto, HandlerKind, RuntimeDto};
pub use servlet::{PathMatch, RoutingSnapshot, ServletRegistry};

/// Compile the local patterns of `info` against its context, deduplicated.
pub(crate) fn compile_patterns(
    context: &ContextInfo,
    info: &HandlerInfo,
) -> RegistrationResult<Vec<Rule>> {
    let mut rules = BTreeSet::new();
    for pattern in &info.patterns {
        let rule = compile_in(context.prefix(), pattern).map_err(|e| {
            RegistrationError::InvalidPattern {
                id: info.id,
                pattern: pattern.clone(),
                reason: e.reason.to_string(),
            }
        })?;
        rules.insert(rule);
    }
    Ok(rules.into_iter().collect())
}

/// Registry tables whose conflicts a `RankingMultimap` resolves.
pub(crate) trait Ranked: Clone {
    type Key: Ord + Clone;

    fn resolver(&mut self) -> &mut RankingMultimap<Self::Key, RankedHandler>;

    /// Forget a handler whose `init` failed and record why. Returns the keys
    /// it was registered under, empty when it is no longer registered.
    fn evict(&mut self, handler: &RankedHandler, err: &RegistrationError) -> Vec<Self::Key>;
}

fn release(held: &[RankedHandler]) {
    for handler in held {
        handler.handler().destroy();
    }
}

/// Apply a mutation to ranked tables without running handler callbacks
/// under the writer lock.
///
/// `plan` mutates a copy of the tables under the lock. The handlers its
/// update wants initialized are initialized after the lock is released;
/// the plan then runs again against the tables as they are by then. Once
/// every handler the update needs holds a use, the copy replaces the tables
/// and `publish` runs, still locked. Destroys run last, unlocked.
///
/// A failing `init` of `subject` aborts the transaction with that error.
/// Any other failing handler is evicted and the plan repeated.
pub(crate) fn transact<T, R>(
    writer: &WriterLock<T>,
    subject: Option<i64>,
    mut plan: impl FnMut(&mut T) -> RegistrationResult<(Update<T::Key, RankedHandler>, R)>,
    publish: impl Fn(&T, &Update<T::Key, RankedHandler>),
) -> RegistrationResult<R>
where
    T: Ranked,
{
    let mut held: Vec<RankedHandler> = Vec::new();
    let mut failed: Vec<(RankedHandler, RegistrationError)> = Vec::new();
    let holds = |held: &[RankedHandler], handler: &RankedHandler| {
        held.iter().any(|h| Arc::ptr_eq(h.handler(), handler.handler()))
    };

    loop {
        let mut guard = match writer.write() {
            Ok(guard) => guard,
            Err(err) => {
                release(&held);
                return Err(err);
            }
        };
        let mut next = (*guard).clone();
        let (mut update, outcome) = match plan(&mut next) {
            Ok(planned) => planned,
            Err(err) => {
                drop(guard);
                release(&held);
                return Err(err);
            }
        };
        for (handler, err) in &failed {
            let keys = next.evict(handler, err);
            let evicted = next.resolver().remove(&keys, handler);
            update = update.then(evicted);
        }

        let missing: Vec<RankedHandler> = update
            .init()
            .iter()
            .filter(|h| !holds(&held, h))
            .cloned()
            .collect();

        if missing.is_empty() {
            *guard = next;
            publish(&*guard, &update);
            drop(guard);

            let surplus = held.iter().filter(|h| !update.init().contains(*h));
            for handler in update.destroy().iter().chain(surplus) {
                handler.handler().destroy();
            }
            return Ok(outcome);
        }

        drop(guard);
        for handler in missing {
            match handler.handler().init() {
                Ok(()) => held.push(handler),
                Err(err) if subject == Some(handler.id()) => {
                    release(&held);
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!(
                        handler = handler.id(),
                        name = %handler.handler().name(),
                        error = %err,
                        "Promoted handler failed to initialize"
                    );
                    failed.push((handler, err));
                }
            }
        }
    }
}

/// A dispatched request: the target and the filters to run before it.
#[derive(Debug, Clone)]
pub struct Route {
    pub target: PathMatch,
    pub filters: Vec<Arc<Handler>>,
}

/// Whiteboard facade tying contexts, servlets, resources, filters, error
/// pages, listeners and legacy aliases together.
pub struct Whiteboard {
    policy: ShadowPolicy,
    servlets: ServletRegistry,
    contexts: DashMap<i64, Arc<PerContextRegistry>>,
    aliases: AliasRegistry,
    failures: DashMap<(HandlerKind, i64), FailureDto>,
    /// Ids of servlet, resource and error page registrations in flight.
    pending: Mutex<BTreeSet<i64>>,
}

/// Holds an id in `Whiteboard::pending` until dropped.
struct Reservation<'a> {
    pending: &'a Mutex<BTreeSet<i64>>,
    id: i64,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

impl Whiteboard {
    /// Create a whiteboard holding only the default context.
    pub fn new(policy: ShadowPolicy) -> Self {
        let whiteboard = Self {
            policy,
            servlets: ServletRegistry::new(policy),
            contexts: DashMap::new(),
            aliases: AliasRegistry::new(),
            failures: DashMap::new(),
            pending: Mutex::new(BTreeSet::new()),
        };
        let default = ContextInfo::default_context();
        whiteboard
            .contexts
            .insert(default.id, Arc::new(PerContextRegistry::new(default.clone(), policy)));
        // A fresh registry always accepts its first context
        if let Err(err) = whiteboard.servlets.add_context(default) {
            tracing::error!(error = %err, "Failed to install default context");
        }
        whiteboard
    }

    pub fn policy(&self) -> ShadowPolicy {
        self.policy
    }

    /// Register a context. Its path must be `/` or not end with `/`.
    pub fn add_context(&self, context: ContextInfo) -> RegistrationResult<()> {
        if !ContextInfo::is_valid_path(&context.path) {
            return Err(RegistrationError::InvalidPattern {
                id: context.id,
                pattern: context.path.clone(),
                reason: "context path must be '/' or must not end with '/'".to_string(),
            });
        }
        if self.contexts.contains_key(&context.id) {
            return Err(RegistrationError::AlreadyUsed {
                id: context.id,
                name: context.name.clone(),
            });
        }
        self.servlets.add_context(context.clone())?;
        self.contexts.insert(
            context.id,
            Arc::new(PerContextRegistry::new(context.clone(), self.policy)),
        );
        tracing::info!(context = context.id, name = %context.name, path = %context.path, "Context registered");
        Ok(())
    }

    /// Remove a context with everything registered in it. The default context
    /// cannot be removed. Registrations still racing against the removal are
    /// rejected with `ContextUnavailable`.
    pub fn remove_context(&self, context_id: i64) -> RegistrationResult<bool> {
        if context_id == DEFAULT_CONTEXT_ID {
            tracing::warn!("Ignoring removal of the default context");
            return Ok(false);
        }
        let Some((_, registry)) = self.contexts.remove(&context_id) else {
            return Ok(false);
        };
        self.servlets.remove_context(context_id)?;
        registry.close()?;
        self.failures.retain(|_, failure| failure.context_id != context_id);
        tracing::info!(context = context_id, "Context unregistered");
        Ok(true)
    }

    pub fn context(&self, context_id: i64) -> Option<Arc<PerContextRegistry>> {
        self.contexts.get(&context_id).map(|entry| entry.value().clone())
    }

    /// Register a servlet for its patterns and, when it declares any, its
    /// error pages. Either both take effect or neither does.
    pub fn add_servlet(&self, handler: Arc<Handler>) -> RegistrationResult<()> {
        let info = handler.info();
        if info.patterns.is_empty() && info.error_pages.is_empty() {
            let err = RegistrationError::InvalidPattern {
                id: info.id,
                pattern: String::new(),
                reason: "servlet declares neither patterns nor error pages".to_string(),
            };
            self.fail(info, HandlerKind::Servlet, err.reason());
            return Err(err);
        }
        let _reservation = self.reserve(info, HandlerKind::Servlet)?;

        if !info.patterns.is_empty() {
            self.servlets.add(handler.clone())?;
        }
        if !info.error_pages.is_empty() {
            let added = match self.context(info.context_id) {
                Some(context) => context.add_error_page(handler.clone()),
                None => Err(RegistrationError::ContextUnavailable {
                    id: info.id,
                    context_id: info.context_id,
                }),
            };
            if let Err(err) = added {
                if err.reason() == FailureReason::ContextUnavailable {
                    self.fail(info, HandlerKind::ErrorPage, err.reason());
                }
                if !info.patterns.is_empty() {
                    self.servlets.remove(info.id)?;
                }
                return Err(err);
            }
        }
        self.failures.remove(&(HandlerKind::Servlet, info.id));
        Ok(())
    }

    /// Unregister a servlet everywhere it was registered.
    pub fn remove_servlet(&self, id: i64) -> RegistrationResult<bool> {
        let mut removed = false;
        if !self.is_resource(id) {
            removed |= self.servlets.remove(id)?;
        }
        for context in self.registries() {
            removed |= context.remove_error_page(id)?;
        }
        removed |= self.failures.remove(&(HandlerKind::Servlet, id)).is_some();
        removed |= self.failures.remove(&(HandlerKind::ErrorPage, id)).is_some();
        Ok(removed)
    }

    /// Serve the files below `info.prefix` for the resource's patterns. The
    /// serving servlet is created here and competes with servlets for routes.
    pub fn add_resource(&self, info: ResourceInfo) -> RegistrationResult<()> {
        let handler = Arc::new(Handler::new(
            info.servlet_info(),
            Arc::new(ResourceServlet::new(&info.prefix)),
        ));
        let _reservation = self.reserve(handler.info(), HandlerKind::Resource)?;
        self.servlets.add_resource(handler)
    }

    pub fn remove_resource(&self, id: i64) -> RegistrationResult<bool> {
        if self.is_resource(id) {
            self.servlets.remove(id)
        } else {
            Ok(false)
        }
    }

    /// Registered as a resource, or rejected as one.
    fn is_resource(&self, id: i64) -> bool {
        match self.servlets.kind_of(id) {
            Some(kind) => kind == HandlerKind::Resource,
            None => self.servlets.failure_reason(HandlerKind::Resource, id).is_some(),
        }
    }

    pub fn add_filter(&self, handler: Arc<Handler>) -> RegistrationResult<()> {
        self.add_to_context(HandlerKind::Filter, handler, PerContextRegistry::add_filter)
    }

    pub fn remove_filter(&self, id: i64) -> RegistrationResult<bool> {
        let mut removed = self.failures.remove(&(HandlerKind::Filter, id)).is_some();
        for context in self.registries() {
            removed |= context.remove_filter(id)?;
        }
        Ok(removed)
    }

    /// Register an event listener in its context.
    pub fn add_listener(&self, handler: Arc<Handler>) -> RegistrationResult<()> {
        self.add_to_context(HandlerKind::Listener, handler, PerContextRegistry::add_listener)
    }

    pub fn remove_listener(&self, id: i64) -> RegistrationResult<bool> {
        let mut removed = self.failures.remove(&(HandlerKind::Listener, id)).is_some();
        for context in self.registries() {
            removed |= context.remove_listener(id)?;
        }
        Ok(removed)
    }

    /// Listeners of one event family in a context, preferred first.
    pub fn listeners(&self, context_id: i64, listener_type: ListenerType) -> Vec<Arc<Handler>> {
        self.context(context_id)
            .map(|context| context.listeners(listener_type))
            .unwrap_or_default()
    }

    /// Bind a legacy alias in the default context.
    pub fn add_alias(
        &self,
        alias: &str,
        instance: Arc<dyn Lifecycle>,
        init_params: BTreeMap<String, String>,
    ) -> RegistrationResult<i64> {
        self.aliases.add(alias, instance, init_params)
    }

    pub fn remove_alias(&self, alias: &str) -> RegistrationResult<bool> {
        self.aliases.remove(alias)
    }

    pub fn aliases(&self) -> &AliasRegistry {
        &self.aliases
    }

    pub fn servlets(&self) -> &ServletRegistry {
        &self.servlets
    }

    /// Servlet for a path: whiteboard patterns first, then exact legacy aliases.
    pub fn dispatch(&self, path: &str) -> Option<PathMatch> {
        if let Some(found) = self.servlets.dispatch(path) {
            metrics::record_dispatch("servlet");
            return Some(found);
        }
        if let Some(handler) = self.aliases.get_by_alias(path) {
            metrics::record_dispatch("alias");
            return Some(PathMatch {
                pattern: handler.name(),
                handler,
                context_id: DEFAULT_CONTEXT_ID,
                context_path: "/".to_string(),
                servlet_path: path.to_string(),
                path_info: None,
            });
        }
        metrics::record_dispatch("none");
        None
    }

    /// Context a request belongs to even when no servlet matches it.
    pub fn context_for(&self, path: &str) -> i64 {
        self.servlets
            .snapshot()
            .context_for(path)
            .map_or(DEFAULT_CONTEXT_ID, |context| context.id)
    }

    /// Dispatch plus the filter chain of the owning context.
    pub fn route(&self, path: &str, dispatcher: DispatcherType) -> Option<Route> {
        let target = self.dispatch(path)?;
        let filters = self.filter_chain(path, target.context_id, Some(&target.handler), dispatcher);
        Some(Route { target, filters })
    }

    /// Filters of a context for a path, optionally including those bound to
    /// the target servlet's name.
    pub fn filter_chain(
        &self,
        path: &str,
        context_id: i64,
        target: Option<&Arc<Handler>>,
        dispatcher: DispatcherType,
    ) -> Vec<Arc<Handler>> {
        let servlet_name = target.and_then(|h| h.info().name.clone());
        self.context(context_id)
            .map(|context| context.filter_chain(path, servlet_name.as_deref(), dispatcher))
            .unwrap_or_default()
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<Handler>> {
        self.servlets.by_name(name)
    }

    pub fn by_name_in(&self, context_id: i64, name: &str) -> Option<Arc<Handler>> {
        self.servlets.by_name_in(context_id, name)
    }

    /// Error handler for a request that failed in `context_id`, falling back
    /// to the default context.
    pub fn resolve_error(
        &self,
        context_id: i64,
        exception: Option<&ExceptionChain>,
        status: u16,
    ) -> Option<Arc<Handler>> {
        self.context(context_id)
            .and_then(|context| context.resolve_error(exception, status))
            .or_else(|| {
                if context_id == DEFAULT_CONTEXT_ID {
                    return None;
                }
                self.context(DEFAULT_CONTEXT_ID)
                    .and_then(|context| context.resolve_error(exception, status))
            })
    }

    /// Why a registration of `kind` with this id is not serving, if it is not.
    pub fn failure_reason(&self, kind: HandlerKind, id: i64) -> Option<FailureReason> {
        if let Some(failure) = self.failures.get(&(kind, id)) {
            return Some(failure.reason);
        }
        match kind {
            HandlerKind::Servlet | HandlerKind::Resource => self.servlets.failure_reason(kind, id),
            HandlerKind::Filter | HandlerKind::ErrorPage | HandlerKind::Listener => self
                .registries()
                .iter()
                .find_map(|context| context.failure_reason(kind, id)),
            HandlerKind::Alias => None,
        }
    }

    /// Point-in-time view of every context, alias and failure.
    pub fn runtime(&self) -> RuntimeDto {
        let mut registries = self.registries();
        registries.sort_by(|a, b| a.context().rank().preference(&b.context().rank()));

        let known: Vec<i64> = registries.iter().map(|r| r.context().id).collect();
        let mut contexts = Vec::new();
        let mut failures: Vec<FailureDto> = self.failures.iter().map(|e| e.value().clone()).collect();
        failures.extend(self.servlets.orphaned_failures(&known));
        for registry in registries {
            let info = registry.context();
            let (servlets, resources, servlet_failures) = self.servlets.runtime(info.id);
            let context = registry.runtime();
            failures.extend(servlet_failures);
            failures.extend(context.failures);
            contexts.push(runtime::ContextDto {
                id: info.id,
                name: info.name.clone(),
                path: info.path.clone(),
                ranking: info.ranking,
                servlets,
                resources,
                filters: context.filters,
                error_pages: context.error_pages,
                listeners: context.listeners,
            });
        }
        failures.sort_by_key(|f| (f.context_id, f.id, f.kind));

        RuntimeDto {
            contexts,
            aliases: self.aliases.runtime(),
            failures,
        }
    }

    /// Remove every registration and destroy every live handler exactly once.
    pub fn shutdown(&self) -> RegistrationResult<()> {
        self.servlets.remove_all()?;
        for context in self.registries() {
            context.remove_all()?;
        }
        self.aliases.clear()?;
        self.failures.clear();
        tracing::info!("Whiteboard shut down");
        Ok(())
    }

    fn registries(&self) -> Vec<Arc<PerContextRegistry>> {
        self.contexts.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Claim an id shared by the servlet, resource and error page tables.
    fn reserve(&self, info: &HandlerInfo, kind: HandlerKind) -> RegistrationResult<Reservation<'_>> {
        let mut pending = self.pending.lock();
        let taken = pending.contains(&info.id)
            || self.servlets.contains(info.id)
            || self.registries().iter().any(|context| context.has_error_page(info.id));
        if taken {
            tracing::warn!(id = info.id, kind = kind.as_str(), "Registration id already in use");
            metrics::record_registration(kind, "rejected");
            return Err(RegistrationError::AlreadyUsed {
                id: info.id,
                name: info.display_name(),
            });
        }
        pending.insert(info.id);
        Ok(Reservation {
            pending: &self.pending,
            id: info.id,
        })
    }

    /// Hand a filter or listener to its context, recording a missing context.
    fn add_to_context(
        &self,
        kind: HandlerKind,
        handler: Arc<Handler>,
        add: impl FnOnce(&PerContextRegistry, Arc<Handler>) -> RegistrationResult<()>,
    ) -> RegistrationResult<()> {
        let info = handler.info();
        let added = match self.context(info.context_id) {
            Some(context) => add(context.as_ref(), handler.clone()),
            None => {
                metrics::record_registration(kind, "rejected");
                Err(RegistrationError::ContextUnavailable {
                    id: info.id,
                    context_id: info.context_id,
                })
            }
        };
        match added {
            Ok(()) => {
                self.failures.remove(&(kind, info.id));
                Ok(())
            }
            Err(err) => {
                if err.reason() == FailureReason::ContextUnavailable {
                    tracing::warn!(id = info.id, kind = kind.as_str(), context = info.context_id, "Context unavailable");
                    self.fail(info, kind, err.reason());
                }
                Err(err)
            }
        }
    }

    fn fail(&self, info: &HandlerInfo, kind: HandlerKind, reason: FailureReason) {
        self.failures
            .insert((kind, info.id), FailureDto::new(info, kind, reason));
    }
}

impl Default for Whiteboard {
    fn default() -> Self {
        Self::new(ShadowPolicy::default())
    }
}

impl std::fmt::Debug for Whiteboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Whiteboard")
            .field("policy", &self.policy)
            .field("contexts", &self.contexts.len())
            .field("servlets", &self.servlets)
            .field("aliases", &self.aliases)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;

    struct Noop;

    impl Lifecycle for Noop {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn handler(info: HandlerInfo) -> Arc<Handler> {
        Arc::new(Handler::new(info, Arc::new(Noop)))
    }

    #[test]
    fn test_default_context_exists() {
        let whiteboard = Whiteboard::default();
        assert!(whiteboard.context(DEFAULT_CONTEXT_ID).is_some());
        assert!(!whiteboard.remove_context(DEFAULT_CONTEXT_ID).unwrap());
        assert_eq!(whiteboard.runtime().contexts.len(), 1);
    }

    #[test]
    fn test_invalid_context_path() {
        let whiteboard = Whiteboard::default();
        let err = whiteboard
            .add_context(ContextInfo::new(1, "bad", "/bad/"))
            .unwrap_err();
        assert_eq!(err.reason(), FailureReason::ValidationFailed);
    }

    #[test]
    fn test_route_includes_filters() {
        let whiteboard = Whiteboard::default();
        whiteboard.add_context(ContextInfo::new(1, "app", "/app")).unwrap();
        whiteboard
            .add_servlet(handler(HandlerInfo::new(10).with_context(1).with_pattern("/*")))
            .unwrap();
        whiteboard
            .add_filter(handler(HandlerInfo::new(11).with_context(1).with_pattern("/*")))
            .unwrap();

        let route = whiteboard.route("/app/x", DispatcherType::Request).unwrap();
        assert_eq!(route.target.handler.id(), 10);
        assert_eq!(route.filters.iter().map(|f| f.id()).collect::<Vec<_>>(), vec![11]);
    }

    #[test]
    fn test_error_page_servlet_rolls_back_on_context_failure() {
        let whiteboard = Whiteboard::default();
        let err = whiteboard
            .add_servlet(handler(HandlerInfo::new(3).with_context(9).with_error_page("404")))
            .unwrap_err();
        assert_eq!(err.reason(), FailureReason::ContextUnavailable);
        assert_eq!(
            whiteboard.failure_reason(HandlerKind::ErrorPage, 3),
            Some(FailureReason::ContextUnavailable)
        );
        assert!(whiteboard.remove_servlet(3).unwrap());
        assert_eq!(whiteboard.failure_reason(HandlerKind::ErrorPage, 3), None);
    }

    #[test]
    fn test_alias_dispatch_after_patterns() {
        let whiteboard = Whiteboard::default();
        whiteboard
            .add_alias("/legacy", Arc::new(Noop), BTreeMap::new())
            .unwrap();
        let found = whiteboard.dispatch("/legacy").unwrap();
        assert_eq!(found.handler.id(), -1);
        assert_eq!(found.context_id, DEFAULT_CONTEXT_ID);
        assert!(whiteboard.dispatch("/legacy/x").is_none());
    }
}

//! Global servlet registry.
//!
//! # Responsibilities
//! - Own the cross-context mapping from full pattern to servlet
//! - Resolve pattern conflicts (context preference, then handler preference)
//! - Publish an immutable `RoutingSnapshot` after every change
//! - Answer dispatch and by-name lookups from the current snapshot
//!
//! # Write Sequence
//! ```text
//! lock → validate → resolver.add/remove on a copy → unlock → init (toInit)
//!      → lock → re-plan → swap tables and snapshot → unlock → destroy (toDestroy)
//! ```
//!
//! # Design Decisions
//! - A failed `init` on add discards the copy; nothing is published
//! - A failed `init` on promotion evicts that candidate and promotes the next
//! - Deactivations apply to the mapping of the handler's own context
//! - Resources are servlets created by the registry; they share the id space

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::error::{FailureReason, RegistrationError, RegistrationResult};
use crate::handler::{ContextInfo, Handler, HandlerInfo, RankedHandler, ResourceServlet};
use crate::observability::metrics;
use crate::registry::guard::WriterLock;
use crate::registry::ranking::{RankingMultimap, ShadowPolicy, Update};
use crate::registry::runtime::{FailureDto, HandlerKind, ResourceDto, ServletDto};
use crate::registry::{compile_patterns, transact, Ranked};
use crate::routing::{HandlerMapping, MappingEntry, Rule};

/// Result of a successful dispatch.
#[derive(Debug, Clone)]
pub struct PathMatch {
    pub handler: Arc<Handler>,
    pub context_id: i64,
    /// Path of the owning context (`/` for the root).
    pub context_path: String,
    /// Full pattern that matched.
    pub pattern: String,
    /// Matched part of the path below the context.
    pub servlet_path: String,
    /// Remainder after a prefix match.
    pub path_info: Option<String>,
}

/// Routes of one context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextRoutes {
    pub context: ContextInfo,
    pub mapping: HandlerMapping,
}

/// Immutable, fully resolved routing table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingSnapshot {
    /// Contexts in preference order.
    contexts: Vec<ContextRoutes>,
    /// Every registered servlet, serving or not.
    registered: Vec<RankedHandler>,
    /// Ids in `registered` that serve resources.
    resources: BTreeSet<i64>,
    failures: Vec<FailureDto>,
}

impl RoutingSnapshot {
    /// Best servlet for a path: the first context (in preference order) that
    /// contains the path and has a matching rule wins.
    pub fn resolve(&self, path: &str) -> Option<PathMatch> {
        self.contexts.iter().find_map(|routes| {
            routes.context.is_matching(path)?;
            let entry = routes.mapping.best_match(path)?;
            let (servlet_path, path_info) = entry.rule.split(path);
            let servlet_path = servlet_path
                .strip_prefix(routes.context.prefix())
                .unwrap_or(servlet_path);
            Some(PathMatch {
                handler: entry.handler.handler().clone(),
                context_id: routes.context.id,
                context_path: routes.context.path.clone(),
                pattern: entry.rule.pattern().to_string(),
                servlet_path: servlet_path.to_string(),
                path_info: path_info.map(str::to_string),
            })
        })
    }

    /// Preferred serving servlet with this name, across contexts.
    pub fn by_name(&self, name: &str) -> Option<&RankedHandler> {
        self.contexts.iter().find_map(|routes| routes.mapping.by_name(name))
    }

    /// Serving servlet with this name in one context.
    pub fn by_name_in(&self, context_id: i64, name: &str) -> Option<&RankedHandler> {
        self.mapping(context_id).and_then(|mapping| mapping.by_name(name))
    }

    /// Most preferred context containing the path, matched or not.
    pub fn context_for(&self, path: &str) -> Option<&ContextInfo> {
        self.contexts
            .iter()
            .map(|routes| &routes.context)
            .find(|context| context.is_matching(path).is_some())
    }

    pub fn mapping(&self, context_id: i64) -> Option<&HandlerMapping> {
        self.contexts
            .iter()
            .find(|routes| routes.context.id == context_id)
            .map(|routes| &routes.mapping)
    }

    pub fn contexts(&self) -> &[ContextRoutes] {
        &self.contexts
    }

    pub fn registered(&self) -> &[RankedHandler] {
        &self.registered
    }

    /// Number of published routes across contexts.
    pub fn route_count(&self) -> usize {
        self.contexts.iter().map(|routes| routes.mapping.len()).sum()
    }

    fn is_serving(&self, handler: &RankedHandler) -> bool {
        self.mapping(handler.context().id)
            .is_some_and(|mapping| mapping.contains(handler.id()))
    }
}

#[derive(Clone)]
struct ServletEntry {
    handler: RankedHandler,
    rules: Vec<Rule>,
    kind: HandlerKind,
}

#[derive(Clone)]
struct ServletTables {
    resolver: RankingMultimap<Rule, RankedHandler>,
    servlets: BTreeMap<i64, ServletEntry>,
    contexts: BTreeMap<i64, ContextInfo>,
    failures: BTreeMap<i64, FailureDto>,
}

impl ServletTables {
    fn fail(&mut self, info: &HandlerInfo, kind: HandlerKind, reason: FailureReason) {
        self.failures
            .insert(info.id, FailureDto::new(info, kind, reason));
    }
}

impl Ranked for ServletTables {
    type Key = Rule;

    fn resolver(&mut self) -> &mut RankingMultimap<Rule, RankedHandler> {
        &mut self.resolver
    }

    fn evict(&mut self, handler: &RankedHandler, err: &RegistrationError) -> Vec<Rule> {
        let id = handler.id();
        match self.servlets.get(&id) {
            Some(entry) if Arc::ptr_eq(entry.handler.handler(), handler.handler()) => {}
            _ => return Vec::new(),
        }
        let Some(entry) = self.servlets.remove(&id) else {
            return Vec::new();
        };
        self.fail(handler.handler().info(), entry.kind, err.reason());
        entry.rules
    }
}

/// Path → servlet registry across all contexts.
pub struct ServletRegistry {
    writer: WriterLock<ServletTables>,
    snapshot: ArcSwap<RoutingSnapshot>,
}

impl ServletRegistry {
    pub fn new(policy: ShadowPolicy) -> Self {
        Self {
            writer: WriterLock::new(ServletTables {
                resolver: RankingMultimap::new(policy),
                servlets: BTreeMap::new(),
                contexts: BTreeMap::new(),
                failures: BTreeMap::new(),
            }),
            snapshot: ArcSwap::from_pointee(RoutingSnapshot::default()),
        }
    }

    /// Make a context available for servlet registrations.
    pub fn add_context(&self, context: ContextInfo) -> RegistrationResult<()> {
        let mut tables = self.writer.write()?;
        if tables.contexts.contains_key(&context.id) {
            return Err(RegistrationError::AlreadyUsed {
                id: context.id,
                name: context.name.clone(),
            });
        }
        tables.contexts.insert(context.id, context);
        self.publish(&tables, &Update::default());
        Ok(())
    }

    /// Remove a context and every servlet registered in it. Returns the ids
    /// of the removed servlets.
    pub fn remove_context(&self, context_id: i64) -> RegistrationResult<Vec<i64>> {
        let doomed = transact(
            &self.writer,
            None,
            |tables| {
                if tables.contexts.remove(&context_id).is_none() {
                    return Ok((Update::default(), Vec::new()));
                }
                let doomed: Vec<i64> = tables
                    .servlets
                    .values()
                    .filter(|entry| entry.handler.context().id == context_id)
                    .map(|entry| entry.handler.id())
                    .collect();
                let mut update = Update::default();
                for id in &doomed {
                    if let Some(entry) = tables.servlets.remove(id) {
                        update = update.then(tables.resolver.remove(&entry.rules, &entry.handler));
                    }
                }
                tables.failures.retain(|_, failure| failure.context_id != context_id);
                Ok((update, doomed))
            },
            |tables, update| self.publish(tables, update),
        )?;
        if !doomed.is_empty() {
            tracing::info!(context = context_id, servlets = doomed.len(), "Context removed from servlet registry");
        }
        Ok(doomed)
    }

    /// Register a servlet for its declared patterns.
    pub fn add(&self, handler: Arc<Handler>) -> RegistrationResult<()> {
        self.insert(handler, HandlerKind::Servlet)
    }

    /// Register the servlet serving a resource registration.
    pub fn add_resource(&self, handler: Arc<Handler>) -> RegistrationResult<()> {
        self.insert(handler, HandlerKind::Resource)
    }

    fn insert(&self, handler: Arc<Handler>, kind: HandlerKind) -> RegistrationResult<()> {
        let info = handler.info();
        let outcome = transact(
            &self.writer,
            Some(info.id),
            |tables| {
                if tables.servlets.contains_key(&info.id) {
                    return Err(RegistrationError::AlreadyUsed {
                        id: info.id,
                        name: info.display_name(),
                    });
                }
                let context = tables.contexts.get(&info.context_id).ok_or(
                    RegistrationError::ContextUnavailable {
                        id: info.id,
                        context_id: info.context_id,
                    },
                )?;
                if info.patterns.is_empty() {
                    return Err(RegistrationError::InvalidPattern {
                        id: info.id,
                        pattern: String::new(),
                        reason: "servlet declares no patterns".to_string(),
                    });
                }
                let rules = compile_patterns(context, info)?;
                let ranked = RankedHandler::new(context.rank(), handler.clone());
                let update = tables.resolver.add(&rules, ranked.clone());
                tables.failures.remove(&info.id);
                tables.servlets.insert(
                    info.id,
                    ServletEntry {
                        handler: ranked.clone(),
                        rules,
                        kind,
                    },
                );
                Ok((update, ranked))
            },
            |tables, update| self.publish(tables, update),
        );

        let ranked = match outcome {
            Ok(ranked) => ranked,
            Err(err) => {
                tracing::warn!(
                    servlet = info.id,
                    name = %info.display_name(),
                    kind = kind.as_str(),
                    reason = %err.reason(),
                    error = %err,
                    "Servlet registration rejected"
                );
                if !matches!(err, RegistrationError::AlreadyUsed { .. }) {
                    self.record_failure(info, kind, err.reason());
                }
                metrics::record_registration(kind, "rejected");
                return Err(err);
            }
        };

        let active = self.snapshot.load().is_serving(&ranked);
        if active {
            tracing::info!(servlet = info.id, name = %info.display_name(), context = info.context_id, "Servlet registered");
        } else {
            tracing::info!(servlet = info.id, name = %info.display_name(), context = info.context_id, "Servlet registered but shadowed");
        }
        metrics::record_registration(kind, if active { "active" } else { "shadowed" });
        Ok(())
    }

    /// Unregister a servlet. Returns false when it was not registered.
    pub fn remove(&self, id: i64) -> RegistrationResult<bool> {
        let removed = transact(
            &self.writer,
            None,
            |tables| {
                tables.failures.remove(&id);
                match tables.servlets.remove(&id) {
                    Some(entry) => Ok((tables.resolver.remove(&entry.rules, &entry.handler), Some(entry.kind))),
                    None => Ok((Update::default(), None)),
                }
            },
            |tables, update| self.publish(tables, update),
        )?;

        let Some(kind) = removed else {
            return Ok(false);
        };
        tracing::info!(servlet = id, kind = kind.as_str(), "Servlet unregistered");
        metrics::record_registration(kind, "removed");
        Ok(true)
    }

    /// Drop every servlet, keeping the contexts.
    pub fn remove_all(&self) -> RegistrationResult<()> {
        transact(
            &self.writer,
            None,
            |tables| {
                tables.servlets.clear();
                tables.failures.clear();
                Ok((tables.resolver.clear(), ()))
            },
            |tables, update| self.publish(tables, update),
        )
    }

    /// True when a servlet or resource with this id is registered.
    pub fn contains(&self, id: i64) -> bool {
        self.snapshot.load().registered.iter().any(|h| h.id() == id)
    }

    /// Whether the registered id is a servlet or a resource.
    pub fn kind_of(&self, id: i64) -> Option<HandlerKind> {
        let snapshot = self.snapshot.load();
        if snapshot.resources.contains(&id) {
            Some(HandlerKind::Resource)
        } else if snapshot.registered.iter().any(|h| h.id() == id) {
            Some(HandlerKind::Servlet)
        } else {
            None
        }
    }

    /// Lock-free lookup against the current snapshot.
    pub fn dispatch(&self, path: &str) -> Option<PathMatch> {
        self.snapshot.load().resolve(path)
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<Handler>> {
        self.snapshot
            .load()
            .by_name(name)
            .map(|h| h.handler().clone())
    }

    pub fn by_name_in(&self, context_id: i64, name: &str) -> Option<Arc<Handler>> {
        self.snapshot
            .load()
            .by_name_in(context_id, name)
            .map(|h| h.handler().clone())
    }

    /// Current snapshot; holds its content for as long as the caller keeps it.
    pub fn snapshot(&self) -> Arc<RoutingSnapshot> {
        self.snapshot.load_full()
    }

    /// Why a registered servlet (or resource) is not serving, if it is not.
    pub fn failure_reason(&self, kind: HandlerKind, id: i64) -> Option<FailureReason> {
        let snapshot = self.snapshot.load();
        if let Some(failure) = snapshot.failures.iter().find(|f| f.id == id && f.kind == kind) {
            return Some(failure.reason);
        }
        let is_resource = snapshot.resources.contains(&id);
        if is_resource != (kind == HandlerKind::Resource) {
            return None;
        }
        snapshot
            .registered
            .iter()
            .find(|h| h.id() == id)
            .filter(|h| !snapshot.is_serving(h))
            .map(|_| FailureReason::Shadowed)
    }

    /// Failures recorded against contexts other than `known`.
    pub fn orphaned_failures(&self, known: &[i64]) -> Vec<FailureDto> {
        self.snapshot
            .load()
            .failures
            .iter()
            .filter(|f| !known.contains(&f.context_id))
            .cloned()
            .collect()
    }

    /// Servlets and resources serving in a context, and failures recorded for it.
    pub fn runtime(&self, context_id: i64) -> (Vec<ServletDto>, Vec<ResourceDto>, Vec<FailureDto>) {
        let snapshot = self.snapshot.load();
        let mut servlets = Vec::new();
        let mut resources = Vec::new();
        let mut failures: Vec<FailureDto> = snapshot
            .failures
            .iter()
            .filter(|f| f.context_id == context_id)
            .cloned()
            .collect();

        let Some(routes) = snapshot.contexts.iter().find(|r| r.context.id == context_id) else {
            return (servlets, resources, failures);
        };

        for handler in snapshot.registered.iter().filter(|h| h.context().id == context_id) {
            let info = handler.handler().info();
            let is_resource = snapshot.resources.contains(&info.id);
            let active = routes.mapping.patterns_of(info.id);
            let (patterns, shadowed_patterns): (Vec<String>, Vec<String>) = info
                .patterns
                .iter()
                .cloned()
                .partition(|p| active.contains(&routes.context.full_pattern(p).as_str()));

            if patterns.is_empty() {
                let kind = if is_resource { HandlerKind::Resource } else { HandlerKind::Servlet };
                failures.push(FailureDto::new(info, kind, FailureReason::Shadowed));
            } else if is_resource {
                resources.push(ResourceDto {
                    id: info.id,
                    patterns,
                    prefix: handler
                        .handler()
                        .instance_as::<ResourceServlet>()
                        .map(|r| r.prefix().display().to_string())
                        .unwrap_or_default(),
                });
            } else {
                servlets.push(ServletDto {
                    id: info.id,
                    name: info.display_name(),
                    ranking: info.ranking,
                    patterns,
                    shadowed_patterns,
                });
            }
        }
        (servlets, resources, failures)
    }

    /// Record a rejection unless the id has been registered since.
    fn record_failure(&self, info: &HandlerInfo, kind: HandlerKind, reason: FailureReason) {
        let Ok(mut tables) = self.writer.write() else {
            return;
        };
        if tables.servlets.contains_key(&info.id) {
            return;
        }
        tables.fail(info, kind, reason);
        self.publish(&tables, &Update::default());
    }

    /// Build and store the next snapshot. Runs under the writer lock.
    fn publish(&self, tables: &ServletTables, update: &Update<Rule, RankedHandler>) {
        let current = self.snapshot.load();

        let mut contexts: Vec<&ContextInfo> = tables.contexts.values().collect();
        contexts.sort_by(|a, b| a.rank().preference(&b.rank()));

        let routes = contexts
            .into_iter()
            .map(|context| {
                let owned = |pairs: &BTreeMap<Rule, RankedHandler>| -> Vec<MappingEntry> {
                    pairs
                        .iter()
                        .filter(|(_, h)| h.context().id == context.id)
                        .map(|(rule, h)| MappingEntry::new(rule.clone(), h.clone()))
                        .collect()
                };
                let activated = owned(update.activated());
                let deactivated = owned(update.deactivated());
                let previous = current.mapping(context.id).cloned().unwrap_or_default();
                let mapping = if activated.is_empty() && deactivated.is_empty() {
                    previous
                } else {
                    previous.update(&activated, &deactivated)
                };
                ContextRoutes {
                    context: context.clone(),
                    mapping,
                }
            })
            .collect();

        let mut registered: Vec<RankedHandler> =
            tables.servlets.values().map(|entry| entry.handler.clone()).collect();
        registered.sort();
        let resources = tables
            .servlets
            .values()
            .filter(|entry| entry.kind == HandlerKind::Resource)
            .map(|entry| entry.handler.id())
            .collect();

        let next = RoutingSnapshot {
            contexts: routes,
            registered,
            resources,
            failures: tables.failures.values().cloned().collect(),
        };
        tracing::debug!(
            routes = next.route_count(),
            servlets = next.registered.len(),
            "Routing snapshot published"
        );
        metrics::set_active_handlers(HandlerKind::Servlet, tables.resolver.active_values().len());
        self.snapshot.store(Arc::new(next));
        metrics::record_snapshot_swap("servlets");
    }
}

impl std::fmt::Debug for ServletRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot.load();
        f.debug_struct("ServletRegistry")
            .field("contexts", &snapshot.contexts.len())
            .field("routes", &snapshot.route_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::handler::Lifecycle;
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        inits: AtomicUsize,
        destroys: AtomicUsize,
        fail: bool,
    }

    impl Lifecycle for Recorder {
        fn init(&self, _info: &HandlerInfo) -> Result<(), BoxError> {
            if self.fail {
                return Err("init refused".into());
            }
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn destroy(&self) {
            self.destroys.fetch_add(1, Ordering::SeqCst);
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn registry() -> ServletRegistry {
        let registry = ServletRegistry::new(ShadowPolicy::Retain);
        registry.add_context(ContextInfo::default_context()).unwrap();
        registry.add_context(ContextInfo::new(1, "app", "/app")).unwrap();
        registry
    }

    fn servlet(info: HandlerInfo) -> (Arc<Handler>, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        (Arc::new(Handler::new(info, recorder.clone())), recorder)
    }

    fn failing(info: HandlerInfo) -> Arc<Handler> {
        Arc::new(Handler::new(
            info,
            Arc::new(Recorder {
                fail: true,
                ..Default::default()
            }),
        ))
    }

    #[test]
    fn test_dispatch_splits_paths() {
        let registry = registry();
        let (s, _) = servlet(HandlerInfo::new(1).with_context(1).with_pattern("/api/*"));
        registry.add(s).unwrap();

        let matched = registry.dispatch("/app/api/users/7").unwrap();
        assert_eq!(matched.handler.id(), 1);
        assert_eq!(matched.context_id, 1);
        assert_eq!(matched.pattern, "/app/api/*");
        assert_eq!(matched.servlet_path, "/api");
        assert_eq!(matched.path_info.as_deref(), Some("/users/7"));
        assert!(registry.dispatch("/api/users").is_none());
    }

    #[test]
    fn test_dispatch_falls_through_to_default_context() {
        let registry = registry();
        let (in_app, _) = servlet(HandlerInfo::new(1).with_context(1).with_pattern("/x"));
        let (in_root, _) = servlet(HandlerInfo::new(2).with_pattern("/*"));
        registry.add(in_app).unwrap();
        registry.add(in_root).unwrap();

        assert_eq!(registry.dispatch("/app/x").map(|m| m.handler.id()), Some(1));
        assert_eq!(registry.dispatch("/app/y").map(|m| m.handler.id()), Some(2));
        assert_eq!(registry.dispatch("/other").map(|m| m.context_id), Some(0));
    }

    #[test]
    fn test_shadowed_servlet_is_promoted() {
        let registry = registry();
        let (s1, p1) = servlet(HandlerInfo::new(1).with_pattern("/svc").with_ranking(5));
        let (s2, p2) = servlet(HandlerInfo::new(2).with_pattern("/svc").with_ranking(10));
        registry.add(s1).unwrap();
        registry.add(s2).unwrap();

        assert_eq!(registry.dispatch("/svc").map(|m| m.handler.id()), Some(2));
        assert_eq!(registry.failure_reason(HandlerKind::Servlet, 1), Some(FailureReason::Shadowed));
        assert_eq!(registry.failure_reason(HandlerKind::Servlet, 2), None);
        assert_eq!(p1.destroys.load(Ordering::SeqCst), 0);

        assert!(registry.remove(2).unwrap());
        assert_eq!(registry.dispatch("/svc").map(|m| m.handler.id()), Some(1));
        assert_eq!(registry.failure_reason(HandlerKind::Servlet, 1), None);
        assert_eq!(p1.inits.load(Ordering::SeqCst), 1);
        assert_eq!(p2.destroys.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rejections_leave_snapshot_untouched() {
        let registry = registry();
        let before = registry.snapshot();

        let (orphan, _) = servlet(HandlerInfo::new(1).with_context(42).with_pattern("/x"));
        let err = registry.add(orphan).unwrap_err();
        assert_eq!(err.reason(), FailureReason::ContextUnavailable);

        let err = registry.add(failing(HandlerInfo::new(2).with_pattern("/x"))).unwrap_err();
        assert_eq!(err.reason(), FailureReason::ExceptionOnInit);

        let (bad, _) = servlet(HandlerInfo::new(3).with_pattern("x/*"));
        assert_eq!(registry.add(bad).unwrap_err().reason(), FailureReason::ValidationFailed);

        let after = registry.snapshot();
        assert_eq!(before.contexts(), after.contexts());
        assert_eq!(registry.failure_reason(HandlerKind::Servlet, 1), Some(FailureReason::ContextUnavailable));
        assert_eq!(registry.failure_reason(HandlerKind::Servlet, 2), Some(FailureReason::ExceptionOnInit));

        // Removing a failed registration clears its record
        assert!(!registry.remove(2).unwrap());
        assert_eq!(registry.failure_reason(HandlerKind::Servlet, 2), None);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let registry = registry();
        let (first, _) = servlet(HandlerInfo::new(1).with_pattern("/a"));
        let (again, recorder) = servlet(HandlerInfo::new(1).with_pattern("/b"));
        registry.add(first).unwrap();
        assert_eq!(registry.add(again).unwrap_err().reason(), FailureReason::AlreadyUsed);
        assert_eq!(recorder.inits.load(Ordering::SeqCst), 0);
        assert!(registry.dispatch("/b").is_none());
    }

    #[test]
    fn test_failed_promotion_moves_to_next_candidate() {
        let registry = registry();
        let (bottom, _) = servlet(HandlerInfo::new(1).with_pattern("/svc"));
        let (top, _) = servlet(HandlerInfo::new(3).with_pattern("/svc").with_ranking(10));
        registry.add(bottom).unwrap();
        registry.add(top).unwrap();
        registry
            .add(failing(HandlerInfo::new(2).with_pattern("/svc").with_ranking(5)))
            .unwrap();

        registry.remove(3).unwrap();
        assert_eq!(registry.dispatch("/svc").map(|m| m.handler.id()), Some(1));
        assert_eq!(registry.failure_reason(HandlerKind::Servlet, 2), Some(FailureReason::ExceptionOnInit));
    }

    #[test]
    fn test_by_name_prefers_context_order() {
        let registry = registry();
        let (root, _) = servlet(HandlerInfo::new(1).with_name("svc").with_pattern("/a"));
        let (app, _) = servlet(HandlerInfo::new(2).with_name("svc").with_context(1).with_pattern("/a"));
        registry.add(root).unwrap();
        registry.add(app).unwrap();

        assert_eq!(registry.by_name("svc").map(|h| h.id()), Some(2));
        assert_eq!(registry.by_name_in(0, "svc").map(|h| h.id()), Some(1));
        assert!(registry.by_name("missing").is_none());
    }

    #[test]
    fn test_remove_context_evicts_its_servlets() {
        let registry = registry();
        let (s, recorder) = servlet(HandlerInfo::new(1).with_context(1).with_pattern("/*"));
        registry.add(s).unwrap();
        assert_eq!(registry.remove_context(1).unwrap(), vec![1]);
        assert!(registry.dispatch("/app/x").is_none());
        assert_eq!(recorder.destroys.load(Ordering::SeqCst), 1);
        assert!(registry.remove_context(1).unwrap().is_empty());
    }

    #[test]
    fn test_runtime_lists_active_and_shadowed_patterns() {
        let registry = registry();
        let (s1, _) = servlet(HandlerInfo::new(1).with_context(1).with_pattern("/a").with_pattern("/b"));
        let (s2, _) = servlet(
            HandlerInfo::new(2)
                .with_context(1)
                .with_pattern("/a")
                .with_ranking(1),
        );
        registry.add(s1).unwrap();
        registry.add(s2).unwrap();

        let (servlets, _resources, failures) = registry.runtime(1);
        assert!(failures.is_empty());
        let s1 = servlets.iter().find(|s| s.id == 1).unwrap();
        assert_eq!(s1.patterns, vec!["/b"]);
        assert_eq!(s1.shadowed_patterns, vec!["/a"]);
    }
}

//! Legacy alias registry.
//!
//! # Responsibilities
//! - Bind exact aliases to handler instances (non-whiteboard registrations)
//! - Reject a second binding of the same alias or the same instance
//! - Serve O(1) alias lookups straight from the concurrent map
//!
//! # Design Decisions
//! - Alias and instance checks run under the writer lock before `init` and
//!   again before binding, so two racing registrations cannot both bind
//! - `init` and `destroy` run with the lock released
//! - Ids are negative and decreasing; the negative-id tie-break then makes
//!   earlier registrations win
//! - The handler list is a copy-on-write array for cheap iteration

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;

use crate::error::{RegistrationError, RegistrationResult};
use crate::handler::{Handler, HandlerInfo, Lifecycle, DEFAULT_CONTEXT_ID};
use crate::observability::metrics;
use crate::registry::guard::WriterLock;
use crate::registry::runtime::{AliasDto, HandlerKind};

/// `/`, or a path starting with `/` and not ending with `/`.
pub fn is_valid_alias(alias: &str) -> bool {
    alias == "/" || (alias.starts_with('/') && !alias.ends_with('/'))
}

fn instance_key(instance: &Arc<dyn Lifecycle>) -> usize {
    Arc::as_ptr(instance) as *const () as usize
}

/// Exact alias → handler table.
pub struct AliasRegistry {
    by_alias: DashMap<String, Arc<Handler>>,
    by_instance: DashMap<usize, String>,
    writer: WriterLock<i64>,
    handlers: ArcSwap<Vec<Arc<Handler>>>,
}

impl AliasRegistry {
    pub fn new() -> Self {
        Self {
            by_alias: DashMap::new(),
            by_instance: DashMap::new(),
            writer: WriterLock::new(-1),
            handlers: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Bind `alias` to `instance`, initializing it. Returns the assigned id.
    pub fn add(
        &self,
        alias: &str,
        instance: Arc<dyn Lifecycle>,
        init_params: BTreeMap<String, String>,
    ) -> RegistrationResult<i64> {
        if !is_valid_alias(alias) {
            metrics::record_registration(HandlerKind::Alias, "rejected");
            return Err(RegistrationError::InvalidAlias(alias.to_string()));
        }

        let key = instance_key(&instance);
        let id = {
            let mut next_id = self.writer.write()?;
            self.check_free(alias, key)?;
            let id = *next_id;
            *next_id -= 1;
            id
        };

        let mut info = HandlerInfo::new(id)
            .with_context(DEFAULT_CONTEXT_ID)
            .with_name(alias)
            .with_pattern(alias);
        info.init_params = init_params;
        let handler = Arc::new(Handler::new(info, instance));
        if let Err(err) = handler.init() {
            tracing::warn!(alias, error = %err, "Alias registration rejected");
            metrics::record_registration(HandlerKind::Alias, "rejected");
            return Err(err);
        }

        let bound = self.writer.write().and_then(|_guard| {
            self.check_free(alias, key)?;
            self.by_alias.insert(alias.to_string(), handler.clone());
            self.by_instance.insert(key, alias.to_string());
            self.publish();
            Ok(())
        });
        if let Err(err) = bound {
            // Lost the alias or the instance while initializing
            handler.destroy();
            return Err(err);
        }

        tracing::info!(alias, id, "Alias registered");
        metrics::record_registration(HandlerKind::Alias, "active");
        Ok(id)
    }

    fn check_free(&self, alias: &str, key: usize) -> RegistrationResult<()> {
        if self.by_alias.contains_key(alias) {
            metrics::record_registration(HandlerKind::Alias, "rejected");
            return Err(RegistrationError::AliasInUse(alias.to_string()));
        }
        if let Some(bound) = self.by_instance.get(&key) {
            metrics::record_registration(HandlerKind::Alias, "rejected");
            return Err(RegistrationError::AlreadyUsed {
                id: self
                    .by_alias
                    .get(bound.value())
                    .map(|h| h.id())
                    .unwrap_or_default(),
                name: bound.value().clone(),
            });
        }
        Ok(())
    }

    /// Unbind an alias and destroy its handler. Returns false when unbound.
    pub fn remove(&self, alias: &str) -> RegistrationResult<bool> {
        let handler = {
            let _guard = self.writer.write()?;
            let Some((_, handler)) = self.by_alias.remove(alias) else {
                return Ok(false);
            };
            self.by_instance.remove(&instance_key(handler.instance()));
            self.publish();
            handler
        };
        handler.destroy();

        tracing::info!(alias, "Alias unregistered");
        metrics::record_registration(HandlerKind::Alias, "removed");
        Ok(true)
    }

    /// Unbind whatever alias `instance` is registered under.
    pub fn remove_instance(&self, instance: &Arc<dyn Lifecycle>) -> RegistrationResult<bool> {
        let alias = self
            .by_instance
            .get(&instance_key(instance))
            .map(|entry| entry.value().clone());
        match alias {
            Some(alias) => self.remove(&alias),
            None => Ok(false),
        }
    }

    pub fn get_by_alias(&self, alias: &str) -> Option<Arc<Handler>> {
        self.by_alias.get(alias).map(|entry| entry.value().clone())
    }

    /// Registered handlers, ordered by alias.
    pub fn handlers(&self) -> Arc<Vec<Arc<Handler>>> {
        self.handlers.load_full()
    }

    /// Unbind everything, destroying each handler once.
    pub fn clear(&self) -> RegistrationResult<()> {
        let handlers = {
            let _guard = self.writer.write()?;
            self.by_alias.clear();
            self.by_instance.clear();
            self.handlers.swap(Arc::new(Vec::new()))
        };
        for handler in handlers.iter() {
            handler.destroy();
        }
        Ok(())
    }

    pub fn runtime(&self) -> Vec<AliasDto> {
        self.handlers
            .load()
            .iter()
            .map(|h| AliasDto {
                id: h.id(),
                alias: h.name(),
                name: h.name(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_alias.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_alias.is_empty()
    }

    fn publish(&self) {
        let mut handlers: Vec<Arc<Handler>> =
            self.by_alias.iter().map(|entry| entry.value().clone()).collect();
        handlers.sort_by_key(|h| h.name());
        metrics::set_active_handlers(HandlerKind::Alias, handlers.len());
        self.handlers.store(Arc::new(handlers));
    }
}

impl Default for AliasRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AliasRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AliasRegistry")
            .field("aliases", &self.by_alias.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        destroys: AtomicUsize,
    }

    impl Lifecycle for Recorder {
        fn destroy(&self) {
            self.destroys.fetch_add(1, Ordering::SeqCst);
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_alias_validation() {
        assert!(is_valid_alias("/"));
        assert!(is_valid_alias("/files"));
        assert!(!is_valid_alias("/files/"));
        assert!(!is_valid_alias("files"));

        let registry = AliasRegistry::new();
        let err = registry
            .add("files/", Arc::new(Recorder::default()), BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidAlias(_)));
    }

    #[test]
    fn test_ids_are_negative_and_decreasing() {
        let registry = AliasRegistry::new();
        let a = registry.add("/a", Arc::new(Recorder::default()), BTreeMap::new()).unwrap();
        let b = registry.add("/b", Arc::new(Recorder::default()), BTreeMap::new()).unwrap();
        assert_eq!((a, b), (-1, -2));
        assert_eq!(registry.get_by_alias("/b").map(|h| h.id()), Some(-2));
    }

    #[test]
    fn test_alias_and_instance_are_exclusive() {
        let registry = AliasRegistry::new();
        let instance: Arc<dyn Lifecycle> = Arc::new(Recorder::default());
        registry.add("/a", instance.clone(), BTreeMap::new()).unwrap();

        let err = registry
            .add("/a", Arc::new(Recorder::default()), BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, RegistrationError::AliasInUse(_)));

        let err = registry.add("/b", instance.clone(), BTreeMap::new()).unwrap_err();
        assert!(matches!(err, RegistrationError::AlreadyUsed { id: -1, .. }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_destroys_and_frees_both_keys() {
        let registry = AliasRegistry::new();
        let recorder = Arc::new(Recorder::default());
        let instance: Arc<dyn Lifecycle> = recorder.clone();
        registry.add("/a", instance.clone(), BTreeMap::new()).unwrap();

        assert!(registry.remove_instance(&instance).unwrap());
        assert!(!registry.remove("/a").unwrap());
        assert_eq!(recorder.destroys.load(Ordering::SeqCst), 1);
        assert!(registry.handlers().is_empty());

        // Both the alias and the instance can be bound again
        registry.add("/a", instance, BTreeMap::new()).unwrap();
    }

    /// Binds a second alias from its own `init`.
    struct Nesting {
        registry: Arc<AliasRegistry>,
    }

    impl Lifecycle for Nesting {
        fn init(&self, _info: &HandlerInfo) -> Result<(), crate::error::BoxError> {
            self.registry
                .add("/inner", Arc::new(Recorder::default()), BTreeMap::new())?;
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_init_may_bind_another_alias() {
        let registry = Arc::new(AliasRegistry::new());
        let outer = Arc::new(Nesting {
            registry: registry.clone(),
        });
        let id = registry.add("/outer", outer, BTreeMap::new()).unwrap();

        assert_eq!(id, -1);
        assert_eq!(registry.get_by_alias("/inner").map(|h| h.id()), Some(-2));
        assert_eq!(registry.len(), 2);
        registry.clear().unwrap();
    }

    #[test]
    fn test_clear_destroys_each_once() {
        let registry = AliasRegistry::new();
        let recorder = Arc::new(Recorder::default());
        registry.add("/a", recorder.clone(), BTreeMap::new()).unwrap();
        registry.clear().unwrap();
        registry.clear().unwrap();
        assert_eq!(recorder.destroys.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }
}

//! Handler lifecycle with use counting.
//!
//! # States
//! - Registered: known to a registry, instance not initialized
//! - Initialized: `init` succeeded at least once and is not yet balanced
//! - Destroyed: every `init` has been balanced by a `destroy`
//!
//! # State Transitions
//! ```text
//! Registered  → Initialized: first init() (instance init runs)
//! Initialized → Initialized: further init()/destroy() while uses > 0
//! Initialized → Destroyed:   destroy() brings uses to zero (instance destroy runs)
//! Destroyed   → Initialized: init() again (promotion after release)
//! ```

use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{BoxError, RegistrationError};
use crate::handler::info::HandlerInfo;

/// Capability every handler instance implements. Construction stays with the
/// registering party; the registry only drives these two calls.
pub trait Lifecycle: Send + Sync + 'static {
    /// Prepare the instance. Called once per zero-to-one use transition.
    fn init(&self, _info: &HandlerInfo) -> Result<(), BoxError> {
        Ok(())
    }

    /// Release the instance. Called once per one-to-zero use transition.
    fn destroy(&self) {}

    /// Access to the concrete type for the dispatch side.
    fn as_any(&self) -> &dyn Any;
}

/// Lifecycle state of a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Registered,
    Initialized,
    Destroyed,
}

#[derive(Debug)]
struct Uses {
    count: usize,
    state: HandlerState,
}

/// A live handler instance together with its metadata.
pub struct Handler {
    info: HandlerInfo,
    instance: Arc<dyn Lifecycle>,
    uses: Mutex<Uses>,
}

impl Handler {
    pub fn new(info: HandlerInfo, instance: Arc<dyn Lifecycle>) -> Self {
        Self {
            info,
            instance,
            uses: Mutex::new(Uses {
                count: 0,
                state: HandlerState::Registered,
            }),
        }
    }

    pub fn info(&self) -> &HandlerInfo {
        &self.info
    }

    pub fn id(&self) -> i64 {
        self.info.id
    }

    pub fn context_id(&self) -> i64 {
        self.info.context_id
    }

    pub fn name(&self) -> String {
        self.info.display_name()
    }

    pub fn instance(&self) -> &Arc<dyn Lifecycle> {
        &self.instance
    }

    /// Downcast the instance to its concrete type.
    pub fn instance_as<T: 'static>(&self) -> Option<&T> {
        self.instance.as_any().downcast_ref::<T>()
    }

    /// True when `instance` is the very object this handler wraps.
    pub fn wraps(&self, instance: &Arc<dyn Lifecycle>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.instance), Arc::as_ptr(instance))
    }

    pub fn state(&self) -> HandlerState {
        self.uses.lock().state
    }

    pub fn use_count(&self) -> usize {
        self.uses.lock().count
    }

    /// Take a use. Only the first use initializes the instance.
    pub fn init(&self) -> Result<(), RegistrationError> {
        let mut uses = self.uses.lock();
        if uses.count > 0 {
            uses.count += 1;
            return Ok(());
        }
        match self.instance.init(&self.info) {
            Ok(()) => {
                uses.count = 1;
                uses.state = HandlerState::Initialized;
                tracing::debug!(handler = self.info.id, name = %self.info.display_name(), "Handler initialized");
                Ok(())
            }
            Err(source) => Err(RegistrationError::InitializationFailure {
                id: self.info.id,
                name: self.info.display_name(),
                source,
            }),
        }
    }

    /// Return a use. Returns true when this call released the instance.
    /// Destroying a handler with no outstanding uses is a no-op.
    pub fn destroy(&self) -> bool {
        let mut uses = self.uses.lock();
        match uses.count {
            0 => false,
            1 => {
                uses.count = 0;
                uses.state = HandlerState::Destroyed;
                self.instance.destroy();
                tracing::debug!(handler = self.info.id, name = %self.info.display_name(), "Handler destroyed");
                true
            }
            _ => {
                uses.count -= 1;
                false
            }
        }
    }
}

impl PartialEq for Handler {
    fn eq(&self, other: &Self) -> bool {
        self.info.id == other.info.id
    }
}

impl Eq for Handler {}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("id", &self.info.id)
            .field("name", &self.info.name)
            .field("context_id", &self.info.context_id)
            .field("ranking", &self.info.ranking)
            .finish()
    }
}

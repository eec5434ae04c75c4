//! Handler subsystem.
//!
//! # Data Flow
//! ```text
//! Registering party
//!     → HandlerInfo (metadata) + Arc<dyn Lifecycle> (live instance)
//!     → Handler (use-counted lifecycle wrapper)
//!     → RankedHandler (handler + owning context rank)
//!     → conflict sets in the registries
//! ```
//!
//! # Design Decisions
//! - The registry never constructs instances, it only drives init/destroy
//! - Ordering is a single two-level preference: context first, then handler
//! - Handler identity is its id; ids are unique per registry

pub mod info;
pub mod lifecycle;
pub mod resource;

use std::cmp::Ordering;
use std::sync::Arc;

pub use info::{
    ContextInfo, ContextRank, DispatcherType, HandlerInfo, ListenerType, DEFAULT_CONTEXT_ID,
};
pub use lifecycle::{Handler, HandlerState, Lifecycle};
pub use resource::{ResourceInfo, ResourceServlet};

/// A handler paired with the rank of its context, ordered by preference.
#[derive(Debug, Clone)]
pub struct RankedHandler {
    context: ContextRank,
    handler: Arc<Handler>,
}

impl RankedHandler {
    pub fn new(context: ContextRank, handler: Arc<Handler>) -> Self {
        Self { context, handler }
    }

    pub fn handler(&self) -> &Arc<Handler> {
        &self.handler
    }

    pub fn context(&self) -> ContextRank {
        self.context
    }

    pub fn id(&self) -> i64 {
        self.handler.id()
    }
}

impl Ord for RankedHandler {
    fn cmp(&self, other: &Self) -> Ordering {
        self.context
            .preference(&other.context)
            .then_with(|| self.handler.info().preference(other.handler.info()))
    }
}

impl PartialOrd for RankedHandler {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for RankedHandler {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RankedHandler {}

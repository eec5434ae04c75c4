//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use whiteboard_router::error::BoxError;
use whiteboard_router::{ContextInfo, Handler, HandlerInfo, Lifecycle};

/// Instance counting lifecycle calls; can be told to fail `init`.
#[derive(Default)]
pub struct Recording {
    inits: AtomicUsize,
    destroys: AtomicUsize,
    fail_init: AtomicBool,
}

impl Recording {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let recording = Self::default();
        recording.fail_init.store(true, Ordering::SeqCst);
        Arc::new(recording)
    }

    pub fn inits(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    pub fn destroys(&self) -> usize {
        self.destroys.load(Ordering::SeqCst)
    }

    /// Currently initialized and not yet destroyed.
    pub fn is_live(&self) -> bool {
        self.inits() > self.destroys()
    }
}

impl Lifecycle for Recording {
    fn init(&self, info: &HandlerInfo) -> Result<(), BoxError> {
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(format!("init refused for {}", info.id).into());
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

/// Handler wrapping a fresh recording instance.
pub fn recorded(info: HandlerInfo) -> (Arc<Handler>, Arc<Recording>) {
    let recording = Recording::new();
    let handler = Arc::new(Handler::new(info, recording.clone()));
    (handler, recording)
}

/// Handler wrapping an instance whose `init` fails.
pub fn failing(info: HandlerInfo) -> (Arc<Handler>, Arc<Recording>) {
    let recording = Recording::failing();
    let handler = Arc::new(Handler::new(info, recording.clone()));
    (handler, recording)
}

pub fn servlet(id: i64, context: i64, ranking: i32, patterns: &[&str]) -> HandlerInfo {
    patterns.iter().fold(
        HandlerInfo::new(id).with_context(context).with_ranking(ranking),
        |info, pattern| info.with_pattern(*pattern),
    )
}

pub fn context(id: i64, path: &str, ranking: i32) -> ContextInfo {
    ContextInfo::new(id, format!("ctx-{}", id), path).with_ranking(ranking)
}

//! Immutable rule → handler table.
//!
//! # Responsibilities
//! - Keep entries sorted by rule specificity, then handler preference
//! - Answer best-match, all-matches and by-name lookups without locking
//! - Produce a new table from activated/deactivated deltas (copy-on-write)
//!
//! # Design Decisions
//! - A table is never mutated after construction; `update` returns a new one
//! - The same rule may carry several handlers (filters); for servlets the
//!   conflict resolver guarantees at most one

use std::collections::HashMap;

use crate::handler::RankedHandler;
use crate::routing::pattern::Rule;

/// One published route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingEntry {
    pub rule: Rule,
    pub handler: RankedHandler,
}

impl MappingEntry {
    pub fn new(rule: Rule, handler: RankedHandler) -> Self {
        Self { rule, handler }
    }

    fn same_route(&self, other: &MappingEntry) -> bool {
        self.rule == other.rule && self.handler.id() == other.handler.id()
    }
}

/// Sorted, immutable routing table with a name index.
#[derive(Debug, Clone, Default)]
pub struct HandlerMapping {
    entries: Vec<MappingEntry>,
    names: HashMap<String, Vec<RankedHandler>>,
}

impl HandlerMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from arbitrary entries.
    pub fn from_entries(entries: impl IntoIterator<Item = MappingEntry>) -> Self {
        let mut entries: Vec<MappingEntry> = entries.into_iter().collect();
        entries.sort_by(|a, b| a.rule.cmp(&b.rule).then_with(|| a.handler.cmp(&b.handler)));
        entries.dedup_by(|a, b| a.same_route(b));

        let mut names: HashMap<String, Vec<RankedHandler>> = HashMap::new();
        for entry in &entries {
            if let Some(name) = &entry.handler.handler().info().name {
                let slot = names.entry(name.clone()).or_default();
                if !slot.iter().any(|h| h.id() == entry.handler.id()) {
                    slot.push(entry.handler.clone());
                }
            }
        }
        for handlers in names.values_mut() {
            handlers.sort();
        }

        Self { entries, names }
    }

    /// A new table with `deactivated` removed and `activated` added.
    pub fn update(&self, activated: &[MappingEntry], deactivated: &[MappingEntry]) -> Self {
        let kept = self
            .entries
            .iter()
            .filter(|e| !deactivated.iter().any(|d| d.same_route(e)))
            .cloned();
        Self::from_entries(kept.chain(activated.iter().cloned()))
    }

    /// First entry whose rule matches.
    pub fn best_match(&self, path: &str) -> Option<&MappingEntry> {
        self.entries.iter().find(|e| e.rule.matches(path))
    }

    /// Every matching entry, most specific rule first and, within a rule,
    /// preferred handler first.
    pub fn all_matches(&self, path: &str) -> Vec<&MappingEntry> {
        self.entries.iter().filter(|e| e.rule.matches(path)).collect()
    }

    /// Preferred handler registered under `name`.
    pub fn by_name(&self, name: &str) -> Option<&RankedHandler> {
        self.names.get(name).and_then(|handlers| handlers.first())
    }

    /// Distinct handlers, in preference order.
    pub fn handlers(&self) -> Vec<&RankedHandler> {
        let mut handlers: Vec<&RankedHandler> = Vec::new();
        for entry in &self.entries {
            if !handlers.iter().any(|h| h.id() == entry.handler.id()) {
                handlers.push(&entry.handler);
            }
        }
        handlers.sort();
        handlers
    }

    /// Patterns currently published for a handler.
    pub fn patterns_of(&self, id: i64) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.handler.id() == id)
            .map(|e| e.rule.pattern())
            .collect()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.entries.iter().any(|e| e.handler.id() == id)
    }

    pub fn entries(&self) -> &[MappingEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PartialEq for HandlerMapping {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Eq for HandlerMapping {}

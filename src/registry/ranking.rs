//! Ranking conflict resolver.
//!
//! # Responsibilities
//! - Keep, per route key, the ordered set of every value claiming it
//! - Decide the single active value (the set head) per key
//! - Describe each change as an `Update` transaction the caller applies
//!
//! # Applying an Update
//! ```text
//! init()        every value in `init`     (before publishing)
//! publish       `activated` / `deactivated` pairs
//! destroy()     every value in `destroy`  (after publishing)
//! ```
//!
//! # Design Decisions
//! - Values are ordered by preference, so the head of a set is its first element
//! - The resolver tracks which values it asked to initialize ("live") so every
//!   `init` is paired with exactly one later `destroy`
//! - Whether a value that loses all its keys is torn down is a policy choice
//! - The multimap is `Clone`, letting callers checkpoint and roll back

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// What happens to a live value once it is shadowed on every key it claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShadowPolicy {
    /// Keep it initialized for a cheap promotion later.
    #[default]
    Retain,
    /// Destroy it; a later promotion initializes it again.
    Release,
}

/// Transition descriptor produced by every resolver mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update<K: Ord, V: Ord> {
    activated: BTreeMap<K, V>,
    deactivated: BTreeMap<K, V>,
    init: BTreeSet<V>,
    destroy: BTreeSet<V>,
}

impl<K: Ord, V: Ord> Default for Update<K, V> {
    fn default() -> Self {
        Self {
            activated: BTreeMap::new(),
            deactivated: BTreeMap::new(),
            init: BTreeSet::new(),
            destroy: BTreeSet::new(),
        }
    }
}

impl<K: Ord + Clone, V: Ord + Clone> Update<K, V> {
    /// Key → value pairs to add to the published mapping.
    pub fn activated(&self) -> &BTreeMap<K, V> {
        &self.activated
    }

    /// Key → value pairs to remove from the published mapping.
    pub fn deactivated(&self) -> &BTreeMap<K, V> {
        &self.deactivated
    }

    /// Values to initialize before publishing.
    pub fn init(&self) -> &BTreeSet<V> {
        &self.init
    }

    /// Values to destroy after publishing.
    pub fn destroy(&self) -> &BTreeSet<V> {
        &self.destroy
    }

    pub fn is_empty(&self) -> bool {
        self.activated.is_empty()
            && self.deactivated.is_empty()
            && self.init.is_empty()
            && self.destroy.is_empty()
    }

    /// Compose two consecutive updates into the single net update.
    ///
    /// Pairs activated by `self` and deactivated by `next` cancel out, as do
    /// values initialized then destroyed (and vice versa).
    pub fn then(mut self, next: Update<K, V>) -> Self {
        for (key, value) in next.deactivated {
            if self.activated.get(&key) == Some(&value) {
                self.activated.remove(&key);
            } else {
                self.deactivated.entry(key).or_insert(value);
            }
        }
        for (key, value) in next.activated {
            if self.deactivated.get(&key) == Some(&value) {
                self.deactivated.remove(&key);
            } else {
                self.activated.insert(key, value);
            }
        }
        for value in next.destroy {
            if !self.init.remove(&value) {
                self.destroy.insert(value);
            }
        }
        for value in next.init {
            if !self.destroy.remove(&value) {
                self.init.insert(value);
            }
        }
        self
    }
}

/// Per-key conflict sets with one active head each.
#[derive(Debug, Clone)]
pub struct RankingMultimap<K: Ord, V: Ord> {
    sets: BTreeMap<K, BTreeSet<V>>,
    /// Number of keys each registered value heads. Present for every
    /// registered value, possibly zero.
    active_counts: BTreeMap<V, usize>,
    live: BTreeSet<V>,
    policy: ShadowPolicy,
}

impl<K: Ord + Clone, V: Ord + Clone> Default for RankingMultimap<K, V> {
    fn default() -> Self {
        Self::new(ShadowPolicy::default())
    }
}

impl<K: Ord + Clone, V: Ord + Clone> RankingMultimap<K, V> {
    pub fn new(policy: ShadowPolicy) -> Self {
        Self {
            sets: BTreeMap::new(),
            active_counts: BTreeMap::new(),
            live: BTreeSet::new(),
            policy,
        }
    }

    pub fn policy(&self) -> ShadowPolicy {
        self.policy
    }

    /// Register `value` under every key in `keys`.
    pub fn add<'k>(&mut self, keys: impl IntoIterator<Item = &'k K>, value: V) -> Update<K, V>
    where
        K: 'k,
    {
        let mut update = Update::default();
        let mut displaced = Vec::new();
        self.active_counts.entry(value.clone()).or_insert(0);

        let keys: BTreeSet<&K> = keys.into_iter().collect();
        for key in keys {
            let set = self.sets.entry(key.clone()).or_default();
            let previous = set.first().cloned();
            if !set.insert(value.clone()) {
                continue;
            }
            if set.first() != Some(&value) {
                continue;
            }
            update.activated.insert(key.clone(), value.clone());
            Self::bump(&mut self.active_counts, &value, true);
            if let Some(previous) = previous {
                update.deactivated.insert(key.clone(), previous.clone());
                Self::bump(&mut self.active_counts, &previous, false);
                displaced.push(previous);
            }
        }

        if self.is_active(&value) && self.live.insert(value.clone()) {
            update.init.insert(value);
        }

        if self.policy == ShadowPolicy::Release {
            for previous in displaced {
                if !self.is_active(&previous) && self.live.remove(&previous) {
                    update.destroy.insert(previous);
                }
            }
        }

        update
    }

    /// Unregister `value` from every key in `keys`. Unknown values are a no-op.
    pub fn remove<'k>(&mut self, keys: impl IntoIterator<Item = &'k K>, value: &V) -> Update<K, V>
    where
        K: 'k,
    {
        let mut update = Update::default();
        if !self.active_counts.contains_key(value) {
            return update;
        }

        let keys: BTreeSet<&K> = keys.into_iter().collect();
        for key in keys {
            let Some(set) = self.sets.get_mut(key) else {
                continue;
            };
            let was_head = set.first() == Some(value);
            if !set.remove(value) {
                continue;
            }
            if was_head {
                update.deactivated.insert(key.clone(), value.clone());
                if let Some(next) = set.first().cloned() {
                    update.activated.insert(key.clone(), next.clone());
                    Self::bump(&mut self.active_counts, &next, true);
                    if self.live.insert(next.clone()) {
                        update.init.insert(next);
                    }
                }
            }
            if set.is_empty() {
                self.sets.remove(key);
            }
        }

        self.active_counts.remove(value);
        if self.live.remove(value) {
            update.destroy.insert(value.clone());
        }
        update
    }

    /// Drop everything. The returned update unpublishes every head and
    /// destroys every live value.
    pub fn clear(&mut self) -> Update<K, V> {
        let mut update = Update::default();
        for (key, set) in std::mem::take(&mut self.sets) {
            if let Some(head) = set.into_iter().next() {
                update.deactivated.insert(key, head);
            }
        }
        update.destroy = std::mem::take(&mut self.live);
        self.active_counts.clear();
        update
    }

    /// Number of registered values.
    pub fn size(&self) -> usize {
        self.active_counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active_counts.is_empty()
    }

    pub fn contains(&self, value: &V) -> bool {
        self.active_counts.contains_key(value)
    }

    /// True when `value` heads at least one key.
    pub fn is_active(&self, value: &V) -> bool {
        self.active_counts.get(value).is_some_and(|count| *count > 0)
    }

    /// True when the resolver considers `value` initialized.
    pub fn is_live(&self, value: &V) -> bool {
        self.live.contains(value)
    }

    /// Active value of `key`.
    pub fn head(&self, key: &K) -> Option<&V> {
        self.sets.get(key).and_then(|set| set.first())
    }

    /// Every value heading at least one key.
    pub fn active_values(&self) -> Vec<&V> {
        self.active_counts
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(value, _)| value)
            .collect()
    }

    /// Every value shadowed on at least one key.
    pub fn shadowed_values(&self) -> BTreeSet<&V> {
        self.sets.values().flat_map(|set| set.iter().skip(1)).collect()
    }

    /// Every registered value.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.active_counts.keys()
    }

    /// Keys that `value` currently heads.
    pub fn active_keys(&self, value: &V) -> Vec<&K> {
        self.sets
            .iter()
            .filter(|(_, set)| set.first() == Some(value))
            .map(|(key, _)| key)
            .collect()
    }

    /// Keys where `value` is registered but not the head.
    pub fn shadowed_keys(&self, value: &V) -> Vec<&K> {
        self.sets
            .iter()
            .filter(|(_, set)| set.first() != Some(value) && set.contains(value))
            .map(|(key, _)| key)
            .collect()
    }

    fn bump(counts: &mut BTreeMap<V, usize>, value: &V, up: bool) {
        if let Some(count) = counts.get_mut(value) {
            if up {
                *count += 1;
            } else {
                *count = count.saturating_sub(1);
            }
        }
    }
}

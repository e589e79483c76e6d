//! Per-instance observation index.

use super::types::Subscription;
use crate::path::{PropertyPath, COLLECTION_MARKER, WILDCARD};
use crate::types::SubscriptionId;
use std::collections::{BTreeMap, HashMap};
use std::rc::{Rc, Weak};
use std::sync::Arc;

/// How an index entry holds its subscription.
pub(crate) enum SubscriptionRef {
    /// Entry on the root instance: the index owns the subscription.
    Owned(Rc<Subscription>),
    /// Entry on a node further down the path.
    Linked(Weak<Subscription>),
}

impl SubscriptionRef {
    fn upgrade(&self) -> Option<Rc<Subscription>> {
        match self {
            SubscriptionRef::Owned(sub) => Some(Rc::clone(sub)),
            SubscriptionRef::Linked(sub) => sub.upgrade(),
        }
    }
}

pub(crate) struct IndexEntry {
    pub(crate) id: SubscriptionId,
    pub(crate) depth: usize,
    pub(crate) subscription: SubscriptionRef,
}

/// A subscription affected by a change on this instance.
pub(crate) struct Hit {
    pub(crate) subscription: Rc<Subscription>,
    /// Path depth at which this instance sits for the subscription.
    pub(crate) depth: usize,
    /// True when matched through a property name rather than `*` or `#`.
    pub(crate) key_is_named: bool,
}

/// Entries under one key. Subscription ids grow monotonically, so ordering
/// by `(id, depth)` is registration order.
type EntryList = BTreeMap<(SubscriptionId, usize), IndexEntry>;

/// Maps an intercepted key (property name, `*` or `#`) to the entries of
/// every subscription whose path passes through it on this instance.
#[derive(Default)]
pub(crate) struct ObservationIndex {
    entries: HashMap<String, EntryList>,
    /// Rooted subscriptions per `(observer address, path)`, for the
    /// duplicate registration check.
    rooted_paths: HashMap<(usize, Arc<PropertyPath>), usize>,
}

impl ObservationIndex {
    pub(crate) fn attach(&mut self, key: &str, entry: IndexEntry) {
        if let SubscriptionRef::Owned(sub) = &entry.subscription {
            *self
                .rooted_paths
                .entry((sub.observer_addr(), Arc::clone(&sub.path)))
                .or_insert(0) += 1;
        }
        self.entries
            .entry(key.to_string())
            .or_default()
            .insert((entry.id, entry.depth), entry);
    }

    /// Remove the entry for `(id, depth)` under `key`. The removed entry is
    /// returned so the caller can drop it after releasing the index.
    pub(crate) fn detach(
        &mut self,
        key: &str,
        id: SubscriptionId,
        depth: usize,
    ) -> Option<IndexEntry> {
        let list = self.entries.get_mut(key)?;
        let removed = list.remove(&(id, depth))?;
        if list.is_empty() {
            self.entries.remove(key);
        }
        if let SubscriptionRef::Owned(sub) = &removed.subscription {
            let rooted = (sub.observer_addr(), Arc::clone(&sub.path));
            if let Some(count) = self.rooted_paths.get_mut(&rooted) {
                *count -= 1;
                if *count == 0 {
                    self.rooted_paths.remove(&rooted);
                }
            }
        }
        Some(removed)
    }

    /// Subscriptions fired by a change to `property`: its own entries
    /// followed by wildcard entries. `*` covers named properties only, so
    /// `#` membership changes never reach it.
    pub(crate) fn affected(&self, property: &str) -> Vec<Hit> {
        let named = property != WILDCARD && property != COLLECTION_MARKER;
        let mut hits = Vec::new();
        if let Some(list) = self.entries.get(property) {
            hits.extend(list.values().filter_map(|entry| {
                entry.subscription.upgrade().map(|subscription| Hit {
                    subscription,
                    depth: entry.depth,
                    key_is_named: named,
                })
            }));
        }
        if named {
            if let Some(list) = self.entries.get(WILDCARD) {
                hits.extend(list.values().filter_map(|entry| {
                    entry.subscription.upgrade().map(|subscription| Hit {
                        subscription,
                        depth: entry.depth,
                        key_is_named: false,
                    })
                }));
            }
        }
        hits
    }

    /// Whether `observer` already has a live subscription to `path` rooted
    /// at this instance.
    pub(crate) fn has_rooted(&self, observer: usize, path: &Arc<PropertyPath>) -> bool {
        if !self.rooted_paths.contains_key(&(observer, Arc::clone(path))) {
            return false;
        }
        self.entries.get(path.root()).is_some_and(|list| {
            list.values().any(|entry| match &entry.subscription {
                SubscriptionRef::Owned(sub) => {
                    sub.is_active()
                        && sub.parties_alive()
                        && sub.observer_addr() == observer
                        && sub.path == *path
                }
                SubscriptionRef::Linked(_) => false,
            })
        })
    }

    /// Live subscriptions registered under `key` whose parties are both
    /// still around.
    pub(crate) fn live_count(&self, key: &str) -> usize {
        self.entries.get(key).map_or(0, |list| {
            list.values()
                .filter_map(|entry| entry.subscription.upgrade())
                .filter(|sub| sub.is_active() && sub.parties_alive())
                .count()
        })
    }

    /// Snapshot of `(key, subscriptions)` pairs, keys sorted.
    pub(crate) fn snapshot(&self) -> Vec<(String, Vec<(Rc<Subscription>, usize)>)> {
        let mut keys: Vec<&String> = self.entries.keys().collect();
        keys.sort();
        keys.into_iter()
            .map(|key| {
                let subs = self.entries[key]
                    .values()
                    .filter_map(|entry| entry.subscription.upgrade().map(|sub| (sub, entry.depth)))
                    .collect();
                (key.clone(), subs)
            })
            .collect()
    }

    /// Owned entries, i.e. subscriptions rooted at this instance.
    pub(crate) fn rooted(&self) -> Vec<Rc<Subscription>> {
        self.entries
            .values()
            .flat_map(BTreeMap::values)
            .filter_map(|entry| match &entry.subscription {
                SubscriptionRef::Owned(sub) => Some(Rc::clone(sub)),
                SubscriptionRef::Linked(_) => None,
            })
            .collect()
    }
}

use crate::engine::Engine;
use crate::intercept::{ObjectCore, ObjectInner, ObjectKind, Observable, Property, PropertyValue};
use crate::path::COLLECTION_MARKER;
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

/// What happened to an [`ObservableMap`]. Handed to immediate-mode
/// observers of `#`.
#[derive(Clone, Debug, PartialEq)]
pub enum MapChange<K, V> {
    Inserted { key: K },
    Updated { key: K, previous: V },
    Removed { key: K, value: V },
    /// Entries dropped by `clear` or `retain`, in no particular order.
    Cleared { entries: Vec<(K, V)> },
}

/// A `HashMap` whose membership changes are observable. Overwriting a key
/// with an equal value is not a change.
pub struct ObservableMap<K, V: PropertyValue> {
    core: ObjectCore,
    entries: RefCell<HashMap<K, V>>,
    count: Property<usize>,
}

impl<K, V> ObservableMap<K, V>
where
    K: Clone + Eq + Hash + 'static,
    V: PropertyValue,
{
    pub fn new(engine: &Engine) -> Self {
        Self::from_map(engine, HashMap::new())
    }

    pub fn from_map(engine: &Engine, entries: HashMap<K, V>) -> Self {
        let core = ObjectCore::with_kind(engine, ObjectKind::Collection);
        let count = Property::new(&core, "count", entries.len());
        Self {
            core,
            entries: RefCell::new(entries),
            count,
        }
    }

    /// Entry count as an observable property.
    pub fn count(&self) -> &Property<usize> {
        &self.count
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.borrow().get(key).cloned()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.borrow().contains_key(key)
    }

    pub fn keys(&self) -> Vec<K> {
        self.entries.borrow().keys().cloned().collect()
    }

    /// Borrow the entries. Mutating the map from inside `f` panics.
    pub fn with<R>(&self, f: impl FnOnce(&HashMap<K, V>) -> R) -> R {
        f(&self.entries.borrow())
    }

    /// Insert or overwrite `key`, returning the value it replaced.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let previous = {
            let mut entries = self.entries.borrow_mut();
            match entries.get(&key) {
                Some(current) if *current == value => return Some(value),
                _ => entries.insert(key.clone(), value),
            }
        };
        let change = match &previous {
            Some(previous) => MapChange::Updated {
                key,
                previous: previous.clone(),
            },
            None => MapChange::Inserted { key },
        };
        self.changed(change);
        previous
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let value = self.entries.borrow_mut().remove(key)?;
        self.changed(MapChange::Removed {
            key: key.clone(),
            value: value.clone(),
        });
        Some(value)
    }

    pub fn clear(&self) {
        let entries: Vec<(K, V)> = self.entries.borrow_mut().drain().collect();
        if !entries.is_empty() {
            self.changed(MapChange::Cleared { entries });
        }
    }

    /// Keep only the entries for which `keep` returns true.
    pub fn retain(&self, mut keep: impl FnMut(&K, &V) -> bool) {
        let entries = {
            let mut map = self.entries.borrow_mut();
            let (kept, dropped): (HashMap<K, V>, HashMap<K, V>) =
                std::mem::take(&mut *map).into_iter().partition(|(k, v)| keep(k, v));
            *map = kept;
            dropped.into_iter().collect::<Vec<_>>()
        };
        if !entries.is_empty() {
            self.changed(MapChange::Cleared { entries });
        }
    }

    fn changed(&self, change: MapChange<K, V>) {
        ObjectInner::did_change(
            self.core.inner(),
            COLLECTION_MARKER,
            Some(&change as &dyn Any),
        );
        self.count.set(self.len());
    }
}

impl<K, V> Observable for ObservableMap<K, V>
where
    K: Clone + Eq + Hash + 'static,
    V: PropertyValue,
{
    fn core(&self) -> &ObjectCore {
        &self.core
    }
}

impl<K: fmt::Debug, V: PropertyValue + fmt::Debug> fmt::Debug for ObservableMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableMap")
            .field("id", &self.core.id())
            .field("entries", &*self.entries.borrow())
            .finish()
    }
}

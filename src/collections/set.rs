use crate::engine::Engine;
use crate::intercept::{ObjectCore, ObjectInner, ObjectKind, Observable, Property, PropertyValue};
use crate::path::COLLECTION_MARKER;
use std::any::Any;
use std::cell::RefCell;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};

/// What happened to an [`ObservableSet`]. Handed to immediate-mode
/// observers of `#`.
#[derive(Clone, Debug, PartialEq)]
pub enum SetChange<T> {
    Inserted { value: T },
    Removed { value: T },
    /// Members dropped by `clear` or `retain`, in no particular order.
    Cleared { values: Vec<T> },
}

/// A `HashSet` whose membership changes are observable.
///
/// Members can be addressed by a string key derived from their hash, for
/// hosts that need to name an element without holding it.
pub struct ObservableSet<T: PropertyValue + Eq + Hash> {
    core: ObjectCore,
    members: RefCell<HashSet<T>>,
    count: Property<usize>,
}

impl<T: PropertyValue + Eq + Hash> ObservableSet<T> {
    pub fn new(engine: &Engine) -> Self {
        Self::from_values(engine, Vec::new())
    }

    pub fn from_values(engine: &Engine, values: impl IntoIterator<Item = T>) -> Self {
        let members: HashSet<T> = values.into_iter().collect();
        let core = ObjectCore::with_kind(engine, ObjectKind::Collection);
        let count = Property::new(&core, "count", members.len());
        Self {
            core,
            members: RefCell::new(members),
            count,
        }
    }

    /// Member count as an observable property.
    pub fn count(&self) -> &Property<usize> {
        &self.count
    }

    pub fn len(&self) -> usize {
        self.members.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.borrow().is_empty()
    }

    pub fn contains(&self, value: &T) -> bool {
        self.members.borrow().contains(value)
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.members.borrow().iter().cloned().collect()
    }

    /// Borrow the members. Mutating the set from inside `f` panics.
    pub fn with<R>(&self, f: impl FnOnce(&HashSet<T>) -> R) -> R {
        f(&self.members.borrow())
    }

    /// Stable key for `value`, whether or not it is a member.
    pub fn key_for(value: &T) -> String {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }

    /// The member whose [`key_for`](Self::key_for) is `key`.
    pub fn get_by_key(&self, key: &str) -> Option<T> {
        self.members
            .borrow()
            .iter()
            .find(|member| Self::key_for(member) == key)
            .cloned()
    }

    /// Returns false if `value` was already a member.
    pub fn insert(&self, value: T) -> bool {
        if !self.members.borrow_mut().insert(value.clone()) {
            return false;
        }
        self.changed(SetChange::Inserted { value });
        true
    }

    /// Returns false if `value` was not a member.
    pub fn remove(&self, value: &T) -> bool {
        let Some(value) = self.members.borrow_mut().take(value) else {
            return false;
        };
        self.changed(SetChange::Removed { value });
        true
    }

    pub fn clear(&self) {
        let values: Vec<T> = self.members.borrow_mut().drain().collect();
        if !values.is_empty() {
            self.changed(SetChange::Cleared { values });
        }
    }

    /// Keep only the members for which `keep` returns true.
    pub fn retain(&self, mut keep: impl FnMut(&T) -> bool) {
        let values = {
            let mut members = self.members.borrow_mut();
            let (kept, dropped): (Vec<T>, Vec<T>) =
                std::mem::take(&mut *members).into_iter().partition(|member| keep(member));
            *members = kept.into_iter().collect();
            dropped
        };
        if !values.is_empty() {
            self.changed(SetChange::Cleared { values });
        }
    }

    fn changed(&self, change: SetChange<T>) {
        ObjectInner::did_change(
            self.core.inner(),
            COLLECTION_MARKER,
            Some(&change as &dyn Any),
        );
        self.count.set(self.len());
    }
}

impl<T: PropertyValue + Eq + Hash> Observable for ObservableSet<T> {
    fn core(&self) -> &ObjectCore {
        &self.core
    }
}

impl<T: PropertyValue + Eq + Hash + fmt::Debug> fmt::Debug for ObservableSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableSet")
            .field("id", &self.core.id())
            .field("members", &*self.members.borrow())
            .finish()
    }
}

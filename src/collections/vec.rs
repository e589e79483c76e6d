use crate::engine::Engine;
use crate::intercept::{ObjectCore, ObjectInner, ObjectKind, Observable, Property, PropertyValue};
use crate::path::COLLECTION_MARKER;
use std::any::Any;
use std::cell::RefCell;
use std::fmt;

/// What happened to an [`ObservableVec`]. Handed to immediate-mode
/// observers of `#` in place of a previous value.
#[derive(Clone, Debug, PartialEq)]
pub enum CollectionChange<T> {
    Inserted { index: usize },
    Removed { index: usize, value: T },
    Replaced { index: usize, previous: T },
    /// Elements dropped by `clear` or `retain`, in their original order.
    RemovedMany { values: Vec<T> },
}

/// A `Vec` whose membership changes are observable.
///
/// ```ignore
/// struct Playlist {
///     core: ObjectCore,
///     tracks: Property<Link<ObservableVec<String>>>,
/// }
///
/// playlist.tell(&view, "tracks.#", |view, playlist| view.refresh(playlist))?;
/// ```
pub struct ObservableVec<T: PropertyValue> {
    core: ObjectCore,
    items: RefCell<Vec<T>>,
    count: Property<usize>,
}

impl<T: PropertyValue> ObservableVec<T> {
    pub fn new(engine: &Engine) -> Self {
        Self::from_vec(engine, Vec::new())
    }

    pub fn from_vec(engine: &Engine, items: Vec<T>) -> Self {
        let core = ObjectCore::with_kind(engine, ObjectKind::Collection);
        let count = Property::new(&core, "count", items.len());
        Self {
            core,
            items: RefCell::new(items),
            count,
        }
    }

    /// Element count as an observable property.
    pub fn count(&self) -> &Property<usize> {
        &self.count
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<T> {
        self.items.borrow().get(index).cloned()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.borrow().clone()
    }

    /// Borrow the elements. Mutating the collection from inside `f` panics.
    pub fn with<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        f(&self.items.borrow())
    }

    pub fn push(&self, value: T) {
        let index = {
            let mut items = self.items.borrow_mut();
            items.push(value);
            items.len() - 1
        };
        self.changed(CollectionChange::Inserted { index });
    }

    /// # Panics
    ///
    /// Panics if `index > len`.
    pub fn insert(&self, index: usize, value: T) {
        self.items.borrow_mut().insert(index, value);
        self.changed(CollectionChange::Inserted { index });
    }

    /// Remove the element at `index`, or return `None` if out of range.
    pub fn remove(&self, index: usize) -> Option<T> {
        let value = {
            let mut items = self.items.borrow_mut();
            if index >= items.len() {
                return None;
            }
            items.remove(index)
        };
        self.changed(CollectionChange::Removed {
            index,
            value: value.clone(),
        });
        Some(value)
    }

    pub fn pop(&self) -> Option<T> {
        let (index, value) = {
            let mut items = self.items.borrow_mut();
            let value = items.pop()?;
            (items.len(), value)
        };
        self.changed(CollectionChange::Removed {
            index,
            value: value.clone(),
        });
        Some(value)
    }

    /// Replace the element at `index`. Returns false when out of range or
    /// when the new value equals the old one.
    pub fn set(&self, index: usize, value: T) -> bool {
        let previous = {
            let mut items = self.items.borrow_mut();
            match items.get_mut(index) {
                Some(slot) if *slot != value => std::mem::replace(slot, value),
                _ => return false,
            }
        };
        self.changed(CollectionChange::Replaced { index, previous });
        true
    }

    pub fn clear(&self) {
        let values = std::mem::take(&mut *self.items.borrow_mut());
        if !values.is_empty() {
            self.changed(CollectionChange::RemovedMany { values });
        }
    }

    /// Keep only the elements for which `keep` returns true.
    pub fn retain(&self, mut keep: impl FnMut(&T) -> bool) {
        let values = {
            let mut items = self.items.borrow_mut();
            let (kept, dropped): (Vec<T>, Vec<T>) =
                std::mem::take(&mut *items).into_iter().partition(|item| keep(item));
            *items = kept;
            dropped
        };
        if !values.is_empty() {
            self.changed(CollectionChange::RemovedMany { values });
        }
    }

    fn changed(&self, change: CollectionChange<T>) {
        ObjectInner::did_change(
            self.core.inner(),
            COLLECTION_MARKER,
            Some(&change as &dyn Any),
        );
        self.count.set(self.len());
    }
}

impl<T: PropertyValue> Observable for ObservableVec<T> {
    fn core(&self) -> &ObjectCore {
        &self.core
    }
}

impl<T: PropertyValue + fmt::Debug> fmt::Debug for ObservableVec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableVec")
            .field("id", &self.core.id())
            .field("items", &*self.items.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EngineConfig;
    use std::cell::Cell;
    use std::rc::Rc;

    fn counting(engine: &Engine, list: &Rc<ObservableVec<i32>>, path: &str) -> Rc<Cell<u32>> {
        let hits = Rc::new(Cell::new(0u32));
        engine
            .tell(list, &hits, path, |hits: &Cell<u32>, _: &ObservableVec<i32>| {
                hits.set(hits.get() + 1)
            })
            .unwrap();
        hits
    }

    #[test]
    fn test_mutations_fire_marker_and_count() {
        let engine = Engine::new(EngineConfig::default());
        let list = Rc::new(ObservableVec::new(&engine));
        let members = counting(&engine, &list, "#");
        let count = counting(&engine, &list, "count");

        list.push(1);
        list.push(2);
        engine.flush();
        assert_eq!(members.get(), 1);
        assert_eq!(count.get(), 1);
        assert_eq!(list.count().get(), 2);

        // Replacing keeps the count, so only the marker fires.
        assert!(list.set(0, 10));
        engine.flush();
        assert_eq!(members.get(), 2);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_wildcard_sees_count_but_not_membership() {
        let engine = Engine::new(EngineConfig::default());
        let list = Rc::new(ObservableVec::from_vec(&engine, vec![1, 2]));
        let all = counting(&engine, &list, "*");

        assert!(list.set(0, 5));
        assert_eq!(engine.pending_count(), 0);
        engine.flush();
        assert_eq!(all.get(), 0);

        list.push(3);
        engine.flush();
        assert_eq!(all.get(), 1);
    }

    #[test]
    fn test_noop_mutations_are_silent() {
        let engine = Engine::new(EngineConfig::default());
        let list = Rc::new(ObservableVec::from_vec(&engine, vec![1, 2, 3]));
        let members = counting(&engine, &list, "#");

        assert!(!list.set(0, 1));
        assert!(!list.set(9, 1));
        assert_eq!(list.remove(9), None);
        list.retain(|_| true);
        assert_eq!(engine.pending_count(), 0);

        list.retain(|value| value % 2 == 1);
        assert_eq!(list.to_vec(), vec![1, 3]);
        engine.flush();
        assert_eq!(members.get(), 1);
    }

    #[test]
    fn test_immediate_observer_sees_change() {
        let engine = Engine::new(EngineConfig::default());
        let list = Rc::new(ObservableVec::from_vec(&engine, vec![7]));
        let seen = Rc::new(RefCell::new(Vec::new()));

        engine
            .tell_immediate(
                &list,
                &seen,
                "#",
                |seen: &RefCell<Vec<CollectionChange<i32>>>,
                 _: &ObservableVec<i32>,
                 change: Option<&dyn Any>| {
                    if let Some(change) = change.and_then(|c| c.downcast_ref::<CollectionChange<i32>>()) {
                        seen.borrow_mut().push(change.clone());
                    }
                },
            )
            .unwrap();

        list.pop();
        list.push(8);
        assert_eq!(
            *seen.borrow(),
            vec![
                CollectionChange::Removed { index: 0, value: 7 },
                CollectionChange::Inserted { index: 0 },
            ]
        );
    }
}

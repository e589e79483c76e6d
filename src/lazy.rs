//! Lazily computed properties.
//!
//! A [`LazyProperty`] caches a value computed from other state and can be
//! observed under its own name like any declared property. Invalidating it
//! notifies its observers; the next read recomputes. [`LazyProperty::depends_on`]
//! wires invalidation to changes on other paths of the owning instance.
//! Lazy properties can also be invalidated by name through the owning
//! [`ObjectCore`], individually or all at once.
//!
//! ```ignore
//! struct Person {
//!     core: ObjectCore,
//!     first: Property<String>,
//!     last: Property<String>,
//!     full_name: LazyProperty<String>,
//! }
//!
//! LazyProperty::depends_on(&person, &["first", "last"], |p: &Person| &p.full_name);
//! let name = person.full_name.get_or_compute(|| format!("{} {}", person.first.get(), person.last.get()));
//! ```

use crate::intercept::{ObjectCore, ObjectInner, Observable, PropertyValue, Slot};
use crate::subscriptions::TellReport;
use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tracing::trace;

struct LazyCell<T> {
    name: String,
    cached: RefCell<Option<T>>,
    owner: Weak<ObjectInner>,
}

impl<T: PropertyValue> Slot for LazyCell<T> {
    fn link(&self) -> Option<Rc<dyn Observable>> {
        None
    }

    fn holds_links(&self) -> bool {
        false
    }

    fn invalidate(&self) -> bool {
        let previous = self.cached.borrow_mut().take();
        trace!(property = %self.name, was_cached = previous.is_some(), "lazy property invalidated");
        if let Some(owner) = self.owner.upgrade() {
            ObjectInner::did_change(&owner, &self.name, Some(&previous as &dyn Any));
        }
        true
    }
}

pub struct LazyProperty<T: PropertyValue> {
    cell: Rc<LazyCell<T>>,
}

impl<T: PropertyValue> LazyProperty<T> {
    /// Declare a lazily computed property named `name` on `core`.
    pub fn new(core: &ObjectCore, name: &str) -> Self {
        let cell = Rc::new(LazyCell {
            name: name.to_string(),
            cached: RefCell::new(None),
            owner: Rc::downgrade(core.inner()),
        });
        let slot: Rc<dyn Slot> = cell.clone();
        core.inner().register_slot(name, Rc::downgrade(&slot));
        Self { cell }
    }

    pub fn name(&self) -> &str {
        &self.cell.name
    }

    /// The cached value, computing and caching it first if needed.
    pub fn get_or_compute(&self, compute: impl FnOnce() -> T) -> T {
        if let Some(value) = self.cell.cached.borrow().as_ref() {
            return value.clone();
        }
        let value = compute();
        *self.cell.cached.borrow_mut() = Some(value.clone());
        value
    }

    /// The cached value without computing.
    pub fn cached(&self) -> Option<T> {
        self.cell.cached.borrow().clone()
    }

    pub fn is_valid(&self) -> bool {
        self.cell.cached.borrow().is_some()
    }

    /// Drop the cached value and notify observers of this property, even
    /// if nothing was cached. Immediate observers receive the dropped
    /// value as `Option<T>`. Same as
    /// [`ObjectCore::invalidate_property`] with this property's name.
    pub fn invalidate(&self) {
        self.cell.invalidate();
    }

    /// Invalidate the property selected by `accessor` whenever anything
    /// along `paths` on `owner` changes. Each path succeeds or fails on its
    /// own, as with [`Engine::tell_any`](crate::Engine::tell_any).
    pub fn depends_on<O: Observable>(
        owner: &Rc<O>,
        paths: &[&str],
        accessor: fn(&O) -> &Self,
    ) -> TellReport {
        let engine = match owner.core().engine() {
            Ok(engine) => engine,
            Err(err) => {
                return TellReport {
                    handles: Vec::new(),
                    errors: paths
                        .iter()
                        .map(|path| (path.to_string(), err.clone().into()))
                        .collect(),
                }
            }
        };
        engine.tell_any_immediate(owner, owner, paths, move |_: &O, owner: &O, _| {
            accessor(owner).invalidate()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Engine, EngineConfig, Property};
    use std::cell::Cell;

    struct Rect {
        core: ObjectCore,
        width: Property<u32>,
        height: Property<u32>,
        area: LazyProperty<u32>,
        computed: Cell<u32>,
    }

    impl Observable for Rect {
        fn core(&self) -> &ObjectCore {
            &self.core
        }
    }

    impl Rect {
        fn area(&self) -> u32 {
            self.area.get_or_compute(|| {
                self.computed.set(self.computed.get() + 1);
                self.width.get() * self.height.get()
            })
        }
    }

    fn rect(engine: &Engine) -> Rc<Rect> {
        let core = ObjectCore::new(engine);
        let width = Property::new(&core, "width", 2);
        let height = Property::new(&core, "height", 3);
        let area = LazyProperty::new(&core, "area");
        Rc::new(Rect {
            core,
            width,
            height,
            area,
            computed: Cell::new(0),
        })
    }

    #[test]
    fn test_value_is_cached_until_invalidated() {
        let engine = Engine::new(EngineConfig::default());
        let r = rect(&engine);

        assert!(!r.area.is_valid());
        assert_eq!(r.area(), 6);
        assert_eq!(r.area(), 6);
        assert_eq!(r.computed.get(), 1);

        r.area.invalidate();
        assert_eq!(r.area.cached(), None);
        assert_eq!(r.area(), 6);
        assert_eq!(r.computed.get(), 2);
    }

    #[test]
    fn test_dependencies_invalidate_and_notify() {
        let engine = Engine::new(EngineConfig::default());
        let r = rect(&engine);
        let report = LazyProperty::depends_on(&r, &["width", "height"], |r: &Rect| &r.area);
        assert!(report.is_complete());

        let observer = Rc::new(Cell::new(0u32));
        engine
            .tell(&r, &observer, "area", |hits: &Cell<u32>, _: &Rect| {
                hits.set(hits.get() + 1)
            })
            .unwrap();

        assert_eq!(r.area(), 6);
        r.width.set(5);
        assert!(!r.area.is_valid());
        engine.flush();
        assert_eq!(observer.get(), 1);
        assert_eq!(r.area(), 15);
    }

    #[test]
    fn test_invalidate_by_name_through_core() {
        let engine = Engine::new(EngineConfig::default());
        let r = rect(&engine);
        let observer = Rc::new(Cell::new(0u32));
        engine
            .tell(&r, &observer, "area", |hits: &Cell<u32>, _: &Rect| {
                hits.set(hits.get() + 1)
            })
            .unwrap();

        assert_eq!(r.area(), 6);
        assert!(r.core.invalidate_property("area"));
        assert!(!r.area.is_valid());
        assert!(!r.core.invalidate_property("width"));
        assert!(!r.core.invalidate_property("missing"));
        assert_eq!(r.core.invalidate_properties(&["width", "area"]), 1);

        assert_eq!(r.area(), 6);
        assert_eq!(r.core.invalidate_all_synthetic_properties(), 1);
        assert!(!r.area.is_valid());
        assert_eq!(r.width.get(), 2);

        engine.flush();
        assert_eq!(observer.get(), 1);
        assert_eq!(r.computed.get(), 2);
    }

    #[test]
    fn test_unknown_dependency_reported() {
        let engine = Engine::new(EngineConfig::default());
        let r = rect(&engine);
        let report = LazyProperty::depends_on(&r, &["width", "depth"], |r: &Rect| &r.area);
        assert_eq!(report.handles.len(), 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].0, "depth");
    }
}

//! Observable property cells.

use super::object::{ObjectCore, ObjectInner};
use super::Observable;
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

/// A value that can live in a [`Property`].
///
/// Values are compared with `PartialEq` on write; equal writes are
/// dropped without notifying anyone. Values that refer to another
/// observable instance report it through [`as_observable`] so that
/// multi-segment paths can be followed and re-linked.
///
/// [`as_observable`]: PropertyValue::as_observable
pub trait PropertyValue: Clone + PartialEq + 'static {
    /// The observable instance this value refers to, if any.
    fn as_observable(&self) -> Option<Rc<dyn Observable>> {
        None
    }

    /// Whether values of this type can refer to observable instances.
    /// Only such properties may appear before the last segment of a path.
    fn holds_links() -> bool {
        false
    }
}

macro_rules! plain_property_values {
    ($($ty:ty),* $(,)?) => {
        $(impl PropertyValue for $ty {})*
    };
}

plain_property_values!(
    (),
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    f32,
    f64,
    String,
    &'static str,
);

impl<T: PropertyValue> PropertyValue for Option<T> {
    fn as_observable(&self) -> Option<Rc<dyn Observable>> {
        self.as_ref().and_then(|value| value.as_observable())
    }

    fn holds_links() -> bool {
        T::holds_links()
    }
}

impl<T: PropertyValue> PropertyValue for Vec<T> {}

/// A nullable reference to another observable instance.
///
/// Equality is pointer identity: assigning a different instance is a
/// change even when the two instances hold equal data.
pub struct Link<T>(Option<Rc<T>>);

impl<T> Link<T> {
    pub fn new(target: Rc<T>) -> Self {
        Link(Some(target))
    }

    pub fn none() -> Self {
        Link(None)
    }

    pub fn get(&self) -> Option<&Rc<T>> {
        self.0.as_ref()
    }

    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }
}

impl<T> From<Rc<T>> for Link<T> {
    fn from(target: Rc<T>) -> Self {
        Link::new(target)
    }
}

impl<T> From<Option<Rc<T>>> for Link<T> {
    fn from(target: Option<Rc<T>>) -> Self {
        Link(target)
    }
}

impl<T> Clone for Link<T> {
    fn clone(&self) -> Self {
        Link(self.0.clone())
    }
}

impl<T> Default for Link<T> {
    fn default() -> Self {
        Link(None)
    }
}

impl<T> PartialEq for Link<T> {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T> fmt::Debug for Link<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(target) => write!(f, "Link({:p})", Rc::as_ptr(target)),
            None => f.write_str("Link(None)"),
        }
    }
}

impl<T: Observable> PropertyValue for Link<T> {
    fn as_observable(&self) -> Option<Rc<dyn Observable>> {
        self.0.clone().map(|target| target as Rc<dyn Observable>)
    }

    fn holds_links() -> bool {
        true
    }
}

/// Type-erased view of a property registered on an [`ObjectCore`].
pub(crate) trait Slot {
    /// Current observable reference held by the property.
    fn link(&self) -> Option<Rc<dyn Observable>>;

    fn holds_links(&self) -> bool;

    /// Drop a lazily computed value and notify its observers. Returns
    /// false for stored properties, which have nothing to invalidate.
    fn invalidate(&self) -> bool {
        false
    }
}

struct PropertyCell<T> {
    name: String,
    value: RefCell<T>,
    owner: Weak<ObjectInner>,
}

impl<T: PropertyValue> Slot for PropertyCell<T> {
    fn link(&self) -> Option<Rc<dyn Observable>> {
        self.value.borrow().as_observable()
    }

    fn holds_links(&self) -> bool {
        T::holds_links()
    }
}

/// An intercepted property.
///
/// Observed types declare their observable state as `Property` fields and
/// route every write through [`set`](Property::set) or
/// [`update`](Property::update). The write commits first and then notifies
/// the owning [`ObjectCore`], which hands the affected subscriptions to the
/// engine.
pub struct Property<T: PropertyValue> {
    cell: Rc<PropertyCell<T>>,
}

impl<T: PropertyValue> Property<T> {
    /// Declare a property named `name` on `core`.
    pub fn new(core: &ObjectCore, name: &str, initial: T) -> Self {
        let cell = Rc::new(PropertyCell {
            name: name.to_string(),
            value: RefCell::new(initial),
            owner: Rc::downgrade(core.inner()),
        });
        let slot: Rc<dyn Slot> = cell.clone();
        core.inner().register_slot(name, Rc::downgrade(&slot));
        Self { cell }
    }

    pub fn name(&self) -> &str {
        &self.cell.name
    }

    /// Clone of the current value.
    pub fn get(&self) -> T {
        self.cell.value.borrow().clone()
    }

    /// Borrow the current value without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.cell.value.borrow())
    }

    /// Write a new value. Returns false (and notifies nobody) when the new
    /// value equals the current one.
    pub fn set(&self, value: T) -> bool {
        let previous = {
            let mut current = self.cell.value.borrow_mut();
            if *current == value {
                return false;
            }
            std::mem::replace(&mut *current, value)
        };
        self.notify(Some(&previous as &dyn Any));
        true
    }

    /// Modify the value in place. Observers are notified only if the value
    /// differs from a snapshot taken before `f` ran.
    pub fn update(&self, f: impl FnOnce(&mut T)) -> bool {
        let previous = {
            let mut current = self.cell.value.borrow_mut();
            let snapshot = current.clone();
            f(&mut current);
            if *current == snapshot {
                return false;
            }
            snapshot
        };
        self.notify(Some(&previous as &dyn Any));
        true
    }

    fn notify(&self, previous: Option<&dyn Any>) {
        if let Some(owner) = self.cell.owner.upgrade() {
            ObjectInner::did_change(&owner, &self.cell.name, previous);
        }
    }
}

impl<T: PropertyValue + fmt::Debug> fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("name", &self.cell.name)
            .field("value", &*self.cell.value.borrow())
            .finish()
    }
}

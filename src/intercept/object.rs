//! Per-instance interceptor table.

use super::property::Slot;
use super::Observable;
use crate::engine::{Engine, EngineInner};
use crate::error::RegistrationError;
use crate::path::{COLLECTION_MARKER, WILDCARD};
use crate::subscriptions::{self, ObservationIndex};
use crate::types::{DeliveryMode, ObjectId};
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::{debug, trace};

type StateHook = Rc<dyn Fn(&str, bool)>;

/// What kind of node an instance is when it appears in a path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ObjectKind {
    Plain,
    Collection,
}

/// Observation state embedded in every observable instance.
///
/// Owns the instance's [`ObservationIndex`] and the reference-counted
/// interceptor table. Not clonable: exactly one core per instance, and
/// dropping it purges every subscription rooted at the instance.
pub struct ObjectCore {
    inner: Rc<ObjectInner>,
}

pub(crate) struct ObjectInner {
    id: ObjectId,
    kind: ObjectKind,
    engine: Weak<EngineInner>,
    /// Declared properties by name.
    slots: RefCell<HashMap<String, Weak<dyn Slot>>>,
    /// Installation count per intercepted key.
    interceptors: RefCell<HashMap<String, usize>>,
    pub(crate) index: RefCell<ObservationIndex>,
    state_hook: RefCell<Option<StateHook>>,
}

impl ObjectCore {
    /// Create the core for a new observable instance owned by `engine`.
    pub fn new(engine: &Engine) -> Self {
        Self::with_kind(engine, ObjectKind::Plain)
    }

    pub(crate) fn with_kind(engine: &Engine, kind: ObjectKind) -> Self {
        let shared = engine.inner();
        Self {
            inner: Rc::new(ObjectInner {
                id: shared.next_object_id(),
                kind,
                engine: Rc::downgrade(shared),
                slots: RefCell::new(HashMap::new()),
                interceptors: RefCell::new(HashMap::new()),
                index: RefCell::new(ObservationIndex::default()),
                state_hook: RefCell::new(None),
            }),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    /// The engine this instance reports to.
    pub fn engine(&self) -> Result<Engine, RegistrationError> {
        self.inner
            .engine
            .upgrade()
            .map(Engine::from_inner)
            .ok_or(RegistrationError::EngineDropped)
    }

    pub(crate) fn inner(&self) -> &Rc<ObjectInner> {
        &self.inner
    }

    /// Install an interceptor for `property` (a declared property name, `*`,
    /// or `#` on collections). Installing the same key twice shares the hook;
    /// it is removed when the last handle is dropped.
    pub fn instrument(&self, property: &str) -> Result<InterceptorHandle, RegistrationError> {
        self.inner.validate_key(property, property)?;
        Ok(ObjectInner::instrument(&self.inner, property))
    }

    /// Whether an interceptor is currently installed for `property`.
    pub fn is_instrumented(&self, property: &str) -> bool {
        self.inner.interceptors.borrow().contains_key(property)
    }

    /// Fire the observers of `property` without changing it. Deferred
    /// observers still run at the next flush.
    pub fn trigger(&self, property: &str) {
        ObjectInner::did_change(&self.inner, property, None);
    }

    /// Like [`trigger`](Self::trigger), handing `previous` to immediate
    /// observers.
    pub fn trigger_with_previous(&self, property: &str, previous: &dyn Any) {
        ObjectInner::did_change(&self.inner, property, Some(previous));
    }

    /// Called with `(property, true)` when a property gains its first
    /// interceptor and `(property, false)` when it loses its last one.
    pub fn set_observation_state_hook(&self, hook: impl Fn(&str, bool) + 'static) {
        *self.inner.state_hook.borrow_mut() = Some(Rc::new(hook));
    }

    /// Every key that currently has at least one interceptor, sorted.
    pub fn observed_properties(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.interceptors.borrow().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of live subscriptions that pass through `property` on this
    /// instance.
    pub fn observer_count(&self, property: &str) -> usize {
        self.inner.index.borrow().live_count(property)
    }

    /// Invalidate the lazily computed property `name`, notifying its
    /// observers. Returns false if `name` is not a lazy property.
    pub fn invalidate_property(&self, name: &str) -> bool {
        match self.inner.slot(name) {
            Some(slot) => slot.invalidate(),
            None => false,
        }
    }

    /// Invalidate each of `names`. Returns how many were lazy properties.
    pub fn invalidate_properties(&self, names: &[&str]) -> usize {
        names
            .iter()
            .filter(|name| self.invalidate_property(name))
            .count()
    }

    /// Invalidate every lazily computed property of this instance, in name
    /// order. Returns how many were invalidated.
    pub fn invalidate_all_synthetic_properties(&self) -> usize {
        let mut slots: Vec<(String, Rc<dyn Slot>)> = self
            .inner
            .slots
            .borrow()
            .iter()
            .filter_map(|(name, slot)| slot.upgrade().map(|slot| (name.clone(), slot)))
            .collect();
        slots.sort_by(|a, b| a.0.cmp(&b.0));
        let invalidated = slots.iter().filter(|(_, slot)| slot.invalidate()).count();
        debug!(object = %self.inner.id, invalidated, "synthetic properties invalidated");
        invalidated
    }

    /// Declared property names, sorted.
    pub fn property_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.slots.borrow().keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for ObjectCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectCore")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("observed", &self.observed_properties())
            .finish()
    }
}

impl ObjectInner {
    pub(crate) fn id(&self) -> ObjectId {
        self.id
    }

    pub(crate) fn engine(&self) -> Option<Rc<EngineInner>> {
        self.engine.upgrade()
    }

    pub(crate) fn register_slot(&self, name: &str, slot: Weak<dyn Slot>) {
        let previous = self.slots.borrow_mut().insert(name.to_string(), slot);
        debug_assert!(
            previous.map_or(true, |old| old.strong_count() == 0),
            "property {name:?} declared twice on one instance"
        );
    }

    pub(crate) fn interceptor_count(&self, key: &str) -> usize {
        self.interceptors.borrow().get(key).copied().unwrap_or(0)
    }

    fn slot(&self, name: &str) -> Option<Rc<dyn Slot>> {
        self.slots.borrow().get(name).and_then(Weak::upgrade)
    }

    /// Check that `key` can be intercepted on this instance.
    pub(crate) fn validate_key(&self, key: &str, path: &str) -> Result<(), RegistrationError> {
        match key {
            WILDCARD => Ok(()),
            COLLECTION_MARKER if self.kind == ObjectKind::Collection => Ok(()),
            COLLECTION_MARKER => Err(RegistrationError::NotACollection {
                path: path.to_string(),
            }),
            name if self.slot(name).is_some() => Ok(()),
            name => Err(RegistrationError::UnknownProperty {
                path: path.to_string(),
                property: name.to_string(),
            }),
        }
    }

    /// The observable instance currently held by `property`, for following
    /// a path past this node.
    pub(crate) fn child(
        &self,
        property: &str,
        path: &str,
    ) -> Result<Option<Rc<dyn Observable>>, RegistrationError> {
        let slot = self
            .slot(property)
            .ok_or_else(|| RegistrationError::UnknownProperty {
                path: path.to_string(),
                property: property.to_string(),
            })?;
        if !slot.holds_links() {
            return Err(RegistrationError::NotObservable {
                path: path.to_string(),
                property: property.to_string(),
            });
        }
        Ok(slot.link())
    }

    pub(crate) fn instrument(this: &Rc<Self>, key: &str) -> InterceptorHandle {
        let first = {
            let mut table = this.interceptors.borrow_mut();
            let count = table.entry(key.to_string()).or_insert(0);
            *count += 1;
            *count == 1
        };
        if first {
            debug!(object = %this.id, property = key, "interceptor installed");
            this.fire_state_hook(key, true);
        }
        InterceptorHandle {
            object: Rc::downgrade(this),
            key: key.to_string(),
        }
    }

    fn release(&self, key: &str) {
        let last = {
            let mut table = self.interceptors.borrow_mut();
            match table.get_mut(key) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    table.remove(key);
                    true
                }
                None => false,
            }
        };
        if last {
            debug!(object = %self.id, property = key, "interceptor removed");
            self.fire_state_hook(key, false);
        }
    }

    fn fire_state_hook(&self, key: &str, observed: bool) {
        let hook = self.state_hook.borrow().clone();
        if let Some(hook) = hook {
            hook(key, observed);
        }
    }

    /// Mutation hook. Runs after the new value is committed; `previous` is
    /// the value it replaced when one is available.
    pub(crate) fn did_change(this: &Rc<Self>, property: &str, previous: Option<&dyn Any>) {
        if this.interceptors.borrow().is_empty() {
            return;
        }
        let affected = this.index.borrow().affected(property);
        if affected.is_empty() {
            return;
        }
        let Some(engine) = this.engine.upgrade() else {
            return;
        };
        trace!(object = %this.id, property, count = affected.len(), "property changed");

        let mut dead = Vec::new();
        for hit in affected {
            let sub = hit.subscription;
            if !sub.is_active() {
                continue;
            }
            if !sub.parties_alive() {
                dead.push(sub);
                continue;
            }
            if hit.key_is_named && !sub.path.is_terminal(hit.depth) {
                subscriptions::relink(&sub, this, hit.depth);
            }
            match sub.mode {
                DeliveryMode::Deferred => engine.enqueue(&sub),
                DeliveryMode::Immediate => engine.deliver_immediate(&sub, previous),
            }
        }

        for sub in dead {
            debug!(subscription = %sub.id, "reaping subscription with a dropped party");
            subscriptions::teardown(&sub);
        }
    }
}

/// Reference-counted interceptor installation. Dropping the handle
/// releases one count; the hook goes away with the last one.
pub struct InterceptorHandle {
    object: Weak<ObjectInner>,
    key: String,
}

impl InterceptorHandle {
    pub fn property(&self) -> &str {
        &self.key
    }
}

impl Drop for InterceptorHandle {
    fn drop(&mut self) {
        if let Some(object) = self.object.upgrade() {
            object.release(&self.key);
        }
    }
}

impl fmt::Debug for InterceptorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorHandle")
            .field("property", &self.key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EngineConfig, Property};
    use std::cell::Cell;

    struct Widget {
        core: ObjectCore,
        width: Property<u32>,
    }

    impl Observable for Widget {
        fn core(&self) -> &ObjectCore {
            &self.core
        }
    }

    fn widget(engine: &Engine) -> Widget {
        let core = ObjectCore::new(engine);
        let width = Property::new(&core, "width", 0);
        Widget { core, width }
    }

    #[test]
    fn test_instrument_is_reference_counted() {
        let engine = Engine::new(EngineConfig::default());
        let w = widget(&engine);

        let first = w.core.instrument("width").unwrap();
        let second = w.core.instrument("width").unwrap();
        assert!(w.core.is_instrumented("width"));

        drop(first);
        assert!(w.core.is_instrumented("width"));
        drop(second);
        assert!(!w.core.is_instrumented("width"));
    }

    #[test]
    fn test_instrument_unknown_property() {
        let engine = Engine::new(EngineConfig::default());
        let w = widget(&engine);

        assert!(matches!(
            w.core.instrument("height"),
            Err(RegistrationError::UnknownProperty { .. })
        ));
        assert!(matches!(
            w.core.instrument("#"),
            Err(RegistrationError::NotACollection { .. })
        ));
        assert!(w.core.instrument("*").is_ok());
    }

    #[test]
    fn test_state_hook_fires_on_first_and_last() {
        let engine = Engine::new(EngineConfig::default());
        let w = widget(&engine);
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        w.core
            .set_observation_state_hook(move |name, on| sink.borrow_mut().push((name.to_string(), on)));

        let a = w.core.instrument("width").unwrap();
        let b = w.core.instrument("width").unwrap();
        drop(a);
        drop(b);

        assert_eq!(
            *events.borrow(),
            vec![("width".to_string(), true), ("width".to_string(), false)]
        );
    }

    #[test]
    fn test_set_does_not_alter_value_or_fire_when_equal() {
        let engine = Engine::new(EngineConfig::default());
        let w = Rc::new(widget(&engine));
        let observer = Rc::new(Cell::new(0u32));

        engine
            .tell(&w, &observer, "width", |count: &Cell<u32>, _: &Widget| {
                count.set(count.get() + 1)
            })
            .unwrap();

        assert!(w.width.set(10));
        assert!(!w.width.set(10));
        assert_eq!(w.width.get(), 10);
        engine.flush();
        assert_eq!(observer.get(), 1);

        // Equal write: nothing pending.
        w.width.set(10);
        assert_eq!(engine.pending_count(), 0);
    }

    #[test]
    fn test_trigger_fires_without_change() {
        let engine = Engine::new(EngineConfig::default());
        let w = Rc::new(widget(&engine));
        let observer = Rc::new(Cell::new(0u32));

        engine
            .tell(&w, &observer, "width", |count: &Cell<u32>, _: &Widget| {
                count.set(count.get() + 1)
            })
            .unwrap();

        w.core.trigger("width");
        engine.flush();
        assert_eq!(observer.get(), 1);
        assert_eq!(w.width.get(), 0);
    }
}

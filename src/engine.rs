//! Engine tying the registry, collector and dispatch together.

use crate::dispatch::{self, CallbackEnvelope, ChangeCollector, FlushReport};
use crate::error::{CallbackError, RegistrationError, Result};
use crate::intercept::{ObjectCore, Observable};
use crate::subscriptions::{
    self, Registration, Subscription, SubscriptionHandle, SubscriptionRegistry, TellReport,
};
use crate::types::{DeliveryMode, Generation, ObjectId, SubscriptionId};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use tracing::debug;

/// Engine configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Log a warning when the same (observed, observer, path) is registered
    /// more than once. Duplicates are still registered and delivered.
    /// Default: true
    pub warn_on_duplicate_registration: bool,

    /// Warn once per generation when this many changes are pending.
    /// Default: 10_000
    pub pending_warn_threshold: usize,

    /// Capacity of the callback error channel. Reports beyond it are dropped
    /// (they are still logged).
    /// Default: 256
    pub error_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            warn_on_duplicate_registration: true,
            pending_warn_threshold: 10_000,
            error_channel_capacity: 256,
        }
    }
}

pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    pub(crate) collector: RefCell<ChangeCollector>,
    pub(crate) registry: SubscriptionRegistry,
    pub(crate) flushing: Cell<bool>,
    next_object: Cell<u64>,
    next_subscription: Cell<u64>,
    errors_tx: Sender<CallbackError>,
    errors_rx: Receiver<CallbackError>,
}

impl EngineInner {
    pub(crate) fn next_object_id(&self) -> ObjectId {
        let id = self.next_object.get();
        self.next_object.set(id + 1);
        ObjectId(id)
    }

    pub(crate) fn next_subscription_id(&self) -> SubscriptionId {
        let id = self.next_subscription.get();
        self.next_subscription.set(id + 1);
        SubscriptionId(id)
    }

    pub(crate) fn enqueue(&self, sub: &Rc<Subscription>) {
        self.collector.borrow_mut().enqueue(sub);
    }

    pub(crate) fn deliver_immediate(&self, sub: &Rc<Subscription>, previous: Option<&dyn Any>) {
        dispatch::deliver_immediate(self, sub, previous);
    }

    pub(crate) fn report_error(&self, err: CallbackError) {
        match self.errors_tx.try_send(err) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("callback error channel full; report dropped"),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// The observation engine.
///
/// All registration, mutation and dispatch for the instances of one engine
/// happen on one thread (`Engine` is neither `Send` nor `Sync`). Cloning an
/// `Engine` gives another handle to the same state.
///
/// Hosts call [`flush`](Engine::flush) once per turn of their event loop,
/// or after each unit of work.
#[derive(Clone)]
pub struct Engine {
    inner: Rc<EngineInner>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let (errors_tx, errors_rx) = bounded(config.error_channel_capacity.max(1));
        let collector = ChangeCollector::new(config.pending_warn_threshold);
        Self {
            inner: Rc::new(EngineInner {
                config,
                collector: RefCell::new(collector),
                registry: SubscriptionRegistry::default(),
                flushing: Cell::new(false),
                next_object: Cell::new(1),
                next_subscription: Cell::new(1),
                errors_tx,
                errors_rx,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Rc<EngineInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Rc<EngineInner> {
        &self.inner
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    // --- Registration ---

    /// Call `callback` with `(observer, observed)` at the next flush after
    /// anything along `path` changes.
    pub fn tell<T, O>(
        &self,
        observed: &Rc<T>,
        observer: &Rc<O>,
        path: &str,
        callback: impl Fn(&O, &T) + 'static,
    ) -> Result<SubscriptionHandle>
    where
        T: Observable,
        O: Any,
    {
        let callback = Rc::new(CallbackEnvelope::new(callback));
        self.register(observed, observer, path, callback, DeliveryMode::Deferred, None)
            .map(|sub| SubscriptionHandle { id: sub.id })
    }

    /// Register several paths sharing one callback. Each path succeeds or
    /// fails independently. One flush calls the callback at most once, no
    /// matter how many of the paths changed.
    pub fn tell_any<T, O>(
        &self,
        observed: &Rc<T>,
        observer: &Rc<O>,
        paths: &[&str],
        callback: impl Fn(&O, &T) + 'static,
    ) -> TellReport
    where
        T: Observable,
        O: Any,
    {
        let callback = Rc::new(CallbackEnvelope::new(callback));
        self.register_many(observed, observer, paths, callback, DeliveryMode::Deferred)
    }

    /// Call `callback` from inside the setter, right after any property
    /// along `path` changes, with the value it replaced. Not coalesced.
    pub fn tell_immediate<T, O>(
        &self,
        observed: &Rc<T>,
        observer: &Rc<O>,
        path: &str,
        callback: impl Fn(&O, &T, Option<&dyn Any>) + 'static,
    ) -> Result<SubscriptionHandle>
    where
        T: Observable,
        O: Any,
    {
        let callback = Rc::new(CallbackEnvelope::with_previous(callback));
        self.register(observed, observer, path, callback, DeliveryMode::Immediate, None)
            .map(|sub| SubscriptionHandle { id: sub.id })
    }

    /// Immediate-mode variant of [`tell_any`](Self::tell_any).
    pub fn tell_any_immediate<T, O>(
        &self,
        observed: &Rc<T>,
        observer: &Rc<O>,
        paths: &[&str],
        callback: impl Fn(&O, &T, Option<&dyn Any>) + 'static,
    ) -> TellReport
    where
        T: Observable,
        O: Any,
    {
        let callback = Rc::new(CallbackEnvelope::with_previous(callback));
        self.register_many(observed, observer, paths, callback, DeliveryMode::Immediate)
    }

    fn register_many<T: Observable, O: Any>(
        &self,
        observed: &Rc<T>,
        observer: &Rc<O>,
        paths: &[&str],
        callback: Rc<CallbackEnvelope>,
        mode: DeliveryMode,
    ) -> TellReport {
        let mut report = TellReport::default();
        let mut delivery_key = None;
        for path in paths {
            match self.register(observed, observer, path, Rc::clone(&callback), mode, delivery_key) {
                Ok(sub) => {
                    delivery_key.get_or_insert(sub.delivery_key);
                    report.handles.push(SubscriptionHandle { id: sub.id });
                }
                Err(err) => report.errors.push((path.to_string(), err)),
            }
        }
        report
    }

    fn register<T: Observable, O: Any>(
        &self,
        observed: &Rc<T>,
        observer: &Rc<O>,
        path: &str,
        callback: Rc<CallbackEnvelope>,
        mode: DeliveryMode,
        delivery_key: Option<SubscriptionId>,
    ) -> Result<Rc<Subscription>> {
        let root = Rc::clone(observed.core().inner());
        match root.engine() {
            Some(owner) if Rc::ptr_eq(&owner, &self.inner) => {}
            Some(_) => return Err(RegistrationError::ForeignEngine.into()),
            None => return Err(RegistrationError::EngineDropped.into()),
        }

        let observed: Weak<dyn Any> = Rc::downgrade(observed) as Weak<T>;
        let observer: Weak<dyn Any> = Rc::downgrade(observer) as Weak<O>;
        subscriptions::register(
            &self.inner,
            Registration {
                root,
                observed,
                observer,
                path,
                callback,
                mode,
                delivery_key,
            },
        )
    }

    // --- Cancellation ---

    /// Cancel one subscription. Returns false if it was already gone.
    pub fn unregister(&self, handle: SubscriptionHandle) -> bool {
        let Some(sub) = self.inner.registry.get(handle.id) else {
            return false;
        };
        self.inner.registry.remove(sub.id);
        subscriptions::teardown(&sub);
        debug!(subscription = %sub.id, "subscription cancelled");
        true
    }

    /// Cancel every subscription sharing `handle`'s callback, such as all
    /// paths of one [`tell_any`](Self::tell_any) call. Returns 0 if the
    /// handle is already gone.
    pub fn stop_all_calls_to(&self, handle: SubscriptionHandle) -> usize {
        let Some(sub) = self.inner.registry.get(handle.id) else {
            return 0;
        };
        let callback = Rc::clone(&sub.callback);
        let removed = self
            .inner
            .registry
            .remove_where(|sub| Rc::ptr_eq(&sub.callback, &callback));
        debug!(subscription = %handle.id, removed, "callback cancelled everywhere");
        removed
    }

    /// Cancel every subscription made by `observer`, on any instance.
    pub fn stop_telling<O: Any>(&self, observer: &Rc<O>) -> usize {
        let observer = Rc::as_ptr(observer) as *const ();
        self.inner
            .registry
            .remove_where(|sub| sub.observer_is(observer))
    }

    /// Cancel every subscription `observer` holds on `observed`.
    pub fn stop_telling_about<O: Any, T: Observable>(
        &self,
        observer: &Rc<O>,
        observed: &T,
    ) -> usize {
        let observer = Rc::as_ptr(observer) as *const ();
        let root = observed.core().id();
        self.inner
            .registry
            .remove_where(|sub| sub.root == root && sub.observer_is(observer))
    }

    /// Cancel `observer`'s subscriptions on `observed` for exactly `path`.
    pub fn stop_telling_about_path<O: Any, T: Observable>(
        &self,
        observer: &Rc<O>,
        observed: &T,
        path: &str,
    ) -> usize {
        self.stop_telling_about_paths(observer, observed, &[path])
    }

    /// Cancel `observer`'s subscriptions on `observed` for any of `paths`.
    pub fn stop_telling_about_paths<O: Any, T: Observable>(
        &self,
        observer: &Rc<O>,
        observed: &T,
        paths: &[&str],
    ) -> usize {
        let observer = Rc::as_ptr(observer) as *const ();
        let root = observed.core().id();
        self.inner.registry.remove_where(|sub| {
            sub.root == root
                && sub.observer_is(observer)
                && paths.iter().any(|path| sub.path.as_str() == *path)
        })
    }

    /// Cancel every subscription rooted at `observed`, whoever the observer.
    pub fn unregister_observed<T: Observable>(&self, observed: &T) -> usize {
        let root = observed.core().id();
        self.inner.registry.remove_where(|sub| sub.root == root)
    }

    // --- Dispatch ---

    /// Deliver every change collected since the previous flush. Changes
    /// made by the callbacks themselves wait for the next flush. Calling
    /// `flush` from inside a callback does nothing.
    pub fn flush(&self) -> FlushReport {
        dispatch::flush(&self.inner)
    }

    /// Number of deliveries waiting for the next flush.
    pub fn pending_count(&self) -> usize {
        self.inner.collector.borrow().len()
    }

    /// The generation the next flush will deliver.
    pub fn generation(&self) -> Generation {
        self.inner.collector.borrow().generation()
    }

    /// Tear down every subscription whose observer or observed instance has
    /// been dropped, releasing its interceptors. [`flush`](Self::flush) does
    /// this on its own; returns how many were removed.
    pub fn reap(&self) -> usize {
        self.inner.registry.reap()
    }

    /// Number of active subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Receiver for callback failures caught during dispatch.
    pub fn errors(&self) -> Receiver<CallbackError> {
        self.inner.errors_rx.clone()
    }

    // --- Diagnostics ---

    /// Describe every interceptor and subscription on `core`'s instance.
    pub fn debug_report(&self, core: &ObjectCore) -> ObserverReport {
        let inner = core.inner();
        let snapshot = inner.index.borrow().snapshot();
        let properties = snapshot
            .into_iter()
            .map(|(property, subs)| PropertyReport {
                interceptors: inner.interceptor_count(&property),
                subscriptions: subs
                    .into_iter()
                    .filter(|(sub, _)| sub.is_active())
                    .map(|(sub, depth)| SubscriptionReport {
                        id: sub.id,
                        path: sub.path.to_string(),
                        depth,
                        linked_depth: sub.depth_reached(),
                        mode: sub.mode,
                        rooted_here: sub.root == inner.id(),
                        observer_type: sub.callback.observer_type_name().to_string(),
                        observer_alive: sub.observer.strong_count() > 0,
                    })
                    .collect(),
                property,
            })
            .collect();
        ObserverReport {
            object: inner.id(),
            rooted_subscriptions: inner.index.borrow().rooted().len(),
            properties,
        }
    }

    /// Pretty JSON rendering of [`debug_report`](Self::debug_report).
    pub fn debug_show_all_observers(&self, core: &ObjectCore) -> String {
        serde_json::to_string_pretty(&self.debug_report(core))
            .unwrap_or_else(|e| format!("<unrenderable observer report: {e}>"))
    }
}

/// Observation state of one instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObserverReport {
    pub object: ObjectId,
    /// Subscriptions whose path starts at this instance.
    pub rooted_subscriptions: usize,
    pub properties: Vec<PropertyReport>,
}

/// Interceptor and subscriptions for one intercepted key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PropertyReport {
    pub property: String,
    pub interceptors: usize,
    pub subscriptions: Vec<SubscriptionReport>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubscriptionReport {
    pub id: SubscriptionId,
    pub path: String,
    /// Depth at which this instance sits on the path.
    pub depth: usize,
    /// How far down the path the subscription is currently linked.
    pub linked_depth: usize,
    pub mode: DeliveryMode,
    pub rooted_here: bool,
    pub observer_type: String,
    pub observer_alive: bool,
}

/// Registration methods on the observed instance itself.
///
/// ```ignore
/// model.tell(&view, "title", |view, model| view.render(&model.title.get()))?;
/// ```
pub trait Tell<T: Observable> {
    fn tell<O: Any>(
        &self,
        observer: &Rc<O>,
        path: &str,
        callback: impl Fn(&O, &T) + 'static,
    ) -> Result<SubscriptionHandle>;

    fn tell_any<O: Any>(
        &self,
        observer: &Rc<O>,
        paths: &[&str],
        callback: impl Fn(&O, &T) + 'static,
    ) -> TellReport;

    fn tell_immediate<O: Any>(
        &self,
        observer: &Rc<O>,
        path: &str,
        callback: impl Fn(&O, &T, Option<&dyn Any>) + 'static,
    ) -> Result<SubscriptionHandle>;

    /// Cancel everything `observer` holds on this instance.
    fn stop_telling<O: Any>(&self, observer: &Rc<O>) -> usize;
}

impl<T: Observable> Tell<T> for Rc<T> {
    fn tell<O: Any>(
        &self,
        observer: &Rc<O>,
        path: &str,
        callback: impl Fn(&O, &T) + 'static,
    ) -> Result<SubscriptionHandle> {
        self.core().engine()?.tell(self, observer, path, callback)
    }

    fn tell_any<O: Any>(
        &self,
        observer: &Rc<O>,
        paths: &[&str],
        callback: impl Fn(&O, &T) + 'static,
    ) -> TellReport {
        match self.core().engine() {
            Ok(engine) => engine.tell_any(self, observer, paths, callback),
            Err(err) => TellReport {
                handles: Vec::new(),
                errors: paths
                    .iter()
                    .map(|path| (path.to_string(), err.clone().into()))
                    .collect(),
            },
        }
    }

    fn tell_immediate<O: Any>(
        &self,
        observer: &Rc<O>,
        path: &str,
        callback: impl Fn(&O, &T, Option<&dyn Any>) + 'static,
    ) -> Result<SubscriptionHandle> {
        self.core()
            .engine()?
            .tell_immediate(self, observer, path, callback)
    }

    fn stop_telling<O: Any>(&self, observer: &Rc<O>) -> usize {
        match self.core().engine() {
            Ok(engine) => engine.stop_telling_about(observer, &**self),
            Err(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Property;

    struct Counter {
        core: ObjectCore,
        value: Property<i64>,
    }

    impl Observable for Counter {
        fn core(&self) -> &ObjectCore {
            &self.core
        }
    }

    fn counter(engine: &Engine) -> Rc<Counter> {
        let core = ObjectCore::new(engine);
        let value = Property::new(&core, "value", 0);
        Rc::new(Counter { core, value })
    }

    #[test]
    fn test_config_defaults_roundtrip_json() {
        let config: EngineConfig = serde_json::from_str(r#"{"pending_warn_threshold": 5}"#).unwrap();
        assert_eq!(config.pending_warn_threshold, 5);
        assert!(config.warn_on_duplicate_registration);
        assert_eq!(config.error_channel_capacity, 256);
    }

    #[test]
    fn test_foreign_engine_rejected() {
        let a = Engine::new(EngineConfig::default());
        let b = Engine::new(EngineConfig::default());
        let model = counter(&a);
        let observer = Rc::new(());

        let result = b.tell(&model, &observer, "value", |_: &(), _: &Counter| {});
        assert!(matches!(
            result,
            Err(crate::ObserveError::Registration(RegistrationError::ForeignEngine))
        ));
    }

    #[test]
    fn test_generation_advances_per_flush() {
        let engine = Engine::new(EngineConfig::default());
        let start = engine.generation();
        let report = engine.flush();
        assert_eq!(report.generation, start);
        assert_eq!(engine.generation(), start.next());
    }

    #[test]
    fn test_debug_report_lists_subscriptions() {
        let engine = Engine::new(EngineConfig::default());
        let model = counter(&engine);
        let observer = Rc::new(());

        model
            .tell(&observer, "value", |_: &(), _: &Counter| {})
            .unwrap();

        let report = engine.debug_report(&model.core);
        assert_eq!(report.rooted_subscriptions, 1);
        assert_eq!(report.properties.len(), 1);
        assert_eq!(report.properties[0].property, "value");
        assert_eq!(report.properties[0].interceptors, 1);
        assert_eq!(report.properties[0].subscriptions[0].path, "value");

        let rendered = engine.debug_show_all_observers(&model.core);
        assert!(rendered.contains("\"property\": \"value\""));
    }
}

//! One-way property bindings.
//!
//! A [`Protocol`] lists properties shared by an observed type and a
//! receiver type. Binding copies each listed property from the observed
//! instance to the receiver right away and again whenever it changes.
//! Copies happen in immediate mode, from inside the observed setter.
//!
//! ```ignore
//! let titled = Protocol::new()
//!     .property("title", |d: &Document| &d.title, |v: &Preview| &v.title)
//!     .property("dirty", |d: &Document| &d.dirty, |v: &Preview| &v.dirty);
//!
//! engine.bind(&preview, &document, &titled);
//! engine.unbind(&preview, &document, &titled);
//! ```

use crate::engine::Engine;
use crate::intercept::{Observable, Property, PropertyValue};
use crate::subscriptions::TellReport;
use std::any::Any;
use std::rc::Rc;
use tracing::debug;

type Apply<T, R> = Rc<dyn Fn(&R, &T)>;

struct PropertyBinding<T, R> {
    name: String,
    apply: Apply<T, R>,
}

/// Properties bound together by [`Engine::bind`].
pub struct Protocol<T, R> {
    bindings: Vec<PropertyBinding<T, R>>,
}

impl<T: Observable, R: Any> Protocol<T, R> {
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    /// Bind the receiver's `target` property to the observed `source`
    /// property named `name`.
    pub fn property<V: PropertyValue>(
        mut self,
        name: &str,
        source: fn(&T) -> &Property<V>,
        target: fn(&R) -> &Property<V>,
    ) -> Self {
        self.bindings.push(PropertyBinding {
            name: name.to_string(),
            apply: Rc::new(move |receiver: &R, observed: &T| {
                source(observed).with(|value| target(receiver).set(value.clone()));
            }),
        });
        self
    }

    /// Bound property names, in declaration order.
    pub fn names(&self) -> Vec<&str> {
        self.bindings.iter().map(|b| b.name.as_str()).collect()
    }
}

impl<T: Observable, R: Any> Default for Protocol<T, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Keep `receiver` in sync with `observed` for every property of
    /// `protocol`. Each property is copied once now and then on every
    /// change. Properties that cannot be observed are reported and skipped.
    pub fn bind<R: Any, T: Observable>(
        &self,
        receiver: &Rc<R>,
        observed: &Rc<T>,
        protocol: &Protocol<T, R>,
    ) -> TellReport {
        let mut report = TellReport::default();
        for binding in &protocol.bindings {
            let apply = Rc::clone(&binding.apply);
            let registered = self.tell_immediate(
                observed,
                receiver,
                &binding.name,
                move |receiver: &R, observed: &T, _: Option<&dyn Any>| apply(receiver, observed),
            );
            match registered {
                Ok(handle) => {
                    (binding.apply)(receiver, observed);
                    report.handles.push(handle);
                }
                Err(err) => report.errors.push((binding.name.clone(), err)),
            }
        }
        debug!(
            object = %observed.core().id(),
            bound = report.handles.len(),
            failed = report.errors.len(),
            "protocol bound"
        );
        report
    }

    /// Stop updating `receiver` from `observed` for every property of
    /// `protocol`. Unbinding what was never bound is fine. Returns how many
    /// subscriptions were removed.
    pub fn unbind<R: Any, T: Observable>(
        &self,
        receiver: &Rc<R>,
        observed: &T,
        protocol: &Protocol<T, R>,
    ) -> usize {
        self.stop_telling_about_paths(receiver, observed, &protocol.names())
    }
}

//! Type-erased callback storage.

use crate::error::InvariantViolation;
use std::any::{type_name, Any, TypeId};
use std::fmt;

type ErasedCallback = Box<dyn Fn(&dyn Any, &dyn Any, Option<&dyn Any>)>;

/// A statically typed `(observer, observed)` callback behind a uniform
/// `(&dyn Any, &dyn Any)` signature.
///
/// The concrete types are recorded at construction and checked on every
/// invocation. A mismatch can only come from an engine bug and panics.
pub struct CallbackEnvelope {
    observer_type: TypeId,
    observed_type: TypeId,
    observer_name: &'static str,
    observed_name: &'static str,
    call: ErasedCallback,
}

impl CallbackEnvelope {
    /// Wrap a deferred-style callback.
    pub fn new<O: Any, T: Any>(callback: impl Fn(&O, &T) + 'static) -> Self {
        Self::with_previous(move |observer: &O, observed: &T, _: Option<&dyn Any>| {
            callback(observer, observed)
        })
    }

    /// Wrap a callback that also receives the previous value of the
    /// property that changed, when one is available.
    pub fn with_previous<O: Any, T: Any>(
        callback: impl Fn(&O, &T, Option<&dyn Any>) + 'static,
    ) -> Self {
        Self {
            observer_type: TypeId::of::<O>(),
            observed_type: TypeId::of::<T>(),
            observer_name: type_name::<O>(),
            observed_name: type_name::<T>(),
            call: Box::new(move |observer: &dyn Any, observed: &dyn Any, previous: Option<&dyn Any>| {
                if let (Some(observer), Some(observed)) =
                    (observer.downcast_ref::<O>(), observed.downcast_ref::<T>())
                {
                    callback(observer, observed, previous);
                }
            }),
        }
    }

    /// Verify that the parties have the recorded concrete types.
    pub fn check(&self, observer: &dyn Any, observed: &dyn Any) -> Result<(), InvariantViolation> {
        let observer_matches = observer.type_id() == self.observer_type;
        let observed_matches = observed.type_id() == self.observed_type;
        if observer_matches && observed_matches {
            Ok(())
        } else {
            Err(InvariantViolation {
                expected_observer: self.observer_name,
                expected_observed: self.observed_name,
                observer_matches,
                observed_matches,
            })
        }
    }

    /// Invoke the callback.
    ///
    /// # Panics
    ///
    /// Panics if the parties do not have the types recorded at construction.
    pub fn invoke(&self, observer: &dyn Any, observed: &dyn Any, previous: Option<&dyn Any>) {
        if let Err(violation) = self.check(observer, observed) {
            panic!("{violation}");
        }
        (self.call)(observer, observed, previous);
    }

    pub fn observer_type_name(&self) -> &'static str {
        self.observer_name
    }

    pub fn observed_type_name(&self) -> &'static str {
        self.observed_name
    }
}

impl fmt::Debug for CallbackEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackEnvelope")
            .field("observer", &self.observer_name)
            .field("observed", &self.observed_name)
            .finish()
    }
}

//! Subscription types.

use crate::dispatch::CallbackEnvelope;
use crate::error::ObserveError;
use crate::intercept::{InterceptorHandle, ObjectInner};
use crate::path::PropertyPath;
use crate::types::{DeliveryMode, ObjectId, SubscriptionId};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::Arc;

/// Internal subscription state.
pub(crate) struct Subscription {
    pub(crate) id: SubscriptionId,
    /// Coalescing key. Subscriptions created by one multi-path registration
    /// share it, so their callback runs at most once per flush.
    pub(crate) delivery_key: SubscriptionId,
    pub(crate) path: Arc<PropertyPath>,
    /// Instance the path is rooted at.
    pub(crate) root: ObjectId,
    pub(crate) observer: Weak<dyn Any>,
    pub(crate) observed: Weak<dyn Any>,
    pub(crate) callback: Rc<CallbackEnvelope>,
    pub(crate) mode: DeliveryMode,
    active: Cell<bool>,
    /// Installed chain, in increasing depth order.
    pub(crate) links: RefCell<Vec<ChainLink>>,
}

impl Subscription {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: SubscriptionId,
        delivery_key: SubscriptionId,
        path: Arc<PropertyPath>,
        root: ObjectId,
        observer: Weak<dyn Any>,
        observed: Weak<dyn Any>,
        callback: Rc<CallbackEnvelope>,
        mode: DeliveryMode,
    ) -> Self {
        Self {
            id,
            delivery_key,
            path,
            root,
            observer,
            observed,
            callback,
            mode,
            active: Cell::new(true),
            links: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.get()
    }

    pub(crate) fn deactivate(&self) {
        self.active.set(false);
    }

    /// Both the observer and the observed instance are still alive.
    pub(crate) fn parties_alive(&self) -> bool {
        self.observer.strong_count() > 0 && self.observed.strong_count() > 0
    }

    /// Pointer identity check against an observer. Works after the
    /// observer has been dropped.
    pub(crate) fn observer_is(&self, observer: *const ()) -> bool {
        Weak::as_ptr(&self.observer) as *const () == observer
    }

    /// Observer address. Stable while the subscription holds its `Weak`.
    pub(crate) fn observer_addr(&self) -> usize {
        Weak::as_ptr(&self.observer) as *const () as usize
    }

    pub(crate) fn depth_reached(&self) -> usize {
        self.links.borrow().last().map_or(0, |link| link.depth + 1)
    }
}

/// One installed interceptor plus index entry along a subscription's path.
pub(crate) struct ChainLink {
    pub(crate) depth: usize,
    pub(crate) key: String,
    pub(crate) node: Weak<ObjectInner>,
    pub(crate) subscription: SubscriptionId,
    pub(crate) _handle: InterceptorHandle,
}

impl Drop for ChainLink {
    fn drop(&mut self) {
        if let Some(node) = self.node.upgrade() {
            let removed = node
                .index
                .borrow_mut()
                .detach(&self.key, self.subscription, self.depth);
            // Released outside the borrow: this may drop the subscription.
            drop(removed);
        }
    }
}

/// Handle to a registered subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
}

/// Outcome of a multi-path registration. Valid paths are registered even
/// when others fail.
#[derive(Debug, Default)]
pub struct TellReport {
    /// One handle per successfully registered path, in input order.
    pub handles: Vec<SubscriptionHandle>,
    /// Paths that could not be registered, with the reason.
    pub errors: Vec<(String, ObserveError)>,
}

impl TellReport {
    /// True if every path was registered.
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

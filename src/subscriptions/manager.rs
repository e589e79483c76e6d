//! Subscription registration, path chaining and teardown.

use super::index::{IndexEntry, SubscriptionRef};
use super::types::{ChainLink, Subscription};
use crate::dispatch::CallbackEnvelope;
use crate::engine::EngineInner;
use crate::error::{RegistrationError, Result};
use crate::intercept::ObjectInner;
use crate::path::{resolve, Segment};
use crate::types::{DeliveryMode, SubscriptionId};
use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Everything needed to register one path.
pub(crate) struct Registration<'a> {
    pub(crate) root: Rc<ObjectInner>,
    pub(crate) observed: Weak<dyn Any>,
    pub(crate) observer: Weak<dyn Any>,
    pub(crate) path: &'a str,
    pub(crate) callback: Rc<CallbackEnvelope>,
    pub(crate) mode: DeliveryMode,
    /// Shared coalescing key for multi-path registrations.
    pub(crate) delivery_key: Option<SubscriptionId>,
}

/// Weak lookup table of every subscription an engine has created.
/// Subscriptions themselves are owned by their root instance.
#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    by_id: RefCell<BTreeMap<SubscriptionId, Weak<Subscription>>>,
}

impl SubscriptionRegistry {
    fn insert(&self, sub: &Rc<Subscription>) {
        self.by_id.borrow_mut().insert(sub.id, Rc::downgrade(sub));
    }

    pub(crate) fn get(&self, id: SubscriptionId) -> Option<Rc<Subscription>> {
        self.by_id
            .borrow()
            .get(&id)
            .and_then(Weak::upgrade)
            .filter(|sub| sub.is_active())
    }

    pub(crate) fn remove(&self, id: SubscriptionId) {
        self.by_id.borrow_mut().remove(&id);
    }

    /// Prune the table. Returns the live subscriptions in registration
    /// order, plus active ones whose observer or observed instance is gone.
    fn sweep(&self) -> (Vec<Rc<Subscription>>, Vec<Rc<Subscription>>) {
        let mut by_id = self.by_id.borrow_mut();
        let mut live = Vec::with_capacity(by_id.len());
        let mut orphaned = Vec::new();
        by_id.retain(|_, weak| match weak.upgrade() {
            Some(sub) if sub.is_active() && sub.parties_alive() => {
                live.push(sub);
                true
            }
            Some(sub) if sub.is_active() => {
                orphaned.push(sub);
                false
            }
            _ => false,
        });
        (live, orphaned)
    }

    /// Live subscriptions in registration order. Subscriptions with a
    /// dropped party are torn down on the way.
    pub(crate) fn live(&self) -> Vec<Rc<Subscription>> {
        let (live, orphaned) = self.sweep();
        reap_all(&orphaned);
        live
    }

    /// Tear down every subscription whose observer or observed instance has
    /// been dropped. Returns how many were removed.
    pub(crate) fn reap(&self) -> usize {
        let (_, orphaned) = self.sweep();
        reap_all(&orphaned);
        orphaned.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.live().len()
    }

    /// Tear down every active subscription matching `filter`. Returns how
    /// many were removed.
    pub(crate) fn remove_where(&self, filter: impl Fn(&Subscription) -> bool) -> usize {
        let doomed: Vec<Rc<Subscription>> =
            self.live().into_iter().filter(|sub| filter(sub)).collect();
        for sub in &doomed {
            self.remove(sub.id);
            teardown(sub);
        }
        doomed.len()
    }
}

fn reap_all(orphaned: &[Rc<Subscription>]) {
    for sub in orphaned {
        debug!(subscription = %sub.id, path = %sub.path, "reaping subscription with a dropped party");
        teardown(sub);
    }
}

/// Resolve the path, build the subscription and instrument its chain.
/// On failure everything installed so far is rolled back.
pub(crate) fn register(engine: &EngineInner, request: Registration<'_>) -> Result<Rc<Subscription>> {
    let path = resolve(request.path)?;

    let observer = Weak::as_ptr(&request.observer) as *const () as usize;
    if engine.config.warn_on_duplicate_registration
        && request.root.index.borrow().has_rooted(observer, &path)
    {
        warn!(
            object = %request.root.id(),
            path = %path,
            "duplicate registration; the callback will be delivered once per registration"
        );
    }

    let id = engine.next_subscription_id();
    let sub = Rc::new(Subscription::new(
        id,
        request.delivery_key.unwrap_or(id),
        path,
        request.root.id(),
        request.observer,
        request.observed,
        request.callback,
        request.mode,
    ));

    if let Err(err) = install_chain(&sub, Rc::clone(&request.root), 0) {
        debug!(subscription = %id, path = %sub.path, error = %err, "registration rolled back");
        teardown(&sub);
        return Err(err.into());
    }

    engine.registry.insert(&sub);
    debug!(
        subscription = %id,
        object = %sub.root,
        path = %sub.path,
        mode = ?sub.mode,
        "subscription registered"
    );
    Ok(sub)
}

/// Instrument `sub`'s path starting at `node`, which sits at `depth`.
///
/// Stops without error at a `None` link. Links installed before a failure
/// stay in `sub.links` for the caller to roll back or keep.
pub(crate) fn install_chain(
    sub: &Rc<Subscription>,
    mut node: Rc<ObjectInner>,
    mut depth: usize,
) -> std::result::Result<(), RegistrationError> {
    let path = Arc::clone(&sub.path);
    loop {
        let Some(segment) = path.segment(depth) else {
            return Ok(());
        };
        let key = segment.key();
        node.validate_key(key, path.as_str())?;

        let terminal = path.is_terminal(depth);
        // Resolve the next node before installing anything here, so a bad
        // intermediate property fails without a half-installed link.
        let next = match segment {
            Segment::Named(name) if !terminal => node.child(name, path.as_str())?,
            _ => None,
        };

        let handle = ObjectInner::instrument(&node, key);
        let subscription = if depth == 0 {
            SubscriptionRef::Owned(Rc::clone(sub))
        } else {
            SubscriptionRef::Linked(Rc::downgrade(sub))
        };
        node.index.borrow_mut().attach(
            key,
            IndexEntry {
                id: sub.id,
                depth,
                subscription,
            },
        );
        sub.links.borrow_mut().push(ChainLink {
            depth,
            key: key.to_string(),
            node: Rc::downgrade(&node),
            subscription: sub.id,
            _handle: handle,
        });

        if terminal {
            return Ok(());
        }
        let Some(next) = next else {
            trace!(subscription = %sub.id, depth, "chain stops at an empty link");
            return Ok(());
        };
        node = Rc::clone(next.core().inner());
        depth += 1;
    }
}

/// Re-link the part of `sub`'s chain past `node` (at `depth`) after the
/// property it follows there changed value.
pub(crate) fn relink(sub: &Rc<Subscription>, node: &Rc<ObjectInner>, depth: usize) {
    let stale: Vec<ChainLink> = {
        let mut links = sub.links.borrow_mut();
        let keep = links
            .iter()
            .position(|link| link.depth > depth)
            .unwrap_or(links.len());
        links.split_off(keep)
    };
    trace!(subscription = %sub.id, depth, removed = stale.len(), "relinking path");
    drop(stale);

    let Some(Segment::Named(name)) = sub.path.segment(depth) else {
        return;
    };
    let next = match node.child(name, sub.path.as_str()) {
        Ok(Some(next)) => next,
        Ok(None) => return,
        Err(err) => {
            warn!(subscription = %sub.id, error = %err, "cannot follow changed link");
            return;
        }
    };
    let next = Rc::clone(next.core().inner());
    if let Err(err) = install_chain(sub, next, depth + 1) {
        warn!(
            subscription = %sub.id,
            path = %sub.path,
            error = %err,
            "path truncated after relink"
        );
    }
}

/// Deactivate `sub` and remove every interceptor and index entry it holds.
/// No callback runs.
pub(crate) fn teardown(sub: &Rc<Subscription>) {
    sub.deactivate();
    let links = std::mem::take(&mut *sub.links.borrow_mut());
    drop(links);
}

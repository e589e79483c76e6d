//! Pending change collection.

use crate::error::CallbackError;
use crate::subscriptions::Subscription;
use crate::types::{Generation, SubscriptionId};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};
use tracing::warn;

/// A delivery waiting for the next flush.
pub(crate) struct PendingChange {
    /// Every member of the delivery group that fired, in firing order.
    members: Vec<Weak<Subscription>>,
    pub(crate) observed: Weak<dyn Any>,
    pub(crate) generation: Generation,
}

impl PendingChange {
    /// The first member that can still deliver. A group keeps delivering
    /// when one of its paths is cancelled after firing.
    pub(crate) fn deliverable(&self) -> Option<Rc<Subscription>> {
        self.members
            .iter()
            .filter_map(Weak::upgrade)
            .find(|sub| sub.is_active())
    }
}

/// Accumulates fired subscriptions for the current generation.
///
/// Keyed by delivery key: a subscription (or group of subscriptions sharing
/// a callback) firing several times within one generation is delivered once.
/// Iteration order is key order, which is registration order.
pub(crate) struct ChangeCollector {
    generation: Generation,
    pending: BTreeMap<SubscriptionId, PendingChange>,
    warn_threshold: usize,
    warned: bool,
}

impl ChangeCollector {
    pub(crate) fn new(warn_threshold: usize) -> Self {
        Self {
            generation: Generation::default(),
            pending: BTreeMap::new(),
            warn_threshold,
            warned: false,
        }
    }

    pub(crate) fn generation(&self) -> Generation {
        self.generation
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    /// Add `sub` to the current bucket. Returns false if it was coalesced
    /// into an entry already pending for this generation.
    pub(crate) fn enqueue(&mut self, sub: &Rc<Subscription>) -> bool {
        let generation = self.generation;
        let added = match self.pending.get_mut(&sub.delivery_key) {
            Some(existing) => {
                let known = existing
                    .members
                    .iter()
                    .any(|member| std::ptr::eq(member.as_ptr(), Rc::as_ptr(sub)));
                if !known {
                    existing.members.push(Rc::downgrade(sub));
                }
                false
            }
            None => {
                self.pending.insert(
                    sub.delivery_key,
                    PendingChange {
                        members: vec![Rc::downgrade(sub)],
                        observed: sub.observed.clone(),
                        generation,
                    },
                );
                true
            }
        };

        if !self.warned && self.pending.len() > self.warn_threshold {
            self.warned = true;
            warn!(
                generation = ?generation,
                pending = self.pending.len(),
                "change collector is growing; is flush() being called?"
            );
        }
        added
    }

    /// Swap out the current bucket and start the next generation.
    pub(crate) fn take(&mut self) -> (Generation, Vec<PendingChange>) {
        let generation = self.generation;
        let bucket = std::mem::take(&mut self.pending);
        self.generation = generation.next();
        self.warned = false;
        (generation, bucket.into_values().collect())
    }
}

/// Summary of one flush.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushReport {
    /// Generation that was delivered.
    pub generation: Generation,
    /// Callbacks that ran to completion.
    pub delivered: usize,
    /// Pending entries dropped because a party was gone or the
    /// subscription was cancelled.
    pub skipped: usize,
    /// Callbacks that panicked.
    pub failed: Vec<CallbackError>,
    /// Subscriptions torn down because their observer or observed instance
    /// was dropped.
    pub reaped: usize,
}

impl FlushReport {
    pub(crate) fn empty(generation: Generation) -> Self {
        Self {
            generation,
            ..Default::default()
        }
    }

    /// Number of callbacks that were invoked, successful or not.
    pub fn invoked(&self) -> usize {
        self.delivered + self.failed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::CallbackEnvelope;
    use crate::path::resolve;
    use crate::types::{DeliveryMode, ObjectId};

    fn subscription(id: u64, delivery_key: u64) -> Rc<Subscription> {
        let observed: Rc<dyn Any> = Rc::new(());
        Rc::new(Subscription::new(
            SubscriptionId(id),
            SubscriptionId(delivery_key),
            resolve("value").unwrap(),
            ObjectId(1),
            Weak::<()>::new(),
            Rc::downgrade(&observed),
            Rc::new(CallbackEnvelope::new(|_: &(), _: &()| {})),
            DeliveryMode::Deferred,
        ))
    }

    #[test]
    fn test_enqueue_coalesces_by_delivery_key() {
        let mut collector = ChangeCollector::new(100);
        let a = subscription(1, 1);
        let b = subscription(2, 1);
        let c = subscription(3, 3);

        assert!(collector.enqueue(&c));
        assert!(collector.enqueue(&a));
        assert!(!collector.enqueue(&a));
        assert!(!collector.enqueue(&b));
        assert_eq!(collector.len(), 2);

        let (generation, bucket) = collector.take();
        assert_eq!(generation, Generation::default());
        assert_eq!(collector.generation(), generation.next());
        assert_eq!(collector.len(), 0);

        // Key order, i.e. registration order.
        let first: Vec<SubscriptionId> = bucket
            .iter()
            .filter_map(|change| change.deliverable())
            .map(|sub| sub.id)
            .collect();
        assert_eq!(first, vec![SubscriptionId(1), SubscriptionId(3)]);
    }

    #[test]
    fn test_group_falls_back_to_next_member() {
        let mut collector = ChangeCollector::new(100);
        let a = subscription(1, 1);
        let b = subscription(2, 1);

        collector.enqueue(&a);
        collector.enqueue(&b);
        a.deactivate();

        let (_, bucket) = collector.take();
        let sub = bucket[0].deliverable().unwrap();
        assert_eq!(sub.id, SubscriptionId(2));
    }
}

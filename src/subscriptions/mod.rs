//! Subscription registry.
//!
//! A subscription ties one resolved path on one observed instance to one
//! observer and a type-erased callback. Ownership follows the observed
//! instance:
//! - the root instance's [`ObservationIndex`] owns the subscription
//! - every other node on the path holds a weak entry
//! - the registry, the collector and all handles are weak or id-based
//!
//! Dropping the observed instance therefore destroys its subscriptions
//! without running any callback. A dropped observer is detected at the next
//! mutation or flush and its subscriptions are reaped the same way.
//!
//! Multi-segment paths are re-linked whenever an intermediate property
//! changes: the chain past that node is torn down and rebuilt from the new
//! value.

mod index;
mod manager;
mod types;

pub(crate) use index::ObservationIndex;
pub(crate) use manager::{register, relink, teardown, Registration, SubscriptionRegistry};
pub(crate) use types::Subscription;
pub use types::{SubscriptionHandle, TellReport};

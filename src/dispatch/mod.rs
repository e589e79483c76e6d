//! Change collection and deferred dispatch.
//!
//! Mutations do not run callbacks directly. Affected subscriptions are
//! placed in the collector's current bucket, coalesced per delivery key,
//! and delivered once when the host calls [`Engine::flush`] (once per event
//! loop turn, or after each unit of work in hosts without a run loop).
//!
//! A flush swaps the bucket out before delivering anything, so callbacks
//! that mutate observed properties land in the next generation. A callback
//! that panics is caught at the flush boundary, reported, and does not
//! stop the rest of the bucket.
//!
//! [`Engine::flush`]: crate::Engine::flush

mod collector;
mod envelope;
mod flush;

pub(crate) use collector::ChangeCollector;
pub use collector::FlushReport;
pub use envelope::CallbackEnvelope;
pub(crate) use flush::{deliver_immediate, flush};

//! Error types for the observation engine.

use crate::types::SubscriptionId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A property path string could not be parsed.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Empty property path")]
    Empty,

    #[error("Invalid segment {segment:?} in path {path:?}")]
    InvalidSegment { path: String, segment: String },

    #[error("Wildcard or collection marker before the final segment of {path:?}")]
    WildcardNotTerminal { path: String },
}

/// Instrumenting a path on live instances failed. Anything installed for
/// the registration has already been rolled back when this is returned.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("Unknown property {property:?} (path {path:?})")]
    UnknownProperty { path: String, property: String },

    #[error("Property {property:?} does not hold an observable reference (path {path:?})")]
    NotObservable { path: String, property: String },

    #[error("Collection marker used on a non-collection (path {path:?})")]
    NotACollection { path: String },

    #[error("Instance belongs to a different engine")]
    ForeignEngine,

    #[error("Engine has been dropped")]
    EngineDropped,
}

/// A dispatched callback failed. Reported at the flush boundary and never
/// propagated into the remaining dispatch.
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum CallbackError {
    #[error("Callback for {path:?} (subscription {subscription}) panicked: {message}")]
    Panicked {
        subscription: SubscriptionId,
        path: String,
        message: String,
    },
}

/// Main error type for registration calls.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ObserveError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),
}

/// Type-erasure mismatch inside the engine. Never returned: it is raised
/// as a panic because it can only come from a registry bug.
#[derive(Debug, Error)]
#[error("Internal invariant violated: callback expects ({expected_observer}, {expected_observed}); observer matches: {observer_matches}, observed matches: {observed_matches}")]
pub struct InvariantViolation {
    pub expected_observer: &'static str,
    pub expected_observed: &'static str,
    pub observer_matches: bool,
    pub observed_matches: bool,
}

/// Result type for observation operations.
pub type Result<T> = std::result::Result<T, ObserveError>;

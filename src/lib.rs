//! # Observable
//!
//! In-process property-change observation for Rust object graphs.
//!
//! ## Core Concepts
//!
//! - **Properties**: Observed types embed an [`ObjectCore`] and declare
//!   [`Property`] fields; every write is intercepted after it commits
//! - **Paths**: Dotted property paths (`"address.city"`, `"items.#"`,
//!   `"*"`) parsed once and cached process-wide
//! - **Subscriptions**: Owned by the observed instance, weak on the
//!   observer; either side going away silently ends delivery
//! - **Dispatch**: Changes are coalesced per subscription and delivered
//!   in registration order when the host calls [`Engine::flush`]
//! - **Bindings**: a [`Protocol`] keeps a receiver's properties in sync
//!   with an observed instance
//!
//! ## Example
//!
//! ```ignore
//! use observable::{Engine, EngineConfig, ObjectCore, Observable, Property, Tell};
//! use std::rc::Rc;
//!
//! struct Model {
//!     core: ObjectCore,
//!     int_property: Property<i32>,
//! }
//!
//! impl Observable for Model {
//!     fn core(&self) -> &ObjectCore {
//!         &self.core
//!     }
//! }
//!
//! let engine = Engine::new(EngineConfig::default());
//! let core = ObjectCore::new(&engine);
//! let int_property = Property::new(&core, "int_property", 0);
//! let model = Rc::new(Model { core, int_property });
//!
//! let view = Rc::new(View::default());
//! model.tell(&view, "int_property", |view, model| {
//!     view.render(model.int_property.get());
//! })?;
//!
//! model.int_property.set(5);
//! engine.flush();
//! ```

pub mod binder;
pub mod collections;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod intercept;
pub mod lazy;
pub mod path;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use binder::Protocol;
pub use collections::{CollectionChange, MapChange, ObservableMap, ObservableSet, ObservableVec, SetChange};
pub use dispatch::{CallbackEnvelope, FlushReport};
pub use engine::{
    Engine, EngineConfig, ObserverReport, PropertyReport, SubscriptionReport, Tell,
};
pub use error::{
    CallbackError, InvariantViolation, ObserveError, ParseError, RegistrationError, Result,
};
pub use intercept::{InterceptorHandle, Link, ObjectCore, Observable, Property, PropertyValue};
pub use lazy::LazyProperty;
pub use path::{resolve, PathCache, PropertyPath, Segment, COLLECTION_MARKER, WILDCARD};
pub use subscriptions::{SubscriptionHandle, TellReport};
pub use types::*;

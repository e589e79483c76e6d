//! Mutation interception.
//!
//! Observed types opt in explicitly: they embed an [`ObjectCore`] and declare
//! their observable state as [`Property`] fields. Every write goes through
//! the property's setter, which commits the value and then reports the
//! change to the core. The core keeps a reference-counted interceptor table
//! (only keys with at least one installation do any work on write) and the
//! instance's observation index.
//!
//! # Example
//!
//! ```ignore
//! struct Person {
//!     core: ObjectCore,
//!     name: Property<String>,
//!     address: Property<Link<Address>>,
//! }
//!
//! impl Observable for Person {
//!     fn core(&self) -> &ObjectCore {
//!         &self.core
//!     }
//! }
//! ```

mod object;
mod property;

use std::any::Any;

pub use object::{InterceptorHandle, ObjectCore};
pub use property::{Link, Property, PropertyValue};

pub(crate) use object::{ObjectInner, ObjectKind};
pub(crate) use property::Slot;

/// An instance whose properties can be observed.
pub trait Observable: Any {
    fn core(&self) -> &ObjectCore;
}

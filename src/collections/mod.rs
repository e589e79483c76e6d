//! Observable collections.
//!
//! A collection is the only kind of instance a `#` path segment can
//! address. Membership changes fire `#`; the element count is an ordinary
//! property named `count`. Three shapes are provided: an ordered
//! [`ObservableVec`], a keyed [`ObservableMap`] and an [`ObservableSet`].

mod map;
mod set;
mod vec;

pub use map::{MapChange, ObservableMap};
pub use set::{ObservableSet, SetChange};
pub use vec::{CollectionChange, ObservableVec};

//! Property path resolution.
//!
//! A path is a dotted string rooted at an observed instance:
//! - `name` observes one property
//! - `link.name` follows observable references, re-linking when `link` changes
//! - `link.*` observes every declared property of the node reached by `link`
//! - `items.#` observes membership changes of the collection in `items`
//!
//! Wildcards and collection markers are only allowed as the final segment.
//! A `*` does not cover `#`: membership changes only reach `#` paths, and
//! the collection's `count` property reaches `*` when the length changes.
//! Resolved paths are cached process-wide by their canonical string.
//!
//! # Example
//!
//! ```ignore
//! let path = resolve("owner.address.city")?;
//! assert_eq!(path.len(), 3);
//! assert!(Arc::ptr_eq(&path, &resolve("owner.address.city")?));
//! ```

mod resolver;
mod types;

pub use resolver::{resolve, PathCache, DEFAULT_PATH_CACHE_CAPACITY};
pub use types::{PropertyPath, Segment, COLLECTION_MARKER, WILDCARD};

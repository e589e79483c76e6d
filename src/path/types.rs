//! Path segment and parsed path types.

use std::fmt;

/// Token for a wildcard segment.
pub const WILDCARD: &str = "*";

/// Token for a collection-membership segment.
pub const COLLECTION_MARKER: &str = "#";

/// One component of a property path.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Segment {
    /// A plain property name.
    Named(String),
    /// Any direct property of the current node.
    Wildcard,
    /// Any membership change of the collection at this position.
    CollectionAny,
}

impl Segment {
    /// The key under which interceptors for this segment are installed.
    pub fn key(&self) -> &str {
        match self {
            Segment::Named(name) => name,
            Segment::Wildcard => WILDCARD,
            Segment::CollectionAny => COLLECTION_MARKER,
        }
    }

    pub fn is_terminal_only(&self) -> bool {
        !matches!(self, Segment::Named(_))
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// An immutable, parsed property path.
///
/// Equal canonical strings produce equal paths; the resolver additionally
/// hands out the same shared instance while it stays cached.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PropertyPath {
    canonical: String,
    segments: Vec<Segment>,
}

impl PropertyPath {
    pub(crate) fn from_parts(canonical: String, segments: Vec<Segment>) -> Self {
        Self {
            canonical,
            segments,
        }
    }

    /// The canonical string form, used for caching and deduplication.
    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn segment(&self, depth: usize) -> Option<&Segment> {
        self.segments.get(depth)
    }

    /// Number of segments. Never zero.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether `depth` names the last segment.
    pub fn is_terminal(&self, depth: usize) -> bool {
        depth + 1 == self.segments.len()
    }

    /// The first segment's property name.
    pub fn root(&self) -> &str {
        self.segments.first().map(Segment::key).unwrap_or_default()
    }
}

impl fmt::Debug for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PropertyPath({:?})", self.canonical)
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}
